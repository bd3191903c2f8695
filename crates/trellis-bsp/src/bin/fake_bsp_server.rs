//! Test-only BSP server used by integration tests.
//!
//! Speaks just enough framing/JSON-RPC to answer requests from a JSON fixture, and can simulate
//! misbehaving servers (never answering a method, failing a method, calling back into the
//! client).

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::{
    collections::HashSet,
    io::{BufRead, BufReader, Read, Write},
    path::PathBuf,
};

#[derive(Default)]
struct Options {
    fixture: Option<PathBuf>,
    log: Option<PathBuf>,
    hang_methods: HashSet<String>,
    fail_methods: HashSet<String>,
    request_on_initialized: bool,
}

fn parse_args() -> Options {
    // Modes:
    // - `--fixture <PATH>`: JSON with `initialize`, `responses` and `notifications` maps.
    // - `--log <PATH>`: append every received method (or `response:<id>[:error:<code>]`) to PATH.
    // - `--hang-method <METHOD>`: accept the request but never respond to it.
    // - `--fail-method <METHOD>`: respond with an internal error.
    // - `--request-on-initialized`: send a server->client request after `build/initialized`.
    let mut options = Options::default();
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixture" => options.fixture = args.next().map(PathBuf::from),
            "--log" => options.log = args.next().map(PathBuf::from),
            "--hang-method" => {
                if let Some(method) = args.next() {
                    options.hang_methods.insert(method);
                }
            }
            "--fail-method" => {
                if let Some(method) = args.next() {
                    options.fail_methods.insert(method);
                }
            }
            "--request-on-initialized" => options.request_on_initialized = true,
            _ => {}
        }
    }
    options
}

fn main() -> Result<()> {
    let options = parse_args();
    let fixture = match &options.fixture {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read fixture {}", path.display()))?;
            serde_json::from_str::<Value>(&text).context("invalid fixture JSON")?
        }
        None => json!({}),
    };

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut reader = BufReader::new(stdin.lock());
    let mut writer = stdout.lock();

    while let Some(msg) = read_message(&mut reader)? {
        let method = msg.get("method").and_then(Value::as_str);
        let id = msg.get("id").cloned().filter(|id| !id.is_null());

        log_line(&options, &msg)?;

        let Some(method) = method else {
            // A response to our own request.
            continue;
        };

        if method == "build/exit" {
            std::process::exit(0);
        }

        let Some(id) = id else {
            if method == "build/initialized" && options.request_on_initialized {
                write_message(
                    &mut writer,
                    &json!({
                        "jsonrpc": "2.0",
                        "id": "server-1",
                        "method": "window/showMessageRequest",
                        "params": { "type": 3, "message": "pick one" },
                    }),
                )?;
            }
            continue;
        };

        if options.hang_methods.contains(method) {
            continue;
        }

        if options.fail_methods.contains(method) {
            write_message(
                &mut writer,
                &json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": { "code": -32603, "message": format!("{method} failed") },
                }),
            )?;
            continue;
        }

        if let Some(notifications) = fixture
            .get("notifications")
            .and_then(|n| n.get(method))
            .and_then(Value::as_array)
        {
            for notification in notifications {
                let mut notification = notification.clone();
                if let Some(obj) = notification.as_object_mut() {
                    obj.insert("jsonrpc".to_string(), json!("2.0"));
                }
                write_message(&mut writer, &notification)?;
            }
        }

        let reply = match response_for(&fixture, method, msg.get("params")) {
            Some(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
            None => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method not found: {method}") },
            }),
        };
        write_message(&mut writer, &reply)?;
    }

    Ok(())
}

fn response_for(fixture: &Value, method: &str, params: Option<&Value>) -> Option<Value> {
    match method {
        "build/initialize" => Some(fixture.get("initialize").cloned().unwrap_or_else(|| {
            json!({
                "displayName": "fake-bsp",
                "version": "0.1.0",
                "bspVersion": "2.1.0",
                "capabilities": {
                    "compileProvider": { "languageIds": ["java"] },
                    "resourcesProvider": true,
                    "dependencySourcesProvider": true,
                },
            })
        })),
        "build/shutdown" => Some(Value::Null),
        _ => {
            let mut result = fixture.get("responses")?.get(method)?.clone();
            filter_items_by_targets(&mut result, params);
            if let Some(origin) = params.and_then(|p| p.get("originId")) {
                if let Some(obj) = result.as_object_mut() {
                    obj.insert("originId".to_string(), origin.clone());
                }
            }
            Some(result)
        }
    }
}

/// Keep only the `items` that belong to a requested target, so chunked requests see realistic
/// partial answers.
fn filter_items_by_targets(result: &mut Value, params: Option<&Value>) {
    let Some(targets) = params
        .and_then(|p| p.get("targets"))
        .and_then(Value::as_array)
    else {
        return;
    };
    let Some(items) = result.get_mut("items").and_then(Value::as_array_mut) else {
        return;
    };
    items.retain(|item| item.get("target").is_some_and(|target| targets.contains(target)));
}

fn log_line(options: &Options, msg: &Value) -> Result<()> {
    let Some(path) = &options.log else {
        return Ok(());
    };
    let method = msg.get("method").and_then(Value::as_str);
    let line = match (method, msg.get("id")) {
        (Some(method), _) => method.to_string(),
        (None, Some(id)) => match msg.pointer("/error/code") {
            Some(code) => format!("response:{id}:error:{code}"),
            None => format!("response:{id}"),
        },
        (None, None) => "unknown".to_string(),
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log {}", path.display()))?;
    writeln!(file, "{line}")?;
    Ok(())
}

fn read_message(reader: &mut impl BufRead) -> Result<Option<Value>> {
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line)?;
        if bytes == 0 {
            return Ok(None);
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(value.trim().parse::<usize>()?);
            }
        }
    }

    let len = content_length.ok_or_else(|| anyhow!("missing Content-Length header"))?;
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .context("failed to read framed JSON-RPC message")?;
    Ok(Some(serde_json::from_slice(&buf)?))
}

fn write_message(writer: &mut impl Write, msg: &Value) -> Result<()> {
    let body = serde_json::to_vec(msg)?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(&body)?;
    writer.flush()?;
    Ok(())
}
