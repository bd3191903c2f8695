use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use trellis_bsp::{
    protocol::resolve_build_target_identifier, resolve_launch_command, BspConnection, BspSession,
    BuildServer, BuildTargetIdentifier, CancellationToken, ChunkingBuildServer,
    ConnectionOptions, ConsoleKind, ConsoleRouter,
};
use trellis_config::{init_tracing, TrellisConfig};
use trellis_project::{
    CollectorOptions, InMemoryWorkspace, Library, MagicMetaModelDiff, Module,
    ProjectDetailsCollector, SyncError, SyncTask, TaskRunner,
};

/// Exit code for runs interrupted with Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(
    name = "trellis",
    version,
    about = "Trellis CLI (build server sync, targets, compile)"
)]
struct Cli {
    /// Project root (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import the project from its build server and print the resulting modules
    Sync(SyncArgs),
    /// List the build targets reported by the server
    Targets(TargetsArgs),
    /// Compile one or more targets
    Compile(CompileArgs),
}

#[derive(Args)]
struct SyncArgs {
    /// Load every target instead of the default selection
    #[arg(long)]
    all: bool,
    /// Emit JSON suitable for CI
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct TargetsArgs {
    /// Emit the full project snapshot as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CompileArgs {
    /// Target URIs, display names or labels
    #[arg(required = true)]
    targets: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            2
        }
    };

    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("project root {} does not exist", cli.root.display()))?;
    let config = TrellisConfig::load(&root)?;
    init_tracing(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(async move {
        let connection = Connection::open(&root, &config)?;
        let result = match cli.command {
            Command::Sync(args) => sync(&connection, &config, args).await,
            Command::Targets(args) => targets(&connection, args).await,
            Command::Compile(args) => compile(&connection, args).await,
        };
        connection.close().await;
        result
    })
}

/// A running build server with its consoles.
struct Connection {
    root: PathBuf,
    session: BspSession,
    router: Arc<ConsoleRouter>,
    options: CollectorOptions,
    min_chunk_size: usize,
}

impl Connection {
    fn open(root: &Path, config: &TrellisConfig) -> Result<Self> {
        let command =
            resolve_launch_command(root, &config.bsp).ok_or_else(|| SyncError::NotConfigured {
                root: root.to_path_buf(),
            })?;
        let router = Arc::new(ConsoleRouter::tracing());
        let session = BspSession::spawn(
            command,
            router.clone(),
            ConnectionOptions::from_settings(&config.bsp),
        )?;
        Ok(Self {
            root: root.to_path_buf(),
            session,
            router,
            options: CollectorOptions::from_config(config),
            min_chunk_size: config.bsp.min_chunk_size(),
        })
    }

    fn server(&self) -> ChunkingBuildServer<BspConnection> {
        ChunkingBuildServer::new(self.session.connection().clone(), self.min_chunk_size)
    }

    fn collector(&self) -> ProjectDetailsCollector<ChunkingBuildServer<BspConnection>> {
        ProjectDetailsCollector::new(
            self.server(),
            &self.root,
            self.options.clone(),
            self.router.console(ConsoleKind::Sync).clone(),
        )
    }

    async fn close(self) {
        if let Err(err) = self.session.shutdown().await {
            tracing::warn!(target: "trellis.cli", error = %err, "BSP server did not shut down cleanly");
        }
    }
}

/// Cancels `cancel` on Ctrl-C.
fn cancel_on_ctrl_c(cancel: impl FnOnce() + Send + 'static) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel();
        }
    });
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncReport {
    modules: Vec<Module>,
    libraries: Vec<Library>,
    invalid_targets: Vec<BuildTargetIdentifier>,
}

async fn sync(connection: &Connection, config: &TrellisConfig, args: SyncArgs) -> Result<i32> {
    let task = Arc::new(SyncTask::new(connection.collector(), config.sync.clone()));
    {
        let task = Arc::clone(&task);
        cancel_on_ctrl_c(move || {
            task.cancel();
        });
    }

    let mut diff = match task.sync().await {
        Ok(diff) => diff,
        Err(err) if err.is_cancelled() => {
            eprintln!("sync cancelled");
            return Ok(EXIT_CANCELLED);
        }
        Err(err) => return Err(err.into()),
    };

    if args.all {
        let rest = task
            .with_model(|model| {
                let pending: Vec<BuildTargetIdentifier> =
                    model.not_loaded_targets().cloned().collect();
                let mut diff = MagicMetaModelDiff::default();
                for id in pending {
                    match model.load_target(&id) {
                        Ok(loaded) => diff.merge(loaded),
                        Err(err) => tracing::warn!(
                            target: "trellis.cli",
                            build_target = %id,
                            error = %err,
                            "could not load build target"
                        ),
                    }
                }
                diff
            })
            .unwrap_or_default();
        diff.merge(rest);
    }

    let invalid_targets = task
        .with_model(|model| model.invalid_targets().cloned().collect())
        .unwrap_or_default();
    let mut workspace = InMemoryWorkspace::default();
    diff.apply_on_workspace_model(&mut workspace);
    let report = SyncReport {
        modules: workspace.modules.into_values().collect(),
        libraries: workspace.libraries.into_values().collect(),
        invalid_targets,
    };

    if args.json {
        print_json(&report)?;
    } else {
        println!(
            "sync: {} modules, {} libraries",
            report.modules.len(),
            report.libraries.len()
        );
        for module in &report.modules {
            println!("  {}", module.name());
        }
        for id in &report.invalid_targets {
            println!("  invalid: {id}");
        }
    }
    Ok(0)
}

async fn targets(connection: &Connection, args: TargetsArgs) -> Result<i32> {
    let collector = connection.collector();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        cancel_on_ctrl_c(move || cancel.cancel());
    }

    let details = match collector.collect(&cancel).await {
        Ok(details) => details,
        Err(err) if err.is_cancelled() => return Ok(EXIT_CANCELLED),
        Err(err) => return Err(err.into()),
    };

    if args.json {
        print_json(&details)?;
        return Ok(0);
    }
    for target in &details.targets {
        let languages = target.language_ids.join(",");
        match &target.display_name {
            Some(name) => println!("{}\t{name}\t[{languages}]", target.id),
            None => println!("{}\t[{languages}]", target.id),
        }
    }
    Ok(0)
}

async fn compile(connection: &Connection, args: CompileArgs) -> Result<i32> {
    let collector = connection.collector();
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        cancel_on_ctrl_c(move || cancel.cancel());
    }

    collector.initialize(&cancel).await?;
    let known = collector
        .server()
        .workspace_build_targets(&cancel)
        .await
        .context("failed to list build targets")?
        .targets;
    let targets: Vec<BuildTargetIdentifier> = args
        .targets
        .iter()
        .map(|requested| resolve_build_target_identifier(requested, &known))
        .collect();

    let runner = TaskRunner::new(connection.session.connection().clone(), connection.router.clone());
    let outcome = runner.compile(targets, &cancel).await;
    match &outcome.message {
        Some(message) => println!("compile: {:?} ({message})", outcome.status),
        None => println!("compile: {:?}", outcome.status),
    }

    Ok(if outcome.is_ok() {
        0
    } else if cancel.is_cancelled() {
        EXIT_CANCELLED
    } else {
        1
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)?;
    println!("{out}");
    Ok(())
}
