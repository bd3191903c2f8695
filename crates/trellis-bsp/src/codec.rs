//! `Content-Length` framing for JSON-RPC messages.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::BspError;

/// Longest header line accepted, terminator included.
pub const MAX_HEADER_LINE_BYTES: usize = 8 * 1024;

/// Serialize `msg` into a complete frame (header + body).
pub fn encode_message(msg: &Value) -> Result<Vec<u8>, BspError> {
    let body = serde_json::to_vec(msg)?;
    let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    frame.extend_from_slice(&body);
    Ok(frame)
}

pub async fn write_message<W>(writer: &mut W, msg: &Value) -> Result<(), BspError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_message(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message.
///
/// Returns `Ok(None)` on a clean EOF between messages. A body larger than `max_message_bytes` is
/// rejected before any of it is buffered, and so is a header line longer than
/// [`MAX_HEADER_LINE_BYTES`].
pub async fn read_message<R>(
    reader: &mut R,
    max_message_bytes: usize,
) -> Result<Option<Value>, BspError>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes = (&mut *reader)
            .take(MAX_HEADER_LINE_BYTES as u64)
            .read_line(&mut line)
            .await?;
        if bytes == MAX_HEADER_LINE_BYTES && !line.ends_with('\n') {
            return Err(BspError::Protocol {
                message: format!("header line exceeds {MAX_HEADER_LINE_BYTES} bytes"),
            });
        }
        if bytes == 0 {
            if saw_header {
                return Err(BspError::Protocol {
                    message: "unexpected EOF inside message header".to_string(),
                });
            }
            return Ok(None);
        }
        saw_header = true;

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }

        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                let len = value.parse::<usize>().map_err(|_| BspError::Protocol {
                    message: format!("invalid Content-Length header: {value:?}"),
                })?;
                content_length = Some(len);
            }
        }
    }

    let len = content_length.ok_or_else(|| BspError::Protocol {
        message: "missing Content-Length header".to_string(),
    })?;
    if len > max_message_bytes {
        return Err(BspError::MessageTooLarge {
            len,
            max: max_message_bytes,
        });
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(serde_json::from_slice(&buf)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_back_written_frames() {
        let mut buf = Vec::new();
        write_message(&mut buf, &json!({"jsonrpc": "2.0", "method": "a"}))
            .await
            .unwrap();
        write_message(&mut buf, &json!({"jsonrpc": "2.0", "method": "b"}))
            .await
            .unwrap();

        let mut reader = BufReader::new(buf.as_slice());
        let first = read_message(&mut reader, 1024).await.unwrap().unwrap();
        let second = read_message(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(first["method"], "a");
        assert_eq!(second["method"], "b");
        assert!(read_message(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn header_names_are_case_insensitive_and_extra_headers_ignored() {
        let body = br#"{"id":1}"#;
        let frame = format!(
            "content-length: {}\r\nContent-Type: application/vscode-jsonrpc\r\n\r\n",
            body.len()
        );
        let mut bytes = frame.into_bytes();
        bytes.extend_from_slice(body);

        let mut reader = BufReader::new(bytes.as_slice());
        let msg = read_message(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(msg["id"], 1);
    }

    #[tokio::test]
    async fn oversized_messages_are_rejected() {
        let mut reader = BufReader::new(&b"Content-Length: 4096\r\n\r\n"[..]);
        let err = read_message(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            BspError::MessageTooLarge {
                len: 4096,
                max: 1024
            }
        ));
    }

    #[tokio::test]
    async fn missing_content_length_is_a_protocol_error() {
        let mut reader = BufReader::new(&b"X-Other: 1\r\n\r\n{}"[..]);
        let err = read_message(&mut reader, 1024).await.unwrap_err();
        assert!(matches!(err, BspError::Protocol { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn endless_header_lines_are_rejected() {
        let mut reader = BufReader::new(tokio::io::repeat(b'X'));
        let err = read_message(&mut reader, 1024).await.unwrap_err();
        assert!(
            matches!(&err, BspError::Protocol { message } if message.contains("header line")),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn long_but_bounded_header_lines_are_accepted() {
        let padding = "x".repeat(MAX_HEADER_LINE_BYTES / 2);
        let frame = format!("X-Padding: {padding}\r\nContent-Length: 2\r\n\r\n{{}}");

        let mut reader = BufReader::new(frame.as_bytes());
        let msg = read_message(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(msg, json!({}));
    }
}
