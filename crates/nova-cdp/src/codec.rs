//! `Content-Length` framed JSON messages.
//!
//! Both the backend relay and the frontend server exchange JSON objects framed like DAP/LSP
//! messages: a `Content-Length: N` header, an empty line, then exactly `N` bytes of JSON.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::types::{CdpError, Result};

/// Maximum allowed message payload size (in bytes).
///
/// Caps the incoming `Content-Length` value so a malformed peer cannot force a huge
/// allocation before the body is read. Large string and list previews travel through this
/// channel, so the limit is generous.
pub const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024; // 16 MiB

/// Maximum allowed size of a single header line (in bytes).
pub const MAX_HEADER_LINE_BYTES: usize = 8 * 1024; // 8 KiB

pub struct MessageReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
        }
    }

    /// Read the next message. Returns `Ok(None)` on a clean end of stream.
    pub async fn read_value(&mut self) -> Result<Option<Value>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();

        loop {
            line.clear();
            let n = (&mut self.reader)
                .take(MAX_HEADER_LINE_BYTES as u64 + 1)
                .read_line(&mut line)
                .await?;
            if n == 0 {
                return Ok(None);
            }
            if n > MAX_HEADER_LINE_BYTES {
                return Err(CdpError::Protocol(format!(
                    "header line exceeds {MAX_HEADER_LINE_BYTES} bytes"
                )));
            }

            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                if content_length.is_none() {
                    // Tolerate stray blank lines between messages.
                    continue;
                }
                break;
            }

            let Some((name, value)) = trimmed.split_once(':') else {
                continue;
            };

            if name.eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(value.parse::<usize>().map_err(|e| {
                    CdpError::Protocol(format!("invalid Content-Length {value:?}: {e}"))
                })?);
            }
        }

        let Some(len) = content_length else {
            return Err(CdpError::Protocol("missing Content-Length header".to_string()));
        };
        if len > MAX_MESSAGE_BYTES {
            return Err(CdpError::Protocol(format!(
                "message of {len} bytes exceeds the {MAX_MESSAGE_BYTES} byte limit"
            )));
        }

        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf).await?;
        Ok(Some(serde_json::from_slice::<Value>(&buf)?))
    }
}

pub struct MessageWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> MessageWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub async fn write_value(&mut self, value: &Value) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.writer
            .write_all(format!("Content-Length: {}\r\n\r\n", bytes.len()).as_bytes())
            .await?;
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}
