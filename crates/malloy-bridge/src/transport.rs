//! Content-Length framed message transport
//!
//! Workers speak JSON-RPC over their stdio using the same framing as LSP:
//! a `Content-Length` header block terminated by an empty line, followed by
//! exactly that many bytes of UTF-8 JSON.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{BridgeError, Result};
use crate::protocol::JsonRpcMessage;

/// Largest frame body accepted from a peer
pub const MAX_MESSAGE_SIZE: usize = 128 * 1024 * 1024;

fn broken_header(reason: String) -> BridgeError {
    BridgeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, reason))
}

/// Reads framed messages from a byte stream
pub struct MessageReader<R> {
    reader: R,
}

impl<R> MessageReader<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next message
    ///
    /// Returns `Ok(None)` on a clean end of stream before any header byte.
    /// A body that is not a valid JSON-RPC message yields
    /// `BridgeError::Protocol`; the frame has been consumed, so the caller may
    /// keep reading. IO errors and broken headers are fatal for the stream and
    /// are reported as `BridgeError::Io`. A missing, unparsable or oversized
    /// `Content-Length` counts as a broken header.
    pub async fn read_message(&mut self) -> Result<Option<JsonRpcMessage>> {
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            let read = self.reader.read_line(&mut line).await?;
            if read == 0 {
                if saw_header {
                    return Err(BridgeError::Io(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "stream ended inside a header block",
                    )));
                }
                return Ok(None);
            }

            let line = line.trim();
            if line.is_empty() {
                if saw_header {
                    break;
                }
                // Stray blank line between frames
                continue;
            }
            saw_header = true;

            if let Some((key, value)) = line.split_once(':') {
                if key.trim().eq_ignore_ascii_case("content-length") {
                    let length = value
                        .trim()
                        .parse::<usize>()
                        .map_err(|e| broken_header(format!("Invalid Content-Length: {}", e)))?;
                    content_length = Some(length);
                }
            }
        }

        let content_length = content_length
            .ok_or_else(|| broken_header("Missing Content-Length header".to_string()))?;
        if content_length > MAX_MESSAGE_SIZE {
            return Err(broken_header(format!(
                "Content-Length {} exceeds the {} byte limit",
                content_length, MAX_MESSAGE_SIZE
            )));
        }

        let mut content = vec![0u8; content_length];
        self.reader.read_exact(&mut content).await?;

        let json = String::from_utf8(content)
            .map_err(|e| BridgeError::Protocol(format!("Invalid UTF-8: {}", e)))?;

        JsonRpcMessage::from_json(&json).map(Some)
    }

}

/// Writes framed messages to a byte stream
pub struct MessageWriter<W> {
    writer: W,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Frame, write and flush one message
    pub async fn write_message(&mut self, message: &JsonRpcMessage) -> Result<()> {
        let json = message.to_json()?;
        let frame = format!("Content-Length: {}\r\n\r\n{}", json.len(), json);
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
