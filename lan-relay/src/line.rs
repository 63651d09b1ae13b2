use std::{io, net::IpAddr, sync::Arc};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Port a host listens on unless told otherwise.
pub const DEFAULT_PORT: u16 = 5000;

/// Longest inbound line accepted, excluding the terminator.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// First line a host sends to every peer it accepts.
pub const WELCOME_LINE: &str = "System: Welcome to the chat!";

/// Receives every line observed by a listener or connector.
///
/// Invoked from background tasks; embedders that need a single thread of
/// control should forward into a channel.
pub type MessageHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Formats a chat line the way every peer expects to see it: `"<name>: <text>"`.
pub fn chat_line(identity: &str, text: &str) -> String {
    format!("{identity}: {text}")
}

/// Annotates a line read from a peer with that peer's address.
///
/// The protocol carries no authenticated identity, so the relay marks every
/// line with where it actually came from.
pub fn tag_line(peer: IpAddr, line: &str) -> String {
    format!("[Client {peer}]: {line}")
}

/// Reads one newline-terminated UTF-8 line.
///
/// Returns `Ok(None)` at end of stream. A trailing `\r` is stripped. A final
/// unterminated line is returned as-is. Lines longer than [`MAX_LINE_BYTES`]
/// and lines that are not valid UTF-8 are reported as `InvalidData`.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let limit = MAX_LINE_BYTES as u64 + 1;
    let bytes = (&mut *reader).take(limit).read_until(b'\n', &mut buf).await?;
    if bytes == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if buf.len() > MAX_LINE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line exceeds {MAX_LINE_BYTES} bytes"),
        ));
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Writes `line` followed by a newline and flushes.
///
/// Embedded line breaks become spaces so one call is always one wire line.
pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = line.replace(['\r', '\n'], " ").into_bytes();
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
