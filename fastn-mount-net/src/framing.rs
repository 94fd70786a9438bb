//! Newline-delimited framing used for stream headers and the control socket.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one line, without the trailing newline.
///
/// At most `limit` bytes are consumed. Bytes after the newline stay buffered
/// in `reader`, so the same reader can be used for the payload that follows.
pub async fn next_line<R>(reader: &mut R, limit: u64) -> eyre::Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = (&mut *reader).take(limit).read_line(&mut line).await?;
    if read == 0 {
        eyre::bail!("stream closed before a line was received");
    }
    if !line.ends_with('\n') {
        eyre::bail!("line exceeds {limit} bytes or stream ended mid-line");
    }
    line.pop();
    if line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

/// Read one line and decode it as JSON.
pub async fn next_json<R, T>(reader: &mut R, limit: u64) -> eyre::Result<T>
where
    R: AsyncBufRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    let line = next_line(reader, limit).await?;
    Ok(serde_json::from_str(&line)?)
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> eyre::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

pub async fn write_json_line<W, T>(writer: &mut W, value: &T) -> eyre::Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let json = serde_json::to_string(value)?;
    write_line(writer, &json).await
}
