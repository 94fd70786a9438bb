//! Opening and accepting protocol streams on an iroh connection.

use crate::{ACK, MAX_HEADER_LEN, StreamHeader};

/// Receive half of a protocol stream.
///
/// Buffered, because the header and ACK lines are read through the same
/// buffer that later carries the forwarded bytes.
pub type RecvHalf = tokio::io::BufReader<iroh::endpoint::RecvStream>;

/// Open a protocol stream on `conn` and wait for the remote to accept it.
pub async fn open_stream(
    conn: &iroh::endpoint::Connection,
    protocol: &str,
) -> eyre::Result<(iroh::endpoint::SendStream, RecvHalf)> {
    let (mut send, recv) = conn.open_bi().await?;
    let mut recv = tokio::io::BufReader::new(recv);

    crate::write_json_line(&mut send, &StreamHeader::new(protocol)).await?;

    let reply = crate::next_line(&mut recv, MAX_HEADER_LEN).await?;
    if reply != ACK {
        eyre::bail!("peer refused protocol {protocol}: {reply}");
    }

    Ok((send, recv))
}

/// Accept the next stream on `conn`.
///
/// Only fails when the connection itself is gone. The header is read
/// separately with [`read_header`], so one slow or broken stream does not
/// hold up the next `accept_bi`.
pub async fn accept_stream(
    conn: &iroh::endpoint::Connection,
) -> eyre::Result<(iroh::endpoint::SendStream, RecvHalf)> {
    let (send, recv) = conn.accept_bi().await?;
    Ok((send, tokio::io::BufReader::new(recv)))
}

/// Read the header of an accepted stream.
///
/// The caller decides whether to [`ack_stream`] or [`reject_stream`] it.
pub async fn read_header<R>(recv: &mut R) -> eyre::Result<StreamHeader>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    crate::next_json(recv, MAX_HEADER_LEN).await
}

pub async fn ack_stream<W>(send: &mut W) -> eyre::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    crate::write_line(send, ACK).await
}

/// Tell the opener why the stream is refused, then finish our side.
pub async fn reject_stream<W>(mut send: W, reason: &str) -> eyre::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;

    crate::write_line(&mut send, reason).await?;
    send.shutdown().await?;
    Ok(())
}
