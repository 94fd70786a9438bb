//! Unix domain socket carrying one JSON request line and one JSON response
//! line per connection.

use eyre::WrapErr;

use super::{ControlRequest, ControlResponse, execute};
use crate::ForwardingEngine;

const MAX_REQUEST_LEN: u64 = 64 * 1024;
const MAX_RESPONSE_LEN: u64 = 16 * 1024 * 1024;

/// Serve control requests on `socket_path` until `cancel` fires.
///
/// A stale socket file left by a previous daemon is replaced. The file is
/// removed again on return.
pub async fn serve(
    socket_path: &std::path::Path,
    engine: ForwardingEngine,
    cancel: tokio_util::sync::CancellationToken,
) -> eyre::Result<()> {
    if tokio::fs::try_exists(socket_path).await.unwrap_or(false) {
        tokio::fs::remove_file(socket_path)
            .await
            .wrap_err_with(|| format!("failed to remove stale socket {}", socket_path.display()))?;
    }

    let listener = tokio::net::UnixListener::bind(socket_path)
        .wrap_err_with(|| format!("failed to bind control socket {}", socket_path.display()))?;
    tracing::info!(path = %socket_path.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let engine = engine.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, engine).await {
                            tracing::warn!("control client error: {e}");
                        }
                    });
                }
                Err(e) => tracing::warn!("failed to accept control connection: {e}"),
            },
        }
    }

    drop(listener);
    if let Err(e) = tokio::fs::remove_file(socket_path).await {
        tracing::debug!("failed to remove control socket: {e}");
    }
    Ok(())
}

async fn handle_client(stream: tokio::net::UnixStream, engine: ForwardingEngine) -> eyre::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = tokio::io::BufReader::new(reader);

    let response = match fastn_mount_net::next_json::<_, ControlRequest>(&mut reader, MAX_REQUEST_LEN).await {
        Ok(request) => {
            tracing::debug!(?request, "control request");
            execute(&engine, request).await
        }
        Err(e) => ControlResponse::error(format!("invalid request: {e}")),
    };

    fastn_mount_net::write_json_line(&mut writer, &response).await
}

/// Send `request` to the daemon listening on `socket_path`.
pub async fn request(
    socket_path: &std::path::Path,
    request: &ControlRequest,
) -> eyre::Result<ControlResponse> {
    let stream = tokio::net::UnixStream::connect(socket_path)
        .await
        .wrap_err_with(|| {
            format!(
                "daemon not running? failed to connect to {}",
                socket_path.display()
            )
        })?;
    let (reader, mut writer) = stream.into_split();

    fastn_mount_net::write_json_line(&mut writer, request).await?;
    let mut reader = tokio::io::BufReader::new(reader);
    fastn_mount_net::next_json(&mut reader, MAX_RESPONSE_LEN).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join(super::super::CONTROL_SOCKET);

        let hub = crate::network::memory::MemoryHub::new();
        let engine = ForwardingEngine::new(
            std::sync::Arc::new(hub.join("daemon").unwrap()),
            crate::EngineConfig::default(),
        );
        let cancel = tokio_util::sync::CancellationToken::new();
        let server = tokio::spawn({
            let socket_path = socket_path.clone();
            let cancel = cancel.clone();
            async move { serve(&socket_path, engine, cancel).await }
        });

        let mut response = None;
        for _ in 0..50 {
            match request(&socket_path, &ControlRequest::PeerId).await {
                Ok(r) => {
                    response = Some(r);
                    break;
                }
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(20)).await,
            }
        }
        let peer: String = response.unwrap().into_result().unwrap();
        assert_eq!(peer, "daemon");

        let listed: Vec<crate::ListenerInfo> = request(&socket_path, &ControlRequest::Ls)
            .await
            .unwrap()
            .into_result()
            .unwrap();
        assert!(listed.is_empty());

        cancel.cancel();
        server.await.unwrap().unwrap();
        assert!(!socket_path.exists());
    }
}
