//! Daemon: the forwarding engine on an iroh endpoint, administered through
//! the control socket.

use colored::Colorize;
use fs2::FileExt;
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "lock.file";
const CONFIG_FILE: &str = "config.json";

pub async fn run(home: PathBuf) -> eyre::Result<()> {
    tokio::fs::create_dir_all(&home).await?;
    let _lock = lock_home(&home)?;

    let config = fastn_mount::EngineConfig::load(&home.join(CONFIG_FILE)).await?;
    let secret_key = fastn_mount_net::read_or_create_key(&home).await?;
    let endpoint = fastn_mount_net::create_endpoint(secret_key).await?;
    let network = std::sync::Arc::new(fastn_mount::network::iroh::IrohNetwork::new(endpoint));
    let engine = fastn_mount::ForwardingEngine::new(network.clone(), config);

    println!("{} fastn-mount daemon started", "✓".green());
    println!("   Peer ID: {}", engine.local_peer());
    println!("   Home: {}", home.display());

    let cancel = tokio_util::sync::CancellationToken::new();
    let events = tokio::spawn(log_events(engine.subscribe(), cancel.clone()));
    let socket_path = home.join(fastn_mount::control::CONTROL_SOCKET);
    let control = tokio::spawn({
        let engine = engine.clone();
        let cancel = cancel.clone();
        async move { fastn_mount::control::serve(&socket_path, engine, cancel).await }
    });

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            println!("{} shutting down", "⏹".yellow());
        }
        served = wait_control(control) => served?,
    }

    cancel.cancel();
    if let Err(e) = engine.shutdown().await {
        tracing::warn!("errors during shutdown: {e}");
    }
    network.close().await;
    let _ = events.await;
    Ok(())
}

async fn wait_control(control: tokio::task::JoinHandle<eyre::Result<()>>) -> eyre::Result<()> {
    control.await?
}

/// Take the exclusive daemon lock; held until the returned file is dropped.
fn lock_home(home: &Path) -> eyre::Result<std::fs::File> {
    let lock_path = home.join(LOCK_FILE);
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&lock_path)?;

    if let Err(e) = lock_file.try_lock_exclusive() {
        eyre::bail!(
            "another daemon is already running (lock file: {}): {e}",
            lock_path.display()
        );
    }
    tracing::debug!(path = %lock_path.display(), "acquired daemon lock");
    Ok(lock_file)
}

async fn log_events(
    mut events: tokio::sync::broadcast::Receiver<fastn_mount::Event>,
    cancel: tokio_util::sync::CancellationToken,
) {
    use fastn_mount::Event;
    use tokio::sync::broadcast::error::RecvError;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(Event::ListenerOpened { listener }) => println!(
                "{} {} {} -> {}",
                "+".green(),
                listener.protocol,
                listener.listen_address,
                listener.target_address
            ),
            Ok(Event::ListenerClosed { listener }) => println!(
                "{} {} {} -> {}",
                "-".red(),
                listener.protocol,
                listener.listen_address,
                listener.target_address
            ),
            Ok(Event::SessionFailed { listener, error }) => {
                eprintln!("{} {}: {error}", "!".red(), listener.protocol)
            }
            Ok(Event::StreamOpened { .. } | Event::StreamClosed { .. }) => {}
            Err(RecvError::Lagged(missed)) => tracing::debug!(missed, "event log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}
