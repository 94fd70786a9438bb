//! Client commands: send one request to the daemon and print the answer.

use colored::Colorize;
use fastn_mount::control::{ControlRequest, ControlResponse};
use fastn_mount::{ListenerInfo, StreamInfo};
use std::path::Path;

async fn send(home: &Path, request: ControlRequest) -> eyre::Result<ControlResponse> {
    let socket_path = home.join(fastn_mount::control::CONTROL_SOCKET);
    if !socket_path.exists() {
        eprintln!(
            "{} Daemon not running. Socket not found: {}",
            "✗".red(),
            socket_path.display()
        );
        eprintln!("   Start daemon with: fastn-mount daemon");
        eyre::bail!("daemon not available");
    }
    fastn_mount::control::request(&socket_path, &request).await
}

/// `forward` and `listen`: print the listener that was created.
pub async fn opened(home: &Path, request: ControlRequest) -> eyre::Result<()> {
    let listener: ListenerInfo = send(home, request).await?.into_result()?;
    println!(
        "{} {} {} -> {}",
        "✓".green(),
        listener.protocol,
        listener.listen_address,
        listener.target_address
    );
    Ok(())
}

/// `close` and `stream close`.
pub async fn closed(home: &Path, request: ControlRequest) -> eyre::Result<()> {
    let listeners = matches!(request, ControlRequest::Close { .. });
    let count: usize = send(home, request).await?.into_result()?;
    if listeners {
        println!("Closed {count} stream(s)");
    }
    Ok(())
}

pub async fn list_listeners(home: &Path, headers: bool) -> eyre::Result<()> {
    let listeners: Vec<ListenerInfo> = send(home, ControlRequest::Ls).await?.into_result()?;
    print!("{}", listener_table(&listeners, headers));
    Ok(())
}

pub async fn list_streams(home: &Path, headers: bool) -> eyre::Result<()> {
    let streams: Vec<StreamInfo> = send(home, ControlRequest::StreamLs).await?.into_result()?;
    print!("{}", stream_table(&streams, headers));
    Ok(())
}

pub async fn peer_id(home: &Path) -> eyre::Result<()> {
    let peer: String = send(home, ControlRequest::PeerId).await?.into_result()?;
    println!("{peer}");
    Ok(())
}

fn listener_table(listeners: &[ListenerInfo], headers: bool) -> String {
    let mut rows = Vec::new();
    if headers {
        rows.push(vec![
            "Protocol".to_string(),
            "Listen Address".to_string(),
            "Target Address".to_string(),
        ]);
    }
    rows.extend(listeners.iter().map(|l| {
        vec![
            l.protocol.to_string(),
            l.listen_address.to_string(),
            l.target_address.to_string(),
        ]
    }));
    render(&rows)
}

fn stream_table(streams: &[StreamInfo], headers: bool) -> String {
    let mut rows = Vec::new();
    if headers {
        rows.push(vec![
            "ID".to_string(),
            "Protocol".to_string(),
            "Origin".to_string(),
            "Target".to_string(),
        ]);
    }
    rows.extend(streams.iter().map(|s| {
        vec![
            s.handle.to_string(),
            s.protocol.to_string(),
            s.origin_address.to_string(),
            s.target_address.to_string(),
        ]
    }));
    render(&rows)
}

/// Left-align columns with one space of padding; the last column is not
/// padded.
fn render(rows: &[Vec<String>]) -> String {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|c| {
            rows.iter()
                .filter_map(|r| r.get(c))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    for row in rows {
        for (c, cell) in row.iter().enumerate() {
            if c + 1 == row.len() {
                out.push_str(cell);
            } else {
                out.push_str(&format!("{cell:<width$} ", width = widths[c]));
            }
        }
        out.push('\n');
    }
    out
}
