//! Plain network side of a forward: binding listeners and dialing targets.

use crate::NetAddr;

/// Bind a TCP listener on `addr`.
///
/// Returns the listener together with the address it actually bound, which
/// differs from `addr` when port 0 was requested.
pub(crate) async fn bind(addr: &NetAddr) -> crate::Result<(tokio::net::TcpListener, NetAddr)> {
    addr.require_tcp()?;
    let bind_error = |source: std::io::Error| crate::Error::Bind {
        address: addr.to_string(),
        source,
    };

    let addrs = resolve(addr).await.map_err(bind_error)?;
    let listener = tokio::net::TcpListener::bind(addrs.as_slice())
        .await
        .map_err(bind_error)?;
    let local = listener.local_addr().map_err(bind_error)?;

    Ok((listener, NetAddr::tcp(local)))
}

/// Open a TCP connection to `addr`.
pub(crate) async fn dial(addr: &NetAddr) -> crate::Result<tokio::net::TcpStream> {
    addr.require_tcp()?;
    let dial_error = |source: std::io::Error| crate::Error::Dial {
        address: addr.to_string(),
        source,
    };

    let addrs = resolve(addr).await.map_err(dial_error)?;
    let stream = tokio::net::TcpStream::connect(addrs.as_slice())
        .await
        .map_err(dial_error)?;
    // forwarded traffic is often interactive
    stream.set_nodelay(true).map_err(dial_error)?;
    Ok(stream)
}

async fn resolve(addr: &NetAddr) -> std::io::Result<Vec<std::net::SocketAddr>> {
    let addrs = addr.resolve().await?;
    if addrs.is_empty() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{addr} did not resolve to any address"),
        ));
    }
    Ok(addrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_reports_assigned_port() {
        let (_listener, bound) = bind(&"/ip4/127.0.0.1/tcp/0".parse().unwrap())
            .await
            .unwrap();
        assert_ne!(bound.port, 0);
    }

    #[tokio::test]
    async fn test_bind_in_use() {
        let (_listener, bound) = bind(&"/ip4/127.0.0.1/tcp/0".parse().unwrap())
            .await
            .unwrap();
        assert!(matches!(
            bind(&bound).await,
            Err(crate::Error::Bind { .. })
        ));
    }

    #[tokio::test]
    async fn test_udp_not_forwardable() {
        assert!(matches!(
            dial(&"/ip4/127.0.0.1/udp/53".parse().unwrap()).await,
            Err(crate::Error::UnsupportedTransport { .. })
        ));
    }
}
