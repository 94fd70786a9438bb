//! Addresses used by listeners and streams.
//!
//! Network endpoints are written in path form, `/ip4/127.0.0.1/tcp/4567`,
//! `/ip6/::1/tcp/80` or `/dns/example.com/tcp/80`; the shorthand
//! `127.0.0.1:4567` is accepted on input and means tcp. Peers are written
//! `/p2p/<peer-id>` (`/ipfs/<peer-id>` is accepted on input). A peer address
//! may be prefixed with a network endpoint where the peer can be reached,
//! `/ip4/1.2.3.4/udp/4433/p2p/<peer-id>`.

use std::net::{IpAddr, SocketAddr};

const PEER_SEGMENTS: [&str; 2] = ["p2p", "ipfs"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Host {
    Ip(IpAddr),
    Dns(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
}

impl Transport {
    fn as_str(self) -> &'static str {
        match self {
            Transport::Tcp => "tcp",
            Transport::Udp => "udp",
        }
    }
}

/// A host/transport/port triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetAddr {
    pub host: Host,
    pub transport: Transport,
    pub port: u16,
}

impl NetAddr {
    pub fn tcp(addr: SocketAddr) -> Self {
        Self {
            host: Host::Ip(addr.ip()),
            transport: Transport::Tcp,
            port: addr.port(),
        }
    }

    /// Fail unless this is a tcp endpoint; only tcp connections can be
    /// forwarded.
    pub fn require_tcp(&self) -> crate::Result<()> {
        match self.transport {
            Transport::Tcp => Ok(()),
            Transport::Udp => Err(crate::Error::UnsupportedTransport {
                transport: self.transport.as_str().to_string(),
            }),
        }
    }

    /// Resolve to socket addresses, looking the host up if it is a name.
    pub async fn resolve(&self) -> std::io::Result<Vec<SocketAddr>> {
        match &self.host {
            Host::Ip(ip) => Ok(vec![SocketAddr::new(*ip, self.port)]),
            Host::Dns(name) => Ok(tokio::net::lookup_host((name.as_str(), self.port))
                .await?
                .collect()),
        }
    }
}

impl std::fmt::Display for NetAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.host {
            Host::Ip(IpAddr::V4(ip)) => write!(f, "/ip4/{ip}")?,
            Host::Ip(IpAddr::V6(ip)) => write!(f, "/ip6/{ip}")?,
            Host::Dns(name) => write!(f, "/dns/{name}")?,
        }
        write!(f, "/{}/{}", self.transport.as_str(), self.port)
    }
}

impl std::str::FromStr for NetAddr {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| crate::Error::InvalidEndpoint {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        if !s.starts_with('/') {
            return parse_shorthand(s).ok_or_else(|| invalid("expected /ip4/<ip>/tcp/<port> or <ip>:<port>"));
        }

        let parts: Vec<&str> = s.split('/').skip(1).collect();
        let [family, host, transport, port] = parts.as_slice() else {
            return Err(invalid("expected /<family>/<host>/<transport>/<port>"));
        };

        let host = match *family {
            "ip4" => Host::Ip(IpAddr::V4(host.parse().map_err(|_| invalid("bad ipv4 address"))?)),
            "ip6" => Host::Ip(IpAddr::V6(host.parse().map_err(|_| invalid("bad ipv6 address"))?)),
            "dns" | "dns4" | "dns6" if !host.is_empty() => Host::Dns(host.to_string()),
            _ => return Err(invalid("unknown address family")),
        };
        let transport = match *transport {
            "tcp" => Transport::Tcp,
            "udp" => Transport::Udp,
            _ => return Err(invalid("unknown transport")),
        };
        let port = port.parse().map_err(|_| invalid("bad port"))?;

        Ok(Self {
            host,
            transport,
            port,
        })
    }
}

fn parse_shorthand(s: &str) -> Option<NetAddr> {
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Some(NetAddr::tcp(addr));
    }
    let (name, port) = s.rsplit_once(':')?;
    if name.is_empty() || name.contains(['/', ':', '[', ']']) {
        return None;
    }
    Some(NetAddr {
        host: Host::Dns(name.to_string()),
        transport: Transport::Tcp,
        port: port.parse().ok()?,
    })
}

/// Opaque peer identity, interpreted by the `PeerNetwork` in use.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct PeerId(pub(crate) String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() || id.contains('/') {
            return Err(crate::Error::InvalidPeerAddress {
                input: id,
                reason: "peer id must be non-empty and must not contain '/'".to_string(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer, optionally with a network address it can be reached at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddr {
    pub peer: PeerId,
    pub hint: Option<NetAddr>,
}

impl std::fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(hint) = &self.hint {
            write!(f, "{hint}")?;
        }
        write!(f, "/p2p/{}", self.peer)
    }
}

impl std::str::FromStr for PeerAddr {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| crate::Error::InvalidPeerAddress {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (prefix, id) = PEER_SEGMENTS
            .iter()
            .filter_map(|segment| s.rsplit_once(&format!("/{segment}/")))
            .max_by_key(|(prefix, _)| prefix.len())
            .ok_or_else(|| invalid("missing /p2p/<peer-id> component"))?;

        let peer = PeerId::new(id).map_err(|_| invalid("bad peer id"))?;
        let hint = match prefix {
            "" => None,
            prefix => Some(prefix.parse().map_err(|_| invalid("bad network address before peer id"))?),
        };

        Ok(Self { peer, hint })
    }
}

/// Either side of a listener or stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    Net(NetAddr),
    Peer(PeerId),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Net(addr) => write!(f, "{addr}"),
            Endpoint::Peer(peer) => write!(f, "/p2p/{peer}"),
        }
    }
}

impl std::str::FromStr for Endpoint {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for segment in PEER_SEGMENTS {
            if let Some(id) = s.strip_prefix(&format!("/{segment}/")) {
                return Ok(Endpoint::Peer(PeerId::new(id)?));
            }
        }
        Ok(Endpoint::Net(s.parse()?))
    }
}

impl serde::Serialize for Endpoint {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Endpoint {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ip4() {
        let addr: NetAddr = "/ip4/127.0.0.1/tcp/4567".parse().unwrap();
        assert_eq!(addr, NetAddr::tcp("127.0.0.1:4567".parse().unwrap()));
        assert_eq!(addr.to_string(), "/ip4/127.0.0.1/tcp/4567");
    }

    #[test]
    fn test_parse_ip6_and_dns() {
        let addr: NetAddr = "/ip6/::1/tcp/80".parse().unwrap();
        assert_eq!(addr.host, Host::Ip("::1".parse().unwrap()));

        let addr: NetAddr = "/dns/example.com/udp/53".parse().unwrap();
        assert_eq!(addr.host, Host::Dns("example.com".to_string()));
        assert_eq!(addr.transport, Transport::Udp);
        assert!(addr.require_tcp().is_err());
    }

    #[test]
    fn test_shorthand_equals_path_form() {
        let short: Endpoint = "127.0.0.1:8080".parse().unwrap();
        let long: Endpoint = "/ip4/127.0.0.1/tcp/8080".parse().unwrap();
        assert_eq!(short, long);

        let named: NetAddr = "localhost:22".parse().unwrap();
        assert_eq!(named.to_string(), "/dns/localhost/tcp/22");
    }

    #[test]
    fn test_bad_endpoints() {
        for input in [
            "",
            "/ip4/127.0.0.1/tcp",
            "/ip4/300.0.0.1/tcp/80",
            "/ip4/127.0.0.1/sctp/80",
            "/ip4/127.0.0.1/tcp/99999",
            "/unix/tmp/sock/1",
            "not an address",
        ] {
            assert!(input.parse::<NetAddr>().is_err(), "{input} should not parse");
        }
    }

    #[test]
    fn test_peer_addr() {
        let addr: PeerAddr = "/p2p/QmPeer".parse().unwrap();
        assert_eq!(addr.peer.as_str(), "QmPeer");
        assert_eq!(addr.hint, None);

        let addr: PeerAddr = "/ip4/10.0.0.1/udp/4433/ipfs/QmPeer".parse().unwrap();
        assert_eq!(addr.peer.as_str(), "QmPeer");
        assert_eq!(addr.hint.unwrap().to_string(), "/ip4/10.0.0.1/udp/4433");

        assert!(matches!(
            "/ip4/10.0.0.1/tcp/1".parse::<PeerAddr>(),
            Err(crate::Error::InvalidPeerAddress { .. })
        ));
        assert!("/p2p/".parse::<PeerAddr>().is_err());
    }

    #[test]
    fn test_endpoint_roundtrip_through_text() {
        let peer: Endpoint = "/ipfs/QmPeer".parse().unwrap();
        assert_eq!(peer.to_string(), "/p2p/QmPeer");
        assert_eq!(peer, "/p2p/QmPeer".parse().unwrap());

        let json = serde_json::to_string(&peer).unwrap();
        assert_eq!(json, r#""/p2p/QmPeer""#);
    }
}
