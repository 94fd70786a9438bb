//! Administrative requests, as sent over the daemon's control socket.
//!
//! Requests carry raw strings; they are parsed and validated here before the
//! engine is touched, so a bad option never changes anything.

mod socket;

pub use socket::{request, serve};

use crate::{Endpoint, ForwardingEngine, MatchCriteria, ProtocolName, StreamSelector};

/// Control socket file inside the daemon home.
pub const CONTROL_SOCKET: &str = "control.sock";

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ControlRequest {
    /// Forward connections on a local address to a peer.
    Forward {
        protocol: String,
        listen_address: String,
        target_address: String,
        #[serde(default)]
        allow_custom_protocol: bool,
    },
    /// Forward streams for a protocol to a local address.
    Listen {
        protocol: String,
        target_address: String,
        #[serde(default)]
        allow_custom_protocol: bool,
    },
    Close {
        #[serde(default)]
        all: bool,
        #[serde(default)]
        protocol: Option<String>,
        #[serde(default)]
        listen_address: Option<String>,
        #[serde(default)]
        target_address: Option<String>,
    },
    Ls,
    StreamLs,
    StreamClose {
        #[serde(default)]
        handle: Option<u64>,
        #[serde(default)]
        all: bool,
    },
    PeerId,
}

/// Reply to a [`ControlRequest`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ControlResponse {
    /// Success status: true for ok, false for error
    pub success: bool,
    /// Response data or error message
    pub data: serde_json::Value,
}

impl ControlResponse {
    pub fn ok(data: impl serde::Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                success: true,
                data,
            },
            Err(e) => Self::error(format!("failed to encode response: {e}")),
        }
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            data: serde_json::Value::String(message.to_string()),
        }
    }

    /// Decode the payload of a successful response.
    pub fn into_result<T: serde::de::DeserializeOwned>(self) -> eyre::Result<T> {
        if !self.success {
            match self.data {
                serde_json::Value::String(message) => eyre::bail!(message),
                other => eyre::bail!("request failed: {other}"),
            }
        }
        Ok(serde_json::from_value(self.data)?)
    }
}

/// Run `request` against `engine`.
pub async fn execute(engine: &ForwardingEngine, request: ControlRequest) -> ControlResponse {
    match dispatch(engine, request).await {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(kind = ?e.kind(), "control request failed: {e}");
            ControlResponse::error(e)
        }
    }
}

async fn dispatch(engine: &ForwardingEngine, request: ControlRequest) -> crate::Result<ControlResponse> {
    Ok(match request {
        ControlRequest::Forward {
            protocol,
            listen_address,
            target_address,
            allow_custom_protocol,
        } => {
            let info = engine
                .create_local_forward(
                    protocol.parse()?,
                    listen_address.parse()?,
                    target_address.parse()?,
                    allow_custom_protocol,
                )
                .await?;
            ControlResponse::ok(info)
        }
        ControlRequest::Listen {
            protocol,
            target_address,
            allow_custom_protocol,
        } => {
            let info = engine
                .create_remote_forward(protocol.parse()?, target_address.parse()?, allow_custom_protocol)
                .await?;
            ControlResponse::ok(info)
        }
        ControlRequest::Close {
            all,
            protocol,
            listen_address,
            target_address,
        } => {
            let criteria = MatchCriteria::from_options(
                all,
                protocol.map(ProtocolName::new).transpose()?,
                listen_address.as_deref().map(str::parse::<Endpoint>).transpose()?,
                target_address.as_deref().map(str::parse::<Endpoint>).transpose()?,
            )?;
            ControlResponse::ok(engine.close_listeners(&criteria).await?)
        }
        ControlRequest::Ls => ControlResponse::ok(engine.list_listeners()),
        ControlRequest::StreamLs => ControlResponse::ok(engine.list_streams()),
        ControlRequest::StreamClose { handle, all } => {
            let selector = StreamSelector::from_options(handle, all)?;
            ControlResponse::ok(engine.close_stream(selector)?)
        }
        ControlRequest::PeerId => ControlResponse::ok(engine.local_peer()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request: ControlRequest =
            serde_json::from_str(r#"{"type":"stream-close","all":true}"#).unwrap();
        assert_eq!(
            request,
            ControlRequest::StreamClose {
                handle: None,
                all: true
            }
        );

        let json = serde_json::to_value(ControlRequest::PeerId).unwrap();
        assert_eq!(json, serde_json::json!({"type": "peer-id"}));
    }

    #[test]
    fn test_error_response() {
        let response = ControlResponse::error(crate::Error::NoMatchingOptions);
        assert!(!response.success);
        let err = response.into_result::<usize>().unwrap_err();
        assert_eq!(err.to_string(), "no matching options given");
    }

    #[tokio::test]
    async fn test_invalid_options_change_nothing() {
        let hub = crate::network::memory::MemoryHub::new();
        let engine = ForwardingEngine::new(
            std::sync::Arc::new(hub.join("local").unwrap()),
            crate::EngineConfig::default(),
        );
        engine
            .create_remote_forward(
                ProtocolName::new("/x/a").unwrap(),
                "/ip4/127.0.0.1/tcp/9".parse().unwrap(),
                false,
            )
            .await
            .unwrap();

        for request in [
            ControlRequest::Close {
                all: false,
                protocol: None,
                listen_address: None,
                target_address: None,
            },
            ControlRequest::Close {
                all: true,
                protocol: Some("/x/a".to_string()),
                listen_address: None,
                target_address: None,
            },
            ControlRequest::Close {
                all: false,
                protocol: None,
                listen_address: Some("nonsense".to_string()),
                target_address: None,
            },
        ] {
            assert!(!execute(&engine, request).await.success);
        }
        assert_eq!(engine.list_listeners().len(), 1);

        let response = execute(
            &engine,
            ControlRequest::Close {
                all: true,
                protocol: None,
                listen_address: None,
                target_address: None,
            },
        )
        .await;
        assert_eq!(response.into_result::<usize>().unwrap(), 1);
        assert!(engine.list_listeners().is_empty());
    }
}
