/// Engine configuration, read from `<home>/config.json` by the daemon.
///
/// Every field has a default, so a missing file or a partial one is fine.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix every protocol name must carry unless the caller opts out.
    pub protocol_prefix: String,
    /// How long an address recorded for a `forward` target stays usable.
    pub temp_addr_ttl_secs: u64,
    /// Capacity of the engine event channel; slow subscribers lose events.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol_prefix: crate::PROTOCOL_PREFIX.to_string(),
            temp_addr_ttl_secs: 10,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn temp_addr_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.temp_addr_ttl_secs)
    }

    /// Load from a JSON file, falling back to defaults if it does not exist.
    pub async fn load(path: &std::path::Path) -> eyre::Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(json) => {
                let config = serde_json::from_str(&json)
                    .map_err(|e| eyre::eyre!("invalid config {}: {e}", path.display()))?;
                tracing::info!(path = %path.display(), "loaded engine config");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(eyre::eyre!("failed to read {}: {e}", path.display())),
        }
    }
}
