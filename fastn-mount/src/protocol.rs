/// Default required prefix for protocol names.
pub const PROTOCOL_PREFIX: &str = "/x/";

/// Name of a tunneled service, the p2p analogue of a port number.
///
/// Never empty. Whether it must live under the reserved prefix is checked
/// separately by [`ProtocolName::check_namespace`], since callers may opt out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolName(String);

impl ProtocolName {
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::Error::EmptyProtocol);
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fail with `InvalidProtocolNamespace` unless the name starts with
    /// `prefix` or `allow_custom` is set.
    pub fn check_namespace(&self, prefix: &str, allow_custom: bool) -> crate::Result<()> {
        if allow_custom || self.0.starts_with(prefix) {
            return Ok(());
        }
        Err(crate::Error::InvalidProtocolNamespace {
            protocol: self.0.clone(),
            prefix: prefix.to_string(),
        })
    }
}

impl std::fmt::Display for ProtocolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ProtocolName {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProtocolName {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProtocolName> for String {
    fn from(value: ProtocolName) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_rejected() {
        assert!(matches!(
            ProtocolName::new(""),
            Err(crate::Error::EmptyProtocol)
        ));
    }

    #[test]
    fn test_namespace() {
        let inside = ProtocolName::new("/x/ssh").unwrap();
        let outside = ProtocolName::new("/ssh").unwrap();

        assert!(inside.check_namespace(PROTOCOL_PREFIX, false).is_ok());
        assert!(matches!(
            outside.check_namespace(PROTOCOL_PREFIX, false),
            Err(crate::Error::InvalidProtocolNamespace { .. })
        ));
        assert!(outside.check_namespace(PROTOCOL_PREFIX, true).is_ok());
    }

    #[test]
    fn test_serde_validates() {
        let name: ProtocolName = serde_json::from_str(r#""/x/web""#).unwrap();
        assert_eq!(name.as_str(), "/x/web");
        assert!(serde_json::from_str::<ProtocolName>(r#""""#).is_err());
    }
}
