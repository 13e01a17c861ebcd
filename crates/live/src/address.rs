//! Channel addresses: `{scope}/{namespace}/{path}`.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Segment separator in channel ids.
pub const SEPARATOR: char = '/';

/// Top-level namespace category of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveScope {
    /// Namespace is a data source uid.
    #[serde(rename = "ds")]
    DataSource,
    /// Namespace is a plugin id.
    Plugin,
    /// Namespace is a built-in feature.
    Grafana,
}

impl LiveScope {
    pub const ALL: [Self; 3] = [Self::DataSource, Self::Plugin, Self::Grafana];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataSource => "ds",
            Self::Plugin => "plugin",
            Self::Grafana => "grafana",
        }
    }
}

impl fmt::Display for LiveScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LiveScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ds" => Ok(Self::DataSource),
            "plugin" => Ok(Self::Plugin),
            "grafana" => Ok(Self::Grafana),
            other => Err(Error::invalid_address(format!("unknown scope '{other}'"))),
        }
    }
}

/// Validated identity of a live channel.
///
/// `scope` and `namespace` never contain the separator. `path` may be
/// hierarchical (`uid/abc`) but never has an empty sub-segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelAddress {
    scope: LiveScope,
    namespace: String,
    path: String,
}

impl ChannelAddress {
    pub fn new(
        scope: LiveScope,
        namespace: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<Self> {
        let namespace = namespace.into();
        let path = path.into();
        validate_segment("namespace", &namespace)?;
        validate_path(&path)?;
        Ok(Self {
            scope,
            namespace,
            path,
        })
    }

    /// Parse an id produced by [`ChannelAddress::id`].
    pub fn parse(id: &str) -> Result<Self> {
        let mut parts = id.splitn(3, SEPARATOR);
        let (Some(scope), Some(namespace), Some(path)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::invalid_address(format!(
                "'{id}' must have the form scope/namespace/path"
            )));
        };
        Self::new(scope.parse()?, namespace, path)
    }

    pub fn scope(&self) -> LiveScope {
        self.scope
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Canonical registry key.
    pub fn id(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.scope, self.namespace, self.path
        )
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.scope, self.namespace, self.path
        )
    }
}

impl FromStr for ChannelAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChannelAddress {
    type Error = Error;

    fn try_from(id: String) -> Result<Self> {
        Self::parse(&id)
    }
}

impl From<ChannelAddress> for String {
    fn from(addr: ChannelAddress) -> Self {
        addr.id()
    }
}

fn validate_segment(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid_address(format!("{name} is empty")));
    }
    if value.contains(SEPARATOR) {
        return Err(Error::invalid_address(format!(
            "{name} '{value}' contains '{SEPARATOR}'"
        )));
    }
    Ok(())
}

fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::invalid_address("path is empty"));
    }
    if path.split(SEPARATOR).any(str::is_empty) {
        return Err(Error::invalid_address(format!(
            "path '{path}' has an empty segment"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_back() {
        for scope in LiveScope::ALL {
            let addr = ChannelAddress::new(scope, "testdata", "random-2s-stream").unwrap();
            let parsed = ChannelAddress::parse(&addr.id()).unwrap();
            assert_eq!(parsed, addr);
            assert_eq!(parsed.scope(), scope);
            assert_eq!(parsed.namespace(), "testdata");
            assert_eq!(parsed.path(), "random-2s-stream");
        }
    }

    #[test]
    fn id_uses_wire_scope_names() {
        let addr = ChannelAddress::new(LiveScope::DataSource, "PD8C576611E62080A", "x").unwrap();
        assert_eq!(addr.id(), "ds/PD8C576611E62080A/x");
        assert_eq!(addr.to_string(), addr.id());
    }

    #[test]
    fn hierarchical_paths_survive_parsing() {
        let addr: ChannelAddress = "grafana/dashboard/uid/abc123".parse().unwrap();
        assert_eq!(addr.namespace(), "dashboard");
        assert_eq!(addr.path(), "uid/abc123");
        assert_eq!(addr.id(), "grafana/dashboard/uid/abc123");
    }

    #[test]
    fn rejects_empty_segments() {
        assert!(matches!(
            ChannelAddress::new(LiveScope::Grafana, "", "p"),
            Err(Error::InvalidAddress { .. })
        ));
        assert!(matches!(
            ChannelAddress::new(LiveScope::Grafana, "ns", ""),
            Err(Error::InvalidAddress { .. })
        ));
        assert!(ChannelAddress::parse("grafana/ns/a//b").is_err());
        assert!(ChannelAddress::parse("grafana/ns/").is_err());
        assert!(ChannelAddress::parse("grafana/ns").is_err());
    }

    #[test]
    fn rejects_separator_in_namespace_and_unknown_scope() {
        assert!(ChannelAddress::new(LiveScope::Plugin, "a/b", "p").is_err());
        let err = ChannelAddress::parse("stream/ns/path").unwrap_err();
        assert!(err.to_string().contains("unknown scope"));
    }

    #[test]
    fn serializes_as_id_string() {
        let addr = ChannelAddress::new(LiveScope::Grafana, "broadcast", "room").unwrap();
        let json = serde_json::to_value(&addr).unwrap();
        assert_eq!(json, serde_json::json!("grafana/broadcast/room"));
        let back: ChannelAddress = serde_json::from_value(json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_value::<ChannelAddress>(serde_json::json!("grafana//x")).is_err());
    }
}
