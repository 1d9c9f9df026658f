use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::ConnectorError;

/// An instance connection name, `PROJECT:REGION:INSTANCE`, optionally
/// prefixed by a legacy domain-scoped project (`google.com:PROJECT`).
///
/// `domain_name` is only set when this value was produced by resolving a
/// DNS domain name rather than parsed directly from caller input; it carries
/// no bearing on equality with a directly-parsed name for the same instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionName {
    pub project: String,
    pub region: String,
    pub instance_name: String,
    pub domain_name: String,
}

fn conn_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:]+(:[^:]+)?):([^:]+):([^:]+)$").unwrap())
}

impl ConnectionName {
    /// Parses `PROJECT:REGION:INSTANCE`, or `DOMAIN:PROJECT:REGION:INSTANCE`
    /// for legacy domain-scoped projects.
    pub fn parse(connection_name: &str) -> Result<Self, ConnectorError> {
        Self::parse_with_domain(connection_name, "")
    }

    pub fn parse_with_domain(
        connection_name: &str,
        domain_name: &str,
    ) -> Result<Self, ConnectorError> {
        let caps = conn_name_regex()
            .captures(connection_name)
            .ok_or_else(|| ConnectorError::InvalidName(connection_name.to_string()))?;
        Ok(ConnectionName {
            project: caps[1].to_string(),
            region: caps[3].to_string(),
            instance_name: caps[4].to_string(),
            domain_name: domain_name.to_string(),
        })
    }

    /// The `PROJECT:REGION:INSTANCE` string, without any domain prefix.
    pub fn connection_string(&self) -> String {
        format!("{}:{}:{}", self.project, self.region, self.instance_name)
    }
}

impl fmt::Display for ConnectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.domain_name.is_empty() {
            write!(f, "{} -> {}", self.domain_name, self.connection_string())
        } else {
            write!(f, "{}", self.connection_string())
        }
    }
}
