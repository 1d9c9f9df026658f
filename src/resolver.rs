use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::connection_name::ConnectionName;
use crate::error::ConnectorError;

/// Turns a caller-supplied string into an instance connection name, either by
/// parsing it directly or by resolving it as a DNS domain name pointing at a
/// TXT record that contains one.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<ConnectionName, ConnectorError>;
}

/// Parses `name` directly; never touches the network. Used whenever the
/// caller passes a `PROJECT:REGION:INSTANCE` string.
#[derive(Default)]
pub struct DefaultResolver;

#[async_trait]
impl Resolver for DefaultResolver {
    async fn resolve(&self, name: &str) -> Result<ConnectionName, ConnectorError> {
        ConnectionName::parse(name)
    }
}

/// Resolves `name` as a DNS domain name if it does not already parse as a
/// plain instance connection name, by looking up its TXT records.
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
}

impl DnsResolver {
    pub fn new() -> Result<Self, ConnectorError> {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Ok(DnsResolver { resolver })
    }

    /// Looks up TXT records for `domain`, sorts the candidate strings
    /// alphabetically, and returns the first one that parses as an instance
    /// connection name. Mirrors the reference resolver's tie-break: when a
    /// domain is moved between instances mid-migration, more than one TXT
    /// record may be present, and picking a stable (sorted) candidate keeps
    /// resolution deterministic across lookups.
    async fn query_dns(&self, domain: &str) -> Result<ConnectionName, ConnectorError> {
        let lookup = self
            .resolver
            .txt_lookup(domain)
            .await
            .map_err(|e| ConnectorError::DnsResolutionError(domain.to_string(), e.to_string()))?;

        let mut candidates: Vec<String> = lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .flat_map(|bytes| String::from_utf8_lossy(bytes).into_owned().chars().collect::<Vec<_>>())
                    .collect::<String>()
            })
            .collect();
        candidates.sort();

        for candidate in &candidates {
            if let Ok(name) = ConnectionName::parse_with_domain(candidate, domain) {
                return Ok(name);
            }
        }
        Err(ConnectorError::DnsParseError(domain.to_string()))
    }
}

#[async_trait]
impl Resolver for DnsResolver {
    async fn resolve(&self, name: &str) -> Result<ConnectionName, ConnectorError> {
        if let Ok(parsed) = ConnectionName::parse(name) {
            return Ok(parsed);
        }
        self.query_dns(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_resolver_parses_plain_names_only() {
        let resolver = DefaultResolver;
        assert!(resolver.resolve("proj:region:inst").await.is_ok());
        assert!(resolver.resolve("db.example.com").await.is_err());
    }
}
