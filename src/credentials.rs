use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ConnectorError;

/// Supplies bearer tokens for admin API requests. Acquiring and refreshing
/// the underlying credential (service account keys, workload identity,
/// metadata-server tokens, ...) is out of scope here; callers inject an
/// implementation that already knows how to do that.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// A valid access token scoped for admin API calls.
    async fn access_token(&self) -> Result<String, ConnectorError>;

    /// A token down-scoped to the database-login scope only, used to embed
    /// an IAM identity into an ephemeral certificate request. Returns the
    /// token and its expiration.
    async fn downscoped_login_token(&self) -> Result<(String, DateTime<Utc>), ConnectorError>;
}

/// A provider that always returns a fixed token, for tests and for
/// environments where the caller manages token refresh out of band.
pub struct StaticTokenProvider {
    token: String,
    login_token: String,
    login_token_expiry: DateTime<Utc>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>, login_token: impl Into<String>, login_token_expiry: DateTime<Utc>) -> Self {
        StaticTokenProvider {
            token: token.into(),
            login_token: login_token.into(),
            login_token_expiry,
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, ConnectorError> {
        Ok(self.token.clone())
    }

    async fn downscoped_login_token(&self) -> Result<(String, DateTime<Utc>), ConnectorError> {
        Ok((self.login_token.clone(), self.login_token_expiry))
    }
}
