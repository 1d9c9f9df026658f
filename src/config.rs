use std::sync::Arc;
use std::time::Duration;

use crate::connection_info::IpKind;
use crate::credentials::CredentialProvider;

/// Construction-time options for a [`crate::connector::Connector`]. Mirrors
/// the keyword arguments accepted by the reference connector's constructor,
/// assembled through a builder rather than a long positional argument list.
pub struct ConnectorConfig {
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) ip_type: IpKind,
    pub(crate) enable_iam_auth: bool,
    pub(crate) timeout: Duration,
    pub(crate) quota_project: Option<String>,
    pub(crate) sqladmin_api_endpoint: Option<String>,
    pub(crate) universe_domain: Option<String>,
    pub(crate) user_agent: Option<String>,
    pub(crate) lazy_refresh: bool,
    pub(crate) failover_period: Duration,
    pub(crate) resolver: ResolverChoice,
}

/// Which [`crate::resolver::Resolver`] a connector should resolve instance
/// names with. `Dns` falls back to `Default` automatically if no DNS stub
/// resolver can be built for the current platform.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResolverChoice {
    /// Parse `PROJECT:REGION:INSTANCE` strings only; never touches the network.
    Default,
    /// Also resolve domain names via DNS TXT lookup.
    #[default]
    Dns,
}

pub struct ConnectorConfigBuilder {
    credentials: Arc<dyn CredentialProvider>,
    ip_type: IpKind,
    enable_iam_auth: bool,
    timeout: Duration,
    quota_project: Option<String>,
    sqladmin_api_endpoint: Option<String>,
    universe_domain: Option<String>,
    user_agent: Option<String>,
    lazy_refresh: bool,
    failover_period: Duration,
    resolver: ResolverChoice,
}

impl ConnectorConfigBuilder {
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        ConnectorConfigBuilder {
            credentials,
            ip_type: IpKind::Primary,
            enable_iam_auth: false,
            timeout: Duration::from_secs(30),
            quota_project: None,
            sqladmin_api_endpoint: None,
            universe_domain: None,
            user_agent: None,
            lazy_refresh: false,
            failover_period: Duration::from_secs(30),
            resolver: ResolverChoice::Dns,
        }
    }

    pub fn ip_type(mut self, ip_type: IpKind) -> Self {
        self.ip_type = ip_type;
        self
    }

    pub fn enable_iam_auth(mut self, enable: bool) -> Self {
        self.enable_iam_auth = enable;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn quota_project(mut self, project: impl Into<String>) -> Self {
        self.quota_project = Some(project.into());
        self
    }

    pub fn sqladmin_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.sqladmin_api_endpoint = Some(endpoint.into());
        self
    }

    /// Overrides the Google API universe this connector talks to (and the
    /// host derived from it), for callers running in a Trusted Partner Cloud
    /// or other non-default universe. The credential provider's own universe
    /// must match, or the admin API will reject every request with a
    /// permission error; this crate does not cross-check the two.
    pub fn universe_domain(mut self, universe_domain: impl Into<String>) -> Self {
        self.universe_domain = Some(universe_domain.into());
        self
    }

    /// Appended to the `User-Agent` sent with every admin API request, after
    /// this crate's own identifier, so the caller's framework/driver shows up
    /// in Cloud SQL's usage diagnostics.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Use an on-demand [`crate::cache::LazyRefreshCache`] instead of the
    /// default background-scheduled [`crate::cache::RefreshAheadCache`] for
    /// every instance this connector manages, appropriate for serverless
    /// environments that may be frozen between invocations.
    pub fn lazy_refresh(mut self, lazy: bool) -> Self {
        self.lazy_refresh = lazy;
        self
    }

    /// How often a cache whose instance name came from a resolved domain
    /// re-checks that the domain still points at the same instance. Zero
    /// disables re-checking for the lifetime of the cache.
    pub fn failover_period(mut self, period: Duration) -> Self {
        self.failover_period = period;
        self
    }

    /// Which [`crate::resolver::Resolver`] to resolve instance connection
    /// names with.
    pub fn resolver(mut self, resolver: ResolverChoice) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn build(self) -> ConnectorConfig {
        ConnectorConfig {
            credentials: self.credentials,
            ip_type: self.ip_type,
            enable_iam_auth: self.enable_iam_auth,
            timeout: self.timeout,
            quota_project: self.quota_project,
            sqladmin_api_endpoint: self.sqladmin_api_endpoint,
            universe_domain: self.universe_domain,
            user_agent: self.user_agent,
            lazy_refresh: self.lazy_refresh,
            failover_period: self.failover_period,
            resolver: self.resolver,
        }
    }
}
