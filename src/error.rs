use std::fmt;

/// Taxonomy of failures that can surface from the connection-info cache and
/// connector facade. Each variant maps to a single, stable failure mode so
/// callers can match on it instead of parsing message text.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("invalid instance connection name `{0}`: expected PROJECT:REGION:INSTANCE")]
    InvalidName(String),

    #[error("failed to resolve DNS domain name `{0}`: {1}")]
    DnsResolutionError(String, String),

    #[error("DNS TXT record(s) for `{0}` did not contain a parseable instance connection name")]
    DnsParseError(String),

    #[error("region mismatch for instance `{instance}`: requested `{requested}`, found `{actual}`")]
    RegionMismatch {
        instance: String,
        requested: String,
        actual: String,
    },

    #[error("admin API request failed with status {status}: {message}")]
    AdminApiError { status: u16, message: String },

    #[error("TLS 1.3 is required for automatic IAM database authentication but is not available")]
    TlsVersionError,

    #[error("automatic IAM database authentication is not supported for database engine `{0}`")]
    IamAuthUnsupported(String),

    #[error("no IP address of type `{0}` was found for this instance")]
    IpTypeNotFound(String),

    #[error(
        "connect() called with enable_iam_auth={requested}, but this instance was already \
         registered with enable_iam_auth={existing}; use a new connector to mix the two"
    )]
    IamAuthMismatch { requested: bool, existing: bool },

    #[error(
        "connect() was called from a task running on the connector's own event loop; \
         this would deadlock, call it from a different task or thread"
    )]
    ConnectorLoopError,

    #[error("cache for this instance has been closed")]
    CacheClosed,

    #[error("operation did not complete within the configured deadline")]
    DeadlineExceeded,

    #[error("driver `{0}` is not supported on this platform")]
    PlatformUnsupported(String),

    #[error("unsupported driver `{0}`")]
    UnsupportedDriver(String),

    #[error("admin API transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("certificate parsing error: {0}")]
    CertParse(String),

    #[error("key generation error: {0}")]
    KeyGeneration(String),

    #[error("background refresh task was aborted")]
    RefreshAborted,

    /// A previous refresh attempt's failure, resurfaced to a later caller
    /// that observed the same cached outcome. Carries the original error's
    /// message since the source error may not be `Clone`.
    #[error("{0}")]
    Cached(String),
}

impl ConnectorError {
    /// True for failures where the caller's next move is to retry the same
    /// operation rather than change anything about the request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConnectorError::Transport(_)
                | ConnectorError::DnsResolutionError(_, _)
                | ConnectorError::DeadlineExceeded
        )
    }

    /// Reconstructs an equivalent, independently-owned error from a shared
    /// reference. Every variant whose fields are themselves cloneable is
    /// reproduced as itself, so a caller further down the line can still
    /// match on `IamAuthUnsupported`, `RegionMismatch`, and so on; the two
    /// variants wrapping a non-`Clone` third-party error type (`Transport`,
    /// `Io`) collapse to `Cached` since their original value can't be
    /// reproduced, only described.
    pub(crate) fn reconstruct(&self) -> ConnectorError {
        match self {
            ConnectorError::InvalidName(s) => ConnectorError::InvalidName(s.clone()),
            ConnectorError::DnsResolutionError(a, b) => {
                ConnectorError::DnsResolutionError(a.clone(), b.clone())
            }
            ConnectorError::DnsParseError(s) => ConnectorError::DnsParseError(s.clone()),
            ConnectorError::RegionMismatch {
                instance,
                requested,
                actual,
            } => ConnectorError::RegionMismatch {
                instance: instance.clone(),
                requested: requested.clone(),
                actual: actual.clone(),
            },
            ConnectorError::AdminApiError { status, message } => ConnectorError::AdminApiError {
                status: *status,
                message: message.clone(),
            },
            ConnectorError::TlsVersionError => ConnectorError::TlsVersionError,
            ConnectorError::IamAuthUnsupported(s) => ConnectorError::IamAuthUnsupported(s.clone()),
            ConnectorError::IpTypeNotFound(s) => ConnectorError::IpTypeNotFound(s.clone()),
            ConnectorError::IamAuthMismatch { requested, existing } => {
                ConnectorError::IamAuthMismatch {
                    requested: *requested,
                    existing: *existing,
                }
            }
            ConnectorError::ConnectorLoopError => ConnectorError::ConnectorLoopError,
            ConnectorError::CacheClosed => ConnectorError::CacheClosed,
            ConnectorError::DeadlineExceeded => ConnectorError::DeadlineExceeded,
            ConnectorError::PlatformUnsupported(s) => ConnectorError::PlatformUnsupported(s.clone()),
            ConnectorError::UnsupportedDriver(s) => ConnectorError::UnsupportedDriver(s.clone()),
            ConnectorError::CertParse(s) => ConnectorError::CertParse(s.clone()),
            ConnectorError::KeyGeneration(s) => ConnectorError::KeyGeneration(s.clone()),
            ConnectorError::RefreshAborted => ConnectorError::RefreshAborted,
            ConnectorError::Cached(s) => ConnectorError::Cached(s.clone()),
            ConnectorError::Transport(e) => ConnectorError::Cached(e.to_string()),
            ConnectorError::Io(e) => ConnectorError::Cached(e.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ConnectorError {
    fn from(e: tokio::task::JoinError) -> Self {
        if e.is_cancelled() {
            ConnectorError::RefreshAborted
        } else {
            ConnectorError::RefreshAborted
        }
    }
}

/// Helper so `Arc<ConnectorError>` (used inside shared refresh futures) still
/// reads naturally in `{}` contexts.
pub(crate) struct DisplayArc<'a>(pub &'a std::sync::Arc<ConnectorError>);

impl fmt::Display for DisplayArc<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
