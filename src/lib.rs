//! Connection-info cache and refresh engine for mutually-authenticated TLS
//! connections to a managed relational-database service's server-side proxy.
//!
//! [`Connector`] is the facade most callers want: it resolves an instance
//! connection name, keeps that instance's certificate and IP metadata fresh
//! in the background, and hands a finished TLS configuration to a
//! [`drivers::DriverAdapter`].

pub mod admin_client;
pub mod cache;
pub mod config;
pub mod connection_info;
pub mod connection_name;
pub mod connector;
pub mod credentials;
pub mod drivers;
pub mod error;
pub mod key_material;
pub mod logging;
pub mod rate_limiter;
pub mod refresh_policy;
pub mod resolver;
pub mod socket_relay;

pub use config::{ConnectorConfig, ConnectorConfigBuilder, ResolverChoice};
pub use connection_info::{ConnectionInfo, IpKind};
pub use connection_name::ConnectionName;
pub use connector::{ConnectOptions, Connector};
pub use error::ConnectorError;
