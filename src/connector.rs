use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::runtime::{Handle, Runtime};
use tracing::{info, warn};

use crate::admin_client::AdminClient;
use crate::cache::{LazyRefreshCache, MonitoredCache, RefreshAheadCache};
use crate::config::{ConnectorConfig, ResolverChoice};
use crate::connection_info::IpKind;
use crate::connection_name::ConnectionName;
use crate::drivers::{dial_tls, DialOutcome, DriverAdapter};
use crate::error::ConnectorError;
use crate::key_material::KeyMaterial;
use crate::resolver::{DefaultResolver, DnsResolver, Resolver};

/// Per-call overrides; any field left `None` falls back to the connector's
/// configured default.
#[derive(Default, Clone)]
pub struct ConnectOptions {
    pub enable_iam_auth: Option<bool>,
    pub ip_type: Option<IpKind>,
    pub timeout: Option<Duration>,
}

struct ManagedInstance {
    cache: Arc<MonitoredCache>,
    enable_iam_auth: bool,
}

enum Background {
    /// A dedicated single-threaded runtime running on its own OS thread,
    /// created because the caller did not hand us one of their own.
    Dedicated {
        handle: Handle,
        // Keeping the Runtime alive keeps the thread alive; it is never
        // read again after construction.
        _runtime_keepalive: Arc<Runtime>,
    },
    /// An externally supplied runtime handle; we never block on it from
    /// inside itself, but we also cannot prove which thread it runs on.
    External(Handle),
}

/// Facade over the per-instance connection-info caches: looks up or creates
/// the right cache for an instance connection name, negotiates TLS once
/// fresh connection info is available, and dispatches to a driver adapter.
pub struct Connector {
    background: Background,
    instances: DashMap<String, ManagedInstance>,
    admin_client: Arc<AdminClient>,
    keys: Arc<KeyMaterial>,
    resolver: Arc<dyn Resolver>,
    config: ConnectorConfig,
}

impl Connector {
    /// Builds a connector with its own dedicated background runtime thread.
    pub fn new(config: ConnectorConfig) -> Result<Arc<Self>, ConnectorError> {
        let runtime = Runtime::new().map_err(ConnectorError::Io)?;
        let handle = runtime.handle().clone();
        let runtime = Arc::new(runtime);
        spawn_keepalive_thread(runtime.clone());
        Self::build(
            config,
            Background::Dedicated {
                handle,
                _runtime_keepalive: runtime,
            },
        )
    }

    /// Builds a connector that schedules its background refresh work onto an
    /// already-running runtime, instead of spinning up a dedicated thread.
    pub fn with_handle(config: ConnectorConfig, handle: Handle) -> Result<Arc<Self>, ConnectorError> {
        Self::build(config, Background::External(handle))
    }

    fn build(config: ConnectorConfig, background: Background) -> Result<Arc<Self>, ConnectorError> {
        let keys = Arc::new(KeyMaterial::generate()?);
        let admin_client = Arc::new(AdminClient::with_universe_domain(
            config.credentials.clone(),
            config.sqladmin_api_endpoint.clone(),
            config.quota_project.clone(),
            config.user_agent.clone(),
            config.universe_domain.clone(),
        )?);
        let resolver: Arc<dyn Resolver> = match config.resolver {
            ResolverChoice::Default => Arc::new(DefaultResolver),
            ResolverChoice::Dns => match DnsResolver::new() {
                Ok(r) => Arc::new(r),
                Err(e) => {
                    warn!(error = %e, "DNS resolver unavailable, falling back to direct name parsing only");
                    Arc::new(DefaultResolver)
                }
            },
        };
        Ok(Arc::new(Connector {
            background,
            instances: DashMap::new(),
            admin_client,
            keys,
            resolver,
            config,
        }))
    }

    /// Synchronous entrypoint: marshals the connection attempt onto the
    /// connector's own background runtime and blocks the caller until it
    /// completes. Must not be called from inside that runtime, since that
    /// would deadlock the very loop being waited on.
    pub fn connect(
        self: &Arc<Self>,
        instance_connection_name: &str,
        driver: &dyn DriverAdapter,
        opts: ConnectOptions,
    ) -> Result<Box<dyn std::any::Any + Send>, ConnectorError> {
        if Handle::try_current().is_ok() {
            return Err(ConnectorError::ConnectorLoopError);
        }
        let handle = self.handle().clone();
        let this = Arc::clone(self);
        let name = instance_connection_name.to_string();
        handle.block_on(async move { this.connect_async(&name, driver, opts).await })
    }

    /// Async entrypoint, safe to call from any task regardless of which
    /// runtime is driving it.
    pub async fn connect_async(
        self: &Arc<Self>,
        instance_connection_name: &str,
        driver: &dyn DriverAdapter,
        opts: ConnectOptions,
    ) -> Result<Box<dyn std::any::Any + Send>, ConnectorError> {
        let timeout = opts.timeout.unwrap_or(self.config.timeout);
        let ip_type = opts.ip_type.unwrap_or(self.config.ip_type);

        let attempt = async {
            let (ip_address, tls_config) = self
                .dial_parameters(instance_connection_name, ip_type, opts.enable_iam_auth)
                .await?;
            driver
                .connect(DialOutcome {
                    ip_address,
                    tls_config,
                })
                .await
        };

        match tokio::time::timeout(timeout, attempt).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => {
                self.force_refresh(instance_connection_name).await;
                Err(e)
            }
            Err(_) => Err(ConnectorError::DeadlineExceeded),
        }
    }

    /// Resolves `instance_connection_name`, ensures a cache exists for it,
    /// and returns the dialable IP address plus a finished TLS client config.
    /// Shared by the driver-dispatching `connect_async` path and the local
    /// Unix socket relay, which both need the same handshake inputs.
    pub(crate) async fn dial_parameters(
        &self,
        instance_connection_name: &str,
        ip_type: IpKind,
        enable_iam_auth_override: Option<bool>,
    ) -> Result<(String, Arc<rustls::ClientConfig>), ConnectorError> {
        let enable_iam_auth = enable_iam_auth_override.unwrap_or(self.config.enable_iam_auth);
        let conn_name = self.resolver.resolve(instance_connection_name).await?;
        let key = conn_name.connection_string();

        if let Some(existing) = self.instances.get(&key) {
            if existing.enable_iam_auth != enable_iam_auth {
                return Err(ConnectorError::IamAuthMismatch {
                    requested: enable_iam_auth,
                    existing: existing.enable_iam_auth,
                });
            }
        } else {
            let cache = self.build_cache(conn_name.clone(), enable_iam_auth);
            self.instances.entry(key.clone()).or_insert(ManagedInstance {
                cache,
                enable_iam_auth,
            });
            info!(instance = %conn_name, iam_auth = enable_iam_auth, "registered new instance cache");
        }

        let instance = self.instances.get(&key).expect("just inserted above");
        // The socket handle tracks this dial attempt's lifetime in the
        // registry; once the driver adapter owns the stream the handle is
        // dropped, so the registry reflects in-flight handshakes rather than
        // the full lifetime of driver connections built on top of them.
        let (info, ip, _socket) = instance.cache.connect_info(ip_type).await?;
        let tls_config = info.tls_config()?;
        Ok((ip, tls_config))
    }

    fn build_cache(&self, conn_name: ConnectionName, enable_iam_auth: bool) -> Arc<MonitoredCache> {
        if self.config.lazy_refresh {
            let lazy = Arc::new(LazyRefreshCache::new(
                conn_name.clone(),
                self.admin_client.clone(),
                self.keys.clone(),
                enable_iam_auth,
            ));
            MonitoredCache::new_lazy(
                conn_name,
                lazy,
                Some(self.resolver.clone()),
                self.config.failover_period,
            )
        } else {
            let refresh_ahead = RefreshAheadCache::new(
                conn_name.clone(),
                self.admin_client.clone(),
                self.keys.clone(),
                enable_iam_auth,
            );
            MonitoredCache::new_refresh_ahead(
                conn_name,
                refresh_ahead,
                Some(self.resolver.clone()),
                self.config.failover_period,
            )
        }
    }

    async fn force_refresh(&self, instance_connection_name: &str) {
        if let Ok(conn_name) = self.resolver.resolve(instance_connection_name).await {
            if let Some(instance) = self.instances.get(&conn_name.connection_string()) {
                instance.cache.force_refresh().await;
            }
        }
    }

    fn handle(&self) -> &Handle {
        match &self.background {
            Background::Dedicated { handle, .. } => handle,
            Background::External(handle) => handle,
        }
    }

    /// Closes every instance cache this connector owns. Safe to call
    /// multiple times.
    pub async fn close(&self) {
        for entry in self.instances.iter() {
            entry.value().cache.close().await;
        }
    }
}

fn spawn_keepalive_thread(runtime: Arc<Runtime>) {
    std::thread::Builder::new()
        .name("cloud-sql-connector".into())
        .spawn(move || {
            runtime.block_on(async {
                std::future::pending::<()>().await;
            });
        })
        .expect("failed to spawn connector background thread");
}
