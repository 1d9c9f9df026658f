use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::lazy::LazyRefreshCache;
use crate::cache::refresh_ahead::RefreshAheadCache;
use crate::connection_info::{ConnectionInfo, IpKind};
use crate::connection_name::ConnectionName;
use crate::error::ConnectorError;
use crate::resolver::Resolver;

enum Inner {
    RefreshAhead(Arc<RefreshAheadCache>),
    Lazy(Arc<LazyRefreshCache>),
}

/// A live socket handed out by `connect_info`. The registry only keeps a
/// [`Weak`] reference to one of these, so a connection that the caller has
/// dropped is simply gone the next time the registry is swept, with no
/// explicit close notification required.
pub struct SocketHandle(());

fn new_socket_handle() -> Arc<SocketHandle> {
    Arc::new(SocketHandle(()))
}

/// Wraps a [`RefreshAheadCache`] or [`LazyRefreshCache`] with the concerns
/// that apply regardless of which refresh strategy is in use: tracking
/// outstanding sockets, and re-resolving a DNS domain name periodically so a
/// migrated instance is picked up without restarting the process.
pub struct MonitoredCache {
    conn_name: Mutex<ConnectionName>,
    inner: Inner,
    resolver: Option<Arc<dyn Resolver>>,
    domain_name: Option<String>,
    sockets: Mutex<Vec<Weak<SocketHandle>>>,
    closed: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl MonitoredCache {
    pub fn new_refresh_ahead(
        conn_name: ConnectionName,
        cache: Arc<RefreshAheadCache>,
        resolver: Option<Arc<dyn Resolver>>,
        failover_period: Duration,
    ) -> Arc<Self> {
        Self::new(conn_name, Inner::RefreshAhead(cache), resolver, failover_period)
    }

    pub fn new_lazy(
        conn_name: ConnectionName,
        cache: Arc<LazyRefreshCache>,
        resolver: Option<Arc<dyn Resolver>>,
        failover_period: Duration,
    ) -> Arc<Self> {
        Self::new(conn_name, Inner::Lazy(cache), resolver, failover_period)
    }

    fn new(
        conn_name: ConnectionName,
        inner: Inner,
        resolver: Option<Arc<dyn Resolver>>,
        failover_period: Duration,
    ) -> Arc<Self> {
        let domain_name = if conn_name.domain_name.is_empty() {
            None
        } else {
            Some(conn_name.domain_name.clone())
        };
        let cache = Arc::new(MonitoredCache {
            conn_name: Mutex::new(conn_name),
            inner,
            resolver,
            domain_name: domain_name.clone(),
            sockets: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            ticker: Mutex::new(None),
        });

        // A zero period disables domain-name re-resolution entirely: some
        // callers want a fixed instance for the lifetime of the process even
        // if the domain later repoints.
        if !failover_period.is_zero() {
            if let (Some(domain), Some(_)) = (domain_name, cache.resolver.as_ref()) {
                let weak = Arc::downgrade(&cache);
                let handle = tokio::spawn(async move {
                    ticker(failover_period, weak, domain).await;
                });
                // Uncontended: nothing else has a reference to `cache` yet.
                if let Ok(mut guard) = cache.ticker.try_lock() {
                    *guard = Some(handle);
                }
            }
        }

        cache
    }

    pub async fn connect_info(
        &self,
        ip_type: IpKind,
    ) -> Result<(Arc<ConnectionInfo>, String, Arc<SocketHandle>), ConnectorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectorError::CacheClosed);
        }
        let (info, ip) = match &self.inner {
            Inner::RefreshAhead(cache) => cache.connect_info(ip_type).await?,
            Inner::Lazy(cache) => cache.connect_info(ip_type).await?,
        };
        let handle = new_socket_handle();
        self.register_socket(Arc::downgrade(&handle)).await;
        Ok((info, ip, handle))
    }

    async fn register_socket(&self, socket: Weak<SocketHandle>) {
        let mut sockets = self.sockets.lock().await;
        sockets.retain(|s| s.strong_count() > 0);
        sockets.push(socket);
    }

    /// Number of sockets this cache believes are still open. Used by tests
    /// and diagnostics; closed sockets are purged lazily on each new
    /// connection and by the domain-check ticker.
    pub async fn open_socket_count(&self) -> usize {
        let mut sockets = self.sockets.lock().await;
        sockets.retain(|s| s.strong_count() > 0);
        sockets.len()
    }

    pub async fn force_refresh(&self) {
        match &self.inner {
            Inner::RefreshAhead(cache) => cache.force_refresh().await,
            Inner::Lazy(cache) => cache.force_refresh().await,
        }
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.ticker.lock().await.take() {
            handle.abort();
        }
        match &self.inner {
            Inner::RefreshAhead(cache) => cache.close().await,
            Inner::Lazy(cache) => cache.close().await,
        }
    }

    async fn check_domain_name(&self, domain: &str) {
        let Some(resolver) = &self.resolver else {
            return;
        };
        let resolved = match resolver.resolve(domain).await {
            Ok(name) => name,
            Err(e) => {
                warn!(domain, error = %e, "domain-name re-resolution failed, keeping current cache");
                return;
            }
        };
        let current = self.conn_name.lock().await;
        if resolved.connection_string() != current.connection_string() {
            debug!(
                domain,
                old = %current.connection_string(),
                new = %resolved.connection_string(),
                "instance behind domain name changed, closing cache"
            );
            drop(current);
            self.close().await;
        }
    }
}

async fn ticker(interval: Duration, cache: Weak<MonitoredCache>, domain: String) {
    loop {
        tokio::time::sleep(interval).await;
        let Some(cache) = cache.upgrade() else {
            return;
        };
        if cache.closed.load(Ordering::SeqCst) {
            return;
        }
        cache.check_domain_name(&domain).await;
    }
}
