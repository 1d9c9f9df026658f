use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use tokio::sync::Semaphore;

use crate::admin_client::AdminClient;
use crate::cache::supports_auto_iam;
use crate::connection_info::{ConnectionInfo, IpKind};
use crate::connection_name::ConnectionName;
use crate::error::ConnectorError;
use crate::key_material::KeyMaterial;
use crate::rate_limiter::RateLimiter;
use crate::refresh_policy::seconds_until_refresh;

const REFRESH_RATE_CAPACITY: u64 = 2;
const REFRESH_RATE_PER_SECOND: f64 = 1.0 / 30.0;

/// Refreshes connection info on demand instead of running a background
/// schedule, for environments (serverless, short-lived processes) where
/// keeping a refresh loop alive between invocations isn't possible.
///
/// At most one refresh runs at a time; concurrent callers that all find the
/// cache stale block on the same in-flight attempt rather than each issuing
/// their own admin API calls.
pub struct LazyRefreshCache {
    conn_name: ConnectionName,
    admin_client: Arc<AdminClient>,
    keys: Arc<KeyMaterial>,
    enable_iam_auth: bool,
    rate_limiter: RateLimiter,
    cached: ArcSwapOption<ConnectionInfo>,
    refresh_lock: Semaphore,
    closed: AtomicBool,
}

impl LazyRefreshCache {
    pub fn new(
        conn_name: ConnectionName,
        admin_client: Arc<AdminClient>,
        keys: Arc<KeyMaterial>,
        enable_iam_auth: bool,
    ) -> Self {
        LazyRefreshCache {
            conn_name,
            admin_client,
            keys,
            enable_iam_auth,
            rate_limiter: RateLimiter::new(REFRESH_RATE_CAPACITY, REFRESH_RATE_PER_SECOND),
            cached: ArcSwapOption::from(None),
            refresh_lock: Semaphore::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Drops any cached value, forcing the next `connect_info` call to
    /// refresh regardless of whether the old value was still valid.
    pub async fn force_refresh(&self) {
        self.cached.store(None);
    }

    pub async fn connect_info(
        &self,
        ip_type: IpKind,
    ) -> Result<(Arc<ConnectionInfo>, String), ConnectorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectorError::CacheClosed);
        }

        if let Some(info) = self.cached.load_full() {
            if needs_refresh(&info) {
                self.refresh().await?;
            }
        } else {
            self.refresh().await?;
        }

        let info = self
            .cached
            .load_full()
            .expect("refresh always populates the cache on success");
        let ip = info.get_preferred_ip(ip_type)?.to_string();
        Ok((info, ip))
    }

    async fn refresh(&self) -> Result<(), ConnectorError> {
        let _permit = self.refresh_lock.acquire().await.expect("semaphore not closed");

        // Re-check now that we hold the single-flight permit: another
        // caller may have already refreshed while we were waiting.
        if let Some(info) = self.cached.load_full() {
            if !needs_refresh(&info) {
                return Ok(());
            }
        }

        self.rate_limiter.acquire().await;
        let metadata_fut = self.admin_client.get_metadata(&self.conn_name);
        let ephemeral_fut = self.admin_client.get_ephemeral(
            &self.conn_name,
            self.keys.public_key_pem(),
            self.enable_iam_auth,
        );
        let (metadata, (ephemeral_cert_pem, expiration)) =
            tokio::try_join!(metadata_fut, ephemeral_fut)?;

        if self.enable_iam_auth && !supports_auto_iam(&metadata.database_version) {
            return Err(ConnectorError::IamAuthUnsupported(metadata.database_version));
        }

        let info = ConnectionInfo::new(
            self.conn_name.clone(),
            metadata.ip_addresses,
            metadata.server_ca_cert,
            ephemeral_cert_pem,
            self.keys.private_key_pem()?,
            expiration,
            metadata.database_version,
            self.enable_iam_auth,
        );
        self.cached.store(Some(Arc::new(info)));
        Ok(())
    }

    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cached.store(None);
    }
}

fn needs_refresh(info: &ConnectionInfo) -> bool {
    seconds_until_refresh(info.expiration, Utc::now()) <= 0
}
