use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::{self, Future, FutureExt, Shared};
use tokio::task::AbortHandle;

use crate::admin_client::AdminClient;
use crate::cache::supports_auto_iam;
use crate::connection_info::{ConnectionInfo, IpKind};
use crate::connection_name::ConnectionName;
use crate::error::ConnectorError;
use crate::key_material::KeyMaterial;
use crate::rate_limiter::RateLimiter;
use crate::refresh_policy::seconds_until_refresh;

type RefreshOutcome = Result<Arc<ConnectionInfo>, Arc<ConnectorError>>;
type SharedRefresh = Shared<Pin<Box<dyn Future<Output = RefreshOutcome> + Send>>>;

const REFRESH_RATE_CAPACITY: u64 = 2;
const REFRESH_RATE_PER_SECOND: f64 = 1.0 / 30.0;

struct State {
    current: SharedRefresh,
    next_abort: Option<AbortHandle>,
}

/// Keeps a background refresh always one step ahead of expiration: `current`
/// holds the most recent successful (or still-pending first) attempt, while
/// a `next` task is already scheduled to replace it before it goes stale.
/// Modeled as two handles into the same slot rather than a literal two-field
/// struct, since the handle that is "next" right now is exactly the one
/// that becomes (or replaces) "current" once it resolves.
pub struct RefreshAheadCache {
    conn_name: ConnectionName,
    admin_client: Arc<AdminClient>,
    keys: Arc<KeyMaterial>,
    enable_iam_auth: bool,
    rate_limiter: RateLimiter,
    state: tokio::sync::Mutex<State>,
    refresh_in_progress: AtomicBool,
    closed: AtomicBool,
}

impl RefreshAheadCache {
    pub fn new(
        conn_name: ConnectionName,
        admin_client: Arc<AdminClient>,
        keys: Arc<KeyMaterial>,
        enable_iam_auth: bool,
    ) -> Arc<Self> {
        let placeholder: SharedRefresh = future::pending().boxed().shared();
        let cache = Arc::new(RefreshAheadCache {
            conn_name,
            admin_client,
            keys,
            enable_iam_auth,
            rate_limiter: RateLimiter::new(REFRESH_RATE_CAPACITY, REFRESH_RATE_PER_SECOND),
            state: tokio::sync::Mutex::new(State {
                current: placeholder,
                next_abort: None,
            }),
            refresh_in_progress: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });

        let (current, abort) = cache.start_refresh(Duration::ZERO, None);
        {
            let mut state = cache
                .state
                .try_lock()
                .expect("cache state is uncontended during construction");
            state.current = current;
            state.next_abort = Some(abort);
        }
        cache
    }

    /// Retrieves connection info and the preferred IP address, waiting for
    /// the first refresh to complete if it hasn't yet.
    pub async fn connect_info(
        self: &Arc<Self>,
        ip_type: IpKind,
    ) -> Result<(Arc<ConnectionInfo>, String), ConnectorError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConnectorError::CacheClosed);
        }
        let current = { self.state.lock().await.current.clone() };
        let info = current.await.map_err(|e| e.reconstruct())?;
        let ip = info.get_preferred_ip(ip_type)?.to_string();
        Ok((info, ip))
    }

    /// Cancels the scheduled `next` refresh and starts a new one immediately.
    /// If the current data is still valid, callers keep using it until the
    /// new attempt completes; if it has already gone stale, new callers
    /// block on the fresh attempt instead of returning data known to be bad.
    pub async fn force_refresh(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) || self.refresh_in_progress.load(Ordering::SeqCst) {
            return;
        }
        let old_current = {
            let mut state = self.state.lock().await;
            if let Some(abort) = state.next_abort.take() {
                abort.abort();
            }
            state.current.clone()
        };
        let old_valid = is_valid(old_current.clone()).await;
        let (new_current, abort) = self.start_refresh(Duration::ZERO, Some(old_current));

        let mut state = self.state.lock().await;
        if !old_valid {
            state.current = new_current;
        }
        state.next_abort = Some(abort);
    }

    /// Cancels background work and waits briefly for any in-flight refresh
    /// to wind down.
    pub async fn close(self: &Arc<Self>) {
        self.closed.store(true, Ordering::SeqCst);
        let current = {
            let mut state = self.state.lock().await;
            if let Some(abort) = state.next_abort.take() {
                abort.abort();
            }
            state.current.clone()
        };
        let _ = tokio::time::timeout(Duration::from_secs(2), current).await;
    }

    fn start_refresh(
        self: &Arc<Self>,
        delay: Duration,
        previous: Option<SharedRefresh>,
    ) -> (SharedRefresh, AbortHandle) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.run_refresh_cycle(delay, previous).await });
        let abort = handle.abort_handle();
        let shared: SharedRefresh = async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(Arc::new(ConnectorError::from(join_err))),
            }
        }
        .boxed()
        .shared();
        (shared, abort)
    }

    async fn run_refresh_cycle(
        self: Arc<Self>,
        delay: Duration,
        previous: Option<SharedRefresh>,
    ) -> RefreshOutcome {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.refresh_in_progress.store(true, Ordering::SeqCst);
        let result = self.perform_refresh().await;
        self.refresh_in_progress.store(false, Ordering::SeqCst);

        let (settled, next_delay): (RefreshOutcome, Duration) = match result {
            Ok(info) => {
                let info = Arc::new(info);
                let secs = seconds_until_refresh(info.expiration, Utc::now()).max(0) as u64;
                (Ok(info), Duration::from_secs(secs))
            }
            Err(e) => (Err(Arc::new(e)), Duration::ZERO),
        };

        let update_current = match (&settled, &previous) {
            (Ok(_), _) => true,
            (Err(_), Some(prev)) => !is_valid(prev.clone()).await,
            (Err(_), None) => true,
        };

        let for_next = if update_current {
            ready_shared(settled.clone())
        } else {
            previous.clone().unwrap()
        };

        if self.closed.load(Ordering::SeqCst) {
            return settled;
        }

        let (_next_shared, next_abort) = self.start_refresh(next_delay, Some(for_next));

        let mut state = self.state.lock().await;
        if update_current {
            state.current = ready_shared(settled.clone());
        }
        state.next_abort = Some(next_abort);
        drop(state);

        settled
    }

    async fn perform_refresh(&self) -> Result<ConnectionInfo, ConnectorError> {
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

        Ok(ConnectionInfo::new(
            self.conn_name.clone(),
            metadata.ip_addresses,
            metadata.server_ca_cert,
            ephemeral_cert_pem,
            self.keys.private_key_pem()?,
            expiration,
            metadata.database_version,
            self.enable_iam_auth,
        ))
    }
}

fn ready_shared(v: RefreshOutcome) -> SharedRefresh {
    future::ready(v).boxed().shared()
}

async fn is_valid(shared: SharedRefresh) -> bool {
    match shared.await {
        Ok(info) => info.expiration > Utc::now(),
        Err(_) => false,
    }
}
