//! Shared remote sessions keyed by credentials.
//!
//! Logging in to the remote API is slow and rate limited, so one
//! authenticated session per credential pair is shared by every request made
//! with it until it ages out.
//!
//! ## Lookup
//!
//! ```text
//! get_connection → store hit (fresh) ──────────────────────────→ entry
//!                → miss/stale → admit waiter → lock gate → re-check → login task → entry
//! ```
//!
//! Each credential pair has its own [`InitGate`]: a lock that serializes
//! logins for that key and a counter of callers queued on it. The counter
//! is bounded so a stuck login cannot pile up unbounded work. The login runs
//! in a spawned task that owns the gate's lock, so a caller giving up does
//! not abort a login other callers are waiting on.
//!
//! Freshness is judged against the tokio clock. The store's own TTL and
//! capacity bound only reclaim memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use unirest_core::{Company, Credentials, LoginStatus};
use unirest_gateway::{GatewayError, RemoteSession, SessionGateway};
use uuid::Uuid;

use crate::config::AppConfig;

/// Tuning for [`ConnectionCache`].
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// How long an established session is reused.
    pub ttl: Duration,
    /// Callers allowed to queue on one credential's login.
    pub max_waiters: usize,
    /// Sessions tried before an empty company list is given up on.
    pub login_attempts: u32,
    pub max_entries: u64,
    pub affiliate_key: Uuid,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30 * 60),
            max_waiters: 20,
            login_attempts: 5,
            max_entries: 10_000,
            affiliate_key: Uuid::nil(),
        }
    }
}

impl ConnectionSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            ttl: cfg.connections.ttl(),
            max_waiters: cfg.connections.max_waiters,
            login_attempts: cfg.connections.login_attempts,
            max_entries: cfg.connections.max_entries,
            affiliate_key: cfg.remote.affiliate_key,
        }
    }
}

/// An authenticated session together with the companies it can see.
pub struct ConnectionEntry {
    session: Arc<dyn RemoteSession>,
    companies: Vec<Company>,
    created_at: Instant,
}

impl ConnectionEntry {
    pub fn session(&self) -> &Arc<dyn RemoteSession> {
        &self.session
    }

    pub fn companies(&self) -> &[Company] {
        &self.companies
    }

    pub fn company(&self, company_id: i32) -> Option<&Company> {
        Company::find(&self.companies, company_id)
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.created_at + ttl > Instant::now()
    }
}

impl std::fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("companies", &self.companies.len())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The remote API rejected the credentials.
    #[error("Login failed: {status}")]
    Forbidden { status: LoginStatus },

    #[error("Too many requests are waiting for the same login ({waiting})")]
    TooManyWaiters { waiting: usize },

    /// Every attempt came back without companies.
    #[error("Remote API returned no companies after {attempts} attempts")]
    TransientExhausted { attempts: u32 },

    #[error(transparent)]
    Upstream(#[from] GatewayError),

    #[error("Cancelled while waiting for login")]
    Cancelled,

    #[error("Login task failed: {0}")]
    Internal(String),
}

/// Per-credential login lock and waiter counter.
#[derive(Default)]
struct InitGate {
    lock: Arc<Mutex<()>>,
    waiting: AtomicUsize,
}

impl InitGate {
    fn is_idle(&self) -> bool {
        Arc::strong_count(&self.lock) == 1
    }
}

/// A reserved place in a gate's wait queue. Released on drop.
struct WaiterTicket {
    gate: Arc<InitGate>,
}

impl WaiterTicket {
    /// Reserve a place, or report the queue length when the gate is full.
    fn admit(gate: &Arc<InitGate>, ceiling: usize) -> Result<Self, usize> {
        let previous = gate.waiting.fetch_add(1, Ordering::SeqCst);
        if previous >= ceiling {
            gate.waiting.fetch_sub(1, Ordering::SeqCst);
            return Err(previous);
        }
        Ok(Self {
            gate: Arc::clone(gate),
        })
    }
}

impl Drop for WaiterTicket {
    fn drop(&mut self) {
        self.gate.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds a gate for the duration of one lookup and drops it from the gate
/// map afterwards if nothing else references it.
struct GateLease<'a> {
    gates: &'a DashMap<Credentials, Arc<InitGate>>,
    key: &'a Credentials,
    gate: Arc<InitGate>,
}

impl Drop for GateLease<'_> {
    fn drop(&mut self) {
        release_gate(self.gates, self.key, &self.gate);
    }
}

/// Remove `gate` from the map once the map and `held` are its only holders
/// and nobody owns its lock.
fn release_gate(
    gates: &DashMap<Credentials, Arc<InitGate>>,
    key: &Credentials,
    held: &Arc<InitGate>,
) {
    gates.remove_if(key, |_, g| {
        Arc::ptr_eq(g, held) && Arc::strong_count(g) == 2 && g.is_idle()
    });
}

/// Connection cache statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ConnectionStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
    /// Successful logins performed by the cache.
    pub logins: u64,
}

/// Credential-keyed cache of remote sessions with single-flight login.
pub struct ConnectionCache {
    gateway: Arc<dyn SessionGateway>,
    settings: ConnectionSettings,
    entries: Cache<Credentials, Arc<ConnectionEntry>>,
    gates: Arc<DashMap<Credentials, Arc<InitGate>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    logins: Arc<AtomicU64>,
}

impl ConnectionCache {
    pub fn new(gateway: Arc<dyn SessionGateway>, settings: ConnectionSettings) -> Self {
        let entries = Cache::builder()
            .max_capacity(settings.max_entries)
            .time_to_live(settings.ttl)
            .build();
        Self {
            gateway,
            settings,
            entries,
            gates: Arc::new(DashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            logins: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Return a live session for `credentials`, logging in if needed.
    ///
    /// Concurrent callers with the same credentials share one login. Callers
    /// with different credentials never wait on each other. `cancel` aborts
    /// the wait for a login but never the login itself.
    pub async fn get_connection(
        &self,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<Arc<ConnectionEntry>, ConnectionError> {
        if let Some(entry) = self.fresh(credentials).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(username = credentials.username(), "connection cache hit");
            return Ok(entry);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let gate = self
            .gates
            .entry(credentials.clone())
            .or_default()
            .value()
            .clone();
        let lease = GateLease {
            gates: &self.gates,
            key: credentials,
            gate,
        };

        self.initialize(credentials, &lease.gate, cancel).await
    }

    async fn initialize(
        &self,
        credentials: &Credentials,
        gate: &Arc<InitGate>,
        cancel: &CancellationToken,
    ) -> Result<Arc<ConnectionEntry>, ConnectionError> {
        let ticket = WaiterTicket::admit(gate, self.settings.max_waiters).map_err(|waiting| {
            tracing::warn!(
                username = credentials.username(),
                waiting,
                "too many requests waiting for login"
            );
            ConnectionError::TooManyWaiters { waiting }
        })?;

        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ConnectionError::Cancelled),
            guard = Arc::clone(&gate.lock).lock_owned() => guard,
        };
        drop(ticket);

        // Another caller may have finished the login while we waited.
        if let Some(entry) = self.fresh(credentials).await {
            return Ok(entry);
        }

        let task = tokio::spawn(login_and_store(
            Arc::clone(&self.gateway),
            self.entries.clone(),
            self.settings.clone(),
            credentials.clone(),
            Arc::clone(&self.logins),
            GateGuard {
                gates: Arc::clone(&self.gates),
                gate: Arc::clone(gate),
                guard,
            },
        ));

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ConnectionError::Cancelled),
            joined = task => joined.map_err(|e| ConnectionError::Internal(e.to_string()))?,
        }
    }

    async fn fresh(&self, credentials: &Credentials) -> Option<Arc<ConnectionEntry>> {
        self.entries
            .get(credentials)
            .await
            .filter(|entry| entry.is_fresh(self.settings.ttl))
    }

    /// Number of callers currently queued on the login for `credentials`.
    pub fn waiting(&self, credentials: &Credentials) -> usize {
        self.gates
            .get(credentials)
            .map(|g| g.waiting.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Drop the cached session for `credentials`. The next call logs in again.
    pub async fn invalidate(&self, credentials: &Credentials) {
        self.entries.invalidate(credentials).await;
    }

    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }

    pub async fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            entries: self.entry_count().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            logins: self.logins.load(Ordering::Relaxed),
        }
    }
}

/// A gate's lock held by the login task.
struct GateGuard {
    gates: Arc<DashMap<Credentials, Arc<InitGate>>>,
    gate: Arc<InitGate>,
    guard: OwnedMutexGuard<()>,
}

impl GateGuard {
    /// Unlock, then drop the gate if no caller is still using it.
    fn release(self, key: &Credentials) {
        let Self { gates, gate, guard } = self;
        drop(guard);
        release_gate(&gates, key, &gate);
    }
}

/// Log in and publish the entry while holding the credential's gate lock.
async fn login_and_store(
    gateway: Arc<dyn SessionGateway>,
    entries: Cache<Credentials, Arc<ConnectionEntry>>,
    settings: ConnectionSettings,
    credentials: Credentials,
    logins: Arc<AtomicU64>,
    gate: GateGuard,
) -> Result<Arc<ConnectionEntry>, ConnectionError> {
    let outcome = establish(gateway.as_ref(), &settings, &credentials)
        .await
        .map(Arc::new);
    if let Ok(entry) = &outcome {
        logins.fetch_add(1, Ordering::Relaxed);
        entries.insert(credentials.clone(), Arc::clone(entry)).await;
    }
    gate.release(&credentials);
    outcome
}

/// Open sessions until one logs in and lists at least one company.
async fn establish(
    gateway: &dyn SessionGateway,
    settings: &ConnectionSettings,
    credentials: &Credentials,
) -> Result<ConnectionEntry, ConnectionError> {
    let username = credentials.username();

    for attempt in 1..=settings.login_attempts {
        let session = gateway.open_session().await?;
        let status = session
            .login(username, credentials.password(), settings.affiliate_key)
            .await?;
        if !status.is_success() {
            tracing::info!(username, status = %status, "login rejected");
            return Err(ConnectionError::Forbidden { status });
        }

        match session.companies().await? {
            Some(companies) if !companies.is_empty() => {
                if attempt > 1 {
                    tracing::warn!(username, trials = attempt, "got companies after retries");
                }
                tracing::info!(username, companies = companies.len(), "logged in");
                return Ok(ConnectionEntry {
                    session,
                    companies,
                    created_at: Instant::now(),
                });
            }
            _ => {
                tracing::debug!(username, attempt, "no companies returned, retrying");
            }
        }
    }

    tracing::warn!(
        username,
        attempts = settings.login_attempts,
        "no companies returned by any attempt"
    );
    Err(ConnectionError::TransientExhausted {
        attempts: settings.login_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use serde_json::Value;
    use tokio::sync::Semaphore;
    use unirest_core::{ErrorCode, FilterPredicate};
    use unirest_gateway::{
        InvoiceOutcome, InvoiceRequest, JournalPosting, PostingOutcome, ReadOutcome, WriteOutcome,
    };

    /// Gateway whose answers are scripted per test.
    struct ScriptedGateway {
        status: ErrorCode,
        companies: std::sync::Mutex<VecDeque<Option<Vec<Company>>>>,
        logins: AtomicUsize,
        /// Logins for this username wait for a permit.
        blocked: Option<(&'static str, Arc<Semaphore>)>,
    }

    impl ScriptedGateway {
        fn ok() -> Self {
            Self {
                status: ErrorCode::Success,
                companies: std::sync::Mutex::new(VecDeque::new()),
                logins: AtomicUsize::new(0),
                blocked: None,
            }
        }

        fn rejecting() -> Self {
            Self {
                status: ErrorCode::Other("UserOrPasswordIncorrect".into()),
                ..Self::ok()
            }
        }

        fn with_companies(self, script: Vec<Option<Vec<Company>>>) -> Self {
            *self.companies.lock().unwrap() = script.into();
            self
        }

        fn blocked(self, username: &'static str, release: Arc<Semaphore>) -> Self {
            Self {
                blocked: Some((username, release)),
                ..self
            }
        }

        fn logins(&self) -> usize {
            self.logins.load(Ordering::SeqCst)
        }
    }

    struct ScriptedSession {
        gateway: Arc<ScriptedGateway>,
    }

    struct SharedGateway(Arc<ScriptedGateway>);

    #[async_trait]
    impl SessionGateway for SharedGateway {
        async fn open_session(&self) -> Result<Arc<dyn RemoteSession>, GatewayError> {
            Ok(Arc::new(ScriptedSession {
                gateway: Arc::clone(&self.0),
            }))
        }
    }

    #[async_trait]
    impl RemoteSession for ScriptedSession {
        async fn login(
            &self,
            username: &str,
            _: &str,
            _: Uuid,
        ) -> Result<LoginStatus, GatewayError> {
            self.gateway.logins.fetch_add(1, Ordering::SeqCst);
            if let Some((blocked, release)) = &self.gateway.blocked
                && *blocked == username
            {
                release
                    .acquire()
                    .await
                    .map_err(|e| GatewayError::connection(e.to_string()))?
                    .forget();
            }
            Ok(self.gateway.status.clone())
        }

        async fn companies(&self) -> Result<Option<Vec<Company>>, GatewayError> {
            Ok(self
                .gateway
                .companies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Some(vec![Company::new(1, "Acme")])))
        }

        async fn query(
            &self,
            _: &Company,
            _: &str,
            _: &[FilterPredicate],
        ) -> Result<Vec<Value>, GatewayError> {
            Err(GatewayError::Unsupported("query".into()))
        }

        async fn read(&self, _: &Company, _: &str, _: &Value) -> Result<ReadOutcome, GatewayError> {
            Err(GatewayError::Unsupported("read".into()))
        }

        async fn query_lines(
            &self,
            _: &Company,
            _: &str,
            _: &Value,
        ) -> Result<Vec<Value>, GatewayError> {
            Err(GatewayError::Unsupported("lines".into()))
        }

        async fn insert(
            &self,
            _: &Company,
            _: &str,
            _: Vec<Value>,
        ) -> Result<WriteOutcome, GatewayError> {
            Err(GatewayError::Unsupported("insert".into()))
        }

        async fn update(
            &self,
            _: &Company,
            _: &str,
            _: Vec<Value>,
        ) -> Result<WriteOutcome, GatewayError> {
            Err(GatewayError::Unsupported("update".into()))
        }

        async fn delete(
            &self,
            _: &Company,
            _: &str,
            _: Vec<Value>,
        ) -> Result<ErrorCode, GatewayError> {
            Err(GatewayError::Unsupported("delete".into()))
        }

        async fn post_invoice(
            &self,
            _: &Company,
            _: &InvoiceRequest,
        ) -> Result<InvoiceOutcome, GatewayError> {
            Err(GatewayError::Unsupported("invoice".into()))
        }

        async fn post_journal(
            &self,
            _: &Company,
            _: &JournalPosting,
        ) -> Result<PostingOutcome, GatewayError> {
            Err(GatewayError::Unsupported("journal".into()))
        }
    }

    fn cache(gateway: &Arc<ScriptedGateway>) -> Arc<ConnectionCache> {
        Arc::new(ConnectionCache::new(
            Arc::new(SharedGateway(Arc::clone(gateway))),
            ConnectionSettings::default(),
        ))
    }

    fn alice() -> Credentials {
        Credentials::new("alice", "secret")
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        while !condition() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let gateway = Arc::new(ScriptedGateway::ok());
        let cache = cache(&gateway);
        let token = CancellationToken::new();

        let first = cache.get_connection(&alice(), &token).await.unwrap();
        let second = cache.get_connection(&alice(), &token).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(gateway.logins(), 1);
        assert_eq!(first.company(1).unwrap().name, "Acme");
        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.logins), (1, 1, 1));
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_login() {
        let release = Arc::new(Semaphore::new(0));
        let gateway = Arc::new(ScriptedGateway::ok().blocked("alice", Arc::clone(&release)));
        let cache = cache(&gateway);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                cache
                    .get_connection(&alice(), &CancellationToken::new())
                    .await
            }));
        }

        wait_until(|| gateway.logins() == 1 && cache.waiting(&alice()) == 9).await;
        release.add_permits(100);

        let mut entries = Vec::new();
        for handle in handles {
            entries.push(handle.await.unwrap().unwrap());
        }
        assert_eq!(gateway.logins(), 1);
        assert!(entries.iter().all(|e| Arc::ptr_eq(e, &entries[0])));
        assert_eq!(cache.waiting(&alice()), 0);
    }

    #[tokio::test]
    async fn different_credentials_do_not_wait_on_each_other() {
        let release = Arc::new(Semaphore::new(0));
        let blocked = Arc::new(ScriptedGateway::ok().blocked("alice", Arc::clone(&release)));
        let cache = cache(&blocked);

        let stuck = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_connection(&alice(), &CancellationToken::new())
                    .await
            })
        };
        wait_until(|| blocked.logins() == 1).await;

        // A second key gets its own gate and its own login.
        let bob = Credentials::new("bob", "pw");
        let entry = cache
            .get_connection(&bob, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(entry.companies().len(), 1);

        release.add_permits(1);
        stuck.await.unwrap().unwrap();
        assert_eq!(blocked.logins(), 2);
        assert_eq!(cache.entry_count().await, 2);
    }

    #[tokio::test]
    async fn rejected_login_is_forbidden_and_not_cached() {
        let gateway = Arc::new(ScriptedGateway::rejecting());
        let cache = cache(&gateway);
        let token = CancellationToken::new();

        for _ in 0..2 {
            let err = cache.get_connection(&alice(), &token).await.unwrap_err();
            assert!(matches!(err, ConnectionError::Forbidden { .. }));
        }
        assert_eq!(gateway.logins(), 2);
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn empty_companies_are_retried() {
        let gateway = Arc::new(ScriptedGateway::ok().with_companies(vec![
            Some(vec![]),
            None,
            Some(vec![]),
            None,
            Some(vec![Company::new(9, "Late")]),
        ]));
        let cache = cache(&gateway);

        let entry = cache
            .get_connection(&alice(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(gateway.logins(), 5);
        assert!(entry.company(9).is_some());
    }

    #[tokio::test]
    async fn empty_companies_give_up_after_last_attempt() {
        let gateway = Arc::new(
            ScriptedGateway::ok().with_companies(vec![Some(vec![]), None, None, None, None]),
        );
        let cache = cache(&gateway);

        let err = cache
            .get_connection(&alice(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::TransientExhausted { attempts: 5 }
        ));
        assert_eq!(gateway.logins(), 5);
        assert_eq!(cache.entry_count().await, 0);

        // Nothing was memoized, so the next call logs in again and succeeds.
        cache
            .get_connection(&alice(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(gateway.logins(), 6);
    }

    #[tokio::test]
    async fn waiter_above_ceiling_is_rejected() {
        let release = Arc::new(Semaphore::new(0));
        let gateway = Arc::new(ScriptedGateway::ok().blocked("alice", Arc::clone(&release)));
        let cache = cache(&gateway);

        let spawn_caller = || {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_connection(&alice(), &CancellationToken::new())
                    .await
            })
        };

        let initiator = spawn_caller();
        wait_until(|| gateway.logins() == 1).await;

        let waiters: Vec<_> = (0..20).map(|_| spawn_caller()).collect();
        wait_until(|| cache.waiting(&alice()) == 20).await;

        let err = cache
            .get_connection(&alice(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::TooManyWaiters { waiting: 20 }));
        assert_eq!(cache.waiting(&alice()), 20);

        release.add_permits(100);
        initiator.await.unwrap().unwrap();
        for waiter in waiters {
            waiter.await.unwrap().unwrap();
        }
        assert_eq!(gateway.logins(), 1);
    }

    #[tokio::test]
    async fn cancelled_waiter_leaves_the_queue() {
        let release = Arc::new(Semaphore::new(0));
        let gateway = Arc::new(ScriptedGateway::ok().blocked("alice", Arc::clone(&release)));
        let cache = cache(&gateway);

        let initiator = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_connection(&alice(), &CancellationToken::new())
                    .await
            })
        };
        wait_until(|| gateway.logins() == 1).await;

        let token = CancellationToken::new();
        let waiter = {
            let cache = Arc::clone(&cache);
            let token = token.clone();
            tokio::spawn(async move { cache.get_connection(&alice(), &token).await })
        };
        wait_until(|| cache.waiting(&alice()) == 1).await;

        token.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ConnectionError::Cancelled));
        assert_eq!(cache.waiting(&alice()), 0);

        release.add_permits(1);
        initiator.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancelled_initiator_still_completes_login() {
        let release = Arc::new(Semaphore::new(0));
        let gateway = Arc::new(ScriptedGateway::ok().blocked("alice", Arc::clone(&release)));
        let cache = cache(&gateway);

        let token = CancellationToken::new();
        let initiator = {
            let cache = Arc::clone(&cache);
            let token = token.clone();
            tokio::spawn(async move { cache.get_connection(&alice(), &token).await })
        };
        wait_until(|| gateway.logins() == 1).await;

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_connection(&alice(), &CancellationToken::new())
                    .await
            })
        };
        wait_until(|| cache.waiting(&alice()) == 1).await;

        token.cancel();
        assert!(matches!(
            initiator.await.unwrap().unwrap_err(),
            ConnectionError::Cancelled
        ));

        release.add_permits(1);
        waiter.await.unwrap().unwrap();
        assert_eq!(gateway.logins(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_is_replaced_after_ttl() {
        let gateway = Arc::new(ScriptedGateway::ok());
        let cache = cache(&gateway);
        let token = CancellationToken::new();
        let ttl = cache.settings().ttl;

        let first = cache.get_connection(&alice(), &token).await.unwrap();
        tokio::time::advance(ttl - Duration::from_secs(1)).await;
        cache.get_connection(&alice(), &token).await.unwrap();
        assert_eq!(gateway.logins(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        let refreshed = cache.get_connection(&alice(), &token).await.unwrap();
        assert_eq!(gateway.logins(), 2);
        assert!(!Arc::ptr_eq(&first, &refreshed));
        // Holders of the old entry keep a usable session.
        assert_eq!(first.companies().len(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_new_login() {
        let gateway = Arc::new(ScriptedGateway::ok());
        let cache = cache(&gateway);
        let token = CancellationToken::new();

        cache.get_connection(&alice(), &token).await.unwrap();
        cache.invalidate(&alice()).await;
        cache.get_connection(&alice(), &token).await.unwrap();
        assert_eq!(gateway.logins(), 2);
    }

    #[tokio::test]
    async fn gate_is_removed_after_abandoned_login() {
        let release = Arc::new(Semaphore::new(0));
        let gateway = Arc::new(ScriptedGateway::ok().blocked("alice", Arc::clone(&release)));
        let cache = cache(&gateway);

        let token = CancellationToken::new();
        let initiator = {
            let cache = Arc::clone(&cache);
            let token = token.clone();
            tokio::spawn(async move { cache.get_connection(&alice(), &token).await })
        };
        wait_until(|| gateway.logins() == 1).await;

        token.cancel();
        assert!(matches!(
            initiator.await.unwrap().unwrap_err(),
            ConnectionError::Cancelled
        ));
        assert_eq!(cache.gates.len(), 1);

        release.add_permits(1);
        wait_until(|| cache.gates.is_empty()).await;
        assert_eq!(cache.stats().await.logins, 1);
    }

    #[tokio::test]
    async fn idle_gates_are_removed() {
        let gateway = Arc::new(ScriptedGateway::ok());
        let cache = cache(&gateway);

        cache
            .get_connection(&alice(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(cache.gates.is_empty());
    }
}
