//! Keyed SMTP transport pool
//!
//! One logical pool per SMTP account. Checkout is bounded by the pool
//! size, paced by a per-second rate gate, and returns a scoped guard that
//! releases the transport on drop from every exit path. Idle transports
//! are reused while fresh and reaped after the idle timeout; a transport
//! that has carried `max_messages` messages is closed instead of reused.

use cadence_common::config::SmtpPoolConfig;
use cadence_common::{Error, Result};
use cadence_storage::models::SmtpAccount;
use lettre::{AsyncSmtpTransport, Tokio1Executor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Connection parameters for one sender identity. The password is the
/// decrypted plaintext and must not outlive the send path.
#[derive(Clone)]
pub struct TransportSpec {
    pub account_id: Uuid,
    pub host: String,
    pub port: u16,
    pub secure: bool,
    pub username: String,
    pub password: String,
}

impl TransportSpec {
    /// Build a spec from a stored account and its decrypted password
    pub fn from_account(account: &SmtpAccount, password: String) -> Self {
        Self {
            account_id: account.id,
            host: account.host.clone(),
            port: account.port as u16,
            secure: account.secure,
            username: account.username.clone(),
            password,
        }
    }
}

impl std::fmt::Debug for TransportSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSpec")
            .field("account_id", &self.account_id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Counter snapshot for one account pool
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct PoolMetrics {
    pub opened: u64,
    pub closed: u64,
    pub live: u64,
    pub active: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct Counters {
    opened: AtomicU64,
    closed: AtomicU64,
    active: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> PoolMetrics {
        let opened = self.opened.load(Ordering::Relaxed);
        let closed = self.closed.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let checkouts = hits + misses;

        PoolMetrics {
            opened,
            closed,
            live: opened.saturating_sub(closed),
            active: self.active.load(Ordering::Relaxed),
            hits,
            misses,
            hit_rate: if checkouts == 0 {
                0.0
            } else {
                hits as f64 / checkouts as f64
            },
        }
    }
}

struct IdleTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    messages_sent: u32,
    idle_since: Instant,
}

struct RateWindow {
    window_start: Instant,
    count: u32,
}

struct AccountPool {
    account_id: Uuid,
    semaphore: Arc<Semaphore>,
    idle: StdMutex<Vec<IdleTransport>>,
    rate: Mutex<RateWindow>,
    counters: Counters,
    config: SmtpPoolConfig,
}

impl AccountPool {
    fn new(account_id: Uuid, config: SmtpPoolConfig) -> Self {
        Self {
            account_id,
            semaphore: Arc::new(Semaphore::new(config.max_pool_size)),
            idle: StdMutex::new(Vec::new()),
            rate: Mutex::new(RateWindow {
                window_start: Instant::now(),
                count: 0,
            }),
            counters: Counters::default(),
            config,
        }
    }

    /// Wait until the per-second rate budget admits one more message
    async fn acquire_rate_slot(&self) {
        if self.config.rate_limit == 0 {
            return;
        }

        loop {
            let wait = {
                let mut window = self.rate.lock().await;
                let elapsed = window.window_start.elapsed();
                if elapsed >= Duration::from_secs(1) {
                    window.window_start = Instant::now();
                    window.count = 0;
                }
                if window.count < self.config.rate_limit {
                    window.count += 1;
                    return;
                }
                Duration::from_secs(1).saturating_sub(elapsed)
            };
            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
        }
    }

    fn pop_idle(&self) -> Option<IdleTransport> {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        let timeout = Duration::from_secs(self.config.idle_timeout_secs);

        while let Some(entry) = idle.pop() {
            if entry.idle_since.elapsed() < timeout {
                return Some(entry);
            }
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    fn push_idle(&self, transport: AsyncSmtpTransport<Tokio1Executor>, messages_sent: u32) {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        idle.push(IdleTransport {
            transport,
            messages_sent,
            idle_since: Instant::now(),
        });
    }

    fn reap(&self) -> u64 {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        let timeout = Duration::from_secs(self.config.idle_timeout_secs);
        let before = idle.len();
        idle.retain(|entry| entry.idle_since.elapsed() < timeout);
        let reaped = (before - idle.len()) as u64;
        if reaped > 0 {
            self.counters.closed.fetch_add(reaped, Ordering::Relaxed);
        }
        reaped
    }

    fn drain(&self) -> u64 {
        let mut idle = self.idle.lock().unwrap_or_else(|e| e.into_inner());
        let drained = idle.len() as u64;
        idle.clear();
        self.counters.closed.fetch_add(drained, Ordering::Relaxed);
        drained
    }
}

/// Checked-out transport. Exclusive for the duration of one send; the
/// drop implementation returns it to the pool on every exit path.
pub struct PooledTransport {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    messages_sent: u32,
    pool: Arc<AccountPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledTransport {
    /// The underlying transport
    pub fn transport(&self) -> &AsyncSmtpTransport<Tokio1Executor> {
        self.transport
            .as_ref()
            .expect("transport present until drop")
    }

    /// Record one message carried by this transport
    pub fn mark_message_sent(&mut self) {
        self.messages_sent += 1;
    }
}

impl Drop for PooledTransport {
    fn drop(&mut self) {
        self.pool.counters.active.fetch_sub(1, Ordering::Relaxed);

        if let Some(transport) = self.transport.take() {
            if self.messages_sent < self.pool.config.max_messages {
                self.pool.push_idle(transport, self.messages_sent);
            } else {
                // reconnect-after-N: worn transports are not reused
                self.pool.counters.closed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    account_id = %self.pool.account_id,
                    messages = self.messages_sent,
                    "Retiring transport after message cap"
                );
            }
        }
    }
}

/// Keyed pool of live SMTP transports, one logical pool per account
pub struct SmtpPool {
    config: SmtpPoolConfig,
    accounts: RwLock<HashMap<Uuid, Arc<AccountPool>>>,
}

impl SmtpPool {
    /// Create the process-wide pool
    pub fn new(config: SmtpPoolConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            accounts: RwLock::new(HashMap::new()),
        })
    }

    fn account_pool(&self, account_id: Uuid) -> Arc<AccountPool> {
        {
            let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
            if let Some(pool) = accounts.get(&account_id) {
                return Arc::clone(pool);
            }
        }

        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            accounts
                .entry(account_id)
                .or_insert_with(|| Arc::new(AccountPool::new(account_id, self.config.clone()))),
        )
    }

    /// Check out a transport for the account, blocking while the pool is
    /// at capacity and while the rate budget is exhausted.
    pub async fn acquire(&self, spec: &TransportSpec) -> Result<PooledTransport> {
        let pool = self.account_pool(spec.account_id);

        let permit = pool
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Smtp("SMTP pool is shut down".to_string()))?;

        pool.acquire_rate_slot().await;

        if let Some(idle) = pool.pop_idle() {
            pool.counters.hits.fetch_add(1, Ordering::Relaxed);
            pool.counters.active.fetch_add(1, Ordering::Relaxed);
            return Ok(PooledTransport {
                transport: Some(idle.transport),
                messages_sent: idle.messages_sent,
                pool,
                _permit: permit,
            });
        }

        pool.counters.misses.fetch_add(1, Ordering::Relaxed);
        let transport = super::build_transport(spec, self.config.max_connections)?;
        pool.counters.opened.fetch_add(1, Ordering::Relaxed);
        pool.counters.active.fetch_add(1, Ordering::Relaxed);

        Ok(PooledTransport {
            transport: Some(transport),
            messages_sent: 0,
            pool,
            _permit: permit,
        })
    }

    /// Metrics for one account pool
    pub fn metrics(&self, account_id: Uuid) -> Option<PoolMetrics> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(&account_id).map(|p| p.counters.snapshot())
    }

    /// Metrics for every account pool
    pub fn metrics_all(&self) -> HashMap<Uuid, PoolMetrics> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts
            .iter()
            .map(|(id, p)| (*id, p.counters.snapshot()))
            .collect()
    }

    /// Close idle transports past their idle timeout
    pub fn reap_idle(&self) -> u64 {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.values().map(|p| p.reap()).sum()
    }

    /// Periodic reaper task
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(30));
            loop {
                ticker.tick().await;
                let reaped = pool.reap_idle();
                if reaped > 0 {
                    debug!(reaped, "Reaped idle SMTP transports");
                }
            }
        })
    }

    /// Close every pooled transport. Called once at shutdown.
    pub fn shutdown_all(&self) {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        let mut closed = 0u64;
        for pool in accounts.values() {
            pool.semaphore.close();
            closed += pool.drain();
        }
        info!(closed, "SMTP pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> SmtpPoolConfig {
        SmtpPoolConfig {
            max_pool_size: 2,
            idle_timeout_secs: 300,
            max_connections: 3,
            max_messages: 2,
            rate_limit: 0,
        }
    }

    fn spec() -> TransportSpec {
        TransportSpec {
            account_id: Uuid::new_v4(),
            host: "localhost".to_string(),
            port: 2525,
            secure: false,
            username: String::new(),
            password: String::new(),
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let pool = SmtpPool::new(test_config());
        let spec = spec();

        let guard = pool.acquire(&spec).await.unwrap();
        let metrics = pool.metrics(spec.account_id).unwrap();
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.hits, 0);
        assert_eq!(metrics.opened, 1);
        assert_eq!(metrics.active, 1);
        drop(guard);

        let _guard = pool.acquire(&spec).await.unwrap();
        let metrics = pool.metrics(spec.account_id).unwrap();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 1);
        assert_eq!(metrics.opened, 1);
        assert_eq!(metrics.hit_rate, 0.5);
    }

    #[tokio::test]
    async fn test_checkout_bounded_by_pool_size() {
        let pool = SmtpPool::new(test_config());
        let spec = spec();

        let _a = pool.acquire(&spec).await.unwrap();
        let _b = pool.acquire(&spec).await.unwrap();

        // third checkout must block until a guard is released
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), pool.acquire(&spec)).await;
        assert!(blocked.is_err());

        drop(_a);
        let _c = tokio::time::timeout(Duration::from_millis(200), pool.acquire(&spec))
            .await
            .expect("checkout should proceed after release")
            .unwrap();
    }

    #[tokio::test]
    async fn test_transport_retired_after_message_cap() {
        let pool = SmtpPool::new(test_config());
        let spec = spec();

        let mut guard = pool.acquire(&spec).await.unwrap();
        guard.mark_message_sent();
        guard.mark_message_sent();
        drop(guard);

        let metrics = pool.metrics(spec.account_id).unwrap();
        assert_eq!(metrics.closed, 1);
        assert_eq!(metrics.live, 0);

        // next checkout opens a fresh transport
        let _guard = pool.acquire(&spec).await.unwrap();
        let metrics = pool.metrics(spec.account_id).unwrap();
        assert_eq!(metrics.misses, 2);
        assert_eq!(metrics.opened, 2);
    }

    #[tokio::test]
    async fn test_reap_expired_idle() {
        let mut config = test_config();
        config.idle_timeout_secs = 0;
        let pool = SmtpPool::new(config);
        let spec = spec();

        let guard = pool.acquire(&spec).await.unwrap();
        drop(guard);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let reaped = pool.reap_idle();
        assert_eq!(reaped, 1);

        let metrics = pool.metrics(spec.account_id).unwrap();
        assert_eq!(metrics.closed, 1);
        assert_eq!(metrics.live, 0);
    }

    #[tokio::test]
    async fn test_pools_are_keyed_per_account() {
        let pool = SmtpPool::new(test_config());
        let first = spec();
        let second = spec();

        let _a = pool.acquire(&first).await.unwrap();
        let _b = pool.acquire(&second).await.unwrap();

        assert_eq!(pool.metrics(first.account_id).unwrap().misses, 1);
        assert_eq!(pool.metrics(second.account_id).unwrap().misses, 1);
        assert_eq!(pool.metrics_all().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_and_rejects_acquire() {
        let pool = SmtpPool::new(test_config());
        let spec = spec();

        let guard = pool.acquire(&spec).await.unwrap();
        drop(guard);

        pool.shutdown_all();
        let metrics = pool.metrics(spec.account_id).unwrap();
        assert_eq!(metrics.closed, 1);

        assert!(pool.acquire(&spec).await.is_err());
    }

    #[test]
    fn test_spec_debug_hides_password() {
        let spec = TransportSpec {
            account_id: Uuid::new_v4(),
            host: "smtp.example.com".to_string(),
            port: 587,
            secure: true,
            username: "mailer".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{:?}", spec);
        assert!(!debug.contains("hunter2"));
    }
}
