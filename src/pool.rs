//! A bounded pool of [`Connection`]s to a set of addresses: round-robin
//! target selection, an idle set of reusable connections, a cap on total
//! connection count (hard or soft), a bounded queue of callers waiting for
//! one to free up, and a single pinned connection reused for every pub/sub
//! subscription.

use crate::connection::{self, Connection};
use crate::connection_info::ConnectionInfo;
use crate::error::{ErrorKind, RedisError, RedisResult};
use crate::transport::connect_tcp;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tracing::{debug, warn};

/// What happens once the configured connection count is reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CapPolicy {
    /// `available + leased` never exceeds `max`; once it does, lease calls
    /// queue (bounded by `max_pending_leases`) for a connection to free up.
    Hard { max: usize },
    /// The idle set never holds more than `max_preserved` connections, but
    /// leased count is unbounded — transient extras are opened on demand and
    /// closed (rather than returned to idle) once the idle set is full.
    Soft { max_preserved: usize },
}

#[derive(Clone, Debug)]
pub struct PoolConfig {
    pub cap_policy: CapPolicy,
    /// Connections eagerly created at [`Pool::connect`] time, round-robin
    /// across the configured addresses.
    pub min_count: usize,
    pub max_pending_leases: usize,
    pub exponent_base: u32,
    pub factor: u32,
    pub number_of_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            cap_policy: CapPolicy::Hard { max: 8 },
            min_count: 0,
            max_pending_leases: 100,
            exponent_base: 2,
            factor: 100,
            number_of_retries: 5,
        }
    }
}

impl PoolConfig {
    fn backoff(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(self.exponent_base as u64)
            .factor(self.factor as u64)
            .map(jitter)
            .take(self.number_of_retries as usize)
    }
}

/// An idle connection together with the count-permit it holds for as long
/// as it exists (hard-cap only; soft-cap overflow connections carry none).
struct Idle {
    connection: Connection,
    permit: Option<OwnedSemaphorePermit>,
}

struct Inner {
    addresses: ArcSwap<Vec<String>>,
    cursor: AtomicUsize,
    info: ConnectionInfo,
    config: PoolConfig,
    /// Total connection count gate for [`CapPolicy::Hard`]; unused (always
    /// has spare permits) under [`CapPolicy::Soft`].
    count: Arc<Semaphore>,
    /// Bounds the number of callers allowed to wait on `idle_rx` at once.
    pending_permit: Arc<Semaphore>,
    /// Bounds the number of callers allowed to buffer waiting for the address
    /// list to go from empty to non-empty — a distinct bound from
    /// `pending_permit`, which only applies once addresses exist but the
    /// connection-count cap is exhausted.
    address_pending: Arc<Semaphore>,
    /// Woken by `update_addresses`/`notify_addresses` whenever the address
    /// list transitions away from empty.
    address_available: Notify,
    idle_tx: mpsc::UnboundedSender<Idle>,
    idle_rx: Mutex<mpsc::UnboundedReceiver<Idle>>,
    idle_len: AtomicUsize,
    /// The connection currently pinned for pub/sub use, if any subscription
    /// is active. `None` means no caller has subscribed yet.
    pinned: Mutex<Option<Connection>>,
    address_tx: mpsc::UnboundedSender<Vec<String>>,
    closed: std::sync::atomic::AtomicBool,
}

/// A handle to a connection leased from the pool. Dropping it returns the
/// connection to the idle set (or closes it, per the cap policy) exactly
/// once — callers never need to return a `Lease` explicitly.
pub struct Lease {
    connection: Option<Connection>,
    permit: Option<OwnedSemaphorePermit>,
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("connection_id", &self.connection.as_ref().map(Connection::id))
            .finish()
    }
}

impl std::ops::Deref for Lease {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.connection.as_ref().expect("Lease connection taken before drop")
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        let permit = self.permit.take();
        self.inner.clone().return_connection(connection, permit);
    }
}

/// Round-robin connection pool: every lease and pub/sub call goes through
/// the same shared `Inner`, with an async-aware semaphore (not an OS-thread
/// lock) gating access to the hot path.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<Inner>,
}

impl Pool {
    /// Open a pool against `addresses`, eagerly creating `config.min_count`
    /// connections round-robin across them before returning. `addresses` may
    /// be empty — leases then buffer (see [`Pool::lease`]) until
    /// [`Pool::update_addresses`] or [`Pool::notify_addresses`] supplies some.
    pub async fn connect(
        addresses: Vec<String>,
        info: ConnectionInfo,
        config: PoolConfig,
    ) -> RedisResult<Self> {
        let has_addresses = !addresses.is_empty();
        let count_max = match config.cap_policy {
            CapPolicy::Hard { max } => max.max(1),
            CapPolicy::Soft { .. } => usize::MAX / 2,
        };
        let (address_tx, mut address_rx) = mpsc::unbounded_channel::<Vec<String>>();
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            addresses: ArcSwap::from_pointee(addresses),
            cursor: AtomicUsize::new(0),
            info,
            count: Arc::new(Semaphore::new(count_max)),
            pending_permit: Arc::new(Semaphore::new(config.max_pending_leases)),
            address_pending: Arc::new(Semaphore::new(config.max_pending_leases)),
            address_available: Notify::new(),
            idle_tx,
            idle_rx: Mutex::new(idle_rx),
            idle_len: AtomicUsize::new(0),
            pinned: Mutex::new(None),
            address_tx,
            closed: std::sync::atomic::AtomicBool::new(false),
            config,
        });

        if has_addresses {
            for _ in 0..inner.config.min_count {
                let address = inner.next_address().expect("checked non-empty above");
                let permit = inner
                    .count
                    .clone()
                    .try_acquire_owned()
                    .expect("min_count must not exceed the hard cap");
                let connection = connect_with_retry(&inner, &address).await?;
                inner.push_idle(Idle {
                    connection,
                    permit: Some(permit),
                });
            }
            if inner.config.min_count == 0 {
                // Probe connectivity once up front so callers notice a dead
                // configuration immediately rather than on first lease.
                let probe_addr = inner.next_address().expect("checked non-empty above");
                let connection = connect_with_retry(&inner, &probe_addr).await?;
                let permit = match inner.config.cap_policy {
                    CapPolicy::Hard { .. } => inner.count.clone().try_acquire_owned().ok(),
                    CapPolicy::Soft { .. } => None,
                };
                inner.push_idle(Idle { connection, permit });
            }
        } else {
            debug!("pool opened with no addresses configured; leases will buffer until one is supplied");
        }

        let pool = Pool { inner };
        let watcher = pool.clone();
        tokio::spawn(async move {
            while let Some(addresses) = address_rx.recv().await {
                watcher.update_addresses(addresses);
            }
        });
        Ok(pool)
    }

    /// Replace the address list, e.g. in response to service discovery.
    /// Existing leased connections are unaffected; future round-robin
    /// targets (including retries against the new list) are drawn from it.
    pub fn update_addresses(&self, addresses: Vec<String>) {
        if addresses.is_empty() {
            return;
        }
        self.inner.addresses.store(Arc::new(addresses));
        self.inner.address_available.notify_waiters();
    }

    /// Push a new address list to the pool's background watcher, e.g. from a
    /// service-discovery callback running on another task.
    pub fn notify_addresses(&self, addresses: Vec<String>) {
        let _ = self.inner.address_tx.send(addresses);
    }

    /// Lease a connection for ordinary (non-pub/sub) command traffic: reuses
    /// an idle connection if one exists, creates a new one if under cap, or
    /// (hard cap only) queues until one frees up.
    pub async fn lease(&self) -> RedisResult<Lease> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RedisError::new(ErrorKind::PoolClosed, "pool is closed"));
        }
        if self.inner.addresses.load().is_empty() {
            return self.wait_for_address().await;
        }

        // Drain stale idle entries (closed by a transport failure while
        // sitting idle) before deciding whether to create or wait.
        loop {
            let popped = { self.inner.idle_rx.lock().await.try_recv().ok() };
            match popped {
                Some(idle) if idle.connection.is_closed() => {
                    self.inner.idle_len.fetch_sub(1, Ordering::AcqRel);
                    drop(idle.permit);
                    continue;
                }
                Some(idle) => {
                    self.inner.idle_len.fetch_sub(1, Ordering::AcqRel);
                    debug!(connection_id = %idle.connection.id(), "lease resolved from idle set");
                    return Ok(Lease {
                        connection: Some(idle.connection),
                        permit: idle.permit,
                        inner: self.inner.clone(),
                    });
                }
                None => break,
            }
        }

        match self.inner.config.cap_policy {
            CapPolicy::Hard { .. } => match self.inner.count.clone().try_acquire_owned() {
                Ok(permit) => {
                    let address = self.inner.next_address().expect("checked non-empty above");
                    let connection = connect_with_retry(&self.inner, &address).await?;
                    debug!(connection_id = %connection.id(), "lease opened a new connection");
                    Ok(Lease {
                        connection: Some(connection),
                        permit: Some(permit),
                        inner: self.inner.clone(),
                    })
                }
                Err(_) => {
                    // At cap with nothing idle: queue for one to free up,
                    // bounded by `max_pending_leases`.
                    let _pending = self
                        .inner
                        .pending_permit
                        .clone()
                        .try_acquire_owned()
                        .map_err(|_| {
                            RedisError::new(ErrorKind::LeaseQueueFull, "pending-lease queue is full")
                        })?;
                    debug!("at connection cap, lease queued for an idle connection");
                    loop {
                        let idle = {
                            let mut rx = self.inner.idle_rx.lock().await;
                            rx.recv().await
                        };
                        let Some(idle) = idle else {
                            return Err(RedisError::new(ErrorKind::PoolClosed, "pool is closed"));
                        };
                        self.inner.idle_len.fetch_sub(1, Ordering::AcqRel);
                        if idle.connection.is_closed() {
                            drop(idle.permit);
                            continue;
                        }
                        return Ok(Lease {
                            connection: Some(idle.connection),
                            permit: idle.permit,
                            inner: self.inner.clone(),
                        });
                    }
                }
            },
            CapPolicy::Soft { .. } => {
                // Leased count is unbounded under soft cap: always open a
                // transient extra rather than queue.
                let address = self.inner.next_address().expect("checked non-empty above");
                let connection = connect_with_retry(&self.inner, &address).await?;
                debug!(connection_id = %connection.id(), "lease opened a transient soft-cap connection");
                Ok(Lease {
                    connection: Some(connection),
                    permit: None,
                    inner: self.inner.clone(),
                })
            }
        }
    }

    /// Buffer a `lease()` call made while no addresses are configured, bounded
    /// by `max_pending_leases` — a bound distinct from the hard-cap queue,
    /// since there is no connection-count cap to wait on here, only the
    /// address list itself. Resumes once `update_addresses`/`notify_addresses`
    /// supplies a non-empty list.
    async fn wait_for_address(&self) -> RedisResult<Lease> {
        let permit = self
            .inner
            .address_pending
            .clone()
            .try_acquire_owned()
            .map_err(|_| {
                RedisError::new(
                    ErrorKind::NoAvailableConnectionTarget,
                    "no addresses configured and the pending-lease queue is full",
                )
            })?;
        debug!("lease buffered waiting for an address to be configured");
        loop {
            if !self.inner.addresses.load().is_empty() {
                break;
            }
            let notified = self.inner.address_available.notified();
            if !self.inner.addresses.load().is_empty() {
                break;
            }
            notified.await;
        }
        drop(permit);
        Box::pin(self.lease()).await
    }

    /// Subscribe via the pool's single pinned pub/sub connection, opening and
    /// pinning one on first use. Every subsequent subscribe/unsubscribe call
    /// reuses it until the last subscription ends, at which point it is
    /// unpinned and returned to ordinary rotation.
    pub async fn subscribe(
        &self,
        channels: Vec<Vec<u8>>,
        is_pattern: bool,
        make_receiver: impl FnMut(&[u8]) -> crate::subscription::MessageReceiver,
        make_on_subscribe: impl FnMut(&[u8]) -> Option<crate::subscription::SubscribeCallback>,
        make_on_unsubscribe: impl FnMut(&[u8]) -> Option<crate::subscription::UnsubscribeCallback>,
    ) -> RedisResult<i64> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(RedisError::new(ErrorKind::PoolClosed, "pool is closed"));
        }
        let pinned = self.pinned_connection().await?;
        pinned
            .subscribe(channels, is_pattern, make_receiver, make_on_subscribe, make_on_unsubscribe)
            .await
    }

    pub async fn unsubscribe(&self, channels: Vec<Vec<u8>>, is_pattern: bool) -> RedisResult<i64> {
        let mut guard = self.inner.pinned.lock().await;
        let Some(pinned) = guard.clone() else {
            return Err(RedisError::new(
                ErrorKind::Usage,
                "no pub/sub connection is pinned",
            ));
        };
        drop(guard);
        let count = pinned.unsubscribe(channels, is_pattern).await?;
        if count == 0 {
            pinned.set_subscriptions_allowed(false);
            guard = self.inner.pinned.lock().await;
            *guard = None;
            drop(guard);
            self.inner.clone().return_connection(pinned, None);
        }
        Ok(count)
    }

    async fn pinned_connection(&self) -> RedisResult<Connection> {
        let mut guard = self.inner.pinned.lock().await;
        if let Some(existing) = guard.as_ref() {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
        }
        let address = self.inner.next_address().ok_or_else(|| {
            RedisError::new(ErrorKind::NoAvailableConnectionTarget, "no addresses configured")
        })?;
        let mut info = self.inner.info.clone();
        info.subscriptions_allowed = true;
        let connection = connect_connection(&address, &info).await?;
        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// Close the pool. Breaks the pool's self-reference cycle with the
    /// address-watcher task (which otherwise holds a cloned `Pool` forever),
    /// drops the pinned connection, and wakes any queued lease waiters with
    /// `PoolClosed` by dropping the idle channel's sender side.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let mut guard = self.inner.pinned.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().await;
        }
        drop(guard);
        let mut rx = self.inner.idle_rx.lock().await;
        while let Ok(idle) = rx.try_recv() {
            idle.connection.close().await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Inner {
    /// The next address in round-robin order, or `None` if the configured
    /// address list is currently empty.
    fn next_address(&self) -> Option<String> {
        let addresses = self.addresses.load();
        if addresses.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % addresses.len();
        Some(addresses[idx].clone())
    }

    fn push_idle(&self, idle: Idle) {
        self.idle_len.fetch_add(1, Ordering::AcqRel);
        let _ = self.idle_tx.send(idle);
    }

    /// Return a connection leased via [`Lease`]: reused if healthy and the
    /// cap policy still wants it idle, otherwise closed (and, for the hard
    /// cap, its permit released so a waiting lease can proceed).
    fn return_connection(self: Arc<Self>, connection: Connection, permit: Option<OwnedSemaphorePermit>) {
        if self.closed.load(Ordering::Acquire) || connection.is_closed() {
            debug!(connection_id = %connection.id(), "dropping a returned connection instead of reusing it");
            drop(permit);
            return;
        }
        match self.config.cap_policy {
            CapPolicy::Hard { .. } => {
                // The permit travels with the connection back into idle; it
                // is only released for good when the connection is closed.
                debug!(connection_id = %connection.id(), "returned connection to idle set");
                self.push_idle(Idle { connection, permit });
            }
            CapPolicy::Soft { max_preserved } => {
                if self.idle_len.load(Ordering::Acquire) < max_preserved {
                    debug!(connection_id = %connection.id(), "returned connection to idle set");
                    self.push_idle(Idle { connection, permit: None });
                } else {
                    debug!(connection_id = %connection.id(), "idle set full, closing returned soft-cap connection");
                    tokio::spawn(async move { connection.close().await });
                }
            }
        }
    }
}

async fn connect_connection(address: &str, info: &ConnectionInfo) -> RedisResult<Connection> {
    let mut info = info.clone();
    info.address = address.to_string();
    let stream = connect_tcp(address).await.map_err(RedisError::from)?;
    connection::spawn(stream, &info).await
}

async fn connect_with_retry(inner: &Inner, address: &str) -> RedisResult<Connection> {
    let mut backoff = inner.config.backoff();
    loop {
        match connect_connection(address, &inner.info).await {
            Ok(connection) => return Ok(connection),
            Err(err) if err.is_connection_fatal() => match backoff.next() {
                Some(delay) => {
                    warn!("connection attempt to {address} failed: {err}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                None => return Err(err),
            },
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cursor_wraps() {
        let inner = Inner {
            addresses: ArcSwap::from_pointee(vec!["a".into(), "b".into(), "c".into()]),
            cursor: AtomicUsize::new(0),
            info: ConnectionInfo::new("a"),
            config: PoolConfig::default(),
            count: Arc::new(Semaphore::new(1)),
            pending_permit: Arc::new(Semaphore::new(1)),
            address_pending: Arc::new(Semaphore::new(1)),
            address_available: Notify::new(),
            idle_tx: mpsc::unbounded_channel().0,
            idle_rx: Mutex::new(mpsc::unbounded_channel().1),
            idle_len: AtomicUsize::new(0),
            pinned: Mutex::new(None),
            address_tx: mpsc::unbounded_channel().0,
            closed: std::sync::atomic::AtomicBool::new(false),
        };
        let picks: Vec<_> = (0..6).map(|_| inner.next_address().unwrap()).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[test]
    fn next_address_is_none_when_list_is_empty() {
        let inner = Inner {
            addresses: ArcSwap::from_pointee(Vec::new()),
            cursor: AtomicUsize::new(0),
            info: ConnectionInfo::new("a"),
            config: PoolConfig::default(),
            count: Arc::new(Semaphore::new(1)),
            pending_permit: Arc::new(Semaphore::new(1)),
            address_pending: Arc::new(Semaphore::new(1)),
            address_available: Notify::new(),
            idle_tx: mpsc::unbounded_channel().0,
            idle_rx: Mutex::new(mpsc::unbounded_channel().1),
            idle_len: AtomicUsize::new(0),
            pinned: Mutex::new(None),
            address_tx: mpsc::unbounded_channel().0,
            closed: std::sync::atomic::AtomicBool::new(false),
        };
        assert_eq!(inner.next_address(), None);
    }

    #[test]
    fn soft_cap_allows_leasing_past_max() {
        let sem = Arc::new(Semaphore::new(1));
        let _first = sem.clone().try_acquire_owned().unwrap();
        assert!(sem.clone().try_acquire_owned().is_err());
    }
}
