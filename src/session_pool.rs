//! Bounded pool of browser sessions
//!
//! The pool's semaphore is the single concurrency gate of the orchestrator: a
//! task attempt can only navigate while it holds a [`Session`], and at most
//! `concurrent_downloads` sessions are leased at any time.
//!
//! Sessions returned with [`BrowserSessionPool::release`] are kept idle and
//! health-checked before the next lease. Sessions marked unrecoverable, and
//! sessions dropped without being released, are closed instead.

use crate::browser::{BrowserDriver, BrowserSession, SessionSettings};
use crate::config::Config;
use crate::error::TaskError;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Exclusive lease on one browser context
///
/// Holding a `Session` means holding one slot of the pool. Dropping it frees
/// the slot; [`BrowserSessionPool::release`] additionally keeps the context for
/// reuse.
pub struct Session {
    id: u64,
    inner: Option<Box<dyn BrowserSession>>,
    unrecoverable: bool,
    active: Arc<AtomicUsize>,
    // Dropped last so the slot frees only after the context is parked or closed
    _permit: OwnedSemaphorePermit,
}

impl Session {
    /// Pool-unique id of the underlying context
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Browser context behind the lease
    pub fn browser(&mut self) -> Result<&mut (dyn BrowserSession + 'static), TaskError> {
        self.inner
            .as_deref_mut()
            .ok_or_else(|| TaskError::SessionFailure("session already released".into()))
    }

    /// Close the context on release instead of returning it to the pool
    pub fn mark_unrecoverable(&mut self) {
        self.unrecoverable = true;
    }

    /// Whether the context will be discarded on release
    pub fn is_unrecoverable(&self) -> bool {
        self.unrecoverable
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("unrecoverable", &self.unrecoverable)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            // Dropped without release: close in the background if a runtime is around
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { inner.close().await });
            }
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct IdleSession {
    id: u64,
    inner: Box<dyn BrowserSession>,
}

/// Bounded, reusable set of browser contexts
pub struct BrowserSessionPool {
    driver: Arc<dyn BrowserDriver>,
    permits: Arc<Semaphore>,
    capacity: usize,
    idle: Mutex<Vec<IdleSession>>,
    user_agents: Vec<String>,
    headless: bool,
    acquire_timeout: Duration,
    next_id: AtomicU64,
    active: Arc<AtomicUsize>,
    peak_active: AtomicUsize,
    closed: AtomicBool,
}

impl BrowserSessionPool {
    /// Create a pool sized from `concurrent_downloads`
    pub fn new(driver: Arc<dyn BrowserDriver>, config: &Config) -> Self {
        let capacity = config.concurrent_downloads.max(1);
        Self {
            driver,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
            idle: Mutex::new(Vec::with_capacity(capacity)),
            user_agents: config.user_agents.clone(),
            headless: config.headless,
            acquire_timeout: config.session_acquire_timeout,
            next_id: AtomicU64::new(1),
            active: Arc::new(AtomicUsize::new(0)),
            peak_active: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Lease a session, waiting while the pool is exhausted
    ///
    /// Fails with [`TaskError::ConcurrencyLeaseTimeout`] when no slot frees up
    /// within `session_acquire_timeout`, [`TaskError::Cancelled`] when `cancel`
    /// fires first and [`TaskError::SessionFailure`] when no context can be launched.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Session, TaskError> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TaskError::Cancelled),
            result = tokio::time::timeout(
                self.acquire_timeout,
                Arc::clone(&self.permits).acquire_owned(),
            ) => match result {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(TaskError::SessionFailure("session pool is closed".into())),
                Err(_) => return Err(TaskError::ConcurrencyLeaseTimeout(self.acquire_timeout)),
            },
        };

        let (id, inner) = match self.take_healthy_idle().await {
            Some(idle) => (idle.id, idle.inner),
            None => {
                let launched = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TaskError::Cancelled),
                    launched = self.launch() => launched?,
                };
                launched
            }
        };

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now_active, Ordering::SeqCst);
        tracing::debug!(session_id = id, active = now_active, "session leased");

        Ok(Session {
            id,
            inner: Some(inner),
            unrecoverable: false,
            active: Arc::clone(&self.active),
            _permit: permit,
        })
    }

    /// Return a session to the pool
    ///
    /// Healthy sessions are parked for reuse; unrecoverable ones (or any session
    /// once the pool is closed) are torn down.
    pub async fn release(&self, mut session: Session) {
        let Some(mut inner) = session.inner.take() else {
            return;
        };

        if session.unrecoverable || self.closed.load(Ordering::SeqCst) {
            tracing::debug!(session_id = session.id, "discarding session");
            inner.close().await;
        } else {
            self.idle.lock().await.push(IdleSession {
                id: session.id,
                inner,
            });
        }
        // permit and active count are released when `session` drops here
    }

    /// Sessions currently leased
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously leased sessions so far
    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    /// Maximum number of simultaneous leases
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sessions parked for reuse
    pub async fn idle_count(&self) -> usize {
        self.idle.lock().await.len()
    }

    /// Stop leasing and close every idle session
    ///
    /// Leased sessions are closed as they come back.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.permits.close();

        let drained: Vec<IdleSession> = std::mem::take(&mut *self.idle.lock().await);
        let count = drained.len();
        for mut idle in drained {
            idle.inner.close().await;
        }
        tracing::info!(closed = count, "session pool closed");
    }

    async fn take_healthy_idle(&self) -> Option<IdleSession> {
        loop {
            let candidate = self.idle.lock().await.pop()?;
            if candidate.inner.is_alive().await {
                return Some(candidate);
            }
            tracing::warn!(session_id = candidate.id, "discarding dead pooled session");
            let mut dead = candidate;
            dead.inner.close().await;
        }
    }

    async fn launch(&self) -> Result<(u64, Box<dyn BrowserSession>), TaskError> {
        let user_agent = self
            .user_agents
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_default();
        let settings = SessionSettings {
            user_agent,
            headless: self.headless,
        };

        let inner = self.driver.launch_session(&settings).await.map_err(|e| {
            tracing::error!(driver = self.driver.name(), error = %e, "failed to launch browser session");
            TaskError::SessionFailure(e.to_string())
        })?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(session_id = id, driver = self.driver.name(), "browser session launched");
        Ok((id, inner))
    }
}
