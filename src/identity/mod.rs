//! Network identity rotation
//!
//! [`NetworkIdentityScheduler`] rotates the outbound identity (VPN server) on a
//! randomized schedule without ever cutting a transfer short:
//!
//! - every task attempt holds an [`IdentityHold`] while it talks to the network
//! - a rotation only starts when no hold is outstanding; a deadline that passes
//!   while holds exist is *deferred* until the last hold is dropped
//! - new holds wait while a rotation is in flight
//!
//! ```text
//! Idle --start--> Scheduled --deadline, holds == 0--> RotationInFlight --done--> Scheduled
//!                     ^  |                                                         |
//!                     |  +--deadline, holds > 0: deferred until holds == 0         |
//!                     +------------------------------------------------------------+
//! ```
//!
//! Rotation failures are logged, emitted as [`Event::RotationFailed`] and retried
//! at the next deadline; they never reach download tasks.

pub mod vpn;

use crate::config::Config;
use crate::error::TaskError;
use crate::types::{Event, IdentityPhase};
use crate::utils::random_duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use vpn::{DisabledVpn, NordVpnControl, PublicIpProbe, VpnControl, VpnStatus};

/// Point-in-time view of the scheduler state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentitySnapshot {
    /// Current phase
    pub phase: IdentityPhase,
    /// Successful rotations so far
    pub epoch: u64,
    /// Outstanding holds
    pub holds: usize,
    /// Whether a due rotation is waiting for holds to clear
    pub deferred: bool,
    /// Time left until the next deadline, if one is scheduled
    pub next_rotation_in: Option<Duration>,
}

#[derive(Debug)]
struct IdentityState {
    phase: IdentityPhase,
    epoch: u64,
    holds: usize,
    deadline: Option<Instant>,
    deferred: bool,
}

struct Shared {
    state: Mutex<IdentityState>,
    holds_cleared: Notify,
    rotation_done: Notify,
    failures: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, IdentityState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counted reservation that keeps the current identity in place
///
/// Dropping the hold releases it; the last hold to go wakes a deferred rotation.
#[must_use = "the identity may rotate as soon as the hold is dropped"]
pub struct IdentityHold {
    shared: Arc<Shared>,
    epoch: u64,
}

impl IdentityHold {
    /// Identity epoch the hold was taken in
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

impl std::fmt::Debug for IdentityHold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityHold").field("epoch", &self.epoch).finish()
    }
}

impl Drop for IdentityHold {
    fn drop(&mut self) {
        let cleared = {
            let mut state = self.shared.lock();
            state.holds = state.holds.saturating_sub(1);
            state.holds == 0
        };
        if cleared {
            self.shared.holds_cleared.notify_one();
        }
    }
}

/// Background rotation timer with hold counting
pub struct NetworkIdentityScheduler {
    shared: Arc<Shared>,
    vpn: Arc<dyn VpnControl>,
    interval_min: Duration,
    interval_max: Duration,
    disconnect_on_stop: bool,
    ip_probe: Option<PublicIpProbe>,
    events: Option<broadcast::Sender<Event>>,
    cancel: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl NetworkIdentityScheduler {
    /// Create a stopped scheduler using the rotation interval from `config`
    pub fn new(vpn: Arc<dyn VpnControl>, config: &Config) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(IdentityState {
                    phase: IdentityPhase::Idle,
                    epoch: 0,
                    holds: 0,
                    deadline: None,
                    deferred: false,
                }),
                holds_cleared: Notify::new(),
                rotation_done: Notify::new(),
                failures: AtomicU64::new(0),
            }),
            vpn,
            interval_min: config.ip_rotation_interval_min,
            interval_max: config.ip_rotation_interval_max,
            disconnect_on_stop: config.vpn.disconnect_on_shutdown,
            ip_probe: None,
            events: None,
            cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }

    /// Broadcast rotation events on `sender`
    pub fn with_events(mut self, sender: broadcast::Sender<Event>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Log the public address after every rotation
    pub fn with_ip_probe(mut self, probe: PublicIpProbe) -> Self {
        self.ip_probe = Some(probe);
        self
    }

    /// Schedule the first deadline and spawn the timer task
    ///
    /// Calling `start` on a running scheduler does nothing.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() || self.cancel.is_cancelled() {
            return;
        }

        let timer = RotationTimer {
            shared: Arc::clone(&self.shared),
            vpn: Arc::clone(&self.vpn),
            interval_min: self.interval_min,
            interval_max: self.interval_max,
            ip_probe: self.ip_probe.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        };
        // Scheduled before returning so callers observe a deadline immediately
        timer.schedule_next();

        tracing::info!(
            vpn = self.vpn.name(),
            interval_min_secs = self.interval_min.as_secs(),
            interval_max_secs = self.interval_max.as_secs(),
            "network identity scheduler started"
        );
        *task = Some(tokio::spawn(timer.run()));
    }

    /// Take a hold, waiting while a rotation is in flight
    ///
    /// Returns [`TaskError::Cancelled`] if `cancel` fires while waiting.
    pub async fn acquire_hold(&self, cancel: &CancellationToken) -> Result<IdentityHold, TaskError> {
        loop {
            let notified = self.shared.rotation_done.notified();
            tokio::pin!(notified);
            // Register before checking so a rotation finishing in between is not missed
            notified.as_mut().enable();

            {
                let mut state = self.shared.lock();
                if state.phase != IdentityPhase::RotationInFlight {
                    state.holds += 1;
                    return Ok(IdentityHold {
                        shared: Arc::clone(&self.shared),
                        epoch: state.epoch,
                    });
                }
            }

            tracing::debug!("waiting for identity rotation to finish");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TaskError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    /// Cancel the timer, wait for it and optionally disconnect the VPN
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handle = self.task.lock().await.take();
        let was_running = handle.is_some();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "identity timer task ended abnormally");
        }

        {
            let mut state = self.shared.lock();
            state.phase = IdentityPhase::Idle;
            state.deadline = None;
            state.deferred = false;
        }
        self.shared.rotation_done.notify_waiters();

        if was_running
            && self.disconnect_on_stop
            && let Err(e) = self.vpn.disconnect().await
        {
            tracing::warn!(error = %e, "failed to disconnect VPN on shutdown");
        }
        tracing::info!("network identity scheduler stopped");
    }

    /// Current state
    pub fn snapshot(&self) -> IdentitySnapshot {
        let state = self.shared.lock();
        let now = Instant::now();
        IdentitySnapshot {
            phase: state.phase,
            epoch: state.epoch,
            holds: state.holds,
            deferred: state.deferred,
            next_rotation_in: state.deadline.map(|d| d.saturating_duration_since(now)),
        }
    }

    /// Successful rotations so far
    pub fn epoch(&self) -> u64 {
        self.shared.lock().epoch
    }

    /// Outstanding holds
    pub fn holds(&self) -> usize {
        self.shared.lock().holds
    }

    /// Failed rotation attempts so far
    pub fn failed_rotations(&self) -> u64 {
        self.shared.failures.load(Ordering::SeqCst)
    }
}

struct RotationTimer {
    shared: Arc<Shared>,
    vpn: Arc<dyn VpnControl>,
    interval_min: Duration,
    interval_max: Duration,
    ip_probe: Option<PublicIpProbe>,
    events: Option<broadcast::Sender<Event>>,
    cancel: CancellationToken,
}

impl RotationTimer {
    fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            // No subscribers is fine
            let _ = events.send(event);
        }
    }

    fn schedule_next(&self) -> Instant {
        let offset = random_duration(self.interval_min, self.interval_max);
        let deadline = Instant::now() + offset;
        let mut state = self.shared.lock();
        state.phase = IdentityPhase::Scheduled;
        state.deadline = Some(deadline);
        state.deferred = false;
        tracing::debug!(next_rotation_secs = offset.as_secs(), "identity rotation scheduled");
        deadline
    }

    async fn run(self) {
        let mut deadline = self.shared.lock().deadline.unwrap_or_else(Instant::now);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {}
            }

            if !self.wait_for_idle_window().await {
                break;
            }

            let result = tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = self.vpn.rotate_identity() => Some(result),
            };

            let epoch = {
                let mut state = self.shared.lock();
                state.phase = IdentityPhase::Scheduled;
                if matches!(result, Some(Ok(()))) {
                    state.epoch += 1;
                }
                state.epoch
            };
            self.shared.rotation_done.notify_waiters();

            match result {
                None => break,
                Some(Ok(())) => {
                    tracing::info!(epoch, vpn = self.vpn.name(), "network identity rotated");
                    self.emit(Event::IdentityRotated { epoch });
                    self.log_public_ip().await;
                }
                Some(Err(e)) => {
                    self.shared.failures.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(error = %e, epoch, "network identity rotation failed, rescheduling");
                    self.emit(Event::RotationFailed {
                        error: e.to_string(),
                    });
                }
            }

            deadline = self.schedule_next();
        }

        tracing::debug!("identity rotation timer exiting");
    }

    /// Wait until no hold is outstanding and mark the rotation in flight
    ///
    /// Returns `false` if cancelled while waiting.
    async fn wait_for_idle_window(&self) -> bool {
        loop {
            let notified = self.shared.holds_cleared.notified();
            {
                let mut state = self.shared.lock();
                if state.holds == 0 {
                    state.phase = IdentityPhase::RotationInFlight;
                    state.deadline = None;
                    state.deferred = false;
                    return true;
                }
                if !state.deferred {
                    state.deferred = true;
                    tracing::info!(
                        holds = state.holds,
                        "identity rotation due but downloads in flight, deferring"
                    );
                    self.emit(Event::RotationDeferred { holds: state.holds });
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = notified => {}
            }
        }
    }

    async fn log_public_ip(&self) {
        let Some(probe) = &self.ip_probe else {
            return;
        };
        match probe.current_ip().await {
            Ok(ip) => tracing::info!(ip = %ip, "public IP after rotation"),
            Err(e) => tracing::warn!(error = %e, "public IP check failed"),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockVpnControl;

    fn interval_config(min_secs: u64, max_secs: u64) -> Config {
        let mut config = Config::default();
        config.ip_rotation_interval_min = Duration::from_secs(min_secs);
        config.ip_rotation_interval_max = Duration::from_secs(max_secs);
        config
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_deadline_within_configured_window() {
        let scheduler = NetworkIdentityScheduler::new(
            Arc::new(MockVpnControl::new()),
            &interval_config(300, 1800),
        );
        scheduler.start().await;

        let snapshot = scheduler.snapshot();
        assert_eq!(snapshot.phase, IdentityPhase::Scheduled);
        let next = snapshot.next_rotation_in.unwrap();
        assert!(next >= Duration::from_secs(300) && next <= Duration::from_secs(1800));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rotates_at_deadline_when_idle() {
        let vpn = MockVpnControl::new();
        let scheduler = NetworkIdentityScheduler::new(Arc::new(vpn.clone()), &interval_config(10, 10));
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;
        assert_eq!(vpn.rotation_count(), 1);
        assert_eq!(scheduler.epoch(), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(vpn.rotation_count(), 2);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_deferred_while_hold_outstanding() {
        let vpn = MockVpnControl::new();
        let (tx, mut rx) = broadcast::channel(16);
        let scheduler = NetworkIdentityScheduler::new(Arc::new(vpn.clone()), &interval_config(10, 10))
            .with_events(tx);
        scheduler.start().await;

        let hold = scheduler.acquire_hold(&CancellationToken::new()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;

        assert_eq!(vpn.rotation_count(), 0);
        let snapshot = scheduler.snapshot();
        assert!(snapshot.deferred);
        assert_eq!(snapshot.holds, 1);
        assert!(matches!(rx.try_recv(), Ok(Event::RotationDeferred { holds: 1 })));
        // deferral is reported once
        assert!(rx.try_recv().is_err());

        drop(hold);
        settle().await;
        assert_eq!(vpn.rotation_count(), 1);
        assert!(matches!(rx.try_recv(), Ok(Event::IdentityRotated { epoch: 1 })));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn holds_wait_for_rotation_in_flight() {
        let vpn = MockVpnControl::new();
        vpn.set_rotation_delay(Duration::from_secs(5)).await;
        let scheduler = Arc::new(NetworkIdentityScheduler::new(
            Arc::new(vpn.clone()),
            &interval_config(10, 10),
        ));
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(scheduler.snapshot().phase, IdentityPhase::RotationInFlight);
        assert_eq!(scheduler.holds(), 0);

        let waiter = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move {
                let hold = scheduler.acquire_hold(&CancellationToken::new()).await.unwrap();
                hold.epoch()
            })
        };
        settle().await;
        assert!(!waiter.is_finished());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(waiter.await.unwrap(), 1);
        assert_eq!(vpn.rotation_count(), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_hold_wait_returns_cancelled() {
        let vpn = MockVpnControl::new();
        vpn.set_rotation_delay(Duration::from_secs(60)).await;
        let scheduler = NetworkIdentityScheduler::new(Arc::new(vpn), &interval_config(1, 1));
        scheduler.start().await;
        tokio::time::sleep(Duration::from_secs(2)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = scheduler.acquire_hold(&cancel).await.unwrap_err();
        assert_eq!(err, TaskError::Cancelled);
        assert_eq!(scheduler.holds(), 0);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_rotation_is_rescheduled() {
        let vpn = MockVpnControl::new();
        vpn.set_fail(true).await;
        let (tx, mut rx) = broadcast::channel(16);
        let scheduler = NetworkIdentityScheduler::new(Arc::new(vpn.clone()), &interval_config(10, 10))
            .with_events(tx);
        scheduler.start().await;

        tokio::time::sleep(Duration::from_secs(11)).await;
        settle().await;
        assert_eq!(scheduler.epoch(), 0);
        assert_eq!(scheduler.failed_rotations(), 1);
        assert!(matches!(rx.try_recv(), Ok(Event::RotationFailed { .. })));
        assert_eq!(scheduler.snapshot().phase, IdentityPhase::Scheduled);

        vpn.set_fail(false).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(scheduler.epoch(), 1);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_disconnects_and_goes_idle() {
        let vpn = MockVpnControl::new();
        let scheduler = NetworkIdentityScheduler::new(Arc::new(vpn.clone()), &interval_config(10, 10));
        scheduler.start().await;
        scheduler.stop().await;

        assert_eq!(scheduler.snapshot().phase, IdentityPhase::Idle);
        assert_eq!(vpn.disconnect_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(vpn.rotation_count(), 0);
        // holds still work after stop
        let hold = scheduler.acquire_hold(&CancellationToken::new()).await.unwrap();
        assert_eq!(hold.epoch(), 0);
    }

    #[tokio::test]
    async fn stop_without_start_does_not_disconnect() {
        let vpn = MockVpnControl::new();
        let scheduler = NetworkIdentityScheduler::new(Arc::new(vpn.clone()), &Config::default());
        scheduler.stop().await;
        assert_eq!(vpn.disconnect_count(), 0);
    }

    #[tokio::test]
    async fn hold_release_updates_count() {
        let scheduler = NetworkIdentityScheduler::new(Arc::new(MockVpnControl::new()), &Config::default());
        let cancel = CancellationToken::new();
        let a = scheduler.acquire_hold(&cancel).await.unwrap();
        let b = scheduler.acquire_hold(&cancel).await.unwrap();
        assert_eq!(scheduler.holds(), 2);
        drop(a);
        assert_eq!(scheduler.holds(), 1);
        drop(b);
        assert_eq!(scheduler.holds(), 0);
    }
}
