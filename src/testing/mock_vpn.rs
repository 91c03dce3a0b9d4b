//! Mock VPN control for testing.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::identity::{VpnControl, VpnStatus};

/// Mock implementation of the VpnControl trait.
///
/// Rotations can be slowed down or made to fail; successful rotations and
/// disconnects are counted.
#[derive(Debug, Clone)]
pub struct MockVpnControl {
    /// Successful rotations.
    rotations: Arc<AtomicUsize>,
    /// Rotation attempts, successful or not.
    attempts: Arc<AtomicUsize>,
    /// Disconnect calls.
    disconnects: Arc<AtomicUsize>,
    /// Whether a tunnel is up.
    connected: Arc<AtomicBool>,
    /// Simulated rotation duration.
    rotation_delay: Arc<RwLock<Duration>>,
    /// Whether rotations fail.
    fail: Arc<RwLock<bool>>,
}

impl Default for MockVpnControl {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVpnControl {
    /// Create a mock whose rotations succeed instantly.
    pub fn new() -> Self {
        Self {
            rotations: Arc::new(AtomicUsize::new(0)),
            attempts: Arc::new(AtomicUsize::new(0)),
            disconnects: Arc::new(AtomicUsize::new(0)),
            connected: Arc::new(AtomicBool::new(false)),
            rotation_delay: Arc::new(RwLock::new(Duration::ZERO)),
            fail: Arc::new(RwLock::new(false)),
        }
    }

    /// Number of successful rotations.
    pub fn rotation_count(&self) -> usize {
        self.rotations.load(Ordering::SeqCst)
    }

    /// Number of rotation attempts, including failed ones.
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of disconnect calls.
    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Make each rotation take `delay`.
    pub async fn set_rotation_delay(&self, delay: Duration) {
        *self.rotation_delay.write().await = delay;
    }

    /// Make subsequent rotations fail.
    pub async fn set_fail(&self, fail: bool) {
        *self.fail.write().await = fail;
    }
}

#[async_trait]
impl VpnControl for MockVpnControl {
    async fn rotate_identity(&self) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.rotation_delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if *self.fail.read().await {
            self.connected.store(false, Ordering::SeqCst);
            return Err(Error::VpnRotation("mock rotation failure".into()));
        }
        self.connected.store(true, Ordering::SeqCst);
        self.rotations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn status(&self) -> Result<VpnStatus> {
        let connected = self.connected.load(Ordering::SeqCst);
        Ok(VpnStatus {
            connected,
            country: connected.then(|| "Mockland".to_string()),
            server: connected.then(|| format!("mock{}.vpn", self.rotation_count())),
            ip: None,
        })
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
