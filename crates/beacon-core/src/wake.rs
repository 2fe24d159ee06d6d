//! Keeping the host awake while the gateway runs.
//!
//! A [`WakeHold`] backend talks to the platform; [`WakeLock`] wraps one and
//! makes acquire and release idempotent, so the lifecycle controller can
//! call them without tracking state itself. On Linux the backend is a
//! systemd-logind `sleep` inhibitor taken over the system bus.

use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::error::Result;

/// A platform mechanism that prevents the host from sleeping.
///
/// Implementations may block on IPC, so async callers should run them on
/// the blocking pool.
pub trait WakeHold: Send + Sync {
    /// Take the hold. Called at most once between releases.
    fn acquire(&self, reason: &str) -> Result<()>;

    /// Give the hold back. Only called after a successful acquire.
    fn release(&self) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// A hold that does nothing, for platforms without an inhibitor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWakeHold;

impl WakeHold for NoopWakeHold {
    fn acquire(&self, _reason: &str) -> Result<()> {
        Ok(())
    }

    fn release(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

#[cfg(target_os = "linux")]
pub use logind::LogindInhibitor;

#[cfg(target_os = "linux")]
mod logind {
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    use dbus::arg::OwnedFd;
    use dbus::blocking::Connection;

    use super::WakeHold;
    use crate::error::{Error, Result};

    const DESTINATION: &str = "org.freedesktop.login1";
    const PATH: &str = "/org/freedesktop/login1";
    const INTERFACE: &str = "org.freedesktop.login1.Manager";
    const WHO: &str = "beacon-gateway";

    /// Blocks system sleep through `org.freedesktop.login1.Manager.Inhibit`.
    ///
    /// The inhibitor lives as long as the returned file descriptor is open,
    /// so releasing it is just closing the descriptor.
    pub struct LogindInhibitor {
        timeout: Duration,
        fd: Mutex<Option<OwnedFd>>,
    }

    impl LogindInhibitor {
        /// Create an inhibitor whose bus calls time out after `timeout`.
        pub fn new(timeout: Duration) -> Self {
            Self {
                timeout,
                fd: Mutex::new(None),
            }
        }
    }

    impl Default for LogindInhibitor {
        fn default() -> Self {
            Self::new(Duration::from_secs(5))
        }
    }

    impl std::fmt::Debug for LogindInhibitor {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            let held = self
                .fd
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some();
            f.debug_struct("LogindInhibitor")
                .field("timeout", &self.timeout)
                .field("held", &held)
                .finish()
        }
    }

    impl WakeHold for LogindInhibitor {
        fn acquire(&self, reason: &str) -> Result<()> {
            let conn = Connection::new_system().map_err(|e| Error::WakeHold(e.to_string()))?;
            let proxy = conn.with_proxy(DESTINATION, PATH, self.timeout);
            let (fd,): (OwnedFd,) = proxy
                .method_call(INTERFACE, "Inhibit", ("sleep", WHO, reason, "block"))
                .map_err(|e| Error::WakeHold(e.to_string()))?;

            *self.fd.lock().unwrap_or_else(PoisonError::into_inner) = Some(fd);
            Ok(())
        }

        fn release(&self) -> Result<()> {
            self.fd
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            Ok(())
        }

        fn name(&self) -> &'static str {
            "logind"
        }
    }
}

/// The best available backend for this platform.
pub fn platform_wake_hold() -> Box<dyn WakeHold> {
    #[cfg(target_os = "linux")]
    {
        Box::new(LogindInhibitor::default())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(NoopWakeHold)
    }
}

/// Idempotent wrapper around a [`WakeHold`] backend.
///
/// Dropping a held lock releases it.
pub struct WakeLock {
    backend: Box<dyn WakeHold>,
    reason: String,
    held: Mutex<bool>,
}

impl WakeLock {
    /// Wrap `backend`, using `reason` whenever the hold is taken.
    pub fn new(backend: Box<dyn WakeHold>, reason: impl Into<String>) -> Self {
        Self {
            backend,
            reason: reason.into(),
            held: Mutex::new(false),
        }
    }

    /// Take the hold. A no-op if already held.
    pub fn acquire(&self) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if *held {
            debug!("Wake hold already held");
            return Ok(());
        }
        self.backend.acquire(&self.reason)?;
        *held = true;
        info!("Wake hold acquired ({})", self.backend.name());
        Ok(())
    }

    /// Give the hold back. A no-op if not held.
    pub fn release(&self) -> Result<()> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !*held {
            return Ok(());
        }
        *held = false;
        self.backend.release()?;
        info!("Wake hold released ({})", self.backend.name());
        Ok(())
    }

    /// Whether the hold is currently taken.
    pub fn is_held(&self) -> bool {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for WakeLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeLock")
            .field("backend", &self.backend.name())
            .field("reason", &self.reason)
            .field("held", &self.is_held())
            .finish()
    }
}

impl Drop for WakeLock {
    fn drop(&mut self) {
        let held = self
            .held
            .get_mut()
            .map(|h| *h)
            .unwrap_or_else(|e| *e.into_inner());
        if held && let Err(e) = self.backend.release() {
            warn!("Failed to release wake hold on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct Counting {
        acquires: Arc<AtomicU32>,
        releases: Arc<AtomicU32>,
        refuse: AtomicBool,
    }

    impl WakeHold for Counting {
        fn acquire(&self, _reason: &str) -> Result<()> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(Error::WakeHold("refused".into()));
            }
            self.acquires.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&self) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> &'static str {
            "counting"
        }
    }

    fn counting() -> (WakeLock, Arc<AtomicU32>, Arc<AtomicU32>) {
        let backend = Counting::default();
        let acquires = Arc::clone(&backend.acquires);
        let releases = Arc::clone(&backend.releases);
        (WakeLock::new(Box::new(backend), "test"), acquires, releases)
    }

    #[test]
    fn test_acquire_twice_takes_once() {
        let (lock, acquires, _) = counting();
        lock.acquire().unwrap();
        lock.acquire().unwrap();
        assert!(lock.is_held());
        assert_eq!(acquires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_release_without_hold_is_noop() {
        let (lock, _, releases) = counting();
        lock.release().unwrap();
        assert_eq!(releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_release_twice_releases_once() {
        let (lock, _, releases) = counting();
        lock.acquire().unwrap();
        lock.release().unwrap();
        lock.release().unwrap();
        assert!(!lock.is_held());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_acquire_leaves_unheld() {
        let backend = Counting::default();
        backend.refuse.store(true, Ordering::SeqCst);
        let lock = WakeLock::new(Box::new(backend), "test");
        assert!(matches!(lock.acquire(), Err(Error::WakeHold(_))));
        assert!(!lock.is_held());
    }

    #[test]
    fn test_drop_releases_held_lock() {
        let (lock, _, releases) = counting();
        lock.acquire().unwrap();
        drop(lock);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_noop_backend() {
        let lock = WakeLock::new(Box::new(NoopWakeHold), "test");
        lock.acquire().unwrap();
        assert!(lock.is_held());
        lock.release().unwrap();
        assert!(!lock.is_held());
    }
}
