//! Driver abstraction (§4.7): every LED hardware backend implements
//! [`Driver`]. `InstanceManager` owns exactly one driver per instance and
//! drives it through `open`/`write`/`close`; the retry policy in this
//! module wraps any driver's fallible calls with the backoff/`maxRetry`
//! rule common to all of them.

pub mod hue;
pub mod http;
#[cfg(feature = "serial-driver")]
pub mod serial;
pub mod udp;
pub mod yeelight;

use std::time::Duration;

use async_trait::async_trait;

use crate::color::ColorRgb;
use crate::error::{HyperError, Result};

/// Snapshot of a driver's on/off state, saved before taking over a device
/// and restored on shutdown (§4.7 `storeState`/`restoreState`).
#[derive(Clone, Debug, Default)]
pub struct DeviceState {
    pub powered_on: bool,
    pub extra: Vec<u8>,
}

/// Static identification a driver reports for diagnostics (§4.7
/// `getProperties`).
#[derive(Clone, Debug, Default)]
pub struct DriverProperties {
    pub name: String,
    pub firmware: Option<String>,
    pub led_count: Option<u32>,
}

/// A LED hardware backend. All methods are fallible and asynchronous: even
/// "local" transports (UDP, serial) go through tokio so a slow device never
/// blocks a worker thread.
#[async_trait]
pub trait Driver: Send + Sync {
    /// One-time setup after construction, before `open` (§4.7 `init`).
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Establish the connection/session. Must be idempotent: calling it
    /// again on an already-open driver is a no-op.
    async fn open(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    /// Turn the device fully off/on without closing the session.
    async fn switch_on(&mut self) -> Result<()> {
        Ok(())
    }
    async fn switch_off(&mut self) -> Result<()> {
        Ok(())
    }

    async fn store_state(&mut self) -> Result<DeviceState> {
        Ok(DeviceState::default())
    }
    async fn restore_state(&mut self, _state: DeviceState) -> Result<()> {
        Ok(())
    }

    /// Write one frame. Implementations should treat a too-frequent write
    /// as `HyperError::DeviceQuota`, not a hard failure.
    async fn write(&mut self, colors: &[ColorRgb]) -> Result<()>;

    /// Best-effort network discovery; drivers with no broadcast mechanism
    /// just return an empty list.
    async fn discover(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_properties(&self) -> DriverProperties {
        DriverProperties::default()
    }

    /// Flash the device in an attention-grabbing way to help a user find
    /// it; a no-op default for hardware with no such feature.
    async fn identify(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Backoff/`maxRetry` policy shared by every driver's connect loop (§4.7,
/// §8 scenario 5: "3 connect attempts at 3s intervals, then `Errored`").
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_retry: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retry: u32, backoff: Duration) -> Self {
        RetryPolicy { max_retry, backoff }
    }

    /// Run `attempt` up to `max_retry` times, sleeping `backoff` between
    /// tries. Returns the last error if every attempt failed. Stops early
    /// on a non-recoverable error from the final attempt only; earlier
    /// attempts always retry regardless of error kind, since a single
    /// transient failure at connect time shouldn't be distinguished from a
    /// fatal one until the budget is exhausted.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut last_err = HyperError::internal("retry policy invoked with max_retry=0");
        for i in 0..self.max_retry.max(1) {
            match attempt().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_err = e;
                    if i + 1 < self.max_retry.max(1) {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }
        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_policy_gives_up_after_max_retry() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(HyperError::TransientIo("unreachable".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_policy_stops_on_first_success() {
        let attempts = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run(|| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { if n == 0 { Ok(()) } else { Err(HyperError::internal("x")) } }
            })
            .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
