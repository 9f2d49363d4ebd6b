//! Boot readiness
//!
//! Polls `sys.boot_completed` at a fixed interval until the device reports
//! "1", a poll budget or deadline runs out, or the caller cancels.

use std::time::Duration;

use droid_target_core::BootConfig;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adb::{AdbClient, AdbError, BOOT_COMPLETED_PROP};

/// Value of the boot-completion property once booting is done
pub const BOOT_READY: &str = "1";

/// Boot wait errors
#[derive(Debug, thiserror::Error)]
pub enum BootError {
    #[error("{serial} not booted after {polls} poll(s) in {elapsed:?}")]
    Timeout {
        serial: String,
        polls: u32,
        elapsed: Duration,
    },
    #[error("boot wait for {0} cancelled")]
    Cancelled(String),
    #[error(transparent)]
    Adb(#[from] AdbError),
}

/// How long and how often to poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootPolicy {
    pub poll_interval: Duration,
    /// Unbounded when `None`; the deadline still applies
    pub max_polls: Option<u32>,
    pub timeout: Duration,
}

impl BootPolicy {
    pub fn from_config(config: &BootConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_polls: config.max_polls,
            timeout: config.boot_timeout(),
        }
    }
}

impl Default for BootPolicy {
    fn default() -> Self {
        Self::from_config(&BootConfig::default())
    }
}

/// Waits for a device to finish booting
#[derive(Debug, Clone)]
pub struct BootWaiter {
    adb: AdbClient,
}

impl BootWaiter {
    pub fn new(adb: AdbClient) -> Self {
        Self { adb }
    }

    /// Block until `serial` reports boot completion
    pub async fn wait_until_ready(
        &self,
        serial: &str,
        policy: &BootPolicy,
        cancel: &CancellationToken,
    ) -> Result<(), BootError> {
        info!("Waiting for {} to boot...", serial);

        let started = Instant::now();
        let deadline = started + policy.timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;

            let poll = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BootError::Cancelled(serial.to_string())),
                res = tokio::time::timeout_at(deadline, self.adb.get_prop(serial, BOOT_COMPLETED_PROP)) => res,
            };

            match poll {
                Ok(Ok(value)) if value == BOOT_READY => {
                    info!("{} booted after {} poll(s)", serial, polls);
                    return Ok(());
                }
                Ok(Ok(value)) => debug!("{} boot_completed={:?}", serial, value),
                Ok(Err(e @ AdbError::ToolUnavailable { .. })) => return Err(e.into()),
                // Offline or not yet listed while the emulator starts up
                Ok(Err(e)) => debug!("{} not reachable yet: {}", serial, e),
                Err(_) => debug!("{} poll hit the boot deadline", serial),
            }

            let now = Instant::now();
            let exhausted = policy.max_polls.is_some_and(|max| polls >= max);
            if exhausted || now >= deadline {
                return Err(BootError::Timeout {
                    serial: serial.to_string(),
                    polls,
                    elapsed: now - started,
                });
            }

            let wake = (now + policy.poll_interval).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BootError::Cancelled(serial.to_string())),
                _ = tokio::time::sleep_until(wake) => {}
            }
        }
    }
}
