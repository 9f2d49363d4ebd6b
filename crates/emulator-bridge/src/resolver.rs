//! Device Resolver
//!
//! Produces exactly one usable device for a test run:
//! - a connected real device when there is one,
//! - otherwise a freshly launched and booted emulator.
//!
//! The launch path runs inside an attempt-counted loop so a broken image
//! fails the run instead of retrying forever.

use std::fmt;
use std::sync::Arc;

use droid_target_core::AppConfig;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::adb::{AdbClient, AdbError};
use crate::avd::{AvdConfig, AvdError, AvdManager, SystemImageSpec};
use crate::boot::{BootError, BootPolicy, BootWaiter};
use crate::device::{Device, DeviceKind, EMULATOR_SERIAL_PREFIX};
use crate::emulator::{next_emulator_port, EmulatorError, EmulatorLauncher, EmulatorOptions};
use crate::tool::{SdkTools, ToolRunner};

/// Resolver states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
    Discovering,
    Publishing,
    Cleaning,
    ImageEnsuring,
    Launching,
    Waiting,
    Rediscovering,
    Done,
    Failed,
}

/// Where in the resolution a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovery,
    Cleanup,
    ImageEnsure,
    Launch,
    BootWait,
    Rediscovery,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovery => "device discovery",
            Stage::Cleanup => "emulator cleanup",
            Stage::ImageEnsure => "emulator image",
            Stage::Launch => "emulator launch",
            Stage::BootWait => "boot wait",
            Stage::Rediscovery => "device re-discovery",
        };
        f.write_str(name)
    }
}

/// Resolution errors
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("{stage}: platform tool unavailable: {detail}")]
    PlatformToolUnavailable { stage: Stage, detail: String },

    #[error("emulator image: creating {image} failed: {diagnostic}")]
    ImageCreationFailed { image: String, diagnostic: String },

    #[error("boot wait: {serial} not booted after {polls} poll(s)")]
    BootTimeoutExceeded { serial: String, polls: u32 },

    #[error("{stage}: no usable device listed")]
    NoDeviceListed { stage: Stage },

    #[error("{stage}: {message}")]
    ToolFailed { stage: Stage, message: String },

    #[error("device resolution failed after {attempts} launch attempt(s)")]
    DeviceResolutionFailed {
        attempts: u32,
        #[source]
        last: Box<ResolveError>,
    },

    #[error("{stage}: cancelled")]
    Cancelled { stage: Stage },
}

impl ResolveError {
    /// Whether a fresh launch may fix this
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResolveError::BootTimeoutExceeded { .. }
                | ResolveError::NoDeviceListed { .. }
                | ResolveError::ToolFailed { stage: Stage::Launch, .. }
        )
    }

    /// Stage the failure originated in
    pub fn stage(&self) -> Stage {
        match self {
            ResolveError::PlatformToolUnavailable { stage, .. }
            | ResolveError::NoDeviceListed { stage }
            | ResolveError::ToolFailed { stage, .. }
            | ResolveError::Cancelled { stage } => *stage,
            ResolveError::ImageCreationFailed { .. } => Stage::ImageEnsure,
            ResolveError::BootTimeoutExceeded { .. } => Stage::BootWait,
            ResolveError::DeviceResolutionFailed { last, .. } => last.stage(),
        }
    }

    fn from_adb(stage: Stage, err: AdbError) -> Self {
        match err {
            AdbError::ToolUnavailable { path, source } => ResolveError::PlatformToolUnavailable {
                stage,
                detail: format!("{}: {}", path.display(), source),
            },
            other => ResolveError::ToolFailed { stage, message: other.to_string() },
        }
    }

    fn from_avd(image: &str, err: AvdError) -> Self {
        match err {
            AvdError::ToolUnavailable { path, source } => ResolveError::PlatformToolUnavailable {
                stage: Stage::ImageEnsure,
                detail: format!("{}: {}", path.display(), source),
            },
            AvdError::CreationFailed { name, diagnostic } => {
                ResolveError::ImageCreationFailed { image: name, diagnostic }
            }
            other => ResolveError::ImageCreationFailed {
                image: image.to_string(),
                diagnostic: other.to_string(),
            },
        }
    }

    fn from_emulator(err: EmulatorError) -> Self {
        match err {
            EmulatorError::ToolUnavailable { path, source } => ResolveError::PlatformToolUnavailable {
                stage: Stage::Launch,
                detail: format!("{}: {}", path.display(), source),
            },
            other => ResolveError::ToolFailed { stage: Stage::Launch, message: other.to_string() },
        }
    }

    fn from_boot(err: BootError) -> Self {
        match err {
            BootError::Timeout { serial, polls, .. } => ResolveError::BootTimeoutExceeded { serial, polls },
            BootError::Cancelled(_) => ResolveError::Cancelled { stage: Stage::BootWait },
            BootError::Adb(e) => ResolveError::from_adb(Stage::BootWait, e),
        }
    }
}

/// The one device a run targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub serial: String,
    pub kind: DeviceKind,
    /// Whether the resolver launched it during this run
    pub launched: bool,
}

/// Resolver settings
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub image: AvdConfig,
    pub boot: BootPolicy,
    /// Launch/wait cycles, including the first
    pub launch_attempts: u32,
}

/// Device resolver
#[derive(Debug, Clone)]
pub struct DeviceResolver {
    adb: AdbClient,
    avd: AvdManager,
    launcher: EmulatorLauncher,
    boot: BootWaiter,
    config: ResolverConfig,
}

impl DeviceResolver {
    pub fn new(
        adb: AdbClient,
        avd: AvdManager,
        launcher: EmulatorLauncher,
        config: ResolverConfig,
    ) -> Self {
        Self {
            boot: BootWaiter::new(adb.clone()),
            adb,
            avd,
            launcher,
            config,
        }
    }

    /// Wire the resolver to real SDK tools from application config
    pub fn from_config(
        config: &AppConfig,
        tools: &SdkTools,
        runner: Arc<dyn ToolRunner>,
    ) -> Result<Self, AvdError> {
        let spec: SystemImageSpec = config.emulator.system_image.parse()?;
        let image = AvdConfig::new(&config.emulator.image_name, spec)
            .with_device(config.emulator.device_profile.clone());

        let adb = AdbClient::new(tools.adb.clone(), runner.clone());
        let avd = AvdManager::new(tools.avdmanager.clone(), runner.clone());
        let launcher = EmulatorLauncher::new(tools.emulator.clone(), adb.clone(), runner)
            .with_options(EmulatorOptions::from_config(&config.emulator));

        Ok(Self::new(
            adb,
            avd,
            launcher,
            ResolverConfig {
                image,
                boot: BootPolicy::from_config(&config.boot),
                launch_attempts: config.boot.launch_attempts,
            },
        ))
    }

    fn transition(&self, from: &mut ResolverState, to: ResolverState) {
        debug!("State transition: {:?} -> {:?}", from, to);
        *from = to;
    }

    async fn discover(&self, stage: Stage, cancel: &CancellationToken) -> Result<Vec<Device>, ResolveError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolveError::Cancelled { stage }),
            res = self.adb.list_attached() => res.map_err(|e| ResolveError::from_adb(stage, e)),
        }
    }

    /// Resolve one device, launching an emulator if no real device is attached
    pub async fn resolve(&self, cancel: &CancellationToken) -> Result<ResolvedTarget, ResolveError> {
        let mut state = ResolverState::Discovering;
        let result = self.run(&mut state, cancel).await;

        match &result {
            Ok(target) => {
                self.transition(&mut state, ResolverState::Done);
                info!("Resolved device {} ({:?})", target.serial, target.kind);
            }
            Err(e) => {
                self.transition(&mut state, ResolverState::Failed);
                error!("Device resolution failed: {}", e);
            }
        }

        result
    }

    async fn run(&self, state: &mut ResolverState, cancel: &CancellationToken) -> Result<ResolvedTarget, ResolveError> {
        // Offline and unauthorized entries are never selected, but a wedged
        // emulator still needs killing and still holds its console port
        let attached = self.discover(Stage::Discovery, cancel).await?;
        let usable: Vec<&Device> = attached.iter().filter(|d| d.is_usable()).collect();
        info!("Found {} usable device(s) of {} attached", usable.len(), attached.len());

        if let Some(real) = usable.iter().find(|d| d.kind == DeviceKind::Real) {
            self.transition(state, ResolverState::Publishing);
            return Ok(ResolvedTarget {
                serial: real.serial.clone(),
                kind: DeviceKind::Real,
                launched: false,
            });
        }

        self.transition(state, ResolverState::Cleaning);
        let stale = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled { stage: Stage::Cleanup }),
            killed = self.launcher.kill_all(&attached) => killed,
        };
        if stale > 0 {
            info!("Killed {} stale emulator(s)", stale);
        }

        // Image creation is attempted once per run, never inside the retry loop
        self.transition(state, ResolverState::ImageEnsuring);
        let image = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled { stage: Stage::ImageEnsure }),
            res = self.avd.ensure_image(&self.config.image) => {
                res.map_err(|e| ResolveError::from_avd(&self.config.image.name, e))?
            }
        };

        let port = next_emulator_port(&attached)
            .ok_or_else(|| ResolveError::from_emulator(EmulatorError::NoFreePort))?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            info!("Launch attempt {}/{}", attempt, self.config.launch_attempts);

            match self.launch_and_wait(state, &image.name, port, cancel).await {
                Ok(target) => return Ok(target),
                Err(e) if e.is_retryable() && attempt < self.config.launch_attempts => {
                    warn!("Launch attempt {} failed: {}", attempt, e);
                    self.transition(state, ResolverState::Cleaning);
                    let serial = format!("{}{}", EMULATOR_SERIAL_PREFIX, port);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ResolveError::Cancelled { stage: Stage::Cleanup }),
                        _ = self.launcher.kill(&serial) => {}
                    }
                }
                Err(e) if e.is_retryable() => {
                    return Err(ResolveError::DeviceResolutionFailed {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn launch_and_wait(
        &self,
        state: &mut ResolverState,
        image_name: &str,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<ResolvedTarget, ResolveError> {
        self.transition(state, ResolverState::Launching);
        let handle = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ResolveError::Cancelled { stage: Stage::Launch }),
            res = self.launcher.launch(image_name, port) => res.map_err(ResolveError::from_emulator)?,
        };

        self.transition(state, ResolverState::Waiting);
        self.boot
            .wait_until_ready(&handle.serial(), &self.config.boot, cancel)
            .await
            .map_err(ResolveError::from_boot)?;

        self.transition(state, ResolverState::Rediscovering);
        let devices = self.discover(Stage::Rediscovery, cancel).await?;
        let first = devices
            .into_iter()
            .find(Device::is_usable)
            .ok_or(ResolveError::NoDeviceListed { stage: Stage::Rediscovery })?;

        if first.serial != handle.serial() {
            warn!("Launched {} but {} is listed first", handle.serial(), first.serial);
        }

        self.transition(state, ResolverState::Publishing);
        Ok(ResolvedTarget {
            launched: first.serial == handle.serial(),
            serial: first.serial,
            kind: first.kind,
        })
    }
}
