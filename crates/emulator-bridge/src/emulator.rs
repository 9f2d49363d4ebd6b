//! Emulator Launcher
//!
//! Starts emulator instances in the background and shuts stale ones down.

use std::path::PathBuf;
use std::sync::Arc;

use droid_target_core::EmulatorConfig;
use tracing::{debug, info, warn};

use crate::adb::AdbClient;
use crate::device::{Device, EMULATOR_SERIAL_PREFIX};
use crate::tool::{is_unavailable, ToolRunner};

/// Emulator errors
#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("emulator could not be started ({path:?}): {source}")]
    ToolUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("No free emulator console port in {}..{}", crate::EMULATOR_PORT_RANGE.start, crate::EMULATOR_PORT_RANGE.end)]
    NoFreePort,
    #[error("Failed to start emulator: {0}")]
    StartFailed(String),
}

/// Emulator launch options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmulatorOptions {
    /// GPU mode (auto, host, swiftshader_indirect, etc.)
    pub gpu: Option<String>,
    pub no_audio: bool,
    pub no_window: bool,
    pub no_boot_anim: bool,
    /// Wipe data on launch
    pub wipe_data: bool,
    /// Skip loading the quick-boot snapshot
    pub cold_boot: bool,
    /// Additional arguments
    pub extra_args: Vec<String>,
}

impl EmulatorOptions {
    /// Options for headless/CI environments
    pub fn headless() -> Self {
        Self {
            gpu: Some("swiftshader_indirect".to_string()),
            no_audio: true,
            no_window: true,
            no_boot_anim: true,
            ..Default::default()
        }
    }

    pub fn from_config(config: &EmulatorConfig) -> Self {
        let mut options = if config.headless {
            Self::headless()
        } else {
            Self::default()
        };

        if config.gpu.is_some() {
            options.gpu = config.gpu.clone();
        }
        options.wipe_data = config.wipe_data;
        options.cold_boot = config.cold_boot;
        options.extra_args = config.extra_args.clone();
        options
    }

    /// Convert to command line arguments
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(ref gpu) = self.gpu {
            args.push("-gpu".to_string());
            args.push(gpu.clone());
        }

        if self.no_audio {
            args.push("-no-audio".to_string());
        }

        if self.no_window {
            args.push("-no-window".to_string());
        }

        if self.no_boot_anim {
            args.push("-no-boot-anim".to_string());
        }

        if self.wipe_data {
            args.push("-wipe-data".to_string());
        }

        if self.cold_boot {
            args.push("-no-snapshot-load".to_string());
        }

        args.extend(self.extra_args.iter().cloned());

        args
    }
}

/// A spawned emulator process; not necessarily booted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchHandle {
    pub image_name: String,
    pub port: u16,
    pub pid: Option<u32>,
}

impl LaunchHandle {
    /// Get the serial for ADB
    pub fn serial(&self) -> String {
        format!("{}{}", EMULATOR_SERIAL_PREFIX, self.port)
    }
}

/// Emulator launcher
#[derive(Clone)]
pub struct EmulatorLauncher {
    emulator: PathBuf,
    adb: AdbClient,
    runner: Arc<dyn ToolRunner>,
    options: EmulatorOptions,
}

impl EmulatorLauncher {
    /// Create a new emulator launcher
    pub fn new(emulator: PathBuf, adb: AdbClient, runner: Arc<dyn ToolRunner>) -> Self {
        Self {
            emulator,
            adb,
            runner,
            options: EmulatorOptions::headless(),
        }
    }

    pub fn with_options(mut self, options: EmulatorOptions) -> Self {
        self.options = options;
        self
    }

    /// Launch an emulator in the background
    ///
    /// Returns as soon as the process is spawned. Use
    /// [`BootWaiter`](crate::boot::BootWaiter) to wait until it is usable.
    pub async fn launch(&self, image_name: &str, port: u16) -> Result<LaunchHandle, EmulatorError> {
        info!("Launching emulator {} on port {}", image_name, port);

        let mut args = vec![
            "-avd".to_string(),
            image_name.to_string(),
            "-port".to_string(),
            port.to_string(),
        ];
        args.extend(self.options.to_args());

        debug!("Emulator args: {:?}", args);

        let process = self
            .runner
            .spawn_detached(&self.emulator, &args)
            .await
            .map_err(|source| {
                if is_unavailable(&source) {
                    EmulatorError::ToolUnavailable { path: self.emulator.clone(), source }
                } else {
                    EmulatorError::StartFailed(source.to_string())
                }
            })?;

        Ok(LaunchHandle {
            image_name: image_name.to_string(),
            port,
            pid: process.pid,
        })
    }

    /// Kill a single emulator through its console
    pub async fn kill(&self, serial: &str) -> bool {
        match self.adb.emu_kill(serial).await {
            Ok(()) => {
                info!("Killed emulator: {}", serial);
                true
            }
            Err(e) => {
                warn!("Failed to kill emulator {}: {}", serial, e);
                false
            }
        }
    }

    /// Kill every emulator in `devices`, ignoring real hardware
    ///
    /// Best effort: a failed kill is logged and the rest still run.
    /// Returns how many kills succeeded.
    pub async fn kill_all(&self, devices: &[Device]) -> usize {
        let mut killed = 0;
        for device in devices.iter().filter(|d| d.is_emulator()) {
            if self.kill(&device.serial).await {
                killed += 1;
            }
        }
        killed
    }
}

impl std::fmt::Debug for EmulatorLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatorLauncher")
            .field("emulator", &self.emulator)
            .field("options", &self.options)
            .finish()
    }
}

/// Get next emulator console port not taken by a listed emulator
pub fn next_emulator_port(devices: &[Device]) -> Option<u16> {
    let used: Vec<u16> = devices.iter().filter_map(Device::emulator_port).collect();
    crate::EMULATOR_PORT_RANGE
        .step_by(2)
        .find(|port| !used.contains(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::ConnectionState;
    use crate::tool::scripted::ScriptedRunner;
    use crate::tool::ToolOutput;

    fn launcher(runner: &ScriptedRunner) -> EmulatorLauncher {
        let runner: Arc<dyn ToolRunner> = Arc::new(runner.clone());
        let adb = AdbClient::new(PathBuf::from("adb"), runner.clone());
        EmulatorLauncher::new(PathBuf::from("emulator"), adb, runner)
    }

    fn online(serial: &str) -> Device {
        Device::new(serial, ConnectionState::Online)
    }

    #[test]
    fn test_headless_args() {
        let args = EmulatorOptions::headless().to_args();
        assert_eq!(
            args,
            vec!["-gpu", "swiftshader_indirect", "-no-audio", "-no-window", "-no-boot-anim"]
        );
    }

    #[test]
    fn test_options_from_config() {
        let config = EmulatorConfig {
            headless: false,
            wipe_data: true,
            extra_args: vec!["-verbose".into()],
            ..Default::default()
        };
        assert_eq!(EmulatorOptions::from_config(&config).to_args(), vec!["-wipe-data", "-verbose"]);
    }

    #[test]
    fn test_cold_boot_from_config() {
        let config = EmulatorConfig { cold_boot: true, ..Default::default() };
        let args = EmulatorOptions::from_config(&config).to_args();
        assert_eq!(args.last().map(String::as_str), Some("-no-snapshot-load"));

        let args = EmulatorOptions::from_config(&EmulatorConfig::default()).to_args();
        assert!(!args.iter().any(|a| a == "-no-snapshot-load"));
    }

    #[test]
    fn test_next_port_skips_listed_emulators() {
        assert_eq!(next_emulator_port(&[]), Some(5554));
        assert_eq!(
            next_emulator_port(&[online("emulator-5554"), online("R2CN123"), online("emulator-5556")]),
            Some(5558)
        );
        let all: Vec<Device> = crate::EMULATOR_PORT_RANGE
            .step_by(2)
            .map(|p| online(&format!("emulator-{}", p)))
            .collect();
        assert_eq!(next_emulator_port(&all), None);
    }

    #[tokio::test]
    async fn test_launch_spawns_detached() {
        let runner = ScriptedRunner::new(|_| Ok(ToolOutput::success("")));

        let handle = launcher(&runner).launch("test", 5556).await.unwrap();
        assert_eq!(handle.serial(), "emulator-5556");
        assert_eq!(handle.pid, Some(4242));

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].detached);
        assert!(calls[0].line().starts_with("emulator -avd test -port 5556 -gpu swiftshader_indirect"));
    }

    #[tokio::test]
    async fn test_launch_without_emulator_binary() {
        let runner = ScriptedRunner::new(|_| Err(std::io::Error::from(std::io::ErrorKind::NotFound)));

        let err = launcher(&runner).launch("test", 5554).await.unwrap_err();
        assert!(matches!(err, EmulatorError::ToolUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_kill_all_is_best_effort() {
        let runner = ScriptedRunner::new(|call| {
            if call.args.iter().any(|a| a == "emulator-5554") {
                Ok(ToolOutput::failure(1, "error: could not connect to TCP port 5554"))
            } else {
                Ok(ToolOutput::success("OK: killing emulator, bye bye"))
            }
        });

        let devices = [online("emulator-5554"), online("R2CN123"), online("emulator-5556")];
        let killed = launcher(&runner).kill_all(&devices).await;

        assert_eq!(killed, 1);
        assert_eq!(
            runner.lines(),
            vec!["adb -s emulator-5554 emu kill", "adb -s emulator-5556 emu kill"]
        );
    }
}
