//! ADB (Android Debug Bridge) Client
//!
//! Device discovery, property reads and emulator console commands.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::debug;

use crate::device::{parse_device_list, Device};
use crate::tool::{is_unavailable, ToolOutput, ToolRunner};

/// Property that turns "1" once Android has finished booting
pub const BOOT_COMPLETED_PROP: &str = "sys.boot_completed";

/// ADB errors
#[derive(Debug, thiserror::Error)]
pub enum AdbError {
    #[error("adb could not be started ({path:?}): {source}")]
    ToolUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("adb {args} failed: {message}")]
    CommandFailed { args: String, message: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// ADB Client
#[derive(Clone)]
pub struct AdbClient {
    adb: PathBuf,
    runner: Arc<dyn ToolRunner>,
}

impl AdbClient {
    /// Create a new ADB client
    pub fn new(adb: PathBuf, runner: Arc<dyn ToolRunner>) -> Self {
        Self { adb, runner }
    }

    /// Run an ADB command and return its raw output, whatever the exit code
    pub(crate) async fn run_raw(&self, args: &[&str]) -> Result<ToolOutput, AdbError> {
        debug!("adb {:?}", args);

        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.runner
            .run(&self.adb, &args, None)
            .await
            .map_err(|source| {
                if is_unavailable(&source) {
                    AdbError::ToolUnavailable { path: self.adb.clone(), source }
                } else {
                    AdbError::Io(source)
                }
            })
    }

    /// Run an ADB command
    async fn run(&self, args: &[&str]) -> Result<String, AdbError> {
        let output = self.run_raw(args).await?;

        if !output.is_success() {
            return Err(AdbError::CommandFailed {
                args: args.join(" "),
                message: output.diagnostic(),
            });
        }

        Ok(output.stdout)
    }

    /// Run an ADB command for a specific device
    async fn run_for_device(&self, serial: &str, args: &[&str]) -> Result<String, AdbError> {
        let mut full_args = vec!["-s", serial];
        full_args.extend(args);
        self.run(&full_args).await
    }

    /// Every attached device, whatever its connection state
    pub async fn list_attached(&self) -> Result<Vec<Device>, AdbError> {
        let output = self.run(&["devices"]).await?;
        Ok(parse_device_list(&output))
    }

    /// List connected devices that are online and authorized
    pub async fn list_devices(&self) -> Result<Vec<Device>, AdbError> {
        let (usable, skipped): (Vec<Device>, Vec<Device>) =
            self.list_attached().await?.into_iter().partition(Device::is_usable);

        for device in &skipped {
            debug!("Ignoring {} in state {}", device.serial, device.state.as_str());
        }

        Ok(usable)
    }

    /// Run a shell command on device
    pub async fn shell(&self, serial: &str, command: &str) -> Result<String, AdbError> {
        self.run_for_device(serial, &["shell", command]).await
    }

    /// Get device property
    pub async fn get_prop(&self, serial: &str, prop: &str) -> Result<String, AdbError> {
        let output = self.shell(serial, &format!("getprop {}", prop)).await?;
        Ok(output.trim().to_string())
    }

    /// Ask an emulator to shut down through its console
    pub async fn emu_kill(&self, serial: &str) -> Result<(), AdbError> {
        self.run_for_device(serial, &["emu", "kill"]).await?;
        Ok(())
    }
}

impl std::fmt::Debug for AdbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbClient").field("adb", &self.adb).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;
    use crate::tool::scripted::ScriptedRunner;

    fn client(runner: &ScriptedRunner) -> AdbClient {
        AdbClient::new(PathBuf::from("adb"), Arc::new(runner.clone()))
    }

    #[tokio::test]
    async fn test_list_devices_keeps_only_online() {
        let runner = ScriptedRunner::new(|_| {
            Ok(ToolOutput::success(
                "List of devices attached\nR2CN123\tdevice\nemulator-5554\toffline\nXYZ\tunauthorized\nemulator-5556\tdevice\n",
            ))
        });

        let devices = client(&runner).list_devices().await.unwrap();
        let serials: Vec<&str> = devices.iter().map(|d| d.serial.as_str()).collect();
        assert_eq!(serials, vec!["R2CN123", "emulator-5556"]);
        assert_eq!(devices[0].kind, DeviceKind::Real);
        assert_eq!(devices[1].kind, DeviceKind::Emulator);
        assert_eq!(runner.lines(), vec!["adb devices"]);
    }

    #[tokio::test]
    async fn test_list_attached_keeps_every_state() {
        let runner = ScriptedRunner::new(|_| {
            Ok(ToolOutput::success(
                "List of devices attached\nemulator-5554\toffline\nXYZ\tunauthorized\n",
            ))
        });

        let devices = client(&runner).list_attached().await.unwrap();
        let serials: Vec<&str> = devices.iter().map(|d| d.serial.as_str()).collect();
        assert_eq!(serials, vec!["emulator-5554", "XYZ"]);
        assert!(devices.iter().all(|d| !d.is_usable()));
    }

    #[tokio::test]
    async fn test_missing_adb_is_tool_unavailable() {
        let runner = ScriptedRunner::new(|_| Err(std::io::Error::from(std::io::ErrorKind::NotFound)));

        let err = client(&runner).list_devices().await.unwrap_err();
        assert!(matches!(err, AdbError::ToolUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_get_prop_trims_output() {
        let runner = ScriptedRunner::new(|_| Ok(ToolOutput::success("1\r\n")));

        let value = client(&runner).get_prop("emulator-5554", BOOT_COMPLETED_PROP).await.unwrap();
        assert_eq!(value, "1");
        assert_eq!(
            runner.lines(),
            vec!["adb -s emulator-5554 shell getprop sys.boot_completed"]
        );
    }

    #[tokio::test]
    async fn test_command_failure_carries_stderr() {
        let runner = ScriptedRunner::new(|_| Ok(ToolOutput::failure(1, "error: device 'emulator-5554' not found\n")));

        let err = client(&runner).emu_kill("emulator-5554").await.unwrap_err();
        match err {
            AdbError::CommandFailed { args, message } => {
                assert_eq!(args, "-s emulator-5554 emu kill");
                assert_eq!(message, "error: device 'emulator-5554' not found");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
