//! Resolved device publishing
//!
//! The resolver only returns a [`ResolvedTarget`]; callers pick where it goes.
//!
//! A process cannot change its parent's environment, so the env sink also
//! prints a `KEY=serial` line for the caller to export, e.g.
//! `droid-target resolve >> "$GITHUB_ENV"` or
//! `export "$(droid-target resolve)"`.

use std::io::Write;
use std::path::PathBuf;

use droid_target_core::{PublishConfig, PublishKind};
use tracing::info;

use crate::resolver::ResolvedTarget;

/// Publish errors
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to write resolved device to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid environment variable name {0:?}")]
    InvalidKey(String),
    #[error("Failed to print resolved device: {0}")]
    Emit(#[source] std::io::Error),
}

/// Where a resolved device serial is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishSink {
    /// `KEY=serial` on stdout, also set in this process for the tools it launches
    Env { key: String },
    /// Serial plus trailing newline in a file
    File { path: PathBuf },
    Stdout,
}

impl PublishSink {
    pub fn from_config(config: &PublishConfig) -> Self {
        match config.sink {
            PublishKind::Env => PublishSink::Env { key: config.env_key.clone() },
            PublishKind::File => PublishSink::File { path: config.file.clone() },
            PublishKind::Stdout => PublishSink::Stdout,
        }
    }

    /// Write the target's serial to this sink
    pub async fn publish(&self, target: &ResolvedTarget) -> Result<(), PublishError> {
        let mut stdout = std::io::stdout();
        self.publish_to(target, &mut stdout).await
    }

    /// Like [`publish`](Self::publish), with `out` standing in for stdout
    pub async fn publish_to<W: Write + Send>(
        &self,
        target: &ResolvedTarget,
        out: &mut W,
    ) -> Result<(), PublishError> {
        match self {
            PublishSink::Env { key } => {
                if key.is_empty() || key.contains('=') || key.contains('\0') || key.contains(char::is_whitespace) {
                    return Err(PublishError::InvalidKey(key.clone()));
                }
                std::env::set_var(key, &target.serial);
                writeln!(out, "{}={}", key, target.serial).map_err(PublishError::Emit)?;
                out.flush().map_err(PublishError::Emit)?;
                info!("Published {} as {}", target.serial, key);
            }
            PublishSink::File { path } => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|source| PublishError::Write { path: path.clone(), source })?;
                }
                tokio::fs::write(path, format!("{}\n", target.serial))
                    .await
                    .map_err(|source| PublishError::Write { path: path.clone(), source })?;
                info!("Published {} to {:?}", target.serial, path);
            }
            PublishSink::Stdout => {
                writeln!(out, "{}", target.serial).map_err(PublishError::Emit)?;
                out.flush().map_err(PublishError::Emit)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceKind;

    fn target(serial: &str) -> ResolvedTarget {
        ResolvedTarget {
            serial: serial.to_string(),
            kind: DeviceKind::from_serial(serial),
            launched: false,
        }
    }

    #[test]
    fn test_sink_from_config() {
        let config = PublishConfig::default();
        assert_eq!(
            PublishSink::from_config(&config),
            PublishSink::Env { key: "ANDROID_DEVICE_NAME".into() }
        );

        let config = PublishConfig { sink: PublishKind::File, file: "device.txt".into(), ..Default::default() };
        assert_eq!(PublishSink::from_config(&config), PublishSink::File { path: "device.txt".into() });
    }

    #[tokio::test]
    async fn test_file_sink_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ci").join("device.txt");

        PublishSink::File { path: path.clone() }.publish(&target("R2CN123")).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "R2CN123\n");
    }

    #[tokio::test]
    async fn test_env_sink() {
        let key = "DROID_TARGET_TEST_PUBLISH_ENV";
        let mut out = Vec::new();
        PublishSink::Env { key: key.into() }
            .publish_to(&target("emulator-5556"), &mut out)
            .await
            .unwrap();

        assert_eq!(std::env::var(key).unwrap(), "emulator-5556");
        assert_eq!(String::from_utf8(out).unwrap(), format!("{key}=emulator-5556\n"));
    }

    #[tokio::test]
    async fn test_stdout_sink_prints_serial() {
        let mut out = Vec::new();
        PublishSink::Stdout.publish_to(&target("R2CN123"), &mut out).await.unwrap();
        assert_eq!(out, b"R2CN123\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_line_reaches_a_separate_shell() {
        use std::process::{Command, Stdio};

        let key = "DROID_TARGET_TEST_EXPORTED";
        let mut out = Vec::new();
        PublishSink::Env { key: key.into() }
            .publish_to(&target("emulator-5558"), &mut out)
            .await
            .unwrap();

        // The shell must learn the serial from the printed line, not by inheritance
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!("export \"$(cat)\"; printf %s \"${key}\""))
            .env_remove(key)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .unwrap();
        child.stdin.take().unwrap().write_all(&out).unwrap();
        let output = child.wait_with_output().unwrap();

        assert_eq!(String::from_utf8(output.stdout).unwrap(), "emulator-5558");
    }

    #[tokio::test]
    async fn test_env_sink_rejects_bad_key() {
        let err = PublishSink::Env { key: "A=B".into() }.publish(&target("R2CN123")).await.unwrap_err();
        assert!(matches!(err, PublishError::InvalidKey(_)));
    }
}
