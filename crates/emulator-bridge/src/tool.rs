//! SDK tool invocation
//!
//! Everything the bridge does goes through a [`ToolRunner`], so the
//! orchestration can be driven by a scripted runner in tests.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self { code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self { code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// stderr when present, otherwise stdout; what a user needs to see on failure
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// A background process that was started and left running
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedProcess {
    pub pid: Option<u32>,
}

/// Runs SDK command-line tools
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion, optionally feeding `stdin`
    async fn run(&self, program: &Path, args: &[String], stdin: Option<&str>) -> std::io::Result<ToolOutput>;

    /// Start detached; returns as soon as the process exists
    async fn spawn_detached(&self, program: &Path, args: &[String]) -> std::io::Result<SpawnedProcess>;
}

/// Runs tools as real child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemToolRunner;

#[async_trait]
impl ToolRunner for SystemToolRunner {
    async fn run(&self, program: &Path, args: &[String], stdin: Option<&str>) -> std::io::Result<ToolOutput> {
        debug!("{} {:?}", program.display(), args);

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
                // Closing stdin lets prompts that read past our answer see EOF
                drop(pipe);
            }
        }

        let output = child.wait_with_output().await?;

        Ok(ToolOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn spawn_detached(&self, program: &Path, args: &[String]) -> std::io::Result<SpawnedProcess> {
        debug!("spawn {} {:?}", program.display(), args);

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()?;

        Ok(SpawnedProcess { pid: child.id() })
    }
}

/// Paths of the SDK tools the bridge drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkTools {
    pub adb: PathBuf,
    pub avdmanager: PathBuf,
    pub emulator: PathBuf,
}

impl SdkTools {
    /// Resolve tools from an SDK root, falling back to `PATH`
    pub fn locate(sdk_path: Option<&Path>) -> Self {
        let exe = |name: &str| {
            if cfg!(windows) {
                format!("{}.exe", name)
            } else {
                name.to_string()
            }
        };
        let script = |name: &str| {
            if cfg!(windows) {
                format!("{}.bat", name)
            } else {
                name.to_string()
            }
        };

        let find = |relative: &[PathBuf], file: &str| -> PathBuf {
            if let Some(sdk) = sdk_path {
                for dir in relative {
                    let candidate = sdk.join(dir).join(file);
                    if candidate.exists() {
                        return candidate;
                    }
                }
            }
            which::which(file).unwrap_or_else(|_| PathBuf::from(file))
        };

        Self {
            adb: find(&[PathBuf::from("platform-tools")], &exe("adb")),
            avdmanager: find(
                &[
                    PathBuf::from("cmdline-tools").join("latest").join("bin"),
                    PathBuf::from("tools").join("bin"),
                ],
                &script("avdmanager"),
            ),
            emulator: find(
                &[PathBuf::from("emulator"), PathBuf::from("tools")],
                &exe("emulator"),
            ),
        }
    }

    /// Bare tool names, resolved by the OS at spawn time
    pub fn on_path() -> Self {
        Self {
            adb: PathBuf::from("adb"),
            avdmanager: PathBuf::from("avdmanager"),
            emulator: PathBuf::from("emulator"),
        }
    }
}

/// Whether an I/O error means the tool itself could not be started
pub(crate) fn is_unavailable(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
    )
}

#[cfg(test)]
pub(crate) mod scripted {
    //! In-memory runner that answers tool invocations from a closure and
    //! records every call.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Call {
        pub tool: String,
        pub args: Vec<String>,
        pub stdin: Option<String>,
        pub detached: bool,
    }

    impl Call {
        pub fn line(&self) -> String {
            format!("{} {}", self.tool, self.args.join(" "))
        }
    }

    type Handler = dyn Fn(&Call) -> std::io::Result<ToolOutput> + Send + Sync;

    #[derive(Clone)]
    pub struct ScriptedRunner {
        handler: Arc<Handler>,
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl ScriptedRunner {
        pub fn new(handler: impl Fn(&Call) -> std::io::Result<ToolOutput> + Send + Sync + 'static) -> Self {
            Self {
                handler: Arc::new(handler),
                calls: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        pub fn lines(&self) -> Vec<String> {
            self.calls().iter().map(Call::line).collect()
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.lines().iter().filter(|l| l.starts_with(prefix)).count()
        }

        fn record(&self, program: &Path, args: &[String], stdin: Option<&str>, detached: bool) -> Call {
            let call = Call {
                tool: program
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                args: args.to_vec(),
                stdin: stdin.map(str::to_string),
                detached,
            };
            self.calls.lock().unwrap().push(call.clone());
            call
        }
    }

    #[async_trait]
    impl ToolRunner for ScriptedRunner {
        async fn run(&self, program: &Path, args: &[String], stdin: Option<&str>) -> std::io::Result<ToolOutput> {
            let call = self.record(program, args, stdin, false);
            (self.handler)(&call)
        }

        async fn spawn_detached(&self, program: &Path, args: &[String]) -> std::io::Result<SpawnedProcess> {
            let call = self.record(program, args, None, true);
            (self.handler)(&call).map(|_| SpawnedProcess { pid: Some(4242) })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_prefers_stderr() {
        let out = ToolOutput {
            code: Some(1),
            stdout: "Loading local repository...\n".into(),
            stderr: "Error: Package path is not valid\n".into(),
        };
        assert_eq!(out.diagnostic(), "Error: Package path is not valid");

        let out = ToolOutput { code: Some(1), stdout: "only stdout\n".into(), stderr: " \n".into() };
        assert_eq!(out.diagnostic(), "only stdout");
    }

    #[test]
    fn test_locate_prefers_sdk_layout() {
        let sdk = tempfile::tempdir().unwrap();
        let platform_tools = sdk.path().join("platform-tools");
        std::fs::create_dir_all(&platform_tools).unwrap();
        let adb = platform_tools.join(if cfg!(windows) { "adb.exe" } else { "adb" });
        std::fs::write(&adb, "").unwrap();

        let tools = SdkTools::locate(Some(sdk.path()));
        assert_eq!(tools.adb, adb);
    }

    #[test]
    fn test_unavailable_kinds() {
        assert!(is_unavailable(&std::io::Error::from(std::io::ErrorKind::NotFound)));
        assert!(is_unavailable(&std::io::Error::from(std::io::ErrorKind::PermissionDenied)));
        assert!(!is_unavailable(&std::io::Error::from(std::io::ErrorKind::BrokenPipe)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_missing_binary() {
        let err = SystemToolRunner
            .run(Path::new("/nonexistent/droid-target/adb"), &[], None)
            .await
            .unwrap_err();
        assert!(is_unavailable(&err));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_feeds_stdin() {
        let out = SystemToolRunner
            .run(Path::new("cat"), &[], Some("no\n"))
            .await
            .unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout, "no\n");
    }
}
