//! AVD (Android Virtual Device) Manager
//!
//! Lists emulator images and creates the one the resolver needs when it is
//! missing.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::tool::{is_unavailable, ToolOutput, ToolRunner};

/// Answer piped to avdmanager's "custom hardware profile?" prompt
const DECLINE_CUSTOM_PROFILE: &str = "no\n";

/// AVD Manager errors
#[derive(Debug, thiserror::Error)]
pub enum AvdError {
    #[error("avdmanager could not be started ({path:?}): {source}")]
    ToolUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("avdmanager list avd failed: {0}")]
    ListFailed(String),
    #[error("Failed to create AVD {name}: {diagnostic}")]
    CreationFailed { name: String, diagnostic: String },
    #[error("Invalid system image spec {0:?}, expected android-<api>;<variant>;<abi>")]
    InvalidSpec(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// System image an emulator image is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemImageSpec {
    pub api_level: u32,
    pub variant: String, // google_apis, google_apis_playstore, default
    pub abi: String,     // x86, x86_64, arm64-v8a
}

impl SystemImageSpec {
    pub fn new(api_level: u32, variant: &str, abi: &str) -> Self {
        Self {
            api_level,
            variant: variant.to_string(),
            abi: abi.to_string(),
        }
    }

    /// Get the package string for avdmanager
    pub fn package(&self) -> String {
        format!("system-images;{}", self)
    }
}

impl fmt::Display for SystemImageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "android-{};{};{}", self.api_level, self.variant, self.abi)
    }
}

impl FromStr for SystemImageSpec {
    type Err = AvdError;

    /// Accepts `android-25;google_apis;x86` or the full
    /// `system-images;android-25;google_apis;x86` package path
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let body = trimmed.strip_prefix("system-images;").unwrap_or(trimmed);
        let parts: Vec<&str> = body.split(';').map(str::trim).collect();

        let [platform, variant, abi] = parts.as_slice() else {
            return Err(AvdError::InvalidSpec(s.to_string()));
        };

        let api_level = platform
            .strip_prefix("android-")
            .and_then(|api| api.parse().ok())
            .ok_or_else(|| AvdError::InvalidSpec(s.to_string()))?;

        if variant.is_empty() || abi.is_empty() {
            return Err(AvdError::InvalidSpec(s.to_string()));
        }

        Ok(Self::new(api_level, variant, abi))
    }
}

/// Named emulator image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorImage {
    pub name: String,
    pub spec: SystemImageSpec,
    /// Whether this call created it
    pub created: bool,
}

/// AVD configuration for creation
#[derive(Debug, Clone)]
pub struct AvdConfig {
    pub name: String,
    pub spec: SystemImageSpec,
    pub device: Option<String>, // device profile
}

impl AvdConfig {
    pub fn new(name: &str, spec: SystemImageSpec) -> Self {
        Self {
            name: name.to_string(),
            spec,
            device: None,
        }
    }

    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }
}

/// AVD Manager
#[derive(Clone)]
pub struct AvdManager {
    avdmanager: PathBuf,
    runner: Arc<dyn ToolRunner>,
}

impl AvdManager {
    /// Create a new AVD manager
    pub fn new(avdmanager: PathBuf, runner: Arc<dyn ToolRunner>) -> Self {
        Self { avdmanager, runner }
    }

    async fn run(&self, args: &[&str], stdin: Option<&str>) -> Result<ToolOutput, AvdError> {
        debug!("avdmanager {:?}", args);

        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        self.runner
            .run(&self.avdmanager, &args, stdin)
            .await
            .map_err(|source| {
                if is_unavailable(&source) {
                    AvdError::ToolUnavailable { path: self.avdmanager.clone(), source }
                } else {
                    AvdError::Io(source)
                }
            })
    }

    /// List the names of all existing AVDs
    pub async fn list_images(&self) -> Result<Vec<String>, AvdError> {
        let output = self.run(&["list", "avd", "-c"], None).await?;

        if !output.is_success() {
            return Err(AvdError::ListFailed(output.diagnostic()));
        }

        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Check whether an AVD with this exact name exists
    pub async fn exists(&self, name: &str) -> Result<bool, AvdError> {
        Ok(self.list_images().await?.iter().any(|n| n == name))
    }

    /// Make sure the image exists, creating it if it is not listed
    pub async fn ensure_image(&self, config: &AvdConfig) -> Result<EmulatorImage, AvdError> {
        if self.exists(&config.name).await? {
            debug!("AVD {} already exists", config.name);
            return Ok(EmulatorImage {
                name: config.name.clone(),
                spec: config.spec.clone(),
                created: false,
            });
        }

        let output = self.create_avd(config).await?;

        if !self.exists(&config.name).await? {
            return Err(AvdError::CreationFailed {
                name: config.name.clone(),
                diagnostic: creation_diagnostic(&output),
            });
        }

        info!("AVD created successfully: {}", config.name);
        Ok(EmulatorImage {
            name: config.name.clone(),
            spec: config.spec.clone(),
            created: true,
        })
    }

    /// Create a new AVD
    ///
    /// A non-zero exit is not treated as failure here; the caller checks the
    /// listing, since avdmanager exits 0 on some failures and non-zero on
    /// some successes depending on the SDK revision.
    async fn create_avd(&self, config: &AvdConfig) -> Result<ToolOutput, AvdError> {
        info!("Creating AVD {} from {}", config.name, config.spec.package());

        let package = config.spec.package();
        let mut args = vec!["create", "avd", "-n", config.name.as_str(), "-k", package.as_str()];

        if let Some(ref device) = config.device {
            args.push("-d");
            args.push(device);
        }

        let output = self.run(&args, Some(DECLINE_CUSTOM_PROFILE)).await?;
        debug!("avdmanager create exited with {:?}", output.code);
        Ok(output)
    }
}

impl fmt::Debug for AvdManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvdManager").field("avdmanager", &self.avdmanager).finish()
    }
}

fn creation_diagnostic(output: &ToolOutput) -> String {
    let text = [output.stdout.trim(), output.stderr.trim()]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    if text.is_empty() {
        format!("avdmanager exited with {:?} and printed nothing", output.code)
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::scripted::ScriptedRunner;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn spec() -> SystemImageSpec {
        "android-25;google_apis;x86".parse().unwrap()
    }

    fn manager(runner: &ScriptedRunner) -> AvdManager {
        AvdManager::new(PathBuf::from("avdmanager"), Arc::new(runner.clone()))
    }

    #[test]
    fn test_spec_parsing() {
        let spec = spec();
        assert_eq!(spec.api_level, 25);
        assert_eq!(spec.variant, "google_apis");
        assert_eq!(spec.abi, "x86");
        assert_eq!(spec.to_string(), "android-25;google_apis;x86");
        assert_eq!(spec.package(), "system-images;android-25;google_apis;x86");

        let full: SystemImageSpec = "system-images;android-30;google_apis_playstore;x86_64".parse().unwrap();
        assert_eq!(full, SystemImageSpec::new(30, "google_apis_playstore", "x86_64"));

        assert!("android-25;google_apis".parse::<SystemImageSpec>().is_err());
        assert!("android-x;google_apis;x86".parse::<SystemImageSpec>().is_err());
        assert!("25;google_apis;x86".parse::<SystemImageSpec>().is_err());
    }

    #[tokio::test]
    async fn test_ensure_image_creates_at_most_once() {
        let created = Arc::new(AtomicBool::new(false));
        let state = created.clone();
        let runner = ScriptedRunner::new(move |call| {
            if call.args.starts_with(&["create".to_string()]) {
                state.store(true, Ordering::SeqCst);
                return Ok(ToolOutput::success(""));
            }
            if state.load(Ordering::SeqCst) {
                Ok(ToolOutput::success("Pixel_API_30\ntest\n"))
            } else {
                Ok(ToolOutput::success("Pixel_API_30\n"))
            }
        });
        let avd = manager(&runner);
        let config = AvdConfig::new("test", spec());

        let first = avd.ensure_image(&config).await.unwrap();
        assert!(first.created);
        let second = avd.ensure_image(&config).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.name, "test");

        assert_eq!(runner.count("avdmanager create"), 1);
        let create = runner
            .calls()
            .into_iter()
            .find(|c| c.args.first().map(String::as_str) == Some("create"))
            .unwrap();
        assert_eq!(
            create.line(),
            "avdmanager create avd -n test -k system-images;android-25;google_apis;x86"
        );
        assert_eq!(create.stdin.as_deref(), Some("no\n"));
    }

    #[tokio::test]
    async fn test_existing_image_skips_creation() {
        let runner = ScriptedRunner::new(|_| Ok(ToolOutput::success("test\n")));

        let image = manager(&runner).ensure_image(&AvdConfig::new("test", spec())).await.unwrap();
        assert!(!image.created);
        assert_eq!(runner.lines(), vec!["avdmanager list avd -c"]);
    }

    #[tokio::test]
    async fn test_name_match_is_exact() {
        let runner = ScriptedRunner::new(|call| {
            if call.args[0] == "create" {
                Ok(ToolOutput::success(""))
            } else {
                Ok(ToolOutput::success("test1\n"))
            }
        });

        let err = manager(&runner).ensure_image(&AvdConfig::new("test", spec())).await.unwrap_err();
        assert!(matches!(err, AvdError::CreationFailed { .. }));
    }

    #[tokio::test]
    async fn test_creation_failure_surfaces_tool_text() {
        let runner = ScriptedRunner::new(|call| {
            if call.args[0] == "create" {
                Ok(ToolOutput {
                    code: Some(1),
                    stdout: String::new(),
                    stderr: "Error: Package path is not valid. Valid system image paths are:\nnull\n".into(),
                })
            } else {
                Ok(ToolOutput::success(""))
            }
        });

        let config = AvdConfig::new("test", spec()).with_device(Some("pixel_4".into()));
        let err = manager(&runner).ensure_image(&config).await.unwrap_err();
        match err {
            AvdError::CreationFailed { name, diagnostic } => {
                assert_eq!(name, "test");
                assert!(diagnostic.starts_with("Error: Package path is not valid"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(runner.count("avdmanager create avd -n test -k system-images;android-25;google_apis;x86 -d pixel_4"), 1);
    }

    #[tokio::test]
    async fn test_missing_avdmanager() {
        let runner = ScriptedRunner::new(|_| Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied)));

        let err = manager(&runner).list_images().await.unwrap_err();
        assert!(matches!(err, AvdError::ToolUnavailable { .. }));
    }
}
