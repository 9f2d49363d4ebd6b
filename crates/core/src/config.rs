//! Application Configuration
//!
//! Every knob the device resolver and its collaborators read:
//! - Android SDK location
//! - Emulator image name, system image and launch flags
//! - Boot polling policy and retry budget
//! - Where the resolved device is published
//! - Instrumentation target and runtime parameters
//! - Test sharding markers

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};

/// Environment variable the resolved device serial is published under by default
pub const DEFAULT_DEVICE_ENV_KEY: &str = "ANDROID_DEVICE_NAME";

/// Android SDK configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AndroidConfig {
    /// Path to Android SDK (falls back to ANDROID_HOME / ANDROID_SDK_ROOT)
    pub sdk_path: Option<PathBuf>,
}

/// Emulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Name of the emulator image (AVD) to reuse or create
    pub image_name: String,
    /// System image spec, e.g. "android-25;google_apis;x86"
    pub system_image: String,
    /// Hardware profile passed to avdmanager (-d)
    pub device_profile: Option<String>,
    /// Run without a window, audio or boot animation
    pub headless: bool,
    /// GPU mode override
    pub gpu: Option<String>,
    /// Wipe user data on every launch
    pub wipe_data: bool,
    /// Ignore the quick-boot snapshot and boot from scratch
    pub cold_boot: bool,
    /// Additional emulator arguments
    pub extra_args: Vec<String>,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            image_name: "test".to_string(),
            system_image: "android-25;google_apis;x86".to_string(),
            device_profile: None,
            headless: true,
            gpu: None,
            wipe_data: false,
            cold_boot: false,
            extra_args: Vec::new(),
        }
    }
}

/// Boot readiness policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Delay between boot-completion polls
    pub poll_interval_ms: u64,
    /// Give up after this many polls (unbounded when absent)
    pub max_polls: Option<u32>,
    /// Wall clock allowed for one boot wait
    pub boot_timeout_secs: u64,
    /// Launch/wait cycles per run, including the first
    pub launch_attempts: u32,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            max_polls: None,
            boot_timeout_secs: 600,
            launch_attempts: 2,
        }
    }
}

impl BootConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.boot_timeout_secs)
    }
}

/// Side channel the resolved device is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishKind {
    Env,
    File,
    Stdout,
}

/// Publish configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub sink: PublishKind,
    /// Environment variable name for the env sink
    pub env_key: String,
    /// Target file for the file sink
    pub file: PathBuf,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            sink: PublishKind::Env,
            env_key: DEFAULT_DEVICE_ENV_KEY.to_string(),
            file: PathBuf::from("android_device_name.txt"),
        }
    }
}

/// Instrumentation test configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    /// Test APK package, e.g. "com.example.app.test"
    pub test_package: String,
    /// Instrumentation runner class
    pub runner: String,
    /// Runtime parameters passed as `-e key value`
    pub params: BTreeMap<String, String>,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            test_package: String::new(),
            runner: "androidx.test.runner.AndroidJUnitRunner".to_string(),
            params: BTreeMap::new(),
        }
    }
}

/// Test sharding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    /// File name of the generated test manifests to search for
    pub manifest_name: String,
    /// Output file prefix, one file per agent
    pub output_prefix: String,
    pub unit_markers: Vec<String>,
    pub integration_markers: Vec<String>,
    pub error_injection_markers: Vec<String>,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            manifest_name: "testFiles.txt".to_string(),
            output_prefix: "agent_".to_string(),
            unit_markers: vec!["Test".to_string()],
            integration_markers: vec!["IT".to_string()],
            error_injection_markers: vec!["ErrInj".to_string()],
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub android: AndroidConfig,
    pub emulator: EmulatorConfig,
    pub boot: BootConfig,
    pub publish: PublishConfig,
    pub instrumentation: InstrumentationConfig,
    pub sharding: ShardingConfig,
}

impl AppConfig {
    /// Get the configuration directory path
    pub fn config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "droid-target", "droid-target")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the default configuration file path
    pub fn config_file() -> Option<PathBuf> {
        Self::config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Load configuration from an explicit path, the default location, or defaults
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path).await;
        }

        match Self::config_file() {
            Some(path) if path.exists() => Self::load_from(&path).await,
            _ => {
                info!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a TOML file
    pub async fn load_from(path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", path);
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: AppConfig = toml::from_str(&contents)
            .map_err(|source| ConfigError::TomlParse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the resolver cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.emulator.image_name.trim().is_empty() {
            return Err(ConfigError::Invalid("emulator.image_name must not be empty".into()));
        }
        if self.boot.launch_attempts == 0 {
            return Err(ConfigError::Invalid("boot.launch_attempts must be at least 1".into()));
        }
        if self.boot.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("boot.poll_interval_ms must be positive".into()));
        }
        if self.publish.env_key.trim().is_empty() {
            return Err(ConfigError::Invalid("publish.env_key must not be empty".into()));
        }
        Ok(())
    }

    /// Get Android SDK path from config or the conventional environment variables
    pub fn sdk_path(&self) -> Option<PathBuf> {
        self.android.sdk_path.clone().or_else(|| {
            ["ANDROID_HOME", "ANDROID_SDK_ROOT"]
                .iter()
                .filter_map(|key| std::env::var_os(key))
                .map(PathBuf::from)
                .find(|p| p.exists())
        })
    }
}
