//! CLI commands for droid-target
//!
//! Each command wires configuration to the bridge and sharding crates.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use droid_target_core::{AppConfig, PublishKind};
use droid_target_emulator_bridge::{
    AdbClient, DeviceResolver, InstrumentationRequest, InstrumentationRunner, PublishSink,
    ResolvedTarget, SdkTools, SystemToolRunner, ToolRunner,
};
use droid_target_test_sharding::Sharder;

/// Publish sink selectable on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkArg {
    Env,
    File,
    Stdout,
}

impl From<SinkArg> for PublishKind {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Env => PublishKind::Env,
            SinkArg::File => PublishKind::File,
            SinkArg::Stdout => PublishKind::Stdout,
        }
    }
}

fn sdk_tools(config: &AppConfig) -> SdkTools {
    let sdk = config.sdk_path();
    if sdk.is_none() {
        warn!("Android SDK not found, looking for tools on PATH");
    }
    SdkTools::locate(sdk.as_deref())
}

fn system_runner() -> Arc<dyn ToolRunner> {
    Arc::new(SystemToolRunner)
}

/// Token cancelled on Ctrl-C or once `timeout` has elapsed
fn cancellation(timeout: Option<Duration>) -> CancellationToken {
    let token = CancellationToken::new();

    let on_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            on_signal.cancel();
        }
    });

    if let Some(timeout) = timeout {
        let on_timeout = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            warn!("Timed out after {:?}, cancelling", timeout);
            on_timeout.cancel();
        });
    }

    token
}

async fn resolve_device(config: &AppConfig, timeout_secs: Option<u64>) -> Result<ResolvedTarget> {
    let tools = sdk_tools(config);
    let resolver = DeviceResolver::from_config(config, &tools, system_runner())
        .context("Invalid emulator configuration")?;

    let cancel = cancellation(timeout_secs.map(Duration::from_secs));
    let target = resolver.resolve(&cancel).await?;
    cancel.cancel();
    Ok(target)
}

/// Device list command
pub struct DevicesCommand {
    pub json: bool,
}

impl DevicesCommand {
    /// List all usable devices
    pub async fn execute(&self, config: &AppConfig) -> Result<()> {
        let tools = sdk_tools(config);
        let adb = AdbClient::new(tools.adb, system_runner());
        let devices = adb.list_devices().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&devices)?);
        } else if devices.is_empty() {
            println!("No devices connected");
        } else {
            println!("Connected devices:");
            for device in devices {
                println!("  {} - {:?}", device.serial, device.kind);
            }
        }

        Ok(())
    }
}

/// Resolve command options
#[derive(Debug, Clone, Default)]
pub struct ResolveCommand {
    pub image_name: Option<String>,
    pub system_image: Option<String>,
    pub sink: Option<SinkArg>,
    pub output: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    /// Command run afterwards with the serial in its environment
    pub exec: Vec<String>,
}

impl ResolveCommand {
    /// Config with command-line overrides applied
    pub fn apply(&self, config: &AppConfig) -> Result<AppConfig> {
        let mut config = config.clone();

        if let Some(name) = &self.image_name {
            config.emulator.image_name = name.clone();
        }
        if let Some(image) = &self.system_image {
            config.emulator.system_image = image.clone();
        }
        if let Some(sink) = self.sink {
            config.publish.sink = sink.into();
        }
        if let Some(output) = &self.output {
            config.publish.file = output.clone();
            // --output alone implies the file sink
            if self.sink.is_none() {
                config.publish.sink = PublishKind::File;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolve a device and publish it
    pub async fn execute(&self, config: &AppConfig) -> Result<ResolvedTarget> {
        let config = self.apply(config)?;
        let target = resolve_device(&config, self.timeout_secs).await?;

        PublishSink::from_config(&config.publish)
            .publish(&target)
            .await
            .context("Failed to publish resolved device")?;

        Ok(target)
    }

    /// Run the trailing command with `<env_key>=<serial>` set and return its
    /// exit code, or `None` when no command was given
    pub async fn run_downstream(&self, config: &AppConfig, target: &ResolvedTarget) -> Result<Option<u8>> {
        let (program, args) = match self.exec.split_first() {
            Some(split) => split,
            None => return Ok(None),
        };

        let key = &config.publish.env_key;
        info!("Running {} with {}={}", program, key, target.serial);

        let status = tokio::process::Command::new(program)
            .args(args)
            .env(key, &target.serial)
            .status()
            .await
            .with_context(|| format!("Failed to run {}", program))?;

        let code = status.code().and_then(|c| u8::try_from(c).ok()).unwrap_or(1);
        if code != 0 {
            warn!("{} exited with {}", program, code);
        }
        Ok(Some(code))
    }
}

/// Instrumentation command options
#[derive(Debug, Clone, Default)]
pub struct InstrumentCommand {
    pub device: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl InstrumentCommand {
    /// Explicit serial, else the published one
    fn known_device(&self, env_key: &str) -> Option<String> {
        self.device.clone().or_else(|| {
            std::env::var(env_key)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
    }

    /// Run instrumentation and return the process exit code
    pub async fn execute(&self, config: &AppConfig) -> Result<u8> {
        let request = InstrumentationRequest::from_config(&config.instrumentation);
        if request.test_package.trim().is_empty() {
            bail!("instrumentation.test_package is not configured");
        }

        let serial = match self.known_device(&config.publish.env_key) {
            Some(serial) => serial,
            None => {
                info!("No device given, resolving one");
                resolve_device(config, self.timeout_secs).await?.serial
            }
        };

        let tools = sdk_tools(config);
        let runner = InstrumentationRunner::new(AdbClient::new(tools.adb, system_runner()));
        let report = runner.run(&serial, &request).await?;

        print!("{}", report.stdout);
        if !report.stderr.is_empty() {
            eprint!("{}", report.stderr);
        }

        Ok(if report.passed() { 0 } else { 1 })
    }
}

/// Shard command options
#[derive(Debug, Clone)]
pub struct ShardCommand {
    pub root: PathBuf,
    pub agents: usize,
    pub out: Option<PathBuf>,
}

impl ShardCommand {
    /// Write one test list per agent
    pub fn execute(&self, config: &AppConfig) -> Result<Vec<PathBuf>> {
        let sharder = Sharder::from_config(&config.sharding);
        let plan = sharder.plan(&self.root, self.agents)?;

        let out = self.out.as_ref().unwrap_or(&self.root);
        let files = sharder
            .write(&plan, out)
            .with_context(|| format!("Failed to write shards to {:?}", out))?;

        for file in &files {
            println!("{}", file.display());
        }
        Ok(files)
    }
}
