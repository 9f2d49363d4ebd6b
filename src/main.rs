//! droid-target - Android device acquisition for instrumentation test runs
//!
//! Resolves one usable device (real hardware first, otherwise a freshly
//! booted emulator), publishes its serial and runs tests against it.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{debug, error, info};

use droid_target::commands::{
    DevicesCommand, InstrumentCommand, ResolveCommand, ShardCommand, SinkArg,
};
use droid_target::core::{AppConfig, APP_NAME, VERSION};

#[derive(Parser, Debug)]
#[command(name = "droid-target")]
#[command(about = "Acquire, boot and publish one Android device for a test run")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List usable devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve one device and publish its serial
    Resolve {
        /// Emulator image to use or create
        #[arg(long)]
        image_name: Option<String>,
        /// System image, e.g. android-25;google_apis;x86
        #[arg(long)]
        system_image: Option<String>,
        /// Where to publish the serial
        #[arg(long, value_enum)]
        sink: Option<SinkArg>,
        /// Output file for the file sink
        #[arg(long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Command to run with the serial in its environment (after `--`)
        #[arg(last = true, value_name = "COMMAND")]
        exec: Vec<String>,
    },

    /// Run instrumentation tests on the resolved device
    Instrument {
        /// Device serial (defaults to the published device, then a fresh resolution)
        #[arg(long)]
        device: Option<String>,
        /// Give up resolving after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Split test manifests across CI agents
    Shard {
        /// Directory searched for test manifests
        #[arg(long)]
        root: PathBuf,
        /// Number of agents
        #[arg(long)]
        agents: usize,
        /// Output directory for agent files (defaults to --root)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout is reserved for command output and the stdout sink
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    debug!("{} v{} starting", APP_NAME, VERSION);
    let config = match AppConfig::load(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e.user_message());
            return Err(e.into());
        }
    };

    match cli.command {
        Commands::Devices { json } => {
            DevicesCommand { json }.execute(&config).await?;
        }
        Commands::Resolve {
            image_name,
            system_image,
            sink,
            output,
            timeout_secs,
            exec,
        } => {
            let command = ResolveCommand {
                image_name,
                system_image,
                sink,
                output,
                timeout_secs,
                exec,
            };
            let target = command.execute(&config).await?;
            info!("Device ready: {}", target.serial);
            if let Some(code) = command.run_downstream(&config, &target).await? {
                return Ok(ExitCode::from(code));
            }
        }
        Commands::Instrument { device, timeout_secs } => {
            let code = InstrumentCommand { device, timeout_secs }.execute(&config).await?;
            return Ok(ExitCode::from(code));
        }
        Commands::Shard { root, agents, out } => {
            ShardCommand { root, agents, out }.execute(&config)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
