//! droid-target core
//!
//! Configuration and shared error types used by the emulator bridge,
//! the test sharding utility and the command-line front end.

pub mod config;
pub mod error;

pub use config::{
    AndroidConfig, AppConfig, BootConfig, EmulatorConfig, InstrumentationConfig, PublishConfig,
    PublishKind, ShardingConfig, DEFAULT_DEVICE_ENV_KEY,
};
pub use error::{ConfigError, Result};

/// droid-target version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "droid-target";
