//! droid-target
//!
//! Picks the one Android device an instrumentation test run targets.
//!
//! ## Architecture
//!
//! - `droid-target-core`: configuration and shared errors
//! - `droid-target-emulator-bridge`: adb, avdmanager and emulator orchestration,
//!   boot polling, device resolution, publishing and instrumentation
//! - `droid-target-test-sharding`: splitting test manifests across CI agents

#![warn(clippy::all)]

pub mod commands;

// Re-export main components for library usage
pub use droid_target_core as core;
pub use droid_target_emulator_bridge as emulator;
pub use droid_target_test_sharding as sharding;

/// Prelude module for convenient imports
pub mod prelude {
    pub use droid_target_core::AppConfig;
    pub use droid_target_emulator_bridge::{
        DeviceResolver, InstrumentationRunner, PublishSink, ResolvedTarget, SdkTools,
        SystemToolRunner,
    };
    pub use droid_target_test_sharding::Sharder;
}
