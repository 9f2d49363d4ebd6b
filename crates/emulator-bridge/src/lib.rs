//! Android Emulator Bridge
//!
//! Finds a usable device for a test run, creating and booting an emulator
//! when no real hardware is attached.

pub mod adb;
pub mod avd;
pub mod boot;
pub mod device;
pub mod emulator;
pub mod instrument;
pub mod publish;
pub mod resolver;
pub mod tool;

pub use adb::{AdbClient, AdbError};
pub use avd::{AvdConfig, AvdError, AvdManager, EmulatorImage, SystemImageSpec};
pub use boot::{BootError, BootPolicy, BootWaiter};
pub use device::{ConnectionState, Device, DeviceKind};
pub use emulator::{EmulatorError, EmulatorLauncher, EmulatorOptions, LaunchHandle};
pub use instrument::{InstrumentationReport, InstrumentationRequest, InstrumentationRunner};
pub use publish::{PublishError, PublishSink};
pub use resolver::{DeviceResolver, ResolveError, ResolvedTarget, ResolverConfig, Stage};
pub use tool::{SdkTools, SystemToolRunner, ToolOutput, ToolRunner};

/// Emulator console port range (even ports; adb uses port + 1)
pub const EMULATOR_PORT_RANGE: std::ops::Range<u16> = 5554..5586;
