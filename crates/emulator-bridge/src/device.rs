//! Device Types and State
//!
//! Represents Android devices (physical and emulated) as reported by
//! `adb devices`.

use serde::{Deserialize, Serialize};

/// Serial prefix adb gives every emulator instance
pub const EMULATOR_SERIAL_PREFIX: &str = "emulator-";

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Device is online and authorized
    Online,
    /// Device is offline
    Offline,
    /// Device is not authorized (need to accept on device)
    Unauthorized,
    /// Any other state adb reports (bootloader, recovery, ...)
    Unknown,
}

impl ConnectionState {
    pub fn parse(token: &str) -> Self {
        match token {
            "device" => ConnectionState::Online,
            "offline" => ConnectionState::Offline,
            "unauthorized" => ConnectionState::Unauthorized,
            _ => ConnectionState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Online => "device",
            ConnectionState::Offline => "offline",
            ConnectionState::Unauthorized => "unauthorized",
            ConnectionState::Unknown => "unknown",
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionState::Online)
    }
}

/// Device kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceKind {
    /// Physical device connected via USB/WiFi
    Real,
    /// Android emulator
    Emulator,
}

impl DeviceKind {
    /// Classify a serial by the emulator naming convention
    pub fn from_serial(serial: &str) -> Self {
        if serial.starts_with(EMULATOR_SERIAL_PREFIX) {
            DeviceKind::Emulator
        } else {
            DeviceKind::Real
        }
    }
}

/// Device information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Device serial, the handle every other adb call uses
    pub serial: String,
    pub kind: DeviceKind,
    pub state: ConnectionState,
}

impl Device {
    pub fn new(serial: impl Into<String>, state: ConnectionState) -> Self {
        let serial = serial.into();
        Self {
            kind: DeviceKind::from_serial(&serial),
            serial,
            state,
        }
    }

    /// Check if device is online and usable
    pub fn is_usable(&self) -> bool {
        self.state.is_usable()
    }

    /// Check if this is an emulator
    pub fn is_emulator(&self) -> bool {
        self.kind == DeviceKind::Emulator
    }

    /// Console port of an emulator, parsed from its serial
    pub fn emulator_port(&self) -> Option<u16> {
        self.serial
            .strip_prefix(EMULATOR_SERIAL_PREFIX)
            .and_then(|port| port.parse().ok())
    }
}

/// Parse `adb devices` output into every device line it contains
///
/// The header line and daemon chatter (`* daemon started successfully`)
/// are skipped. Callers decide which states are actionable.
pub fn parse_device_list(output: &str) -> Vec<Device> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !line.starts_with("List of devices") && !line.starts_with('*'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(Device::new(serial, ConnectionState::parse(state)))
        })
        .collect()
}
