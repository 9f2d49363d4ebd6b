//! Instrumentation test invocation
//!
//! Runs `am instrument` on the resolved device and decides pass/fail from
//! the captured output.

use std::collections::BTreeMap;

use droid_target_core::InstrumentationConfig;
use tracing::{info, warn};

use crate::adb::{AdbClient, AdbError};

/// Marker `am instrument` prints when any test failed
pub const FAILURE_MARKER: &str = "Failures:";

/// What to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationRequest {
    pub test_package: String,
    pub runner: String,
    /// Passed to the runner as `-e key value`
    pub params: BTreeMap<String, String>,
}

impl InstrumentationRequest {
    pub fn from_config(config: &InstrumentationConfig) -> Self {
        Self {
            test_package: config.test_package.clone(),
            runner: config.runner.clone(),
            params: config.params.clone(),
        }
    }

    /// `<package>/<runner>`
    pub fn component(&self) -> String {
        format!("{}/{}", self.test_package, self.runner)
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec!["am".to_string(), "instrument".to_string(), "-w".to_string()];
        for (key, value) in &self.params {
            args.push("-e".to_string());
            args.push(key.clone());
            args.push(shell_quote(value));
        }
        args.push(self.component());
        args
    }
}

/// Outcome of one instrumentation run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentationReport {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl InstrumentationReport {
    pub fn passed(&self) -> bool {
        self.code == Some(0) && !self.stdout.contains(FAILURE_MARKER) && self.stderr.trim().is_empty()
    }

    /// Process exit code for the whole run: 0 on pass, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.passed() {
            0
        } else {
            1
        }
    }
}

/// Runs instrumentation tests through adb
#[derive(Debug, Clone)]
pub struct InstrumentationRunner {
    adb: AdbClient,
}

impl InstrumentationRunner {
    pub fn new(adb: AdbClient) -> Self {
        Self { adb }
    }

    pub async fn run(&self, serial: &str, request: &InstrumentationRequest) -> Result<InstrumentationReport, AdbError> {
        info!("Running {} on {}", request.component(), serial);

        let mut args = vec!["-s".to_string(), serial.to_string(), "shell".to_string()];
        args.extend(request.args());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self.adb.run_raw(&args).await?;
        let report = InstrumentationReport {
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        };

        if report.passed() {
            info!("Instrumentation passed on {}", serial);
        } else {
            warn!("Instrumentation failed on {}", serial);
        }

        Ok(report)
    }
}

/// Single-quote a value for the device shell
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
