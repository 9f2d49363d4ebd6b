//! Test sharding
//!
//! Splits the tests listed in generated manifest files across CI agents.
//! Tests are ordered unit, integration, error-injection and then dealt out
//! round-robin, so every agent gets a similar mix and no agent ends up with
//! all of the slow categories.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use droid_target_core::ShardingConfig;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Sharding errors
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("Agent count must be at least 1")]
    NoAgents,
    #[error("Failed to walk {root:?}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Test category, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TestCategory {
    Unit,
    Integration,
    ErrorInjection,
}

/// Classifies test files by filename substring
#[derive(Debug, Clone)]
pub struct Classifier {
    unit: Vec<String>,
    integration: Vec<String>,
    error_injection: Vec<String>,
}

impl Classifier {
    pub fn new(unit: Vec<String>, integration: Vec<String>, error_injection: Vec<String>) -> Self {
        Self { unit, integration, error_injection }
    }

    pub fn from_config(config: &ShardingConfig) -> Self {
        Self::new(
            config.unit_markers.clone(),
            config.integration_markers.clone(),
            config.error_injection_markers.clone(),
        )
    }

    /// Most specific category first: error-injection tests usually also
    /// match the integration and unit markers.
    pub fn classify(&self, test: &str) -> Option<TestCategory> {
        let name = Path::new(test)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(test);
        let matches = |markers: &[String]| markers.iter().any(|m| name.contains(m.as_str()));

        if matches(&self.error_injection) {
            Some(TestCategory::ErrorInjection)
        } else if matches(&self.integration) {
            Some(TestCategory::Integration)
        } else if matches(&self.unit) {
            Some(TestCategory::Unit)
        } else {
            None
        }
    }

    /// Classify and order: unit, then integration, then error-injection
    pub fn order<I, S>(&self, tests: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unit = Vec::new();
        let mut integration = Vec::new();
        let mut error_injection = Vec::new();

        for test in tests {
            let test = test.into();
            match self.classify(&test) {
                Some(TestCategory::Unit) => unit.push(test),
                Some(TestCategory::Integration) => integration.push(test),
                Some(TestCategory::ErrorInjection) => error_injection.push(test),
                None => warn!("Skipping unclassified test {}", test),
            }
        }

        unit.into_iter()
            .chain(integration)
            .chain(error_injection)
            .collect()
    }
}

/// Deal `tests` round-robin: test `i` goes to agent `i mod agents`
pub fn distribute(tests: &[String], agents: usize) -> Result<Vec<Vec<String>>, ShardError> {
    if agents == 0 {
        return Err(ShardError::NoAgents);
    }

    let mut shards = vec![Vec::new(); agents];
    for (i, test) in tests.iter().enumerate() {
        shards[i % agents].push(test.clone());
    }
    Ok(shards)
}

/// Recursively find manifest files named `manifest_name`, sorted by path
pub fn find_manifests(root: &Path, manifest_name: &str) -> Result<Vec<PathBuf>, ShardError> {
    let mut manifests = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| ShardError::Walk { root: root.to_path_buf(), source })?;
        if entry.file_type().is_file() && entry.file_name() == manifest_name {
            debug!("Found manifest {:?}", entry.path());
            manifests.push(entry.into_path());
        }
    }

    Ok(manifests)
}

/// Entries of a manifest, split on newlines and commas
pub fn parse_manifest(contents: &str) -> Vec<String> {
    contents
        .split(['\n', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Result of sharding a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    /// Every classified test in assignment order
    pub ordered: Vec<String>,
    /// Tests per agent
    pub shards: Vec<Vec<String>>,
}

/// Sharding of the tests found under a directory
#[derive(Debug, Clone)]
pub struct Sharder {
    manifest_name: String,
    output_prefix: String,
    classifier: Classifier,
}

impl Sharder {
    pub fn new(manifest_name: &str, output_prefix: &str, classifier: Classifier) -> Self {
        Self {
            manifest_name: manifest_name.to_string(),
            output_prefix: output_prefix.to_string(),
            classifier,
        }
    }

    pub fn from_config(config: &ShardingConfig) -> Self {
        Self::new(
            &config.manifest_name,
            &config.output_prefix,
            Classifier::from_config(config),
        )
    }

    /// Collect, classify, order and distribute every test under `root`
    pub fn plan(&self, root: &Path, agents: usize) -> Result<ShardPlan, ShardError> {
        if agents == 0 {
            return Err(ShardError::NoAgents);
        }

        let mut seen = HashSet::new();
        let mut tests = Vec::new();

        for manifest in find_manifests(root, &self.manifest_name)? {
            let contents = std::fs::read_to_string(&manifest)
                .map_err(|source| ShardError::Io { path: manifest.clone(), source })?;
            for test in parse_manifest(&contents) {
                if seen.insert(test.clone()) {
                    tests.push(test);
                } else {
                    debug!("Duplicate test {} in {:?}", test, manifest);
                }
            }
        }

        let ordered = self.classifier.order(tests);
        let shards = distribute(&ordered, agents)?;
        info!("Sharded {} test(s) across {} agent(s)", ordered.len(), agents);

        Ok(ShardPlan { ordered, shards })
    }

    /// Write one comma-joined file per agent into `out_dir`
    pub fn write(&self, plan: &ShardPlan, out_dir: &Path) -> Result<Vec<PathBuf>, ShardError> {
        std::fs::create_dir_all(out_dir)
            .map_err(|source| ShardError::Io { path: out_dir.to_path_buf(), source })?;

        plan.shards
            .iter()
            .enumerate()
            .map(|(agent, tests)| {
                let path = out_dir.join(format!("{}{}.txt", self.output_prefix, agent));
                std::fs::write(&path, tests.join(","))
                    .map_err(|source| ShardError::Io { path: path.clone(), source })?;
                debug!("Agent {} gets {} test(s)", agent, tests.len());
                Ok(path)
            })
            .collect()
    }
}
