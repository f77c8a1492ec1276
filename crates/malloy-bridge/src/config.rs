//! Controller configuration loading
//!
//! One YAML file describes the workers to run and the configuration pushed
//! to them:
//!
//! ```yaml
//! workspace_root: /home/me/project
//! config:
//!   rowLimit: 50
//!   downloadsPath: ~/Downloads/
//!   connections:
//!     - name: duckdb
//!       is: duckdb
//! workers:
//!   - name: language-server
//!     kind: language_server
//!     command: malloy-language-server
//!     args: ["--stdio"]
//!   - name: worker
//!     kind: worker
//!     command: malloy-worker
//!     restart:
//!       max_restarts: 5
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use malloy_process::{ProcessConfig, RestartPolicy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use crate::types::WorkerConfig;

/// What protocol a worker speaks after it starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Query worker; configured with a `malloy/config` notification
    Worker,
    /// Language server; goes through the `initialize` handshake first
    LanguageServer,
}

/// One worker process to supervise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    pub kind: WorkerKind,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub restart: RestartPolicy,
}

impl WorkerSpec {
    pub fn new(name: impl Into<String>, kind: WorkerKind, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            restart: RestartPolicy::default(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Process configuration for launching this worker from `working_dir`
    pub fn process_config(&self, working_dir: Option<&Path>) -> ProcessConfig {
        let mut config = ProcessConfig::new(&self.command).args(self.args.iter().cloned());
        if let Some(dir) = working_dir {
            config = config.working_dir(dir);
        }
        for (key, value) in &self.env {
            config = config.env(key, value);
        }
        config
    }
}

/// Everything the controller needs to start
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub workspace_root: Option<PathBuf>,
    #[serde(default)]
    pub config: WorkerConfig,
    #[serde(default)]
    pub workers: Vec<WorkerSpec>,
}

/// Loads and validates controller configuration
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a YAML file
    pub fn load_from_file(path: &Path) -> Result<ControllerConfig> {
        debug!(path = %path.display(), "Loading controller configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::load_from_string(&content)
    }

    /// Load configuration from a YAML string
    pub fn load_from_string(content: &str) -> Result<ControllerConfig> {
        let config: ControllerConfig = serde_yaml::from_str(content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse YAML: {}", e)))?;

        Self::validate(&config)?;

        info!(
            workers = config.workers.len(),
            connections = config.config.connections.len(),
            "Loaded controller configuration"
        );
        Ok(config)
    }

    /// Validate a parsed configuration
    pub fn validate(config: &ControllerConfig) -> Result<()> {
        Self::validate_worker_config(&config.config)?;

        let mut names = HashSet::new();
        for (idx, worker) in config.workers.iter().enumerate() {
            if worker.name.trim().is_empty() {
                return Err(BridgeError::InvalidConfiguration(format!(
                    "Worker {} has an empty name",
                    idx
                )));
            }
            if !names.insert(worker.name.as_str()) {
                return Err(BridgeError::InvalidConfiguration(format!(
                    "Duplicate worker name '{}'",
                    worker.name
                )));
            }
            if worker.command.trim().is_empty() {
                return Err(BridgeError::InvalidConfiguration(format!(
                    "Worker '{}' has an empty command",
                    worker.name
                )));
            }
        }

        Ok(())
    }

    /// Validate the part of the configuration pushed to workers
    pub fn validate_worker_config(config: &WorkerConfig) -> Result<()> {
        if config.row_limit == 0 {
            return Err(BridgeError::InvalidConfiguration(
                "rowLimit must be greater than 0".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for connection in &config.connections {
            if connection.name.trim().is_empty() {
                return Err(BridgeError::InvalidConfiguration(
                    "Connection with an empty name".to_string(),
                ));
            }
            if !names.insert(connection.name.as_str()) {
                return Err(BridgeError::InvalidConfiguration(format!(
                    "Duplicate connection name '{}'",
                    connection.name
                )));
            }
        }
        Ok(())
    }
}
