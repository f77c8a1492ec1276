//! Database connections built from worker configuration
//!
//! The controller hosts only the embedded engine; remote warehouses are
//! reached by the workers themselves. Construction either yields a complete
//! connection or fails immediately with a construction error.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bytes::convert_to_bytes;
use crate::error::{BridgeError, Result};
use crate::types::WorkerConfig;

/// Path that selects an in-memory embedded database
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Database backend of a configured connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionBackend {
    DuckDb,
    BigQuery,
    Postgres,
}

impl fmt::Display for ConnectionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionBackend::DuckDb => "duckdb",
            ConnectionBackend::BigQuery => "bigquery",
            ConnectionBackend::Postgres => "postgres",
        };
        f.write_str(name)
    }
}

/// One entry of `connections` in the worker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub name: String,
    pub is: ConnectionBackend,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    /// Billing cap, either bytes or a size such as `10g`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_bytes_billed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
}

impl ConnectionConfig {
    pub fn new(name: impl Into<String>, is: ConnectionBackend) -> Self {
        Self {
            name: name.into(),
            is,
            working_directory: None,
            maximum_bytes_billed: None,
            project_id: None,
            location: None,
            host: None,
            port: None,
            database_name: None,
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn with_maximum_bytes_billed(mut self, value: impl Into<String>) -> Self {
        self.maximum_bytes_billed = Some(value.into());
        self
    }

    /// Copy with human-readable sizes expanded to byte counts
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        config.maximum_bytes_billed = self
            .maximum_bytes_billed
            .as_deref()
            .map(convert_to_bytes);
        config
    }
}

/// Settings shared by every connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOptions {
    pub row_limit: u64,
    /// Used when a connection has no working directory of its own
    pub working_directory: Option<String>,
}

impl ConfigOptions {
    pub fn new(row_limit: u64) -> Self {
        Self {
            row_limit,
            working_directory: None,
        }
    }

    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }
}

/// An embedded database connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuckDbConnection {
    pub name: String,
    pub database_path: String,
    pub working_directory: Option<String>,
    pub row_limit: u64,
}

/// Builds connections from configuration
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    engine_available: bool,
}

impl ConnectionFactory {
    /// Factory for a host where the embedded engine can run
    pub fn new() -> Self {
        Self {
            engine_available: true,
        }
    }

    /// Factory for the current host
    ///
    /// The embedded engine ships for 64-bit desktop targets only.
    pub fn detect() -> Self {
        let supported = cfg!(any(
            all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")),
            all(target_os = "macos", any(target_arch = "x86_64", target_arch = "aarch64")),
            all(target_os = "windows", target_arch = "x86_64"),
        ));
        Self {
            engine_available: supported,
        }
    }

    pub fn with_engine_available(mut self, available: bool) -> Self {
        self.engine_available = available;
        self
    }

    pub fn engine_available(&self) -> bool {
        self.engine_available
    }

    pub fn create(
        &self,
        config: &ConnectionConfig,
        options: &ConfigOptions,
    ) -> Result<DuckDbConnection> {
        if config.name.trim().is_empty() {
            return Err(BridgeError::InvalidConnection(
                "connection name must not be empty".to_string(),
            ));
        }

        match config.is {
            ConnectionBackend::DuckDb => {
                if !self.engine_available {
                    return Err(BridgeError::EngineUnavailable {
                        engine: "DuckDB".to_string(),
                    });
                }
                let working_directory = config
                    .working_directory
                    .clone()
                    .filter(|dir| !dir.is_empty())
                    .or_else(|| options.working_directory.clone());
                debug!(
                    name = %config.name,
                    working_directory = ?working_directory,
                    "Creating in-memory connection"
                );
                Ok(DuckDbConnection {
                    name: config.name.clone(),
                    database_path: IN_MEMORY_DATABASE.to_string(),
                    working_directory,
                    row_limit: options.row_limit,
                })
            }
            other => Err(BridgeError::UnsupportedBackend {
                name: config.name.clone(),
                backend: other.to_string(),
            }),
        }
    }
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of applying a configuration
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Names of connections now available
    pub created: Vec<String>,
    /// Connections that could not be built, with the reason
    pub failed: Vec<(String, BridgeError)>,
}

impl ApplyReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Named connections built from the latest configuration
#[derive(Debug)]
pub struct ConnectionManager {
    factory: ConnectionFactory,
    working_directory: Option<String>,
    connections: RwLock<BTreeMap<String, Arc<DuckDbConnection>>>,
    settings: RwLock<Vec<ConnectionConfig>>,
}

impl ConnectionManager {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self {
            factory,
            working_directory: None,
            connections: RwLock::new(BTreeMap::new()),
            settings: RwLock::new(Vec::new()),
        }
    }

    /// Default working directory for connections that set none
    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Rebuild the connection table from a full configuration
    ///
    /// The previous table is replaced, never merged.
    pub fn apply_config(&self, config: &WorkerConfig) -> ApplyReport {
        let mut options = ConfigOptions::new(config.row_limit);
        options.working_directory = self.working_directory.clone();

        let mut report = ApplyReport::default();
        let mut table = BTreeMap::new();
        let mut settings = Vec::with_capacity(config.connections.len());

        for connection in &config.connections {
            let normalized = connection.normalized();
            match self.factory.create(&normalized, &options) {
                Ok(built) => {
                    report.created.push(built.name.clone());
                    table.insert(built.name.clone(), Arc::new(built));
                }
                Err(BridgeError::UnsupportedBackend { .. }) => {
                    // Served by the workers; keep the settings only
                    debug!(name = %normalized.name, backend = %normalized.is, "Connection handled by worker");
                }
                Err(e) => {
                    warn!(name = %normalized.name, error = %e, "Failed to create connection");
                    report.failed.push((normalized.name.clone(), e));
                }
            }
            settings.push(normalized);
        }

        *self.connections.write() = table;
        *self.settings.write() = settings;
        info!(
            created = report.created.len(),
            failed = report.failed.len(),
            "Applied connection configuration"
        );
        report
    }

    pub fn get(&self, name: &str) -> Option<Arc<DuckDbConnection>> {
        self.connections.read().get(name).cloned()
    }

    /// Names of built connections, sorted
    pub fn names(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    /// Normalised settings of every configured connection
    pub fn settings(&self) -> Vec<ConnectionConfig> {
        self.settings.read().clone()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(ConnectionFactory::detect())
    }
}
