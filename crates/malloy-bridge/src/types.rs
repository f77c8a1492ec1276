//! Wire types shared between the controller and its workers

use serde::{Deserialize, Serialize};

use crate::connections::ConnectionConfig;

/// Method used to push configuration to a worker
pub const CONFIG_METHOD: &str = "malloy/config";

/// Request for the text of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchFileEvent {
    pub uri: String,
}

/// Request for the raw bytes of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchBinaryFileEvent {
    pub uri: String,
}

/// Request for the cells of the notebook owning `uri`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchCellDataEvent {
    pub uri: String,
}

/// One notebook cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellData {
    pub uri: String,
    pub text: String,
}

impl CellData {
    pub fn new(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            text: text.into(),
        }
    }
}

/// The document a run was started from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub uri: String,
    pub version: i64,
}

impl SourceDocument {
    pub fn new(uri: impl Into<String>, version: i64) -> Self {
        Self {
            uri: uri.into(),
            version,
        }
    }
}

fn default_row_limit() -> u64 {
    50
}

fn default_downloads_path() -> String {
    "~/Downloads/".to_string()
}

/// Configuration pushed to every worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Maximum rows returned by a query run
    #[serde(default = "default_row_limit")]
    pub row_limit: u64,
    /// Where query results are downloaded to
    #[serde(default = "default_downloads_path")]
    pub downloads_path: String,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            row_limit: default_row_limit(),
            downloads_path: default_downloads_path(),
            connections: Vec::new(),
        }
    }
}

/// Payload of the `malloy/config` notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigPush {
    pub config: WorkerConfig,
}

impl ConfigPush {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }
}
