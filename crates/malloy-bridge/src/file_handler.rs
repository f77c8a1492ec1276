//! Resolving file requests
//!
//! [`WorkspaceFileHandler`] answers from the editor's authoritative state:
//! unsaved buffers win over disk, and notebook cells are served from the
//! registered notebooks. [`RemoteFileHandler`] is the worker-side view that
//! asks the controller for the same data over a connection.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};
use tracing::{debug, trace};
use url::Url;

use crate::connection::Connection;
use crate::error::{BridgeError, Result};
use crate::messaging::{FETCH_BINARY_FILE, FETCH_CELL_DATA, FETCH_FILE};
use crate::types::CellData;

/// Source of file contents for workers
#[async_trait]
pub trait FileHandler: Send + Sync {
    /// Current text of the document at `uri`
    async fn fetch_file(&self, uri: &str) -> Result<String>;

    /// Raw bytes of the document at `uri`
    async fn fetch_binary_file(&self, uri: &str) -> Result<Vec<u8>>;

    /// Cells of the notebook that owns `uri`, in notebook order
    async fn fetch_cell_data(&self, uri: &str) -> Result<Vec<CellData>>;
}

#[derive(Debug, Clone)]
struct OpenDocument {
    version: i64,
    text: String,
}

#[derive(Debug, Clone)]
struct Notebook {
    uri: String,
    path: String,
    cells: Vec<CellData>,
}

fn parse_uri(uri: &str) -> Result<Url> {
    Url::parse(uri).map_err(|e| BridgeError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })
}

/// File handler backed by editor buffers, notebooks and the filesystem
///
/// Never writes files.
#[derive(Debug, Default)]
pub struct WorkspaceFileHandler {
    documents: RwLock<HashMap<String, OpenDocument>>,
    notebooks: RwLock<HashMap<String, Notebook>>,
}

impl WorkspaceFileHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an open editor buffer
    pub fn open_document(&self, uri: impl Into<String>, version: i64, text: impl Into<String>) {
        let uri = uri.into();
        debug!(uri = %uri, version, "Document opened");
        self.documents.write().insert(
            uri,
            OpenDocument {
                version,
                text: text.into(),
            },
        );
    }

    /// Replace the text of an open buffer
    ///
    /// Stale versions are ignored. Returns whether the buffer was updated.
    pub fn update_document(&self, uri: &str, version: i64, text: impl Into<String>) -> bool {
        let mut documents = self.documents.write();
        match documents.get_mut(uri) {
            Some(doc) if version >= doc.version => {
                doc.version = version;
                doc.text = text.into();
                trace!(uri = %uri, version, "Document updated");
                true
            }
            Some(_) => false,
            None => {
                documents.insert(
                    uri.to_string(),
                    OpenDocument {
                        version,
                        text: text.into(),
                    },
                );
                true
            }
        }
    }

    /// Stop tracking a buffer; later fetches read from disk
    pub fn close_document(&self, uri: &str) -> bool {
        debug!(uri = %uri, "Document closed");
        self.documents.write().remove(uri).is_some()
    }

    pub fn document_version(&self, uri: &str) -> Option<i64> {
        self.documents.read().get(uri).map(|doc| doc.version)
    }

    /// Register (or replace) a notebook and its ordered cells
    pub fn open_notebook(&self, uri: impl Into<String>, cells: Vec<CellData>) -> Result<()> {
        let uri = uri.into();
        let path = parse_uri(&uri)?.path().to_string();
        debug!(uri = %uri, cells = cells.len(), "Notebook opened");
        self.notebooks
            .write()
            .insert(uri.clone(), Notebook { uri, path, cells });
        Ok(())
    }

    pub fn close_notebook(&self, uri: &str) -> bool {
        debug!(uri = %uri, "Notebook closed");
        self.notebooks.write().remove(uri).is_some()
    }

    fn cell_text(&self, uri: &str) -> Option<String> {
        self.notebooks.read().values().find_map(|notebook| {
            notebook
                .cells
                .iter()
                .find(|cell| cell.uri == uri)
                .map(|cell| cell.text.clone())
        })
    }

    fn overlay_text(&self, uri: &str) -> Option<String> {
        self.documents.read().get(uri).map(|doc| doc.text.clone())
    }

    async fn read_disk(&self, uri: &str, url: &Url) -> Result<Vec<u8>> {
        if url.scheme() != "file" {
            return Err(BridgeError::UnsupportedScheme {
                uri: uri.to_string(),
                scheme: url.scheme().to_string(),
            });
        }
        let path: PathBuf = url.to_file_path().map_err(|_| BridgeError::InvalidUri {
            uri: uri.to_string(),
            reason: "not a local file path".to_string(),
        })?;
        trace!(path = %path.display(), "Reading from disk");
        tokio::fs::read(&path)
            .await
            .map_err(|e| BridgeError::from_io(uri, e))
    }
}

#[async_trait]
impl FileHandler for WorkspaceFileHandler {
    async fn fetch_file(&self, uri: &str) -> Result<String> {
        let url = parse_uri(uri)?;

        if let Some(text) = self.overlay_text(uri) {
            return Ok(text);
        }
        if let Some(text) = self.cell_text(uri) {
            return Ok(text);
        }

        let bytes = self.read_disk(uri, &url).await?;
        String::from_utf8(bytes).map_err(|e| BridgeError::Decode {
            uri: uri.to_string(),
            reason: e.to_string(),
        })
    }

    async fn fetch_binary_file(&self, uri: &str) -> Result<Vec<u8>> {
        let url = parse_uri(uri)?;

        if let Some(text) = self.overlay_text(uri) {
            return Ok(text.into_bytes());
        }
        self.read_disk(uri, &url).await
    }

    async fn fetch_cell_data(&self, uri: &str) -> Result<Vec<CellData>> {
        let url = parse_uri(uri)?;
        let path = url.path();

        let notebooks = self.notebooks.read();
        notebooks
            .values()
            .find(|notebook| notebook.path == path)
            .map(|notebook| {
                trace!(notebook = %notebook.uri, "Resolved owning notebook");
                notebook.cells.clone()
            })
            .ok_or_else(|| BridgeError::NotFound {
                uri: uri.to_string(),
            })
    }
}

/// File handler that forwards every fetch to the controller
#[derive(Debug, Clone)]
pub struct RemoteFileHandler {
    connection: Connection,
}

impl RemoteFileHandler {
    pub fn new(connection: Connection) -> Self {
        Self { connection }
    }

    async fn request(&self, method: &str, uri: &str) -> Result<Value> {
        self.connection
            .send_request(method, Some(json!({ "uri": uri })))
            .await
    }
}

fn unexpected(method: &str, e: serde_json::Error) -> BridgeError {
    BridgeError::Protocol(format!("Unexpected {} result: {}", method, e))
}

#[async_trait]
impl FileHandler for RemoteFileHandler {
    async fn fetch_file(&self, uri: &str) -> Result<String> {
        let value = self.request(FETCH_FILE, uri).await?;
        serde_json::from_value(value).map_err(|e| unexpected(FETCH_FILE, e))
    }

    async fn fetch_binary_file(&self, uri: &str) -> Result<Vec<u8>> {
        let value = self.request(FETCH_BINARY_FILE, uri).await?;
        serde_json::from_value(value).map_err(|e| unexpected(FETCH_BINARY_FILE, e))
    }

    async fn fetch_cell_data(&self, uri: &str) -> Result<Vec<CellData>> {
        let value = self.request(FETCH_CELL_DATA, uri).await?;
        serde_json::from_value(value).map_err(|e| unexpected(FETCH_CELL_DATA, e))
    }
}
