//! File request methods served to workers
//!
//! | Method                   | Result                 |
//! |--------------------------|------------------------|
//! | `malloy/fetchFile`       | document text          |
//! | `malloy/fetch`           | same as `fetchFile`    |
//! | `malloy/fetchBinaryFile` | bytes as a JSON array  |
//! | `malloy/fetchCellData`   | `[{uri, text}, ...]`   |
//!
//! Failures are propagated to the worker unchanged; there is no retry and no
//! fallback content.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};

use crate::dispatch::{Dispatcher, HandlerResult};
use crate::error::BridgeError;
use crate::file_handler::FileHandler;
use crate::protocol::JsonRpcError;
use crate::types::{FetchBinaryFileEvent, FetchCellDataEvent, FetchFileEvent};

pub const FETCH_FILE: &str = "malloy/fetchFile";
/// Older workers still send this name
pub const FETCH_LEGACY: &str = "malloy/fetch";
pub const FETCH_BINARY_FILE: &str = "malloy/fetchBinaryFile";
pub const FETCH_CELL_DATA: &str = "malloy/fetchCellData";

fn parse_params<T: DeserializeOwned>(
    method: &str,
    params: Option<Value>,
) -> Result<T, JsonRpcError> {
    let params = params.unwrap_or(Value::Null);
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid {} params: {}", method, e)))
}

fn reject(kind: &str, uri: &str, error: BridgeError) -> JsonRpcError {
    warn!(kind = %kind, uri = %uri, error = %error, "File request failed");
    error.to_rpc_error()
}

fn to_value<T: serde::Serialize>(value: T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

/// Installs the file request handlers
pub struct FileMessaging;

impl FileMessaging {
    /// Register every file method on `dispatcher`, answering from `handler`
    pub fn register(dispatcher: &Dispatcher, handler: Arc<dyn FileHandler>) {
        for method in [FETCH_FILE, FETCH_LEGACY] {
            let handler = handler.clone();
            dispatcher.register_fn(method, move |params| {
                let handler = handler.clone();
                async move {
                    let event: FetchFileEvent = parse_params(method, params)?;
                    info!(kind = "file", uri = %event.uri, "Fetching file");
                    match handler.fetch_file(&event.uri).await {
                        Ok(text) => Ok(Value::String(text)),
                        Err(e) => Err(reject("file", &event.uri, e)),
                    }
                }
            });
        }

        {
            let handler = handler.clone();
            dispatcher.register_fn(FETCH_BINARY_FILE, move |params| {
                let handler = handler.clone();
                async move {
                    let event: FetchBinaryFileEvent = parse_params(FETCH_BINARY_FILE, params)?;
                    info!(kind = "binary", uri = %event.uri, "Fetching binary file");
                    match handler.fetch_binary_file(&event.uri).await {
                        Ok(bytes) => to_value(bytes),
                        Err(e) => Err(reject("binary", &event.uri, e)),
                    }
                }
            });
        }

        dispatcher.register_fn(FETCH_CELL_DATA, move |params| {
            let handler = handler.clone();
            async move {
                let event: FetchCellDataEvent = parse_params(FETCH_CELL_DATA, params)?;
                info!(kind = "cell data", uri = %event.uri, "Fetching cell data");
                match handler.fetch_cell_data(&event.uri).await {
                    Ok(cells) => to_value(cells),
                    Err(e) => Err(reject("cell data", &event.uri, e)),
                }
            }
        });
    }

    /// Methods installed by [`FileMessaging::register`]
    pub fn methods() -> [&'static str; 4] {
        [FETCH_FILE, FETCH_LEGACY, FETCH_BINARY_FILE, FETCH_CELL_DATA]
    }
}
