//! Controller-side integration layer for Malloy workers
//!
//! Workers (the language server and the query worker) compile and run Malloy
//! out of process. They cannot see the editor's live state: unsaved buffers,
//! notebook cells and virtual documents. Whenever a worker needs file
//! contents it asks the controller over its JSON-RPC transport, and the
//! controller answers from the authoritative source.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Controller ────────────────────────────┐
//! │                                                                    │
//! │  SessionRegistry ── panel id → RunState (surface, messages, cancel)│
//! │                                                                    │
//! │  ConnectionManager ◄── WorkerConfig push ──┐                       │
//! │                                            │                       │
//! │  WorkerHost (Supervisor + Connection) ─────┤                       │
//! │     │  malloy/config, initialize           │                       │
//! │     ▼                                      │                       │
//! │  Dispatcher ── malloy/fetchFile ──► FileMessaging ──► FileHandler  │
//! │             ── malloy/fetchBinaryFile                (overlay,     │
//! │             ── malloy/fetchCellData                   notebooks,   │
//! │             ── malloy/fetch (legacy)                  disk)        │
//! └────────────────────────────────────────────────────────────────────┘
//!            ▲  Content-Length framed JSON-RPC over stdio
//!            ▼
//!      worker process (compiler / query execution)
//! ```
//!
//! # Module Organization
//!
//! - `protocol`, `transport`, `connection`, `dispatch`: JSON-RPC plumbing
//! - `file_handler`, `messaging`: the file-request bridge
//! - `worker`, `capabilities`: worker lifecycle and handshake
//! - `session`, `cancel`: panel run sessions
//! - `config`, `connections`, `bytes`: worker configuration
//! - `controller`: wiring of all of the above

pub mod bytes;
pub mod cancel;
pub mod capabilities;
pub mod config;
pub mod connection;
pub mod connections;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod file_handler;
pub mod messaging;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;
pub mod worker;

pub use bytes::convert_to_bytes;
pub use cancel::CancelHandle;
pub use capabilities::{CapabilityNegotiator, ClientCapabilities, ServerCapabilities};
pub use config::{ConfigLoader, ControllerConfig, WorkerKind, WorkerSpec};
pub use connection::Connection;
pub use connections::{
    ApplyReport, ConfigOptions, ConnectionBackend, ConnectionConfig, ConnectionFactory,
    ConnectionManager, DuckDbConnection,
};
pub use controller::Controller;
pub use dispatch::{Dispatcher, HandlerResult, RequestHandler};
pub use error::{BridgeError, Result};
pub use file_handler::{FileHandler, RemoteFileHandler, WorkspaceFileHandler};
pub use messaging::FileMessaging;
pub use protocol::{
    JsonRpcError, JsonRpcHandler, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId,
};
pub use session::{
    create_or_reuse_session, PanelMessages, RunState, SessionRegistry, Surface, SurfaceHost,
};
pub use transport::{MessageReader, MessageWriter};
pub use types::{
    CellData, ConfigPush, FetchBinaryFileEvent, FetchCellDataEvent,
    FetchFileEvent, SourceDocument, WorkerConfig,
};
pub use worker::WorkerHost;
