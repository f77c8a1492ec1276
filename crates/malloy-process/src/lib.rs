//! # malloy-process
//!
//! **Purpose**: Lifecycle management for the out-of-process workers that the
//! Malloy controller talks to (the language server and the query worker).
//!
//! ## Features
//!
//! - **Process Spawning**: Async process creation with piped stdio for the RPC transport
//! - **Graceful Shutdown**: SIGTERM→SIGKILL escalation on the worker's process group
//! - **State Machine**: `Stopped → Starting → Running → (Crashed → Starting | Stopping → Stopped)`
//! - **Restart Policy**: Bounded or unbounded restart budget with exponential backoff
//!
//! ## Usage
//!
//! ```rust,no_run
//! use malloy_process::{ProcessConfig, RestartPolicy, Supervisor};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProcessConfig::new("node").args(["dist/server_node.js", "--stdio"]);
//! let mut supervisor = Supervisor::new("malloy-language-server", config, RestartPolicy::unbounded());
//!
//! let mut child = supervisor.start().await?;
//! supervisor.mark_running()?;
//!
//! let _stdin = child.stdin();
//! supervisor.stop(Some(child)).await?;
//! # Ok(())
//! # }
//! ```

pub mod child;
pub mod config;
pub mod error;
pub mod policy;
pub mod state;
pub mod supervisor;

pub use child::ManagedChild;
pub use config::ProcessConfig;
pub use error::{ProcessError, Result};
pub use policy::RestartPolicy;
pub use state::WorkerState;
pub use supervisor::Supervisor;
