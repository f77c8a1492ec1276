//! Worker hosting
//!
//! A [`WorkerHost`] keeps one worker process alive: it spawns the process
//! through a [`Supervisor`], serves the shared dispatch table over the
//! process's stdio, performs the handshake for the worker's kind and restarts
//! the worker according to its restart policy when it dies.

use std::path::PathBuf;

use malloy_process::{ManagedChild, Supervisor, WorkerState};
use parking_lot::RwLock;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::capabilities::CapabilityNegotiator;
use crate::config::{WorkerKind, WorkerSpec};
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::error::{BridgeError, Result};
use crate::types::{ConfigPush, WorkerConfig, CONFIG_METHOD};

const DID_CHANGE_CONFIGURATION: &str = "workspace/didChangeConfiguration";

enum Exit {
    Shutdown,
    Crashed(String),
}

/// Supervises one worker and its connection
pub struct WorkerHost {
    spec: WorkerSpec,
    root_uri: Option<String>,
    dispatcher: Dispatcher,
    config: RwLock<WorkerConfig>,
    connection: RwLock<Option<Connection>>,
    supervisor: Mutex<Supervisor>,
    state_rx: watch::Receiver<WorkerState>,
}

impl WorkerHost {
    /// Host for `spec`, serving `dispatcher` and configured with `config`
    ///
    /// The worker is started from `workspace_root` when given.
    pub fn new(
        spec: WorkerSpec,
        dispatcher: Dispatcher,
        config: WorkerConfig,
        workspace_root: Option<PathBuf>,
    ) -> Self {
        let process = spec.process_config(workspace_root.as_deref());
        let supervisor = Supervisor::new(spec.name.clone(), process, spec.restart);
        let state_rx = supervisor.subscribe();
        let root_uri = workspace_root
            .as_deref()
            .and_then(|root| url::Url::from_directory_path(root).ok())
            .map(|url| url.to_string());

        Self {
            spec,
            root_uri,
            dispatcher,
            config: RwLock::new(config),
            connection: RwLock::new(None),
            supervisor: Mutex::new(supervisor),
            state_rx,
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn kind(&self) -> WorkerKind {
        self.spec.kind
    }

    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    /// Connection to the worker while it is running
    pub fn connection(&self) -> Option<Connection> {
        if !self.state().is_running() {
            return None;
        }
        self.connection.read().clone()
    }

    pub async fn restart_count(&self) -> u32 {
        self.supervisor.lock().await.restart_count()
    }

    /// Send a request to the worker
    ///
    /// Fails with `WorkerUnavailable` unless the worker is running.
    pub async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let connection = self.connection().ok_or_else(|| BridgeError::WorkerUnavailable {
            name: self.spec.name.clone(),
        })?;
        connection.send_request(method, params).await
    }

    /// Replace the worker's configuration and send it in full
    ///
    /// A worker that is not running receives the configuration during its
    /// next handshake.
    pub fn push_config(&self, config: WorkerConfig) -> Result<()> {
        *self.config.write() = config.clone();

        match self.connection() {
            Some(connection) => {
                info!(worker = %self.spec.name, "Pushing configuration");
                self.send_config(&connection, &config)
            }
            None => {
                debug!(worker = %self.spec.name, "Worker not running, configuration deferred");
                Ok(())
            }
        }
    }

    /// Current configuration
    pub fn config(&self) -> WorkerConfig {
        self.config.read().clone()
    }

    fn send_config(&self, connection: &Connection, config: &WorkerConfig) -> Result<()> {
        match self.spec.kind {
            WorkerKind::Worker => {
                let push = serde_json::to_value(ConfigPush::new(config.clone()))
                    .map_err(|e| BridgeError::Protocol(e.to_string()))?;
                connection.send_notification(CONFIG_METHOD, Some(push))
            }
            WorkerKind::LanguageServer => connection.send_notification(
                DID_CHANGE_CONFIGURATION,
                Some(json!({ "settings": { "malloy": config } })),
            ),
        }
    }

    /// Run the handshake for this worker kind, returning the configuration sent
    async fn handshake(&self, connection: &Connection) -> Result<WorkerConfig> {
        let config = self.config();

        if self.spec.kind == WorkerKind::LanguageServer {
            let options = serde_json::to_value(&config)
                .map_err(|e| BridgeError::Protocol(e.to_string()))?;
            let params = CapabilityNegotiator::create_initialize_params(
                Some(std::process::id()),
                self.root_uri.clone(),
                options,
            );
            let result = connection.send_request("initialize", Some(params)).await?;
            let capabilities = CapabilityNegotiator::parse_initialize_result(&result);
            debug!(
                worker = %self.spec.name,
                capabilities = ?CapabilityNegotiator::get_supported_capabilities(&capabilities),
                "Language server initialized"
            );
            connection.send_notification("initialized", Some(json!({})))?;
        }

        self.send_config(connection, &config)?;
        Ok(config)
    }

    /// Keep the worker running until `shutdown` is cancelled
    ///
    /// Returns an error when the restart policy gives up.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        while !shutdown.is_cancelled() {
            let started = self.supervisor.lock().await.start().await;
            let exit = match started {
                Ok(child) => self.serve(child, &shutdown).await?,
                Err(e) => Exit::Crashed(e.to_string()),
            };

            match exit {
                Exit::Shutdown => break,
                Exit::Crashed(reason) => {
                    debug!(worker = %self.spec.name, reason = %reason, "Worker exited");
                    if !self.wait_before_restart(&shutdown).await? {
                        return Ok(());
                    }
                }
            }
        }

        self.supervisor.lock().await.stop(None).await?;
        Ok(())
    }

    /// Serve one worker process until it exits or shutdown is requested
    async fn serve(&self, mut child: ManagedChild, shutdown: &CancellationToken) -> Result<Exit> {
        let (Some(stdout), Some(stdin)) = (child.stdout(), child.stdin()) else {
            let _ = child.shutdown().await;
            self.supervisor
                .lock()
                .await
                .mark_crashed("worker stdio unavailable")?;
            return Ok(Exit::Crashed("worker stdio unavailable".to_string()));
        };
        if let Some(stderr) = child.stderr() {
            let name = self.spec.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(worker = %name, "{}", line);
                }
            });
        }

        let connection = Connection::start(
            self.spec.name.clone(),
            stdout,
            stdin,
            self.dispatcher.clone(),
        );

        let handshake = tokio::select! {
            _ = shutdown.cancelled() => None,
            status = child.wait() => Some(Err(format!("exited during handshake: {:?}", status))),
            result = self.handshake(&connection) => Some(result.map_err(|e| e.to_string())),
        };

        let exit = match handshake {
            None => Exit::Shutdown,
            Some(Err(reason)) => Exit::Crashed(reason),
            Some(Ok(sent)) => {
                *self.connection.write() = Some(connection.clone());
                self.supervisor.lock().await.mark_running()?;
                info!(worker = %self.spec.name, pid = child.pid(), "Worker running");

                // A push that raced the handshake was deferred
                let current = self.config();
                if current != sent {
                    if let Err(e) = self.send_config(&connection, &current) {
                        warn!(worker = %self.spec.name, error = %e, "Failed to push configuration");
                    }
                }

                tokio::select! {
                    _ = shutdown.cancelled() => Exit::Shutdown,
                    status = child.wait() => Exit::Crashed(format!("exited: {:?}", status)),
                    _ = connection.closed() => Exit::Crashed("transport closed".to_string()),
                }
            }
        };

        self.connection.write().take();
        connection.shutdown();

        let mut supervisor = self.supervisor.lock().await;
        match exit {
            Exit::Shutdown => {
                supervisor.stop(Some(child)).await?;
            }
            Exit::Crashed(ref reason) => {
                supervisor.mark_crashed(reason)?;
                if let Err(e) = child.shutdown().await {
                    warn!(worker = %self.spec.name, error = %e, "Failed to reap crashed worker");
                }
            }
        }
        Ok(exit)
    }

    /// Apply the restart policy; `false` means shutdown was requested
    async fn wait_before_restart(&self, shutdown: &CancellationToken) -> Result<bool> {
        let backoff = {
            let mut supervisor = self.supervisor.lock().await;
            match supervisor.prepare_restart() {
                Ok(backoff) => backoff,
                Err(e) => {
                    error!(worker = %self.spec.name, error = %e, "Giving up on worker");
                    supervisor.stop(None).await?;
                    return Err(e.into());
                }
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => {
                self.supervisor.lock().await.stop(None).await?;
                Ok(false)
            }
            _ = tokio::time::sleep(backoff) => Ok(true),
        }
    }
}

impl std::fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHost")
            .field("name", &self.spec.name)
            .field("kind", &self.spec.kind)
            .field("state", &self.state())
            .finish()
    }
}
