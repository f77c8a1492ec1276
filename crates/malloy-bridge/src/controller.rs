//! The controller: wiring of workers, file requests, connections and panels

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::cancel::CancelHandle;
use crate::config::{ConfigLoader, ControllerConfig};
use crate::connections::{ApplyReport, ConnectionFactory, ConnectionManager};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::file_handler::WorkspaceFileHandler;
use crate::messaging::FileMessaging;
use crate::session::{create_or_reuse_session, RunState, SessionRegistry, SurfaceHost};
use crate::types::{SourceDocument, WorkerConfig};
use crate::worker::WorkerHost;

/// Owns every long-lived piece of the controller
pub struct Controller {
    files: Arc<WorkspaceFileHandler>,
    dispatcher: Dispatcher,
    connections: ConnectionManager,
    sessions: SessionRegistry,
    workers: Vec<Arc<WorkerHost>>,
    config: RwLock<WorkerConfig>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    /// Build a controller; no worker is started yet
    pub fn new(config: ControllerConfig) -> Result<Self> {
        Self::with_factory(config, ConnectionFactory::detect())
    }

    pub fn with_factory(config: ControllerConfig, factory: ConnectionFactory) -> Result<Self> {
        ConfigLoader::validate(&config)?;

        let files = Arc::new(WorkspaceFileHandler::new());
        let dispatcher = Dispatcher::new();
        FileMessaging::register(&dispatcher, files.clone());

        let mut connections = ConnectionManager::new(factory);
        if let Some(root) = &config.workspace_root {
            connections = connections.with_working_directory(root.display().to_string());
        }
        let report = connections.apply_config(&config.config);
        for (name, e) in &report.failed {
            warn!(connection = %name, error = %e, "Connection unavailable");
        }

        let workers = config
            .workers
            .iter()
            .cloned()
            .map(|spec| {
                Arc::new(WorkerHost::new(
                    spec,
                    dispatcher.clone(),
                    config.config.clone(),
                    config.workspace_root.clone(),
                ))
            })
            .collect();

        Ok(Self {
            files,
            dispatcher,
            connections,
            sessions: SessionRegistry::new(),
            workers,
            config: RwLock::new(config.config),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Start supervising every configured worker
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        for worker in &self.workers {
            let worker = worker.clone();
            let shutdown = self.shutdown.child_token();
            info!(worker = %worker.name(), kind = ?worker.kind(), "Starting worker");
            tasks.push(tokio::spawn(async move {
                if let Err(e) = worker.run(shutdown).await {
                    error!(worker = %worker.name(), error = %e, "Worker stopped permanently");
                }
            }));
        }
    }

    /// Install a new worker configuration
    ///
    /// The full configuration is pushed to every worker and the connection
    /// table is rebuilt, even when nothing changed.
    pub fn update_config(&self, config: WorkerConfig) -> Result<ApplyReport> {
        ConfigLoader::validate_worker_config(&config)?;
        *self.config.write() = config.clone();

        for worker in &self.workers {
            if let Err(e) = worker.push_config(config.clone()) {
                warn!(worker = %worker.name(), error = %e, "Failed to push configuration");
            }
        }
        Ok(self.connections.apply_config(&config))
    }

    /// Bind a new run to a results panel
    ///
    /// Any run already bound to `panel_id` is cancelled.
    pub fn open_panel(
        &self,
        host: &dyn SurfaceHost,
        kind: &str,
        title: &str,
        panel_id: &str,
        document: SourceDocument,
    ) -> Result<Arc<RunState>> {
        create_or_reuse_session(
            &self.sessions,
            host,
            kind,
            title,
            panel_id,
            CancelHandle::new(),
            document,
        )
    }

    /// Cancel every panel run, stop every worker and wait for them
    pub async fn shutdown(&self) {
        info!("Shutting down controller");
        self.sessions.clear();
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
    }

    pub fn files(&self) -> &Arc<WorkspaceFileHandler> {
        &self.files
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn workers(&self) -> &[Arc<WorkerHost>] {
        &self.workers
    }

    pub fn worker(&self, name: &str) -> Option<&Arc<WorkerHost>> {
        self.workers.iter().find(|w| w.name() == name)
    }

    pub fn config(&self) -> WorkerConfig {
        self.config.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{WorkerKind, WorkerSpec};
    use crate::connections::{ConnectionBackend, ConnectionConfig};
    use crate::error::BridgeError;
    use crate::session::Surface;
    use crate::messaging::FETCH_FILE;
    use crate::protocol::{JsonRpcRequest, RequestId};
    use serde_json::json;

    struct Panel;

    impl Surface for Panel {
        fn id(&self) -> &str {
            "panel"
        }
        fn is_visible(&self) -> bool {
            true
        }
        fn reveal(&self, _preserve_focus: bool) {}
    }

    struct Host;

    impl SurfaceHost for Host {
        fn create_surface(&self, _kind: &str, _title: &str) -> Result<Arc<dyn Surface>> {
            Ok(Arc::new(Panel))
        }
    }

    fn controller() -> Controller {
        let config = ControllerConfig {
            config: WorkerConfig {
                connections: vec![ConnectionConfig::new("duckdb", ConnectionBackend::DuckDb)],
                ..WorkerConfig::default()
            },
            workers: vec![WorkerSpec::new("worker", WorkerKind::Worker, "malloy-worker")],
            ..ControllerConfig::default()
        };
        Controller::with_factory(config, ConnectionFactory::new()).unwrap()
    }

    #[tokio::test]
    async fn test_file_methods_served_from_overlay() {
        let controller = controller();
        controller
            .files()
            .open_document("file:///w/a.malloy", 1, "source: a is duckdb.table('a.csv')");

        let response = controller
            .dispatcher()
            .dispatch(JsonRpcRequest::new(
                RequestId::Number(1),
                FETCH_FILE,
                Some(json!({"uri": "file:///w/a.malloy"})),
            ))
            .await;
        assert_eq!(
            response.into_result().unwrap(),
            json!("source: a is duckdb.table('a.csv')")
        );
    }

    #[test]
    fn test_initial_connections_built() {
        let controller = controller();
        assert_eq!(controller.connections().names(), vec!["duckdb".to_string()]);
        assert!(controller.worker("worker").is_some());
        assert!(controller.worker("other").is_none());
    }

    #[test]
    fn test_update_config_rejects_invalid() {
        let controller = controller();
        let result = controller.update_config(WorkerConfig {
            row_limit: 0,
            ..WorkerConfig::default()
        });
        assert!(matches!(result, Err(BridgeError::InvalidConfiguration(_))));
        assert_eq!(controller.config().row_limit, 50);
    }

    #[test]
    fn test_update_config_reaches_workers_and_connections() {
        let controller = controller();
        let config = WorkerConfig {
            row_limit: 500,
            connections: vec![ConnectionConfig::new("other", ConnectionBackend::DuckDb)],
            ..WorkerConfig::default()
        };
        let report = controller.update_config(config.clone()).unwrap();
        assert!(report.is_ok());
        assert_eq!(controller.connections().names(), vec!["other".to_string()]);
        assert_eq!(controller.worker("worker").unwrap().config(), config);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_panels() {
        let controller = controller();
        let run = controller
            .open_panel(&Host, "malloyQuery", "a", "p1", SourceDocument::new("file:///w/a.malloy", 1))
            .unwrap();
        controller.shutdown().await;
        assert!(run.cancel.is_signalled());
        assert!(controller.sessions().is_empty());
    }
}
