//! Panel run sessions
//!
//! Each results panel is keyed by a panel id. Running a query into a panel
//! that already exists reuses its display surface and message channel, but
//! the previous run is cancelled first so only one run per panel is ever
//! live.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::cancel::CancelHandle;
use crate::error::Result;
use crate::types::SourceDocument;

/// Capacity of a panel's message channel
const PANEL_MESSAGE_CAPACITY: usize = 64;

/// A display surface provided by the host platform
pub trait Surface: Send + Sync {
    fn id(&self) -> &str;
    fn is_visible(&self) -> bool;
    /// Bring the surface forward, optionally without taking focus
    fn reveal(&self, preserve_focus: bool);
}

/// Creates display surfaces
pub trait SurfaceHost: Send + Sync {
    fn create_surface(&self, kind: &str, title: &str) -> Result<Arc<dyn Surface>>;
}

/// Message channel to a panel
#[derive(Debug, Clone)]
pub struct PanelMessages {
    panel_id: String,
    tx: broadcast::Sender<Value>,
}

impl PanelMessages {
    pub fn new(panel_id: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(PANEL_MESSAGE_CAPACITY);
        Self {
            panel_id: panel_id.into(),
            tx,
        }
    }

    pub fn panel_id(&self) -> &str {
        &self.panel_id
    }

    /// Post a message; returns how many listeners received it
    pub fn post(&self, message: Value) -> usize {
        self.tx.send(message).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    /// Whether `other` is the same channel
    pub fn same_channel(&self, other: &PanelMessages) -> bool {
        self.tx.same_channel(&other.tx)
    }
}

/// State of the run currently bound to a panel
pub struct RunState {
    pub panel_id: String,
    pub surface: Arc<dyn Surface>,
    pub messages: PanelMessages,
    pub cancel: CancelHandle,
    pub document: SourceDocument,
}

impl std::fmt::Debug for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunState")
            .field("panel_id", &self.panel_id)
            .field("surface", &self.surface.id())
            .field("cancelled", &self.cancel.is_signalled())
            .field("document", &self.document)
            .finish()
    }
}

enum Binding {
    Reused(Arc<RunState>),
    Created(Arc<RunState>),
    Vacant,
}

/// Panel id to live run
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<RunState>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, panel_id: &str) -> Option<Arc<RunState>> {
        self.sessions.lock().get(panel_id).cloned()
    }

    /// Store `session`, returning the one it replaced
    pub fn set(&self, panel_id: impl Into<String>, session: Arc<RunState>) -> Option<Arc<RunState>> {
        self.sessions.lock().insert(panel_id.into(), session)
    }

    pub fn remove(&self, panel_id: &str) -> Option<Arc<RunState>> {
        self.sessions.lock().remove(panel_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    pub fn panel_ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Install a run for `panel_id` under one lock
    ///
    /// An existing run is cancelled and replaced, keeping its surface and
    /// channel. A vacant panel takes `surface` when one is given.
    fn bind(
        &self,
        panel_id: &str,
        cancel: &CancelHandle,
        document: &SourceDocument,
        surface: Option<Arc<dyn Surface>>,
    ) -> Binding {
        let mut sessions = self.sessions.lock();
        if let Some(slot) = sessions.get_mut(panel_id) {
            slot.cancel.signal();
            let session = Arc::new(RunState {
                panel_id: panel_id.to_string(),
                surface: slot.surface.clone(),
                messages: slot.messages.clone(),
                cancel: cancel.clone(),
                document: document.clone(),
            });
            *slot = session.clone();
            return Binding::Reused(session);
        }

        let Some(surface) = surface else {
            return Binding::Vacant;
        };
        let session = Arc::new(RunState {
            panel_id: panel_id.to_string(),
            surface,
            messages: PanelMessages::new(panel_id),
            cancel: cancel.clone(),
            document: document.clone(),
        });
        sessions.insert(panel_id.to_string(), session.clone());
        Binding::Created(session)
    }

    /// Cancel every live run and empty the registry
    pub fn clear(&self) {
        let drained: Vec<Arc<RunState>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.cancel.signal();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Cancelled panel sessions");
        }
    }
}

/// Bind a run to the panel `panel_id`, creating the panel if needed
///
/// For a new panel a surface is created through `host`; a creation failure
/// propagates and nothing is registered. For an existing panel the previous
/// run's cancel handle is signalled and the replacement stored under a single
/// registry lock, so concurrent callers each cancel a distinct predecessor.
/// The replacement keeps the surface and message channel but carries the new
/// `cancel` and `document`. A hidden surface is revealed without taking
/// focus.
pub fn create_or_reuse_session(
    registry: &SessionRegistry,
    host: &dyn SurfaceHost,
    kind: &str,
    title: &str,
    panel_id: &str,
    cancel: CancelHandle,
    document: SourceDocument,
) -> Result<Arc<RunState>> {
    let mut surface = None;
    loop {
        match registry.bind(panel_id, &cancel, &document, surface.take()) {
            Binding::Reused(session) => {
                if !session.surface.is_visible() {
                    session.surface.reveal(true);
                }
                debug!(panel_id = %panel_id, uri = %session.document.uri, "Reusing panel");
                return Ok(session);
            }
            Binding::Created(session) => {
                debug!(panel_id = %panel_id, uri = %session.document.uri, "Created panel");
                return Ok(session);
            }
            // Created outside the registry lock; the next bind cannot miss
            Binding::Vacant => surface = Some(host.create_surface(kind, title)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestSurface {
        id: String,
        visible: AtomicBool,
        reveals: Mutex<Vec<bool>>,
    }

    impl Surface for TestSurface {
        fn id(&self) -> &str {
            &self.id
        }

        fn is_visible(&self) -> bool {
            self.visible.load(Ordering::SeqCst)
        }

        fn reveal(&self, preserve_focus: bool) {
            self.reveals.lock().push(preserve_focus);
            self.visible.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct TestHost {
        created: AtomicUsize,
        fail: bool,
        surfaces: Mutex<Vec<Arc<TestSurface>>>,
    }

    impl SurfaceHost for TestHost {
        fn create_surface(&self, _kind: &str, title: &str) -> Result<Arc<dyn Surface>> {
            if self.fail {
                return Err(BridgeError::SurfaceCreation("host refused".to_string()));
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst);
            let surface = Arc::new(TestSurface {
                id: format!("{}-{}", title, n),
                visible: AtomicBool::new(true),
                reveals: Mutex::new(Vec::new()),
            });
            self.surfaces.lock().push(surface.clone());
            Ok(surface)
        }
    }

    fn doc(version: i64) -> SourceDocument {
        SourceDocument::new("file:///flights.malloy", version)
    }

    #[test]
    fn test_new_panel_creates_surface() {
        let registry = SessionRegistry::new();
        let host = TestHost::default();

        let session = create_or_reuse_session(
            &registry,
            &host,
            "malloyQuery",
            "flights",
            "p1",
            CancelHandle::new(),
            doc(1),
        )
        .unwrap();

        assert_eq!(host.created.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&registry.get("p1").unwrap(), &session));
    }

    #[test]
    fn test_reuse_cancels_previous_and_installs_new_document() {
        let registry = SessionRegistry::new();
        let host = TestHost::default();
        let first_cancel = CancelHandle::new();

        let first = create_or_reuse_session(
            &registry, &host, "malloyQuery", "flights", "p1", first_cancel.clone(), doc(1),
        )
        .unwrap();
        let second_cancel = CancelHandle::new();
        let second = create_or_reuse_session(
            &registry, &host, "malloyQuery", "flights", "p1", second_cancel.clone(), doc(2),
        )
        .unwrap();

        assert_eq!(first_cancel.signal_count(), 1);
        assert!(!second_cancel.is_signalled());
        assert_eq!(host.created.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first.surface, &second.surface));
        assert!(first.messages.same_channel(&second.messages));
        assert_eq!(second.document.version, 2);
        assert!(Arc::ptr_eq(&registry.get("p1").unwrap(), &second));
    }

    #[test]
    fn test_reuse_reveals_hidden_surface_without_focus() {
        let registry = SessionRegistry::new();
        let host = TestHost::default();
        create_or_reuse_session(
            &registry, &host, "malloyQuery", "t", "p1", CancelHandle::new(), doc(1),
        )
        .unwrap();

        let surface = host.surfaces.lock()[0].clone();
        surface.visible.store(false, Ordering::SeqCst);

        create_or_reuse_session(
            &registry, &host, "malloyQuery", "t", "p1", CancelHandle::new(), doc(2),
        )
        .unwrap();
        assert_eq!(*surface.reveals.lock(), vec![true]);

        // Already visible: no reveal
        create_or_reuse_session(
            &registry, &host, "malloyQuery", "t", "p1", CancelHandle::new(), doc(3),
        )
        .unwrap();
        assert_eq!(surface.reveals.lock().len(), 1);
    }

    #[test]
    fn test_surface_failure_registers_nothing() {
        let registry = SessionRegistry::new();
        let host = TestHost {
            fail: true,
            ..TestHost::default()
        };

        let result = create_or_reuse_session(
            &registry, &host, "malloyQuery", "t", "p1", CancelHandle::new(), doc(1),
        );
        assert!(matches!(result, Err(BridgeError::SurfaceCreation(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clear_signals_everything() {
        let registry = SessionRegistry::new();
        let host = TestHost::default();
        let a = CancelHandle::new();
        let b = CancelHandle::new();
        create_or_reuse_session(&registry, &host, "k", "t", "a", a.clone(), doc(1)).unwrap();
        create_or_reuse_session(&registry, &host, "k", "t", "b", b.clone(), doc(1)).unwrap();

        registry.clear();
        assert!(registry.is_empty());
        assert!(a.is_signalled());
        assert!(b.is_signalled());
    }

    #[test]
    fn test_concurrent_reuse_cancels_every_superseded_run() {
        let registry = Arc::new(SessionRegistry::new());
        let host = Arc::new(TestHost::default());
        create_or_reuse_session(&registry, &*host, "k", "t", "p", CancelHandle::new(), doc(0))
            .unwrap();

        for round in 0..50 {
            let cancels: Vec<CancelHandle> = (0..8).map(|_| CancelHandle::new()).collect();
            let threads: Vec<_> = cancels
                .iter()
                .cloned()
                .map(|cancel| {
                    let registry = registry.clone();
                    let host = host.clone();
                    std::thread::spawn(move || {
                        create_or_reuse_session(&registry, &*host, "k", "t", "p", cancel, doc(round))
                            .unwrap();
                    })
                })
                .collect();
            for thread in threads {
                thread.join().unwrap();
            }

            let live = registry.get("p").unwrap();
            let superseded: Vec<&CancelHandle> =
                cancels.iter().filter(|c| c.signal_count() > 0).collect();
            assert_eq!(superseded.len(), cancels.len() - 1, "round {}", round);
            assert!(superseded.iter().all(|c| c.signal_count() == 1));
            assert_eq!(live.cancel.signal_count(), 0);
        }
        assert_eq!(host.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_messages_reach_subscriber_across_reuse() {
        let registry = SessionRegistry::new();
        let host = TestHost::default();
        let first = create_or_reuse_session(
            &registry, &host, "k", "t", "p1", CancelHandle::new(), doc(1),
        )
        .unwrap();
        let mut rx = first.messages.subscribe();

        let second = create_or_reuse_session(
            &registry, &host, "k", "t", "p1", CancelHandle::new(), doc(2),
        )
        .unwrap();
        assert_eq!(second.messages.post(json!({"status": "running"})), 1);
        assert_eq!(rx.recv().await.unwrap(), json!({"status": "running"}));
    }
}
