//! Property-based tests for panel sessions
//!
//! For any sequence of runs across a set of panels:
//! - each panel creates exactly one surface, however often it is reused
//! - every run but the latest on a panel has been cancelled exactly once
//! - runs on other panels are never touched

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use malloy_bridge::{
    create_or_reuse_session, CancelHandle, Result, SessionRegistry, SourceDocument, Surface,
    SurfaceHost,
};
use proptest::prelude::*;

struct CountingSurface {
    id: String,
}

impl Surface for CountingSurface {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_visible(&self) -> bool {
        true
    }

    fn reveal(&self, _preserve_focus: bool) {}
}

#[derive(Default)]
struct CountingHost {
    created: AtomicUsize,
}

impl SurfaceHost for CountingHost {
    fn create_surface(&self, _kind: &str, title: &str) -> Result<Arc<dyn Surface>> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(CountingSurface {
            id: format!("{}#{}", title, n),
        }))
    }
}

proptest! {
    #[test]
    fn prop_reuse_and_isolation(runs in proptest::collection::vec(0usize..4, 1..40)) {
        let registry = SessionRegistry::new();
        let host = CountingHost::default();
        let mut history: HashMap<String, Vec<CancelHandle>> = HashMap::new();

        for (version, panel) in runs.iter().enumerate() {
            let panel_id = format!("panel-{}", panel);
            let cancel = CancelHandle::new();
            let session = create_or_reuse_session(
                &registry,
                &host,
                "malloyQuery",
                &panel_id,
                &panel_id,
                cancel.clone(),
                SourceDocument::new("file:///model.malloy", version as i64),
            )
            .unwrap();

            prop_assert_eq!(session.document.version, version as i64);
            prop_assert!(!session.cancel.is_signalled());
            history.entry(panel_id).or_default().push(cancel);
        }

        prop_assert_eq!(host.created.load(Ordering::SeqCst), history.len());
        prop_assert_eq!(registry.len(), history.len());

        for (panel_id, cancels) in &history {
            let (latest, earlier) = cancels.split_last().unwrap();
            prop_assert_eq!(latest.signal_count(), 0, "latest run on {} was cancelled", panel_id);
            for cancel in earlier {
                prop_assert_eq!(cancel.signal_count(), 1);
            }
            let live = registry.get(panel_id).unwrap();
            prop_assert_eq!(live.cancel.signal_count(), 0);
        }
    }

    #[test]
    fn prop_surface_stable_across_reuse(reuses in 1usize..20) {
        let registry = SessionRegistry::new();
        let host = CountingHost::default();

        let first = create_or_reuse_session(
            &registry,
            &host,
            "malloyQuery",
            "t",
            "p",
            CancelHandle::new(),
            SourceDocument::new("file:///a.malloy", 0),
        )
        .unwrap();

        for i in 0..reuses {
            let next = create_or_reuse_session(
                &registry,
                &host,
                "malloyQuery",
                "t",
                "p",
                CancelHandle::new(),
                SourceDocument::new("file:///a.malloy", i as i64 + 1),
            )
            .unwrap();
            prop_assert!(Arc::ptr_eq(&first.surface, &next.surface));
            prop_assert!(first.messages.same_channel(&next.messages));
        }
        prop_assert_eq!(host.created.load(Ordering::SeqCst), 1);
    }
}
