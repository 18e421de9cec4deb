//! Registry of in-flight research runs

use crate::research::state::Stage;
use crate::types::SessionStatus;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

struct SessionEntry {
    query: String,
    started_at: DateTime<Utc>,
    stage: Stage,
    error: Option<String>,
    cancel: Arc<AtomicBool>,
}

impl SessionEntry {
    fn status(&self, query_id: &str) -> SessionStatus {
        SessionStatus {
            query_id: query_id.to_string(),
            query: self.query.clone(),
            stage: if self.error.is_some() {
                "failed".to_string()
            } else {
                self.stage.to_string()
            },
            started_at: self.started_at,
            error: self.error.clone(),
        }
    }
}

/// Successful runs are removed when they finish; failed runs stay with their
/// error until the process exits.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new run and hand back its cancellation flag
    pub fn register(&self, query_id: &str, query: &str) -> Arc<AtomicBool> {
        let cancel = Arc::new(AtomicBool::new(false));
        self.sessions.write().insert(
            query_id.to_string(),
            SessionEntry {
                query: query.to_string(),
                started_at: Utc::now(),
                stage: Stage::Analyze,
                error: None,
                cancel: Arc::clone(&cancel),
            },
        );
        cancel
    }

    pub fn set_stage(&self, query_id: &str, stage: Stage) {
        if let Some(entry) = self.sessions.write().get_mut(query_id) {
            entry.stage = stage;
        }
    }

    pub fn fail(&self, query_id: &str, error: impl Into<String>) {
        if let Some(entry) = self.sessions.write().get_mut(query_id) {
            entry.error = Some(error.into());
        }
    }

    pub fn remove(&self, query_id: &str) {
        self.sessions.write().remove(query_id);
    }

    pub fn status(&self, query_id: &str) -> Option<SessionStatus> {
        self.sessions
            .read()
            .get(query_id)
            .map(|entry| entry.status(query_id))
    }

    /// All tracked sessions, oldest first
    pub fn list(&self) -> Vec<SessionStatus> {
        let mut sessions: Vec<SessionStatus> = self
            .sessions
            .read()
            .iter()
            .map(|(id, entry)| entry.status(id))
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    /// Flag a running session for cancellation. Returns false when the
    /// session is unknown or has already failed.
    pub fn cancel(&self, query_id: &str) -> bool {
        match self.sessions.read().get(query_id) {
            Some(entry) if entry.error.is_none() => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let registry = SessionRegistry::new();
        let flag = registry.register("q1", "what is rust");

        let status = registry.status("q1").unwrap();
        assert_eq!(status.stage, "analyze");
        assert_eq!(status.query, "what is rust");

        registry.set_stage("q1", Stage::Execute);
        assert_eq!(registry.status("q1").unwrap().stage, "execute");

        assert!(registry.cancel("q1"));
        assert!(flag.load(Ordering::SeqCst));

        registry.fail("q1", "Research cancelled");
        let status = registry.status("q1").unwrap();
        assert_eq!(status.stage, "failed");
        assert_eq!(status.error.as_deref(), Some("Research cancelled"));
        assert!(!registry.cancel("q1"));

        registry.remove("q1");
        assert!(registry.status("q1").is_none());
    }

    #[test]
    fn test_cancel_unknown_session() {
        let registry = SessionRegistry::new();
        assert!(!registry.cancel("missing"));
    }

    #[test]
    fn test_list() {
        let registry = SessionRegistry::new();
        registry.register("a", "first");
        registry.register("b", "second");
        assert_eq!(registry.list().len(), 2);
    }
}
