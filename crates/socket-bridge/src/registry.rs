use std::sync::Arc;

use dashmap::DashMap;

use crate::session::SessionId;
use crate::upstream::UpstreamHandle;

struct RegistryEntry {
    session_id: SessionId,
    handle: Arc<dyn UpstreamHandle>,
}

/// Maps a requested target URL to the upstream session serving it, so that
/// authentication responses arriving out of band reach the right session.
///
/// Created empty, filled when sessions open and drained as they tear down.
/// Nothing is persisted. Cloning shares the same underlying map.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    entries: Arc<DashMap<String, RegistryEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under `target_url`, replacing any previous entry.
    pub fn put(&self, target_url: &str, session_id: SessionId, handle: Arc<dyn UpstreamHandle>) {
        let previous = self
            .entries
            .insert(target_url.to_string(), RegistryEntry { session_id, handle });
        if let Some(previous) = previous {
            tracing::debug!(
                target_url,
                %session_id,
                replaced = %previous.session_id,
                "registry entry replaced by newer session"
            );
        }
    }

    pub fn get(&self, target_url: &str) -> Option<Arc<dyn UpstreamHandle>> {
        self.entries
            .get(target_url)
            .map(|entry| Arc::clone(&entry.handle))
    }

    /// Remove the entry for `target_url` if it still belongs to `session_id`.
    /// Returns `true` if an entry was removed.
    pub fn delete(&self, target_url: &str, session_id: SessionId) -> bool {
        self.entries
            .remove_if(target_url, |_, entry| entry.session_id == session_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHandle {
        credentials: Mutex<Vec<(String, String)>>,
    }

    impl UpstreamHandle for RecordingHandle {
        fn authenticate(&self, username: &str, password: &str) {
            self.credentials
                .lock()
                .unwrap()
                .push((username.to_string(), password.to_string()));
        }

        fn close(&self) {}
    }

    #[test]
    fn put_get_delete() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        let handle = Arc::new(RecordingHandle::default());

        registry.put("rtmp://a/live", id, handle.clone());
        assert_eq!(registry.len(), 1);

        registry
            .get("rtmp://a/live")
            .expect("entry present")
            .authenticate("user", "pass");
        assert_eq!(handle.credentials.lock().unwrap().len(), 1);

        assert!(registry.delete("rtmp://a/live", id));
        assert!(registry.get("rtmp://a/live").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn delete_is_idempotent() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.put("rtmp://a/live", id, Arc::new(RecordingHandle::default()));

        assert!(registry.delete("rtmp://a/live", id));
        assert!(!registry.delete("rtmp://a/live", id));
    }

    #[test]
    fn stale_session_cannot_delete_newer_entry() {
        let registry = SessionRegistry::new();
        let older = SessionId::new();
        let newer = SessionId::new();

        registry.put("rtmp://a/live", older, Arc::new(RecordingHandle::default()));
        registry.put("rtmp://a/live", newer, Arc::new(RecordingHandle::default()));

        assert!(!registry.delete("rtmp://a/live", older));
        assert!(registry.get("rtmp://a/live").is_some());
        assert!(registry.delete("rtmp://a/live", newer));
    }

    #[test]
    fn keys_are_independent() {
        let registry = SessionRegistry::new();
        let a = SessionId::new();
        let b = SessionId::new();
        registry.put("rtmp://a/live", a, Arc::new(RecordingHandle::default()));
        registry.put("rtmp://b/live", b, Arc::new(RecordingHandle::default()));

        assert!(registry.delete("rtmp://a/live", a));
        assert!(registry.get("rtmp://b/live").is_some());
    }
}
