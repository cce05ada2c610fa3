//! Process-wide peer registry.
//!
//! Maps logical peer names to sessions in a lock-free concurrent map.
//! Sessions are created on first outbound intent or first inbound
//! registration and removed on terminal break, or when first contact to
//! the peer never succeeds.

use std::sync::Arc;

use dashmap::DashMap;

use super::peer::PeerSession;

/// Peer-name → session map. Cheap to clone.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    sessions: Arc<DashMap<String, Arc<PeerSession>>>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the session for a peer, creating it on demand.
    pub fn get_or_create(&self, peer: &str) -> Arc<PeerSession> {
        self.sessions
            .entry(peer.to_string())
            .or_insert_with(|| PeerSession::new(peer))
            .clone()
    }

    /// Get an existing session.
    pub fn get(&self, peer: &str) -> Option<Arc<PeerSession>> {
        self.sessions.get(peer).map(|entry| entry.clone())
    }

    /// Remove a terminally broken session.
    pub fn remove(&self, peer: &str) -> Option<Arc<PeerSession>> {
        self.sessions.remove(peer).map(|(_, session)| session)
    }

    /// Drop all sessions (endpoint shutdown).
    pub fn clear(&self) {
        self.sessions.clear();
    }

    /// Names of currently registered peers.
    pub fn peer_names(&self) -> Vec<String> {
        self.sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_on_demand_is_stable() {
        let registry = PeerRegistry::new();
        let a = registry.get_or_create("a");
        let again = registry.get_or_create("a");
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_on_terminal_break() {
        let registry = PeerRegistry::new();
        registry.get_or_create("a");
        assert!(registry.remove("a").is_some());
        assert!(registry.get("a").is_none());
        assert!(registry.remove("a").is_none());
    }

    #[test]
    fn test_peer_names() {
        let registry = PeerRegistry::new();
        registry.get_or_create("a");
        registry.get_or_create("b");
        let mut names = registry.peer_names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
