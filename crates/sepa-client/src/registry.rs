//! Registry of confirmed subscriptions
//!
//! Entries are inserted by a session's own receive loop when the broker
//! confirms it, so a subscription id is only discoverable here once it has
//! been returned to the caller. Removal is idempotent: a session may be
//! removed by an explicit unsubscribe and again by its receive loop exiting.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::session::{Control, SessionState};
use crate::transport::Security;

/// Registry-side handle of a live session
#[derive(Debug)]
pub(crate) struct SessionEntry {
    pub(crate) alias: String,
    pub(crate) security: Security,
    pub(crate) control: mpsc::UnboundedSender<Control>,
    pub(crate) state: watch::Receiver<SessionState>,
    pub(crate) last_activity: watch::Receiver<Instant>,
}

/// Public view of a registered subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub id: String,
    pub alias: String,
    pub security: Security,
    pub state: SessionState,
    /// When the broker last sent anything on this session, keepalives included
    pub last_activity: Instant,
}

/// Subscription id -> live session
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a confirmed session
    ///
    /// Returns `false` (leaving the existing entry untouched) when the id is
    /// already registered.
    pub(crate) fn insert(&self, id: &str, entry: SessionEntry) -> bool {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(id) {
            return false;
        }
        sessions.insert(id.to_string(), entry);
        true
    }

    pub(crate) fn remove(&self, id: &str) -> Option<SessionEntry> {
        self.sessions.lock().remove(id)
    }

    /// Drain every entry
    pub(crate) fn take_all(&self) -> Vec<(String, SessionEntry)> {
        self.sessions.lock().drain().collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.lock().contains_key(id)
    }

    /// Ids of all live subscriptions
    pub fn ids(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<SubscriptionInfo> {
        self.sessions.lock().get(id).map(|entry| SubscriptionInfo {
            id: id.to_string(),
            alias: entry.alias.clone(),
            security: entry.security,
            state: *entry.state.borrow(),
            last_activity: *entry.last_activity.borrow(),
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Senders {
        state: watch::Sender<SessionState>,
        activity: watch::Sender<Instant>,
    }

    fn entry(alias: &str, at: Instant) -> (SessionEntry, Senders) {
        let (control, _rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(SessionState::Confirmed);
        let (activity_tx, last_activity) = watch::channel(at);
        (
            SessionEntry {
                alias: alias.to_string(),
                security: Security::Insecure,
                control,
                state,
                last_activity,
            },
            Senders {
                state: state_tx,
                activity: activity_tx,
            },
        )
    }

    #[test]
    fn test_insert_and_lookup() {
        let registry = SessionRegistry::new();
        let now = Instant::now();
        let (e, _senders) = entry("q1", now);

        assert!(registry.insert("sub-1", e));
        assert!(registry.contains("sub-1"));
        assert_eq!(
            registry.get("sub-1"),
            Some(SubscriptionInfo {
                id: "sub-1".into(),
                alias: "q1".into(),
                security: Security::Insecure,
                state: SessionState::Confirmed,
                last_activity: now,
            })
        );
    }

    #[test]
    fn test_duplicate_id_is_refused() {
        let registry = SessionRegistry::new();
        let (first, _s1) = entry("first", Instant::now());
        let (second, _s2) = entry("second", Instant::now());

        assert!(registry.insert("sub-1", first));
        assert!(!registry.insert("sub-1", second));
        assert_eq!(registry.get("sub-1").unwrap().alias, "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let (a, _sa) = entry("a", Instant::now());
        let (b, _sb) = entry("b", Instant::now());
        registry.insert("sub-a", a);
        registry.insert("sub-b", b);

        assert!(registry.remove("sub-a").is_some());
        assert!(registry.remove("sub-a").is_none());
        assert_eq!(registry.ids(), vec!["sub-b".to_string()]);
    }

    #[test]
    fn test_state_is_read_live() {
        let registry = SessionRegistry::new();
        let (e, senders) = entry("q", Instant::now());
        registry.insert("sub-1", e);

        senders.state.send_replace(SessionState::Closed);
        assert_eq!(registry.get("sub-1").unwrap().state, SessionState::Closed);
    }

    #[test]
    fn test_last_activity_is_read_live() {
        let registry = SessionRegistry::new();
        let start = Instant::now();
        let (e, senders) = entry("q", start);
        registry.insert("sub-1", e);

        let later = start + std::time::Duration::from_secs(3);
        senders.activity.send_replace(later);
        let info = registry.get("sub-1").unwrap();
        assert_eq!(info.last_activity, later);
        assert_eq!(info.state, SessionState::Confirmed);
    }
}
