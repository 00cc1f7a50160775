use crate::path::{Patch, StorePath, WorkspacePaths};
use crate::settings::Roster;
use crate::traits::DocumentStore;
use crate::types::{ConnectionKey, IdentityId, WorkspaceId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

/// The live marker stored under `users/{identityId}/connections/{connectionId}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub identity_id: IdentityId,
    pub workspace_id: WorkspaceId,
    pub registered_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RosterKind {
    Primary,
    Secondary,
}

/// Keeps this session's ephemeral connection records alive and tracks who else is online.
///
/// The store retracts an ephemeral record when the connection that registered
/// it drops, so each reconnection has to register again. The same connection
/// key is reused for every registration, which keeps a flapping connection
/// down to a single record.
pub struct PresenceTracker {
    workspace_id: WorkspaceId,
    identity_id: IdentityId,
    paths: WorkspacePaths,
    secondary_roster: Option<StorePath>,
    connection_key: Option<ConnectionKey>,
    armed: BTreeSet<RosterKind>,
    online: bool,
    failures: u32,
    max_failures: u32,
    online_identities: BTreeSet<IdentityId>,
}

impl PresenceTracker {
    pub fn new(
        workspace_id: WorkspaceId,
        identity_id: IdentityId,
        secondary_roster: Option<StorePath>,
        max_failures: u32,
    ) -> Self {
        let paths = WorkspacePaths::new(&workspace_id);
        Self {
            workspace_id,
            identity_id,
            paths,
            secondary_roster,
            connection_key: None,
            armed: BTreeSet::new(),
            online: false,
            failures: 0,
            max_failures,
            online_identities: BTreeSet::new(),
        }
    }

    pub fn connection_key(&self) -> Option<&str> {
        self.connection_key.as_deref()
    }

    pub fn primary_path(&self) -> Option<StorePath> {
        self.connection_key
            .as_ref()
            .map(|key| self.paths.connections(&self.identity_id).child(key))
    }

    pub fn secondary_path(&self) -> Option<StorePath> {
        match (&self.secondary_roster, &self.connection_key) {
            (Some(roster), Some(key)) => Some(roster.child(&self.identity_id).child(key)),
            _ => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.contains(&RosterKind::Primary)
    }

    /// Whether repeated registration failures left this identity offline for everyone else.
    pub fn has_lapsed(&self) -> bool {
        self.failures > 0 && self.failures >= self.max_failures
    }

    /// Registers whichever records aren't registered on the current connection yet.
    pub fn arm<S: DocumentStore>(&mut self, store: &mut S, now_millis: i64) {
        self.online = true;
        if self.connection_key.is_none() {
            let key = store.push_key(&self.paths.connections(&self.identity_id));
            let key = key.trim_start_matches('-').to_owned();
            log::debug!("Connection key for {}: {}", self.identity_id, key);
            self.connection_key = Some(key);
        }
        let record = ConnectionRecord {
            identity_id: self.identity_id.clone(),
            workspace_id: self.workspace_id.clone(),
            registered_at: now_millis,
        };
        let record = json!(record);

        let targets = [
            (RosterKind::Primary, self.primary_path()),
            (RosterKind::Secondary, self.secondary_path()),
        ];
        for (roster, path) in targets.iter() {
            let path = match path {
                Some(path) if !self.armed.contains(roster) => path,
                _ => continue,
            };
            match store.register_ephemeral(path, record.clone()) {
                Ok(()) => {
                    log::debug!("Registered presence at {}", path);
                    self.armed.insert(*roster);
                    self.failures = 0;
                }
                Err(e) => {
                    self.failures += 1;
                    if self.has_lapsed() {
                        log::warn!(
                            "Presence of {} lapsed after {} failures: {}",
                            self.identity_id,
                            self.failures,
                            e
                        );
                    } else {
                        log::debug!("Presence registration at {} failed: {}", path, e);
                    }
                }
            }
        }
    }

    /// Re-arms on every down to up transition; the store already retracted the old records.
    pub fn handle_connectivity<S: DocumentStore>(
        &mut self,
        store: &mut S,
        online: bool,
        now_millis: i64,
    ) {
        if online {
            if !self.online || !self.is_armed() {
                self.arm(store, now_millis);
            }
        } else {
            self.online = false;
            self.armed.clear();
        }
    }

    pub fn handle_roster(&mut self, roster: &Roster) {
        self.online_identities = roster
            .iter()
            .filter(|(_, record)| record.is_online())
            .map(|(id, _)| id.clone())
            .collect();
    }

    pub fn is_online(&self, identity_id: &str) -> bool {
        self.online_identities.contains(identity_id)
    }

    pub fn online_identities(&self) -> impl Iterator<Item = &IdentityId> {
        self.online_identities.iter()
    }

    /// Graceful teardown may beat the store's own disconnect detection, so records are deleted explicitly.
    pub fn teardown<S: DocumentStore>(&mut self, store: &mut S) {
        let mut patch = Patch::new();
        for path in self.primary_path().into_iter().chain(self.secondary_path()) {
            patch.delete(path);
        }
        if !patch.is_empty() {
            if let Err(e) = store.update(&patch) {
                log::debug!("Presence records left for the store to retract: {}", e);
            }
        }
        self.armed.clear();
        self.online = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryBackend;
    use crate::settings::parse_roster;

    fn workspace_id() -> WorkspaceId {
        WorkspaceId::parse("MZ1hG2tqfZ8CfQ2l1xA").expect("")
    }

    #[test]
    fn flapping_connectivity_leaves_one_record() {
        let backend = MemoryBackend::new();
        let mut store = backend.connect("alice");
        let mut presence = PresenceTracker::new(workspace_id(), "alice".into(), None, 3);
        presence.arm(&mut store, 1);

        let connections = WorkspacePaths::new(&workspace_id()).connections("alice");
        for _ in 0..2 {
            store.go_offline();
            presence.handle_connectivity(&mut store, false, 2);
            assert_eq!(backend.value_at(&connections), None);

            store.go_online();
            presence.handle_connectivity(&mut store, true, 3);
            presence.handle_connectivity(&mut store, true, 3);
        }

        let records = backend.value_at(&connections).expect("registered");
        assert_eq!(records.as_object().map(|m| m.len()), Some(1));
    }

    #[test]
    fn secondary_roster_is_armed_independently() {
        let backend = MemoryBackend::new();
        let mut store = backend.connect("alice");
        let classroom = StorePath::parse("classrooms/c1/presence").expect("");
        let mut presence =
            PresenceTracker::new(workspace_id(), "alice".into(), Some(classroom.clone()), 3);
        presence.arm(&mut store, 1);
        assert!(backend.value_at(&classroom.child("alice")).is_some());

        presence.teardown(&mut store);
        assert_eq!(backend.value_at(&classroom), None);
        assert_eq!(backend.value_at(&WorkspacePaths::new(&workspace_id()).users()), None);
    }

    #[test]
    fn registration_while_offline_lapses_silently() {
        let backend = MemoryBackend::new();
        let mut store = backend.connect("alice");
        store.go_offline();
        let mut presence = PresenceTracker::new(workspace_id(), "alice".into(), None, 2);
        presence.arm(&mut store, 1);
        assert!(!presence.has_lapsed());
        presence.arm(&mut store, 1);
        assert!(presence.has_lapsed());
        assert!(!presence.is_armed());

        store.go_online();
        presence.handle_connectivity(&mut store, true, 2);
        assert!(presence.is_armed());
        assert!(!presence.has_lapsed());
    }

    #[test]
    fn a_zero_failure_limit_lapses_on_the_first_failure_only() {
        let backend = MemoryBackend::new();
        let mut store = backend.connect("alice");
        let mut presence = PresenceTracker::new(workspace_id(), "alice".into(), None, 0);
        assert!(!presence.has_lapsed());
        presence.arm(&mut store, 1);
        assert!(presence.is_armed());
        assert!(!presence.has_lapsed());

        let mut offline = backend.connect("alice");
        offline.go_offline();
        let mut presence = PresenceTracker::new(workspace_id(), "alice".into(), None, 0);
        presence.arm(&mut offline, 1);
        assert!(presence.has_lapsed());
    }

    #[test]
    fn online_means_a_non_empty_connection_map() {
        let mut presence = PresenceTracker::new(workspace_id(), "alice".into(), None, 3);
        let roster = parse_roster(Some(&json!({
            "alice": { "name": "Alice", "connections": { "k1": { "registeredAt": 1 } } },
            "bob": { "name": "Bob" },
        })));
        presence.handle_roster(&roster);
        assert!(presence.is_online("alice"));
        assert!(!presence.is_online("bob"));
        assert!(!presence.is_online("carol"));

        presence.handle_roster(&parse_roster(Some(&json!({ "alice": { "name": "Alice" } }))));
        assert!(!presence.is_online("alice"));
    }
}
