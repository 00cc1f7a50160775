use crate::error::StoreError;
use crate::message::StoreEvent;
use crate::path::{Patch, StorePath};
use crate::rules::AccessRules;
use crate::tree::StoreTree;
use crate::types::{ClientId, IdentityId, SubscriptionId};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::num::Wrapping;

/// Events to deliver, addressed by client.
pub type Outbox = Vec<(ClientId, StoreEvent)>;

struct HubClient {
    identity: Option<IdentityId>,
    subscriptions: BTreeMap<SubscriptionId, StorePath>,
    ephemeral: BTreeSet<StorePath>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub clients: usize,
    pub subscriptions: usize,
    pub ephemeral_records: usize,
}

/// The authoritative side of a realtime document store.
///
/// Owns the tree, who is connected, what they subscribed to and which
/// ephemeral records they registered. Nothing here does I/O: every mutation
/// returns the notifications it caused and the caller delivers them.
pub struct StoreHub {
    tree: StoreTree,
    clients: BTreeMap<ClientId, HubClient>,
    client_id_source: Wrapping<ClientId>,
    subscription_id_source: Wrapping<SubscriptionId>,
    rules: Option<AccessRules>,
}

impl StoreHub {
    pub fn new(rules: Option<AccessRules>) -> Self {
        Self {
            tree: StoreTree::new(),
            clients: BTreeMap::new(),
            client_id_source: Wrapping(0),
            subscription_id_source: Wrapping(0),
            rules,
        }
    }

    pub fn connect(&mut self, identity: Option<IdentityId>) -> ClientId {
        self.client_id_source += Wrapping(1);
        let client_id = self.client_id_source.0;
        log::info!("Client {} connected as {:?}", client_id, identity);
        self.clients.insert(
            client_id,
            HubClient {
                identity,
                subscriptions: BTreeMap::new(),
                ephemeral: BTreeSet::new(),
            },
        );
        client_id
    }

    pub fn is_connected(&self, client_id: ClientId) -> bool {
        self.clients.contains_key(&client_id)
    }

    /// Drops the client's subscriptions and retracts its ephemeral records.
    pub fn disconnect(&mut self, client_id: ClientId) -> Outbox {
        let client = match self.clients.remove(&client_id) {
            Some(client) => client,
            None => {
                log::warn!("Tried to disconnect unknown client {}", client_id);
                return Vec::new();
            }
        };
        log::info!(
            "Client {} disconnected, retracting {} ephemeral records",
            client_id,
            client.ephemeral.len()
        );
        let mut patch = Patch::new();
        for path in client.ephemeral {
            if self.still_owned_elsewhere(&path) {
                continue;
            }
            patch.delete(path);
        }
        if patch.is_empty() {
            Vec::new()
        } else {
            self.commit(&patch)
        }
    }

    pub fn subscribe(
        &mut self,
        client_id: ClientId,
        path: &StorePath,
    ) -> Result<(SubscriptionId, Outbox), StoreError> {
        self.subscription_id_source += Wrapping(1);
        let subscription = self.subscription_id_source.0;
        let client = self
            .clients
            .get_mut(&client_id)
            .ok_or(StoreError::Unavailable)?;
        client.subscriptions.insert(subscription, path.clone());
        let initial = StoreEvent::Value {
            subscription,
            path: path.clone(),
            value: self.tree.get(path).cloned(),
        };
        Ok((subscription, vec![(client_id, initial)]))
    }

    pub fn unsubscribe(
        &mut self,
        client_id: ClientId,
        subscription: SubscriptionId,
    ) -> Result<(), StoreError> {
        self.clients
            .get_mut(&client_id)
            .and_then(|c| c.subscriptions.remove(&subscription))
            .map(|_| ())
            .ok_or(StoreError::UnknownSubscription(subscription))
    }

    pub fn read(&self, path: &StorePath) -> Option<Value> {
        self.tree.get(path).cloned()
    }

    pub fn update(&mut self, client_id: ClientId, patch: &Patch) -> Result<Outbox, StoreError> {
        self.check(client_id, patch)?;
        Ok(self.commit(patch))
    }

    pub fn register_ephemeral(
        &mut self,
        client_id: ClientId,
        path: &StorePath,
        value: Value,
    ) -> Result<Outbox, StoreError> {
        let mut patch = Patch::new();
        patch.set(path.clone(), value);
        self.check(client_id, &patch)?;
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.ephemeral.insert(path.clone());
        }
        Ok(self.commit(&patch))
    }

    /// Bypasses access rules. For tooling and tests.
    pub fn admin_update(&mut self, patch: &Patch) -> Outbox {
        self.commit(patch)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            clients: self.clients.len(),
            subscriptions: self.clients.values().map(|c| c.subscriptions.len()).sum(),
            ephemeral_records: self.clients.values().map(|c| c.ephemeral.len()).sum(),
        }
    }

    fn check(&self, client_id: ClientId, patch: &Patch) -> Result<(), StoreError> {
        let client = self.clients.get(&client_id).ok_or(StoreError::Unavailable)?;
        match &self.rules {
            Some(rules) => rules.check(&self.tree, client.identity.as_deref(), patch),
            None => Ok(()),
        }
    }

    /// A record re-registered by a newer connection survives the old one's disconnect.
    fn still_owned_elsewhere(&self, path: &StorePath) -> bool {
        self.clients.values().any(|c| c.ephemeral.contains(path))
    }

    fn commit(&mut self, patch: &Patch) -> Outbox {
        self.tree.apply(patch);

        let mut outbox = Vec::new();
        for (client_id, client) in &self.clients {
            for (subscription, sub_path) in &client.subscriptions {
                if patch.paths().any(|p| p.overlaps(sub_path)) {
                    outbox.push((
                        *client_id,
                        StoreEvent::Value {
                            subscription: *subscription,
                            path: sub_path.clone(),
                            value: self.tree.get(sub_path).cloned(),
                        },
                    ));
                }
            }
        }
        outbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(s: &str) -> StorePath {
        StorePath::parse(s).expect("valid path")
    }

    #[test]
    fn it_notifies_overlapping_subscriptions_only() {
        let mut hub = StoreHub::new(None);
        let a = hub.connect(Some("a".into()));
        let b = hub.connect(Some("b".into()));
        let (settings_sub, initial) = hub.subscribe(a, &path("w/settings")).expect("");
        assert_eq!(initial.len(), 1);
        hub.subscribe(b, &path("w/users")).expect("");

        let mut patch = Patch::new();
        patch.set(path("w/settings/language"), "py");
        let outbox = hub.update(b, &patch).expect("");
        assert_eq!(
            outbox,
            vec![(
                a,
                StoreEvent::Value {
                    subscription: settings_sub,
                    path: path("w/settings"),
                    value: Some(json!({ "language": "py" })),
                }
            )]
        );
    }

    #[test]
    fn it_retracts_ephemeral_records_on_disconnect() {
        let mut hub = StoreHub::new(None);
        let a = hub.connect(Some("a".into()));
        let b = hub.connect(Some("b".into()));
        hub.subscribe(b, &path("w/users")).expect("");
        hub.register_ephemeral(a, &path("w/users/a/connections/k"), json!(true))
            .expect("");
        assert_eq!(hub.stats().ephemeral_records, 1);

        let outbox = hub.disconnect(a);
        assert_eq!(outbox.len(), 1);
        assert_eq!(hub.read(&path("w/users")), None);
        assert_eq!(hub.stats().clients, 1);
    }

    #[test]
    fn a_newer_registration_of_the_same_path_survives() {
        let mut hub = StoreHub::new(None);
        let old = hub.connect(Some("a".into()));
        let record = path("w/users/a/connections/k");
        hub.register_ephemeral(old, &record, json!(1)).expect("");
        let new = hub.connect(Some("a".into()));
        hub.register_ephemeral(new, &record, json!(2)).expect("");

        hub.disconnect(old);
        assert_eq!(hub.read(&record), Some(json!(2)));
        hub.disconnect(new);
        assert_eq!(hub.read(&record), None);
    }

    #[test]
    fn disconnected_clients_are_unavailable() {
        let mut hub = StoreHub::new(None);
        let a = hub.connect(None);
        hub.disconnect(a);
        assert_eq!(
            hub.subscribe(a, &path("w")).map(|(s, _)| s),
            Err(StoreError::Unavailable)
        );
        assert_eq!(hub.update(a, &Patch::new()), Err(StoreError::Unavailable));
    }
}
