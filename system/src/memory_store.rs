use crate::error::StoreError;
use crate::hub::{HubStats, Outbox, StoreHub};
use crate::message::StoreEvent;
use crate::path::{Patch, StorePath};
use crate::rules::AccessRules;
use crate::traits::DocumentStore;
use crate::types::{generate_push_key, unix_millis, ClientId, IdentityId, SubscriptionId};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

struct Shared {
    hub: StoreHub,
    queues: BTreeMap<ClientId, VecDeque<StoreEvent>>,
}

impl Shared {
    fn deliver(&mut self, outbox: Outbox) {
        for (client_id, event) in outbox {
            if let Some(queue) = self.queues.get_mut(&client_id) {
                queue.push_back(event);
            }
        }
    }
}

/// An in-process store shared by any number of `MemoryStore` clients.
#[derive(Clone)]
pub struct MemoryBackend {
    shared: Rc<RefCell<Shared>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_rules(None)
    }

    pub fn with_access_rules() -> Self {
        Self::with_rules(Some(AccessRules::new()))
    }

    fn with_rules(rules: Option<AccessRules>) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                hub: StoreHub::new(rules),
                queues: BTreeMap::new(),
            })),
        }
    }

    pub fn connect(&self, identity: &str) -> MemoryStore {
        let store = MemoryStore {
            backend: self.clone(),
            handle: Rc::new(RefCell::new(Handle {
                identity: identity.to_owned(),
                client_id: None,
                pending: VecDeque::new(),
            })),
        };
        store.attach();
        store
    }

    pub fn value_at(&self, path: &StorePath) -> Option<Value> {
        self.shared.borrow().hub.read(path)
    }

    /// Writes around the access rules.
    pub fn admin_update(&self, patch: &Patch) {
        let mut shared = self.shared.borrow_mut();
        let outbox = shared.hub.admin_update(patch);
        shared.deliver(outbox);
    }

    pub fn stats(&self) -> HubStats {
        self.shared.borrow().hub.stats()
    }
}

struct Handle {
    identity: IdentityId,
    client_id: Option<ClientId>,
    /// Events that belong before anything still queued at the backend.
    pending: VecDeque<StoreEvent>,
}

/// One client's connection to a `MemoryBackend`.
///
/// Clones share the connection, so a test can keep a handle to toggle
/// connectivity while a session owns another.
#[derive(Clone)]
pub struct MemoryStore {
    backend: MemoryBackend,
    handle: Rc<RefCell<Handle>>,
}

impl MemoryStore {
    fn attach(&self) -> ClientId {
        let mut handle = self.handle.borrow_mut();
        let mut shared = self.backend.shared.borrow_mut();
        let client_id = shared.hub.connect(Some(handle.identity.clone()));
        shared.queues.insert(client_id, VecDeque::new());
        handle.client_id = Some(client_id);
        client_id
    }

    fn client_id(&self) -> Result<ClientId, StoreError> {
        self.handle.borrow().client_id.ok_or(StoreError::Unavailable)
    }

    pub fn identity(&self) -> IdentityId {
        self.handle.borrow().identity.clone()
    }

    /// Drops the connection. The backend retracts this client's ephemeral records.
    pub fn go_offline(&self) {
        let client_id = match self.handle.borrow_mut().client_id.take() {
            Some(client_id) => client_id,
            None => return,
        };
        let undelivered = {
            let mut shared = self.backend.shared.borrow_mut();
            let undelivered = shared.queues.remove(&client_id).unwrap_or_default();
            let outbox = shared.hub.disconnect(client_id);
            shared.deliver(outbox);
            undelivered
        };
        let mut handle = self.handle.borrow_mut();
        handle.pending.extend(undelivered);
        handle.pending.push_back(StoreEvent::Connectivity { online: false });
    }

    /// Reconnects as a new client. Earlier subscriptions are gone.
    pub fn go_online(&self) {
        if self.handle.borrow().client_id.is_some() {
            return;
        }
        self.attach();
        self.handle
            .borrow_mut()
            .pending
            .push_back(StoreEvent::Connectivity { online: true });
    }
}

impl DocumentStore for MemoryStore {
    fn subscribe(&mut self, path: &StorePath) -> Result<SubscriptionId, StoreError> {
        let client_id = self.client_id()?;
        let mut shared = self.backend.shared.borrow_mut();
        let (subscription, outbox) = shared.hub.subscribe(client_id, path)?;
        shared.deliver(outbox);
        Ok(subscription)
    }

    fn unsubscribe(&mut self, subscription: SubscriptionId) {
        if let Ok(client_id) = self.client_id() {
            let mut shared = self.backend.shared.borrow_mut();
            if let Err(e) = shared.hub.unsubscribe(client_id, subscription) {
                log::debug!("{}", e);
            }
        }
    }

    fn read_once(&mut self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        self.client_id()?;
        Ok(self.backend.value_at(path))
    }

    fn update(&mut self, patch: &Patch) -> Result<(), StoreError> {
        let client_id = self.client_id()?;
        let mut shared = self.backend.shared.borrow_mut();
        let outbox = shared.hub.update(client_id, patch)?;
        shared.deliver(outbox);
        Ok(())
    }

    fn push_key(&mut self, _path: &StorePath) -> String {
        generate_push_key(unix_millis())
    }

    fn register_ephemeral(&mut self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        let client_id = self.client_id()?;
        let mut shared = self.backend.shared.borrow_mut();
        let outbox = shared.hub.register_ephemeral(client_id, path, value)?;
        shared.deliver(outbox);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.handle.borrow().client_id.is_some()
    }

    fn poll_event(&mut self) -> Option<StoreEvent> {
        let mut handle = self.handle.borrow_mut();
        if let Some(event) = handle.pending.pop_front() {
            return Some(event);
        }
        let client_id = handle.client_id?;
        self.backend
            .shared
            .borrow_mut()
            .queues
            .get_mut(&client_id)
            .and_then(|queue| queue.pop_front())
    }
}
