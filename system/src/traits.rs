use crate::error::StoreError;
use crate::message::{BufferEvent, StoreEvent};
use crate::path::{Patch, StorePath};
use crate::types::SubscriptionId;
use serde_json::Value;

/// A hierarchical realtime key value store, seen from one client.
///
/// Change notifications and connectivity changes are queued by the store and
/// drained with `poll_event`. Notifications of one subscription arrive in
/// write order; nothing is promised across subscriptions.
pub trait DocumentStore {
    /// The current value is delivered as the first event of the subscription.
    fn subscribe(&mut self, path: &StorePath) -> Result<SubscriptionId, StoreError>;
    fn unsubscribe(&mut self, subscription: SubscriptionId);
    fn read_once(&mut self, path: &StorePath) -> Result<Option<Value>, StoreError>;
    /// All entries are applied atomically or not at all.
    fn update(&mut self, patch: &Patch) -> Result<(), StoreError>;
    /// Never fails; keys are generated locally.
    fn push_key(&mut self, path: &StorePath) -> String;
    /// The store deletes `path` by itself once the current connection drops.
    fn register_ephemeral(&mut self, path: &StorePath, value: Value) -> Result<(), StoreError>;
    fn is_connected(&self) -> bool;
    fn poll_event(&mut self) -> Option<StoreEvent>;
}

/// A mergeable text buffer shared by every client that opened the same id.
pub trait SharedBuffer {
    /// Length in characters.
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn text(&self) -> String;
    fn insert(&mut self, offset: usize, text: &str);
    fn shared_flag(&self, name: &str) -> bool;
    fn set_shared_flag(&mut self, name: &str, value: bool);
}

pub trait BufferEngine {
    type Buffer: SharedBuffer;

    /// A `BufferEvent::Synced` for this id follows once the buffer caught up with its peers.
    fn open_buffer(&mut self, buffer_id: &str) -> Self::Buffer;
    fn poll_event(&mut self) -> Option<BufferEvent>;
}
