use crate::error::StoreError;
use crate::path::{Patch, StorePath};
use crate::types::{CommandId, SubscriptionId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreCommand {
    Subscribe { path: StorePath },
    Unsubscribe { subscription: SubscriptionId },
    ReadOnce { path: StorePath },
    Update { patch: Patch },
    PushKey { path: StorePath },
    /// Retracted by the store when the registering connection drops.
    RegisterEphemeral { path: StorePath, value: Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentifiableCommand {
    pub command_id: CommandId,
    pub command: StoreCommand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandResult {
    Subscribed { subscription: SubscriptionId },
    Unsubscribed,
    Value { value: Option<Value> },
    Updated,
    Key { key: String },
    Registered,
    Error(StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    /// Latest value at a subscribed path. Ordered per subscription, not across them.
    Value {
        subscription: SubscriptionId,
        path: StorePath,
        value: Option<Value>,
    },
    Connectivity { online: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IdentifiableEvent {
    ByMyself {
        command_id: CommandId,
        result: CommandResult,
    },
    BySystem {
        event: StoreEvent,
    },
}

/// Emitted by a buffer engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferEvent {
    Synced { buffer_id: String },
}
