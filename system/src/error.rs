use crate::types::{Permission, SubscriptionId, WorkspaceId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures reported by a realtime document store.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum StoreError {
    #[error("store is unavailable")]
    Unavailable,
    #[error("permission denied at {0}")]
    PermissionDenied(String),
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The URL segment can't be a workspace id. The caller should redirect somewhere safe.
    #[error("bad workspace id {0:?}")]
    BadWorkspaceId(String),
    #[error("access to workspace {0} is denied")]
    AccessDenied(WorkspaceId),
    #[error("store unavailable: {0}")]
    StoreUnavailable(StoreError),
    #[error("insufficient permission: {required:?} required, have {actual:?}")]
    PermissionWriteRejected {
        required: Permission,
        actual: Option<Permission>,
    },
    #[error("invalid identity id {0:?}")]
    InvalidIdentity(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl SessionError {
    /// Terminal errors are shown to the user and never retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionError::BadWorkspaceId(_) | SessionError::AccessDenied(_)
        )
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::PermissionDenied(_) => SessionError::PermissionWriteRejected {
                required: Permission::ReadWrite,
                actual: None,
            },
            e => SessionError::StoreUnavailable(e),
        }
    }
}
