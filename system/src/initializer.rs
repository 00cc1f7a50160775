use crate::traits::SharedBuffer;
use crate::types::{BufferKey, WorkspaceId};
use std::collections::HashSet;

/// Shared flag cell inside every buffer document.
pub const INITIALIZED_FLAG: &str = "isInitialized";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedOutcome {
    /// This client already tried this buffer, or a sibling code buffer.
    AlreadyAttempted,
    /// Somebody else got there first. Not an error.
    AlreadyInitialized,
    Seeded,
    /// Flag set, nothing inserted: the buffer had content or there's no template.
    MarkedOnly,
}

/// Seeds default content into brand new buffers.
///
/// The attempted set is local to this client and only avoids redundant
/// attempts; races between clients are settled by the buffer's own shared
/// flag.
#[derive(Debug, Default)]
pub struct InitializationCoordinator {
    attempted: HashSet<(WorkspaceId, BufferKey)>,
}

impl InitializationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_attempted(&self, workspace_id: &WorkspaceId, key: &BufferKey) -> bool {
        self.attempted.contains(&(workspace_id.clone(), *key))
    }

    pub fn handle_synced<B: SharedBuffer>(
        &mut self,
        workspace_id: &WorkspaceId,
        key: BufferKey,
        buffer: &mut B,
        default_content: &str,
    ) -> SeedOutcome {
        if self.is_attempted(workspace_id, &key) {
            return SeedOutcome::AlreadyAttempted;
        }
        self.mark_attempted(workspace_id, key);

        if buffer.shared_flag(INITIALIZED_FLAG) {
            log::debug!("{} of {} is already initialized", key, workspace_id);
            return SeedOutcome::AlreadyInitialized;
        }
        // set even when there's content, so a late joiner can't seed on top of it
        buffer.set_shared_flag(INITIALIZED_FLAG, true);
        if buffer.is_empty() && !default_content.is_empty() {
            buffer.insert(0, default_content);
            log::info!("Seeded {} of {}", key, workspace_id);
            SeedOutcome::Seeded
        } else {
            SeedOutcome::MarkedOnly
        }
    }

    fn mark_attempted(&mut self, workspace_id: &WorkspaceId, key: BufferKey) {
        for k in std::iter::once(key).chain(key.code_siblings()) {
            self.attempted.insert((workspace_id.clone(), k));
        }
    }

    /// Pending attempts are dropped, not flushed.
    pub fn clear(&mut self) {
        self.attempted.clear();
    }
}
