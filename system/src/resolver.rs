use crate::error::SessionError;
use crate::path::StorePath;
use crate::traits::DocumentStore;
use crate::types::WorkspaceId;

/// Segments that ask for a brand new workspace.
const NEW_WORKSPACE_SEGMENTS: [&str; 2] = ["", "new"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWorkspace {
    pub workspace_id: WorkspaceId,
    pub is_new_file: bool,
    /// Where the client URL should point once a new id was allocated.
    pub rewrite_url: Option<String>,
}

/// Turns the raw URL segment into a workspace id, allocating one when the segment asks for it.
pub fn resolve_workspace<S: DocumentStore>(
    store: &mut S,
    raw_segment: Option<&str>,
) -> Result<ResolvedWorkspace, SessionError> {
    let segment = raw_segment.map(|s| s.trim_matches('/')).unwrap_or("");

    if NEW_WORKSPACE_SEGMENTS.contains(&segment) {
        let key = store.push_key(&StorePath::root().child("workspace"));
        let workspace_id = WorkspaceId::from_push_key(&key)?;
        log::info!("Allocated workspace {}", workspace_id);
        return Ok(ResolvedWorkspace {
            rewrite_url: Some(format!("/{}", workspace_id)),
            workspace_id,
            is_new_file: true,
        });
    }

    let workspace_id = WorkspaceId::parse(segment)?;
    log::debug!("Opening existing workspace {}", workspace_id);
    Ok(ResolvedWorkspace {
        workspace_id,
        is_new_file: false,
        rewrite_url: None,
    })
}
