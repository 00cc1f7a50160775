use crate::error::StoreError;
use crate::path::{Patch, StorePath};
use crate::settings::{UserRecord, WorkspaceSettings};
use crate::tree::StoreTree;
use crate::types::{effective_permission, Permission};

const WORKSPACE_ROOT: &str = "workspace";

/// Write rules applied by a store that enforces them.
///
/// Paths outside `workspace/{id}` are unrestricted. Inside, every entry of a
/// patch is checked against the tree as it was before the patch, so a claim
/// can write settings and the claimant's OWNER override in one go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessRules;

impl AccessRules {
    pub fn new() -> Self {
        Self
    }

    pub fn check(
        &self,
        tree: &StoreTree,
        identity: Option<&str>,
        patch: &Patch,
    ) -> Result<(), StoreError> {
        for path in patch.paths() {
            let segments = path.segments();
            if segments.len() < 2 || segments[0] != WORKSPACE_ROOT {
                continue;
            }
            let identity = match identity {
                Some(identity) => identity,
                None => return Err(StoreError::PermissionDenied(path.to_string())),
            };
            let required = match required_permission(identity, &segments[2..]) {
                Some(required) => required,
                None => continue,
            };
            let workspace = StorePath::root().child(WORKSPACE_ROOT).child(&segments[1]);
            let actual = permission_in(tree, &workspace, identity);
            if !actual.allows(required) {
                log::debug!(
                    "Rejected write of {} at {}: {:?} required, has {:?}",
                    identity,
                    path,
                    required,
                    actual
                );
                return Err(StoreError::PermissionDenied(path.to_string()));
            }
        }
        Ok(())
    }
}

/// `None` means the write is allowed regardless of permission.
fn required_permission(identity: &str, rest: &[String]) -> Option<Permission> {
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
    match rest.as_slice() {
        [] | ["settings"] | ["users"] | ["users", _] => Some(Permission::Owner),
        ["settings", "defaultPermission", ..] => Some(Permission::Owner),
        ["users", _, "permission", ..] => Some(Permission::Owner),
        ["users", user, "name", ..] | ["users", user, "color", ..] | ["users", user, "connections", ..]
            if *user == identity =>
        {
            None
        }
        _ => Some(Permission::ReadWrite),
    }
}

/// Everybody owns an unclaimed workspace.
fn permission_in(tree: &StoreTree, workspace: &StorePath, identity: &str) -> Permission {
    let settings = WorkspaceSettings::from_value(tree.get(&workspace.child("settings")));
    if !settings.is_claimed() {
        return Permission::Owner;
    }
    let own = UserRecord::from_value(tree.get(&workspace.child("users").child(identity)))
        .and_then(|record| record.permission);
    effective_permission(own, settings.default_permission).unwrap_or(Permission::Private)
}
