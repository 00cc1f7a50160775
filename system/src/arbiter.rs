use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::path::{Patch, StorePath, WorkspacePaths};
use crate::settings::{SettingsChange, UserRecord, WorkspaceSettings};
use crate::tree::StoreTree;
use crate::types::{effective_permission, Identity, Language, Permission};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Where this session stands with respect to the workspace, as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterPhase {
    Unknown,
    Resolving,
    ClaimedNew,
    JoiningExisting,
    AccessDenied,
    Active,
}

/// Things a session may ask to do, each with the permission it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    EditBuffer,
    Chat,
    ChangeSettings,
    RecordRunResult,
    ChangeDefaultPermission,
    ChangeUserPermission,
}

impl Operation {
    pub fn required_permission(self) -> Permission {
        match self {
            Operation::EditBuffer
            | Operation::Chat
            | Operation::ChangeSettings
            | Operation::RecordRunResult => Permission::ReadWrite,
            Operation::ChangeDefaultPermission | Operation::ChangeUserPermission => {
                Permission::Owner
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JoinDecision {
    Claim,
    Deny,
    Join,
    Rename,
    Nothing,
}

/// What the latest snapshots ask of this identity. Pure, so it can run on any snapshot in any order.
pub(crate) fn decide(
    settings: &WorkspaceSettings,
    own: Option<&UserRecord>,
    identity: &Identity,
) -> JoinDecision {
    let explicit = own.and_then(|r| r.permission);
    match settings.default_permission {
        None => JoinDecision::Claim,
        // an explicit override is required; a stored name alone doesn't readmit
        Some(Permission::Private) if explicit.is_none() => JoinDecision::Deny,
        Some(_) => match own.and_then(|r| r.name.as_deref()) {
            None => JoinDecision::Join,
            Some(name) if name != identity.name => JoinDecision::Rename,
            Some(_) => JoinDecision::Nothing,
        },
    }
}

/// Settings a claimant writes into a brand new workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimDefaults {
    pub language: Language,
    pub compiler_options: BTreeMap<Language, String>,
}

impl From<&SessionConfig> for ClaimDefaults {
    fn from(config: &SessionConfig) -> Self {
        Self {
            language: config.default_language,
            compiler_options: config.compiler_options.clone(),
        }
    }
}

/// Computes the effective permission of this session's identity and drives the
/// ownership claim and join protocol.
///
/// It keeps the latest settings snapshot and this identity's own user record,
/// and overlays its own unacknowledged write on top of them, the same way a
/// pending transaction shadows committed storage. Every decision is taken on
/// that projection, which makes repeated or reordered snapshots harmless: a
/// write that is already reflected, or already in flight, is never issued again.
pub struct PermissionArbiter {
    identity: Identity,
    paths: WorkspacePaths,
    defaults: ClaimDefaults,
    phase: ArbiterPhase,
    settings_loaded: bool,
    roster_loaded: bool,
    view: StoreTree,
    in_flight: Option<Patch>,
    rejected: Option<Patch>,
    claimed: bool,
    claim_time: i64,
}

impl PermissionArbiter {
    pub fn new(identity: Identity, paths: WorkspacePaths, defaults: ClaimDefaults) -> Self {
        Self {
            identity,
            paths,
            defaults,
            phase: ArbiterPhase::Unknown,
            settings_loaded: false,
            roster_loaded: false,
            view: StoreTree::new(),
            in_flight: None,
            rejected: None,
            claimed: false,
            claim_time: 0,
        }
    }

    pub fn phase(&self) -> ArbiterPhase {
        self.phase
    }

    pub fn is_claimant(&self) -> bool {
        self.claimed
    }

    /// The workspace settings subscription is in place.
    pub fn subscribed(&mut self) {
        if self.phase == ArbiterPhase::Unknown {
            self.transition(ArbiterPhase::Resolving);
        }
    }

    /// Returns the claim to write when this session created the workspace.
    pub fn begin(&mut self, is_new_file: bool, now_millis: i64) -> Option<Patch> {
        if self.phase != ArbiterPhase::Resolving {
            log::warn!("Arbiter can't begin from {:?}", self.phase);
            return None;
        }
        self.claim_time = now_millis;
        if is_new_file {
            self.claimed = true;
            self.transition(ArbiterPhase::ClaimedNew);
            let claim = self.claim_patch();
            self.issue(claim)
        } else {
            self.transition(ArbiterPhase::JoiningExisting);
            None
        }
    }

    pub fn handle_settings(&mut self, value: Option<&Value>) -> Option<Patch> {
        self.view
            .set(&self.paths.settings(), value.cloned().unwrap_or(Value::Null));
        self.settings_loaded = true;
        self.reconcile()
    }

    /// Takes the whole `users` snapshot; only this identity's record matters here.
    pub fn handle_roster(&mut self, users: Option<&Value>) -> Option<Patch> {
        let own = users
            .and_then(|v| v.get(&self.identity.id))
            .cloned()
            .unwrap_or(Value::Null);
        self.view.set(&self.paths.user(&self.identity.id), own);
        self.roster_loaded = true;
        self.reconcile()
    }

    /// The last issued write never reached the store; it's reissued on the next snapshot.
    pub fn write_failed(&mut self) {
        if let Some(patch) = self.in_flight.take() {
            log::debug!("Write of {} entries failed, will retry", patch.len());
        }
    }

    /// The store refused the last issued write. It is not retried.
    pub fn write_rejected(&mut self) {
        self.rejected = self.in_flight.take();
    }

    pub fn settings(&self) -> WorkspaceSettings {
        self.projected().0
    }

    pub fn own_record(&self) -> Option<UserRecord> {
        self.projected().1
    }

    /// Recomputed from the latest snapshots on every call, never cached.
    pub fn effective_permission(&self) -> Option<Permission> {
        let (settings, own) = self.projected();
        effective_permission(own.and_then(|r| r.permission), settings.default_permission)
    }

    pub fn is_access_denied(&self) -> bool {
        self.phase == ArbiterPhase::AccessDenied
            || self.effective_permission() == Some(Permission::Private)
    }

    pub fn authorize(&self, operation: Operation) -> Result<(), SessionError> {
        let required = operation.required_permission();
        let actual = self.effective_permission();
        match actual {
            Some(p) if p.allows(required) && self.phase != ArbiterPhase::AccessDenied => Ok(()),
            _ => {
                log::debug!(
                    "Rejected {:?}: {:?} required, have {:?}",
                    operation,
                    required,
                    actual
                );
                Err(SessionError::PermissionWriteRejected { required, actual })
            }
        }
    }

    pub fn settings_change(&self, change: &SettingsChange) -> Result<Patch, SessionError> {
        if change.is_empty() {
            return Err(SessionError::InvalidRequest("empty settings change".into()));
        }
        if change.default_permission == Some(Permission::Owner) {
            return Err(SessionError::InvalidRequest(
                "default permission can't be OWNER".into(),
            ));
        }
        let operation = if change.default_permission.is_some() {
            Operation::ChangeDefaultPermission
        } else {
            Operation::ChangeSettings
        };
        self.authorize(operation)?;
        Ok(change.to_patch(&self.paths))
    }

    pub fn permission_override(
        &self,
        identity_id: &str,
        permission: Option<Permission>,
    ) -> Result<Patch, SessionError> {
        self.authorize(Operation::ChangeUserPermission)?;
        StorePath::validate_segment(identity_id)
            .map_err(|_| SessionError::InvalidIdentity(identity_id.to_owned()))?;
        let mut patch = Patch::new();
        patch.put(
            self.paths.user(identity_id).child("permission"),
            permission.map(|p| json!(p)),
        );
        Ok(patch)
    }

    fn reconcile(&mut self) -> Option<Patch> {
        // entries are settled one by one as the snapshots covering them come in
        if let Some(patch) = &mut self.in_flight {
            let view = &self.view;
            patch.retain(|path, value| !view.reflects_entry(path, value));
            if patch.is_empty() {
                self.in_flight = None;
            }
        }
        if !(self.settings_loaded && self.roster_loaded) {
            return None;
        }

        let (settings, own) = self.projected();
        let decision = decide(&settings, own.as_ref(), &self.identity);
        match self.phase {
            ArbiterPhase::Unknown | ArbiterPhase::Resolving | ArbiterPhase::AccessDenied => None,
            ArbiterPhase::ClaimedNew => {
                self.transition(ArbiterPhase::Active);
                self.act(decision)
            }
            ArbiterPhase::JoiningExisting => match decision {
                JoinDecision::Deny => {
                    self.transition(ArbiterPhase::AccessDenied);
                    None
                }
                JoinDecision::Claim => {
                    // the creator hasn't initialized it yet
                    self.claimed = true;
                    self.transition(ArbiterPhase::ClaimedNew);
                    self.transition(ArbiterPhase::Active);
                    self.act(decision)
                }
                decision => {
                    self.transition(ArbiterPhase::Active);
                    self.act(decision)
                }
            },
            ArbiterPhase::Active => self.act(decision),
        }
    }

    fn act(&mut self, decision: JoinDecision) -> Option<Patch> {
        match decision {
            JoinDecision::Claim if self.claimed => {
                let claim = self.claim_patch();
                self.issue(claim)
            }
            JoinDecision::Claim | JoinDecision::Deny | JoinDecision::Nothing => None,
            JoinDecision::Join => {
                let join = self.join_patch();
                self.issue(join)
            }
            JoinDecision::Rename => {
                let mut patch = Patch::new();
                patch.set(self.own_field("name"), self.identity.name.as_str());
                self.issue(patch)
            }
        }
    }

    fn issue(&mut self, patch: Patch) -> Option<Patch> {
        if patch.is_empty()
            || self.view.reflects(&patch)
            || self.in_flight.as_ref() == Some(&patch)
            || self.rejected.as_ref() == Some(&patch)
        {
            return None;
        }
        self.in_flight = Some(patch.clone());
        Some(patch)
    }

    fn projected(&self) -> (WorkspaceSettings, Option<UserRecord>) {
        let mut tree = self.view.clone();
        if let Some(patch) = &self.in_flight {
            tree.apply(patch);
        }
        (
            WorkspaceSettings::from_value(tree.get(&self.paths.settings())),
            UserRecord::from_value(tree.get(&self.paths.user(&self.identity.id))),
        )
    }

    fn own_field(&self, field: &str) -> StorePath {
        self.paths.user(&self.identity.id).child(field)
    }

    fn join_patch(&self) -> Patch {
        let mut patch = Patch::new();
        patch
            .set(self.own_field("name"), self.identity.name.as_str())
            .set(self.own_field("color"), self.identity.color.as_str());
        patch
    }

    fn claim_patch(&self) -> Patch {
        let mut patch = self.join_patch();
        patch
            .set(self.own_field("permission"), json!(Permission::Owner))
            .set(
                self.paths.setting("defaultPermission"),
                json!(Permission::ReadWrite),
            )
            .set(
                self.paths.setting("language"),
                self.defaults.language.as_str(),
            )
            .set(self.paths.setting("creationTime"), self.claim_time);
        for (language, options) in &self.defaults.compiler_options {
            patch.set(
                self.paths.setting("compilerOptions").child(language),
                options.as_str(),
            );
        }
        patch
    }

    fn transition(&mut self, next: ArbiterPhase) {
        log::info!(
            "Workspace {} as {}: {:?} -> {:?}",
            self.paths.root(),
            self.identity.id,
            self.phase,
            next
        );
        self.phase = next;
    }
}
