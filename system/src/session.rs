use crate::arbiter::{ArbiterPhase, ClaimDefaults, Operation, PermissionArbiter};
use crate::config::SessionConfig;
use crate::error::{SessionError, StoreError};
use crate::initializer::{InitializationCoordinator, SeedOutcome};
use crate::message::{BufferEvent, StoreEvent};
use crate::path::{Patch, StorePath, WorkspacePaths};
use crate::presence::PresenceTracker;
use crate::resolver::resolve_workspace;
use crate::run_results::{RunResult, RunResults, MAX_RESULT_SLOTS};
use crate::settings::{parse_roster, Roster, SettingsChange, WorkspaceSettings};
use crate::traits::{BufferEngine, DocumentStore, SharedBuffer};
use crate::types::{
    unix_millis, BufferKey, Identity, IdentityId, Language, Permission, SubscriptionId,
    WorkspaceId,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Things the UI should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// A new workspace was allocated; point the URL at it without reloading.
    RewriteUrl(String),
    AccessDenied(WorkspaceId),
    InsufficientPermission {
        required: Permission,
        actual: Option<Permission>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Settings,
    Users,
    Results,
}

impl Channel {
    const ALL: [Channel; 3] = [Channel::Settings, Channel::Users, Channel::Results];

    fn path(self, paths: &WorkspacePaths) -> StorePath {
        match self {
            Channel::Settings => paths.settings(),
            Channel::Users => paths.users(),
            Channel::Results => paths.results(),
        }
    }
}

fn now_millis() -> i64 {
    unix_millis() as i64
}

/// One browser session attached to one workspace.
///
/// Owns the store handle, the buffer engine and one instance of every
/// coordination component. Nothing happens on its own: the host feeds store
/// and buffer events in (or calls `pump`), and takes notices out.
pub struct Session<S: DocumentStore, B: BufferEngine> {
    store: S,
    engine: B,
    config: SessionConfig,
    identity: Identity,
    workspace_id: WorkspaceId,
    paths: WorkspacePaths,
    is_new_file: bool,
    arbiter: PermissionArbiter,
    presence: PresenceTracker,
    initializer: InitializationCoordinator,
    run_results: RunResults,
    roster: Roster,
    subscriptions: BTreeMap<SubscriptionId, Channel>,
    buffers: BTreeMap<BufferKey, B::Buffer>,
    buffer_keys: BTreeMap<String, BufferKey>,
    /// Synced before this session was allowed to write into them.
    unseeded: BTreeSet<BufferKey>,
    active_language: Option<Language>,
    notices: VecDeque<SessionNotice>,
    denial_reported: bool,
}

impl<S: DocumentStore, B: BufferEngine> Session<S, B> {
    /// Resolves the workspace, subscribes to it, claims it when new and announces presence.
    pub fn start(
        mut store: S,
        engine: B,
        config: SessionConfig,
        identity: Identity,
        raw_segment: Option<&str>,
    ) -> Result<Self, SessionError> {
        StorePath::validate_segment(&identity.id)
            .map_err(|_| SessionError::InvalidIdentity(identity.id.clone()))?;
        let resolved = resolve_workspace(&mut store, raw_segment)?;
        let workspace_id = resolved.workspace_id;
        let paths = WorkspacePaths::new(&workspace_id);

        let arbiter =
            PermissionArbiter::new(identity.clone(), paths.clone(), ClaimDefaults::from(&config));
        let presence = PresenceTracker::new(
            workspace_id.clone(),
            identity.id.clone(),
            config.secondary_roster.clone(),
            config.max_presence_failures,
        );

        let mut session = Self {
            store,
            engine,
            config,
            identity,
            workspace_id,
            paths,
            is_new_file: resolved.is_new_file,
            arbiter,
            presence,
            initializer: InitializationCoordinator::new(),
            run_results: RunResults::new(),
            roster: Roster::new(),
            subscriptions: BTreeMap::new(),
            buffers: BTreeMap::new(),
            buffer_keys: BTreeMap::new(),
            unseeded: BTreeSet::new(),
            active_language: None,
            notices: VecDeque::new(),
            denial_reported: false,
        };
        if let Some(url) = resolved.rewrite_url {
            session.notices.push_back(SessionNotice::RewriteUrl(url));
        }

        session.subscribe_all();
        session.arbiter.subscribed();
        let claim = session.arbiter.begin(session.is_new_file, now_millis());
        session.write_reconciliation(claim);
        session.follow_settings();
        session.presence.arm(&mut session.store, now_millis());

        log::info!(
            "Session of {} started on {} (new: {})",
            session.identity.id,
            session.workspace_id,
            session.is_new_file
        );
        Ok(session)
    }

    pub fn handle_store_event(&mut self, event: StoreEvent) {
        match event {
            StoreEvent::Value {
                subscription,
                path,
                value,
            } => {
                let channel = match self.subscriptions.get(&subscription) {
                    Some(channel) => *channel,
                    None => {
                        log::debug!("Dropping value of stale subscription at {}", path);
                        return;
                    }
                };
                self.handle_value(channel, value.as_ref());
            }
            StoreEvent::Connectivity { online: true } => {
                log::info!("Store is back, resubscribing {}", self.workspace_id);
                self.subscriptions.clear();
                self.subscribe_all();
                if self.arbiter.phase() != ArbiterPhase::AccessDenied {
                    self.presence
                        .handle_connectivity(&mut self.store, true, now_millis());
                }
            }
            StoreEvent::Connectivity { online: false } => {
                log::info!("Store went away");
                self.presence
                    .handle_connectivity(&mut self.store, false, now_millis());
            }
        }
        self.retry_unseeded();
        self.report_denial();
    }

    pub fn handle_buffer_event(&mut self, event: BufferEvent) {
        match event {
            BufferEvent::Synced { buffer_id } => match self.buffer_keys.get(&buffer_id) {
                Some(key) => {
                    let key = *key;
                    self.seed(key);
                }
                None => log::debug!("Synced event for unknown buffer {}", buffer_id),
            },
        }
    }

    /// Drains both event queues until neither has anything left.
    pub fn pump(&mut self) {
        loop {
            let mut progressed = false;
            while let Some(event) = self.store.poll_event() {
                self.handle_store_event(event);
                progressed = true;
            }
            while let Some(event) = self.engine.poll_event() {
                self.handle_buffer_event(event);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
    }

    pub fn open_buffer(&mut self, key: BufferKey) {
        if self.buffers.contains_key(&key) {
            return;
        }
        let buffer_id = key.buffer_id(&self.workspace_id);
        log::debug!("Opening buffer {}", buffer_id);
        let buffer = self.engine.open_buffer(&buffer_id);
        self.buffers.insert(key, buffer);
        self.buffer_keys.insert(buffer_id, key);
    }

    /// Switches the shared workspace language and opens its buffer.
    pub fn set_active_language(&mut self, language: Language) -> Result<(), SessionError> {
        let change = SettingsChange {
            language: Some(language),
            ..SettingsChange::default()
        };
        self.request_settings_change(&change)?;
        self.active_language = Some(language);
        self.open_buffer(BufferKey::Code(language));
        Ok(())
    }

    pub fn edit_buffer(
        &mut self,
        key: BufferKey,
        offset: usize,
        text: &str,
    ) -> Result<(), SessionError> {
        let authorized = self.arbiter.authorize(Operation::EditBuffer);
        self.gated(authorized)?;
        let buffer = self
            .buffers
            .get_mut(&key)
            .ok_or_else(|| SessionError::InvalidRequest(format!("buffer {} is not open", key)))?;
        buffer.insert(offset, text);
        Ok(())
    }

    pub fn request_settings_change(&mut self, change: &SettingsChange) -> Result<(), SessionError> {
        let patch = self.arbiter.settings_change(change);
        let patch = self.gated(patch)?;
        self.write(&patch)
    }

    /// `None` clears the override so the workspace default applies again.
    pub fn request_permission_override(
        &mut self,
        identity_id: &str,
        permission: Option<Permission>,
    ) -> Result<(), SessionError> {
        let patch = self.arbiter.permission_override(identity_id, permission);
        let patch = self.gated(patch)?;
        self.write(&patch)
    }

    /// Returns the key the message was stored under.
    pub fn post_chat_message(&mut self, text: &str) -> Result<String, SessionError> {
        let authorized = self.arbiter.authorize(Operation::Chat);
        self.gated(authorized)?;
        let key = self.store.push_key(&self.paths.chat());
        let mut patch = Patch::new();
        patch.set(
            self.paths.chat().child(&key),
            json!({
                "author": self.identity.id,
                "name": self.identity.name,
                "color": self.identity.color,
                "text": text,
                "timestamp": now_millis(),
            }),
        );
        self.write(&patch)?;
        Ok(key)
    }

    /// Stores a judge outcome locally and mirrors it for everyone else.
    pub fn set_run_result(&mut self, index: usize, result: RunResult) -> Result<(), SessionError> {
        let authorized = self.arbiter.authorize(Operation::RecordRunResult);
        self.gated(authorized)?;
        if index >= MAX_RESULT_SLOTS {
            return Err(SessionError::InvalidRequest(format!(
                "run result slot {} is out of range",
                index
            )));
        }
        let mut patch = Patch::new();
        patch.set(self.paths.results().child(index), json!(result));
        self.write(&patch)?;
        self.run_results.set_at(index, result);
        Ok(())
    }

    pub fn consume_notices(&mut self) -> Vec<SessionNotice> {
        self.notices.drain(..).collect()
    }

    pub fn workspace_id(&self) -> &WorkspaceId {
        &self.workspace_id
    }

    pub fn is_new_file(&self) -> bool {
        self.is_new_file
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn phase(&self) -> ArbiterPhase {
        self.arbiter.phase()
    }

    pub fn effective_permission(&self) -> Option<Permission> {
        self.arbiter.effective_permission()
    }

    pub fn is_access_denied(&self) -> bool {
        self.arbiter.is_access_denied()
    }

    pub fn settings(&self) -> WorkspaceSettings {
        self.arbiter.settings()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn is_online(&self, identity_id: &str) -> bool {
        self.presence.is_online(identity_id)
    }

    pub fn online_identities(&self) -> Vec<IdentityId> {
        self.presence.online_identities().cloned().collect()
    }

    pub fn presence_lapsed(&self) -> bool {
        self.presence.has_lapsed()
    }

    pub fn run_results(&self) -> &RunResults {
        &self.run_results
    }

    pub fn active_language(&self) -> Option<Language> {
        self.active_language
    }

    pub fn buffer(&self, key: BufferKey) -> Option<&B::Buffer> {
        self.buffers.get(&key)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn engine_mut(&mut self) -> &mut B {
        &mut self.engine
    }

    /// Unsubscribes, deletes this session's presence records and hands the store and engine back.
    pub fn teardown(mut self) -> (S, B) {
        for subscription in std::mem::take(&mut self.subscriptions).into_keys() {
            self.store.unsubscribe(subscription);
        }
        self.presence.teardown(&mut self.store);
        self.initializer.clear();
        log::info!(
            "Session of {} left {}",
            self.identity.id,
            self.workspace_id
        );
        (self.store, self.engine)
    }

    fn subscribe_all(&mut self) {
        for channel in Channel::ALL.iter() {
            let path = channel.path(&self.paths);
            match self.store.subscribe(&path) {
                Ok(subscription) => {
                    self.subscriptions.insert(subscription, *channel);
                }
                Err(e) => log::warn!("Subscribing {} failed, waiting for the store: {}", path, e),
            }
        }
    }

    fn handle_value(&mut self, channel: Channel, value: Option<&Value>) {
        match channel {
            Channel::Settings => {
                let patch = self.arbiter.handle_settings(value);
                self.write_reconciliation(patch);
            }
            Channel::Users => {
                let patch = self.arbiter.handle_roster(value);
                self.write_reconciliation(patch);
                self.roster = parse_roster(value);
                self.presence.handle_roster(&self.roster);
            }
            Channel::Results => self.run_results.merge_remote(value),
        }
        // a roster snapshot can make this session claim, which changes the settings too
        self.follow_settings();
    }

    /// Keeps result slots and the open code buffer in line with the shared settings.
    fn follow_settings(&mut self) {
        let settings = self.arbiter.settings();
        self.run_results.sync_with_problem(settings.problem.as_ref());
        if let Some(language) = settings.language {
            if self.active_language != Some(language) {
                self.active_language = Some(language);
                self.open_buffer(BufferKey::Code(language));
            }
        }
    }

    /// Writes issued by the arbiter on its own. Failures feed back into it instead of the caller.
    fn write_reconciliation(&mut self, patch: Option<Patch>) {
        let patch = match patch {
            Some(patch) => patch,
            None => return,
        };
        match self.store.update(&patch) {
            Ok(()) => {}
            Err(StoreError::PermissionDenied(path)) => {
                log::warn!("Store refused reconciliation write at {}", path);
                self.arbiter.write_rejected();
            }
            Err(e) => {
                log::debug!("Reconciliation write failed: {}", e);
                self.arbiter.write_failed();
            }
        }
    }

    fn write(&mut self, patch: &Patch) -> Result<(), SessionError> {
        let result = self.store.update(patch).map_err(SessionError::from);
        self.gated(result)
    }

    fn gated<T>(&mut self, result: Result<T, SessionError>) -> Result<T, SessionError> {
        if let Err(SessionError::PermissionWriteRejected { required, .. }) = &result {
            self.notices.push_back(SessionNotice::InsufficientPermission {
                required: *required,
                actual: self.arbiter.effective_permission(),
            });
        }
        result
    }

    fn seed(&mut self, key: BufferKey) {
        if self.arbiter.authorize(Operation::EditBuffer).is_err() {
            self.unseeded.insert(key);
            return;
        }
        self.unseeded.remove(&key);
        let buffer = match self.buffers.get_mut(&key) {
            Some(buffer) => buffer,
            None => return,
        };
        let outcome = self.initializer.handle_synced(
            &self.workspace_id,
            key,
            buffer,
            self.config.default_content(&key),
        );
        if outcome == SeedOutcome::Seeded {
            log::debug!("{} seeded {}", self.identity.id, key);
        }
    }

    fn retry_unseeded(&mut self) {
        if self.unseeded.is_empty() || self.arbiter.authorize(Operation::EditBuffer).is_err() {
            return;
        }
        for key in std::mem::take(&mut self.unseeded) {
            self.seed(key);
        }
    }

    fn report_denial(&mut self) {
        let denied = self.arbiter.is_access_denied();
        if denied && !self.denial_reported {
            log::warn!("{} may not access {}", self.identity.id, self.workspace_id);
            self.notices
                .push_back(SessionNotice::AccessDenied(self.workspace_id.clone()));
            if self.arbiter.phase() == ArbiterPhase::AccessDenied {
                self.presence.teardown(&mut self.store);
            }
        }
        self.denial_reported = denied;
    }
}
