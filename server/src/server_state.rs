use system::{
    generate_push_key, unix_millis, ClientId, CommandResult, IdentityId, Outbox, StoreCommand,
    StoreError, StoreHub,
};

/// The store as hosted by the server: every command runs against one `StoreHub`.
pub struct ServerState {
    pub hub: StoreHub,
}

impl ServerState {
    pub fn new(hub: StoreHub) -> Self {
        Self { hub }
    }

    pub fn connect(&mut self, identity: IdentityId) -> ClientId {
        self.hub.connect(Some(identity))
    }

    pub fn disconnect(&mut self, connection_id: ClientId) -> Outbox {
        self.hub.disconnect(connection_id)
    }

    /// The result goes back to the sender before anything in the outbox is delivered.
    pub fn execute(&mut self, from: ClientId, command: &StoreCommand) -> (CommandResult, Outbox) {
        let result = match command {
            StoreCommand::Subscribe { path } => self
                .hub
                .subscribe(from, path)
                .map(|(subscription, outbox)| (CommandResult::Subscribed { subscription }, outbox)),
            StoreCommand::Unsubscribe { subscription } => self
                .hub
                .unsubscribe(from, *subscription)
                .map(|()| (CommandResult::Unsubscribed, Vec::new())),
            StoreCommand::ReadOnce { path } => {
                if self.hub.is_connected(from) {
                    Ok((
                        CommandResult::Value {
                            value: self.hub.read(path),
                        },
                        Vec::new(),
                    ))
                } else {
                    Err(StoreError::Unavailable)
                }
            }
            StoreCommand::Update { patch } => self
                .hub
                .update(from, patch)
                .map(|outbox| (CommandResult::Updated, outbox)),
            StoreCommand::PushKey { .. } => Ok((
                CommandResult::Key {
                    key: generate_push_key(unix_millis()),
                },
                Vec::new(),
            )),
            StoreCommand::RegisterEphemeral { path, value } => self
                .hub
                .register_ephemeral(from, path, value.clone())
                .map(|outbox| (CommandResult::Registered, outbox)),
        };
        match result {
            Ok(done) => done,
            Err(e) => {
                log::debug!("Command of {} failed: {}", from, e);
                (CommandResult::Error(e), Vec::new())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use system::serde_json::json;
    use system::{AccessRules, Patch, StoreEvent, StorePath};

    fn path(s: &str) -> StorePath {
        StorePath::parse(s).expect("")
    }

    #[test]
    fn subscribers_get_the_initial_value_after_the_ack() {
        let mut state = ServerState::new(StoreHub::new(None));
        let a = state.connect("alice".into());
        let (result, outbox) = state.execute(a, &StoreCommand::Subscribe { path: path("w/chat") });
        let subscription = match result {
            CommandResult::Subscribed { subscription } => subscription,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(
            outbox,
            vec![(
                a,
                StoreEvent::Value {
                    subscription,
                    path: path("w/chat"),
                    value: None
                }
            )]
        );
    }

    #[test]
    fn a_disconnect_retracts_presence_for_the_others() {
        let mut state = ServerState::new(StoreHub::new(None));
        let a = state.connect("alice".into());
        let b = state.connect("bob".into());
        state.execute(b, &StoreCommand::Subscribe { path: path("w/users") });
        let (result, outbox) = state.execute(
            a,
            &StoreCommand::RegisterEphemeral {
                path: path("w/users/alice/connections/k"),
                value: json!({ "registeredAt": 1 }),
            },
        );
        assert_eq!(result, CommandResult::Registered);
        assert_eq!(outbox.len(), 1);

        let outbox = state.disconnect(a);
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].0, b);
        assert_eq!(state.hub.stats().ephemeral_records, 0);
    }

    #[test]
    fn rule_violations_come_back_as_errors() {
        let mut state = ServerState::new(StoreHub::new(Some(AccessRules::new())));
        let a = state.connect("alice".into());
        let mut claim = Patch::new();
        claim.set(path("workspace/w1/settings/defaultPermission"), "READ");
        assert_eq!(
            state.execute(a, &StoreCommand::Update { patch: claim }).0,
            CommandResult::Updated
        );

        let b = state.connect("bob".into());
        let mut chat = Patch::new();
        chat.set(path("workspace/w1/chat/m1"), "hi");
        let (result, outbox) = state.execute(b, &StoreCommand::Update { patch: chat });
        assert!(matches!(
            result,
            CommandResult::Error(StoreError::PermissionDenied(_))
        ));
        assert!(outbox.is_empty());
    }

    #[test]
    fn push_keys_are_minted_per_command() {
        let mut state = ServerState::new(StoreHub::new(None));
        let a = state.connect("alice".into());
        let command = StoreCommand::PushKey { path: path("workspace") };
        let (first, _) = state.execute(a, &command);
        let (second, _) = state.execute(a, &command);
        assert_ne!(first, second);
    }
}
