use system::{
    effective_permission, ArbiterPhase, DocumentStore, Identity, MemoryBackend, MemoryBufferEngine,
    MemoryBufferHub, MemoryStore, Permission, MAX_RESULT_SLOTS, RunResult, Session, SessionConfig, SessionError,
    Patch, SessionNotice, SettingsChange, StoreEvent, StorePath, WorkspacePaths,
};

type TestSession = Session<MemoryStore, MemoryBufferEngine>;

fn start(backend: &MemoryBackend, id: &str, name: &str, segment: Option<&str>) -> TestSession {
    let mut session = Session::start(
        backend.connect(id),
        MemoryBufferHub::new().engine(),
        SessionConfig::default(),
        Identity::new(id, name, "#123456"),
        segment,
    )
    .expect("start");
    session.pump();
    session
}

fn pump_all(sessions: &mut [&mut TestSession]) {
    for _ in 0..3 {
        for session in sessions.iter_mut() {
            session.pump();
        }
    }
}

#[test]
fn creator_owns_and_joiner_reads_and_writes() {
    let backend = MemoryBackend::new();
    let mut alice = start(&backend, "alice", "Alice", None);
    let workspace = alice.workspace_id().to_string();
    assert!(alice.is_new_file());
    assert_eq!(alice.effective_permission(), Some(Permission::Owner));
    assert_eq!(alice.settings().default_permission, Some(Permission::ReadWrite));

    let mut bob = start(&backend, "bob", "Bob", Some(workspace.as_str()));
    pump_all(&mut [&mut alice, &mut bob]);

    assert!(!bob.is_new_file());
    assert_eq!(bob.phase(), ArbiterPhase::Active);
    assert_eq!(bob.effective_permission(), Some(Permission::ReadWrite));
    let record = bob.roster().get("bob").expect("bob joined");
    assert_eq!(record.name.as_deref(), Some("Bob"));
    assert_eq!(record.permission, None);
    assert!(alice.is_online("bob"));
    assert!(bob.is_online("alice"));
    assert_eq!(bob.consume_notices(), vec![]);
}

#[test]
fn rejoining_writes_nothing_new() {
    let backend = MemoryBackend::new();
    let mut alice = start(&backend, "alice", "Alice", None);
    let workspace = alice.workspace_id().to_string();
    let paths = WorkspacePaths::new(alice.workspace_id());

    let bob = start(&backend, "bob", "Bob", Some(workspace.as_str()));
    alice.pump();
    let before = backend.value_at(&paths.user("bob"));

    let mut watcher = backend.connect("watcher");
    watcher.subscribe(&paths.user("bob").child("name")).expect("");
    watcher.subscribe(&paths.user("bob").child("color")).expect("");
    while watcher.poll_event().is_some() {}

    bob.teardown();
    let mut bob = start(&backend, "bob", "Bob", Some(workspace.as_str()));
    pump_all(&mut [&mut alice, &mut bob]);
    assert_eq!(watcher.poll_event(), None);

    let mut after = backend.value_at(&paths.user("bob")).expect("record");
    let mut before = before.expect("record");
    // only the connection key differs
    for record in [&mut before, &mut after].iter_mut() {
        if let Some(record) = record.as_object_mut() {
            record.remove("connections");
        }
    }
    assert_eq!(before, after);

    // a new display name is written once
    bob.teardown();
    let mut robert = start(&backend, "bob", "Robert", Some(workspace.as_str()));
    pump_all(&mut [&mut alice, &mut robert]);
    assert!(matches!(watcher.poll_event(), Some(StoreEvent::Value { .. })));
    assert_eq!(watcher.poll_event(), None);
    assert_eq!(
        robert.roster().get("bob").and_then(|r| r.name.clone()),
        Some("Robert".to_owned())
    );
}

#[test]
fn private_workspaces_admit_explicit_overrides_only() {
    let backend = MemoryBackend::new();
    let mut alice = start(&backend, "alice", "Alice", None);
    let workspace = alice.workspace_id().to_string();
    let paths = WorkspacePaths::new(alice.workspace_id());

    let bob = start(&backend, "bob", "Bob", Some(workspace.as_str()));
    bob.teardown();
    alice.pump();

    alice
        .request_settings_change(&SettingsChange {
            default_permission: Some(Permission::Private),
            ..SettingsChange::default()
        })
        .expect("owner may change the default");
    alice.pump();
    assert_eq!(alice.effective_permission(), Some(Permission::Owner));

    let mut carol = start(&backend, "carol", "Carol", Some(workspace.as_str()));
    assert_eq!(carol.phase(), ArbiterPhase::AccessDenied);
    assert_eq!(
        carol.consume_notices(),
        vec![SessionNotice::AccessDenied(carol.workspace_id().clone())]
    );
    assert_eq!(backend.value_at(&paths.user("carol")), None);
    assert!(matches!(
        carol.post_chat_message("hi"),
        Err(SessionError::PermissionWriteRejected { .. })
    ));

    // a stored name alone doesn't readmit
    let bob = start(&backend, "bob", "Bob", Some(workspace.as_str()));
    assert_eq!(bob.phase(), ArbiterPhase::AccessDenied);
    bob.teardown();

    alice
        .request_permission_override("bob", Some(Permission::Read))
        .expect("owner may grant");
    let mut bob = start(&backend, "bob", "Bob", Some(workspace.as_str()));
    assert_eq!(bob.phase(), ArbiterPhase::Active);
    assert_eq!(bob.effective_permission(), Some(Permission::Read));
    assert!(bob.set_run_result(1, RunResult::default()).is_err());
    assert!(matches!(
        bob.consume_notices().as_slice(),
        [SessionNotice::InsufficientPermission {
            required: Permission::ReadWrite,
            actual: Some(Permission::Read),
        }]
    ));
}

#[test]
fn a_connected_session_loses_access_when_the_default_turns_private() {
    let backend = MemoryBackend::new();
    let mut alice = start(&backend, "alice", "Alice", None);
    let workspace = alice.workspace_id().to_string();
    let mut bob = start(&backend, "bob", "Bob", Some(workspace.as_str()));
    pump_all(&mut [&mut alice, &mut bob]);

    alice
        .request_settings_change(&SettingsChange {
            default_permission: Some(Permission::Private),
            ..SettingsChange::default()
        })
        .expect("");
    pump_all(&mut [&mut alice, &mut bob]);

    assert!(bob.is_access_denied());
    assert_eq!(bob.effective_permission(), Some(Permission::Private));
    assert_eq!(
        bob.consume_notices(),
        vec![SessionNotice::AccessDenied(bob.workspace_id().clone())]
    );
    assert!(!alice.is_access_denied());
}

#[test]
fn override_takes_precedence_in_every_combination() {
    let overrides = [
        None,
        Some(Permission::Owner),
        Some(Permission::ReadWrite),
        Some(Permission::Read),
        Some(Permission::Private),
    ];
    let defaults = [Permission::ReadWrite, Permission::Read, Permission::Private];

    for own in overrides.iter() {
        for default in defaults.iter() {
            let backend = MemoryBackend::new();
            let mut alice = start(&backend, "alice", "Alice", None);
            let workspace = alice.workspace_id().to_string();
            if let Some(permission) = own {
                alice
                    .request_permission_override("bob", Some(*permission))
                    .expect("");
            }
            if *default != Permission::ReadWrite {
                alice
                    .request_settings_change(&SettingsChange {
                        default_permission: Some(*default),
                        ..SettingsChange::default()
                    })
                    .expect("");
            }

            let bob = start(&backend, "bob", "Bob", Some(workspace.as_str()));
            let expected = effective_permission(*own, Some(*default));
            assert_eq!(bob.effective_permission(), expected, "{:?} over {:?}", own, default);

            let denied = own.is_none() && *default == Permission::Private;
            assert_eq!(bob.phase() == ArbiterPhase::AccessDenied, denied);
            assert_eq!(
                bob.is_access_denied(),
                denied || expected == Some(Permission::Private)
            );
        }
    }
}

#[test]
fn concurrent_claims_leave_a_consistent_workspace() {
    let backend = MemoryBackend::new();
    let id = system::WorkspaceId::from_push_key(&system::generate_push_key(system::unix_millis()))
        .expect("")
        .to_string();

    let mut sessions: Vec<TestSession> = ["a", "b", "c"]
        .iter()
        .map(|id_| {
            Session::start(
                backend.connect(id_),
                MemoryBufferHub::new().engine(),
                SessionConfig::default(),
                Identity::new(*id_, id_.to_uppercase(), "#000000"),
                Some(id.as_str()),
            )
            .expect("")
        })
        .collect();
    for _ in 0..3 {
        for session in sessions.iter_mut() {
            session.pump();
        }
    }

    for session in &sessions {
        assert_eq!(session.phase(), ArbiterPhase::Active);
        assert_eq!(
            session.settings().default_permission,
            Some(Permission::ReadWrite)
        );
        assert_eq!(session.effective_permission(), Some(Permission::Owner));
    }
    let settings = StorePath::parse(&format!("workspace/{}/settings/defaultPermission", id))
        .expect("");
    assert_eq!(
        backend.value_at(&settings),
        Some(serde_json::json!("READ_WRITE"))
    );
}

#[test]
fn store_rules_reject_what_a_stale_gate_lets_through() {
    let backend = MemoryBackend::with_access_rules();
    let mut alice = start(&backend, "alice", "Alice", None);
    let workspace = alice.workspace_id().to_string();
    let mut bob = start(&backend, "bob", "Bob", Some(workspace.as_str()));
    pump_all(&mut [&mut alice, &mut bob]);
    assert_eq!(bob.effective_permission(), Some(Permission::ReadWrite));

    alice
        .request_settings_change(&SettingsChange {
            default_permission: Some(Permission::Read),
            ..SettingsChange::default()
        })
        .expect("");

    // bob hasn't seen the change yet
    let result = bob.set_run_result(1, RunResult::default());
    assert!(matches!(
        result,
        Err(SessionError::PermissionWriteRejected { .. })
    ));
    assert_eq!(bob.consume_notices().len(), 1);

    bob.pump();
    assert_eq!(bob.effective_permission(), Some(Permission::Read));
    assert!(matches!(
        bob.request_permission_override("bob", Some(Permission::Owner)),
        Err(SessionError::PermissionWriteRejected {
            required: Permission::Owner,
            ..
        })
    ));
}

#[test]
fn a_malformed_setting_leaves_a_private_workspace_private() {
    let backend = MemoryBackend::with_access_rules();
    let mut alice = start(&backend, "alice", "Alice", None);
    let workspace = alice.workspace_id().to_string();
    let paths = WorkspacePaths::new(alice.workspace_id());
    alice
        .request_settings_change(&SettingsChange {
            default_permission: Some(Permission::Private),
            ..SettingsChange::default()
        })
        .expect("owner may change the default");
    let mut junk = Patch::new();
    junk.set(paths.setting("language"), "rust")
        .set(paths.setting("workspaceName"), 42);
    backend.admin_update(&junk);
    alice.pump();
    assert_eq!(alice.settings().default_permission, Some(Permission::Private));
    assert_eq!(alice.effective_permission(), Some(Permission::Owner));

    let carol = start(&backend, "carol", "Carol", Some(workspace.as_str()));
    assert_eq!(carol.phase(), ArbiterPhase::AccessDenied);
    assert!(carol.is_access_denied());
    assert_eq!(backend.value_at(&paths.user("carol")), None);
    assert_eq!(
        backend.value_at(&paths.setting("defaultPermission")),
        Some(serde_json::json!("PRIVATE"))
    );

    // the store itself doesn't read the workspace as unclaimed either
    let mut rogue = backend.connect("carol");
    let mut grab = Patch::new();
    grab.set(paths.user("carol").child("permission"), "OWNER");
    assert!(rogue.update(&grab).is_err());
}

#[test]
fn far_away_result_slots_are_refused_locally_and_ignored_remotely() {
    let backend = MemoryBackend::new();
    let mut alice = start(&backend, "alice", "Alice", None);
    let paths = WorkspacePaths::new(alice.workspace_id());
    assert!(matches!(
        alice.set_run_result(MAX_RESULT_SLOTS, RunResult::default()),
        Err(SessionError::InvalidRequest(_))
    ));
    assert_eq!(backend.value_at(&paths.results()), None);

    let mut far = Patch::new();
    far.set(
        paths.results().child("18446744073709551615"),
        serde_json::json!({ "status": "x" }),
    )
    .set(
        paths.results().child(1_000_000_000_000u64),
        serde_json::json!({ "status": "x" }),
    )
    .set(paths.results().child(0), serde_json::json!({ "status": "ok" }));
    backend.admin_update(&far);
    alice.pump();
    assert_eq!(alice.run_results().len(), 1);
    assert_eq!(
        alice.run_results().get(0).map(|r| r.status.as_str()),
        Some("ok")
    );
}
