use nova_cdp::mock::{MockStop, MockValue};
use nova_vm_service::protocol::{EventKind, ExceptionPauseMode, Obj};
use nova_vm_service::ServiceError;

use crate::harness::{
    drain, main_frame, next_event, program, wait_for, wait_for_pause, Harness, MAIN_DART,
};

#[tokio::test]
async fn navigation_replaces_the_isolate_in_order() {
    let harness = Harness::start().await;
    let old = harness.isolate_id();
    assert_eq!(old, "isolates/1");
    let script = harness.script_id(MAIN_DART);
    harness
        .service
        .add_breakpoint(&old, &script, 3)
        .await
        .unwrap();
    let mut isolate_events = harness.subscribe("Isolate");

    harness.mock.navigate().await;

    let exit = next_event(&mut isolate_events).await;
    assert_eq!(exit.kind, EventKind::IsolateExit);
    assert_eq!(exit.isolate_id(), Some(old.as_str()));

    let start = next_event(&mut isolate_events).await;
    assert_eq!(start.kind, EventKind::IsolateStart);
    let new = start.isolate_id().expect("isolate").to_string();
    assert_eq!(new, "isolates/2");

    let runnable = next_event(&mut isolate_events).await;
    assert_eq!(runnable.kind, EventKind::IsolateRunnable);
    assert_eq!(runnable.isolate_id(), Some(new.as_str()));

    assert!(matches!(
        harness.service.get_isolate(&old),
        Err(ServiceError::InvalidArgument(_))
    ));
    let fresh = harness.service.get_isolate(&new).unwrap();
    assert!(fresh.breakpoints.is_empty());
    assert_eq!(fresh.pause_event.kind, EventKind::PauseStart);
    assert_eq!(harness.service.get_vm().isolates.len(), 1);
}

#[tokio::test]
async fn restart_tears_down_and_recreates() {
    let harness = Harness::start().await;
    let old = harness.isolate_id();
    let script = harness.script_id(MAIN_DART);
    harness
        .service
        .add_breakpoint(&old, &script, 4)
        .await
        .unwrap();
    let mut isolate_events = harness.subscribe("Isolate");

    let new = harness.service.restart().await;
    assert_ne!(new.id, old);

    let kinds: Vec<(EventKind, String)> = [
        next_event(&mut isolate_events).await,
        next_event(&mut isolate_events).await,
        next_event(&mut isolate_events).await,
    ]
    .into_iter()
    .map(|e| (e.kind, e.isolate_id().unwrap_or_default().to_string()))
    .collect();
    assert_eq!(
        kinds,
        vec![
            (EventKind::IsolateExit, old.clone()),
            (EventKind::IsolateStart, new.id.clone()),
            (EventKind::IsolateRunnable, new.id.clone()),
        ]
    );
    assert!(harness.mock.breakpoints().await.is_empty());
}

#[tokio::test]
async fn nothing_mentions_the_old_isolate_after_it_exits() {
    let harness = Harness::start().await;
    let old = harness.isolate_id();
    let script = harness.script_id(MAIN_DART);
    harness
        .service
        .add_breakpoint(&old, &script, 3)
        .await
        .unwrap();
    harness.run_to_pause().await;
    let mut isolate_events = harness.subscribe("Isolate");
    let mut debug_events = harness.subscribe("Debug");

    harness.mock.navigate().await;
    let navigated = wait_for(&mut isolate_events, EventKind::IsolateRunnable)
        .await
        .isolate_id()
        .expect("isolate")
        .to_string();
    let restarted = harness.service.restart().await;
    assert_ne!(restarted.id, navigated);

    let isolate_stream = drain(&mut isolate_events).await;
    let kinds: Vec<(EventKind, String)> = isolate_stream
        .iter()
        .map(|e| (e.kind, e.isolate_id().unwrap_or_default().to_string()))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (EventKind::IsolateExit, navigated.clone()),
            (EventKind::IsolateStart, restarted.id.clone()),
            (EventKind::IsolateRunnable, restarted.id.clone()),
        ]
    );
    for event in drain(&mut debug_events).await {
        assert_ne!(event.isolate_id(), Some(old.as_str()), "{:?}", event.kind);
        assert_ne!(event.isolate_id(), Some(navigated.as_str()), "{:?}", event.kind);
    }
}

#[tokio::test]
async fn exception_pausing_carries_over_to_new_isolates() {
    let mut config = program();
    let mut throwing = MockStop::new(vec![main_frame(3)]);
    throwing.throws = Some(MockValue::object(
        "StateError",
        vec![("message", MockValue::str("bad state"))],
    ));
    config.trace = vec![MockStop::new(vec![main_frame(1)]), throwing];
    let harness = Harness::start_with(config).await;
    harness
        .service
        .set_exception_pause_mode(&harness.isolate_id(), "All")
        .await
        .unwrap();
    let mut isolate_events = harness.subscribe("Isolate");

    harness.mock.navigate().await;
    let new = wait_for(&mut isolate_events, EventKind::IsolateRunnable)
        .await
        .isolate_id()
        .expect("isolate")
        .to_string();
    assert_eq!(
        harness.service.get_isolate(&new).unwrap().exception_pause_mode,
        ExceptionPauseMode::All
    );

    let mut debug = harness.subscribe("Debug");
    harness.service.resume(&new, None).await.unwrap();
    let pause = wait_for_pause(&mut debug).await;
    assert_eq!(pause.kind, EventKind::PauseException);
    assert_eq!(pause.isolate_id(), Some(new.as_str()));
}

#[tokio::test]
async fn object_ids_do_not_survive_the_isolate() {
    let harness = Harness::start().await;
    let old = harness.isolate_id();
    let items = harness
        .service
        .evaluate(&old, &harness.root_library_id(), "items", None)
        .await
        .unwrap()
        .instance()
        .expect("instance")
        .id
        .clone();

    let new = harness.service.restart().await;
    let stale = harness.service.get_object(&new.id, &items, None, None).await;
    assert!(matches!(stale, Err(ServiceError::InvalidArgument(_))));
}

#[tokio::test]
async fn names_can_be_changed() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let mut isolate_events = harness.subscribe("Isolate");
    let mut vm_events = harness.subscribe("VM");

    harness.service.set_name(&isolate, "worker").unwrap();
    let update = next_event(&mut isolate_events).await;
    assert_eq!(update.kind, EventKind::IsolateUpdate);
    assert_eq!(update.isolate.map(|i| i.name), Some("worker".to_string()));
    assert_eq!(harness.service.get_isolate(&isolate).unwrap().name, "worker");

    assert_eq!(harness.service.get_vm().name, "ChromeDebugProxy");
    harness.service.set_vm_name("my-app").unwrap();
    let update = next_event(&mut vm_events).await;
    assert_eq!(update.kind, EventKind::VmUpdate);
    assert_eq!(update.vm.map(|vm| vm.name), Some("my-app".to_string()));
    assert_eq!(harness.service.get_vm().name, "my-app");

    assert!(matches!(
        harness.service.set_name("isolates/77", "x"),
        Err(ServiceError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn libraries_and_scripts_come_from_the_metadata() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();

    let state = harness.service.get_isolate(&isolate).unwrap();
    assert_eq!(state.libraries.len(), 1);
    assert_eq!(state.root_lib.as_ref().map(|l| l.uri.as_str()), Some(MAIN_DART));

    let scripts = harness.service.get_scripts(&isolate).unwrap().scripts;
    let uris: Vec<&str> = scripts.iter().map(|s| s.uri.as_str()).collect();
    assert_eq!(uris, vec![MAIN_DART, "package:app/src/helper.dart"]);

    match harness
        .service
        .get_object(&isolate, &harness.root_library_id(), None, None)
        .await
        .unwrap()
    {
        Obj::Library(library) => {
            assert_eq!(library.uri, MAIN_DART);
            assert_eq!(library.scripts, scripts);
        }
        other => panic!("expected a library, got {other:?}"),
    }
}

#[tokio::test]
async fn scripts_carry_source_and_token_positions() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let script_id = harness.script_id(MAIN_DART);

    match harness
        .service
        .get_object(&isolate, &script_id, None, None)
        .await
        .unwrap()
    {
        Obj::Script(script) => {
            assert_eq!(script.uri, MAIN_DART);
            assert_eq!(script.library.uri, MAIN_DART);
            assert!(script
                .source
                .as_deref()
                .is_some_and(|source| source.contains("void main()")));
            assert_eq!(
                script.token_pos_table,
                vec![
                    vec![2, 20_003, 3],
                    vec![3, 30_003, 3],
                    vec![4, 40_003, 3],
                    vec![5, 50_003, 3],
                ]
            );
        }
        other => panic!("expected a script, got {other:?}"),
    }
}

#[tokio::test]
async fn paused_isolates_are_destroyed_cleanly() {
    let harness = Harness::start().await;
    let script = harness.script_id(MAIN_DART);
    harness
        .service
        .add_breakpoint(&harness.isolate_id(), &script, 3)
        .await
        .unwrap();
    harness.run_to_pause().await;

    let mut isolate_events = harness.subscribe("Isolate");
    harness.service.destroy_isolate().await;
    wait_for(&mut isolate_events, EventKind::IsolateExit).await;
    assert!(harness.service.get_vm().isolates.is_empty());

    let recreated = harness.service.create_isolate();
    assert_eq!(recreated.id, "isolates/2");
    assert_eq!(harness.service.create_isolate(), recreated);
}
