use nova_vm_service::protocol::{EventKind, Obj};
use nova_vm_service::ServiceError;

use crate::harness::{
    next_event, wait_for, Harness, HELPER_DART, HELPER_FILE, MAIN_DART, MAIN_JS,
};

#[tokio::test]
async fn adding_the_same_breakpoint_twice_returns_the_existing_one() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let script = harness.script_id(MAIN_DART);
    let mut debug = harness.subscribe("Debug");

    let first = harness
        .service
        .add_breakpoint(&isolate, &script, 3)
        .await
        .unwrap();
    assert!(first.resolved);
    assert_eq!(first.location.line, Some(3));
    assert_eq!(first.location.column, Some(3));
    assert_eq!(first.location.script.uri, MAIN_DART);

    let added = next_event(&mut debug).await;
    assert_eq!(added.kind, EventKind::BreakpointAdded);
    assert_eq!(added.breakpoint.as_ref().map(|b| b.id.as_str()), Some(first.id.as_str()));

    let second = harness
        .service
        .add_breakpoint(&isolate, &script, 3)
        .await
        .unwrap();
    assert_eq!(second.id, first.id);

    let placed = harness.mock.calls("Debugger.setBreakpointByUrl").await;
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0]["url"], MAIN_JS);
    assert_eq!(placed[0]["lineNumber"], 2);
    assert_eq!(placed[0]["columnNumber"], 2);

    let isolate_state = harness.service.get_isolate(&isolate).unwrap();
    assert_eq!(isolate_state.breakpoints.len(), 1);
}

#[tokio::test]
async fn removing_a_breakpoint_twice_fails_the_second_time() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let script = harness.script_id(MAIN_DART);

    let breakpoint = harness
        .service
        .add_breakpoint(&isolate, &script, 4)
        .await
        .unwrap();
    let mut debug = harness.subscribe("Debug");

    harness
        .service
        .remove_breakpoint(Some(&isolate), Some(&breakpoint.id))
        .await
        .unwrap();
    let removed = wait_for(&mut debug, EventKind::BreakpointRemoved).await;
    assert_eq!(removed.breakpoint.map(|b| b.id), Some(breakpoint.id.clone()));
    assert!(harness.mock.breakpoints().await.is_empty());

    let again = harness
        .service
        .remove_breakpoint(Some(&isolate), Some(&breakpoint.id))
        .await;
    assert!(matches!(again, Err(ServiceError::InvalidArgument(_))));
}

#[tokio::test]
async fn remove_breakpoint_requires_both_ids() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();

    let missing_isolate = harness
        .service
        .remove_breakpoint(None, Some("breakpoints/1"))
        .await;
    assert!(matches!(missing_isolate, Err(ServiceError::InvalidArgument(_))));

    let missing_breakpoint = harness.service.remove_breakpoint(Some(&isolate), None).await;
    assert!(matches!(missing_breakpoint, Err(ServiceError::InvalidArgument(_))));
}

#[tokio::test]
async fn lines_without_code_cannot_take_a_breakpoint() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let script = harness.script_id(MAIN_DART);

    let err = harness
        .service
        .add_breakpoint(&isolate, &script, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidLocation(_)));
    assert_eq!(err.code(), 102);
    assert!(harness.mock.calls("Debugger.setBreakpointByUrl").await.is_empty());

    let unknown = harness
        .service
        .add_breakpoint(&isolate, "scripts/99", 3)
        .await;
    assert!(matches!(unknown, Err(ServiceError::InvalidArgument(_))));
}

#[tokio::test]
async fn breakpoints_by_uri_accept_the_file_form_of_part_files() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();

    let by_package = harness
        .service
        .add_breakpoint_with_script_uri(&isolate, HELPER_DART, 2)
        .await
        .unwrap();
    assert_eq!(by_package.location.script.uri, HELPER_DART);

    let by_file = harness
        .service
        .add_breakpoint_with_script_uri(&isolate, HELPER_FILE, 2)
        .await
        .unwrap();
    assert_eq!(by_file.id, by_package.id);

    let placed = harness.mock.calls("Debugger.setBreakpointByUrl").await;
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0]["url"], MAIN_JS);
    assert_eq!(placed[0]["lineNumber"], 10);

    let unknown = harness
        .service
        .add_breakpoint_with_script_uri(&isolate, "package:app/missing.dart", 2)
        .await;
    assert!(matches!(unknown, Err(ServiceError::InvalidArgument(_))));
}

#[tokio::test]
async fn breakpoints_are_objects() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let script = harness.script_id(MAIN_DART);
    let breakpoint = harness
        .service
        .add_breakpoint(&isolate, &script, 5)
        .await
        .unwrap();

    match harness
        .service
        .get_object(&isolate, &breakpoint.id, None, None)
        .await
        .unwrap()
    {
        Obj::Breakpoint(found) => assert_eq!(found, breakpoint),
        other => panic!("expected a breakpoint, got {other:?}"),
    }
}

#[tokio::test]
async fn breakpoint_hits_report_the_breakpoint() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let script = harness.script_id(MAIN_DART);
    let breakpoint = harness
        .service
        .add_breakpoint(&isolate, &script, 3)
        .await
        .unwrap();

    let pause = harness.run_to_pause().await;
    assert_eq!(pause.kind, EventKind::PauseBreakpoint);
    assert_eq!(pause.breakpoint.as_ref().map(|b| &b.id), Some(&breakpoint.id));
    assert_eq!(
        pause.pause_breakpoints.as_ref().map(|hits| hits.len()),
        Some(1)
    );
    let top = pause.top_frame.expect("top frame");
    let location = top.location.expect("source location");
    assert_eq!(location.script.uri, MAIN_DART);
    assert_eq!(location.line, Some(3));
}
