use nova_cdp::mock::{MockStop, MockValue};
use nova_vm_service::protocol::{CodeKind, Event, EventKind, InstanceKind};
use nova_vm_service::ServiceError;

use crate::harness::{
    helper_frame, main_frame, program, wait_for, wait_for_pause, Harness, HELPER_DART,
    MAIN_DART,
};

fn top_line(event: &Event) -> (String, u32) {
    let location = event
        .top_frame
        .as_ref()
        .and_then(|frame| frame.location.as_ref())
        .expect("pause at a source location");
    (location.script.uri.clone(), location.line.expect("line"))
}

/// Break at `uri:line`, run to it and drop the breakpoint again.
async fn pause_at(harness: &Harness, uri: &str, line: u32) {
    let isolate = harness.isolate_id();
    let breakpoint = harness
        .service
        .add_breakpoint(&isolate, &harness.script_id(uri), line)
        .await
        .unwrap();
    let pause = harness.run_to_pause().await;
    assert_eq!(pause.kind, EventKind::PauseBreakpoint);
    assert_eq!(top_line(&pause), (uri.to_string(), line));
    harness
        .service
        .remove_breakpoint(Some(&isolate), Some(&breakpoint.id))
        .await
        .unwrap();
}

async fn step(harness: &Harness, option: &str) -> Event {
    let mut debug = harness.subscribe("Debug");
    harness
        .service
        .resume(&harness.isolate_id(), Some(option))
        .await
        .unwrap();
    wait_for_pause(&mut debug).await
}

#[tokio::test]
async fn isolates_start_paused_and_report_each_transition() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    assert_eq!(
        harness.service.get_isolate(&isolate).unwrap().pause_event.kind,
        EventKind::PauseStart
    );
    assert_eq!(
        harness.service.get_stack(&isolate).unwrap().map(|s| s.frames.len()),
        Some(0)
    );

    let mut debug = harness.subscribe("Debug");
    harness.service.resume(&isolate, None).await.unwrap();
    assert_eq!(wait_for(&mut debug, EventKind::Resume).await.kind, EventKind::Resume);
    assert_eq!(
        harness.service.get_isolate(&isolate).unwrap().pause_event.kind,
        EventKind::Resume
    );
    assert!(harness.service.get_stack(&isolate).unwrap().is_none());

    harness.service.pause(&isolate).await.unwrap();
    let paused = wait_for(&mut debug, EventKind::PauseInterrupted).await;
    assert_eq!(top_line(&paused), (MAIN_DART.to_string(), 5));
    assert_eq!(
        harness.service.get_isolate(&isolate).unwrap().pause_event.kind,
        EventKind::PauseInterrupted
    );
    assert_eq!(
        harness.service.get_stack(&isolate).unwrap().map(|s| s.frames.len()),
        Some(1)
    );

    harness.service.resume(&isolate, None).await.unwrap();
    wait_for(&mut debug, EventKind::Resume).await;
    assert_eq!(
        harness.service.get_isolate(&isolate).unwrap().pause_event.kind,
        EventKind::Resume
    );
}

#[tokio::test]
async fn resume_while_running_is_rejected() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let mut debug = harness.subscribe("Debug");
    harness.service.resume(&isolate, None).await.unwrap();
    wait_for(&mut debug, EventKind::Resume).await;

    let err = harness.service.resume(&isolate, None).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotPaused(_)));
    assert_eq!(err.code(), 106);

    let rewind = harness.service.resume(&isolate, Some("Rewind")).await;
    assert!(matches!(rewind, Err(ServiceError::Unsupported(_))));

    let bogus = harness.service.resume(&isolate, Some("Sideways")).await;
    assert!(matches!(bogus, Err(ServiceError::InvalidArgument(_))));
}

#[tokio::test]
async fn pausing_a_paused_isolate_is_a_no_op() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    harness.service.pause(&isolate).await.unwrap();
    assert!(harness.mock.calls("Debugger.pause").await.is_empty());
}

#[tokio::test]
async fn step_into_skips_runtime_only_frames() {
    let harness = Harness::start().await;
    pause_at(&harness, MAIN_DART, 3).await;

    let pause = step(&harness, "Into").await;
    assert_eq!(pause.kind, EventKind::PauseInterrupted);
    assert_eq!(top_line(&pause), (HELPER_DART.to_string(), 2));
    assert_eq!(harness.mock.calls("Debugger.stepInto").await.len(), 2);

    let stack = harness
        .service
        .get_stack(&harness.isolate_id())
        .unwrap()
        .expect("paused");
    let kinds: Vec<CodeKind> = stack.frames.iter().map(|f| f.code.kind).collect();
    assert_eq!(kinds, vec![CodeKind::Dart, CodeKind::Native, CodeKind::Dart]);
}

#[tokio::test]
async fn step_over_stays_in_the_current_function() {
    let harness = Harness::start().await;
    pause_at(&harness, MAIN_DART, 3).await;

    let pause = step(&harness, "Over").await;
    assert_eq!(top_line(&pause), (MAIN_DART.to_string(), 4));
}

#[tokio::test]
async fn step_out_continues_through_runtime_callers() {
    let harness = Harness::start().await;
    pause_at(&harness, HELPER_DART, 2).await;

    let pause = step(&harness, "Out").await;
    assert_eq!(pause.kind, EventKind::PauseInterrupted);
    assert_eq!(top_line(&pause), (MAIN_DART.to_string(), 4));
    assert_eq!(harness.mock.calls("Debugger.stepOut").await.len(), 2);
}

#[tokio::test]
async fn stepping_off_the_end_runs_to_completion() {
    let harness = Harness::start().await;
    pause_at(&harness, MAIN_DART, 5).await;

    let mut debug = harness.subscribe("Debug");
    harness
        .service
        .resume(&harness.isolate_id(), Some("Over"))
        .await
        .unwrap();
    wait_for(&mut debug, EventKind::Resume).await;
    assert!(harness
        .service
        .get_stack(&harness.isolate_id())
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn exception_pause_modes_are_validated_and_forwarded() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();

    harness
        .service
        .set_exception_pause_mode(&isolate, "All")
        .await
        .unwrap();
    harness
        .service
        .set_exception_pause_mode(&isolate, "unhandled")
        .await
        .unwrap();
    let err = harness
        .service
        .set_exception_pause_mode(&isolate, "Sometimes")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidArgument(_)));

    let states: Vec<String> = harness
        .mock
        .calls("Debugger.setPauseOnExceptions")
        .await
        .iter()
        .map(|params| params["state"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(states, vec!["all", "uncaught"]);
    assert_eq!(
        serde_json::to_value(
            harness
                .service
                .get_isolate(&isolate)
                .unwrap()
                .exception_pause_mode
        )
        .unwrap(),
        "Unhandled"
    );
}

#[tokio::test]
async fn thrown_exceptions_pause_when_requested() {
    let mut config = program();
    let mut throwing = MockStop::new(vec![main_frame(3)]);
    throwing.throws = Some(MockValue::object(
        "StateError",
        vec![("message", MockValue::str("bad state"))],
    ));
    config.trace = vec![MockStop::new(vec![main_frame(1)]), throwing];
    let harness = Harness::start_with(config).await;
    let isolate = harness.isolate_id();

    harness
        .service
        .set_exception_pause_mode(&isolate, "Unhandled")
        .await
        .unwrap();
    let pause = harness.run_to_pause().await;
    assert_eq!(pause.kind, EventKind::PauseException);
    assert_eq!(top_line(&pause), (MAIN_DART.to_string(), 4));
    let exception = pause.exception.expect("exception");
    assert_eq!(exception.kind, InstanceKind::PlainInstance);
    assert_eq!(exception.class_ref.name, "StateError");
}

#[tokio::test]
async fn evaluate_in_frame_sees_frame_locals() {
    let harness = Harness::start().await;
    pause_at(&harness, HELPER_DART, 2).await;
    let isolate = harness.isolate_id();

    let stack = harness.service.get_stack(&isolate).unwrap().expect("paused");
    let names: Vec<&str> = stack.frames[0].vars.iter().map(|v| v.name.as_str()).collect();
    assert_eq!(names, vec!["n"]);

    let doubled = harness
        .service
        .evaluate_in_frame(&isolate, 0, "n * 2")
        .await
        .unwrap();
    assert_eq!(
        doubled.instance().and_then(|i| i.value_as_string.as_deref()),
        Some("6")
    );

    let capped = harness
        .service
        .evaluate_in_frame(&isolate, 0, "Math.max(n, 10)")
        .await
        .unwrap();
    assert_eq!(
        capped.instance().and_then(|i| i.value_as_string.as_deref()),
        Some("10")
    );

    let out_of_range = harness.service.evaluate_in_frame(&isolate, 7, "n").await;
    assert!(matches!(out_of_range, Err(ServiceError::InvalidArgument(_))));
}

#[tokio::test]
async fn evaluate_in_frame_binds_the_receiver() {
    let mut config = program();
    let receiver = MockValue::object("Counter", vec![("step", MockValue::Number(5.0))]);
    config.trace = vec![
        MockStop::new(vec![main_frame(1)]),
        MockStop::new(vec![helper_frame(10).with_this(receiver), main_frame(2)]),
    ];
    let harness = Harness::start_with(config).await;
    pause_at(&harness, HELPER_DART, 2).await;

    let scaled = harness
        .service
        .evaluate_in_frame(&harness.isolate_id(), 0, "this.step * n")
        .await
        .unwrap();
    assert_eq!(
        scaled.instance().and_then(|i| i.value_as_string.as_deref()),
        Some("15")
    );
}

#[tokio::test]
async fn evaluate_in_frame_requires_a_pause() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let mut debug = harness.subscribe("Debug");
    harness.service.resume(&isolate, None).await.unwrap();
    wait_for(&mut debug, EventKind::Resume).await;

    let err = harness
        .service
        .evaluate_in_frame(&isolate, 0, "1 + 1")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotPaused(_)));
}
