use base64::{engine::general_purpose, Engine as _};
use nova_cdp::mock::MockValue;
use nova_vm_service::protocol::{Event, EventKind, InstanceKind};
use serde_json::json;

use crate::harness::{assert_quiet, next_event, wait_for, Harness};

fn decoded(event: &Event) -> String {
    let bytes = event.bytes.as_deref().expect("write event bytes");
    String::from_utf8(general_purpose::STANDARD.decode(bytes).expect("base64")).expect("utf-8")
}

#[tokio::test]
async fn console_output_is_split_by_severity() {
    let harness = Harness::start().await;
    let mut stdout = harness.subscribe("Stdout");
    let mut stderr = harness.subscribe("Stderr");

    harness
        .mock
        .emit_console("log", vec![MockValue::str("hello"), MockValue::Number(3.0)])
        .await;
    let written = next_event(&mut stdout).await;
    assert_eq!(written.kind, EventKind::WriteEvent);
    assert_eq!(written.isolate_id(), Some(harness.isolate_id().as_str()));
    assert_eq!(decoded(&written), "hello 3\n");

    harness
        .mock
        .emit_console("error", vec![MockValue::str("boom")])
        .await;
    assert_eq!(decoded(&next_event(&mut stderr).await), "boom\n");
    assert_quiet(&mut stdout).await;
}

#[tokio::test]
async fn uncaught_exceptions_are_written_to_stderr() {
    let harness = Harness::start().await;
    let mut stderr = harness.subscribe("Stderr");

    harness.mock.emit_exception_thrown("Error: kaboom").await;
    let written = wait_for(&mut stderr, EventKind::WriteEvent).await;
    assert!(decoded(&written).contains("kaboom"));
}

#[tokio::test]
async fn inspect_requests_become_debug_events() {
    let harness = Harness::start().await;
    let mut debug = harness.subscribe("Debug");

    harness
        .mock
        .emit_inspect(MockValue::object(
            "Point",
            vec![("x", MockValue::Number(1.0))],
        ))
        .await;
    let inspect = wait_for(&mut debug, EventKind::Inspect).await;
    let inspectee = inspect.inspectee.expect("inspectee");
    assert_eq!(inspectee.kind, InstanceKind::PlainInstance);
    assert_eq!(inspectee.class_ref.name, "Point");

    // The id stays usable for follow-up requests.
    let object = harness
        .service
        .get_object(&harness.isolate_id(), &inspectee.id, None, None)
        .await;
    assert!(object.is_ok());
}

#[tokio::test]
async fn developer_inspect_calls_are_not_printed() {
    let harness = Harness::start().await;
    let mut debug = harness.subscribe("Debug");
    let mut stdout = harness.subscribe("Stdout");

    harness
        .mock
        .emit_console(
            "log",
            vec![
                MockValue::str("dart.developer.inspect"),
                MockValue::Array(vec![MockValue::Number(1.0)]),
            ],
        )
        .await;
    let inspect = wait_for(&mut debug, EventKind::Inspect).await;
    assert_eq!(
        inspect.inspectee.map(|i| i.kind),
        Some(InstanceKind::List)
    );
    assert_quiet(&mut stdout).await;
}

#[tokio::test]
async fn posted_events_reach_the_extension_stream() {
    let harness = Harness::start().await;
    let mut extension = harness.subscribe("Extension");

    harness
        .mock
        .emit_console(
            "debug",
            vec![
                MockValue::str("dart.developer.postEvent"),
                MockValue::str("app.ready"),
                MockValue::str(r#"{"ok":true,"count":2}"#),
            ],
        )
        .await;
    let event = next_event(&mut extension).await;
    assert_eq!(event.kind, EventKind::Extension);
    assert_eq!(event.extension_kind.as_deref(), Some("app.ready"));
    assert_eq!(event.extension_data, Some(json!({ "ok": true, "count": 2 })));
}
