use nova_cdp::mock::MockValue;
use nova_vm_service::protocol::EventKind;
use nova_vm_service::ServiceError;
use serde_json::{json, Map};

use crate::harness::{wait_for, Harness};

async fn register(harness: &Harness, method: &str) {
    let mut isolate_events = harness.subscribe("Isolate");
    harness
        .mock
        .emit_console(
            "debug",
            vec![
                MockValue::str("dart.developer.registerExtension"),
                MockValue::str(method),
            ],
        )
        .await;
    let added = wait_for(&mut isolate_events, EventKind::ServiceExtensionAdded).await;
    assert_eq!(added.extension_rpc.as_deref(), Some(method));
}

#[tokio::test]
async fn registered_extensions_are_listed_and_callable() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    register(&harness, "ext.app.ping").await;

    assert_eq!(
        harness.service.get_isolate(&isolate).unwrap().extension_rpcs,
        vec!["ext.app.ping".to_string()]
    );

    let mut args = Map::new();
    args.insert("count".to_string(), json!(3));
    args.insert("label".to_string(), json!("hi"));
    let reply = harness
        .service
        .call_service_extension("ext.app.ping", Some(&isolate), args)
        .await
        .unwrap();
    assert_eq!(reply, json!({ "pong": true }));

    assert_eq!(
        harness.mock.extension_calls().await,
        vec![(
            "ext.app.ping".to_string(),
            json!({ "count": "3", "label": "hi" })
        )]
    );
}

#[tokio::test]
async fn unregistered_extensions_are_unknown_methods() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();

    let err = harness
        .service
        .call_service_extension("ext.app.ping", Some(&isolate), Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::MethodNotFound(_)));
    assert_eq!(err.code(), -32601);
    assert!(harness.mock.extension_calls().await.is_empty());
}

#[tokio::test]
async fn extension_errors_keep_their_code() {
    let harness = Harness::start().await;
    register(&harness, "ext.app.fail").await;

    let err = harness
        .service
        .call_service_extension("ext.app.fail", None, Map::new())
        .await
        .unwrap_err();
    match &err {
        ServiceError::Extension {
            code,
            message,
            details,
        } => {
            assert_eq!(*code, -32010);
            assert_eq!(message, "reset failed");
            assert_eq!(details, "at reset (app.dart:10)");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(err.code(), -32010);
    assert_eq!(err.data(), Some(json!({ "details": "at reset (app.dart:10)" })));
}

#[tokio::test]
async fn handlers_that_throw_are_server_errors() {
    let harness = Harness::start().await;
    register(&harness, "ext.app.gone").await;

    let err = harness
        .service
        .call_service_extension("ext.app.gone", None, Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Extension { code: -32000, .. }));
}

#[tokio::test]
async fn registering_twice_lists_the_extension_once() {
    let harness = Harness::start().await;
    register(&harness, "ext.app.ping").await;
    register(&harness, "ext.app.ping").await;

    let isolate = harness.service.get_isolate(&harness.isolate_id()).unwrap();
    assert_eq!(isolate.extension_rpcs, vec!["ext.app.ping".to_string()]);
}
