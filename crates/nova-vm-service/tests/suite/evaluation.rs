use std::collections::BTreeMap;

use nova_vm_service::protocol::{EvalResult, InstanceKind};
use nova_vm_service::ServiceError;

use crate::harness::Harness;

fn value_as_string(result: &EvalResult) -> Option<&str> {
    result.instance()?.value_as_string.as_deref()
}

#[tokio::test]
async fn library_evaluation_returns_instance_refs() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let library = harness.root_library_id();

    let answer = harness
        .service
        .evaluate(&isolate, &library, "answer", None)
        .await
        .unwrap();
    let instance = answer.instance().expect("instance");
    assert_eq!(instance.kind, InstanceKind::Double);
    assert_eq!(instance.id, "objects/double-42");
    assert_eq!(value_as_string(&answer), Some("42"));

    let length = harness
        .service
        .evaluate(&isolate, &library, "items.length", None)
        .await
        .unwrap();
    assert_eq!(value_as_string(&length), Some("1001"));
}

#[tokio::test]
async fn thrown_errors_come_back_as_error_refs() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let library = harness.root_library_id();

    let result = harness
        .service
        .evaluate(&isolate, &library, "missing + 1", None)
        .await
        .unwrap();
    let error = result.error().expect("error ref");
    assert!(
        error.message.contains("not defined"),
        "unexpected message {:?}",
        error.message
    );
    assert!(error.id.starts_with("objects/"));
}

#[tokio::test]
async fn scope_ids_are_bound_by_name() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let library = harness.root_library_id();

    let answer = harness
        .service
        .evaluate(&isolate, &library, "answer", None)
        .await
        .unwrap();
    let answer_id = answer.instance().expect("instance").id.clone();
    let items = harness
        .service
        .evaluate(&isolate, &library, "items", None)
        .await
        .unwrap();
    let items_id = items.instance().expect("instance").id.clone();

    let scope = BTreeMap::from([
        ("x".to_string(), answer_id),
        ("list".to_string(), items_id),
    ]);
    let sum = harness
        .service
        .evaluate(&isolate, &library, "x + list[4]", Some(scope))
        .await
        .unwrap();
    assert_eq!(value_as_string(&sum), Some("46"));

    let calls = harness.mock.calls("Runtime.callFunctionOn").await;
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0]["functionDeclaration"],
        "function(list, x) { return x + list[4]; }"
    );

    let stale = BTreeMap::from([("y".to_string(), "objects/99999".to_string())]);
    let err = harness
        .service
        .evaluate(&isolate, &library, "y", Some(stale))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidArgument(_)));
}

#[tokio::test]
async fn instance_targets_bind_this() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let library = harness.root_library_id();

    let point = harness
        .service
        .evaluate(&isolate, &library, "point", None)
        .await
        .unwrap();
    let point = point.instance().expect("instance");
    assert_eq!(point.kind, InstanceKind::PlainInstance);
    assert_eq!(point.class_ref.name, "Point");

    let sum = harness
        .service
        .evaluate(&isolate, &point.id, "this.x + this.y", None)
        .await
        .unwrap();
    assert_eq!(value_as_string(&sum), Some("7"));
}

#[tokio::test]
async fn primitives_cannot_be_evaluation_targets() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();

    let err = harness
        .service
        .evaluate(&isolate, "objects/double-42", "this", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidArgument(_)));

    let unknown = harness
        .service
        .evaluate(&isolate, "objects/12345", "this", None)
        .await
        .unwrap_err();
    assert!(matches!(unknown, ServiceError::InvalidArgument(_)));
}

#[tokio::test]
async fn blank_expressions_fail_to_compile() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let library = harness.root_library_id();

    let err = harness
        .service
        .evaluate(&isolate, &library, "   ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Compile(_)));
    assert_eq!(err.code(), 113);
}
