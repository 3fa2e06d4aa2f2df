use nova_vm_service::service::{POSSIBLE_BREAKPOINTS, UNSUPPORTED_METHODS};
use nova_vm_service::wire_server::dispatch;
use nova_vm_service::ServiceError;
use serde_json::json;

use crate::harness::{Harness, HELPER_DART, MAIN_DART};

#[tokio::test]
async fn version_and_vm_describe_the_proxy() {
    let harness = Harness::start().await;

    let version = harness.service.get_version();
    assert_eq!(version.major, 3);
    assert!(version.minor > 0);

    let vm = harness.service.get_vm();
    assert_eq!(vm.name, "ChromeDebugProxy");
    assert_eq!(vm.target_cpu, "javascript");
    assert_eq!(vm.isolates.len(), 1);
    assert_eq!(vm.isolates[0].id, harness.isolate_id());

    let json = serde_json::to_value(&vm).unwrap();
    assert_eq!(json["type"], "VM");
}

#[tokio::test]
async fn unsupported_methods_fail_uniformly() {
    let harness = Harness::start().await;
    let params = json!({ "isolateId": harness.isolate_id() });

    for method in UNSUPPORTED_METHODS {
        let err = dispatch(&harness.service, method, &params).await.unwrap_err();
        assert!(err.is_unsupported(), "{method}");
        assert_eq!(err.code(), -32601, "{method}");
    }

    let unknown = dispatch(&harness.service, "getFlux", &params).await.unwrap_err();
    assert!(matches!(unknown, ServiceError::MethodNotFound(_)));
}

#[tokio::test]
async fn source_reports_list_possible_breakpoints() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let main = harness.script_id(MAIN_DART);
    let kinds = vec![POSSIBLE_BREAKPOINTS.to_string()];

    let report = harness
        .service
        .get_source_report(Some(&isolate), &kinds, Some(&main))
        .unwrap();
    assert_eq!(report.scripts.len(), 1);
    assert_eq!(report.scripts[0].uri, MAIN_DART);
    assert_eq!(report.ranges.len(), 1);
    let range = &report.ranges[0];
    assert_eq!(range.script_index, 0);
    assert!(range.compiled);
    assert_eq!(range.possible_breakpoints, vec![20_003, 30_003, 40_003, 50_003]);
    assert_eq!(range.start_pos, 20_003);
    assert_eq!(range.end_pos, 50_003);

    let everything = harness
        .service
        .get_source_report(Some(&isolate), &kinds, None)
        .unwrap();
    let uris: Vec<&str> = everything.scripts.iter().map(|s| s.uri.as_str()).collect();
    assert_eq!(uris, vec![MAIN_DART, HELPER_DART]);
    assert_eq!(everything.ranges[1].possible_breakpoints, vec![20_003, 30_003]);
}

#[tokio::test]
async fn source_reports_validate_their_arguments() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let kinds = vec![POSSIBLE_BREAKPOINTS.to_string()];

    let cases = [
        harness.service.get_source_report(None, &kinds, None),
        harness.service.get_source_report(Some(&isolate), &[], None),
        harness
            .service
            .get_source_report(Some(&isolate), &["Coverage".to_string()], None),
        harness
            .service
            .get_source_report(Some(&isolate), &kinds, Some("scripts/42")),
        harness
            .service
            .get_source_report(Some("isolates/9"), &kinds, None),
    ];
    for (index, case) in cases.into_iter().enumerate() {
        assert!(
            matches!(case, Err(ServiceError::InvalidArgument(_))),
            "case {index}"
        );
    }
}

#[tokio::test]
async fn streams_must_be_known_and_listened_before_cancel() {
    let harness = Harness::start().await;

    assert!(matches!(
        harness.service.stream_listen("Bogus"),
        Err(ServiceError::InvalidArgument(_))
    ));
    assert!(matches!(
        harness.service.stream_cancel("Debug"),
        Err(ServiceError::InvalidArgument(_))
    ));
    harness.service.stream_listen("Debug").unwrap();
    harness.service.stream_cancel("Debug").unwrap();

    harness.service.stream_listen("Timeline").unwrap();
    assert!(harness
        .service
        .stream_cancel("Timeline")
        .unwrap_err()
        .is_unsupported());
}
