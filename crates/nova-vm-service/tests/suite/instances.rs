use nova_vm_service::protocol::{Instance, InstanceKind, Obj};
use nova_vm_service::ServiceError;

use crate::harness::{long_string, Harness};

async fn global_id(harness: &Harness, name: &str) -> String {
    harness
        .service
        .evaluate(&harness.isolate_id(), &harness.root_library_id(), name, None)
        .await
        .unwrap()
        .instance()
        .expect("instance")
        .id
        .clone()
}

async fn instance(
    harness: &Harness,
    id: &str,
    offset: Option<usize>,
    count: Option<usize>,
) -> Instance {
    match harness
        .service
        .get_object(&harness.isolate_id(), id, offset, count)
        .await
        .unwrap()
    {
        Obj::Instance(instance) => instance,
        other => panic!("expected an instance, got {other:?}"),
    }
}

fn element_strings(instance: &Instance) -> Vec<String> {
    instance
        .elements
        .as_ref()
        .expect("elements")
        .iter()
        .map(|e| e.value_as_string.clone().unwrap_or_default())
        .collect()
}

#[tokio::test]
async fn lists_are_windowed_by_offset_and_count() {
    let harness = Harness::start().await;
    let items = global_id(&harness, "items").await;

    let full = instance(&harness, &items, None, None).await;
    assert_eq!(full.kind, InstanceKind::List);
    assert_eq!(full.length, Some(1001));
    assert_eq!(full.offset, None);
    assert_eq!(full.count, None);
    assert_eq!(full.elements.as_ref().map(Vec::len), Some(1001));

    let window = instance(&harness, &items, Some(4), Some(7)).await;
    assert_eq!(window.length, Some(1001));
    assert_eq!(window.offset, Some(4));
    assert_eq!(window.count, Some(7));
    let elements = window.elements.as_ref().expect("elements");
    assert_eq!(elements.len(), 7);
    assert_eq!(elements[0], full.elements.as_ref().expect("elements")[4]);
    assert_eq!(element_strings(&window), ["4", "5", "6", "7", "8", "9", "10"]);

    let tail = instance(&harness, &items, Some(1000), Some(5)).await;
    assert_eq!(tail.count, Some(1));
    assert_eq!(element_strings(&tail), ["1000"]);
}

#[tokio::test]
async fn maps_are_windowed_into_associations() {
    let harness = Harness::start().await;
    let counts = global_id(&harness, "counts").await;

    let full = instance(&harness, &counts, None, None).await;
    assert_eq!(full.kind, InstanceKind::Map);
    assert_eq!(full.length, Some(3));
    let associations = full.associations.as_ref().expect("associations");
    assert_eq!(associations.len(), 3);
    assert_eq!(associations[0].key.value_as_string.as_deref(), Some("a"));
    assert_eq!(associations[0].value.value_as_string.as_deref(), Some("1"));

    let window = instance(&harness, &counts, Some(1), Some(1)).await;
    assert_eq!(window.offset, Some(1));
    assert_eq!(window.count, Some(1));
    let associations = window.associations.as_ref().expect("associations");
    assert_eq!(associations.len(), 1);
    assert_eq!(associations[0].key.value_as_string.as_deref(), Some("b"));
}

#[tokio::test]
async fn long_strings_are_truncated_in_refs() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();
    let library = harness.root_library_id();

    for (name, len, truncated) in [("long", 1250, true), ("exact", 128, false), ("over", 129, true)] {
        let result = harness
            .service
            .evaluate(&isolate, &library, name, None)
            .await
            .unwrap();
        let value = result.instance().expect("instance");
        assert_eq!(value.kind, InstanceKind::String);
        assert_eq!(value.length, Some(len), "{name}");
        assert_eq!(
            value.value_as_string.as_deref(),
            Some(long_string(len.min(128)).as_str()),
            "{name}"
        );
        assert_eq!(
            value.value_as_string_is_truncated,
            truncated.then_some(true),
            "{name}"
        );
    }
}

#[tokio::test]
async fn string_windows_select_characters() {
    let harness = Harness::start().await;
    let long = global_id(&harness, "long").await;

    let window = instance(&harness, &long, Some(1200), Some(100)).await;
    assert_eq!(window.offset, Some(1200));
    assert_eq!(window.count, Some(50));
    assert_eq!(
        window.value_as_string.as_deref(),
        Some(&long_string(1250)[1200..])
    );
    assert_eq!(window.value_as_string_is_truncated, Some(true));
}

#[tokio::test]
async fn plain_instances_list_their_fields() {
    let harness = Harness::start().await;
    let point = global_id(&harness, "point").await;

    let point = instance(&harness, &point, None, None).await;
    assert_eq!(point.kind, InstanceKind::PlainInstance);
    assert_eq!(point.class_ref.name, "Point");
    let fields: Vec<(String, Option<String>)> = point
        .fields
        .as_ref()
        .expect("fields")
        .iter()
        .map(|f| (f.name.clone(), f.value.value_as_string.clone()))
        .collect();
    assert_eq!(
        fields,
        vec![
            ("x".to_string(), Some("3".to_string())),
            ("y".to_string(), Some("4".to_string())),
        ]
    );
}

#[tokio::test]
async fn primitive_ids_resolve_without_the_backend() {
    let harness = Harness::start().await;
    let answer = instance(&harness, "objects/double-42", None, None).await;
    assert_eq!(answer.kind, InstanceKind::Double);
    assert_eq!(answer.value_as_string.as_deref(), Some("42"));

    let null = instance(&harness, "objects/null", None, None).await;
    assert_eq!(null.kind, InstanceKind::Null);
}

#[tokio::test]
async fn unknown_object_ids_are_invalid() {
    let harness = Harness::start().await;
    let isolate = harness.isolate_id();

    for id in ["objects/4242", "nonsense", "libraries/9"] {
        let result = harness.service.get_object(&isolate, id, None, None).await;
        assert!(
            matches!(result, Err(ServiceError::InvalidArgument(_))),
            "{id}"
        );
    }
}
