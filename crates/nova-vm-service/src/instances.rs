//! Rendering of backend values as frontend instances.

use nova_cdp::{CdpClient, PropertyDescriptor, RemoteObject, RemoteObjectType};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{ServiceError, ServiceResult};
use crate::object_registry::{is_primitive, ObjectRegistry};
use crate::protocol::{BoundField, ClassRef, Instance, InstanceKind, InstanceRef, MapAssociation};

/// Characters of a string rendered when no window is requested.
pub const STRING_CAP: usize = 128;

const NULL_ID: &str = "objects/null";
const BOOL_ID_PREFIX: &str = "objects/bool-";
const DOUBLE_ID_PREFIX: &str = "objects/double-";

pub fn class_ref(name: &str) -> ClassRef {
    ClassRef {
        id: format!("classes/{name}"),
        name: name.to_string(),
        library: None,
    }
}

pub fn instance_kind(remote: &RemoteObject) -> InstanceKind {
    match remote.type_ {
        RemoteObjectType::Undefined => InstanceKind::Null,
        RemoteObjectType::Boolean => InstanceKind::Bool,
        RemoteObjectType::Number | RemoteObjectType::Bigint => InstanceKind::Double,
        RemoteObjectType::String => InstanceKind::String,
        RemoteObjectType::Function => InstanceKind::Closure,
        RemoteObjectType::Symbol => InstanceKind::PlainInstance,
        RemoteObjectType::Object => {
            if remote.is_null() {
                InstanceKind::Null
            } else if remote.subtype_is("array") {
                InstanceKind::List
            } else if remote.subtype_is("map") {
                InstanceKind::Map
            } else {
                InstanceKind::PlainInstance
            }
        }
    }
}

fn class_name(kind: InstanceKind, remote: &RemoteObject) -> String {
    match kind {
        InstanceKind::Null => "Null".to_string(),
        InstanceKind::Bool => "bool".to_string(),
        InstanceKind::Double => "double".to_string(),
        InstanceKind::String => "String".to_string(),
        InstanceKind::List => "List".to_string(),
        InstanceKind::Map => "Map".to_string(),
        InstanceKind::Closure => "Closure".to_string(),
        InstanceKind::Type => "Type".to_string(),
        InstanceKind::PlainInstance => remote
            .class_name
            .clone()
            .or_else(|| remote.description.clone())
            .unwrap_or_else(|| "Object".to_string()),
    }
}

/// Text of a number. Integral doubles print without a fraction, like the backend does.
fn number_text(remote: &RemoteObject) -> String {
    if let Some(raw) = &remote.unserializable_value {
        return raw.trim_end_matches('n').to_string();
    }
    if let Some(description) = &remote.description {
        return description.trim_end_matches('n').to_string();
    }
    match remote.value.as_ref().and_then(Value::as_f64) {
        Some(n) if n.is_finite() && n.fract() == 0.0 => format!("{n:.0}"),
        Some(n) => n.to_string(),
        None => "NaN".to_string(),
    }
}

fn bool_value(remote: &RemoteObject) -> bool {
    remote.value.as_ref().and_then(Value::as_bool).unwrap_or(false)
}

fn string_value(remote: &RemoteObject) -> String {
    match &remote.value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => remote.description.clone().unwrap_or_default(),
    }
}

/// Element count from descriptions like `Array(3)` or `Map(2)`.
fn described_length(remote: &RemoteObject) -> Option<usize> {
    let description = remote.description.as_deref()?;
    let (_, rest) = description.split_once('(')?;
    rest.strip_suffix(')')?.parse().ok()
}

/// Synthetic id for a value without identity.
fn primitive_id(kind: InstanceKind, remote: &RemoteObject) -> String {
    match kind {
        InstanceKind::Bool => format!("{BOOL_ID_PREFIX}{}", bool_value(remote)),
        InstanceKind::Double => format!("{DOUBLE_ID_PREFIX}{}", number_text(remote)),
        _ => NULL_ID.to_string(),
    }
}

/// Rebuild the value behind a synthetic id.
pub fn primitive_from_id(id: &str) -> Option<RemoteObject> {
    let mut remote = RemoteObject::undefined();
    if id == NULL_ID {
        return Some(remote);
    }
    if let Some(raw) = id.strip_prefix(BOOL_ID_PREFIX) {
        let value: bool = raw.parse().ok()?;
        remote.type_ = RemoteObjectType::Boolean;
        remote.value = Some(Value::Bool(value));
        return Some(remote);
    }
    let raw = id.strip_prefix(DOUBLE_ID_PREFIX)?;
    let value: f64 = raw.parse().ok()?;
    remote.type_ = RemoteObjectType::Number;
    remote.description = Some(raw.to_string());
    match serde_json::Number::from_f64(value) {
        Some(n) => remote.value = Some(Value::Number(n)),
        None => remote.unserializable_value = Some(raw.to_string()),
    }
    Some(remote)
}

fn char_window(text: &str, start: usize, count: usize) -> String {
    text.chars().skip(start).take(count).collect()
}

/// Clamp a requested `[offset, offset + count)` window to `length`.
///
/// Returns `None` when neither bound was requested.
pub fn window(length: usize, offset: Option<usize>, count: Option<usize>) -> Option<(usize, usize)> {
    if offset.is_none() && count.is_none() {
        return None;
    }
    let start = offset.unwrap_or(0).min(length);
    let available = length - start;
    Some((start, count.unwrap_or(available).min(available)))
}

/// Renders backend values, registering the ones that need an id.
#[derive(Clone, Copy)]
pub struct Inspector<'a> {
    client: &'a CdpClient,
    objects: &'a Mutex<ObjectRegistry>,
}

impl<'a> Inspector<'a> {
    pub fn new(client: &'a CdpClient, objects: &'a Mutex<ObjectRegistry>) -> Self {
        Self { client, objects }
    }

    pub fn instance_ref(&self, remote: &RemoteObject) -> InstanceRef {
        let kind = instance_kind(remote);
        let class_ref = class_ref(&class_name(kind, remote));
        let id = if is_primitive(remote) {
            primitive_id(kind, remote)
        } else {
            self.objects.lock().track(remote).to_string()
        };

        let mut instance = InstanceRef {
            id,
            kind,
            class_ref,
            value_as_string: None,
            value_as_string_is_truncated: None,
            length: None,
        };
        match kind {
            InstanceKind::Null => instance.value_as_string = Some("null".to_string()),
            InstanceKind::Bool => {
                instance.value_as_string = Some(bool_value(remote).to_string());
            }
            InstanceKind::Double => instance.value_as_string = Some(number_text(remote)),
            InstanceKind::String => {
                let text = string_value(remote);
                let length = text.chars().count();
                instance.value_as_string = Some(char_window(&text, 0, STRING_CAP));
                if length > STRING_CAP {
                    instance.value_as_string_is_truncated = Some(true);
                }
                instance.length = Some(length);
            }
            InstanceKind::List | InstanceKind::Map => {
                instance.length = described_length(remote);
            }
            InstanceKind::PlainInstance | InstanceKind::Closure | InstanceKind::Type => {}
        }
        instance
    }

    /// Resolve a frontend id to its backend value.
    pub fn resolve(&self, id: &str) -> ServiceResult<RemoteObject> {
        if let Some(remote) = primitive_from_id(id) {
            return Ok(remote);
        }
        self.objects.lock().lookup(id).cloned().ok_or_else(|| {
            ServiceError::invalid_argument(format!("object {id} has been collected or does not exist"))
        })
    }

    /// Expand the value behind `id` into a full instance.
    pub async fn instance(
        &self,
        id: &str,
        offset: Option<usize>,
        count: Option<usize>,
    ) -> ServiceResult<Instance> {
        let remote = self.resolve(id)?;
        let head = self.instance_ref(&remote);
        let mut instance = Instance {
            id: head.id,
            kind: head.kind,
            class_ref: head.class_ref,
            value_as_string: head.value_as_string,
            value_as_string_is_truncated: head.value_as_string_is_truncated,
            length: head.length,
            offset: None,
            count: None,
            elements: None,
            associations: None,
            fields: None,
        };

        match instance.kind {
            InstanceKind::String => {
                let text = string_value(&remote);
                let length = text.chars().count();
                if let Some((start, count)) = window(length, offset, count) {
                    instance.value_as_string = Some(char_window(&text, start, count));
                    instance.value_as_string_is_truncated =
                        (start > 0 || start + count < length).then_some(true);
                    instance.offset = Some(start);
                    instance.count = Some(count);
                }
            }
            InstanceKind::List => {
                let object_id = backend_id(&remote)?;
                let properties = self.client.get_properties(object_id).await?.result;
                let mut indexed = indexed_values(properties);
                let length = indexed.len();
                instance.length = Some(length);
                if let Some((start, count)) = window(length, offset, count) {
                    indexed = indexed.into_iter().skip(start).take(count).collect();
                    instance.offset = Some(start);
                    instance.count = Some(count);
                }
                instance.elements = Some(indexed.iter().map(|v| self.instance_ref(v)).collect());
            }
            InstanceKind::Map => {
                let (length, associations) = self.map_associations(&remote, offset, count).await?;
                instance.length = Some(length);
                if let Some((start, count)) = window(length, offset, count) {
                    instance.offset = Some(start);
                    instance.count = Some(count);
                }
                instance.associations = Some(associations);
            }
            InstanceKind::PlainInstance => {
                let fields = match remote.object_id.as_deref() {
                    Some(object_id) => self
                        .client
                        .get_properties(object_id)
                        .await?
                        .result
                        .into_iter()
                        .filter_map(|p| Some((p.name, p.value?)))
                        .map(|(name, value)| BoundField {
                            name,
                            value: self.instance_ref(&value),
                        })
                        .collect(),
                    None => Vec::new(),
                };
                instance.fields = Some(fields);
            }
            InstanceKind::Null
            | InstanceKind::Bool
            | InstanceKind::Double
            | InstanceKind::Closure
            | InstanceKind::Type => {}
        }
        Ok(instance)
    }

    /// Fetch the windowed key/value pairs of a map. Entries outside the window are not
    /// fetched.
    async fn map_associations(
        &self,
        remote: &RemoteObject,
        offset: Option<usize>,
        count: Option<usize>,
    ) -> ServiceResult<(usize, Vec<MapAssociation>)> {
        let object_id = backend_id(remote)?;
        let properties = self.client.get_properties(object_id).await?;
        let Some(entries_id) = properties
            .internal_properties
            .into_iter()
            .find(|p| p.name == "[[Entries]]")
            .and_then(|p| p.value)
            .and_then(|v| v.object_id)
        else {
            return Ok((0, Vec::new()));
        };

        let entries = indexed_values(self.client.get_properties(&entries_id).await?.result);
        let length = entries.len();
        let (start, count) = window(length, offset, count).unwrap_or((0, length));

        let mut associations = Vec::with_capacity(count);
        for entry in entries.iter().skip(start).take(count) {
            let Some(entry_id) = entry.object_id.as_deref() else {
                continue;
            };
            let mut key = None;
            let mut value = None;
            for property in self.client.get_properties(entry_id).await?.result {
                match property.name.as_str() {
                    "key" => key = property.value,
                    "value" => value = property.value,
                    _ => {}
                }
            }
            associations.push(MapAssociation {
                key: self.instance_ref(&key.unwrap_or_else(RemoteObject::undefined)),
                value: self.instance_ref(&value.unwrap_or_else(RemoteObject::undefined)),
            });
        }
        Ok((length, associations))
    }
}

fn backend_id(remote: &RemoteObject) -> ServiceResult<&str> {
    remote
        .object_id
        .as_deref()
        .ok_or_else(|| ServiceError::invalid_argument("value has no backend handle"))
}

/// Array-index properties in index order.
fn indexed_values(properties: Vec<PropertyDescriptor>) -> Vec<RemoteObject> {
    let mut indexed: Vec<(usize, RemoteObject)> = properties
        .into_iter()
        .filter_map(|p| Some((p.name.parse::<usize>().ok()?, p.value?)))
        .collect();
    indexed.sort_by_key(|(index, _)| *index);
    indexed.into_iter().map(|(_, value)| value).collect()
}
