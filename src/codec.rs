//! Conversion between trees and their nested-map form.
//!
//! A node maps to `{type_name, permissions?, attributes?, child_nodes?}` and an
//! attribute to `{type_name, key?, value, permissions?}`. A permission set maps
//! each action name to an array of principal ids, or to `null` when the action
//! is unrestricted. Absent collections and permission sets are omitted, never
//! written as empty values.

use crate::attribute::{Attribute, TypeTag, Value};
use crate::config::TreeConfig;
use crate::defaults::{apply_defaults, synthesize_default_groups};
use crate::error::MetaError;
use crate::node::{Node, NodeType};
use crate::permission::{Action, Grantees, PermissionSet, PrincipalId, Principals};
use crate::verify::verify;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;
use tracing::{debug, info, warn};

pub const TYPE_NAME: &str = "type_name";
pub const KEY: &str = "key";
pub const VALUE: &str = "value";
pub const PERMISSIONS: &str = "permissions";
pub const ATTRIBUTES: &str = "attributes";
pub const CHILD_NODES: &str = "child_nodes";

const NODE_FIELDS: &[&str] = &[TYPE_NAME, PERMISSIONS, ATTRIBUTES, CHILD_NODES];
const ATTRIBUTE_FIELDS: &[&str] = &[TYPE_NAME, KEY, VALUE, PERMISSIONS];
const ROOT_PATH: &str = "root";

pub fn to_map(node: &Node) -> Result<JsonValue, MetaError> {
    let mut map = Map::new();
    map.insert(TYPE_NAME.into(), node.node_type().as_str().into());
    if let Some(permissions) = node.permissions() {
        map.insert(PERMISSIONS.into(), permissions_to_map(permissions));
    }
    if let Some(attributes) = node.attribute_list() {
        let encoded = attributes
            .iter()
            .map(attribute_to_map)
            .collect::<Result<Vec<_>, _>>()?;
        map.insert(ATTRIBUTES.into(), JsonValue::Array(encoded));
    }
    if let Some(children) = node.child_list() {
        let encoded = children
            .iter()
            .map(to_map)
            .collect::<Result<Vec<_>, _>>()?;
        map.insert(CHILD_NODES.into(), JsonValue::Array(encoded));
    }
    Ok(JsonValue::Object(map))
}

pub fn attribute_to_map(attribute: &Attribute) -> Result<JsonValue, MetaError> {
    let mut map = Map::new();
    map.insert(TYPE_NAME.into(), attribute.type_tag().as_str().into());
    if let Some(key) = attribute.key() {
        map.insert(KEY.into(), key.into());
    }
    let value = match attribute.value() {
        Value::Boolean(v) => JsonValue::Bool(*v),
        Value::Int(v) => JsonValue::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(*v)
            .map(JsonValue::Number)
            .ok_or_else(|| {
                MetaError::Encode(format!(
                    "attribute {:?} holds non-finite float {v}",
                    attribute.key()
                ))
            })?,
        Value::String(v) => JsonValue::String(v.clone()),
        Value::Datetime(v) => JsonValue::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        Value::List(members) => JsonValue::Array(
            members
                .iter()
                .map(attribute_to_map)
                .collect::<Result<Vec<_>, _>>()?,
        ),
    };
    map.insert(VALUE.into(), value);
    if let Some(permissions) = attribute.permissions() {
        map.insert(PERMISSIONS.into(), permissions_to_map(permissions));
    }
    Ok(JsonValue::Object(map))
}

pub fn permissions_to_map(permissions: &PermissionSet) -> JsonValue {
    let map = permissions
        .iter()
        .map(|(action, grantees)| {
            let granted = match grantees {
                Grantees::Unrestricted => JsonValue::Null,
                Grantees::Principals(ids) => JsonValue::Array(
                    ids.iter()
                        .map(|id| JsonValue::String(id.to_string()))
                        .collect(),
                ),
            };
            (action.as_str().to_string(), granted)
        })
        .collect::<Map<_, _>>();
    JsonValue::Object(map)
}

/// Decodes with [`TreeConfig::default`].
pub fn from_map(raw: &JsonValue) -> Result<Node, MetaError> {
    from_map_with(raw, &TreeConfig::default())
}

/// Decodes a tree. Every unknown node or attribute type name in the input is
/// collected and reported together as one [`MetaError::NoFactoryForType`].
pub fn from_map_with(raw: &JsonValue, config: &TreeConfig) -> Result<Node, MetaError> {
    let mut decoder = Decoder {
        config,
        unknown: Vec::new(),
    };
    let node = decoder.node(raw, ROOT_PATH, 1)?;
    if !decoder.unknown.is_empty() {
        warn!(
            unknown = decoder.unknown.len(),
            "tree rejected: unknown type names"
        );
        return Err(MetaError::NoFactoryForType {
            unknown: decoder.unknown,
        });
    }
    node.ok_or_else(|| MetaError::decode(ROOT_PATH, "root could not be decoded"))
}

pub fn attribute_from_map(raw: &JsonValue, config: &TreeConfig) -> Result<Attribute, MetaError> {
    let mut decoder = Decoder {
        config,
        unknown: Vec::new(),
    };
    let attribute = decoder.attribute(raw, ROOT_PATH, 1)?;
    if !decoder.unknown.is_empty() {
        return Err(MetaError::NoFactoryForType {
            unknown: decoder.unknown,
        });
    }
    attribute.ok_or_else(|| MetaError::decode(ROOT_PATH, "attribute could not be decoded"))
}

pub fn permissions_from_map(raw: &JsonValue, path: &str) -> Result<PermissionSet, MetaError> {
    let map = raw
        .as_object()
        .ok_or_else(|| MetaError::decode(path, "permissions must be a map of action names"))?;
    let mut permissions = PermissionSet::new();
    for (name, granted) in map {
        let action = Action::from_name(name)
            .ok_or_else(|| MetaError::decode(path, format!("unknown action '{name}'")))?;
        permissions = match granted {
            JsonValue::Null => permissions.grant_unrestricted(action),
            JsonValue::Array(ids) => {
                let ids = ids
                    .iter()
                    .map(|id| match id.as_str() {
                        Some(id) => PrincipalId::parse(id),
                        None => Err(MetaError::InvalidPrincipalId(id.to_string())),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                permissions.grant(action, ids)
            }
            _ => {
                return Err(MetaError::decode(
                    path,
                    format!("grantees of '{name}' must be null or a list of ids"),
                ));
            }
        };
    }
    Ok(permissions)
}

struct Decoder<'a> {
    config: &'a TreeConfig,
    unknown: Vec<String>,
}

impl Decoder<'_> {
    /// `Ok(None)` means the node's type name was unknown and has been recorded.
    fn node(&mut self, raw: &JsonValue, path: &str, depth: usize) -> Result<Option<Node>, MetaError> {
        if depth > self.config.max_depth {
            return Err(MetaError::decode(
                path,
                format!("node nesting exceeds {}", self.config.max_depth),
            ));
        }
        let map = object(raw, path, NODE_FIELDS)?;
        let type_name = type_name(map, path)?;
        let node_type = NodeType::from_name(type_name);
        if node_type.is_none() {
            self.unknown.push(format!("{path}: {type_name}"));
        }

        let permissions = match map.get(PERMISSIONS) {
            None | Some(JsonValue::Null) => None,
            Some(raw) => Some(permissions_from_map(raw, &format!("{path}/{PERMISSIONS}"))?),
        };

        let attributes = match sequence(map, ATTRIBUTES, path)? {
            None => None,
            Some(items) => {
                let mut decoded = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    let item_path = format!("{path}/{ATTRIBUTES}[{idx}]");
                    if let Some(attribute) = self.attribute(item, &item_path, 1)? {
                        decoded.push(attribute);
                    }
                }
                Some(decoded)
            }
        };

        let children = match sequence(map, CHILD_NODES, path)? {
            None => None,
            Some(items) => {
                let mut decoded = Vec::with_capacity(items.len());
                for (idx, item) in items.iter().enumerate() {
                    let item_path = format!("{path}/{CHILD_NODES}[{idx}]");
                    if let Some(child) = self.node(item, &item_path, depth + 1)? {
                        decoded.push(child);
                    }
                }
                Some(decoded)
            }
        };

        let Some(node_type) = node_type else {
            return Ok(None);
        };
        let mut node = Node::from_parts(node_type, attributes, children, permissions);
        if self.config.synthesizes_default_groups() {
            synthesize_default_groups(&mut node);
        }
        Ok(Some(node))
    }

    fn attribute(
        &mut self,
        raw: &JsonValue,
        path: &str,
        depth: usize,
    ) -> Result<Option<Attribute>, MetaError> {
        if depth > self.config.max_attribute_depth {
            return Err(MetaError::decode(
                path,
                format!("list nesting exceeds {}", self.config.max_attribute_depth),
            ));
        }
        let map = object(raw, path, ATTRIBUTE_FIELDS)?;
        let type_name = type_name(map, path)?;
        let key = match map.get(KEY) {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(key)) => Some(key.clone()),
            Some(_) => return Err(MetaError::decode(path, "key must be a string")),
        };
        let raw_value = map
            .get(VALUE)
            .ok_or_else(|| MetaError::decode(path, "missing 'value'"))?;
        let Some(tag) = TypeTag::from_name(type_name) else {
            self.unknown.push(format!("{path}: {type_name}"));
            return Ok(None);
        };

        let value = match tag {
            TypeTag::Boolean => raw_value.as_bool().map(Value::Boolean),
            TypeTag::Int => raw_value.as_i64().map(Value::Int),
            TypeTag::Float => raw_value.as_f64().map(Value::Float),
            TypeTag::String => raw_value.as_str().map(|v| Value::String(v.to_string())),
            TypeTag::Datetime => match raw_value.as_str() {
                Some(text) => Some(Value::Datetime(parse_datetime(text, path)?)),
                None => None,
            },
            TypeTag::List => match raw_value.as_array() {
                Some(items) => {
                    let mut members = Vec::with_capacity(items.len());
                    for (idx, item) in items.iter().enumerate() {
                        let item_path = format!("{path}[{idx}]");
                        if let Some(member) = self.attribute(item, &item_path, depth + 1)? {
                            members.push(member);
                        }
                    }
                    Some(Value::List(members))
                }
                None => None,
            },
        };
        let value = value.ok_or_else(|| {
            MetaError::decode(path, format!("value does not match type_name '{type_name}'"))
        })?;

        let permissions = match map.get(PERMISSIONS) {
            None | Some(JsonValue::Null) => None,
            Some(raw) => Some(permissions_from_map(raw, &format!("{path}/{PERMISSIONS}"))?),
        };
        Ok(Some(Attribute::from_parts(key, value, permissions)))
    }
}

fn object<'a>(
    raw: &'a JsonValue,
    path: &str,
    fields: &[&str],
) -> Result<&'a Map<String, JsonValue>, MetaError> {
    let map = raw
        .as_object()
        .ok_or_else(|| MetaError::decode(path, "expected a map"))?;
    if let Some(field) = map.keys().find(|k| !fields.contains(&k.as_str())) {
        return Err(MetaError::decode(path, format!("unexpected field '{field}'")));
    }
    Ok(map)
}

fn type_name<'a>(map: &'a Map<String, JsonValue>, path: &str) -> Result<&'a str, MetaError> {
    map.get(TYPE_NAME)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| MetaError::decode(path, "missing string field 'type_name'"))
}

fn sequence<'a>(
    map: &'a Map<String, JsonValue>,
    field: &str,
    path: &str,
) -> Result<Option<&'a Vec<JsonValue>>, MetaError> {
    match map.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Array(items)) => Ok(Some(items)),
        Some(_) => Err(MetaError::decode(path, format!("'{field}' must be a list"))),
    }
}

fn parse_datetime(text: &str, path: &str) -> Result<DateTime<Utc>, MetaError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| MetaError::decode(path, format!("invalid RFC 3339 datetime '{text}': {err}")))
}

/// Text encodings of the nested-map form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Json,
    Yaml,
}

impl TextFormat {
    pub fn from_path(path: &Path) -> Result<Self, MetaError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("json") => Ok(TextFormat::Json),
            Some("yaml") | Some("yml") => Ok(TextFormat::Yaml),
            _ => Err(MetaError::decode(
                &path.display().to_string(),
                "expected a .json, .yaml or .yml file",
            )),
        }
    }
}

pub fn to_json_string(node: &Node) -> Result<String, MetaError> {
    serde_json::to_string_pretty(&to_map(node)?).map_err(|err| MetaError::Encode(err.to_string()))
}

pub fn from_json_str(text: &str, config: &TreeConfig) -> Result<Node, MetaError> {
    let raw: JsonValue =
        serde_json::from_str(text).map_err(|err| MetaError::decode("<json>", err.to_string()))?;
    from_map_with(&raw, config)
}

pub fn to_yaml_string(node: &Node) -> Result<String, MetaError> {
    serde_yaml::to_string(&to_map(node)?).map_err(|err| MetaError::Encode(err.to_string()))
}

pub fn from_yaml_str(text: &str, config: &TreeConfig) -> Result<Node, MetaError> {
    let raw: JsonValue =
        serde_yaml::from_str(text).map_err(|err| MetaError::decode("<yaml>", err.to_string()))?;
    from_map_with(&raw, config)
}

pub fn parse_tree(text: &str, format: TextFormat, config: &TreeConfig) -> Result<Node, MetaError> {
    match format {
        TextFormat::Json => from_json_str(text, config),
        TextFormat::Yaml => from_yaml_str(text, config),
    }
}

pub fn render_tree(node: &Node, format: TextFormat) -> Result<String, MetaError> {
    match format {
        TextFormat::Json => to_json_string(node),
        TextFormat::Yaml => to_yaml_string(node),
    }
}

/// Reads a tree from a `.json`, `.yaml` or `.yml` file. Depending on `config`,
/// defaults are applied and the tree is verified with `principals` as owners.
pub fn load_tree(
    path: impl AsRef<Path>,
    config: &TreeConfig,
    principals: &Principals,
) -> Result<Node, MetaError> {
    let path = path.as_ref();
    let format = TextFormat::from_path(path)?;
    let text = std::fs::read_to_string(path)?;
    let mut node = parse_tree(&text, format, config)?;
    if config.apply_defaults_on_load {
        node = apply_defaults(&node, principals);
    }
    if config.verify_on_load {
        verify(&node, &config.root_types, principals)?;
    }
    info!(
        path = %path.display(),
        root = %node.label(),
        nodes = node.node_count(),
        "metadata tree loaded"
    );
    Ok(node)
}

pub fn store_tree(path: impl AsRef<Path>, node: &Node) -> Result<(), MetaError> {
    let path = path.as_ref();
    let text = render_tree(node, TextFormat::from_path(path)?)?;
    std::fs::write(path, text)?;
    debug!(path = %path.display(), root = %node.label(), "metadata tree stored");
    Ok(())
}
