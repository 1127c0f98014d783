use crate::error::MetaError;
use crate::permission::{Action, PermissionSet, Principals, is_allowed, is_subset};
use crate::schema::{AttributeRule, Constraint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Discriminator of an attribute's value. Fixed when the attribute is built.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Boolean,
    Int,
    Float,
    String,
    Datetime,
    List,
}

impl TypeTag {
    pub const ALL: [TypeTag; 6] = [
        TypeTag::Boolean,
        TypeTag::Int,
        TypeTag::Float,
        TypeTag::String,
        TypeTag::Datetime,
        TypeTag::List,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TypeTag::Boolean => "boolean",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::String => "string",
            TypeTag::Datetime => "datetime",
            TypeTag::List => "list",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        TypeTag::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    Datetime(DateTime<Utc>),
    List(Vec<Attribute>),
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Boolean(_) => TypeTag::Boolean,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::String(_) => TypeTag::String,
            Value::Datetime(_) => TypeTag::Datetime,
            Value::List(_) => TypeTag::List,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTime<Utc>> {
        match self {
            Value::Datetime(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Attribute]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Datetime(value)
    }
}

impl From<Vec<Attribute>> for Value {
    fn from(value: Vec<Attribute>) -> Self {
        Value::List(value)
    }
}

/// Layout of a list's members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListShape {
    Empty,
    /// Every member carries a key.
    Record,
    /// No member carries a key.
    Array,
    Mixed,
}

pub fn list_shape(members: &[Attribute]) -> ListShape {
    if members.is_empty() {
        return ListShape::Empty;
    }
    let keyed = members.iter().filter(|m| m.key.is_some()).count();
    if keyed == members.len() {
        ListShape::Record
    } else if keyed == 0 {
        ListShape::Array
    } else {
        ListShape::Mixed
    }
}

/// A typed, optionally keyed, optionally permissioned value.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    key: Option<String>,
    value: Value,
    permissions: Option<PermissionSet>,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
            permissions: None,
        }
    }

    pub fn unkeyed(value: impl Into<Value>) -> Self {
        Self {
            key: None,
            value: value.into(),
            permissions: None,
        }
    }

    /// Keyed list whose members are themselves keyed.
    pub fn group(key: impl Into<String>, members: Vec<Attribute>) -> Self {
        Self::new(key, Value::List(members))
    }

    /// Keyed list of unkeyed elements.
    pub fn array<I, V>(key: impl Into<String>, items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::new(
            key,
            Value::List(items.into_iter().map(Attribute::unkeyed).collect()),
        )
    }

    pub(crate) fn from_parts(
        key: Option<String>,
        value: Value,
        permissions: Option<PermissionSet>,
    ) -> Self {
        Self {
            key,
            value,
            permissions,
        }
    }

    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn type_tag(&self) -> TypeTag {
        self.value.type_tag()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn permissions(&self) -> Option<&PermissionSet> {
        self.permissions.as_ref()
    }

    /// Members of a list attribute; empty for scalars.
    pub fn members(&self) -> &[Attribute] {
        self.value.as_list().unwrap_or(&[])
    }

    pub fn member(&self, key: &str) -> Option<&Attribute> {
        find_attribute(self.members(), key)
    }

    /// Assigns `permissions` only when none is set. Returns whether it did.
    pub fn set_default_permissions(&mut self, permissions: PermissionSet) -> bool {
        if self.permissions.is_some() {
            return false;
        }
        self.permissions = Some(permissions);
        true
    }

    pub(crate) fn members_mut(&mut self) -> Option<&mut Vec<Attribute>> {
        match &mut self.value {
            Value::List(members) => Some(members),
            _ => None,
        }
    }

    pub fn is_allowed(&self, action: Action, principals: &Principals) -> bool {
        is_allowed(self.permissions(), action, principals)
    }

    /// Checks this attribute against its schema rule. The ceiling tier is
    /// resolved with `owners` before the subset test.
    pub fn check(
        &self,
        rule: &AttributeRule,
        owners: &Principals,
        path: &str,
    ) -> Result<(), MetaError> {
        if self.key() != Some(rule.key) {
            return Err(MetaError::schema(
                path,
                format!(
                    "attribute key {:?} does not match expected key '{}'",
                    self.key(),
                    rule.key
                ),
            ));
        }
        if !rule.types.contains(&self.type_tag()) {
            let allowed = rule
                .types
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join("|");
            return Err(MetaError::schema(
                path,
                format!(
                    "attribute '{}' has type {}, expected {allowed}",
                    rule.key,
                    self.type_tag()
                ),
            ));
        }
        let ceiling = rule.ceiling.map(|tier| tier.resolve(owners));
        if !is_subset(self.permissions(), ceiling.as_ref()) {
            return Err(MetaError::schema(
                path,
                format!("permissions of '{}' exceed the schema ceiling", rule.key),
            ));
        }
        rule.constraint.validate(&self.value, path)?;

        if let Value::List(members) = &self.value {
            check_list_layout(members, path)?;
            if !rule.members.is_empty() {
                check_group_members(members, rule, owners, path)?;
            }
        }
        Ok(())
    }
}

pub fn find_attribute<'a>(attributes: &'a [Attribute], key: &str) -> Option<&'a Attribute> {
    attributes.iter().find(|a| a.key() == Some(key))
}

/// Rejects mixed keyed/unkeyed members and repeated keys.
pub(crate) fn check_list_layout(members: &[Attribute], path: &str) -> Result<(), MetaError> {
    if list_shape(members) == ListShape::Mixed {
        return Err(MetaError::schema(
            path,
            "list mixes keyed and unkeyed members",
        ));
    }
    ensure_unique_keys(members, path)
}

pub(crate) fn ensure_unique_keys(attributes: &[Attribute], path: &str) -> Result<(), MetaError> {
    let mut seen = BTreeSet::new();
    for key in attributes.iter().filter_map(Attribute::key) {
        if !seen.insert(key) {
            return Err(MetaError::DuplicateKey {
                path: path.to_string(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

fn check_group_members(
    members: &[Attribute],
    rule: &AttributeRule,
    owners: &Principals,
    path: &str,
) -> Result<(), MetaError> {
    if list_shape(members) == ListShape::Array {
        return Err(MetaError::schema(
            path,
            format!("group '{}' must contain keyed members", rule.key),
        ));
    }
    for member in members {
        let key = member.key().unwrap_or_default();
        let member_path = format!("{path}.{key}");
        let Some(member_rule) = rule.member(key) else {
            return Err(MetaError::schema(
                &member_path,
                format!("unknown member '{key}' in group '{}'", rule.key),
            ));
        };
        member.check(member_rule, owners, &member_path)?;
    }
    for required in rule.members.iter().filter(|m| m.required) {
        if find_attribute(members, required.key).is_none() {
            return Err(MetaError::MissingRequiredAttribute {
                path: path.to_string(),
                key: required.key.to_string(),
            });
        }
    }
    Ok(())
}

impl Constraint {
    pub fn validate(&self, value: &Value, path: &str) -> Result<(), MetaError> {
        let ok = match (self, value) {
            (Constraint::Unconstrained, _) => true,
            (Constraint::IntRange { min, max }, Value::Int(v)) => min <= v && v <= max,
            (Constraint::FloatRange { min, max }, Value::Float(v)) => *min <= *v && *v <= *max,
            (Constraint::FloatRange { .. }, Value::Int(_)) => true,
            (Constraint::IntRange { .. }, _) | (Constraint::FloatRange { .. }, _) => false,
            (Constraint::OneOf(options), Value::String(v)) => options.contains(&v.as_str()),
            (Constraint::OneOf(_), _) => false,
            (Constraint::NonEmpty, Value::String(v)) => !v.trim().is_empty(),
            (Constraint::NonEmpty, Value::List(v)) => !v.is_empty(),
            (Constraint::NonEmpty, _) => true,
            (Constraint::ArrayOf(tag), Value::List(items)) => items
                .iter()
                .all(|item| item.key().is_none() && item.type_tag() == *tag),
            (Constraint::RecordOf(tag), Value::List(items)) => items
                .iter()
                .all(|item| item.key().is_some() && item.type_tag() == *tag),
            (Constraint::ArrayOf(_), _) | (Constraint::RecordOf(_), _) => false,
        };
        if ok {
            Ok(())
        } else {
            Err(MetaError::schema(
                path,
                format!("value violates constraint {}", self.describe()),
            ))
        }
    }
}
