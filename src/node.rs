use crate::attribute::{Attribute, Value, find_attribute};
use crate::error::MetaError;
use crate::merge::{MergeOptions, merge_nodes};
use crate::permission::{PermissionSet, Principals};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Dataset,
    Database,
    Schema,
    Table,
    Column,
    Run,
}

impl NodeType {
    pub const ALL: [NodeType; 6] = [
        NodeType::Dataset,
        NodeType::Database,
        NodeType::Schema,
        NodeType::Table,
        NodeType::Column,
        NodeType::Run,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Dataset => "dataset",
            NodeType::Database => "database",
            NodeType::Schema => "schema",
            NodeType::Table => "table",
            NodeType::Column => "column",
            NodeType::Run => "run",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        NodeType::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed tree vertex. Owns its attributes and children outright.
///
/// `attributes` and `child_nodes` are `None` when the node has none at all.
/// Filtering never leaves an empty `Some(vec![])` behind, so the serializer can
/// omit absent collections.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    node_type: NodeType,
    attributes: Option<Vec<Attribute>>,
    child_nodes: Option<Vec<Node>>,
    permissions: Option<PermissionSet>,
}

impl Node {
    pub fn new(node_type: NodeType) -> Self {
        Self {
            node_type,
            attributes: None,
            child_nodes: None,
            permissions: None,
        }
    }

    pub fn from_parts(
        node_type: NodeType,
        attributes: Option<Vec<Attribute>>,
        child_nodes: Option<Vec<Node>>,
        permissions: Option<PermissionSet>,
    ) -> Self {
        Self {
            node_type,
            attributes,
            child_nodes,
            permissions,
        }
    }

    /// Shorthand for a node carrying only its `name` attribute.
    pub fn named(node_type: NodeType, name: impl Into<String>) -> Self {
        Self::new(node_type).with_attribute(Attribute::new("name", name.into()))
    }

    pub fn with_attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.get_or_insert_with(Vec::new).push(attribute);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.child_nodes.get_or_insert_with(Vec::new).push(child);
        self
    }

    pub fn with_permissions(mut self, permissions: PermissionSet) -> Self {
        self.permissions = Some(permissions);
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn attributes(&self) -> &[Attribute] {
        self.attributes.as_deref().unwrap_or(&[])
    }

    pub fn children(&self) -> &[Node] {
        self.child_nodes.as_deref().unwrap_or(&[])
    }

    /// Raw attribute collection, distinguishing absent from empty.
    pub fn attribute_list(&self) -> Option<&Vec<Attribute>> {
        self.attributes.as_ref()
    }

    /// Raw child collection, distinguishing absent from empty.
    pub fn child_list(&self) -> Option<&Vec<Node>> {
        self.child_nodes.as_ref()
    }

    pub fn permissions(&self) -> Option<&PermissionSet> {
        self.permissions.as_ref()
    }

    pub(crate) fn attributes_mut(&mut self) -> Option<&mut Vec<Attribute>> {
        self.attributes.as_mut()
    }

    pub(crate) fn push_attribute(&mut self, attribute: Attribute) {
        self.attributes.get_or_insert_with(Vec::new).push(attribute);
    }

    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<Node>> {
        self.child_nodes.as_mut()
    }

    pub(crate) fn permissions_mut(&mut self) -> &mut Option<PermissionSet> {
        &mut self.permissions
    }

    pub fn get_attribute(&self, key: &str) -> Option<&Attribute> {
        find_attribute(self.attributes(), key)
    }

    pub fn get_attribute_value(&self, key: &str) -> Option<&Value> {
        self.get_attribute(key).map(Attribute::value)
    }

    /// Walks group members: `lookup(&["smart_noise", "max_ids"])`.
    pub fn lookup(&self, path: &[&str]) -> Option<&Attribute> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.get_attribute(first)?, |attr, key| attr.member(key))
    }

    pub fn name(&self) -> Option<&str> {
        self.get_attribute_value("name").and_then(Value::as_str)
    }

    pub fn child(&self, name: &str) -> Option<&Node> {
        self.children().iter().find(|c| c.name() == Some(name))
    }

    /// Path segment used in error messages, e.g. `table[adult]`.
    pub fn label(&self) -> String {
        match self.name() {
            Some(name) => format!("{}[{name}]", self.node_type),
            None => self.node_type.to_string(),
        }
    }

    /// Number of nodes in this subtree, itself included.
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(Node::node_count).sum::<usize>()
    }

    pub fn merge_with(
        &self,
        other: &Node,
        options: MergeOptions,
        principals: &Principals,
    ) -> Result<Node, MetaError> {
        merge_nodes(self, other, options, principals)
    }
}
