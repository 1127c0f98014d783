use crate::attribute::{Attribute, Value};
use crate::node::{Node, NodeType};
use crate::schema::{DIFFERENTIAL_PRIVACY, SMART_NOISE};
use std::collections::BTreeMap;
use tracing::debug;

/// Which node types a filter rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeSelector {
    Any,
    Type(NodeType),
}

impl NodeSelector {
    pub fn matches(self, node_type: NodeType) -> bool {
        match self {
            NodeSelector::Any => true,
            NodeSelector::Type(t) => t == node_type,
        }
    }
}

impl From<NodeType> for NodeSelector {
    fn from(value: NodeType) -> Self {
        NodeSelector::Type(value)
    }
}

/// Node-level predicate. A node whose listed attribute holds a value outside
/// the allowed set is dropped together with its subtree. A node without the
/// attribute is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetainNodes {
    conditions: BTreeMap<(NodeSelector, String), Vec<Value>>,
}

impl RetainNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds allowed values for `key` on nodes matching `selector`. Repeated
    /// calls for the same selector and key widen the allowed set.
    pub fn when<I, V>(mut self, selector: impl Into<NodeSelector>, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.conditions
            .entry((selector.into(), key.to_string()))
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn admits(&self, node: &Node) -> bool {
        self.conditions
            .iter()
            .filter(|((selector, _), _)| selector.matches(node.node_type()))
            .all(|((_, key), allowed)| match node.get_attribute_value(key) {
                Some(value) => allowed.contains(value),
                None => true,
            })
    }
}

/// Attribute projection. Rules for a specific node type and wildcard rules
/// are unioned; a node type with no rule at all keeps every attribute.
///
/// Keys of the form `group.member` keep only the named members of a group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetainAttributes {
    rules: BTreeMap<NodeSelector, BTreeMap<String, Option<Value>>>,
}

impl RetainAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keep(mut self, selector: impl Into<NodeSelector>, key: &str) -> Self {
        self.rules
            .entry(selector.into())
            .or_default()
            .insert(key.to_string(), None);
        self
    }

    /// Keeps `key` only while it holds exactly `value`.
    pub fn keep_if(
        mut self,
        selector: impl Into<NodeSelector>,
        key: &str,
        value: impl Into<Value>,
    ) -> Self {
        self.rules
            .entry(selector.into())
            .or_default()
            .insert(key.to_string(), Some(value.into()));
        self
    }

    pub fn keep_all<'a>(
        self,
        selector: impl Into<NodeSelector>,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let selector = selector.into();
        keys.into_iter()
            .fold(self, |retain, key| retain.keep(selector, key))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Union of the wildcard and type-specific rules, or `None` when neither
    /// exists.
    pub fn rules_for(&self, node_type: NodeType) -> Option<BTreeMap<&str, Option<&Value>>> {
        let mut merged: Option<BTreeMap<&str, Option<&Value>>> = None;
        for selector in [NodeSelector::Any, NodeSelector::Type(node_type)] {
            if let Some(rules) = self.rules.get(&selector) {
                let out = merged.get_or_insert_with(BTreeMap::new);
                for (key, value) in rules {
                    // an unconditional rule wins over a conditional one
                    let slot = out.entry(key.as_str()).or_insert(value.as_ref());
                    if value.is_none() {
                        *slot = None;
                    }
                }
            }
        }
        merged
    }
}

/// Derives a view of `node`. Returns `None` when the root itself is dropped.
/// Filtering an already filtered tree with the same rules changes nothing.
pub fn filter(
    node: &Node,
    retain_nodes: &RetainNodes,
    retain_attributes: &RetainAttributes,
) -> Option<Node> {
    let out = filter_node(node, retain_nodes, retain_attributes);
    debug!(
        root = %node.label(),
        nodes_in = node.node_count(),
        nodes_out = out.as_ref().map_or(0, Node::node_count),
        "metadata tree filtered"
    );
    out
}

fn filter_node(
    node: &Node,
    retain_nodes: &RetainNodes,
    retain_attributes: &RetainAttributes,
) -> Option<Node> {
    if !retain_nodes.admits(node) {
        return None;
    }

    let attributes = match retain_attributes.rules_for(node.node_type()) {
        None => node.attribute_list().cloned().and_then(non_empty),
        Some(rules) => {
            let rules = rules.into_iter().collect::<Vec<_>>();
            let kept = node
                .attributes()
                .iter()
                .filter_map(|attribute| project_attribute(attribute, &rules))
                .collect::<Vec<_>>();
            non_empty(kept)
        }
    };

    let children = node
        .children()
        .iter()
        .filter_map(|child| filter_node(child, retain_nodes, retain_attributes))
        .collect::<Vec<_>>();

    Some(Node::from_parts(
        node.node_type(),
        attributes,
        non_empty(children),
        node.permissions().cloned(),
    ))
}

fn project_attribute(attribute: &Attribute, rules: &[(&str, Option<&Value>)]) -> Option<Attribute> {
    let key = attribute.key()?;

    if let Some((_, required)) = rules.iter().find(|(rule_key, _)| *rule_key == key) {
        return match required {
            Some(value) if attribute.value() != *value => None,
            _ => Some(attribute.clone()),
        };
    }

    let member_rules = rules
        .iter()
        .filter_map(|(rule_key, required)| {
            let rest = rule_key.strip_prefix(key)?.strip_prefix('.')?;
            Some((rest, *required))
        })
        .collect::<Vec<_>>();
    if member_rules.is_empty() {
        return None;
    }
    let members = attribute
        .value()
        .as_list()?
        .iter()
        .filter_map(|member| project_attribute(member, &member_rules))
        .collect::<Vec<_>>();
    if members.is_empty() {
        return None;
    }
    Some(Attribute::from_parts(
        Some(key.to_string()),
        Value::List(members),
        attribute.permissions().cloned(),
    ))
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

/// Attributes a model training wrapper reads.
pub fn ml_view() -> RetainAttributes {
    RetainAttributes::new().keep_all(
        NodeSelector::Any,
        ["name", "data_type_name", "is_feature", "is_target"],
    )
}

/// Attributes a privacy mechanism reads: budgets and bounds, nothing
/// descriptive.
pub fn privacy_view() -> RetainAttributes {
    RetainAttributes::new().keep_all(
        NodeSelector::Any,
        [
            "name",
            "privacy_level",
            DIFFERENTIAL_PRIVACY,
            SMART_NOISE,
            "lower",
            "upper",
            "cardinality",
            "categories",
            "nullable",
            "is_private_id",
            "data_type_name",
            "epsilon_spent",
            "delta_spent",
        ],
    )
}

/// Keeps only the table called `name` (and everything outside tables).
pub fn table_named(name: &str) -> RetainNodes {
    RetainNodes::new().when(NodeType::Table, "name", [name])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, data_type: &str) -> Node {
        Node::named(NodeType::Column, name)
            .with_attribute(Attribute::new("data_type_name", data_type))
            .with_attribute(Attribute::new("description", format!("{name} column")))
            .with_attribute(Attribute::new("is_feature", true))
    }

    fn table(name: &str) -> Node {
        Node::named(NodeType::Table, name)
            .with_attribute(Attribute::new("row_count", 100i64))
            .with_child(column(&format!("{name}_id"), "int"))
            .with_child(column("value", "float"))
    }

    fn dataset() -> Node {
        Node::named(NodeType::Dataset, "census").with_child(
            Node::named(NodeType::Database, "main").with_child(
                Node::named(NodeType::Schema, "public")
                    .with_child(table("adult"))
                    .with_child(table("housing"))
                    .with_child(table("credit")),
            ),
        )
    }

    fn tables(tree: &Node) -> Vec<&Node> {
        tree.children()[0].children()[0].children().iter().collect()
    }

    #[test]
    fn retain_nodes_drops_other_tables_with_their_columns() {
        let out = filter(&dataset(), &table_named("adult"), &RetainAttributes::new())
            .expect("root kept");
        let kept = tables(&out);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].name(), Some("adult"));
        assert_eq!(kept[0].children().len(), 2);
        assert_eq!(out.node_count(), dataset().node_count() - 6);
    }

    #[test]
    fn dropped_root_yields_none() {
        let retain = RetainNodes::new().when(NodeType::Dataset, "name", ["other"]);
        assert!(filter(&dataset(), &retain, &RetainAttributes::new()).is_none());
    }

    #[test]
    fn ml_view_keeps_only_consumer_keys() {
        let out = filter(&dataset(), &RetainNodes::new(), &ml_view()).expect("root");
        let column = tables(&out)[0].child("value").expect("column");
        let keys = column
            .attributes()
            .iter()
            .filter_map(Attribute::key)
            .collect::<Vec<_>>();
        assert_eq!(keys, vec!["name", "data_type_name", "is_feature"]);
        assert!(tables(&out)[0].get_attribute("row_count").is_none());
    }

    #[test]
    fn types_without_rules_keep_everything() {
        let retain = RetainAttributes::new().keep(NodeType::Column, "name");
        let out = filter(&dataset(), &RetainNodes::new(), &retain).expect("root");
        let adult = tables(&out)[0];
        assert!(adult.get_attribute("row_count").is_some());
        assert_eq!(adult.children()[0].attributes().len(), 1);
    }

    #[test]
    fn wildcard_and_type_rules_are_unioned() {
        let retain = RetainAttributes::new()
            .keep(NodeSelector::Any, "name")
            .keep(NodeType::Table, "row_count");
        let rules = retain.rules_for(NodeType::Table).expect("rules");
        assert_eq!(rules.keys().copied().collect::<Vec<_>>(), vec!["name", "row_count"]);
        assert_eq!(retain.rules_for(NodeType::Column).map(|r| r.len()), Some(1));
    }

    #[test]
    fn conditional_rules_match_values() {
        let retain = RetainAttributes::new()
            .keep(NodeSelector::Any, "name")
            .keep_if(NodeType::Column, "data_type_name", "int");
        let out = filter(&dataset(), &RetainNodes::new(), &retain).expect("root");
        let adult = tables(&out)[0];
        assert!(adult.children()[0].get_attribute("data_type_name").is_some());
        assert!(adult.children()[1].get_attribute("data_type_name").is_none());
    }

    #[test]
    fn dotted_keys_select_group_members() {
        let node = Node::named(NodeType::Table, "adult").with_attribute(Attribute::group(
            SMART_NOISE,
            vec![
                Attribute::new("max_ids", 1i64),
                Attribute::new("row_privacy", false),
            ],
        ));
        let retain = RetainAttributes::new().keep(NodeType::Table, "smart_noise.max_ids");
        let out = filter(&node, &RetainNodes::new(), &retain).expect("root");
        let group = out.get_attribute(SMART_NOISE).expect("group");
        assert_eq!(group.members().len(), 1);
        assert!(out.get_attribute("name").is_none());

        let none_match = RetainAttributes::new().keep(NodeType::Table, "smart_noise.bogus");
        let out = filter(&node, &RetainNodes::new(), &none_match).expect("root");
        assert!(out.attribute_list().is_none());
    }

    #[test]
    fn empty_results_become_none() {
        let retain = RetainAttributes::new().keep(NodeSelector::Any, "nonexistent");
        let column_only = RetainNodes::new().when(NodeType::Column, "name", ["nobody"]);
        let out = filter(&table("adult"), &column_only, &retain).expect("root");
        assert!(out.attribute_list().is_none());
        assert!(out.child_list().is_none());
    }

    #[test]
    fn empty_attribute_lists_collapse_without_rules() {
        let bare = Node::from_parts(NodeType::Table, Some(Vec::new()), Some(Vec::new()), None);
        let out = filter(&bare, &RetainNodes::new(), &RetainAttributes::new()).expect("root");
        assert!(out.attribute_list().is_none());
        assert!(out.child_list().is_none());
    }

    #[test]
    fn filtering_twice_changes_nothing() {
        let views = [
            (table_named("adult"), ml_view()),
            (RetainNodes::new(), privacy_view()),
            (
                RetainNodes::new().when(NodeType::Column, "data_type_name", ["int"]),
                RetainAttributes::new().keep(NodeType::Column, "name"),
            ),
        ];
        for (nodes, attributes) in views {
            let once = filter(&dataset(), &nodes, &attributes).expect("once");
            let twice = filter(&once, &nodes, &attributes).expect("twice");
            assert_eq!(once, twice);
        }
    }
}
