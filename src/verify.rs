use crate::attribute::ensure_unique_keys;
use crate::error::MetaError;
use crate::node::{Node, NodeType};
use crate::permission::{Principals, is_subset};
use crate::schema::{NodeRule, ROOT_TYPES, check_key_convention, node_rule};
use std::collections::BTreeSet;
use tracing::debug;

/// Admits an externally built tree. Pure: reports the first violation found
/// walking top-down and never modifies the tree.
///
/// Ceiling tiers are resolved with `principals` as owners, so a tree whose
/// permissions name owners outside `principals` is not admitted.
pub fn verify(
    node: &Node,
    expected_types: &[NodeType],
    principals: &Principals,
) -> Result<(), MetaError> {
    verify_node(node, expected_types, principals, "")?;
    debug!(
        root = %node.label(),
        nodes = node.node_count(),
        "metadata tree verified"
    );
    Ok(())
}

/// [`verify`] with the node types allowed at the root of a tree.
pub fn verify_root(node: &Node, principals: &Principals) -> Result<(), MetaError> {
    verify(node, ROOT_TYPES, principals)
}

pub(crate) fn join_path(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{parent}/{segment}")
    }
}

fn verify_node(
    node: &Node,
    expected_types: &[NodeType],
    principals: &Principals,
    parent: &str,
) -> Result<(), MetaError> {
    let path = join_path(parent, &node.label());
    if !expected_types.contains(&node.node_type()) {
        let expected = expected_types
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>();
        let expected = if expected.is_empty() {
            "no children".to_string()
        } else {
            expected.join("|")
        };
        return Err(MetaError::schema(
            &path,
            format!("node type {} is not allowed here (expected {expected})", node.node_type()),
        ));
    }

    let rule = node_rule(node.node_type());
    let ceiling = rule.ceiling.map(|tier| tier.resolve(principals));
    if !is_subset(node.permissions(), ceiling.as_ref()) {
        return Err(MetaError::schema(
            &path,
            "node permissions exceed the schema ceiling",
        ));
    }

    verify_attributes(node, rule, principals, &path)?;

    for child in node.children() {
        verify_node(child, rule.children, principals, &path)?;
    }
    ensure_unique_names(node.children(), &path)
}

fn verify_attributes(
    node: &Node,
    rule: &NodeRule,
    principals: &Principals,
    path: &str,
) -> Result<(), MetaError> {
    ensure_unique_keys(node.attributes(), path)?;
    for attribute in node.attributes() {
        let Some(key) = attribute.key() else {
            return Err(MetaError::schema(path, "node attributes must carry a key"));
        };
        let attr_path = format!("{path}/@{key}");
        check_key_convention(node.node_type(), key)
            .map_err(|reason| MetaError::schema(&attr_path, reason))?;
        let Some(attr_rule) = rule.attribute(key) else {
            return Err(MetaError::schema(
                &attr_path,
                format!("'{key}' is not an attribute of {}", node.node_type()),
            ));
        };
        attribute.check(attr_rule, principals, &attr_path)?;
    }
    for key in rule.required_keys() {
        if node.get_attribute(key).is_none() {
            return Err(MetaError::MissingRequiredAttribute {
                path: path.to_string(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

fn ensure_unique_names(children: &[Node], path: &str) -> Result<(), MetaError> {
    let mut seen = BTreeSet::new();
    for name in children.iter().filter_map(Node::name) {
        if !seen.insert(name) {
            return Err(MetaError::DuplicateName {
                path: path.to_string(),
                name: name.to_string(),
            });
        }
    }
    Ok(())
}
