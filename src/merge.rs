use crate::attribute::{Attribute, ListShape, Value, ensure_unique_keys, list_shape};
use crate::error::MetaError;
use crate::node::Node;
use crate::permission::{Action, PermissionSet, Principals, is_allowed, merge_permissions};
use crate::verify::join_path;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// How a merge treats differences between the left (existing) and right
/// (contributed) operand.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Take the right value without requiring `WriteValue` on the left.
    pub overwrite_value: bool,
    /// Take the right permission set per action instead of intersecting.
    pub overwrite_permissions: bool,
}

impl MergeOptions {
    pub fn conservative() -> Self {
        Self::default()
    }

    pub fn overwrite_value(mut self, overwrite_value: bool) -> Self {
        self.overwrite_value = overwrite_value;
        self
    }

    pub fn overwrite_permissions(mut self, overwrite_permissions: bool) -> Self {
        self.overwrite_permissions = overwrite_permissions;
        self
    }
}

/// Merges two attributes describing the same position. Neither input is
/// modified; on failure no partial result exists.
pub fn merge_attributes(
    left: &Attribute,
    right: &Attribute,
    options: MergeOptions,
    principals: &Principals,
) -> Result<Attribute, MetaError> {
    let path = attribute_label(left);
    Merger::new(options, principals).attribute(&path, left, right)
}

/// Pairs keyed attributes by key, merges pairs and appends the right side's
/// unmatched attributes. Appending requires `WriteAttributes` on `container`,
/// the permission set of whatever owns the left collection.
pub fn merge_many(
    left: &[Attribute],
    right: &[Attribute],
    container: Option<&PermissionSet>,
    options: MergeOptions,
    principals: &Principals,
) -> Result<Vec<Attribute>, MetaError> {
    Merger::new(options, principals).many("", left, right, container)
}

/// Merges two trees. Children are paired by their `name` attribute. The first
/// failure anywhere aborts the whole merge.
pub fn merge_nodes(
    left: &Node,
    right: &Node,
    options: MergeOptions,
    principals: &Principals,
) -> Result<Node, MetaError> {
    let merged = Merger::new(options, principals).node("", left, right)?;
    debug!(
        root = %merged.label(),
        left_nodes = left.node_count(),
        right_nodes = right.node_count(),
        merged_nodes = merged.node_count(),
        "metadata trees merged"
    );
    Ok(merged)
}

impl Attribute {
    pub fn is_mergeable_with(
        &self,
        other: &Attribute,
        options: MergeOptions,
        principals: &Principals,
    ) -> bool {
        merge_attributes(self, other, options, principals).is_ok()
    }

    pub fn merge_with(
        &self,
        other: &Attribute,
        options: MergeOptions,
        principals: &Principals,
    ) -> Result<Attribute, MetaError> {
        merge_attributes(self, other, options, principals)
    }
}

fn attribute_label(attribute: &Attribute) -> String {
    match attribute.key() {
        Some(key) => format!("@{key}"),
        None => "@[]".to_string(),
    }
}

struct Merger<'a> {
    options: MergeOptions,
    principals: &'a Principals,
}

impl<'a> Merger<'a> {
    fn new(options: MergeOptions, principals: &'a Principals) -> Self {
        Self {
            options,
            principals,
        }
    }

    fn require(
        &self,
        permissions: Option<&PermissionSet>,
        action: Action,
        path: &str,
    ) -> Result<(), MetaError> {
        if is_allowed(permissions, action, self.principals) {
            return Ok(());
        }
        warn!(
            path,
            action = %action,
            principals = self.principals.len(),
            "merge rejected: missing capability"
        );
        Err(MetaError::Unauthorized {
            path: path.to_string(),
            action,
        })
    }

    fn attribute(
        &self,
        path: &str,
        left: &Attribute,
        right: &Attribute,
    ) -> Result<Attribute, MetaError> {
        if left.key() != right.key() {
            return Err(MetaError::IncompatibleAttributes {
                path: path.to_string(),
                reason: format!("key {:?} differs from {:?}", left.key(), right.key()),
            });
        }
        if left.type_tag() != right.type_tag() {
            return Err(MetaError::IncompatibleAttributes {
                path: path.to_string(),
                reason: format!("type {} differs from {}", left.type_tag(), right.type_tag()),
            });
        }

        let permissions = merge_permissions(
            left.permissions(),
            right.permissions(),
            self.options.overwrite_permissions,
        );

        let value = match (left.value(), right.value()) {
            (Value::List(l), Value::List(r)) => {
                Value::List(self.list(path, l, r, left.permissions())?)
            }
            (l, r) if l == r => l.clone(),
            (_, r) => {
                if !self.options.overwrite_value {
                    self.require(left.permissions(), Action::WriteValue, path)?;
                }
                r.clone()
            }
        };

        if permissions.as_ref() != left.permissions() {
            self.require(left.permissions(), Action::WritePermissions, path)?;
        }

        Ok(Attribute::from_parts(
            left.key().map(str::to_string),
            value,
            permissions,
        ))
    }

    fn list(
        &self,
        path: &str,
        left: &[Attribute],
        right: &[Attribute],
        container: Option<&PermissionSet>,
    ) -> Result<Vec<Attribute>, MetaError> {
        match (list_shape(left), list_shape(right)) {
            (ListShape::Mixed, _) | (_, ListShape::Mixed) => {
                Err(MetaError::IncompatibleAttributes {
                    path: path.to_string(),
                    reason: "list mixes keyed and unkeyed members".into(),
                })
            }
            (ListShape::Record, ListShape::Array) | (ListShape::Array, ListShape::Record) => {
                Err(MetaError::IncompatibleAttributes {
                    path: path.to_string(),
                    reason: "cannot merge a keyed list with an unkeyed list".into(),
                })
            }
            (ListShape::Array, _) | (_, ListShape::Array) => {
                self.array(path, left, right, container)
            }
            _ => self.many(path, left, right, container),
        }
    }

    /// Unkeyed arrays have no identity to pair by. Same-length arrays merge
    /// element by element; any other difference replaces the whole array.
    /// Either way a change to the contents is a change to the array's value.
    fn array(
        &self,
        path: &str,
        left: &[Attribute],
        right: &[Attribute],
        container: Option<&PermissionSet>,
    ) -> Result<Vec<Attribute>, MetaError> {
        let same_len = left.len() == right.len();
        let same_contents = same_len && left.iter().zip(right).all(|(l, r)| l.value() == r.value());
        if !same_contents && !self.options.overwrite_value {
            self.require(container, Action::WriteValue, path)?;
        }
        if same_len {
            return left
                .iter()
                .zip(right)
                .enumerate()
                .map(|(idx, (l, r))| self.attribute(&format!("{path}[{idx}]"), l, r))
                .collect();
        }
        Ok(right.to_vec())
    }

    fn many(
        &self,
        path: &str,
        left: &[Attribute],
        right: &[Attribute],
        container: Option<&PermissionSet>,
    ) -> Result<Vec<Attribute>, MetaError> {
        ensure_unique_keys(left, path)?;
        ensure_unique_keys(right, path)?;

        let mut unmatched = BTreeMap::new();
        for (idx, attribute) in right.iter().enumerate() {
            let Some(key) = attribute.key() else {
                return Err(MetaError::IncompatibleAttributes {
                    path: path.to_string(),
                    reason: "unkeyed attributes cannot be paired".into(),
                });
            };
            unmatched.insert(key, idx);
        }

        let mut merged = Vec::with_capacity(left.len() + right.len());
        for attribute in left {
            let Some(key) = attribute.key() else {
                return Err(MetaError::IncompatibleAttributes {
                    path: path.to_string(),
                    reason: "unkeyed attributes cannot be paired".into(),
                });
            };
            let child_path = format!("{}{}", path_prefix(path), attribute_label(attribute));
            match unmatched.remove(key) {
                Some(idx) => merged.push(self.attribute(&child_path, attribute, &right[idx])?),
                None => merged.push(attribute.clone()),
            }
        }

        let mut appended = unmatched.into_values().collect::<Vec<_>>();
        appended.sort_unstable();
        if !appended.is_empty() {
            self.require(container, Action::WriteAttributes, path_or_root(path))?;
        }
        merged.extend(appended.into_iter().map(|idx| right[idx].clone()));

        // pairing by unique keys cannot produce duplicates
        ensure_unique_keys(&merged, path)?;
        Ok(merged)
    }

    fn node(&self, parent: &str, left: &Node, right: &Node) -> Result<Node, MetaError> {
        let path = join_path(parent, &left.label());
        if left.node_type() != right.node_type() {
            return Err(MetaError::IncompatibleNodes {
                path,
                reason: format!(
                    "node type {} differs from {}",
                    left.node_type(),
                    right.node_type()
                ),
            });
        }

        let permissions = merge_permissions(
            left.permissions(),
            right.permissions(),
            self.options.overwrite_permissions,
        );
        if permissions.as_ref() != left.permissions() {
            self.require(left.permissions(), Action::WritePermissions, &path)?;
        }

        let attributes = match (left.attribute_list(), right.attribute_list()) {
            (None, None) => None,
            _ => Some(self.many(
                &path,
                left.attributes(),
                right.attributes(),
                left.permissions(),
            )?),
        };

        let children = match (left.child_list(), right.child_list()) {
            (None, None) => None,
            _ => Some(self.children(&path, left, right)?),
        };

        Ok(Node::from_parts(
            left.node_type(),
            attributes,
            children,
            permissions,
        ))
    }

    fn children(&self, path: &str, left: &Node, right: &Node) -> Result<Vec<Node>, MetaError> {
        let mut unmatched = BTreeMap::new();
        for (idx, child) in right.children().iter().enumerate() {
            if let Some(name) = child.name()
                && unmatched.insert(name, idx).is_some()
            {
                return Err(MetaError::DuplicateName {
                    path: path.to_string(),
                    name: name.to_string(),
                });
            }
        }

        let mut merged = Vec::with_capacity(left.children().len() + right.children().len());
        let mut seen = BTreeSet::new();
        for child in left.children() {
            let paired = match child.name() {
                Some(name) => {
                    if !seen.insert(name) {
                        return Err(MetaError::DuplicateName {
                            path: path.to_string(),
                            name: name.to_string(),
                        });
                    }
                    unmatched.remove(name)
                }
                None => None,
            };
            match paired {
                Some(idx) => merged.push(self.node(path, child, &right.children()[idx])?),
                None => merged.push(child.clone()),
            }
        }

        let mut appended = right
            .children()
            .iter()
            .enumerate()
            .filter(|(idx, child)| child.name().is_none() || unmatched.values().any(|i| i == idx))
            .map(|(_, child)| child)
            .peekable();
        if appended.peek().is_some() {
            self.require(left.permissions(), Action::WriteChildNodes, path)?;
        }
        merged.extend(appended.cloned());
        Ok(merged)
    }
}

fn path_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}/")
    }
}

fn path_or_root(path: &str) -> &str {
    if path.is_empty() { "<root>" } else { path }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeType;
    use crate::permission::{Grantees, PrincipalId, Tier};
    use uuid::Uuid;

    fn principal(n: u128) -> Principals {
        [PrincipalId::from(Uuid::from_u128(n))].into_iter().collect()
    }

    #[test]
    fn identical_attributes_merge_to_themselves() {
        let name = Attribute::new("name", "adult_income");
        let merged = name
            .merge_with(&name, MergeOptions::default(), &principal(1))
            .expect("identity merge");
        assert_eq!(merged, name);
    }

    #[test]
    fn key_and_type_mismatch_are_incompatible() {
        let p = principal(1);
        let a = Attribute::new("lower", 1i64);
        let b = Attribute::new("upper", 1i64);
        let err = merge_attributes(&a, &b, MergeOptions::default(), &p).expect_err("keys");
        assert_eq!(err.code_str(), "incompatible_attributes");

        let c = Attribute::new("lower", 1.0f64);
        let err = merge_attributes(&a, &c, MergeOptions::default(), &p).expect_err("types");
        assert_eq!(err.code_str(), "incompatible_attributes");
        assert!(!a.is_mergeable_with(&c, MergeOptions::default().overwrite_value(true), &p));
    }

    #[test]
    fn value_change_requires_write_value_or_overwrite() {
        let owner = principal(1);
        let shared = Tier::SharedRead.resolve(&owner);
        let left = Attribute::new("privacy_level", 0i64).with_permissions(shared.clone());
        let right = Attribute::new("privacy_level", 2i64);

        let err = merge_attributes(&left, &right, MergeOptions::default(), &principal(2))
            .expect_err("stranger");
        assert_eq!(err.code_str(), "unauthorized");

        let by_owner = merge_attributes(&left, &right, MergeOptions::default(), &owner)
            .expect("owner holds write_value");
        assert_eq!(by_owner.value(), &Value::Int(2));
        assert_eq!(by_owner.permissions(), Some(&shared));

        let forced = merge_attributes(
            &left,
            &right,
            MergeOptions::default().overwrite_value(true),
            &principal(2),
        )
        .expect("overwrite");
        assert_eq!(forced.value(), &Value::Int(2));
    }

    #[test]
    fn permission_change_requires_write_permissions() {
        let owner = principal(1);
        let left = Attribute::new("name", "t").with_permissions(Tier::SharedRead.resolve(&owner));
        let right = Attribute::new("name", "t").with_permissions(
            PermissionSet::new().grant(Action::Read, owner.iter().copied()),
        );

        let err = merge_attributes(&left, &right, MergeOptions::default(), &principal(2))
            .expect_err("stranger cannot narrow permissions");
        assert!(matches!(
            err,
            MetaError::Unauthorized {
                action: Action::WritePermissions,
                ..
            }
        ));

        let merged = merge_attributes(&left, &right, MergeOptions::default(), &owner)
            .expect("owner may");
        assert!(!merged.permissions().expect("set").allows(Action::Read, &principal(2)));
    }

    #[test]
    fn disjoint_grants_intersect_to_an_empty_grant() {
        let owner = principal(1);
        let left = Attribute::new("name", "t").with_permissions(
            PermissionSet::new()
                .grant(Action::Read, owner.iter().copied())
                .grant_unrestricted(Action::WritePermissions),
        );
        let right = Attribute::new("name", "t").with_permissions(
            PermissionSet::new().grant(Action::Read, principal(2).iter().copied()),
        );

        let merged = merge_attributes(&left, &right, MergeOptions::default(), &owner)
            .expect("disjoint grants still merge");
        let read = merged.permissions().expect("set").get(Action::Read);
        assert_eq!(read, Some(&Grantees::Principals(Principals::new())));

        let overwritten = merge_attributes(
            &left,
            &right,
            MergeOptions::default().overwrite_permissions(true),
            &owner,
        )
        .expect("overwrite permissions");
        assert!(overwritten.permissions().expect("set").allows(Action::Read, &principal(2)));

        let locked = Attribute::new("name", "t")
            .with_permissions(Tier::OwnerOnly.resolve(&owner));
        let err = merge_attributes(&locked, &right, MergeOptions::default(), &principal(2))
            .expect_err("narrowing needs write_permissions");
        assert!(matches!(
            err,
            MetaError::Unauthorized {
                action: Action::WritePermissions,
                ..
            }
        ));
    }

    #[test]
    fn groups_pair_members_by_key() {
        let owner = principal(1);
        let left = Attribute::group(
            "smart_noise",
            vec![Attribute::new("max_ids", 1i64), Attribute::new("row_privacy", false)],
        );
        let right = Attribute::group(
            "smart_noise",
            vec![Attribute::new("use_dpsu", true), Attribute::new("max_ids", 1i64)],
        );
        let merged = merge_attributes(&left, &right, MergeOptions::default(), &owner)
            .expect("merge");
        let keys = merged.members().iter().filter_map(Attribute::key).collect::<Vec<_>>();
        assert_eq!(keys, vec!["max_ids", "row_privacy", "use_dpsu"]);
    }

    #[test]
    fn appending_members_requires_write_attributes() {
        let owner = principal(1);
        let left = Attribute::group("smart_noise", vec![Attribute::new("max_ids", 1i64)])
            .with_permissions(Tier::SharedRead.resolve(&owner));
        let right = Attribute::group("smart_noise", vec![Attribute::new("use_dpsu", true)]);
        let err = merge_attributes(&left, &right, MergeOptions::default(), &principal(2))
            .expect_err("stranger");
        assert!(matches!(
            err,
            MetaError::Unauthorized {
                action: Action::WriteAttributes,
                ..
            }
        ));
    }

    #[test]
    fn duplicate_keys_are_rejected_before_merging() {
        let p = principal(1);
        let dup = vec![Attribute::new("a", 1i64), Attribute::new("a", 2i64)];
        let err = merge_many(&dup, &[], None, MergeOptions::default(), &p).expect_err("dup");
        assert_eq!(err.code_str(), "duplicate_key");
    }

    #[test]
    fn arrays_merge_positionally_or_are_replaced() {
        let owner = principal(1);
        let shared = Tier::SharedRead.resolve(&owner);
        let left = Attribute::array("categories", ["a", "b"]).with_permissions(shared.clone());
        let same = Attribute::array("categories", ["a", "b"]);
        assert_eq!(
            merge_attributes(&left, &same, MergeOptions::default(), &principal(2))
                .expect("same shape"),
            left
        );

        let rewritten = Attribute::array("categories", ["x", "y"]);
        let err = merge_attributes(&left, &rewritten, MergeOptions::default(), &principal(2))
            .expect_err("stranger rewrites contents");
        assert!(matches!(
            err,
            MetaError::Unauthorized {
                action: Action::WriteValue,
                ..
            }
        ));
        let by_owner = merge_attributes(&left, &rewritten, MergeOptions::default(), &owner)
            .expect("owner rewrites contents");
        assert_eq!(by_owner.members(), rewritten.members());
        merge_attributes(
            &left,
            &rewritten,
            MergeOptions::default().overwrite_value(true),
            &principal(2),
        )
        .expect("overwrite_value");

        let longer = Attribute::array("categories", ["a", "b", "c"]);
        assert!(merge_attributes(&left, &longer, MergeOptions::default(), &principal(2)).is_err());
        let replaced = merge_attributes(&left, &longer, MergeOptions::default(), &owner)
            .expect("owner replaces");
        assert_eq!(replaced.members().len(), 3);

        let keyed = Attribute::group("categories", vec![Attribute::new("x", "a")]);
        let err = merge_attributes(&left, &keyed, MergeOptions::default(), &owner)
            .expect_err("shape mismatch");
        assert_eq!(err.code_str(), "incompatible_attributes");
    }

    #[test]
    fn nodes_of_different_type_are_incompatible() {
        let err = merge_nodes(
            &Node::named(NodeType::Table, "a"),
            &Node::named(NodeType::Column, "a"),
            MergeOptions::default(),
            &principal(1),
        )
        .expect_err("types");
        assert_eq!(err.code_str(), "incompatible_nodes");
    }

    #[test]
    fn children_pair_by_name_and_append_unmatched() {
        let p = principal(1);
        let left = Node::named(NodeType::Table, "adult")
            .with_child(Node::named(NodeType::Column, "age"))
            .with_child(Node::named(NodeType::Column, "income"));
        let right = Node::named(NodeType::Table, "adult")
            .with_child(
                Node::named(NodeType::Column, "income")
                    .with_attribute(Attribute::new("is_target", true)),
            )
            .with_child(Node::named(NodeType::Column, "education"));

        let merged = merge_nodes(&left, &right, MergeOptions::default(), &p).expect("merge");
        let names = merged.children().iter().filter_map(Node::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["age", "income", "education"]);
        assert_eq!(
            merged
                .child("income")
                .and_then(|c| c.get_attribute_value("is_target")),
            Some(&Value::Boolean(true))
        );
        // inputs untouched
        assert_eq!(left.children().len(), 2);
    }

    #[test]
    fn appending_children_requires_write_child_nodes() {
        let owner = principal(1);
        let left = Node::named(NodeType::Table, "adult")
            .with_permissions(Tier::SharedRead.resolve(&owner));
        let right =
            Node::named(NodeType::Table, "adult").with_child(Node::named(NodeType::Column, "age"));
        let err = merge_nodes(&left, &right, MergeOptions::default(), &principal(2))
            .expect_err("stranger");
        assert!(matches!(
            err,
            MetaError::Unauthorized {
                action: Action::WriteChildNodes,
                ..
            }
        ));
        merge_nodes(&left, &right, MergeOptions::default(), &owner).expect("owner");
    }

    #[test]
    fn nested_failure_aborts_whole_merge() {
        let owner = principal(1);
        let left = Node::named(NodeType::Table, "adult").with_child(
            Node::named(NodeType::Column, "age").with_attribute(
                Attribute::new("lower", 0i64).with_permissions(Tier::SharedRead.resolve(&owner)),
            ),
        );
        let right = Node::named(NodeType::Table, "adult")
            .with_child(Node::named(NodeType::Column, "age").with_attribute(Attribute::new("lower", 18i64)));
        let err = merge_nodes(&left, &right, MergeOptions::default(), &principal(2))
            .expect_err("nested unauthorized");
        assert_eq!(err.code_str(), "unauthorized");
        assert!(err.to_string().contains("column[age]/@lower"), "{err}");
    }
}
