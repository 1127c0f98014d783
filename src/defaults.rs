use crate::attribute::Attribute;
use crate::node::{Node, NodeType};
use crate::permission::Principals;
use crate::schema::{
    AttributeRule, DIFFERENTIAL_PRIVACY, PRIVATE_SYNTHESIS, SMART_NOISE, node_rule,
};
use tracing::debug;

/// Returns a copy of `node` where every permission set left unset receives the
/// tier its schema entry names, resolved with `principals` as owners. Missing
/// default groups are synthesized first. Explicit permission sets are kept as
/// they are.
pub fn apply_defaults(node: &Node, principals: &Principals) -> Node {
    let mut out = node.clone();
    let assigned = apply_in_place(&mut out, principals);
    debug!(
        root = %out.label(),
        assigned,
        "default permissions applied"
    );
    out
}

fn apply_in_place(node: &mut Node, principals: &Principals) -> usize {
    let rule = node_rule(node.node_type());
    synthesize_default_groups(node);

    let mut assigned = 0;
    if node.permissions().is_none() {
        *node.permissions_mut() = Some(rule.tier.resolve(principals));
        assigned += 1;
    }
    if let Some(attributes) = node.attributes_mut() {
        for attribute in attributes.iter_mut() {
            let attr_rule = attribute.key().and_then(|key| rule.attribute(key));
            if let Some(attr_rule) = attr_rule {
                assigned += default_attribute(attribute, attr_rule, principals);
            }
        }
    }
    if let Some(children) = node.children_mut() {
        for child in children.iter_mut() {
            assigned += apply_in_place(child, principals);
        }
    }
    assigned
}

fn default_attribute(
    attribute: &mut Attribute,
    rule: &AttributeRule,
    principals: &Principals,
) -> usize {
    let mut assigned = usize::from(attribute.set_default_permissions(rule.tier.resolve(principals)));
    if let Some(members) = attribute.members_mut() {
        for member in members.iter_mut() {
            let member_rule = member.key().and_then(|key| rule.member(key));
            match member_rule {
                Some(member_rule) => {
                    assigned += default_attribute(member, member_rule, principals);
                }
                // array elements and free-form record members follow their list
                None => {
                    assigned +=
                        usize::from(member.set_default_permissions(rule.tier.resolve(principals)));
                }
            }
        }
    }
    assigned
}

/// Adds the groups every node of this type is expected to carry, when absent.
/// Returns how many groups were added.
pub fn synthesize_default_groups(node: &mut Node) -> usize {
    let mut added = Vec::new();
    match node.node_type() {
        NodeType::Table => {
            if node.get_attribute(DIFFERENTIAL_PRIVACY).is_none() {
                added.push(default_differential_privacy());
            }
            if node.get_attribute(SMART_NOISE).is_none() {
                added.push(default_smart_noise());
            }
        }
        NodeType::Column => {
            if node.get_attribute(PRIVATE_SYNTHESIS).is_none() {
                let data_type = node
                    .get_attribute_value("data_type_name")
                    .and_then(|v| v.as_str());
                added.push(default_private_synthesis(data_type));
            }
        }
        NodeType::Dataset | NodeType::Database | NodeType::Schema | NodeType::Run => {}
    }
    let count = added.len();
    for group in added {
        node.push_attribute(group);
    }
    count
}

pub fn default_differential_privacy() -> Attribute {
    Attribute::group(
        DIFFERENTIAL_PRIVACY,
        vec![Attribute::new("max_contributions", 1i64)],
    )
}

/// Mirrors the SmartNoise SQL table defaults.
pub fn default_smart_noise() -> Attribute {
    Attribute::group(
        SMART_NOISE,
        vec![
            Attribute::new("max_ids", 1i64),
            Attribute::new("row_privacy", false),
            Attribute::new("sample_max_ids", true),
            Attribute::new("censor_dims", true),
            Attribute::new("clamp_counts", false),
            Attribute::new("clamp_columns", true),
            Attribute::new("use_dpsu", false),
        ],
    )
}

/// Text and boolean columns are synthesized as categorical, the rest as
/// continuous.
pub fn default_private_synthesis(data_type_name: Option<&str>) -> Attribute {
    let categorical = matches!(data_type_name, Some("string") | Some("boolean"));
    Attribute::group(
        PRIVATE_SYNTHESIS,
        vec![
            Attribute::new("categorical", categorical),
            Attribute::new("synthesize", true),
        ],
    )
}
