use metatree::attribute::Attribute;
use metatree::defaults::apply_defaults;
use metatree::filter::{
    NodeSelector, RetainAttributes, RetainNodes, filter, ml_view, privacy_view, table_named,
};
use metatree::node::{Node, NodeType};
use metatree::permission::{PrincipalId, Principals};
use proptest::prelude::*;
use uuid::Uuid;

fn owner() -> Principals {
    [PrincipalId::from(Uuid::from_u128(21))].into_iter().collect()
}

fn column(name: &str, data_type: &str) -> Node {
    Node::named(NodeType::Column, name)
        .with_attribute(Attribute::new("data_type_name", data_type))
        .with_attribute(Attribute::new("description", "free text"))
        .with_attribute(Attribute::new("lower", 0i64))
        .with_attribute(Attribute::new("upper", 100i64))
        .with_attribute(Attribute::new("is_feature", data_type != "string"))
}

fn census() -> Node {
    let mut schema = Node::named(NodeType::Schema, "public");
    for table in ["adult", "housing", "credit"] {
        schema = schema.with_child(
            Node::named(NodeType::Table, table)
                .with_attribute(Attribute::new("description", format!("{table} table")))
                .with_child(column("age", "int"))
                .with_child(column("occupation", "string")),
        );
    }
    apply_defaults(
        &Node::named(NodeType::Dataset, "census")
            .with_attribute(Attribute::new("privacy_level", 1i64))
            .with_child(Node::named(NodeType::Database, "main").with_child(schema)),
        &owner(),
    )
}

fn tables(tree: &Node) -> &[Node] {
    tree.children()[0].children()[0].children()
}

#[test]
fn retaining_one_table_drops_the_others_and_their_columns() {
    let tree = census();
    let view = filter(&tree, &table_named("adult"), &RetainAttributes::new()).expect("root");
    assert_eq!(tables(&view).len(), 1);
    assert_eq!(tables(&view)[0].name(), Some("adult"));
    assert_eq!(tables(&view)[0].children().len(), 2);
    assert_eq!(view.node_count(), tree.node_count() - 6);
    // untouched branches keep every attribute
    assert_eq!(tables(&view)[0], tables(&tree)[0]);
}

#[test]
fn privacy_view_keeps_budgets_and_bounds_only() {
    let view = filter(&census(), &RetainNodes::new(), &privacy_view()).expect("root");
    assert!(view.get_attribute("privacy_level").is_some());

    let adult = &tables(&view)[0];
    assert!(adult.get_attribute("description").is_none());
    assert!(adult.get_attribute("smart_noise").is_some());
    assert!(adult.lookup(&["differential_privacy", "max_contributions"]).is_some());

    let age = adult.child("age").expect("age");
    for key in ["name", "data_type_name", "lower", "upper"] {
        assert!(age.get_attribute(key).is_some(), "{key}");
    }
    for key in ["description", "is_feature", "private_synthesis"] {
        assert!(age.get_attribute(key).is_none(), "{key}");
    }
}

#[test]
fn ml_view_exposes_feature_flags() {
    let view = filter(&census(), &RetainNodes::new(), &ml_view()).expect("root");
    let occupation = tables(&view)[1].child("occupation").expect("column");
    assert_eq!(
        occupation
            .get_attribute_value("is_feature")
            .and_then(|v| v.as_bool()),
        Some(false)
    );
    assert!(occupation.get_attribute("lower").is_none());
    // permissions travel with the kept attributes
    assert!(occupation.get_attribute("name").and_then(Attribute::permissions).is_some());
}

#[test]
fn node_predicates_apply_at_every_depth() {
    let numeric_only = RetainNodes::new().when(NodeType::Column, "data_type_name", ["int", "float"]);
    let view = filter(&census(), &numeric_only, &ml_view()).expect("root");
    for table in tables(&view) {
        let names = table.children().iter().filter_map(Node::name).collect::<Vec<_>>();
        assert_eq!(names, vec!["age"]);
    }
}

fn arb_view() -> impl Strategy<Value = (RetainNodes, RetainAttributes)> {
    let keys = prop::sample::subsequence(
        vec![
            "name",
            "data_type_name",
            "description",
            "lower",
            "upper",
            "is_feature",
            "privacy_level",
            "smart_noise.max_ids",
            "differential_privacy",
        ],
        0..6,
    );
    let table_filter = prop::option::of(prop::sample::select(vec!["adult", "housing", "nope"]));
    let type_specific = any::<bool>();
    (keys, table_filter, type_specific).prop_map(|(keys, table, type_specific)| {
        let selector = if type_specific {
            NodeSelector::Type(NodeType::Column)
        } else {
            NodeSelector::Any
        };
        let attributes = keys
            .into_iter()
            .fold(RetainAttributes::new(), |retain, key| retain.keep(selector, key));
        let nodes = match table {
            Some(name) => table_named(name),
            None => RetainNodes::new(),
        };
        (nodes, attributes)
    })
}

proptest! {
    #[test]
    fn filtering_is_a_projection((nodes, attributes) in arb_view()) {
        let tree = census();
        let once = filter(&tree, &nodes, &attributes);
        let twice = once.as_ref().and_then(|view| filter(view, &nodes, &attributes));
        prop_assert_eq!(once, twice);
    }
}
