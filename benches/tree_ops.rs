use criterion::{Criterion, black_box, criterion_group, criterion_main};
use metatree::attribute::Attribute;
use metatree::codec::{from_map, to_map};
use metatree::defaults::apply_defaults;
use metatree::filter::{RetainNodes, filter, privacy_view, table_named};
use metatree::merge::{MergeOptions, merge_nodes};
use metatree::node::{Node, NodeType};
use metatree::permission::{PrincipalId, Principals};
use metatree::verify::verify_root;
use uuid::Uuid;

const TABLES: usize = 20;
const COLUMNS_PER_TABLE: usize = 40;

fn owner() -> Principals {
    [PrincipalId::from(Uuid::from_u128(1))].into_iter().collect()
}

fn build_tree(column_offset: usize) -> Node {
    let mut schema = Node::named(NodeType::Schema, "public");
    for t in 0..TABLES {
        let mut table = Node::named(NodeType::Table, format!("table_{t}"))
            .with_attribute(Attribute::new("row_count", 1_000_000i64));
        for c in 0..COLUMNS_PER_TABLE {
            let data_type = if c % 3 == 0 { "string" } else { "float" };
            table = table.with_child(
                Node::named(NodeType::Column, format!("col_{}", c + column_offset))
                    .with_attribute(Attribute::new("data_type_name", data_type))
                    .with_attribute(Attribute::new("lower", 0.0f64))
                    .with_attribute(Attribute::new("upper", 1.0e6f64))
                    .with_attribute(Attribute::new("is_feature", c % 5 != 0)),
            );
        }
        schema = schema.with_child(table);
    }
    apply_defaults(
        &Node::named(NodeType::Dataset, "bench")
            .with_child(Node::named(NodeType::Database, "main").with_child(schema)),
        &owner(),
    )
}

fn bench_tree_ops(c: &mut Criterion) {
    let tree = build_tree(0);
    let contribution = build_tree(COLUMNS_PER_TABLE / 2);
    let principals = owner();
    let map = to_map(&tree).expect("encode");

    c.bench_function("verify_800_columns", |b| {
        b.iter(|| verify_root(black_box(&tree), &principals).expect("verify"))
    });

    c.bench_function("merge_identical_trees", |b| {
        b.iter(|| {
            merge_nodes(
                black_box(&tree),
                black_box(&tree),
                MergeOptions::default(),
                &principals,
            )
            .expect("merge")
        })
    });

    c.bench_function("merge_overlapping_contribution", |b| {
        b.iter(|| {
            merge_nodes(
                black_box(&tree),
                black_box(&contribution),
                MergeOptions::default(),
                &principals,
            )
            .expect("merge")
        })
    });

    let view = privacy_view();
    c.bench_function("filter_privacy_view", |b| {
        b.iter(|| filter(black_box(&tree), &RetainNodes::new(), &view))
    });

    let one_table = table_named("table_7");
    c.bench_function("filter_single_table", |b| {
        b.iter(|| filter(black_box(&tree), &one_table, &view))
    });

    c.bench_function("encode_to_map", |b| {
        b.iter(|| to_map(black_box(&tree)).expect("encode"))
    });

    c.bench_function("decode_from_map", |b| {
        b.iter(|| from_map(black_box(&map)).expect("decode"))
    });
}

criterion_group!(benches, bench_tree_ops);
criterion_main!(benches);
