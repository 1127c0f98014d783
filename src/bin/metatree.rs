use metatree::codec::{TextFormat, load_tree, render_tree, store_tree};
use metatree::config::TreeConfig;
use metatree::defaults::apply_defaults;
use metatree::filter::{RetainNodes, filter, ml_view, privacy_view, table_named};
use metatree::merge::{MergeOptions, merge_nodes};
use metatree::node::Node;
use metatree::permission::{Principals, parse_principals};
use metatree::schema::describe;
use metatree::verify::verify;
use std::fs;
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("METATREE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        return Err("missing command".into());
    }
    match args[1].as_str() {
        "verify" => cmd_verify(&args[2..]),
        "defaults" => cmd_defaults(&args[2..]),
        "merge" => cmd_merge(&args[2..]),
        "filter" => cmd_filter(&args[2..]),
        "schema" => cmd_schema(&args[2..]),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            print_usage();
            Err(format!("unknown command: {other}"))
        }
    }
}

fn cmd_verify(args: &[String]) -> Result<(), String> {
    let tree = parse_flag_value(args, "--tree").ok_or("--tree is required")?;
    let principals = parse_principal_flags(args)?;
    let mut config = TreeConfig::strict();
    config.apply_defaults_on_load = has_flag(args, "--apply-defaults");
    let node = load_tree(&tree, &config, &principals).map_err(|e| format!("verify {tree}: {e}"))?;
    println!("ok\t{}\t{}", node.label(), node.node_count());
    Ok(())
}

fn cmd_defaults(args: &[String]) -> Result<(), String> {
    let tree = parse_flag_value(args, "--tree").ok_or("--tree is required")?;
    let principals = parse_principal_flags(args)?;
    let node = load(&tree, &principals)?;
    let completed = apply_defaults(&node, &principals);
    verify(&completed, &TreeConfig::default().root_types, &principals)
        .map_err(|e| format!("verify {tree}: {e}"))?;
    emit(&completed, parse_flag_value(args, "--out"))
}

fn cmd_merge(args: &[String]) -> Result<(), String> {
    let left = parse_flag_value(args, "--left").ok_or("--left is required")?;
    let right = parse_flag_value(args, "--right").ok_or("--right is required")?;
    let principals = parse_principal_flags(args)?;
    let options = MergeOptions::default()
        .overwrite_value(has_flag(args, "--overwrite-value"))
        .overwrite_permissions(has_flag(args, "--overwrite-permissions"));

    let left_node = load(&left, &principals)?;
    let right_node = load(&right, &principals)?;
    let merged = merge_nodes(&left_node, &right_node, options, &principals)
        .map_err(|e| format!("merge [{}]: {e}", e.code_str()))?;
    emit(&merged, parse_flag_value(args, "--out"))
}

fn cmd_filter(args: &[String]) -> Result<(), String> {
    let tree = parse_flag_value(args, "--tree").ok_or("--tree is required")?;
    let view = parse_flag_value(args, "--view").ok_or("--view is required")?;
    let retain_attributes = match view.as_str() {
        "ml" => ml_view(),
        "privacy" => privacy_view(),
        other => return Err(format!("unknown view: {other} (expected ml or privacy)")),
    };
    let retain_nodes = match parse_flag_value(args, "--table") {
        Some(table) => table_named(&table),
        None => RetainNodes::new(),
    };
    let principals = parse_principal_flags(args)?;
    let node = load(&tree, &principals)?;
    let view = filter(&node, &retain_nodes, &retain_attributes)
        .ok_or("filter removed the root node")?;
    emit(&view, parse_flag_value(args, "--out"))
}

fn cmd_schema(args: &[String]) -> Result<(), String> {
    let text = serde_json::to_string_pretty(&describe()).map_err(|e| format!("schema: {e}"))?;
    match parse_flag_value(args, "--out") {
        Some(out) => fs::write(&out, text).map_err(|e| format!("write {out}: {e}")),
        None => {
            println!("{text}");
            Ok(())
        }
    }
}

fn load(path: &str, principals: &Principals) -> Result<Node, String> {
    load_tree(path, &TreeConfig::default(), principals).map_err(|e| format!("load {path}: {e}"))
}

fn emit(node: &Node, out: Option<String>) -> Result<(), String> {
    match out {
        Some(out) => store_tree(&out, node).map_err(|e| format!("write {out}: {e}")),
        None => {
            let text = render_tree(node, TextFormat::Json).map_err(|e| format!("render: {e}"))?;
            println!("{text}");
            Ok(())
        }
    }
}

fn parse_principal_flags(args: &[String]) -> Result<Principals, String> {
    let ids = parse_flag_values(args, "--principal");
    if ids.is_empty() {
        return Err("at least one --principal <uuid> is required".into());
    }
    parse_principals(&ids).map_err(|e| e.to_string())
}

fn parse_flag_value(args: &[String], flag: &str) -> Option<String> {
    for idx in 0..args.len() {
        if args[idx] == flag {
            return args.get(idx + 1).cloned();
        }
    }
    None
}

fn parse_flag_values(args: &[String], flag: &str) -> Vec<String> {
    args.windows(2)
        .filter(|pair| pair[0] == flag)
        .map(|pair| pair[1].clone())
        .collect()
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn print_usage() {
    eprintln!("usage:");
    eprintln!(
        "  metatree verify --tree <tree.json|yaml> --principal <uuid> [--principal <uuid>...] [--apply-defaults]"
    );
    eprintln!("  metatree defaults --tree <tree.json|yaml> --principal <uuid> [--out <file>]");
    eprintln!(
        "  metatree merge --left <tree> --right <tree> --principal <uuid> [--overwrite-value] [--overwrite-permissions] [--out <file>]"
    );
    eprintln!(
        "  metatree filter --tree <tree> --view ml|privacy --principal <uuid> [--table <name>] [--out <file>]"
    );
    eprintln!("  metatree schema [--out <schema.json>]");
    eprintln!("logging is controlled by METATREE_LOG (falls back to RUST_LOG)");
}
