pub mod attribute;
pub mod codec;
pub mod config;
pub mod defaults;
pub mod error;
pub mod filter;
pub mod merge;
pub mod node;
pub mod permission;
pub mod schema;
pub mod verify;

pub use crate::attribute::{Attribute, TypeTag, Value};
pub use crate::codec::{from_map, load_tree, store_tree, to_map};
pub use crate::config::TreeConfig;
pub use crate::defaults::apply_defaults;
pub use crate::error::{MetaError, MetaErrorCode};
pub use crate::filter::{NodeSelector, RetainAttributes, RetainNodes, filter, ml_view, privacy_view};
pub use crate::merge::{MergeOptions, merge_attributes, merge_many, merge_nodes};
pub use crate::node::{Node, NodeType};
pub use crate::permission::{Action, PermissionSet, PrincipalId, Principals, Tier};
pub use crate::verify::{verify, verify_root};
