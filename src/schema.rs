use crate::attribute::TypeTag;
use crate::node::NodeType;
use crate::permission::Tier;
use serde::Serialize;

/// Value constraint attached to an attribute rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    Unconstrained,
    IntRange { min: i64, max: i64 },
    /// Applies to floats; integers are accepted unchecked where the rule
    /// allows both numeric types.
    FloatRange { min: f64, max: f64 },
    OneOf(&'static [&'static str]),
    NonEmpty,
    /// Unkeyed list whose elements all carry the tag.
    ArrayOf(TypeTag),
    /// Keyed list with free keys whose members all carry the tag.
    RecordOf(TypeTag),
}

impl Constraint {
    pub fn describe(&self) -> String {
        match self {
            Constraint::Unconstrained => "unconstrained".to_string(),
            Constraint::IntRange { min, max } => format!("int in [{min}, {max}]"),
            Constraint::FloatRange { min, max } => format!("float in [{min}, {max}]"),
            Constraint::OneOf(values) => format!("one of {}", values.join("|")),
            Constraint::NonEmpty => "non-empty".to_string(),
            Constraint::ArrayOf(tag) => format!("array of {tag}"),
            Constraint::RecordOf(tag) => format!("record of {tag}"),
        }
    }

    fn to_schema(self) -> Option<ConstraintSchema> {
        Some(match self {
            Constraint::Unconstrained => return None,
            Constraint::IntRange { min, max } => ConstraintSchema::IntRange { min, max },
            Constraint::FloatRange { min, max } => ConstraintSchema::FloatRange { min, max },
            Constraint::OneOf(values) => ConstraintSchema::OneOf {
                values: values.to_vec(),
            },
            Constraint::NonEmpty => ConstraintSchema::NonEmpty,
            Constraint::ArrayOf(element_type) => ConstraintSchema::ArrayOf { element_type },
            Constraint::RecordOf(member_type) => ConstraintSchema::RecordOf { member_type },
        })
    }
}

/// Contract for one attribute key on one node type (or one member of a group).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttributeRule {
    pub key: &'static str,
    pub types: &'static [TypeTag],
    pub required: bool,
    /// Maximum permission the attribute may declare. `None` permits anything.
    pub ceiling: Option<Tier>,
    /// Permission assigned by `apply_defaults` when none is set.
    pub tier: Tier,
    pub constraint: Constraint,
    /// Non-empty for groups: the keyed members the group may hold.
    pub members: &'static [AttributeRule],
}

impl AttributeRule {
    const fn new(key: &'static str, types: &'static [TypeTag], tier: Tier) -> Self {
        AttributeRule {
            key,
            types,
            required: false,
            ceiling: None,
            tier,
            constraint: Constraint::Unconstrained,
            members: &[],
        }
    }

    const fn require(self) -> Self {
        AttributeRule {
            required: true,
            ..self
        }
    }

    const fn with_ceiling(self, ceiling: Tier) -> Self {
        AttributeRule {
            ceiling: Some(ceiling),
            ..self
        }
    }

    const fn with_constraint(self, constraint: Constraint) -> Self {
        AttributeRule { constraint, ..self }
    }

    const fn with_members(self, members: &'static [AttributeRule]) -> Self {
        AttributeRule { members, ..self }
    }

    pub fn member(&self, key: &str) -> Option<&AttributeRule> {
        self.members.iter().find(|m| m.key == key)
    }

    pub fn is_group(&self) -> bool {
        !self.members.is_empty()
    }
}

/// Contract for one node type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeRule {
    pub node_type: NodeType,
    pub children: &'static [NodeType],
    pub ceiling: Option<Tier>,
    pub tier: Tier,
    pub attributes: &'static [AttributeRule],
}

impl NodeRule {
    pub fn attribute(&self, key: &str) -> Option<&AttributeRule> {
        self.attributes.iter().find(|a| a.key == key)
    }

    pub fn required_keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.attributes.iter().filter(|a| a.required).map(|a| a.key)
    }

    pub fn allows_child(&self, node_type: NodeType) -> bool {
        self.children.contains(&node_type)
    }
}

const BOOLEAN: &[TypeTag] = &[TypeTag::Boolean];
const INT: &[TypeTag] = &[TypeTag::Int];
const FLOAT: &[TypeTag] = &[TypeTag::Float];
const NUMBER: &[TypeTag] = &[TypeTag::Int, TypeTag::Float];
const STRING: &[TypeTag] = &[TypeTag::String];
const DATETIME: &[TypeTag] = &[TypeTag::Datetime];
const LIST: &[TypeTag] = &[TypeTag::List];

const NON_NEGATIVE_INT: Constraint = Constraint::IntRange {
    min: 0,
    max: i64::MAX,
};
const POSITIVE_INT: Constraint = Constraint::IntRange {
    min: 1,
    max: i64::MAX,
};
const NON_NEGATIVE_FLOAT: Constraint = Constraint::FloatRange {
    min: 0.0,
    max: f64::MAX,
};
const UNIT_INTERVAL: Constraint = Constraint::FloatRange { min: 0.0, max: 1.0 };

pub const COLUMN_DATA_TYPES: &[&str] = &["int", "float", "string", "boolean", "datetime"];
pub const DATABASE_ENGINES: &[&str] = &[
    "postgres", "mysql", "sqlite", "mssql", "duckdb", "csv", "parquet",
];
pub const RUN_STATUSES: &[&str] = &["pending", "running", "succeeded", "failed"];

const NAME: AttributeRule = AttributeRule::new("name", STRING, Tier::SharedRead)
    .require()
    .with_constraint(Constraint::NonEmpty);
const DESCRIPTION: AttributeRule = AttributeRule::new("description", STRING, Tier::AnalystReadWrite);

pub const DIFFERENTIAL_PRIVACY: &str = "differential_privacy";
pub const SMART_NOISE: &str = "smart_noise";
pub const PRIVATE_SYNTHESIS: &str = "private_synthesis";

const DIFFERENTIAL_PRIVACY_MEMBERS: &[AttributeRule] = &[
    AttributeRule::new("privacy_unit", STRING, Tier::SharedRead),
    AttributeRule::new("max_contributions", INT, Tier::SharedRead).with_constraint(POSITIVE_INT),
    AttributeRule::new("epsilon_budget", FLOAT, Tier::SharedRead)
        .with_constraint(NON_NEGATIVE_FLOAT),
    AttributeRule::new("delta_budget", FLOAT, Tier::SharedRead).with_constraint(UNIT_INTERVAL),
];

const SMART_NOISE_MEMBERS: &[AttributeRule] = &[
    AttributeRule::new("max_ids", INT, Tier::SharedRead).with_constraint(POSITIVE_INT),
    AttributeRule::new("row_privacy", BOOLEAN, Tier::SharedRead),
    AttributeRule::new("sample_max_ids", BOOLEAN, Tier::SharedRead),
    AttributeRule::new("censor_dims", BOOLEAN, Tier::SharedRead),
    AttributeRule::new("clamp_counts", BOOLEAN, Tier::SharedRead),
    AttributeRule::new("clamp_columns", BOOLEAN, Tier::SharedRead),
    AttributeRule::new("use_dpsu", BOOLEAN, Tier::SharedRead),
];

const PRIVATE_SYNTHESIS_MEMBERS: &[AttributeRule] = &[
    AttributeRule::new("categorical", BOOLEAN, Tier::AnalystReadWrite),
    AttributeRule::new("synthesize", BOOLEAN, Tier::AnalystReadWrite),
    AttributeRule::new("epsilon_share", FLOAT, Tier::AnalystReadWrite)
        .with_constraint(UNIT_INTERVAL),
];

static DATASET_RULE: NodeRule = NodeRule {
    node_type: NodeType::Dataset,
    children: &[NodeType::Database],
    ceiling: None,
    tier: Tier::SharedRead,
    attributes: &[
        NAME,
        DESCRIPTION,
        AttributeRule::new("owner", STRING, Tier::OwnerOnly),
        AttributeRule::new("created_at", DATETIME, Tier::SharedRead),
        AttributeRule::new("version", INT, Tier::SharedRead).with_constraint(NON_NEGATIVE_INT),
        AttributeRule::new("privacy_level", INT, Tier::SharedRead)
            .with_ceiling(Tier::SharedRead)
            .with_constraint(Constraint::IntRange { min: 0, max: 2 }),
        AttributeRule::new("tags", LIST, Tier::AnalystReadWrite)
            .with_constraint(Constraint::ArrayOf(TypeTag::String)),
    ],
};

static DATABASE_RULE: NodeRule = NodeRule {
    node_type: NodeType::Database,
    children: &[NodeType::Schema],
    ceiling: None,
    tier: Tier::SharedRead,
    attributes: &[
        NAME,
        DESCRIPTION,
        AttributeRule::new("engine", STRING, Tier::SharedRead)
            .with_constraint(Constraint::OneOf(DATABASE_ENGINES)),
        AttributeRule::new("connection_uri", STRING, Tier::OwnerOnly)
            .with_ceiling(Tier::OwnerOnly),
    ],
};

static SCHEMA_RULE: NodeRule = NodeRule {
    node_type: NodeType::Schema,
    children: &[NodeType::Table],
    ceiling: None,
    tier: Tier::SharedRead,
    attributes: &[NAME, DESCRIPTION],
};

static TABLE_RULE: NodeRule = NodeRule {
    node_type: NodeType::Table,
    children: &[NodeType::Column],
    ceiling: None,
    tier: Tier::SharedRead,
    attributes: &[
        NAME,
        DESCRIPTION,
        AttributeRule::new("row_count", INT, Tier::SharedRead).with_constraint(NON_NEGATIVE_INT),
        AttributeRule::new("primary_key", STRING, Tier::SharedRead),
        AttributeRule::new(DIFFERENTIAL_PRIVACY, LIST, Tier::SharedRead)
            .require()
            .with_ceiling(Tier::SharedRead)
            .with_members(DIFFERENTIAL_PRIVACY_MEMBERS),
        AttributeRule::new(SMART_NOISE, LIST, Tier::SharedRead)
            .require()
            .with_members(SMART_NOISE_MEMBERS),
    ],
};

static COLUMN_RULE: NodeRule = NodeRule {
    node_type: NodeType::Column,
    children: &[],
    ceiling: None,
    tier: Tier::SharedRead,
    attributes: &[
        NAME,
        AttributeRule::new("data_type_name", STRING, Tier::SharedRead)
            .require()
            .with_constraint(Constraint::OneOf(COLUMN_DATA_TYPES)),
        DESCRIPTION,
        AttributeRule::new("nullable", BOOLEAN, Tier::SharedRead),
        AttributeRule::new("is_feature", BOOLEAN, Tier::AnalystReadWrite),
        AttributeRule::new("is_target", BOOLEAN, Tier::AnalystReadWrite),
        AttributeRule::new("lower", NUMBER, Tier::SharedRead).with_ceiling(Tier::SharedRead),
        AttributeRule::new("upper", NUMBER, Tier::SharedRead).with_ceiling(Tier::SharedRead),
        AttributeRule::new("cardinality", INT, Tier::SharedRead).with_constraint(NON_NEGATIVE_INT),
        AttributeRule::new("categories", LIST, Tier::SharedRead)
            .with_constraint(Constraint::ArrayOf(TypeTag::String)),
        AttributeRule::new("is_private_id", BOOLEAN, Tier::SharedRead)
            .with_ceiling(Tier::SharedRead),
        AttributeRule::new(PRIVATE_SYNTHESIS, LIST, Tier::AnalystReadWrite)
            .require()
            .with_members(PRIVATE_SYNTHESIS_MEMBERS),
    ],
};

static RUN_RULE: NodeRule = NodeRule {
    node_type: NodeType::Run,
    children: &[],
    ceiling: Some(Tier::AnalystReadWrite),
    tier: Tier::AnalystReadWrite,
    attributes: &[
        NAME,
        DESCRIPTION,
        AttributeRule::new("dataset", STRING, Tier::SharedRead),
        AttributeRule::new("status", STRING, Tier::AnalystReadWrite)
            .with_constraint(Constraint::OneOf(RUN_STATUSES)),
        AttributeRule::new("started_at", DATETIME, Tier::AnalystReadWrite),
        AttributeRule::new("finished_at", DATETIME, Tier::AnalystReadWrite),
        AttributeRule::new("model", STRING, Tier::AnalystReadWrite),
        AttributeRule::new("epsilon_spent", FLOAT, Tier::SharedRead)
            .with_ceiling(Tier::SharedRead)
            .with_constraint(NON_NEGATIVE_FLOAT),
        AttributeRule::new("delta_spent", FLOAT, Tier::SharedRead)
            .with_ceiling(Tier::SharedRead)
            .with_constraint(UNIT_INTERVAL),
        AttributeRule::new("metrics", LIST, Tier::AnalystReadWrite)
            .with_constraint(Constraint::RecordOf(TypeTag::Float)),
    ],
};

pub fn node_rule(node_type: NodeType) -> &'static NodeRule {
    match node_type {
        NodeType::Dataset => &DATASET_RULE,
        NodeType::Database => &DATABASE_RULE,
        NodeType::Schema => &SCHEMA_RULE,
        NodeType::Table => &TABLE_RULE,
        NodeType::Column => &COLUMN_RULE,
        NodeType::Run => &RUN_RULE,
    }
}

/// Node types that may appear at the root of a tree.
pub const ROOT_TYPES: &[NodeType] = &[NodeType::Dataset, NodeType::Run];

/// Attribute keys are lowercase snake_case and never start with another node
/// type's name followed by `_` (`table_rows` cannot live on a column).
pub fn check_key_convention(owner: NodeType, key: &str) -> Result<(), String> {
    let mut chars = key.chars();
    let well_formed = chars.next().is_some_and(|c| c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !well_formed {
        return Err(format!("attribute key '{key}' is not snake_case"));
    }
    if let Some(other) = NodeType::ALL
        .into_iter()
        .filter(|t| *t != owner)
        .find(|t| key.starts_with(&format!("{}_", t.as_str())))
    {
        return Err(format!(
            "attribute key '{key}' carries the '{other}_' prefix on a {owner} node"
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchemaDocument {
    pub version: u32,
    pub root_types: Vec<NodeType>,
    pub node_types: Vec<NodeTypeSchema>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NodeTypeSchema {
    pub type_name: NodeType,
    pub allowed_children: Vec<NodeType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceiling: Option<Tier>,
    pub default_tier: Tier,
    pub required_keys: Vec<&'static str>,
    pub attributes: Vec<AttributeSchema>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AttributeSchema {
    pub key: &'static str,
    pub type_names: Vec<TypeTag>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceiling: Option<Tier>,
    pub default_tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<ConstraintSchema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<AttributeSchema>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintSchema {
    IntRange { min: i64, max: i64 },
    FloatRange { min: f64, max: f64 },
    OneOf { values: Vec<&'static str> },
    NonEmpty,
    ArrayOf { element_type: TypeTag },
    RecordOf { member_type: TypeTag },
}

pub const SCHEMA_DOCUMENT_VERSION: u32 = 1;

/// Declarative description of every node type, for external validators.
pub fn describe() -> SchemaDocument {
    SchemaDocument {
        version: SCHEMA_DOCUMENT_VERSION,
        root_types: ROOT_TYPES.to_vec(),
        node_types: NodeType::ALL
            .into_iter()
            .map(|t| {
                let rule = node_rule(t);
                NodeTypeSchema {
                    type_name: t,
                    allowed_children: rule.children.to_vec(),
                    ceiling: rule.ceiling,
                    default_tier: rule.tier,
                    required_keys: rule.required_keys().collect(),
                    attributes: rule.attributes.iter().map(describe_attribute).collect(),
                }
            })
            .collect(),
    }
}

fn describe_attribute(rule: &AttributeRule) -> AttributeSchema {
    AttributeSchema {
        key: rule.key,
        type_names: rule.types.to_vec(),
        required: rule.required,
        ceiling: rule.ceiling,
        default_tier: rule.tier,
        constraint: rule.constraint.to_schema(),
        members: rule.members.iter().map(describe_attribute).collect(),
    }
}
