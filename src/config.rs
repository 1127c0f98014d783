use crate::node::NodeType;
use crate::schema::ROOT_TYPES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultGroups {
    /// Add missing `differential_privacy`, `smart_noise` and
    /// `private_synthesis` groups while decoding.
    Synthesize,
    /// Decode exactly what the input contains.
    AsIs,
}

/// Controls how trees are decoded and admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    pub default_groups: DefaultGroups,
    /// Assign schema default permissions to everything left unset, using the
    /// loading principals as owners.
    pub apply_defaults_on_load: bool,
    pub verify_on_load: bool,
    /// Deepest node nesting accepted by the decoder, root at depth 1.
    pub max_depth: usize,
    /// Deepest list nesting accepted inside a single attribute.
    pub max_attribute_depth: usize,
    pub root_types: Vec<NodeType>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            default_groups: DefaultGroups::Synthesize,
            apply_defaults_on_load: false,
            verify_on_load: false,
            max_depth: 16,
            max_attribute_depth: 8,
            root_types: ROOT_TYPES.to_vec(),
        }
    }
}

impl TreeConfig {
    /// Loaded trees are completed with defaults and must pass verification.
    pub fn strict() -> Self {
        Self {
            default_groups: DefaultGroups::Synthesize,
            apply_defaults_on_load: true,
            verify_on_load: true,
            ..Self::default()
        }
    }

    /// Decodes input as written; no defaults, no verification.
    pub fn lenient() -> Self {
        Self {
            default_groups: DefaultGroups::AsIs,
            apply_defaults_on_load: false,
            verify_on_load: false,
            ..Self::default()
        }
    }

    pub fn synthesizes_default_groups(&self) -> bool {
        matches!(self.default_groups, DefaultGroups::Synthesize)
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_root_types(mut self, root_types: &[NodeType]) -> Self {
        self.root_types = root_types.to_vec();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles() {
        let default = TreeConfig::default();
        assert!(default.synthesizes_default_groups());
        assert!(!default.verify_on_load);

        let strict = TreeConfig::strict();
        assert!(strict.verify_on_load && strict.apply_defaults_on_load);
        assert_eq!(strict.max_depth, default.max_depth);

        let lenient = TreeConfig::lenient();
        assert!(!lenient.synthesizes_default_groups());
        assert_eq!(lenient.root_types, vec![NodeType::Dataset, NodeType::Run]);

        let narrow = TreeConfig::default()
            .with_max_depth(3)
            .with_root_types(&[NodeType::Table]);
        assert_eq!(narrow.max_depth, 3);
        assert_eq!(narrow.root_types, vec![NodeType::Table]);
    }
}
