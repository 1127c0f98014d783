use crate::error::MetaError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Capabilities a permission set can grant on one attribute or node.
///
/// - `Read` gates consumers reading the value.
/// - `WriteAttributes` gates adding attributes to a node or members to a group.
/// - `WriteChildNodes` gates adding child nodes.
/// - `WritePermissions` gates changing the permission set itself.
/// - `WriteValue` gates replacing a scalar value or an array.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    WriteAttributes,
    WriteChildNodes,
    WritePermissions,
    WriteValue,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Read,
        Action::WriteAttributes,
        Action::WriteChildNodes,
        Action::WritePermissions,
        Action::WriteValue,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::WriteAttributes => "write_attributes",
            Action::WriteChildNodes => "write_child_nodes",
            Action::WritePermissions => "write_permissions",
            Action::WriteValue => "write_value",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Action::ALL.into_iter().find(|a| a.as_str() == name)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity a permission check is evaluated against. Always a valid UUID: the
/// only way to obtain one from text is [`PrincipalId::parse`].
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    pub fn parse(raw: &str) -> Result<Self, MetaError> {
        Uuid::parse_str(raw.trim())
            .map(PrincipalId)
            .map_err(|_| MetaError::InvalidPrincipalId(raw.to_string()))
    }

    pub fn random() -> Self {
        PrincipalId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for PrincipalId {
    fn from(value: Uuid) -> Self {
        PrincipalId(value)
    }
}

impl FromStr for PrincipalId {
    type Err = MetaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PrincipalId::parse(s)
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

/// The principals on whose behalf an operation is requested.
pub type Principals = BTreeSet<PrincipalId>;

/// Parses a list of textual ids, failing on the first malformed one.
pub fn parse_principals<I, S>(raw: I) -> Result<Principals, MetaError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|id| PrincipalId::parse(id.as_ref()))
        .collect()
}

/// Who may perform one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grantees {
    Unrestricted,
    Principals(BTreeSet<PrincipalId>),
}

impl Grantees {
    pub fn allows_any(&self, principals: &Principals) -> bool {
        match self {
            Grantees::Unrestricted => true,
            Grantees::Principals(granted) => !granted.is_disjoint(principals),
        }
    }

    pub fn is_subset_of(&self, other: &Grantees) -> bool {
        match (self, other) {
            (_, Grantees::Unrestricted) => true,
            (Grantees::Unrestricted, Grantees::Principals(_)) => false,
            (Grantees::Principals(a), Grantees::Principals(b)) => a.is_subset(b),
        }
    }

    pub fn intersect(&self, other: &Grantees) -> Grantees {
        match (self, other) {
            (Grantees::Unrestricted, g) | (g, Grantees::Unrestricted) => g.clone(),
            (Grantees::Principals(a), Grantees::Principals(b)) => {
                Grantees::Principals(a.intersection(b).copied().collect())
            }
        }
    }
}

/// Partial map from action to grantees. An action missing from the map is not
/// permitted to anyone. Compare with `Option<PermissionSet>::None` on an
/// attribute or node, which means no restriction at all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PermissionSet {
    grants: BTreeMap<Action, Grantees>,
}

impl PermissionSet {
    /// Empty set: nothing is permitted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every action granted to everyone. Equivalent to no permission set.
    pub fn open() -> Self {
        Action::ALL
            .into_iter()
            .fold(Self::new(), |set, action| set.grant_unrestricted(action))
    }

    pub fn grant_unrestricted(mut self, action: Action) -> Self {
        self.grants.insert(action, Grantees::Unrestricted);
        self
    }

    /// Adds principals to an action. Granting to an already unrestricted
    /// action leaves it unrestricted.
    pub fn grant<I>(mut self, action: Action, principals: I) -> Self
    where
        I: IntoIterator<Item = PrincipalId>,
    {
        let entry = self
            .grants
            .entry(action)
            .or_insert_with(|| Grantees::Principals(BTreeSet::new()));
        if let Grantees::Principals(set) = entry {
            set.extend(principals);
        }
        self
    }

    /// Text variant of [`PermissionSet::grant`]; every id must parse.
    pub fn grant_ids<S: AsRef<str>>(self, action: Action, ids: &[S]) -> Result<Self, MetaError> {
        let parsed = parse_principals(ids)?;
        Ok(self.grant(action, parsed))
    }

    pub fn revoke(mut self, action: Action) -> Self {
        self.grants.remove(&action);
        self
    }

    pub fn get(&self, action: Action) -> Option<&Grantees> {
        self.grants.get(&action)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Action, &Grantees)> {
        self.grants.iter().map(|(action, grantees)| (*action, grantees))
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    pub fn allows(&self, action: Action, principals: &Principals) -> bool {
        self.grants
            .get(&action)
            .is_some_and(|grantees| grantees.allows_any(principals))
    }

    /// True when every action is granted unrestricted, i.e. the set restricts
    /// nothing.
    pub fn grants_everything(&self) -> bool {
        Action::ALL
            .iter()
            .all(|action| matches!(self.grants.get(action), Some(Grantees::Unrestricted)))
    }

    pub fn is_subset_of(&self, other: &PermissionSet) -> bool {
        self.grants.iter().all(|(action, grantees)| {
            other
                .grants
                .get(action)
                .is_some_and(|theirs| grantees.is_subset_of(theirs))
        })
    }

    /// Per-action merge. Actions defined on both sides are intersected, or
    /// taken from `other` when `overwrite` is set. One-sided actions are kept.
    pub fn merged_with(&self, other: &PermissionSet, overwrite: bool) -> PermissionSet {
        let mut grants = self.grants.clone();
        for (action, theirs) in &other.grants {
            let merged = match grants.get(action) {
                Some(_) if overwrite => theirs.clone(),
                Some(ours) => ours.intersect(theirs),
                None => theirs.clone(),
            };
            grants.insert(*action, merged);
        }
        PermissionSet { grants }
    }
}

/// `None` is unrestricted, an unrestricted action admits anyone, otherwise at
/// least one requesting principal must be granted the action.
pub fn is_allowed(
    permissions: Option<&PermissionSet>,
    action: Action,
    principals: &Principals,
) -> bool {
    match permissions {
        None => true,
        Some(set) => set.allows(action, principals),
    }
}

/// `None` is the universal superset. It is a subset only of another `None` or
/// of a set that grants every action unrestricted.
pub fn is_subset(a: Option<&PermissionSet>, b: Option<&PermissionSet>) -> bool {
    match (a, b) {
        (_, None) => true,
        (None, Some(b)) => b.grants_everything(),
        (Some(a), Some(b)) => a.is_subset_of(b),
    }
}

/// `None` merged with anything yields the other side.
pub fn merge_permissions(
    a: Option<&PermissionSet>,
    b: Option<&PermissionSet>,
    overwrite: bool,
) -> Option<PermissionSet> {
    match (a, b) {
        (None, None) => None,
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (Some(a), Some(b)) => Some(a.merged_with(b, overwrite)),
    }
}

/// Named permission shapes resolved against a set of owners. Ordered so that
/// `OwnerOnly ⊆ SharedRead ⊆ AnalystReadWrite` for any owner set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    OwnerOnly,
    SharedRead,
    AnalystReadWrite,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::OwnerOnly => "owner_only",
            Tier::SharedRead => "shared_read",
            Tier::AnalystReadWrite => "analyst_read_write",
        }
    }

    pub fn resolve(self, owners: &Principals) -> PermissionSet {
        let open: &[Action] = match self {
            Tier::OwnerOnly => &[],
            Tier::SharedRead => &[Action::Read],
            Tier::AnalystReadWrite => &[Action::Read, Action::WriteValue],
        };
        Action::ALL.into_iter().fold(PermissionSet::new(), |set, action| {
            if open.contains(&action) {
                set.grant_unrestricted(action)
            } else {
                set.grant(action, owners.iter().copied())
            }
        })
    }
}
