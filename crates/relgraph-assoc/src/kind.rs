//! Association kinds and eager limit strategies.

use relgraph_core::{ConfigurationError, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The type of relationship between two models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    /// The owner holds a foreign key to the target (e.g. Track -> Album).
    ManyToOne,
    /// The target holds a foreign key to the owner (e.g. Album -> Tracks).
    OneToMany,
    /// Like `OneToMany`, collapsed to a single object.
    OneToOne,
    /// Owner and target are linked through a join table.
    ManyToMany,
}

impl AssociationKind {
    pub const ALL: [AssociationKind; 4] = [
        AssociationKind::ManyToOne,
        AssociationKind::OneToMany,
        AssociationKind::OneToOne,
        AssociationKind::ManyToMany,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            AssociationKind::ManyToOne => "many_to_one",
            AssociationKind::OneToMany => "one_to_many",
            AssociationKind::OneToOne => "one_to_one",
            AssociationKind::ManyToMany => "many_to_many",
        }
    }

    /// Whether the association cache holds a list.
    pub const fn is_collection(&self) -> bool {
        matches!(
            self,
            AssociationKind::OneToMany | AssociationKind::ManyToMany
        )
    }

    /// How much a graph join of this kind can multiply parent rows.
    pub const fn duplication_weight(&self) -> usize {
        match self {
            AssociationKind::ManyToOne | AssociationKind::OneToOne => 0,
            AssociationKind::OneToMany | AssociationKind::ManyToMany => 1,
        }
    }

    /// Whether loaded targets get a back-reference to their owner.
    pub const fn sets_reciprocal(&self) -> bool {
        matches!(self, AssociationKind::OneToMany | AssociationKind::OneToOne)
    }

    /// Kinds that can be the reciprocal of this one.
    pub const fn reciprocal_kinds(&self) -> &'static [AssociationKind] {
        match self {
            AssociationKind::ManyToOne => &[AssociationKind::OneToMany, AssociationKind::OneToOne],
            AssociationKind::OneToMany | AssociationKind::OneToOne => &[AssociationKind::ManyToOne],
            AssociationKind::ManyToMany => &[AssociationKind::ManyToMany],
        }
    }

    /// Whether an association of kind `self` may clone one of kind `source`.
    pub fn can_clone_from(self, source: AssociationKind) -> bool {
        self == source
            || matches!(
                (self, source),
                (AssociationKind::OneToMany, AssociationKind::OneToOne)
                    | (AssociationKind::OneToOne, AssociationKind::OneToMany)
            )
    }
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssociationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssociationKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                ConfigurationError::new(format!("unknown association kind '{}'", s)).into()
            })
    }
}

/// How a limited association is eager loaded for many owners at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EagerLimitStrategy {
    /// Fetch every match and slice each owner's list in memory.
    #[default]
    Slice,
    /// Number rows per owner with `ROW_NUMBER()` and filter in SQL.
    WindowFunction,
    /// `DISTINCT ON` the owner key (one_to_one only).
    DistinctOn,
}
