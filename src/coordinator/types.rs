//! Core identifiers for coordinator work items

use serde::{Deserialize, Serialize};

/// The three access-control object kinds sequenced by the coordinator
///
/// Kinds form a fixed dependency chain: Role → Grant → User. A grant is only
/// applied once every role it references has converged, and a user is only
/// created once every role and grant it depends on has converged.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A named permission bundle in the managed database
    Role,
    /// A privilege assignment to a role
    Grant,
    /// A database account holding one or more roles
    User,
}

impl ResourceKind {
    /// All kinds in chain order
    pub const ALL: [ResourceKind; 3] = [Self::Role, Self::Grant, Self::User];

    /// The kind whose items depend on this kind, if any
    pub fn downstream(&self) -> Option<ResourceKind> {
        match self {
            Self::Role => Some(Self::Grant),
            Self::Grant => Some(Self::User),
            Self::User => None,
        }
    }

    /// Returns true if items of this kind declare upstream dependencies
    pub fn has_dependencies(&self) -> bool {
        !matches!(self, Self::Role)
    }

    /// Stable index of this kind, used for per-kind state slots
    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Role => write!(f, "role"),
            Self::Grant => write!(f, "grant"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Reference to one access-control object, equality by value
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// The object's kind
    pub kind: ResourceKind,
    /// The object's name
    pub name: String,
    /// The namespace the object lives in
    pub namespace: String,
}

impl ResourceRef {
    /// Create a new reference
    pub fn new(kind: ResourceKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Create a reference to a role
    pub fn role(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(ResourceKind::Role, name, namespace)
    }

    /// Create a reference to a grant
    pub fn grant(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(ResourceKind::Grant, name, namespace)
    }

    /// Create a reference to a user
    pub fn user(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(ResourceKind::User, name, namespace)
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// A scheduled unit of work: one object reference plus its owning cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkItem {
    /// The object to reconcile
    pub reference: ResourceRef,
    /// Name of the managed cluster the object belongs to
    pub cluster: String,
}

impl WorkItem {
    /// Create a new work item
    pub fn new(reference: ResourceRef, cluster: impl Into<String>) -> Self {
        Self {
            reference,
            cluster: cluster.into(),
        }
    }
}
