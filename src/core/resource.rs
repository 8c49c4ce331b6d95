//! Resource data model for the registry.
//!
//! A resource is a registered capability addressed by its namespace
//! (`kind:name`). Resources carry a priority used to settle conflicts
//! when two sources register the same namespace.

use indexmap::IndexSet;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::LazyLock;

use crate::error::{Error, Result};

/// Highest priority a resource may carry.
pub const MAX_PRIORITY: u16 = 1000;

/// Names are a single path-like segment without whitespace or colons.
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-/]*$").unwrap());

/// The sealed set of resource kinds.
///
/// The kind is the first half of every namespace and selects which
/// executor constructor the resolver uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// A multi-step capability.
    Skill,
    /// A slash-style command.
    Command,
    /// A delegated agent.
    Agent,
    /// A prompt template.
    Prompt,
    /// An event hook.
    Hook,
}

impl ResourceKind {
    /// Every kind, in table order.
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Skill,
        ResourceKind::Command,
        ResourceKind::Agent,
        ResourceKind::Prompt,
        ResourceKind::Hook,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Skill => "skill",
            ResourceKind::Command => "command",
            ResourceKind::Agent => "agent",
            ResourceKind::Prompt => "prompt",
            ResourceKind::Hook => "hook",
        }
    }

    /// Position of this kind in [`ResourceKind::ALL`].
    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ResourceKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown resource kind: {}", s)))
    }
}

/// Where a resource definition came from.
///
/// Ordered `Builtin < User < Project`. Only a hint for humans; priority
/// decides conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Builtin,
    User,
    Project,
}

impl SourceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::Builtin => "builtin",
            SourceTier::User => "user",
            SourceTier::Project => "project",
        }
    }
}

impl std::fmt::Display for SourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Build the namespace string for a kind and name.
pub fn namespace(kind: ResourceKind, name: &str) -> String {
    format!("{}:{}", kind.as_str(), name)
}

/// Split a namespace into its kind and name.
///
/// # Errors
///
/// Returns [`Error::InvalidNamespace`] when the separator is missing, the
/// kind is unknown, or the name contains illegal characters.
pub fn parse_namespace(ns: &str) -> Result<(ResourceKind, &str)> {
    let invalid = |reason: &str| Error::InvalidNamespace {
        namespace: ns.to_string(),
        reason: reason.to_string(),
    };

    let (kind, name) = ns.split_once(':').ok_or_else(|| invalid("expected kind:name"))?;
    let kind: ResourceKind = kind.parse().map_err(|_| invalid("unknown kind"))?;
    if !NAME_RE.is_match(name) {
        return Err(invalid("illegal characters in name"));
    }
    Ok((kind, name))
}

/// A registered capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Human label, unique within its kind.
    pub name: String,
    /// `kind:name`, the registry key.
    pub namespace: String,
    pub kind: ResourceKind,
    pub source_tier: SourceTier,
    /// Conflict tie-breaker in `0..=1000`. Larger values are clamped on load.
    #[serde(deserialize_with = "clamp_priority")]
    pub priority: u16,
    /// Namespaces this resource requires, in declaration order.
    #[serde(default)]
    pub dependencies: IndexSet<String>,
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    /// Opaque configuration handed to the executor constructor.
    #[serde(default)]
    pub payload: serde_json::Value,
}

fn clamp_priority<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = u64::deserialize(deserializer)?;
    Ok(raw.min(u64::from(MAX_PRIORITY)) as u16)
}

impl Resource {
    /// Create an enabled builtin resource with priority 0.
    pub fn new(kind: ResourceKind, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace(kind, name),
            kind,
            source_tier: SourceTier::Builtin,
            priority: 0,
            dependencies: IndexSet::new(),
            enabled: true,
            description: None,
            payload: serde_json::Value::Null,
        }
    }

    /// Create a resource from a `kind:name` namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace does not parse.
    pub fn from_namespace(ns: &str) -> Result<Self> {
        let (kind, name) = parse_namespace(ns)?;
        Ok(Self::new(kind, name))
    }

    /// Set the priority, clamped to [`MAX_PRIORITY`].
    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority.min(MAX_PRIORITY);
        self
    }

    pub fn with_source(mut self, source_tier: SourceTier) -> Self {
        self.source_tier = source_tier;
        self
    }

    /// Add a dependency. Duplicates are ignored.
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}
