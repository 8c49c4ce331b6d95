//! Resource registry with priority-based conflict resolution.
//!
//! The registry is the single source of truth for which resources exist.
//! It keeps secondary indexes by kind and source tier plus a reverse
//! dependency index, and keeps all of them consistent on every insert,
//! replace and removal.

use crate::core::dag::find_cycles;
use crate::core::resource::{Resource, ResourceKind, SourceTier, MAX_PRIORITY};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, warn};

/// Filter for [`Registry::list`]. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub kind: Option<ResourceKind>,
    pub source: Option<SourceTier>,
    pub enabled_only: bool,
}

impl ListFilter {
    pub fn kind(kind: ResourceKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    pub fn source(source: SourceTier) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    pub fn enabled_only(mut self) -> Self {
        self.enabled_only = true;
        self
    }

    fn matches(&self, resource: &Resource) -> bool {
        self.kind.is_none_or(|k| resource.kind == k)
            && self.source.is_none_or(|s| resource.source_tier == s)
            && (!self.enabled_only || resource.enabled)
    }
}

/// Counts describing the registry contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_kind: BTreeMap<ResourceKind, usize>,
    pub by_source: BTreeMap<SourceTier, usize>,
    /// Resources declaring at least one dependency.
    pub with_dependencies: usize,
    /// Declared dependency edges, including ones to unregistered targets.
    pub total_edges: usize,
}

/// Resources keyed by namespace, in registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    resources: IndexMap<String, Resource>,
    by_kind: HashMap<ResourceKind, BTreeSet<String>>,
    by_source: HashMap<SourceTier, BTreeSet<String>>,
    /// namespace -> namespaces that declare a dependency on it
    dependents: HashMap<String, BTreeSet<String>>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Mutation ==========

    /// Register a resource, settling conflicts by priority.
    ///
    /// An empty namespace is always taken. An occupied one is replaced when
    /// `overwrite` is set or the incoming priority is strictly higher.
    /// Equal or lower priority leaves the existing entry in place.
    ///
    /// Priorities above [`MAX_PRIORITY`] are clamped before comparing.
    ///
    /// Returns true if the resource was stored.
    pub fn register(&mut self, mut resource: Resource, overwrite: bool) -> bool {
        resource.priority = resource.priority.min(MAX_PRIORITY);
        if let Some(existing) = self.resources.get(&resource.namespace) {
            if !overwrite {
                if resource.priority == existing.priority {
                    warn!(
                        namespace = %resource.namespace,
                        priority = resource.priority,
                        existing_source = %existing.source_tier,
                        incoming_source = %resource.source_tier,
                        "Rejected registration with equal priority, keeping existing resource"
                    );
                    return false;
                }
                if resource.priority < existing.priority {
                    debug!(
                        namespace = %resource.namespace,
                        priority = resource.priority,
                        existing_priority = existing.priority,
                        "Rejected lower-priority registration"
                    );
                    return false;
                }
            }
            debug!(namespace = %resource.namespace, "Replacing registered resource");
            self.remove_from_indexes(&resource.namespace);
        }

        self.add_to_indexes(&resource);
        self.resources.insert(resource.namespace.clone(), resource);
        true
    }

    /// Remove a resource and all of its index entries.
    pub fn unregister(&mut self, namespace: &str) -> Option<Resource> {
        if !self.resources.contains_key(namespace) {
            return None;
        }
        self.remove_from_indexes(namespace);
        self.resources.shift_remove(namespace)
    }

    pub fn clear(&mut self) {
        self.resources.clear();
        self.by_kind.clear();
        self.by_source.clear();
        self.dependents.clear();
    }

    /// Toggle a resource's enabled flag. Returns false if it is not registered.
    pub fn set_enabled(&mut self, namespace: &str, enabled: bool) -> bool {
        match self.resources.get_mut(namespace) {
            Some(resource) => {
                resource.enabled = enabled;
                true
            }
            None => false,
        }
    }

    fn add_to_indexes(&mut self, resource: &Resource) {
        let ns = &resource.namespace;
        self.by_kind
            .entry(resource.kind)
            .or_default()
            .insert(ns.clone());
        self.by_source
            .entry(resource.source_tier)
            .or_default()
            .insert(ns.clone());
        for dep in &resource.dependencies {
            self.dependents
                .entry(dep.clone())
                .or_default()
                .insert(ns.clone());
        }
    }

    fn remove_from_indexes(&mut self, namespace: &str) {
        let Some(old) = self.resources.get(namespace) else {
            return;
        };

        if let Some(set) = self.by_kind.get_mut(&old.kind) {
            set.remove(namespace);
        }
        if let Some(set) = self.by_source.get_mut(&old.source_tier) {
            set.remove(namespace);
        }
        for dep in &old.dependencies {
            if let Some(set) = self.dependents.get_mut(dep) {
                set.remove(namespace);
                if set.is_empty() {
                    self.dependents.remove(dep);
                }
            }
        }
    }

    // ========== Queries ==========

    pub fn get(&self, namespace: &str) -> Option<&Resource> {
        self.resources.get(namespace)
    }

    pub fn exists(&self, namespace: &str) -> bool {
        self.resources.contains_key(namespace)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources matching the filter, in registration order.
    pub fn list(&self, filter: &ListFilter) -> Vec<&Resource> {
        self.resources
            .values()
            .filter(|r| filter.matches(r))
            .collect()
    }

    /// Namespaces registered under a kind, sorted.
    pub fn namespaces_of_kind(&self, kind: ResourceKind) -> Vec<&str> {
        self.by_kind
            .get(&kind)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Resources declaring a dependency on `namespace`, sorted by namespace.
    pub fn reverse_dependents(&self, namespace: &str) -> Vec<&str> {
        self.dependents
            .get(namespace)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    // ========== Dependency Analysis ==========

    /// Order in which `namespace` and its transitive dependencies must run.
    ///
    /// Dependencies come before their dependents and each namespace appears
    /// once, with the requested namespace last. Unregistered dependencies
    /// are skipped, and an unregistered root yields an empty order. A
    /// namespace already on the current path is not entered again, so a
    /// cyclic registry still terminates.
    pub fn resolve_dependency_order(&self, namespace: &str) -> Vec<String> {
        let mut order = Vec::new();
        if !self.exists(namespace) {
            return order;
        }

        let mut visited = HashSet::new();
        let mut path = HashSet::new();
        self.visit_in_order(namespace, &mut visited, &mut path, &mut order);
        order
    }

    fn visit_in_order<'a>(
        &'a self,
        namespace: &'a str,
        visited: &mut HashSet<&'a str>,
        path: &mut HashSet<&'a str>,
        order: &mut Vec<String>,
    ) {
        if visited.contains(namespace) || path.contains(namespace) {
            return;
        }
        let Some(resource) = self.resources.get(namespace) else {
            return;
        };

        path.insert(namespace);
        for dep in &resource.dependencies {
            self.visit_in_order(dep, visited, path, order);
        }
        path.remove(namespace);

        visited.insert(namespace);
        order.push(namespace.to_string());
    }

    /// Every dependency cycle among registered resources.
    ///
    /// Each cycle is the path from the first repeated namespace back to
    /// itself, e.g. `["skill:a", "skill:b", "skill:a"]`.
    pub fn check_cycles(&self) -> Vec<Vec<String>> {
        find_cycles(self.resources.keys().map(String::as_str), |ns| {
            self.resources
                .get(ns)
                .map(|r| r.dependencies.iter().map(String::as_str).collect())
                .unwrap_or_default()
        })
    }

    /// One message per declared dependency whose target is not registered.
    pub fn validate_dependencies(&self) -> Vec<String> {
        self.resources
            .values()
            .flat_map(|resource| {
                resource
                    .dependencies
                    .iter()
                    .filter(|dep| !self.exists(dep))
                    .map(move |dep| {
                        format!(
                            "Resource '{}' depends on '{}', which is not registered",
                            resource.namespace, dep
                        )
                    })
            })
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total: self.resources.len(),
            ..RegistryStats::default()
        };

        for (kind, set) in &self.by_kind {
            if !set.is_empty() {
                stats.by_kind.insert(*kind, set.len());
            }
        }
        for (source, set) in &self.by_source {
            if !set.is_empty() {
                stats.by_source.insert(*source, set.len());
            }
        }
        for resource in self.resources.values() {
            if !resource.dependencies.is_empty() {
                stats.with_dependencies += 1;
                stats.total_edges += resource.dependencies.len();
            }
        }

        stats
    }
}
