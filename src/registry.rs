//! Release registry access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::Result;
use crate::release::{ProjectId, ReleaseDescriptor};

/// A source of published releases, typically a remote package registry.
///
/// Implementations return releases filtered by runtime version, in the
/// registry's own order (most recent first for well-behaved registries).
/// An empty vector means "no matching release"; `Err` is reserved for
/// transport failures.
pub trait ReleaseSource: Send + Sync {
    /// Get the releases of `project` compatible with `runtime_version`.
    fn releases(&self, project: &ProjectId, runtime_version: &str) -> Result<Vec<ReleaseDescriptor>>;
}

impl<T: ReleaseSource + ?Sized> ReleaseSource for Arc<T> {
    fn releases(&self, project: &ProjectId, runtime_version: &str) -> Result<Vec<ReleaseDescriptor>> {
        (**self).releases(project, runtime_version)
    }
}

/// Configuration for the in-memory registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Whether releases are served most recent first (reverse publish order).
    pub newest_first: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { newest_first: true }
    }
}

impl RegistryConfig {
    /// Create a new registry configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the release ordering.
    pub fn with_newest_first(mut self, newest_first: bool) -> Self {
        self.newest_first = newest_first;
        self
    }
}

/// In-process release catalog.
///
/// Releases are kept in publish order per project. Useful for offline
/// catalogs, demos and tests.
pub struct MemoryRegistry {
    config: RegistryConfig,
    projects: DashMap<ProjectId, Vec<ReleaseDescriptor>>,
    queries: AtomicU64,
}

impl MemoryRegistry {
    /// Create a new in-memory registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            projects: DashMap::new(),
            queries: AtomicU64::new(0),
        }
    }

    /// Create with default configuration.
    pub fn default_config() -> Self {
        Self::new(RegistryConfig::default())
    }

    /// Load a catalog from JSON: an object mapping project id to its
    /// releases in publish order.
    #[cfg(feature = "serde")]
    pub fn from_json(content: &str) -> Result<Self> {
        let catalog: std::collections::BTreeMap<ProjectId, Vec<ReleaseDescriptor>> =
            serde_json::from_str(content)
                .map_err(|e| crate::Error::Parse(format!("invalid catalog: {}", e)))?;

        let registry = Self::default_config();
        for (project, releases) in catalog {
            for release in releases {
                registry.publish(project.clone(), release);
            }
        }
        Ok(registry)
    }

    /// Get the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Publish a release of a project.
    pub fn publish(&self, project: impl Into<ProjectId>, release: ReleaseDescriptor) {
        self.projects.entry(project.into()).or_default().push(release);
    }

    /// Remove a project and all its releases.
    pub fn remove_project(&self, project: &str) -> Option<Vec<ReleaseDescriptor>> {
        self.projects.remove(project).map(|(_, releases)| releases)
    }

    /// Check if a project exists.
    pub fn contains(&self, project: &str) -> bool {
        self.projects.contains_key(project)
    }

    /// Get project count.
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Number of release queries served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }
}

impl ReleaseSource for MemoryRegistry {
    fn releases(&self, project: &ProjectId, runtime_version: &str) -> Result<Vec<ReleaseDescriptor>> {
        self.queries.fetch_add(1, Ordering::Relaxed);

        let Some(published) = self.projects.get(project) else {
            return Ok(Vec::new());
        };

        let matching = published.iter().filter(|r| r.supports(runtime_version)).cloned();
        let releases = if self.config.newest_first {
            matching.rev().collect()
        } else {
            matching.collect()
        };

        Ok(releases)
    }
}

impl std::fmt::Debug for MemoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegistry")
            .field("config", &self.config)
            .field("project_count", &self.projects.len())
            .finish()
    }
}
