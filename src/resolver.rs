//! Transitive dependency resolution.
//!
//! Starting from a root project, the resolver follows `required` dependency
//! edges and selects exactly one artifact per reachable project: the primary
//! file of the first release the registry returns for the runtime version.
//! Every project is fetched at most once, which deduplicates diamonds and
//! makes cyclic graphs terminate.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::registry::ReleaseSource;
use crate::release::{ArtifactDescriptor, ProjectId};

/// How sibling dependencies are visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ResolutionMode {
    /// One registry query at a time, depth-first in declaration order.
    #[default]
    Sequential,
    /// Several registry queries in flight from a bounded worker pool.
    Concurrent,
}

/// Configuration for the dependency resolver.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct ResolverConfig {
    /// Traversal mode.
    pub mode: ResolutionMode,
    /// Worker count in concurrent mode.
    pub max_concurrency: usize,
    /// Maximum number of distinct projects in one resolution, root included.
    pub max_projects: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mode: ResolutionMode::Sequential,
            max_concurrency: 4,
            max_projects: 512,
        }
    }
}

impl ResolverConfig {
    /// Create a new resolver configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the traversal mode.
    pub fn with_mode(mut self, mode: ResolutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the worker count used in concurrent mode.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Set the project limit.
    pub fn with_max_projects(mut self, max: usize) -> Self {
        self.max_projects = max;
        self
    }

    /// Create a concurrent resolver config.
    pub fn concurrent(workers: usize) -> Self {
        Self::default()
            .with_mode(ResolutionMode::Concurrent)
            .with_max_concurrency(workers)
    }
}

/// Result of visiting a single project.
struct Visit {
    artifact: ArtifactDescriptor,
    dependencies: Vec<ProjectId>,
}

/// Query the registry for one project and pick its artifact.
fn visit<S: ReleaseSource + ?Sized>(
    source: &S,
    project: &ProjectId,
    runtime_version: &str,
) -> Result<Visit> {
    tracing::debug!("Querying releases of {} for runtime {}", project, runtime_version);

    let releases = source.releases(project, runtime_version)?;
    let latest = releases
        .into_iter()
        .next()
        .ok_or_else(|| Error::unresolvable(project.as_str(), runtime_version))?;

    let file = latest
        .primary_file()
        .ok_or_else(|| Error::no_primary(project.as_str(), latest.version.as_str()))?;

    Ok(Visit {
        artifact: ArtifactDescriptor::new(project.clone(), file.url.clone()),
        dependencies: latest.required_dependencies().cloned().collect(),
    })
}

/// Resolved artifacts indexed by project id, in discovery order.
///
/// A project is claimed before it is fetched; its slot stays empty until the
/// fetch succeeds.
#[derive(Default)]
struct Arena {
    index: HashMap<ProjectId, usize>,
    slots: Vec<Option<ArtifactDescriptor>>,
}

impl Arena {
    fn contains(&self, project: &ProjectId) -> bool {
        self.index.contains_key(project)
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    /// Claim a project. Returns false if it was already claimed.
    fn claim(&mut self, project: ProjectId) -> bool {
        if self.index.contains_key(&project) {
            return false;
        }
        self.index.insert(project, self.slots.len());
        self.slots.push(None);
        true
    }

    fn fill(&mut self, artifact: ArtifactDescriptor) {
        if let Some(&slot) = self.index.get(&artifact.project) {
            self.slots[slot] = Some(artifact);
        }
    }

    fn into_artifacts(self) -> Vec<ArtifactDescriptor> {
        self.slots.into_iter().flatten().collect()
    }
}

struct PoolState {
    arena: Arena,
    pending: VecDeque<ProjectId>,
    in_flight: usize,
    failure: Option<Error>,
    /// Set once the caller has taken the outcome; workers exit on sight.
    closed: bool,
}

impl PoolState {
    fn is_done(&self) -> bool {
        self.failure.is_some() || (self.pending.is_empty() && self.in_flight == 0)
    }

    fn fail(&mut self, error: Error) {
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        self.pending.clear();
    }
}

/// Queue and arena shared between the caller and the worker threads.
///
/// Workers are detached: the caller returns as soon as the traversal is done
/// or has failed, and a worker still blocked in a registry query exits after
/// it returns, discarding its result.
struct WorkPool {
    state: Mutex<PoolState>,
    ready: Condvar,
    runtime_version: String,
    max_projects: usize,
}

impl WorkPool {
    fn work<S: ReleaseSource + ?Sized>(&self, source: &S) {
        loop {
            let project = {
                let mut state = self.state.lock();
                loop {
                    if state.closed || state.failure.is_some() {
                        return;
                    }
                    if let Some(project) = state.pending.pop_front() {
                        state.in_flight += 1;
                        break project;
                    }
                    if state.in_flight == 0 {
                        return;
                    }
                    self.ready.wait(&mut state);
                }
            };

            // No lock is held while the registry query is in flight.
            let outcome = visit(source, &project, &self.runtime_version);

            let mut state = self.state.lock();
            state.in_flight -= 1;
            match outcome {
                Ok(visit) if !state.closed && state.failure.is_none() => {
                    state.arena.fill(visit.artifact);
                    for dependency in visit.dependencies {
                        if !state.arena.claim(dependency.clone()) {
                            continue;
                        }
                        if state.arena.len() > self.max_projects {
                            state.fail(Error::ResolutionTooLarge {
                                limit: self.max_projects,
                            });
                            break;
                        }
                        state.pending.push_back(dependency);
                    }
                }
                // Another branch already failed; the result is discarded.
                Ok(_) => {}
                Err(e) => {
                    if state.failure.is_none() && !state.closed {
                        tracing::debug!("Cancelling resolution after failure at {}: {}", project, e);
                        state.fail(e);
                    }
                }
            }
            drop(state);
            self.ready.notify_all();
        }
    }
}

/// Resolves the transitive set of required plugins for a root project.
pub struct DependencyResolver<S> {
    source: Arc<S>,
    config: ResolverConfig,
}

impl<S: ReleaseSource + 'static> DependencyResolver<S> {
    /// Create a new resolver over a release source.
    pub fn new(source: S, config: ResolverConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
        }
    }

    /// Create with default configuration.
    pub fn with_source(source: S) -> Self {
        Self::new(source, ResolverConfig::default())
    }

    /// Get the resolver configuration.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Get the release source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Resolve `root` and every project reachable from it through required
    /// dependencies.
    ///
    /// The result holds one artifact per project, root first. The first
    /// failure anywhere aborts the whole resolution; no partial result is
    /// returned. A `max_projects` of zero rejects every resolution.
    pub fn resolve(
        &self,
        root: impl Into<ProjectId>,
        runtime_version: &str,
    ) -> Result<Vec<ArtifactDescriptor>> {
        let root = root.into();
        let started = Instant::now();

        let result = if self.config.max_projects == 0 {
            Err(Error::ResolutionTooLarge { limit: 0 })
        } else {
            match self.config.mode {
                ResolutionMode::Concurrent if self.config.max_concurrency > 1 => {
                    self.resolve_concurrent(root.clone(), runtime_version)
                }
                _ => self.resolve_sequential(root.clone(), runtime_version),
            }
        };

        match &result {
            Ok(artifacts) => tracing::info!(
                "Resolved {} for runtime {}: {} artifact(s) in {:?}",
                root,
                runtime_version,
                artifacts.len(),
                started.elapsed()
            ),
            Err(e) => tracing::debug!("Resolution of {} failed: {}", root, e),
        }

        result
    }

    fn resolve_sequential(
        &self,
        root: ProjectId,
        runtime_version: &str,
    ) -> Result<Vec<ArtifactDescriptor>> {
        let mut arena = Arena::default();
        let mut stack = vec![root];

        while let Some(project) = stack.pop() {
            if arena.contains(&project) {
                continue;
            }
            if arena.len() >= self.config.max_projects {
                return Err(Error::ResolutionTooLarge {
                    limit: self.config.max_projects,
                });
            }

            let visit = visit(&*self.source, &project, runtime_version)?;
            arena.claim(project);
            arena.fill(visit.artifact);

            // Reversed so the first declared dependency is visited first.
            for dependency in visit.dependencies.into_iter().rev() {
                if !arena.contains(&dependency) {
                    stack.push(dependency);
                }
            }
        }

        Ok(arena.into_artifacts())
    }

    fn resolve_concurrent(
        &self,
        root: ProjectId,
        runtime_version: &str,
    ) -> Result<Vec<ArtifactDescriptor>> {
        let mut arena = Arena::default();
        arena.claim(root.clone());

        let pool = Arc::new(WorkPool {
            state: Mutex::new(PoolState {
                arena,
                pending: VecDeque::from([root]),
                in_flight: 0,
                failure: None,
                closed: false,
            }),
            ready: Condvar::new(),
            runtime_version: runtime_version.to_string(),
            max_projects: self.config.max_projects,
        });

        for worker in 0..self.config.max_concurrency {
            let pool_clone = Arc::clone(&pool);
            let source = Arc::clone(&self.source);
            let spawned = thread::Builder::new()
                .name(format!("plugin-sync-resolver-{}", worker))
                .spawn(move || pool_clone.work(&*source));

            if let Err(e) = spawned {
                let mut state = pool.state.lock();
                state.closed = true;
                drop(state);
                pool.ready.notify_all();
                return Err(Error::Io(e));
            }
        }

        let mut state = pool.state.lock();
        while !state.is_done() {
            pool.ready.wait(&mut state);
        }
        state.closed = true;
        let outcome = match state.failure.take() {
            Some(e) => Err(e),
            None => Ok(std::mem::take(&mut state.arena).into_artifacts()),
        };
        drop(state);
        pool.ready.notify_all();

        outcome
    }
}

impl<S> std::fmt::Debug for DependencyResolver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryRegistry;
    use crate::release::{DependencyKind, ReleaseBuilder, ReleaseDescriptor};

    const RUNTIME: &str = "1.21";

    fn plugin(version: &str, name: &str) -> ReleaseBuilder {
        ReleaseBuilder::new(version)
            .primary_file(format!("https://cdn.example.com/{}/{}-{}.jar", name, name, version))
            .runtime_version(RUNTIME)
    }

    fn publish(registry: &MemoryRegistry, name: &str, requires: &[&str]) {
        let release = requires
            .iter()
            .fold(plugin("1.0.0", name), |builder, dep| builder.requires(*dep));
        registry.publish(name, release.build());
    }

    fn diamond() -> Arc<MemoryRegistry> {
        let registry = Arc::new(MemoryRegistry::default_config());
        publish(&registry, "alpha", &["beta", "gamma"]);
        publish(&registry, "beta", &["delta"]);
        publish(&registry, "gamma", &["delta"]);
        publish(&registry, "delta", &[]);
        registry
    }

    fn ids(artifacts: &[ArtifactDescriptor]) -> Vec<&str> {
        artifacts.iter().map(|a| a.project.as_str()).collect()
    }

    /// Delays queries for the listed projects before delegating.
    struct DelayedSource {
        inner: Arc<MemoryRegistry>,
        slow: Vec<String>,
        delay: std::time::Duration,
    }

    impl ReleaseSource for DelayedSource {
        fn releases(&self, project: &ProjectId, runtime_version: &str) -> Result<Vec<ReleaseDescriptor>> {
            if self.slow.iter().any(|p| p == project.as_str()) {
                thread::sleep(self.delay);
            }
            self.inner.releases(project, runtime_version)
        }
    }

    struct FailingSource;

    impl ReleaseSource for FailingSource {
        fn releases(&self, _: &ProjectId, _: &str) -> Result<Vec<ReleaseDescriptor>> {
            Err(Error::registry("connection reset"))
        }
    }

    #[test]
    fn test_resolver_config_builder() {
        let config = ResolverConfig::new()
            .with_mode(ResolutionMode::Concurrent)
            .with_max_concurrency(8)
            .with_max_projects(10);

        assert_eq!(config.mode, ResolutionMode::Concurrent);
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.max_projects, 10);
    }

    #[test]
    fn test_diamond_resolves_once() {
        let registry = diamond();
        let resolver = DependencyResolver::with_source(registry.clone());

        let artifacts = resolver.resolve("alpha", RUNTIME).unwrap();
        assert_eq!(ids(&artifacts), vec!["alpha", "beta", "delta", "gamma"]);
        assert_eq!(registry.query_count(), 4);
    }

    #[test]
    fn test_cycle_terminates() {
        let registry = Arc::new(MemoryRegistry::default_config());
        publish(&registry, "a", &["b"]);
        publish(&registry, "b", &["c"]);
        publish(&registry, "c", &["a", "c"]);

        let resolver = DependencyResolver::with_source(registry.clone());
        let artifacts = resolver.resolve("a", RUNTIME).unwrap();
        assert_eq!(ids(&artifacts), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_only_required_edges_followed() {
        let registry = Arc::new(MemoryRegistry::default_config());
        registry.publish(
            "root",
            plugin("1.0.0", "root")
                .dependency("opt", DependencyKind::Optional)
                .dependency("bad", DependencyKind::Incompatible)
                .dependency("inner", DependencyKind::Embedded)
                .build(),
        );

        let resolver = DependencyResolver::with_source(registry.clone());
        let artifacts = resolver.resolve("root", RUNTIME).unwrap();
        assert_eq!(ids(&artifacts), vec!["root"]);
        assert_eq!(registry.query_count(), 1);
    }

    #[test]
    fn test_first_release_is_selected() {
        let registry = Arc::new(MemoryRegistry::default_config());
        registry.publish("vault", plugin("1.0.0", "vault").build());
        registry.publish("vault", plugin("1.1.0", "vault").build());

        let resolver = DependencyResolver::with_source(registry.clone());
        let artifacts = resolver.resolve("vault", RUNTIME).unwrap();
        assert_eq!(
            artifacts[0].download_url,
            "https://cdn.example.com/vault/vault-1.1.0.jar"
        );
    }

    #[test]
    fn test_missing_release_names_project() {
        let registry = diamond();
        let resolver = DependencyResolver::with_source(registry.clone());

        match resolver.resolve("alpha", "9.9.9") {
            Err(Error::UnresolvableDependency { project, runtime_version }) => {
                assert_eq!(project, "alpha");
                assert_eq!(runtime_version, "9.9.9");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_missing_transitive_dependency() {
        let registry = Arc::new(MemoryRegistry::default_config());
        publish(&registry, "alpha", &["beta"]);
        publish(&registry, "beta", &["ghost"]);

        let resolver = DependencyResolver::with_source(registry.clone());
        let err = resolver.resolve("alpha", RUNTIME).unwrap_err();
        assert_eq!(err.project(), Some("ghost"));
    }

    #[test]
    fn test_no_primary_file_fails() {
        let registry = Arc::new(MemoryRegistry::default_config());
        publish(&registry, "alpha", &["beta"]);
        registry.publish(
            "beta",
            ReleaseBuilder::new("2.0.0")
                .file("https://cdn.example.com/beta-sources.jar")
                .runtime_version(RUNTIME)
                .build(),
        );

        let resolver = DependencyResolver::with_source(registry.clone());
        let result = resolver.resolve("alpha", RUNTIME);
        assert!(matches!(
            result,
            Err(Error::NoPrimaryArtifact { ref project, ref release }) if project == "beta" && release == "2.0.0"
        ));
    }

    #[test]
    fn test_registry_error_propagates() {
        let resolver = DependencyResolver::with_source(FailingSource);
        assert!(matches!(resolver.resolve("a", RUNTIME), Err(Error::Registry(_))));
    }

    #[test]
    fn test_project_limit() {
        let registry = diamond();
        let resolver = DependencyResolver::new(registry.clone(), ResolverConfig::new().with_max_projects(3));
        assert!(matches!(
            resolver.resolve("alpha", RUNTIME),
            Err(Error::ResolutionTooLarge { limit: 3 })
        ));

        let resolver = DependencyResolver::new(registry.clone(), ResolverConfig::new().with_max_projects(4));
        assert_eq!(resolver.resolve("alpha", RUNTIME).unwrap().len(), 4);
    }

    #[test]
    fn test_concurrent_matches_sequential() {
        let registry = diamond();
        publish(&registry, "delta", &["alpha"]);

        let sequential = DependencyResolver::with_source(registry.clone());
        let concurrent = DependencyResolver::new(registry.clone(), ResolverConfig::concurrent(4));

        let mut a = sequential.resolve("alpha", RUNTIME).unwrap();
        let mut b = concurrent.resolve("alpha", RUNTIME).unwrap();
        a.sort_by(|x, y| x.project.cmp(&y.project));
        b.sort_by(|x, y| x.project.cmp(&y.project));
        assert_eq!(a, b);
    }

    #[test]
    fn test_concurrent_fetches_each_project_once() {
        let registry = Arc::new(MemoryRegistry::default_config());
        let leaves: Vec<String> = (0..16).map(|i| format!("leaf-{}", i)).collect();
        let leaf_refs: Vec<&str> = leaves.iter().map(String::as_str).collect();
        publish(&registry, "root", &leaf_refs);
        for leaf in &leaves {
            publish(&registry, leaf, &["shared", "root"]);
        }
        publish(&registry, "shared", &[]);

        let resolver = DependencyResolver::new(registry.clone(), ResolverConfig::concurrent(8));
        let artifacts = resolver.resolve("root", RUNTIME).unwrap();

        assert_eq!(artifacts.len(), 18);
        assert_eq!(artifacts[0].project.as_str(), "root");
        assert_eq!(registry.query_count(), 18);
    }

    #[test]
    fn test_concurrent_failure_is_reported() {
        let registry = Arc::new(MemoryRegistry::default_config());
        publish(&registry, "root", &["a", "b", "ghost", "c"]);
        publish(&registry, "a", &[]);
        publish(&registry, "b", &[]);
        publish(&registry, "c", &[]);

        let resolver = DependencyResolver::new(registry.clone(), ResolverConfig::concurrent(3));
        let err = resolver.resolve("root", RUNTIME).unwrap_err();
        assert!(matches!(err, Error::UnresolvableDependency { .. }));
        assert_eq!(err.project(), Some("ghost"));
    }

    #[test]
    fn test_concurrent_project_limit() {
        let registry = diamond();
        let config = ResolverConfig::concurrent(2).with_max_projects(2);
        let resolver = DependencyResolver::new(registry.clone(), config);
        assert!(matches!(
            resolver.resolve("alpha", RUNTIME),
            Err(Error::ResolutionTooLarge { limit: 2 })
        ));
    }

    #[test]
    fn test_concurrent_failure_does_not_wait_for_slow_sibling() {
        let registry = Arc::new(MemoryRegistry::default_config());
        publish(&registry, "root", &["slow", "ghost"]);
        publish(&registry, "slow", &[]);

        let source = DelayedSource {
            inner: registry.clone(),
            slow: vec!["slow".to_string()],
            delay: std::time::Duration::from_secs(3),
        };
        let resolver = DependencyResolver::new(source, ResolverConfig::concurrent(4));

        let started = Instant::now();
        let err = resolver.resolve("root", RUNTIME).unwrap_err();
        assert_eq!(err.project(), Some("ghost"));
        assert!(started.elapsed() < std::time::Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_failure_skips_queued_siblings() {
        let registry = Arc::new(MemoryRegistry::default_config());
        let leaves: Vec<String> = (0..16).map(|i| format!("leaf-{}", i)).collect();
        let mut requires = vec!["ghost"];
        requires.extend(leaves.iter().map(String::as_str));
        publish(&registry, "root", &requires);
        for leaf in &leaves {
            publish(&registry, leaf, &[]);
        }

        let source = DelayedSource {
            inner: registry.clone(),
            slow: leaves.clone(),
            delay: std::time::Duration::from_millis(200),
        };
        let resolver = DependencyResolver::new(source, ResolverConfig::concurrent(2));

        let err = resolver.resolve("root", RUNTIME).unwrap_err();
        assert_eq!(err.project(), Some("ghost"));

        // root, ghost and at most the one leaf already taken by the other worker.
        thread::sleep(std::time::Duration::from_millis(400));
        assert!(registry.query_count() <= 3);
    }

    #[test]
    fn test_zero_project_limit_rejects_root() {
        let registry = diamond();
        for config in [
            ResolverConfig::new().with_max_projects(0),
            ResolverConfig::concurrent(4).with_max_projects(0),
        ] {
            let resolver = DependencyResolver::new(registry.clone(), config);
            assert!(matches!(
                resolver.resolve("alpha", RUNTIME),
                Err(Error::ResolutionTooLarge { limit: 0 })
            ));
        }
        assert_eq!(registry.query_count(), 0);
    }
}
