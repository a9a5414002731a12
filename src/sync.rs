//! Keeps a server's installed artifacts and its plugin manifest in step.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::events::{SyncEvent, SyncHooks};
use crate::installer::InstallationService;
use crate::manifest::{ManifestEntry, ManifestStore, PluginManifest};
use crate::registry::ReleaseSource;
use crate::release::ArtifactDescriptor;
use crate::resolver::{DependencyResolver, ResolverConfig};

#[cfg(feature = "metrics-prometheus")]
use crate::metrics::SyncMetrics;

/// What to do when an installed project is already in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DuplicatePolicy {
    /// Replace the existing entry with the new one.
    #[default]
    Replace,
    /// Keep the existing entry and report the duplicate as a write failure.
    Reject,
}

/// Configuration for the manifest synchronizer.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct SyncConfig {
    /// Resolver configuration.
    pub resolver: ResolverConfig,
    /// Handling of manifest entries that already exist.
    pub duplicate_policy: DuplicatePolicy,
}

impl SyncConfig {
    /// Create a new sync configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resolver configuration.
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    /// Set the duplicate policy.
    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Parse configuration from a TOML string.
    #[cfg(feature = "serde")]
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    #[cfg(feature = "serde")]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }
}

/// Outcome of a fully successful install.
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    /// Resolved artifacts, root first.
    pub artifacts: Vec<ArtifactDescriptor>,
    /// Entries written to the manifest.
    pub recorded: Vec<ManifestEntry>,
    /// Entries that were replaced under [`DuplicatePolicy::Replace`].
    pub replaced: Vec<ManifestEntry>,
}

impl InstallReport {
    /// Project ids installed by this call.
    pub fn projects(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.project.to_string()).collect()
    }
}

/// Resolves, installs and removes plugins while keeping the manifest
/// consistent with what was installed.
pub struct ManifestSynchronizer<S, I, M> {
    config: SyncConfig,
    resolver: DependencyResolver<S>,
    installer: I,
    store: M,
    hooks: Arc<RwLock<SyncHooks>>,
    #[cfg(feature = "metrics-prometheus")]
    metrics: Option<Arc<SyncMetrics>>,
}

impl<S, I, M> ManifestSynchronizer<S, I, M>
where
    S: ReleaseSource + 'static,
    I: InstallationService,
    M: ManifestStore,
{
    /// Create a new synchronizer.
    pub fn new(source: S, installer: I, store: M, config: SyncConfig) -> Self {
        let resolver = DependencyResolver::new(source, config.resolver.clone());

        Self {
            config,
            resolver,
            installer,
            store,
            hooks: Arc::new(RwLock::new(SyncHooks::new())),
            #[cfg(feature = "metrics-prometheus")]
            metrics: None,
        }
    }

    /// Attach a metrics collector.
    #[cfg(feature = "metrics-prometheus")]
    pub fn with_metrics(mut self, metrics: Arc<SyncMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Get the sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Get the dependency resolver.
    pub fn resolver(&self) -> &DependencyResolver<S> {
        &self.resolver
    }

    /// Get the installation service.
    pub fn installer(&self) -> &I {
        &self.installer
    }

    /// Get the manifest store.
    pub fn store(&self) -> &M {
        &self.store
    }

    /// Add a sync event handler.
    pub fn on_event<F>(&self, handler: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.hooks.write().on_event(handler);
    }

    /// Resolve the artifacts needed to install `root`.
    pub fn resolve(&self, root: &str, runtime_version: &str) -> Result<Vec<ArtifactDescriptor>> {
        let started = Instant::now();
        let result = self.resolver.resolve(root, runtime_version);

        #[cfg(feature = "metrics-prometheus")]
        {
            if let Some(ref metrics) = self.metrics {
                metrics.record_resolution(result.is_ok(), started.elapsed().as_secs_f64());
            }
        }

        if let Ok(ref artifacts) = result {
            tracing::debug!("Resolution of {} took {:?}", root, started.elapsed());
            self.hooks.read().emit_resolved(root, artifacts.len());
        }

        result
    }

    /// Install `root` and its required dependencies on a server, then record
    /// one manifest entry per installed artifact.
    ///
    /// Resolution and filename errors abort before anything is installed.
    /// Once artifacts are installed nothing is rolled back: every manifest
    /// write is attempted and failures are reported together in
    /// [`Error::ManifestIncomplete`].
    pub fn install(&self, server: &str, root: &str, runtime_version: &str) -> Result<InstallReport> {
        let artifacts = self.resolve(root, runtime_version)?;

        let entries = artifacts
            .iter()
            .map(|a| {
                a.artifact_filename()
                    .map(|name| ManifestEntry::new(a.project.clone(), name))
                    .ok_or_else(|| Error::InvalidArtifactUrl(a.download_url.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        let urls: Vec<String> = artifacts.iter().map(|a| a.download_url.clone()).collect();
        if let Err(e) = self.installer.install_artifacts(server, &urls) {
            tracing::error!("Failed to install {} on server {}: {}", root, server, e);
            return Err(match e {
                Error::InstallationFailed(_) => e,
                other => Error::InstallationFailed(other.to_string()),
            });
        }

        #[cfg(feature = "metrics-prometheus")]
        {
            if let Some(ref metrics) = self.metrics {
                metrics.record_install(artifacts.len());
            }
        }

        let mut report = InstallReport {
            artifacts,
            ..InstallReport::default()
        };
        let mut failures = Vec::new();

        for entry in entries {
            match self.record(server, entry.clone()) {
                Ok(replaced) => {
                    report.recorded.push(entry);
                    report.replaced.extend(replaced);
                }
                Err(e) => {
                    tracing::warn!("Manifest write for {} on server {} failed: {}", entry.id, server, e);
                    self.hooks
                        .read()
                        .emit_write_failed(server, entry.id.as_str(), &e.to_string());
                    #[cfg(feature = "metrics-prometheus")]
                    {
                        if let Some(ref metrics) = self.metrics {
                            metrics.record_write_failure();
                        }
                    }
                    failures.push(e);
                }
            }
        }

        if !failures.is_empty() {
            return Err(Error::ManifestIncomplete {
                recorded: report.recorded.iter().map(|e| e.id.to_string()).collect(),
                failures,
            });
        }

        tracing::info!(
            "Installed {} with {} artifact(s) on server {}",
            root,
            report.artifacts.len(),
            server
        );
        self.hooks.read().emit_installed(server, report.projects());

        Ok(report)
    }

    /// Remove a plugin from a server and drop its manifest entry.
    ///
    /// `key` is a project id or an artifact filename. When the manifest has
    /// no matching entry, or cannot be read, the key itself is handed to the
    /// installer as the filename. The installer is always called first; a
    /// manifest that cannot be updated afterwards is reported as
    /// [`Error::ManifestWriteFailed`].
    pub fn remove(&self, server: &str, key: &str) -> Result<()> {
        tracing::debug!("Removing plugin {} from server {}", key, server);

        let filename = match self.manifest(server) {
            Ok(manifest) => manifest
                .find(key)
                .or_else(|| manifest.find_by_artifact(key))
                .map(|e| e.artifact_filename.clone())
                .unwrap_or_else(|| key.to_string()),
            Err(e) => {
                tracing::warn!(
                    "Manifest of server {} unreadable, removing {} by filename: {}",
                    server,
                    key,
                    e
                );
                key.to_string()
            }
        };

        self.installer
            .remove_artifact(server, &filename)
            .map_err(|e| match e {
                Error::RemovalFailed(_) => e,
                other => Error::RemovalFailed(other.to_string()),
            })?;

        self.store
            .remove(server, key)
            .map_err(|e| write_error(key, e))?;

        #[cfg(feature = "metrics-prometheus")]
        {
            if let Some(ref metrics) = self.metrics {
                metrics.record_removal();
            }
        }

        tracing::info!("Removed plugin {} from server {}", key, server);
        self.hooks.read().emit_removed(server, key);

        Ok(())
    }

    /// List the manifest entries of a server.
    pub fn list(&self, server: &str) -> Result<Vec<ManifestEntry>> {
        self.store.list(server).map_err(|e| match e {
            Error::ManifestUnavailable(_) => e,
            other => Error::manifest_unavailable(other.to_string()),
        })
    }

    /// Get the manifest of a server.
    pub fn manifest(&self, server: &str) -> Result<PluginManifest> {
        self.list(server).map(PluginManifest::new)
    }

    /// Check if a project is recorded in a server's manifest.
    pub fn is_installed(&self, server: &str, project: &str) -> Result<bool> {
        Ok(self.manifest(server)?.contains(project))
    }

    /// Add one entry, applying the duplicate policy. Returns the entry that
    /// was replaced, if any.
    fn record(&self, server: &str, entry: ManifestEntry) -> Result<Option<ManifestEntry>> {
        let project = entry.id.clone();
        let filename = entry.artifact_filename.clone();

        let result = match self.config.duplicate_policy {
            DuplicatePolicy::Reject => self.store.add(server, entry).map(|()| None),
            DuplicatePolicy::Replace => self.store.replace(server, entry),
        };
        let previous = result.map_err(|e| write_error(project.as_str(), e))?;

        if let Some(ref previous) = previous {
            if previous.artifact_filename != filename {
                tracing::warn!(
                    "Replaced manifest entry for {}; previous artifact {} left in place",
                    project,
                    previous.artifact_filename
                );
            }
        }
        Ok(previous)
    }
}

fn write_error(project: &str, error: Error) -> Error {
    match error {
        Error::ManifestWriteFailed { .. } | Error::DuplicateEntry { .. } => error,
        other => Error::manifest_write(project, other.to_string()),
    }
}

impl<S, I, M> std::fmt::Debug for ManifestSynchronizer<S, I, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestSynchronizer")
            .field("config", &self.config)
            .field("hooks", &self.hooks.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::installer::MemoryInstaller;
    use crate::manifest::MemoryManifestStore;
    use crate::registry::MemoryRegistry;
    use crate::release::ReleaseBuilder;
    use crate::resolver::ResolutionMode;

    const RUNTIME: &str = "1.21";

    type TestSync =
        ManifestSynchronizer<Arc<MemoryRegistry>, Arc<MemoryInstaller>, Arc<MemoryManifestStore>>;

    struct Fixture {
        registry: Arc<MemoryRegistry>,
        installer: Arc<MemoryInstaller>,
        store: Arc<MemoryManifestStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(MemoryRegistry::default_config());
            for (name, requires) in [
                ("alpha", vec!["beta", "gamma"]),
                ("beta", vec!["delta"]),
                ("gamma", vec!["delta"]),
                ("delta", vec![]),
            ] {
                let release = requires.into_iter().fold(
                    ReleaseBuilder::new("1.0.0")
                        .primary_file(format!("https://cdn.example.com/{}/{}-1.0.0.jar", name, name))
                        .runtime_version(RUNTIME),
                    |builder, dep| builder.requires(dep),
                );
                registry.publish(name, release.build());
            }

            Self {
                registry,
                installer: Arc::new(MemoryInstaller::new()),
                store: Arc::new(MemoryManifestStore::new()),
            }
        }

        fn sync(&self, config: SyncConfig) -> TestSync {
            ManifestSynchronizer::new(
                self.registry.clone(),
                self.installer.clone(),
                self.store.clone(),
                config,
            )
        }
    }

    #[test]
    fn test_sync_config_builder() {
        let config = SyncConfig::new()
            .with_duplicate_policy(DuplicatePolicy::Reject)
            .with_resolver(ResolverConfig::concurrent(2));

        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.resolver.mode, ResolutionMode::Concurrent);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_sync_config_toml() {
        let toml = r#"
duplicate-policy = "reject"

[resolver]
mode = "concurrent"
max-concurrency = 8
"#;
        let config = SyncConfig::from_toml(toml).unwrap();
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.resolver.mode, ResolutionMode::Concurrent);
        assert_eq!(config.resolver.max_concurrency, 8);
        assert_eq!(config.resolver.max_projects, 512);

        assert!(matches!(
            SyncConfig::from_toml("duplicate-policy = 3"),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_install_records_every_artifact() {
        let fixture = Fixture::new();
        let sync = fixture.sync(SyncConfig::default());

        let report = sync.install("srv", "alpha", RUNTIME).unwrap();
        assert_eq!(report.recorded.len(), 4);
        assert!(report.replaced.is_empty());

        let entries = sync.list("srv").unwrap();
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta", "delta", "gamma"]);
        assert_eq!(entries[0].artifact_filename, "alpha-1.0.0.jar");
        assert!(fixture.installer.is_installed("srv", "delta-1.0.0.jar"));
    }

    #[test]
    fn test_resolution_failure_has_no_side_effects() {
        let fixture = Fixture::new();
        let sync = fixture.sync(SyncConfig::default());

        let result = sync.install("srv", "alpha", "9.9.9");
        assert!(matches!(result, Err(Error::UnresolvableDependency { .. })));
        assert!(fixture.installer.installed("srv").is_empty());
        assert!(sync.list("srv").unwrap().is_empty());
    }

    #[test]
    fn test_installation_failure_leaves_manifest_untouched() {
        let fixture = Fixture::new();
        let sync = fixture.sync(SyncConfig::default());

        fixture.installer.fail_next_install();
        let result = sync.install("srv", "alpha", RUNTIME);
        assert!(matches!(result, Err(Error::InstallationFailed(_))));
        assert!(sync.list("srv").unwrap().is_empty());
    }

    #[test]
    fn test_reinstall_replaces_entries() {
        let fixture = Fixture::new();
        let sync = fixture.sync(SyncConfig::default());

        sync.install("srv", "alpha", RUNTIME).unwrap();
        let report = sync.install("srv", "beta", RUNTIME).unwrap();

        assert_eq!(report.replaced.len(), 2);
        let ids: Vec<String> = sync.list("srv").unwrap().iter().map(|e| e.id.to_string()).collect();
        assert_eq!(ids, vec!["alpha", "beta", "delta", "gamma"]);
    }

    #[test]
    fn test_reinstall_rejected() {
        let fixture = Fixture::new();
        let sync = fixture.sync(SyncConfig::new().with_duplicate_policy(DuplicatePolicy::Reject));

        sync.install("srv", "gamma", RUNTIME).unwrap();
        match sync.install("srv", "alpha", RUNTIME) {
            Err(Error::ManifestIncomplete { recorded, failures }) => {
                assert_eq!(recorded, vec!["alpha".to_string(), "beta".to_string()]);
                assert_eq!(failures.len(), 2);
                assert!(failures.iter().all(|e| matches!(e, Error::DuplicateEntry { .. })));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // Installed artifacts are not rolled back.
        assert_eq!(fixture.installer.installed("srv").len(), 4);
        assert_eq!(sync.list("srv").unwrap().len(), 4);
    }

    #[test]
    fn test_remove_by_project_id() {
        let fixture = Fixture::new();
        let sync = fixture.sync(SyncConfig::default());

        sync.install("srv", "alpha", RUNTIME).unwrap();
        sync.remove("srv", "beta").unwrap();

        assert!(!sync.is_installed("srv", "beta").unwrap());
        assert!(!fixture.installer.is_installed("srv", "beta-1.0.0.jar"));
        assert_eq!(sync.list("srv").unwrap().len(), 3);
    }

    #[test]
    fn test_remove_by_artifact_filename() {
        let fixture = Fixture::new();
        let sync = fixture.sync(SyncConfig::default());

        sync.install("srv", "delta", RUNTIME).unwrap();
        sync.remove("srv", "delta-1.0.0.jar").unwrap();
        assert!(sync.list("srv").unwrap().is_empty());
    }

    #[test]
    fn test_remove_rejected_keeps_entry() {
        let fixture = Fixture::new();
        let sync = fixture.sync(SyncConfig::default());

        sync.install("srv", "delta", RUNTIME).unwrap();
        fixture.installer.fail_next_removal();

        assert!(matches!(sync.remove("srv", "delta"), Err(Error::RemovalFailed(_))));
        assert!(sync.is_installed("srv", "delta").unwrap());
    }

    #[test]
    fn test_events_emitted() {
        let fixture = Fixture::new();
        let sync = fixture.sync(SyncConfig::default());

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        sync.on_event(move |event| seen_clone.lock().push(event.event_name()));

        sync.install("srv", "delta", RUNTIME).unwrap();
        sync.remove("srv", "delta").unwrap();

        assert_eq!(*seen.lock(), vec!["resolved", "installed", "removed"]);
    }

    #[cfg(feature = "metrics-prometheus")]
    #[test]
    fn test_synchronizer_records_metrics() {
        use crate::metrics::MetricsConfig;

        let fixture = Fixture::new();
        let metrics = Arc::new(SyncMetrics::new(MetricsConfig::default()).unwrap());
        let sync = fixture
            .sync(SyncConfig::new().with_duplicate_policy(DuplicatePolicy::Reject))
            .with_metrics(metrics.clone());

        sync.install("srv", "alpha", RUNTIME).unwrap();
        sync.remove("srv", "beta").unwrap();
        assert!(sync.install("srv", "delta", RUNTIME).is_err());
        assert!(sync.install("srv", "alpha", "9.9.9").is_err());

        assert_eq!(metrics.resolutions_total(), 2);
        assert_eq!(metrics.resolution_failures_total(), 1);
        assert_eq!(metrics.installs_total(), 5);
        assert_eq!(metrics.removals_total(), 1);
        assert_eq!(metrics.manifest_write_failures_total(), 1);
    }
}
