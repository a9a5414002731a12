//! Installed-plugin manifest and its persistent stores.

#[cfg(feature = "serde")]
use std::path::{Path, PathBuf};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::release::ProjectId;

/// One installed plugin as recorded in a server manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ManifestEntry {
    /// Project id.
    pub id: ProjectId,
    /// Filename of the installed artifact.
    #[cfg_attr(feature = "serde", serde(rename = "jar_name"))]
    pub artifact_filename: String,
}

impl ManifestEntry {
    /// Create a new manifest entry.
    pub fn new(id: impl Into<ProjectId>, artifact_filename: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            artifact_filename: artifact_filename.into(),
        }
    }

    /// Check if `key` names this entry, by project id or artifact filename.
    pub fn matches(&self, key: &str) -> bool {
        self.id.as_str() == key || self.artifact_filename == key
    }
}

/// The ordered manifest of one server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PluginManifest {
    /// Entries in insertion order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub plugins: Vec<ManifestEntry>,
}

impl PluginManifest {
    /// Create a manifest from entries.
    pub fn new(plugins: Vec<ManifestEntry>) -> Self {
        Self { plugins }
    }

    /// Find an entry by project id.
    pub fn find(&self, id: &str) -> Option<&ManifestEntry> {
        self.plugins.iter().find(|p| p.id.as_str() == id)
    }

    /// Find an entry by artifact filename.
    pub fn find_by_artifact(&self, filename: &str) -> Option<&ManifestEntry> {
        self.plugins.iter().find(|p| p.artifact_filename == filename)
    }

    /// Check if a project is recorded.
    pub fn contains(&self, id: &str) -> bool {
        self.find(id).is_some()
    }

    /// Get entry count.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Check if the manifest is empty.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Append an entry, rejecting a duplicate project id.
    pub fn add(&mut self, server: &str, entry: ManifestEntry) -> Result<()> {
        if self.contains(entry.id.as_str()) {
            return Err(Error::DuplicateEntry {
                server: server.to_string(),
                project: entry.id.into_inner(),
            });
        }
        self.plugins.push(entry);
        Ok(())
    }

    /// Insert an entry, swapping out the entry with the same project id in
    /// place if there is one. Returns the entry that was swapped out.
    pub fn upsert(&mut self, entry: ManifestEntry) -> Option<ManifestEntry> {
        match self.plugins.iter_mut().find(|p| p.id == entry.id) {
            Some(slot) => Some(std::mem::replace(slot, entry)),
            None => {
                self.plugins.push(entry);
                None
            }
        }
    }

    /// Drop every entry matching `key`. Returns the number removed.
    pub fn remove(&mut self, key: &str) -> usize {
        let before = self.plugins.len();
        self.plugins.retain(|p| !p.matches(key));
        before - self.plugins.len()
    }

    /// Parse a manifest from JSON.
    #[cfg(feature = "serde")]
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Serialize to JSON.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Parse(e.to_string()))
    }
}

/// Durable per-server record of installed plugins.
pub trait ManifestStore: Send + Sync {
    /// Append an entry. Fails with [`Error::DuplicateEntry`] if the project
    /// is already recorded.
    fn add(&self, server: &str, entry: ManifestEntry) -> Result<()>;

    /// Record an entry, replacing the existing entry for the same project in
    /// place. Returns the replaced entry. On failure the manifest is left as
    /// it was.
    fn replace(&self, server: &str, entry: ManifestEntry) -> Result<Option<ManifestEntry>>;

    /// Remove every entry whose project id or artifact filename equals `key`.
    /// Removing an absent entry succeeds.
    fn remove(&self, server: &str, key: &str) -> Result<()>;

    /// Read the full manifest of a server.
    fn list(&self, server: &str) -> Result<Vec<ManifestEntry>>;
}

impl<T: ManifestStore + ?Sized> ManifestStore for std::sync::Arc<T> {
    fn add(&self, server: &str, entry: ManifestEntry) -> Result<()> {
        (**self).add(server, entry)
    }

    fn replace(&self, server: &str, entry: ManifestEntry) -> Result<Option<ManifestEntry>> {
        (**self).replace(server, entry)
    }

    fn remove(&self, server: &str, key: &str) -> Result<()> {
        (**self).remove(server, key)
    }

    fn list(&self, server: &str) -> Result<Vec<ManifestEntry>> {
        (**self).list(server)
    }
}

/// Manifest store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    servers: DashMap<String, PluginManifest>,
}

impl MemoryManifestStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get server count.
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }
}

impl ManifestStore for MemoryManifestStore {
    fn add(&self, server: &str, entry: ManifestEntry) -> Result<()> {
        self.servers
            .entry(server.to_string())
            .or_default()
            .add(server, entry)
    }

    fn replace(&self, server: &str, entry: ManifestEntry) -> Result<Option<ManifestEntry>> {
        Ok(self.servers.entry(server.to_string()).or_default().upsert(entry))
    }

    fn remove(&self, server: &str, key: &str) -> Result<()> {
        if let Some(mut manifest) = self.servers.get_mut(server) {
            manifest.remove(key);
        }
        Ok(())
    }

    fn list(&self, server: &str) -> Result<Vec<ManifestEntry>> {
        Ok(self
            .servers
            .get(server)
            .map(|m| m.plugins.clone())
            .unwrap_or_default())
    }
}

/// Manifest store persisting one JSON file per server directory.
///
/// Layout: `<root>/<server>/plugins.json`. The server directory must exist;
/// the manifest file is created on first write.
#[cfg(feature = "serde")]
#[derive(Debug)]
pub struct FileManifestStore {
    root: PathBuf,
    lock: parking_lot::Mutex<()>,
}

#[cfg(feature = "serde")]
impl FileManifestStore {
    /// Manifest filename inside a server directory.
    pub const FILE_NAME: &'static str = "plugins.json";

    /// Create a store rooted at the servers directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: parking_lot::Mutex::new(()),
        }
    }

    /// Get the servers directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a server's manifest file.
    pub fn manifest_path(&self, server: &str) -> PathBuf {
        self.root.join(server).join(Self::FILE_NAME)
    }

    fn server_dir(&self, server: &str) -> Option<PathBuf> {
        let dir = self.root.join(server);
        dir.is_dir().then_some(dir)
    }

    fn read(&self, server: &str) -> Result<PluginManifest> {
        let dir = self
            .server_dir(server)
            .ok_or_else(|| Error::manifest_unavailable(format!("server {} not found", server)))?;

        let path = dir.join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(PluginManifest::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::manifest_unavailable(format!("failed to read {}: {}", path.display(), e))
        })?;
        PluginManifest::from_json(&content).map_err(|e| {
            Error::manifest_unavailable(format!("malformed manifest {}: {}", path.display(), e))
        })
    }

    fn write(&self, server: &str, manifest: &PluginManifest) -> Result<()> {
        let path = self.manifest_path(server);
        let tmp = path.with_extension("json.tmp");

        std::fs::write(&tmp, manifest.to_json()?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl ManifestStore for FileManifestStore {
    fn add(&self, server: &str, entry: ManifestEntry) -> Result<()> {
        let _guard = self.lock.lock();
        let project = entry.id.to_string();

        let mut manifest = self
            .read(server)
            .map_err(|e| Error::manifest_write(&project, e.to_string()))?;
        manifest.add(server, entry)?;
        self.write(server, &manifest)
            .map_err(|e| Error::manifest_write(project, e.to_string()))
    }

    fn replace(&self, server: &str, entry: ManifestEntry) -> Result<Option<ManifestEntry>> {
        let _guard = self.lock.lock();
        let project = entry.id.to_string();

        let mut manifest = self
            .read(server)
            .map_err(|e| Error::manifest_write(&project, e.to_string()))?;
        let previous = manifest.upsert(entry);
        self.write(server, &manifest)
            .map_err(|e| Error::manifest_write(project, e.to_string()))?;
        Ok(previous)
    }

    fn remove(&self, server: &str, key: &str) -> Result<()> {
        let _guard = self.lock.lock();

        let mut manifest = self
            .read(server)
            .map_err(|e| Error::manifest_write(key, e.to_string()))?;
        if manifest.remove(key) == 0 {
            return Ok(());
        }
        self.write(server, &manifest)
            .map_err(|e| Error::manifest_write(key, e.to_string()))
    }

    fn list(&self, server: &str) -> Result<Vec<ManifestEntry>> {
        Ok(self.read(server)?.plugins)
    }
}
