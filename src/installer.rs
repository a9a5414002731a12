//! Installation service boundary.

use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;

use crate::error::{Error, Result};
use crate::release::artifact_filename;

/// Places artifacts into, and removes them from, a server's plugin directory.
pub trait InstallationService: Send + Sync {
    /// Fetch and install every URL as one batch.
    fn install_artifacts(&self, server: &str, urls: &[String]) -> Result<()>;

    /// Remove an installed artifact by filename.
    fn remove_artifact(&self, server: &str, artifact_filename: &str) -> Result<()>;
}

impl<T: InstallationService + ?Sized> InstallationService for std::sync::Arc<T> {
    fn install_artifacts(&self, server: &str, urls: &[String]) -> Result<()> {
        (**self).install_artifacts(server, urls)
    }

    fn remove_artifact(&self, server: &str, artifact_filename: &str) -> Result<()> {
        (**self).remove_artifact(server, artifact_filename)
    }
}

/// Installation service that records installed filenames in memory.
///
/// Filenames are derived from each URL the same way
/// [`ArtifactDescriptor::artifact_filename`] does. The next
/// install or removal can be forced to fail with [`fail_next_install`] and
/// [`fail_next_removal`].
///
/// [`ArtifactDescriptor::artifact_filename`]: crate::ArtifactDescriptor::artifact_filename
/// [`fail_next_install`]: MemoryInstaller::fail_next_install
/// [`fail_next_removal`]: MemoryInstaller::fail_next_removal
#[derive(Debug, Default)]
pub struct MemoryInstaller {
    servers: DashMap<String, Vec<String>>,
    fail_install: AtomicBool,
    fail_removal: AtomicBool,
}

impl MemoryInstaller {
    /// Create an empty installer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next batch install.
    pub fn fail_next_install(&self) {
        self.fail_install.store(true, Ordering::SeqCst);
    }

    /// Reject the next removal.
    pub fn fail_next_removal(&self) {
        self.fail_removal.store(true, Ordering::SeqCst);
    }

    /// Filenames installed on a server, in install order.
    pub fn installed(&self, server: &str) -> Vec<String> {
        self.servers
            .get(server)
            .map(|files| files.clone())
            .unwrap_or_default()
    }

    /// Check if a file is installed on a server.
    pub fn is_installed(&self, server: &str, artifact_filename: &str) -> bool {
        self.servers
            .get(server)
            .map(|files| files.iter().any(|f| f == artifact_filename))
            .unwrap_or(false)
    }
}

impl InstallationService for MemoryInstaller {
    fn install_artifacts(&self, server: &str, urls: &[String]) -> Result<()> {
        if self.fail_install.swap(false, Ordering::SeqCst) {
            return Err(Error::InstallationFailed(format!(
                "server {} rejected {} artifact(s)",
                server,
                urls.len()
            )));
        }

        let names = urls
            .iter()
            .map(|url| {
                artifact_filename(url).ok_or_else(|| {
                    Error::InstallationFailed(format!("cannot derive a filename from {}", url))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut files = self.servers.entry(server.to_string()).or_default();
        for name in names {
            if !files.iter().any(|f| f == name) {
                files.push(name.to_string());
            }
        }
        Ok(())
    }

    fn remove_artifact(&self, server: &str, artifact_filename: &str) -> Result<()> {
        if self.fail_removal.swap(false, Ordering::SeqCst) {
            return Err(Error::RemovalFailed(format!(
                "server {} rejected removal of {}",
                server, artifact_filename
            )));
        }

        let mut files = self.servers.entry(server.to_string()).or_default();
        let before = files.len();
        files.retain(|f| f != artifact_filename);
        if files.len() == before {
            return Err(Error::RemovalFailed(format!(
                "plugin {} not found in server {}",
                artifact_filename, server
            )));
        }
        Ok(())
    }
}
