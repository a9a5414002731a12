//! Error types for resolution and manifest synchronization.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving, installing or removing plugins.
#[derive(Error, Debug)]
pub enum Error {
    /// A reachable project has no release for the requested runtime version.
    #[error("no release of {project} is compatible with runtime {runtime_version}")]
    UnresolvableDependency {
        /// Offending project id.
        project: String,
        /// Runtime version used as the release filter.
        runtime_version: String,
    },

    /// The selected release has no file flagged primary.
    #[error("release {release} of {project} has no primary file")]
    NoPrimaryArtifact {
        /// Project id.
        project: String,
        /// Release version that was selected.
        release: String,
    },

    /// The resolution visited more projects than allowed.
    #[error("resolution exceeded the limit of {limit} projects")]
    ResolutionTooLarge {
        /// Configured project limit.
        limit: usize,
    },

    /// A download URL has no usable final path segment.
    #[error("cannot derive an artifact filename from {0}")]
    InvalidArtifactUrl(String),

    /// The installation service rejected a batch install.
    #[error("installation failed: {0}")]
    InstallationFailed(String),

    /// The installation service rejected an artifact removal.
    #[error("removal failed: {0}")]
    RemovalFailed(String),

    /// The manifest store could not produce a well-formed manifest.
    #[error("manifest unavailable: {0}")]
    ManifestUnavailable(String),

    /// A manifest add or remove was rejected.
    #[error("manifest write failed for {project}: {reason}")]
    ManifestWriteFailed {
        /// Project id of the entry being written.
        project: String,
        /// Reason reported by the store.
        reason: String,
    },

    /// A manifest already holds an entry for this project.
    #[error("plugin {project} already exists in server {server}")]
    DuplicateEntry {
        /// Server id.
        server: String,
        /// Project id.
        project: String,
    },

    /// Artifacts were installed but some manifest writes failed.
    #[error("installed artifacts but {} manifest write(s) failed", .failures.len())]
    ManifestIncomplete {
        /// Project ids recorded in the manifest.
        recorded: Vec<String>,
        /// One error per failed manifest write.
        failures: Vec<Error>,
    },

    /// Registry transport error.
    #[error("registry error: {0}")]
    Registry(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest or catalog parse error.
    #[cfg(feature = "serde")]
    #[error("parse error: {0}")]
    Parse(String),

    /// Configuration error.
    #[cfg(feature = "serde")]
    #[error("config error: {0}")]
    Config(String),

    /// Metrics registration error.
    #[cfg(feature = "metrics-prometheus")]
    #[error("metrics error: {0}")]
    Metrics(String),
}

impl Error {
    /// Create an unresolvable dependency error.
    pub fn unresolvable(project: impl Into<String>, runtime_version: impl Into<String>) -> Self {
        Self::UnresolvableDependency {
            project: project.into(),
            runtime_version: runtime_version.into(),
        }
    }

    /// Create a missing primary artifact error.
    pub fn no_primary(project: impl Into<String>, release: impl Into<String>) -> Self {
        Self::NoPrimaryArtifact {
            project: project.into(),
            release: release.into(),
        }
    }

    /// Create a manifest write error.
    pub fn manifest_write(project: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ManifestWriteFailed {
            project: project.into(),
            reason: reason.into(),
        }
    }

    /// Create a manifest unavailable error.
    pub fn manifest_unavailable(msg: impl Into<String>) -> Self {
        Self::ManifestUnavailable(msg.into())
    }

    /// Create a registry error.
    pub fn registry(msg: impl Into<String>) -> Self {
        Self::Registry(msg.into())
    }

    /// Returns true if this error is raised before any side effect happens.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::UnresolvableDependency { .. }
                | Self::NoPrimaryArtifact { .. }
                | Self::ResolutionTooLarge { .. }
                | Self::InvalidArtifactUrl(_)
                | Self::Registry(_)
        )
    }

    /// Returns true if retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Registry(_)
                | Self::InstallationFailed(_)
                | Self::RemovalFailed(_)
                | Self::ManifestUnavailable(_)
                | Self::Io(_)
        )
    }

    /// Project id the error is about, if any.
    pub fn project(&self) -> Option<&str> {
        match self {
            Self::UnresolvableDependency { project, .. }
            | Self::NoPrimaryArtifact { project, .. }
            | Self::ManifestWriteFailed { project, .. }
            | Self::DuplicateEntry { project, .. } => Some(project),
            _ => None,
        }
    }
}
