//! Registry release model and resolver output types.

use std::borrow::Borrow;
use std::fmt;

/// Stable identifier of a project in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct ProjectId(String);

impl ProjectId {
    /// Create a new project id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ProjectId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ProjectId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Classification of a declared dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DependencyKind {
    /// Must be installed alongside the dependent.
    Required,
    /// May be installed; never traversed.
    Optional,
    /// Must not be installed alongside the dependent.
    Incompatible,
    /// Shipped inside the dependent's own artifact.
    Embedded,
}

impl DependencyKind {
    /// Check if the resolver follows this edge.
    pub fn is_traversed(&self) -> bool {
        matches!(self, Self::Required)
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Required => "required",
            Self::Optional => "optional",
            Self::Incompatible => "incompatible",
            Self::Embedded => "embedded",
        };
        write!(f, "{}", name)
    }
}

/// A dependency declared by a release.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DependencyEdge {
    /// Project the dependency points at.
    pub project: ProjectId,
    /// Kind of dependency.
    pub kind: DependencyKind,
}

impl DependencyEdge {
    /// Create a new dependency edge.
    pub fn new(project: impl Into<ProjectId>, kind: DependencyKind) -> Self {
        Self {
            project: project.into(),
            kind,
        }
    }

    /// Create a required dependency edge.
    pub fn required(project: impl Into<ProjectId>) -> Self {
        Self::new(project, DependencyKind::Required)
    }
}

/// A downloadable file belonging to a release.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DistributionFile {
    /// Download URL.
    pub url: String,
    /// Whether this is the canonical installable artifact.
    #[cfg_attr(feature = "serde", serde(default))]
    pub primary: bool,
}

impl DistributionFile {
    /// Create a primary file.
    pub fn primary(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            primary: true,
        }
    }

    /// Create a non-primary file.
    pub fn secondary(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            primary: false,
        }
    }
}

/// One published release of a project.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReleaseDescriptor {
    /// Release version number.
    pub version: String,

    /// Distribution files in registry order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub files: Vec<DistributionFile>,

    /// Declared dependencies in declaration order.
    #[cfg_attr(feature = "serde", serde(default))]
    pub dependencies: Vec<DependencyEdge>,

    /// Runtime versions this release supports.
    #[cfg_attr(feature = "serde", serde(default))]
    pub runtime_versions: Vec<String>,
}

impl ReleaseDescriptor {
    /// Create an empty release.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            files: Vec::new(),
            dependencies: Vec::new(),
            runtime_versions: Vec::new(),
        }
    }

    /// Get the first file flagged primary.
    pub fn primary_file(&self) -> Option<&DistributionFile> {
        self.files.iter().find(|f| f.primary)
    }

    /// Iterate over the dependencies the resolver follows, in declaration order.
    pub fn required_dependencies(&self) -> impl Iterator<Item = &ProjectId> {
        self.dependencies
            .iter()
            .filter(|d| d.kind.is_traversed())
            .map(|d| &d.project)
    }

    /// Check if this release supports a runtime version.
    pub fn supports(&self, runtime_version: &str) -> bool {
        self.runtime_versions.iter().any(|v| v == runtime_version)
    }
}

/// Builder for creating releases.
pub struct ReleaseBuilder {
    release: ReleaseDescriptor,
}

impl ReleaseBuilder {
    /// Create a new release builder.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            release: ReleaseDescriptor::new(version),
        }
    }

    /// Add a primary file.
    pub fn primary_file(mut self, url: impl Into<String>) -> Self {
        self.release.files.push(DistributionFile::primary(url));
        self
    }

    /// Add a non-primary file.
    pub fn file(mut self, url: impl Into<String>) -> Self {
        self.release.files.push(DistributionFile::secondary(url));
        self
    }

    /// Add a dependency edge.
    pub fn dependency(mut self, project: impl Into<ProjectId>, kind: DependencyKind) -> Self {
        self.release.dependencies.push(DependencyEdge::new(project, kind));
        self
    }

    /// Add a required dependency.
    pub fn requires(self, project: impl Into<ProjectId>) -> Self {
        self.dependency(project, DependencyKind::Required)
    }

    /// Add a supported runtime version.
    pub fn runtime_version(mut self, version: impl Into<String>) -> Self {
        self.release.runtime_versions.push(version.into());
        self
    }

    /// Add supported runtime versions.
    pub fn runtime_versions<I, S>(mut self, versions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.release
            .runtime_versions
            .extend(versions.into_iter().map(Into::into));
        self
    }

    /// Build the release.
    pub fn build(self) -> ReleaseDescriptor {
        self.release
    }
}

/// A resolved project and the URL of its primary artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArtifactDescriptor {
    /// Resolved project.
    pub project: ProjectId,
    /// Download URL of the primary file.
    #[cfg_attr(feature = "serde", serde(rename = "downloadUrl"))]
    pub download_url: String,
}

impl ArtifactDescriptor {
    /// Create a new artifact descriptor.
    pub fn new(project: impl Into<ProjectId>, download_url: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            download_url: download_url.into(),
        }
    }

    /// Filename of the artifact: the final path segment of the download URL.
    ///
    /// Query strings and fragments are ignored. Returns `None` when the URL
    /// ends in a slash or has no path.
    pub fn artifact_filename(&self) -> Option<&str> {
        artifact_filename(&self.download_url)
    }
}

/// Derive the installed filename of an artifact from its download URL.
pub(crate) fn artifact_filename(url: &str) -> Option<&str> {
    let end = url.find(|c: char| c == '?' || c == '#').unwrap_or(url.len());
    let path = &url[..end];
    let path = path.split_once("://").map_or(path, |(_, rest)| {
        rest.find('/').map_or("", |slash| &rest[slash..])
    });

    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() && name != "." && name != ".." => Some(name),
        _ => None,
    }
}
