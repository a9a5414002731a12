//! # plugin-sync
//!
//! Transitive plugin dependency resolution and installed-plugin manifest
//! synchronization for game server plugin registries.
//!
//! This crate provides:
//! - **Dependency Resolution** - Walk `required` dependencies from a root
//!   project and pick one primary artifact per project, tolerating cycles and
//!   diamonds
//! - **Concurrent Resolution** - Optional bounded worker pool with
//!   claim-before-fetch and fail-fast cancellation
//! - **Manifest Synchronization** - Install a resolved set and record it in a
//!   per-server manifest, or remove a plugin and its entry
//! - **Pluggable Collaborators** - Registry, installation service and
//!   manifest store are traits with in-memory and file-backed implementations
//! - **Event Hooks** - Observe resolutions, installs, removals and failed
//!   manifest writes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use plugin_sync::{
//!     ManifestSynchronizer, MemoryInstaller, MemoryManifestStore, MemoryRegistry, SyncConfig,
//! };
//!
//! let registry = MemoryRegistry::from_json(&std::fs::read_to_string("catalog.json")?)?;
//! let sync = ManifestSynchronizer::new(
//!     registry,
//!     MemoryInstaller::new(),
//!     MemoryManifestStore::new(),
//!     SyncConfig::default(),
//! );
//!
//! sync.install("survival", "luckperms", "1.21")?;
//! for entry in sync.list("survival")? {
//!     println!("{} -> {}", entry.id, entry.artifact_filename);
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): Serialization, JSON catalogs, file-backed manifests
//!   and TOML configuration
//! - `metrics-prometheus`: Prometheus metrics integration

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod error;
mod events;
mod installer;
mod manifest;
mod registry;
mod release;
mod resolver;
mod sync;

#[cfg(feature = "metrics-prometheus")]
mod metrics;

pub use error::{Error, Result};
pub use events::{SyncEvent, SyncHooks};
pub use installer::{InstallationService, MemoryInstaller};
pub use manifest::{ManifestEntry, ManifestStore, MemoryManifestStore, PluginManifest};
pub use registry::{MemoryRegistry, RegistryConfig, ReleaseSource};
pub use release::{
    ArtifactDescriptor, DependencyEdge, DependencyKind, DistributionFile, ProjectId,
    ReleaseBuilder, ReleaseDescriptor,
};
pub use resolver::{DependencyResolver, ResolutionMode, ResolverConfig};
pub use sync::{DuplicatePolicy, InstallReport, ManifestSynchronizer, SyncConfig};

#[cfg(feature = "serde")]
pub use manifest::FileManifestStore;

#[cfg(feature = "metrics-prometheus")]
pub use metrics::{MetricsConfig, SyncMetrics};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
