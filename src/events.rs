//! Synchronization events and observer hooks.

use std::time::Instant;

/// Event emitted by the synchronizer.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A dependency graph was resolved.
    Resolved {
        /// Root project.
        root: String,
        /// Number of artifacts in the result.
        artifacts: usize,
        /// Resolution time.
        at: Instant,
    },
    /// Artifacts were installed and recorded.
    Installed {
        /// Server id.
        server: String,
        /// Projects installed by this call.
        projects: Vec<String>,
        /// Install time.
        at: Instant,
    },
    /// A plugin was removed.
    Removed {
        /// Server id.
        server: String,
        /// Project id or artifact filename given to `remove`.
        key: String,
        /// Removal time.
        at: Instant,
    },
    /// A manifest write failed after artifacts were installed.
    ManifestWriteFailed {
        /// Server id.
        server: String,
        /// Project whose entry was not written.
        project: String,
        /// Error message.
        message: String,
        /// Failure time.
        at: Instant,
    },
}

impl SyncEvent {
    /// Get the event timestamp.
    pub fn timestamp(&self) -> Instant {
        match self {
            Self::Resolved { at, .. } => *at,
            Self::Installed { at, .. } => *at,
            Self::Removed { at, .. } => *at,
            Self::ManifestWriteFailed { at, .. } => *at,
        }
    }

    /// Get the server id, if the event concerns one.
    pub fn server(&self) -> Option<&str> {
        match self {
            Self::Resolved { .. } => None,
            Self::Installed { server, .. }
            | Self::Removed { server, .. }
            | Self::ManifestWriteFailed { server, .. } => Some(server),
        }
    }

    /// Get the event name.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Resolved { .. } => "resolved",
            Self::Installed { .. } => "installed",
            Self::Removed { .. } => "removed",
            Self::ManifestWriteFailed { .. } => "manifest_write_failed",
        }
    }
}

/// Registered handlers for synchronization events.
pub struct SyncHooks {
    handlers: Vec<Box<dyn Fn(&SyncEvent) + Send + Sync>>,
}

impl SyncHooks {
    /// Create empty hooks.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add an event handler.
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Emit an event to every handler.
    pub fn emit(&self, event: SyncEvent) {
        for handler in &self.handlers {
            handler(&event);
        }
    }

    /// Emit a resolved event.
    pub fn emit_resolved(&self, root: &str, artifacts: usize) {
        self.emit(SyncEvent::Resolved {
            root: root.to_string(),
            artifacts,
            at: Instant::now(),
        });
    }

    /// Emit an installed event.
    pub fn emit_installed(&self, server: &str, projects: Vec<String>) {
        self.emit(SyncEvent::Installed {
            server: server.to_string(),
            projects,
            at: Instant::now(),
        });
    }

    /// Emit a removed event.
    pub fn emit_removed(&self, server: &str, key: &str) {
        self.emit(SyncEvent::Removed {
            server: server.to_string(),
            key: key.to_string(),
            at: Instant::now(),
        });
    }

    /// Emit a manifest write failure.
    pub fn emit_write_failed(&self, server: &str, project: &str, message: &str) {
        self.emit(SyncEvent::ManifestWriteFailed {
            server: server.to_string(),
            project: project.to_string(),
            message: message.to_string(),
            at: Instant::now(),
        });
    }

    /// Get handler count.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for SyncHooks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SyncHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncHooks")
            .field("handler_count", &self.handlers.len())
            .finish()
    }
}
