//! Example installing and removing plugins on a server manifest.

use std::sync::Arc;

use plugin_sync::{
    FileManifestStore, ManifestSynchronizer, MemoryInstaller, MemoryRegistry, SyncConfig,
};

const CATALOG: &str = include_str!("catalog.json");

const CONFIG: &str = r#"
duplicate-policy = "replace"

[resolver]
mode = "concurrent"
max-concurrency = 4
"#;

fn main() -> plugin_sync::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("=== Manifest Sync Example ===\n");

    let servers = std::env::temp_dir().join("plugin-sync-demo");
    std::fs::create_dir_all(servers.join("survival"))?;

    let installer = Arc::new(MemoryInstaller::new());
    let sync = ManifestSynchronizer::new(
        MemoryRegistry::from_json(CATALOG)?,
        installer.clone(),
        FileManifestStore::new(&servers),
        SyncConfig::from_toml(CONFIG)?,
    );

    sync.on_event(|event| println!("  [event] {}", event.event_name()));

    let report = sync.install("survival", "essentialsx-chat", "1.21")?;
    println!("Installed: {:?}", report.projects());
    println!("Replaced entries: {}", report.replaced.len());

    println!("\nManifest:");
    for entry in sync.list("survival")? {
        println!("  {} -> {}", entry.id, entry.artifact_filename);
    }

    sync.remove("survival", "essentialsx-chat")?;
    println!("\nAfter removal:");
    for entry in sync.list("survival")? {
        println!("  {} -> {}", entry.id, entry.artifact_filename);
    }
    println!("Installed files: {:?}", installer.installed("survival"));

    println!("\n=== Example Complete ===");

    Ok(())
}
