//! Example resolving a plugin's required dependency graph.

use std::sync::Arc;

use plugin_sync::{DependencyResolver, Error, MemoryRegistry, ResolutionMode, ResolverConfig};

const CATALOG: &str = include_str!("catalog.json");

fn main() -> plugin_sync::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    println!("=== Dependency Resolution Example ===\n");

    let registry = Arc::new(MemoryRegistry::from_json(CATALOG)?);
    println!("Catalog projects: {}", registry.len());

    for mode in [ResolutionMode::Sequential, ResolutionMode::Concurrent] {
        let config = ResolverConfig::new().with_mode(mode).with_max_concurrency(4);
        let resolver = DependencyResolver::new(registry.clone(), config);

        let artifacts = resolver.resolve("essentialsx-chat", "1.21")?;
        println!("\n{:?} resolution of essentialsx-chat:", mode);
        for artifact in &artifacts {
            println!(
                "  {} -> {}",
                artifact.project,
                artifact.artifact_filename().unwrap_or("?")
            );
        }
    }

    println!("\n=== Unsupported Runtime ===");

    let resolver = DependencyResolver::with_source(registry.clone());
    match resolver.resolve("essentialsx-chat", "9.9.9") {
        Err(Error::UnresolvableDependency { project, runtime_version }) => {
            println!("No release of {} for runtime {}", project, runtime_version);
        }
        other => println!("Unexpected: {:?}", other),
    }

    println!("\nRegistry queries served: {}", registry.query_count());

    Ok(())
}
