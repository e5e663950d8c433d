//! Atlasflow Rust Library
//!
//! Este crate actúa como la fachada del workspace:
//! - Re-exporta el dominio tabular (`atlas-domain`), el motor de build
//!   (`atlas-core`), la persistencia local (`atlas-persistence`) y los
//!   adapters (`atlas-adapters`).
//! - Expone `demo` con el pipeline de referencia meadow -> garden armado
//!   contra stores en memoria, usable desde `main.rs` y los tests.

pub use atlas_adapters as adapters;
pub use atlas_core as engine;
pub use atlas_domain as domain;
pub use atlas_persistence as persistence;

pub mod demo {
    use std::sync::Arc;

    use atlas_adapters::{builtin_registry, demo_snapshot_payload, demo_specs, MEADOW_DEMO};
    use atlas_core::{BuildScheduler, CoreEngineError, InMemoryBuildRecord, InMemoryCatalog, InMemorySnapshotStore,
                     StepGraph};

    /// Arma el scheduler del pipeline demo contra stores en memoria y
    /// devuelve también el catálogo para inspeccionar lo publicado.
    pub fn in_memory_scheduler() -> Result<(BuildScheduler, Arc<InMemoryCatalog>), CoreEngineError> {
        let graph = StepGraph::load(&demo_specs())?;
        let registry = builtin_registry()?;
        let mut snapshots = InMemorySnapshotStore::new();
        snapshots.insert(MEADOW_DEMO.parse()?, demo_snapshot_payload());
        let catalog = Arc::new(InMemoryCatalog::new());
        let sched = BuildScheduler::new(graph,
                                        registry,
                                        catalog.clone(),
                                        Arc::new(snapshots),
                                        Arc::new(InMemoryBuildRecord::new()));
        Ok((sched, catalog))
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn el_demo_se_arma_sin_errores() {
        let (_sched, catalog) = super::demo::in_memory_scheduler().expect("demo");
        assert!(catalog.is_empty(), "el catálogo arranca vacío");
    }
}
