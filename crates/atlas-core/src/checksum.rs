//! Checksums de definición por step, con propagación transitiva.

use indexmap::IndexMap;
use serde_json::json;

use crate::catalog::SnapshotStore;
use crate::constants::ENGINE_VERSION;
use crate::errors::CoreEngineError;
use crate::graph::StepGraph;
use crate::hashing::hash_value;
use crate::step::{StepId, StepKind, TransformRegistry};

/// Calcula el checksum de definición de cada step del grafo: hash canónico
/// del artefacto de código propio (o del checksum del snapshot para steps
/// external) más los checksums de las dependencias directas. El recorrido
/// en orden topológico convierte al mapa en cache por nodo: cualquier
/// cambio upstream invalida a todos los descendientes sin re-caminar el
/// cierre transitivo por fuerza bruta.
pub fn compute_checksums(graph: &StepGraph,
                         registry: &TransformRegistry,
                         snapshots: &dyn SnapshotStore)
                         -> Result<IndexMap<StepId, String>, CoreEngineError> {
    let mut out: IndexMap<StepId, String> = IndexMap::new();
    for node in graph.topological() {
        let own = match node.kind {
            StepKind::External => snapshots.checksum(&node.id)?,
            StepKind::Data => registry.get(&node.id)
                                      .ok_or_else(|| CoreEngineError::MissingTransform(node.id.uri()))?
                                      .definition_hash(),
        };
        let mut deps: Vec<(String, String)> = node.dependencies
                                                  .iter()
                                                  .map(|d| (d.uri(), out[d].clone()))
                                                  .collect();
        deps.sort();
        let dep_sums: Vec<&str> = deps.iter().map(|(_, s)| s.as_str()).collect();
        let sum = hash_value(&json!({
            "engine_version": ENGINE_VERSION,
            "step": node.id.uri(),
            "code": own,
            "deps": dep_sums,
        }));
        out.insert(node.id.clone(), sum);
    }
    Ok(out)
}
