//! Carga del grafo declarativo de steps y validación estructural.
//!
//! El grafo entra como una lista declarativa (`StepSpec`) y sale como un
//! DAG validado: identidades únicas, toda referencia resuelta (los steps
//! `External` son las entradas permitidas fuera del grafo) y cero ciclos.
//! Cualquier violación es fatal en carga: ningún step se ejecuta.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::errors::CoreEngineError;
use crate::step::{StepId, StepKind};

/// Entrada declarativa de un step. Las dependencias se refieren por URI
/// `channel/namespace/version/short_name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub namespace: String,
    pub channel: String,
    pub version: String,
    pub short_name: String,
    #[serde(default)]
    pub kind: StepKind,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl StepSpec {
    pub fn id(&self) -> StepId {
        StepId::new(&self.channel, &self.namespace, &self.version, &self.short_name)
    }
}

/// Nodo resuelto del DAG.
#[derive(Debug, Clone)]
pub struct StepNode {
    pub id: StepId,
    pub kind: StepKind,
    pub dependencies: Vec<StepId>,
}

/// DAG validado de steps, en orden de declaración.
#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    nodes: IndexMap<StepId, StepNode>,
}

impl StepGraph {
    pub fn load(specs: &[StepSpec]) -> Result<Self, CoreEngineError> {
        let mut nodes: IndexMap<StepId, StepNode> = IndexMap::new();
        for spec in specs {
            let id = spec.id();
            if nodes.contains_key(&id) {
                return Err(CoreEngineError::DuplicateStep(id.uri()));
            }
            let mut dependencies = Vec::new();
            for dep in &spec.dependencies {
                dependencies.push(dep.parse::<StepId>()?);
            }
            if matches!(spec.kind, StepKind::External) && !dependencies.is_empty() {
                return Err(CoreEngineError::ExternalWithDependencies(id.uri()));
            }
            nodes.insert(id.clone(),
                         StepNode { id,
                                    kind: spec.kind,
                                    dependencies });
        }
        let graph = StepGraph { nodes };
        graph.validate()?;
        Ok(graph)
    }

    /// Carga desde la forma serializada de la lista declarativa.
    pub fn from_json(text: &str) -> Result<Self, CoreEngineError> {
        let specs: Vec<StepSpec> =
            serde_json::from_str(text).map_err(|e| CoreEngineError::Internal(format!("grafo inválido: {e}")))?;
        Self::load(&specs)
    }

    fn validate(&self) -> Result<(), CoreEngineError> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(CoreEngineError::UnresolvedDependency { step: node.id.uri(),
                                                                       dependency: dep.uri() });
                }
            }
        }
        if let Some(cycle) = self.find_cycle() {
            return Err(CoreEngineError::CyclicDependency { cycle: cycle.iter().map(|id| id.uri()).collect() });
        }
        Ok(())
    }

    /// DFS tricolor sobre el grafo completo; devuelve el ciclo nombrado si
    /// existe (primer nodo repetido al final).
    fn find_cycle(&self) -> Option<Vec<StepId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        fn visit<'a>(graph: &'a StepGraph,
                     id: &'a StepId,
                     marks: &mut HashMap<&'a StepId, Mark>,
                     stack: &mut Vec<&'a StepId>)
                     -> Option<Vec<StepId>> {
            marks.insert(id, Mark::Gray);
            stack.push(id);
            for dep in &graph.nodes[id].dependencies {
                match marks.get(dep).copied().unwrap_or(Mark::White) {
                    Mark::Gray => {
                        let start = stack.iter().position(|s| *s == dep).unwrap_or(0);
                        let mut cycle: Vec<StepId> = stack[start..].iter().map(|s| (*s).clone()).collect();
                        cycle.push(dep.clone());
                        return Some(cycle);
                    }
                    Mark::White => {
                        if let Some(c) = visit(graph, dep, marks, stack) {
                            return Some(c);
                        }
                    }
                    Mark::Black => {}
                }
            }
            stack.pop();
            marks.insert(id, Mark::Black);
            None
        }

        let mut marks: HashMap<&StepId, Mark> = self.nodes.keys().map(|k| (k, Mark::White)).collect();
        let mut stack: Vec<&StepId> = Vec::new();
        for id in self.nodes.keys() {
            if marks[id] == Mark::White {
                if let Some(c) = visit(self, id, &mut marks, &mut stack) {
                    return Some(c);
                }
            }
        }
        None
    }

    /// Orden topológico determinista (post-orden DFS sobre el orden de
    /// declaración). Sólo válido sobre un grafo ya validado.
    pub fn topological(&self) -> Vec<&StepNode> {
        fn visit<'a>(graph: &'a StepGraph,
                     id: &'a StepId,
                     visited: &mut HashSet<&'a StepId>,
                     out: &mut Vec<&'a StepNode>) {
            if !visited.insert(id) {
                return;
            }
            for dep in &graph.nodes[id].dependencies {
                visit(graph, dep, visited, out);
            }
            out.push(&graph.nodes[id]);
        }

        let mut visited: HashSet<&StepId> = HashSet::new();
        let mut out: Vec<&StepNode> = Vec::new();
        for id in self.nodes.keys() {
            visit(self, id, &mut visited, &mut out);
        }
        out
    }

    /// Clausura de dependencias de un step (incluido él), en orden
    /// topológico: lo mínimo que hay que construir para ejecutarlo.
    pub fn closure(&self, id: &StepId) -> Result<Vec<StepId>, CoreEngineError> {
        fn visit<'a>(graph: &'a StepGraph, id: &'a StepId, visited: &mut HashSet<&'a StepId>, out: &mut Vec<StepId>) {
            if !visited.insert(id) {
                return;
            }
            for dep in &graph.nodes[id].dependencies {
                visit(graph, dep, visited, out);
            }
            out.push(id.clone());
        }

        let (key, _) = self.nodes
                           .get_key_value(id)
                           .ok_or_else(|| CoreEngineError::UnknownStep(id.uri()))?;
        let mut visited = HashSet::new();
        let mut out = Vec::new();
        visit(self, key, &mut visited, &mut out);
        Ok(out)
    }

    /// Dependientes transitivos de un step (sin incluirlo), en orden de
    /// declaración. Es el conjunto que se saltea cuando el step falla.
    pub fn dependents(&self, id: &StepId) -> Vec<StepId> {
        let mut out: HashSet<StepId> = HashSet::new();
        let mut changed = true;
        while changed {
            changed = false;
            for node in self.nodes.values() {
                if out.contains(&node.id) || node.id == *id {
                    continue;
                }
                if node.dependencies.iter().any(|d| d == id || out.contains(d)) {
                    out.insert(node.id.clone());
                    changed = true;
                }
            }
        }
        self.nodes.keys().filter(|k| out.contains(*k)).cloned().collect()
    }

    /// Subconjunto cuyos URIs contienen `filter`, más su clausura de
    /// dependencias.
    pub fn subset(&self, filter: &str) -> Result<StepGraph, CoreEngineError> {
        let mut keep: HashSet<StepId> = HashSet::new();
        for id in self.nodes.keys() {
            if id.uri().contains(filter) {
                for dep in self.closure(id)? {
                    keep.insert(dep);
                }
            }
        }
        if keep.is_empty() {
            return Err(CoreEngineError::UnknownStep(filter.to_string()));
        }
        let nodes = self.nodes
                        .iter()
                        .filter(|(k, _)| keep.contains(*k))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
        Ok(StepGraph { nodes })
    }

    pub fn get(&self, id: &StepId) -> Option<&StepNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &StepId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
