//! Identidad, ciclo de vida y contrato de ejecución de un Step.
//!
//! Un Step es un nodo del DAG de build: una unidad versionada de
//! transformación que produce exactamente un Dataset. Este módulo define:
//! - `StepId` / `StepKind`: identidad compuesta y marcador external.
//! - `StepState`: máquina de estados usada por el scheduler.
//! - `StepTransform`: interfaz neutral de la lógica externa de un step.
//! - `ExecutionContext`: mapa explícito de dependencias resueltas (sin
//!   registros globales ni singletons de proceso).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use atlas_domain::Dataset;

use crate::errors::CoreEngineError;

/// Clave compuesta única de un step dentro del grafo.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId {
    pub channel: String,
    pub namespace: String,
    pub version: String,
    pub short_name: String,
}

impl StepId {
    pub fn new(channel: impl Into<String>,
               namespace: impl Into<String>,
               version: impl Into<String>,
               short_name: impl Into<String>)
               -> Self {
        StepId { channel: channel.into(),
                 namespace: namespace.into(),
                 version: version.into(),
                 short_name: short_name.into() }
    }

    /// URI canónica `channel/namespace/version/short_name`.
    pub fn uri(&self) -> String {
        format!("{}/{}/{}/{}", self.channel, self.namespace, self.version, self.short_name)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.channel, self.namespace, self.version, self.short_name)
    }
}

impl FromStr for StepId {
    type Err = CoreEngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
            return Err(CoreEngineError::InvalidStepUri(s.to_string()));
        }
        Ok(StepId::new(parts[0], parts[1], parts[2], parts[3]))
    }
}

/// Tipo general del step: `Data` ejecuta una transformación registrada;
/// `External` marca una dependencia que vive fuera del grafo (snapshot
/// store) con checksum precalculado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    External,
    #[default]
    Data,
}

/// Estado de un step durante una corrida.
///
/// Transiciones válidas:
/// - `Unresolved` -> `Resolved` (al validar el grafo completo)
/// - `Resolved` -> `Stale` | `Fresh`
/// - `Stale` -> `Running` (sólo con todas las dependencias en terminal
///   exitoso)
/// - `Running` -> `Succeeded` | `Failed` | `Stale` (reintento transitorio)
/// - cualquier no-terminal -> `Skipped` (cierre descendiente de una falla)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Unresolved,
    Resolved,
    Fresh,
    Stale,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepState {
    /// Terminal exitoso: habilita a los dependientes directos.
    pub fn is_terminal_ok(&self) -> bool {
        matches!(self, StepState::Fresh | StepState::Succeeded)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self,
                 StepState::Fresh | StepState::Succeeded | StepState::Failed | StepState::Skipped)
    }
}

/// Blob inmutable con checksum precalculado, servido por el object store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: StepId,
    pub checksum: String,
    pub payload: serde_json::Value,
}

/// Contexto entregado a `StepTransform::run`: las dependencias ya resueltas
/// por el scheduler, en sólo-lectura. El contexto se construye y se pasa
/// explícitamente en cada invocación; no hay estado de proceso compartido.
pub struct ExecutionContext {
    pub step: StepId,
    pub datasets: HashMap<StepId, Arc<Dataset>>,
    pub snapshots: HashMap<StepId, Snapshot>,
}

impl ExecutionContext {
    pub fn dataset(&self, uri: &str) -> Result<&Arc<Dataset>, CoreEngineError> {
        let id: StepId = uri.parse()?;
        self.datasets.get(&id).ok_or_else(|| CoreEngineError::MissingInput { step: self.step.uri(),
                                                                             dependency: uri.to_string() })
    }

    pub fn snapshot(&self, uri: &str) -> Result<&Snapshot, CoreEngineError> {
        let id: StepId = uri.parse()?;
        self.snapshots.get(&id).ok_or_else(|| CoreEngineError::MissingInput { step: self.step.uri(),
                                                                              dependency: uri.to_string() })
    }
}

/// Lógica de transformación de un step `Data`. Implementaciones deben ser
/// puras respecto a sus dependencias: no mutan los datasets de entrada,
/// corren síncronas y monohilo sobre tablas privadas en memoria, y
/// producen exactamente un dataset cuya identidad coincide con el step.
pub trait StepTransform: Send + Sync {
    /// Hash del artefacto de código que implementa la transformación;
    /// lo provee el colaborador externo que versiona el código del step.
    fn definition_hash(&self) -> String;

    fn run(&self, ctx: &ExecutionContext) -> Result<Dataset, CoreEngineError>;
}

/// Transform construido desde un callable: cualquier función conforme a
/// `(deps) -> Dataset` sirve como lógica de step.
pub struct FnTransform<F>
    where F: Fn(&ExecutionContext) -> Result<Dataset, CoreEngineError> + Send + Sync
{
    code_hash: String,
    f: F,
}

impl<F> FnTransform<F> where F: Fn(&ExecutionContext) -> Result<Dataset, CoreEngineError> + Send + Sync
{
    pub fn new(code_hash: impl Into<String>, f: F) -> Self {
        FnTransform { code_hash: code_hash.into(), f }
    }
}

impl<F> StepTransform for FnTransform<F>
    where F: Fn(&ExecutionContext) -> Result<Dataset, CoreEngineError> + Send + Sync
{
    fn definition_hash(&self) -> String {
        self.code_hash.clone()
    }

    fn run(&self, ctx: &ExecutionContext) -> Result<Dataset, CoreEngineError> {
        (self.f)(ctx)
    }
}

/// Mapa explícito `step -> transform`. El scheduler lo recibe construido;
/// reemplaza cualquier registro global implícito.
#[derive(Default)]
pub struct TransformRegistry {
    inner: HashMap<StepId, Arc<dyn StepTransform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn register(&mut self, id: StepId, transform: Arc<dyn StepTransform>) {
        self.inner.insert(id, transform);
    }

    pub fn get(&self, id: &StepId) -> Option<&Arc<dyn StepTransform>> {
        self.inner.get(id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_roundtrip() {
        let id = StepId::new("garden", "demo", "2024-01-01", "demo");
        assert_eq!(id.uri(), "garden/demo/2024-01-01/demo");
        let parsed: StepId = id.uri().parse().expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn uri_invalida() {
        assert!("garden/demo".parse::<StepId>().is_err());
        assert!("garden//2024/x".parse::<StepId>().is_err());
        assert!("a/b/c/d/e".parse::<StepId>().is_err());
    }

    #[test]
    fn estados_terminales() {
        assert!(StepState::Fresh.is_terminal_ok());
        assert!(StepState::Succeeded.is_terminal_ok());
        assert!(!StepState::Failed.is_terminal_ok());
        assert!(StepState::Skipped.is_terminal());
        assert!(!StepState::Running.is_terminal());
    }
}
