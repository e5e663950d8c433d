//! Errores del core y taxonomía de fallas para el resumen de corrida.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use atlas_domain::DomainError;

use crate::catalog::CatalogError;

#[derive(Debug, Error, Clone)]
pub enum CoreEngineError {
    /// Ciclo en el grafo declarativo; fatal en carga, nada se ejecuta.
    #[error("dependencia cíclica: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    /// Referencia a un step no declarado (y no marcado como external).
    #[error("dependencia no declarada: '{dependency}' (requerida por '{step}')")]
    UnresolvedDependency { step: String, dependency: String },

    #[error("step duplicado en el grafo: '{0}'")]
    DuplicateStep(String),

    #[error("step desconocido: '{0}'")]
    UnknownStep(String),

    #[error("identidad de step inválida: '{0}' (se espera channel/namespace/version/short_name)")]
    InvalidStepUri(String),

    #[error("un step external no puede declarar dependencias: '{0}'")]
    ExternalWithDependencies(String),

    #[error("sin transform registrado para '{0}'")]
    MissingTransform(String),

    #[error("entrada faltante para '{step}': '{dependency}'")]
    MissingInput { step: String, dependency: String },

    /// Falla específica de timeout; reintentable según la política
    /// configurada, nunca reintentada en silencio.
    #[error("timeout tras {seconds}s en '{step}'")]
    Timeout { step: String, seconds: u64 },

    #[error("el dataset producido no corresponde al step '{step}': se obtuvo '{found}'")]
    WrongOutputIdentity { step: String, found: String },

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("interno: {0}")]
    Internal(String),
}

/// Clase de falla de un step, para el reporte agregado:
/// estructural de grafo, de integridad de datos, de lógica de
/// transformación, o transitoria/de recursos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Graph,
    Data,
    Transform,
    Transient,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Graph => "graph",
            FailureKind::Data => "data",
            FailureKind::Transform => "transform",
            FailureKind::Transient => "transient",
        };
        write!(f, "{s}")
    }
}

impl CoreEngineError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CoreEngineError::CyclicDependency { .. }
            | CoreEngineError::UnresolvedDependency { .. }
            | CoreEngineError::DuplicateStep(_)
            | CoreEngineError::UnknownStep(_)
            | CoreEngineError::InvalidStepUri(_)
            | CoreEngineError::ExternalWithDependencies(_)
            | CoreEngineError::MissingTransform(_) => FailureKind::Graph,
            CoreEngineError::Timeout { .. } => FailureKind::Transient,
            CoreEngineError::Catalog(CatalogError::Transient(_)) => FailureKind::Transient,
            CoreEngineError::MissingInput { .. }
            | CoreEngineError::WrongOutputIdentity { .. }
            | CoreEngineError::Domain(_)
            | CoreEngineError::Catalog(_) => FailureKind::Data,
            CoreEngineError::Internal(_) => FailureKind::Transform,
        }
    }

    /// Sólo las fallas transitorias entran al ciclo de reintentos acotados.
    pub fn is_transient(&self) -> bool {
        matches!(self.failure_kind(), FailureKind::Transient)
    }
}
