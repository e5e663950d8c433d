// error.rs
use thiserror::Error;

/// Error del dominio tabular. Todas las variantes son fatales para el step
/// que las origina; el executor las reporta con contexto completo sin
/// abortar ramas hermanas.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    #[error("columna inexistente: '{0}'")]
    MissingColumn(String),

    /// Claves de join no únicas en el lado que el modo estricto exige único.
    #[error("claves no únicas en '{table}' para {keys:?}; primeras repetidas: {first_dupes:?}")]
    KeyNotUnique {
        table: String,
        keys: Vec<String>,
        first_dupes: Vec<String>,
    },

    /// Violación de clave primaria al adjuntar una tabla a un dataset.
    #[error("clave primaria duplicada en '{table}' ({keys:?}); primeras repetidas: {first_dupes:?}")]
    DuplicateKey {
        table: String,
        keys: Vec<String>,
        first_dupes: Vec<String>,
    },

    /// Conflicto de unidad/título no resuelto durante concat/melt.
    #[error("reshape incompatible: {0}")]
    IncompatibleReshape(String),

    /// Columna publicable sin origins. Se verifica en el publish gate
    /// (save), nunca en pasos intermedios.
    #[error("procedencia incompleta: columna '{column}' de '{table}' sin origins")]
    MissingProvenance { table: String, column: String },

    #[error("Error de validación: {0}")]
    Validation(String),

    #[error("Error de serialización: {0}")]
    Serialization(String),
}

// Implementación de conversión desde serde_json::Error a DomainError
impl From<serde_json::Error> for DomainError {
    fn from(e: serde_json::Error) -> Self {
        DomainError::Serialization(e.to_string())
    }
}
