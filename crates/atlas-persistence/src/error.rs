//! Errores de persistencia.
//! Mapea errores de IO / serde a variantes semánticas, y de vuelta a los
//! contratos del core para que el scheduler los clasifique.

use thiserror::Error;

use atlas_core::CatalogError;
use atlas_domain::DomainError;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("dataset no encontrado: '{0}'")]
    NotFound(String),

    #[error("checksum inconsistente en '{dataset}' ({file}): esperado {expected}, recalculado {found}")]
    ChecksumMismatch {
        dataset: String,
        file: String,
        expected: String,
        found: String,
    },

    #[error("layout corrupto: {0}")]
    Corrupt(String),

    #[error("serialización: {0}")]
    Serde(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Violación del publish gate (procedencia, claves) detectada al
    /// guardar o reconstruir.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(e: serde_json::Error) -> Self {
        PersistenceError::Serde(e.to_string())
    }
}

// Proyección hacia el contrato del core: el IO se considera transitorio
// (candidato a reintento), el resto conserva su semántica.
impl From<PersistenceError> for CatalogError {
    fn from(e: PersistenceError) -> Self {
        match e {
            PersistenceError::NotFound(uri) => CatalogError::NotFound(uri),
            PersistenceError::ChecksumMismatch { dataset, file, expected, found } => {
                CatalogError::ChecksumMismatch { dataset: format!("{dataset}:{file}"),
                                                 expected,
                                                 found }
            }
            PersistenceError::Io(err) => CatalogError::Transient(err.to_string()),
            PersistenceError::Corrupt(msg) | PersistenceError::Serde(msg) => CatalogError::Backend(msg),
            PersistenceError::Domain(err) => CatalogError::Domain(err),
        }
    }
}
