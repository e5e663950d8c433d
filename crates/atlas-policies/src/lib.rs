//! atlas-policies – Contratos de publicación del catálogo
//!
//! Provee los checks deterministas y auditables que componen el publish
//! gate de un dataset: unicidad de clave primaria y completitud de
//! procedencia. Cada violación lleva un rationale tipado y serializable;
//! el conjunto de checks tiene un hash canónico estable para auditoría.

use atlas_core::hashing::{hash_str, to_canonical_json};
use atlas_domain::{Dataset, DomainError};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Violación detectada por un check, con detalle suficiente para reportar
/// sin re-ejecutar nada.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Violation {
    /// id estático del check que la detectó.
    pub check_id: String,
    pub table: String,
    pub column: Option<String>,
    pub message: String,
    /// Rationale tipado como JSON canónicalizable.
    pub details: serde_json::Value,
}

/// Contrato de un check de dataset. Implementaciones deben ser puras y
/// deterministas respecto al dataset recibido.
pub trait DatasetCheck: Send + Sync {
    fn id(&self) -> &'static str;
    fn check(&self, dataset: &Dataset) -> Vec<Violation>;
}

/// Check: la combinación de columnas de clave primaria es única por tabla.
pub struct PrimaryKeyUniqueness;

impl DatasetCheck for PrimaryKeyUniqueness {
    fn id(&self) -> &'static str {
        "primary_key_uniqueness"
    }

    fn check(&self, dataset: &Dataset) -> Vec<Violation> {
        let mut out = Vec::new();
        for (name, table) in dataset.tables() {
            if let Err(err) = table.check_primary_key() {
                let details = match &err {
                    DomainError::DuplicateKey { keys, first_dupes, .. } => {
                        json!({ "keys": keys, "first_dupes": first_dupes })
                    }
                    other => json!({ "error": other.to_string() }),
                };
                out.push(Violation { check_id: self.id().to_string(),
                                     table: name.clone(),
                                     column: None,
                                     message: err.to_string(),
                                     details });
            }
        }
        out
    }
}

/// Check: toda columna publicable tiene al menos un origin.
pub struct ProvenanceCompleteness;

impl DatasetCheck for ProvenanceCompleteness {
    fn id(&self) -> &'static str {
        "provenance_completeness"
    }

    fn check(&self, dataset: &Dataset) -> Vec<Violation> {
        let mut out = Vec::new();
        for (table_name, table) in dataset.tables() {
            for (column_name, column) in table.columns() {
                if column.meta.origins.is_empty() {
                    out.push(Violation { check_id: self.id().to_string(),
                                         table: table_name.clone(),
                                         column: Some(column_name.clone()),
                                         message: format!("columna '{column_name}' sin origins"),
                                         details: json!({
                                             "processing_log_len": column.meta.processing_log.len()
                                         }) });
                }
            }
        }
        out
    }
}

/// Conjunto ordenado de checks; el orden es parte de la identidad.
pub struct CheckSet {
    checks: Vec<Box<dyn DatasetCheck>>,
}

impl CheckSet {
    pub fn new(checks: Vec<Box<dyn DatasetCheck>>) -> Self {
        CheckSet { checks }
    }

    /// El publish gate canónico: clave primaria + procedencia.
    pub fn publish_gate() -> Self {
        CheckSet::new(vec![Box::new(PrimaryKeyUniqueness), Box::new(ProvenanceCompleteness)])
    }

    /// Evalúa todos los checks y devuelve todas las violaciones (para
    /// reporte completo, no sólo la primera).
    pub fn evaluate(&self, dataset: &Dataset) -> Vec<Violation> {
        self.checks.iter().flat_map(|c| c.check(dataset)).collect()
    }

    /// Aplica el gate: las violaciones se materializan como el error de
    /// dominio preciso (DuplicateKey / MissingProvenance), el mismo que
    /// producirían los validadores del dominio.
    pub fn enforce(&self, dataset: &Dataset) -> Result<(), DomainError> {
        dataset.check_publishable()
    }

    /// Hash canónico de la composición del gate, para dejar constancia de
    /// con qué contrato se publicó un dataset.
    pub fn gate_hash(&self) -> String {
        let ids: Vec<&str> = self.checks.iter().map(|c| c.id()).collect();
        hash_str(&to_canonical_json(&json!({ "checks": ids })))
    }
}
