//! Traits de almacenamiento del catálogo más stores en memoria.
//!
//! El mismo corte que separa el motor de su backend en el resto del
//! workspace: el core define los contratos (`CatalogStore`,
//! `SnapshotStore`) y provee implementaciones en memoria para tests y
//! demos; la implementación durable vive en la capa de persistencia.

use dashmap::DashMap;
use std::collections::HashMap;
use thiserror::Error;

use atlas_domain::{Dataset, DomainError};

use crate::hashing::hash_value;
use crate::step::{Snapshot, StepId};

#[derive(Debug, Error, Clone)]
pub enum CatalogError {
    #[error("dataset no encontrado: '{0}'")]
    NotFound(String),

    /// El contenido en disco no coincide con su manifest (corrupción).
    #[error("checksum inconsistente en '{dataset}': esperado {expected}, recalculado {found}")]
    ChecksumMismatch {
        dataset: String,
        expected: String,
        found: String,
    },

    /// IO transitorio; candidato a reintento acotado.
    #[error("error transitorio de IO: {0}")]
    Transient(String),

    #[error("backend de catálogo: {0}")]
    Backend(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// Almacenamiento de datasets publicados. `save` es la frontera de
/// atomicidad del pipeline: corre el publish gate y sólo publica
/// artefactos completos. `load` es libre de efectos. Los datasets
/// publicados son inmutables: lectores concurrentes siempre son seguros.
pub trait CatalogStore: Send + Sync {
    /// Publica el dataset y devuelve su checksum de contenido.
    fn save(&self, dataset: &Dataset) -> Result<String, CatalogError>;

    fn load(&self, id: &StepId) -> Result<Dataset, CatalogError>;

    /// Self-check barato de frescura: presencia + checksum consistente.
    fn verify(&self, id: &StepId) -> bool;
}

/// Fuente de snapshots crudos: blobs inmutables identificados por step
/// external, con checksum precalculado por la capa de object storage.
pub trait SnapshotStore: Send + Sync {
    fn checksum(&self, id: &StepId) -> Result<String, CatalogError>;
    fn fetch(&self, id: &StepId) -> Result<Snapshot, CatalogError>;
}

/// Catálogo en memoria para tests; concurrente porque el scheduler publica
/// desde varios workers.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    inner: DashMap<String, (Dataset, String)>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl CatalogStore for InMemoryCatalog {
    fn save(&self, dataset: &Dataset) -> Result<String, CatalogError> {
        dataset.check_publishable()?;
        let checksum = dataset.content_digest();
        self.inner.insert(dataset.meta.uri(), (dataset.clone(), checksum.clone()));
        Ok(checksum)
    }

    fn load(&self, id: &StepId) -> Result<Dataset, CatalogError> {
        let entry = self.inner.get(&id.uri()).ok_or_else(|| CatalogError::NotFound(id.uri()))?;
        let (dataset, checksum) = entry.value();
        if !dataset.verify_integrity(checksum) {
            return Err(CatalogError::ChecksumMismatch { dataset: id.uri(),
                                                        expected: checksum.clone(),
                                                        found: dataset.content_digest() });
        }
        Ok(dataset.clone())
    }

    fn verify(&self, id: &StepId) -> bool {
        self.inner
            .get(&id.uri())
            .map(|e| e.value().0.verify_integrity(&e.value().1))
            .unwrap_or(false)
    }
}

/// Snapshot store en memoria para tests y demos.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    inner: HashMap<String, Snapshot>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registra un payload; el checksum se precalcula aquí, igual que lo
    /// haría el object store real al ingestar el blob.
    pub fn insert(&mut self, id: StepId, payload: serde_json::Value) -> String {
        let checksum = hash_value(&payload);
        self.inner.insert(id.uri(),
                          Snapshot { id,
                                     checksum: checksum.clone(),
                                     payload });
        checksum
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn checksum(&self, id: &StepId) -> Result<String, CatalogError> {
        self.inner
            .get(&id.uri())
            .map(|s| s.checksum.clone())
            .ok_or_else(|| CatalogError::NotFound(id.uri()))
    }

    fn fetch(&self, id: &StepId) -> Result<Snapshot, CatalogError> {
        self.inner
            .get(&id.uri())
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(id.uri()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_domain::{ColumnMetadata, DatasetMetadata, Origin, Table, TableMetadata};
    use serde_json::json;

    fn dataset() -> Dataset {
        let mut ds = Dataset::create(DatasetMetadata::new("garden", "ns", "1", "d"));
        let table = Table::new(TableMetadata::new("t"))
            .with_column("v", vec![json!(1)], ColumnMetadata::new().with_origin(Origin::new("p", "t")))
            .expect("col");
        ds.add(table).expect("add");
        ds
    }

    #[test]
    fn save_load_verify() {
        let store = InMemoryCatalog::new();
        let ds = dataset();
        let id: StepId = "garden/ns/1/d".parse().unwrap();
        assert!(!store.verify(&id));
        let checksum = store.save(&ds).expect("save");
        assert!(store.verify(&id));
        let loaded = store.load(&id).expect("load");
        assert_eq!(loaded.content_digest(), checksum);
        assert!(matches!(store.load(&"garden/ns/1/otro".parse().unwrap()),
                         Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn save_corre_el_publish_gate() {
        let store = InMemoryCatalog::new();
        let mut ds = Dataset::create(DatasetMetadata::new("garden", "ns", "1", "d"));
        let table = Table::new(TableMetadata::new("t"))
            .with_column("v", vec![json!(1)], ColumnMetadata::new())
            .expect("col");
        ds.add(table).expect("add");
        let err = store.save(&ds).unwrap_err();
        assert!(matches!(err, CatalogError::Domain(DomainError::MissingProvenance { .. })), "{err}");
    }

    #[test]
    fn snapshot_store_precalcula_checksums() {
        let mut store = InMemorySnapshotStore::new();
        let id: StepId = "meadow/ns/1/s".parse().unwrap();
        let checksum = store.insert(id.clone(), json!({"x": [1, 2]}));
        assert_eq!(store.checksum(&id).unwrap(), checksum);
        let snap = store.fetch(&id).unwrap();
        assert_eq!(snap.payload["x"][0], json!(1));
    }
}
