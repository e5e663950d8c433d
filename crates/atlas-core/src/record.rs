//! BuildRecord: el único estado mutable de todo el proceso.
//!
//! Mapa persistido `step -> último checksum exitoso`. Se lee al arrancar el
//! scheduler, se agrega tras cada step exitoso y nunca se revierte
//! automáticamente ante una falla: los steps fallidos simplemente no quedan
//! registrados y se reintentan en la corrida siguiente. Las escrituras van
//! bajo disciplina de escritor único (el scheduler las serializa aunque la
//! ejecución de steps sea paralela).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::catalog::CatalogError;
use crate::step::StepId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub checksum: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildRecord {
    entries: HashMap<String, RecordEntry>,
}

impl BuildRecord {
    pub fn get(&self, id: &StepId) -> Option<&RecordEntry> {
        self.entries.get(&id.uri())
    }

    pub fn set(&mut self, id: &StepId, checksum: &str) {
        self.entries.insert(id.uri(),
                            RecordEntry { checksum: checksum.to_string(),
                                          recorded_at: Utc::now() });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Persistencia del BuildRecord. El contrato crítico de ordenamiento:
/// `record` debe ser durable antes de retornar, porque el scheduler recién
/// entonces deja que un dependiente observe la dependencia como
/// satisfecha (write-then-notify).
pub trait BuildRecordStore: Send + Sync {
    fn load(&self) -> Result<BuildRecord, CatalogError>;
    fn record(&self, id: &StepId, checksum: &str) -> Result<(), CatalogError>;
}

#[derive(Debug, Default)]
pub struct InMemoryBuildRecord {
    inner: Mutex<BuildRecord>,
}

impl InMemoryBuildRecord {
    pub fn new() -> Self {
        Default::default()
    }
}

impl BuildRecordStore for InMemoryBuildRecord {
    fn load(&self) -> Result<BuildRecord, CatalogError> {
        let guard = self.inner
                        .lock()
                        .map_err(|_| CatalogError::Backend("build record lock envenenado".into()))?;
        Ok(guard.clone())
    }

    fn record(&self, id: &StepId, checksum: &str) -> Result<(), CatalogError> {
        let mut guard = self.inner
                            .lock()
                            .map_err(|_| CatalogError::Backend("build record lock envenenado".into()))?;
        guard.set(id, checksum);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_y_load() {
        let store = InMemoryBuildRecord::new();
        let id: StepId = "garden/ns/1/a".parse().unwrap();
        assert!(store.load().unwrap().get(&id).is_none());
        store.record(&id, "abc").unwrap();
        let record = store.load().unwrap();
        assert_eq!(record.get(&id).unwrap().checksum, "abc");
        // una re-escritura reemplaza la entrada, nunca borra otras
        store.record(&id, "def").unwrap();
        assert_eq!(store.load().unwrap().get(&id).unwrap().checksum, "def");
        assert_eq!(store.load().unwrap().len(), 1);
    }
}
