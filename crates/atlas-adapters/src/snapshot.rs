//! Snapshot store local: blobs inmutables con sidecar `.sha256`.
//!
//! El checksum se calcula una vez al registrar el blob; el grafo y el
//! executor lo consumen como dependencia external ya resuelta. `fetch`
//! re-verifica el contenido contra el sidecar (detección de corrupción).

use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use atlas_core::catalog::{CatalogError, SnapshotStore};
use atlas_core::step::{Snapshot, StepId};

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn map_io(id: &StepId, err: std::io::Error) -> CatalogError {
    if err.kind() == ErrorKind::NotFound {
        CatalogError::NotFound(id.uri())
    } else {
        CatalogError::Transient(err.to_string())
    }
}

pub struct LocalSnapshotStore {
    root: PathBuf,
}

impl LocalSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalSnapshotStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, id: &StepId) -> PathBuf {
        self.root
            .join(&id.channel)
            .join(&id.namespace)
            .join(&id.version)
            .join(format!("{}.json", id.short_name))
    }

    fn sidecar_path(&self, id: &StepId) -> PathBuf {
        self.root
            .join(&id.channel)
            .join(&id.namespace)
            .join(&id.version)
            .join(format!("{}.json.sha256", id.short_name))
    }

    /// Registra un blob nuevo: escribe el payload y el sidecar con su
    /// sha-256. Devuelve el checksum precalculado.
    pub fn register(&self, id: &StepId, payload: &serde_json::Value) -> Result<String, CatalogError> {
        let blob = self.blob_path(id);
        if let Some(parent) = blob.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io(id, e))?;
        }
        let bytes = serde_json::to_vec_pretty(payload).map_err(|e| CatalogError::Backend(e.to_string()))?;
        let checksum = sha256_hex(&bytes);
        fs::write(&blob, &bytes).map_err(|e| map_io(id, e))?;
        fs::write(self.sidecar_path(id), checksum.as_bytes()).map_err(|e| map_io(id, e))?;
        Ok(checksum)
    }
}

impl SnapshotStore for LocalSnapshotStore {
    fn checksum(&self, id: &StepId) -> Result<String, CatalogError> {
        let text = fs::read_to_string(self.sidecar_path(id)).map_err(|e| map_io(id, e))?;
        Ok(text.trim().to_string())
    }

    fn fetch(&self, id: &StepId) -> Result<Snapshot, CatalogError> {
        let bytes = fs::read(self.blob_path(id)).map_err(|e| map_io(id, e))?;
        let expected = self.checksum(id)?;
        let found = sha256_hex(&bytes);
        if found != expected {
            return Err(CatalogError::ChecksumMismatch { dataset: id.uri(),
                                                        expected,
                                                        found });
        }
        let payload = serde_json::from_slice(&bytes).map_err(|e| CatalogError::Backend(e.to_string()))?;
        Ok(Snapshot { id: id.clone(),
                      checksum: expected,
                      payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_store(tag: &str) -> LocalSnapshotStore {
        let dir = std::env::temp_dir().join(format!("atlas-snap-{tag}-{}", uuid::Uuid::new_v4()));
        LocalSnapshotStore::new(dir)
    }

    #[test]
    fn registro_y_fetch_con_checksum_precalculado() {
        let store = temp_store("ok");
        let id: StepId = "meadow/demo/2024-01-01/demo".parse().unwrap();
        let checksum = store.register(&id, &json!({"x": [1, 2, 3]})).expect("register");
        assert_eq!(store.checksum(&id).unwrap(), checksum);
        let snap = store.fetch(&id).expect("fetch");
        assert_eq!(snap.checksum, checksum);
        assert_eq!(snap.payload["x"][2], json!(3));
        fs::remove_dir_all(store.root()).ok();
    }

    #[test]
    fn blob_ausente_es_not_found() {
        let store = temp_store("missing");
        let id: StepId = "meadow/demo/2024-01-01/nope".parse().unwrap();
        assert!(matches!(store.checksum(&id), Err(CatalogError::NotFound(_))));
        assert!(matches!(store.fetch(&id), Err(CatalogError::NotFound(_))));
    }

    #[test]
    fn corrupcion_del_blob_se_detecta() {
        let store = temp_store("corrupt");
        let id: StepId = "meadow/demo/2024-01-01/demo".parse().unwrap();
        store.register(&id, &json!({"x": [1]})).expect("register");
        fs::write(store.blob_path(&id), b"{\"x\": [999]}").expect("corromper");
        assert!(matches!(store.fetch(&id), Err(CatalogError::ChecksumMismatch { .. })));
        fs::remove_dir_all(store.root()).ok();
    }
}
