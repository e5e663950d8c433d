//! Stores sobre el sistema de archivos: catálogo canónico y BuildRecord.
//!
//! Layout por dataset (`<root>/<channel>/<namespace>/<version>/<short_name>/`):
//! - `<tabla>.json`     payload columnar de cada tabla
//! - `index.json`       sidecar de metadatos (dataset, tablas, columnas con
//!                      origins y processing log)
//! - `checksums.json`   manifest sha-256 por archivo + checksum combinado
//!
//! La publicación es atómica: se escribe todo a un directorio temporal bajo
//! la raíz y se renombra al final; un dataset a medio escribir nunca es
//! visible para un lector.

use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use atlas_core::catalog::{CatalogError, CatalogStore};
use atlas_core::record::{BuildRecord, BuildRecordStore};
use atlas_core::step::StepId;
use atlas_domain::{Column, ColumnMetadata, Dataset, DatasetMetadata, Table, TableMetadata};
use atlas_policies::CheckSet;

use crate::error::PersistenceError;

/// Nombres reservados por el layout (no pueden usarse como short_name de
/// tabla).
const RESERVED_FILES: [&str; 2] = ["index", "checksums"];

#[derive(Debug, Serialize, Deserialize)]
struct TableDoc {
    columns: IndexMap<String, Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableIndexDoc {
    metadata: TableMetadata,
    columns: IndexMap<String, ColumnMetadata>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexDoc {
    dataset: DatasetMetadata,
    tables: IndexMap<String, TableIndexDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    files: BTreeMap<String, String>,
    checksum: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Checksum combinado del dataset: sha-256 de las líneas `archivo:hash`
/// en orden lexicográfico (BTreeMap garantiza el orden).
fn combined_checksum(files: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (name, hash) in files {
        hasher.update(name.as_bytes());
        hasher.update(b":");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PersistenceError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Catálogo canónico en disco.
pub struct LocalCatalog {
    root: PathBuf,
    gate: CheckSet,
}

impl LocalCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalCatalog { root: root.into(),
                       gate: CheckSet::publish_gate() }
    }

    pub fn from_env() -> Self {
        Self::new(crate::config::CatalogConfig::from_env().root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dataset_dir(&self, id: &StepId) -> PathBuf {
        self.root
            .join(&id.channel)
            .join(&id.namespace)
            .join(&id.version)
            .join(&id.short_name)
    }

    fn save_impl(&self, dataset: &Dataset) -> Result<String, PersistenceError> {
        // Publish gate: se reportan todas las violaciones antes de fallar
        // con el error de dominio preciso.
        let violations = self.gate.evaluate(dataset);
        if !violations.is_empty() {
            for v in &violations {
                log::error!("publish gate {}: {} [{}]", dataset.meta.uri(), v.message, v.check_id);
            }
            self.gate.enforce(dataset)?;
        }

        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        for (name, _) in dataset.tables() {
            if RESERVED_FILES.contains(&name.as_str()) {
                return Err(PersistenceError::Corrupt(format!("nombre de tabla reservado: '{name}'")));
            }
        }
        // serialización + hash por tabla en paralelo
        let table_files: Vec<(String, Vec<u8>)> =
            dataset.tables()
                   .collect::<Vec<_>>()
                   .into_par_iter()
                   .map(|(name, table)| {
                       let doc = TableDoc { columns: table.columns()
                                                         .map(|(c, col)| (c.clone(), col.values.clone()))
                                                         .collect() };
                       let bytes = serde_json::to_vec_pretty(&doc)?;
                       Ok((format!("{name}.json"), bytes))
                   })
                   .collect::<Result<_, PersistenceError>>()?;
        files.extend(table_files);

        let index = IndexDoc { dataset: dataset.meta.clone(),
                               tables: dataset.tables()
                                              .map(|(name, table)| {
                                                  (name.clone(),
                                                   TableIndexDoc { metadata: table.meta.clone(),
                                                                   columns: table.columns()
                                                                                 .map(|(c, col)| {
                                                                                     (c.clone(), col.meta.clone())
                                                                                 })
                                                                                 .collect() })
                                              })
                                              .collect() };
        files.push(("index.json".to_string(), serde_json::to_vec_pretty(&index)?));

        let hashed: Vec<(String, Vec<u8>, String)> = files.into_par_iter()
                                                          .map(|(name, bytes)| {
                                                              let hash = sha256_hex(&bytes);
                                                              (name, bytes, hash)
                                                          })
                                                          .collect();
        let manifest_files: BTreeMap<String, String> =
            hashed.iter().map(|(name, _, hash)| (name.clone(), hash.clone())).collect();
        let checksum = combined_checksum(&manifest_files);
        let manifest = Manifest { files: manifest_files,
                                  checksum: checksum.clone() };

        // escritura atómica: directorio temporal + rename
        let tmp = self.root.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&tmp)?;
        for (name, bytes, _) in &hashed {
            fs::write(tmp.join(name), bytes)?;
        }
        fs::write(tmp.join("checksums.json"), serde_json::to_vec_pretty(&manifest)?)?;

        let id: StepId = StepId::new(&dataset.meta.channel,
                                     &dataset.meta.namespace,
                                     &dataset.meta.version,
                                     &dataset.meta.short_name);
        let final_dir = self.dataset_dir(&id);
        if let Some(parent) = final_dir.parent() {
            fs::create_dir_all(parent)?;
        }
        if final_dir.exists() {
            fs::remove_dir_all(&final_dir)?;
        }
        fs::rename(&tmp, &final_dir)?;
        log::debug!("dataset {} publicado en {}", dataset.meta.uri(), final_dir.display());
        Ok(checksum)
    }

    fn load_impl(&self, id: &StepId) -> Result<Dataset, PersistenceError> {
        let dir = self.dataset_dir(id);
        if !dir.is_dir() {
            return Err(PersistenceError::NotFound(id.uri()));
        }
        let manifest: Manifest = read_json(&dir.join("checksums.json"))?;
        for (name, expected) in &manifest.files {
            let bytes = fs::read(dir.join(name))?;
            let found = sha256_hex(&bytes);
            if &found != expected {
                return Err(PersistenceError::ChecksumMismatch { dataset: id.uri(),
                                                                file: name.clone(),
                                                                expected: expected.clone(),
                                                                found });
            }
        }
        let index: IndexDoc = read_json(&dir.join("index.json"))?;
        let mut tables = IndexMap::new();
        for (name, tdoc) in index.tables {
            let payload: TableDoc = read_json(&dir.join(format!("{name}.json")))?;
            let mut columns = IndexMap::new();
            for (col_name, values) in payload.columns {
                let meta = tdoc.columns.get(&col_name).cloned().unwrap_or_default();
                columns.insert(col_name, Column { values, meta });
            }
            let table = Table::from_parts(tdoc.metadata, columns)?;
            tables.insert(name, table);
        }
        Ok(Dataset::from_parts(index.dataset, tables))
    }

    fn verify_impl(&self, id: &StepId) -> bool {
        let dir = self.dataset_dir(id);
        let manifest: Manifest = match read_json(&dir.join("checksums.json")) {
            Ok(m) => m,
            Err(_) => return false,
        };
        for (name, expected) in &manifest.files {
            match fs::read(dir.join(name)) {
                Ok(bytes) => {
                    if sha256_hex(&bytes) != *expected {
                        return false;
                    }
                }
                Err(_) => return false,
            }
        }
        true
    }
}

impl CatalogStore for LocalCatalog {
    fn save(&self, dataset: &Dataset) -> Result<String, CatalogError> {
        self.save_impl(dataset).map_err(CatalogError::from)
    }

    fn load(&self, id: &StepId) -> Result<Dataset, CatalogError> {
        self.load_impl(id).map_err(CatalogError::from)
    }

    fn verify(&self, id: &StepId) -> bool {
        self.verify_impl(id)
    }
}

/// BuildRecord respaldado por archivo JSON. Escritor único (mutex interno)
/// y escritura durable: archivo temporal + fsync + rename, de modo que
/// `record` sólo retorna con la entrada persistida.
pub struct FileBuildRecord {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileBuildRecord {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileBuildRecord { path: path.into(),
                          lock: Mutex::new(()) }
    }

    fn read_unlocked(&self) -> Result<BuildRecord, CatalogError> {
        if !self.path.exists() {
            return Ok(BuildRecord::default());
        }
        let bytes = fs::read(&self.path).map_err(|e| CatalogError::Transient(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| CatalogError::Backend(format!("build record ilegible: {e}")))
    }
}

impl BuildRecordStore for FileBuildRecord {
    fn load(&self) -> Result<BuildRecord, CatalogError> {
        let _guard = self.lock
                         .lock()
                         .map_err(|_| CatalogError::Backend("build record lock envenenado".into()))?;
        self.read_unlocked()
    }

    fn record(&self, id: &StepId, checksum: &str) -> Result<(), CatalogError> {
        let _guard = self.lock
                         .lock()
                         .map_err(|_| CatalogError::Backend("build record lock envenenado".into()))?;
        let mut record = self.read_unlocked()?;
        record.set(id, checksum);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CatalogError::Transient(e.to_string()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| CatalogError::Backend(e.to_string()))?;
        let mut file = fs::File::create(&tmp).map_err(|e| CatalogError::Transient(e.to_string()))?;
        file.write_all(&bytes).map_err(|e| CatalogError::Transient(e.to_string()))?;
        file.sync_all().map_err(|e| CatalogError::Transient(e.to_string()))?;
        fs::rename(&tmp, &self.path).map_err(|e| CatalogError::Transient(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_domain::Origin;
    use serde_json::json;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("atlas-{tag}-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    fn demo_dataset() -> Dataset {
        let mut ds = Dataset::create(DatasetMetadata::new("garden", "demo", "2024-01-01", "demo"));
        let table = Table::new(TableMetadata::new("population").with_primary_key(&["country", "year"]))
            .with_column("country",
                         vec![json!("ar"), json!("br")],
                         ColumnMetadata::new().with_origin(Origin::new("p", "census")))
            .unwrap()
            .with_column("year",
                         vec![json!(2000), json!(2000)],
                         ColumnMetadata::new().with_origin(Origin::new("p", "census")))
            .unwrap()
            .with_column("pop",
                         vec![json!(37.0), json!(175.0)],
                         ColumnMetadata::new().with_origin(Origin::new("p", "census")).with_unit("millions", None))
            .unwrap();
        ds.add(table).expect("add");
        ds
    }

    #[test]
    fn roundtrip_save_load() {
        let root = temp_root("roundtrip");
        let catalog = LocalCatalog::new(&root);
        let ds = demo_dataset();
        let checksum = catalog.save_impl(&ds).expect("save");
        let id: StepId = "garden/demo/2024-01-01/demo".parse().unwrap();
        assert!(catalog.verify(&id));

        let loaded = catalog.load_impl(&id).expect("load");
        assert_eq!(loaded.meta, ds.meta);
        let pop = loaded.table("population").unwrap().column("pop").unwrap();
        assert_eq!(pop.meta.unit.as_deref(), Some("millions"));
        assert_eq!(pop.meta.origins.len(), 1);
        assert_eq!(pop.values[1], json!(175.0));

        // manifest consistente con el checksum devuelto
        let manifest: Manifest =
            read_json(&root.join("garden/demo/2024-01-01/demo/checksums.json")).expect("manifest");
        assert_eq!(manifest.checksum, checksum);
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn load_inexistente() {
        let root = temp_root("missing");
        let catalog = LocalCatalog::new(&root);
        let id: StepId = "garden/demo/2024-01-01/nope".parse().unwrap();
        assert!(matches!(catalog.load_impl(&id), Err(PersistenceError::NotFound(_))));
        assert!(!catalog.verify(&id));
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn detecta_corrupcion_por_checksum() {
        let root = temp_root("corrupt");
        let catalog = LocalCatalog::new(&root);
        catalog.save_impl(&demo_dataset()).expect("save");
        let id: StepId = "garden/demo/2024-01-01/demo".parse().unwrap();

        // corromper el payload de la tabla
        let table_path = root.join("garden/demo/2024-01-01/demo/population.json");
        fs::write(&table_path, b"{\"columns\":{}}").expect("corromper");
        assert!(!catalog.verify(&id));
        let err = catalog.load_impl(&id).unwrap_err();
        assert!(matches!(err, PersistenceError::ChecksumMismatch { .. }), "{err}");
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn el_gate_bloquea_procedencia_incompleta() {
        let root = temp_root("gate");
        let catalog = LocalCatalog::new(&root);
        let mut ds = Dataset::create(DatasetMetadata::new("garden", "demo", "2024-01-01", "demo"));
        let table = Table::new(TableMetadata::new("t"))
            .with_column("v", vec![json!(1)], ColumnMetadata::new())
            .unwrap();
        ds.add(table).unwrap();
        let err = catalog.save_impl(&ds).unwrap_err();
        assert!(matches!(err, PersistenceError::Domain(atlas_domain::DomainError::MissingProvenance { .. })),
                "{err}");
        // nada quedó publicado
        let id: StepId = "garden/demo/2024-01-01/demo".parse().unwrap();
        assert!(!catalog.verify(&id));

        // con al menos un origin en esa columna, el mismo save pasa el gate
        let mut ds = Dataset::create(DatasetMetadata::new("garden", "demo", "2024-01-01", "demo"));
        let table = Table::new(TableMetadata::new("t"))
            .with_column("v", vec![json!(1)], ColumnMetadata::new().with_origin(Origin::new("p", "t")))
            .unwrap();
        ds.add(table).unwrap();
        catalog.save_impl(&ds).expect("con origin el gate pasa");
        assert!(catalog.verify(&id));
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn re_publicacion_reemplaza_la_version() {
        let root = temp_root("republish");
        let catalog = LocalCatalog::new(&root);
        let first = catalog.save_impl(&demo_dataset()).expect("primera");
        // mismo dataset con una fila más
        let mut ds = Dataset::create(DatasetMetadata::new("garden", "demo", "2024-01-01", "demo"));
        let table = Table::new(TableMetadata::new("population").with_primary_key(&["country", "year"]))
            .with_column("country",
                         vec![json!("ar"), json!("br"), json!("cl")],
                         ColumnMetadata::new().with_origin(Origin::new("p", "census")))
            .unwrap()
            .with_column("year",
                         vec![json!(2000), json!(2000), json!(2000)],
                         ColumnMetadata::new().with_origin(Origin::new("p", "census")))
            .unwrap()
            .with_column("pop",
                         vec![json!(37.0), json!(175.0), json!(15.0)],
                         ColumnMetadata::new().with_origin(Origin::new("p", "census")).with_unit("millions", None))
            .unwrap();
        ds.add(table).unwrap();
        let second = catalog.save_impl(&ds).expect("segunda");
        assert_ne!(first, second);
        let id: StepId = "garden/demo/2024-01-01/demo".parse().unwrap();
        let loaded = catalog.load_impl(&id).expect("load");
        assert_eq!(loaded.table("population").unwrap().num_rows(), 3);
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn build_record_durable_entre_instancias() {
        let root = temp_root("record");
        let path = root.join("build_record.json");
        let id: StepId = "garden/demo/2024-01-01/demo".parse().unwrap();
        {
            let store = FileBuildRecord::new(&path);
            assert!(store.load().unwrap().is_empty());
            store.record(&id, "abc").expect("record");
        }
        // una instancia nueva ve la entrada persistida
        let store = FileBuildRecord::new(&path);
        let record = store.load().expect("load");
        assert_eq!(record.get(&id).unwrap().checksum, "abc");
        // sin archivos temporales residuales
        assert!(!path.with_extension("json.tmp").exists());
        fs::remove_dir_all(root).ok();
    }
}
