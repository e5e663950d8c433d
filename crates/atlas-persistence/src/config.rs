//! Carga de configuración desde variables de entorno.
//! Convenciones: `ATLAS_CATALOG_DIR` (raíz del catálogo en disco) y
//! `ATLAS_WORKERS` (ancho del pool del scheduler).

use dotenvy::dotenv;
use once_cell::sync::Lazy;
use std::env;
use std::path::PathBuf;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub root: PathBuf,
    pub workers: Option<usize>,
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        Lazy::force(&DOTENV_LOADED);
        let root = env::var("ATLAS_CATALOG_DIR").map(PathBuf::from)
                                                .unwrap_or_else(|_| PathBuf::from("data/catalog"));
        let workers = env::var("ATLAS_WORKERS").ok().and_then(|v| v.parse().ok());
        CatalogConfig { root, workers }
    }

    /// Ruta del BuildRecord dentro del catálogo.
    pub fn record_path(&self) -> PathBuf {
        self.root.join("build_record.json")
    }

    /// Directorio convencional de snapshots crudos.
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
