//! atlas-persistence
//!
//! Implementaciones durables de los contratos del core sobre el sistema de
//! archivos:
//! - `fs::LocalCatalog`: layout canónico del catálogo (un directorio por
//!   versión de dataset con un archivo por tabla, sidecar de metadatos y
//!   manifest de checksums sha-256), publicación atómica vía directorio
//!   temporal + rename.
//! - `fs::FileBuildRecord`: BuildRecord respaldado por archivo con
//!   escritura durable (tmp + fsync + rename) bajo escritor único.
//! - `config`: carga de configuración desde `.env` / variables de entorno.

pub mod config;
pub mod error;
pub mod fs;

pub use config::{init_dotenv, CatalogConfig};
pub use error::PersistenceError;
pub use fs::{FileBuildRecord, LocalCatalog};
