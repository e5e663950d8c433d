//! Contenedor de dataset: N tablas bajo un `DatasetMetadata`.
//!
//! Un dataset es propiedad exclusiva del step que lo construye mientras ese
//! step ejecuta; una vez escrito al catálogo se vuelve un artefacto
//! inmutable consumido en sólo-lectura por cualquier número de steps
//! descendientes. La (de)serialización canónica y el checksum viven en la
//! capa de persistencia; aquí viven los invariantes.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DomainError;
use crate::metadata::DatasetMetadata;
use crate::table::Table;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub meta: DatasetMetadata,
    tables: IndexMap<String, Table>,
}

impl Dataset {
    /// Dataset vacío, sin tablas todavía.
    pub fn create(meta: DatasetMetadata) -> Self {
        Dataset { meta, tables: IndexMap::new() }
    }

    /// Adjunta una tabla validando de inmediato el invariante de clave
    /// primaria (falla rápido con `DuplicateKey` listando las primeras
    /// tuplas ofensoras). Fija la referencia al dataset propietario.
    pub fn add(&mut self, mut table: Table) -> Result<(), DomainError> {
        table.check_primary_key()?;
        if self.tables.contains_key(&table.meta.short_name) {
            return Err(DomainError::Validation(format!("tabla duplicada en el dataset: '{}'",
                                                       table.meta.short_name)));
        }
        table.meta.dataset = Some(self.meta.short_name.clone());
        self.tables.insert(table.meta.short_name.clone(), table);
        Ok(())
    }

    pub fn table(&self, short_name: &str) -> Result<&Table, DomainError> {
        self.tables
            .get(short_name)
            .ok_or_else(|| DomainError::Validation(format!("tabla inexistente en el dataset: '{short_name}'")))
    }

    pub fn tables(&self) -> impl Iterator<Item = (&String, &Table)> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Reconstrucción desde partes ya validadas (carga del catálogo).
    pub fn from_parts(meta: DatasetMetadata, tables: IndexMap<String, Table>) -> Self {
        Dataset { meta, tables }
    }

    /// Publish gate de procedencia: toda columna de toda tabla debe tener al
    /// menos un origin. Se invoca en el `save()` del catálogo, no en pasos
    /// intermedios (las tablas intermedias pueden estar incompletas).
    pub fn check_publishable(&self) -> Result<(), DomainError> {
        for (table_name, table) in &self.tables {
            table.check_primary_key()?;
            for (column_name, column) in table.columns() {
                if column.meta.origins.is_empty() {
                    return Err(DomainError::MissingProvenance { table: table_name.clone(),
                                                                column: column_name.clone() });
                }
            }
        }
        Ok(())
    }

    /// Digest sha-256 sobre la forma serializada completa. Mismo rol que el
    /// hash de integridad de una familia inmutable: identidad barata del
    /// artefacto y detección de divergencias.
    pub fn content_digest(&self) -> String {
        let mut hasher = Sha256::new();
        if let Ok(bytes) = serde_json::to_vec(self) {
            hasher.update(&bytes);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Verifica que el digest recalculado coincida con uno esperado.
    pub fn verify_integrity(&self, expected: &str) -> bool {
        self.content_digest() == expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ColumnMetadata, TableMetadata};
    use crate::origin::Origin;
    use serde_json::json;

    fn keyed_table(rows: &[(&str, i64)]) -> Table {
        let countries: Vec<_> = rows.iter().map(|(c, _)| json!(c)).collect();
        let years: Vec<_> = rows.iter().map(|(_, y)| json!(y)).collect();
        Table::new(TableMetadata::new("t").with_primary_key(&["country", "year"]))
            .with_column("country", countries, ColumnMetadata::new().with_origin(Origin::new("p", "t")))
            .unwrap()
            .with_column("year", years, ColumnMetadata::new().with_origin(Origin::new("p", "t")))
            .unwrap()
    }

    #[test]
    fn add_rechaza_claves_duplicadas() {
        let mut ds = Dataset::create(DatasetMetadata::new("garden", "demo", "2024", "demo"));
        let err = ds.add(keyed_table(&[("ar", 2000), ("ar", 2000)])).unwrap_err();
        assert!(matches!(err, DomainError::DuplicateKey { .. }), "{err}");
        assert!(ds.is_empty());
        // la misma tabla con claves únicas sí entra
        ds.add(keyed_table(&[("ar", 2000), ("ar", 2001)])).expect("claves únicas");
        assert_eq!(ds.len(), 1);
        assert_eq!(ds.table("t").unwrap().meta.dataset.as_deref(), Some("demo"));
    }

    #[test]
    fn gate_de_procedencia() {
        let mut ds = Dataset::create(DatasetMetadata::new("garden", "demo", "2024", "demo"));
        let sin_origins = Table::new(TableMetadata::new("t"))
            .with_column("v", vec![json!(1)], ColumnMetadata::new())
            .unwrap();
        ds.add(sin_origins).unwrap();
        let err = ds.check_publishable().unwrap_err();
        match err {
            DomainError::MissingProvenance { table, column } => {
                assert_eq!(table, "t");
                assert_eq!(column, "v");
            }
            other => panic!("se esperaba MissingProvenance, hubo {other}"),
        }
    }

    #[test]
    fn gate_pasa_con_origin_presente() {
        let mut ds = Dataset::create(DatasetMetadata::new("garden", "demo", "2024", "demo"));
        ds.add(keyed_table(&[("ar", 2000)])).unwrap();
        assert!(ds.check_publishable().is_ok());
    }

    #[test]
    fn digest_detecta_divergencia() {
        let mut a = Dataset::create(DatasetMetadata::new("garden", "demo", "2024", "demo"));
        a.add(keyed_table(&[("ar", 2000)])).unwrap();
        let digest = a.content_digest();
        assert!(a.verify_integrity(&digest));

        let mut b = Dataset::create(DatasetMetadata::new("garden", "demo", "2024", "demo"));
        b.add(keyed_table(&[("br", 2000)])).unwrap();
        assert!(!b.verify_integrity(&digest));
    }
}
