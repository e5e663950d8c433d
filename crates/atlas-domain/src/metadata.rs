//! Metadatos de procedencia por columna, por tabla y por dataset.
//!
//! Rol en el pipeline:
//! - Cada columna de una `Table` lleva un `ColumnMetadata`; cada operación
//!   relacional deriva los metadatos de salida a partir de los de entrada.
//! - El `processing_log` es una bitácora append-only, no autoritativa: sirve
//!   para reconstruir cómo se calculó un valor sin re-ejecutar el pipeline.
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::origin::{union_origins, License, Origin};

/// Entrada de auditoría de una operación que derivó una columna.
/// Nunca se borra; sólo se agregan entradas nuevas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingLogEntry {
    /// Nombre de la operación (select, rename, div, concat, ...).
    pub operation: String,
    /// Columnas de entrada referenciadas por la operación.
    pub columns: Vec<String>,
    /// Resumen de parámetros relevantes (JSON neutro).
    #[serde(default)]
    pub params: Value,
}

impl ProcessingLogEntry {
    pub fn new(operation: impl Into<String>, columns: &[&str], params: Value) -> Self {
        ProcessingLogEntry { operation: operation.into(),
                             columns: columns.iter().map(|c| c.to_string()).collect(),
                             params }
    }
}

/// Metadatos de una columna individual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ColumnMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fuentes upstream de las que deriva la columna. Para una columna
    /// publicable la lista debe ser no vacía (verificado en el publish
    /// gate, no en pasos intermedios).
    #[serde(default)]
    pub origins: Vec<Origin>,
    /// Hints de presentación (JSON neutro, no interpretado por el motor).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<Value>,
    #[serde(default)]
    pub processing_log: Vec<ProcessingLogEntry>,
}

impl ColumnMetadata {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>, short_unit: Option<String>) -> Self {
        self.unit = Some(unit.into());
        self.short_unit = short_unit;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        if !self.origins.contains(&origin) {
            self.origins.push(origin);
        }
        self
    }

    pub fn with_origins(mut self, origins: Vec<Origin>) -> Self {
        self.origins = union_origins([self.origins.as_slice(), origins.as_slice()]);
        self
    }

    /// Copia con una entrada más en el processing log (append-only).
    pub fn logged(&self, entry: ProcessingLogEntry) -> Self {
        let mut next = self.clone();
        next.processing_log.push(entry);
        next
    }

    /// Metadatos base de una columna derivada de varias entradas:
    /// origins = unión ordenada y deduplicada; el log concatena las
    /// bitácoras de las entradas (la entrada de la operación la agrega el
    /// llamador). Unidad/título quedan sin definir: no se pueden inferir.
    pub fn derived_from(inputs: &[&ColumnMetadata]) -> Self {
        let mut meta = ColumnMetadata::new();
        meta.origins = union_origins(inputs.iter().map(|m| m.origins.as_slice()));
        for input in inputs {
            meta.processing_log.extend(input.processing_log.iter().cloned());
        }
        meta
    }
}

/// Metadatos de una tabla: identidad, descripción y clave primaria.
///
/// Invariante: la combinación de valores de las columnas de `primary_key`
/// debe ser única cuando la tabla se considera finalizada (se verifica al
/// adjuntarla a un dataset y de nuevo en el publish gate, no continuamente).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TableMetadata {
    pub short_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Referencia al dataset propietario (se fija en `Dataset::add`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(default)]
    pub primary_key: Vec<String>,
}

impl TableMetadata {
    pub fn new(short_name: impl Into<String>) -> Self {
        TableMetadata { short_name: short_name.into(),
                        ..Default::default() }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_primary_key(mut self, keys: &[&str]) -> Self {
        self.primary_key = keys.iter().map(|k| k.to_string()).collect();
        self
    }
}

/// Metadatos del dataset: identidad versionada dentro del catálogo más
/// defaults de nivel dataset (origins, licencia, visibilidad).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DatasetMetadata {
    pub short_name: String,
    pub namespace: String,
    pub version: String,
    pub channel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub origins: Vec<Origin>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    #[serde(default)]
    pub is_public: bool,
}

impl DatasetMetadata {
    pub fn new(channel: impl Into<String>,
               namespace: impl Into<String>,
               version: impl Into<String>,
               short_name: impl Into<String>)
               -> Self {
        DatasetMetadata { short_name: short_name.into(),
                          namespace: namespace.into(),
                          version: version.into(),
                          channel: channel.into(),
                          ..Default::default() }
    }

    pub fn with_license(mut self, license: License) -> Self {
        self.license = Some(license);
        self
    }

    pub fn public(mut self) -> Self {
        self.is_public = true;
        self
    }

    /// URI canónica `channel/namespace/version/short_name`, la misma forma
    /// que usa el grafo de steps.
    pub fn uri(&self) -> String {
        format!("{}/{}/{}/{}", self.channel, self.namespace, self.version, self.short_name)
    }
}
