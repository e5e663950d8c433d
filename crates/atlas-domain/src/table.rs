//! Tabla relacional con metadatos por columna.
//!
//! Rol en el pipeline:
//! - Una `Table` se comporta como una tabla relacional normal (filas ×
//!   columnas nombradas, tipos heterogéneos por columna via JSON neutro)
//!   pero cada columna lleva un `ColumnMetadata`.
//! - Toda operación soportada es pura: recibe `&self` y devuelve una tabla
//!   nueva con los metadatos de salida derivados de los de entrada, sin que
//!   el llamador tenga que re-adjuntarlos a mano.
//! - El modelo no codifica análisis dimensional: sumar porcentajes con
//!   conteos absolutos no se bloquea estructuralmente; sólo la corrección
//!   de origins y processing log está garantizada.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

use crate::error::DomainError;
use crate::metadata::{ColumnMetadata, ProcessingLogEntry, TableMetadata};

/// Máximo de tuplas repetidas reportadas en errores de unicidad.
const MAX_REPORTED_KEYS: usize = 5;

/// Una columna: valores JSON neutros más sus metadatos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub values: Vec<Value>,
    pub meta: ColumnMetadata,
}

/// Cardinalidad exigida por un join. El llamador la elige explícitamente;
/// `ManyToMany` es el único modo sin verificación de unicidad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl JoinKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinKind::OneToOne => "one_to_one",
            JoinKind::OneToMany => "one_to_many",
            JoinKind::ManyToMany => "many_to_many",
        }
    }
}

/// Política de resolución cuando concat/melt encuentran unidades o títulos
/// materialmente distintos entre fuentes. El default documentado es
/// `Strict` (falla); `PreferFirst` es el override explícito.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitConflict {
    #[default]
    Strict,
    PreferFirst,
}

/// Agregaciones soportadas por `group_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Sum,
    Mean,
    Min,
    Max,
    First,
}

impl AggKind {
    pub fn name(&self) -> &'static str {
        match self {
            AggKind::Sum => "sum",
            AggKind::Mean => "mean",
            AggKind::Min => "min",
            AggKind::Max => "max",
            AggKind::First => "first",
        }
    }
}

/// Unidad de salida declarada explícitamente por el llamador. La aritmética
/// no puede inferir unidades de forma sólida, así que se exigen aquí.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnitSpec {
    pub unit: String,
    pub short_unit: Option<String>,
}

impl UnitSpec {
    pub fn new(unit: impl Into<String>) -> Self {
        UnitSpec { unit: unit.into(), short_unit: None }
    }

    pub fn with_short(mut self, short_unit: impl Into<String>) -> Self {
        self.short_unit = Some(short_unit.into());
        self
    }
}

/// Operación aritmética binaria elemento a elemento.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn name(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }

    fn apply(&self, a: f64, b: f64) -> Option<f64> {
        match self {
            BinaryOp::Add => Some(a + b),
            BinaryOp::Sub => Some(a - b),
            BinaryOp::Mul => Some(a * b),
            BinaryOp::Div => {
                if b == 0.0 {
                    None
                } else {
                    Some(a / b)
                }
            }
        }
    }
}

/// Especificación de una agregación dentro de `group_by`.
#[derive(Debug, Clone)]
pub struct AggSpec {
    pub column: String,
    pub agg: AggKind,
    pub rename: Option<String>,
    pub unit: Option<UnitSpec>,
}

impl AggSpec {
    pub fn new(column: impl Into<String>, agg: AggKind) -> Self {
        AggSpec { column: column.into(),
                  agg,
                  rename: None,
                  unit: None }
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.rename = Some(name.into());
        self
    }

    pub fn with_unit(mut self, unit: UnitSpec) -> Self {
        self.unit = Some(unit);
        self
    }
}

/// Tabla con metadatos por columna. Las columnas mantienen orden de
/// inserción (IndexMap) para que la serialización y los digests sean
/// deterministas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub meta: TableMetadata,
    columns: IndexMap<String, Column>,
}

impl Table {
    pub fn new(meta: TableMetadata) -> Self {
        Table { meta, columns: IndexMap::new() }
    }

    /// Agrega una columna validando longitud y colisión de nombre.
    pub fn with_column(mut self, name: &str, values: Vec<Value>, meta: ColumnMetadata) -> Result<Self, DomainError> {
        if self.columns.contains_key(name) {
            return Err(DomainError::Validation(format!("columna duplicada: '{name}'")));
        }
        if !self.columns.is_empty() && values.len() != self.num_rows() {
            return Err(DomainError::Validation(format!("longitud inválida para '{}': {} filas, se esperaban {}",
                                                       name,
                                                       values.len(),
                                                       self.num_rows())));
        }
        self.columns.insert(name.to_string(), Column { values, meta });
        Ok(self)
    }

    /// Reconstruye una tabla desde partes ya derivadas (deserialización).
    pub fn from_parts(meta: TableMetadata, columns: IndexMap<String, Column>) -> Result<Self, DomainError> {
        let mut rows: Option<usize> = None;
        for (name, col) in &columns {
            match rows {
                None => rows = Some(col.values.len()),
                Some(n) if n != col.values.len() => {
                    return Err(DomainError::Validation(format!("longitudes desiguales: '{}' tiene {} filas, se esperaban {}",
                                                               name,
                                                               col.values.len(),
                                                               n)))
                }
                _ => {}
            }
        }
        Ok(Table { meta, columns })
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|(_, c)| c.values.len()).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.keys().map(|s| s.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Result<&Column, DomainError> {
        self.columns.get(name).ok_or_else(|| DomainError::MissingColumn(name.to_string()))
    }

    pub fn columns(&self) -> impl Iterator<Item = (&String, &Column)> {
        self.columns.iter()
    }

    pub fn value(&self, column: &str, row: usize) -> Option<&Value> {
        self.columns.get(column).and_then(|c| c.values.get(row))
    }

    /// Proyección: subconjunto de columnas en el orden pedido. Los metadatos
    /// pasan sin cambios salvo la entrada de log.
    pub fn select(&self, names: &[&str]) -> Result<Table, DomainError> {
        let mut columns = IndexMap::new();
        for &name in names {
            let col = self.column(name)?;
            let entry = ProcessingLogEntry::new("select", &[name], json!({ "selected": names }));
            columns.insert(name.to_string(),
                           Column { values: col.values.clone(),
                                    meta: col.meta.logged(entry) });
        }
        let mut meta = self.meta.clone();
        meta.primary_key.retain(|k| names.contains(&k.as_str()));
        Table::from_parts(meta, columns)
    }

    /// Renombra columnas. El título sigue al rename sólo si seguía al
    /// nombre anterior (o estaba vacío); un título curado sobrevive.
    pub fn rename(&self, renames: &[(&str, &str)]) -> Result<Table, DomainError> {
        for (from, _) in renames {
            self.column(from)?;
        }
        let map: HashMap<&str, &str> = renames.iter().copied().collect();
        let mut columns = IndexMap::new();
        for (name, col) in &self.columns {
            if let Some(&to) = map.get(name.as_str()) {
                let mut meta = col.meta.logged(ProcessingLogEntry::new("rename", &[name.as_str()], json!({ "to": to })));
                if meta.title.is_none() || meta.title.as_deref() == Some(name.as_str()) {
                    meta.title = Some(to.to_string());
                }
                columns.insert(to.to_string(), Column { values: col.values.clone(), meta });
            } else {
                columns.insert(name.clone(), col.clone());
            }
        }
        if columns.len() != self.columns.len() {
            return Err(DomainError::Validation("rename produce nombres de columna duplicados".into()));
        }
        let mut meta = self.meta.clone();
        for key in meta.primary_key.iter_mut() {
            if let Some(&to) = map.get(key.as_str()) {
                *key = to.to_string();
            }
        }
        Table::from_parts(meta, columns)
    }

    /// Filtro de filas: la procedencia no cambia (filtrar no altera el
    /// significado); cada columna registra el predicado en su log.
    pub fn filter<F>(&self, predicate: F, description: &str) -> Table
        where F: Fn(&Table, usize) -> bool
    {
        let keep: Vec<usize> = (0..self.num_rows()).filter(|&i| predicate(self, i)).collect();
        let mut columns = IndexMap::new();
        for (name, col) in &self.columns {
            let values = keep.iter().map(|&i| col.values[i].clone()).collect();
            let entry = ProcessingLogEntry::new("filter",
                                                &[name.as_str()],
                                                json!({ "predicate": description, "rows_kept": keep.len() }));
            columns.insert(name.clone(), Column { values, meta: col.meta.logged(entry) });
        }
        Table { meta: self.meta.clone(), columns }
    }

    /// Aritmética binaria elemento a elemento sobre dos columnas. La columna
    /// de salida une los origins de ambas entradas; la unidad debe venir del
    /// llamador (None la limpia y emite un warning).
    pub fn binary(&self,
                  op: BinaryOp,
                  left: &str,
                  right: &str,
                  out: &str,
                  unit: Option<UnitSpec>)
                  -> Result<Table, DomainError> {
        let l = self.column(left)?;
        let r = self.column(right)?;
        if self.columns.contains_key(out) {
            return Err(DomainError::Validation(format!("la columna de salida '{out}' ya existe")));
        }
        let values: Vec<Value> = l.values
                                  .iter()
                                  .zip(r.values.iter())
                                  .map(|(a, b)| match (a.as_f64(), b.as_f64()) {
                                      (Some(x), Some(y)) => op.apply(x, y).map(num_value).unwrap_or(Value::Null),
                                      _ => Value::Null,
                                  })
                                  .collect();
        let mut meta = ColumnMetadata::derived_from(&[&l.meta, &r.meta]);
        meta.processing_log.push(ProcessingLogEntry::new(op.name(), &[left, right], json!({ "out": out })));
        apply_unit(&mut meta, unit, out);
        let mut table = self.clone();
        table.columns.insert(out.to_string(), Column { values, meta });
        Ok(table)
    }

    /// Escala una columna por un factor constante (reemplaza sus valores).
    pub fn scale(&self, column: &str, factor: f64, unit: Option<UnitSpec>) -> Result<Table, DomainError> {
        let col = self.column(column)?;
        let values: Vec<Value> = col.values
                                    .iter()
                                    .map(|v| v.as_f64().map(|x| num_value(x * factor)).unwrap_or(Value::Null))
                                    .collect();
        let mut meta = col.meta.logged(ProcessingLogEntry::new("scale", &[column], json!({ "factor": factor })));
        apply_unit(&mut meta, unit, column);
        let mut table = self.clone();
        table.columns.insert(column.to_string(), Column { values, meta });
        Ok(table)
    }

    /// Agregación por grupos. Las columnas clave pasan sin cambios; cada
    /// agregada une (trivialmente) los origins de su fuente y exige unidad
    /// explícita salvo `First`, que es una selección y la conserva.
    pub fn group_by(&self, keys: &[&str], aggs: &[AggSpec]) -> Result<Table, DomainError> {
        for &k in keys {
            self.column(k)?;
        }
        let mut groups: IndexMap<Vec<String>, Vec<usize>> = IndexMap::new();
        for row in 0..self.num_rows() {
            groups.entry(self.row_key(keys, row)).or_default().push(row);
        }
        let mut columns: IndexMap<String, Column> = IndexMap::new();
        for &k in keys {
            let col = self.column(k)?;
            let values: Vec<Value> = groups.values().map(|rows| col.values[rows[0]].clone()).collect();
            let entry = ProcessingLogEntry::new("group_by", &[k], json!({ "keys": keys }));
            columns.insert(k.to_string(), Column { values, meta: col.meta.logged(entry) });
        }
        for spec in aggs {
            let col = self.column(&spec.column)?;
            let out_name = spec.rename.clone().unwrap_or_else(|| spec.column.clone());
            if columns.contains_key(&out_name) {
                return Err(DomainError::Validation(format!("columna agregada duplicada: '{out_name}'")));
            }
            let values: Vec<Value> = groups.values().map(|rows| aggregate(col, rows, spec.agg)).collect();
            let mut meta = ColumnMetadata::derived_from(&[&col.meta]);
            meta.title = col.meta.title.clone();
            meta.description = col.meta.description.clone();
            meta.processing_log
                .push(ProcessingLogEntry::new(spec.agg.name(), &[spec.column.as_str()], json!({ "keys": keys })));
            if matches!(spec.agg, AggKind::First) {
                meta.unit = col.meta.unit.clone();
                meta.short_unit = col.meta.short_unit.clone();
            } else {
                apply_unit(&mut meta, spec.unit.clone(), &out_name);
            }
            columns.insert(out_name, Column { values, meta });
        }
        let mut meta = self.meta.clone();
        meta.primary_key = keys.iter().map(|k| k.to_string()).collect();
        Table::from_parts(meta, columns)
    }

    /// Join interno sobre columnas clave. La cardinalidad pedida se verifica
    /// antes de materializar nada: `OneToOne` exige claves únicas en ambos
    /// lados, `OneToMany` sólo en el izquierdo. Columnas no clave repetidas
    /// entre lados son un error: el llamador renombra antes de unir.
    pub fn join(&self, other: &Table, on: &[&str], kind: JoinKind) -> Result<Table, DomainError> {
        for &k in on {
            self.column(k)?;
            other.column(k)?;
        }
        for name in other.columns.keys() {
            if !on.contains(&name.as_str()) && self.columns.contains_key(name) {
                return Err(DomainError::Validation(format!("columna '{name}' presente en ambos lados del join")));
            }
        }
        let left_keys: Vec<Vec<String>> = (0..self.num_rows()).map(|r| self.row_key(on, r)).collect();
        let right_keys: Vec<Vec<String>> = (0..other.num_rows()).map(|r| other.row_key(on, r)).collect();
        match kind {
            JoinKind::OneToOne => {
                ensure_unique(&self.meta.short_name, on, &left_keys)?;
                ensure_unique(&other.meta.short_name, on, &right_keys)?;
            }
            JoinKind::OneToMany => ensure_unique(&self.meta.short_name, on, &left_keys)?,
            JoinKind::ManyToMany => {}
        }

        let mut right_index: HashMap<&Vec<String>, Vec<usize>> = HashMap::new();
        for (i, k) in right_keys.iter().enumerate() {
            right_index.entry(k).or_default().push(i);
        }
        // pares (fila izq, fila der) del join interno, en orden del lado izquierdo
        let mut pairs: Vec<(usize, usize)> = Vec::new();
        for (li, k) in left_keys.iter().enumerate() {
            if let Some(rows) = right_index.get(k) {
                for &ri in rows {
                    pairs.push((li, ri));
                }
            }
        }

        let how = json!({ "on": on, "how": kind.as_str(), "right": other.meta.short_name });
        let mut columns = IndexMap::new();
        for (name, col) in &self.columns {
            let values = pairs.iter().map(|&(li, _)| col.values[li].clone()).collect();
            let entry = ProcessingLogEntry::new("join", &[name.as_str()], how.clone());
            columns.insert(name.clone(), Column { values, meta: col.meta.logged(entry) });
        }
        for (name, col) in &other.columns {
            if on.contains(&name.as_str()) {
                continue;
            }
            let values = pairs.iter().map(|&(_, ri)| col.values[ri].clone()).collect();
            let entry = ProcessingLogEntry::new("join", &[name.as_str()], how.clone());
            columns.insert(name.clone(), Column { values, meta: col.meta.logged(entry) });
        }
        Table::from_parts(self.meta.clone(), columns)
    }

    /// Apila filas de tablas con el mismo conjunto de columnas. Por columna,
    /// origins = unión sobre todas las fuentes y el log gana una entrada por
    /// fuente. Conflictos de unidad/título se resuelven según `policy`.
    pub fn concat(tables: &[&Table], policy: UnitConflict) -> Result<Table, DomainError> {
        let first = tables.first()
                          .ok_or_else(|| DomainError::Validation("concat requiere al menos una tabla".into()))?;
        let names: Vec<&str> = first.columns.keys().map(|s| s.as_str()).collect();
        let ours: HashSet<&str> = names.iter().copied().collect();
        for t in tables.iter().skip(1) {
            let theirs: HashSet<&str> = t.columns.keys().map(|s| s.as_str()).collect();
            if theirs != ours {
                return Err(DomainError::Validation(format!("concat requiere columnas idénticas; '{}' difiere de '{}'",
                                                           t.meta.short_name,
                                                           first.meta.short_name)));
            }
        }
        let mut columns = IndexMap::new();
        for &name in &names {
            let mut values: Vec<Value> = Vec::new();
            let mut metas: Vec<&ColumnMetadata> = Vec::new();
            for t in tables {
                let col = t.column(name)?;
                values.extend(col.values.iter().cloned());
                metas.push(&col.meta);
            }
            let (unit, short_unit) = resolve_units(name, &metas, policy)?;
            let title = resolve_titles(name, &metas, policy)?;
            let mut meta = ColumnMetadata::derived_from(&metas);
            meta.unit = unit;
            meta.short_unit = short_unit;
            meta.title = title;
            meta.description = metas.iter().find_map(|m| m.description.clone());
            for t in tables {
                meta.processing_log.push(ProcessingLogEntry::new("concat",
                                                                 &[name],
                                                                 json!({ "source": t.meta.short_name, "rows": t.num_rows() })));
            }
            columns.insert(name.to_string(), Column { values, meta });
        }
        Table::from_parts(first.meta.clone(), columns)
    }

    /// Pivote largo→ancho: crea una columna por categoría de `columns_from`.
    /// Cada columna producida copia los metadatos de la única columna fuente
    /// (`values_from`), titulada por su categoría.
    pub fn pivot(&self, index: &str, columns_from: &str, values_from: &str) -> Result<Table, DomainError> {
        let idx_col = self.column(index)?;
        let cat_col = self.column(columns_from)?;
        let val_col = self.column(values_from)?;

        let mut index_values: Vec<Value> = Vec::new();
        let mut index_pos: HashMap<String, usize> = HashMap::new();
        for v in &idx_col.values {
            let key = v.to_string();
            if !index_pos.contains_key(&key) {
                index_pos.insert(key, index_values.len());
                index_values.push(v.clone());
            }
        }
        let mut categories: Vec<String> = Vec::new();
        for v in &cat_col.values {
            let c = category_name(v);
            if !categories.contains(&c) {
                categories.push(c);
            }
        }
        let mut cells: IndexMap<String, Vec<Option<Value>>> =
            categories.iter().map(|c| (c.clone(), vec![None; index_values.len()])).collect();
        for row in 0..self.num_rows() {
            let cat = category_name(&cat_col.values[row]);
            let pos = index_pos[&idx_col.values[row].to_string()];
            let slot = &mut cells[&cat][pos];
            if slot.is_some() {
                return Err(DomainError::KeyNotUnique { table: self.meta.short_name.clone(),
                                                       keys: vec![index.to_string(), columns_from.to_string()],
                                                       first_dupes: vec![format!("({}, {})",
                                                                                 idx_col.values[row], cat)] });
            }
            *slot = Some(val_col.values[row].clone());
        }

        let mut columns = IndexMap::new();
        let idx_entry = ProcessingLogEntry::new("pivot",
                                                &[index],
                                                json!({ "columns": columns_from, "values": values_from }));
        columns.insert(index.to_string(),
                       Column { values: index_values,
                                meta: idx_col.meta.logged(idx_entry) });
        for (cat, vals) in cells {
            if columns.contains_key(&cat) {
                return Err(DomainError::Validation(format!("categoría '{cat}' colisiona con una columna existente")));
            }
            let mut meta = val_col.meta.logged(ProcessingLogEntry::new("pivot",
                                                                      &[values_from],
                                                                      json!({ "category": cat, "columns": columns_from })));
            let base = meta.title.clone().unwrap_or_else(|| values_from.to_string());
            meta.title = Some(format!("{base} ({cat})"));
            columns.insert(cat,
                           Column { values: vals.into_iter().map(|v| v.unwrap_or(Value::Null)).collect(),
                                    meta });
        }
        let mut meta = self.meta.clone();
        meta.primary_key = vec![index.to_string()];
        Table::from_parts(meta, columns)
    }

    /// Melt ancho→largo: colapsa `value_vars` en una columna de valores. Los
    /// origins de la salida son la unión sobre todas las columnas
    /// colapsadas; unidades materialmente distintas fallan bajo `Strict`.
    pub fn melt(&self,
                id_vars: &[&str],
                value_vars: &[&str],
                var_name: &str,
                value_name: &str,
                policy: UnitConflict)
                -> Result<Table, DomainError> {
        if value_vars.is_empty() {
            return Err(DomainError::Validation("melt requiere al menos una columna de valores".into()));
        }
        for &c in id_vars {
            self.column(c)?;
        }
        let mut metas: Vec<&ColumnMetadata> = Vec::new();
        for &c in value_vars {
            metas.push(&self.column(c)?.meta);
        }
        let (unit, short_unit) = resolve_units(value_name, &metas, policy)?;
        let title = resolve_titles(value_name, &metas, policy)?;

        let n = self.num_rows();
        let mut columns: IndexMap<String, Column> = IndexMap::new();
        for &idc in id_vars {
            let col = self.column(idc)?;
            let mut values = Vec::with_capacity(n * value_vars.len());
            for _ in value_vars {
                values.extend(col.values.iter().cloned());
            }
            let entry = ProcessingLogEntry::new("melt", &[idc], json!({ "value_vars": value_vars }));
            columns.insert(idc.to_string(), Column { values, meta: col.meta.logged(entry) });
        }
        let mut var_values = Vec::with_capacity(n * value_vars.len());
        let mut val_values = Vec::with_capacity(n * value_vars.len());
        for &vc in value_vars {
            let col = self.column(vc)?;
            var_values.extend(std::iter::repeat(Value::String(vc.to_string())).take(n));
            val_values.extend(col.values.iter().cloned());
        }
        if columns.contains_key(var_name) || columns.contains_key(value_name) || var_name == value_name {
            return Err(DomainError::Validation("melt: nombres de columnas de salida en conflicto".into()));
        }
        let mut var_meta = ColumnMetadata::derived_from(&metas);
        var_meta.title = Some(var_name.to_string());
        var_meta.processing_log.push(ProcessingLogEntry::new("melt", value_vars, json!({ "role": "variable" })));
        let mut val_meta = ColumnMetadata::derived_from(&metas);
        val_meta.unit = unit;
        val_meta.short_unit = short_unit;
        val_meta.title = title;
        val_meta.processing_log.push(ProcessingLogEntry::new("melt", value_vars, json!({ "role": "value" })));
        columns.insert(var_name.to_string(), Column { values: var_values, meta: var_meta });
        columns.insert(value_name.to_string(), Column { values: val_values, meta: val_meta });

        let mut meta = self.meta.clone();
        meta.primary_key = id_vars.iter()
                                  .map(|s| s.to_string())
                                  .chain(std::iter::once(var_name.to_string()))
                                  .collect();
        Table::from_parts(meta, columns)
    }

    /// Única vía para reducir origins: elimina los del producer dado y deja
    /// constancia auditable en el processing log.
    pub fn drop_origins(&self, column: &str, producer: &str) -> Result<Table, DomainError> {
        let col = self.column(column)?;
        let mut meta = col.meta.clone();
        let before = meta.origins.len();
        meta.origins.retain(|o| o.producer != producer);
        let removed = before - meta.origins.len();
        meta.processing_log.push(ProcessingLogEntry::new("drop_origins",
                                                         &[column],
                                                         json!({ "producer": producer, "removed": removed })));
        let values = col.values.clone();
        let mut table = self.clone();
        table.columns.insert(column.to_string(), Column { values, meta });
        Ok(table)
    }

    /// Verifica el invariante de clave primaria (unicidad de la combinación
    /// de columnas clave). Se invoca al adjuntar la tabla a un dataset y en
    /// el publish gate; una tabla intermedia puede violar la clave.
    pub fn check_primary_key(&self) -> Result<(), DomainError> {
        if self.meta.primary_key.is_empty() {
            return Ok(());
        }
        let keys: Vec<&str> = self.meta.primary_key.iter().map(|s| s.as_str()).collect();
        for &k in &keys {
            self.column(k)?;
        }
        let row_keys: Vec<Vec<String>> = (0..self.num_rows()).map(|r| self.row_key(&keys, r)).collect();
        match ensure_unique(&self.meta.short_name, &keys, &row_keys) {
            Err(DomainError::KeyNotUnique { table, keys, first_dupes }) => {
                Err(DomainError::DuplicateKey { table, keys, first_dupes })
            }
            other => other,
        }
    }

    /// Digest sha-256 del contenido serializado (orden de columnas estable
    /// por IndexMap). Permite comparar artefactos sin releer el catálogo.
    pub fn content_digest(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        if let Ok(bytes) = serde_json::to_vec(self) {
            hasher.update(&bytes);
        }
        format!("{:x}", hasher.finalize())
    }

    fn row_key(&self, cols: &[&str], row: usize) -> Vec<String> {
        cols.iter()
            .map(|&c| self.columns.get(c).map(|col| col.values[row].to_string()).unwrap_or_default())
            .collect()
    }
}

fn num_value(x: f64) -> Value {
    serde_json::Number::from_f64(x).map(Value::Number).unwrap_or(Value::Null)
}

fn apply_unit(meta: &mut ColumnMetadata, unit: Option<UnitSpec>, out: &str) {
    match unit {
        Some(u) => {
            meta.unit = Some(u.unit);
            meta.short_unit = u.short_unit;
        }
        None => {
            log::warn!("unidad no especificada para la columna derivada '{out}'; se limpia la unidad");
            meta.unit = None;
            meta.short_unit = None;
        }
    }
}

fn aggregate(col: &Column, rows: &[usize], agg: AggKind) -> Value {
    if let AggKind::First = agg {
        return col.values[rows[0]].clone();
    }
    let nums: Vec<f64> = rows.iter().filter_map(|&i| col.values[i].as_f64()).collect();
    if nums.is_empty() {
        return Value::Null;
    }
    let x = match agg {
        AggKind::Sum => nums.iter().sum(),
        AggKind::Mean => nums.iter().sum::<f64>() / nums.len() as f64,
        AggKind::Min => nums.iter().cloned().fold(f64::INFINITY, f64::min),
        AggKind::Max => nums.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        AggKind::First => unreachable!(),
    };
    num_value(x)
}

fn ensure_unique(table: &str, keys: &[&str], row_keys: &[Vec<String>]) -> Result<(), DomainError> {
    let mut seen: HashSet<&Vec<String>> = HashSet::new();
    let mut dupes: Vec<String> = Vec::new();
    for k in row_keys {
        if !seen.insert(k) {
            let rendered = format!("({})", k.join(", "));
            if !dupes.contains(&rendered) {
                dupes.push(rendered);
            }
            if dupes.len() >= MAX_REPORTED_KEYS {
                break;
            }
        }
    }
    if dupes.is_empty() {
        Ok(())
    } else {
        Err(DomainError::KeyNotUnique { table: table.to_string(),
                                        keys: keys.iter().map(|s| s.to_string()).collect(),
                                        first_dupes: dupes })
    }
}

fn resolve_units(column: &str,
                 metas: &[&ColumnMetadata],
                 policy: UnitConflict)
                 -> Result<(Option<String>, Option<String>), DomainError> {
    let mut distinct: Vec<&str> = Vec::new();
    for m in metas {
        if let Some(u) = m.unit.as_deref() {
            if !distinct.contains(&u) {
                distinct.push(u);
            }
        }
    }
    if distinct.len() > 1 && matches!(policy, UnitConflict::Strict) {
        return Err(DomainError::IncompatibleReshape(format!("unidades en conflicto para '{column}': {distinct:?}")));
    }
    let chosen = metas.iter().find(|m| m.unit.is_some());
    Ok((chosen.and_then(|m| m.unit.clone()), chosen.and_then(|m| m.short_unit.clone())))
}

fn resolve_titles(column: &str, metas: &[&ColumnMetadata], policy: UnitConflict) -> Result<Option<String>, DomainError> {
    let mut distinct: Vec<&str> = Vec::new();
    for m in metas {
        if let Some(t) = m.title.as_deref() {
            if !distinct.contains(&t) {
                distinct.push(t);
            }
        }
    }
    if distinct.len() > 1 && matches!(policy, UnitConflict::Strict) {
        return Err(DomainError::IncompatibleReshape(format!("títulos en conflicto para '{column}': {distinct:?}")));
    }
    Ok(metas.iter().find_map(|m| m.title.clone()))
}

fn category_name(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
