//! Pipeline de demostración `meadow/demo -> garden/demo`.
//!
//! El snapshot external trae dos series con origins distintos; el step
//! garden renombra una columna y computa un ratio cuya procedencia es la
//! unión de ambas fuentes. Es el escenario de referencia usado por la CLI
//! y los tests de integración.

use serde_json::json;
use std::sync::Arc;

use atlas_core::errors::CoreEngineError;
use atlas_core::graph::StepSpec;
use atlas_core::step::{ExecutionContext, FnTransform, StepKind, TransformRegistry};
use atlas_domain::{BinaryOp, ColumnMetadata, Dataset, DatasetMetadata, Origin, Table, TableMetadata, UnitSpec};

pub const MEADOW_DEMO: &str = "meadow/demo/2024-01-01/demo";
pub const GARDEN_DEMO: &str = "garden/demo/2024-01-01/demo";

/// Grafo declarativo del demo: un snapshot external y un step garden.
pub fn demo_specs() -> Vec<StepSpec> {
    vec![StepSpec { namespace: "demo".into(),
                    channel: "meadow".into(),
                    version: "2024-01-01".into(),
                    short_name: "demo".into(),
                    kind: StepKind::External,
                    dependencies: vec![] },
         StepSpec { namespace: "demo".into(),
                    channel: "garden".into(),
                    version: "2024-01-01".into(),
                    short_name: "demo".into(),
                    kind: StepKind::Data,
                    dependencies: vec![MEADOW_DEMO.into()] }]
}

/// Payload del snapshot del demo, con un origin declarado por columna (el
/// registro de un snapshot es el momento en que nacen los `Origin`).
pub fn demo_snapshot_payload() -> serde_json::Value {
    json!({
        "columns": {
            "country": ["ar", "br", "cl"],
            "x": [10.0, 40.0, 30.0],
            "y": [2.0, 8.0, 5.0]
        },
        "origins": {
            "country": { "producer": "demo-census", "title": "Demo country register" },
            "x": { "producer": "producer-x", "title": "X series" },
            "y": { "producer": "producer-y", "title": "Y series" }
        }
    })
}

fn garden_demo_transform(ctx: &ExecutionContext) -> Result<Dataset, CoreEngineError> {
    let snap = ctx.snapshot(MEADOW_DEMO)?;
    let origin_for = |col: &str| -> Result<Origin, CoreEngineError> {
        serde_json::from_value(snap.payload["origins"][col].clone())
            .map_err(|e| CoreEngineError::Internal(format!("origin inválido para '{col}': {e}")))
    };
    let values_for = |col: &str| snap.payload["columns"][col].as_array().cloned().unwrap_or_default();

    let table = Table::new(TableMetadata::new("demo").with_primary_key(&["country"]))
        .with_column("country", values_for("country"), ColumnMetadata::new().with_origin(origin_for("country")?))?
        .with_column("x",
                     values_for("x"),
                     ColumnMetadata::new().with_origin(origin_for("x")?).with_unit("units of x", None))?
        .with_column("y",
                     values_for("y"),
                     ColumnMetadata::new().with_origin(origin_for("y")?).with_unit("units of y", None))?
        .rename(&[("x", "gdp")])?
        .binary(BinaryOp::Div, "gdp", "y", "ratio", Some(UnitSpec::new("x per y")))?;

    let mut ds = Dataset::create(DatasetMetadata::new("garden", "demo", "2024-01-01", "demo").public());
    ds.add(table)?;
    Ok(ds)
}

/// Registry explícito con los transforms del demo; el llamador lo pasa al
/// scheduler (no hay registro global de proceso).
pub fn builtin_registry() -> Result<TransformRegistry, CoreEngineError> {
    let mut registry = TransformRegistry::new();
    registry.register(GARDEN_DEMO.parse()?,
                      Arc::new(FnTransform::new("garden-demo-v1", garden_demo_transform)));
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_core::step::{Snapshot, StepId};
    use atlas_core::hashing::hash_value;
    use std::collections::HashMap;

    fn demo_ctx() -> ExecutionContext {
        let id: StepId = MEADOW_DEMO.parse().unwrap();
        let payload = demo_snapshot_payload();
        let mut snapshots = HashMap::new();
        snapshots.insert(id.clone(),
                         Snapshot { id,
                                    checksum: hash_value(&payload),
                                    payload });
        ExecutionContext { step: GARDEN_DEMO.parse().unwrap(),
                           datasets: HashMap::new(),
                           snapshots }
    }

    #[test]
    fn el_ratio_une_ambos_origins() {
        let ds = garden_demo_transform(&demo_ctx()).expect("transform");
        assert_eq!(ds.meta.uri(), GARDEN_DEMO);
        let table = ds.table("demo").unwrap();
        let ratio = table.column("ratio").unwrap();
        let producers: Vec<&str> = ratio.meta.origins.iter().map(|o| o.producer.as_str()).collect();
        assert_eq!(producers, vec!["producer-x", "producer-y"]);
        let entry = ratio.meta.processing_log.iter().find(|e| e.operation == "div").expect("log div");
        assert_eq!(entry.columns, vec!["gdp".to_string(), "y".to_string()]);
        assert_eq!(ratio.values[0], json!(5.0));
        // la columna renombrada conserva su origin original
        let gdp = table.column("gdp").unwrap();
        assert_eq!(gdp.meta.origins[0].producer, "producer-x");
    }

    #[test]
    fn el_demo_pasa_el_publish_gate() {
        let ds = garden_demo_transform(&demo_ctx()).expect("transform");
        assert!(ds.check_publishable().is_ok());
    }

    #[test]
    fn registry_cubre_el_grafo() {
        let registry = builtin_registry().expect("registry");
        assert!(registry.get(&GARDEN_DEMO.parse().unwrap()).is_some());
        assert_eq!(registry.len(), 1);
    }
}
