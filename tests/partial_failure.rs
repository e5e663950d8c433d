//! Tolerancia a fallas parciales: el grafo abarca ramas independientes y
//! una falla sólo saltea su propio cierre descendiente.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use atlas_core::{BuildRecordStore, BuildScheduler, CoreEngineError, ExecutionContext, FnTransform,
                 InMemoryBuildRecord, InMemoryCatalog, InMemorySnapshotStore, StepGraph, StepId, StepKind, StepSpec,
                 StepTransform, TransformRegistry};
use atlas_domain::{ColumnMetadata, Dataset, DatasetMetadata, Origin, Table, TableMetadata};
use serde_json::json;

fn spec(uri: &str, deps: &[&str]) -> StepSpec {
    let id: StepId = uri.parse().unwrap();
    StepSpec { namespace: id.namespace.clone(),
               channel: id.channel.clone(),
               version: id.version.clone(),
               short_name: id.short_name.clone(),
               kind: StepKind::Data,
               dependencies: deps.iter().map(|d| d.to_string()).collect() }
}

fn publishable(uri: &str) -> Dataset {
    let id: StepId = uri.parse().unwrap();
    let mut ds = Dataset::create(DatasetMetadata::new(&id.channel, &id.namespace, &id.version, &id.short_name));
    let table = Table::new(TableMetadata::new("t"))
        .with_column("v", vec![json!(1)], ColumnMetadata::new().with_origin(Origin::new("p", "t")))
        .expect("col");
    ds.add(table).expect("add");
    ds
}

fn ok_transform(hash: &str, counter: Arc<AtomicUsize>) -> Arc<dyn StepTransform> {
    Arc::new(FnTransform::new(hash.to_string(), move |ctx: &ExecutionContext| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(publishable(&ctx.step.uri()))
    }))
}

fn failing_transform(hash: &str) -> Arc<dyn StepTransform> {
    Arc::new(FnTransform::new(hash.to_string(), |_ctx: &ExecutionContext| -> Result<Dataset, CoreEngineError> {
        Err(CoreEngineError::Internal("transformación rota".into()))
    }))
}

#[tokio::test]
async fn la_rama_fallida_se_saltea_y_las_hermanas_completan() {
    // A y B independientes; C depende de A; D depende de B
    let specs = vec![spec("garden/ns/1/a", &[]),
                     spec("garden/ns/1/b", &[]),
                     spec("grapher/ns/1/c", &["garden/ns/1/a"]),
                     spec("grapher/ns/1/d", &["garden/ns/1/b"])];
    let counter = Arc::new(AtomicUsize::new(0));
    let mut registry = TransformRegistry::new();
    registry.register("garden/ns/1/a".parse().unwrap(), failing_transform("ha"));
    registry.register("garden/ns/1/b".parse().unwrap(), ok_transform("hb", counter.clone()));
    registry.register("grapher/ns/1/c".parse().unwrap(), ok_transform("hc", counter.clone()));
    registry.register("grapher/ns/1/d".parse().unwrap(), ok_transform("hd", counter.clone()));

    let record = Arc::new(InMemoryBuildRecord::new());
    let sched = BuildScheduler::new(StepGraph::load(&specs).expect("grafo"),
                                    registry,
                                    Arc::new(InMemoryCatalog::new()),
                                    Arc::new(InMemorySnapshotStore::new()),
                                    record.clone());

    let summary = sched.run().await.expect("corrida");
    assert_eq!(summary.failed.len(), 1, "{}", summary.render());
    assert_eq!(summary.failed[0].step, "garden/ns/1/a");
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].step, "grapher/ns/1/c");
    assert_eq!(summary.skipped[0].blocked_on, "garden/ns/1/a");
    assert!(summary.executed.contains(&"garden/ns/1/b".to_string()));
    assert!(summary.executed.contains(&"grapher/ns/1/d".to_string()));
    assert_eq!(counter.load(Ordering::SeqCst), 2, "sólo B y D ejecutaron");

    // el registro quedó intacto para la rama fallida: B y D registrados,
    // A y C no
    let stored = record.load().unwrap();
    assert!(stored.get(&"garden/ns/1/b".parse().unwrap()).is_some());
    assert!(stored.get(&"grapher/ns/1/d".parse().unwrap()).is_some());
    assert!(stored.get(&"garden/ns/1/a".parse().unwrap()).is_none());
    assert!(stored.get(&"grapher/ns/1/c".parse().unwrap()).is_none());

    // la corrida siguiente reintenta sólo la rama fallida
    let second = sched.run().await.expect("segunda corrida");
    assert_eq!(second.failed.len(), 1);
    assert_eq!(second.fresh.len(), 2, "{}", second.render());
    assert_eq!(counter.load(Ordering::SeqCst), 2, "B y D no se re-ejecutan");
}

#[test]
fn un_ciclo_impide_ejecutar_cualquier_step() {
    let err = StepGraph::load(&[spec("garden/ns/1/a", &["garden/ns/1/b"]),
                                spec("garden/ns/1/b", &["garden/ns/1/c"]),
                                spec("garden/ns/1/c", &["garden/ns/1/a"])]).unwrap_err();
    match err {
        CoreEngineError::CyclicDependency { cycle } => {
            for s in ["garden/ns/1/a", "garden/ns/1/b", "garden/ns/1/c"] {
                assert!(cycle.iter().any(|c| c == s), "falta {s} en {cycle:?}");
            }
        }
        other => panic!("se esperaba CyclicDependency, hubo {other}"),
    }
}
