//! Scheduler de builds incrementales sobre el DAG de steps.
//!
//! Máquina de estados por step:
//! `Unresolved -> Resolved -> Stale|Fresh -> Running -> Succeeded|Failed`,
//! más `Skipped` para el cierre transitivo de dependientes de una falla.
//! (`Unresolved` colapsa en `Resolved` al validar el grafo: un `StepGraph`
//! cargado ya tiene toda referencia resuelta.)
//!
//! Modelo de concurrencia: cada step listo (Stale con todas sus
//! dependencias en terminal exitoso) se despacha como tarea bloqueante
//! independiente a un pool acotado por semáforo; los resultados vuelven por
//! un canal mpsc y el scheduler los consume de a uno, por lo que el
//! BuildRecord tiene escritor único. Dos steps sin relación de dependencia
//! corren en paralelo; un step y sus dependientes transitivos jamás
//! coinciden, garantizado por la compuerta de dependencias y no por locks.
//! La lógica interna de cada step es síncrona y monohilo.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

use atlas_domain::Dataset;

use crate::catalog::{CatalogStore, SnapshotStore};
use crate::checksum::compute_checksums;
use crate::errors::CoreEngineError;
use crate::executor::StepExecutor;
use crate::graph::{StepGraph, StepNode};
use crate::record::BuildRecordStore;
use crate::report::{FailedStep, RunSummary, SkippedStep};
use crate::step::{ExecutionContext, Snapshot, StepId, StepKind, StepState, StepTransform, TransformRegistry};

/// Opciones de la corrida.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Ancho del pool de workers.
    pub workers: usize,
    /// Ignora el BuildRecord y reconstruye todo.
    pub force: bool,
    /// Timeout por step; excederlo es una falla específica (`Timeout`),
    /// nunca un reintento silencioso inline.
    pub step_timeout: Option<Duration>,
    /// Deadline global: al vencer no se agenda ningún step nuevo; los que
    /// ya corren pueden terminar y publicarse.
    pub deadline: Option<Duration>,
    /// Reintentos acotados para fallas transitorias (timeout, IO).
    pub max_retries: u32,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        SchedulerOptions { workers,
                           force: false,
                           step_timeout: None,
                           deadline: None,
                           max_retries: 1 }
    }
}

struct WorkerResult {
    step: StepId,
    outcome: Result<(String, Dataset), CoreEngineError>,
}

pub struct BuildScheduler {
    graph: StepGraph,
    registry: Arc<TransformRegistry>,
    catalog: Arc<dyn CatalogStore>,
    snapshots: Arc<dyn SnapshotStore>,
    record: Arc<dyn BuildRecordStore>,
    options: SchedulerOptions,
}

impl BuildScheduler {
    pub fn new(graph: StepGraph,
               registry: TransformRegistry,
               catalog: Arc<dyn CatalogStore>,
               snapshots: Arc<dyn SnapshotStore>,
               record: Arc<dyn BuildRecordStore>)
               -> Self {
        BuildScheduler { graph,
                         registry: Arc::new(registry),
                         catalog,
                         snapshots,
                         record,
                         options: SchedulerOptions::default() }
    }

    pub fn with_options(mut self, options: SchedulerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn graph(&self) -> &StepGraph {
        &self.graph
    }

    /// Corre una pasada completa: triage de frescura por checksum, despacho
    /// concurrente de steps stale y reporte agregado. Un error retornado
    /// aquí es fatal de scheduler (registro no escribible, grafo sin
    /// transform); las fallas por step van dentro del `RunSummary`.
    pub async fn run(&self) -> Result<RunSummary, CoreEngineError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let checksums = compute_checksums(&self.graph, &self.registry, self.snapshots.as_ref())?;
        let prior = self.record.load()?;

        let mut state: HashMap<StepId, StepState> = HashMap::new();
        for node in self.graph.iter() {
            let fresh = match node.kind {
                // checksum precalculado fuera del grafo: siempre al día
                StepKind::External => true,
                StepKind::Data => {
                    !self.options.force
                    && prior.get(&node.id).map(|e| e.checksum == checksums[&node.id]).unwrap_or(false)
                    && self.catalog.verify(&node.id)
                }
            };
            state.insert(node.id.clone(), if fresh { StepState::Fresh } else { StepState::Stale });
        }
        log::debug!("run {run_id}: {} steps, {} stale",
                    self.graph.len(),
                    state.values().filter(|s| **s == StepState::Stale).count());

        let cache: Arc<DashMap<String, Arc<Dataset>>> = Arc::new(DashMap::new());
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let executor = Arc::new(StepExecutor::new(self.catalog.clone()));
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerResult>();
        let deadline = self.options.deadline.map(|d| tokio::time::Instant::now() + d);

        let mut attempts: HashMap<StepId, u32> = HashMap::new();
        let mut in_flight: usize = 0;
        let mut executed: Vec<String> = Vec::new();
        let mut failed: Vec<FailedStep> = Vec::new();
        let mut skipped: Vec<SkippedStep> = Vec::new();

        loop {
            let stopped = deadline.map(|d| tokio::time::Instant::now() >= d).unwrap_or(false);

            if !stopped {
                let ready: Vec<&StepNode> =
                    self.graph
                        .iter()
                        .filter(|n| state[&n.id] == StepState::Stale)
                        .filter(|n| n.dependencies.iter().all(|d| state[d].is_terminal_ok()))
                        .collect();
                for node in ready {
                    state.insert(node.id.clone(), StepState::Running);
                    *attempts.entry(node.id.clone()).or_insert(0) += 1;
                    in_flight += 1;
                    self.dispatch(node, &cache, &semaphore, &executor, tx.clone());
                }
            }

            if in_flight == 0 {
                break;
            }

            let result = match rx.recv().await {
                Some(r) => r,
                None => break,
            };
            in_flight -= 1;

            match result.outcome {
                Ok((checksum, dataset)) => {
                    // durabilidad primero: el registro se persiste antes de
                    // que cualquier dependiente pueda observar Succeeded
                    self.record.record(&result.step, &checksum)?;
                    cache.insert(result.step.uri(), Arc::new(dataset));
                    state.insert(result.step.clone(), StepState::Succeeded);
                    executed.push(result.step.uri());
                }
                Err(err) => {
                    let retryable = err.is_transient()
                                    && attempts.get(&result.step).copied().unwrap_or(0) <= self.options.max_retries
                                    && !stopped;
                    if retryable {
                        log::warn!("step {} falló de forma transitoria, se reintenta: {err}",
                                   result.step.uri());
                        state.insert(result.step.clone(), StepState::Stale);
                    } else {
                        log::error!("step {} falló: {err}", result.step.uri());
                        state.insert(result.step.clone(), StepState::Failed);
                        failed.push(FailedStep { step: result.step.uri(),
                                                 kind: err.failure_kind(),
                                                 message: err.to_string() });
                        // el cierre descendiente completo se saltea; las
                        // ramas hermanas siguen hasta completarse
                        for dep in self.graph.dependents(&result.step) {
                            if !state[&dep].is_terminal() && state[&dep] != StepState::Running {
                                state.insert(dep.clone(), StepState::Skipped);
                                skipped.push(SkippedStep { step: dep.uri(),
                                                           blocked_on: result.step.uri() });
                            }
                        }
                    }
                }
            }
        }

        // steps que el deadline dejó sin agendar
        for node in self.graph.iter() {
            if state[&node.id] == StepState::Stale {
                state.insert(node.id.clone(), StepState::Skipped);
                skipped.push(SkippedStep { step: node.id.uri(),
                                           blocked_on: "deadline".into() });
            }
        }

        let fresh = self.graph
                        .iter()
                        .filter(|n| n.kind == StepKind::Data && state[&n.id] == StepState::Fresh)
                        .map(|n| n.id.uri())
                        .collect();
        Ok(RunSummary { run_id,
                        started_at,
                        finished_at: Utc::now(),
                        executed,
                        fresh,
                        failed,
                        skipped })
    }

    fn dispatch(&self,
                node: &StepNode,
                cache: &Arc<DashMap<String, Arc<Dataset>>>,
                semaphore: &Arc<Semaphore>,
                executor: &Arc<StepExecutor>,
                tx: mpsc::UnboundedSender<WorkerResult>) {
        let step = node.id.clone();
        let deps = node.dependencies.clone();
        let dep_kinds: Vec<StepKind> = node.dependencies
                                           .iter()
                                           .map(|d| self.graph.get(d).map(|n| n.kind).unwrap_or(StepKind::Data))
                                           .collect();
        let transform = self.registry.get(&node.id).cloned();
        let catalog = self.catalog.clone();
        let snapshots = self.snapshots.clone();
        let cache = cache.clone();
        let semaphore = semaphore.clone();
        let executor = executor.clone();
        let timeout = self.options.step_timeout;

        tokio::spawn(async move {
            // un worker bloquea únicamente esperando slot libre en el pool
            let _permit = semaphore.acquire_owned().await;
            let id = step.clone();
            let handle = tokio::task::spawn_blocking(move || {
                run_one(step, transform, deps, dep_kinds, catalog, snapshots, cache, executor)
            });
            let outcome = match timeout {
                Some(dur) => match tokio::time::timeout(dur, handle).await {
                    Ok(joined) => flatten_join(joined),
                    // el hilo bloqueante sigue, pero su resultado se
                    // descarta: nunca se promueve un step vencido
                    Err(_) => Err(CoreEngineError::Timeout { step: id.uri(),
                                                            seconds: dur.as_secs() }),
                },
                None => flatten_join(handle.await),
            };
            let _ = tx.send(WorkerResult { step: id, outcome });
        });
    }
}

/// Resuelve dependencias (cache de la corrida o catálogo para datasets,
/// fetch para snapshots), arma el contexto explícito y ejecuta.
#[allow(clippy::too_many_arguments)]
fn run_one(step: StepId,
           transform: Option<Arc<dyn StepTransform>>,
           deps: Vec<StepId>,
           dep_kinds: Vec<StepKind>,
           catalog: Arc<dyn CatalogStore>,
           snapshots: Arc<dyn SnapshotStore>,
           cache: Arc<DashMap<String, Arc<Dataset>>>,
           executor: Arc<StepExecutor>)
           -> Result<(String, Dataset), CoreEngineError> {
    let transform = transform.ok_or_else(|| CoreEngineError::MissingTransform(step.uri()))?;
    let mut datasets: HashMap<StepId, Arc<Dataset>> = HashMap::new();
    let mut snaps: HashMap<StepId, Snapshot> = HashMap::new();
    for (dep, kind) in deps.into_iter().zip(dep_kinds) {
        match kind {
            StepKind::External => {
                snaps.insert(dep.clone(), snapshots.fetch(&dep)?);
            }
            StepKind::Data => {
                let dataset = match cache.get(&dep.uri()) {
                    Some(hit) => hit.value().clone(),
                    None => {
                        let loaded = Arc::new(catalog.load(&dep)?);
                        cache.insert(dep.uri(), loaded.clone());
                        loaded
                    }
                };
                datasets.insert(dep.clone(), dataset);
            }
        }
    }
    let ctx = ExecutionContext { step: step.clone(),
                                 datasets,
                                 snapshots: snaps };
    executor.execute(&step, &transform, &ctx)
}

fn flatten_join(res: Result<Result<(String, Dataset), CoreEngineError>, tokio::task::JoinError>)
                -> Result<(String, Dataset), CoreEngineError> {
    match res {
        Ok(inner) => inner,
        // un panic de la lógica externa se captura como falla del step
        Err(e) => Err(CoreEngineError::Internal(format!("worker abortado: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, InMemorySnapshotStore};
    use crate::errors::FailureKind;
    use crate::graph::StepSpec;
    use crate::record::InMemoryBuildRecord;
    use crate::step::FnTransform;
    use atlas_domain::{ColumnMetadata, Dataset, DatasetMetadata, Origin, Table, TableMetadata};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn spec(uri: &str, kind: StepKind, deps: &[&str]) -> StepSpec {
        let id: StepId = uri.parse().unwrap();
        StepSpec { namespace: id.namespace.clone(),
                   channel: id.channel.clone(),
                   version: id.version.clone(),
                   short_name: id.short_name.clone(),
                   kind,
                   dependencies: deps.iter().map(|d| d.to_string()).collect() }
    }

    fn publishable(uri: &str) -> Dataset {
        let id: StepId = uri.parse().unwrap();
        let mut ds = Dataset::create(DatasetMetadata::new(&id.channel,
                                                          &id.namespace,
                                                          &id.version,
                                                          &id.short_name));
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

    fn scheduler(graph: StepGraph, registry: TransformRegistry) -> BuildScheduler {
        BuildScheduler::new(graph,
                            registry,
                            Arc::new(InMemoryCatalog::new()),
                            Arc::new(InMemorySnapshotStore::new()),
                            Arc::new(InMemoryBuildRecord::new()))
    }

    #[tokio::test]
    async fn segunda_corrida_queda_fresca_y_no_ejecuta_nada() {
        let specs = vec![spec("garden/ns/1/a", StepKind::Data, &[]),
                         spec("grapher/ns/1/b", StepKind::Data, &["garden/ns/1/a"])];
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = TransformRegistry::new();
        registry.register("garden/ns/1/a".parse().unwrap(), ok_transform("ha", counter.clone()));
        registry.register("grapher/ns/1/b".parse().unwrap(), ok_transform("hb", counter.clone()));
        let sched = scheduler(StepGraph::load(&specs).unwrap(), registry);

        let first = sched.run().await.expect("primera corrida");
        assert!(first.ok(), "{}", first.render());
        assert_eq!(first.executed.len(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        let second = sched.run().await.expect("segunda corrida");
        assert!(second.executed.is_empty(), "{}", second.render());
        assert_eq!(second.fresh.len(), 2);
        // cero lógica de transformación ejecutada la segunda vez
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn falla_aislada_saltea_solo_su_subarbol() {
        // A y B independientes; C depende de A, D depende de B
        let specs = vec![spec("garden/ns/1/a", StepKind::Data, &[]),
                         spec("garden/ns/1/b", StepKind::Data, &[]),
                         spec("grapher/ns/1/c", StepKind::Data, &["garden/ns/1/a"]),
                         spec("grapher/ns/1/d", StepKind::Data, &["garden/ns/1/b"])];
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = TransformRegistry::new();
        registry.register("garden/ns/1/a".parse().unwrap(),
                          Arc::new(FnTransform::new("ha", |_ctx| {
                              Err(CoreEngineError::Internal("lógica rota".into()))
                          })));
        registry.register("garden/ns/1/b".parse().unwrap(), ok_transform("hb", counter.clone()));
        registry.register("grapher/ns/1/c".parse().unwrap(), ok_transform("hc", counter.clone()));
        registry.register("grapher/ns/1/d".parse().unwrap(), ok_transform("hd", counter.clone()));
        let sched = scheduler(StepGraph::load(&specs).unwrap(), registry);

        let summary = sched.run().await.expect("corrida");
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].step, "garden/ns/1/a");
        assert_eq!(summary.failed[0].kind, FailureKind::Transform);
        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].step, "grapher/ns/1/c");
        assert_eq!(summary.skipped[0].blocked_on, "garden/ns/1/a");
        // B y D terminaron igual
        assert!(summary.executed.contains(&"garden/ns/1/b".to_string()));
        assert!(summary.executed.contains(&"grapher/ns/1/d".to_string()));
    }

    #[tokio::test]
    async fn falla_no_registrada_se_reintenta_en_la_proxima_corrida() {
        let specs = vec![spec("garden/ns/1/a", StepKind::Data, &[])];
        let record: Arc<InMemoryBuildRecord> = Arc::new(InMemoryBuildRecord::new());
        let mut registry = TransformRegistry::new();
        registry.register("garden/ns/1/a".parse().unwrap(),
                          Arc::new(FnTransform::new("ha", |_ctx| {
                              Err(CoreEngineError::Internal("lógica rota".into()))
                          })));
        let sched = BuildScheduler::new(StepGraph::load(&specs).unwrap(),
                                        registry,
                                        Arc::new(InMemoryCatalog::new()),
                                        Arc::new(InMemorySnapshotStore::new()),
                                        record.clone());
        let summary = sched.run().await.expect("corrida");
        assert_eq!(summary.failed.len(), 1);
        // el BuildRecord queda intacto para el step fallido
        assert!(record.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn force_reconstruye_lo_fresco() {
        let specs = vec![spec("garden/ns/1/a", StepKind::Data, &[])];
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = TransformRegistry::new();
        registry.register("garden/ns/1/a".parse().unwrap(), ok_transform("ha", counter.clone()));
        let sched = scheduler(StepGraph::load(&specs).unwrap(), registry)
            .with_options(SchedulerOptions { force: true, ..Default::default() });

        sched.run().await.expect("primera");
        sched.run().await.expect("segunda");
        assert_eq!(counter.load(Ordering::SeqCst), 2, "force ignora el registro");
    }

    #[tokio::test]
    async fn timeout_es_falla_transitoria() {
        let specs = vec![spec("garden/ns/1/lento", StepKind::Data, &[])];
        let mut registry = TransformRegistry::new();
        registry.register("garden/ns/1/lento".parse().unwrap(),
                          Arc::new(FnTransform::new("h", |ctx: &ExecutionContext| {
                              std::thread::sleep(Duration::from_millis(300));
                              Ok(publishable(&ctx.step.uri()))
                          })));
        let sched = scheduler(StepGraph::load(&specs).unwrap(), registry)
            .with_options(SchedulerOptions { step_timeout: Some(Duration::from_millis(20)),
                                             max_retries: 0,
                                             ..Default::default() });
        let summary = sched.run().await.expect("corrida");
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].kind, FailureKind::Transient);
        assert!(summary.failed[0].message.contains("timeout"));
    }

    #[tokio::test]
    async fn panic_de_la_logica_externa_no_tumba_la_corrida() {
        let specs = vec![spec("garden/ns/1/a", StepKind::Data, &[]),
                         spec("garden/ns/1/b", StepKind::Data, &[])];
        let counter = Arc::new(AtomicUsize::new(0));
        let mut registry = TransformRegistry::new();
        registry.register("garden/ns/1/a".parse().unwrap(),
                          Arc::new(FnTransform::new("ha", |_ctx| -> Result<Dataset, CoreEngineError> {
                              panic!("colaborador externo con pánico")
                          })));
        registry.register("garden/ns/1/b".parse().unwrap(), ok_transform("hb", counter.clone()));
        let sched = scheduler(StepGraph::load(&specs).unwrap(), registry);
        let summary = sched.run().await.expect("corrida");
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.executed, vec!["garden/ns/1/b".to_string()]);
    }
}
