//! atlas-core: motor de build incremental del catálogo de datos.
//!
//! Carga un grafo declarativo de steps, calcula checksums de definición con
//! propagación transitiva, decide qué está stale contra el BuildRecord y
//! ejecuta los steps pendientes en un pool acotado, publicando cada dataset
//! a través del publish gate del catálogo.
pub mod catalog;
pub mod checksum;
pub mod constants;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod hashing;
pub mod record;
pub mod report;
pub mod scheduler;
pub mod step;

pub use catalog::{CatalogError, CatalogStore, InMemoryCatalog, InMemorySnapshotStore, SnapshotStore};
pub use checksum::compute_checksums;
pub use errors::{CoreEngineError, FailureKind};
pub use executor::StepExecutor;
pub use graph::{StepGraph, StepNode, StepSpec};
pub use record::{BuildRecord, BuildRecordStore, InMemoryBuildRecord, RecordEntry};
pub use report::{FailedStep, RunSummary, SkippedStep};
pub use scheduler::{BuildScheduler, SchedulerOptions};
pub use step::{ExecutionContext, FnTransform, Snapshot, StepId, StepKind, StepState, StepTransform, TransformRegistry};
