//! atlas-adapters: colaboradores concretos en el borde del motor.
//!
//! - `snapshot`: object store local de blobs crudos con checksum
//!   precalculado en sidecar.
//! - `steps`: transforms de demostración registrados explícitamente,
//!   usados por la CLI y los tests de integración.
pub mod snapshot;
pub mod steps;

pub use snapshot::LocalSnapshotStore;
pub use steps::{builtin_registry, demo_snapshot_payload, demo_specs, GARDEN_DEMO, MEADOW_DEMO};
