// atlas-domain library entry point
pub mod dataset;
pub mod error;
pub mod metadata;
pub mod origin;
pub mod table;
pub use dataset::Dataset;
pub use error::DomainError;
pub use metadata::{ColumnMetadata, DatasetMetadata, ProcessingLogEntry, TableMetadata};
pub use origin::{union_origins, License, Origin};
pub use table::{AggKind, AggSpec, BinaryOp, Column, JoinKind, Table, UnitConflict, UnitSpec};
