//! Transforms concretos mantenidos fuera del core.

pub mod demo;

pub use demo::{builtin_registry, demo_snapshot_payload, demo_specs, GARDEN_DEMO, MEADOW_DEMO};
