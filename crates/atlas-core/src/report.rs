//! Resumen agregado de una corrida del scheduler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::FailureKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedStep {
    pub step: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedStep {
    pub step: String,
    /// El step fallido (o `deadline`) que bloqueó a éste.
    pub blocked_on: String,
}

/// Resultado agregado de una pasada. El scheduler completa el resto del
/// grafo y reporta, en vez de abortar a la primera falla; el detalle
/// alcanza para re-ejecutar sólo el subárbol fallido después de un fix,
/// sin recomputar lo que quedó fresco.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Steps ejecutados y publicados en esta corrida.
    pub executed: Vec<String>,
    /// Steps que no necesitaron ejecutarse (checksum y catálogo al día).
    pub fresh: Vec<String>,
    pub failed: Vec<FailedStep>,
    pub skipped: Vec<SkippedStep>,
}

impl RunSummary {
    pub fn ok(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Render multilinea para binarios; las librerías reportan vía `log`.
    pub fn render(&self) -> String {
        let mut out = format!("run {}: {} ejecutados, {} frescos, {} fallidos, {} salteados\n",
                              self.run_id,
                              self.executed.len(),
                              self.fresh.len(),
                              self.failed.len(),
                              self.skipped.len());
        for f in &self.failed {
            out.push_str(&format!("  FALLO [{}] {}: {}\n", f.kind, f.step, f.message));
        }
        for s in &self.skipped {
            out.push_str(&format!("  SALTEADO {} (bloqueado por {})\n", s.step, s.blocked_on));
        }
        out
    }
}
