//! Constantes del motor.

/// Versión lógica del motor. Participa en los checksums de definición para
/// que un cambio de semántica del scheduler invalide el BuildRecord.
pub const ENGINE_VERSION: &str = "1";
