//! Ejecución controlada de un step individual.

use std::sync::Arc;

use atlas_domain::Dataset;

use crate::catalog::CatalogStore;
use crate::errors::CoreEngineError;
use crate::step::{ExecutionContext, StepId, StepTransform};

/// Corre la lógica externa de un step sobre sus dependencias ya resueltas,
/// valida el resultado contra sus contratos y lo publica en el catálogo.
///
/// Cualquier error de la lógica externa, o fatal de las capas de tabla /
/// dataset (procedencia faltante, claves duplicadas, checksum
/// inconsistente), se captura, se registra con contexto completo y aflora
/// al scheduler como el `Failed` de ese step. El executor nunca degrada un
/// error de corrección de datos a warning.
pub struct StepExecutor {
    catalog: Arc<dyn CatalogStore>,
}

impl StepExecutor {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        StepExecutor { catalog }
    }

    /// Ejecuta y publica; devuelve el checksum del dataset publicado junto
    /// con el dataset (para el cache de la corrida).
    pub fn execute(&self,
                   step: &StepId,
                   transform: &Arc<dyn StepTransform>,
                   ctx: &ExecutionContext)
                   -> Result<(String, Dataset), CoreEngineError> {
        let dataset = transform.run(ctx).map_err(|e| {
                                            log::error!("step {} falló en la transformación: {e}", step.uri());
                                            e
                                        })?;
        let produced = dataset.meta.uri();
        if produced != step.uri() {
            let err = CoreEngineError::WrongOutputIdentity { step: step.uri(), found: produced };
            log::error!("{err}");
            return Err(err);
        }
        let checksum = self.catalog.save(&dataset).map_err(|e| {
                                                      log::error!("step {} falló en el publish gate: {e}", step.uri());
                                                      CoreEngineError::from(e)
                                                  })?;
        log::debug!("step {} publicado con checksum {checksum}", step.uri());
        Ok((checksum, dataset))
    }
}
