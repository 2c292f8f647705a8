// errors.rs
use thiserror::Error;

/// Errores del dominio de curación.
///
/// Los problemas por fila (cadenas vacías, estandarizaciones fallidas,
/// reacciones sin reactivos) no son errores: se reportan como datos en los
/// reportes de lote. Estas variantes quedan para fallos que abortan la
/// operación completa.
#[derive(Debug, Error, Clone)]
pub enum DomainError {
  #[error("Error de validación: {0}")]
  ValidationError(String),
  #[error("Error externo: {0}")]
  ExternalError(String),
  #[error("Error de serialización: {0}")]
  SerializationError(String),
  #[error("Error de almacenamiento: {0}")]
  StorageError(String),
  #[error("Error de estrategia: {0}")]
  StrategyError(String),
}

impl From<serde_json::Error> for DomainError {
  fn from(e: serde_json::Error) -> Self {
    Self::SerializationError(e.to_string())
  }
}

impl From<rayon::ThreadPoolBuildError> for DomainError {
  fn from(e: rayon::ThreadPoolBuildError) -> Self {
    Self::ExternalError(format!("no se pudo crear el pool de workers: {}", e))
  }
}
