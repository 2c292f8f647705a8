// config.rs
//! Opciones de las operaciones por lotes y de la reconstrucción de rutas.
//!
//! Los valores por defecto pueden sobreescribirse con variables de entorno
//! (`CACS_DB_USER`, `CACS_CHUNK_SIZE`, `CACS_WORKERS`,
//! `CACS_ROUTE_MAX_DEPTH`) mediante los constructores `from_env`.
use crate::SourceKey;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DATABASE_USER: &str = "user";
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_ROUTE_MAX_DEPTH: usize = 10;

fn env_string(name: &str) -> Option<String> {
  std::env::var(name).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_usize(name: &str) -> Option<usize> {
  env_string(name).and_then(|v| v.parse::<usize>().ok())
}

/// Opciones de `insert_archive_entities`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOptions {
  pub created_by: String,
  pub chunk_size: usize,
}

impl InsertOptions {
  pub fn from_env() -> Self {
    let d = Self::default();
    Self { created_by: env_string("CACS_DB_USER").unwrap_or(d.created_by),
           chunk_size: env_usize("CACS_CHUNK_SIZE").unwrap_or(d.chunk_size) }
  }
}

impl Default for InsertOptions {
  fn default() -> Self {
    Self { created_by: DEFAULT_DATABASE_USER.to_string(), chunk_size: DEFAULT_CHUNK_SIZE }
  }
}

/// Opciones de la migración archivo → workbench.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationOptions {
  pub created_by: String,
  pub chunk_size: usize,
  /// Hilos del pool que ejecuta la estrategia sobre cada chunk.
  pub workers: usize,
  /// Restringe la migración a filas de archivo de estas fuentes.
  pub sources: Option<Vec<SourceKey>>,
  /// Marca como building block cada compuesto migrado en esta ejecución.
  /// Sólo aplica a compuestos; nunca desmarca.
  pub mark_building_blocks: bool,
}

impl MigrationOptions {
  pub fn from_env() -> Self {
    let d = Self::default();
    Self { created_by: env_string("CACS_DB_USER").unwrap_or(d.created_by),
           chunk_size: env_usize("CACS_CHUNK_SIZE").unwrap_or(d.chunk_size),
           workers: env_usize("CACS_WORKERS").unwrap_or(d.workers),
           ..d }
  }

  pub fn with_sources(mut self, sources: Vec<SourceKey>) -> Self {
    self.sources = Some(sources);
    self
  }

  pub fn building_blocks(mut self) -> Self {
    self.mark_building_blocks = true;
    self
  }
}

impl Default for MigrationOptions {
  fn default() -> Self {
    Self { created_by: DEFAULT_DATABASE_USER.to_string(),
           chunk_size: DEFAULT_CHUNK_SIZE,
           workers: 1,
           sources: None,
           mark_building_blocks: false }
  }
}

/// Opciones de la extracción de patrones de transformación.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOptions {
  pub created_by: String,
  pub chunk_size: usize,
  pub workers: usize,
  /// Vuelve a intentar las reacciones marcadas como fallidas.
  pub retry_failed: bool,
}

impl ExtractionOptions {
  pub fn from_env() -> Self {
    let d = Self::default();
    Self { created_by: env_string("CACS_DB_USER").unwrap_or(d.created_by),
           chunk_size: env_usize("CACS_CHUNK_SIZE").unwrap_or(d.chunk_size),
           workers: env_usize("CACS_WORKERS").unwrap_or(d.workers),
           ..d }
  }
}

impl Default for ExtractionOptions {
  fn default() -> Self {
    Self { created_by: DEFAULT_DATABASE_USER.to_string(), chunk_size: DEFAULT_CHUNK_SIZE, workers: 1, retry_failed: false }
  }
}

/// Qué hacer con un intermedio que es building block y a la vez producto de
/// alguna reacción almacenada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BuildingBlockPolicy {
  /// Siempre hoja terminal.
  #[default]
  Terminal,
  /// Hoja terminal y, además, una alternativa por cada reacción que lo produce.
  ExpandAlternatives,
}

/// Opciones de la reconstrucción de rutas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOptions {
  /// Máximo de reacciones encadenadas en cualquier rama.
  pub max_depth: usize,
  pub policy: BuildingBlockPolicy,
}

impl RouteOptions {
  pub fn from_env() -> Self {
    Self { max_depth: env_usize("CACS_ROUTE_MAX_DEPTH").unwrap_or(DEFAULT_ROUTE_MAX_DEPTH), ..Self::default() }
  }

  pub fn with_max_depth(mut self, max_depth: usize) -> Self {
    self.max_depth = max_depth;
    self
  }

  pub fn with_policy(mut self, policy: BuildingBlockPolicy) -> Self {
    self.policy = policy;
    self
  }
}

impl Default for RouteOptions {
  fn default() -> Self {
    Self { max_depth: DEFAULT_ROUTE_MAX_DEPTH, policy: BuildingBlockPolicy::Terminal }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_batch_settings() {
    let m = MigrationOptions::default();
    assert_eq!(m.chunk_size, 10_000);
    assert_eq!(m.created_by, "user");
    assert!(!m.mark_building_blocks);
    assert_eq!(RouteOptions::default().max_depth, 10);
    assert_eq!(RouteOptions::default().policy, BuildingBlockPolicy::Terminal);
  }

  #[test]
  fn builders_set_fields() {
    let m = MigrationOptions::default().building_blocks()
                                       .with_sources(vec![SourceKey::new("zinc", "20", "bb.smi")]);
    assert!(m.mark_building_blocks);
    assert_eq!(m.sources.as_ref().map(|s| s.len()), Some(1));
    let r = RouteOptions::default().with_max_depth(3).with_policy(BuildingBlockPolicy::ExpandAlternatives);
    assert_eq!(r.max_depth, 3);
  }
}
