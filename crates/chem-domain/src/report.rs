// report.rs
//! Reportes por fila y agregados de las operaciones por lotes.
use crate::{EntityKind, StrategyFailure};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Motivo de rechazo de una fila de entrada malformada.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RowRejection {
  #[error("identificador nulo")]
  Missing,
  #[error("identificador vacío")]
  Blank,
  #[error("identificador malformado: {0}")]
  Malformed(String),
}

/// Valida una cadena cruda antes de ingresarla al archivo.
///
/// Se rechazan celdas nulas, en blanco o con caracteres de control
/// (tabuladores, saltos de línea, NUL). Los espacios se conservan: una
/// cadena CXSMILES lleva su extensión tras un espacio (`CCO |$;;$|`).
pub fn validate_raw_identifier(identifier: Option<&str>) -> Result<&str, RowRejection> {
  let identifier = identifier.ok_or(RowRejection::Missing)?;
  if identifier.trim().is_empty() {
    return Err(RowRejection::Blank);
  }
  if let Some(c) = identifier.chars().find(|c| c.is_control()) {
    return Err(RowRejection::Malformed(format!("contiene el carácter {:?}", c)));
  }
  Ok(identifier)
}

/// Resultado de una fila del lote: id de archivo o rechazo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOutcome {
  pub index: usize,
  pub status: Result<i64, RowRejection>,
}

/// Reporte de `insert_archive_entities`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertReport {
  pub source_id: i64,
  /// Filas de archivo nuevas (las ya existentes no cuentan).
  pub inserted: usize,
  /// Aristas de procedencia nuevas.
  pub linked: usize,
  pub succeeded: usize,
  pub failed: usize,
  pub outcomes: Vec<RowOutcome>,
}

impl InsertReport {
  pub fn failures(&self) -> impl Iterator<Item = (usize, &RowRejection)> {
    self.outcomes.iter().filter_map(|o| o.status.as_ref().err().map(|e| (o.index, e)))
  }
}

/// Motivo por el que una fila de archivo no llegó al workbench.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum MigrationFailure {
  #[error("la estrategia falló: {0}")]
  Strategy(String),
  #[error("la estrategia devolvió una cadena vacía")]
  EmptyResult,
  #[error("la reacción no tiene reactivos")]
  NoReactants,
  #[error("la reacción no tiene productos")]
  NoProducts,
  #[error("el producto {0} es también reactivo de la misma reacción")]
  SelfLoop(String),
}

impl MigrationFailure {
  /// Código estable para persistir.
  pub fn reason(&self) -> &'static str {
    match self {
      MigrationFailure::Strategy(_) => "strategy",
      MigrationFailure::EmptyResult => "empty_result",
      MigrationFailure::NoReactants => "no_reactants",
      MigrationFailure::NoProducts => "no_products",
      MigrationFailure::SelfLoop(_) => "self_loop",
    }
  }
}

impl From<StrategyFailure> for MigrationFailure {
  fn from(e: StrategyFailure) -> Self {
    MigrationFailure::Strategy(e.message)
  }
}

/// Fallo persistido de una fila de archivo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationFailureRecord {
  pub archive_id: i64,
  pub kind: EntityKind,
  pub reason: String,
  pub detail: String,
  pub attempts: i32,
  pub last_attempt_at: DateTime<Utc>,
}

/// Reporte de una migración archivo → workbench.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
  pub kind: EntityKind,
  pub processed: usize,
  pub migrated: usize,
  pub failed: usize,
  /// Filas de workbench creadas (las que ya existían no cuentan).
  pub created: usize,
  pub failures: Vec<(i64, MigrationFailure)>,
}

impl MigrationReport {
  pub fn new(kind: EntityKind) -> Self {
    Self { kind, processed: 0, migrated: 0, failed: 0, created: 0, failures: Vec::new() }
  }

  pub fn failure_rate(&self) -> f64 {
    if self.processed == 0 {
      0.0
    } else {
      self.failed as f64 / self.processed as f64
    }
  }
}

/// Reporte de la extracción de patrones de transformación.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
  pub processed: usize,
  pub succeeded: usize,
  pub failed: usize,
  pub patterns_created: usize,
  pub links_created: usize,
}

/// Conteos de invariantes; todos deben ser cero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
  pub orphan_workbench_entities: i64,
  pub archive_entities_without_source: i64,
  pub reactions_without_reactants: i64,
  pub reactions_without_products: i64,
}

impl IntegrityReport {
  pub fn is_healthy(&self) -> bool {
    self.orphan_workbench_entities == 0
    && self.archive_entities_without_source == 0
    && self.reactions_without_reactants == 0
    && self.reactions_without_products == 0
  }
}

/// Conteo de filas por tabla.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStatistics {
  pub sources: i64,
  pub archive_entities: Vec<(EntityKind, i64)>,
  pub workbench_entities: Vec<(EntityKind, i64)>,
  pub reaction_role_rows: i64,
  pub pattern_links: i64,
  pub pattern_role_rows: i64,
  pub structure_pattern_links: i64,
  pub migration_failures: i64,
}

impl StoreStatistics {
  pub fn archive_count(&self, kind: EntityKind) -> i64 {
    self.archive_entities.iter().find(|(k, _)| *k == kind).map(|(_, n)| *n).unwrap_or(0)
  }

  pub fn workbench_count(&self, kind: EntityKind) -> i64 {
    self.workbench_entities.iter().find(|(k, _)| *k == kind).map(|(_, n)| *n).unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn raw_identifier_validation() {
    assert_eq!(validate_raw_identifier(Some("CCO")), Ok("CCO"));
    assert_eq!(validate_raw_identifier(None), Err(RowRejection::Missing));
    assert_eq!(validate_raw_identifier(Some("   ")), Err(RowRejection::Blank));
    assert!(matches!(validate_raw_identifier(Some("CC\u{0}")), Err(RowRejection::Malformed(_))));
    assert!(matches!(validate_raw_identifier(Some("CC\tO")), Err(RowRejection::Malformed(_))));
    assert!(matches!(validate_raw_identifier(Some("CC\nO")), Err(RowRejection::Malformed(_))));
  }

  #[test]
  fn cxsmiles_extensions_are_accepted() {
    assert_eq!(validate_raw_identifier(Some("CC(=O)O.OCC>>CC(=O)OCC |f:0.1|")),
               Ok("CC(=O)O.OCC>>CC(=O)OCC |f:0.1|"));
    assert_eq!(validate_raw_identifier(Some("C[C@H](N)O |&1:1|")), Ok("C[C@H](N)O |&1:1|"));
  }

  #[test]
  fn failure_rate_of_empty_run_is_zero() {
    let mut r = MigrationReport::new(EntityKind::Compound);
    assert_eq!(r.failure_rate(), 0.0);
    r.processed = 4;
    r.failed = 1;
    assert!((r.failure_rate() - 0.25).abs() < f64::EPSILON);
  }
}
