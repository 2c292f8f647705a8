// migration.rs
//! Etapa pura de la migración: aplica las estrategias del llamador sobre un
//! chunk de filas pendientes en un pool de `rayon` y valida el resultado.
//!
//! Los repositorios seleccionan el chunk (anti-join sobre filas no
//! migradas), llaman a estas funciones y escriben el resultado en una
//! transacción. Ninguna función de este módulo toca almacenamiento.
use crate::{DomainError, MigrationFailure, PatternExtractor, ReactionStandardizer, StandardizedReaction, Standardizer,
            StrategyFailure};
use rayon::prelude::*;
use rayon::ThreadPool;
use std::collections::HashSet;

/// Fila pendiente: id de origen y cadena a transformar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pending {
  pub id: i64,
  pub identifier: String,
}

pub type Standardized<T> = Vec<(i64, Result<T, MigrationFailure>)>;

pub fn worker_pool(workers: usize) -> Result<ThreadPool, DomainError> {
  Ok(rayon::ThreadPoolBuilder::new().num_threads(workers.max(1)).build()?)
}

pub fn standardize_chunk(pool: &ThreadPool, pending: &[Pending], standardizer: &dyn Standardizer)
                         -> Standardized<String> {
  pool.install(|| {
        pending.par_iter()
               .map(|p| {
                 let outcome = standardizer.standardize(&p.identifier)
                                           .map_err(MigrationFailure::from)
                                           .and_then(|s| {
                                             let s = s.trim().to_string();
                                             if s.is_empty() {
                                               Err(MigrationFailure::EmptyResult)
                                             } else {
                                               Ok(s)
                                             }
                                           });
                 (p.id, outcome)
               })
               .collect()
      })
}

pub fn standardize_reaction_chunk(pool: &ThreadPool, pending: &[Pending], standardizer: &dyn ReactionStandardizer)
                                  -> Standardized<StandardizedReaction> {
  pool.install(|| {
        pending.par_iter()
               .map(|p| {
                 let outcome = standardizer.standardize_reaction(&p.identifier)
                                           .map_err(MigrationFailure::from)
                                           .and_then(validate_reaction);
                 (p.id, outcome)
               })
               .collect()
      })
}

pub fn extract_chunk(pool: &ThreadPool, pending: &[Pending], extractor: &dyn PatternExtractor)
                     -> Vec<(i64, Result<Vec<String>, StrategyFailure>)> {
  pool.install(|| {
        pending.par_iter()
               .map(|p| {
                 let outcome = extractor.extract(&p.identifier).map(|patterns| {
                                                                 let mut seen = HashSet::new();
                                                                 patterns.into_iter()
                                                                         .map(|s| s.trim().to_string())
                                                                         .filter(|s| !s.is_empty())
                                                                         .filter(|s| seen.insert(s.clone()))
                                                                         .collect()
                                                               });
                 (p.id, outcome)
               })
               .collect()
      })
}

/// Normaliza y valida la descomposición en roles de una reacción.
///
/// Rechaza reacciones sin reactivos o sin productos y aquellas cuyo producto
/// aparece también como reactivo.
pub fn validate_reaction(reaction: StandardizedReaction) -> Result<StandardizedReaction, MigrationFailure> {
  let clean = |v: Vec<String>| -> Vec<String> {
    v.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
  };
  let identifier = reaction.identifier.trim().to_string();
  if identifier.is_empty() {
    return Err(MigrationFailure::EmptyResult);
  }
  let reactants = clean(reaction.reactants);
  let spectators = clean(reaction.spectators);
  let products = clean(reaction.products);
  if reactants.is_empty() {
    return Err(MigrationFailure::NoReactants);
  }
  if products.is_empty() {
    return Err(MigrationFailure::NoProducts);
  }
  if let Some(p) = products.iter().find(|p| reactants.contains(p)) {
    return Err(MigrationFailure::SelfLoop(p.clone()));
  }
  Ok(StandardizedReaction { identifier, reactants, spectators, products })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::RoleSplitting;

  fn pending(items: &[&str]) -> Vec<Pending> {
    items.iter().enumerate().map(|(i, s)| Pending { id: i as i64 + 1, identifier: s.to_string() }).collect()
  }

  #[test]
  fn standardize_chunk_keeps_order_and_isolates_failures() {
    let pool = worker_pool(4).unwrap();
    let standardizer = |raw: &str| -> Result<String, StrategyFailure> {
      if raw.contains('?') {
        Err(StrategyFailure::new("unparsable"))
      } else {
        Ok(raw.to_uppercase())
      }
    };
    let out = standardize_chunk(&pool, &pending(&["cco", "c?", "ccn", " "]), &standardizer);
    assert_eq!(out.len(), 4);
    assert_eq!(out[0], (1, Ok("CCO".to_string())));
    assert!(matches!(out[1], (2, Err(MigrationFailure::Strategy(_)))));
    assert_eq!(out[2], (3, Ok("CCN".to_string())));
    assert_eq!(out[3], (4, Err(MigrationFailure::EmptyResult)));
  }

  #[test]
  fn reaction_validation_rejects_missing_sides_and_self_loops() {
    let identity = |raw: &str| -> Result<String, StrategyFailure> { Ok(raw.to_string()) };
    let pool = worker_pool(2).unwrap();
    let out = standardize_reaction_chunk(&pool,
                                         &pending(&["A.B>>C", ">>C", "A>>", "X.Y>>X", "A>O>C"]),
                                         &RoleSplitting(identity));
    assert!(out[0].1.is_ok());
    assert_eq!(out[1].1, Err(MigrationFailure::NoReactants));
    assert_eq!(out[2].1, Err(MigrationFailure::NoProducts));
    assert_eq!(out[3].1, Err(MigrationFailure::SelfLoop("X".into())));
    let ok = out[4].1.as_ref().unwrap();
    assert_eq!(ok.spectators, vec!["O"]);
  }

  #[test]
  fn extract_chunk_dedups_and_drops_blank_patterns() {
    let pool = worker_pool(1).unwrap();
    let extractor = |r: &str| -> Result<Vec<String>, StrategyFailure> {
      if r == "bad" {
        return Err(StrategyFailure::new("no mapping"));
      }
      Ok(vec!["[C:1]>>[C:1]".into(), " ".into(), "[C:1]>>[C:1]".into(), "[O:1]>>[O:1]".into()])
    };
    let out = extract_chunk(&pool, &pending(&["A>>B", "bad"]), &extractor);
    assert_eq!(out[0].1.as_ref().unwrap(), &vec!["[C:1]>>[C:1]".to_string(), "[O:1]>>[O:1]".to_string()]);
    assert!(out[1].1.is_err());
  }
}
