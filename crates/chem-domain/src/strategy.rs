// strategy.rs
//! Contratos de las funciones inyectadas por el llamador.
//!
//! El núcleo no contiene lógica química: la estandarización y la extracción
//! de patrones llegan como estrategias con contrato fijo. Cualquier closure
//! con la firma adecuada implementa el trait correspondiente.
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Señal de fallo de una estrategia para una cadena concreta.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct StrategyFailure {
  pub message: String,
}

impl StrategyFailure {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }
}

/// `(cadena cruda) -> cadena canónica | fallo`. Debe ser determinista.
pub trait Standardizer: Send + Sync {
  fn standardize(&self, raw: &str) -> Result<String, StrategyFailure>;
}

impl<F> Standardizer for F where F: Fn(&str) -> Result<String, StrategyFailure> + Send + Sync
{
  fn standardize(&self, raw: &str) -> Result<String, StrategyFailure> {
    self(raw)
  }
}

/// Reacción estandarizada y descompuesta en roles.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StandardizedReaction {
  pub identifier: String,
  pub reactants: Vec<String>,
  pub spectators: Vec<String>,
  pub products: Vec<String>,
}

/// `(reacción cruda) -> reacción estandarizada con roles | fallo`.
pub trait ReactionStandardizer: Send + Sync {
  fn standardize_reaction(&self, raw: &str) -> Result<StandardizedReaction, StrategyFailure>;
}

impl<F> ReactionStandardizer for F where F: Fn(&str) -> Result<StandardizedReaction, StrategyFailure> + Send + Sync
{
  fn standardize_reaction(&self, raw: &str) -> Result<StandardizedReaction, StrategyFailure> {
    self(raw)
  }
}

/// `(reacción estandarizada) -> patrones (posiblemente ninguno) | fallo`.
pub trait PatternExtractor: Send + Sync {
  fn extract(&self, reaction: &str) -> Result<Vec<String>, StrategyFailure>;
}

impl<F> PatternExtractor for F where F: Fn(&str) -> Result<Vec<String>, StrategyFailure> + Send + Sync
{
  fn extract(&self, reaction: &str) -> Result<Vec<String>, StrategyFailure> {
    self(reaction)
  }
}

/// Adapta un `Standardizer` de reacción completa a `ReactionStandardizer`:
/// estandariza la cadena y la separa según la sintaxis de reaction SMILES.
pub struct RoleSplitting<S>(pub S);

impl<S> ReactionStandardizer for RoleSplitting<S> where S: Standardizer
{
  fn standardize_reaction(&self, raw: &str) -> Result<StandardizedReaction, StrategyFailure> {
    let identifier = self.0.standardize(raw)?;
    split_reaction_smiles(&identifier)
  }
}

/// Separa `reactivos>espectadores>productos` en componentes por `.`.
///
/// Sólo sintaxis: no valida química. Una extensión CXSMILES (texto tras el
/// primer espacio) se descarta.
pub fn split_reaction_smiles(reaction: &str) -> Result<StandardizedReaction, StrategyFailure> {
  let body = reaction.split_whitespace().next().unwrap_or("");
  let sides: Vec<&str> = body.split('>').collect();
  if sides.len() != 3 {
    return Err(StrategyFailure::new(format!("reaction SMILES debe tener exactamente dos '>': {}", reaction)));
  }
  let components = |side: &str| -> Vec<String> {
    side.split('.').filter(|c| !c.is_empty()).map(|c| c.to_string()).collect()
  };
  Ok(StandardizedReaction { identifier: body.to_string(),
                            reactants: components(sides[0]),
                            spectators: components(sides[1]),
                            products: components(sides[2]) })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn closures_are_strategies() {
    let upper = |raw: &str| -> Result<String, StrategyFailure> { Ok(raw.to_uppercase()) };
    assert_eq!(upper.standardize("cco").unwrap(), "CCO");

    let none = |_: &str| -> Result<Vec<String>, StrategyFailure> { Ok(vec![]) };
    assert!(none.extract("A>>B").unwrap().is_empty());
  }

  #[test]
  fn split_reaction_smiles_roles() {
    let r = split_reaction_smiles("CC(=O)O.OCC>[H+]>CC(=O)OCC.O").unwrap();
    assert_eq!(r.reactants, vec!["CC(=O)O", "OCC"]);
    assert_eq!(r.spectators, vec!["[H+]"]);
    assert_eq!(r.products, vec!["CC(=O)OCC", "O"]);

    let r = split_reaction_smiles("A.B>>C |f:0.1|").unwrap();
    assert_eq!(r.identifier, "A.B>>C");
    assert!(r.spectators.is_empty());
  }

  #[test]
  fn split_reaction_smiles_rejects_wrong_arity() {
    assert!(split_reaction_smiles("CCO").is_err());
    assert!(split_reaction_smiles("A>B>C>D").is_err());
  }

  #[test]
  fn role_splitting_propagates_standardizer_failure() {
    let failing = |_: &str| -> Result<String, StrategyFailure> { Err(StrategyFailure::new("unparsable")) };
    let adapter = RoleSplitting(failing);
    assert_eq!(adapter.standardize_reaction("x").unwrap_err().message, "unparsable");

    let identity = |raw: &str| -> Result<String, StrategyFailure> { Ok(raw.to_string()) };
    let r = RoleSplitting(identity).standardize_reaction("A>>B").unwrap();
    assert_eq!(r.reactants, vec!["A"]);
    assert_eq!(r.products, vec!["B"]);
  }
}
