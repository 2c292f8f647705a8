use crate::domain_persistence::DieselCurationRepository;
use crate::workbench_store;
use chem_domain::{CurationRepository, DomainError, EntityKind, ReactionGraph, WorkbenchEntity, WorkbenchReaction};

/// El grafo compuesto ↔ reacción se lee directamente del índice de roles;
/// cada expansión es una consulta por compuesto.
impl ReactionGraph for DieselCurationRepository {
  fn find_compound(&self, identifier: &str) -> Result<Option<WorkbenchEntity>, DomainError> {
    self.find_workbench_entity(EntityKind::Compound, identifier)
  }

  fn reactions_producing(&self, compound_id: i64) -> Result<Vec<WorkbenchReaction>, DomainError> {
    let mut conn = self.conn()?;
    Ok(workbench_store::reactions_producing(&mut conn, compound_id)?)
  }
}
