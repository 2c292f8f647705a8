// route.rs
//! Reconstrucción de rutas de síntesis por expansión hacia atrás.
//!
//! Desde un compuesto objetivo se recorre el índice de roles de reacción
//! hacia los reactivos hasta llegar a building blocks. La búsqueda es en
//! profundidad con pila explícita y produce las rutas de forma perezosa, una
//! por llamada a `next`: el número de rutas crece combinatoriamente y el
//! consumidor puede detenerse cuando quiera.
//!
//! Cada estado parcial guarda sus metas abiertas; cada meta apunta a su
//! camino de ancestros (`PathLink`), una lista enlazada cuyos prefijos
//! comparten las ramas hermanas. Sirve de guardia de ciclos sin depender de
//! la pila de llamadas y se libera junto con la última rama que la usa.
use crate::{BuildingBlockPolicy, DomainError, RouteOptions, WorkbenchEntity, WorkbenchReaction};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Vista de sólo lectura del grafo compuesto ↔ reacción.
pub trait ReactionGraph {
  /// Busca un compuesto del workbench por su identificador canónico.
  fn find_compound(&self, identifier: &str) -> Result<Option<WorkbenchEntity>, DomainError>;

  /// Reacciones cuyo conjunto de productos contiene el compuesto, en orden
  /// ascendente de id y con los roles ya resueltos.
  fn reactions_producing(&self, compound_id: i64) -> Result<Vec<WorkbenchReaction>, DomainError>;

  /// Rutas de síntesis del compuesto con identificador `target`. Un objetivo
  /// desconocido produce una secuencia vacía, no un error.
  fn synthesis_routes(&self, target: &str, options: RouteOptions) -> Result<SynthesisRoutes<'_, Self>, DomainError>
    where Self: Sized
  {
    Ok(match self.find_compound(target)? {
      Some(compound) => SynthesisRoutes::new(self, compound, options),
      None => SynthesisRoutes::empty(self, options),
    })
  }
}

/// Paso de una ruta: la reacción usada para obtener `product`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStep {
  /// Reacciones entre el objetivo y este paso (el paso final tiene 1).
  pub depth: usize,
  pub product: WorkbenchEntity,
  pub reaction: Arc<WorkbenchReaction>,
}

/// Ruta completa: pasos ordenados desde los building blocks hasta el
/// objetivo. El último paso produce el objetivo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesisRoute {
  pub target: WorkbenchEntity,
  pub steps: Vec<RouteStep>,
  pub building_blocks: Vec<WorkbenchEntity>,
}

impl SynthesisRoute {
  pub fn reaction_ids(&self) -> Vec<i64> {
    self.steps.iter().map(|s| s.reaction.id()).collect()
  }

  pub fn building_block_ids(&self) -> Vec<i64> {
    self.building_blocks.iter().map(|b| b.id).collect()
  }

  /// Verifica la coherencia interna de la ruta: el último paso produce el
  /// objetivo, cada reactivo es hoja building block o producto de un paso
  /// anterior, y cada hoja está marcada como building block.
  pub fn is_sound(&self) -> bool {
    let Some(last) = self.steps.last() else {
      return false;
    };
    if last.product.id != self.target.id || !last.reaction.has_product(self.target.id) {
      return false;
    }
    let leaves: HashSet<i64> = self.building_blocks.iter().map(|b| b.id).collect();
    if self.building_blocks.iter().any(|b| !b.is_building_block) {
      return false;
    }
    let mut produced: HashSet<i64> = HashSet::new();
    for step in &self.steps {
      if !step.reaction.has_product(step.product.id) {
        return false;
      }
      for r in &step.reaction.reactants {
        if !produced.contains(&r.compound.id) && !leaves.contains(&r.compound.id) {
          return false;
        }
      }
      produced.insert(step.product.id);
    }
    true
  }
}

#[derive(Debug)]
struct PathLink {
  compound_id: i64,
  parent: Option<Arc<PathLink>>,
}

fn on_path(mut node: Option<&Arc<PathLink>>, compound_id: i64) -> bool {
  while let Some(link) = node {
    if link.compound_id == compound_id {
      return true;
    }
    node = link.parent.as_ref();
  }
  false
}

#[derive(Debug, Clone)]
struct Goal {
  compound: WorkbenchEntity,
  depth: usize,
  path: Option<Arc<PathLink>>,
}

#[derive(Debug, Clone)]
struct PartialRoute {
  steps: Vec<RouteStep>,
  leaves: Vec<WorkbenchEntity>,
  goals: Vec<Goal>,
}

/// Iterador perezoso de rutas. Ver el módulo para el algoritmo.
pub struct SynthesisRoutes<'g, G: ReactionGraph> {
  graph: &'g G,
  options: RouteOptions,
  target: Option<WorkbenchEntity>,
  stack: Vec<PartialRoute>,
  producers: HashMap<i64, Arc<[Arc<WorkbenchReaction>]>>,
  failed: bool,
}

impl<'g, G: ReactionGraph> SynthesisRoutes<'g, G> {
  pub fn new(graph: &'g G, target: WorkbenchEntity, options: RouteOptions) -> Self {
    let root = PartialRoute { steps: Vec::new(),
                              leaves: Vec::new(),
                              goals: vec![Goal { compound: target.clone(), depth: 0, path: None }] };
    Self { graph,
           options,
           target: Some(target),
           stack: vec![root],
           producers: HashMap::new(),
           failed: false }
  }

  pub fn empty(graph: &'g G, options: RouteOptions) -> Self {
    Self { graph,
           options,
           target: None,
           stack: Vec::new(),
           producers: HashMap::new(),
           failed: false }
  }

  pub fn target(&self) -> Option<&WorkbenchEntity> {
    self.target.as_ref()
  }

  /// Eslabones de camino aún referenciados por metas abiertas.
  #[cfg(test)]
  fn live_path_links(&self) -> usize {
    let mut seen = HashSet::new();
    for goal in self.stack.iter().flat_map(|s| s.goals.iter()) {
      let mut node = goal.path.as_ref();
      while let Some(link) = node {
        if !seen.insert(Arc::as_ptr(link)) {
          break;
        }
        node = link.parent.as_ref();
      }
    }
    seen.len()
  }

  fn producers_of(&mut self, compound_id: i64) -> Result<Arc<[Arc<WorkbenchReaction>]>, DomainError> {
    if let Some(cached) = self.producers.get(&compound_id) {
      return Ok(cached.clone());
    }
    let mut reactions = self.graph.reactions_producing(compound_id)?;
    reactions.sort_by_key(|r| r.id());
    let reactions: Arc<[Arc<WorkbenchReaction>]> = reactions.into_iter().map(Arc::new).collect();
    self.producers.insert(compound_id, reactions.clone());
    Ok(reactions)
  }

  /// Expande la meta abierta de `state` y devuelve las ramas en el orden en
  /// que deben explorarse.
  fn expand(&mut self, state: PartialRoute, goal: Goal) -> Result<Vec<PartialRoute>, DomainError> {
    let mut branches = Vec::new();
    let is_target = goal.depth == 0;
    let leaf = goal.compound.is_building_block && !is_target;

    if leaf {
      let mut terminal = state.clone();
      terminal.leaves.push(goal.compound.clone());
      branches.push(terminal);
      if self.options.policy == BuildingBlockPolicy::Terminal {
        return Ok(branches);
      }
    }
    if goal.depth >= self.options.max_depth {
      return Ok(branches);
    }

    let producers = self.producers_of(goal.compound.id)?;
    if producers.is_empty() {
      return Ok(branches);
    }
    let node = Arc::new(PathLink { compound_id: goal.compound.id, parent: goal.path });
    for reaction in producers.iter() {
      if reaction.is_self_loop() {
        log::warn!("reacción {} descartada: su producto es también reactivo", reaction.id());
        continue;
      }
      let mut next = state.clone();
      next.steps.push(RouteStep { depth: goal.depth + 1, product: goal.compound.clone(), reaction: reaction.clone() });
      // Reversed so the first reactant is the next goal popped.
      for r in reaction.reactants.iter().rev() {
        next.goals.push(Goal { compound: r.compound.clone(), depth: goal.depth + 1, path: Some(node.clone()) });
      }
      branches.push(next);
    }
    Ok(branches)
  }

  fn finish(&self, state: PartialRoute) -> Option<SynthesisRoute> {
    let target = self.target.clone()?;
    let mut steps = state.steps;
    steps.reverse();
    let mut seen = HashSet::new();
    let building_blocks = state.leaves.into_iter().filter(|b| seen.insert(b.id)).collect();
    Some(SynthesisRoute { target, steps, building_blocks })
  }
}

impl<G: ReactionGraph> Iterator for SynthesisRoutes<'_, G> {
  type Item = Result<SynthesisRoute, DomainError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.failed {
      return None;
    }
    while let Some(mut state) = self.stack.pop() {
      let Some(goal) = state.goals.pop() else {
        return self.finish(state).map(Ok);
      };
      if on_path(goal.path.as_ref(), goal.compound.id) {
        log::debug!("rama cortada: el compuesto {} reaparece en su camino", goal.compound.id);
        continue;
      }
      match self.expand(state, goal) {
        Ok(branches) => self.stack.extend(branches.into_iter().rev()),
        Err(e) => {
          self.failed = true;
          self.stack.clear();
          return Some(Err(e));
        }
      }
    }
    None
  }
}
