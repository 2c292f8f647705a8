// entity.rs
use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Familia de entidad química. Cada familia tiene su propio nivel de archivo
/// y de workbench; la unicidad es por `(kind, identifier)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
  Compound,
  CompoundPattern,
  Reaction,
  ReactionPattern,
}

impl EntityKind {
  pub const ALL: [EntityKind; 4] =
    [EntityKind::Compound, EntityKind::CompoundPattern, EntityKind::Reaction, EntityKind::ReactionPattern];

  pub fn as_str(&self) -> &'static str {
    match self {
      EntityKind::Compound => "compound",
      EntityKind::CompoundPattern => "compound_pattern",
      EntityKind::Reaction => "reaction",
      EntityKind::ReactionPattern => "reaction_pattern",
    }
  }
}

impl fmt::Display for EntityKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for EntityKind {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "compound" => Ok(EntityKind::Compound),
      "compound_pattern" => Ok(EntityKind::CompoundPattern),
      "reaction" => Ok(EntityKind::Reaction),
      "reaction_pattern" => Ok(EntityKind::ReactionPattern),
      other => Err(DomainError::ValidationError(format!("kind de entidad desconocido: {}", other))),
    }
  }
}

/// Rol de un compuesto dentro de una reacción del workbench.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactionRole {
  Reactant,
  Spectator,
  Product,
}

impl ReactionRole {
  pub fn as_str(&self) -> &'static str {
    match self {
      ReactionRole::Reactant => "reactant",
      ReactionRole::Spectator => "spectator",
      ReactionRole::Product => "product",
    }
  }
}

impl FromStr for ReactionRole {
  type Err = DomainError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "reactant" => Ok(ReactionRole::Reactant),
      "spectator" => Ok(ReactionRole::Spectator),
      "product" => Ok(ReactionRole::Product),
      other => Err(DomainError::ValidationError(format!("rol de reacción desconocido: {}", other))),
    }
  }
}

/// Triple `(name, version, file_name)` que identifica una fuente.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceKey {
  pub name: String,
  pub version: String,
  pub file_name: String,
}

impl SourceKey {
  pub fn new(name: impl Into<String>, version: impl Into<String>, file_name: impl Into<String>) -> Self {
    Self { name: name.into(), version: version.into(), file_name: file_name.into() }
  }

  pub fn validate(&self) -> Result<(), DomainError> {
    if self.name.trim().is_empty() || self.version.trim().is_empty() || self.file_name.trim().is_empty() {
      return Err(DomainError::ValidationError("La fuente requiere nombre, versión y archivo no vacíos".to_string()));
    }
    Ok(())
  }
}

impl fmt::Display for SourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}/{}", self.name, self.version, self.file_name)
  }
}

/// Fuente registrada. Inmutable una vez creada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
  pub id: i64,
  pub key: SourceKey,
  pub created_at: DateTime<Utc>,
  pub created_by: String,
}

/// Fila de archivo: la cadena tal como llegó de la fuente.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntity {
  pub id: i64,
  pub kind: EntityKind,
  pub identifier: String,
  pub properties: Option<serde_json::Value>,
  pub created_at: DateTime<Utc>,
  pub created_by: String,
}

/// Fila de workbench: cadena estandarizada y deduplicada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbenchEntity {
  pub id: i64,
  pub kind: EntityKind,
  pub identifier: String,
  pub is_building_block: bool,
  pub created_at: DateTime<Utc>,
  pub created_by: String,
  pub updated_at: Option<DateTime<Utc>>,
  pub updated_by: Option<String>,
}

/// Compuesto enlazado a una reacción con su posición estequiométrica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCompound {
  pub position: i32,
  pub compound: WorkbenchEntity,
}

/// Reacción del workbench con sus compuestos ya resueltos por rol, cada lista
/// ordenada por posición.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbenchReaction {
  pub reaction: WorkbenchEntity,
  pub reactants: Vec<RoleCompound>,
  pub spectators: Vec<RoleCompound>,
  pub products: Vec<RoleCompound>,
}

impl WorkbenchReaction {
  pub fn id(&self) -> i64 {
    self.reaction.id
  }

  pub fn has_reactant(&self, compound_id: i64) -> bool {
    self.reactants.iter().any(|r| r.compound.id == compound_id)
  }

  pub fn has_product(&self, compound_id: i64) -> bool {
    self.products.iter().any(|p| p.compound.id == compound_id)
  }

  /// Reacción cuyo producto aparece también como reactivo.
  pub fn is_self_loop(&self) -> bool {
    self.products.iter().any(|p| self.has_reactant(p.compound.id))
  }

  pub fn compounds_in(&self, role: ReactionRole) -> &[RoleCompound] {
    match role {
      ReactionRole::Reactant => &self.reactants,
      ReactionRole::Spectator => &self.spectators,
      ReactionRole::Product => &self.products,
    }
  }
}

/// Fila de archivo con sus fuentes de procedencia.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
  pub entity: ArchiveEntity,
  pub sources: Vec<Source>,
}

/// Fila de workbench con los ids de archivo de los que deriva.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbenchRecord {
  pub entity: WorkbenchEntity,
  pub archive_ids: Vec<i64>,
}

/// Patrón de reacción del workbench con las reacciones que lo contienen y
/// sus patrones de compuesto por rol. Un patrón que no se pudo separar en
/// roles tiene las tres listas vacías.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbenchReactionPattern {
  pub pattern: WorkbenchEntity,
  pub reaction_ids: Vec<i64>,
  pub reactants: Vec<RoleCompound>,
  pub spectators: Vec<RoleCompound>,
  pub products: Vec<RoleCompound>,
}

impl WorkbenchReactionPattern {
  pub fn new(pattern: WorkbenchEntity, reaction_ids: Vec<i64>) -> Self {
    Self { pattern, reaction_ids, reactants: vec![], spectators: vec![], products: vec![] }
  }

  pub fn push_role(&mut self, role: ReactionRole, member: RoleCompound) {
    match role {
      ReactionRole::Reactant => self.reactants.push(member),
      ReactionRole::Spectator => self.spectators.push(member),
      ReactionRole::Product => self.products.push(member),
    }
  }
}

/// Patrón de compuesto con los compuestos en los que se encontró como
/// patrón estructural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkbenchCompoundPattern {
  pub pattern: WorkbenchEntity,
  pub compound_ids: Vec<i64>,
}

/// Entrada de un lote de ingesta. `identifier` es opcional porque los
/// archivos de origen contienen celdas nulas; se rechazan por fila.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawRecord {
  pub identifier: Option<String>,
  pub properties: Option<serde_json::Value>,
}

impl RawRecord {
  pub fn with_properties(identifier: impl Into<String>, properties: serde_json::Value) -> Self {
    Self { identifier: Some(identifier.into()), properties: Some(properties) }
  }
}

impl From<&str> for RawRecord {
  fn from(value: &str) -> Self {
    Self { identifier: Some(value.to_string()), properties: None }
  }
}

impl From<String> for RawRecord {
  fn from(value: String) -> Self {
    Self { identifier: Some(value), properties: None }
  }
}

impl From<Option<String>> for RawRecord {
  fn from(value: Option<String>) -> Self {
    Self { identifier: value, properties: None }
  }
}

/// Ventana de paginación para las consultas de selección.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
  pub offset: i64,
  pub limit: i64,
}

impl Page {
  pub fn new(offset: i64, limit: i64) -> Self {
    Self { offset: offset.max(0), limit: limit.max(0) }
  }

  pub fn first(limit: i64) -> Self {
    Self::new(0, limit)
  }

  pub fn next(&self) -> Self {
    Self::new(self.offset + self.limit, self.limit)
  }
}

impl Default for Page {
  fn default() -> Self {
    Self::first(10_000)
  }
}

/// Filtro de reacciones por identificadores de compuestos en cada rol. Dentro
/// de un rol basta con contener uno de los identificadores; entre roles se
/// combinan con AND.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionFilter {
  pub reactants: Option<Vec<String>>,
  pub spectators: Option<Vec<String>>,
  pub products: Option<Vec<String>>,
}

impl ReactionFilter {
  pub fn with_reactants<I, S>(mut self, identifiers: I) -> Self
    where I: IntoIterator<Item = S>,
          S: Into<String>
  {
    self.reactants = Some(identifiers.into_iter().map(Into::into).collect());
    self
  }

  pub fn with_spectators<I, S>(mut self, identifiers: I) -> Self
    where I: IntoIterator<Item = S>,
          S: Into<String>
  {
    self.spectators = Some(identifiers.into_iter().map(Into::into).collect());
    self
  }

  pub fn with_products<I, S>(mut self, identifiers: I) -> Self
    where I: IntoIterator<Item = S>,
          S: Into<String>
  {
    self.products = Some(identifiers.into_iter().map(Into::into).collect());
    self
  }

  pub fn role_filter(&self, role: ReactionRole) -> Option<&[String]> {
    match role {
      ReactionRole::Reactant => self.reactants.as_deref(),
      ReactionRole::Spectator => self.spectators.as_deref(),
      ReactionRole::Product => self.products.as_deref(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.reactants.is_none() && self.spectators.is_none() && self.products.is_none()
  }

  /// Evalúa el filtro sobre una reacción ya resuelta.
  pub fn matches(&self, reaction: &WorkbenchReaction) -> bool {
    [ReactionRole::Reactant, ReactionRole::Spectator, ReactionRole::Product].iter().all(|role| {
      match self.role_filter(*role) {
        None => true,
        Some(wanted) => {
          reaction.compounds_in(*role).iter().any(|c| wanted.iter().any(|w| w == &c.compound.identifier))
        }
      }
    })
  }
}

/// Convierte un timestamp en milisegundos a `DateTime<Utc>`.
pub fn datetime_from_millis(ts: i64) -> DateTime<Utc> {
  DateTime::<Utc>::from_timestamp_millis(ts).unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn compound(id: i64, identifier: &str) -> WorkbenchEntity {
    WorkbenchEntity { id,
                      kind: EntityKind::Compound,
                      identifier: identifier.to_string(),
                      is_building_block: false,
                      created_at: Utc::now(),
                      created_by: "test".into(),
                      updated_at: None,
                      updated_by: None }
  }

  #[test]
  fn kind_and_role_round_trip_through_text() {
    for kind in EntityKind::ALL {
      assert_eq!(kind.as_str().parse::<EntityKind>().unwrap(), kind);
    }
    assert_eq!("spectator".parse::<ReactionRole>().unwrap(), ReactionRole::Spectator);
    assert!("catalyst".parse::<ReactionRole>().is_err());
  }

  #[test]
  fn self_loop_detection() {
    let x = compound(1, "X");
    let y = compound(2, "Y");
    let looping = WorkbenchReaction { reaction: compound(10, "X.Y>>X"),
                                      reactants: vec![RoleCompound { position: 0, compound: x.clone() },
                                                      RoleCompound { position: 1, compound: y.clone() }],
                                      spectators: vec![],
                                      products: vec![RoleCompound { position: 0, compound: x.clone() }] };
    assert!(looping.is_self_loop());
    let clean = WorkbenchReaction { reaction: compound(11, "Y>>X"),
                                    reactants: vec![RoleCompound { position: 0, compound: y }],
                                    spectators: vec![],
                                    products: vec![RoleCompound { position: 0, compound: x }] };
    assert!(!clean.is_self_loop());
  }

  #[test]
  fn reaction_filter_combines_roles_with_and() {
    let reaction = WorkbenchReaction { reaction: compound(10, "A.B>>C"),
                                       reactants: vec![RoleCompound { position: 0, compound: compound(1, "A") },
                                                       RoleCompound { position: 1, compound: compound(2, "B") }],
                                       spectators: vec![],
                                       products: vec![RoleCompound { position: 0, compound: compound(3, "C") }] };
    assert!(ReactionFilter::default().matches(&reaction));
    assert!(ReactionFilter::default().with_reactants(["B", "Z"]).matches(&reaction));
    assert!(ReactionFilter::default().with_reactants(["A"]).with_products(["C"]).matches(&reaction));
    assert!(!ReactionFilter::default().with_reactants(["A"]).with_products(["A"]).matches(&reaction));
    assert!(!ReactionFilter::default().with_spectators(["O"]).matches(&reaction));
  }
}
