//! Nivel de workbench: filas estandarizadas, enlaces de procedencia al
//! archivo, índice de roles de reacción, patrones extraídos y el
//! bookkeeping de fallos de migración y marcas de extracción.
//!
//! Las listas de ids que llegan a un `IN (...)` se parten en trozos de
//! `ID_CHUNK`.
use crate::domain_persistence::{now_ms, write_tx, DbConn, PersistenceError, ID_CHUNK};
use crate::schema::{archive_entity as ae, archive_entity_source as aes, archive_migration_failure as amf,
                    workbench_compound_structure_pattern as sp, workbench_entity as we,
                    workbench_entity_archive as wa, workbench_extraction as ex, workbench_reaction_compound as rc,
                    workbench_reaction_pattern_compound as pc, workbench_reaction_pattern_link as pl};
use chem_domain::migration::{Pending, Standardized};
use chem_domain::{datetime_from_millis, identifier_digest, split_reaction_smiles, DomainError, EntityKind,
                  ExtractionOptions, ExtractionReport, IntegrityReport, MigrationFailure, MigrationFailureRecord,
                  MigrationOptions, MigrationReport, Page, ReactionFilter, ReactionRole, RoleCompound,
                  StandardizedReaction, StoreStatistics, StrategyFailure, WorkbenchCompoundPattern, WorkbenchEntity,
                  WorkbenchReaction, WorkbenchReactionPattern, WorkbenchRecord};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use std::collections::{BTreeSet, HashMap, HashSet};

const ROLES: [ReactionRole; 3] = [ReactionRole::Reactant, ReactionRole::Spectator, ReactionRole::Product];

#[derive(Debug, Clone, Queryable)]
pub(crate) struct WorkbenchEntityRow {
  pub id: i64,
  pub kind: String,
  pub identifier: String,
  pub identifier_key: String,
  pub is_building_block: bool,
  pub created_at_ts: i64,
  pub created_by: String,
  pub updated_at_ts: Option<i64>,
  pub updated_by: Option<String>,
}

impl WorkbenchEntityRow {
  fn into_entity(self) -> Result<WorkbenchEntity, DomainError> {
    Ok(WorkbenchEntity { id:                self.id,
                         kind:              self.kind.parse()?,
                         identifier:        self.identifier,
                         is_building_block: self.is_building_block,
                         created_at:        datetime_from_millis(self.created_at_ts),
                         created_by:        self.created_by,
                         updated_at:        self.updated_at_ts.map(datetime_from_millis),
                         updated_by:        self.updated_by })
  }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::workbench_entity)]
struct NewWorkbenchEntity<'a> {
  kind: &'a str,
  identifier: &'a str,
  identifier_key: &'a str,
  is_building_block: bool,
  created_at_ts: i64,
  created_by: &'a str,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::workbench_entity_archive)]
struct NewWorkbenchLink<'a> {
  workbench_id: i64,
  archive_id: i64,
  created_at_ts: i64,
  created_by: &'a str,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::workbench_reaction_compound)]
struct NewRoleRow<'a> {
  reaction_id: i64,
  role: &'a str,
  position: i32,
  compound_id: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::workbench_reaction_pattern_link)]
struct NewPatternLink<'a> {
  reaction_id: i64,
  pattern_id: i64,
  created_at_ts: i64,
  created_by: &'a str,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::workbench_reaction_pattern_compound)]
struct NewPatternRoleRow<'a> {
  pattern_id: i64,
  role: &'a str,
  position: i32,
  compound_pattern_id: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::workbench_compound_structure_pattern)]
struct NewStructurePatternLink<'a> {
  compound_id: i64,
  pattern_id: i64,
  created_at_ts: i64,
  created_by: &'a str,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::archive_migration_failure)]
struct NewFailure<'a> {
  archive_id: i64,
  kind: &'a str,
  reason: &'a str,
  detail: &'a str,
  attempts: i32,
  last_attempt_ts: i64,
}

#[derive(Debug, Queryable)]
struct FailureRow {
  archive_id: i64,
  kind: String,
  reason: String,
  detail: String,
  attempts: i32,
  last_attempt_ts: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::workbench_extraction)]
struct NewExtractionMarker<'a> {
  entity_id: i64,
  succeeded: bool,
  detail: Option<&'a str>,
  attempted_at_ts: i64,
  attempted_by: &'a str,
}

/// Look-up-or-create atómico por `(kind, identifier)`. Devuelve
/// `(id, creada)`; bajo concurrencia sólo un escritor ve `creada = true`.
fn intern_workbench(conn: &mut DbConn, kind: EntityKind, identifier: &str, created_by: &str, ts: i64)
                    -> Result<(i64, bool), DieselError> {
  let key = identifier_digest(kind, identifier);
  let row = NewWorkbenchEntity { kind: kind.as_str(),
                                 identifier,
                                 identifier_key: &key,
                                 is_building_block: false,
                                 created_at_ts: ts,
                                 created_by };
  let inserted = diesel::insert_into(we::table).values(&row).on_conflict_do_nothing().execute(conn)?;
  let id = we::table.filter(we::kind.eq(kind.as_str()))
                    .filter(we::identifier_key.eq(&key))
                    .filter(we::identifier.eq(identifier))
                    .select(we::id)
                    .first::<i64>(conn)?;
  Ok((id, inserted > 0))
}

fn link_archive(conn: &mut DbConn, workbench_id: i64, archive_id: i64, created_by: &str, ts: i64)
                -> Result<bool, DieselError> {
  let link = NewWorkbenchLink { workbench_id, archive_id, created_at_ts: ts, created_by };
  Ok(diesel::insert_into(wa::table).values(&link).on_conflict_do_nothing().execute(conn)? > 0)
}

fn flag_building_block(conn: &mut DbConn, compound_id: i64, flag: bool, updated_by: &str)
                       -> Result<usize, DieselError> {
  diesel::update(we::table.filter(we::id.eq(compound_id)).filter(we::is_building_block.ne(flag)))
    .set((we::is_building_block.eq(flag), we::updated_at_ts.eq(Some(now_ms())), we::updated_by.eq(Some(updated_by))))
    .execute(conn)
}

fn record_failure(conn: &mut DbConn, kind: EntityKind, archive_id: i64, failure: &MigrationFailure, ts: i64)
                  -> Result<(), DieselError> {
  let detail = failure.to_string();
  let row = NewFailure { archive_id,
                         kind: kind.as_str(),
                         reason: failure.reason(),
                         detail: &detail,
                         attempts: 1,
                         last_attempt_ts: ts };
  diesel::insert_into(amf::table).values(&row)
                                 .on_conflict(amf::archive_id)
                                 .do_update()
                                 .set((amf::reason.eq(failure.reason()),
                                       amf::detail.eq(&detail),
                                       amf::attempts.eq(amf::attempts + 1),
                                       amf::last_attempt_ts.eq(ts)))
                                 .execute(conn)?;
  Ok(())
}

fn clear_failure(conn: &mut DbConn, archive_id: i64) -> Result<(), DieselError> {
  diesel::delete(amf::table.filter(amf::archive_id.eq(archive_id))).execute(conn)?;
  Ok(())
}

/// Chunk de filas de archivo sin enlace al workbench, con id mayor a
/// `after`, en orden ascendente de id.
pub(crate) fn pending_archive(conn: &mut DbConn,
                              kind: EntityKind,
                              source_ids: Option<&[i64]>,
                              after: i64,
                              limit: i64)
                              -> Result<Vec<Pending>, PersistenceError> {
  let mut query = ae::table.filter(ae::kind.eq(kind.as_str()))
                           .filter(ae::id.gt(after))
                           .filter(ae::id.ne_all(wa::table.select(wa::archive_id)))
                           .select((ae::id, ae::identifier))
                           .into_boxed();
  if let Some(ids) = source_ids {
    query =
      query.filter(ae::id.eq_any(aes::table.filter(aes::source_id.eq_any(ids.to_vec())).select(aes::archive_id)));
  }
  let rows = query.order(ae::id.asc()).limit(limit).load::<(i64, String)>(conn)?;
  Ok(rows.into_iter().map(|(id, identifier)| Pending { id, identifier }).collect())
}

/// Filas de archivo del chunk que ya tienen enlace al workbench. Se consulta
/// dentro de la transacción de escritura: otro proceso pudo migrarlas
/// después de la selección del chunk.
fn already_migrated(conn: &mut DbConn, archive_ids: &[i64]) -> Result<HashSet<i64>, DieselError> {
  let mut done = HashSet::new();
  for chunk in archive_ids.chunks(ID_CHUNK) {
    done.extend(wa::table.filter(wa::archive_id.eq_any(chunk)).select(wa::archive_id).load::<i64>(conn)?);
  }
  Ok(done)
}

/// Separa un patrón de reacción en patrones de compuesto por rol y los
/// enlaza a la procedencia del patrón. Devuelve cuántos patrones de
/// compuesto se crearon.
fn write_pattern_roles(conn: &mut DbConn, pattern_id: i64, pattern: &str, archive_ids: &[i64], user: &str, ts: i64)
                       -> Result<usize, DieselError> {
  let parts = match split_reaction_smiles(pattern) {
    Ok(parts) => parts,
    Err(e) => {
      log::debug!("patrón {} sin patrones de compuesto por rol: {}", pattern_id, e);
      return Ok(0);
    }
  };
  let mut created_rows = 0;
  for (role, members) in ROLES.iter().zip([&parts.reactants, &parts.spectators, &parts.products]) {
    for (position, identifier) in members.iter().enumerate() {
      let (compound_pattern_id, created) = intern_workbench(conn, EntityKind::CompoundPattern, identifier, user, ts)?;
      created_rows += usize::from(created);
      for archive_id in archive_ids {
        link_archive(conn, compound_pattern_id, *archive_id, user, ts)?;
      }
      let row = NewPatternRoleRow { pattern_id, role: role.as_str(), position: position as i32, compound_pattern_id };
      diesel::insert_into(pc::table).values(&row).on_conflict_do_nothing().execute(conn)?;
    }
  }
  Ok(created_rows)
}

pub(crate) fn write_standardized(conn: &mut DbConn,
                                 kind: EntityKind,
                                 results: Standardized<String>,
                                 options: &MigrationOptions,
                                 report: &mut MigrationReport)
                                 -> Result<(), PersistenceError> {
  let user = options.created_by.as_str();
  let mark = kind == EntityKind::Compound && options.mark_building_blocks;
  write_tx(conn, |conn| {
    let ts = now_ms();
    let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
    let done = already_migrated(conn, &ids)?;
    for (archive_id, outcome) in results {
      if done.contains(&archive_id) {
        log::debug!("fila de archivo {} ya migrada por otro proceso", archive_id);
        continue;
      }
      report.processed += 1;
      match outcome {
        Ok(identifier) => {
          let (id, created) = intern_workbench(conn, kind, &identifier, user, ts)?;
          report.created += usize::from(created);
          if mark {
            flag_building_block(conn, id, true, user)?;
          }
          if kind == EntityKind::ReactionPattern {
            report.created += write_pattern_roles(conn, id, &identifier, &[archive_id], user, ts)?;
          }
          link_archive(conn, id, archive_id, user, ts)?;
          clear_failure(conn, archive_id)?;
          report.migrated += 1;
        }
        Err(failure) => {
          log::debug!("fila de archivo {} no migrada: {}", archive_id, failure);
          record_failure(conn, kind, archive_id, &failure, ts)?;
          report.failed += 1;
          report.failures.push((archive_id, failure));
        }
      }
    }
    Ok(())
  })
}

/// Escribe la reacción, sus compuestos por rol y los enlaces de procedencia
/// de todos ellos a la fila de archivo de la reacción.
fn write_reaction(conn: &mut DbConn, archive_id: i64, reaction: &StandardizedReaction, user: &str, ts: i64)
                  -> Result<usize, DieselError> {
  let (reaction_id, created) = intern_workbench(conn, EntityKind::Reaction, &reaction.identifier, user, ts)?;
  let mut created_rows = usize::from(created);
  for (role, compounds) in ROLES.iter().zip([&reaction.reactants, &reaction.spectators, &reaction.products]) {
    for (position, identifier) in compounds.iter().enumerate() {
      let (compound_id, c) = intern_workbench(conn, EntityKind::Compound, identifier, user, ts)?;
      created_rows += usize::from(c);
      link_archive(conn, compound_id, archive_id, user, ts)?;
      let row = NewRoleRow { reaction_id, role: role.as_str(), position: position as i32, compound_id };
      diesel::insert_into(rc::table).values(&row).on_conflict_do_nothing().execute(conn)?;
    }
  }
  link_archive(conn, reaction_id, archive_id, user, ts)?;
  Ok(created_rows)
}

pub(crate) fn write_reactions(conn: &mut DbConn,
                              results: Standardized<StandardizedReaction>,
                              options: &MigrationOptions,
                              report: &mut MigrationReport)
                              -> Result<(), PersistenceError> {
  let user = options.created_by.as_str();
  write_tx(conn, |conn| {
    let ts = now_ms();
    let ids: Vec<i64> = results.iter().map(|(id, _)| *id).collect();
    let done = already_migrated(conn, &ids)?;
    for (archive_id, outcome) in results {
      if done.contains(&archive_id) {
        log::debug!("reacción de archivo {} ya migrada por otro proceso", archive_id);
        continue;
      }
      report.processed += 1;
      match outcome {
        Ok(reaction) => {
          report.created += write_reaction(conn, archive_id, &reaction, user, ts)?;
          clear_failure(conn, archive_id)?;
          report.migrated += 1;
        }
        Err(failure) => {
          log::debug!("reacción de archivo {} no migrada: {}", archive_id, failure);
          record_failure(conn, EntityKind::Reaction, archive_id, &failure, ts)?;
          report.failed += 1;
          report.failures.push((archive_id, failure));
        }
      }
    }
    Ok(())
  })
}

/// Entidades de `kind` sin marca de extracción (o con marca fallida si
/// `retry_failed`), con id mayor a `after`.
pub(crate) fn pending_extraction(conn: &mut DbConn, kind: EntityKind, retry_failed: bool, after: i64, limit: i64)
                                 -> Result<Vec<Pending>, PersistenceError> {
  let base = we::table.filter(we::kind.eq(kind.as_str())).filter(we::id.gt(after));
  let rows = if retry_failed {
    base.filter(we::id.ne_all(ex::table.filter(ex::succeeded.eq(true)).select(ex::entity_id)))
        .select((we::id, we::identifier))
        .order(we::id.asc())
        .limit(limit)
        .load::<(i64, String)>(conn)?
  } else {
    base.filter(we::id.ne_all(ex::table.select(ex::entity_id)))
        .select((we::id, we::identifier))
        .order(we::id.asc())
        .limit(limit)
        .load::<(i64, String)>(conn)?
  };
  Ok(rows.into_iter().map(|(id, identifier)| Pending { id, identifier }).collect())
}

fn mark_extraction(conn: &mut DbConn, entity_id: i64, succeeded: bool, detail: Option<&str>, user: &str, ts: i64)
                   -> Result<(), DieselError> {
  let marker = NewExtractionMarker { entity_id, succeeded, detail, attempted_at_ts: ts, attempted_by: user };
  diesel::insert_into(ex::table).values(&marker)
                                .on_conflict(ex::entity_id)
                                .do_update()
                                .set((ex::succeeded.eq(succeeded),
                                      ex::detail.eq(detail),
                                      ex::attempted_at_ts.eq(ts),
                                      ex::attempted_by.eq(user)))
                                .execute(conn)?;
  Ok(())
}

/// Escribe un chunk de extracción. Sobre reacciones, los patrones son de
/// reacción y se separan por rol; sobre compuestos, son patrones
/// estructurales de compuesto.
pub(crate) fn write_extractions(conn: &mut DbConn,
                                kind: EntityKind,
                                results: Vec<(i64, Result<Vec<String>, StrategyFailure>)>,
                                options: &ExtractionOptions,
                                report: &mut ExtractionReport)
                                -> Result<(), PersistenceError> {
  let user = options.created_by.as_str();
  let pattern_kind =
    if kind == EntityKind::Compound { EntityKind::CompoundPattern } else { EntityKind::ReactionPattern };
  write_tx(conn, |conn| {
    let ts = now_ms();
    for (entity_id, outcome) in results {
      report.processed += 1;
      match outcome {
        Ok(patterns) => {
          let archive_ids =
            wa::table.filter(wa::workbench_id.eq(entity_id)).select(wa::archive_id).load::<i64>(conn)?;
          for pattern in patterns {
            let (pattern_id, created) = intern_workbench(conn, pattern_kind, &pattern, user, ts)?;
            report.patterns_created += usize::from(created);
            for archive_id in &archive_ids {
              link_archive(conn, pattern_id, *archive_id, user, ts)?;
            }
            let linked = if kind == EntityKind::Compound {
              let link =
                NewStructurePatternLink { compound_id: entity_id, pattern_id, created_at_ts: ts, created_by: user };
              diesel::insert_into(sp::table).values(&link).on_conflict_do_nothing().execute(conn)?
            } else {
              write_pattern_roles(conn, pattern_id, &pattern, &archive_ids, user, ts)?;
              let link = NewPatternLink { reaction_id: entity_id, pattern_id, created_at_ts: ts, created_by: user };
              diesel::insert_into(pl::table).values(&link).on_conflict_do_nothing().execute(conn)?
            };
            report.links_created += usize::from(linked > 0);
          }
          mark_extraction(conn, entity_id, true, None, user, ts)?;
          report.succeeded += 1;
        }
        Err(e) => {
          log::warn!("extracción fallida para {} {}: {}", kind, entity_id, e);
          mark_extraction(conn, entity_id, false, Some(e.message.as_str()), user, ts)?;
          report.failed += 1;
        }
      }
    }
    Ok(())
  })
}

/// Filas de workbench por id, en orden ascendente de id.
fn load_rows(conn: &mut DbConn, ids: &[i64]) -> Result<Vec<WorkbenchEntityRow>, DieselError> {
  let mut sorted = ids.to_vec();
  sorted.sort_unstable();
  sorted.dedup();
  let mut rows = Vec::with_capacity(sorted.len());
  for chunk in sorted.chunks(ID_CHUNK) {
    rows.extend(we::table.filter(we::id.eq_any(chunk)).order(we::id.asc()).load::<WorkbenchEntityRow>(conn)?);
  }
  Ok(rows)
}

fn load_entities(conn: &mut DbConn, ids: &[i64]) -> Result<HashMap<i64, WorkbenchEntity>, PersistenceError> {
  let rows = load_rows(conn, ids)?;
  let mut out = HashMap::with_capacity(rows.len());
  for row in rows {
    out.insert(row.id, row.into_entity()?);
  }
  Ok(out)
}

/// Resuelve los compuestos por rol de cada reacción, cada lista ordenada
/// por posición. Conserva el orden de `rows`.
fn resolve_reactions(conn: &mut DbConn, rows: Vec<WorkbenchEntityRow>)
                     -> Result<Vec<WorkbenchReaction>, PersistenceError> {
  let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
  let mut roles = Vec::new();
  for chunk in ids.chunks(ID_CHUNK) {
    roles.extend(rc::table.filter(rc::reaction_id.eq_any(chunk))
                          .select((rc::reaction_id, rc::role, rc::position, rc::compound_id))
                          .order((rc::reaction_id.asc(), rc::role.asc(), rc::position.asc()))
                          .load::<(i64, String, i32, i64)>(conn)?);
  }
  let compound_ids: Vec<i64> = roles.iter().map(|r| r.3).collect();
  let compounds = load_entities(conn, &compound_ids)?;

  let mut by_reaction: HashMap<i64, Vec<(ReactionRole, RoleCompound)>> = HashMap::new();
  for (reaction_id, role, position, compound_id) in roles {
    let Some(compound) = compounds.get(&compound_id) else {
      continue;
    };
    let role: ReactionRole = role.parse()?;
    by_reaction.entry(reaction_id).or_default().push((role, RoleCompound { position, compound: compound.clone() }));
  }
  let mut out = Vec::with_capacity(rows.len());
  for row in rows {
    let members = by_reaction.remove(&row.id).unwrap_or_default();
    let mut reaction =
      WorkbenchReaction { reaction: row.into_entity()?, reactants: vec![], spectators: vec![], products: vec![] };
    for (role, member) in members {
      match role {
        ReactionRole::Reactant => reaction.reactants.push(member),
        ReactionRole::Spectator => reaction.spectators.push(member),
        ReactionRole::Product => reaction.products.push(member),
      }
    }
    out.push(reaction);
  }
  Ok(out)
}

pub(crate) fn select_workbench_entities(conn: &mut DbConn,
                                        kind: EntityKind,
                                        source_ids: Option<Vec<i64>>,
                                        page: Page)
                                        -> Result<Vec<WorkbenchRecord>, PersistenceError> {
  let mut query = we::table.filter(we::kind.eq(kind.as_str())).into_boxed();
  if let Some(ids) = source_ids {
    let from_sources = aes::table.filter(aes::source_id.eq_any(ids)).select(aes::archive_id);
    query = query.filter(we::id.eq_any(wa::table.filter(wa::archive_id.eq_any(from_sources)).select(wa::workbench_id)));
  }
  let rows = query.order(we::id.asc()).offset(page.offset).limit(page.limit).load::<WorkbenchEntityRow>(conn)?;
  let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
  let mut by_entity: HashMap<i64, Vec<i64>> = HashMap::new();
  for chunk in ids.chunks(ID_CHUNK) {
    let links = wa::table.filter(wa::workbench_id.eq_any(chunk))
                         .select((wa::workbench_id, wa::archive_id))
                         .order((wa::workbench_id.asc(), wa::archive_id.asc()))
                         .load::<(i64, i64)>(conn)?;
    for (workbench_id, archive_id) in links {
      by_entity.entry(workbench_id).or_default().push(archive_id);
    }
  }
  let mut out = Vec::with_capacity(rows.len());
  for row in rows {
    let archive_ids = by_entity.remove(&row.id).unwrap_or_default();
    out.push(WorkbenchRecord { entity: row.into_entity()?, archive_ids });
  }
  Ok(out)
}

/// Ids de los compuestos con esos identificadores. Se filtra por la clave
/// indexada y la igualdad exacta se comprueba aquí.
fn compound_ids_for(conn: &mut DbConn, identifiers: &[String]) -> Result<Vec<i64>, DieselError> {
  let wanted: HashSet<&str> = identifiers.iter().map(String::as_str).collect();
  let keys: Vec<String> = identifiers.iter().map(|i| identifier_digest(EntityKind::Compound, i)).collect();
  let mut out = Vec::new();
  for chunk in keys.chunks(ID_CHUNK) {
    let found = we::table.filter(we::kind.eq(EntityKind::Compound.as_str()))
                         .filter(we::identifier_key.eq_any(chunk))
                         .select((we::id, we::identifier))
                         .load::<(i64, String)>(conn)?;
    out.extend(found.into_iter().filter(|(_, identifier)| wanted.contains(identifier.as_str())).map(|(id, _)| id));
  }
  Ok(out)
}

/// Ids de reacciones que tienen alguno de los compuestos en el rol dado.
fn reactions_with(conn: &mut DbConn, role: ReactionRole, compound_ids: &[i64]) -> Result<BTreeSet<i64>, DieselError> {
  let mut out = BTreeSet::new();
  for chunk in compound_ids.chunks(ID_CHUNK) {
    out.extend(rc::table.filter(rc::role.eq(role.as_str()))
                        .filter(rc::compound_id.eq_any(chunk))
                        .select(rc::reaction_id)
                        .load::<i64>(conn)?);
  }
  Ok(out)
}

/// Sin filtro de roles, la página se pide a la base. Con filtro, los ids
/// candidatos se intersecan por rol y la página se corta sobre ellos.
pub(crate) fn select_workbench_reactions(conn: &mut DbConn, filter: &ReactionFilter, page: Page)
                                         -> Result<Vec<WorkbenchReaction>, PersistenceError> {
  let mut candidates: Option<BTreeSet<i64>> = None;
  for role in ROLES {
    if let Some(wanted) = filter.role_filter(role) {
      let compound_ids = compound_ids_for(conn, wanted)?;
      let in_role = reactions_with(conn, role, &compound_ids)?;
      candidates = Some(match candidates {
                          None => in_role,
                          Some(previous) => previous.intersection(&in_role).copied().collect(),
                        });
    }
  }
  let rows = match candidates {
    None => we::table.filter(we::kind.eq(EntityKind::Reaction.as_str()))
                     .order(we::id.asc())
                     .offset(page.offset)
                     .limit(page.limit)
                     .load::<WorkbenchEntityRow>(conn)?,
    Some(ids) => {
      let ids: Vec<i64> = ids.into_iter().skip(page.offset.max(0) as usize).take(page.limit.max(0) as usize).collect();
      load_rows(conn, &ids)?
    }
  };
  resolve_reactions(conn, rows)
}

pub(crate) fn select_workbench_reaction_patterns(conn: &mut DbConn, page: Page)
                                                 -> Result<Vec<WorkbenchReactionPattern>, PersistenceError> {
  let rows = we::table.filter(we::kind.eq(EntityKind::ReactionPattern.as_str()))
                      .order(we::id.asc())
                      .offset(page.offset)
                      .limit(page.limit)
                      .load::<WorkbenchEntityRow>(conn)?;
  let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
  let mut by_pattern: HashMap<i64, Vec<i64>> = HashMap::new();
  let mut roles = Vec::new();
  for chunk in ids.chunks(ID_CHUNK) {
    let links = pl::table.filter(pl::pattern_id.eq_any(chunk))
                         .select((pl::pattern_id, pl::reaction_id))
                         .order((pl::pattern_id.asc(), pl::reaction_id.asc()))
                         .load::<(i64, i64)>(conn)?;
    for (pattern_id, reaction_id) in links {
      by_pattern.entry(pattern_id).or_default().push(reaction_id);
    }
    roles.extend(pc::table.filter(pc::pattern_id.eq_any(chunk))
                          .select((pc::pattern_id, pc::role, pc::position, pc::compound_pattern_id))
                          .order((pc::pattern_id.asc(), pc::role.asc(), pc::position.asc()))
                          .load::<(i64, String, i32, i64)>(conn)?);
  }
  let component_ids: Vec<i64> = roles.iter().map(|r| r.3).collect();
  let components = load_entities(conn, &component_ids)?;
  let mut by_role: HashMap<i64, Vec<(ReactionRole, RoleCompound)>> = HashMap::new();
  for (pattern_id, role, position, component_id) in roles {
    let Some(compound) = components.get(&component_id) else {
      continue;
    };
    let role: ReactionRole = role.parse()?;
    by_role.entry(pattern_id).or_default().push((role, RoleCompound { position, compound: compound.clone() }));
  }
  let mut out = Vec::with_capacity(rows.len());
  for row in rows {
    let reaction_ids = by_pattern.remove(&row.id).unwrap_or_default();
    let members = by_role.remove(&row.id).unwrap_or_default();
    let mut pattern = WorkbenchReactionPattern::new(row.into_entity()?, reaction_ids);
    for (role, member) in members {
      pattern.push_role(role, member);
    }
    out.push(pattern);
  }
  Ok(out)
}

pub(crate) fn select_workbench_compound_patterns(conn: &mut DbConn, page: Page)
                                                 -> Result<Vec<WorkbenchCompoundPattern>, PersistenceError> {
  let rows = we::table.filter(we::kind.eq(EntityKind::CompoundPattern.as_str()))
                      .order(we::id.asc())
                      .offset(page.offset)
                      .limit(page.limit)
                      .load::<WorkbenchEntityRow>(conn)?;
  let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
  let mut by_pattern: HashMap<i64, Vec<i64>> = HashMap::new();
  for chunk in ids.chunks(ID_CHUNK) {
    let links = sp::table.filter(sp::pattern_id.eq_any(chunk))
                         .select((sp::pattern_id, sp::compound_id))
                         .order((sp::pattern_id.asc(), sp::compound_id.asc()))
                         .load::<(i64, i64)>(conn)?;
    for (pattern_id, compound_id) in links {
      by_pattern.entry(pattern_id).or_default().push(compound_id);
    }
  }
  let mut out = Vec::with_capacity(rows.len());
  for row in rows {
    let compound_ids = by_pattern.remove(&row.id).unwrap_or_default();
    out.push(WorkbenchCompoundPattern { pattern: row.into_entity()?, compound_ids });
  }
  Ok(out)
}

pub(crate) fn find_workbench_entity(conn: &mut DbConn, kind: EntityKind, identifier: &str)
                                    -> Result<Option<WorkbenchEntity>, PersistenceError> {
  let row = we::table.filter(we::kind.eq(kind.as_str()))
                     .filter(we::identifier_key.eq(identifier_digest(kind, identifier)))
                     .filter(we::identifier.eq(identifier))
                     .first::<WorkbenchEntityRow>(conn)
                     .optional()?;
  Ok(row.map(WorkbenchEntityRow::into_entity).transpose()?)
}

/// Reacciones que tienen al compuesto como producto, en orden de id.
pub(crate) fn reactions_producing(conn: &mut DbConn, compound_id: i64)
                                  -> Result<Vec<WorkbenchReaction>, PersistenceError> {
  let ids = rc::table.filter(rc::compound_id.eq(compound_id))
                     .filter(rc::role.eq(ReactionRole::Product.as_str()))
                     .select(rc::reaction_id)
                     .distinct()
                     .load::<i64>(conn)?;
  let rows = load_rows(conn, &ids)?;
  resolve_reactions(conn, rows)
}

pub(crate) fn set_building_block(conn: &mut DbConn, compound_id: i64, is_building_block: bool, updated_by: &str)
                                 -> Result<(), PersistenceError> {
  let kind = we::table.filter(we::id.eq(compound_id)).select(we::kind).first::<String>(conn).optional()?;
  match kind.as_deref() {
    Some(k) if k == EntityKind::Compound.as_str() => {
      write_tx(conn, |conn| Ok(flag_building_block(conn, compound_id, is_building_block, updated_by)?))?;
      Ok(())
    }
    Some(other) => {
      Err(DomainError::ValidationError(format!("la entidad {} es {}, no un compuesto", compound_id, other)).into())
    }
    None => Err(DomainError::ValidationError(format!("compuesto {} no encontrado", compound_id)).into()),
  }
}

/// Marca los compuestos cuya procedencia incluye filas de compuesto de las
/// fuentes dadas. Nunca desmarca.
pub(crate) fn mark_building_blocks(conn: &mut DbConn, source_ids: Vec<i64>, updated_by: &str)
                                   -> Result<usize, PersistenceError> {
  if source_ids.is_empty() {
    return Ok(0);
  }
  let compound = EntityKind::Compound.as_str();
  let from_sources = aes::table.filter(aes::source_id.eq_any(source_ids)).select(aes::archive_id);
  let archive_compounds = ae::table.filter(ae::kind.eq(compound)).filter(ae::id.eq_any(from_sources)).select(ae::id);
  let targets = wa::table.filter(wa::archive_id.eq_any(archive_compounds)).select(wa::workbench_id);
  let ts = now_ms();
  write_tx(conn, |conn| {
    Ok(diesel::update(we::table.filter(we::kind.eq(compound))
                               .filter(we::is_building_block.eq(false))
                               .filter(we::id.eq_any(targets)))
       .set((we::is_building_block.eq(true), we::updated_at_ts.eq(Some(ts)), we::updated_by.eq(Some(updated_by))))
       .execute(conn)?)
  })
}

pub(crate) fn select_migration_failures(conn: &mut DbConn, kind: EntityKind)
                                        -> Result<Vec<MigrationFailureRecord>, PersistenceError> {
  let rows = amf::table.filter(amf::kind.eq(kind.as_str())).order(amf::archive_id.asc()).load::<FailureRow>(conn)?;
  let mut out = Vec::with_capacity(rows.len());
  for r in rows {
    out.push(MigrationFailureRecord { archive_id: r.archive_id,
                                      kind: r.kind.parse()?,
                                      reason: r.reason,
                                      detail: r.detail,
                                      attempts: r.attempts,
                                      last_attempt_at: datetime_from_millis(r.last_attempt_ts) });
  }
  Ok(out)
}

pub(crate) fn verify_integrity(conn: &mut DbConn) -> Result<IntegrityReport, PersistenceError> {
  let reaction = EntityKind::Reaction.as_str();
  let orphan_workbench_entities =
    we::table.filter(we::id.ne_all(wa::table.select(wa::workbench_id))).count().get_result::<i64>(conn)?;
  let archive_entities_without_source =
    ae::table.filter(ae::id.ne_all(aes::table.select(aes::archive_id))).count().get_result::<i64>(conn)?;
  let reactions_without_reactants =
    we::table.filter(we::kind.eq(reaction))
             .filter(we::id.ne_all(rc::table.filter(rc::role.eq(ReactionRole::Reactant.as_str())).select(rc::reaction_id)))
             .count()
             .get_result::<i64>(conn)?;
  let reactions_without_products =
    we::table.filter(we::kind.eq(reaction))
             .filter(we::id.ne_all(rc::table.filter(rc::role.eq(ReactionRole::Product.as_str())).select(rc::reaction_id)))
             .count()
             .get_result::<i64>(conn)?;
  Ok(IntegrityReport { orphan_workbench_entities,
                       archive_entities_without_source,
                       reactions_without_reactants,
                       reactions_without_products })
}

pub(crate) fn statistics(conn: &mut DbConn) -> Result<StoreStatistics, PersistenceError> {
  use crate::schema::archive_source as src;
  let mut stats = StoreStatistics { sources: src::table.count().get_result(conn)?,
                                    reaction_role_rows: rc::table.count().get_result(conn)?,
                                    pattern_links: pl::table.count().get_result(conn)?,
                                    pattern_role_rows: pc::table.count().get_result(conn)?,
                                    structure_pattern_links: sp::table.count().get_result(conn)?,
                                    migration_failures: amf::table.count().get_result(conn)?,
                                    ..Default::default() };
  for kind in EntityKind::ALL {
    let archived = ae::table.filter(ae::kind.eq(kind.as_str())).count().get_result::<i64>(conn)?;
    let curated = we::table.filter(we::kind.eq(kind.as_str())).count().get_result::<i64>(conn)?;
    stats.archive_entities.push((kind, archived));
    stats.workbench_entities.push((kind, curated));
  }
  Ok(stats)
}
