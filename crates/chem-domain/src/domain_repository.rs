use crate::migration::{self, Pending};
use crate::strategy::split_reaction_smiles;
use crate::{ArchiveEntity, ArchiveRecord, DomainError, EntityKind, ExtractionOptions,
            ExtractionReport, IdentityKey, InsertOptions, InsertReport, IntegrityReport, MigrationFailure,
            MigrationFailureRecord, MigrationOptions, MigrationReport, Page, PatternExtractor, RawRecord,
            ReactionFilter, ReactionGraph, ReactionRole, ReactionStandardizer, RoleCompound, RowOutcome, Source,
            SourceKey, StandardizedReaction, Standardizer, StoreStatistics, WorkbenchCompoundPattern, WorkbenchEntity,
            WorkbenchReaction, WorkbenchReactionPattern, WorkbenchRecord};
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

/// Trait que define las operaciones del almacén de curación: ingesta al
/// archivo, migración al workbench, extracción de patrones y consultas.
///
/// Las operaciones por lotes devuelven reportes con conteos agregados; los
/// problemas por fila nunca abortan el lote. Un `Err` indica un fallo del
/// almacenamiento y aborta la transacción en curso.
pub trait CurationRepository: Send + Sync {
    /// Crea el esquema. Idempotente.
    fn create_tables(&self) -> Result<(), DomainError>;

    /// Elimina el esquema y todos sus datos.
    fn drop_tables(&self) -> Result<(), DomainError>;

    /// Inserta cadenas crudas en el archivo con su fuente de procedencia.
    /// Re-ejecutar con la misma entrada no crea filas ni aristas nuevas.
    fn insert_archive_entities(&self,
                               kind: EntityKind,
                               records: &[RawRecord],
                               source: &SourceKey,
                               options: &InsertOptions)
                               -> Result<InsertReport, DomainError>;

    /// Lista el registro de fuentes.
    fn select_sources(&self) -> Result<Vec<Source>, DomainError>;

    /// Filas de archivo con sus fuentes, opcionalmente restringidas a un
    /// conjunto de fuentes.
    fn select_archive_entities(&self,
                               kind: EntityKind,
                               sources: Option<&[SourceKey]>,
                               page: Page)
                               -> Result<Vec<ArchiveRecord>, DomainError>;

    /// Migra al workbench las filas de archivo sin enlace (compuestos,
    /// patrones de compuesto o patrones de reacción).
    fn migrate_archive_to_workbench(&self,
                                    kind: EntityKind,
                                    standardizer: &dyn Standardizer,
                                    options: &MigrationOptions)
                                    -> Result<MigrationReport, DomainError>;

    /// Migra reacciones y llena el índice de roles.
    fn migrate_archive_to_workbench_reactions(&self,
                                              standardizer: &dyn ReactionStandardizer,
                                              options: &MigrationOptions)
                                              -> Result<MigrationReport, DomainError>;

    /// Extrae patrones de transformación de las reacciones sin marca de
    /// extracción. Cada patrón se separa además en patrones de compuesto por
    /// rol cuando su sintaxis lo permite.
    fn extract_workbench_reaction_transformation_patterns(&self,
                                                          extractor: &dyn PatternExtractor,
                                                          options: &ExtractionOptions)
                                                          -> Result<ExtractionReport, DomainError>;

    /// Extrae patrones estructurales de los compuestos sin marca de
    /// extracción y los enlaza como patrones de compuesto.
    fn extract_workbench_compound_structure_patterns(&self,
                                                     extractor: &dyn PatternExtractor,
                                                     options: &ExtractionOptions)
                                                     -> Result<ExtractionReport, DomainError>;

    fn select_workbench_entities(&self,
                                 kind: EntityKind,
                                 sources: Option<&[SourceKey]>,
                                 page: Page)
                                 -> Result<Vec<WorkbenchRecord>, DomainError>;

    /// Reacciones con sus compuestos resueltos por rol.
    fn select_workbench_reactions(&self, filter: &ReactionFilter, page: Page)
                                  -> Result<Vec<WorkbenchReaction>, DomainError>;

    /// Patrones de reacción con sus reacciones y sus patrones de compuesto
    /// por rol.
    fn select_workbench_reaction_patterns(&self, page: Page) -> Result<Vec<WorkbenchReactionPattern>, DomainError>;

    /// Patrones de compuesto con los compuestos en los que se encontraron.
    fn select_workbench_compound_patterns(&self, page: Page) -> Result<Vec<WorkbenchCompoundPattern>, DomainError>;

    fn find_workbench_entity(&self, kind: EntityKind, identifier: &str)
                             -> Result<Option<WorkbenchEntity>, DomainError>;

    fn set_building_block(&self, compound_id: i64, is_building_block: bool, updated_by: &str)
                          -> Result<(), DomainError>;

    /// Marca como building block cada compuesto cuya procedencia llega a
    /// alguna de las fuentes. Devuelve cuántos compuestos cambiaron.
    fn mark_building_blocks_from_sources(&self, sources: &[SourceKey], updated_by: &str)
                                         -> Result<usize, DomainError>;

    fn select_migration_failures(&self, kind: EntityKind) -> Result<Vec<MigrationFailureRecord>, DomainError>;

    fn verify_integrity(&self) -> Result<IntegrityReport, DomainError>;

    fn statistics(&self) -> Result<StoreStatistics, DomainError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct RoleRow {
    role: ReactionRole,
    position: i32,
    compound_id: i64,
}

/// Implementación en memoria para tests y desarrollo.
///
/// Las claves de identidad viven en `DashMap`: el look-up-or-create es un
/// `entry` atómico, así que workers concurrentes nunca crean dos filas para
/// la misma cadena.
pub struct InMemoryCurationRepository {
    sequence: AtomicI64,
    source_ids: DashMap<SourceKey, i64>,
    sources: DashMap<i64, Source>,
    archive_ids: DashMap<IdentityKey, i64>,
    archive: DashMap<i64, ArchiveEntity>,
    archive_sources: DashSet<(i64, i64)>,
    workbench_ids: DashMap<IdentityKey, i64>,
    workbench: DashMap<i64, WorkbenchEntity>,
    workbench_archives: DashSet<(i64, i64)>,
    migrated: DashSet<i64>,
    roles: DashMap<i64, Vec<RoleRow>>,
    producers: DashMap<i64, BTreeSet<i64>>,
    pattern_links: DashSet<(i64, i64)>,
    pattern_roles: DashMap<i64, Vec<RoleRow>>,
    structure_links: DashSet<(i64, i64)>,
    failures: DashMap<i64, MigrationFailureRecord>,
    extractions: DashMap<i64, bool>,
}

impl InMemoryCurationRepository {
    pub fn new() -> Self {
        Self { sequence: AtomicI64::new(0),
               source_ids: DashMap::new(),
               sources: DashMap::new(),
               archive_ids: DashMap::new(),
               archive: DashMap::new(),
               archive_sources: DashSet::new(),
               workbench_ids: DashMap::new(),
               workbench: DashMap::new(),
               workbench_archives: DashSet::new(),
               migrated: DashSet::new(),
               roles: DashMap::new(),
               producers: DashMap::new(),
               pattern_links: DashSet::new(),
               pattern_roles: DashMap::new(),
               structure_links: DashSet::new(),
               failures: DashMap::new(),
               extractions: DashMap::new() }
    }

    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn intern_source(&self, key: &SourceKey, created_by: &str) -> i64 {
        match self.source_ids.entry(key.clone()) {
            Entry::Occupied(o) => *o.get(),
            Entry::Vacant(v) => {
                let id = self.next_id();
                self.sources.insert(id,
                                    Source { id, key: key.clone(), created_at: Utc::now(), created_by: created_by.into() });
                v.insert(id);
                id
            }
        }
    }

    fn intern_archive(&self, kind: EntityKind, record: &RawRecord, identifier: &str, created_by: &str) -> (i64, bool) {
        match self.archive_ids.entry(IdentityKey::new(kind, identifier)) {
            Entry::Occupied(o) => (*o.get(), false),
            Entry::Vacant(v) => {
                let id = self.next_id();
                self.archive.insert(id,
                                    ArchiveEntity { id,
                                                    kind,
                                                    identifier: identifier.to_string(),
                                                    properties: record.properties.clone(),
                                                    created_at: Utc::now(),
                                                    created_by: created_by.into() });
                v.insert(id);
                (id, true)
            }
        }
    }

    fn intern_workbench(&self, kind: EntityKind, identifier: &str, created_by: &str) -> (i64, bool) {
        match self.workbench_ids.entry(IdentityKey::new(kind, identifier)) {
            Entry::Occupied(o) => (*o.get(), false),
            Entry::Vacant(v) => {
                let id = self.next_id();
                self.workbench.insert(id,
                                      WorkbenchEntity { id,
                                                        kind,
                                                        identifier: identifier.to_string(),
                                                        is_building_block: false,
                                                        created_at: Utc::now(),
                                                        created_by: created_by.into(),
                                                        updated_at: None,
                                                        updated_by: None });
                v.insert(id);
                (id, true)
            }
        }
    }

    fn flag_building_block(&self, compound_id: i64, flag: bool, updated_by: &str) -> bool {
        match self.workbench.get_mut(&compound_id) {
            Some(mut e) if e.is_building_block != flag => {
                e.is_building_block = flag;
                e.updated_at = Some(Utc::now());
                e.updated_by = Some(updated_by.into());
                true
            }
            _ => false,
        }
    }

    fn source_ids_for(&self, keys: &[SourceKey]) -> HashSet<i64> {
        keys.iter().filter_map(|k| self.source_ids.get(k).map(|id| *id)).collect()
    }

    fn archive_from_sources(&self, sources: Option<&[SourceKey]>) -> Option<HashSet<i64>> {
        let keys = sources?;
        let wanted = self.source_ids_for(keys);
        Some(self.archive_sources.iter().filter(|e| wanted.contains(&e.1)).map(|e| e.0).collect())
    }

    /// Filas pendientes de migrar: sin enlace al workbench, con id mayor al
    /// cursor, en orden ascendente.
    fn pending_archive(&self, kind: EntityKind, allowed: Option<&HashSet<i64>>, after: i64, limit: usize)
                       -> Vec<Pending> {
        let mut pending: Vec<Pending> =
            self.archive
                .iter()
                .filter(|e| e.kind == kind && e.id > after && !self.migrated.contains(&e.id))
                .filter(|e| allowed.map_or(true, |a| a.contains(&e.id)))
                .map(|e| Pending { id: e.id, identifier: e.identifier.clone() })
                .collect();
        pending.sort_by_key(|p| p.id);
        pending.truncate(limit);
        pending
    }

    fn record_failure(&self, kind: EntityKind, archive_id: i64, failure: &MigrationFailure) {
        let now = Utc::now();
        self.failures
            .entry(archive_id)
            .and_modify(|f| {
                f.reason = failure.reason().to_string();
                f.detail = failure.to_string();
                f.attempts += 1;
                f.last_attempt_at = now;
            })
            .or_insert_with(|| MigrationFailureRecord { archive_id,
                                                        kind,
                                                        reason: failure.reason().to_string(),
                                                        detail: failure.to_string(),
                                                        attempts: 1,
                                                        last_attempt_at: now });
    }

    fn link_reaction(&self, archive_id: i64, reaction: &StandardizedReaction, created_by: &str) -> (i64, usize) {
        let (reaction_id, created) = self.intern_workbench(EntityKind::Reaction, &reaction.identifier, created_by);
        let mut created_rows = usize::from(created);
        let mut rows = Vec::new();
        for (role, compounds) in [(ReactionRole::Reactant, &reaction.reactants),
                                  (ReactionRole::Spectator, &reaction.spectators),
                                  (ReactionRole::Product, &reaction.products)]
        {
            for (position, identifier) in compounds.iter().enumerate() {
                let (compound_id, c) = self.intern_workbench(EntityKind::Compound, identifier, created_by);
                created_rows += usize::from(c);
                self.workbench_archives.insert((compound_id, archive_id));
                rows.push(RoleRow { role, position: position as i32, compound_id });
            }
        }
        if let Entry::Vacant(v) = self.roles.entry(reaction_id) {
            for row in rows.iter().filter(|r| r.role == ReactionRole::Product) {
                self.producers.entry(row.compound_id).or_default().insert(reaction_id);
            }
            v.insert(rows);
        }
        self.workbench_archives.insert((reaction_id, archive_id));
        (reaction_id, created_rows)
    }

    /// Separa un patrón de reacción en patrones de compuesto por rol. Los
    /// componentes heredan la procedencia del patrón.
    fn link_pattern_roles(&self, pattern_id: i64, pattern: &str, archive_ids: &[i64], created_by: &str) -> usize {
        let parts = match split_reaction_smiles(pattern) {
            Ok(parts) => parts,
            Err(e) => {
                log::debug!("patrón {} sin patrones de compuesto por rol: {}", pattern_id, e);
                return 0;
            }
        };
        let mut created_rows = 0;
        let mut rows = Vec::new();
        for (role, members) in [(ReactionRole::Reactant, &parts.reactants),
                                (ReactionRole::Spectator, &parts.spectators),
                                (ReactionRole::Product, &parts.products)]
        {
            for (position, identifier) in members.iter().enumerate() {
                let (id, created) = self.intern_workbench(EntityKind::CompoundPattern, identifier, created_by);
                created_rows += usize::from(created);
                for archive_id in archive_ids {
                    self.workbench_archives.insert((id, *archive_id));
                }
                rows.push(RoleRow { role, position: position as i32, compound_id: id });
            }
        }
        self.pattern_roles.entry(pattern_id).or_insert(rows);
        created_rows
    }

    fn archive_ids_of(&self, workbench_id: i64) -> Vec<i64> {
        let mut ids: Vec<i64> = self.workbench_archives.iter().filter(|e| e.0 == workbench_id).map(|e| e.1).collect();
        ids.sort_unstable();
        ids
    }

    /// Bucle común de extracción: entidades de `kind` sin marca (o con marca
    /// fallida si `retry_failed`), en orden de id y por chunks.
    fn run_extraction<W>(&self,
                         kind: EntityKind,
                         extractor: &dyn PatternExtractor,
                         options: &ExtractionOptions,
                         mut write: W)
                         -> Result<ExtractionReport, DomainError>
        where W: FnMut(i64, Vec<String>, &mut ExtractionReport)
    {
        let pool = migration::worker_pool(options.workers)?;
        let mut pending: Vec<Pending> =
            self.workbench
                .iter()
                .filter(|e| e.kind == kind)
                .filter(|e| match self.extractions.get(&e.id) {
                    None => true,
                    Some(succeeded) => !*succeeded && options.retry_failed,
                })
                .map(|e| Pending { id: e.id, identifier: e.identifier.clone() })
                .collect();
        pending.sort_by_key(|p| p.id);

        let mut report = ExtractionReport::default();
        for chunk in pending.chunks(options.chunk_size.max(1)) {
            for (id, outcome) in migration::extract_chunk(&pool, chunk, extractor) {
                report.processed += 1;
                match outcome {
                    Ok(patterns) => {
                        write(id, patterns, &mut report);
                        self.extractions.insert(id, true);
                        report.succeeded += 1;
                    }
                    Err(e) => {
                        log::warn!("extracción fallida para {} {}: {}", kind, id, e);
                        self.extractions.insert(id, false);
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }

    fn resolve_pattern(&self, pattern: &WorkbenchEntity) -> WorkbenchReactionPattern {
        let mut reaction_ids: Vec<i64> = self.pattern_links.iter().filter(|l| l.1 == pattern.id).map(|l| l.0).collect();
        reaction_ids.sort_unstable();
        let mut resolved = WorkbenchReactionPattern::new(pattern.clone(), reaction_ids);
        let mut rows = self.pattern_roles.get(&pattern.id).map(|r| r.clone()).unwrap_or_default();
        rows.sort();
        for row in rows {
            if let Some(compound) = self.workbench.get(&row.compound_id).map(|c| c.clone()) {
                resolved.push_role(row.role, RoleCompound { position: row.position, compound });
            }
        }
        resolved
    }

    fn resolve_reaction(&self, reaction_id: i64) -> Option<WorkbenchReaction> {
        let reaction = self.workbench.get(&reaction_id)?.clone();
        let mut rows = self.roles.get(&reaction_id).map(|r| r.clone()).unwrap_or_default();
        rows.sort();
        let mut resolved = WorkbenchReaction { reaction, reactants: vec![], spectators: vec![], products: vec![] };
        for row in rows {
            let Some(compound) = self.workbench.get(&row.compound_id).map(|c| c.clone()) else {
                continue;
            };
            let rc = RoleCompound { position: row.position, compound };
            match row.role {
                ReactionRole::Reactant => resolved.reactants.push(rc),
                ReactionRole::Spectator => resolved.spectators.push(rc),
                ReactionRole::Product => resolved.products.push(rc),
            }
        }
        Some(resolved)
    }

    fn page_of<T>(mut items: Vec<T>, page: Page) -> Vec<T> {
        let start = (page.offset as usize).min(items.len());
        let end = start.saturating_add(page.limit as usize).min(items.len());
        items.truncate(end);
        items.drain(..start);
        items
    }
}

impl CurationRepository for InMemoryCurationRepository {
    fn create_tables(&self) -> Result<(), DomainError> {
        Ok(())
    }

    fn drop_tables(&self) -> Result<(), DomainError> {
        self.source_ids.clear();
        self.sources.clear();
        self.archive_ids.clear();
        self.archive.clear();
        self.archive_sources.clear();
        self.workbench_ids.clear();
        self.workbench.clear();
        self.workbench_archives.clear();
        self.migrated.clear();
        self.roles.clear();
        self.producers.clear();
        self.pattern_links.clear();
        self.pattern_roles.clear();
        self.structure_links.clear();
        self.failures.clear();
        self.extractions.clear();
        Ok(())
    }

    fn insert_archive_entities(&self,
                               kind: EntityKind,
                               records: &[RawRecord],
                               source: &SourceKey,
                               options: &InsertOptions)
                               -> Result<InsertReport, DomainError> {
        source.validate()?;
        let source_id = self.intern_source(source, &options.created_by);
        let mut report = InsertReport { source_id, ..Default::default() };
        for (index, record) in records.iter().enumerate() {
            let status = match crate::validate_raw_identifier(record.identifier.as_deref()) {
                Ok(identifier) => {
                    let (id, created) = self.intern_archive(kind, record, identifier, &options.created_by);
                    report.inserted += usize::from(created);
                    report.linked += usize::from(self.archive_sources.insert((id, source_id)));
                    report.succeeded += 1;
                    Ok(id)
                }
                Err(rejection) => {
                    log::warn!("fila {} de {} rechazada: {}", index, source, rejection);
                    report.failed += 1;
                    Err(rejection)
                }
            };
            report.outcomes.push(RowOutcome { index, status });
        }
        Ok(report)
    }

    fn select_sources(&self) -> Result<Vec<Source>, DomainError> {
        let mut out: Vec<Source> = self.sources.iter().map(|s| s.clone()).collect();
        out.sort_by_key(|s| s.id);
        Ok(out)
    }

    fn select_archive_entities(&self,
                               kind: EntityKind,
                               sources: Option<&[SourceKey]>,
                               page: Page)
                               -> Result<Vec<ArchiveRecord>, DomainError> {
        let allowed = self.archive_from_sources(sources);
        let mut entities: Vec<ArchiveEntity> =
            self.archive
                .iter()
                .filter(|e| e.kind == kind && allowed.as_ref().map_or(true, |a| a.contains(&e.id)))
                .map(|e| e.clone())
                .collect();
        entities.sort_by_key(|e| e.id);
        let entities = Self::page_of(entities, page);
        Ok(entities.into_iter()
                   .map(|entity| {
                       let mut srcs: Vec<Source> =
                           self.archive_sources
                               .iter()
                               .filter(|e| e.0 == entity.id)
                               .filter_map(|e| self.sources.get(&e.1).map(|s| s.clone()))
                               .collect();
                       srcs.sort_by_key(|s| s.id);
                       ArchiveRecord { entity, sources: srcs }
                   })
                   .collect())
    }

    fn migrate_archive_to_workbench(&self,
                                    kind: EntityKind,
                                    standardizer: &dyn Standardizer,
                                    options: &MigrationOptions)
                                    -> Result<MigrationReport, DomainError> {
        if kind == EntityKind::Reaction {
            return Err(DomainError::ValidationError("las reacciones se migran con \
                                                     migrate_archive_to_workbench_reactions"
                                                                                             .into()));
        }
        let pool = migration::worker_pool(options.workers)?;
        let allowed = self.archive_from_sources(options.sources.as_deref());
        let mut report = MigrationReport::new(kind);
        let mut cursor = 0;
        loop {
            let pending = self.pending_archive(kind, allowed.as_ref(), cursor, options.chunk_size.max(1));
            let Some(last) = pending.last() else {
                break;
            };
            cursor = last.id;
            for (archive_id, outcome) in migration::standardize_chunk(&pool, &pending, standardizer) {
                if self.migrated.contains(&archive_id) {
                    continue;
                }
                match outcome {
                    Ok(identifier) => {
                        if !self.migrated.insert(archive_id) {
                            continue;
                        }
                        report.processed += 1;
                        let (id, created) = self.intern_workbench(kind, &identifier, &options.created_by);
                        report.created += usize::from(created);
                        if kind == EntityKind::Compound && options.mark_building_blocks {
                            self.flag_building_block(id, true, &options.created_by);
                        }
                        if kind == EntityKind::ReactionPattern {
                            report.created += self.link_pattern_roles(id, &identifier, &[archive_id], &options.created_by);
                        }
                        self.workbench_archives.insert((id, archive_id));
                        self.failures.remove(&archive_id);
                        report.migrated += 1;
                    }
                    Err(failure) => {
                        report.processed += 1;
                        self.record_failure(kind, archive_id, &failure);
                        report.failed += 1;
                        report.failures.push((archive_id, failure));
                    }
                }
            }
        }
        Ok(report)
    }

    fn migrate_archive_to_workbench_reactions(&self,
                                              standardizer: &dyn ReactionStandardizer,
                                              options: &MigrationOptions)
                                              -> Result<MigrationReport, DomainError> {
        let kind = EntityKind::Reaction;
        let pool = migration::worker_pool(options.workers)?;
        let allowed = self.archive_from_sources(options.sources.as_deref());
        let mut report = MigrationReport::new(kind);
        let mut cursor = 0;
        loop {
            let pending = self.pending_archive(kind, allowed.as_ref(), cursor, options.chunk_size.max(1));
            let Some(last) = pending.last() else {
                break;
            };
            cursor = last.id;
            for (archive_id, outcome) in migration::standardize_reaction_chunk(&pool, &pending, standardizer) {
                if self.migrated.contains(&archive_id) {
                    continue;
                }
                match outcome {
                    Ok(reaction) => {
                        if !self.migrated.insert(archive_id) {
                            continue;
                        }
                        report.processed += 1;
                        let (_, created) = self.link_reaction(archive_id, &reaction, &options.created_by);
                        report.created += created;
                        self.failures.remove(&archive_id);
                        report.migrated += 1;
                    }
                    Err(failure) => {
                        report.processed += 1;
                        self.record_failure(kind, archive_id, &failure);
                        report.failed += 1;
                        report.failures.push((archive_id, failure));
                    }
                }
            }
        }
        Ok(report)
    }

    fn extract_workbench_reaction_transformation_patterns(&self,
                                                          extractor: &dyn PatternExtractor,
                                                          options: &ExtractionOptions)
                                                          -> Result<ExtractionReport, DomainError> {
        let user = options.created_by.as_str();
        self.run_extraction(EntityKind::Reaction, extractor, options, |reaction_id, patterns, report| {
                let archive_ids = self.archive_ids_of(reaction_id);
                for pattern in patterns {
                    let (pattern_id, created) = self.intern_workbench(EntityKind::ReactionPattern, &pattern, user);
                    report.patterns_created += usize::from(created);
                    for archive_id in &archive_ids {
                        self.workbench_archives.insert((pattern_id, *archive_id));
                    }
                    self.link_pattern_roles(pattern_id, &pattern, &archive_ids, user);
                    report.links_created += usize::from(self.pattern_links.insert((reaction_id, pattern_id)));
                }
            })
    }

    fn extract_workbench_compound_structure_patterns(&self,
                                                     extractor: &dyn PatternExtractor,
                                                     options: &ExtractionOptions)
                                                     -> Result<ExtractionReport, DomainError> {
        let user = options.created_by.as_str();
        self.run_extraction(EntityKind::Compound, extractor, options, |compound_id, patterns, report| {
                let archive_ids = self.archive_ids_of(compound_id);
                for pattern in patterns {
                    let (pattern_id, created) = self.intern_workbench(EntityKind::CompoundPattern, &pattern, user);
                    report.patterns_created += usize::from(created);
                    for archive_id in &archive_ids {
                        self.workbench_archives.insert((pattern_id, *archive_id));
                    }
                    report.links_created += usize::from(self.structure_links.insert((compound_id, pattern_id)));
                }
            })
    }

    fn select_workbench_entities(&self,
                                 kind: EntityKind,
                                 sources: Option<&[SourceKey]>,
                                 page: Page)
                                 -> Result<Vec<WorkbenchRecord>, DomainError> {
        let allowed = self.archive_from_sources(sources);
        let mut out: Vec<WorkbenchRecord> =
            self.workbench
                .iter()
                .filter(|e| e.kind == kind)
                .map(|e| {
                    let mut archive_ids: Vec<i64> =
                        self.workbench_archives.iter().filter(|l| l.0 == e.id).map(|l| l.1).collect();
                    archive_ids.sort_unstable();
                    WorkbenchRecord { entity: e.clone(), archive_ids }
                })
                .filter(|r| allowed.as_ref().map_or(true, |a| r.archive_ids.iter().any(|id| a.contains(id))))
                .collect();
        out.sort_by_key(|r| r.entity.id);
        Ok(Self::page_of(out, page))
    }

    fn select_workbench_reactions(&self, filter: &ReactionFilter, page: Page)
                                  -> Result<Vec<WorkbenchReaction>, DomainError> {
        let mut ids: Vec<i64> = self.roles.iter().map(|r| *r.key()).collect();
        ids.sort_unstable();
        let out: Vec<WorkbenchReaction> =
            ids.into_iter().filter_map(|id| self.resolve_reaction(id)).filter(|r| filter.matches(r)).collect();
        Ok(Self::page_of(out, page))
    }

    fn select_workbench_reaction_patterns(&self, page: Page) -> Result<Vec<WorkbenchReactionPattern>, DomainError> {
        let mut patterns: Vec<WorkbenchEntity> =
            self.workbench.iter().filter(|e| e.kind == EntityKind::ReactionPattern).map(|e| e.clone()).collect();
        patterns.sort_by_key(|p| p.id);
        Ok(Self::page_of(patterns, page).iter().map(|p| self.resolve_pattern(p)).collect())
    }

    fn select_workbench_compound_patterns(&self, page: Page) -> Result<Vec<WorkbenchCompoundPattern>, DomainError> {
        let mut out: Vec<WorkbenchCompoundPattern> =
            self.workbench
                .iter()
                .filter(|e| e.kind == EntityKind::CompoundPattern)
                .map(|e| {
                    let mut compound_ids: Vec<i64> =
                        self.structure_links.iter().filter(|l| l.1 == e.id).map(|l| l.0).collect();
                    compound_ids.sort_unstable();
                    WorkbenchCompoundPattern { pattern: e.clone(), compound_ids }
                })
                .collect();
        out.sort_by_key(|p| p.pattern.id);
        Ok(Self::page_of(out, page))
    }

    fn find_workbench_entity(&self, kind: EntityKind, identifier: &str)
                             -> Result<Option<WorkbenchEntity>, DomainError> {
        let id = self.workbench_ids.get(&IdentityKey::new(kind, identifier)).map(|id| *id);
        Ok(id.and_then(|id| self.workbench.get(&id).map(|e| e.clone())))
    }

    fn set_building_block(&self, compound_id: i64, is_building_block: bool, updated_by: &str)
                          -> Result<(), DomainError> {
        match self.workbench.get(&compound_id).map(|e| e.kind) {
            Some(EntityKind::Compound) => {
                self.flag_building_block(compound_id, is_building_block, updated_by);
                Ok(())
            }
            Some(other) => Err(DomainError::ValidationError(format!("la entidad {} es {}, no un compuesto",
                                                                    compound_id, other))),
            None => Err(DomainError::ValidationError(format!("compuesto {} no encontrado", compound_id))),
        }
    }

    fn mark_building_blocks_from_sources(&self, sources: &[SourceKey], updated_by: &str)
                                         -> Result<usize, DomainError> {
        let allowed = self.archive_from_sources(Some(sources)).unwrap_or_default();
        let compound_archives: HashSet<i64> =
            allowed.into_iter()
                   .filter(|id| self.archive.get(id).map(|a| a.kind == EntityKind::Compound).unwrap_or(false))
                   .collect();
        let targets: BTreeSet<i64> = self.workbench_archives
                                         .iter()
                                         .filter(|l| compound_archives.contains(&l.1))
                                         .map(|l| l.0)
                                         .collect();
        Ok(targets.into_iter().filter(|id| self.flag_building_block(*id, true, updated_by)).count())
    }

    fn select_migration_failures(&self, kind: EntityKind) -> Result<Vec<MigrationFailureRecord>, DomainError> {
        let mut out: Vec<MigrationFailureRecord> =
            self.failures.iter().filter(|f| f.kind == kind).map(|f| f.clone()).collect();
        out.sort_by_key(|f| f.archive_id);
        Ok(out)
    }

    fn verify_integrity(&self) -> Result<IntegrityReport, DomainError> {
        let linked: HashSet<i64> = self.workbench_archives.iter().map(|l| l.0).collect();
        let sourced: HashSet<i64> = self.archive_sources.iter().map(|l| l.0).collect();
        let mut report = IntegrityReport::default();
        report.orphan_workbench_entities = self.workbench.iter().filter(|e| !linked.contains(&e.id)).count() as i64;
        report.archive_entities_without_source =
            self.archive.iter().filter(|e| !sourced.contains(&e.id)).count() as i64;
        for reaction in self.workbench.iter().filter(|e| e.kind == EntityKind::Reaction) {
            let rows = self.roles.get(&reaction.id).map(|r| r.clone()).unwrap_or_default();
            if !rows.iter().any(|r| r.role == ReactionRole::Reactant) {
                report.reactions_without_reactants += 1;
            }
            if !rows.iter().any(|r| r.role == ReactionRole::Product) {
                report.reactions_without_products += 1;
            }
        }
        Ok(report)
    }

    fn statistics(&self) -> Result<StoreStatistics, DomainError> {
        let count_archive = |k: EntityKind| self.archive.iter().filter(|e| e.kind == k).count() as i64;
        let count_workbench = |k: EntityKind| self.workbench.iter().filter(|e| e.kind == k).count() as i64;
        Ok(StoreStatistics { sources: self.sources.len() as i64,
                             archive_entities: EntityKind::ALL.iter().map(|k| (*k, count_archive(*k))).collect(),
                             workbench_entities: EntityKind::ALL.iter().map(|k| (*k, count_workbench(*k))).collect(),
                             reaction_role_rows: self.roles.iter().map(|r| r.len() as i64).sum(),
                             pattern_links: self.pattern_links.len() as i64,
                             pattern_role_rows: self.pattern_roles.iter().map(|r| r.len() as i64).sum(),
                             structure_pattern_links: self.structure_links.len() as i64,
                             migration_failures: self.failures.len() as i64 })
    }
}

impl ReactionGraph for InMemoryCurationRepository {
    fn find_compound(&self, identifier: &str) -> Result<Option<WorkbenchEntity>, DomainError> {
        self.find_workbench_entity(EntityKind::Compound, identifier)
    }

    fn reactions_producing(&self, compound_id: i64) -> Result<Vec<WorkbenchReaction>, DomainError> {
        let ids: Vec<i64> = self.producers.get(&compound_id).map(|s| s.iter().copied().collect()).unwrap_or_default();
        Ok(ids.into_iter().filter_map(|id| self.resolve_reaction(id)).collect())
    }
}

impl Default for InMemoryCurationRepository {
    fn default() -> Self {
        Self::new()
    }
}
