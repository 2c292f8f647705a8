#![cfg(not(feature = "pg"))]
mod common;

use chem_domain::{split_reaction_smiles, CurationRepository, DomainError, EntityKind, ExtractionOptions, InsertOptions,
                  MigrationFailure, MigrationOptions, Page, RawRecord, ReactionFilter, RoleSplitting, SourceKey,
                  StrategyFailure};
use chem_persistence::DieselCurationRepository;
use common::{identity, TempDb};
use std::sync::Arc;

fn uspto() -> SourceKey {
  SourceKey::new("uspto", "2016", "reactions.rsmi")
}

fn ingest(repo: &DieselCurationRepository, kind: EntityKind, rows: &[&str], source: &SourceKey) {
  let rows: Vec<RawRecord> = rows.iter().map(|s| RawRecord::from(*s)).collect();
  repo.insert_archive_entities(kind, &rows, source, &InsertOptions::default()).expect("ingest");
}

fn names(reaction: &[chem_domain::RoleCompound]) -> Vec<&str> {
  reaction.iter().map(|c| c.compound.identifier.as_str()).collect()
}

#[test]
fn equivalent_strings_collapse_and_failures_are_retried() {
  let db = TempDb::new();
  let repo = db.repo();
  ingest(&repo, EntityKind::Compound, &["OCC", "CCO", "c1ccccc1"], &uspto());
  let canon = |raw: &str| -> Result<String, StrategyFailure> {
    match raw {
      "OCC" | "CCO" => Ok("CCO".into()),
      _ => Err(StrategyFailure::new("aromaticidad no soportada")),
    }
  };

  let report = repo.migrate_archive_to_workbench(EntityKind::Compound, &canon, &MigrationOptions::default())
                   .expect("migrate");
  assert_eq!((report.processed, report.migrated, report.failed, report.created), (3, 2, 1, 1));
  assert!(matches!(report.failures[0].1, MigrationFailure::Strategy(_)));

  let workbench = repo.select_workbench_entities(EntityKind::Compound, None, Page::default()).expect("select");
  assert_eq!(workbench.len(), 1);
  assert_eq!(workbench[0].entity.identifier, "CCO");
  assert_eq!(workbench[0].archive_ids.len(), 2);

  // A second run with the same strategy only sees the failed row.
  let again = repo.migrate_archive_to_workbench(EntityKind::Compound, &canon, &MigrationOptions::default())
                  .expect("migrate again");
  assert_eq!((again.processed, again.failed), (1, 1));
  let failures = repo.select_migration_failures(EntityKind::Compound).expect("failures");
  assert_eq!(failures.len(), 1);
  assert_eq!(failures[0].reason, "strategy");
  assert_eq!(failures[0].attempts, 2);

  let fixed = repo.migrate_archive_to_workbench(EntityKind::Compound, &identity, &MigrationOptions::default())
                  .expect("retry");
  assert_eq!((fixed.processed, fixed.migrated, fixed.created), (1, 1, 1));
  assert!(repo.select_migration_failures(EntityKind::Compound).expect("failures").is_empty());
  assert!(repo.verify_integrity().expect("integrity").is_healthy());

  let nothing = repo.migrate_archive_to_workbench(EntityKind::Compound, &identity, &MigrationOptions::default())
                    .expect("no-op");
  assert_eq!(nothing.processed, 0);
}

#[test]
fn empty_standardization_is_a_failure() {
  let db = TempDb::new();
  let repo = db.repo();
  ingest(&repo, EntityKind::Compound, &["[Na+].[Cl-]"], &uspto());
  let strip = |_: &str| -> Result<String, StrategyFailure> { Ok(String::new()) };
  let report =
    repo.migrate_archive_to_workbench(EntityKind::Compound, &strip, &MigrationOptions::default()).expect("migrate");
  assert_eq!(report.failures[0].1, MigrationFailure::EmptyResult);
  assert_eq!(repo.statistics().expect("stats").workbench_count(EntityKind::Compound), 0);
}

#[test]
fn reactions_go_through_their_own_migration() {
  let db = TempDb::new();
  let repo = db.repo();
  match repo.migrate_archive_to_workbench(EntityKind::Reaction, &identity, &MigrationOptions::default()) {
    Err(DomainError::ValidationError(_)) => {}
    other => panic!("expected validation error, got: {:?}", other),
  }
}

#[test]
fn migration_can_be_restricted_to_sources() {
  let db = TempDb::new();
  let repo = db.repo();
  let vendor = SourceKey::new("enamine", "2024", "building_blocks.smi");
  ingest(&repo, EntityKind::Compound, &["CCO"], &uspto());
  ingest(&repo, EntityKind::Compound, &["CCN"], &vendor);
  let opts = MigrationOptions::default().with_sources(vec![vendor.clone()]);
  let report = repo.migrate_archive_to_workbench(EntityKind::Compound, &identity, &opts).expect("migrate");
  assert_eq!(report.migrated, 1);
  assert!(repo.find_workbench_entity(EntityKind::Compound, "CCO").expect("find").is_none());

  let by_source =
    repo.select_workbench_entities(EntityKind::Compound, Some(&[vendor]), Page::default()).expect("select");
  assert_eq!(by_source.len(), 1);
  assert_eq!(by_source[0].entity.identifier, "CCN");
}

#[test]
fn reaction_roles_are_indexed_in_order() {
  let db = TempDb::new();
  let repo = db.repo();
  ingest(&repo, EntityKind::Reaction, &["A.B>O>C", "C.E>>F", ">>C", "X>>X", "A>>"], &uspto());
  let report = repo.migrate_archive_to_workbench_reactions(&split_reaction_smiles, &MigrationOptions::default())
                   .expect("migrate");
  assert_eq!((report.processed, report.migrated, report.failed), (5, 2, 3));
  let reasons: Vec<_> = repo.select_migration_failures(EntityKind::Reaction)
                            .expect("failures")
                            .into_iter()
                            .map(|f| f.reason)
                            .collect();
  assert_eq!(reasons, vec!["no_reactants", "self_loop", "no_products"]);

  let all = repo.select_workbench_reactions(&ReactionFilter::default(), Page::default()).expect("reactions");
  assert_eq!(all.len(), 2);
  assert_eq!(names(&all[0].reactants), vec!["A", "B"]);
  assert_eq!(names(&all[0].spectators), vec!["O"]);
  assert_eq!(names(&all[0].products), vec!["C"]);

  let producing_c = ReactionFilter::default().with_products(["C"]);
  let got = repo.select_workbench_reactions(&producing_c, Page::default()).expect("filter");
  assert_eq!(got.len(), 1);
  assert_eq!(got[0].reaction.identifier, "A.B>O>C");

  let consuming_c = ReactionFilter::default().with_reactants(["C"]);
  let got = repo.select_workbench_reactions(&consuming_c, Page::default()).expect("filter");
  assert_eq!(got.len(), 1);
  assert_eq!(got[0].reaction.identifier, "C.E>>F");

  let both = ReactionFilter::default().with_reactants(["A"]).with_products(["F"]);
  assert!(repo.select_workbench_reactions(&both, Page::default()).expect("filter").is_empty());
  let unknown = ReactionFilter::default().with_spectators(["Z"]);
  assert!(repo.select_workbench_reactions(&unknown, Page::default()).expect("filter").is_empty());

  // Role compounds carry the reaction's archive row as provenance.
  let c = repo.select_workbench_entities(EntityKind::Compound, None, Page::default())
              .expect("compounds")
              .into_iter()
              .find(|r| r.entity.identifier == "C")
              .expect("C in workbench");
  assert_eq!(c.archive_ids.len(), 2);
  assert!(repo.verify_integrity().expect("integrity").is_healthy());
}

#[test]
fn equivalent_reactions_collapse_after_standardization() {
  let db = TempDb::new();
  let repo = db.repo();
  ingest(&repo, EntityKind::Reaction, &["OCC.B>>C", "CCO.B>>C"], &uspto());
  let canon = |raw: &str| -> Result<String, StrategyFailure> { Ok(raw.replace("OCC", "CCO")) };
  let report = repo.migrate_archive_to_workbench_reactions(&RoleSplitting(canon), &MigrationOptions::default())
                   .expect("migrate");
  assert_eq!(report.migrated, 2);
  let stats = repo.statistics().expect("stats");
  assert_eq!(stats.workbench_count(EntityKind::Reaction), 1);
  assert_eq!(stats.workbench_count(EntityKind::Compound), 3);
}

#[test]
fn pattern_extraction_is_resumable() {
  let db = TempDb::new();
  let repo = db.repo();
  ingest(&repo, EntityKind::Reaction, &["A.B>>C", "D>>C", "E>>C"], &uspto());
  repo.migrate_archive_to_workbench_reactions(&split_reaction_smiles, &MigrationOptions::default())
      .expect("migrate");
  let flaky = |r: &str| -> Result<Vec<String>, StrategyFailure> {
    if r.starts_with('D') {
      Err(StrategyFailure::new("sin mapeo atómico"))
    } else {
      Ok(vec!["[C:1]>>[C:1]".into(), "[C:1]>>[C:1]".into()])
    }
  };

  let report = repo.extract_workbench_reaction_transformation_patterns(&flaky, &ExtractionOptions::default())
                   .expect("extract");
  assert_eq!((report.processed, report.succeeded, report.failed), (3, 2, 1));
  assert_eq!(report.patterns_created, 1);
  assert_eq!(report.links_created, 2);

  let again = repo.extract_workbench_reaction_transformation_patterns(&flaky, &ExtractionOptions::default())
                  .expect("extract again");
  assert_eq!(again.processed, 0);

  let fixed = |_: &str| -> Result<Vec<String>, StrategyFailure> { Ok(vec!["[N:1]>>[N:1]".into()]) };
  let retry = ExtractionOptions { retry_failed: true, ..Default::default() };
  let report = repo.extract_workbench_reaction_transformation_patterns(&fixed, &retry).expect("retry");
  assert_eq!((report.processed, report.succeeded), (1, 1));

  let patterns = repo.select_workbench_reaction_patterns(Page::default()).expect("patterns");
  assert_eq!(patterns.len(), 2);
  assert_eq!(patterns[0].reaction_ids.len(), 2);
  assert_eq!(patterns[1].reaction_ids.len(), 1);
  assert!(repo.verify_integrity().expect("integrity").is_healthy());
}

#[test]
fn building_block_flags() {
  let db = TempDb::new();
  let repo = db.repo();
  let vendor = SourceKey::new("enamine", "2024", "building_blocks.smi");
  ingest(&repo, EntityKind::Compound, &["A", "B"], &vendor);
  ingest(&repo, EntityKind::Compound, &["C"], &uspto());
  repo.migrate_archive_to_workbench(EntityKind::Compound, &identity, &MigrationOptions::default()).expect("migrate");

  assert_eq!(repo.mark_building_blocks_from_sources(&[vendor.clone()], "curator").expect("mark"), 2);
  assert_eq!(repo.mark_building_blocks_from_sources(&[vendor], "curator").expect("mark"), 0);
  let a = repo.find_workbench_entity(EntityKind::Compound, "A").expect("find").expect("A exists");
  assert!(a.is_building_block);
  assert_eq!(a.updated_by.as_deref(), Some("curator"));
  assert!(a.updated_at.is_some());

  let c = repo.find_workbench_entity(EntityKind::Compound, "C").expect("find").expect("C exists");
  assert!(!c.is_building_block);
  repo.set_building_block(c.id, true, "curator").expect("set");
  assert!(repo.find_workbench_entity(EntityKind::Compound, "C").expect("find").expect("C").is_building_block);
  repo.set_building_block(a.id, false, "curator").expect("unset");
  assert!(!repo.find_workbench_entity(EntityKind::Compound, "A").expect("find").expect("A").is_building_block);

  assert!(matches!(repo.set_building_block(i64::MAX, true, "curator"), Err(DomainError::ValidationError(_))));
}

#[test]
fn migration_can_flag_building_blocks() {
  let db = TempDb::new();
  let repo = db.repo();
  ingest(&repo, EntityKind::Compound, &["A", "B"], &uspto());
  let opts = MigrationOptions::default().building_blocks();
  repo.migrate_archive_to_workbench(EntityKind::Compound, &identity, &opts).expect("migrate");
  let all = repo.select_workbench_entities(EntityKind::Compound, None, Page::default()).expect("select");
  assert!(all.iter().all(|r| r.entity.is_building_block));
}

#[test]
fn concurrent_migrations_produce_one_row_per_canonical_string() {
  let db = TempDb::new();
  let repo = Arc::new(DieselCurationRepository::with_pool_size(&db.url(), 8).expect("repo"));
  let rows: Vec<RawRecord> = (0..60).map(|i| RawRecord::from(format!("C{}", i))).collect();
  repo.insert_archive_entities(EntityKind::Compound, &rows, &uspto(), &InsertOptions::default()).expect("ingest");
  // 60 archive rows, 20 canonical strings.
  let collapse = |raw: &str| -> Result<String, StrategyFailure> {
    let n: usize = raw[1..].parse().map_err(|_| StrategyFailure::new("no numérico"))?;
    Ok(format!("N{}", n % 20))
  };

  let handles: Vec<_> = (0..4).map(|_| {
                                let repo = Arc::clone(&repo);
                                std::thread::spawn(move || {
                                  let opts = MigrationOptions { workers: 2, chunk_size: 7, ..Default::default() };
                                  repo.migrate_archive_to_workbench(EntityKind::Compound, &collapse, &opts)
                                })
                              })
                              .collect();
  let mut migrated = 0;
  let mut processed = 0;
  for h in handles {
    let report = h.join().expect("worker panicked").expect("migration");
    migrated += report.migrated;
    processed += report.processed;
  }
  // Cada fila de archivo cuenta en un único reporte.
  assert_eq!((migrated, processed), (60, 60));

  let stats = repo.statistics().expect("stats");
  assert_eq!(stats.workbench_count(EntityKind::Compound), 20);
  let records = repo.select_workbench_entities(EntityKind::Compound, None, Page::default()).expect("select");
  assert_eq!(records.iter().map(|r| r.archive_ids.len()).sum::<usize>(), 60);
  assert!(repo.verify_integrity().expect("integrity").is_healthy());
}

#[test]
fn select_reactions_with_large_page() {
  let db = TempDb::new();
  let repo = db.repo();
  let rows: Vec<String> = (0..1200).map(|i| format!("A{}.B{}>>P{}", i, i, i)).collect();
  let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
  ingest(&repo, EntityKind::Reaction, &rows, &uspto());
  repo.migrate_archive_to_workbench_reactions(&split_reaction_smiles, &MigrationOptions::default())
      .expect("migrate");

  let all = repo.select_workbench_reactions(&ReactionFilter::default(), Page::default()).expect("select");
  assert_eq!(all.len(), 1200);
  assert!(all.iter().all(|r| r.reactants.len() == 2 && r.products.len() == 1));
  assert_eq!(names(&all[1199].products), vec!["P1199"]);

  // Más identificadores que parámetros admite una sola sentencia.
  let mut wanted: Vec<String> = (0..40_000).map(|i| format!("Z{}", i)).collect();
  wanted.extend(["A7", "A900", "A1100"].iter().map(|s| s.to_string()));
  let filter = ReactionFilter::default().with_reactants(wanted);
  let found = repo.select_workbench_reactions(&filter, Page::default()).expect("filtered select");
  assert_eq!(found.iter().map(|r| r.reaction.identifier.as_str()).collect::<Vec<_>>(),
             vec!["A7.B7>>P7", "A900.B900>>P900", "A1100.B1100>>P1100"]);
  let second = repo.select_workbench_reactions(&filter, Page::new(1, 1)).expect("second page");
  assert_eq!(second.len(), 1);
  assert_eq!(names(&second[0].products), vec!["P900"]);

  let filter = filter.with_products((0..1200).map(|i| format!("P{}", i)).filter(|p| p != "P7"));
  let found = repo.select_workbench_reactions(&filter, Page::default()).expect("two roles");
  assert_eq!(found.len(), 2);

  let compounds = repo.select_workbench_entities(EntityKind::Compound, Some(&[uspto()]), Page::default())
                      .expect("compounds");
  assert_eq!(compounds.len(), 3600);
}

#[test]
fn cxsmiles_rows_are_archived_verbatim() {
  let db = TempDb::new();
  let repo = db.repo();
  let rows = [RawRecord::from("CC(=O)O.OCC>>CC(=O)OCC |f:0.1|"), RawRecord::from("CC\nO>>CCO")];
  let report =
    repo.insert_archive_entities(EntityKind::Reaction, &rows, &uspto(), &InsertOptions::default()).expect("ingest");
  assert_eq!((report.succeeded, report.failed), (1, 1));
  let archived = repo.select_archive_entities(EntityKind::Reaction, None, Page::default()).expect("archive");
  assert_eq!(archived[0].entity.identifier, "CC(=O)O.OCC>>CC(=O)OCC |f:0.1|");

  let report = repo.migrate_archive_to_workbench_reactions(&split_reaction_smiles, &MigrationOptions::default())
                   .expect("migrate");
  assert_eq!(report.migrated, 1);
  let reactions = repo.select_workbench_reactions(&ReactionFilter::default(), Page::default()).expect("select");
  assert_eq!(reactions[0].reaction.identifier, "CC(=O)O.OCC>>CC(=O)OCC");
  assert_eq!(names(&reactions[0].reactants), vec!["CC(=O)O", "OCC"]);
}

#[test]
fn reaction_patterns_resolve_role_compound_patterns() {
  let db = TempDb::new();
  let repo = db.repo();
  ingest(&repo, EntityKind::Reaction, &["CC(=O)O.OCC>>CC(=O)OCC"], &uspto());
  ingest(&repo, EntityKind::ReactionPattern, &["[C:1]=[O:2]>>[C:1][O:2]"], &uspto());
  repo.migrate_archive_to_workbench_reactions(&split_reaction_smiles, &MigrationOptions::default())
      .expect("migrate reactions");
  let report = repo.migrate_archive_to_workbench(EntityKind::ReactionPattern, &identity, &MigrationOptions::default())
                   .expect("migrate patterns");
  assert_eq!((report.migrated, report.created), (1, 3));

  let esterification = |_: &str| -> Result<Vec<String>, StrategyFailure> {
    Ok(vec!["[C:1](=O)[OH].[O:2]>>[C:1](=O)[O:2]".into(), "no es un patrón de reacción".into()])
  };
  let report = repo.extract_workbench_reaction_transformation_patterns(&esterification, &ExtractionOptions::default())
                   .expect("extract");
  assert_eq!((report.patterns_created, report.links_created), (2, 2));

  let patterns = repo.select_workbench_reaction_patterns(Page::default()).expect("patterns");
  assert_eq!(patterns.len(), 3);
  assert_eq!(names(&patterns[0].reactants), vec!["[C:1]=[O:2]"]);
  assert_eq!(names(&patterns[0].products), vec!["[C:1][O:2]"]);
  assert!(patterns[0].reaction_ids.is_empty());
  assert_eq!(names(&patterns[1].reactants), vec!["[C:1](=O)[OH]", "[O:2]"]);
  assert_eq!(names(&patterns[1].products), vec!["[C:1](=O)[O:2]"]);
  assert!(patterns[1].products.iter().all(|c| c.compound.kind == EntityKind::CompoundPattern));
  assert!(patterns[2].reactants.is_empty() && patterns[2].products.is_empty());
  assert_eq!(patterns[2].reaction_ids.len(), 1);

  let stats = repo.statistics().expect("stats");
  assert_eq!(stats.pattern_role_rows, 5);
  assert_eq!(stats.workbench_count(EntityKind::CompoundPattern), 5);
  assert!(repo.verify_integrity().expect("integrity").is_healthy());
}

#[test]
fn compound_structure_patterns_are_linked_and_resumable() {
  let db = TempDb::new();
  let repo = db.repo();
  ingest(&repo, EntityKind::Compound, &["CCO", "CC(=O)O", "c1ccccc1"], &uspto());
  repo.migrate_archive_to_workbench(EntityKind::Compound, &identity, &MigrationOptions::default()).expect("migrate");
  let matcher = |compound: &str| -> Result<Vec<String>, StrategyFailure> {
    if compound.starts_with('c') {
      return Err(StrategyFailure::new("aromaticidad no soportada"));
    }
    let mut found = vec!["[CH3]".to_string()];
    if compound.contains('O') {
      found.push("[OX2H]".into());
    }
    Ok(found)
  };

  let report =
    repo.extract_workbench_compound_structure_patterns(&matcher, &ExtractionOptions::default()).expect("extract");
  assert_eq!((report.processed, report.succeeded, report.failed), (3, 2, 1));
  assert_eq!((report.patterns_created, report.links_created), (2, 4));
  let again =
    repo.extract_workbench_compound_structure_patterns(&matcher, &ExtractionOptions::default()).expect("again");
  assert_eq!(again.processed, 0);
  let retry = ExtractionOptions { retry_failed: true, ..Default::default() };
  let aromatic = |_: &str| -> Result<Vec<String>, StrategyFailure> { Ok(vec!["c1ccccc1".into()]) };
  let report = repo.extract_workbench_compound_structure_patterns(&aromatic, &retry).expect("retry");
  assert_eq!((report.processed, report.succeeded, report.patterns_created), (1, 1, 1));

  let ethanol = repo.find_workbench_entity(EntityKind::Compound, "CCO").expect("find").expect("CCO exists");
  let patterns = repo.select_workbench_compound_patterns(Page::default()).expect("patterns");
  assert_eq!(patterns.iter().map(|p| p.pattern.identifier.as_str()).collect::<Vec<_>>(),
             vec!["[CH3]", "[OX2H]", "c1ccccc1"]);
  assert_eq!(patterns[0].compound_ids.len(), 2);
  assert!(patterns[0].compound_ids.contains(&ethanol.id));
  assert_eq!(patterns[2].compound_ids.len(), 1);

  let stats = repo.statistics().expect("stats");
  assert_eq!(stats.structure_pattern_links, 5);
  assert!(repo.verify_integrity().expect("integrity").is_healthy());
}
