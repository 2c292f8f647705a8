#![cfg(not(feature = "pg"))]
mod common;

use chem_domain::{CurationRepository, DomainError, EntityKind, InsertOptions, Page, RawRecord, RowRejection,
                  SourceKey};
use common::TempDb;
use serde_json::json;

fn chembl() -> SourceKey {
  SourceKey::new("chembl", "33", "chembl_33.smi")
}

#[test]
fn reingesting_the_same_file_is_a_no_op() {
  let db = TempDb::new();
  let repo = db.repo();
  let rows: Vec<RawRecord> = ["CCO", "CCN", "c1ccccc1", "CCO"].iter().map(|s| RawRecord::from(*s)).collect();
  let first = repo.insert_archive_entities(EntityKind::Compound, &rows, &chembl(), &InsertOptions::default())
                  .expect("first insert");
  assert_eq!(first.inserted, 3);
  assert_eq!(first.linked, 3);
  assert_eq!(first.succeeded, 4);
  let before = repo.statistics().expect("stats");

  let second = repo.insert_archive_entities(EntityKind::Compound, &rows, &chembl(), &InsertOptions::default())
                   .expect("second insert");
  assert_eq!(second.source_id, first.source_id);
  assert_eq!((second.inserted, second.linked), (0, 0));
  assert_eq!(repo.statistics().expect("stats"), before);
  assert_eq!(repo.select_sources().expect("sources").len(), 1);
}

#[test]
fn the_same_string_from_two_sources_is_one_row_with_two_edges() {
  let db = TempDb::new();
  let repo = db.repo();
  let zinc = SourceKey::new("zinc", "20", "zinc_20.smi");
  let opts = InsertOptions::default();
  repo.insert_archive_entities(EntityKind::Compound, &[RawRecord::from("CCO")], &chembl(), &opts).expect("chembl");
  repo.insert_archive_entities(EntityKind::Compound, &[RawRecord::from("CCO"), RawRecord::from("CCC")], &zinc, &opts)
      .expect("zinc");

  let all = repo.select_archive_entities(EntityKind::Compound, None, Page::default()).expect("select");
  assert_eq!(all.len(), 2);
  let ethanol = all.iter().find(|r| r.entity.identifier == "CCO").expect("CCO archived");
  assert_eq!(ethanol.sources.iter().map(|s| s.key.name.as_str()).collect::<Vec<_>>(), vec!["chembl", "zinc"]);

  let only_chembl =
    repo.select_archive_entities(EntityKind::Compound, Some(&[chembl()]), Page::default()).expect("select");
  assert_eq!(only_chembl.len(), 1);
  assert_eq!(only_chembl[0].entity.identifier, "CCO");

  let unknown = SourceKey::new("pubchem", "1", "missing.smi");
  assert!(repo.select_archive_entities(EntityKind::Compound, Some(&[unknown]), Page::default())
              .expect("select")
              .is_empty());
}

#[test]
fn malformed_rows_do_not_abort_the_batch() {
  let db = TempDb::new();
  let repo = db.repo();
  let mut rows: Vec<RawRecord> = (0..100).map(|i| RawRecord::from(format!("C{}O", i))).collect();
  rows[3] = RawRecord::default();
  rows[42] = RawRecord::from("  ");
  rows[77] = RawRecord::from("CC\tO");
  let opts = InsertOptions { chunk_size: 16, ..Default::default() };
  let report = repo.insert_archive_entities(EntityKind::Compound, &rows, &chembl(), &opts).expect("insert");
  assert_eq!(report.succeeded, 97);
  assert_eq!(report.failed, 3);
  let failures: Vec<_> = report.failures().collect();
  assert_eq!(failures[0], (3, &RowRejection::Missing));
  assert_eq!(failures[1], (42, &RowRejection::Blank));
  assert_eq!(failures[2].0, 77);
  assert_eq!(repo.statistics().expect("stats").archive_count(EntityKind::Compound), 97);
}

#[test]
fn identity_is_exact_string_equality_scoped_by_kind() {
  let db = TempDb::new();
  let repo = db.repo();
  let opts = InsertOptions::default();
  let rows = [RawRecord::from("OCC"), RawRecord::from("CCO")];
  repo.insert_archive_entities(EntityKind::Compound, &rows, &chembl(), &opts).expect("compounds");
  repo.insert_archive_entities(EntityKind::CompoundPattern, &[RawRecord::from("CCO")], &chembl(), &opts)
      .expect("pattern");
  let stats = repo.statistics().expect("stats");
  assert_eq!(stats.archive_count(EntityKind::Compound), 2);
  assert_eq!(stats.archive_count(EntityKind::CompoundPattern), 1);
}

#[test]
fn properties_are_kept_as_json() {
  let db = TempDb::new();
  let repo = db.repo();
  let row = RawRecord::with_properties("CCO", json!({"mw": 46.07, "vendor": "acme"}));
  repo.insert_archive_entities(EntityKind::Compound, &[row], &chembl(), &InsertOptions::default()).expect("insert");
  let got = repo.select_archive_entities(EntityKind::Compound, None, Page::default()).expect("select");
  assert_eq!(got[0].entity.properties, Some(json!({"mw": 46.07, "vendor": "acme"})));
  assert_eq!(got[0].entity.created_by, "user");
}

#[test]
fn pagination_walks_rows_in_id_order() {
  let db = TempDb::new();
  let repo = db.repo();
  let rows: Vec<RawRecord> = (0..25).map(|i| RawRecord::from(format!("C{}", i))).collect();
  repo.insert_archive_entities(EntityKind::Compound, &rows, &chembl(), &InsertOptions::default()).expect("insert");
  let mut page = Page::first(10);
  let mut seen = Vec::new();
  loop {
    let batch = repo.select_archive_entities(EntityKind::Compound, None, page).expect("select");
    if batch.is_empty() {
      break;
    }
    seen.extend(batch.into_iter().map(|r| r.entity.id));
    page = page.next();
  }
  assert_eq!(seen.len(), 25);
  assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn invalid_source_key_is_rejected() {
  let db = TempDb::new();
  let repo = db.repo();
  let bad = SourceKey::new("chembl", "", "x.smi");
  match repo.insert_archive_entities(EntityKind::Compound, &[RawRecord::from("C")], &bad, &InsertOptions::default()) {
    Err(DomainError::ValidationError(_)) => {}
    other => panic!("expected validation error, got: {:?}", other),
  }
}

#[test]
fn create_tables_is_idempotent_and_drop_tables_clears_everything() {
  let db = TempDb::new();
  let repo = db.repo();
  repo.insert_archive_entities(EntityKind::Compound, &[RawRecord::from("C")], &chembl(), &InsertOptions::default())
      .expect("insert");
  repo.create_tables().expect("create again");
  assert_eq!(repo.statistics().expect("stats").archive_count(EntityKind::Compound), 1);

  repo.drop_tables().expect("drop");
  repo.create_tables().expect("recreate");
  let stats = repo.statistics().expect("stats");
  assert_eq!(stats.sources, 0);
  assert_eq!(stats.archive_count(EntityKind::Compound), 0);
}
