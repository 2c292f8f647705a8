//! Nivel de archivo: registro de fuentes, filas crudas y aristas de
//! procedencia fila ↔ fuente.
use crate::domain_persistence::{now_ms, write_tx, DbConn, PersistenceError, ID_CHUNK};
use crate::schema::{archive_entity as ae, archive_entity_source as aes, archive_source as src};
use chem_domain::{datetime_from_millis, identifier_digest, validate_raw_identifier, ArchiveEntity, ArchiveRecord,
                  DomainError, EntityKind, InsertOptions, InsertReport, Page, RawRecord, RowOutcome, Source, SourceKey};
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use std::collections::HashMap;

#[derive(Debug, Queryable)]
pub(crate) struct SourceRow {
  pub id: i64,
  pub name: String,
  pub version: String,
  pub file_name: String,
  pub created_at_ts: i64,
  pub created_by: String,
}

impl SourceRow {
  fn into_source(self) -> Source {
    Source { id:         self.id,
             key:        SourceKey::new(self.name, self.version, self.file_name),
             created_at: datetime_from_millis(self.created_at_ts),
             created_by: self.created_by }
  }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::archive_source)]
struct NewSource<'a> {
  name: &'a str,
  version: &'a str,
  file_name: &'a str,
  created_at_ts: i64,
  created_by: &'a str,
}

#[derive(Debug, Queryable)]
pub(crate) struct ArchiveEntityRow {
  pub id: i64,
  pub kind: String,
  pub identifier: String,
  pub identifier_key: String,
  pub properties: Option<String>,
  pub created_at_ts: i64,
  pub created_by: String,
}

impl ArchiveEntityRow {
  fn into_entity(self) -> Result<ArchiveEntity, DomainError> {
    let properties = match self.properties {
      Some(text) => Some(serde_json::from_str(&text)?),
      None => None,
    };
    Ok(ArchiveEntity { id: self.id,
                       kind: self.kind.parse()?,
                       identifier: self.identifier,
                       properties,
                       created_at: datetime_from_millis(self.created_at_ts),
                       created_by: self.created_by })
  }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::archive_entity)]
struct NewArchiveEntity<'a> {
  kind: &'a str,
  identifier: &'a str,
  identifier_key: &'a str,
  properties: Option<String>,
  created_at_ts: i64,
  created_by: &'a str,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = crate::schema::archive_entity_source)]
struct NewArchiveSource<'a> {
  archive_id: i64,
  source_id: i64,
  created_at_ts: i64,
  created_by: &'a str,
}

/// Look-up-or-create de la fuente. Dos ingestas concurrentes de la misma
/// fuente obtienen el mismo id.
pub(crate) fn intern_source(conn: &mut DbConn, key: &SourceKey, created_by: &str) -> Result<i64, DieselError> {
  let row = NewSource { name: &key.name,
                        version: &key.version,
                        file_name: &key.file_name,
                        created_at_ts: now_ms(),
                        created_by };
  diesel::insert_into(src::table).values(&row).on_conflict_do_nothing().execute(conn)?;
  src::table.filter(src::name.eq(&key.name))
            .filter(src::version.eq(&key.version))
            .filter(src::file_name.eq(&key.file_name))
            .select(src::id)
            .first::<i64>(conn)
}

/// Ids de las fuentes registradas; las claves desconocidas se ignoran.
pub(crate) fn source_ids(conn: &mut DbConn, keys: &[SourceKey]) -> Result<Vec<i64>, DieselError> {
  let mut out = Vec::with_capacity(keys.len());
  for key in keys {
    let id = src::table.filter(src::name.eq(&key.name))
                       .filter(src::version.eq(&key.version))
                       .filter(src::file_name.eq(&key.file_name))
                       .select(src::id)
                       .first::<i64>(conn)
                       .optional()?;
    out.extend(id);
  }
  Ok(out)
}

/// Inserta la fila si no existe y devuelve `(id, creada)`.
fn intern_archive(conn: &mut DbConn,
                  kind: EntityKind,
                  record: &RawRecord,
                  identifier: &str,
                  created_by: &str,
                  ts: i64)
                  -> Result<(i64, bool), DieselError> {
  let key = identifier_digest(kind, identifier);
  let row = NewArchiveEntity { kind: kind.as_str(),
                               identifier,
                               identifier_key: &key,
                               properties: record.properties.as_ref().map(|p| p.to_string()),
                               created_at_ts: ts,
                               created_by };
  let inserted = diesel::insert_into(ae::table).values(&row).on_conflict_do_nothing().execute(conn)?;
  let id = ae::table.filter(ae::kind.eq(kind.as_str()))
                    .filter(ae::identifier_key.eq(&key))
                    .filter(ae::identifier.eq(identifier))
                    .select(ae::id)
                    .first::<i64>(conn)?;
  Ok((id, inserted > 0))
}

pub(crate) fn insert_archive_entities(conn: &mut DbConn,
                                      kind: EntityKind,
                                      records: &[RawRecord],
                                      source: &SourceKey,
                                      options: &InsertOptions)
                                      -> Result<InsertReport, PersistenceError> {
  let created_by = options.created_by.as_str();
  let source_id = write_tx(conn, |conn| Ok(intern_source(conn, source, created_by)?))?;
  let mut report = InsertReport { source_id, ..Default::default() };
  for (chunk_no, chunk) in records.chunks(options.chunk_size.max(1)).enumerate() {
    let base = chunk_no * options.chunk_size.max(1);
    write_tx(conn, |conn| {
      let ts = now_ms();
      for (offset, record) in chunk.iter().enumerate() {
        let index = base + offset;
        let status = match validate_raw_identifier(record.identifier.as_deref()) {
          Ok(identifier) => {
            let (id, created) = intern_archive(conn, kind, record, identifier, created_by, ts)?;
            let link = NewArchiveSource { archive_id: id, source_id, created_at_ts: ts, created_by };
            let linked = diesel::insert_into(aes::table).values(&link).on_conflict_do_nothing().execute(conn)?;
            report.inserted += usize::from(created);
            report.linked += usize::from(linked > 0);
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
      Ok(())
    })?;
  }
  Ok(report)
}

pub(crate) fn select_sources(conn: &mut DbConn) -> Result<Vec<Source>, PersistenceError> {
  let rows = src::table.order(src::id.asc()).load::<SourceRow>(conn)?;
  Ok(rows.into_iter().map(SourceRow::into_source).collect())
}

pub(crate) fn select_archive_entities(conn: &mut DbConn,
                                      kind: EntityKind,
                                      source_ids: Option<Vec<i64>>,
                                      page: Page)
                                      -> Result<Vec<ArchiveRecord>, PersistenceError> {
  let mut query = ae::table.filter(ae::kind.eq(kind.as_str())).into_boxed();
  if let Some(ids) = source_ids {
    query = query.filter(ae::id.eq_any(aes::table.filter(aes::source_id.eq_any(ids)).select(aes::archive_id)));
  }
  let rows = query.order(ae::id.asc()).offset(page.offset).limit(page.limit).load::<ArchiveEntityRow>(conn)?;
  let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
  let mut edges = Vec::new();
  for chunk in ids.chunks(ID_CHUNK) {
    edges.extend(aes::table.filter(aes::archive_id.eq_any(chunk))
                           .select((aes::archive_id, aes::source_id))
                           .order((aes::archive_id.asc(), aes::source_id.asc()))
                           .load::<(i64, i64)>(conn)?);
  }
  let mut source_ids: Vec<i64> = edges.iter().map(|e| e.1).collect();
  source_ids.sort_unstable();
  source_ids.dedup();
  let mut sources: HashMap<i64, Source> = HashMap::with_capacity(source_ids.len());
  for chunk in source_ids.chunks(ID_CHUNK) {
    for row in src::table.filter(src::id.eq_any(chunk)).load::<SourceRow>(conn)? {
      sources.insert(row.id, row.into_source());
    }
  }
  let mut by_archive: HashMap<i64, Vec<Source>> = HashMap::new();
  for (archive_id, source_id) in edges {
    if let Some(s) = sources.get(&source_id) {
      by_archive.entry(archive_id).or_default().push(s.clone());
    }
  }
  let mut out = Vec::with_capacity(rows.len());
  for row in rows {
    let sources = by_archive.remove(&row.id).unwrap_or_default();
    out.push(ArchiveRecord { entity: row.into_entity()?, sources });
  }
  Ok(out)
}
