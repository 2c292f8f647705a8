use crate::{archive_store, workbench_store};
use chem_domain::migration::{self, Pending};
use chem_domain::{ArchiveRecord, CurationRepository, DomainError, EntityKind, ExtractionOptions, ExtractionReport,
                  InsertOptions, InsertReport, IntegrityReport, MigrationFailureRecord, MigrationOptions,
                  MigrationReport, Page, PatternExtractor, RawRecord, ReactionFilter, ReactionStandardizer, Source,
                  SourceKey, Standardizer, StoreStatistics, WorkbenchCompoundPattern, WorkbenchEntity,
                  WorkbenchReaction, WorkbenchReactionPattern, WorkbenchRecord};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::Error as DieselError;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use std::sync::Arc;
use thiserror::Error;

#[cfg(feature = "pg")]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations/postgres");
#[cfg(not(feature = "pg"))]
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations/sqlite");
#[cfg(feature = "pg")]
pub type DbConn = PgConnection;
#[cfg(not(feature = "pg"))]
pub type DbConn = SqliteConnection;
pub type DbBackend = <DbConn as Connection>::Backend;
type DbPool = Pool<ConnectionManager<DbConn>>;

pub const DEFAULT_POOL_SIZE: u32 = 4;

/// Tamaño máximo de las listas `IN (...)`; queda bajo el límite de
/// parámetros por sentencia de SQLite y Postgres.
pub(crate) const ID_CHUNK: usize = 500;

/// Errores internos de la capa Diesel. Se convierten a
/// `DomainError::StorageError` en la frontera del trait.
#[derive(Debug, Error)]
pub enum PersistenceError {
  #[error("pool: {0}")]
  Pool(#[from] r2d2::Error),
  #[error("conexión: {0}")]
  Connection(#[from] diesel::ConnectionError),
  #[error("db: {0}")]
  Query(#[from] DieselError),
  #[error("migraciones: {0}")]
  Migration(String),
  #[error(transparent)]
  Domain(#[from] DomainError),
}

impl From<PersistenceError> for DomainError {
  fn from(e: PersistenceError) -> Self {
    match e {
      PersistenceError::Domain(inner) => inner,
      other => DomainError::StorageError(other.to_string()),
    }
  }
}

pub(crate) fn now_ms() -> i64 {
  chrono::Utc::now().timestamp_millis()
}

/// Ejecuta `f` en una transacción de escritura. En SQLite se toma el lock
/// de escritura al inicio (`BEGIN IMMEDIATE`) para que dos escritores no se
/// bloqueen mutuamente al promover un lock de lectura.
pub(crate) fn write_tx<T, F>(conn: &mut DbConn, f: F) -> Result<T, PersistenceError>
  where F: FnOnce(&mut DbConn) -> Result<T, PersistenceError>
{
  #[cfg(not(feature = "pg"))]
  {
    conn.immediate_transaction(f)
  }
  #[cfg(feature = "pg")]
  {
    conn.transaction(f)
  }
}

/// Ejecuta `f` sobre una conexión que el motor trata como de sólo lectura.
#[cfg(not(feature = "pg"))]
fn read_only<T, F>(conn: &mut DbConn, f: F) -> Result<T, PersistenceError>
  where F: FnOnce(&mut DbConn) -> Result<T, DieselError>
{
  use diesel::connection::SimpleConnection;
  conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA query_only = ON;")?;
  Ok(f(conn)?)
}

#[cfg(feature = "pg")]
fn read_only<T, F>(conn: &mut DbConn, f: F) -> Result<T, PersistenceError>
  where F: FnOnce(&mut DbConn) -> Result<T, DieselError>
{
  Ok(conn.build_transaction().read_only().run(f)?)
}

#[cfg(not(feature = "pg"))]
#[derive(Debug)]
struct SqlitePragmas;

#[cfg(not(feature = "pg"))]
impl diesel::r2d2::CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
  fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
    use diesel::connection::SimpleConnection;
    conn.batch_execute("PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        .map_err(diesel::r2d2::Error::QueryError)
  }
}

/// Repo Diesel que implementa `CurationRepository` y `ReactionGraph`.
pub struct DieselCurationRepository {
  pool: Arc<DbPool>,
  database_url: String,
}

impl DieselCurationRepository {
  /// Abre el pool y aplica las migraciones pendientes.
  pub fn new(database_url: &str) -> Result<Self, DomainError> {
    Self::with_pool_size(database_url, DEFAULT_POOL_SIZE)
  }

  pub fn with_pool_size(database_url: &str, pool_size: u32) -> Result<Self, DomainError> {
    let manager = ConnectionManager::<DbConn>::new(database_url);
    let builder = Pool::<ConnectionManager<DbConn>>::builder().max_size(pool_size.max(1));
    #[cfg(not(feature = "pg"))]
    let builder = builder.connection_customizer(Box::new(SqlitePragmas));
    let pool = builder.build(manager).map_err(PersistenceError::from)?;
    let repo = DieselCurationRepository { pool: Arc::new(pool), database_url: database_url.to_string() };
    repo.create_tables()?;
    Ok(repo)
  }

  pub(crate) fn conn(&self) -> Result<PooledConnection<ConnectionManager<DbConn>>, PersistenceError> {
    Ok(self.pool.get()?)
  }

  /// Consulta de sólo lectura en SQL crudo. Las filas se leen en el tipo
  /// `QueryableByName` del llamador.
  ///
  /// Se acepta una única sentencia `SELECT`, `WITH` o `EXPLAIN`, y se
  /// ejecuta en una conexión propia en modo de sólo lectura
  /// (`PRAGMA query_only` en SQLite, transacción `READ ONLY` en Postgres):
  /// un `WITH ... DELETE` o `WITH ... UPDATE` falla en el motor.
  pub fn raw_select<T>(&self, sql: &str) -> Result<Vec<T>, DomainError>
    where T: QueryableByName<DbBackend> + 'static
  {
    let head = sql.split_whitespace().next().unwrap_or("").to_ascii_uppercase();
    if !matches!(head.as_str(), "SELECT" | "WITH" | "EXPLAIN") {
      return Err(DomainError::ValidationError(format!("sólo se permiten consultas de lectura, no {}", head)));
    }
    if sql.trim_end().trim_end_matches(';').contains(';') {
      return Err(DomainError::ValidationError("se permite una única sentencia".into()));
    }
    let mut conn = DbConn::establish(&self.database_url).map_err(PersistenceError::from)?;
    Ok(read_only(&mut conn, |conn| diesel::sql_query(sql).load::<T>(conn))?)
  }

  fn source_ids(&self, conn: &mut DbConn, sources: Option<&[SourceKey]>) -> Result<Option<Vec<i64>>, PersistenceError> {
    match sources {
      Some(keys) => Ok(Some(archive_store::source_ids(conn, keys)?)),
      None => Ok(None),
    }
  }

  /// Bucle común de migración: selecciona chunks pendientes en orden de id,
  /// aplica `standardize` y escribe cada chunk en una transacción.
  fn run_migration<R, S, W>(&self, kind: EntityKind, options: &MigrationOptions, standardize: S, mut write: W)
                            -> Result<MigrationReport, DomainError>
    where S: Fn(&rayon::ThreadPool, &[Pending]) -> Vec<(i64, R)>,
          W: FnMut(&mut DbConn, Vec<(i64, R)>, &mut MigrationReport) -> Result<(), PersistenceError>
  {
    let workers = migration::worker_pool(options.workers)?;
    let mut pooled = self.conn()?;
    let conn: &mut DbConn = &mut pooled;
    let source_ids = self.source_ids(conn, options.sources.as_deref())?;
    let chunk = options.chunk_size.max(1) as i64;
    let mut report = MigrationReport::new(kind);
    let mut cursor = 0;
    log::info!("migración de {} al workbench: inicio", kind);
    loop {
      let pending = workbench_store::pending_archive(&mut *conn, kind, source_ids.as_deref(), cursor, chunk)?;
      let Some(last) = pending.last() else {
        break;
      };
      cursor = last.id;
      let results = standardize(&workers, &pending);
      write(&mut *conn, results, &mut report)?;
      log::debug!("chunk de {} hasta id {}: {} procesadas", kind, cursor, pending.len());
    }
    if report.processed == 0 {
      log::warn!("no hay filas de archivo de {} pendientes de migrar", kind);
    }
    log::info!("migración de {} al workbench: fin ({} migradas, {} fallidas)",
               kind,
               report.migrated,
               report.failed);
    Ok(report)
  }

  /// Bucle común de extracción sobre reacciones o compuestos sin marca.
  fn run_extraction(&self, kind: EntityKind, extractor: &dyn PatternExtractor, options: &ExtractionOptions)
                    -> Result<ExtractionReport, DomainError> {
    let workers = migration::worker_pool(options.workers)?;
    let mut pooled = self.conn()?;
    let conn: &mut DbConn = &mut pooled;
    let chunk = options.chunk_size.max(1) as i64;
    let mut report = ExtractionReport::default();
    let mut cursor = 0;
    log::info!("extracción de patrones sobre {}: inicio", kind);
    loop {
      let pending = workbench_store::pending_extraction(&mut *conn, kind, options.retry_failed, cursor, chunk)?;
      let Some(last) = pending.last() else {
        break;
      };
      cursor = last.id;
      let results = migration::extract_chunk(&workers, &pending, extractor);
      workbench_store::write_extractions(&mut *conn, kind, results, options, &mut report)?;
    }
    if report.processed == 0 {
      log::warn!("no hay entidades de {} pendientes de extracción", kind);
    }
    log::info!("extracción sobre {}: fin ({} procesadas, {} patrones nuevos, {} fallidas)",
               kind,
               report.processed,
               report.patterns_created,
               report.failed);
    Ok(report)
  }
}

impl CurationRepository for DieselCurationRepository {
  fn create_tables(&self) -> Result<(), DomainError> {
    let mut conn = self.conn()?;
    conn.run_pending_migrations(MIGRATIONS).map_err(|e| PersistenceError::Migration(e.to_string()))?;
    Ok(())
  }

  fn drop_tables(&self) -> Result<(), DomainError> {
    let mut conn = self.conn()?;
    conn.revert_all_migrations(MIGRATIONS).map_err(|e| PersistenceError::Migration(e.to_string()))?;
    Ok(())
  }

  fn insert_archive_entities(&self,
                             kind: EntityKind,
                             records: &[RawRecord],
                             source: &SourceKey,
                             options: &InsertOptions)
                             -> Result<InsertReport, DomainError> {
    source.validate()?;
    let mut conn = self.conn()?;
    log::info!("ingesta de {} filas de {} desde {}: inicio", records.len(), kind, source);
    let report = archive_store::insert_archive_entities(&mut conn, kind, records, source, options)?;
    log::info!("ingesta desde {}: fin ({} nuevas, {} rechazadas)", source, report.inserted, report.failed);
    Ok(report)
  }

  fn select_sources(&self) -> Result<Vec<Source>, DomainError> {
    let mut conn = self.conn()?;
    Ok(archive_store::select_sources(&mut conn)?)
  }

  fn select_archive_entities(&self,
                             kind: EntityKind,
                             sources: Option<&[SourceKey]>,
                             page: Page)
                             -> Result<Vec<ArchiveRecord>, DomainError> {
    let mut conn = self.conn()?;
    let source_ids = self.source_ids(&mut conn, sources)?;
    Ok(archive_store::select_archive_entities(&mut conn, kind, source_ids, page)?)
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
    self.run_migration(kind,
                       options,
                       |workers, pending| migration::standardize_chunk(workers, pending, standardizer),
                       |conn, results, report| workbench_store::write_standardized(conn, kind, results, options, report))
  }

  fn migrate_archive_to_workbench_reactions(&self,
                                            standardizer: &dyn ReactionStandardizer,
                                            options: &MigrationOptions)
                                            -> Result<MigrationReport, DomainError> {
    self.run_migration(EntityKind::Reaction,
                       options,
                       |workers, pending| migration::standardize_reaction_chunk(workers, pending, standardizer),
                       |conn, results, report| workbench_store::write_reactions(conn, results, options, report))
  }

  fn extract_workbench_reaction_transformation_patterns(&self,
                                                        extractor: &dyn PatternExtractor,
                                                        options: &ExtractionOptions)
                                                        -> Result<ExtractionReport, DomainError> {
    self.run_extraction(EntityKind::Reaction, extractor, options)
  }

  fn extract_workbench_compound_structure_patterns(&self,
                                                   extractor: &dyn PatternExtractor,
                                                   options: &ExtractionOptions)
                                                   -> Result<ExtractionReport, DomainError> {
    self.run_extraction(EntityKind::Compound, extractor, options)
  }

  fn select_workbench_entities(&self,
                               kind: EntityKind,
                               sources: Option<&[SourceKey]>,
                               page: Page)
                               -> Result<Vec<WorkbenchRecord>, DomainError> {
    let mut conn = self.conn()?;
    let source_ids = self.source_ids(&mut conn, sources)?;
    Ok(workbench_store::select_workbench_entities(&mut conn, kind, source_ids, page)?)
  }

  fn select_workbench_reactions(&self, filter: &ReactionFilter, page: Page)
                                -> Result<Vec<WorkbenchReaction>, DomainError> {
    let mut conn = self.conn()?;
    Ok(workbench_store::select_workbench_reactions(&mut conn, filter, page)?)
  }

  fn select_workbench_reaction_patterns(&self, page: Page) -> Result<Vec<WorkbenchReactionPattern>, DomainError> {
    let mut conn = self.conn()?;
    Ok(workbench_store::select_workbench_reaction_patterns(&mut conn, page)?)
  }

  fn select_workbench_compound_patterns(&self, page: Page) -> Result<Vec<WorkbenchCompoundPattern>, DomainError> {
    let mut conn = self.conn()?;
    Ok(workbench_store::select_workbench_compound_patterns(&mut conn, page)?)
  }

  fn find_workbench_entity(&self, kind: EntityKind, identifier: &str)
                           -> Result<Option<WorkbenchEntity>, DomainError> {
    let mut conn = self.conn()?;
    Ok(workbench_store::find_workbench_entity(&mut conn, kind, identifier)?)
  }

  fn set_building_block(&self, compound_id: i64, is_building_block: bool, updated_by: &str)
                        -> Result<(), DomainError> {
    let mut conn = self.conn()?;
    Ok(workbench_store::set_building_block(&mut conn, compound_id, is_building_block, updated_by)?)
  }

  fn mark_building_blocks_from_sources(&self, sources: &[SourceKey], updated_by: &str)
                                       -> Result<usize, DomainError> {
    let mut conn = self.conn()?;
    let source_ids = archive_store::source_ids(&mut conn, sources).map_err(PersistenceError::from)?;
    let marked = workbench_store::mark_building_blocks(&mut conn, source_ids, updated_by)?;
    log::info!("{} compuestos marcados como building block", marked);
    Ok(marked)
  }

  fn select_migration_failures(&self, kind: EntityKind) -> Result<Vec<MigrationFailureRecord>, DomainError> {
    let mut conn = self.conn()?;
    Ok(workbench_store::select_migration_failures(&mut conn, kind)?)
  }

  fn verify_integrity(&self) -> Result<IntegrityReport, DomainError> {
    let mut conn = self.conn()?;
    Ok(workbench_store::verify_integrity(&mut conn)?)
  }

  fn statistics(&self) -> Result<StoreStatistics, DomainError> {
    let mut conn = self.conn()?;
    Ok(workbench_store::statistics(&mut conn)?)
  }
}

fn looks_like_postgres(url: &str) -> bool {
  let l = url.to_lowercase();
  l.starts_with("postgres://") || l.starts_with("postgresql://")
}

/// URL de la base desde `CACS_DB_URL` o `DATABASE_URL` (se carga `.env` si
/// existe). Sin Postgres, la URL por defecto es un archivo SQLite local.
pub fn database_url_from_env() -> Result<String, DomainError> {
  dotenvy::dotenv().ok();
  let url = std::env::var("CACS_DB_URL").or_else(|_| std::env::var("DATABASE_URL"));
  if cfg!(feature = "pg") {
    let url = url.map_err(|_| DomainError::ExternalError("CACS_DB_URL / DATABASE_URL no definido".into()))?;
    if !looks_like_postgres(&url) {
      return Err(DomainError::ExternalError("CACS_DB_URL / DATABASE_URL no parece una URL de Postgres".into()));
    }
    Ok(url)
  } else {
    let url = url.unwrap_or_else(|_| "cacs.sqlite3".into());
    if looks_like_postgres(&url) {
      return Err(DomainError::ExternalError("chem-persistence se compiló sin la feature 'pg'; habilítela para usar \
                                             Postgres"
                                                      .into()));
    }
    Ok(url)
  }
}

/// Crea el repositorio desde el entorno (`CACS_DB_URL`, `CACS_POOL_SIZE`).
pub fn new_from_env() -> Result<DieselCurationRepository, DomainError> {
  let url = database_url_from_env()?;
  let pool_size = std::env::var("CACS_POOL_SIZE").ok()
                                                 .and_then(|v| v.trim().parse::<u32>().ok())
                                                 .unwrap_or(DEFAULT_POOL_SIZE);
  DieselCurationRepository::with_pool_size(&url, pool_size)
}
