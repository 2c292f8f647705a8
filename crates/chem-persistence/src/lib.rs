//! Persistencia Diesel del almacén de curación. Expone el `schema`, el
//! repositorio `DieselCurationRepository` (archivo, workbench, índice de
//! roles y patrones) y su vista `ReactionGraph` para reconstruir rutas.
//! SQLite por defecto; Postgres con la feature `pg`.

mod archive_store;
mod domain_persistence;
mod reaction_graph;
pub mod schema;
mod workbench_store;

pub use domain_persistence::{database_url_from_env, new_from_env, DbBackend, DbConn, DieselCurationRepository,
                             PersistenceError, DEFAULT_POOL_SIZE, MIGRATIONS};
