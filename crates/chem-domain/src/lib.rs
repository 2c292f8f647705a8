mod config;
mod domain_repository;
mod domain_stubs;
mod entity;
mod errors;
mod identity;
pub mod migration;
mod report;
mod route;
mod strategy;

pub use config::{BuildingBlockPolicy, ExtractionOptions, InsertOptions, MigrationOptions, RouteOptions,
                 DEFAULT_CHUNK_SIZE, DEFAULT_DATABASE_USER, DEFAULT_ROUTE_MAX_DEPTH};
pub use domain_repository::{CurationRepository, InMemoryCurationRepository};
pub use entity::{datetime_from_millis, ArchiveEntity, ArchiveRecord, EntityKind, Page, RawRecord, ReactionFilter,
                 ReactionRole, RoleCompound, Source, SourceKey, WorkbenchCompoundPattern, WorkbenchEntity,
                 WorkbenchReaction, WorkbenchReactionPattern, WorkbenchRecord};
pub use errors::DomainError;
pub use identity::{identifier_digest, IdentityKey};
pub use report::{validate_raw_identifier, ExtractionReport, InsertReport, IntegrityReport, MigrationFailure,
                 MigrationFailureRecord, MigrationReport, RowOutcome, RowRejection, StoreStatistics};
pub use route::{ReactionGraph, RouteStep, SynthesisRoute, SynthesisRoutes};
pub use strategy::{split_reaction_smiles, PatternExtractor, ReactionStandardizer, RoleSplitting, StandardizedReaction,
                   Standardizer, StrategyFailure};
// Fixtures de grafo para tests
pub use domain_stubs::DomainStubs;
