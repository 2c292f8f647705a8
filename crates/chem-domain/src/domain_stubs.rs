use crate::domain_repository::{CurationRepository, InMemoryCurationRepository};
use crate::{split_reaction_smiles, DomainError, EntityKind, InsertOptions, MigrationOptions, RawRecord, SourceKey,
            StrategyFailure};

pub struct DomainStubs;

impl DomainStubs {
    pub fn stub_source() -> SourceKey {
        SourceKey::new("stub", "1", "reactions.rsmi")
    }

    pub fn building_block_source() -> SourceKey {
        SourceKey::new("stub", "1", "building_blocks.smi")
    }

    /// Repositorio en memoria con el grafo de ejemplo: `C` se obtiene por
    /// `A.B>>C` o por `D>>C`, y `A`, `B`, `D` son building blocks.
    pub fn sample_repo() -> Result<InMemoryCurationRepository, DomainError> {
        Self::reaction_repo(&["A.B>>C", "D>>C"], &["A", "B", "D"])
    }

    /// Carga reacciones y building blocks en un repositorio nuevo usando la
    /// estandarización identidad y la separación sintáctica de roles.
    ///
    /// Las reacciones que no pasan la validación (sin reactivos, auto-bucles)
    /// quedan registradas como fallos de migración, igual que en producción.
    pub fn reaction_repo(reactions: &[&str], building_blocks: &[&str])
                         -> Result<InMemoryCurationRepository, DomainError> {
        let repo = InMemoryCurationRepository::new();
        let insert = InsertOptions::default();
        let rows: Vec<RawRecord> = reactions.iter().map(|r| RawRecord::from(*r)).collect();
        repo.insert_archive_entities(EntityKind::Reaction, &rows, &Self::stub_source(), &insert)?;
        let bbs: Vec<RawRecord> = building_blocks.iter().map(|b| RawRecord::from(*b)).collect();
        repo.insert_archive_entities(EntityKind::Compound, &bbs, &Self::building_block_source(), &insert)?;

        let identity = |raw: &str| -> Result<String, StrategyFailure> { Ok(raw.to_string()) };
        let options = MigrationOptions::default();
        repo.migrate_archive_to_workbench_reactions(&split_reaction_smiles, &options)?;
        repo.migrate_archive_to_workbench(EntityKind::Compound, &identity, &options)?;
        repo.mark_building_blocks_from_sources(&[Self::building_block_source()], &options.created_by)?;
        Ok(repo)
    }
}
