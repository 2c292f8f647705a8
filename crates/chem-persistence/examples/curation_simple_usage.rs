use chem_domain::{split_reaction_smiles, CurationRepository, EntityKind, ExtractionOptions, InsertOptions,
                  MigrationOptions, Page, RawRecord, ReactionGraph, RouteOptions, SourceKey, StrategyFailure};
use chem_persistence::new_from_env;

fn main() {
  // El ejemplo usa CACS_DB_URL (o DATABASE_URL). Para una demo local basta con:
  //   export CACS_DB_URL="demo.sqlite3"
  let repo = new_from_env().expect("no se pudo inicializar el repositorio");

  let reactions = SourceKey::new("demo", "1", "reactions.rsmi");
  let building_blocks = SourceKey::new("demo", "1", "building_blocks.smi");
  let rows: Vec<RawRecord> = ["CC(=O)O.OCC>[H+]>CC(=O)OCC", "CC(=O)OCC.N>>CC(=O)N", "CC(=O)Cl.N>>CC(=O)N"]
    .iter()
    .map(|s| RawRecord::from(*s))
    .collect();
  let report = repo.insert_archive_entities(EntityKind::Reaction, &rows, &reactions, &InsertOptions::from_env())
                   .expect("ingesta de reacciones");
  println!("reacciones archivadas: {} nuevas, {} rechazadas", report.inserted, report.failed);

  let bbs: Vec<RawRecord> = ["CC(=O)O", "OCC", "N", "CC(=O)Cl"].iter().map(|s| RawRecord::from(*s)).collect();
  repo.insert_archive_entities(EntityKind::Compound, &bbs, &building_blocks, &InsertOptions::from_env())
      .expect("ingesta de building blocks");

  let migrated = repo.migrate_archive_to_workbench_reactions(&split_reaction_smiles, &MigrationOptions::from_env())
                     .expect("migración de reacciones");
  println!("reacciones en workbench: {} (fallidas: {})", migrated.migrated, migrated.failed);

  let identity = |raw: &str| -> Result<String, StrategyFailure> { Ok(raw.to_string()) };
  repo.migrate_archive_to_workbench(EntityKind::Compound, &identity, &MigrationOptions::from_env())
      .expect("migración de compuestos");
  let marked = repo.mark_building_blocks_from_sources(&[building_blocks], "demo").expect("building blocks");
  println!("building blocks marcados: {}", marked);

  // Un patrón por reacción: el par (primer reactivo, primer producto).
  let naive = |reaction: &str| -> Result<Vec<String>, StrategyFailure> {
    let r = split_reaction_smiles(reaction)?;
    match (r.reactants.first(), r.products.first()) {
      (Some(a), Some(b)) => Ok(vec![format!("{}>>{}", a, b)]),
      _ => Err(StrategyFailure::new("reacción incompleta")),
    }
  };
  let extraction = repo.extract_workbench_reaction_transformation_patterns(&naive, &ExtractionOptions::default())
                       .expect("extracción");
  println!("patrones nuevos: {}", extraction.patterns_created);
  for p in repo.select_workbench_reaction_patterns(Page::default()).expect("patrones") {
    let reactants: Vec<&str> = p.reactants.iter().map(|c| c.compound.identifier.as_str()).collect();
    println!("  {} <- reacciones {:?}, reactivos {:?}", p.pattern.identifier, p.reaction_ids, reactants);
  }

  // Patrón estructural de juguete: grupo carbonilo.
  let carbonyl = |compound: &str| -> Result<Vec<String>, StrategyFailure> {
    Ok(if compound.contains("=O") { vec!["[CX3]=[OX1]".to_string()] } else { vec![] })
  };
  repo.extract_workbench_compound_structure_patterns(&carbonyl, &ExtractionOptions::default())
      .expect("patrones estructurales");
  for p in repo.select_workbench_compound_patterns(Page::default()).expect("patrones de compuesto") {
    println!("  {} en compuestos {:?}", p.pattern.identifier, p.compound_ids);
  }

  let routes = repo.synthesis_routes("CC(=O)N", RouteOptions::from_env()).expect("rutas");
  for (i, route) in routes.enumerate() {
    let route = route.expect("ruta");
    let steps: Vec<&str> = route.steps.iter().map(|s| s.reaction.reaction.identifier.as_str()).collect();
    println!("ruta {}: {}", i + 1, steps.join(" | "));
  }

  let stats = repo.statistics().expect("estadísticas");
  println!("{}", serde_json::to_string_pretty(&stats).expect("json"));
  println!("integridad ok: {}", repo.verify_integrity().expect("integridad").is_healthy());
}
