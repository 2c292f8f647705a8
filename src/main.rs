use chem_domain::{CurationRepository, EntityKind, ReactionGraph, RouteOptions};
use std::error::Error;
use std::io::{self, Write};
use tracing_subscriber::EnvFilter;

/// Menú interactivo mínimo sobre el repositorio de curación que ofrece
/// `chem-persistence`.
///
/// Opciones soportadas:
/// 1) Crear tablas (aplica migraciones embebidas)
/// 2) Ver fuentes registradas
/// 3) Estadísticas por tabla
/// 4) Verificar integridad
/// 5) Rutas de síntesis de un compuesto (JSON)
/// 6) Ver fallos de migración
/// 7) Salir
fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let repo = chem_persistence::new_from_env().map_err(|e| Box::new(e) as Box<dyn Error>)?;

    loop {
        println!("\n== Curation CLI menu ==");
        println!("1) Crear tablas");
        println!("2) Ver fuentes");
        println!("3) Estadísticas");
        println!("4) Verificar integridad");
        println!("5) Rutas de síntesis de un compuesto");
        println!("6) Ver fallos de migración");
        println!("7) Salir");
        print!("Elige una opción: ");
        io::stdout().flush().ok();

        let mut choice = String::new();
        if io::stdin().read_line(&mut choice)? == 0 {
            break;
        }
        match choice.trim() {
            "1" => match repo.create_tables() {
                Ok(()) => println!("Tablas listas"),
                Err(e) => eprintln!("Error creando tablas: {}", e),
            },
            "2" => match repo.select_sources() {
                Ok(sources) => {
                    println!("\nID     | NAME                 | VERSION    | FILE");
                    println!("--------------------------------------------------------------");
                    for s in sources {
                        println!("{:<6} | {:<20} | {:<10} | {}", s.id, s.key.name, s.key.version, s.key.file_name);
                    }
                }
                Err(e) => eprintln!("Error listando fuentes: {}", e),
            },
            "3" => match repo.statistics() {
                Ok(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
                Err(e) => eprintln!("Error obteniendo estadísticas: {}", e),
            },
            "4" => match repo.verify_integrity() {
                Ok(report) if report.is_healthy() => println!("Integridad OK"),
                Ok(report) => println!("Invariantes violados:\n{}", serde_json::to_string_pretty(&report)?),
                Err(e) => eprintln!("Error verificando integridad: {}", e),
            },
            "5" => {
                let target = prompt("Identificador canónico del compuesto: ")?;
                let depth = prompt("Profundidad máxima (enter para el valor por defecto): ")?;
                let mut options = RouteOptions::from_env();
                if !depth.trim().is_empty() {
                    match depth.trim().parse() {
                        Ok(n) => options = options.with_max_depth(n),
                        Err(_) => { eprintln!("Profundidad inválida"); continue; }
                    }
                }
                let routes = match repo.synthesis_routes(target.trim(), options) {
                    Ok(r) => r,
                    Err(e) => { eprintln!("Error buscando rutas: {}", e); continue; }
                };
                if routes.target().is_none() {
                    println!("El compuesto no está en el workbench");
                    continue;
                }
                let mut found = 0;
                for route in routes {
                    match route {
                        Ok(route) => {
                            found += 1;
                            println!("{}", serde_json::to_string_pretty(&route)?);
                        }
                        Err(e) => { eprintln!("Error expandiendo rutas: {}", e); break; }
                    }
                }
                println!("{} rutas", found);
            }
            "6" => {
                for kind in EntityKind::ALL {
                    match repo.select_migration_failures(kind) {
                        Ok(failures) if failures.is_empty() => {}
                        Ok(failures) => {
                            println!("\n{} ({} fallos)", kind, failures.len());
                            for f in failures {
                                println!("  archivo {} | {} | {} | intentos {}", f.archive_id, f.reason, f.detail, f.attempts);
                            }
                        }
                        Err(e) => eprintln!("Error listando fallos de {}: {}", kind, e),
                    }
                }
            }
            "7" => {
                println!("Saliendo...");
                break;
            }
            other => {
                println!("Opción inválida: {}", other);
            }
        }
    }

    Ok(())
}

fn prompt(msg: &str) -> io::Result<String> {
    print!("{}", msg);
    io::stdout().flush()?;
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s)
}
