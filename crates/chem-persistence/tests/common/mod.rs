use chem_persistence::DieselCurationRepository;
use std::path::PathBuf;
use uuid::Uuid;

/// Base SQLite en un archivo temporal; se borra al soltar el guard.
pub struct TempDb {
  pub path: PathBuf,
}

impl TempDb {
  pub fn new() -> Self {
    TempDb { path: std::env::temp_dir().join(format!("cacs_test_{}.db", Uuid::new_v4())) }
  }

  pub fn url(&self) -> String {
    self.path.to_str().expect("temp path is utf-8").to_string()
  }

  pub fn repo(&self) -> DieselCurationRepository {
    DieselCurationRepository::new(&self.url()).expect("failed to create repo")
  }
}

impl Drop for TempDb {
  fn drop(&mut self) {
    let _ = std::fs::remove_file(&self.path);
    for suffix in ["-wal", "-shm"] {
      let mut p = self.path.clone().into_os_string();
      p.push(suffix);
      let _ = std::fs::remove_file(p);
    }
  }
}

#[allow(dead_code)]
pub fn identity(raw: &str) -> Result<String, chem_domain::StrategyFailure> {
  Ok(raw.to_string())
}
