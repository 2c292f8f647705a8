// identity.rs
//! Capa de identidad: claves de deduplicación para filas de archivo y de
//! workbench.
//!
//! La igualdad exacta de cadenas es la fuente de verdad. La clave sha256 sólo
//! acelera las búsquedas por índice; toda búsqueda por clave vuelve a
//! comparar la cadena completa.
use crate::EntityKind;
use sha2::{Digest, Sha256};

/// Clave de identidad de una fila: `(kind, identifier)` más su hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey {
  kind: EntityKind,
  identifier: String,
  digest: String,
}

impl IdentityKey {
  pub fn new(kind: EntityKind, identifier: &str) -> Self {
    Self { kind, identifier: identifier.to_string(), digest: identifier_digest(kind, identifier) }
  }

  pub fn kind(&self) -> EntityKind {
    self.kind
  }

  pub fn identifier(&self) -> &str {
    &self.identifier
  }

  pub fn digest(&self) -> &str {
    &self.digest
  }
}

/// Hash hexadecimal de `(kind, identifier)`.
///
/// El kind forma parte del hash para que un SMILES de compuesto y un SMARTS
/// de patrón con el mismo texto no compartan entrada de índice.
pub fn identifier_digest(kind: EntityKind, identifier: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(kind.as_str().as_bytes());
  hasher.update([0u8]);
  hasher.update(identifier.as_bytes());
  format!("{:x}", hasher.finalize())
}
