//! Purpose: Define the public Rust API boundary for studentdb.
//! Exports: Store, record types, error model, and caller-side input helpers.
//! Role: Public surface used by the binary and integration tests.
//! Invariants: This module is the only public path to storage primitives.
//! Invariants: Internal modules remain private and are not directly exposed.

pub use crate::core::error::{Error, ErrorKind, to_exit_code};
pub use crate::core::record::{StudentFields, StudentRecord, parse_age};
pub use crate::core::store::StudentStore;

use std::path::PathBuf;

pub fn default_db_path() -> PathBuf {
    crate::db_paths::default_db_path()
}
