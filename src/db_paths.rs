//! Purpose: Shared default database path resolution.
//! Exports: `default_db_path`.
//! Role: Keep CLI, menu, and server pointed at the same file by default.
//! Invariants: Default database remains `~/.studentdb/students.db`.

use std::path::PathBuf;

pub(crate) fn default_db_path() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".studentdb").join("students.db")
}
