//! Purpose: Library crate backing the `studentdb` CLI, terminal menu, and web server.
//! Exports: `api` (student store, record types, errors, age parsing).
//! Role: Single owner of persistence; every front-end is a caller of `api::StudentStore`.
//! Invariants: Front-ends never issue SQL or re-implement field validation.
//! Invariants: Store instances are explicit values; there is no global connection.
pub mod api;
mod core;
mod db_paths;
