//! Core data models for the DRS resolver.
//!
//! Identifiers and their wire formats, the snapshot projections the resolver
//! caches, file-system items returned by the file lookup, and the GA4GH DRS
//! response shapes. Rows map to SQLite via `sqlx::FromRow` and responses
//! serialize as JSON via `serde`.

pub mod access_id;
pub mod alias;
pub mod drs_id;
pub mod drs_object;
pub mod fs_item;
pub mod snapshot;
