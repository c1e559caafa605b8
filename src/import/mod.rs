// ABOUTME: Import engine and the readers it uses for each input format
// ABOUTME: SQL statement splitting, CSV parsing and per-table conflict resolution

pub mod conflict;
pub mod csv;
pub mod engine;
pub mod sql;

pub use conflict::ConflictDecision;
pub use engine::{detect_format, Importer};
