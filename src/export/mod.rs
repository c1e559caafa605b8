// ABOUTME: Export engine and the writers it uses for each output format
// ABOUTME: SQL dumps, JSON/YAML documents, CSV files and gzip/streaming sinks

pub mod csv;
pub mod document;
pub mod engine;
pub mod sink;
pub mod sql;

pub use document::TableSnapshot;
pub use engine::{ExportResult, Exporter, CSV_METADATA_FILE};
