// ABOUTME: Library module for dbtransfer
// ABOUTME: Exports the transfer engines, adapters and supporting layers for the binary and tests

pub mod adapter;
pub mod config;
pub mod dialect;
pub mod error;
pub mod export;
pub mod import;
pub mod migration;
pub mod options;
pub mod schema;
pub mod stats;
pub mod storage;
pub mod utils;
pub mod where_clause;

pub use error::{Result, TransferError};
