#![forbid(unsafe_code)]

//! Core domain model and consistency engine for the book lending system.
//!
//! This crate provides:
//! - Domain types (books, loans, request shapes)
//! - Catalog and loan ledger with their copy-count invariants
//! - The `Library` coordinator that serializes mutations and snapshots state
//! - Persistence (JSON snapshot store with file locking, CSV export)

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod state;
pub mod store;
pub mod catalog;
pub mod ledger;
pub mod library;
pub mod export;

// Re-export commonly used types
pub use error::{Error, ErrorKind, Result};
pub use types::*;
pub use config::Config;
pub use state::StoreState;
pub use store::{AccessMode, JsonFileStore, MemoryStore, SnapshotStore};
pub use catalog::Catalog;
pub use ledger::Ledger;
pub use library::{Health, Library};
