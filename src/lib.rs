//! # chainstore
//!
//! Persistent storage layer for a blockchain ledger node:
//! - SQLite metadata store for epochs, parameters, UTXOs, certificates, tip
//! - Log-structured blob store (WAL + memtable + value log) for large payloads
//! - Lazy client for an out-of-process graph store
//! - Cross-backend transactions with a crash-consistency marker
//! - Background value log GC
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Connection / session layer                 │
//! │                (reads and writes chain facts)                │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Txn (run / commit / rollback)
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Database                             │
//! │        consistency check · GC task · metrics registry        │
//! └──────────┬─────────────────────┬──────────────────┬─────────┘
//!            │                     │                  │
//!            ▼                     ▼                  ▼
//!   ┌─────────────────┐   ┌─────────────────┐   ┌─────────────┐
//!   │  MetadataStore  │   │    BlobStore    │   │ GraphClient │
//!   │ (plugin: sqlite)│   │ (WAL + vlog)    │   │   (TCP)     │
//!   └─────────────────┘   └─────────────────┘   └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod blob;
pub mod database;
pub mod graph;
pub mod metadata;
pub mod registry;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use database::{Database, Txn};
pub use error::{OpenError, Result, StoreError};
pub use metadata::{MetadataStore, MetadataTxn};
pub use registry::PluginRegistry;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of chainstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
