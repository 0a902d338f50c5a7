//! # jambbs - JAM Message Bases for a Multi-User BBS
//!
//! jambbs stores BBS message areas in the JAM format: four cooperating files per
//! area holding headers, bodies, an index and per-user last-read pointers. Many
//! sessions and processes can share an area safely through an advisory lock.
//!
//! ## Features
//!
//! - **JAM Engine**: Byte-exact reader/writer for `.jhr`, `.jdt`, `.jdx` and `.jlr` files.
//! - **Soft Delete and Pack**: Deleted messages linger until a pack renumbers the survivors, remapping reply links and last-read pointers.
//! - **Crash Safety**: Interrupted packs roll forward or back on the next open; damaged bases are recreated or reported per configuration.
//! - **Async Hosting**: Tokio-facing [`storage::Storage`] caches open areas and runs disk work on the blocking pool.
//! - **Maintenance**: Scheduled packs of areas above a deleted-message threshold plus tar.gz archives with retention.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jambbs::config::Config;
//! use jambbs::storage::Storage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     let storage = Storage::from_config(&config.storage).await?;
//!
//!     storage.store_message("general", "sysop", "All", "Welcome", "First post").await?;
//!     for msg in storage.get_messages("general", 10).await? {
//!         println!("{} {}", msg.number, msg.subject);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`storage`] - Area hosting, the JAM engine (`storage::jam`), backups and maintenance
//! - [`config`] - Configuration management and validation
//! - [`validation`] - Area and participant name checks, content sanitization
//! - [`metrics`] - Process-wide operation counters
//! - [`logutil`] - Log-safe rendering of user text
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   CLI / BBS     │ ← Sessions and sysop tools
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   Storage       │ ← Async area registry, backups, scheduler
//! └─────────────────┘
//!          │
//! ┌─────────────────┐
//! │   JAM Engine    │ ← Files, locking, pack
//! └─────────────────┘
//! ```

pub mod config;
pub mod logutil;
pub mod metrics;
pub mod storage;
pub mod validation;
