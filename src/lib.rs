//! Shared playlists blended from several people's listening histories.
//!
//! Core modules:
//! - [`normalize`] - Raw catalog items to ranked [`model::CatalogItem`]s, genre extraction
//! - [`algorithm`] - Exclusion, cross-participant ranking and weighted sampling
//! - [`tracklist`] - Recommendation expansion and final tracklist assembly
//! - [`playlist`] - Playlist lifecycle (create, join, release, refresh)
//! - [`schedule`] - Weekly / monthly refresh trigger
//! - [`daemon`] - Background scheduler process
//!
//! ### Supporting Modules
//!
//! - [`model`] - Data model shared by every module
//! - [`catalog`] - Catalog client trait and the offline fixture catalog
//! - [`db`] - SQLite playlist store with versioned updates
//! - [`config`] - Configuration and data directory management
//! - [`error`] - Error taxonomy
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use blend::catalog::FixtureCatalog;
//! use blend::config::AppConfig;
//! use blend::db::PlaylistStore;
//! use blend::playlist::{NewPlaylist, PlaylistService};
//!
//! let config = AppConfig::default();
//! let store = PlaylistStore::open(&config.resolve_db_path()?)?;
//! let catalog = FixtureCatalog::open(&config.resolve_catalog_path()?)?;
//! let service = PlaylistService::new(store, catalog, config);
//!
//! let ada = service.client().user("ada").ok_or("unknown user")?;
//! let creator = service.participation(ada, None)?;
//! let playlist = service.create(NewPlaylist {
//!     creator,
//!     title: None,
//!     description: None,
//!     size: None,
//!     invitations: vec!["bob@example.com".to_string()],
//!     recommendations_enabled: true,
//!     refresh_every: None,
//! })?;
//!
//! let released = service.release(&playlist.id)?;
//! println!("Published as {:?}", released.external_playlist_id);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Ranking
//!
//! Each participant's top items come in three time windows. An item at
//! position `index` of a window of length `n` weighs `n - index`; weights
//! add up across windows and across participants into `total_rank`.
//! Excluded tracks (by id, artist or genre) never enter the pool.
//!
//! Every participant then receives a sample drawn without replacement from
//! the tracks they contributed, with probability proportional to
//! `total_rank`, so tracks several people love are the likeliest picks.
//!
//! ## Error Handling
//!
//! Library functions return [`error::Result`]; a failing catalog call
//! aborts the whole release or refresh and leaves the stored playlist as it
//! was. The binary wraps everything in `anyhow` for context.

pub mod algorithm;
pub mod catalog;
pub mod cli;
pub mod completion;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod model;
pub mod normalize;
pub mod playlist;
pub mod schedule;
pub mod tracklist;
