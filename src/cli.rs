//! # Command-Line Interface Module
//!
//! This module defines the command-line interface for blend using Clap derive macros.
//! It provides a type-safe way to parse command-line arguments and route them to
//! appropriate functionality.
//!
//! ## Commands
//!
//! - `collect`: Fetch (or simulate) a user's listening data
//! - `create` / `join`: Start a shared playlist or take part in one
//! - `release`: Publish the blended tracklist to the catalog
//! - `refresh` / `refresh-due`: Rebuild published playlists
//! - `daemon`: Run the refresh scheduler in the background
//!
//! ## Examples
//!
//! ```bash
//! blend create --user ada --invite bob@example.com --refresh-every week
//! blend join 5f1c0a9e3b7d2c4a8e6f0b1d --user bob
//! blend release 5f1c0a9e3b7d2c4a8e6f0b1d
//! ```

use crate::model::RefreshCadence;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "blend")]
#[command(about = "Blend: merge several listening histories into one shared playlist")]
#[command(version)]
pub struct Args {
    /// Playlist database (defaults to the config file, then the data directory)
    #[arg(long, global = true, env = "BLEND_DB", value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Offline catalog fixture (JSON)
    #[arg(long, global = true, env = "BLEND_CATALOG", value_hint = clap::ValueHint::FilePath)]
    pub catalog: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the playlist database
    ///
    /// Without --force, an existing database is kept as is.
    InitDb {
        /// Drop every stored playlist and start over
        #[arg(long)]
        force: bool,
    },

    /// Collect a user's listening data and print it as JSON
    ///
    /// Fetches top artists and tracks for every time window and derives
    /// the genres. With --simulate, the data is generated from catalog
    /// recommendations seeded by the given track ids instead.
    Collect {
        /// Catalog user id
        #[arg(long)]
        user: String,

        /// Seed track ids for simulated data
        #[arg(long, num_args = 1..)]
        simulate: Vec<String>,
    },

    /// Create a shared playlist with the given user as first participant
    Create {
        /// Catalog user id of the creator
        #[arg(long)]
        user: String,

        /// Playlist title (defaults to the participant names)
        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Tracks sampled per participant
        #[arg(long)]
        size: Option<usize>,

        /// Email addresses to invite
        #[arg(long = "invite")]
        invitations: Vec<String>,

        /// Refresh the released playlist automatically
        #[arg(long, value_enum)]
        refresh_every: Option<RefreshCadence>,

        /// Only use the participants' own tracks
        #[arg(long)]
        no_recommendations: bool,

        /// JSON file with `artists`, `tracks` and `genres` ids to leave out
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        exclude: Option<PathBuf>,
    },

    /// Take part in a waiting playlist
    Join {
        /// Playlist id
        #[arg(value_hint = clap::ValueHint::Other)]
        playlist: String,

        /// Catalog user id
        #[arg(long)]
        user: String,

        /// JSON file with `artists`, `tracks` and `genres` ids to leave out
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        exclude: Option<PathBuf>,
    },

    /// Print a playlist as JSON
    Show {
        #[arg(value_hint = clap::ValueHint::Other)]
        playlist: String,
    },

    /// List the playlists a user takes part in or was invited to
    List {
        #[arg(long)]
        user: String,

        /// Also match invitations sent to this address
        #[arg(long)]
        email: Option<String>,
    },

    /// Publish a waiting playlist to the catalog
    ///
    /// Builds the blended tracklist and pushes it to a new, private
    /// playlist owned by the first participant with a catalog credential.
    Release {
        #[arg(value_hint = clap::ValueHint::Other)]
        playlist: String,
    },

    /// Rebuild a released playlist from fresh listening data
    Refresh {
        #[arg(value_hint = clap::ValueHint::Other)]
        playlist: String,
    },

    /// Refresh every scheduled playlist that is due today
    RefreshDue,

    /// Manage the refresh scheduler daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Generate shell completions
    ///
    /// Usage: blend completion bash > ~/.local/share/bash-completion/completions/blend
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List playlist ids for completion (hidden command)
    #[command(hide = true)]
    CompletePlaylists,
}

/// Daemon management actions
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonAction {
    /// Start the refresh scheduler in the background
    Start,

    /// Stop the running daemon
    Stop,

    /// Check daemon status
    Status,
}
