//! # Shell Completion Module
//!
//! Generates completion scripts through clap_complete and serves playlist
//! ids for dynamic completion of `show`, `join`, `release` and `refresh`.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! blend completion bash > ~/.local/share/bash-completion/completions/blend
//!
//! # Generate zsh completions
//! blend completion zsh > ~/.config/zsh/completions/_blend
//! ```

use crate::cli::Shell;
use crate::db::PlaylistStore;
use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};
use std::path::Path;

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Convert our Shell enum to clap_complete's Shell enum
#[must_use]
pub fn shell_to_completion_shell(shell: &Shell) -> CompletionShell {
    match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    }
}

/// Playlist ids stored at `db_path`. A missing or unreadable database
/// completes to nothing.
pub fn get_playlist_completions(db_path: &Path) -> Vec<String> {
    if !db_path.exists() {
        return Vec::new();
    }

    match PlaylistStore::open(db_path).and_then(|store| store.ids()) {
        Ok(mut ids) => {
            ids.sort();
            ids
        }
        Err(e) => {
            log::debug!("No playlist completions: {e}");
            Vec::new()
        }
    }
}

/// Print one playlist id per line for shell completion scripts.
pub fn print_playlist_completions(db_path: &Path) -> Result<()> {
    let mut out = io::stdout().lock();
    for id in get_playlist_completions(db_path) {
        writeln!(out, "{id}")?;
    }
    Ok(())
}
