//! # Blend - Shared Playlists from Several Listening Histories
//!
//! Every participant contributes their top artists, tracks and genres; blend
//! ranks the union, samples each participant's favourites by weight and
//! publishes the mix as one playlist that can refresh itself weekly or
//! monthly.
//!
//! ## Usage
//!
//! ```bash
//! # Create a playlist and invite a friend
//! blend create --user ada --invite bob@example.com --refresh-every week
//!
//! # Join and publish it
//! blend join <playlist> --user bob
//! blend release <playlist>
//!
//! # Keep scheduled playlists fresh
//! blend daemon start
//! ```

use anyhow::{anyhow, Context, Result};
use blend::catalog::FixtureCatalog;
use blend::cli::{Args, Command, DaemonAction};
use blend::config::{self, AppConfig};
use blend::db::PlaylistStore;
use blend::model::{ExclusionSet, Playlist, RefreshCadence, User};
use blend::playlist::{NewPlaylist, PlaylistService};
use blend::{completion, daemon, schedule};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

/// Main entry point for blend.
///
/// Initializes logging, parses command-line arguments, and routes commands
/// to the library. Logging is controlled via `RUST_LOG`:
/// - `RUST_LOG=debug blend release <id>` - Enable debug logging
/// - `RUST_LOG=blend::algorithm=trace blend refresh <id>` - Module-specific logging
fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    let db_path = config.resolve_db_path()?;
    debug!("Using database {}", db_path.display());

    match args.command {
        Command::InitDb { force } => {
            let existed = db_path.exists();
            let store = PlaylistStore::open(&db_path)?;
            if force {
                store.reset()?;
                println!("Database reset at {}", db_path.display());
            } else if existed {
                println!("Database already exists at {} (use --force to reset)", db_path.display());
            } else {
                println!("Database created at {}", db_path.display());
            }
        }
        Command::Collect { user, simulate } => {
            let service = open_service(config, &db_path)?;
            let user = find_user(service.client(), &user)?;
            let data = if simulate.is_empty() {
                service.collect(&user)?
            } else {
                service.collect_simulated(&user, &simulate)?
            };
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Command::Create {
            user,
            title,
            description,
            size,
            invitations,
            refresh_every,
            no_recommendations,
            exclude,
        } => {
            let service = open_service(config, &db_path)?;
            let user = find_user(service.client(), &user)?;
            let creator = service.participation(user, load_exclusions(exclude.as_deref())?)?;
            let playlist = service.create(NewPlaylist {
                creator,
                title,
                description,
                size,
                invitations,
                recommendations_enabled: !no_recommendations,
                refresh_every,
            })?;
            println!("{}", playlist.id);
        }
        Command::Join { playlist, user, exclude } => {
            let service = open_service(config, &db_path)?;
            let user = find_user(service.client(), &user)?;
            let participation = service.participation(user, load_exclusions(exclude.as_deref())?)?;
            let joined = service.participate(&playlist, participation)?;
            println!("Joined {} ({} participants)", joined.id, joined.participations.len());
        }
        Command::Show { playlist } => {
            let service = open_service(config, &db_path)?;
            println!("{}", serde_json::to_string_pretty(&service.get(&playlist)?)?);
        }
        Command::List { user, email } => {
            let service = open_service(config, &db_path)?;
            let email = email.or_else(|| service.client().user(&user).map(|u| u.email).filter(|e| !e.is_empty()));
            for playlist in service.list(&user, email.as_deref())? {
                print_summary(&playlist);
            }
        }
        Command::Release { playlist } => {
            let service = open_service(config, &db_path)?;
            let released = service.release(&playlist)?;
            println!(
                "Released {} as {}",
                released.id,
                released.external_playlist_id.as_deref().unwrap_or("-")
            );
        }
        Command::Refresh { playlist } => {
            let service = open_service(config, &db_path)?;
            let refreshed = service.refresh(&playlist)?;
            println!("Refreshed {}", refreshed.id);
        }
        Command::RefreshDue => {
            let service = open_service(config, &db_path)?;
            let report = schedule::run_due_refreshes(&service, chrono::Utc::now().date_naive())?;
            println!("{} refreshed, {} failed", report.refreshed.len(), report.failed.len());
            for (id, error) in &report.failed {
                eprintln!("  {id}: {error}");
            }
        }
        Command::Daemon { action } => run_daemon(action, config, &db_path)?,
        Command::Completion { shell } => {
            let mut cmd = Args::command();
            completion::generate_completions(completion::shell_to_completion_shell(&shell), &mut cmd);
        }
        Command::CompletePlaylists => {
            // Used by shell completion scripts
            completion::print_playlist_completions(&db_path)?;
        }
    }

    Ok(())
}

/// Config file merged with the global CLI overrides.
fn resolve_config(args: &Args) -> Result<AppConfig> {
    let mut config = AppConfig::load();
    if let Some(db) = &args.db {
        config.db_path = Some(config::absolutize(db)?);
    }
    if let Some(catalog) = &args.catalog {
        config.catalog_path = Some(config::absolutize(catalog)?);
    }
    Ok(config)
}

fn open_service(config: AppConfig, db_path: &Path) -> Result<PlaylistService<FixtureCatalog>> {
    let catalog_path: PathBuf = config.resolve_catalog_path()?;
    let catalog = FixtureCatalog::open(&catalog_path)?;
    let store = PlaylistStore::open(db_path)
        .with_context(|| format!("Failed to open playlist database {}", db_path.display()))?;
    Ok(PlaylistService::new(store, catalog, config))
}

fn find_user(catalog: &FixtureCatalog, user_id: &str) -> Result<User> {
    catalog
        .user(user_id)
        .ok_or_else(|| anyhow!("Unknown user `{user_id}` in the catalog"))
}

fn load_exclusions(path: Option<&Path>) -> Result<Option<ExclusionSet>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let path = config::absolutize(path)?;
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read exclusions from {}", path.display()))?;
    let exclusions = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid exclusions file {}", path.display()))?;
    Ok(Some(exclusions))
}

fn print_summary(playlist: &Playlist) {
    let title = playlist.title.clone().unwrap_or_else(|| playlist.default_title());
    let cadence = playlist.refresh_every.map_or("-", RefreshCadence::as_str);
    println!(
        "{}  {:<8}  {:<5}  {} ({} participants)",
        playlist.id,
        playlist.status.to_string(),
        cadence,
        title,
        playlist.participations.len()
    );
}

fn run_daemon(action: DaemonAction, config: AppConfig, db_path: &Path) -> Result<()> {
    match action {
        DaemonAction::Start => {
            if daemon::is_daemon_running()? {
                eprintln!("Daemon is already running");
                return Ok(());
            }

            // Fork and start daemon in background
            match unsafe { libc::fork() } {
                0 => {
                    let service = open_service(config, db_path)?;
                    daemon::SchedulerDaemon::new(service)?.start_monitoring()?;
                    std::process::exit(0);
                }
                pid if pid > 0 => {
                    println!("Starting refresh scheduler daemon...");
                    std::thread::sleep(std::time::Duration::from_millis(500));

                    if daemon::is_daemon_running()? {
                        info!("Daemon forked as PID {pid}");
                        println!("Daemon started successfully");
                    } else {
                        eprintln!("Failed to start daemon");
                    }
                }
                _ => {
                    eprintln!("Failed to fork process");
                }
            }
        }
        DaemonAction::Stop => {
            daemon::stop_daemon()?;
            println!("Daemon stopped");
        }
        DaemonAction::Status => {
            if daemon::is_daemon_running()? {
                println!("Daemon is running");
            } else {
                println!("Daemon is not running");
            }
        }
    }
    Ok(())
}
