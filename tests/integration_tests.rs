//! # Integration Tests for Blend
//!
//! End-to-end tests of the playlist lifecycle against an offline catalog
//! fixture, plus CLI workflows through the compiled binary.

use anyhow::Result;
use blend::catalog::{CatalogClient, FixtureCatalog};
use blend::config::AppConfig;
use blend::db::PlaylistStore;
use blend::error::BlendError;
use blend::model::{Credential, ExclusionSet, PlaylistStatus, RefreshCadence};
use blend::playlist::{NewPlaylist, PlaylistService};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

/// Write a catalog fixture with three users: two real ones and a bot.
///
/// Ada's tracks are all by artist `ar:a*`, Bob's by `ar:b*`; track
/// `t:shared` is in both short-term lists.
fn create_test_catalog(dir: &Path) -> Result<PathBuf> {
    let tracks = |prefix: &str, artist: &str| {
        let mut items = vec![json!({
            "uri": "t:shared",
            "name": "Shared",
            "artists": [{ "uri": "ar:shared", "name": "Both" }]
        })];
        items.extend((0..30).map(|i| {
            json!({
                "uri": format!("t:{prefix}{i}"),
                "name": format!("{prefix} {i}"),
                "artists": [{ "uri": format!("{artist}{}", i % 3), "name": format!("{artist} {}", i % 3) }]
            })
        }));
        items
    };
    let artists = |artist: &str, genre: &str| {
        (0..3)
            .map(|i| json!({ "uri": format!("{artist}{i}"), "name": format!("{artist} {i}"), "genres": [genre] }))
            .collect::<Vec<_>>()
    };

    let fixture = json!({
        "users": [
            { "id": "ada", "email": "ada@example.com", "name": "Ada", "refreshToken": "tok-ada" },
            { "id": "bob", "email": "bob@example.com", "name": "Bob", "refreshToken": "tok-bob" },
            { "id": "robot", "email": "", "name": "Robot", "bot": true }
        ],
        "topItems": {
            "ada": {
                "tracks": { "short_term": tracks("a", "ar:a"), "long_term": tracks("a", "ar:a") },
                "artists": { "short_term": artists("ar:a", "Synth Pop") }
            },
            "bob": {
                "tracks": { "short_term": tracks("b", "ar:b") },
                "artists": { "medium_term": artists("ar:b", "Black Metal") }
            }
        },
        "recommendations": (0..60)
            .map(|i| json!({ "uri": format!("t:rec{i}"), "name": format!("Rec {i}") }))
            .collect::<Vec<_>>(),
        "playlists": {}
    });

    let path = dir.join("catalog.json");
    std::fs::write(&path, serde_json::to_string_pretty(&fixture)?)?;
    Ok(path)
}

fn create_test_service(dir: &TempDir) -> Result<PlaylistService<FixtureCatalog>> {
    create_test_catalog(dir.path())?;
    open_test_service(dir.path())
}

/// Another service on the same files, as a second `blend` process would have.
fn open_test_service(dir: &Path) -> Result<PlaylistService<FixtureCatalog>> {
    let catalog = FixtureCatalog::open(&dir.join("catalog.json"))?;
    let store = PlaylistStore::open(&dir.join("playlists.db"))?;
    Ok(PlaylistService::new(store, catalog, AppConfig::default()))
}

fn hosted_playlist_count(dir: &Path) -> Result<usize> {
    let catalog: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(dir.join("catalog.json"))?)?;
    Ok(catalog["playlists"].as_object().map_or(0, |playlists| playlists.len()))
}

fn create_playlist(
    service: &PlaylistService<FixtureCatalog>,
    user: &str,
    recommendations_enabled: bool,
    refresh_every: Option<RefreshCadence>,
) -> Result<String> {
    let user = service.client().user(user).expect("fixture user");
    let creator = service.participation(user, None)?;
    let playlist = service.create(NewPlaylist {
        creator,
        title: None,
        description: None,
        size: Some(10),
        invitations: vec!["bob@example.com".to_string()],
        recommendations_enabled,
        refresh_every,
    })?;
    Ok(playlist.id)
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_create_join_release() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let service = create_test_service(&temp_dir)?;
        let id = create_playlist(&service, "ada", true, None)?;

        let bob = service.client().user("bob").expect("fixture user");
        assert_eq!(service.list("bob", Some("bob@example.com"))?.len(), 1);
        service.participate(&id, service.participation(bob, None)?)?;

        let released = service.release(&id)?;
        assert_eq!(released.status, PlaylistStatus::Released);

        let external_id = released.external_playlist_id.expect("external playlist");
        let hosted = service.client().playlist(&external_id).expect("hosted playlist");
        assert_eq!(hosted.owner, "ada");
        assert_eq!(hosted.name, "Ada x Bob");
        assert_eq!(hosted.tracks.len(), 2 * (10 + 10));

        // Each participant only receives their own (or shared) tracks.
        let sampled: Vec<&String> = hosted.tracks.iter().filter(|t| !t.starts_with("t:rec")).collect();
        assert_eq!(sampled.len(), 20);
        assert!(sampled.iter().all(|t| t.starts_with("t:a") || t.starts_with("t:b") || *t == "t:shared"));

        Ok(())
    }

    #[test]
    fn test_excluded_artist_never_released() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let service = create_test_service(&temp_dir)?;

        let ada = service.client().user("ada").expect("fixture user");
        let exclusions = ExclusionSet {
            artists: ["ar:a0".to_string(), "ar:a1".to_string()].into_iter().collect(),
            ..ExclusionSet::default()
        };
        let creator = service.participation(ada, Some(exclusions))?;
        let playlist = service.create(NewPlaylist {
            creator,
            title: Some("Filtered".to_string()),
            description: Some("Only a2".to_string()),
            size: Some(50),
            invitations: Vec::new(),
            recommendations_enabled: false,
            refresh_every: None,
        })?;

        let released = service.release(&playlist.id)?;
        let external_id = released.external_playlist_id.expect("external playlist");
        let hosted = service.client().playlist(&external_id).expect("hosted playlist");

        // Ten tracks by ar:a2 plus the shared one survive the filter.
        assert_eq!(hosted.tracks.len(), 11);
        for track in &hosted.tracks {
            if let Some(n) = track.strip_prefix("t:a") {
                assert_eq!(n.parse::<usize>()? % 3, 2, "{track} should have been excluded");
            }
        }
        assert_eq!(hosted.description, "Only a2");
        Ok(())
    }

    #[test]
    fn test_refresh_replaces_external_tracks() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let service = create_test_service(&temp_dir)?;
        let id = create_playlist(&service, "ada", false, Some(RefreshCadence::Week))?;

        let released = service.release(&id)?;
        let external_id = released.external_playlist_id.expect("external playlist");
        let refreshed = service.refresh(&id)?;

        assert!(refreshed.refreshed_at.is_some());
        let tracks = service
            .client()
            .get_playlist_tracks(&Credential("tok-ada".to_string()), &external_id)?;
        assert_eq!(tracks.len(), 10);
        Ok(())
    }

    #[test]
    fn test_bot_only_playlist_has_no_host() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let service = create_test_service(&temp_dir)?;
        let robot = service.client().user("robot").expect("fixture user");

        // Bots cannot collect data themselves.
        assert!(matches!(service.participation(robot, None), Err(BlendError::Validation(_))));
        Ok(())
    }

    #[test]
    fn test_concurrent_release_publishes_once() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let service = create_test_service(&temp_dir)?;
        let id = create_playlist(&service, "ada", true, None)?;

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4).map(|_| scope.spawn(|| service.release(&id))).collect();
            handles.into_iter().map(|h| h.join().expect("release thread")).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(result, BlendError::Busy(_) | BlendError::InvalidState { .. }));
        }
        Ok(())
    }

    #[test]
    fn test_release_across_services_publishes_once() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let first = create_test_service(&temp_dir)?;
        let second = open_test_service(temp_dir.path())?;
        let id = create_playlist(&first, "ada", true, None)?;

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|i| {
                    let service = if i % 2 == 0 { &first } else { &second };
                    let id = &id;
                    scope.spawn(move || service.release(id))
                })
                .collect();
            handles.into_iter().map(|h| h.join().expect("release thread")).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        for result in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(result, BlendError::Busy(_) | BlendError::InvalidState { .. }));
        }
        assert_eq!(hosted_playlist_count(temp_dir.path())?, 1);
        Ok(())
    }

    #[test]
    fn test_refresh_waits_for_lease_held_by_other_service() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let cli = create_test_service(&temp_dir)?;
        let daemon = open_test_service(temp_dir.path())?;
        let id = create_playlist(&cli, "ada", false, Some(RefreshCadence::Week))?;
        let external_id = cli.release(&id)?.external_playlist_id.expect("external playlist");

        daemon.store().acquire_lease(&id, "daemon")?;
        assert!(matches!(cli.refresh(&id), Err(BlendError::Busy(_))));
        assert!(matches!(cli.release(&id), Err(BlendError::Busy(_))));
        assert!(cli.get(&id)?.refreshed_at.is_none());

        daemon.store().release_lease(&id, "daemon")?;
        cli.refresh(&id)?;
        let tracks = daemon
            .client()
            .get_playlist_tracks(&Credential("tok-ada".to_string()), &external_id)?;
        assert_eq!(tracks.len(), 10);
        Ok(())
    }

    #[test]
    fn test_daemon_refreshes_playlist_released_after_it_started() -> Result<()> {
        let temp_dir = TempDir::new()?;
        create_test_catalog(temp_dir.path())?;
        let daemon = open_test_service(temp_dir.path())?;

        let cli = open_test_service(temp_dir.path())?;
        let id = create_playlist(&cli, "ada", false, Some(RefreshCadence::Week))?;
        let released = cli.release(&id)?;
        let released_on = released.released_at.expect("released").date_naive();

        let report = blend::schedule::run_due_refreshes(&daemon, released_on + chrono::Duration::days(7))?;
        assert_eq!(report.refreshed, vec![id.clone()]);
        assert!(report.failed.is_empty());

        // The daemon's writes keep the CLI's playlist instead of replacing the file.
        assert_eq!(hosted_playlist_count(temp_dir.path())?, 1);
        let external_id = released.external_playlist_id.expect("external playlist");
        let hosted = cli.client().playlist(&external_id).expect("hosted playlist");
        assert_eq!(hosted.name, "Ada");
        assert_eq!(hosted.tracks.len(), 10);
        Ok(())
    }

    #[test]
    fn test_scheduled_refresh_runs_on_release_weekday() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let service = create_test_service(&temp_dir)?;
        let id = create_playlist(&service, "ada", false, Some(RefreshCadence::Week))?;
        service.release(&id)?;

        let stored = service.store().require(&id)?;
        let released_on = stored.playlist.released_at.expect("released").date_naive();

        let report = blend::schedule::run_due_refreshes(&service, released_on)?;
        assert!(report.refreshed.is_empty());

        let next_week = released_on + chrono::Duration::days(7);
        let report = blend::schedule::run_due_refreshes(&service, next_week)?;
        assert_eq!(report.refreshed, vec![id.clone()]);
        assert!(report.failed.is_empty());
        Ok(())
    }

    #[test]
    fn test_catalog_changes_persist_to_fixture_file() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let service = create_test_service(&temp_dir)?;
        let id = create_playlist(&service, "ada", false, None)?;
        let released = service.release(&id)?;

        let reopened = FixtureCatalog::open(&temp_dir.path().join("catalog.json"))?;
        let external_id = released.external_playlist_id.expect("external playlist");
        assert_eq!(reopened.playlist(&external_id).expect("persisted").tracks.len(), 10);
        Ok(())
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;

    fn blend(dir: &Path, args: &[&str]) -> std::process::Output {
        Command::new(env!("CARGO_BIN_EXE_blend"))
            .args(args)
            .arg("--db")
            .arg(dir.join("playlists.db"))
            .arg("--catalog")
            .arg(dir.join("catalog.json"))
            .output()
            .expect("Failed to run blend")
    }

    #[test]
    fn test_cli_help_displays_correctly() {
        let output = Command::new(env!("CARGO_BIN_EXE_blend"))
            .arg("--help")
            .output()
            .expect("Failed to run help command");

        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("blend"));
        assert!(stdout.contains("create"));
        assert!(stdout.contains("release"));
        assert!(stdout.contains("refresh"));
        assert!(stdout.contains("daemon"));
    }

    #[test]
    fn test_completion_generation() {
        let output = Command::new(env!("CARGO_BIN_EXE_blend"))
            .args(["completion", "bash"])
            .output()
            .expect("Failed to run completion command");

        assert!(output.status.success());
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert!(stdout.contains("_blend"));
        assert!(stdout.contains("complete"));
    }

    #[test]
    fn test_cli_workflow() -> Result<()> {
        let temp_dir = TempDir::new()?;
        create_test_catalog(temp_dir.path())?;

        assert!(blend(temp_dir.path(), &["init-db"]).status.success());

        let created = blend(temp_dir.path(), &["create", "--user", "ada", "--invite", "bob@example.com"]);
        assert!(created.status.success(), "{}", String::from_utf8_lossy(&created.stderr));
        let id = String::from_utf8(created.stdout)?.trim().to_string();
        assert_eq!(id.len(), 24);

        assert!(blend(temp_dir.path(), &["join", &id, "--user", "bob"]).status.success());

        let listed = blend(temp_dir.path(), &["list", "--user", "bob"]);
        assert!(String::from_utf8_lossy(&listed.stdout).contains(&id));

        let completions = blend(temp_dir.path(), &["complete-playlists"]);
        assert_eq!(String::from_utf8_lossy(&completions.stdout).trim(), id);

        let released = blend(temp_dir.path(), &["release", &id]);
        assert!(released.status.success(), "{}", String::from_utf8_lossy(&released.stderr));

        let shown = blend(temp_dir.path(), &["show", &id]);
        let playlist: serde_json::Value = serde_json::from_slice(&shown.stdout)?;
        assert_eq!(playlist["status"], "released");
        assert_eq!(playlist["participations"].as_array().map(Vec::len), Some(2));

        let again = blend(temp_dir.path(), &["release", &id]);
        assert!(!again.status.success());
        Ok(())
    }

    #[test]
    fn test_unknown_playlist_fails() -> Result<()> {
        let temp_dir = TempDir::new()?;
        create_test_catalog(temp_dir.path())?;

        let output = blend(temp_dir.path(), &["show", "does-not-exist"]);
        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
        Ok(())
    }
}
