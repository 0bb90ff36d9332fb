//! # Catalog Client
//!
//! The external music catalog is reached through [`CatalogClient`]. The
//! engine only ever asks it for top items, recommendations and a handful
//! of playlist mutations; transport and authentication live behind the
//! trait.
//!
//! [`FixtureCatalog`] is an offline implementation backed by a JSON file.
//! It serves the CLI when no online catalog is configured and doubles as
//! the test double for the integration tests. Every call re-reads the file
//! under an exclusive `flock`, so a long-running daemon and short CLI
//! invocations see each other's playlists.
//!
//! ## Fixture format
//!
//! ```json
//! {
//!   "users": [{ "id": "u1", "email": "a@x.org", "name": "Ada", "refreshToken": "tok-1" }],
//!   "topItems": { "u1": { "tracks": { "short_term": [{ "uri": "t:1", "name": "One" }] } } },
//!   "recommendations": [{ "uri": "t:99", "name": "Suggested" }],
//!   "playlists": {}
//! }
//! ```

use crate::error::{BlendError, Result};
use crate::model::{Category, Credential, ParticipantData, TimeWindow, User};
use crate::normalize::{self, RawArtistRef, RawItem};
use crate::playlist::new_playlist_id;
use log::{debug, info, trace, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Artists sampled from recommended tracks when simulating a participant.
pub const SIMULATED_ARTIST_COUNT: usize = 50;

/// Operations the engine performs against the external catalog.
///
/// Every call is blocking from the engine's point of view and any failure
/// is reported as [`BlendError::UpstreamFetch`].
pub trait CatalogClient: Send + Sync {
    /// Top artists or tracks of the credential's owner, most preferred first.
    fn fetch_top_items(
        &self,
        credential: &Credential,
        category: Category,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<RawItem>>;

    fn fetch_recommendations(
        &self,
        credential: &Credential,
        seed_track_ids: &[String],
        limit: usize,
    ) -> Result<Vec<RawItem>>;

    /// Returns the external playlist id.
    fn create_playlist(
        &self,
        credential: &Credential,
        owner_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<String>;

    fn add_tracks(&self, credential: &Credential, playlist_id: &str, track_ids: &[String]) -> Result<()>;

    fn remove_tracks(&self, credential: &Credential, playlist_id: &str, track_ids: &[String]) -> Result<()>;

    fn get_playlist_tracks(&self, credential: &Credential, playlist_id: &str) -> Result<Vec<String>>;
}

/// Pull and normalize a participant's artists, tracks and derived genres.
pub fn collect_participant_data<C: CatalogClient + ?Sized>(
    client: &C,
    credential: &Credential,
    limit: usize,
) -> Result<ParticipantData> {
    let mut data = ParticipantData::default();

    for window in TimeWindow::ALL {
        let artists = client.fetch_top_items(credential, Category::Artists, window, limit)?;
        data.artists.set(window, normalize::normalize_items(&artists, Category::Artists));

        let tracks = client.fetch_top_items(credential, Category::Tracks, window, limit)?;
        data.tracks.set(window, normalize::normalize_items(&tracks, Category::Tracks));
    }
    data.genres = normalize::extract_genres(&data.artists);

    debug!(
        "Collected {} short-term tracks, {} short-term artists, {} short-term genres",
        data.tracks.short_term.len(),
        data.artists.short_term.len(),
        data.genres.short_term.len()
    );
    Ok(data)
}

/// Simulate listening history from recommendations seeded by `seed_tracks`.
///
/// Every window's tracks come from one recommendations call; artists are a
/// random sample of the distinct artists on those tracks.
pub fn collect_simulated_data<C: CatalogClient + ?Sized, R: Rng + ?Sized>(
    client: &C,
    credential: &Credential,
    seed_tracks: &[String],
    limit: usize,
    rng: &mut R,
) -> Result<ParticipantData> {
    if seed_tracks.is_empty() {
        return Err(BlendError::Validation("simulation needs at least one seed track".to_string()));
    }

    let mut data = ParticipantData::default();

    for window in TimeWindow::ALL {
        let tracks = client.fetch_recommendations(credential, seed_tracks, limit)?;

        let mut seen = HashSet::new();
        let artists: Vec<RawItem> = tracks
            .iter()
            .flat_map(|track| track.artists.iter().flatten())
            .filter(|artist| seen.insert(artist.uri.clone()))
            .map(|artist: &RawArtistRef| RawItem {
                uri: artist.uri.clone(),
                name: artist.name.clone(),
                artists: None,
                genres: None,
            })
            .collect();
        let sampled: Vec<RawItem> = artists
            .choose_multiple(rng, SIMULATED_ARTIST_COUNT)
            .cloned()
            .collect();

        data.tracks.set(window, normalize::normalize_items(&tracks, Category::Tracks));
        data.artists.set(window, normalize::normalize_items(&sampled, Category::Artists));
    }
    data.genres = normalize::extract_genres(&data.artists);

    Ok(data)
}

/// Per-user top items, keyed by category then window.
pub type TopItems = BTreeMap<Category, BTreeMap<TimeWindow, Vec<RawItem>>>;

/// A playlist hosted by the fixture catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixturePlaylist {
    pub owner: String,
    pub name: String,
    pub description: String,
    pub public: bool,
    pub tracks: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureState {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub top_items: BTreeMap<String, TopItems>,
    #[serde(default)]
    pub recommendations: Vec<RawItem>,
    #[serde(default)]
    pub playlists: BTreeMap<String, FixturePlaylist>,
}

/// Offline catalog backed by a JSON document.
///
/// When opened from a file, the file is the source of truth: reads reload
/// it and playlist mutations are written back before the lock is dropped.
#[derive(Debug, Default)]
pub struct FixtureCatalog {
    state: Mutex<FixtureState>,
    path: Option<PathBuf>,
    failing: Mutex<HashSet<&'static str>>,
}

impl FixtureCatalog {
    #[must_use]
    pub fn new(state: FixtureState) -> Self {
        Self {
            state: Mutex::new(state),
            path: None,
            failing: Mutex::new(HashSet::new()),
        }
    }

    /// Load a fixture file; a missing file starts an empty catalog at that path.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let state = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read catalog fixture {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid catalog fixture {}", path.display()))?
        } else {
            info!("No catalog fixture at {}, starting empty", path.display());
            FixtureState::default()
        };

        Ok(Self {
            state: Mutex::new(state),
            path: Some(path.to_path_buf()),
            failing: Mutex::new(HashSet::new()),
        })
    }

    /// Make every subsequent call of `operation` fail.
    pub fn fail_operation(&self, operation: &'static str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation);
        }
    }

    pub fn user(&self, user_id: &str) -> Option<User> {
        self.lookup("user", |state| state.users.iter().find(|user| user.id == user_id).cloned())
    }

    pub fn playlist(&self, playlist_id: &str) -> Option<FixturePlaylist> {
        self.lookup("playlist", |state| state.playlists.get(playlist_id).cloned())
    }

    fn lookup<T>(&self, operation: &'static str, f: impl FnOnce(&FixtureState) -> Option<T>) -> Option<T> {
        match self.sync(operation, false, |state| Ok(f(state))) {
            Ok(found) => found,
            Err(e) => {
                warn!("Catalog lookup failed: {e}");
                None
            }
        }
    }

    fn check(&self, operation: &'static str) -> Result<()> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| BlendError::upstream(operation, "fixture lock poisoned"))?;
        if failing.contains(operation) {
            return Err(BlendError::upstream(operation, "injected failure"));
        }
        Ok(())
    }

    fn with_state<T>(&self, operation: &'static str, f: impl FnOnce(&FixtureState) -> Result<T>) -> Result<T> {
        self.check(operation)?;
        self.sync(operation, false, |state| f(state))
    }

    fn update_state<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut FixtureState) -> Result<T>,
    ) -> Result<T> {
        self.check(operation)?;
        self.sync(operation, true, f)
    }

    /// Run `f` on the current state, reloading it from the backing file and
    /// writing it back when `write` is set.
    fn sync<T>(
        &self,
        operation: &'static str,
        write: bool,
        f: impl FnOnce(&mut FixtureState) -> Result<T>,
    ) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BlendError::upstream(operation, "fixture lock poisoned"))?;
        let Some(path) = &self.path else {
            return f(&mut state);
        };
        if !write && !path.exists() {
            *state = FixtureState::default();
            return f(&mut state);
        }

        let mut file = lock_file(path, operation)?;
        *state = read_locked(&mut file, operation)?;
        let value = f(&mut state)?;
        if write {
            write_locked(&mut file, &state, operation)?;
            trace!("Persisted catalog fixture to {}", path.display());
        }
        Ok(value)
    }

    fn owner_of(state: &FixtureState, credential: &Credential, operation: &'static str) -> Result<String> {
        state
            .users
            .iter()
            .find(|user| user.refresh_token.as_deref() == Some(credential.0.as_str()))
            .map(|user| user.id.clone())
            .ok_or_else(|| BlendError::upstream(operation, "unknown or expired credential"))
    }

    fn hosted<'a>(
        state: &'a mut FixtureState,
        credential: &Credential,
        playlist_id: &str,
        operation: &'static str,
    ) -> Result<&'a mut FixturePlaylist> {
        let owner = Self::owner_of(state, credential, operation)?;
        match state.playlists.get_mut(playlist_id) {
            Some(playlist) if playlist.owner == owner => Ok(playlist),
            Some(_) => Err(BlendError::upstream(operation, "playlist belongs to another user")),
            None => Err(BlendError::upstream(operation, format!("no playlist {playlist_id}"))),
        }
    }
}

impl CatalogClient for FixtureCatalog {
    fn fetch_top_items(
        &self,
        credential: &Credential,
        category: Category,
        window: TimeWindow,
        limit: usize,
    ) -> Result<Vec<RawItem>> {
        const OP: &str = "fetch_top_items";
        if category == Category::Genres {
            return Err(BlendError::upstream(OP, "the catalog has no top genres"));
        }
        self.with_state(OP, |state| {
            let owner = Self::owner_of(state, credential, OP)?;
            Ok(state
                .top_items
                .get(&owner)
                .and_then(|items| items.get(&category))
                .and_then(|windows| windows.get(&window))
                .map(|items| items.iter().take(limit).cloned().collect())
                .unwrap_or_default())
        })
    }

    fn fetch_recommendations(
        &self,
        credential: &Credential,
        seed_track_ids: &[String],
        limit: usize,
    ) -> Result<Vec<RawItem>> {
        const OP: &str = "fetch_recommendations";
        self.with_state(OP, |state| {
            Self::owner_of(state, credential, OP)?;
            Ok(state
                .recommendations
                .iter()
                .filter(|item| !seed_track_ids.contains(&item.uri))
                .take(limit)
                .cloned()
                .collect())
        })
    }

    fn create_playlist(
        &self,
        credential: &Credential,
        owner_id: &str,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<String> {
        const OP: &str = "create_playlist";
        self.update_state(OP, |state| {
            let owner = Self::owner_of(state, credential, OP)?;
            if owner != owner_id {
                return Err(BlendError::upstream(OP, "credential does not belong to owner"));
            }
            let id = loop {
                let id = format!("fixture:playlist:{}", new_playlist_id(&mut rand::thread_rng()));
                if !state.playlists.contains_key(&id) {
                    break id;
                }
            };
            state.playlists.insert(
                id.clone(),
                FixturePlaylist {
                    owner,
                    name: name.to_string(),
                    description: description.to_string(),
                    public,
                    tracks: Vec::new(),
                },
            );
            Ok(id)
        })
    }

    fn add_tracks(&self, credential: &Credential, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        const OP: &str = "add_tracks";
        self.update_state(OP, |state| {
            Self::hosted(state, credential, playlist_id, OP)?
                .tracks
                .extend(track_ids.iter().cloned());
            Ok(())
        })
    }

    fn remove_tracks(&self, credential: &Credential, playlist_id: &str, track_ids: &[String]) -> Result<()> {
        const OP: &str = "remove_tracks";
        self.update_state(OP, |state| {
            Self::hosted(state, credential, playlist_id, OP)?
                .tracks
                .retain(|track| !track_ids.contains(track));
            Ok(())
        })
    }

    fn get_playlist_tracks(&self, credential: &Credential, playlist_id: &str) -> Result<Vec<String>> {
        const OP: &str = "get_playlist_tracks";
        self.with_state(OP, |state| {
            let owner = Self::owner_of(state, credential, OP)?;
            match state.playlists.get(playlist_id) {
                Some(playlist) if playlist.owner == owner => Ok(playlist.tracks.clone()),
                Some(_) => Err(BlendError::upstream(OP, "playlist belongs to another user")),
                None => Err(BlendError::upstream(OP, format!("no playlist {playlist_id}"))),
            }
        })
    }
}

/// Open the fixture file and take an exclusive advisory lock on it.
///
/// The lock is released when the returned file is closed.
fn lock_file(path: &Path, operation: &'static str) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BlendError::upstream(operation, e))?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| BlendError::upstream(operation, e))?;

    // SAFETY: `file` owns the descriptor for the duration of the call.
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } != 0 {
        return Err(BlendError::upstream(operation, std::io::Error::last_os_error()));
    }
    Ok(file)
}

fn read_locked(file: &mut File, operation: &'static str) -> Result<FixtureState> {
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| BlendError::upstream(operation, e))?;
    if contents.trim().is_empty() {
        return Ok(FixtureState::default());
    }
    Ok(serde_json::from_str(&contents)?)
}

fn write_locked(file: &mut File, state: &FixtureState, operation: &'static str) -> Result<()> {
    let contents = serde_json::to_string_pretty(state)?;
    let rewrite = |file: &mut File| -> std::io::Result<()> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(contents.as_bytes())?;
        file.sync_data()
    };
    rewrite(file).map_err(|e| BlendError::upstream(operation, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn raw(uri: &str, artists: &[&str], genres: &[&str]) -> RawItem {
        RawItem {
            uri: uri.to_string(),
            name: uri.to_uppercase(),
            artists: (!artists.is_empty()).then(|| {
                artists
                    .iter()
                    .map(|a| RawArtistRef {
                        uri: a.to_string(),
                        name: a.to_uppercase(),
                    })
                    .collect()
            }),
            genres: (!genres.is_empty()).then(|| genres.iter().map(|g| g.to_string()).collect()),
        }
    }

    fn fixture() -> FixtureCatalog {
        FixtureCatalog::new(fixture_state())
    }

    fn fixture_state() -> FixtureState {
        let mut windows = BTreeMap::new();
        windows.insert(TimeWindow::ShortTerm, vec![raw("t1", &["a1"], &[]), raw("t2", &["a2"], &[])]);
        let mut artist_windows = BTreeMap::new();
        artist_windows.insert(
            TimeWindow::LongTerm,
            vec![raw("a1", &[], &["Post Rock", "Ambient"]), raw("a2", &[], &["ambient"])],
        );
        let mut items: TopItems = BTreeMap::new();
        items.insert(Category::Tracks, windows);
        items.insert(Category::Artists, artist_windows);

        let mut top_items = BTreeMap::new();
        top_items.insert("ada".to_string(), items);

        FixtureState {
            users: vec![User {
                id: "ada".to_string(),
                email: "ada@example.com".to_string(),
                name: "Ada".to_string(),
                refresh_token: Some("tok".to_string()),
                bot: false,
            }],
            top_items,
            recommendations: (0..60)
                .map(|i| raw(&format!("r{i}"), &[format!("ra{}", i % 7).as_str()], &[]))
                .collect(),
            playlists: BTreeMap::new(),
        }
    }

    fn credential() -> Credential {
        Credential("tok".to_string())
    }

    #[test]
    fn test_collect_participant_data() {
        let data = collect_participant_data(&fixture(), &credential(), 49).unwrap();

        assert_eq!(data.tracks.short_term.len(), 2);
        assert_eq!(data.tracks.short_term[1].artist_ids, vec!["a2"]);
        assert!(data.tracks.medium_term.is_empty());
        let genres: Vec<&str> = data.genres.long_term.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(genres, vec!["post-rock", "ambient"]);
    }

    #[test]
    fn test_top_items_respect_limit() {
        let items = fixture()
            .fetch_top_items(&credential(), Category::Tracks, TimeWindow::ShortTerm, 1)
            .unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_unknown_credential_is_upstream_error() {
        let result = fixture().fetch_top_items(
            &Credential("expired".to_string()),
            Category::Tracks,
            TimeWindow::ShortTerm,
            10,
        );
        assert!(matches!(result, Err(BlendError::UpstreamFetch { .. })));
    }

    #[test]
    fn test_simulated_data() {
        let mut rng = StdRng::seed_from_u64(3);
        let data = collect_simulated_data(&fixture(), &credential(), &["r0".to_string()], 50, &mut rng).unwrap();

        assert_eq!(data.tracks.short_term.len(), 50);
        assert!(data.tracks.short_term.iter().all(|t| t.id != "r0"));
        // Only seven distinct artists exist among the recommendations.
        assert_eq!(data.artists.long_term.len(), 7);

        let no_seed = collect_simulated_data(&fixture(), &credential(), &[], 50, &mut rng);
        assert!(matches!(no_seed, Err(BlendError::Validation(_))));
    }

    #[test]
    fn test_playlist_mutations() {
        let catalog = fixture();
        let id = catalog
            .create_playlist(&credential(), "ada", "Mix", "desc", false)
            .unwrap();

        let tracks = vec!["t1".to_string(), "t2".to_string(), "t3".to_string()];
        catalog.add_tracks(&credential(), &id, &tracks).unwrap();
        catalog
            .remove_tracks(&credential(), &id, &["t2".to_string()])
            .unwrap();

        assert_eq!(catalog.get_playlist_tracks(&credential(), &id).unwrap(), vec!["t1", "t3"]);
        assert!(!catalog.playlist(&id).unwrap().public);
    }

    #[test]
    fn test_injected_failure() {
        let catalog = fixture();
        catalog.fail_operation("add_tracks");
        let id = catalog
            .create_playlist(&credential(), "ada", "Mix", "desc", false)
            .unwrap();

        let result = catalog.add_tracks(&credential(), &id, &["t1".to_string()]);
        assert!(matches!(result, Err(BlendError::UpstreamFetch { operation: "add_tracks", .. })));
    }

    #[test]
    fn test_file_catalogs_share_playlists() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("catalog.json");
        fs::write(&path, serde_json::to_string(&fixture_state()).unwrap()).unwrap();

        // A long-lived reader opened before the other process writes anything.
        let daemon = FixtureCatalog::open(&path).unwrap();
        let cli = FixtureCatalog::open(&path).unwrap();

        let mix = cli.create_playlist(&credential(), "ada", "Mix", "desc", false).unwrap();
        cli.add_tracks(&credential(), &mix, &["t1".to_string()]).unwrap();
        assert_eq!(daemon.get_playlist_tracks(&credential(), &mix).unwrap(), vec!["t1"]);

        let other = daemon.create_playlist(&credential(), "ada", "Other", "desc", false).unwrap();
        assert_ne!(mix, other);
        daemon.add_tracks(&credential(), &mix, &["t2".to_string()]).unwrap();

        let reopened = FixtureCatalog::open(&path).unwrap();
        assert_eq!(reopened.playlist(&mix).unwrap().name, "Mix");
        assert_eq!(reopened.playlist(&mix).unwrap().tracks, vec!["t1", "t2"]);
        assert_eq!(reopened.playlist(&other).unwrap().name, "Other");
        assert_eq!(cli.playlist(&other).unwrap().name, "Other");
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("catalog.json");

        let catalog = FixtureCatalog::open(&path).unwrap();
        assert!(catalog.user("ada").is_none());
        assert!(!path.exists());
    }
}
