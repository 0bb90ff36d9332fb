//! # Playlist Service
//!
//! Drives a shared playlist through its lifecycle:
//!
//! ```text
//! create ─▶ waiting ──release──▶ released ──refresh──▶ released ─▶ …
//!              ▲
//!            join
//! ```
//!
//! The service owns the [`PlaylistStore`] and the injected [`CatalogClient`].
//! Only one release or refresh may run per playlist at a time, across every
//! process sharing the database: each takes the store's generation lease
//! first, and a second attempt is rejected with [`BlendError::Busy`]
//! instead of queueing.

use crate::catalog::{self, CatalogClient};
use crate::config::AppConfig;
use crate::db::{PlaylistStore, Versioned};
use crate::error::{BlendError, Result};
use crate::model::{
    Credential, ExclusionSet, ParticipantData, Participation, Playlist, PlaylistStatus, RefreshCadence, User,
};
use crate::tracklist;
use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;
use rayon::prelude::*;

/// Attempts at a conditional write before giving up with [`BlendError::Conflict`].
const MAX_WRITE_ATTEMPTS: usize = 5;

/// Parameters for a new playlist. The creator becomes its first participant.
#[derive(Debug, Clone)]
pub struct NewPlaylist {
    pub creator: Participation,
    pub title: Option<String>,
    pub description: Option<String>,
    /// Tracks sampled per participant; the configured default when `None`.
    pub size: Option<usize>,
    pub invitations: Vec<String>,
    pub recommendations_enabled: bool,
    pub refresh_every: Option<RefreshCadence>,
}

pub struct PlaylistService<C: CatalogClient> {
    store: PlaylistStore,
    client: C,
    config: AppConfig,
}

/// Holds a playlist's generation lease until dropped.
struct InFlight<'a> {
    store: &'a PlaylistStore,
    id: String,
    owner: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.release_lease(&self.id, &self.owner) {
            warn!("Failed to release lease on playlist {}: {e}", self.id);
        }
    }
}

impl<C: CatalogClient> PlaylistService<C> {
    pub fn new(store: PlaylistStore, client: C, config: AppConfig) -> Self {
        Self {
            store,
            client,
            config,
        }
    }

    pub fn store(&self) -> &PlaylistStore {
        &self.store
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Fetch and normalize a user's listening data from the catalog.
    pub fn collect(&self, user: &User) -> Result<ParticipantData> {
        let credential = require_credential(user)?;
        catalog::collect_participant_data(&self.client, &credential, self.config.selection.top_items_limit)
    }

    /// Fabricate listening data from recommendations seeded by `seed_tracks`.
    pub fn collect_simulated(&self, user: &User, seed_tracks: &[String]) -> Result<ParticipantData> {
        let credential = require_credential(user)?;
        catalog::collect_simulated_data(
            &self.client,
            &credential,
            seed_tracks,
            self.config.selection.recommendation_pool,
            &mut rand::thread_rng(),
        )
    }

    /// Build a participation for `user`, collecting their data now.
    pub fn participation(&self, user: User, exclude_data: Option<ExclusionSet>) -> Result<Participation> {
        let data = self.collect(&user)?;
        Ok(Participation {
            user,
            data,
            exclude_data: exclude_data.filter(|exclusions| !exclusions.is_empty()),
            submitted_at: Utc::now(),
        })
    }

    pub fn create(&self, request: NewPlaylist) -> Result<Playlist> {
        let size = request.size.unwrap_or(self.config.selection.tracks_per_participant);
        if size == 0 {
            return Err(BlendError::Validation("playlist size must be at least 1".to_string()));
        }
        if let Some(email) = request.invitations.iter().find(|email| !email.contains('@')) {
            return Err(BlendError::Validation(format!("`{email}` is not an email address")));
        }

        let playlist = Playlist {
            id: new_playlist_id(&mut rand::thread_rng()),
            title: request.title.filter(|title| !title.trim().is_empty()),
            description: request.description.filter(|description| !description.trim().is_empty()),
            size,
            participations: vec![request.creator],
            invitations: request.invitations,
            recommendations_enabled: request.recommendations_enabled,
            status: PlaylistStatus::Waiting,
            refresh_every: request.refresh_every,
            released_at: None,
            refreshed_at: None,
            external_playlist_id: None,
            created_at: Utc::now(),
        };

        self.store.insert(&playlist)?;
        info!("Created playlist {} ({} invitations)", playlist.id, playlist.invitations.len());
        Ok(playlist)
    }

    /// Add a participation to a waiting playlist.
    pub fn participate(&self, playlist_id: &str, participation: Participation) -> Result<Playlist> {
        let user_id = participation.user.id.clone();

        self.write(playlist_id, |playlist| {
            expect_status(playlist, PlaylistStatus::Waiting)?;
            if playlist.has_participant(&user_id) {
                return Err(BlendError::Validation(format!(
                    "user `{user_id}` already takes part in playlist `{playlist_id}`"
                )));
            }
            playlist.participations.push(participation.clone());
            Ok(())
        })
        .map(|playlist| {
            info!("User {user_id} joined playlist {playlist_id}");
            playlist
        })
    }

    pub fn get(&self, playlist_id: &str) -> Result<Playlist> {
        Ok(self.store.require(playlist_id)?.playlist)
    }

    /// Playlists the user takes part in, plus those their email was invited to.
    pub fn list(&self, user_id: &str, email: Option<&str>) -> Result<Vec<Playlist>> {
        self.store.list_for_user(user_id, email)
    }

    /// Publish a waiting playlist to the catalog under the host's account.
    pub fn release(&self, playlist_id: &str) -> Result<Playlist> {
        let _guard = self.begin(playlist_id)?;
        let Versioned { playlist, version } = self.store.require(playlist_id)?;
        expect_status(&playlist, PlaylistStatus::Waiting)?;

        let (host_id, credential) = host_of(&playlist)?;
        info!(
            "Releasing playlist {playlist_id} for {} participants, hosted by {host_id}",
            playlist.participations.len()
        );

        let title = playlist.title.clone().unwrap_or_else(|| playlist.default_title());
        let description = playlist
            .description
            .clone()
            .unwrap_or_else(|| self.config.default_description.clone());
        let external_id = self
            .client
            .create_playlist(&credential, &host_id, &title, &description, false)?;

        let tracks = tracklist::build_tracklist(
            &self.client,
            &credential,
            &playlist.participations,
            playlist.size,
            playlist.recommendations_enabled,
            &self.config.selection,
            &mut rand::thread_rng(),
        )?;
        self.client.add_tracks(&credential, &external_id, &tracks)?;

        let released_at = Utc::now();
        let released = self.write_from(playlist_id, playlist, version, |playlist| {
            expect_status(playlist, PlaylistStatus::Waiting)?;
            playlist.status = PlaylistStatus::Released;
            playlist.external_playlist_id = Some(external_id.clone());
            playlist.released_at = Some(released_at);
            Ok(())
        })?;

        info!("Released playlist {playlist_id} as {external_id} with {} tracks", tracks.len());
        Ok(released)
    }

    /// Re-collect every participant and replace the published tracks.
    ///
    /// Participants without a credential (bots) keep their stored data.
    pub fn refresh(&self, playlist_id: &str) -> Result<Playlist> {
        let _guard = self.begin(playlist_id)?;
        let Versioned { playlist, version } = self.store.require(playlist_id)?;
        expect_status(&playlist, PlaylistStatus::Released)?;

        let external_id = playlist.external_playlist_id.clone().ok_or_else(|| BlendError::InvalidState {
            id: playlist_id.to_string(),
            expected: "published",
            actual: "missing external playlist".to_string(),
        })?;
        let (host_id, credential) = host_of(&playlist)?;
        info!("Refreshing playlist {playlist_id} hosted by {host_id}");

        let limit = self.config.selection.top_items_limit;
        let participations = playlist
            .participations
            .par_iter()
            .map(|participation| -> Result<Participation> {
                let Some(own) = participation.user.credential() else {
                    debug!("Keeping stored data for {}", participation.user.id);
                    return Ok(participation.clone());
                };
                Ok(Participation {
                    data: catalog::collect_participant_data(&self.client, &own, limit)?,
                    ..participation.clone()
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let current = self.client.get_playlist_tracks(&credential, &external_id)?;
        if !current.is_empty() {
            self.client.remove_tracks(&credential, &external_id, &current)?;
        }

        let tracks = tracklist::build_tracklist(
            &self.client,
            &credential,
            &participations,
            playlist.size,
            playlist.recommendations_enabled,
            &self.config.selection,
            &mut rand::thread_rng(),
        )?;
        self.client.add_tracks(&credential, &external_id, &tracks)?;

        let refreshed_at = Utc::now();
        let refreshed = self.write_from(playlist_id, playlist, version, |playlist| {
            expect_status(playlist, PlaylistStatus::Released)?;
            for stored in &mut playlist.participations {
                if let Some(fresh) = participations.iter().find(|p| p.user.id == stored.user.id) {
                    stored.data = fresh.data.clone();
                }
            }
            playlist.refreshed_at = Some(refreshed_at);
            Ok(())
        })?;

        info!(
            "Refreshed playlist {playlist_id}: removed {}, added {} tracks",
            current.len(),
            tracks.len()
        );
        Ok(refreshed)
    }

    /// Every playlist id in the store, for completions.
    pub fn playlist_ids(&self) -> Result<Vec<String>> {
        self.store.ids()
    }

    fn begin(&self, playlist_id: &str) -> Result<InFlight<'_>> {
        let owner = format!("{}:{}", std::process::id(), new_playlist_id(&mut rand::thread_rng()));
        self.store.acquire_lease(playlist_id, &owner)?;
        Ok(InFlight {
            store: &self.store,
            id: playlist_id.to_string(),
            owner,
        })
    }

    /// Read-modify-write with retries on concurrent modification.
    fn write(&self, playlist_id: &str, apply: impl Fn(&mut Playlist) -> Result<()>) -> Result<Playlist> {
        let Versioned { playlist, version } = self.store.require(playlist_id)?;
        self.write_from(playlist_id, playlist, version, apply)
    }

    /// Like [`write`](Self::write), starting from an already loaded record.
    fn write_from(
        &self,
        playlist_id: &str,
        mut playlist: Playlist,
        mut version: i64,
        apply: impl Fn(&mut Playlist) -> Result<()>,
    ) -> Result<Playlist> {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            apply(&mut playlist)?;
            match self.store.update(&playlist, version) {
                Ok(_) => return Ok(playlist),
                Err(BlendError::Conflict(_)) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!("Playlist {playlist_id} changed underneath us, retrying ({attempt}/{MAX_WRITE_ATTEMPTS})");
                    Versioned { playlist, version } = self.store.require(playlist_id)?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(BlendError::Conflict(playlist_id.to_string()))
    }
}

fn require_credential(user: &User) -> Result<Credential> {
    user.credential()
        .ok_or_else(|| BlendError::Validation(format!("user `{}` has no catalog credential", user.id)))
}

fn host_of(playlist: &Playlist) -> Result<(String, Credential)> {
    playlist
        .host()
        .and_then(|host| Some((host.user.id.clone(), host.user.credential()?)))
        .ok_or_else(|| BlendError::NoHost(playlist.id.clone()))
}

fn expect_status(playlist: &Playlist, expected: PlaylistStatus) -> Result<()> {
    if playlist.status == expected {
        return Ok(());
    }
    Err(BlendError::InvalidState {
        id: playlist.id.clone(),
        expected: match expected {
            PlaylistStatus::Waiting => "waiting",
            PlaylistStatus::Released => "released",
        },
        actual: playlist.status.to_string(),
    })
}

/// 24 lowercase hex characters.
pub(crate) fn new_playlist_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..12).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}
