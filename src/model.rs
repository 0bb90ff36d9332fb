//! # Data Model
//!
//! Plain, serialisable records shared by every layer of blend: what a
//! participant submitted, how a playlist is stored, and what the catalog
//! items look like once normalized.
//!
//! Field names follow the stored document format (`short_term`,
//! `excludeData`, `submittedAt`, ...) so that records written by older
//! deployments deserialize unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Kind of catalog entity a ranking is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Artists,
    Tracks,
    Genres,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Artists, Category::Tracks, Category::Genres];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Artists => "artists",
            Category::Tracks => "tracks",
            Category::Genres => "genres",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Historical lookback period of a ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeWindow {
    ShortTerm,
    MediumTerm,
    LongTerm,
}

impl TimeWindow {
    pub const ALL: [TimeWindow; 3] = [TimeWindow::ShortTerm, TimeWindow::MediumTerm, TimeWindow::LongTerm];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TimeWindow::ShortTerm => "short_term",
            TimeWindow::MediumTerm => "medium_term",
            TimeWindow::LongTerm => "long_term",
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One track, artist or genre observed for a user in one time window.
///
/// `index` is the 0-based position in the source ranking (0 = most preferred).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: String,
    pub index: u32,
    pub name: String,
    /// Joined display string of the contributing artists (tracks only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_names: Option<String>,
    /// Ordered artist identifiers (tracks only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artist_ids: Vec<String>,
    /// Genre identifiers associated with the artist (artists only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genre_ids: Vec<String>,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>, index: u32, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            index,
            name: name.into(),
            artist_names: None,
            artist_ids: Vec::new(),
            genre_ids: Vec::new(),
        }
    }
}

/// The three time-windowed rankings of one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindowedData {
    #[serde(default)]
    pub short_term: Vec<CatalogItem>,
    #[serde(default)]
    pub medium_term: Vec<CatalogItem>,
    #[serde(default)]
    pub long_term: Vec<CatalogItem>,
}

impl TimeWindowedData {
    #[must_use]
    pub fn get(&self, window: TimeWindow) -> &[CatalogItem] {
        match window {
            TimeWindow::ShortTerm => &self.short_term,
            TimeWindow::MediumTerm => &self.medium_term,
            TimeWindow::LongTerm => &self.long_term,
        }
    }

    pub fn set(&mut self, window: TimeWindow, items: Vec<CatalogItem>) {
        match window {
            TimeWindow::ShortTerm => self.short_term = items,
            TimeWindow::MediumTerm => self.medium_term = items,
            TimeWindow::LongTerm => self.long_term = items,
        }
    }

    /// Windows in a fixed order, paired with their items.
    pub fn iter(&self) -> impl Iterator<Item = (TimeWindow, &[CatalogItem])> + '_ {
        TimeWindow::ALL.into_iter().map(move |window| (window, self.get(window)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().all(|(_, items)| items.is_empty())
    }
}

/// Everything one participant submitted, per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantData {
    #[serde(default)]
    pub artists: TimeWindowedData,
    #[serde(default)]
    pub tracks: TimeWindowedData,
    #[serde(default)]
    pub genres: TimeWindowedData,
}

impl ParticipantData {
    #[must_use]
    pub fn get(&self, category: Category) -> &TimeWindowedData {
        match category {
            Category::Artists => &self.artists,
            Category::Tracks => &self.tracks,
            Category::Genres => &self.genres,
        }
    }
}

/// Ids a participant opted out of, per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet {
    #[serde(default)]
    pub artists: HashSet<String>,
    #[serde(default)]
    pub tracks: HashSet<String>,
    #[serde(default)]
    pub genres: HashSet<String>,
}

impl ExclusionSet {
    #[must_use]
    pub fn get(&self, category: Category) -> &HashSet<String> {
        match category {
            Category::Artists => &self.artists,
            Category::Tracks => &self.tracks,
            Category::Genres => &self.genres,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artists.is_empty() && self.tracks.is_empty() && self.genres.is_empty()
    }
}

/// A participant's identity. `refresh_token` is the catalog credential;
/// bots carry none and never host a playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

impl User {
    #[must_use]
    pub fn credential(&self) -> Option<Credential> {
        match (&self.refresh_token, self.bot) {
            (Some(token), false) if !token.is_empty() => Some(Credential(token.clone())),
            _ => None,
        }
    }
}

/// Opaque credential handed to the catalog client.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(pub String);

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participation {
    pub user: User,
    pub data: ParticipantData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_data: Option<ExclusionSet>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaylistStatus {
    Waiting,
    Released,
}

impl fmt::Display for PlaylistStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaylistStatus::Waiting => f.write_str("waiting"),
            PlaylistStatus::Released => f.write_str("released"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RefreshCadence {
    Week,
    Month,
}

impl RefreshCadence {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            RefreshCadence::Week => "week",
            RefreshCadence::Month => "month",
        }
    }
}

/// A shared playlist and everything submitted to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tracks sampled per participant.
    pub size: usize,
    pub participations: Vec<Participation>,
    #[serde(default)]
    pub invitations: Vec<String>,
    pub recommendations_enabled: bool,
    pub status: PlaylistStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_every: Option<RefreshCadence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_playlist_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Playlist {
    /// First participant holding a usable credential.
    #[must_use]
    pub fn host(&self) -> Option<&Participation> {
        self.participations.iter().find(|p| p.user.credential().is_some())
    }

    /// Participant names joined with " x ".
    #[must_use]
    pub fn default_title(&self) -> String {
        self.participations
            .iter()
            .map(|p| p.user.name.as_str())
            .collect::<Vec<_>>()
            .join(" x ")
    }

    #[must_use]
    pub fn has_participant(&self, user_id: &str) -> bool {
        self.participations.iter().any(|p| p.user.id == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, token: Option<&str>) -> User {
        User {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            name: id.to_uppercase(),
            refresh_token: token.map(str::to_string),
            bot: false,
        }
    }

    fn participation(user: User) -> Participation {
        Participation {
            user,
            data: ParticipantData::default(),
            exclude_data: None,
            submitted_at: Utc::now(),
        }
    }

    fn playlist(participations: Vec<Participation>) -> Playlist {
        Playlist {
            id: "p1".to_string(),
            title: None,
            description: None,
            size: 20,
            participations,
            invitations: Vec::new(),
            recommendations_enabled: false,
            status: PlaylistStatus::Waiting,
            refresh_every: None,
            released_at: None,
            refreshed_at: None,
            external_playlist_id: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_host_skips_users_without_credentials() {
        let mut bot = user("bot", Some("token"));
        bot.bot = true;
        let list = playlist(vec![
            participation(user("anon", None)),
            participation(bot),
            participation(user("alice", Some("secret"))),
        ]);

        assert_eq!(list.host().map(|p| p.user.id.as_str()), Some("alice"));
    }

    #[test]
    fn test_default_title_joins_names() {
        let list = playlist(vec![
            participation(user("a", None)),
            participation(user("b", None)),
        ]);
        assert_eq!(list.default_title(), "A x B");
    }

    #[test]
    fn test_document_field_names() {
        let mut data = TimeWindowedData::default();
        data.set(TimeWindow::MediumTerm, vec![CatalogItem::new("x", 0, "X")]);
        let json = serde_json::to_value(&data).unwrap();

        assert!(json.get("medium_term").is_some());
        assert_eq!(json["medium_term"][0]["id"], "x");

        let exclusion: ExclusionSet = serde_json::from_str(r#"{"tracks":["t1"]}"#).unwrap();
        assert!(exclusion.tracks.contains("t1"));
        assert!(exclusion.artists.is_empty());
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = Credential("very-secret".to_string());
        assert!(!format!("{credential:?}").contains("very-secret"));
    }
}
