//! # Item Normalization
//!
//! Turns raw catalog responses into [`CatalogItem`] rankings and derives the
//! per-window genre rankings from a participant's artists.

use crate::model::{CatalogItem, Category, TimeWindowedData};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Artist reference embedded in a raw track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArtistRef {
    pub uri: String,
    pub name: String,
}

/// One entry of a catalog "top items" or recommendations response, in
/// preference order as returned by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawItem {
    pub uri: String,
    pub name: String,
    /// Present on tracks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artists: Option<Vec<RawArtistRef>>,
    /// Present on artists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
}

/// Normalize one window of raw items. `index` is the position in `raw`.
///
/// Track attributes are only surfaced for [`Category::Tracks`] and genre
/// attributes only for [`Category::Artists`]; items missing them simply
/// leave the attribute empty.
#[must_use]
pub fn normalize_items(raw: &[RawItem], category: Category) -> Vec<CatalogItem> {
    raw.iter()
        .enumerate()
        .map(|(index, item)| {
            let mut normalized = CatalogItem::new(item.uri.clone(), index as u32, item.name.clone());

            if category == Category::Tracks {
                if let Some(artists) = &item.artists {
                    normalized.artist_names = Some(
                        artists
                            .iter()
                            .map(|artist| artist.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    );
                    normalized.artist_ids = artists.iter().map(|artist| artist.uri.clone()).collect();
                }
            }

            if category == Category::Artists {
                if let Some(genres) = &item.genres {
                    normalized.genre_ids = genres.iter().map(|genre| slugify(genre)).collect();
                }
            }

            normalized
        })
        .collect()
}

/// Build genre rankings from the artist rankings of each window.
///
/// Genres appear in order of first appearance among the window's artists,
/// deduplicated by slug, and get a dense index in that order. Genres carry
/// no preference order of their own, so the index is only a stable
/// tie-break that the rank weighting treats like any other position.
#[must_use]
pub fn extract_genres(artists: &TimeWindowedData) -> TimeWindowedData {
    let mut genres = TimeWindowedData::default();

    for (window, items) in artists.iter() {
        let mut seen = HashSet::new();
        let mut extracted = Vec::new();

        for artist in items {
            for genre_id in &artist.genre_ids {
                if genre_id.is_empty() || !seen.insert(genre_id.clone()) {
                    continue;
                }
                let index = extracted.len() as u32;
                extracted.push(CatalogItem::new(genre_id.clone(), index, genre_display_name(genre_id)));
            }
        }

        log::trace!("Extracted {} genres for {window}", extracted.len());
        genres.set(window, extracted);
    }

    genres
}

/// Lowercased alphanumeric words joined by `-`.
#[must_use]
pub fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

fn genre_display_name(slug: &str) -> String {
    slug.replace('-', " ")
}
