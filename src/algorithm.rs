//! Ranking and selection algorithms for shared playlists.
//!
//! Merges every participant's windowed rankings into one pool per category
//! and draws a rank-weighted sample of tracks for each participant.

use crate::model::{CatalogItem, Category, ExclusionSet, Participation, TimeWindow};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One participant's contribution to a pooled item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Occurrence {
    /// Accumulated rank weight over every window this participant listed the item in.
    pub rank: u32,
    /// Windows that contributed, in the order they were merged.
    pub periods: Vec<TimeWindow>,
}

/// An item of the cross-participant pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedItem {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artist_names: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub artist_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub genre_ids: Vec<String>,
    /// Keyed by participant (user) id.
    pub occurrences: BTreeMap<String, Occurrence>,
    pub total_rank: u32,
}

impl RankedItem {
    fn from_item(item: &CatalogItem) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            artist_names: item.artist_names.clone(),
            artist_ids: item.artist_ids.clone(),
            genre_ids: item.genre_ids.clone(),
            occurrences: BTreeMap::new(),
            total_rank: 0,
        }
    }
}

/// Merged rankings of all participants, one deduplicated list per category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedPool {
    pub artists: Vec<RankedItem>,
    pub tracks: Vec<RankedItem>,
    pub genres: Vec<RankedItem>,
}

impl AggregatedPool {
    #[must_use]
    pub fn get(&self, category: Category) -> &[RankedItem] {
        match category {
            Category::Artists => &self.artists,
            Category::Tracks => &self.tracks,
            Category::Genres => &self.genres,
        }
    }
}

/// Tracks drawn for one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantSelection {
    pub user_id: String,
    pub track_ids: Vec<String>,
}

/// Reverse positional rank: first place weighs `window_len`, last place 1.
///
/// Never below 1, so an out-of-range index still leaves the item drawable.
#[must_use]
pub fn rank_weight(window_len: usize, index: u32) -> u32 {
    let window_len = u32::try_from(window_len).unwrap_or(u32::MAX);
    window_len.saturating_sub(index).max(1)
}

/// Whether `item` counts for a participant with the given exclusions.
///
/// An item is dropped when its own id is excluded for its category, when
/// any of its artists is excluded, or when any of its genres is excluded.
#[must_use]
pub fn is_included(item: &CatalogItem, category: Category, exclusions: Option<&ExclusionSet>) -> bool {
    let Some(exclusions) = exclusions else {
        return true;
    };

    let self_excluded = exclusions.get(category).contains(&item.id);
    let artist_excluded = item.artist_ids.iter().any(|id| exclusions.artists.contains(id));
    let genre_excluded = item.genre_ids.iter().any(|id| exclusions.genres.contains(id));

    !(self_excluded || artist_excluded || genre_excluded)
}

/// Merge one category across every window of every participant.
///
/// Weights of the same item are summed, both across windows of one
/// participant and across participants. Items excluded by everyone who
/// listed them do not appear. Output keeps first-seen order.
#[must_use]
pub fn rank_category(participations: &[Participation], category: Category) -> Vec<RankedItem> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut ranked: Vec<RankedItem> = Vec::new();

    for participation in participations {
        let user_id = &participation.user.id;
        let exclusions = participation.exclude_data.as_ref();

        for (window, items) in participation.data.get(category).iter() {
            let window_len = items.len();

            for item in items.iter().filter(|item| is_included(item, category, exclusions)) {
                let weight = rank_weight(window_len, item.index);
                let slot = *positions.entry(item.id.clone()).or_insert_with(|| {
                    ranked.push(RankedItem::from_item(item));
                    ranked.len() - 1
                });

                let entry = &mut ranked[slot];
                entry.total_rank += weight;

                let occurrence = entry.occurrences.entry(user_id.clone()).or_default();
                occurrence.rank += weight;
                if !occurrence.periods.contains(&window) {
                    occurrence.periods.push(window);
                }
            }
        }
    }

    log::debug!(
        "Ranked {} distinct {category} from {} participations",
        ranked.len(),
        participations.len()
    );
    ranked
}

/// Build the pool for every category.
#[must_use]
pub fn rank_participations(participations: &[Participation]) -> AggregatedPool {
    AggregatedPool {
        artists: rank_category(participations, Category::Artists),
        tracks: rank_category(participations, Category::Tracks),
        genres: rank_category(participations, Category::Genres),
    }
}

/// Rank-weighted sampling without replacement for one participant.
///
/// Only tracks the participant contributed to are eligible. Higher
/// `total_rank` means a larger slice of the cumulative distribution. Returns
/// `min(amount, eligible)` distinct ids; an empty eligible set yields an
/// empty list.
pub fn sample_for_participant<R: Rng + ?Sized>(
    tracks: &[RankedItem],
    participant_id: &str,
    amount: usize,
    rng: &mut R,
) -> Vec<String> {
    let mut eligible: Vec<&RankedItem> = tracks
        .iter()
        .filter(|track| track.occurrences.contains_key(participant_id))
        .collect();

    if eligible.is_empty() || amount == 0 {
        log::debug!("No eligible tracks for participant {participant_id}");
        return Vec::new();
    }

    eligible.sort_by(|a, b| a.total_rank.cmp(&b.total_rank).then_with(|| a.id.cmp(&b.id)));

    let cumulative: Vec<u64> = eligible
        .iter()
        .scan(0u64, |sum, track| {
            *sum += u64::from(track.total_rank);
            Some(*sum)
        })
        .collect();
    let max_cumulative = cumulative.last().copied().unwrap_or(0);

    let target = amount.min(eligible.len());
    let mut chosen = Vec::with_capacity(target);
    let mut seen = HashSet::with_capacity(target);

    while chosen.len() < target {
        let draw = rng.gen_range(0..=max_cumulative);
        let position = cumulative.partition_point(|&sum| sum < draw);
        let track = eligible[position.min(eligible.len() - 1)];

        if seen.insert(track.id.as_str()) {
            chosen.push(track.id.clone());
        }
    }

    log::debug!(
        "Sampled {}/{} tracks for participant {participant_id} from {} eligible",
        chosen.len(),
        amount,
        eligible.len()
    );
    chosen
}

/// Sample `amount` tracks for every participant, in participation order.
pub fn sample_weighted_tracks<R: Rng + ?Sized>(
    pool: &AggregatedPool,
    participations: &[Participation],
    amount: usize,
    rng: &mut R,
) -> Vec<ParticipantSelection> {
    participations
        .iter()
        .map(|participation| ParticipantSelection {
            user_id: participation.user.id.clone(),
            track_ids: sample_for_participant(&pool.tracks, &participation.user.id, amount, rng),
        })
        .collect()
}
