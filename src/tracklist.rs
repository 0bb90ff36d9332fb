//! Final tracklist assembly: weighted per-participant samples, optionally
//! widened with catalog recommendations, concatenated and shuffled.

use crate::algorithm::{self, ParticipantSelection};
use crate::catalog::CatalogClient;
use crate::config::SelectionConfig;
use crate::error::Result;
use crate::model::{Credential, Participation};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;

/// Draw up to `count` recommendations seeded by a sample of `selected`.
///
/// Seeds are `seed_size` tracks picked uniformly from `selected`; the
/// catalog is asked for `recommendation_pool` candidates and `count` of
/// them are picked uniformly. Nothing is deduplicated against `selected`.
/// An empty selection has nothing to seed from and yields no recommendations.
pub fn expand_with_recommendations<C: CatalogClient + ?Sized, R: Rng + ?Sized>(
    client: &C,
    credential: &Credential,
    selected: &[String],
    selection: &SelectionConfig,
    count: usize,
    rng: &mut R,
) -> Result<Vec<String>> {
    if selected.is_empty() || count == 0 || selection.seed_size == 0 {
        return Ok(Vec::new());
    }

    let seeds: Vec<String> = selected
        .choose_multiple(rng, selection.seed_size)
        .cloned()
        .collect();
    let candidates = client.fetch_recommendations(credential, &seeds, selection.recommendation_pool)?;

    let picked: Vec<String> = candidates
        .choose_multiple(rng, count)
        .map(|item| item.uri.clone())
        .collect();
    debug!(
        "Picked {} of {} recommendations from {} seeds",
        picked.len(),
        candidates.len(),
        seeds.len()
    );
    Ok(picked)
}

/// Rank, sample and (optionally) expand every participant's tracks.
///
/// `credential` is the host's and is used for all recommendation calls.
/// A failing recommendation call fails the whole tracklist.
pub fn build_tracklist<C: CatalogClient + ?Sized, R: Rng + ?Sized>(
    client: &C,
    credential: &Credential,
    participations: &[Participation],
    size: usize,
    recommendations_enabled: bool,
    selection: &SelectionConfig,
    rng: &mut R,
) -> Result<Vec<String>> {
    let pool = algorithm::rank_participations(participations);
    let selections = algorithm::sample_weighted_tracks(&pool, participations, size, rng);

    let mut tracks = Vec::new();
    for ParticipantSelection { user_id, track_ids } in selections {
        if recommendations_enabled {
            let recommended = expand_with_recommendations(
                client,
                credential,
                &track_ids,
                selection,
                selection.recommendations_per_participant,
                rng,
            )?;
            debug!(
                "Participant {user_id}: {} sampled, {} recommended",
                track_ids.len(),
                recommended.len()
            );
            tracks.extend(track_ids);
            tracks.extend(recommended);
        } else {
            debug!("Participant {user_id}: {} sampled", track_ids.len());
            tracks.extend(track_ids);
        }
    }

    tracks.shuffle(rng);
    info!(
        "Built tracklist of {} tracks from {} pooled for {} participants",
        tracks.len(),
        pool.tracks.len(),
        participations.len()
    );
    Ok(tracks)
}
