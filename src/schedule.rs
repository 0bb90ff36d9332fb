//! Scheduled refresh trigger.
//!
//! A released playlist with a cadence is refreshed on the weekday it was
//! released (weekly) or on the day of month it was released (monthly).
//! Months shorter than the release day refresh on their last day instead.

use crate::catalog::CatalogClient;
use crate::error::Result;
use crate::model::{Playlist, PlaylistStatus, RefreshCadence};
use crate::playlist::PlaylistService;
use chrono::{Datelike, NaiveDate};
use log::{error, info};
use rayon::prelude::*;

/// Outcome of one scheduler tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    /// Playlist id and error message.
    pub failed: Vec<(String, String)>,
}

/// Whether `playlist` should be refreshed on `today`.
///
/// Never on the release day itself and never twice on the same day.
#[must_use]
pub fn is_refresh_due(playlist: &Playlist, today: NaiveDate) -> bool {
    let (Some(cadence), Some(released_at)) = (playlist.refresh_every, playlist.released_at) else {
        return false;
    };
    if playlist.status != PlaylistStatus::Released {
        return false;
    }

    let released_on = released_at.date_naive();
    if today <= released_on {
        return false;
    }
    if playlist.refreshed_at.is_some_and(|at| at.date_naive() == today) {
        return false;
    }

    match cadence {
        RefreshCadence::Week => today.weekday() == released_on.weekday(),
        RefreshCadence::Month => today.day() == released_on.day().min(days_in_month(today)),
    }
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = match date.month() {
        12 => (date.year() + 1, 1),
        month => (date.year(), month + 1),
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .map_or(31, |last| last.day())
}

/// Refresh every scheduled playlist that is due on `today`.
///
/// Playlists are refreshed in parallel; one failure does not stop the others.
pub fn run_due_refreshes<C: CatalogClient>(service: &PlaylistService<C>, today: NaiveDate) -> Result<RefreshReport> {
    let due: Vec<Playlist> = service
        .store()
        .list_scheduled()?
        .into_iter()
        .filter(|playlist| is_refresh_due(playlist, today))
        .collect();

    if due.is_empty() {
        info!("No playlists due for refresh on {today}");
        return Ok(RefreshReport::default());
    }
    info!("{} playlists due for refresh on {today}", due.len());

    let outcomes: Vec<(String, Result<Playlist>)> = due
        .par_iter()
        .map(|playlist| (playlist.id.clone(), service.refresh(&playlist.id)))
        .collect();

    let mut report = RefreshReport::default();
    for (id, outcome) in outcomes {
        match outcome {
            Ok(_) => report.refreshed.push(id),
            Err(e) => {
                error!("Scheduled refresh of playlist {id} failed: {e}");
                report.failed.push((id, e.to_string()));
            }
        }
    }
    Ok(report)
}
