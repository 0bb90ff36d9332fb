//! # Refresh Scheduler Daemon
//!
//! Background process that wakes up every `scheduler.tick_secs` seconds and
//! refreshes the playlists whose cadence falls on the current day.
//!
//! ## Implementation
//!
//! The daemon runs as a separate process that can be started/stopped via CLI
//! commands. It records its PID in `<data_dir>/blend/blend-daemon.pid`; the
//! file doubles as the "is it running" marker for `blend daemon status`.
//! A failed tick is logged and the loop keeps going.

use crate::catalog::CatalogClient;
use crate::config;
use crate::playlist::PlaylistService;
use crate::schedule::{self, RefreshReport};
use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, Utc};
use log::{debug, error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const PID_FILE: &str = "blend-daemon.pid";

/// Periodic refresh trigger for scheduled playlists.
pub struct SchedulerDaemon<C: CatalogClient> {
    service: PlaylistService<C>,
    tick: Duration,
    pid_file: PathBuf,
}

impl<C: CatalogClient> SchedulerDaemon<C> {
    /// Create a daemon using the PID file in the data directory.
    pub fn new(service: PlaylistService<C>) -> Result<Self> {
        Ok(Self::with_pid_file(service, pid_file_path()?))
    }

    pub fn with_pid_file(service: PlaylistService<C>, pid_file: PathBuf) -> Self {
        let tick = Duration::from_secs(service.config().scheduler.tick_secs.max(1));
        Self {
            service,
            tick,
            pid_file,
        }
    }

    /// Run the scheduler until the process is terminated.
    pub fn start_monitoring(&self) -> Result<()> {
        info!("Starting refresh scheduler (tick every {}s)", self.tick.as_secs());

        let pid = std::process::id();
        fs::write(&self.pid_file, pid.to_string())
            .with_context(|| format!("Failed to write PID file {}", self.pid_file.display()))?;
        info!("Daemon started with PID {pid}");

        loop {
            match self.run_tick(Utc::now().date_naive()) {
                Ok(report) => debug!(
                    "Tick done: {} refreshed, {} failed",
                    report.refreshed.len(),
                    report.failed.len()
                ),
                Err(e) => error!("Error in scheduler tick: {e}"),
            }
            std::thread::sleep(self.tick);
        }
    }

    /// One scheduler pass for `today`.
    pub fn run_tick(&self, today: NaiveDate) -> crate::error::Result<RefreshReport> {
        schedule::run_due_refreshes(&self.service, today)
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }
}

/// Location of the daemon PID file.
pub fn pid_file_path() -> Result<PathBuf> {
    Ok(config::get_data_dir()?.join(PID_FILE))
}

/// Check if the daemon is running
pub fn is_daemon_running() -> Result<bool> {
    is_running(&pid_file_path()?)
}

/// Stop the running daemon
pub fn stop_daemon() -> Result<()> {
    stop(&pid_file_path()?)
}

fn read_pid(pid_file: &Path) -> Result<i32> {
    let pid_str = fs::read_to_string(pid_file)
        .with_context(|| format!("Failed to read {}", pid_file.display()))?;
    pid_str.trim().parse().context("Invalid PID in daemon file")
}

fn is_running(pid_file: &Path) -> Result<bool> {
    if !pid_file.exists() {
        return Ok(false);
    }
    let pid = read_pid(pid_file)?;

    // Signal 0 only probes for the process.
    Ok(unsafe { libc::kill(pid, 0) } == 0)
}

fn stop(pid_file: &Path) -> Result<()> {
    if !pid_file.exists() {
        bail!("Daemon is not running");
    }
    let pid = read_pid(pid_file)?;

    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        debug!("Process {pid} was already gone");
    }
    fs::remove_file(pid_file)?;

    info!("Daemon stopped (PID: {pid})");
    Ok(())
}
