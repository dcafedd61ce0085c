use std::{future::Future, time::Duration};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::{
    cache::LastSeenCache,
    overlay::{Controller, Overlay, SequenceError},
    player::PlayerStatus,
    track::{has_changed, last_seen_label, PlaybackState},
};

/// How the process was asked to run.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
    Continuous,
    Once,
    Force,
}

/// Where a single check cycle ended up.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CycleOutcome {
    /// The player is not playing; the overlay was hidden.
    PlayerAbsent,
    /// The player is playing but its track could not be read.
    TrackUnknown,
    Unchanged,
    Changed,
}

/// Keeps the overlay in step with the player.
pub struct Reconciler<P, C> {
    player: P,
    cache: LastSeenCache,
    overlay: Overlay<C>,
    check_interval: Duration,
}

impl<P, C> Reconciler<P, C>
where
    P: PlayerStatus,
    C: Controller,
{
    pub fn new(
        player: P,
        cache: LastSeenCache,
        overlay: Overlay<C>,
        check_interval: Duration,
    ) -> Self {
        Self {
            player,
            cache,
            overlay,
            check_interval,
        }
    }

    pub async fn run(&self, mode: Mode, shutdown: impl Future<Output = ()>) {
        match mode {
            Mode::Continuous => self.run_continuous(shutdown).await,
            Mode::Once => {
                info!("Single check...");
                self.check().await;
            }
            Mode::Force => self.force_refresh().await,
        }
    }

    /// Checks once per interval until `shutdown` resolves. Cycles never
    /// overlap: a tick that fires while a cycle is still running is dropped.
    pub async fn run_continuous(&self, shutdown: impl Future<Output = ()>) {
        info!("Checking every {}s...", self.check_interval.as_secs_f64());
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.check().await;
                }
            }
        }
    }

    /// Runs the reload sequence regardless of player state, without reading
    /// or writing the cache.
    pub async fn force_refresh(&self) {
        info!("Forcing refresh...");
        if let Err(err) = self.overlay.reload().await {
            report("reload", &err);
        }
    }

    /// One reconciliation cycle. Failures are logged, never returned.
    pub async fn check(&self) -> CycleOutcome {
        if self.player.is_playing().await == PlaybackState::NotPlaying {
            info!("Spotify not playing. Hiding overlay.");
            if let Err(err) = self.overlay.hide().await {
                report("hide", &err);
            }
            return CycleOutcome::PlayerAbsent;
        }

        let Some(current) = self.player.current_track().await else {
            warn!("No track information available, skipping this cycle");
            return CycleOutcome::TrackUnknown;
        };

        let cached = self.cache.load().await;
        if !has_changed(&current, cached.as_ref()) {
            info!("No change: {}", current.label());
            return CycleOutcome::Unchanged;
        }

        info!(
            "Song changed: {} → {}",
            last_seen_label(cached.as_ref()),
            current.label()
        );

        match self.overlay.reload().await {
            Ok(()) => {}
            Err(err @ SequenceError::Connect(_)) => {
                // Leave the cache stale so the next cycle tries again.
                report("reload", &err);
                return CycleOutcome::Changed;
            }
            Err(err @ SequenceError::Step(_)) => report("reload", &err),
        }

        if let Err(err) = self.cache.store(&current).await {
            error!(path = %self.cache.path().display(), error = %err, "Failed to write cache file");
        }
        CycleOutcome::Changed
    }
}

fn report(operation: &str, err: &SequenceError) {
    match err {
        SequenceError::Connect(source) => {
            error!(operation, error = %source, "OBS connection failed")
        }
        SequenceError::Step(source) => error!(operation, error = %source, "OBS error"),
    }
}
