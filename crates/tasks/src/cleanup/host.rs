// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{CleanupSettings, CleanupStats, GrantSweeper};

/// Drives a [`GrantSweeper`] at a fixed interval.
///
/// The schedule is aligned on the call to [`CleanupHost::start`]: the first
/// tick fires one interval later, and nothing about previous runs is
/// persisted.
pub struct CleanupHost {
    enabled: bool,
    interval: Duration,
    sweeper: Option<GrantSweeper>,
    stats: Arc<CleanupStats>,
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CleanupHost {
    /// Create a new host for the given sweeper
    #[must_use]
    pub fn new(sweeper: GrantSweeper, settings: &CleanupSettings) -> Self {
        Self {
            enabled: settings.enabled(),
            interval: settings.interval(),
            sweeper: Some(sweeper),
            stats: Arc::default(),
            cancellation_token: CancellationToken::new(),
            handle: None,
        }
    }

    /// Counters updated after every tick
    #[must_use]
    pub fn stats(&self) -> Arc<CleanupStats> {
        Arc::clone(&self.stats)
    }

    /// Whether the periodic loop was started and has not finished yet
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Start the periodic loop on the task tracker.
    ///
    /// The loop stops when either the given token or [`CleanupHost::stop`]
    /// cancels it. This does nothing if cleanup is disabled, or if the host
    /// was already started.
    pub fn start(&mut self, cancellation_token: &CancellationToken, task_tracker: &TaskTracker) {
        if !self.enabled {
            tracing::info!("Grant cleanup is disabled");
            return;
        }

        let Some(sweeper) = self.sweeper.take() else {
            tracing::warn!("Grant cleanup was already started");
            return;
        };

        self.cancellation_token = cancellation_token.child_token();
        tracing::info!(
            interval.seconds = self.interval.as_secs(),
            "Starting grant cleanup"
        );

        let handle = task_tracker.spawn(run(
            sweeper,
            self.interval,
            Arc::clone(&self.stats),
            self.cancellation_token.clone(),
        ));
        self.handle = Some(handle);
    }

    /// Signal the loop to stop and wait for it.
    ///
    /// A tick in progress finishes its current select or delete call, but no
    /// new iteration starts.
    pub async fn stop(&mut self) {
        self.cancellation_token.cancel();

        let Some(handle) = self.handle.take() else {
            return;
        };

        if let Err(e) = handle.await {
            tracing::error!(
                error = &e as &dyn std::error::Error,
                "Grant cleanup task failed"
            );
        }
    }
}

async fn run(
    mut sweeper: GrantSweeper,
    period: Duration,
    stats: Arc<CleanupStats>,
    cancellation_token: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            () = cancellation_token.cancelled() => {
                break;
            }

            _ = interval.tick() => {}
        }

        let report = sweeper.tick(&cancellation_token).await;
        stats.record(&report);
    }

    sweeper.stop();
    tracing::info!(
        ticks = stats.ticks(),
        removed = stats.removed(),
        "Grant cleanup stopped"
    );
}
