// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use opentelemetry::{
    Key, KeyValue,
    metrics::{Counter, Histogram},
};
use sigil_storage::{
    BoxClock, BoxRepositoryFactory, RepositoryAccess, RepositoryError, RepositoryFactory,
    RepositoryTransaction,
};
use tokio_util::sync::CancellationToken;

use super::CleanupSettings;
use crate::METER;

const RESULT: Key = Key::from_static_str("result");

/// Where the sweeper is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweeperState {
    /// Waiting for the next tick
    Idle,

    /// Looking for a batch of removable grants
    Selecting,

    /// Deleting the batch which was just selected
    Deleting,

    /// Cancelled, no further tick will do anything
    Stopped,
}

/// How a tick ended
#[derive(Debug)]
pub enum TickOutcome {
    /// The last batch was not full, there is nothing left to remove
    Drained,

    /// The tick stopped after the maximum number of iterations, there may be
    /// more grants to remove
    CapReached,

    /// Cancellation was observed between two iterations
    Cancelled,

    /// Selecting a batch failed, the tick did nothing more
    SelectFailed(RepositoryError),

    /// Deleting a batch failed, it will be selected again on the next tick
    DeleteFailed(RepositoryError),
}

impl TickOutcome {
    /// Whether the tick ended because of a storage failure
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::SelectFailed(_) | Self::DeleteFailed(_))
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Drained => "drained",
            Self::CapReached => "cap_reached",
            Self::Cancelled => "cancelled",
            Self::SelectFailed(_) => "select_failed",
            Self::DeleteFailed(_) => "delete_failed",
        }
    }
}

/// What a single tick did
#[derive(Debug)]
pub struct TickReport {
    /// Number of grants actually removed
    pub removed: usize,

    /// Number of select/delete iterations which were started
    pub iterations: usize,

    /// Wall time spent in the tick
    pub duration: Duration,

    /// Why the tick ended
    pub outcome: TickOutcome,
}

/// Removes expired and consumed grants, one batch at a time.
///
/// Each select and each delete runs in its own repository, so no transaction
/// or connection is held across the pair. Writers racing with the sweeper
/// rely on deletes being idempotent, see [`sigil_storage::guard`].
pub struct GrantSweeper {
    repository_factory: BoxRepositoryFactory,
    clock: BoxClock,
    batch_size: usize,
    max_iterations_per_tick: usize,
    state: SweeperState,
    removed_counter: Counter<u64>,
    tick_duration_histogram: Histogram<u64>,
}

impl GrantSweeper {
    /// Create a new sweeper, using the batch size and iteration cap from the
    /// settings
    #[must_use]
    pub fn new(
        repository_factory: BoxRepositoryFactory,
        clock: BoxClock,
        settings: &CleanupSettings,
    ) -> Self {
        let removed_counter = METER
            .u64_counter("sigil.cleanup.grants.removed")
            .with_description("The number of grants removed by the cleanup sweeper")
            .with_unit("{grant}")
            .build();
        removed_counter.add(0, &[]);

        let tick_duration_histogram = METER
            .u64_histogram("sigil.cleanup.tick.duration")
            .with_description("The time it took to run a cleanup tick")
            .with_unit("ms")
            .build();

        Self {
            repository_factory,
            clock,
            batch_size: settings.batch_size(),
            max_iterations_per_tick: settings.max_iterations_per_tick(),
            state: SweeperState::Idle,
            removed_counter,
            tick_duration_histogram,
        }
    }

    /// The current state of the sweeper
    #[must_use]
    pub fn state(&self) -> SweeperState {
        self.state
    }

    /// Stop the sweeper. Later ticks return immediately.
    pub fn stop(&mut self) {
        self.state = SweeperState::Stopped;
    }

    /// Run one tick: select and delete batches until the eligible set is
    /// drained, the iteration cap is hit, a storage call fails, or the
    /// cancellation token is cancelled.
    ///
    /// Failures are logged and reported, never retried within the tick: the
    /// grants stay eligible, so the next tick picks them up again.
    #[tracing::instrument(name = "cleanup.grants.tick", skip_all)]
    pub async fn tick(&mut self, cancellation_token: &CancellationToken) -> TickReport {
        let start = Instant::now();
        // One cutoff for the whole tick, so that the scan terminates
        let cutoff = self.clock.now();
        let mut removed = 0;
        let mut iterations = 0;
        let mut cursor: Option<String> = None;

        let outcome = loop {
            if self.state == SweeperState::Stopped || cancellation_token.is_cancelled() {
                self.state = SweeperState::Stopped;
                break TickOutcome::Cancelled;
            }

            if iterations == self.max_iterations_per_tick {
                break TickOutcome::CapReached;
            }
            iterations += 1;

            self.state = SweeperState::Selecting;
            let mut keys = match self.select(cutoff, cursor.as_deref()).await {
                Ok(keys) => keys,
                Err(e) => break TickOutcome::SelectFailed(e),
            };

            if keys.is_empty() {
                break TickOutcome::Drained;
            }

            self.state = SweeperState::Deleting;
            let count = match self.delete(&keys, cutoff).await {
                Ok(count) => count,
                Err(e) => break TickOutcome::DeleteFailed(e),
            };

            removed += count;
            self.removed_counter
                .add(u64::try_from(count).unwrap_or(u64::MAX), &[]);
            tracing::debug!(
                selected = keys.len(),
                removed = count,
                iteration = iterations,
                "Removed a batch of grants"
            );

            // A short page means we reached the end of the eligible set
            if keys.len() < self.batch_size {
                break TickOutcome::Drained;
            }

            cursor = keys.pop();
        };

        if self.state != SweeperState::Stopped {
            self.state = SweeperState::Idle;
        }

        let duration = start.elapsed();
        self.tick_duration_histogram.record(
            duration.as_millis().try_into().unwrap_or(u64::MAX),
            &[KeyValue::new(RESULT, outcome.as_str())],
        );

        match &outcome {
            TickOutcome::SelectFailed(e) => {
                tracing::error!(
                    error = e as &dyn std::error::Error,
                    transient = e.is_transient(),
                    "Failed to select expired grants, skipping this tick"
                );
            }
            TickOutcome::DeleteFailed(e) => {
                tracing::error!(
                    error = e as &dyn std::error::Error,
                    transient = e.is_transient(),
                    removed,
                    "Failed to delete expired grants, they will be retried on the next tick"
                );
            }
            TickOutcome::CapReached => {
                tracing::warn!(
                    removed,
                    iterations,
                    "Reached the maximum number of iterations, more grants remain to be removed"
                );
            }
            TickOutcome::Drained | TickOutcome::Cancelled if removed == 0 => {
                tracing::debug!("No grants to clean up");
            }
            TickOutcome::Drained | TickOutcome::Cancelled => {
                tracing::info!(count = removed, "Cleaned up grants");
            }
        }

        TickReport {
            removed,
            iterations,
            duration,
            outcome,
        }
    }

    async fn select(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&str>,
    ) -> Result<Vec<String>, RepositoryError> {
        let mut repo = self.repository_factory.create().await?;
        let keys = repo
            .grant()
            .select_expired_keys(cutoff, after, self.batch_size)
            .await?;
        repo.cancel().await?;
        Ok(keys)
    }

    async fn delete(
        &self,
        keys: &[String],
        cutoff: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let mut repo = self.repository_factory.create().await?;
        let count = repo.grant().remove_expired(keys, cutoff).await?;
        repo.save().await?;
        Ok(count)
    }
}
