// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

pub use sigil_data_model::MAX_CLEANUP_BATCH_SIZE as MAX_BATCH_SIZE;
use thiserror::Error;

/// Errors returned when building [`CleanupSettings`] out of invalid values
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InvalidCleanupSettings {
    /// The interval between two ticks is zero
    #[error("the cleanup interval must be greater than zero")]
    ZeroInterval,

    /// The batch size is zero
    #[error("the cleanup batch size must be greater than zero")]
    ZeroBatchSize,

    /// The batch size is above [`MAX_BATCH_SIZE`]
    #[error("the cleanup batch size must be at most {MAX_BATCH_SIZE}, got {0}")]
    BatchSizeTooLarge(usize),

    /// The number of iterations allowed in a tick is zero
    #[error("the maximum number of iterations per tick must be greater than zero")]
    ZeroIterationCap,
}

/// How and when expired grants get removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSettings {
    enabled: bool,
    interval: Duration,
    batch_size: usize,
    max_iterations_per_tick: usize,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(60),
            batch_size: 100,
            max_iterations_per_tick: 100,
        }
    }
}

impl CleanupSettings {
    /// Validate and build the settings
    ///
    /// # Errors
    ///
    /// Returns an error if the interval, the batch size or the iteration cap
    /// is zero, or if the batch size is above [`MAX_BATCH_SIZE`]
    pub fn new(
        enabled: bool,
        interval: Duration,
        batch_size: usize,
        max_iterations_per_tick: usize,
    ) -> Result<Self, InvalidCleanupSettings> {
        if interval.is_zero() {
            return Err(InvalidCleanupSettings::ZeroInterval);
        }

        if batch_size == 0 {
            return Err(InvalidCleanupSettings::ZeroBatchSize);
        }

        if batch_size > MAX_BATCH_SIZE {
            return Err(InvalidCleanupSettings::BatchSizeTooLarge(batch_size));
        }

        if max_iterations_per_tick == 0 {
            return Err(InvalidCleanupSettings::ZeroIterationCap);
        }

        Ok(Self {
            enabled,
            interval,
            batch_size,
            max_iterations_per_tick,
        })
    }

    /// Whether the periodic cleanup should run at all
    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Time between two ticks
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Maximum number of keys handled by one select/delete iteration
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Maximum number of select/delete iterations in a single tick
    #[must_use]
    pub fn max_iterations_per_tick(&self) -> usize {
        self.max_iterations_per_tick
    }
}
