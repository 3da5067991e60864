// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Removal of grants which are expired or consumed
//!
//! - [`settings`]: validated knobs of the sweeper and its host
//! - [`sweeper`]: one tick of select-then-delete batches
//! - [`host`]: the periodic loop, with start and stop
//! - [`stats`]: counters shared between the host task and its owner

mod host;
mod settings;
mod stats;
mod sweeper;

#[cfg(test)]
mod tests;

pub use self::{
    host::CleanupHost,
    settings::{CleanupSettings, InvalidCleanupSettings, MAX_BATCH_SIZE},
    stats::CleanupStats,
    sweeper::{GrantSweeper, SweeperState, TickOutcome, TickReport},
};
