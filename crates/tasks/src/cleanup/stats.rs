// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::sync::atomic::{AtomicU64, Ordering};

use super::TickReport;

/// Running totals of the cleanup host
#[derive(Debug, Default)]
pub struct CleanupStats {
    ticks: AtomicU64,
    failed_ticks: AtomicU64,
    removed: AtomicU64,
}

impl CleanupStats {
    /// Number of ticks which ran, successful or not
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Number of ticks which ended on a storage failure
    #[must_use]
    pub fn failed_ticks(&self) -> u64 {
        self.failed_ticks.load(Ordering::Relaxed)
    }

    /// Number of grants removed since the host started
    #[must_use]
    pub fn removed(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }

    pub(crate) fn record(&self, report: &TickReport) {
        self.removed.fetch_add(
            u64::try_from(report.removed).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        if report.outcome.is_failure() {
            self.failed_ticks.fetch_add(1, Ordering::Relaxed);
        }
        // Bumped last, so that a reader seeing the tick also sees its results
        self.ticks.fetch_add(1, Ordering::Release);
    }
}
