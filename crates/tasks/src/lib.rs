// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Background tasks of the grant service.
//!
//! For now this is the periodic removal of expired and consumed grants: a
//! [`GrantSweeper`] does the work of one tick, and a [`CleanupHost`] drives it
//! at a fixed interval until it gets cancelled.

use std::sync::LazyLock;

use opentelemetry::metrics::Meter;

mod cleanup;

pub use self::cleanup::{
    CleanupHost, CleanupSettings, CleanupStats, GrantSweeper, InvalidCleanupSettings,
    MAX_BATCH_SIZE, SweeperState, TickOutcome, TickReport,
};

static METER: LazyLock<Meter> = LazyLock::new(|| {
    let scope = opentelemetry::InstrumentationScope::builder(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(opentelemetry_semantic_conventions::SCHEMA_URL)
        .build();

    opentelemetry::global::meter_with_scope(scope)
});
