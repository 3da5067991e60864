// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use opentelemetry_semantic_conventions::attribute::DB_QUERY_TEXT;
use sqlx::Sqlite;
use tracing::Span;

/// Records the SQL text of a query as `db.query.text` in the current span.
///
/// The span must have declared the field, usually through
/// `#[tracing::instrument(fields(db.query.text))]`.
pub(crate) trait ExecuteExt: Sized {
    #[must_use]
    fn traced(self) -> Self;
}

impl<'q, T> ExecuteExt for T
where
    T: sqlx::Execute<'q, Sqlite>,
{
    fn traced(self) -> Self {
        Span::current().record(DB_QUERY_TEXT, self.sql());
        self
    }
}
