// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Utilities to manage paginated queries.

use sea_query::{Expr, IntoColumnRef, Order};
use sigil_storage::{Pagination, pagination::PaginationDirection};

/// An extension trait to the [`sea_query::SelectStatement`], to add
/// cursor-based pagination over a text key column
pub trait QueryBuilderExt {
    /// Add cursor-based pagination to a query
    ///
    /// One more row than requested is fetched, so that
    /// [`Pagination::process`] can tell whether there is another page.
    fn generate_pagination<C: IntoColumnRef>(
        &mut self,
        column: C,
        pagination: &Pagination,
    ) -> &mut Self;
}

impl QueryBuilderExt for sea_query::SelectStatement {
    fn generate_pagination<C: IntoColumnRef>(
        &mut self,
        column: C,
        pagination: &Pagination,
    ) -> &mut Self {
        let key = column.into_column_ref();

        if let Some(after) = &pagination.after {
            self.and_where(Expr::col(key.clone()).gt(after.as_str()));
        }

        if let Some(before) = &pagination.before {
            self.and_where(Expr::col(key.clone()).lt(before.as_str()));
        }

        let order = match pagination.direction {
            PaginationDirection::Forward => Order::Asc,
            PaginationDirection::Backward => Order::Desc,
        };

        self.order_by(key, order)
            .limit((pagination.count + 1) as u64);

        self
    }
}
