// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Utilities to manage paginated queries.
//!
//! Pages are keyed by a cursor, which is the sort key of the last item seen.
//! Unlike a numeric offset, a cursor stays valid when earlier rows are
//! deleted between two calls.

/// Pagination parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination<Cursor = String> {
    /// The cursor to start from
    pub before: Option<Cursor>,

    /// The cursor to end at
    pub after: Option<Cursor>,

    /// The maximum number of items to return
    pub count: usize,

    /// In which direction to paginate
    pub direction: PaginationDirection,
}

/// The direction to paginate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationDirection {
    /// Paginate forward
    Forward,

    /// Paginate backward
    Backward,
}

/// A node in a page, with a cursor
pub trait Node<C = String> {
    /// The cursor of that particular node
    fn cursor(&self) -> C;
}

impl<C> Pagination<C> {
    /// Creates a [`Pagination`] which gets the first N items
    #[must_use]
    pub const fn first(first: usize) -> Self {
        Self {
            before: None,
            after: None,
            count: first,
            direction: PaginationDirection::Forward,
        }
    }

    /// Creates a [`Pagination`] which gets the last N items
    #[must_use]
    pub const fn last(last: usize) -> Self {
        Self {
            before: None,
            after: None,
            count: last,
            direction: PaginationDirection::Backward,
        }
    }

    /// Get items before the given cursor
    #[must_use]
    pub fn before(mut self, cursor: C) -> Self {
        self.before = Some(cursor);
        self
    }

    /// Get items after the given cursor
    #[must_use]
    pub fn after(mut self, cursor: C) -> Self {
        self.after = Some(cursor);
        self
    }

    /// Process a page returned by a paginated query
    ///
    /// The query is expected to have fetched one more item than requested, so
    /// that we know whether there is a next page.
    #[must_use]
    pub fn process<T: Node<C>>(&self, mut nodes: Vec<T>) -> Page<T, C> {
        let is_full = nodes.len() == (self.count + 1);
        if is_full {
            nodes.pop();
        }

        let (has_previous_page, has_next_page) = match self.direction {
            PaginationDirection::Forward => (false, is_full),
            PaginationDirection::Backward => {
                // Backward queries are sorted in reverse, give them back in order
                nodes.reverse();
                (is_full, false)
            }
        };

        let edges = nodes
            .into_iter()
            .map(|node| Edge {
                cursor: node.cursor(),
                node,
            })
            .collect();

        Page {
            has_next_page,
            has_previous_page,
            edges,
        }
    }
}

/// An edge in a paginated result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge<T, C = String> {
    /// The cursor of the edge
    pub cursor: C,
    /// The node of the edge
    pub node: T,
}

/// A page of results returned by a paginated query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T, C = String> {
    /// When paginating forwards, this is true if there are more items after
    pub has_next_page: bool,

    /// When paginating backwards, this is true if there are more items before
    pub has_previous_page: bool,

    /// The items in the page
    pub edges: Vec<Edge<T, C>>,
}

impl<T, C> Page<T, C> {
    /// The cursor of the last item in the page, to fetch the next one
    #[must_use]
    pub fn end_cursor(&self) -> Option<&C> {
        self.edges.last().map(|edge| &edge.cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(&'static str);

    impl Node for Item {
        fn cursor(&self) -> String {
            self.0.to_owned()
        }
    }

    #[test]
    fn test_forward_page() {
        let pagination = Pagination::first(2);
        let page = pagination.process(vec![Item("a"), Item("b"), Item("c")]);
        assert!(page.has_next_page);
        assert!(!page.has_previous_page);
        assert_eq!(page.edges.len(), 2);
        assert_eq!(page.end_cursor().map(String::as_str), Some("b"));

        let page = pagination.process(vec![Item("d")]);
        assert!(!page.has_next_page);
        assert_eq!(page.edges.len(), 1);
    }

    #[test]
    fn test_backward_page() {
        let pagination = Pagination::<String>::last(2);
        // Backward queries come back in descending order
        let page = pagination.process(vec![Item("c"), Item("b"), Item("a")]);
        assert!(!page.has_next_page);
        assert!(page.has_previous_page);
        let cursors: Vec<&str> = page.edges.iter().map(|e| e.cursor.as_str()).collect();
        assert_eq!(cursors, ["b", "c"]);
    }
}
