// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repositories to interact with persisted grants

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sigil_data_model::{Grant, GrantType};

use crate::{Clock, Page, Pagination, pagination::Node, repository_impl};

impl Node for Grant {
    fn cursor(&self) -> String {
        self.key.clone()
    }
}

/// Parameters to record a newly issued grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGrant {
    /// Unique key of the grant
    pub key: String,

    /// What kind of grant this is
    pub grant_type: GrantType,

    /// The end-user this grant belongs to, if any
    pub subject_id: Option<String>,

    /// The user session this grant was issued in, if any
    pub session_id: Option<String>,

    /// The client which requested the grant
    pub client_id: String,

    /// A free-form label
    pub description: Option<String>,

    /// When the grant stops being valid, if ever
    pub expires_at: Option<DateTime<Utc>>,

    /// The serialized protocol-level payload
    pub data: String,
}

/// Filter parameters for listing grants
///
/// All the set fields must match. An empty filter matches every grant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GrantFilter<'a> {
    subject: Option<&'a str>,
    session: Option<&'a str>,
    client: Option<&'a str>,
    grant_type: Option<&'a GrantType>,
}

impl<'a> GrantFilter<'a> {
    /// Create a new [`GrantFilter`] with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// List grants for a specific subject
    #[must_use]
    pub fn for_subject(mut self, subject_id: &'a str) -> Self {
        self.subject = Some(subject_id);
        self
    }

    /// Get the subject filter
    ///
    /// Returns [`None`] if no subject filter was set
    #[must_use]
    pub fn subject(&self) -> Option<&'a str> {
        self.subject
    }

    /// List grants issued in a specific session
    #[must_use]
    pub fn for_session(mut self, session_id: &'a str) -> Self {
        self.session = Some(session_id);
        self
    }

    /// Get the session filter
    ///
    /// Returns [`None`] if no session filter was set
    #[must_use]
    pub fn session(&self) -> Option<&'a str> {
        self.session
    }

    /// List grants issued to a specific client
    #[must_use]
    pub fn for_client(mut self, client_id: &'a str) -> Self {
        self.client = Some(client_id);
        self
    }

    /// Get the client filter
    ///
    /// Returns [`None`] if no client filter was set
    #[must_use]
    pub fn client(&self) -> Option<&'a str> {
        self.client
    }

    /// Only list grants of the given type
    #[must_use]
    pub fn with_type(mut self, grant_type: &'a GrantType) -> Self {
        self.grant_type = Some(grant_type);
        self
    }

    /// Get the grant type filter
    ///
    /// Returns [`None`] if no grant type filter was set
    #[must_use]
    pub fn grant_type(&self) -> Option<&'a GrantType> {
        self.grant_type
    }

    /// Whether no criteria were set, in which case the filter matches every
    /// grant
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subject.is_none()
            && self.session.is_none()
            && self.client.is_none()
            && self.grant_type.is_none()
    }
}

/// A [`GrantRepository`] helps interacting with persisted grants saved in
/// the storage backend.
///
/// Each call is atomic on its own. Sequences of calls are only atomic if they
/// are issued on the same repository and saved together.
#[async_trait]
pub trait GrantRepository: Send {
    /// The error type returned by the repository
    type Error;

    /// Lookup a grant by its key
    ///
    /// Returns `None` if no grant was found. Consumed and expired grants are
    /// returned as-is, callers decide what to do with them.
    ///
    /// # Parameters
    ///
    /// * `key`: The key of the grant to lookup
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup(&mut self, key: &str) -> Result<Option<Grant>, Self::Error>;

    /// Record a newly issued grant
    ///
    /// Returns the newly-created grant
    ///
    /// # Parameters
    ///
    /// * `clock`: The clock used to generate the creation timestamp
    /// * `grant`: The grant to record
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails, or if a
    /// grant with the same key already exists
    async fn add(&mut self, clock: &dyn Clock, grant: NewGrant) -> Result<Grant, Self::Error>;

    /// Store a grant, replacing any grant with the same key
    ///
    /// A stored grant which was already consumed is never replaced.
    ///
    /// # Parameters
    ///
    /// * `grant`: The grant to store
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails, or if the
    /// stored grant was already consumed
    async fn upsert(&mut self, grant: Grant) -> Result<Grant, Self::Error>;

    /// Replace the mutable fields of an existing grant
    ///
    /// The key, type, client and creation time of a grant never change. A
    /// consumed grant can't be updated anymore.
    ///
    /// # Parameters
    ///
    /// * `grant`: The grant with its new values
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails, if the
    /// grant doesn't exist or if it was already consumed
    async fn update(&mut self, grant: Grant) -> Result<Grant, Self::Error>;

    /// Mark a grant as consumed
    ///
    /// Returns the updated grant
    ///
    /// # Parameters
    ///
    /// * `clock`: The clock used to generate the consumption timestamp
    /// * `grant`: The grant to consume
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails, or if the
    /// grant no longer exists or was consumed by someone else in the
    /// meantime
    async fn consume(&mut self, clock: &dyn Clock, grant: Grant) -> Result<Grant, Self::Error>;

    /// List grants matching the given filter, ordered by key
    ///
    /// Every call runs a fresh query, so the listing can be restarted from any
    /// cursor.
    ///
    /// # Parameters
    ///
    /// * `filter`: The filter parameters
    /// * `pagination`: The pagination parameters
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn list(
        &mut self,
        filter: GrantFilter<'_>,
        pagination: Pagination,
    ) -> Result<Page<Grant>, Self::Error>;

    /// Count the grants matching the given filter
    ///
    /// # Parameters
    ///
    /// * `filter`: The filter parameters
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn count(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error>;

    /// Delete a grant by its key
    ///
    /// Returns `true` if the grant existed. Deleting a missing grant is not an
    /// error.
    ///
    /// # Parameters
    ///
    /// * `key`: The key of the grant to delete
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove(&mut self, key: &str) -> Result<bool, Self::Error>;

    /// Delete a set of grants by their keys
    ///
    /// Returns the number of grants actually deleted. Keys which no longer
    /// exist are skipped.
    ///
    /// # Parameters
    ///
    /// * `keys`: The keys of the grants to delete
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove_many(&mut self, keys: &[String]) -> Result<usize, Self::Error>;

    /// Delete the grants with the given keys which are still eligible for
    /// removal at `cutoff`
    ///
    /// Grants which were refreshed since their keys were selected are kept.
    /// Returns the number of grants actually deleted.
    ///
    /// # Parameters
    ///
    /// * `keys`: The keys of the grants to delete
    /// * `cutoff`: The point in time at which to evaluate expiration
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove_expired(
        &mut self,
        keys: &[String],
        cutoff: DateTime<Utc>,
    ) -> Result<usize, Self::Error>;

    /// Delete every grant matching the given filter, for example when a user
    /// session is terminated
    ///
    /// Returns the number of grants deleted
    ///
    /// # Parameters
    ///
    /// * `filter`: The filter parameters, which must not be empty
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails, or if the
    /// filter is empty
    async fn remove_by_filter(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error>;

    /// Count the grants which are eligible for removal at `cutoff`: consumed,
    /// or expired at or before `cutoff`
    ///
    /// # Parameters
    ///
    /// * `cutoff`: The point in time at which to evaluate expiration
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn count_expired(&mut self, cutoff: DateTime<Utc>) -> Result<usize, Self::Error>;

    /// Select up to `limit` keys of grants eligible for removal at `cutoff`,
    /// in ascending key order
    ///
    /// # Parameters
    ///
    /// * `cutoff`: The point in time at which to evaluate expiration
    /// * `after`: Only return keys strictly greater than this one
    /// * `limit`: The maximum number of keys to return
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn select_expired_keys(
        &mut self,
        cutoff: DateTime<Utc>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error>;
}

repository_impl!(GrantRepository:
    async fn lookup(&mut self, key: &str) -> Result<Option<Grant>, Self::Error>;
    async fn add(&mut self, clock: &dyn Clock, grant: NewGrant) -> Result<Grant, Self::Error>;
    async fn upsert(&mut self, grant: Grant) -> Result<Grant, Self::Error>;
    async fn update(&mut self, grant: Grant) -> Result<Grant, Self::Error>;
    async fn consume(&mut self, clock: &dyn Clock, grant: Grant) -> Result<Grant, Self::Error>;
    async fn list(
        &mut self,
        filter: GrantFilter<'_>,
        pagination: Pagination,
    ) -> Result<Page<Grant>, Self::Error>;
    async fn count(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error>;
    async fn remove(&mut self, key: &str) -> Result<bool, Self::Error>;
    async fn remove_many(&mut self, keys: &[String]) -> Result<usize, Self::Error>;
    async fn remove_expired(
        &mut self,
        keys: &[String],
        cutoff: DateTime<Utc>,
    ) -> Result<usize, Self::Error>;
    async fn remove_by_filter(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error>;
    async fn count_expired(&mut self, cutoff: DateTime<Utc>) -> Result<usize, Self::Error>;
    async fn select_expired_keys(
        &mut self,
        cutoff: DateTime<Utc>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error>;
);
