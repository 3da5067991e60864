// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::{
    MapErr, client::ClientRepository, grant::GrantRepository, resource::ResourceRepository,
};

/// A [`RepositoryFactory`] is a factory that can create a [`BoxRepository`]
#[async_trait]
pub trait RepositoryFactory {
    /// Create a new [`BoxRepository`]
    async fn create(&self) -> Result<BoxRepository, RepositoryError>;
}

/// A type-erased [`RepositoryFactory`]
pub type BoxRepositoryFactory = Box<dyn RepositoryFactory + Send + Sync + 'static>;

/// A [`Repository`] helps interacting with the underlying storage backend.
pub trait Repository<E>:
    RepositoryAccess<Error = E> + RepositoryTransaction<Error = E> + Send
where
    E: std::error::Error + Send + Sync + 'static,
{
}

/// A type-erased [`Repository`]
pub type BoxRepository = Box<dyn Repository<RepositoryError> + Send + 'static>;

/// What went wrong when talking to the storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryErrorKind {
    /// A record with the same key already exists
    Conflict,

    /// The record addressed by the operation does not exist
    NotFound,

    /// The backend could not be reached, or timed out. Retrying later may
    /// succeed.
    Unavailable,

    /// The operation is not allowed on the record in its current state
    InvalidOperation,

    /// Anything else
    Other,
}

impl std::fmt::Display for RepositoryErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = match self {
            Self::Conflict => "conflicting record already exists",
            Self::NotFound => "record not found",
            Self::Unavailable => "storage backend unavailable",
            Self::InvalidOperation => "invalid operation",
            Self::Other => "storage backend error",
        };
        f.write_str(message)
    }
}

/// An opaque, type-erased error
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct RepositoryError {
    kind: RepositoryErrorKind,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl RepositoryError {
    /// Construct a [`RepositoryError`] of the given kind from any error
    pub fn new<E>(kind: RepositoryErrorKind, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind,
            source: Box::new(source),
        }
    }

    /// Construct a [`RepositoryError`] from any error kind
    pub fn from_error<E>(value: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::new(RepositoryErrorKind::Other, value)
    }

    /// What kind of failure this is
    #[must_use]
    pub fn kind(&self) -> RepositoryErrorKind {
        self.kind
    }

    /// Whether retrying the same operation later could succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == RepositoryErrorKind::Unavailable
    }

    /// Whether the addressed record does not exist
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == RepositoryErrorKind::NotFound
    }

    /// Whether the operation clashed with an existing record
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.kind == RepositoryErrorKind::Conflict
    }
}

/// A [`RepositoryTransaction`] can be saved or cancelled, after a series
/// of operations.
pub trait RepositoryTransaction {
    /// The error type used by the [`Self::save`] and [`Self::cancel`] functions
    type Error;

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to commit the
    /// transaction.
    fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;

    /// Rollback the transaction
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage backend failed to rollback
    /// the transaction.
    fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>>;
}

/// Access the various repositories the backend implements.
///
/// All the methods return a boxed trait object, which can be used to access a
/// particular repository. The lifetime of the returned object is bound to the
/// lifetime of the whole repository, so that only one mutable reference to the
/// repository is used at a time.
///
/// When adding a new repository, you should add a new method to this trait,
/// and update the implementations for [`MapErr`] and [`Box<R>`] below.
pub trait RepositoryAccess: Send {
    /// The backend-specific error type used by each repository.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Get a [`GrantRepository`]
    fn grant<'c>(&'c mut self) -> Box<dyn GrantRepository<Error = Self::Error> + 'c>;

    /// Get a [`ClientRepository`]
    fn client<'c>(&'c mut self) -> Box<dyn ClientRepository<Error = Self::Error> + 'c>;

    /// Get a [`ResourceRepository`]
    fn resource<'c>(&'c mut self) -> Box<dyn ResourceRepository<Error = Self::Error> + 'c>;
}

/// Implementations of the [`RepositoryAccess`], [`RepositoryTransaction`] and
/// [`Repository`] for the [`MapErr`] wrapper and [`Box<R>`]
mod impls {
    use futures_util::{FutureExt, TryFutureExt, future::BoxFuture};

    use super::RepositoryAccess;
    use crate::{
        MapErr, Repository, RepositoryTransaction, client::ClientRepository,
        grant::GrantRepository, resource::ResourceRepository,
    };

    // --- Repository ---
    impl<R, F, E1, E2> Repository<E2> for MapErr<R, F>
    where
        R: Repository<E1> + RepositoryAccess<Error = E1> + RepositoryTransaction<Error = E1>,
        F: FnMut(E1) -> E2 + Send + Sync + 'static,
        E1: std::error::Error + Send + Sync + 'static,
        E2: std::error::Error + Send + Sync + 'static,
    {
    }

    // --- RepositoryTransaction --
    impl<R, F, E> RepositoryTransaction for MapErr<R, F>
    where
        R: RepositoryTransaction,
        R::Error: 'static,
        F: FnMut(R::Error) -> E + Send + Sync + 'static,
        E: std::error::Error,
    {
        type Error = E;

        fn save(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
            Box::new(self.inner).save().map_err(self.mapper).boxed()
        }

        fn cancel(self: Box<Self>) -> BoxFuture<'static, Result<(), Self::Error>> {
            Box::new(self.inner).cancel().map_err(self.mapper).boxed()
        }
    }

    // --- RepositoryAccess --
    impl<R, F, E> RepositoryAccess for MapErr<R, F>
    where
        R: RepositoryAccess,
        R::Error: 'static,
        F: FnMut(R::Error) -> E + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        type Error = E;

        fn grant<'c>(&'c mut self) -> Box<dyn GrantRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.grant(), &mut self.mapper))
        }

        fn client<'c>(&'c mut self) -> Box<dyn ClientRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.client(), &mut self.mapper))
        }

        fn resource<'c>(&'c mut self) -> Box<dyn ResourceRepository<Error = Self::Error> + 'c> {
            Box::new(MapErr::new(self.inner.resource(), &mut self.mapper))
        }
    }

    impl<R: RepositoryAccess + ?Sized> RepositoryAccess for Box<R> {
        type Error = R::Error;

        fn grant<'c>(&'c mut self) -> Box<dyn GrantRepository<Error = Self::Error> + 'c> {
            (**self).grant()
        }

        fn client<'c>(&'c mut self) -> Box<dyn ClientRepository<Error = Self::Error> + 'c> {
            (**self).client()
        }

        fn resource<'c>(&'c mut self) -> Box<dyn ResourceRepository<Error = Self::Error> + 'c> {
            (**self).resource()
        }
    }
}
