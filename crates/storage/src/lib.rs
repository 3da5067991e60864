// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Interactions with the storage backend
//!
//! This crate provides a set of traits that can be implemented to interact with
//! the storage backend. Those traits are called repositories and are grouped by
//! the type of data they manage: persisted grants, clients and resources.
//!
//! Each of those repositories can be accessed via the [`RepositoryAccess`]
//! trait. This trait can be wrapped in a [`BoxRepository`] to allow using it
//! without caring about the underlying storage backend, and without carrying
//! around the generic type parameter.
//!
//! A [`BoxRepository`] wraps one transaction of the backend. Short operations
//! should get their own repository from a [`RepositoryFactory`] and release it
//! with [`RepositoryTransaction::save`] or [`RepositoryTransaction::cancel`]
//! as soon as they are done, so that no connection is held across unrelated
//! steps.
//!
//! This crate also defines a [`Clock`] trait that can be used to abstract the
//! way the current time is retrieved. It has two implementation:
//! [`SystemClock`] that uses the system time and [`MockClock`] which is useful
//! for testing.
//!
//! [`MockClock`]: crate::clock::MockClock
//!
//! # Defining a new repository
//!
//! To define a new repository, you have to:
//!   1. Define a new (async) repository trait, with the methods you need
//!   2. Write an implementation of this trait for each storage backend you want
//!      (currently only for [`sigil-storage-sqlite`])
//!   3. Make it accessible via the [`RepositoryAccess`] trait
//!
//! The repository trait definition should look like this:
//!
//! ```ignore
//! #[async_trait]
//! pub trait FakeDataRepository: Send {
//!     /// The error type returned by the repository
//!     type Error;
//!
//!     /// Lookup a [`FakeData`] by its key
//!     ///
//!     /// Returns `None` if no [`FakeData`] was found
//!     ///
//!     /// # Parameters
//!     ///
//!     /// * `key`: The key of the [`FakeData`] to lookup
//!     ///
//!     /// # Errors
//!     ///
//!     /// Returns [`Self::Error`] if the underlying repository fails
//!     async fn lookup(&mut self, key: &str) -> Result<Option<FakeData>, Self::Error>;
//! }
//!
//! repository_impl!(FakeDataRepository:
//!     async fn lookup(&mut self, key: &str) -> Result<Option<FakeData>, Self::Error>;
//! );
//! ```
//!
//! The `repository_impl!` macro implements the repository trait for the
//! [`MapErr`] wrapper and for [`Box<R>`], so that the repository can be
//! type-erased.
//!
//! [`sigil-storage-sqlite`]: https://docs.rs/sigil-storage-sqlite/

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod client;
pub mod clock;
pub mod grant;
pub mod guard;
pub mod pagination;
pub(crate) mod repository;
pub mod resource;
mod utils;

pub use self::{
    clock::{Clock, SystemClock},
    pagination::{Page, Pagination},
    repository::{
        BoxRepository, BoxRepositoryFactory, Repository, RepositoryAccess, RepositoryError,
        RepositoryErrorKind, RepositoryFactory, RepositoryTransaction,
    },
    utils::{BoxClock, MapErr},
};
