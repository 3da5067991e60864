// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! An implementation of the storage traits for a SQLite database
//!
//! This backend uses [`sqlx`] to interact with the database. Most queries are
//! plain SQL, while the ones with dynamic filters are built with
//! [`sea_query`].
//!
//! # Timestamps
//!
//! Timestamps are stored as `INTEGER` columns, holding milliseconds since the
//! UNIX epoch. This keeps range comparisons (used by the cleanup sweeper)
//! index-friendly and independent of text formatting.
//!
//! # Concurrency
//!
//! Each [`SqliteRepository`] wraps one transaction on one pooled connection.
//! The database is expected to run in WAL mode, so that readers don't block
//! the writer. Contention between writers surfaces as `SQLITE_BUSY` once the
//! busy timeout is exhausted, which is classified as a transient error.
//!
//! # Migrations
//!
//! Migrations are embedded in the binary, see [`MIGRATOR`].

#![deny(clippy::future_not_send, missing_docs)]
#![allow(clippy::module_name_repetitions)]

use sqlx::migrate::Migrator;

pub mod client;
mod errors;
pub mod grant;
pub(crate) mod filter;
pub(crate) mod iden;
pub(crate) mod pagination;
pub(crate) mod repository;
pub mod resource;
mod telemetry;
pub(crate) mod tracing;

#[cfg(test)]
mod tests;

pub use self::{
    errors::{DatabaseError, DatabaseInconsistencyError},
    repository::{SqliteRepository, SqliteRepositoryFactory},
};

/// Embedded migrations, allowing them to run on startup
pub static MIGRATOR: Migrator = sqlx::migrate!();
