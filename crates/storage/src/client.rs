// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repositories to interact with the registered OAuth 2.0 clients

use async_trait::async_trait;
use sigil_data_model::Client;

use crate::repository_impl;

/// A [`ClientRepository`] helps interacting with the OAuth 2.0 clients
/// registered in the storage backend
#[async_trait]
pub trait ClientRepository: Send {
    /// The error type returned by the repository
    type Error;

    /// Lookup a client by its client ID
    ///
    /// Returns `None` if no client was found. Disabled clients are returned
    /// too.
    ///
    /// # Parameters
    ///
    /// * `client_id`: The client ID to lookup
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn lookup(&mut self, client_id: &str) -> Result<Option<Client>, Self::Error>;

    /// Create or replace a client, along with its scopes, origins and
    /// properties
    ///
    /// # Parameters
    ///
    /// * `client`: The client to store
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn upsert(&mut self, client: Client) -> Result<Client, Self::Error>;

    /// List all the clients, ordered by client ID
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn all(&mut self) -> Result<Vec<Client>, Self::Error>;

    /// Delete a client
    ///
    /// Returns `true` if the client existed
    ///
    /// # Parameters
    ///
    /// * `client_id`: The client ID of the client to delete
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove(&mut self, client_id: &str) -> Result<bool, Self::Error>;
}

repository_impl!(ClientRepository:
    async fn lookup(&mut self, client_id: &str) -> Result<Option<Client>, Self::Error>;
    async fn upsert(&mut self, client: Client) -> Result<Client, Self::Error>;
    async fn all(&mut self) -> Result<Vec<Client>, Self::Error>;
    async fn remove(&mut self, client_id: &str) -> Result<bool, Self::Error>;
);
