// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Repositories to interact with identity and API resources

use async_trait::async_trait;
use sigil_data_model::{ApiResource, IdentityResource, Resources};

use crate::repository_impl;

/// A [`ResourceRepository`] helps interacting with the identity and API
/// resources saved in the storage backend
#[async_trait]
pub trait ResourceRepository: Send {
    /// The error type returned by the repository
    type Error;

    /// Create or replace an identity resource
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn upsert_identity_resource(
        &mut self,
        resource: IdentityResource,
    ) -> Result<IdentityResource, Self::Error>;

    /// Create or replace an API resource
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn upsert_api_resource(
        &mut self,
        resource: ApiResource,
    ) -> Result<ApiResource, Self::Error>;

    /// Find the identity resources whose name is one of the given scopes
    ///
    /// # Parameters
    ///
    /// * `scopes`: The requested scope names
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_identity_resources_by_scope(
        &mut self,
        scopes: &[String],
    ) -> Result<Vec<IdentityResource>, Self::Error>;

    /// Find the API resources which expose at least one of the given scopes
    ///
    /// # Parameters
    ///
    /// * `scopes`: The requested scope names
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_api_resources_by_scope(
        &mut self,
        scopes: &[String],
    ) -> Result<Vec<ApiResource>, Self::Error>;

    /// Find the API resources with the given names
    ///
    /// # Parameters
    ///
    /// * `names`: The API resource names
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn find_api_resources_by_name(
        &mut self,
        names: &[String],
    ) -> Result<Vec<ApiResource>, Self::Error>;

    /// Get all the resources, ordered by name
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn all(&mut self) -> Result<Resources, Self::Error>;

    /// Delete an identity resource by name
    ///
    /// Returns `true` if it existed
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove_identity_resource(&mut self, name: &str) -> Result<bool, Self::Error>;

    /// Delete an API resource by name
    ///
    /// Returns `true` if it existed
    ///
    /// # Errors
    ///
    /// Returns [`Self::Error`] if the underlying repository fails
    async fn remove_api_resource(&mut self, name: &str) -> Result<bool, Self::Error>;
}

repository_impl!(ResourceRepository:
    async fn upsert_identity_resource(
        &mut self,
        resource: IdentityResource,
    ) -> Result<IdentityResource, Self::Error>;
    async fn upsert_api_resource(
        &mut self,
        resource: ApiResource,
    ) -> Result<ApiResource, Self::Error>;
    async fn find_identity_resources_by_scope(
        &mut self,
        scopes: &[String],
    ) -> Result<Vec<IdentityResource>, Self::Error>;
    async fn find_api_resources_by_scope(
        &mut self,
        scopes: &[String],
    ) -> Result<Vec<ApiResource>, Self::Error>;
    async fn find_api_resources_by_name(
        &mut self,
        names: &[String],
    ) -> Result<Vec<ApiResource>, Self::Error>;
    async fn all(&mut self) -> Result<Resources, Self::Error>;
    async fn remove_identity_resource(&mut self, name: &str) -> Result<bool, Self::Error>;
    async fn remove_api_resource(&mut self, name: &str) -> Result<bool, Self::Error>;
);
