// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Read-only access to the configuration data (clients and resources), and
//! caching wrappers around it.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sigil_data_model::{ApiResource, Client, IdentityResource, Resources};
use tokio::sync::RwLock;

use crate::{
    BoxClock, BoxRepositoryFactory, RepositoryAccess, RepositoryError, RepositoryFactory,
    RepositoryTransaction,
};

/// Read access to the registered clients
#[async_trait]
pub trait ClientStore: Send + Sync {
    /// Find a client by its client ID
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails
    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>, RepositoryError>;
}

/// Read access to the identity and API resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Find the identity resources matching the given scopes
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails
    async fn find_identity_resources_by_scope(
        &self,
        scopes: &[String],
    ) -> Result<Vec<IdentityResource>, RepositoryError>;

    /// Find the API resources exposing any of the given scopes
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails
    async fn find_api_resources_by_scope(
        &self,
        scopes: &[String],
    ) -> Result<Vec<ApiResource>, RepositoryError>;

    /// Find the API resources with the given names
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails
    async fn find_api_resources_by_name(
        &self,
        names: &[String],
    ) -> Result<Vec<ApiResource>, RepositoryError>;

    /// Get all the resources
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails
    async fn all_resources(&self) -> Result<Resources, RepositoryError>;
}

#[async_trait]
impl<S: ClientStore + ?Sized> ClientStore for Arc<S> {
    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>, RepositoryError> {
        (**self).find_client_by_id(client_id).await
    }
}

/// A [`ClientStore`] and [`ResourceStore`] which opens a short-lived
/// repository on each call
pub struct RepositoryConfigStore {
    factory: BoxRepositoryFactory,
}

impl RepositoryConfigStore {
    /// Create a new store from a [`RepositoryFactory`]
    ///
    /// [`RepositoryFactory`]: crate::RepositoryFactory
    #[must_use]
    pub fn new(factory: BoxRepositoryFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl ClientStore for RepositoryConfigStore {
    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>, RepositoryError> {
        let mut repo = self.factory.create().await?;
        let client = repo.client().lookup(client_id).await?;
        repo.cancel().await?;
        Ok(client)
    }
}

#[async_trait]
impl ResourceStore for RepositoryConfigStore {
    async fn find_identity_resources_by_scope(
        &self,
        scopes: &[String],
    ) -> Result<Vec<IdentityResource>, RepositoryError> {
        let mut repo = self.factory.create().await?;
        let resources = repo
            .resource()
            .find_identity_resources_by_scope(scopes)
            .await?;
        repo.cancel().await?;
        Ok(resources)
    }

    async fn find_api_resources_by_scope(
        &self,
        scopes: &[String],
    ) -> Result<Vec<ApiResource>, RepositoryError> {
        let mut repo = self.factory.create().await?;
        let resources = repo.resource().find_api_resources_by_scope(scopes).await?;
        repo.cancel().await?;
        Ok(resources)
    }

    async fn find_api_resources_by_name(
        &self,
        names: &[String],
    ) -> Result<Vec<ApiResource>, RepositoryError> {
        let mut repo = self.factory.create().await?;
        let resources = repo.resource().find_api_resources_by_name(names).await?;
        repo.cancel().await?;
        Ok(resources)
    }

    async fn all_resources(&self) -> Result<Resources, RepositoryError> {
        let mut repo = self.factory.create().await?;
        let resources = repo.resource().all().await?;
        repo.cancel().await?;
        Ok(resources)
    }
}

struct CacheEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// A map whose entries expire after a fixed time-to-live
struct TtlCache<V> {
    ttl: TimeDelta,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    fn new(ttl: TimeDelta) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.value.clone())
    }

    async fn insert(&self, key: String, value: V, now: DateTime<Utc>) {
        let mut entries = self.entries.write().await;
        // Drop what expired while we hold the write lock anyway
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

/// Order-insensitive cache key for a list of names
fn list_key(values: &[String]) -> String {
    let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
    values.sort_unstable();
    values.dedup();
    values.join(" ")
}

/// A [`ClientStore`] which caches the lookups of another one for a fixed
/// duration. Missing clients are cached too.
pub struct CachingClientStore<S> {
    inner: S,
    clock: BoxClock,
    cache: TtlCache<Option<Client>>,
}

impl<S: ClientStore> CachingClientStore<S> {
    /// Wrap a [`ClientStore`], caching its results for `ttl`
    #[must_use]
    pub fn new(inner: S, clock: BoxClock, ttl: TimeDelta) -> Self {
        Self {
            inner,
            clock,
            cache: TtlCache::new(ttl),
        }
    }

    /// Forget everything that was cached
    pub async fn invalidate(&self) {
        self.cache.clear().await;
    }
}

#[async_trait]
impl<S: ClientStore> ClientStore for CachingClientStore<S> {
    #[tracing::instrument(name = "cache.client.find", skip_all, fields(client.id = client_id))]
    async fn find_client_by_id(&self, client_id: &str) -> Result<Option<Client>, RepositoryError> {
        let now = self.clock.now();
        if let Some(client) = self.cache.get(client_id, now).await {
            tracing::trace!("Cache hit");
            return Ok(client);
        }

        let client = self.inner.find_client_by_id(client_id).await?;
        self.cache
            .insert(client_id.to_owned(), client.clone(), now)
            .await;
        Ok(client)
    }
}

/// A [`ResourceStore`] which caches the lookups of another one for a fixed
/// duration
pub struct CachingResourceStore<S> {
    inner: S,
    clock: BoxClock,
    identity_by_scope: TtlCache<Vec<IdentityResource>>,
    api_by_scope: TtlCache<Vec<ApiResource>>,
    api_by_name: TtlCache<Vec<ApiResource>>,
    all: TtlCache<Resources>,
}

impl<S: ResourceStore> CachingResourceStore<S> {
    /// Wrap a [`ResourceStore`], caching its results for `ttl`
    #[must_use]
    pub fn new(inner: S, clock: BoxClock, ttl: TimeDelta) -> Self {
        Self {
            inner,
            clock,
            identity_by_scope: TtlCache::new(ttl),
            api_by_scope: TtlCache::new(ttl),
            api_by_name: TtlCache::new(ttl),
            all: TtlCache::new(ttl),
        }
    }

    /// Forget everything that was cached
    pub async fn invalidate(&self) {
        self.identity_by_scope.clear().await;
        self.api_by_scope.clear().await;
        self.api_by_name.clear().await;
        self.all.clear().await;
    }
}

#[async_trait]
impl<S: ResourceStore> ResourceStore for CachingResourceStore<S> {
    async fn find_identity_resources_by_scope(
        &self,
        scopes: &[String],
    ) -> Result<Vec<IdentityResource>, RepositoryError> {
        let now = self.clock.now();
        let key = list_key(scopes);
        if let Some(resources) = self.identity_by_scope.get(&key, now).await {
            return Ok(resources);
        }

        let resources = self.inner.find_identity_resources_by_scope(scopes).await?;
        self.identity_by_scope
            .insert(key, resources.clone(), now)
            .await;
        Ok(resources)
    }

    async fn find_api_resources_by_scope(
        &self,
        scopes: &[String],
    ) -> Result<Vec<ApiResource>, RepositoryError> {
        let now = self.clock.now();
        let key = list_key(scopes);
        if let Some(resources) = self.api_by_scope.get(&key, now).await {
            return Ok(resources);
        }

        let resources = self.inner.find_api_resources_by_scope(scopes).await?;
        self.api_by_scope.insert(key, resources.clone(), now).await;
        Ok(resources)
    }

    async fn find_api_resources_by_name(
        &self,
        names: &[String],
    ) -> Result<Vec<ApiResource>, RepositoryError> {
        let now = self.clock.now();
        let key = list_key(names);
        if let Some(resources) = self.api_by_name.get(&key, now).await {
            return Ok(resources);
        }

        let resources = self.inner.find_api_resources_by_name(names).await?;
        self.api_by_name.insert(key, resources.clone(), now).await;
        Ok(resources)
    }

    async fn all_resources(&self) -> Result<Resources, RepositoryError> {
        let now = self.clock.now();
        if let Some(resources) = self.all.get("", now).await {
            return Ok(resources);
        }

        let resources = self.inner.all_resources().await?;
        self.all.insert(String::new(), resources.clone(), now).await;
        Ok(resources)
    }
}
