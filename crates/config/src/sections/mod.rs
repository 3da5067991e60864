// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod cache;
mod cleanup;
mod clients;
mod database;
mod resources;

pub use self::{
    cache::CacheConfig,
    cleanup::{CleanupConfig, MAX_CLEANUP_BATCH_SIZE},
    clients::{ClientConfig, ClientsConfig},
    database::DatabaseConfig,
    resources::{ApiResourceConfig, IdentityResourceConfig, ResourcesConfig},
};
use crate::util::{ConfigurationError, ConfigurationSection};

/// Application configuration root
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RootConfig {
    /// Database connection configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Periodic removal of expired and consumed grants
    #[serde(default, skip_serializing_if = "CleanupConfig::is_default")]
    pub cleanup: CleanupConfig,

    /// Clients seeded by `config sync`
    #[serde(default, skip_serializing_if = "ClientsConfig::is_default")]
    pub clients: ClientsConfig,

    /// Identity and API resources seeded by `config sync`
    #[serde(default, skip_serializing_if = "ResourcesConfig::is_default")]
    pub resources: ResourcesConfig,

    /// Cache in front of client and resource lookups
    #[serde(default, skip_serializing_if = "CacheConfig::is_default")]
    pub cache: CacheConfig,
}

impl ConfigurationSection for RootConfig {
    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        self.database.validate(figment)?;
        self.cleanup.validate(figment)?;
        self.clients.validate(figment)?;
        self.resources.validate(figment)?;
        self.cache.validate(figment)?;

        Ok(())
    }
}

/// Partial configuration used by the worker
#[allow(missing_docs)]
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cleanup: CleanupConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl ConfigurationSection for AppConfig {
    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        self.database.validate(figment)?;
        self.cleanup.validate(figment)?;
        self.cache.validate(figment)?;

        Ok(())
    }
}

/// Partial config used by the `sigil config sync` command
#[allow(missing_docs)]
#[derive(Debug, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub clients: ClientsConfig,

    #[serde(default)]
    pub resources: ResourcesConfig,
}

impl ConfigurationSection for SyncConfig {
    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        self.database.validate(figment)?;
        self.clients.validate(figment)?;
        self.resources.validate(figment)?;

        Ok(())
    }
}
