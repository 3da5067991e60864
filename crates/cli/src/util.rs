// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::TimeDelta;
use sigil_config::{CacheConfig, CleanupConfig, DatabaseConfig};
use sigil_storage::{
    BoxClock,
    cache::{CachingResourceStore, RepositoryConfigStore, ResourceStore},
};
use sigil_storage_sqlite::SqliteRepositoryFactory;
use sigil_tasks::CleanupSettings;
use sqlx::{
    ConnectOptions, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use tracing::log::LevelFilter;

fn database_connect_options_from_config(
    config: &DatabaseConfig,
) -> Result<SqliteConnectOptions, anyhow::Error> {
    let options: SqliteConnectOptions = config
        .uri
        .parse()
        .context("could not parse database connection string")?;

    let options = options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(config.busy_timeout)
        .log_statements(LevelFilter::Debug)
        .log_slow_statements(LevelFilter::Warn, Duration::from_millis(100));

    Ok(options)
}

/// Open a connection pool to the database, creating the file if needed
pub async fn database_pool_from_config(
    config: &DatabaseConfig,
) -> Result<SqlitePool, anyhow::Error> {
    let options = database_connect_options_from_config(config)?;
    SqlitePoolOptions::new()
        .max_connections(config.max_connections.into())
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .max_lifetime(config.max_lifetime)
        .connect_with(options)
        .await
        .context("could not connect to the database")
}

pub fn cleanup_settings_from_config(
    config: &CleanupConfig,
) -> Result<CleanupSettings, anyhow::Error> {
    CleanupSettings::new(
        config.enabled,
        config.interval,
        config.batch_size,
        config.max_iterations_per_tick,
    )
    .context("invalid cleanup configuration")
}

/// Build the resource store, wrapped in a cache if enabled
pub fn resource_store_from_config(
    config: &CacheConfig,
    factory: &SqliteRepositoryFactory,
    clock: &BoxClock,
) -> Result<Arc<dyn ResourceStore>, anyhow::Error> {
    let store = RepositoryConfigStore::new(factory.clone().boxed());

    if !config.enabled {
        return Ok(Arc::new(store));
    }

    let ttl = TimeDelta::from_std(config.ttl).context("cache TTL is out of range")?;
    tracing::info!(ttl.seconds = config.ttl.as_secs(), "Caching resource lookups");
    Ok(Arc::new(CachingResourceStore::new(
        store,
        Arc::clone(clock),
        ttl,
    )))
}

#[cfg(test)]
mod tests {
    use sigil_storage::SystemClock;
    use sigil_storage_sqlite::MIGRATOR;

    use super::*;

    fn database_config(dir: &tempfile::TempDir) -> DatabaseConfig {
        DatabaseConfig {
            uri: format!("sqlite://{}/grants.db", dir.path().display()),
            ..DatabaseConfig::default()
        }
    }

    #[tokio::test]
    async fn test_pool_creates_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = database_config(&dir);

        let pool = database_pool_from_config(&config).await.unwrap();
        MIGRATOR.run(&pool).await.unwrap();
        assert!(dir.path().join("grants.db").exists());

        let clock: BoxClock = Arc::new(SystemClock::default());
        let factory = SqliteRepositoryFactory::new(pool);
        for enabled in [false, true] {
            let cache = CacheConfig {
                enabled,
                ..CacheConfig::default()
            };
            let store = resource_store_from_config(&cache, &factory, &clock).unwrap();
            let resources = store.all_resources().await.unwrap();
            assert!(resources.is_empty());
        }
    }

    #[tokio::test]
    async fn test_missing_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig {
            uri: format!("sqlite://{}/missing/grants.db", dir.path().display()),
            connect_timeout: Duration::from_secs(1),
            ..DatabaseConfig::default()
        };
        assert!(database_pool_from_config(&config).await.is_err());
    }

    #[test]
    fn test_cleanup_settings() {
        let config = CleanupConfig {
            enabled: true,
            batch_size: 250,
            ..CleanupConfig::default()
        };
        let settings = cleanup_settings_from_config(&config).unwrap();
        assert!(settings.enabled());
        assert_eq!(settings.batch_size(), 250);
        assert_eq!(settings.interval(), Duration::from_secs(60));

        let config = CleanupConfig {
            batch_size: 0,
            ..CleanupConfig::default()
        };
        assert!(cleanup_settings_from_config(&config).is_err());

        // The config and the sweeper agree on the largest batch
        let config = CleanupConfig {
            batch_size: sigil_config::MAX_CLEANUP_BATCH_SIZE,
            ..CleanupConfig::default()
        };
        let settings = cleanup_settings_from_config(&config).unwrap();
        assert_eq!(settings.batch_size(), sigil_tasks::MAX_BATCH_SIZE);

        let config = CleanupConfig {
            batch_size: sigil_config::MAX_CLEANUP_BATCH_SIZE + 1,
            ..CleanupConfig::default()
        };
        assert!(cleanup_settings_from_config(&config).is_err());
    }
}
