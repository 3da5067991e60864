// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{process::ExitCode, sync::Arc};

use anyhow::Context;
use clap::Parser;
use figment::Figment;
use sigil_config::{AppConfig, ConfigurationSection};
use sigil_storage::{BoxClock, SystemClock};
use sigil_storage_sqlite::{MIGRATOR, SqliteRepositoryFactory};
use sigil_tasks::{CleanupHost, GrantSweeper};
use tracing::{Instrument, info, info_span, warn};

use crate::{
    shutdown::ShutdownManager,
    util::{cleanup_settings_from_config, database_pool_from_config, resource_store_from_config},
};

#[derive(Parser, Debug, Default)]
pub(super) struct Options {
    /// Apply pending database migrations before starting
    #[arg(long)]
    migrate: bool,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let shutdown = ShutdownManager::new()?;
        let span = info_span!("cli.worker.init").entered();
        let config = AppConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
        let settings = cleanup_settings_from_config(&config.cleanup)?;

        // Connect to the database
        info!("Connecting to the database");
        let pool = database_pool_from_config(&config.database).await?;

        if self.migrate {
            info!("Running pending migrations");
            MIGRATOR
                .run(&pool)
                .instrument(info_span!("db.migrate"))
                .await
                .context("could not run migrations")?;
        }

        let clock: BoxClock = Arc::new(SystemClock::default());
        let factory = SqliteRepositoryFactory::new(pool);

        // Make sure the resources can be read before starting
        let resource_store = resource_store_from_config(&config.cache, &factory, &clock)?;
        let resources = resource_store
            .all_resources()
            .await
            .context("could not load resources")?;
        if resources.is_empty() {
            warn!("No resources defined, run `config sync` to seed them");
        } else {
            info!(
                identity_resources = resources.identity_resources.len(),
                api_resources = resources.api_resources.len(),
                "Loaded resources"
            );
        }

        drop(config);

        let sweeper = GrantSweeper::new(factory.boxed(), clock, &settings);
        let mut host = CleanupHost::new(sweeper, &settings);
        let stats = host.stats();
        host.start(&shutdown.cancellation_token(), shutdown.task_tracker());
        span.exit();

        shutdown.run().await;
        if host.is_running() {
            warn!("Grant cleanup did not stop in time");
        } else {
            host.stop().await;
        }

        info!(
            ticks = stats.ticks(),
            failed_ticks = stats.failed_ticks(),
            removed = stats.removed(),
            "Worker stopped"
        );

        Ok(ExitCode::SUCCESS)
    }
}
