// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use figment::Figment;
use sigil_config::{AppConfig, ConfigurationSection};
use sigil_storage::{
    BoxClock, Clock, RepositoryAccess, RepositoryFactory, RepositoryTransaction, SystemClock,
};
use sigil_storage_sqlite::SqliteRepositoryFactory;
use sigil_tasks::GrantSweeper;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use crate::util::{cleanup_settings_from_config, database_pool_from_config};

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Count the grants which are eligible for removal right now
    Count,

    /// Run a single cleanup tick, regardless of whether the periodic cleanup
    /// is enabled
    Run,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let config = AppConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
        let settings = cleanup_settings_from_config(&config.cleanup)?;
        let pool = database_pool_from_config(&config.database).await?;
        let factory = SqliteRepositoryFactory::new(pool);
        let clock: BoxClock = Arc::new(SystemClock::default());

        match self.subcommand {
            Subcommand::Count => {
                let _span = info_span!("cli.cleanup.count").entered();
                let mut repo = factory.create().await?;
                let count = repo.grant().count_expired(clock.now()).await?;
                repo.cancel().await?;

                info!(count, "Grants eligible for removal");
                println!("{count}");
            }

            Subcommand::Run => {
                let _span = info_span!("cli.cleanup.run").entered();

                let cancellation_token = CancellationToken::new();
                let interrupt = cancellation_token.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        warn!("Interrupted, stopping after the current step");
                        interrupt.cancel();
                    }
                });

                let mut sweeper = GrantSweeper::new(factory.boxed(), clock, &settings);
                let report = sweeper.tick(&cancellation_token).await;
                sweeper.stop();

                println!("{}", report.removed);
                if report.outcome.is_failure() {
                    return Ok(ExitCode::FAILURE);
                }
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}
