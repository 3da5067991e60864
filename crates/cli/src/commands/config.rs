// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use figment::Figment;
use sigil_config::{ConfigurationSection, RootConfig, SyncConfig};
use sigil_storage::{RepositoryFactory, cache::RepositoryConfigStore};
use sigil_storage_sqlite::{MIGRATOR, SqliteRepositoryFactory};
use tokio::io::AsyncWriteExt;
use tracing::{Instrument, info, info_span};

use crate::util::database_pool_from_config;

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Dump the current config as YAML
    Dump {
        /// The path to the config file to dump
        ///
        /// If not specified, the config will be written to stdout
        #[clap(short, long)]
        output: Option<Utf8PathBuf>,
    },

    /// Check a config file
    Check,

    /// Sync the clients and resources from the config file to the database
    Sync {
        /// Prune elements that are in the database but not in the config file
        /// anymore
        #[clap(long)]
        prune: bool,

        /// Do not actually write to the database
        #[clap(long)]
        dry_run: bool,
    },
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        use Subcommand as SC;
        match self.subcommand {
            SC::Dump { output } => {
                let _span = info_span!("cli.config.dump").entered();

                let config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
                let config = serde_yaml::to_string(&config)?;

                if let Some(output) = output {
                    info!("Writing configuration to {output:?}");
                    let mut file = tokio::fs::File::create(output).await?;
                    file.write_all(config.as_bytes()).await?;
                } else {
                    info!("Writing configuration to standard output");
                    tokio::io::stdout().write_all(config.as_bytes()).await?;
                }
            }

            SC::Check => {
                let _span = info_span!("cli.config.check").entered();

                let _config = RootConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;
                info!("Configuration file looks good");
            }

            SC::Sync { prune, dry_run } => {
                let config = SyncConfig::extract(figment).map_err(anyhow::Error::from_boxed)?;

                let pool = database_pool_from_config(&config.database).await?;
                MIGRATOR
                    .run(&pool)
                    .instrument(info_span!("db.migrate"))
                    .await
                    .context("could not run migrations")?;

                let factory = SqliteRepositoryFactory::new(pool);
                let clients = config.clients.clone();
                let repo = factory.create().await?;
                let report =
                    crate::sync::config_sync(config.clients, config.resources, repo, prune, dry_run)
                        .await?;
                info!(?report, "Configuration synced");

                if !dry_run {
                    let store = RepositoryConfigStore::new(factory.boxed());
                    crate::sync::check_client_scopes(&clients, &store).await?;
                }
            }
        }

        Ok(ExitCode::SUCCESS)
    }
}
