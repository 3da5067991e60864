// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use figment::Figment;
use sigil_config::{ConfigurationSectionExt, DatabaseConfig};
use sigil_storage_sqlite::MIGRATOR;
use tracing::{Instrument, info_span};

use crate::util::database_pool_from_config;

#[derive(Parser, Debug)]
pub(super) struct Options {
    #[command(subcommand)]
    subcommand: Subcommand,
}

#[derive(Parser, Debug)]
enum Subcommand {
    /// Run database migrations
    Migrate,
}

impl Options {
    pub async fn run(self, figment: &Figment) -> anyhow::Result<ExitCode> {
        let Subcommand::Migrate = self.subcommand;

        let span = info_span!("cli.database.migrate");
        let config =
            DatabaseConfig::extract_or_default(figment).map_err(anyhow::Error::from_boxed)?;
        let pool = database_pool_from_config(&config)
            .instrument(span.clone())
            .await?;

        // Run pending migrations
        MIGRATOR
            .run(&pool)
            .instrument(span)
            .await
            .context("could not run migrations")?;

        pool.close().await;

        Ok(ExitCode::SUCCESS)
    }
}
