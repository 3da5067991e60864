// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{num::NonZeroU32, time::Duration};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{ConfigurationError, ConfigurationSection, util::field_error};

const PATH: &str = "database";

fn default_uri() -> String {
    "sqlite://sigil.db".to_owned()
}

fn default_max_connections() -> NonZeroU32 {
    NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

#[allow(clippy::unnecessary_wraps)]
fn default_idle_timeout() -> Option<Duration> {
    Some(Duration::from_secs(10 * 60))
}

#[allow(clippy::unnecessary_wraps)]
fn default_max_lifetime() -> Option<Duration> {
    Some(Duration::from_secs(30 * 60))
}

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            max_connections: default_max_connections(),
            min_connections: Default::default(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            max_lifetime: default_max_lifetime(),
            busy_timeout: default_busy_timeout(),
        }
    }
}

/// Database connection configuration
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseConfig {
    /// Connection URI of the SQLite database. The file is created if it does
    /// not exist.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Set the maximum number of connections the pool should maintain
    #[schemars(with = "u32", range(min = 1))]
    #[serde(default = "default_max_connections")]
    pub max_connections: NonZeroU32,

    /// Set the minimum number of connections the pool should maintain
    #[serde(default)]
    pub min_connections: u32,

    /// Set the amount of time to attempt connecting to the database
    #[schemars(with = "u64")]
    #[serde(default = "default_connect_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub connect_timeout: Duration,

    /// Set a maximum idle duration for individual connections
    #[schemars(with = "Option<u64>")]
    #[serde(
        default = "default_idle_timeout",
        skip_serializing_if = "Option::is_none"
    )]
    #[serde_as(as = "Option<serde_with::DurationSeconds<u64>>")]
    pub idle_timeout: Option<Duration>,

    /// Set the maximum lifetime of individual connections
    #[schemars(with = "Option<u64>")]
    #[serde(
        default = "default_max_lifetime",
        skip_serializing_if = "Option::is_none"
    )]
    #[serde_as(as = "Option<serde_with::DurationSeconds<u64>>")]
    pub max_lifetime: Option<Duration>,

    /// How long a connection waits on a locked database before giving up.
    /// Contention between the cleanup sweeper and writers surfaces as a
    /// transient error past this delay.
    #[schemars(with = "u64")]
    #[serde(default = "default_busy_timeout")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub busy_timeout: Duration,
}

impl ConfigurationSection for DatabaseConfig {
    const PATH: Option<&'static str> = Some(PATH);

    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        if !self.uri.starts_with("sqlite:") {
            return Err(field_error(figment, PATH, "uri", "must be a `sqlite:` URI").into());
        }

        if self.min_connections > self.max_connections.get() {
            return Err(field_error(
                figment,
                PATH,
                "min_connections",
                "must not be greater than `max_connections`",
            )
            .into());
        }

        Ok(())
    }
}
