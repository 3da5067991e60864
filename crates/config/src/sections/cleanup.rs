// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
pub use sigil_data_model::MAX_CLEANUP_BATCH_SIZE;

use crate::{ConfigurationError, ConfigurationSection, util::field_error};

const PATH: &str = "cleanup";

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_batch_size() -> usize {
    100
}

fn default_max_iterations_per_tick() -> usize {
    100
}

/// Configuration of the periodic removal of expired and consumed grants
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CleanupConfig {
    /// Whether expired and consumed grants get removed in the background.
    /// Defaults to `false`.
    #[serde(default)]
    pub enabled: bool,

    /// Time between two cleanup ticks, in seconds. Defaults to 60 seconds.
    #[schemars(with = "u64", range(min = 1))]
    #[serde(default = "default_interval")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub interval: Duration,

    /// Number of grants selected and deleted at once. Defaults to 100.
    #[schemars(range(min = 1, max = 10_000))]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How many batches a single tick may remove before waiting for the next
    /// tick. Defaults to 100.
    #[schemars(range(min = 1))]
    #[serde(default = "default_max_iterations_per_tick")]
    pub max_iterations_per_tick: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_interval(),
            batch_size: default_batch_size(),
            max_iterations_per_tick: default_max_iterations_per_tick(),
        }
    }
}

impl CleanupConfig {
    pub(crate) fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

impl ConfigurationSection for CleanupConfig {
    const PATH: Option<&'static str> = Some(PATH);

    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        if self.interval.is_zero() {
            return Err(field_error(figment, PATH, "interval", "must be at least one second").into());
        }

        if self.batch_size == 0 || self.batch_size > MAX_CLEANUP_BATCH_SIZE {
            return Err(field_error(
                figment,
                PATH,
                "batch_size",
                format!("must be between 1 and {MAX_CLEANUP_BATCH_SIZE}"),
            )
            .into());
        }

        if self.max_iterations_per_tick == 0 {
            return Err(field_error(
                figment,
                PATH,
                "max_iterations_per_tick",
                "must be greater than zero",
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment, Jail,
        providers::{Format, Yaml},
    };

    use super::*;
    use crate::ConfigurationSectionExt;

    #[test]
    fn load_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r"
                    cleanup:
                      enabled: true
                      interval: 300
                ",
            )?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = CleanupConfig::extract(&figment).unwrap();

            assert!(config.enabled);
            assert_eq!(config.interval, Duration::from_secs(300));
            assert_eq!(config.batch_size, 100);
            assert_eq!(config.max_iterations_per_tick, 100);

            Ok(())
        });
    }

    #[test]
    fn missing_section_is_disabled() {
        Jail::expect_with(|jail| {
            jail.create_file("config.yaml", "database: {}")?;

            let figment = Figment::new().merge(Yaml::file("config.yaml"));
            let config = CleanupConfig::extract_or_default(&figment).unwrap();
            assert!(!config.enabled);
            assert!(config.is_default());

            Ok(())
        });
    }

    #[test]
    fn reject_invalid_values() {
        for (yaml, field) in [
            ("cleanup: { interval: 0 }", "interval"),
            ("cleanup: { batch_size: 0 }", "batch_size"),
            ("cleanup: { batch_size: 10001 }", "batch_size"),
            ("cleanup: { max_iterations_per_tick: 0 }", "max_iterations_per_tick"),
        ] {
            let figment = Figment::new().merge(Yaml::string(yaml));
            let error = CleanupConfig::extract(&figment).unwrap_err();
            let error = error.downcast::<figment::Error>().unwrap();
            assert_eq!(error.path, ["cleanup", field], "for {yaml}");
        }

        let figment = Figment::new().merge(Yaml::string("cleanup: { batch_size: 10000 }"));
        assert!(CleanupConfig::extract(&figment).is_ok());
    }
}
