// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::{ConfigurationError, ConfigurationSection, util::field_error};

const PATH: &str = "cache";

fn default_ttl() -> Duration {
    Duration::from_secs(5 * 60)
}

/// In-memory cache in front of client and resource lookups
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CacheConfig {
    /// Whether lookups are cached. Defaults to `false`.
    #[serde(default)]
    pub enabled: bool,

    /// How long an entry stays in the cache, in seconds. Defaults to 5
    /// minutes.
    #[schemars(with = "u64", range(min = 1))]
    #[serde(default = "default_ttl")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: default_ttl(),
        }
    }
}

impl CacheConfig {
    pub(crate) fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

impl ConfigurationSection for CacheConfig {
    const PATH: Option<&'static str> = Some(PATH);

    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        if self.ttl.is_zero() {
            return Err(field_error(figment, PATH, "ttl", "must be at least one second").into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use figment::{
        Figment,
        providers::{Format, Yaml},
    };

    use super::*;

    #[test]
    fn load_config() {
        let figment = Figment::new().merge(Yaml::string("cache: { enabled: true }"));
        let config = CacheConfig::extract(&figment).unwrap();
        assert!(config.enabled);
        assert_eq!(config.ttl, Duration::from_secs(300));

        let figment = Figment::new().merge(Yaml::string("cache: { ttl: 0 }"));
        assert!(CacheConfig::extract(&figment).is_err());
    }
}
