// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{collections::BTreeMap, ops::Deref};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ConfigurationError, ConfigurationSection, util::field_error};

const PATH: &str = "clients";

fn default_true() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_true(value: &bool) -> bool {
    *value
}

/// A client seeded into the store by `config sync`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClientConfig {
    /// The client identifier
    pub client_id: String,

    /// Human readable name of the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,

    /// Disabled clients are stored but never served. Defaults to `true`.
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,

    /// Scopes the client may request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_scopes: Vec<String>,

    /// Origins allowed to call the token endpoint from a browser
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_cors_origins: Vec<String>,

    /// Free-form properties attached to the client
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// List of clients known to the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ClientsConfig(Vec<ClientConfig>);

impl ClientsConfig {
    /// Returns true if all fields are at their default values
    pub(crate) fn is_default(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for ClientsConfig {
    type Target = Vec<ClientConfig>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IntoIterator for ClientsConfig {
    type Item = ClientConfig;
    type IntoIter = std::vec::IntoIter<ClientConfig>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl ConfigurationSection for ClientsConfig {
    const PATH: Option<&'static str> = Some(PATH);

    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        let mut seen = std::collections::HashSet::new();
        for (index, client) in self.0.iter().enumerate() {
            if client.client_id.is_empty() {
                return Err(field_error(
                    figment,
                    PATH,
                    index.to_string(),
                    "`client_id` must not be empty",
                )
                .into());
            }

            if !seen.insert(client.client_id.as_str()) {
                return Err(field_error(
                    figment,
                    PATH,
                    index.to_string(),
                    format!("duplicate client `{}`", client.client_id),
                )
                .into());
            }
        }

        Ok(())
    }
}
