// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{ConfigurationError, ConfigurationSection, util::field_error};

const PATH: &str = "resources";

fn default_true() -> bool {
    true
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_true(value: &bool) -> bool {
    *value
}

/// A set of user claims requested through an OpenID scope of the same name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IdentityResourceConfig {
    /// The scope name, for example `openid` or `profile`
    pub name: String,

    /// Name shown to users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Longer description shown to users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Defaults to `true`
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,

    /// Claims included when this scope is granted
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_claims: Vec<String>,
}

/// A protected API and the scopes giving access to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ApiResourceConfig {
    /// Unique name of the API
    pub name: String,

    /// Name shown to users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// Longer description shown to users
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Defaults to `true`
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub enabled: bool,

    /// Scopes giving access to this API
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Claims included in access tokens for this API
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_claims: Vec<String>,
}

/// Identity and API resources seeded into the store by `config sync`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ResourcesConfig {
    /// Identity resources, one per OpenID scope
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identity_resources: Vec<IdentityResourceConfig>,

    /// API resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_resources: Vec<ApiResourceConfig>,
}

impl ResourcesConfig {
    pub(crate) fn is_default(&self) -> bool {
        self.identity_resources.is_empty() && self.api_resources.is_empty()
    }
}

fn check_names<'a>(
    figment: &figment::Figment,
    field: &str,
    names: impl Iterator<Item = &'a str>,
) -> Result<(), figment::Error> {
    let mut seen = HashSet::new();
    for (index, name) in names.enumerate() {
        if name.is_empty() {
            return Err(field_error(
                figment,
                PATH,
                format!("{field}.{index}"),
                "`name` must not be empty",
            ));
        }

        if !seen.insert(name) {
            return Err(field_error(
                figment,
                PATH,
                format!("{field}.{index}"),
                format!("duplicate resource `{name}`"),
            ));
        }
    }

    Ok(())
}

impl ConfigurationSection for ResourcesConfig {
    const PATH: Option<&'static str> = Some(PATH);

    fn validate(&self, figment: &figment::Figment) -> Result<(), ConfigurationError> {
        check_names(
            figment,
            "identity_resources",
            self.identity_resources.iter().map(|r| r.name.as_str()),
        )?;
        check_names(
            figment,
            "api_resources",
            self.api_resources.iter().map(|r| r.name.as_str()),
        )?;

        Ok(())
    }
}
