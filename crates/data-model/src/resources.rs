// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use serde::{Deserialize, Serialize};

/// A set of user claims which can be requested as an OpenID scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityResource {
    /// The scope name, for example `openid` or `profile`
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub enabled: bool,
    pub user_claims: Vec<String>,
}

/// A protected API, reachable through one or more scopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResource {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub enabled: bool,
    pub scopes: Vec<String>,
    pub user_claims: Vec<String>,
}

/// All the resources known to the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resources {
    pub identity_resources: Vec<IdentityResource>,
    pub api_resources: Vec<ApiResource>,
}

impl Resources {
    /// Whether there are no resources at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.identity_resources.is_empty() && self.api_resources.is_empty()
    }

    /// Iterate over every scope name exposed by the enabled resources
    pub fn scope_names(&self) -> impl Iterator<Item = &str> {
        let identity = self
            .identity_resources
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.name.as_str());
        let api = self
            .api_resources
            .iter()
            .filter(|r| r.enabled)
            .flat_map(|r| r.scopes.iter().map(String::as_str));
        identity.chain(api)
    }
}
