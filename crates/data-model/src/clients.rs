// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Client identifier
    pub client_id: String,

    /// Name of the Client to be presented to the End-User
    pub client_name: Option<String>,

    /// Disabled clients are kept in the store but must not be served
    pub enabled: bool,

    /// Scopes this client is allowed to request
    pub allowed_scopes: Vec<String>,

    /// Origins allowed to call the token endpoint from a browser
    pub allowed_cors_origins: Vec<String>,

    /// Free-form key/value pairs attached to the client
    pub properties: BTreeMap<String, String>,
}

impl Client {
    /// Whether the client may request the given scope
    #[must_use]
    pub fn allows_scope(&self, scope: &str) -> bool {
        self.allowed_scopes.iter().any(|s| s == scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_scope() {
        let client = Client {
            client_id: "web".to_owned(),
            client_name: None,
            enabled: true,
            allowed_scopes: vec!["openid".to_owned(), "api1".to_owned()],
            allowed_cors_origins: Vec::new(),
            properties: BTreeMap::new(),
        };

        assert!(client.allows_scope("openid"));
        assert!(client.allows_scope("api1"));
        assert!(!client.allows_scope("api2"));
    }
}
