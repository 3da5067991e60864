// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! Utilities to synchronize the configuration file with the database.

use std::collections::BTreeSet;

use sigil_config::{
    ApiResourceConfig, ClientConfig, ClientsConfig, IdentityResourceConfig, ResourcesConfig,
};
use sigil_data_model::{ApiResource, Client, IdentityResource};
use sigil_storage::{
    BoxRepository, RepositoryAccess, RepositoryError, RepositoryTransaction,
    cache::ResourceStore,
};
use tracing::{info, info_span, warn};

fn map_client(config: ClientConfig) -> Client {
    Client {
        client_id: config.client_id,
        client_name: config.client_name,
        enabled: config.enabled,
        allowed_scopes: config.allowed_scopes,
        allowed_cors_origins: config.allowed_cors_origins,
        properties: config.properties,
    }
}

fn map_identity_resource(config: IdentityResourceConfig) -> IdentityResource {
    IdentityResource {
        name: config.name,
        display_name: config.display_name,
        description: config.description,
        enabled: config.enabled,
        user_claims: config.user_claims,
    }
}

fn map_api_resource(config: ApiResourceConfig) -> ApiResource {
    ApiResource {
        name: config.name,
        display_name: config.display_name,
        description: config.description,
        enabled: config.enabled,
        scopes: config.scopes,
        user_claims: config.user_claims,
    }
}

/// What a sync did, or would have done on a dry run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub clients_added: usize,
    pub clients_updated: usize,
    pub clients_removed: usize,
    pub resources_upserted: usize,
    pub resources_removed: usize,
}

/// Upsert the clients and resources from the config into the repository.
///
/// Entries in the database which are absent from the config are removed when
/// `prune` is set, and only reported otherwise. On a dry run the transaction
/// is rolled back.
#[tracing::instrument(name = "config.sync", skip_all)]
pub async fn config_sync(
    clients_config: ClientsConfig,
    resources_config: ResourcesConfig,
    mut repo: BoxRepository,
    prune: bool,
    dry_run: bool,
) -> Result<SyncReport, RepositoryError> {
    let mut report = SyncReport::default();

    info!(
        prune,
        dry_run, "Syncing clients and resources defined in config to database"
    );

    {
        let _span = info_span!("cli.config.sync.clients").entered();
        let existing_ids: BTreeSet<String> = repo
            .client()
            .all()
            .await?
            .into_iter()
            .map(|client| client.client_id)
            .collect();

        let config_ids: BTreeSet<String> = clients_config
            .iter()
            .map(|client| client.client_id.clone())
            .collect();

        for client in clients_config {
            if existing_ids.contains(&client.client_id) {
                info!(client.id = %client.client_id, "Updating client");
                report.clients_updated += 1;
            } else {
                info!(client.id = %client.client_id, "Adding client");
                report.clients_added += 1;
            }

            repo.client().upsert(map_client(client)).await?;
        }

        for client_id in existing_ids.difference(&config_ids) {
            if prune {
                info!(client.id = %client_id, "Removing client");
                repo.client().remove(client_id).await?;
                report.clients_removed += 1;
            } else {
                warn!(
                    client.id = %client_id,
                    "Client is in the database but not in the config, run with --prune to remove it"
                );
            }
        }
    }

    {
        let _span = info_span!("cli.config.sync.resources").entered();
        let existing = repo.resource().all().await?;

        let identity_names: BTreeSet<&str> = resources_config
            .identity_resources
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        let api_names: BTreeSet<&str> = resources_config
            .api_resources
            .iter()
            .map(|r| r.name.as_str())
            .collect();

        let stale_identity: Vec<String> = existing
            .identity_resources
            .into_iter()
            .filter(|r| !identity_names.contains(r.name.as_str()))
            .map(|r| r.name)
            .collect();
        let stale_api: Vec<String> = existing
            .api_resources
            .into_iter()
            .filter(|r| !api_names.contains(r.name.as_str()))
            .map(|r| r.name)
            .collect();

        for resource in resources_config.identity_resources {
            repo.resource()
                .upsert_identity_resource(map_identity_resource(resource))
                .await?;
            report.resources_upserted += 1;
        }

        for resource in resources_config.api_resources {
            repo.resource()
                .upsert_api_resource(map_api_resource(resource))
                .await?;
            report.resources_upserted += 1;
        }

        if prune {
            for name in &stale_identity {
                info!(resource.name = %name, "Removing identity resource");
                repo.resource().remove_identity_resource(name).await?;
                report.resources_removed += 1;
            }

            for name in &stale_api {
                info!(resource.name = %name, "Removing API resource");
                repo.resource().remove_api_resource(name).await?;
                report.resources_removed += 1;
            }
        } else if !stale_identity.is_empty() || !stale_api.is_empty() {
            warn!(
                identity_resources = ?stale_identity,
                api_resources = ?stale_api,
                "Resources are in the database but not in the config, run with --prune to remove them"
            );
        }
    }

    if dry_run {
        info!("Dry run, rolling back changes");
        repo.cancel().await?;
    } else {
        repo.save().await?;
    }

    Ok(report)
}

/// Warn about enabled clients requesting scopes that no enabled resource
/// exposes. Returns the number of such scopes.
pub async fn check_client_scopes(
    clients: &ClientsConfig,
    resources: &dyn ResourceStore,
) -> Result<usize, RepositoryError> {
    let mut unknown = 0;
    for client in clients.iter().filter(|client| client.enabled) {
        let identity = resources
            .find_identity_resources_by_scope(&client.allowed_scopes)
            .await?;
        let api = resources
            .find_api_resources_by_scope(&client.allowed_scopes)
            .await?;

        let known: BTreeSet<&str> = identity
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.name.as_str())
            .chain(
                api.iter()
                    .filter(|r| r.enabled)
                    .flat_map(|r| r.scopes.iter().map(String::as_str)),
            )
            .collect();

        for scope in &client.allowed_scopes {
            if !known.contains(scope.as_str()) {
                warn!(
                    client.id = %client.client_id,
                    %scope,
                    "Client is allowed a scope which no enabled resource exposes"
                );
                unknown += 1;
            }
        }
    }

    Ok(unknown)
}
