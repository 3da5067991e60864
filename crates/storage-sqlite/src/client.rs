// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the SQLite implementation of the [`ClientRepository`]

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sigil_data_model::Client;
use sigil_storage::client::ClientRepository;
use sqlx::SqliteConnection;

use crate::{DatabaseError, DatabaseInconsistencyError, tracing::ExecuteExt};

/// An implementation of [`ClientRepository`] for a SQLite connection
pub struct SqliteClientRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqliteClientRepository<'c> {
    /// Create a new [`SqliteClientRepository`] from an active SQLite connection
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }
}

/// Decode a JSON-encoded list or map column
pub(crate) fn decode_json<T: DeserializeOwned>(
    table: &'static str,
    column: &'static str,
    row: &str,
    value: &str,
) -> Result<T, DatabaseInconsistencyError> {
    serde_json::from_str(value).map_err(|e| {
        DatabaseInconsistencyError::on(table)
            .column(column)
            .row(row)
            .source(e)
    })
}

#[derive(sqlx::FromRow)]
struct ClientLookup {
    client_id: String,
    client_name: Option<String>,
    enabled: i64,
    allowed_scopes: String,
    allowed_cors_origins: String,
    properties: String,
}

impl TryFrom<ClientLookup> for Client {
    type Error = DatabaseInconsistencyError;

    fn try_from(value: ClientLookup) -> Result<Self, Self::Error> {
        let id = value.client_id.as_str();
        let allowed_scopes: Vec<String> =
            decode_json("clients", "allowed_scopes", id, &value.allowed_scopes)?;
        let allowed_cors_origins: Vec<String> = decode_json(
            "clients",
            "allowed_cors_origins",
            id,
            &value.allowed_cors_origins,
        )?;
        let properties: BTreeMap<String, String> =
            decode_json("clients", "properties", id, &value.properties)?;

        Ok(Client {
            client_id: value.client_id,
            client_name: value.client_name,
            enabled: value.enabled != 0,
            allowed_scopes,
            allowed_cors_origins,
            properties,
        })
    }
}

#[async_trait]
impl ClientRepository for SqliteClientRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.client.lookup",
        skip_all,
        fields(
            db.query.text,
            client.id = client_id,
        ),
        err,
    )]
    async fn lookup(&mut self, client_id: &str) -> Result<Option<Client>, Self::Error> {
        let res: Option<ClientLookup> = sqlx::query_as(
            r"
                SELECT client_id
                     , client_name
                     , enabled
                     , allowed_scopes
                     , allowed_cors_origins
                     , properties
                FROM clients
                WHERE client_id = ?1
            ",
        )
        .bind(client_id)
        .traced()
        .fetch_optional(&mut *self.conn)
        .await?;

        let Some(res) = res else { return Ok(None) };

        Ok(Some(res.try_into()?))
    }

    #[tracing::instrument(
        name = "db.client.upsert",
        skip_all,
        fields(
            db.query.text,
            client.id = %client.client_id,
        ),
        err,
    )]
    async fn upsert(&mut self, client: Client) -> Result<Client, Self::Error> {
        let allowed_scopes = serde_json::to_string(&client.allowed_scopes)
            .map_err(DatabaseError::to_invalid_operation)?;
        let allowed_cors_origins = serde_json::to_string(&client.allowed_cors_origins)
            .map_err(DatabaseError::to_invalid_operation)?;
        let properties = serde_json::to_string(&client.properties)
            .map_err(DatabaseError::to_invalid_operation)?;

        sqlx::query(
            r"
                INSERT INTO clients
                    ( client_id
                    , client_name
                    , enabled
                    , allowed_scopes
                    , allowed_cors_origins
                    , properties
                    )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT (client_id) DO UPDATE
                SET client_name = excluded.client_name
                  , enabled = excluded.enabled
                  , allowed_scopes = excluded.allowed_scopes
                  , allowed_cors_origins = excluded.allowed_cors_origins
                  , properties = excluded.properties
            ",
        )
        .bind(&client.client_id)
        .bind(client.client_name.as_deref())
        .bind(i64::from(client.enabled))
        .bind(allowed_scopes)
        .bind(allowed_cors_origins)
        .bind(properties)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(client)
    }

    #[tracing::instrument(
        name = "db.client.all",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn all(&mut self) -> Result<Vec<Client>, Self::Error> {
        let res: Vec<ClientLookup> = sqlx::query_as(
            r"
                SELECT client_id
                     , client_name
                     , enabled
                     , allowed_scopes
                     , allowed_cors_origins
                     , properties
                FROM clients
                ORDER BY client_id
            ",
        )
        .traced()
        .fetch_all(&mut *self.conn)
        .await?;

        let clients = res
            .into_iter()
            .map(Client::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(clients)
    }

    #[tracing::instrument(
        name = "db.client.remove",
        skip_all,
        fields(
            db.query.text,
            client.id = client_id,
        ),
        err,
    )]
    async fn remove(&mut self, client_id: &str) -> Result<bool, Self::Error> {
        let res = sqlx::query("DELETE FROM clients WHERE client_id = ?1")
            .bind(client_id)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        Ok(res.rows_affected() > 0)
    }
}
