// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the SQLite implementation of the
//! [`ResourceRepository`]

use std::collections::BTreeMap;

use async_trait::async_trait;
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sigil_data_model::{ApiResource, IdentityResource, Resources};
use sigil_storage::resource::ResourceRepository;
use sqlx::SqliteConnection;

use crate::{
    DatabaseError, DatabaseInconsistencyError,
    client::decode_json,
    iden::{ApiResourceScopes, ApiResources, IdentityResources},
    tracing::ExecuteExt,
};

/// An implementation of [`ResourceRepository`] for a SQLite connection
pub struct SqliteResourceRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqliteResourceRepository<'c> {
    /// Create a new [`SqliteResourceRepository`] from an active SQLite
    /// connection
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }
}

#[derive(sqlx::FromRow)]
struct IdentityResourceLookup {
    name: String,
    display_name: Option<String>,
    description: Option<String>,
    enabled: i64,
    user_claims: String,
}

impl TryFrom<IdentityResourceLookup> for IdentityResource {
    type Error = DatabaseInconsistencyError;

    fn try_from(value: IdentityResourceLookup) -> Result<Self, Self::Error> {
        let user_claims = decode_json(
            "identity_resources",
            "user_claims",
            &value.name,
            &value.user_claims,
        )?;

        Ok(IdentityResource {
            name: value.name,
            display_name: value.display_name,
            description: value.description,
            enabled: value.enabled != 0,
            user_claims,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ApiResourceLookup {
    name: String,
    display_name: Option<String>,
    description: Option<String>,
    enabled: i64,
    user_claims: String,
}

#[derive(sqlx::FromRow)]
struct ApiResourceScopeLookup {
    api_resource_name: String,
    scope: String,
}

fn identity_resource_query() -> sea_query::SelectStatement {
    Query::select()
        .columns([
            IdentityResources::Name,
            IdentityResources::DisplayName,
            IdentityResources::Description,
            IdentityResources::Enabled,
            IdentityResources::UserClaims,
        ])
        .from(IdentityResources::Table)
        .order_by(IdentityResources::Name, Order::Asc)
        .to_owned()
}

impl SqliteResourceRepository<'_> {
    /// Load the API resources matching the given condition, along with their
    /// scopes
    async fn load_api_resources(
        &mut self,
        condition: Option<sea_query::SimpleExpr>,
    ) -> Result<Vec<ApiResource>, DatabaseError> {
        let mut query = Query::select();
        query
            .columns([
                ApiResources::Name,
                ApiResources::DisplayName,
                ApiResources::Description,
                ApiResources::Enabled,
                ApiResources::UserClaims,
            ])
            .from(ApiResources::Table)
            .order_by(ApiResources::Name, Order::Asc);
        if let Some(condition) = condition {
            query.and_where(condition);
        }
        let (sql, arguments) = query.build_sqlx(SqliteQueryBuilder);

        let resources: Vec<ApiResourceLookup> = sqlx::query_as_with(&sql, arguments)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        if resources.is_empty() {
            return Ok(Vec::new());
        }

        let (sql, arguments) = Query::select()
            .columns([ApiResourceScopes::ApiResourceName, ApiResourceScopes::Scope])
            .from(ApiResourceScopes::Table)
            .and_where(
                Expr::col(ApiResourceScopes::ApiResourceName)
                    .is_in(resources.iter().map(|r| r.name.as_str())),
            )
            .order_by(ApiResourceScopes::Scope, Order::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let scope_rows: Vec<ApiResourceScopeLookup> = sqlx::query_as_with(&sql, arguments)
            .fetch_all(&mut *self.conn)
            .await?;

        let mut scopes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in scope_rows {
            scopes
                .entry(row.api_resource_name)
                .or_default()
                .push(row.scope);
        }

        resources
            .into_iter()
            .map(|value| {
                let user_claims =
                    decode_json("api_resources", "user_claims", &value.name, &value.user_claims)?;
                let scopes = scopes.remove(&value.name).unwrap_or_default();
                Ok(ApiResource {
                    name: value.name,
                    display_name: value.display_name,
                    description: value.description,
                    enabled: value.enabled != 0,
                    scopes,
                    user_claims,
                })
            })
            .collect::<Result<Vec<_>, DatabaseInconsistencyError>>()
            .map_err(DatabaseError::from)
    }
}

#[async_trait]
impl ResourceRepository for SqliteResourceRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.resource.upsert_identity_resource",
        skip_all,
        fields(
            db.query.text,
            resource.name = %resource.name,
        ),
        err,
    )]
    async fn upsert_identity_resource(
        &mut self,
        resource: IdentityResource,
    ) -> Result<IdentityResource, Self::Error> {
        let user_claims = serde_json::to_string(&resource.user_claims)
            .map_err(DatabaseError::to_invalid_operation)?;

        sqlx::query(
            r"
                INSERT INTO identity_resources
                    (name, display_name, description, enabled, user_claims)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (name) DO UPDATE
                SET display_name = excluded.display_name
                  , description = excluded.description
                  , enabled = excluded.enabled
                  , user_claims = excluded.user_claims
            ",
        )
        .bind(&resource.name)
        .bind(resource.display_name.as_deref())
        .bind(resource.description.as_deref())
        .bind(i64::from(resource.enabled))
        .bind(user_claims)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        Ok(resource)
    }

    #[tracing::instrument(
        name = "db.resource.upsert_api_resource",
        skip_all,
        fields(
            db.query.text,
            resource.name = %resource.name,
        ),
        err,
    )]
    async fn upsert_api_resource(
        &mut self,
        resource: ApiResource,
    ) -> Result<ApiResource, Self::Error> {
        let user_claims = serde_json::to_string(&resource.user_claims)
            .map_err(DatabaseError::to_invalid_operation)?;

        sqlx::query(
            r"
                INSERT INTO api_resources
                    (name, display_name, description, enabled, user_claims)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT (name) DO UPDATE
                SET display_name = excluded.display_name
                  , description = excluded.description
                  , enabled = excluded.enabled
                  , user_claims = excluded.user_claims
            ",
        )
        .bind(&resource.name)
        .bind(resource.display_name.as_deref())
        .bind(resource.description.as_deref())
        .bind(i64::from(resource.enabled))
        .bind(user_claims)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        // Replace the scopes wholesale
        sqlx::query("DELETE FROM api_resource_scopes WHERE api_resource_name = ?1")
            .bind(&resource.name)
            .execute(&mut *self.conn)
            .await?;

        for scope in &resource.scopes {
            sqlx::query(
                r"
                    INSERT INTO api_resource_scopes (api_resource_name, scope)
                    VALUES (?1, ?2)
                    ON CONFLICT DO NOTHING
                ",
            )
            .bind(&resource.name)
            .bind(scope)
            .execute(&mut *self.conn)
            .await?;
        }

        Ok(resource)
    }

    #[tracing::instrument(
        name = "db.resource.find_identity_resources_by_scope",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn find_identity_resources_by_scope(
        &mut self,
        scopes: &[String],
    ) -> Result<Vec<IdentityResource>, Self::Error> {
        if scopes.is_empty() {
            return Ok(Vec::new());
        }

        let (sql, arguments) = identity_resource_query()
            .and_where(Expr::col(IdentityResources::Name).is_in(scopes.iter().map(String::as_str)))
            .build_sqlx(SqliteQueryBuilder);

        let res: Vec<IdentityResourceLookup> = sqlx::query_as_with(&sql, arguments)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        let resources = res
            .into_iter()
            .map(IdentityResource::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(resources)
    }

    #[tracing::instrument(
        name = "db.resource.find_api_resources_by_scope",
        skip_all,
        err,
    )]
    async fn find_api_resources_by_scope(
        &mut self,
        scopes: &[String],
    ) -> Result<Vec<ApiResource>, Self::Error> {
        if scopes.is_empty() {
            return Ok(Vec::new());
        }

        let names = Query::select()
            .distinct()
            .column(ApiResourceScopes::ApiResourceName)
            .from(ApiResourceScopes::Table)
            .and_where(Expr::col(ApiResourceScopes::Scope).is_in(scopes.iter().map(String::as_str)))
            .to_owned();

        self.load_api_resources(Some(Expr::col(ApiResources::Name).in_subquery(names)))
            .await
    }

    #[tracing::instrument(
        name = "db.resource.find_api_resources_by_name",
        skip_all,
        err,
    )]
    async fn find_api_resources_by_name(
        &mut self,
        names: &[String],
    ) -> Result<Vec<ApiResource>, Self::Error> {
        if names.is_empty() {
            return Ok(Vec::new());
        }

        self.load_api_resources(Some(
            Expr::col(ApiResources::Name).is_in(names.iter().map(String::as_str)),
        ))
        .await
    }

    #[tracing::instrument(
        name = "db.resource.all",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn all(&mut self) -> Result<Resources, Self::Error> {
        let (sql, arguments) = identity_resource_query().build_sqlx(SqliteQueryBuilder);

        let res: Vec<IdentityResourceLookup> = sqlx::query_as_with(&sql, arguments)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        let identity_resources = res
            .into_iter()
            .map(IdentityResource::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let api_resources = self.load_api_resources(None).await?;

        Ok(Resources {
            identity_resources,
            api_resources,
        })
    }

    #[tracing::instrument(
        name = "db.resource.remove_identity_resource",
        skip_all,
        fields(
            db.query.text,
            resource.name = name,
        ),
        err,
    )]
    async fn remove_identity_resource(&mut self, name: &str) -> Result<bool, Self::Error> {
        let res = sqlx::query("DELETE FROM identity_resources WHERE name = ?1")
            .bind(name)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        Ok(res.rows_affected() > 0)
    }

    #[tracing::instrument(
        name = "db.resource.remove_api_resource",
        skip_all,
        fields(
            db.query.text,
            resource.name = name,
        ),
        err,
    )]
    async fn remove_api_resource(&mut self, name: &str) -> Result<bool, Self::Error> {
        sqlx::query("DELETE FROM api_resource_scopes WHERE api_resource_name = ?1")
            .bind(name)
            .execute(&mut *self.conn)
            .await?;

        let res = sqlx::query("DELETE FROM api_resources WHERE name = ?1")
            .bind(name)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        Ok(res.rows_affected() > 0)
    }
}
