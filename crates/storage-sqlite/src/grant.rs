// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the SQLite implementation of the [`GrantRepository`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sigil_data_model::{Grant, GrantState};
use sigil_storage::{
    Clock, Page, Pagination,
    grant::{GrantFilter, GrantRepository, NewGrant},
};
use sqlx::SqliteConnection;

use crate::{
    DatabaseError, DatabaseInconsistencyError,
    filter::{Filter, StatementExt},
    iden::PersistedGrants,
    pagination::QueryBuilderExt,
    tracing::ExecuteExt,
};

/// An implementation of [`GrantRepository`] for a SQLite connection
pub struct SqliteGrantRepository<'c> {
    conn: &'c mut SqliteConnection,
}

impl<'c> SqliteGrantRepository<'c> {
    /// Create a new [`SqliteGrantRepository`] from an active SQLite connection
    pub fn new(conn: &'c mut SqliteConnection) -> Self {
        Self { conn }
    }
}

const TABLE: &str = "persisted_grants";

/// Timestamps are stored as milliseconds since the UNIX epoch
pub(crate) fn encode_timestamp(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

/// Drop the precision which would not survive a round-trip through the
/// database
fn truncate_timestamp(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(encode_timestamp(timestamp)).unwrap_or(timestamp)
}

#[derive(sqlx::FromRow)]
struct GrantLookup {
    grant_key: String,
    grant_type: String,
    subject_id: Option<String>,
    session_id: Option<String>,
    client_id: String,
    description: Option<String>,
    created_at: i64,
    expires_at: Option<i64>,
    consumed_at: Option<i64>,
    data: String,
}

impl TryFrom<GrantLookup> for Grant {
    type Error = DatabaseInconsistencyError;

    fn try_from(value: GrantLookup) -> Result<Self, Self::Error> {
        let key = value.grant_key;
        let decode = |column: &'static str, millis: i64| {
            DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                DatabaseInconsistencyError::on(TABLE)
                    .column(column)
                    .row(key.clone())
            })
        };

        let created_at = decode("created_at", value.created_at)?;
        let expires_at = value
            .expires_at
            .map(|millis| decode("expires_at", millis))
            .transpose()?;
        let state = match value.consumed_at {
            None => GrantState::Valid,
            Some(millis) => GrantState::Consumed {
                consumed_at: decode("consumed_at", millis)?,
            },
        };

        Ok(Grant {
            key,
            grant_type: value.grant_type.into(),
            subject_id: value.subject_id,
            session_id: value.session_id,
            client_id: value.client_id,
            description: value.description,
            created_at,
            expires_at,
            state,
            data: value.data,
        })
    }
}

impl Filter for GrantFilter<'_> {
    fn generate_condition(&self) -> impl sea_query::IntoCondition {
        sea_query::Condition::all()
            .add_option(
                self.subject()
                    .map(|subject| Expr::col(PersistedGrants::SubjectId).eq(subject)),
            )
            .add_option(
                self.session()
                    .map(|session| Expr::col(PersistedGrants::SessionId).eq(session)),
            )
            .add_option(
                self.client()
                    .map(|client| Expr::col(PersistedGrants::ClientId).eq(client)),
            )
            .add_option(
                self.grant_type()
                    .map(|grant_type| Expr::col(PersistedGrants::GrantType).eq(grant_type.as_str())),
            )
    }
}

/// The expiration predicate, pushed down to the database: consumed, or
/// expired at or before the cutoff
fn eligible_for_removal(cutoff: DateTime<Utc>) -> sea_query::Condition {
    sea_query::Condition::any()
        .add(Expr::col(PersistedGrants::ConsumedAt).is_not_null())
        .add(Expr::col(PersistedGrants::ExpiresAt).lte(encode_timestamp(cutoff)))
}

const SELECT_GRANT: &str = r"
    SELECT grant_key
         , grant_type
         , subject_id
         , session_id
         , client_id
         , description
         , created_at
         , expires_at
         , consumed_at
         , data
    FROM persisted_grants
";

#[async_trait]
impl GrantRepository for SqliteGrantRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.grant.lookup",
        skip_all,
        fields(
            db.query.text,
            grant.key = key,
        ),
        err,
    )]
    async fn lookup(&mut self, key: &str) -> Result<Option<Grant>, Self::Error> {
        let sql = format!("{SELECT_GRANT} WHERE grant_key = ?1");
        let res: Option<GrantLookup> = sqlx::query_as(&sql)
            .bind(key)
            .traced()
            .fetch_optional(&mut *self.conn)
            .await?;

        let Some(res) = res else { return Ok(None) };

        Ok(Some(res.try_into()?))
    }

    #[tracing::instrument(
        name = "db.grant.add",
        skip_all,
        fields(
            db.query.text,
            grant.key = %grant.key,
            grant.type = %grant.grant_type,
            client.id = %grant.client_id,
        ),
        err,
    )]
    async fn add(&mut self, clock: &dyn Clock, grant: NewGrant) -> Result<Grant, Self::Error> {
        let created_at = truncate_timestamp(clock.now());
        let expires_at = grant.expires_at.map(truncate_timestamp);

        let res = sqlx::query(
            r"
                INSERT INTO persisted_grants
                    ( grant_key
                    , grant_type
                    , subject_id
                    , session_id
                    , client_id
                    , description
                    , created_at
                    , expires_at
                    , data
                    )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT (grant_key) DO NOTHING
            ",
        )
        .bind(&grant.key)
        .bind(grant.grant_type.as_str())
        .bind(grant.subject_id.as_deref())
        .bind(grant.session_id.as_deref())
        .bind(&grant.client_id)
        .bind(grant.description.as_deref())
        .bind(encode_timestamp(created_at))
        .bind(expires_at.map(encode_timestamp))
        .bind(&grant.data)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        if res.rows_affected() == 0 {
            return Err(DatabaseError::Conflict {
                table: TABLE,
                key: grant.key,
            });
        }

        Ok(Grant {
            key: grant.key,
            grant_type: grant.grant_type,
            subject_id: grant.subject_id,
            session_id: grant.session_id,
            client_id: grant.client_id,
            description: grant.description,
            created_at,
            expires_at,
            state: GrantState::Valid,
            data: grant.data,
        })
    }

    #[tracing::instrument(
        name = "db.grant.upsert",
        skip_all,
        fields(
            db.query.text,
            grant.key = %grant.key,
        ),
        err,
    )]
    async fn upsert(&mut self, grant: Grant) -> Result<Grant, Self::Error> {
        let res = sqlx::query(
            r"
                INSERT INTO persisted_grants
                    ( grant_key
                    , grant_type
                    , subject_id
                    , session_id
                    , client_id
                    , description
                    , created_at
                    , expires_at
                    , consumed_at
                    , data
                    )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT (grant_key) DO UPDATE
                SET grant_type = excluded.grant_type
                  , subject_id = excluded.subject_id
                  , session_id = excluded.session_id
                  , client_id = excluded.client_id
                  , description = excluded.description
                  , created_at = excluded.created_at
                  , expires_at = excluded.expires_at
                  , consumed_at = excluded.consumed_at
                  , data = excluded.data
                WHERE persisted_grants.consumed_at IS NULL
            ",
        )
        .bind(&grant.key)
        .bind(grant.grant_type.as_str())
        .bind(grant.subject_id.as_deref())
        .bind(grant.session_id.as_deref())
        .bind(&grant.client_id)
        .bind(grant.description.as_deref())
        .bind(encode_timestamp(grant.created_at))
        .bind(grant.expires_at.map(encode_timestamp))
        .bind(grant.consumed_at().map(encode_timestamp))
        .bind(&grant.data)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        // The stored grant was consumed, and consumed grants are frozen
        if res.rows_affected() == 0 {
            return Err(DatabaseError::invalid_operation());
        }

        Ok(grant)
    }

    #[tracing::instrument(
        name = "db.grant.update",
        skip_all,
        fields(
            db.query.text,
            grant.key = %grant.key,
        ),
        err,
    )]
    async fn update(&mut self, grant: Grant) -> Result<Grant, Self::Error> {
        // Consumed grants are frozen, and consumption goes through `consume`
        if grant.is_consumed() {
            return Err(DatabaseError::invalid_operation());
        }

        let res = sqlx::query(
            r"
                UPDATE persisted_grants
                SET subject_id = ?2
                  , session_id = ?3
                  , description = ?4
                  , expires_at = ?5
                  , data = ?6
                WHERE grant_key = ?1
                  AND consumed_at IS NULL
            ",
        )
        .bind(&grant.key)
        .bind(grant.subject_id.as_deref())
        .bind(grant.session_id.as_deref())
        .bind(grant.description.as_deref())
        .bind(grant.expires_at.map(encode_timestamp))
        .bind(&grant.data)
        .traced()
        .execute(&mut *self.conn)
        .await?;

        if res.rows_affected() == 0 {
            // Tell apart a missing grant from one which got consumed meanwhile
            let exists: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM persisted_grants WHERE grant_key = ?1)",
            )
            .bind(&grant.key)
            .fetch_one(&mut *self.conn)
            .await?;

            if exists != 0 {
                return Err(DatabaseError::invalid_operation());
            }

            return Err(DatabaseError::NotFound {
                table: TABLE,
                key: grant.key,
            });
        }

        DatabaseError::ensure_affected_rows(&res, 1)?;

        Ok(grant)
    }

    #[tracing::instrument(
        name = "db.grant.consume",
        skip_all,
        fields(
            db.query.text,
            grant.key = %grant.key,
        ),
        err,
    )]
    async fn consume(&mut self, clock: &dyn Clock, grant: Grant) -> Result<Grant, Self::Error> {
        let consumed_at = truncate_timestamp(clock.now());

        let res = sqlx::query(
            r"
                UPDATE persisted_grants
                SET consumed_at = ?2
                WHERE grant_key = ?1
                  AND consumed_at IS NULL
            ",
        )
        .bind(&grant.key)
        .bind(encode_timestamp(consumed_at))
        .traced()
        .execute(&mut *self.conn)
        .await?;

        // A grant which was consumed concurrently is as good as gone
        if res.rows_affected() == 0 {
            return Err(DatabaseError::NotFound {
                table: TABLE,
                key: grant.key,
            });
        }

        DatabaseError::ensure_affected_rows(&res, 1)?;

        grant
            .consume(consumed_at)
            .map_err(DatabaseError::to_invalid_operation)
    }

    #[tracing::instrument(
        name = "db.grant.list",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn list(
        &mut self,
        filter: GrantFilter<'_>,
        pagination: Pagination,
    ) -> Result<Page<Grant>, Self::Error> {
        let (sql, arguments) = Query::select()
            .columns([
                PersistedGrants::GrantKey,
                PersistedGrants::GrantType,
                PersistedGrants::SubjectId,
                PersistedGrants::SessionId,
                PersistedGrants::ClientId,
                PersistedGrants::Description,
                PersistedGrants::CreatedAt,
                PersistedGrants::ExpiresAt,
                PersistedGrants::ConsumedAt,
                PersistedGrants::Data,
            ])
            .from(PersistedGrants::Table)
            .apply_filter(filter)
            .generate_pagination(PersistedGrants::GrantKey, &pagination)
            .build_sqlx(SqliteQueryBuilder);

        let edges: Vec<GrantLookup> = sqlx::query_as_with(&sql, arguments)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        let edges = edges
            .into_iter()
            .map(Grant::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(pagination.process(edges))
    }

    #[tracing::instrument(
        name = "db.grant.count",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn count(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error> {
        let (sql, arguments) = Query::select()
            .expr(Expr::col(PersistedGrants::GrantKey).count())
            .from(PersistedGrants::Table)
            .apply_filter(filter)
            .build_sqlx(SqliteQueryBuilder);

        let count: i64 = sqlx::query_scalar_with(&sql, arguments)
            .traced()
            .fetch_one(&mut *self.conn)
            .await?;

        count
            .try_into()
            .map_err(DatabaseError::to_invalid_operation)
    }

    #[tracing::instrument(
        name = "db.grant.remove",
        skip_all,
        fields(
            db.query.text,
            grant.key = key,
        ),
        err,
    )]
    async fn remove(&mut self, key: &str) -> Result<bool, Self::Error> {
        let res = sqlx::query("DELETE FROM persisted_grants WHERE grant_key = ?1")
            .bind(key)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        Ok(res.rows_affected() > 0)
    }

    #[tracing::instrument(
        name = "db.grant.remove_many",
        skip_all,
        fields(
            db.query.text,
            grant.count = keys.len(),
        ),
        err,
    )]
    async fn remove_many(&mut self, keys: &[String]) -> Result<usize, Self::Error> {
        if keys.is_empty() {
            return Ok(0);
        }

        let (sql, arguments) = Query::delete()
            .from_table(PersistedGrants::Table)
            .and_where(Expr::col(PersistedGrants::GrantKey).is_in(keys.iter().map(String::as_str)))
            .build_sqlx(SqliteQueryBuilder);

        let res = sqlx::query_with(&sql, arguments)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        res.rows_affected()
            .try_into()
            .map_err(DatabaseError::to_invalid_operation)
    }

    #[tracing::instrument(
        name = "db.grant.remove_expired",
        skip_all,
        fields(
            db.query.text,
            grant.count = keys.len(),
        ),
        err,
    )]
    async fn remove_expired(
        &mut self,
        keys: &[String],
        cutoff: DateTime<Utc>,
    ) -> Result<usize, Self::Error> {
        if keys.is_empty() {
            return Ok(0);
        }

        // Re-check eligibility, the grants may have been refreshed since
        let (sql, arguments) = Query::delete()
            .from_table(PersistedGrants::Table)
            .cond_where(
                sea_query::Condition::all()
                    .add(
                        Expr::col(PersistedGrants::GrantKey)
                            .is_in(keys.iter().map(String::as_str)),
                    )
                    .add(eligible_for_removal(cutoff)),
            )
            .build_sqlx(SqliteQueryBuilder);

        let res = sqlx::query_with(&sql, arguments)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        res.rows_affected()
            .try_into()
            .map_err(DatabaseError::to_invalid_operation)
    }

    #[tracing::instrument(
        name = "db.grant.remove_by_filter",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn remove_by_filter(&mut self, filter: GrantFilter<'_>) -> Result<usize, Self::Error> {
        // An empty filter would wipe the whole table
        if filter.is_empty() {
            return Err(DatabaseError::invalid_operation());
        }

        let (sql, arguments) = Query::delete()
            .from_table(PersistedGrants::Table)
            .apply_filter(filter)
            .build_sqlx(SqliteQueryBuilder);

        let res = sqlx::query_with(&sql, arguments)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        res.rows_affected()
            .try_into()
            .map_err(DatabaseError::to_invalid_operation)
    }

    #[tracing::instrument(
        name = "db.grant.count_expired",
        skip_all,
        fields(
            db.query.text,
        ),
        err,
    )]
    async fn count_expired(&mut self, cutoff: DateTime<Utc>) -> Result<usize, Self::Error> {
        let (sql, arguments) = Query::select()
            .expr(Expr::col(PersistedGrants::GrantKey).count())
            .from(PersistedGrants::Table)
            .cond_where(eligible_for_removal(cutoff))
            .build_sqlx(SqliteQueryBuilder);

        let count: i64 = sqlx::query_scalar_with(&sql, arguments)
            .traced()
            .fetch_one(&mut *self.conn)
            .await?;

        count
            .try_into()
            .map_err(DatabaseError::to_invalid_operation)
    }

    #[tracing::instrument(
        name = "db.grant.select_expired_keys",
        skip_all,
        fields(
            db.query.text,
            batch.size = limit,
        ),
        err,
    )]
    async fn select_expired_keys(
        &mut self,
        cutoff: DateTime<Utc>,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<String>, Self::Error> {
        let mut query = Query::select();
        query
            .column(PersistedGrants::GrantKey)
            .from(PersistedGrants::Table)
            .cond_where(eligible_for_removal(cutoff));

        if let Some(after) = after {
            query.and_where(Expr::col(PersistedGrants::GrantKey).gt(after));
        }

        let (sql, arguments) = query
            .order_by(PersistedGrants::GrantKey, sea_query::Order::Asc)
            .limit(limit as u64)
            .build_sqlx(SqliteQueryBuilder);

        let keys: Vec<String> = sqlx::query_scalar_with(&sql, arguments)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        Ok(keys)
    }
}
