// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::collections::BTreeMap;

use assert_matches::assert_matches;
use chrono::{DateTime, TimeDelta, Utc};
use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaChaRng;
use sigil_data_model::{ApiResource, Client, GrantType, IdentityResource};
use sigil_storage::{
    Clock, Pagination, RepositoryAccess, RepositoryErrorKind, RepositoryTransaction,
    cache::{ClientStore, RepositoryConfigStore, ResourceStore},
    clock::MockClock,
    grant::{GrantFilter, NewGrant},
    guard::{ConsumeOutcome, consume_grant, find_valid_grant},
};
use sqlx::SqlitePool;

use crate::{SqliteRepository, SqliteRepositoryFactory};

fn new_grant(key: &str, expires_at: Option<DateTime<Utc>>) -> NewGrant {
    NewGrant {
        key: key.to_owned(),
        grant_type: GrantType::RefreshToken,
        subject_id: Some("alice".to_owned()),
        session_id: Some("session-1".to_owned()),
        client_id: "web".to_owned(),
        description: None,
        expires_at,
        data: r#"{"scopes":["openid"]}"#.to_owned(),
    }
}

/// Test adding, looking up and updating a grant
#[sqlx::test(migrator = "crate::MIGRATOR")]
async fn test_grant_repo(pool: SqlitePool) {
    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    let clock = MockClock::default();
    let expires_at = clock.now() + TimeDelta::hours(1);

    assert_eq!(repo.grant().lookup("a").await.unwrap(), None);

    let grant = repo
        .grant()
        .add(&clock, new_grant("a", Some(expires_at)))
        .await
        .unwrap();
    assert_eq!(grant.key, "a");
    assert_eq!(grant.created_at, clock.now());
    assert!(grant.is_valid());

    let looked_up = repo.grant().lookup("a").await.unwrap().unwrap();
    assert_eq!(looked_up, grant);

    // Adding it again is a conflict
    let err = repo
        .grant()
        .add(&clock, new_grant("a", None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::Conflict);

    // Update the payload and push the expiration back
    let mut updated = looked_up.clone();
    updated.data = "{}".to_owned();
    updated.expires_at = Some(expires_at + TimeDelta::hours(1));
    let updated = repo.grant().update(updated).await.unwrap();

    let looked_up = repo.grant().lookup("a").await.unwrap().unwrap();
    assert_eq!(looked_up, updated);
    assert_eq!(looked_up.data, "{}");

    // Updating a grant which does not exist fails
    let mut missing = updated.clone();
    missing.key = "missing".to_owned();
    let err = repo.grant().update(missing).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);

    // Unknown grant types survive a round-trip
    let mut other = new_grant("b", None);
    other.grant_type = GrantType::Other("ciba".to_owned());
    repo.grant().add(&clock, other).await.unwrap();
    let other = repo.grant().lookup("b").await.unwrap().unwrap();
    assert_eq!(other.grant_type, GrantType::Other("ciba".to_owned()));
    assert_eq!(other.expires_at, None);

    repo.save().await.unwrap();
}

/// Test the consumption of grants
#[sqlx::test(migrator = "crate::MIGRATOR")]
async fn test_consume_grant(pool: SqlitePool) {
    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    let clock = MockClock::default();

    let grant = repo
        .grant()
        .add(&clock, new_grant("code", None))
        .await
        .unwrap();

    clock.advance(TimeDelta::seconds(10));
    let consumed = repo.grant().consume(&clock, grant.clone()).await.unwrap();
    assert_eq!(consumed.consumed_at(), Some(clock.now()));

    let looked_up = repo.grant().lookup("code").await.unwrap().unwrap();
    assert!(looked_up.is_consumed());
    assert_eq!(looked_up.consumed_at(), Some(clock.now()));

    // Consuming it twice is like consuming a grant which is gone
    let err = repo.grant().consume(&clock, grant).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::NotFound);

    // Consumed grants can't be updated anymore
    let err = repo.grant().update(looked_up.clone()).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::InvalidOperation);

    // Even when the in-memory copy is stale
    let mut stale = looked_up;
    stale.state = sigil_data_model::GrantState::Valid;
    let err = repo.grant().update(stale).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::InvalidOperation);

    // Upserting over it does not bring it back either
    let mut fresh = repo.grant().lookup("code").await.unwrap().unwrap();
    fresh.state = sigil_data_model::GrantState::Valid;
    fresh.expires_at = Some(clock.now() + TimeDelta::hours(1));
    let err = repo.grant().upsert(fresh).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::InvalidOperation);
    let looked_up = repo.grant().lookup("code").await.unwrap().unwrap();
    assert!(looked_up.is_consumed());
    assert_eq!(looked_up.expires_at, None);

    repo.save().await.unwrap();
}

/// Test listing, counting and removing grants by filter
#[sqlx::test(migrator = "crate::MIGRATOR")]
async fn test_grant_filters(pool: SqlitePool) {
    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    let clock = MockClock::default();

    for i in 0..10 {
        let mut grant = new_grant(&format!("grant-{i:02}"), None);
        if i % 2 == 0 {
            grant.subject_id = Some("bob".to_owned());
            grant.session_id = Some("session-2".to_owned());
        }
        if i % 5 == 0 {
            grant.grant_type = GrantType::UserConsent;
        }
        repo.grant().add(&clock, grant).await.unwrap();
    }

    let all = GrantFilter::new();
    let bob = all.for_subject("bob");
    let consent = GrantType::UserConsent;
    let bob_consent = bob.with_type(&consent);
    let unknown_client = all.for_client("unknown");

    assert_eq!(repo.grant().count(all).await.unwrap(), 10);
    assert_eq!(repo.grant().count(bob).await.unwrap(), 5);
    assert_eq!(repo.grant().count(bob_consent).await.unwrap(), 1);
    assert_eq!(repo.grant().count(unknown_client).await.unwrap(), 0);

    // Paginate over everything, three by three
    let page = repo
        .grant()
        .list(all, Pagination::first(3))
        .await
        .unwrap();
    assert!(page.has_next_page);
    let keys: Vec<_> = page.edges.iter().map(|e| e.node.key.as_str()).collect();
    assert_eq!(keys, ["grant-00", "grant-01", "grant-02"]);

    let cursor = page.end_cursor().unwrap().clone();
    let page = repo
        .grant()
        .list(all, Pagination::first(3).after(cursor))
        .await
        .unwrap();
    let keys: Vec<_> = page.edges.iter().map(|e| e.node.key.as_str()).collect();
    assert_eq!(keys, ["grant-03", "grant-04", "grant-05"]);

    let page = repo
        .grant()
        .list(bob, Pagination::last(2))
        .await
        .unwrap();
    assert!(page.has_previous_page);
    let keys: Vec<_> = page.edges.iter().map(|e| e.node.key.as_str()).collect();
    assert_eq!(keys, ["grant-06", "grant-08"]);

    // Removing with an empty filter is refused
    let err = repo.grant().remove_by_filter(all).await.unwrap_err();
    assert_eq!(err.kind(), RepositoryErrorKind::InvalidOperation);
    assert_eq!(repo.grant().count(all).await.unwrap(), 10);

    let session = all.for_subject("bob").for_session("session-2");
    assert_eq!(repo.grant().remove_by_filter(session).await.unwrap(), 5);
    assert_eq!(repo.grant().count(all).await.unwrap(), 5);
    assert_eq!(repo.grant().count(bob).await.unwrap(), 0);

    repo.save().await.unwrap();
}

/// Test that removing grants is idempotent and reports what it did
#[sqlx::test(migrator = "crate::MIGRATOR")]
async fn test_remove_grants(pool: SqlitePool) {
    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    let clock = MockClock::default();

    for key in ["a", "b", "c", "d"] {
        repo.grant().add(&clock, new_grant(key, None)).await.unwrap();
    }

    assert!(repo.grant().remove("a").await.unwrap());
    assert!(!repo.grant().remove("a").await.unwrap());
    assert!(!repo.grant().remove("never-existed").await.unwrap());

    // Keys which are already gone are not counted
    let keys = ["a", "b", "c", "x"].map(str::to_owned);
    assert_eq!(repo.grant().remove_many(&keys).await.unwrap(), 2);
    assert_eq!(repo.grant().remove_many(&keys).await.unwrap(), 0);
    assert_eq!(repo.grant().remove_many(&[]).await.unwrap(), 0);

    assert!(repo.grant().lookup("d").await.unwrap().is_some());
    assert_eq!(repo.grant().count(GrantFilter::new()).await.unwrap(), 1);

    // Removing expired grants leaves alone those which are not eligible
    repo.grant()
        .add(&clock, new_grant("expired", Some(clock.now())))
        .await
        .unwrap();
    repo.grant()
        .add(&clock, new_grant("live", Some(clock.now() + TimeDelta::hours(1))))
        .await
        .unwrap();
    let keys = ["d", "expired", "live"].map(str::to_owned);
    assert_eq!(
        repo.grant().remove_expired(&keys, clock.now()).await.unwrap(),
        1
    );
    assert!(repo.grant().lookup("d").await.unwrap().is_some());
    assert!(repo.grant().lookup("live").await.unwrap().is_some());
    assert!(repo.grant().lookup("expired").await.unwrap().is_none());
    assert_eq!(repo.grant().remove_expired(&[], clock.now()).await.unwrap(), 0);

    repo.save().await.unwrap();
}

/// Test the expiration predicate as evaluated by the database
#[sqlx::test(migrator = "crate::MIGRATOR")]
async fn test_expired_selection(pool: SqlitePool) {
    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    let clock = MockClock::default();
    let now = clock.now();

    repo.grant()
        .add(&clock, new_grant("a", Some(now - TimeDelta::minutes(5))))
        .await
        .unwrap();
    repo.grant()
        .add(&clock, new_grant("b", Some(now + TimeDelta::minutes(5))))
        .await
        .unwrap();
    let c = repo.grant().add(&clock, new_grant("c", None)).await.unwrap();
    repo.grant()
        .add(&clock, new_grant("d", Some(now)))
        .await
        .unwrap();
    let e = repo
        .grant()
        .add(&clock, new_grant("e", Some(now + TimeDelta::days(30))))
        .await
        .unwrap();

    // Consumed grants are eligible whatever their expiration
    repo.grant().consume(&clock, c).await.unwrap();
    repo.grant().consume(&clock, e).await.unwrap();

    // Expiring exactly at the cutoff counts as expired
    let keys = repo
        .grant()
        .select_expired_keys(now, None, 100)
        .await
        .unwrap();
    assert_eq!(keys, ["a", "c", "d", "e"]);
    assert_eq!(repo.grant().count_expired(now).await.unwrap(), 4);

    let before = now - TimeDelta::milliseconds(1);
    let keys = repo
        .grant()
        .select_expired_keys(before, None, 100)
        .await
        .unwrap();
    assert_eq!(keys, ["a", "c", "e"]);

    let later = now + TimeDelta::minutes(5);
    assert_eq!(repo.grant().count_expired(later).await.unwrap(), 5);

    // Honours the limit and the cursor
    let keys = repo
        .grant()
        .select_expired_keys(now, None, 2)
        .await
        .unwrap();
    assert_eq!(keys, ["a", "c"]);
    let keys = repo
        .grant()
        .select_expired_keys(now, Some("c"), 2)
        .await
        .unwrap();
    assert_eq!(keys, ["d", "e"]);
    let keys = repo
        .grant()
        .select_expired_keys(now, Some("e"), 2)
        .await
        .unwrap();
    assert!(keys.is_empty());

    repo.save().await.unwrap();
}

/// Walking the expired keys with a cursor visits each of them exactly once
#[sqlx::test(migrator = "crate::MIGRATOR")]
async fn test_expired_keys_cursor(pool: SqlitePool) {
    let mut rng = ChaChaRng::seed_from_u64(42);
    let clock = MockClock::default();
    let now = clock.now();

    let mut indices: Vec<usize> = (0..300).collect();
    indices.shuffle(&mut rng);

    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    for i in indices {
        // One in six grants is still valid
        let expires_at = if i % 6 == 0 {
            now + TimeDelta::hours(1)
        } else {
            now - TimeDelta::hours(1)
        };
        repo.grant()
            .add(&clock, new_grant(&format!("grant-{i:04}"), Some(expires_at)))
            .await
            .unwrap();
    }
    repo.save().await.unwrap();

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
        let keys = repo
            .grant()
            .select_expired_keys(now, cursor.as_deref(), 100)
            .await
            .unwrap();
        repo.cancel().await.unwrap();

        let Some(last) = keys.last() else { break };
        cursor = Some(last.clone());
        seen.extend(keys);
    }

    assert_eq!(seen.len(), 250);
    let mut deduped = seen.clone();
    deduped.sort();
    deduped.dedup();
    assert_eq!(deduped, seen);
}

/// Test the guard helpers used by the redemption paths
#[sqlx::test(migrator = "crate::MIGRATOR")]
async fn test_consume_guard(pool: SqlitePool) {
    let clock = MockClock::default();
    let now = clock.now();

    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    repo.grant()
        .add(&clock, new_grant("valid", Some(now + TimeDelta::minutes(5))))
        .await
        .unwrap();
    repo.grant()
        .add(&clock, new_grant("expired", Some(now - TimeDelta::minutes(5))))
        .await
        .unwrap();
    repo.grant()
        .add(&clock, new_grant("swept", None))
        .await
        .unwrap();
    repo.save().await.unwrap();

    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();

    // Expired grants are invisible to the guard, even before they are swept
    assert!(
        find_valid_grant(&mut *repo, &clock, "expired")
            .await
            .unwrap()
            .is_none()
    );
    assert_matches!(
        consume_grant(&mut *repo, &clock, "expired").await,
        Ok(ConsumeOutcome::AlreadyGone)
    );
    assert_matches!(
        consume_grant(&mut *repo, &clock, "missing").await,
        Ok(ConsumeOutcome::AlreadyGone)
    );

    let outcome = consume_grant(&mut *repo, &clock, "valid").await.unwrap();
    let grant = outcome.into_grant().unwrap();
    assert!(grant.is_consumed());

    // A second redemption finds it consumed
    assert_matches!(
        consume_grant(&mut *repo, &clock, "valid").await,
        Ok(ConsumeOutcome::AlreadyGone)
    );
    repo.save().await.unwrap();

    // Simulate the sweeper deleting a grant between the read and the write
    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    let grant = find_valid_grant(&mut *repo, &clock, "swept")
        .await
        .unwrap()
        .unwrap();
    repo.cancel().await.unwrap();

    let mut sweeper = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    assert_eq!(
        sweeper
            .grant()
            .remove_many(&["swept".to_owned()])
            .await
            .unwrap(),
        1
    );
    sweeper.save().await.unwrap();

    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    let err = repo.grant().consume(&clock, grant).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(!err.is_transient());
    repo.cancel().await.unwrap();
}

fn sample_client() -> Client {
    Client {
        client_id: "web".to_owned(),
        client_name: Some("Web application".to_owned()),
        enabled: true,
        allowed_scopes: vec!["openid".to_owned(), "api1".to_owned()],
        allowed_cors_origins: vec!["https://app.example.com".to_owned()],
        properties: BTreeMap::from([("tier".to_owned(), "gold".to_owned())]),
    }
}

/// Test the client repository
#[sqlx::test(migrator = "crate::MIGRATOR")]
async fn test_client_repo(pool: SqlitePool) {
    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();

    assert_eq!(repo.client().lookup("web").await.unwrap(), None);

    let client = repo.client().upsert(sample_client()).await.unwrap();
    assert_eq!(repo.client().lookup("web").await.unwrap(), Some(client));

    let mut disabled = sample_client();
    disabled.enabled = false;
    disabled.properties.clear();
    repo.client().upsert(disabled.clone()).await.unwrap();
    assert_eq!(
        repo.client().lookup("web").await.unwrap(),
        Some(disabled.clone())
    );

    let mut mobile = sample_client();
    mobile.client_id = "mobile".to_owned();
    mobile.client_name = None;
    repo.client().upsert(mobile.clone()).await.unwrap();

    assert_eq!(repo.client().all().await.unwrap(), [mobile, disabled]);

    assert!(repo.client().remove("web").await.unwrap());
    assert!(!repo.client().remove("web").await.unwrap());
    assert_eq!(repo.client().all().await.unwrap().len(), 1);

    repo.save().await.unwrap();
}

fn sample_resources() -> (IdentityResource, ApiResource) {
    let identity = IdentityResource {
        name: "profile".to_owned(),
        display_name: Some("User profile".to_owned()),
        description: None,
        enabled: true,
        user_claims: vec!["name".to_owned(), "picture".to_owned()],
    };
    let api = ApiResource {
        name: "orders".to_owned(),
        display_name: None,
        description: Some("Order API".to_owned()),
        enabled: true,
        scopes: vec!["orders.read".to_owned(), "orders.write".to_owned()],
        user_claims: Vec::new(),
    };
    (identity, api)
}

/// Test the resource repository
#[sqlx::test(migrator = "crate::MIGRATOR")]
async fn test_resource_repo(pool: SqlitePool) {
    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    let (identity, api) = sample_resources();

    assert!(repo.resource().all().await.unwrap().is_empty());

    repo.resource()
        .upsert_identity_resource(identity.clone())
        .await
        .unwrap();
    repo.resource()
        .upsert_api_resource(api.clone())
        .await
        .unwrap();

    let scopes = ["profile".to_owned(), "orders.write".to_owned()];
    assert_eq!(
        repo.resource()
            .find_identity_resources_by_scope(&scopes)
            .await
            .unwrap(),
        [identity.clone()]
    );
    assert_eq!(
        repo.resource()
            .find_api_resources_by_scope(&scopes)
            .await
            .unwrap(),
        [api.clone()]
    );
    assert!(
        repo.resource()
            .find_api_resources_by_scope(&["profile".to_owned()])
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        repo.resource()
            .find_api_resources_by_name(&["orders".to_owned(), "billing".to_owned()])
            .await
            .unwrap(),
        [api.clone()]
    );

    // Upserting replaces the scopes
    let mut narrowed = api.clone();
    narrowed.scopes = vec!["orders.read".to_owned()];
    repo.resource()
        .upsert_api_resource(narrowed.clone())
        .await
        .unwrap();
    assert!(
        repo.resource()
            .find_api_resources_by_scope(&["orders.write".to_owned()])
            .await
            .unwrap()
            .is_empty()
    );

    let all = repo.resource().all().await.unwrap();
    assert_eq!(all.identity_resources, [identity]);
    assert_eq!(all.api_resources, [narrowed]);

    assert!(repo.resource().remove_api_resource("orders").await.unwrap());
    assert!(!repo.resource().remove_api_resource("orders").await.unwrap());
    assert!(
        repo.resource()
            .remove_identity_resource("profile")
            .await
            .unwrap()
    );
    assert!(repo.resource().all().await.unwrap().is_empty());

    repo.save().await.unwrap();
}

/// Test the read-only stores backed by a repository factory
#[sqlx::test(migrator = "crate::MIGRATOR")]
async fn test_repository_config_store(pool: SqlitePool) {
    let (identity, api) = sample_resources();
    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    repo.client().upsert(sample_client()).await.unwrap();
    repo.resource()
        .upsert_identity_resource(identity.clone())
        .await
        .unwrap();
    repo.resource()
        .upsert_api_resource(api.clone())
        .await
        .unwrap();
    repo.save().await.unwrap();

    let store = RepositoryConfigStore::new(SqliteRepositoryFactory::new(pool).boxed());

    let client = store.find_client_by_id("web").await.unwrap().unwrap();
    assert!(client.allows_scope("api1"));
    assert!(store.find_client_by_id("unknown").await.unwrap().is_none());

    let resources = store.all_resources().await.unwrap();
    assert_eq!(resources.identity_resources, [identity]);
    assert_eq!(
        store
            .find_api_resources_by_scope(&["orders.read".to_owned()])
            .await
            .unwrap(),
        [api]
    );
}
