// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use sigil_data_model::GrantType;
use sigil_storage::{
    BoxClock, BoxRepository, Clock, RepositoryAccess, RepositoryError, RepositoryErrorKind,
    RepositoryFactory, RepositoryTransaction, clock::MockClock, grant::NewGrant,
};
use sigil_storage_sqlite::{SqliteRepository, SqliteRepositoryFactory};
use sqlx::SqlitePool;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{CleanupHost, CleanupSettings, GrantSweeper, SweeperState, TickOutcome};

/// A factory which fails to hand out a repository on the given calls
struct FlakyFactory {
    inner: SqliteRepositoryFactory,
    calls: AtomicUsize,
    failing: Vec<usize>,
}

#[async_trait]
impl RepositoryFactory for FlakyFactory {
    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        if self.failing.contains(&call) {
            return Err(RepositoryError::new(
                RepositoryErrorKind::Unavailable,
                std::io::Error::other("connection refused"),
            ));
        }

        self.inner.create().await
    }
}

/// A factory which pushes the expiration of a grant forward right before the
/// given call hands out a repository
struct RefreshingFactory {
    inner: SqliteRepositoryFactory,
    calls: AtomicUsize,
    refresh_on: usize,
    key: String,
    expires_at: DateTime<Utc>,
}

#[async_trait]
impl RepositoryFactory for RefreshingFactory {
    async fn create(&self) -> Result<BoxRepository, RepositoryError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed);
        if call == self.refresh_on {
            let mut repo = self.inner.create().await?;
            let grant = repo.grant().lookup(&self.key).await?;
            if let Some(mut grant) = grant {
                grant.expires_at = Some(self.expires_at);
                repo.grant().update(grant).await?;
            }
            repo.save().await?;
        }

        self.inner.create().await
    }
}

fn settings(batch_size: usize, max_iterations_per_tick: usize) -> CleanupSettings {
    CleanupSettings::new(
        true,
        Duration::from_millis(20),
        batch_size,
        max_iterations_per_tick,
    )
    .unwrap()
}

fn sweeper(pool: &SqlitePool, clock: &Arc<MockClock>, settings: &CleanupSettings) -> GrantSweeper {
    let clock: BoxClock = clock.clone();
    GrantSweeper::new(
        SqliteRepositoryFactory::new(pool.clone()).boxed(),
        clock,
        settings,
    )
}

async fn insert(
    pool: &SqlitePool,
    clock: &MockClock,
    grants: impl IntoIterator<Item = (String, Option<DateTime<Utc>>)>,
) {
    let mut repo = SqliteRepository::from_pool(pool).await.unwrap().boxed();
    for (key, expires_at) in grants {
        repo.grant()
            .add(
                clock,
                NewGrant {
                    key,
                    grant_type: GrantType::AuthorizationCode,
                    subject_id: Some("alice".to_owned()),
                    session_id: None,
                    client_id: "web".to_owned(),
                    description: None,
                    expires_at,
                    data: "{}".to_owned(),
                },
            )
            .await
            .unwrap();
    }
    repo.save().await.unwrap();
}

async fn exists(pool: &SqlitePool, key: &str) -> bool {
    let mut repo = SqliteRepository::from_pool(pool).await.unwrap().boxed();
    let grant = repo.grant().lookup(key).await.unwrap();
    repo.cancel().await.unwrap();
    grant.is_some()
}

async fn remaining_expired(pool: &SqlitePool, clock: &MockClock) -> usize {
    let mut repo = SqliteRepository::from_pool(pool).await.unwrap().boxed();
    let count = repo.grant().count_expired(clock.now()).await.unwrap();
    repo.cancel().await.unwrap();
    count
}

#[sqlx::test(migrator = "sigil_storage_sqlite::MIGRATOR")]
async fn test_sweep_expired_and_keep_the_rest(pool: SqlitePool) {
    let clock = Arc::new(MockClock::default());
    let now = clock.now();
    let token = CancellationToken::new();

    insert(
        &pool,
        &clock,
        [
            ("a".to_owned(), Some(now - TimeDelta::seconds(1))),
            ("b".to_owned(), Some(now + TimeDelta::hours(1))),
            ("c".to_owned(), None),
        ],
    )
    .await;

    let mut sweeper = sweeper(&pool, &clock, &settings(100, 100));
    assert_eq!(sweeper.state(), SweeperState::Idle);

    let report = sweeper.tick(&token).await;
    assert_eq!(report.removed, 1);
    assert_eq!(report.iterations, 1);
    assert!(matches!(report.outcome, TickOutcome::Drained));
    assert_eq!(sweeper.state(), SweeperState::Idle);

    assert!(!exists(&pool, "a").await);
    assert!(exists(&pool, "b").await);
    assert!(exists(&pool, "c").await);

    // Once "b" expires, it goes away too
    clock.advance(TimeDelta::hours(2));
    let report = sweeper.tick(&token).await;
    assert_eq!(report.removed, 1);
    assert!(!exists(&pool, "b").await);

    // A grant without expiration which never gets consumed stays forever
    for _ in 0..5 {
        clock.advance(TimeDelta::days(365));
        let report = sweeper.tick(&token).await;
        assert_eq!(report.removed, 0);
        assert!(matches!(report.outcome, TickOutcome::Drained));
    }
    assert!(exists(&pool, "c").await);
}

#[sqlx::test(migrator = "sigil_storage_sqlite::MIGRATOR")]
async fn test_sweep_consumed(pool: SqlitePool) {
    let clock = Arc::new(MockClock::default());
    let token = CancellationToken::new();

    insert(
        &pool,
        &clock,
        [
            ("consumed".to_owned(), None),
            ("rotated".to_owned(), Some(clock.now() + TimeDelta::days(30))),
        ],
    )
    .await;

    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    for key in ["consumed", "rotated"] {
        let grant = repo.grant().lookup(key).await.unwrap().unwrap();
        repo.grant().consume(&*clock, grant).await.unwrap();
    }
    repo.save().await.unwrap();

    let mut sweeper = sweeper(&pool, &clock, &settings(100, 100));
    let report = sweeper.tick(&token).await;
    assert_eq!(report.removed, 2);
    assert!(!exists(&pool, "consumed").await);
    assert!(!exists(&pool, "rotated").await);
}

#[sqlx::test(migrator = "sigil_storage_sqlite::MIGRATOR")]
async fn test_sweep_in_batches(pool: SqlitePool) {
    let clock = Arc::new(MockClock::default());
    let expired = clock.now() - TimeDelta::minutes(1);
    let token = CancellationToken::new();

    insert(
        &pool,
        &clock,
        (0..250).map(|i| (format!("grant-{i:03}"), Some(expired))),
    )
    .await;

    let mut sweeper = sweeper(&pool, &clock, &settings(100, 100));
    let report = sweeper.tick(&token).await;

    // 100 + 100 + 50, the last batch being short ends the tick
    assert_eq!(report.removed, 250);
    assert_eq!(report.iterations, 3);
    assert!(matches!(report.outcome, TickOutcome::Drained));
    assert_eq!(remaining_expired(&pool, &clock).await, 0);
}

#[sqlx::test(migrator = "sigil_storage_sqlite::MIGRATOR")]
async fn test_iteration_cap(pool: SqlitePool) {
    let clock = Arc::new(MockClock::default());
    let expired = clock.now() - TimeDelta::minutes(1);
    let token = CancellationToken::new();

    insert(
        &pool,
        &clock,
        (0..250).map(|i| (format!("grant-{i:03}"), Some(expired))),
    )
    .await;

    let mut sweeper = sweeper(&pool, &clock, &settings(100, 2));

    let report = sweeper.tick(&token).await;
    assert_eq!(report.removed, 200);
    assert_eq!(report.iterations, 2);
    assert!(matches!(report.outcome, TickOutcome::CapReached));
    assert_eq!(remaining_expired(&pool, &clock).await, 50);

    // The next tick picks up the rest
    let report = sweeper.tick(&token).await;
    assert_eq!(report.removed, 50);
    assert!(matches!(report.outcome, TickOutcome::Drained));
    assert_eq!(remaining_expired(&pool, &clock).await, 0);
}

#[sqlx::test(migrator = "sigil_storage_sqlite::MIGRATOR")]
async fn test_transient_failures(pool: SqlitePool) {
    let clock = Arc::new(MockClock::default());
    let token = CancellationToken::new();

    insert(
        &pool,
        &clock,
        [("a".to_owned(), Some(clock.now() - TimeDelta::seconds(1)))],
    )
    .await;

    // Calls 0 and 1 are the first tick, calls 2 and 3 the second one
    let factory = FlakyFactory {
        inner: SqliteRepositoryFactory::new(pool.clone()),
        calls: AtomicUsize::new(0),
        failing: vec![0, 3],
    };
    let box_clock: BoxClock = clock.clone();
    let mut sweeper = GrantSweeper::new(Box::new(factory), box_clock, &settings(100, 100));

    // The select fails, the tick does nothing
    let report = sweeper.tick(&token).await;
    assert_eq!(report.removed, 0);
    assert_eq!(report.iterations, 1);
    match &report.outcome {
        TickOutcome::SelectFailed(e) => assert!(e.is_transient()),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(exists(&pool, "a").await);

    // The select works, the delete fails, and is not retried in the same tick
    let report = sweeper.tick(&token).await;
    assert_eq!(report.removed, 0);
    assert_eq!(report.iterations, 1);
    assert!(matches!(report.outcome, TickOutcome::DeleteFailed(_)));
    assert!(report.outcome.is_failure());
    assert!(exists(&pool, "a").await);

    // The grant is still eligible, the next tick removes it
    let report = sweeper.tick(&token).await;
    assert_eq!(report.removed, 1);
    assert!(!report.outcome.is_failure());
    assert!(!exists(&pool, "a").await);
}

#[sqlx::test(migrator = "sigil_storage_sqlite::MIGRATOR")]
async fn test_grant_refreshed_between_select_and_delete(pool: SqlitePool) {
    let clock = Arc::new(MockClock::default());
    let token = CancellationToken::new();
    let expired = clock.now() - TimeDelta::seconds(1);
    let refreshed = clock.now() + TimeDelta::hours(1);

    insert(
        &pool,
        &clock,
        [
            ("a".to_owned(), Some(expired)),
            ("b".to_owned(), Some(expired)),
        ],
    )
    .await;

    // Call 0 selects both keys, "a" is refreshed before call 1 deletes them
    let factory = RefreshingFactory {
        inner: SqliteRepositoryFactory::new(pool.clone()),
        calls: AtomicUsize::new(0),
        refresh_on: 1,
        key: "a".to_owned(),
        expires_at: refreshed,
    };
    let box_clock: BoxClock = clock.clone();
    let mut sweeper = GrantSweeper::new(Box::new(factory), box_clock, &settings(100, 100));

    let report = sweeper.tick(&token).await;
    assert_eq!(report.removed, 1);
    assert!(matches!(report.outcome, TickOutcome::Drained));

    assert!(!exists(&pool, "b").await);
    let mut repo = SqliteRepository::from_pool(&pool).await.unwrap().boxed();
    let grant = repo.grant().lookup("a").await.unwrap().unwrap();
    repo.cancel().await.unwrap();
    assert_eq!(grant.expires_at, Some(refreshed));
    assert_eq!(remaining_expired(&pool, &clock).await, 0);
}

#[sqlx::test(migrator = "sigil_storage_sqlite::MIGRATOR")]
async fn test_cancelled_tick(pool: SqlitePool) {
    let clock = Arc::new(MockClock::default());
    insert(
        &pool,
        &clock,
        [("a".to_owned(), Some(clock.now() - TimeDelta::seconds(1)))],
    )
    .await;

    let mut sweeper = sweeper(&pool, &clock, &settings(100, 100));

    let token = CancellationToken::new();
    token.cancel();
    let report = sweeper.tick(&token).await;
    assert_eq!(report.iterations, 0);
    assert_eq!(report.removed, 0);
    assert!(matches!(report.outcome, TickOutcome::Cancelled));
    assert_eq!(sweeper.state(), SweeperState::Stopped);

    // A stopped sweeper stays stopped
    let report = sweeper.tick(&CancellationToken::new()).await;
    assert!(matches!(report.outcome, TickOutcome::Cancelled));
    assert!(exists(&pool, "a").await);
}

#[sqlx::test(migrator = "sigil_storage_sqlite::MIGRATOR")]
async fn test_disabled_host(pool: SqlitePool) {
    let clock = Arc::new(MockClock::default());
    insert(
        &pool,
        &clock,
        [("a".to_owned(), Some(clock.now() - TimeDelta::seconds(1)))],
    )
    .await;

    let settings = CleanupSettings::new(false, Duration::from_millis(10), 100, 100).unwrap();
    let mut host = CleanupHost::new(sweeper(&pool, &clock, &settings), &settings);
    let stats = host.stats();

    let token = CancellationToken::new();
    let task_tracker = TaskTracker::new();
    host.start(&token, &task_tracker);
    assert!(!host.is_running());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stats.ticks(), 0);
    assert!(exists(&pool, "a").await);

    host.stop().await;
    task_tracker.close();
    task_tracker.wait().await;
}

#[sqlx::test(migrator = "sigil_storage_sqlite::MIGRATOR")]
async fn test_host_runs_until_stopped(pool: SqlitePool) {
    let clock = Arc::new(MockClock::default());
    insert(
        &pool,
        &clock,
        [
            ("a".to_owned(), Some(clock.now() - TimeDelta::seconds(1))),
            ("b".to_owned(), Some(clock.now() + TimeDelta::hours(1))),
        ],
    )
    .await;

    let settings = settings(100, 100);
    let mut host = CleanupHost::new(sweeper(&pool, &clock, &settings), &settings);
    let stats = host.stats();

    let token = CancellationToken::new();
    let task_tracker = TaskTracker::new();
    host.start(&token, &task_tracker);
    assert!(host.is_running());

    // Starting twice does not spawn a second loop
    host.start(&token, &task_tracker);
    assert_eq!(task_tracker.len(), 1);

    tokio::time::timeout(Duration::from_secs(10), async {
        while stats.ticks() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    host.stop().await;
    assert!(!host.is_running());
    assert_eq!(stats.removed(), 1);
    assert_eq!(stats.failed_ticks(), 0);

    // No tick runs after the host stopped
    let ticks = stats.ticks();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stats.ticks(), ticks);

    assert!(!exists(&pool, "a").await);
    assert!(exists(&pool, "b").await);
    assert!(!token.is_cancelled());

    task_tracker.close();
    task_tracker.wait().await;
}

#[sqlx::test(migrator = "sigil_storage_sqlite::MIGRATOR")]
async fn test_host_follows_parent_token(pool: SqlitePool) {
    let clock = Arc::new(MockClock::default());
    let settings = settings(100, 100);
    let mut host = CleanupHost::new(sweeper(&pool, &clock, &settings), &settings);

    let token = CancellationToken::new();
    let task_tracker = TaskTracker::new();
    host.start(&token, &task_tracker);

    token.cancel();
    task_tracker.close();
    tokio::time::timeout(Duration::from_secs(10), task_tracker.wait())
        .await
        .unwrap();
    assert!(!host.is_running());
}
