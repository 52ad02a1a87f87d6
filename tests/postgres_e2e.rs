//! PostgreSQL store and queue against a live database
//!
//! Run with: DATABASE_URL=postgres://... cargo test --test postgres_e2e -- --ignored

use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use mikrotik_sync::Error;
use mikrotik_sync::model::{ServiceType, Subscriber, SubscriberId, SyncStatus, TenantId};
use mikrotik_sync::queue::{FailOutcome, JobOptions, PgSyncQueue, RetryPolicy, SyncJob, SyncQueue};
use mikrotik_sync::store::{schema, PgStore, SubscriberStore};
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Suffix keeping rows of concurrent runs apart
fn run_id() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        Utc::now().timestamp_nanos_opt().unwrap_or_default()
    )
}

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for this test");
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .unwrap();
    schema::migrate(&pool).await.unwrap();
    pool
}

async fn seed_tenant(pool: &PgPool, tenant: &str) {
    sqlx::query("INSERT INTO tenants (id, name, status) VALUES ($1, $1, 'active') ON CONFLICT DO NOTHING")
        .bind(tenant)
        .execute(pool)
        .await
        .unwrap();
}

fn subscriber(id: &str, tenant: &str) -> Subscriber {
    Subscriber {
        id: id.into(),
        tenant_id: tenant.into(),
        router_id: "r1".into(),
        username: id.to_string(),
        service_type: ServiceType::Pppoe,
        password: Some("pw".to_string()),
        static_ip: None,
        package_id: "basic".into(),
        pending_package_id: None,
        is_suspended: false,
        is_manually_disconnected: false,
        provisioned: true,
        sync_status: SyncStatus::Synced,
        sync_error_message: None,
        expires_at: None,
    }
}

#[tokio::test]
#[ignore]
async fn migrate_is_idempotent() {
    let pool = pool().await;
    schema::migrate(&pool).await.unwrap();
    schema::migrate(&pool).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn keyed_jobs_deduplicate_while_live() {
    let pool = pool().await;
    let queue = PgSyncQueue::new(pool, format!("it-{}", run_id()), RetryPolicy::default());

    let first = queue
        .enqueue(SyncJob::ReconcileTrigger, JobOptions::keyed("reconcile-sweep"))
        .await
        .unwrap();
    let second = queue
        .enqueue(SyncJob::ReconcileTrigger, JobOptions::keyed("reconcile-sweep"))
        .await
        .unwrap();
    assert_eq!(first, second);

    let leased = queue.reserve("it", 10).await.unwrap();
    assert_eq!(leased.len(), 1);
    // still live while running
    let third = queue
        .enqueue(SyncJob::ReconcileTrigger, JobOptions::keyed("reconcile-sweep"))
        .await
        .unwrap();
    assert_eq!(first, third);

    queue.complete(leased[0].id).await.unwrap();
    let fourth = queue
        .enqueue(SyncJob::ReconcileTrigger, JobOptions::keyed("reconcile-sweep"))
        .await
        .unwrap();
    assert_ne!(first, fourth);
}

#[tokio::test]
#[ignore]
async fn failed_jobs_back_off_then_die() {
    let pool = pool().await;
    let policy = RetryPolicy {
        max_attempts: 2,
        base_delay: Duration::from_millis(0),
        max_delay: Duration::from_millis(0),
    };
    let queue = PgSyncQueue::new(pool, format!("it-{}", run_id()), policy);
    queue
        .push(SyncJob::Add {
            subscriber_id: "u1".into(),
        })
        .await
        .unwrap();

    let leased = queue.reserve("it", 1).await.unwrap();
    let outcome = queue.fail(leased[0].id, "router down", true).await.unwrap();
    assert!(matches!(outcome, FailOutcome::Retrying { .. }));

    let leased = queue.reserve("it", 1).await.unwrap();
    assert_eq!(leased[0].attempt, 2);
    let outcome = queue.fail(leased[0].id, "router down", true).await.unwrap();
    assert_eq!(outcome, FailOutcome::Dead);
    assert!(queue.reserve("it", 1).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn store_round_trips_and_streams_expired() {
    let pool = pool().await;
    let tenant = format!("t-{}", run_id());
    seed_tenant(&pool, &tenant).await;
    let store = PgStore::new(pool);

    let lapsed = Subscriber {
        expires_at: Some(Utc::now() - chrono::Duration::hours(1)),
        ..subscriber(&format!("{tenant}-a"), &tenant)
    };
    let current = Subscriber {
        expires_at: Some(Utc::now() + chrono::Duration::days(1)),
        ..subscriber(&format!("{tenant}-b"), &tenant)
    };
    store.create_subscriber(&lapsed).await.unwrap();
    store.create_subscriber(&current).await.unwrap();

    let loaded = store.get_subscriber(&lapsed.id).await.unwrap().unwrap();
    assert_eq!(loaded.username, lapsed.username);
    assert_eq!(loaded.sync_status, SyncStatus::Synced);

    let tenant_id = TenantId::from(tenant.as_str());
    let expired: Vec<SubscriberId> = store
        .stream_expired(&tenant_id, Utc::now())
        .map(|s| s.unwrap().id)
        .collect()
        .await;
    assert_eq!(expired, vec![lapsed.id.clone()]);

    assert!(store.delete_subscriber(&lapsed.id).await.unwrap());
    assert!(!store.delete_subscriber(&lapsed.id).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn create_rejects_taken_id_and_username() {
    let pool = pool().await;
    let tenant = format!("t-{}", run_id());
    seed_tenant(&pool, &tenant).await;
    let store = PgStore::new(pool);

    let first = subscriber(&format!("{tenant}-a"), &tenant);
    store.create_subscriber(&first).await.unwrap();

    let replay = Subscriber {
        provisioned: false,
        ..first.clone()
    };
    let err = store.create_subscriber(&replay).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyExists(_)));

    let same_name = Subscriber {
        id: format!("{tenant}-b").into(),
        ..first.clone()
    };
    assert!(store.create_subscriber(&same_name).await.is_err());

    let stored = store.get_subscriber(&first.id).await.unwrap().unwrap();
    assert!(stored.provisioned);
}

#[tokio::test]
#[ignore]
async fn replace_loses_to_a_newer_write() {
    let pool = pool().await;
    let tenant = format!("t-{}", run_id());
    seed_tenant(&pool, &tenant).await;
    let store = PgStore::new(pool);

    let created = Subscriber {
        expires_at: Some(Utc::now() + chrono::Duration::days(30)),
        ..subscriber(&format!("{tenant}-a"), &tenant)
    };
    store.create_subscriber(&created).await.unwrap();
    let snapshot = store.get_subscriber(&created.id).await.unwrap().unwrap();

    let staged = Subscriber {
        pending_package_id: Some("premium".into()),
        ..snapshot.pending()
    };
    assert!(store.replace_subscriber(&snapshot, &staged).await.unwrap());

    // a job still holding the old snapshot must not overwrite the change
    let stale = snapshot.errored("Router r1 unreachable: timeout");
    assert!(!store.replace_subscriber(&snapshot, &stale).await.unwrap());

    let stored = store.get_subscriber(&created.id).await.unwrap().unwrap();
    assert_eq!(stored, staged);
}
