//! Database tests

use super::*;
use chrono::{Duration, Utc};
use tempfile::TempDir;

/// Helper to create a test database
async fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::connect(&db_path).await.unwrap();
    (db, temp_dir)
}

fn test_job(domain: &str) -> Job {
    Job {
        id: EntityId::new().0,
        job_type: JobType::AcceptFollow.as_str().to_string(),
        domain: domain.to_string(),
        status: "pending".to_string(),
        payload: r#"{"actor":"https://a.example/users/bob","type":"Follow"}"#.to_string(),
        retry_count: 0,
        max_retries: 5,
        last_error: None,
        created_at: Utc::now(),
        scheduled_for: Utc::now(),
        started_at: None,
        completed_at: None,
        created_by: Some("inbox".to_string()),
        notes: None,
    }
}

fn test_actor(domain: &str, username: &str) -> LocalActor {
    LocalActor {
        id: EntityId::new().0,
        username: username.to_string(),
        domain: domain.to_string(),
        display_name: Some(username.to_string()),
        summary: None,
        private_key_pem: "test_private_key".to_string(),
        public_key_pem: "test_public_key".to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn test_grant(issued_by: &str) -> BadgeGrant {
    BadgeGrant {
        id: EntityId::new().0,
        badge_id: Some("badge-1".to_string()),
        title: "Rustacean".to_string(),
        description: "Contributed to the project".to_string(),
        criteria: Some("Merge one pull request".to_string()),
        issued_by: issued_by.to_string(),
        recipient_uri: "https://a.example/users/bob".to_string(),
        recipient_name: Some("Bob".to_string()),
        recipient_email: None,
        issued_at: Utc::now(),
        accepted_at: None,
        boosted_at: None,
        revoked_at: None,
        accept_key: Some("secret-key".to_string()),
        fingerprint: None,
        note_id: None,
        is_external: false,
        is_public: true,
    }
}

#[tokio::test]
async fn test_database_connection() {
    let (_db, _temp_dir) = create_test_db().await;
    // Connection successful if we get here without panicking
}

// =============================================================================
// Job store
// =============================================================================

#[tokio::test]
async fn test_enqueue_and_claim_job() {
    let (db, _temp_dir) = create_test_db().await;

    let job = test_job("b.example");
    db.enqueue_job(&job).await.unwrap();

    let claimed = db.claim_next_job("b.example").await.unwrap();
    assert!(claimed.is_some());
    let claimed = claimed.unwrap();
    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.status, "processing");
    assert!(claimed.started_at.is_some());

    // Queue is drained for this domain
    let next = db.claim_next_job("b.example").await.unwrap();
    assert!(next.is_none());
}

#[tokio::test]
async fn test_claim_is_scoped_to_domain() {
    let (db, _temp_dir) = create_test_db().await;

    db.enqueue_job(&test_job("b.example")).await.unwrap();

    let other = db.claim_next_job("c.example").await.unwrap();
    assert!(other.is_none());

    let own = db.claim_next_job("b.example").await.unwrap();
    assert!(own.is_some());
}

#[tokio::test]
async fn test_future_scheduled_job_is_invisible() {
    let (db, _temp_dir) = create_test_db().await;

    let mut job = test_job("b.example");
    job.scheduled_for = Utc::now() + Duration::hours(1);
    db.enqueue_job(&job).await.unwrap();

    let claimed = db.claim_next_job("b.example").await.unwrap();
    assert!(claimed.is_none());
}

#[tokio::test]
async fn test_claim_order_follows_scheduled_for() {
    let (db, _temp_dir) = create_test_db().await;

    let mut late = test_job("b.example");
    late.scheduled_for = Utc::now() - Duration::minutes(1);
    let mut early = test_job("b.example");
    early.scheduled_for = Utc::now() - Duration::minutes(10);

    db.enqueue_job(&late).await.unwrap();
    db.enqueue_job(&early).await.unwrap();

    let first = db.claim_next_job("b.example").await.unwrap().unwrap();
    assert_eq!(first.id, early.id);
    let second = db.claim_next_job("b.example").await.unwrap().unwrap();
    assert_eq!(second.id, late.id);
}

#[tokio::test]
async fn test_concurrent_claims_yield_exactly_one_success() {
    let (db, _temp_dir) = create_test_db().await;
    let db = std::sync::Arc::new(db);

    db.enqueue_job(&test_job("b.example")).await.unwrap();

    let a = {
        let db = db.clone();
        tokio::spawn(async move { db.claim_next_job("b.example").await.unwrap() })
    };
    let b = {
        let db = db.clone();
        tokio::spawn(async move { db.claim_next_job("b.example").await.unwrap() })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert_eq!(
        a.is_some() as u8 + b.is_some() as u8,
        1,
        "exactly one claimant must win"
    );
}

#[tokio::test]
async fn test_complete_job_is_idempotent() {
    let (db, _temp_dir) = create_test_db().await;

    let job = test_job("b.example");
    db.enqueue_job(&job).await.unwrap();
    db.claim_next_job("b.example").await.unwrap().unwrap();

    assert!(db.complete_job(&job.id).await.unwrap());
    // Second call is a no-op on an already-terminal job
    assert!(!db.complete_job(&job.id).await.unwrap());

    let stored = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "completed");
    assert!(stored.completed_at.is_some());
}

#[tokio::test]
async fn test_fail_job_reschedules_with_exponential_backoff() {
    let (db, _temp_dir) = create_test_db().await;

    let job = test_job("b.example");
    db.enqueue_job(&job).await.unwrap();
    db.claim_next_job("b.example").await.unwrap().unwrap();

    let before = Utc::now();
    db.fail_job(&job.id, "remote inbox timed out", true)
        .await
        .unwrap();

    let stored = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "pending");
    assert_eq!(stored.retry_count, 1);
    assert!(stored.started_at.is_none());
    assert_eq!(stored.last_error.as_deref(), Some("remote inbox timed out"));
    // delay = 2^0 minutes for the first retry
    assert!(stored.scheduled_for >= before + Duration::minutes(1));

    // The rescheduled job is not yet claimable
    assert!(db.claim_next_job("b.example").await.unwrap().is_none());

    let logs = db.get_job_logs(&job.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].message.contains("retry 1/5"));
}

#[tokio::test]
async fn test_fail_job_second_retry_doubles_delay() {
    let (db, _temp_dir) = create_test_db().await;

    let mut job = test_job("b.example");
    job.retry_count = 1;
    db.enqueue_job(&job).await.unwrap();
    db.claim_next_job("b.example").await.unwrap().unwrap();

    let before = Utc::now();
    db.fail_job(&job.id, "still down", true).await.unwrap();

    let stored = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.retry_count, 2);
    // delay = 2^1 minutes for the second retry
    assert!(stored.scheduled_for >= before + Duration::minutes(2));
}

#[tokio::test]
async fn test_fail_job_exhausted_retries_is_terminal() {
    let (db, _temp_dir) = create_test_db().await;

    let mut job = test_job("b.example");
    job.retry_count = 5;
    job.max_retries = 5;
    db.enqueue_job(&job).await.unwrap();
    db.claim_next_job("b.example").await.unwrap().unwrap();

    db.fail_job(&job.id, "gave up", true).await.unwrap();

    let stored = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "failed");
    assert!(stored.completed_at.is_some());

    let logs = db.get_job_logs(&job.id).await.unwrap();
    assert!(logs[0].message.contains("permanently failed"));
}

#[tokio::test]
async fn test_fail_job_without_retry_is_terminal_immediately() {
    let (db, _temp_dir) = create_test_db().await;

    let job = test_job("b.example");
    db.enqueue_job(&job).await.unwrap();
    db.claim_next_job("b.example").await.unwrap().unwrap();

    db.fail_job(&job.id, "unknown job type", false).await.unwrap();

    let stored = db.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, "failed");
    assert_eq!(stored.retry_count, 0);
}

#[tokio::test]
async fn test_job_status_counts() {
    let (db, _temp_dir) = create_test_db().await;

    db.enqueue_job(&test_job("b.example")).await.unwrap();
    db.enqueue_job(&test_job("b.example")).await.unwrap();
    let completed = test_job("b.example");
    db.enqueue_job(&completed).await.unwrap();

    // Claim and complete one
    while let Some(job) = db.claim_next_job("b.example").await.unwrap() {
        if job.id == completed.id {
            db.complete_job(&job.id).await.unwrap();
        } else {
            db.fail_job(&job.id, "boom", false).await.unwrap();
        }
    }

    let counts = db.job_status_counts().await.unwrap();
    let get = |status: &str| {
        counts
            .iter()
            .find(|(d, s, _)| d == "b.example" && s == status)
            .map(|(_, _, c)| *c)
            .unwrap_or(0)
    };
    assert_eq!(get("completed"), 1);
    assert_eq!(get("failed"), 2);
}

// =============================================================================
// Actors, grants, followers
// =============================================================================

#[tokio::test]
async fn test_actor_insert_if_absent() {
    let (db, _temp_dir) = create_test_db().await;

    let actor = test_actor("b.example", "alice");
    assert!(db.insert_actor_if_absent(&actor).await.unwrap());
    // Second insert for the same (username, domain) is skipped
    assert!(!db.insert_actor_if_absent(&test_actor("b.example", "alice")).await.unwrap());

    let stored = db.get_actor("b.example", "alice").await.unwrap().unwrap();
    assert_eq!(stored.id, actor.id);
}

#[tokio::test]
async fn test_grant_accept_clears_key_once() {
    let (db, _temp_dir) = create_test_db().await;

    let grant = test_grant("https://b.example/actors/b.example/alice");
    db.insert_grant(&grant).await.unwrap();

    // Wrong key is rejected
    assert!(!db.accept_grant(&grant.id, "wrong-key").await.unwrap());

    assert!(db.accept_grant(&grant.id, "secret-key").await.unwrap());
    let stored = db.get_grant(&grant.id).await.unwrap().unwrap();
    assert!(stored.accept_key.is_none());
    assert!(stored.accepted_at.is_some());

    // Key is one-time
    assert!(!db.accept_grant(&grant.id, "secret-key").await.unwrap());
}

#[tokio::test]
async fn test_grant_seal_requires_awaiting_seal_state() {
    let (db, _temp_dir) = create_test_db().await;

    let grant = test_grant("https://b.example/actors/b.example/alice");
    db.insert_grant(&grant).await.unwrap();

    // Not accepted yet: seal is rejected
    assert!(!db.seal_grant(&grant.id, "fp", "note").await.unwrap());

    db.accept_grant(&grant.id, "secret-key").await.unwrap();
    assert!(db.seal_grant(&grant.id, "fp", "https://b.example/grants/x").await.unwrap());

    let stored = db.get_grant(&grant.id).await.unwrap().unwrap();
    assert_eq!(stored.fingerprint.as_deref(), Some("fp"));
    assert_eq!(stored.note_id.as_deref(), Some("https://b.example/grants/x"));

    // No longer awaiting acceptance: re-seal is rejected
    assert!(!db.seal_grant(&grant.id, "fp2", "note2").await.unwrap());
}

#[tokio::test]
async fn test_grant_boost_and_revoke_are_idempotent() {
    let (db, _temp_dir) = create_test_db().await;

    let grant = test_grant("https://b.example/actors/b.example/alice");
    db.insert_grant(&grant).await.unwrap();

    assert!(db.mark_grant_boosted(&grant.id).await.unwrap());
    assert!(!db.mark_grant_boosted(&grant.id).await.unwrap());

    assert!(db.mark_grant_revoked(&grant.id).await.unwrap());
    assert!(!db.mark_grant_revoked(&grant.id).await.unwrap());

    // Revoked is terminal: no further transitions
    assert!(!db.accept_grant(&grant.id, "secret-key").await.unwrap());
    assert!(!db.seal_grant(&grant.id, "fp", "note").await.unwrap());
}

#[tokio::test]
async fn test_grant_lookup_by_note_id() {
    let (db, _temp_dir) = create_test_db().await;

    let mut grant = test_grant("https://b.example/actors/b.example/alice");
    grant.accept_key = None;
    grant.note_id = Some("https://ext.example/assertions/42".to_string());
    grant.is_external = true;
    db.insert_grant(&grant).await.unwrap();

    let found = db
        .get_grant_by_note_id("https://ext.example/assertions/42")
        .await
        .unwrap();
    assert_eq!(found.unwrap().id, grant.id);
}

#[tokio::test]
async fn test_follower_insert_is_deduplicated() {
    let (db, _temp_dir) = create_test_db().await;

    let actor = test_actor("b.example", "alice");
    db.insert_actor_if_absent(&actor).await.unwrap();

    let follower = Follower {
        id: EntityId::new().0,
        actor_id: actor.id.clone(),
        follower_uri: "https://a.example/users/bob".to_string(),
        inbox_uri: "https://a.example/users/bob/inbox".to_string(),
        shared_inbox_uri: Some("https://a.example/inbox".to_string()),
        display_name: None,
        avatar_url: None,
        follow_activity_uri: Some("https://a.example/follows/1".to_string()),
        created_at: Utc::now(),
        profile_refreshed_at: None,
    };

    assert!(db.insert_follower_if_absent(&follower).await.unwrap());
    let duplicate = Follower {
        id: EntityId::new().0,
        ..follower.clone()
    };
    assert!(!db.insert_follower_if_absent(&duplicate).await.unwrap());

    let followers = db.get_followers(&actor.id).await.unwrap();
    assert_eq!(followers.len(), 1);

    assert!(db
        .delete_follower(&actor.id, "https://a.example/users/bob")
        .await
        .unwrap());
    assert!(db.get_followers(&actor.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_comment_insert_is_deduplicated_by_note_uri() {
    let (db, _temp_dir) = create_test_db().await;

    let grant = test_grant("https://b.example/actors/b.example/alice");
    db.insert_grant(&grant).await.unwrap();

    let comment = GrantComment {
        id: EntityId::new().0,
        grant_id: grant.id.clone(),
        author_uri: "https://a.example/users/bob".to_string(),
        note_uri: "https://a.example/notes/99".to_string(),
        content: "Congrats!".to_string(),
        created_at: Utc::now(),
    };

    assert!(db.insert_comment_if_absent(&comment).await.unwrap());
    let duplicate = GrantComment {
        id: EntityId::new().0,
        ..comment.clone()
    };
    assert!(!db.insert_comment_if_absent(&duplicate).await.unwrap());

    let comments = db.get_comments(&grant.id).await.unwrap();
    assert_eq!(comments.len(), 1);
}
