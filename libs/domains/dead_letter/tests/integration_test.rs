//! Integration tests for the dead-letter store
//!
//! Every test starts its own migrated Postgres container through
//! `test_utils::TestDatabase`, so they are free to assert on global counts.

use chrono::{DateTime, TimeDelta, Utc};
use domain_dead_letter::*;
use test_utils::assertions::assert_same_items;
use test_utils::{TestDataBuilder, TestDatabase};
use uuid::Uuid;

fn queue(db: &TestDatabase) -> DeadLetterQueue<PgDeadLetterRepository> {
    DeadLetterQueue::new(
        PgDeadLetterRepository::new(db.connection()),
        DeadLetterConfig::default(),
    )
}

fn failed_job(data: &TestDataBuilder, n: u32) -> NewDeadLetterJob {
    NewDeadLetterJob::new(
        data.job_type("email"),
        data.payload(n),
        "SMTP connection refused",
        "ConnectionError",
    )
    .with_original_job_id(data.original_job_id(n))
}

fn assert_scheduled_within(
    next_retry_at: Option<DateTime<Utc>>,
    before: DateTime<Utc>,
    after: DateTime<Utc>,
    delay: TimeDelta,
) {
    let at = next_retry_at.expect("retry should be scheduled");
    let slack = TimeDelta::milliseconds(1);
    assert!(
        at >= before + delay - slack && at <= after + delay + slack,
        "next_retry_at {at} not within {delay} of [{before}, {after}]"
    );
}

#[tokio::test]
async fn test_added_job_is_pending_and_retryable() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("added_job_is_pending");

    let id = queue.add_failed_job(failed_job(&data, 1)).await.unwrap();

    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.max_retries, DEFAULT_MAX_RETRIES);
    assert_eq!(job.payload, data.payload(1));
    assert_eq!(job.original_job_id, Some(data.original_job_id(1)));
    assert_eq!(job.error_type.as_deref(), Some("ConnectionError"));
    assert!(job.next_retry_at.is_none());
    assert_eq!(job.job_metadata, serde_json::json!({}));

    let retryable = queue
        .get_retryable_jobs(Some(&data.job_type("email")), None)
        .await
        .unwrap();
    assert_eq!(retryable.len(), 1);
    assert_eq!(retryable[0].id, id);
}

#[tokio::test]
async fn test_retryable_jobs_filter_by_type_and_respect_limit() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("retryable_filter");

    let first = queue.add_failed_job(failed_job(&data, 1)).await.unwrap();
    let second = queue.add_failed_job(failed_job(&data, 2)).await.unwrap();
    queue
        .add_failed_job(NewDeadLetterJob::new(
            data.job_type("webhook"),
            data.payload(3),
            "502 Bad Gateway",
            "HttpError",
        ))
        .await
        .unwrap();

    let emails = queue
        .get_retryable_jobs(Some(&data.job_type("email")), None)
        .await
        .unwrap();
    assert_eq!(emails.iter().map(|j| j.id).collect::<Vec<_>>(), vec![first, second]);

    let all = queue.get_retryable_jobs(None, None).await.unwrap();
    assert_eq!(all.len(), 3);

    let limited = queue.get_retryable_jobs(None, Some(1)).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, first);
}

#[tokio::test]
async fn test_single_retry_budget_goes_straight_to_dead_letter() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("single_retry_budget");

    let id = queue
        .add_failed_job(failed_job(&data, 1).with_max_retries(1))
        .await
        .unwrap();

    assert!(
        queue
            .increment_retry_count(id, Some("still refused".to_string()), None)
            .await
            .unwrap()
    );

    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::DeadLetter);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.error_message.as_deref(), Some("still refused"));
    // error_type not supplied, so the original is kept
    assert_eq!(job.error_type.as_deref(), Some("ConnectionError"));

    let dead = queue.get_dead_letter_jobs(None, None).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert!(queue.get_retryable_jobs(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_backoff_doubles_until_dead_letter() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("backoff_doubles");

    let id = queue
        .add_failed_job(failed_job(&data, 1).with_max_retries(3))
        .await
        .unwrap();

    let before = Utc::now();
    queue.increment_retry_count(id, None, None).await.unwrap();
    let after = Utc::now();
    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Retrying);
    assert_eq!(job.retry_count, 1);
    assert_scheduled_within(job.next_retry_at, before, after, TimeDelta::minutes(2));

    // Not due yet
    assert!(queue.get_retryable_jobs(None, None).await.unwrap().is_empty());

    let before = Utc::now();
    queue.increment_retry_count(id, None, None).await.unwrap();
    let after = Utc::now();
    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Retrying);
    assert_eq!(job.retry_count, 2);
    assert_scheduled_within(job.next_retry_at, before, after, TimeDelta::minutes(4));

    queue.increment_retry_count(id, None, None).await.unwrap();
    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::DeadLetter);
    assert_eq!(job.retry_count, 3);
}

#[tokio::test]
async fn test_retrying_job_becomes_due_after_next_retry_at() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("retrying_becomes_due");

    let id = queue.add_failed_job(failed_job(&data, 1)).await.unwrap();
    queue.increment_retry_count(id, None, None).await.unwrap();
    assert!(queue.get_retryable_jobs(None, None).await.unwrap().is_empty());

    db.execute(&format!(
        "UPDATE dead_letter_jobs SET next_retry_at = now() - interval '1 second' WHERE id = '{id}'"
    ))
    .await;

    let due = queue.get_retryable_jobs(None, None).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].status, JobStatus::Retrying);
}

#[tokio::test]
async fn test_claim_is_exclusive() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("claim_exclusive");

    let id = queue.add_failed_job(failed_job(&data, 1)).await.unwrap();

    let (a, b) = tokio::join!(queue.mark_job_processing(id), queue.mark_job_processing(id));
    let claims = [a.unwrap(), b.unwrap()];
    assert_eq!(claims.iter().filter(|c| **c).count(), 1);

    assert_eq!(queue.get_job(id).await.unwrap().status, JobStatus::Processing);
    assert!(!queue.mark_job_processing(id).await.unwrap());
    assert!(queue.get_retryable_jobs(None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_release_restores_fetched_state() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("release_claim");

    let id = queue.add_failed_job(failed_job(&data, 1)).await.unwrap();
    queue.increment_retry_count(id, None, None).await.unwrap();
    let fetched = queue.get_job(id).await.unwrap();
    assert_eq!(fetched.status, JobStatus::Retrying);

    // Not claimed yet
    assert!(!queue.release_job(&fetched).await.unwrap());

    assert!(queue.mark_job_processing(id).await.unwrap());
    assert!(queue.release_job(&fetched).await.unwrap());

    let released = queue.get_job(id).await.unwrap();
    assert_eq!(released.status, JobStatus::Retrying);
    assert_eq!(released.retry_count, 1);
    assert_eq!(released.next_retry_at, fetched.next_retry_at);

    assert!(!queue.release_job(&fetched).await.unwrap());
}

#[tokio::test]
async fn test_resolve_stamps_resolved_at_once() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("resolve_once");

    let id = queue.add_failed_job(failed_job(&data, 1)).await.unwrap();
    assert!(queue.mark_job_processing(id).await.unwrap());
    assert!(queue.mark_job_resolved(id).await.unwrap());

    let resolved = queue.get_job(id).await.unwrap();
    assert_eq!(resolved.status, JobStatus::Resolved);
    let resolved_at = resolved.resolved_at.expect("resolved_at set");

    assert!(queue.mark_job_resolved(id).await.unwrap());
    assert_eq!(queue.get_job(id).await.unwrap().resolved_at, Some(resolved_at));
}

#[tokio::test]
async fn test_unknown_ids() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let missing = Uuid::now_v7();

    assert!(!queue.mark_job_processing(missing).await.unwrap());
    assert!(!queue.mark_job_resolved(missing).await.unwrap());
    assert!(!queue.increment_retry_count(missing, None, None).await.unwrap());
    assert!(matches!(
        queue.get_job(missing).await,
        Err(DeadLetterError::NotFound(id)) if id == missing
    ));
    assert!(matches!(
        queue.requeue_dead_letter(missing).await,
        Err(DeadLetterError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_cleanup_only_removes_old_resolved_jobs() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("cleanup_old_resolved");

    let old = queue.add_failed_job(failed_job(&data, 1)).await.unwrap();
    let recent = queue.add_failed_job(failed_job(&data, 2)).await.unwrap();
    let pending = queue.add_failed_job(failed_job(&data, 3)).await.unwrap();
    let dead = queue
        .add_failed_job(failed_job(&data, 4).with_max_retries(1))
        .await
        .unwrap();

    queue.mark_job_resolved(old).await.unwrap();
    queue.mark_job_resolved(recent).await.unwrap();
    queue.increment_retry_count(dead, None, None).await.unwrap();

    db.execute(&format!(
        "UPDATE dead_letter_jobs SET resolved_at = now() - interval '40 days' WHERE id = '{old}'"
    ))
    .await;
    // Old but never resolved: must survive
    db.execute(&format!(
        "UPDATE dead_letter_jobs SET created_at = now() - interval '90 days' WHERE id IN ('{pending}', '{dead}')"
    ))
    .await;

    assert_eq!(queue.cleanup_resolved_jobs(30).await.unwrap(), 1);

    assert!(matches!(queue.get_job(old).await, Err(DeadLetterError::NotFound(_))));
    for id in [recent, pending, dead] {
        assert!(queue.get_job(id).await.is_ok());
    }

    assert_eq!(queue.cleanup_resolved_jobs(30).await.unwrap(), 0);
}

#[tokio::test]
async fn test_requeue_dead_letter_resets_budget() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("requeue_dead_letter");

    let id = queue
        .add_failed_job(failed_job(&data, 1).with_max_retries(1))
        .await
        .unwrap();

    let err = queue.requeue_dead_letter(id).await.unwrap_err();
    assert!(matches!(
        err,
        DeadLetterError::InvalidState { actual: JobStatus::Pending, .. }
    ));

    queue.increment_retry_count(id, None, None).await.unwrap();
    let requeued = queue.requeue_dead_letter(id).await.unwrap();
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.retry_count, 0);
    assert!(requeued.next_retry_at.is_none());

    let retryable = queue.get_retryable_jobs(None, None).await.unwrap();
    assert_eq!(retryable.len(), 1);
    assert_eq!(retryable[0].id, id);
}

#[tokio::test]
async fn test_requeue_recovers_stuck_processing_job() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("requeue_stuck");

    let id = queue.add_failed_job(failed_job(&data, 1)).await.unwrap();
    queue.increment_retry_count(id, None, None).await.unwrap();
    assert!(queue.mark_job_processing(id).await.unwrap());

    let requeued = queue.requeue_dead_letter(id).await.unwrap();
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.retry_count, 0);
    assert!(requeued.next_retry_at.is_none());
    assert!(queue.mark_job_processing(id).await.unwrap());
}

#[tokio::test]
async fn test_cleanup_with_huge_retention_deletes_nothing() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("cleanup_huge_retention");

    let id = queue.add_failed_job(failed_job(&data, 1)).await.unwrap();
    queue.mark_job_resolved(id).await.unwrap();

    assert_eq!(queue.cleanup_resolved_jobs(u32::MAX).await.unwrap(), 0);
    assert!(queue.get_job(id).await.is_ok());
}

#[tokio::test]
async fn test_job_stats_count_every_status() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);
    let data = TestDataBuilder::from_test_name("job_stats");

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(
            queue
                .add_failed_job(failed_job(&data, n).with_max_retries(2))
                .await
                .unwrap(),
        );
    }

    queue.mark_job_processing(ids[0]).await.unwrap();
    queue.mark_job_resolved(ids[1]).await.unwrap();
    queue.increment_retry_count(ids[2], None, None).await.unwrap();
    queue.increment_retry_count(ids[3], None, None).await.unwrap();
    queue.increment_retry_count(ids[3], None, None).await.unwrap();

    let stats = queue.get_job_stats().await.unwrap();
    assert_eq!(
        stats,
        JobStats {
            total_jobs: 5,
            pending_jobs: 1,
            processing_jobs: 1,
            failed_jobs: 0,
            retrying_jobs: 1,
            dead_letter_jobs: 1,
            resolved_jobs: 1,
        }
    );

    let dead = queue.get_dead_letter_jobs(None, None).await.unwrap();
    assert_same_items(
        &dead.iter().map(|j| j.id).collect::<Vec<_>>(),
        &[ids[3]],
        "dead-lettered ids",
    );
}

#[tokio::test]
async fn test_invalid_input_is_rejected_before_insert() {
    let db = TestDatabase::new().await;
    let queue = queue(&db);

    let err = queue
        .add_failed_job(NewDeadLetterJob::new("", serde_json::json!({}), "boom", "Error"))
        .await
        .unwrap_err();
    assert!(matches!(err, DeadLetterError::Validation(_)));
    assert_eq!(queue.get_job_stats().await.unwrap().total_jobs, 0);
}
