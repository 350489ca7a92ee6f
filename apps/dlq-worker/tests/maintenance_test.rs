//! Maintenance pass against a migrated Postgres container

use domain_dead_letter::{
    DeadLetterConfig, DeadLetterQueue, JobStats, NewDeadLetterJob, PgDeadLetterRepository,
};
use dlq_worker::Maintenance;
use resilience::{CircuitBreakerConfig, CircuitBreakerRegistry, Resilient, RetryConfig};
use std::time::Duration;
use test_utils::{TestDataBuilder, TestDatabase};
use tokio::sync::watch;

fn maintenance(db: &TestDatabase, registry: &CircuitBreakerRegistry) -> Maintenance<PgDeadLetterRepository> {
    let queue = DeadLetterQueue::new(
        PgDeadLetterRepository::new(db.connection()),
        DeadLetterConfig::new().with_retention_days(7),
    );
    let resilient = Resilient::from_registry(
        registry,
        "postgres",
        CircuitBreakerConfig::new(),
        RetryConfig::new()
            .with_max_attempts(2)
            .with_min_delay(Duration::from_millis(10)),
    );
    Maintenance::new(queue, resilient)
}

#[tokio::test]
async fn test_pass_sweeps_expired_resolved_jobs_and_reports_stats() {
    let db = TestDatabase::new().await;
    let registry = CircuitBreakerRegistry::new();
    let maintenance = maintenance(&db, &registry);
    let data = TestDataBuilder::from_test_name("maintenance_pass");
    let queue = maintenance.queue();

    let mut ids = Vec::new();
    for n in 0..3 {
        let job = NewDeadLetterJob::new(data.job_type("export"), data.payload(n), "timeout", "Timeout");
        ids.push(queue.add_failed_job(job).await.unwrap());
    }
    queue.mark_job_resolved(ids[0]).await.unwrap();
    queue.mark_job_resolved(ids[1]).await.unwrap();

    db.execute(&format!(
        "UPDATE dead_letter_jobs SET resolved_at = now() - interval '8 days' WHERE id = '{}'",
        ids[0]
    ))
    .await;

    let report = maintenance.run_once().await.unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(
        report.stats,
        JobStats {
            total_jobs: 2,
            pending_jobs: 1,
            resolved_jobs: 1,
            ..Default::default()
        }
    );

    let second = maintenance.run_once().await.unwrap();
    assert_eq!(second.deleted, 0);

    let snapshot = registry.get("postgres").unwrap().metrics();
    assert_eq!(snapshot.failure_count, 0);
}

#[tokio::test]
async fn test_loop_stops_on_shutdown() {
    let db = TestDatabase::new().await;
    let registry = CircuitBreakerRegistry::new();
    let maintenance = maintenance(&db, &registry);

    let (tx, rx) = watch::channel(false);
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        tx.send(true).unwrap();
    };

    tokio::time::timeout(
        Duration::from_secs(10),
        async { tokio::join!(maintenance.run(Duration::from_millis(50), rx), stopper) },
    )
    .await
    .expect("maintenance loop should stop after shutdown");
}
