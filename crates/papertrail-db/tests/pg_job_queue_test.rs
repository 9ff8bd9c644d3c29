//! PostgreSQL job queue integration tests.
//!
//! These run against a live database and are skipped when `DATABASE_URL` is
//! not set. Each test uses its own work ids so runs do not interfere.

use papertrail_core::{JobQueue, JobStatus};
use papertrail_db::Database;
use uuid::Uuid;

async fn setup_database() -> Option<Database> {
    let database_url = std::env::var("DATABASE_URL").ok()?;
    let db = Database::connect(&database_url)
        .await
        .expect("Failed to connect to test database");
    db.migrate().await.expect("Failed to run migrations");
    Some(db)
}

fn unique_work_id() -> String {
    format!("W{}", Uuid::new_v4().as_u128() % 1_000_000_000_000)
}

async fn insert_work(db: &Database, work_id: &str, abstract_text: Option<&str>) {
    sqlx::query("INSERT INTO works (id, abstract) VALUES ($1, $2)")
        .bind(work_id)
        .bind(abstract_text)
        .execute(db.pool())
        .await
        .expect("Failed to insert work");
}

#[tokio::test]
async fn test_claim_complete_round() {
    let Some(db) = setup_database().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let work_id = unique_work_id();
    insert_work(&db, &work_id, Some("An abstract.")).await;

    // Highest priority keeps this job ahead of backlog left by other tests.
    let job_id = db.jobs.enqueue(&work_id, i32::MAX, None).await.unwrap();
    assert!(db.jobs.has_open_job(&work_id).await.unwrap());

    let claimed = db.jobs.claim_next().await.unwrap().expect("job claimed");
    assert_eq!(claimed.id, job_id);
    assert_eq!(claimed.status, JobStatus::Processing);
    assert!(claimed.started_at.is_some());

    let tags = vec!["a".to_string(), "b".to_string()];
    db.jobs.complete(job_id, "Summary.", &tags).await.unwrap();

    let job = db.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());

    let work = db.jobs.get_work(&work_id).await.unwrap().unwrap();
    assert_eq!(work.summary.as_deref(), Some("Summary."));
    assert_eq!(work.ai_tags, Some(tags));
    assert!(work.summary_generated);
    assert!(!db.jobs.has_open_job(&work_id).await.unwrap());

    // Terminal jobs stay terminal.
    assert!(db.jobs.fail(job_id, "late").await.is_err());
}

#[tokio::test]
async fn test_fail_truncates_error() {
    let Some(db) = setup_database().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let work_id = unique_work_id();
    insert_work(&db, &work_id, None).await;

    let job_id = db.jobs.enqueue(&work_id, 0, None).await.unwrap();
    db.jobs.fail(job_id, &"x".repeat(2000)).await.unwrap();

    let job = db.jobs.get(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.unwrap().chars().count(), 500);

    let latest = db.jobs.latest_job_for_work(&work_id).await.unwrap().unwrap();
    assert_eq!(latest.id, job_id);
}

#[tokio::test]
async fn test_work_abstract_lookup() {
    let Some(db) = setup_database().await else {
        eprintln!("DATABASE_URL not set, skipping");
        return;
    };
    let with_abstract = unique_work_id();
    let without_abstract = unique_work_id();
    insert_work(&db, &with_abstract, Some("Stored abstract.")).await;
    insert_work(&db, &without_abstract, None).await;

    assert_eq!(
        db.jobs.work_abstract(&with_abstract).await.unwrap().as_deref(),
        Some("Stored abstract.")
    );
    assert!(db.jobs.work_abstract(&without_abstract).await.unwrap().is_none());
    assert!(db.jobs.work_abstract("W0").await.unwrap().is_none());
}
