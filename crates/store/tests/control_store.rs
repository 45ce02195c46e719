//! Control-store integration tests against live PostgreSQL.
//!
//! These exercise the conditional SQL that the unit suite cannot: the
//! windowing trigger, object assignment, duplicate-URL idempotency, and
//! the job-claim guards. Every test truncates the control tables first,
//! so they are `#[ignore]`d and must run single-threaded against a
//! dedicated test database:
//!
//!     DATABASE_URL=postgres://localhost/strload_test \
//!         cargo test -p strload-store -- --ignored --test-threads=1

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use strload_core::event::ObjectCreated;
use strload_store::{JobRegistry, JobStatus, ObjectBuffer, TaskStore};

async fn connect() -> PgPool {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must point at a disposable test database");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await
        .unwrap();
    sqlx::migrate!("../../migrations").run(&pool).await.unwrap();

    sqlx::query(
        "TRUNCATE strload_task_objects, strload_jobs, strload_tasks,
                  strload_objects, strload_tables
         RESTART IDENTITY CASCADE",
    )
    .execute(&pool)
    .await
    .unwrap();

    pool
}

async fn register_table(pool: &PgPool, table: &str, batch_size: i32, interval: i32) {
    sqlx::query(
        "INSERT INTO strload_tables (schema_name, table_name, load_batch_size, load_interval)
         VALUES ('app', $1, $2, $3)",
    )
    .bind(table)
    .bind(batch_size)
    .bind(interval)
    .execute(pool)
    .await
    .unwrap();
}

fn make_obj(table: &str, url: &str) -> ObjectCreated {
    ObjectCreated {
        url: url.to_string(),
        size: 1024,
        schema: "app".to_string(),
        table: table.to_string(),
        time: Utc::now(),
        event_name: "ObjectCreated:Put".to_string(),
    }
}

async fn task_count(pool: &PgPool, table: &str) -> i64 {
    let (n,): (i64,) =
        sqlx::query_as("SELECT count(*) FROM strload_tasks WHERE table_name = $1")
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap();
    n
}

async fn unassigned_count(pool: &PgPool, table: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(
        "SELECT count(*)
         FROM strload_objects
         LEFT OUTER JOIN strload_task_objects USING (object_seq)
         WHERE task_seq IS NULL AND table_name = $1",
    )
    .bind(table)
    .fetch_one(pool)
    .await
    .unwrap();
    n
}

#[tokio::test]
#[ignore]
async fn test_windowing_cuts_one_task_of_oldest_objects() {
    let pool = connect().await;
    register_table(&pool, "events", 5, 3600).await;
    let buffer = ObjectBuffer::new(pool.clone());

    for i in 0..6 {
        let inserted = buffer
            .put(&make_obj("events", &format!("s3://bucket/{:04}.gz", i)))
            .await
            .unwrap();
        assert!(inserted);
    }

    // Backlog (6) exceeds batch size (5): exactly one task, holding the
    // five oldest objects in arrival order.
    let task_seqs = buffer.flush().await.unwrap();
    assert_eq!(task_seqs.len(), 1);
    assert_eq!(task_count(&pool, "events").await, 1);

    let task = TaskStore::new(pool.clone())
        .get_task(task_seqs[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        task.object_urls,
        (0..5)
            .map(|i| format!("s3://bucket/{:04}.gz", i))
            .collect::<Vec<_>>()
    );
    assert_eq!(unassigned_count(&pool, "events").await, 1);

    // Remainder (1) is under the batch size and the interval has not
    // elapsed: nothing further to cut.
    assert!(buffer.flush().await.unwrap().is_empty());
    assert_eq!(task_count(&pool, "events").await, 1);
}

#[tokio::test]
#[ignore]
async fn test_interval_trigger_cuts_followup_task() {
    let pool = connect().await;
    register_table(&pool, "clicks", 100, 0).await;
    let buffer = ObjectBuffer::new(pool.clone());

    // First arrival: no prior task, cut immediately.
    buffer.put(&make_obj("clicks", "s3://bucket/a.gz")).await.unwrap();
    assert_eq!(buffer.flush().await.unwrap().len(), 1);

    // Second arrival: the zero-second interval has elapsed since the
    // previous task, so the small backlog is cut anyway.
    buffer.put(&make_obj("clicks", "s3://bucket/b.gz")).await.unwrap();
    let task_seqs = buffer.flush().await.unwrap();
    assert_eq!(task_seqs.len(), 1);
    assert_eq!(task_count(&pool, "clicks").await, 2);

    let task = TaskStore::new(pool.clone())
        .get_task(task_seqs[0])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.object_urls, vec!["s3://bucket/b.gz"]);
    assert_eq!(unassigned_count(&pool, "clicks").await, 0);
}

#[tokio::test]
#[ignore]
async fn test_duplicate_url_is_ignored() {
    let pool = connect().await;
    register_table(&pool, "events", 10, 3600).await;
    let buffer = ObjectBuffer::new(pool.clone());

    assert!(buffer.put(&make_obj("events", "s3://bucket/dup.gz")).await.unwrap());
    assert!(!buffer.put(&make_obj("events", "s3://bucket/dup.gz")).await.unwrap());

    // Unconfigured destination inserts nothing either.
    assert!(!buffer.put(&make_obj("nosuch", "s3://bucket/x.gz")).await.unwrap());

    let (n,): (i64,) = sqlx::query_as("SELECT count(*) FROM strload_objects")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(n, 1);
}

#[tokio::test]
#[ignore]
async fn test_claim_rerun_guard_is_exactly_once() {
    let pool = connect().await;
    register_table(&pool, "events", 10, 3600).await;
    let buffer = ObjectBuffer::new(pool.clone());

    buffer.put(&make_obj("events", "s3://bucket/a.gz")).await.unwrap();
    let task_seqs = buffer.flush().await.unwrap();
    let task_seq = task_seqs[0];

    let jobs = JobRegistry::new(pool.clone(), "it-worker");

    let job = jobs.claim(task_seq, false).await.unwrap().unwrap();
    assert_eq!(job.task_seq, task_seq);
    assert_eq!(job.object_urls, vec!["s3://bucket/a.gz"]);

    // A second claim is rejected while the first job exists, running or
    // terminal, unless rerun relaxes the guard.
    assert!(jobs.claim(task_seq, false).await.unwrap().is_none());

    jobs.write_result(job.job_seq, JobStatus::Success, "").await.unwrap();
    assert!(jobs.claim(task_seq, false).await.unwrap().is_none());

    let rerun = jobs.claim(task_seq, true).await.unwrap().unwrap();
    assert_ne!(rerun.job_seq, job.job_seq);
    assert_eq!(rerun.task_seq, task_seq);

    // Claiming a task that does not exist is also a clean None.
    assert!(jobs.claim(999_999, false).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
async fn test_terminal_status_is_written_once() {
    let pool = connect().await;
    register_table(&pool, "events", 10, 3600).await;
    let buffer = ObjectBuffer::new(pool.clone());

    buffer.put(&make_obj("events", "s3://bucket/a.gz")).await.unwrap();
    let task_seq = buffer.flush().await.unwrap()[0];

    let jobs = JobRegistry::new(pool.clone(), "it-worker");
    let job = jobs.claim(task_seq, false).await.unwrap().unwrap();

    jobs.write_result(job.job_seq, JobStatus::Success, "").await.unwrap();
    // The second terminal write hits no running row and changes nothing.
    jobs.write_result(job.job_seq, JobStatus::Failure, "late failure").await.unwrap();

    let (status, message): (String, String) =
        sqlx::query_as("SELECT status, message FROM strload_jobs WHERE job_seq = $1")
            .bind(job.job_seq)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "success");
    assert_eq!(message, "");
}

#[tokio::test]
#[ignore]
async fn test_claim_next_is_fifo_and_exclusive() {
    let pool = connect().await;
    register_table(&pool, "first", 10, 3600).await;
    register_table(&pool, "second", 10, 3600).await;
    let buffer = ObjectBuffer::new(pool.clone());

    buffer.put(&make_obj("first", "s3://bucket/f.gz")).await.unwrap();
    buffer.put(&make_obj("second", "s3://bucket/s.gz")).await.unwrap();
    let mut task_seqs = buffer.flush().await.unwrap();
    task_seqs.sort();
    assert_eq!(task_seqs.len(), 2);

    let jobs = JobRegistry::new(pool.clone(), "it-worker");

    // Oldest task first, each task claimed exactly once, then empty.
    let a = jobs.claim_next().await.unwrap().unwrap();
    let b = jobs.claim_next().await.unwrap().unwrap();
    assert_eq!(a.task_seq, task_seqs[0]);
    assert_eq!(b.task_seq, task_seqs[1]);
    assert!(jobs.claim_next().await.unwrap().is_none());
}
