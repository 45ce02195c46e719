//! Drives one claimed job through manifest publication, the bulk-load
//! command, and terminal status recording.

use sqlx::PgPool;
use tracing::{info, warn};

use strload_core::config::RedshiftConfig;
use strload_store::{ClaimedJob, JobRegistry, JobStatus};

use crate::error::LoaderError;
use crate::manifest::{Manifest, ManifestStore};

pub struct Loader {
    jobs: JobRegistry,
    manifests: ManifestStore,
    /// Destination pool (Redshift speaks the postgres protocol).
    dest: PgPool,
    load_options: String,
    copy_credentials: Option<String>,
}

impl Loader {
    pub fn new(
        jobs: JobRegistry,
        manifests: ManifestStore,
        dest: PgPool,
        destination: &RedshiftConfig,
    ) -> Self {
        Self {
            jobs,
            manifests,
            dest,
            load_options: destination.load_options.clone(),
            copy_credentials: destination.copy_credentials.clone(),
        }
    }

    /// Execute a claimed job to a terminal status.
    ///
    /// The manifest is removed unconditionally after the load attempt. On
    /// failure the terminal status (`failure` for destination rejections,
    /// `error` otherwise) is recorded before the error propagates; the
    /// caller never observes an error whose job still reads `running`.
    pub async fn execute(&self, job: &ClaimedJob) -> Result<(), LoaderError> {
        let result = self.publish_and_load(job).await;

        if let Err(e) = self.manifests.delete(job.job_seq).await {
            // The load outcome stands; a leaked manifest is only noise.
            warn!(job_seq = job.job_seq, "Failed to delete manifest: {}", e);
        }

        match result {
            Ok(()) => {
                info!(
                    job_seq = job.job_seq,
                    table = %job.qualified_name(),
                    objects = job.object_urls.len(),
                    "Load succeeded"
                );
                Ok(())
            }
            Err(e) => {
                self.jobs
                    .write_result(job.job_seq, e.job_status(), &e.to_string())
                    .await?;
                Err(e)
            }
        }
    }

    async fn publish_and_load(&self, job: &ClaimedJob) -> Result<(), LoaderError> {
        let manifest = Manifest::from_urls(job.object_urls.iter().cloned());
        self.manifests.put(job.job_seq, &manifest).await?;
        let manifest_url = self.manifests.url(job.job_seq);

        match &job.work_table {
            Some(work_table) => self.load_staged(job, work_table, &manifest_url).await,
            None => self.load_direct(job, &manifest_url).await,
        }
    }

    /// Staging path: truncate the work table, load into it, then merge and
    /// record success inside one destination transaction.
    async fn load_staged(
        &self,
        job: &ClaimedJob,
        work_table: &str,
        manifest_url: &str,
    ) -> Result<(), LoaderError> {
        let merge_sql = job.merge_sql.as_deref().ok_or_else(|| {
            LoaderError::Manifest(format!(
                "{} has a work table but no merge_sql configured",
                job.qualified_name()
            ))
        })?;

        sqlx::query(&format!("TRUNCATE {}", work_table))
            .execute(&self.dest)
            .await
            .map_err(LoaderError::Destination)?;

        sqlx::query(&self.copy_statement(work_table, manifest_url))
            .execute(&self.dest)
            .await
            .map_err(classify_copy_error)?;

        let mut tx = self.dest.begin().await.map_err(LoaderError::Destination)?;
        sqlx::query(merge_sql)
            .execute(&mut *tx)
            .await
            .map_err(classify_copy_error)?;
        self.jobs
            .write_result(job.job_seq, JobStatus::Success, "")
            .await?;
        tx.commit().await.map_err(LoaderError::Destination)?;

        Ok(())
    }

    /// Direct path: load into the destination table and record success
    /// inside one destination transaction.
    async fn load_direct(&self, job: &ClaimedJob, manifest_url: &str) -> Result<(), LoaderError> {
        let mut tx = self.dest.begin().await.map_err(LoaderError::Destination)?;
        sqlx::query(&self.copy_statement(&job.qualified_name(), manifest_url))
            .execute(&mut *tx)
            .await
            .map_err(classify_copy_error)?;
        self.jobs
            .write_result(job.job_seq, JobStatus::Success, "")
            .await?;
        tx.commit().await.map_err(LoaderError::Destination)?;

        Ok(())
    }

    fn copy_statement(&self, dest_table: &str, manifest_url: &str) -> String {
        copy_statement(
            dest_table,
            manifest_url,
            self.copy_credentials.as_deref(),
            &self.load_options,
        )
    }
}

/// The bulk-load command. COPY takes no bind parameters; the table name
/// comes from the operator-maintained registry and the manifest URL is
/// built from config, never from message content.
fn copy_statement(
    dest_table: &str,
    manifest_url: &str,
    credentials: Option<&str>,
    options: &str,
) -> String {
    let credentials = credentials
        .map(|c| format!("credentials '{}' ", c))
        .unwrap_or_default();
    format!(
        "copy {} from '{}' {}manifest statupdate false compupdate false {}",
        dest_table, manifest_url, credentials, options
    )
}

/// A database-level rejection of the load is a business-rule failure;
/// anything else (connection loss, pool exhaustion, protocol errors) is an
/// execution error.
fn classify_copy_error(e: sqlx::Error) -> LoaderError {
    match e {
        sqlx::Error::Database(db) => LoaderError::JobFailure(db.to_string()),
        other => LoaderError::Destination(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_non_database_error() {
        let e = classify_copy_error(sqlx::Error::PoolTimedOut);
        assert!(matches!(e, LoaderError::Destination(_)));
        assert_eq!(e.job_status(), JobStatus::Error);
    }

    #[test]
    fn test_copy_statement_with_credentials() {
        let sql = copy_statement(
            "app.events",
            "s3://ctl/manifest-7.json",
            Some("aws_iam_role=arn:aws:iam::1:role/loader"),
            "json 'auto' gzip",
        );
        assert_eq!(
            sql,
            "copy app.events from 's3://ctl/manifest-7.json' \
             credentials 'aws_iam_role=arn:aws:iam::1:role/loader' \
             manifest statupdate false compupdate false json 'auto' gzip"
        );
    }

    #[test]
    fn test_copy_statement_without_credentials() {
        let sql = copy_statement("app.events_wk", "s3://ctl/manifest-8.json", None, "gzip");
        assert!(sql.starts_with("copy app.events_wk from 's3://ctl/manifest-8.json' manifest"));
        assert!(!sql.contains("credentials"));
    }
}
