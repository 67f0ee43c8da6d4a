//! Task queue operations: ingestion, batch selection, outcome updates and counts.

use crate::error::DatabaseError;
use crate::stage::TaskFilter;
use crate::types::{ProcessingStatus, Stage, TaskId};
use crate::{Error, Result};

use super::{Database, IngestReport, NewTask, StageCounts, StoreStats, Task, TaskPatch};

const TASK_COLUMNS: &str = r#"
    id, link, website, title, city_id, section_id,
    scraped, images_scraped, processing_status,
    retry_count, image_retry_count,
    address, image_url, image_filename,
    created_at, updated_at
"#;

const INSERT_TASK: &str = r#"
    INSERT INTO tasks (
        link, website, title, city_id, section_id,
        scraped, images_scraped, processing_status,
        retry_count, image_retry_count,
        created_at, updated_at
    ) VALUES (?, ?, ?, ?, ?, 0, 0, ?, 0, 0, ?, ?)
    ON CONFLICT(link) DO NOTHING
"#;

impl Database {
    /// Insert a new task
    ///
    /// Returns `None` without error when a task with the same link already
    /// exists; the existing row is left untouched.
    pub async fn insert_task(&self, task: &NewTask) -> Result<Option<TaskId>> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(INSERT_TASK)
            .bind(&task.link)
            .bind(&task.website)
            .bind(&task.title)
            .bind(&task.city_id)
            .bind(&task.section_id)
            .bind(ProcessingStatus::Pending)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to insert task: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            tracing::debug!(link = %task.link, "Skipping task with existing link");
            return Ok(None);
        }

        Ok(Some(TaskId(result.last_insert_rowid())))
    }

    /// Insert many tasks in one transaction, skipping links already present
    pub async fn insert_tasks(&self, tasks: &[NewTask]) -> Result<IngestReport> {
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;

        let mut report = IngestReport::default();
        for task in tasks {
            let result = sqlx::query(INSERT_TASK)
                .bind(&task.link)
                .bind(&task.website)
                .bind(&task.title)
                .bind(&task.city_id)
                .bind(&task.section_id)
                .bind(ProcessingStatus::Pending)
                .bind(now)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert task: {}",
                        e
                    )))
                })?;

            if result.rows_affected() == 0 {
                report.skipped += 1;
            } else {
                report.inserted += 1;
            }
        }

        tx.commit().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit task ingestion: {}",
                e
            )))
        })?;

        tracing::info!(
            inserted = report.inserted,
            skipped = report.skipped,
            "Ingested tasks"
        );
        Ok(report)
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get task: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Fetch up to `limit` tasks matching `filter`, oldest first
    ///
    /// Rows are not reserved. A second runner draining the same stage against
    /// this store can receive the same tasks and attempt them again; each of
    /// those attempts still increments the retry counter.
    pub async fn fetch_batch(&self, filter: &TaskFilter, limit: usize) -> Result<Vec<Task>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE {} ORDER BY id ASC LIMIT ?",
            filter.sql_predicate()
        ))
        .bind(filter.max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to fetch {} batch: {}",
                filter.stage, e
            )))
        })?;

        Ok(rows)
    }

    /// Apply an attempt outcome to a task
    ///
    /// One UPDATE statement writes the patch fields, refreshes `updated_at` and
    /// increments the patch's stage counter in place.
    pub async fn update_task(&self, id: TaskId, patch: &TaskPatch) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let counter = patch.stage().retry_column();

        let fields = match patch {
            TaskPatch::Scraped { .. } => "scraped = 1, address = ?, image_url = ?,",
            TaskPatch::ImageSaved { .. } => "images_scraped = 1, image_filename = ?,",
            TaskPatch::Failed { .. } => "",
        };
        let sql = format!(
            "UPDATE tasks SET {fields} processing_status = ?, {counter} = {counter} + 1, updated_at = ? WHERE id = ?"
        );

        let mut query = sqlx::query(&sql);
        match patch {
            TaskPatch::Scraped {
                address,
                image_url,
            } => {
                query = query.bind(address).bind(image_url);
            }
            TaskPatch::ImageSaved { image_filename } => {
                query = query.bind(image_filename);
            }
            TaskPatch::Failed { .. } => {}
        }

        let result = query
            .bind(patch.status())
            .bind(now)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to update task: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::Database(DatabaseError::NotFound(format!(
                "task {} not found",
                id
            ))));
        }

        Ok(())
    }

    /// Count tasks matching `filter`
    pub async fn count_tasks(&self, filter: &TaskFilter) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM tasks WHERE {}",
            filter.sql_predicate()
        ))
        .bind(filter.max_retries)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count {} tasks: {}",
                filter.stage, e
            )))
        })?;

        Ok(count as u64)
    }

    /// Totals reported at the end of a stage run
    ///
    /// `failed` counts tasks still waiting on the stage whose latest attempt
    /// failed. `retry_exceeded` counts every task whose stage counter reached
    /// `max_retries`, completed or not.
    pub async fn stage_counts(&self, stage: Stage, max_retries: u32) -> Result<StageCounts> {
        let done = stage.done_column();
        let counter = stage.retry_column();
        let waiting = stage.waiting_predicate();

        let (processed, failed, retry_exceeded): (i64, i64, i64) = sqlx::query_as(&format!(
            r#"
            SELECT
                COALESCE(SUM({done} = 1), 0),
                COALESCE(SUM({waiting} AND processing_status = ?), 0),
                COALESCE(SUM({counter} >= ?), 0)
            FROM tasks
            "#
        ))
        .bind(ProcessingStatus::Failed)
        .bind(max_retries)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count {} results: {}",
                stage, e
            )))
        })?;

        Ok(StageCounts {
            processed: processed as u64,
            failed: failed as u64,
            retry_exceeded: retry_exceeded as u64,
        })
    }

    /// Store-wide counts by status and completion flag
    pub async fn store_stats(&self) -> Result<StoreStats> {
        let stats = sqlx::query_as::<_, StoreStats>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(processing_status = 'pending'), 0) AS pending,
                COALESCE(SUM(processing_status = 'processed'), 0) AS processed,
                COALESCE(SUM(processing_status = 'failed'), 0) AS failed,
                COALESCE(SUM(scraped), 0) AS scraped,
                COALESCE(SUM(images_scraped), 0) AS images_scraped
            FROM tasks
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to collect store stats: {}",
                e
            )))
        })?;

        Ok(stats)
    }
}
