//! Database layer for place-harvest
//!
//! Handles SQLite persistence of the task queue shared by both pipeline stages.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`tasks`]: Task ingestion, batch selection, outcome updates and counts
//!
//! The store never reserves the rows it hands out. Two runners draining the
//! same stage against one database can select and attempt the same task; see
//! [`Database::fetch_batch`].

use crate::types::{ProcessingStatus, Stage, TaskId};
use serde::Serialize;
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod tasks;

/// New task to be inserted by the ingestion side
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    /// Target page locator (unique across the store)
    pub link: String,
    /// Website listed for the place
    pub website: Option<String>,
    /// Place title from the source listing
    pub title: Option<String>,
    /// Opaque city identifier
    pub city_id: Option<String>,
    /// Opaque section identifier
    pub section_id: Option<String>,
}

impl NewTask {
    /// Task with only a link set
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            ..Default::default()
        }
    }
}

/// Task record from database
#[derive(Debug, Clone, FromRow)]
pub struct Task {
    /// Unique database ID
    pub id: TaskId,
    /// Target page locator
    pub link: String,
    /// Website listed for the place
    pub website: Option<String>,
    /// Place title from the source listing
    pub title: Option<String>,
    /// Opaque city identifier
    pub city_id: Option<String>,
    /// Opaque section identifier
    pub section_id: Option<String>,
    /// Stage A completed
    pub scraped: bool,
    /// Stage B completed
    pub images_scraped: bool,
    /// Outcome of the latest attempt
    pub processing_status: ProcessingStatus,
    /// Stage A attempts so far
    pub retry_count: u32,
    /// Stage B attempts so far
    pub image_retry_count: u32,
    /// Address extracted by Stage A
    pub address: Option<String>,
    /// Image URL extracted by Stage A
    pub image_url: Option<String>,
    /// File written by Stage B, relative to the image output directory
    pub image_filename: Option<String>,
    /// Unix timestamp when the task was ingested
    pub created_at: i64,
    /// Unix timestamp of the last mutation
    pub updated_at: i64,
}

/// Outcome of one attempt, as written back to the store
///
/// Each variant also increments the retry counter of its stage. Success variants
/// carry their required fields, so a task cannot be marked processed without them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPatch {
    /// Stage A succeeded
    Scraped {
        /// Extracted address (page title)
        address: String,
        /// Extracted image URL
        image_url: String,
    },
    /// Stage B succeeded
    ImageSaved {
        /// Name of the written file
        image_filename: String,
    },
    /// Attempt failed at the given stage
    Failed {
        /// Stage whose counter is incremented
        stage: Stage,
    },
}

impl TaskPatch {
    /// Stage whose retry counter this patch increments
    pub fn stage(&self) -> Stage {
        match self {
            TaskPatch::Scraped { .. } => Stage::Scrape,
            TaskPatch::ImageSaved { .. } => Stage::Images,
            TaskPatch::Failed { stage } => *stage,
        }
    }

    /// Status written by this patch
    pub fn status(&self) -> ProcessingStatus {
        match self {
            TaskPatch::Scraped { .. } | TaskPatch::ImageSaved { .. } => {
                ProcessingStatus::Processed
            }
            TaskPatch::Failed { .. } => ProcessingStatus::Failed,
        }
    }
}

/// Per-stage totals used for the end-of-run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageCounts {
    /// Tasks whose completion flag for the stage is set
    pub processed: u64,
    /// Tasks still waiting on the stage whose last attempt failed
    pub failed: u64,
    /// Tasks whose stage counter reached the ceiling, whatever their status
    pub retry_exceeded: u64,
}

/// Store-wide counts
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow, Serialize)]
pub struct StoreStats {
    /// All tasks
    pub total: i64,
    /// Tasks never attempted
    pub pending: i64,
    /// Tasks whose latest attempt succeeded
    pub processed: i64,
    /// Tasks whose latest attempt failed
    pub failed: i64,
    /// Tasks that finished Stage A
    pub scraped: i64,
    /// Tasks that finished Stage B
    pub images_scraped: i64,
}

/// Result of a bulk ingestion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Rows inserted
    pub inserted: u64,
    /// Rows skipped because their link already existed
    pub skipped: u64,
}

/// Database handle for place-harvest
pub struct Database {
    pool: SqlitePool,
}
