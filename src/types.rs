//! Core types for place-harvest

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Unique identifier for a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl PartialEq<i64> for TaskId {
    fn eq(&self, other: &i64) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Processing status of a task, as stored in the `processing_status` column
///
/// The status holds the outcome of the most recent attempt of whichever stage
/// touched the task last. Exclusion of exhausted tasks is not a status: it falls
/// out of the retry counter in the eligibility filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Never attempted
    #[default]
    Pending,
    /// Last attempt succeeded
    Processed,
    /// Last attempt failed
    Failed,
}

impl ProcessingStatus {
    /// Column representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processed" => Ok(ProcessingStatus::Processed),
            "failed" => Ok(ProcessingStatus::Failed),
            other => Err(format!("unknown processing status: {other}")),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for ProcessingStatus {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <&str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ProcessingStatus {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ProcessingStatus {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(s.parse()?)
    }
}

/// Pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Stage A: fetch the place page, extract address and image URL
    Scrape,
    /// Stage B: download the image found by Stage A
    Images,
}

impl Stage {
    /// Both stages, in dependency order
    pub const ALL: [Stage; 2] = [Stage::Scrape, Stage::Images];

    /// Short lowercase name used in logs and events
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Scrape => "scrape",
            Stage::Images => "images",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress snapshot emitted after every batch
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Stage being drained
    pub stage: Stage,
    /// 1-based batch index within this run
    pub batch_number: u64,
    /// Tasks processed successfully so far in this run
    pub processed_count: u64,
    /// Failed attempts so far in this run
    pub failed_count: u64,
    /// Eligible tasks counted when the run started
    pub total_count: u64,
    /// `processed_count / total_count` as a percentage
    pub percentage_complete: f64,
    /// Seconds since the run started
    pub elapsed_secs: f64,
}

/// Final statistics of one stage run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Stage that was drained
    pub stage: Option<Stage>,
    /// Eligible tasks counted at start
    pub total_eligible: u64,
    /// Number of batches executed
    pub batches: u64,
    /// Attempts that ended in `processed` during this run
    pub succeeded: u64,
    /// Attempts that ended in `failed` during this run
    pub failed: u64,
    /// Tasks in the store that have completed this stage
    pub processed: u64,
    /// Tasks in the store whose last attempt at this stage failed
    pub failed_in_store: u64,
    /// Tasks whose retry counter for this stage reached the ceiling
    pub retry_exceeded: u64,
    /// Wall-clock duration of the run in seconds
    pub elapsed_secs: f64,
}

/// Event emitted while a pipeline stage runs
///
/// Consumers subscribe through [`crate::Pipeline::subscribe`]; the runner never
/// blocks on slow subscribers (lagging receivers simply miss events).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A stage run started
    RunStarted {
        /// Stage being drained
        stage: Stage,
        /// Eligible tasks at start
        total_eligible: u64,
    },

    /// One task attempt succeeded
    TaskProcessed {
        /// Stage that processed the task
        stage: Stage,
        /// Task ID
        id: TaskId,
    },

    /// One task attempt failed
    TaskFailed {
        /// Stage that attempted the task
        stage: Stage,
        /// Task ID
        id: TaskId,
        /// Failure class
        kind: FailureKind,
        /// Error message
        error: String,
    },

    /// A batch finished
    BatchCompleted(BatchProgress),

    /// A stage run drained
    RunFinished(RunSummary),
}
