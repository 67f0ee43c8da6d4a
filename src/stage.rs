//! Per-stage task state machine rules
//!
//! Both stages share one record and one state machine (`pending → processed |
//! failed`, with `failed` staying selectable until the stage's counter hits its
//! ceiling). What differs between them lives here: which flag marks completion,
//! which counter is the retry budget, what the prerequisite is and which field
//! holds the attempt's target.

use crate::db::{Task, TaskPatch};
use crate::error::ExtractError;
use crate::extractor::StageOutput;
use crate::types::Stage;

/// Eligibility filter for one stage's batch fetch
///
/// A task matches when the stage's completion flag is false, the prerequisite
/// stage (if any) is complete and the stage's retry counter is below
/// `max_retries`. Exclusion of exhausted tasks happens only here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TaskFilter {
    /// Stage whose eligibility is being tested
    pub stage: Stage,
    /// Retry ceiling for the stage
    pub max_retries: u32,
}

impl TaskFilter {
    /// Filter for `stage` with the given retry ceiling
    pub fn new(stage: Stage, max_retries: u32) -> Self {
        Self { stage, max_retries }
    }

    /// In-memory evaluation of the filter
    pub fn matches(&self, task: &Task) -> bool {
        self.stage.is_eligible(task, self.max_retries)
    }

    /// SQL predicate with one `?` placeholder for `max_retries`
    pub(crate) fn sql_predicate(&self) -> String {
        format!(
            "{} AND {} < ?",
            self.stage.waiting_predicate(),
            self.stage.retry_column()
        )
    }
}

impl Stage {
    /// Column holding this stage's attempt counter
    pub(crate) fn retry_column(&self) -> &'static str {
        match self {
            Stage::Scrape => "retry_count",
            Stage::Images => "image_retry_count",
        }
    }

    /// Column set once this stage completes
    pub(crate) fn done_column(&self) -> &'static str {
        match self {
            Stage::Scrape => "scraped",
            Stage::Images => "images_scraped",
        }
    }

    /// Tasks that still need this stage and whose prerequisite is met
    pub(crate) fn waiting_predicate(&self) -> &'static str {
        match self {
            Stage::Scrape => "scraped = 0",
            Stage::Images => "scraped = 1 AND images_scraped = 0",
        }
    }

    /// Whether this stage already completed for `task`
    pub fn is_done(&self, task: &Task) -> bool {
        match self {
            Stage::Scrape => task.scraped,
            Stage::Images => task.images_scraped,
        }
    }

    /// Attempts made by this stage on `task`
    pub fn attempts(&self, task: &Task) -> u32 {
        match self {
            Stage::Scrape => task.retry_count,
            Stage::Images => task.image_retry_count,
        }
    }

    /// Whether `task` may be attempted by this stage
    pub fn is_eligible(&self, task: &Task, max_retries: u32) -> bool {
        let prerequisite_met = match self {
            Stage::Scrape => true,
            Stage::Images => task.scraped,
        };
        prerequisite_met && !self.is_done(task) && self.attempts(task) < max_retries
    }

    /// Locator this stage fetches for `task`
    ///
    /// `None` when the field is absent or blank, which the runner records as a
    /// failed attempt.
    pub fn target<'a>(&self, task: &'a Task) -> Option<&'a str> {
        let target = match self {
            Stage::Scrape => Some(task.link.as_str()),
            Stage::Images => task.image_url.as_deref(),
        };
        target.map(str::trim).filter(|t| !t.is_empty())
    }

    /// Turn an extractor result into the success patch for this stage
    ///
    /// Rejects output produced for the other stage and output with an empty
    /// required field, so a task is never marked processed without its fields.
    pub fn success_patch(&self, output: StageOutput) -> Result<TaskPatch, ExtractError> {
        match (self, output) {
            (
                Stage::Scrape,
                StageOutput::Page {
                    address,
                    image_url,
                },
            ) => {
                if address.trim().is_empty() {
                    return Err(ExtractError::MissingField { field: "address" });
                }
                if image_url.trim().is_empty() {
                    return Err(ExtractError::MissingField { field: "image_url" });
                }
                Ok(TaskPatch::Scraped {
                    address,
                    image_url,
                })
            }
            (Stage::Images, StageOutput::Image { image_filename }) => {
                if image_filename.trim().is_empty() {
                    return Err(ExtractError::MissingField {
                        field: "image_filename",
                    });
                }
                Ok(TaskPatch::ImageSaved { image_filename })
            }
            (Stage::Scrape, StageOutput::Image { .. }) => {
                Err(ExtractError::MissingField { field: "address" })
            }
            (Stage::Images, StageOutput::Page { .. }) => Err(ExtractError::MissingField {
                field: "image_filename",
            }),
        }
    }

    /// Patch recording a failed attempt of this stage
    pub fn failure_patch(&self) -> TaskPatch {
        TaskPatch::Failed { stage: *self }
    }
}
