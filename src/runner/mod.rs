//! Batch runner: drains one pipeline stage
//!
//! A run counts the eligible tasks, then repeatedly fetches a batch, attempts
//! every task in it concurrently and writes each outcome back before pausing
//! and fetching the next batch. Batches are strictly sequential; attempts
//! within a batch finish in any order.
//!
//! Per-task failures never abort the run. Every extraction error becomes a
//! `failed` update that consumes one attempt of the stage's retry budget, so a
//! task drops out of selection once the budget is spent. A store failure while
//! writing an outcome is logged and leaves the task as it was.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;

use crate::config::StageConfig;
use crate::db::{Database, StageCounts, Task, TaskPatch};
use crate::error::{ExtractError, Result};
use crate::extractor::Extractor;
use crate::identity::IdentityRotator;
use crate::stage::TaskFilter;
use crate::throttle::Throttle;
use crate::types::{BatchProgress, Event, RunSummary, Stage, TaskId};

/// Result of one task attempt within a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Attempt {
    /// Extraction succeeded and was stored as processed
    succeeded: bool,
    /// The outcome (success or failure) reached the store
    persisted: bool,
}

/// Counts for one executed batch
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct BatchTally {
    attempted: u64,
    succeeded: u64,
    failed: u64,
    persisted: u64,
}

/// Consecutive batches with nothing written back before a run gives up
pub const STALLED_BATCH_LIMIT: u32 = 3;

fn tally(attempts: &[Attempt]) -> BatchTally {
    let mut tally = BatchTally {
        attempted: attempts.len() as u64,
        ..Default::default()
    };
    for attempt in attempts {
        if attempt.succeeded {
            tally.succeeded += 1;
        } else {
            tally.failed += 1;
        }
        if attempt.persisted {
            tally.persisted += 1;
        }
    }
    tally
}

/// Drives one stage until no eligible task remains
pub struct BatchRunner {
    stage: Stage,
    settings: StageConfig,
    db: Arc<Database>,
    rotator: Arc<IdentityRotator>,
    extractor: Arc<dyn Extractor>,
    event_tx: broadcast::Sender<Event>,
    throttle: Throttle,
}

impl BatchRunner {
    /// Create a runner for `stage`
    ///
    /// `extractor` must serve the same stage; a mismatch is logged and the
    /// extractor's results are still validated against `stage`.
    pub fn new(
        stage: Stage,
        settings: StageConfig,
        db: Arc<Database>,
        rotator: Arc<IdentityRotator>,
        extractor: Arc<dyn Extractor>,
        event_tx: broadcast::Sender<Event>,
    ) -> Self {
        if extractor.stage() != stage {
            tracing::warn!(
                stage = %stage,
                extractor_stage = %extractor.stage(),
                "Extractor serves a different stage; its results will be rejected"
            );
        }
        let throttle = Throttle::from_stage(&settings);
        Self {
            stage,
            settings,
            db,
            rotator,
            extractor,
            event_tx,
            throttle,
        }
    }

    /// Stage this runner drains
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Eligibility filter used for every fetch
    pub fn filter(&self) -> TaskFilter {
        TaskFilter::new(self.stage, self.settings.max_retries)
    }

    fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.event_tx.send(event).ok();
    }

    /// Drain the stage
    ///
    /// Returns `Err` only if the initial eligibility count fails. Any later store
    /// failure is logged; a failed batch fetch ends the drain early and the
    /// summary is still produced.
    ///
    /// A batch none of whose outcomes could be written back leaves the same rows
    /// eligible. After [`STALLED_BATCH_LIMIT`] such batches in a row the drain
    /// stops; a single stalled batch only costs the usual pause.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        let filter = self.filter();

        let total_eligible = self.db.count_tasks(&filter).await?;
        tracing::info!(
            stage = %self.stage,
            total_eligible,
            batch_size = self.settings.batch_size,
            max_retries = self.settings.max_retries,
            "Starting stage run"
        );
        self.emit_event(Event::RunStarted {
            stage: self.stage,
            total_eligible,
        });

        let mut stalled: u32 = 0;
        let mut summary = RunSummary {
            stage: Some(self.stage),
            total_eligible,
            ..Default::default()
        };

        if total_eligible == 0 {
            tracing::info!(stage = %self.stage, "No eligible tasks");
            return Ok(self.finish(summary, started).await);
        }

        loop {
            let batch = match self.db.fetch_batch(&filter, self.settings.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(
                        stage = %self.stage,
                        error = %e,
                        "Failed to fetch batch; ending run early"
                    );
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            let fetched = batch.len();
            let outcome = self.run_batch(batch).await;
            summary.batches += 1;
            summary.succeeded += outcome.succeeded;
            summary.failed += outcome.failed;

            let progress = BatchProgress {
                stage: self.stage,
                batch_number: summary.batches,
                processed_count: summary.succeeded,
                failed_count: summary.failed,
                total_count: total_eligible,
                percentage_complete: percentage(summary.succeeded, total_eligible),
                elapsed_secs: started.elapsed().as_secs_f64(),
            };
            tracing::info!(
                stage = %self.stage,
                batch = progress.batch_number,
                fetched,
                attempted = outcome.attempted,
                succeeded = outcome.succeeded,
                failed = outcome.failed,
                processed = progress.processed_count,
                total = progress.total_count,
                percent = progress.percentage_complete,
                "Batch complete"
            );
            self.emit_event(Event::BatchCompleted(progress));

            // Nothing written back means the next fetch returns these same rows
            if outcome.persisted == 0 {
                stalled += 1;
                if stalled >= STALLED_BATCH_LIMIT {
                    tracing::error!(
                        stage = %self.stage,
                        batch = summary.batches,
                        stalled,
                        "No outcome could be stored for several batches; ending run early"
                    );
                    break;
                }
                tracing::warn!(
                    stage = %self.stage,
                    batch = summary.batches,
                    stalled,
                    "No outcome of the batch could be stored"
                );
            } else {
                stalled = 0;
            }

            self.throttle.pause().await;
        }

        Ok(self.finish(summary, started).await)
    }

    /// Attempt every still-eligible task of `batch` concurrently
    async fn run_batch(&self, batch: Vec<Task>) -> BatchTally {
        let filter = self.filter();
        let (eligible, stale): (Vec<Task>, Vec<Task>) =
            batch.into_iter().partition(|task| filter.matches(task));
        for task in &stale {
            tracing::debug!(
                stage = %self.stage,
                task_id = task.id.0,
                "Skipping task that is no longer eligible"
            );
        }

        let concurrency = eligible.len().max(1);
        let attempts: Vec<Attempt> = stream::iter(eligible)
            .map(|task| {
                let stage = self.stage;
                let db = Arc::clone(&self.db);
                let rotator = Arc::clone(&self.rotator);
                let extractor = Arc::clone(&self.extractor);
                let event_tx = self.event_tx.clone();
                let id = task.id;

                async move {
                    let handle = tokio::spawn(attempt_task(
                        stage, task, db, rotator, extractor, event_tx,
                    ));
                    match handle.await {
                        Ok(attempt) => attempt,
                        Err(e) => {
                            tracing::error!(
                                stage = %stage,
                                task_id = id.0,
                                error = %e,
                                "Task attempt panicked"
                            );
                            Attempt {
                                succeeded: false,
                                persisted: false,
                            }
                        }
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        tally(&attempts)
    }

    async fn finish(&self, mut summary: RunSummary, started: Instant) -> RunSummary {
        let counts = match self
            .db
            .stage_counts(self.stage, self.settings.max_retries)
            .await
        {
            Ok(counts) => counts,
            Err(e) => {
                tracing::error!(
                    stage = %self.stage,
                    error = %e,
                    "Failed to collect final counts"
                );
                StageCounts::default()
            }
        };

        summary.processed = counts.processed;
        summary.failed_in_store = counts.failed;
        summary.retry_exceeded = counts.retry_exceeded;
        summary.elapsed_secs = started.elapsed().as_secs_f64();

        tracing::info!(
            stage = %self.stage,
            batches = summary.batches,
            succeeded = summary.succeeded,
            failed = summary.failed,
            processed = summary.processed,
            failed_in_store = summary.failed_in_store,
            retry_exceeded = summary.retry_exceeded,
            elapsed_secs = summary.elapsed_secs,
            "Stage run finished"
        );
        self.emit_event(Event::RunFinished(summary.clone()));
        summary
    }
}

fn percentage(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (done as f64 / total as f64 * 100.0).min(100.0)
}

/// One attempt: pick an identity, extract, write the outcome back
async fn attempt_task(
    stage: Stage,
    task: Task,
    db: Arc<Database>,
    rotator: Arc<IdentityRotator>,
    extractor: Arc<dyn Extractor>,
    event_tx: broadcast::Sender<Event>,
) -> Attempt {
    let id = task.id;
    let result = match stage.target(&task) {
        Some(target) => {
            let identity = rotator.next();
            tracing::debug!(
                stage = %stage,
                task_id = id.0,
                proxy = %identity.route,
                "Attempting task"
            );
            extractor
                .extract(target, &identity)
                .await
                .and_then(|output| stage.success_patch(output))
        }
        None => Err(ExtractError::MissingField {
            field: match stage {
                Stage::Scrape => "link",
                Stage::Images => "image_url",
            },
        }),
    };

    let (patch, failure) = match result {
        Ok(patch) => (patch, None),
        Err(e) => {
            tracing::warn!(
                stage = %stage,
                task_id = id.0,
                kind = %e.kind(),
                error = %e,
                "Task attempt failed"
            );
            (stage.failure_patch(), Some(e))
        }
    };

    let persisted = record_outcome(&db, id, &patch).await;

    match failure {
        None if persisted => {
            event_tx.send(Event::TaskProcessed { stage, id }).ok();
            Attempt {
                succeeded: true,
                persisted,
            }
        }
        None => Attempt {
            succeeded: false,
            persisted,
        },
        Some(e) => {
            event_tx
                .send(Event::TaskFailed {
                    stage,
                    id,
                    kind: e.kind(),
                    error: e.to_string(),
                })
                .ok();
            Attempt {
                succeeded: false,
                persisted,
            }
        }
    }
}

async fn record_outcome(db: &Database, id: TaskId, patch: &TaskPatch) -> bool {
    match db.update_task(id, patch).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(
                task_id = id.0,
                status = %patch.status(),
                error = %e,
                "Failed to store task outcome; task keeps its previous state"
            );
            false
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
