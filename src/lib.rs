//! # place-harvest
//!
//! Durable two-stage scraping pipeline for place pages and their images.
//!
//! Tasks (one per place page link) live in a SQLite task store. Stage A fetches
//! each page through a rotating proxy identity and extracts the place address
//! and image URL; Stage B downloads the image into a local directory. Both
//! stages drain the store in bounded concurrent batches, retry failed tasks on
//! later batches and stop offering a task once its per-stage retry budget is
//! spent, so a run over hundreds of thousands of links survives partial failure
//! without manual restarts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use place_harvest::{Config, NewTask, Pipeline};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pipeline = Pipeline::new(Config::default()).await?;
//!
//!     pipeline
//!         .database()
//!         .insert_task(&NewTask::new("https://maps.example/place/1"))
//!         .await?;
//!
//!     // Subscribe to events
//!     let mut events = pipeline.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let summaries = pipeline.run_all().await?;
//!     println!("{summaries:?}");
//!
//!     pipeline.close().await;
//!     Ok(())
//! }
//! ```
//!
//! Two runners draining the same stage against one store are not coordinated:
//! batch selection does not reserve rows, so both may attempt the same task.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Task store persistence layer
pub mod db;
/// Error types
pub mod error;
/// Stage extractors and the extraction contract
pub mod extractor;
/// Egress identities and round-robin rotation
pub mod identity;
/// Stage pipeline composition
pub mod pipeline;
/// Batch runner with retry policy
pub mod runner;
/// Per-stage eligibility and state transitions
pub mod stage;
/// Inter-batch pause with optional jitter
pub mod throttle;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, ImageNaming, StageConfig};
pub use db::{Database, IngestReport, NewTask, StageCounts, StoreStats, Task, TaskPatch};
pub use error::{DatabaseError, Error, ExtractError, FailureKind, Result};
pub use extractor::{Extractor, ImageExtractor, PageExtractor, StageOutput};
pub use identity::{Identity, IdentityRotator, ProxyRoute};
pub use pipeline::{Pipeline, ProbeReport};
pub use runner::BatchRunner;
pub use stage::TaskFilter;
pub use types::{BatchProgress, Event, ProcessingStatus, RunSummary, Stage, TaskId};

/// Wait for SIGTERM or SIGINT (Ctrl+C elsewhere)
///
/// Outcomes already written back stay written; attempts in flight when the
/// signal arrives are lost and their tasks keep their previous state.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        // registration can fail in restricted environments (containers, tests)
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                    _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
    } else {
        tracing::info!("Received Ctrl+C signal");
    }
}
