//! Stage pipeline: the two batch runners over one task store
//!
//! [`Pipeline`] owns the store handle, the identity rotator and the event
//! channel, and builds a [`BatchRunner`] per stage on demand. The stages share
//! nothing else; Stage B only sees tasks Stage A has completed because its
//! eligibility filter requires `scraped`.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::db::{Database, StoreStats};
use crate::error::{Error, FailureKind, Result};
use crate::extractor::{Extractor, HttpSettings, ImageExtractor, PageExtractor, StageOutput};
use crate::identity::{IdentityRotator, load_identities};
use crate::runner::BatchRunner;
use crate::types::{Event, RunSummary, Stage};

/// Outcome of probing one identity against a page
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProbeReport {
    /// Proxy route, password masked
    pub proxy: String,
    /// User agent sent
    pub user_agent: String,
    /// Title read from the page when the attempt succeeded
    pub address: Option<String>,
    /// Failure class when the attempt failed
    pub kind: Option<FailureKind>,
    /// Failure message when the attempt failed
    pub error: Option<String>,
}

impl ProbeReport {
    /// Whether the identity got real content
    pub fn is_ok(&self) -> bool {
        self.address.is_some()
    }
}

/// Both pipeline stages wired to one store and one identity rotation
pub struct Pipeline {
    config: Config,
    db: Arc<Database>,
    rotator: Arc<IdentityRotator>,
    event_tx: broadcast::Sender<Event>,
}

impl Pipeline {
    /// Build a pipeline from configuration
    ///
    /// This:
    /// - Validates the configuration
    /// - Opens the task store and runs migrations
    /// - Loads the identity list (at least one usable identity is required)
    /// - Creates the image output directory
    ///
    /// Every failure here is fatal: no batch runs without a store and identities.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;

        let rotator = match Self::load_rotator(&config).await {
            Ok(rotator) => rotator,
            Err(e) => {
                db.close().await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(&config.images.output_dir).await {
            db.close().await;
            return Err(Error::Io(std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create image directory '{}': {}",
                    config.images.output_dir.display(),
                    e
                ),
            )));
        }

        let (event_tx, _rx) = broadcast::channel(1000);

        tracing::info!(
            identities = rotator.len(),
            database = %config.persistence.database_path.display(),
            image_dir = %config.images.output_dir.display(),
            "Pipeline ready"
        );

        Ok(Self {
            config,
            db: Arc::new(db),
            rotator: Arc::new(rotator),
            event_tx,
        })
    }

    async fn load_rotator(config: &Config) -> Result<IdentityRotator> {
        let identities = load_identities(
            &config.identities.proxy_file,
            &config.identities.user_agents,
        )
        .await?;
        IdentityRotator::new(identities)
    }

    /// Configuration the pipeline was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared task store handle (for ingestion and inspection)
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Number of identities in rotation
    pub fn identity_count(&self) -> usize {
        self.rotator.len()
    }

    /// Subscribe to pipeline events
    ///
    /// Each subscriber receives every event independently. A subscriber that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    fn http_settings(&self, stage: Stage) -> HttpSettings {
        HttpSettings {
            timeout: self.config.stage(stage).timeout,
            use_proxy: self.config.identities.use_proxy,
        }
    }

    /// Extractor configured for `stage`
    pub fn extractor(&self, stage: Stage) -> Arc<dyn Extractor> {
        let http = self.http_settings(stage);
        match stage {
            Stage::Scrape => Arc::new(PageExtractor::new(
                http,
                self.config.scrape.blocked_titles.clone(),
            )),
            Stage::Images => Arc::new(ImageExtractor::new(http, &self.config.images)),
        }
    }

    /// Batch runner for `stage`
    pub fn runner(&self, stage: Stage) -> BatchRunner {
        BatchRunner::new(
            stage,
            self.config.stage(stage).clone(),
            Arc::clone(&self.db),
            Arc::clone(&self.rotator),
            self.extractor(stage),
            self.event_tx.clone(),
        )
    }

    /// Drain one stage
    pub async fn run_stage(&self, stage: Stage) -> Result<RunSummary> {
        self.runner(stage).run().await
    }

    /// Drain Stage A, then Stage B
    pub async fn run_all(&self) -> Result<Vec<RunSummary>> {
        let mut summaries = Vec::with_capacity(Stage::ALL.len());
        for stage in Stage::ALL {
            summaries.push(self.run_stage(stage).await?);
        }
        Ok(summaries)
    }

    /// Store-wide counts
    pub async fn store_stats(&self) -> Result<StoreStats> {
        self.db.store_stats().await
    }

    /// Try the page extractor once per identity against `url`
    ///
    /// Reports which identities get real content and which are refused or
    /// served a challenge page. Results follow rotation order. The store is not
    /// touched.
    pub async fn probe_identities(&self, url: &str) -> Vec<ProbeReport> {
        let extractor = self.extractor(Stage::Scrape);
        let concurrency = self.config.scrape.stage.batch_size.max(1);

        stream::iter(self.rotator.identities().cloned())
            .map(|identity| {
                let extractor = Arc::clone(&extractor);
                async move {
                    let outcome = extractor.extract(url, &identity).await;
                    let mut report = ProbeReport {
                        proxy: identity.route.to_string(),
                        user_agent: identity.user_agent.clone(),
                        address: None,
                        kind: None,
                        error: None,
                    };
                    match outcome {
                        Ok(StageOutput::Page { address, .. }) => {
                            tracing::info!(proxy = %identity.route, %address, "Identity got content");
                            report.address = Some(address);
                        }
                        Ok(other) => {
                            report.kind = Some(FailureKind::Extraction);
                            report.error = Some(format!("unexpected output {other:?}"));
                        }
                        Err(e) => {
                            tracing::warn!(proxy = %identity.route, error = %e, "Identity failed probe");
                            report.kind = Some(e.kind());
                            report.error = Some(e.to_string());
                        }
                    }
                    report
                }
            })
            .buffered(concurrency)
            .collect()
            .await
    }

    /// Release the store
    pub async fn close(self) {
        self.db.pool().close().await;
        tracing::info!("Pipeline closed");
    }
}
