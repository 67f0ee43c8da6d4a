use super::*;
use crate::db::NewTask;
use crate::error::FailureKind;
use crate::extractor::StageOutput;
use crate::identity::{Identity, ProxyRoute};
use crate::types::ProcessingStatus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::NamedTempFile;

type Behaviour = dyn Fn(&str) -> std::result::Result<StageOutput, ExtractError> + Send + Sync;

/// Extractor whose result is computed from the target, recording every call
struct FakeExtractor {
    stage: Stage,
    behaviour: Box<Behaviour>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeExtractor {
    fn new(
        stage: Stage,
        behaviour: impl Fn(&str) -> std::result::Result<StageOutput, ExtractError>
        + Send
        + Sync
        + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            stage,
            behaviour: Box::new(behaviour),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn targets(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    fn hosts(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, h)| h.clone())
            .collect()
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    fn stage(&self) -> Stage {
        self.stage
    }

    async fn extract(
        &self,
        target: &str,
        identity: &Identity,
    ) -> std::result::Result<StageOutput, ExtractError> {
        self.calls
            .lock()
            .unwrap()
            .push((target.to_string(), identity.route.host.clone()));
        (self.behaviour)(target)
    }
}

fn page_output(target: &str) -> std::result::Result<StageOutput, ExtractError> {
    Ok(StageOutput::Page {
        address: format!("address of {target}"),
        image_url: format!("{target}/photo.jpg"),
    })
}

fn transport_failure(_: &str) -> std::result::Result<StageOutput, ExtractError> {
    Err(ExtractError::Transport("timed out".into()))
}

fn settings(batch_size: usize, max_retries: u32) -> StageConfig {
    StageConfig {
        batch_size,
        max_retries,
        timeout: Duration::from_secs(1),
        batch_delay: Duration::ZERO,
        delay_jitter: false,
    }
}

fn rotator(hosts: usize) -> Arc<IdentityRotator> {
    let identities = (0..hosts)
        .map(|i| Identity {
            route: ProxyRoute::parse(&format!("proxy-{i}.example:8000:user:pass")).unwrap(),
            user_agent: "PlaceHarvestTest/1.0".into(),
        })
        .collect();
    Arc::new(IdentityRotator::new(identities).unwrap())
}

async fn store_with(links: &[&str]) -> (NamedTempFile, Arc<Database>, Vec<TaskId>) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    let mut ids = Vec::new();
    for link in links {
        ids.push(db.insert_task(&NewTask::new(*link)).await.unwrap().unwrap());
    }
    (temp_file, Arc::new(db), ids)
}

fn runner(
    stage: Stage,
    settings: StageConfig,
    db: &Arc<Database>,
    extractor: Arc<FakeExtractor>,
    hosts: usize,
) -> (BatchRunner, broadcast::Receiver<Event>) {
    let (event_tx, event_rx) = broadcast::channel(1024);
    let runner = BatchRunner::new(
        stage,
        settings,
        Arc::clone(db),
        rotator(hosts),
        extractor,
        event_tx,
    );
    (runner, event_rx)
}

fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn tally_counts_outcomes() {
    let attempts = [
        Attempt {
            succeeded: true,
            persisted: true,
        },
        Attempt {
            succeeded: false,
            persisted: true,
        },
        Attempt {
            succeeded: false,
            persisted: false,
        },
    ];
    assert_eq!(
        tally(&attempts),
        BatchTally {
            attempted: 3,
            succeeded: 1,
            failed: 2,
            persisted: 2,
        }
    );
}

#[test]
fn percentage_is_capped() {
    assert_eq!(percentage(0, 0), 100.0);
    assert_eq!(percentage(1, 4), 25.0);
    assert_eq!(percentage(9, 4), 100.0);
}

#[tokio::test]
async fn drains_all_tasks_in_batches() {
    let links: Vec<String> = (0..5).map(|i| format!("https://maps.example/place/{i}")).collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let (_f, db, ids) = store_with(&link_refs).await;
    let extractor = FakeExtractor::new(Stage::Scrape, page_output);

    let (runner, _rx) = runner(Stage::Scrape, settings(2, 10), &db, extractor.clone(), 2);
    let summary = runner.run().await.unwrap();

    assert_eq!(summary.stage, Some(Stage::Scrape));
    assert_eq!(summary.total_eligible, 5);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.processed, 5);
    assert_eq!(summary.failed_in_store, 0);
    assert_eq!(summary.retry_exceeded, 0);

    let mut targets = extractor.targets();
    targets.sort();
    assert_eq!(targets, links);

    for (id, link) in ids.iter().zip(&links) {
        let task = db.get_task(*id).await.unwrap().unwrap();
        assert!(task.scraped);
        assert_eq!(task.processing_status, ProcessingStatus::Processed);
        assert_eq!(task.address, Some(format!("address of {link}")));
        assert_eq!(task.image_url, Some(format!("{link}/photo.jpg")));
        assert_eq!(task.retry_count, 1);
    }
}

#[tokio::test]
async fn repeated_transport_failures_exhaust_retry_budget() {
    let (_f, db, ids) = store_with(&["https://maps.example/place/1"]).await;
    let extractor = FakeExtractor::new(Stage::Scrape, transport_failure);

    let (runner, _rx) = runner(Stage::Scrape, settings(20, 3), &db, extractor.clone(), 1);
    let summary = runner.run().await.unwrap();

    assert_eq!(extractor.targets().len(), 3);
    assert_eq!(summary.batches, 3);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 3);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.failed_in_store, 1);
    assert_eq!(summary.retry_exceeded, 1);

    let task = db.get_task(ids[0]).await.unwrap().unwrap();
    assert_eq!(task.retry_count, 3);
    assert_eq!(task.processing_status, ProcessingStatus::Failed);
    assert!(!task.scraped);

    let next = db.fetch_batch(&runner.filter(), 20).await.unwrap();
    assert!(next.is_empty());
}

#[tokio::test]
async fn incomplete_output_is_recorded_as_failure() {
    let (_f, db, ids) = store_with(&["https://maps.example/place/1"]).await;
    let extractor = FakeExtractor::new(Stage::Scrape, |_| {
        Ok(StageOutput::Page {
            address: "12 Harbour Rd".into(),
            image_url: String::new(),
        })
    });

    let (runner, _rx) = runner(Stage::Scrape, settings(20, 1), &db, extractor, 1);
    let summary = runner.run().await.unwrap();
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 1);

    let task = db.get_task(ids[0]).await.unwrap().unwrap();
    assert_eq!(task.processing_status, ProcessingStatus::Failed);
    assert!(!task.scraped);
    assert!(task.address.is_none());
}

#[tokio::test]
async fn blocked_pages_count_like_any_other_failure() {
    let (_f, db, ids) = store_with(&["https://maps.example/place/1"]).await;
    let extractor = FakeExtractor::new(Stage::Scrape, |_| {
        Err(ExtractError::BlockedContent {
            title: "Google Maps".into(),
        })
    });

    let (runner, mut rx) = runner(Stage::Scrape, settings(20, 2), &db, extractor, 1);
    runner.run().await.unwrap();

    let task = db.get_task(ids[0]).await.unwrap().unwrap();
    assert_eq!(task.retry_count, 2);
    assert_eq!(task.processing_status, ProcessingStatus::Failed);

    let failures: Vec<FailureKind> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            Event::TaskFailed { kind, .. } => Some(kind),
            _ => None,
        })
        .collect();
    assert_eq!(failures, vec![FailureKind::Extraction, FailureKind::Extraction]);
}

#[tokio::test]
async fn identities_rotate_across_attempts() {
    let links: Vec<String> = (0..6).map(|i| format!("https://maps.example/place/{i}")).collect();
    let link_refs: Vec<&str> = links.iter().map(String::as_str).collect();
    let (_f, db, _ids) = store_with(&link_refs).await;
    let extractor = FakeExtractor::new(Stage::Scrape, page_output);

    let (runner, _rx) = runner(Stage::Scrape, settings(6, 10), &db, extractor.clone(), 3);
    runner.run().await.unwrap();

    let mut per_host: HashMap<String, usize> = HashMap::new();
    for host in extractor.hosts() {
        *per_host.entry(host).or_default() += 1;
    }
    assert_eq!(per_host.len(), 3);
    assert!(per_host.values().all(|&n| n == 2), "uneven: {per_host:?}");
}

#[tokio::test]
async fn images_stage_only_sees_scraped_tasks() {
    let (_f, db, ids) = store_with(&[
        "https://maps.example/place/1",
        "https://maps.example/place/2",
    ])
    .await;
    db.update_task(
        ids[1],
        &TaskPatch::Scraped {
            address: "2 Main St".into(),
            image_url: "https://cdn.example/2.jpg".into(),
        },
    )
    .await
    .unwrap();

    let extractor = FakeExtractor::new(Stage::Images, |_| {
        Ok(StageOutput::Image {
            image_filename: "2.jpg".into(),
        })
    });
    let (runner, _rx) = runner(Stage::Images, settings(100, 8), &db, extractor.clone(), 1);
    let summary = runner.run().await.unwrap();

    assert_eq!(extractor.targets(), vec!["https://cdn.example/2.jpg".to_string()]);
    assert_eq!(summary.total_eligible, 1);
    assert_eq!(summary.processed, 1);

    let untouched = db.get_task(ids[0]).await.unwrap().unwrap();
    assert!(!untouched.images_scraped);
    assert_eq!(untouched.image_retry_count, 0);

    let done = db.get_task(ids[1]).await.unwrap().unwrap();
    assert!(done.images_scraped);
    assert_eq!(done.image_filename.as_deref(), Some("2.jpg"));
    assert_eq!(done.image_retry_count, 1);
    assert_eq!(done.retry_count, 1);
}

#[tokio::test]
async fn panicking_attempt_does_not_fail_siblings() {
    let (_f, db, ids) = store_with(&[
        "https://maps.example/place/ok-1",
        "https://maps.example/place/boom",
        "https://maps.example/place/ok-2",
    ])
    .await;
    let extractor = FakeExtractor::new(Stage::Scrape, |target| {
        if target.ends_with("boom") {
            panic!("extractor bug");
        }
        page_output(target)
    });

    let (runner, _rx) = runner(Stage::Scrape, settings(10, 5), &db, extractor.clone(), 1);
    let summary = runner.run().await.unwrap();

    // the panicking task is never written back, so every later batch stores
    // nothing and the run stops instead of refetching it forever
    let limit = u64::from(STALLED_BATCH_LIMIT);
    assert_eq!(summary.batches, 1 + limit);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1 + limit);
    assert_eq!(summary.processed, 2);

    assert!(db.get_task(ids[0]).await.unwrap().unwrap().scraped);
    assert!(db.get_task(ids[2]).await.unwrap().unwrap().scraped);
    let stuck = db.get_task(ids[1]).await.unwrap().unwrap();
    assert_eq!(stuck.retry_count, 0);
    assert_eq!(stuck.processing_status, ProcessingStatus::Pending);
}

#[tokio::test]
async fn empty_store_is_a_no_op_run() {
    let (_f, db, _ids) = store_with(&[]).await;
    let extractor = FakeExtractor::new(Stage::Scrape, page_output);

    let (runner, mut rx) = runner(Stage::Scrape, settings(20, 10), &db, extractor.clone(), 1);
    let summary = runner.run().await.unwrap();

    assert_eq!(summary.total_eligible, 0);
    assert_eq!(summary.batches, 0);
    assert!(extractor.targets().is_empty());

    let events = drain(&mut rx);
    assert!(matches!(
        events.first(),
        Some(Event::RunStarted {
            total_eligible: 0,
            ..
        })
    ));
    assert!(matches!(events.last(), Some(Event::RunFinished(_))));
}

#[tokio::test]
async fn events_describe_the_run() {
    let (_f, db, _ids) = store_with(&[
        "https://maps.example/place/1",
        "https://maps.example/place/2",
        "https://maps.example/place/3",
    ])
    .await;
    let extractor = FakeExtractor::new(Stage::Scrape, |target| {
        if target.ends_with('2') {
            Err(ExtractError::Response {
                status: 503,
                url: target.to_string(),
            })
        } else {
            page_output(target)
        }
    });

    let (runner, mut rx) = runner(Stage::Scrape, settings(3, 1), &db, extractor, 1);
    let summary = runner.run().await.unwrap();
    let events = drain(&mut rx);

    let processed = events
        .iter()
        .filter(|e| matches!(e, Event::TaskProcessed { .. }))
        .count();
    let failed = events
        .iter()
        .filter(|e| {
            matches!(
                e,
                Event::TaskFailed {
                    kind: FailureKind::Response,
                    ..
                }
            )
        })
        .count();
    assert_eq!(processed, 2);
    assert_eq!(failed, 1);

    let progress: Vec<&BatchProgress> = events
        .iter()
        .filter_map(|e| match e {
            Event::BatchCompleted(p) => Some(p),
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].batch_number, 1);
    assert_eq!(progress[0].processed_count, 2);
    assert_eq!(progress[0].failed_count, 1);
    assert_eq!(progress[0].total_count, 3);

    match events.last() {
        Some(Event::RunFinished(finished)) => assert_eq!(finished, &summary),
        other => panic!("expected RunFinished last, got {other:?}"),
    }
    assert_eq!(summary.retry_exceeded, 3);
    assert_eq!(summary.failed_in_store, 1);
}

#[tokio::test]
async fn rejected_write_back_keeps_task_state_and_ends_run() {
    let (_f, db, ids) = store_with(&[
        "https://maps.example/place/1",
        "https://maps.example/place/2",
    ])
    .await;
    sqlx::query(
        "CREATE TRIGGER reject_task_updates BEFORE UPDATE ON tasks \
         BEGIN SELECT RAISE(ABORT, 'task store is read-only'); END",
    )
    .execute(db.pool())
    .await
    .unwrap();
    let extractor = FakeExtractor::new(Stage::Scrape, page_output);

    let (runner, mut rx) = runner(Stage::Scrape, settings(10, 3), &db, extractor.clone(), 1);
    let summary = runner.run().await.unwrap();

    let limit = u64::from(STALLED_BATCH_LIMIT);
    assert_eq!(summary.batches, limit);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 2 * limit);
    assert_eq!(summary.processed, 0);
    assert_eq!(extractor.targets().len(), 2 * STALLED_BATCH_LIMIT as usize);

    for id in ids {
        let task = db.get_task(id).await.unwrap().unwrap();
        assert!(!task.scraped);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.processing_status, ProcessingStatus::Pending);
        assert!(task.address.is_none());
    }

    // successes that could not be stored are not announced as processed
    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, Event::TaskProcessed { .. })));
    assert!(matches!(events.last(), Some(Event::RunFinished(_))));
}

#[tokio::test]
async fn failing_initial_count_is_fatal() {
    let (_f, db, _ids) = store_with(&["https://maps.example/place/1"]).await;
    db.pool().close().await;
    let extractor = FakeExtractor::new(Stage::Scrape, page_output);

    let (runner, _rx) = runner(Stage::Scrape, settings(20, 10), &db, extractor.clone(), 1);
    assert!(runner.run().await.is_err());
    assert!(extractor.targets().is_empty());
}
