// src/pipeline/run.rs

//! Orchestration of one watcher invocation.
//!
//! Per topic: FETCH → EXTRACT → DIFF → CAP_AND_NOTIFY → RECORD_OUTCOME.
//! A failure before notification sends one failure message and skips to
//! RECORD_OUTCOME. The ledger is written exactly once per topic run, and
//! only here.

use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::error::{AppError, Result};
use crate::models::{Config, FeedTarget, RunMode};
use crate::pipeline::diff::{ChangeDetector, StateChange};
use crate::pipeline::notify::{DispatchReport, NotificationBatch, NotificationDispatcher};
use crate::pipeline::schedule::select_topic;
use crate::services::{ListingExtractor, NotifierSink, PageFetcher};
use crate::storage::{LedgerStore, StateStore};
use crate::utils::truncate_graphemes;

/// Step at which a topic run was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Fetch,
    Extract,
    Diff,
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunStage::Fetch => "fetch",
            RunStage::Extract => "extract",
            RunStage::Diff => "diff",
        };
        f.write_str(name)
    }
}

/// How a topic run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed {
        /// Listings extracted from the page
        found: usize,
        change: StateChange,
        dispatch: DispatchReport,
    },
    Failed {
        stage: RunStage,
        error: AppError,
    },
}

/// Result of one topic run.
#[derive(Debug)]
pub struct RunReport {
    pub topic: String,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }
}

/// A run failure tagged with the step that produced it.
struct StageError {
    stage: RunStage,
    error: AppError,
}

impl StageError {
    /// Fold any error into the run taxonomy for the step it came from.
    fn new(stage: RunStage, target: &FeedTarget, error: AppError) -> Self {
        let error = match error {
            AppError::Fetch { .. } | AppError::Extract { .. } | AppError::StateIo { .. } => error,
            AppError::Notification { .. }
            | AppError::Io(_)
            | AppError::Http(_)
            | AppError::Json(_)
            | AppError::Toml(_)
            | AppError::Url(_)
            | AppError::Regex(_)
            | AppError::Selector { .. }
            | AppError::Config(_)
            | AppError::Validation(_) => match stage {
                RunStage::Fetch => AppError::fetch(&target.url, error),
                RunStage::Extract => AppError::extract(error),
                RunStage::Diff => AppError::state_io(&target.topic, error),
            },
        };
        Self { stage, error }
    }
}

/// Everything a completed topic run produced.
struct TopicSummary {
    found: usize,
    change: StateChange,
    dispatch: DispatchReport,
}

/// Drives topic runs against the configured collaborators.
pub struct Runner<'a> {
    config: &'a Config,
    fetcher: &'a dyn PageFetcher,
    extractor: &'a dyn ListingExtractor,
    store: &'a dyn StateStore,
    ledger: &'a dyn LedgerStore,
    sink: &'a dyn NotifierSink,
    detector: ChangeDetector,
}

impl<'a> Runner<'a> {
    pub fn new(
        config: &'a Config,
        fetcher: &'a dyn PageFetcher,
        extractor: &'a dyn ListingExtractor,
        store: &'a dyn StateStore,
        ledger: &'a dyn LedgerStore,
        sink: &'a dyn NotifierSink,
    ) -> Self {
        Self {
            config,
            fetcher,
            extractor,
            store,
            ledger,
            sink,
            detector: ChangeDetector::from_config(&config.state),
        }
    }

    /// Run according to the configured mode.
    pub async fn run(&self) -> Result<Vec<RunReport>> {
        match self.config.mode {
            RunMode::Fairness => Ok(self.run_next().await?.into_iter().collect()),
            RunMode::FanOut => self.run_all().await,
        }
    }

    /// Run the single topic that has waited longest.
    pub async fn run_next(&self) -> Result<Option<RunReport>> {
        let targets = self.config.enabled_targets();
        if targets.is_empty() {
            log::info!("No active projects to run");
            return Ok(None);
        }

        let ledger = self.ledger.load_ledger().await?;
        let Some(target) = select_topic(&targets, &ledger) else {
            log::info!("No project selected to run");
            return Ok(None);
        };

        log::info!("Running single project: \"{}\"", target.topic);
        self.run_topic(target).await.map(Some)
    }

    /// Run every enabled topic, bounded by `runner.max_concurrent`.
    pub async fn run_all(&self) -> Result<Vec<RunReport>> {
        let targets = self.config.enabled_targets();
        let concurrency = self.config.runner.max_concurrent.max(1);
        log::info!("Running {} projects", targets.len());

        let results: Vec<Result<RunReport>> = stream::iter(&targets)
            .map(|target| self.run_topic(target))
            .buffered(concurrency)
            .collect()
            .await;

        results.into_iter().collect()
    }

    /// Run one topic through the full state machine.
    ///
    /// Errors only when the outcome itself could not be recorded.
    pub async fn run_topic(&self, target: &FeedTarget) -> Result<RunReport> {
        let dispatcher = NotificationDispatcher::from_config(self.config);

        let outcome = match self.process(target, &dispatcher).await {
            Ok(summary) => {
                log::info!(
                    "Successfully completed \"{}\": {} found, {} notified",
                    target.topic,
                    summary.found,
                    summary.dispatch.delivered
                );
                RunOutcome::Completed {
                    found: summary.found,
                    change: summary.change,
                    dispatch: summary.dispatch,
                }
            }
            Err(StageError { stage, error }) => {
                log::error!(
                    "Failed to complete \"{}\" at {}: {}",
                    target.topic,
                    stage,
                    error
                );
                if !dispatcher.send_failure(&target.topic, &error, self.sink).await {
                    log::warn!("Failure report for \"{}\" was not delivered", target.topic);
                }
                RunOutcome::Failed { stage, error }
            }
        };

        let report = RunReport {
            topic: target.topic.clone(),
            outcome,
        };
        self.ledger
            .record(&target.topic, Utc::now(), report.succeeded())
            .await?;
        Ok(report)
    }

    async fn process(
        &self,
        target: &FeedTarget,
        dispatcher: &NotificationDispatcher<'_>,
    ) -> std::result::Result<TopicSummary, StageError> {
        let fail = |stage: RunStage| move |e: AppError| StageError::new(stage, target, e);

        // FETCH
        let timeout = self.config.fetcher.timeout();
        let html = tokio::time::timeout(timeout, self.fetcher.fetch(&target.url))
            .await
            .map_err(|_| {
                AppError::fetch(
                    &target.url,
                    format!("timed out after {}s", timeout.as_secs()),
                )
            })
            .and_then(|fetched| fetched)
            .map_err(fail(RunStage::Fetch))?;

        // EXTRACT
        let current = self
            .extractor
            .extract(&html)
            .await
            .map_err(fail(RunStage::Extract))?;
        if current.is_empty() {
            return Err(fail(RunStage::Extract)(AppError::extract(
                "page contained no usable listings",
            )));
        }
        log::info!(
            "Found {} total items for \"{}\"",
            current.len(),
            target.topic
        );

        // DIFF
        let mut state = self
            .store
            .load(&target.topic)
            .await
            .map_err(fail(RunStage::Diff))?;
        let new = self.detector.diff(&current, &state);
        let batch = NotificationBatch::new(&target.topic, new);
        let cap = self.config.max_results_per_run;

        if !batch.is_empty() {
            log::info!("=== New Items Found for \"{}\" ===", target.topic);
            log::info!("Total new items: {}", batch.total());
            log::info!("Will notify for: {} items", batch.selected(cap).len());
            for (index, record) in batch.selected(cap).iter().enumerate() {
                log::info!(
                    "{}. [{}] {}...",
                    index + 1,
                    record.id,
                    truncate_graphemes(&record.text, 60)
                );
            }
        }

        // Persist the notified subset before sending anything.
        let change = self
            .detector
            .apply(&current, batch.selected(cap), &mut state, Utc::now());
        if change.has_changes() {
            self.store
                .save(&target.topic, &state)
                .await
                .map_err(fail(RunStage::Diff))?;
        }

        // CAP_AND_NOTIFY
        let dispatch = dispatcher.send(&batch, cap, self.sink).await;

        Ok(TopicSummary {
            found: current.len(),
            change,
            dispatch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ListingRecord;
    use crate::storage::LocalStorage;
    use crate::testing::{RecordingSink, Sent, StaticExtractor, StaticFetcher, listing};
    use tempfile::TempDir;

    struct Harness {
        _tmp: TempDir,
        config: Config,
        storage: LocalStorage,
    }

    impl Harness {
        fn new(topics: &[&str], cap: usize) -> Self {
            let tmp = TempDir::new().unwrap();
            let mut config = Config::default();
            config.max_results_per_run = cap;
            config.notifier.send_delay_ms = 0;
            config.paths.data_dir = tmp.path().join("data");
            config.paths.work_signal = tmp.path().join("push_me");
            config.projects = topics
                .iter()
                .map(|t| FeedTarget::new(*t, format!("https://www.example.com/{t}")))
                .collect();
            let storage = LocalStorage::from_config(&config.paths);
            Self {
                _tmp: tmp,
                config,
                storage,
            }
        }

        fn state_file(&self, topic: &str) -> std::path::PathBuf {
            self.config.paths.data_dir.join(format!("{topic}.json"))
        }

        fn stored_ids(&self, topic: &str) -> Vec<String> {
            let raw: serde_json::Map<String, serde_json::Value> =
                serde_json::from_slice(&std::fs::read(self.state_file(topic)).unwrap()).unwrap();
            raw.keys().cloned().collect()
        }

        async fn run_topic(
            &self,
            fetcher: &StaticFetcher,
            records: Vec<ListingRecord>,
            sink: &RecordingSink,
            topic: &str,
        ) -> RunReport {
            let extractor = StaticExtractor(records);
            let runner = Runner::new(
                &self.config,
                fetcher,
                &extractor,
                &self.storage,
                &self.storage,
                sink,
            );
            let target = self
                .config
                .projects
                .iter()
                .find(|p| p.topic == topic)
                .unwrap();
            runner.run_topic(target).await.unwrap()
        }
    }

    fn page() -> StaticFetcher {
        StaticFetcher::Page("<html></html>".into())
    }

    fn records(ids: &[&str]) -> Vec<ListingRecord> {
        ids.iter().map(|id| listing(id)).collect()
    }

    #[tokio::test]
    async fn test_cap_persists_only_notified() {
        let harness = Harness::new(&["rentals"], 2);
        let sink = RecordingSink::new();

        let report = harness
            .run_topic(&page(), records(&["x1", "x2", "x3"]), &sink, "rentals")
            .await;

        assert!(report.succeeded());
        let sent = sink.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0], Sent::Text("🎉 rentals: 3 new, showing 2".into()));
        assert_eq!(sink.photos(), 2);
        assert_eq!(harness.stored_ids("rentals"), vec!["x1", "x2"]);

        // x3 is still a candidate on the next run.
        let sink = RecordingSink::new();
        harness
            .run_topic(&page(), records(&["x1", "x2", "x3"]), &sink, "rentals")
            .await;
        assert_eq!(sink.sent()[0].text(), "🎉 rentals: 1 new, showing 1");
        assert_eq!(harness.stored_ids("rentals"), vec!["x1", "x2", "x3"]);
    }

    #[tokio::test]
    async fn test_second_identical_run_is_nothing_new() {
        let harness = Harness::new(&["rentals"], 5);
        harness
            .run_topic(&page(), records(&["x1", "x2"]), &RecordingSink::new(), "rentals")
            .await;

        let sink = RecordingSink::new();
        let report = harness
            .run_topic(&page(), records(&["x1", "x2"]), &sink, "rentals")
            .await;

        assert!(report.succeeded());
        assert_eq!(sink.sent(), vec![Sent::Text("rentals: nothing new".into())]);
    }

    #[tokio::test]
    async fn test_fetch_error_records_failure() {
        let harness = Harness::new(&["rentals"], 5);
        let sink = RecordingSink::new();
        let before = Utc::now();

        let report = harness
            .run_topic(
                &StaticFetcher::Fails("connection reset".into()),
                records(&["x1"]),
                &sink,
                "rentals",
            )
            .await;

        assert!(matches!(
            report.outcome,
            RunOutcome::Failed {
                stage: RunStage::Fetch,
                error: AppError::Fetch { .. }
            }
        ));
        let ledger = harness.storage.load_ledger().await.unwrap();
        let entry = ledger.entry("rentals").unwrap();
        assert!(!entry.success);
        assert!(entry.last_execution >= before);

        assert!(!harness.state_file("rentals").exists());
        let sent = sink.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text().contains("connection reset"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_fetch_error() {
        let harness = Harness::new(&["rentals"], 5);
        let sink = RecordingSink::new();

        let report = harness
            .run_topic(&StaticFetcher::Hangs, records(&["x1"]), &sink, "rentals")
            .await;

        match report.outcome {
            RunOutcome::Failed { stage, error } => {
                assert_eq!(stage, RunStage::Fetch);
                assert!(error.to_string().contains("timed out after 60s"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(sink.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_extraction_is_extract_error() {
        let harness = Harness::new(&["rentals"], 5);
        let sink = RecordingSink::new();

        let report = harness.run_topic(&page(), vec![], &sink, "rentals").await;

        assert!(matches!(
            report.outcome,
            RunOutcome::Failed {
                stage: RunStage::Extract,
                ..
            }
        ));
        assert_eq!(sink.sent().len(), 1);
        let ledger = harness.storage.load_ledger().await.unwrap();
        assert!(!ledger.entry("rentals").unwrap().success);
    }

    #[tokio::test]
    async fn test_corrupt_state_is_reported_once() {
        let harness = Harness::new(&["rentals"], 5);
        std::fs::create_dir_all(&harness.config.paths.data_dir).unwrap();
        std::fs::write(harness.state_file("rentals"), "{oops").unwrap();
        let sink = RecordingSink::new();

        let report = harness
            .run_topic(&page(), records(&["x1"]), &sink, "rentals")
            .await;

        assert!(matches!(
            report.outcome,
            RunOutcome::Failed {
                stage: RunStage::Diff,
                error: AppError::StateIo { .. }
            }
        ));
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(
            std::fs::read_to_string(harness.state_file("rentals")).unwrap(),
            "{oops"
        );
    }

    #[tokio::test]
    async fn test_photo_failure_still_succeeds() {
        let harness = Harness::new(&["rentals"], 5);
        let sink = RecordingSink::new().failing_photo("https://img.example.com/Pic/x2.jpg");

        let report = harness
            .run_topic(&page(), records(&["x1", "x2", "x3"]), &sink, "rentals")
            .await;

        match &report.outcome {
            RunOutcome::Completed { dispatch, .. } => {
                assert_eq!(dispatch.delivered, 3);
                assert_eq!(dispatch.fallbacks, 1);
            }
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(sink.photos(), 2);
        let ledger = harness.storage.load_ledger().await.unwrap();
        assert!(ledger.entry("rentals").unwrap().success);
    }

    #[tokio::test]
    async fn test_undeliverable_failure_report_is_swallowed() {
        let harness = Harness::new(&["rentals"], 5);
        let sink = RecordingSink::new().failing_text();

        let report = harness
            .run_topic(
                &StaticFetcher::Fails("blocked".into()),
                records(&["x1"]),
                &sink,
                "rentals",
            )
            .await;

        assert!(!report.succeeded());
        let ledger = harness.storage.load_ledger().await.unwrap();
        assert!(!ledger.entry("rentals").unwrap().success);
    }

    #[tokio::test]
    async fn test_run_next_rotates_topics() {
        let harness = Harness::new(&["a", "b"], 5);
        let fetcher = page();
        let extractor = StaticExtractor(records(&["x1"]));
        let sink = RecordingSink::new();
        let runner = Runner::new(
            &harness.config,
            &fetcher,
            &extractor,
            &harness.storage,
            &harness.storage,
            &sink,
        );

        let mut picked = Vec::new();
        for _ in 0..3 {
            let report = runner.run_next().await.unwrap().unwrap();
            picked.push(report.topic);
            // Keep ledger timestamps strictly increasing.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(picked, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_run_next_without_enabled_topics() {
        let mut harness = Harness::new(&["a"], 5);
        harness.config.projects[0].disabled = true;
        let fetcher = page();
        let extractor = StaticExtractor(records(&["x1"]));
        let sink = RecordingSink::new();
        let runner = Runner::new(
            &harness.config,
            &fetcher,
            &extractor,
            &harness.storage,
            &harness.storage,
            &sink,
        );

        assert!(runner.run_next().await.unwrap().is_none());
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_fan_out_runs_every_topic() {
        let mut harness = Harness::new(&["a", "b", "c"], 5);
        harness.config.mode = RunMode::FanOut;
        harness.config.projects[1].disabled = true;
        let fetcher = page();
        let extractor = StaticExtractor(records(&["x1", "x2"]));
        let sink = RecordingSink::new();
        let runner = Runner::new(
            &harness.config,
            &fetcher,
            &extractor,
            &harness.storage,
            &harness.storage,
            &sink,
        );

        let reports = runner.run().await.unwrap();

        let topics: Vec<_> = reports.iter().map(|r| r.topic.as_str()).collect();
        assert_eq!(topics, vec!["a", "c"]);
        assert!(reports.iter().all(RunReport::succeeded));

        let ledger = harness.storage.load_ledger().await.unwrap();
        assert_eq!(ledger.projects.len(), 2);
        assert!(ledger.entry("b").is_none());
        assert_eq!(harness.stored_ids("a"), vec!["x1", "x2"]);
        assert_eq!(harness.stored_ids("c"), vec!["x1", "x2"]);
    }

    #[tokio::test]
    async fn test_work_signal_written() {
        let harness = Harness::new(&["rentals"], 5);
        harness
            .run_topic(&page(), records(&["x1"]), &RecordingSink::new(), "rentals")
            .await;
        assert!(harness.config.paths.work_signal.exists());
    }
}
