//! End-to-end runs of the executor over in-memory sources

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

use mtbo_event_scraper::downloader::{
    Plan, RunError, ScrapeExecutor, SegmentOutcome, SegmentPlanner,
};
use mtbo_event_scraper::fetcher::{EventSource, FetchError};
use mtbo_event_scraper::shutdown::ShutdownCoordinator;
use mtbo_event_scraper::store::PartitionStore;

use crate::support::{bypass_failure, date, event, network_failure, Listing, StaticSource};

fn plan_2024_2025() -> Plan {
    SegmentPlanner::default()
        .plan(date(2024, 1, 1), date(2025, 12, 31), date(2026, 1, 23))
        .unwrap()
}

fn executor(dir: &TempDir, sources: Vec<Arc<dyn EventSource>>) -> ScrapeExecutor {
    ScrapeExecutor::new(PartitionStore::open(dir.path()).unwrap(), sources)
}

#[tokio::test]
async fn test_run_saves_each_year() {
    let dir = TempDir::new().unwrap();
    let swe = StaticSource::new("SWE")
        .with_year(2024, Listing::Events(vec![event("SWE_10", date(2024, 8, 3))]))
        .with_year(
            2025,
            Listing::Events(vec![event("SWE_20", date(2025, 5, 1)), event("SWE_21", date(2025, 6, 7))]),
        );
    let nor = StaticSource::new("NOR")
        .with_year(2025, Listing::Events(vec![event("NOR_5", date(2025, 5, 1))]));

    let executor = executor(&dir, vec![Arc::new(swe), Arc::new(nor)]);
    let report = executor.run(&plan_2024_2025()).await.unwrap();

    assert_eq!(report.segments.len(), 2);
    assert!(report
        .segments
        .iter()
        .all(|s| s.outcome == SegmentOutcome::Saved { written: true }));
    assert_eq!(report.stats.new, 4);
    assert_eq!(report.fetched(), 4);

    let store = executor.store();
    assert_eq!(store.load_partition(2024).unwrap().len(), 1);
    let ids: Vec<String> = store.load_partition(2025).unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(ids, vec!["NOR_5", "SWE_20", "SWE_21"]);
    assert_eq!(store.load_index().unwrap().total_events(), 4);

    // A repeated run changes nothing on disk
    let again = executor.run(&plan_2024_2025()).await.unwrap();
    assert!(again.stats.is_empty());
    assert!(again
        .segments
        .iter()
        .all(|s| s.outcome == SegmentOutcome::Saved { written: false }));
}

#[tokio::test]
async fn test_network_failure_aborts_only_its_segment() {
    let dir = TempDir::new().unwrap();
    let swe = StaticSource::new("SWE")
        .with_year(2024, Listing::Fail(network_failure))
        .with_year(2025, Listing::Events(vec![event("SWE_20", date(2025, 5, 1))]));

    let executor = executor(&dir, vec![Arc::new(swe)]);
    let report = executor.run(&plan_2024_2025()).await.unwrap();

    assert!(report.has_failures());
    match &report.segments[0].outcome {
        SegmentOutcome::Failed { source, error } => {
            assert_eq!(source, "SWE");
            assert!(error.contains("service unavailable"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(report.segments[1].outcome, SegmentOutcome::Saved { written: true });
    assert!(!executor.store().partition_path(2024).exists());
    assert_eq!(executor.store().load_partition(2025).unwrap().len(), 1);
}

#[tokio::test]
async fn test_bypass_failure_aborts_run() {
    let dir = TempDir::new().unwrap();
    let swe = StaticSource::new("SWE")
        .with_year(2024, Listing::Fail(bypass_failure))
        .with_year(2025, Listing::Events(vec![event("SWE_20", date(2025, 5, 1))]));

    let executor = executor(&dir, vec![Arc::new(swe)]);
    let err = executor.run(&plan_2024_2025()).await.unwrap_err();

    assert!(matches!(err, RunError::Fetch(FetchError::Cloudflare { .. })));
    assert!(!executor.store().index_path().exists());
}

#[tokio::test]
async fn test_invalid_records_are_dropped() {
    let dir = TempDir::new().unwrap();
    let mut no_status = event("SWE_2", date(2025, 5, 2));
    no_status.status.clear();
    let swe = StaticSource::new("SWE")
        .with_year(
            2025,
            Listing::Events(vec![
                event("SWE_1", date(2025, 5, 1)),
                no_status,
                event("SWE_3", date(2025, 5, 3)),
            ]),
        )
        .with_broken_detail("SWE_3");
    let swe = Arc::new(swe);

    let executor = executor(&dir, vec![swe.clone()]);
    let plan = SegmentPlanner::default()
        .plan(date(2025, 1, 1), date(2025, 12, 31), date(2025, 1, 10))
        .unwrap();
    let report = executor.run(&plan).await.unwrap();

    assert_eq!(report.fetched(), 1);
    assert_eq!(report.rejected(), 2);
    assert_eq!(swe.detail_calls.load(Ordering::SeqCst), 3);
    let ids: Vec<String> = executor
        .store()
        .load_partition(2025)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec!["SWE_1"]);
}

#[tokio::test]
async fn test_restricted_refresh_removes_vanished_events() {
    let dir = TempDir::new().unwrap();
    let store = PartitionStore::open(dir.path()).unwrap();
    store
        .commit(
            2025,
            vec![
                event("SWE_1", date(2025, 5, 1)),
                event("SWE_2", date(2025, 6, 1)),
                event("NOR_1", date(2025, 6, 2)),
            ],
            None,
        )
        .unwrap();

    let swe = StaticSource::new("SWE")
        .with_year(2025, Listing::Events(vec![event("SWE_2", date(2025, 6, 1))]));
    let executor = ScrapeExecutor::new(store, vec![Arc::new(swe)]).restrict_to("SWE");
    let plan = SegmentPlanner::default()
        .plan(date(2025, 1, 1), date(2025, 12, 31), date(2025, 1, 10))
        .unwrap();
    let report = executor.run(&plan).await.unwrap();

    assert_eq!(report.stats.deleted, 1);
    let ids: Vec<String> = executor
        .store()
        .load_partition(2025)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec!["SWE_2", "NOR_1"]);
}

#[tokio::test]
async fn test_restricted_refresh_keeps_listed_events_with_bad_details() {
    let dir = TempDir::new().unwrap();
    let store = PartitionStore::open(dir.path()).unwrap();
    store
        .commit(
            2025,
            vec![event("SWE_1", date(2025, 5, 1)), event("SWE_2", date(2025, 6, 1))],
            None,
        )
        .unwrap();

    let swe = StaticSource::new("SWE")
        .with_year(
            2025,
            Listing::Events(vec![event("SWE_1", date(2025, 5, 1)), event("SWE_2", date(2025, 6, 1))]),
        )
        .with_broken_detail("SWE_1");
    let executor = ScrapeExecutor::new(store, vec![Arc::new(swe)]).restrict_to("SWE");
    let plan = SegmentPlanner::default()
        .plan(date(2025, 1, 1), date(2025, 12, 31), date(2025, 1, 10))
        .unwrap();
    let report = executor.run(&plan).await.unwrap();

    assert_eq!(report.rejected(), 1);
    assert_eq!(report.stats.deleted, 0);
    let ids: Vec<String> = executor
        .store()
        .load_partition(2025)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec!["SWE_1", "SWE_2"]);
}

#[tokio::test]
async fn test_missing_detail_page_drops_only_that_record() {
    let dir = TempDir::new().unwrap();
    let swe = StaticSource::new("SWE")
        .with_year(
            2025,
            Listing::Events(vec![event("SWE_1", date(2025, 5, 1)), event("SWE_2", date(2025, 6, 1))]),
        )
        .with_gone_detail("SWE_1");

    let executor = executor(&dir, vec![Arc::new(swe)]);
    let plan = SegmentPlanner::default()
        .plan(date(2025, 1, 1), date(2025, 12, 31), date(2025, 1, 10))
        .unwrap();
    let report = executor.run(&plan).await.unwrap();

    assert!(!report.has_failures());
    assert_eq!(report.segments[0].outcome, SegmentOutcome::Saved { written: true });
    assert_eq!(report.rejected(), 1);
    let ids: Vec<String> = executor
        .store()
        .load_partition(2025)
        .unwrap()
        .into_iter()
        .map(|e| e.id)
        .collect();
    assert_eq!(ids, vec!["SWE_2"]);
}

#[tokio::test]
async fn test_cancelled_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let swe = StaticSource::new("SWE")
        .with_year(2025, Listing::Events(vec![event("SWE_20", date(2025, 5, 1))]));

    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let executor = executor(&dir, vec![Arc::new(swe)]).with_shutdown(shutdown);

    let err = executor.run(&plan_2024_2025()).await.unwrap_err();
    assert!(matches!(err, RunError::Cancelled { completed: 0 }));
    assert!(!executor.store().index_path().exists());
}

#[tokio::test]
async fn test_empty_years_leave_no_files() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, vec![Arc::new(StaticSource::new("SWE"))]);
    let report = executor.run(&plan_2024_2025()).await.unwrap();

    assert!(report.segments.iter().all(|s| s.outcome == SegmentOutcome::Empty));
    assert!(!executor.store().index_path().exists());
}
