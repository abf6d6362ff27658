//! Partition store: merge semantics, diff-guarded writes and the index

use std::fs;
use tempfile::TempDir;

use mtbo_event_scraper::store::{
    PartitionStore, SourceMeta, SourceRestriction, StoreError, UmbrellaIndex,
};

use crate::support::{date, event};

fn store() -> (TempDir, PartitionStore) {
    let dir = TempDir::new().unwrap();
    let store = PartitionStore::open(dir.path()).unwrap().with_sources([SourceMeta {
        code: "SWE".into(),
        name: "Eventor Sweden".into(),
        url: "https://eventor.orientering.se".into(),
    }]);
    (dir, store)
}

fn ids_and_dates(store: &PartitionStore, year: i32) -> Vec<(String, String)> {
    store
        .load_partition(year)
        .unwrap()
        .into_iter()
        .map(|e| (e.id, e.start_date.to_string()))
        .collect()
}

#[test]
fn test_merge_replaces_and_inserts() {
    let (_dir, store) = store();
    store
        .commit(2025, vec![event("SWE_1", date(2025, 5, 1))], None)
        .unwrap();

    let outcome = store
        .commit(
            2025,
            vec![event("SWE_2", date(2025, 6, 1)), event("SWE_1", date(2025, 5, 2))],
            None,
        )
        .unwrap();

    assert_eq!(
        ids_and_dates(&store, 2025),
        vec![
            ("SWE_1".to_string(), "2025-05-02".to_string()),
            ("SWE_2".to_string(), "2025-06-01".to_string()),
        ]
    );
    assert_eq!(outcome.stats.new, 1);
    assert_eq!(outcome.stats.changed, 1);
    assert_eq!(outcome.stats.deleted, 0);

    let index = store.load_index().unwrap();
    assert_eq!(index.partitions["2025"].count, 2);
    assert_eq!(index.partitions["2025"].path, "2025/events.json");
    assert_eq!(index.partitions["2025"].sources["SWE"], 2);
    assert_eq!(index.sources["SWE"].count, 2);
    assert!(index.last_run_at.is_some());
}

#[test]
fn test_merge_keeps_unmentioned_records() {
    let (_dir, store) = store();
    store
        .commit(
            2025,
            vec![event("SWE_1", date(2025, 3, 1)), event("NOR_9", date(2025, 4, 1))],
            None,
        )
        .unwrap();
    store
        .commit(2025, vec![event("SWE_3", date(2025, 2, 1))], None)
        .unwrap();

    let ids: Vec<String> = ids_and_dates(&store, 2025).into_iter().map(|(id, _)| id).collect();
    assert_eq!(ids, vec!["SWE_3", "SWE_1", "NOR_9"]);
}

#[test]
fn test_identical_batch_is_byte_identical_and_untouched() {
    let (_dir, store) = store();
    let batch = vec![event("SWE_2", date(2025, 6, 1)), event("SWE_1", date(2025, 5, 1))];

    let first = store.commit(2025, batch.clone(), None).unwrap().saved.unwrap();
    assert!(first.written);
    let path = store.partition_path(2025);
    let bytes = fs::read(&path).unwrap();
    let modified = fs::metadata(&path).unwrap().modified().unwrap();

    let mut reversed = batch;
    reversed.reverse();
    let second = store.commit(2025, reversed, None).unwrap();
    let saved = second.saved.unwrap();

    assert!(!saved.written);
    assert!(second.stats.is_empty());
    assert_eq!(saved.fingerprint, first.fingerprint);
    assert_eq!(fs::read(&path).unwrap(), bytes);
    assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), modified);
    assert!(bytes.ends_with(b"\n"));
}

#[test]
fn test_partition_file_layout() {
    let (dir, store) = store();
    store
        .commit(2025, vec![event("SWE_1", date(2025, 5, 1))], None)
        .unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.path().join("2025/events.json")).unwrap()).unwrap();
    assert_eq!(raw["schema_version"], "2.0");
    assert_eq!(raw["meta"]["sources"][0]["code"], "SWE");
    assert_eq!(raw["meta"]["sources"][0]["url"], "https://eventor.orientering.se");
    assert_eq!(raw["events"][0]["id"], "SWE_1");
    assert_eq!(raw["events"][0]["start_date"], "2025-05-01");

    let index: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.path().join("mtbo_events.json")).unwrap()).unwrap();
    assert_eq!(index["schema_version"], "2.0");
    assert_eq!(index["partitions"]["2025"]["count"], 1);
    assert_eq!(
        index["partitions"]["2025"]["fingerprint"].as_str().unwrap().len(),
        64
    );
}

#[test]
fn test_source_restriction_deletes_missing_records_in_window() {
    let (_dir, store) = store();
    store
        .commit(
            2025,
            vec![
                event("SWE_1", date(2025, 3, 1)),
                event("SWE_2", date(2025, 9, 1)),
                event("NOR_7", date(2025, 3, 2)),
            ],
            None,
        )
        .unwrap();

    let restriction = SourceRestriction {
        source: "SWE".into(),
        start: date(2025, 1, 1),
        end: date(2025, 6, 30),
        listed: Default::default(),
    };
    let outcome = store
        .commit(
            2025,
            vec![event("SWE_3", date(2025, 4, 1)), event("NOR_8", date(2025, 4, 2))],
            Some(&restriction),
        )
        .unwrap();

    let ids: Vec<String> = ids_and_dates(&store, 2025).into_iter().map(|(id, _)| id).collect();
    // SWE_1 gone, SWE_2 outside the window, NOR untouched and NOR_8 ignored
    assert_eq!(ids, vec!["NOR_7", "SWE_3", "SWE_2"]);
    assert_eq!(outcome.stats.new, 1);
    assert_eq!(outcome.stats.deleted, 1);
}

#[test]
fn test_event_moving_year_leaves_old_partition() {
    let (_dir, store) = store();
    store
        .commit(2024, vec![event("SWE_5", date(2024, 12, 30))], None)
        .unwrap();

    let outcome = store
        .commit(2025, vec![event("SWE_5", date(2025, 1, 2))], None)
        .unwrap();

    assert!(!store.partition_path(2024).exists());
    assert!(store.load_partition(2024).unwrap().is_empty());
    assert_eq!(ids_and_dates(&store, 2025).len(), 1);
    assert_eq!(outcome.stats.new, 0);
    assert_eq!(outcome.stats.changed, 1);

    let index = store.load_index().unwrap();
    assert!(!index.partitions.contains_key("2024"));
    assert_eq!(index.partitions["2025"].count, 1);
    assert_eq!(index.total_events(), 1);
}

#[test]
fn test_wrong_year_is_rejected() {
    let (_dir, store) = store();
    let err = store
        .commit(2025, vec![event("SWE_1", date(2026, 1, 1))], None)
        .unwrap_err();
    assert!(matches!(err, StoreError::PartitionMismatch { year: 2025, actual: 2026, .. }));
    assert!(!store.partition_path(2025).exists());
}

#[test]
fn test_purge_removes_across_partitions() {
    let (_dir, store) = store();
    store
        .commit(2024, vec![event("SWE_1", date(2024, 5, 1)), event("SWE_2", date(2024, 6, 1))], None)
        .unwrap();
    store
        .commit(2025, vec![event("SWE_3", date(2025, 5, 1))], None)
        .unwrap();

    let mut removed = store
        .purge(&["SWE_1".to_string(), "SWE_3".to_string(), "SWE_404".to_string()])
        .unwrap();
    removed.sort();

    assert_eq!(removed, vec!["SWE_1", "SWE_3"]);
    assert_eq!(ids_and_dates(&store, 2024).len(), 1);
    assert!(store.load_partition(2025).unwrap().is_empty());
    assert!(!store.partition_path(2025).exists());

    let index = store.load_index().unwrap();
    assert_eq!(index.total_events(), 1);
    assert_eq!(index.partitions.keys().collect::<Vec<_>>(), vec!["2024"]);
    assert_eq!(index.sources["SWE"].count, 1);
}

#[test]
fn test_incompatible_index_is_rejected() {
    let (dir, store) = store();
    fs::write(
        dir.path().join("mtbo_events.json"),
        r#"{"schema_version": "1.0", "last_run_at": null, "data_root": "x", "partitions": {}, "sources": {}}"#,
    )
    .unwrap();

    let err = store.load_index().unwrap_err();
    assert!(matches!(err, StoreError::SchemaVersionMismatch { .. }));
}

#[test]
fn test_corrupt_partition_is_reported() {
    let (dir, store) = store();
    fs::create_dir_all(dir.path().join("2025")).unwrap();
    fs::write(dir.path().join("2025/events.json"), "{ not json").unwrap();

    let err = store.load_partition(2025).unwrap_err();
    assert!(matches!(err, StoreError::Corrupt { .. }));
    assert!(!err.suggestion().is_empty());
}

#[test]
fn test_missing_index_loads_empty() {
    let (_dir, store) = store();
    let index: UmbrellaIndex = store.load_index().unwrap();
    assert!(index.partitions.is_empty());
    assert_eq!(index.total_events(), 0);
}

#[test]
fn test_link_timestamps_survive_remerge() {
    let (_dir, store) = store();
    let mut with_link = event("SWE_1", date(2025, 5, 1));
    with_link.links.push(mtbo_event_scraper::Link {
        kind: "Website".into(),
        url: "https://example.org/mtbo".into(),
        title: None,
        last_updated_at: None,
    });

    store.commit(2025, vec![with_link.clone()], None).unwrap();
    let stamped = store.load_partition(2025).unwrap()[0].links[0]
        .last_updated_at
        .clone();
    assert!(stamped.is_some());

    let again = store.commit(2025, vec![with_link], None).unwrap();
    assert!(!again.saved.unwrap().written);
    assert_eq!(
        store.load_partition(2025).unwrap()[0].links[0].last_updated_at,
        stamped
    );
}
