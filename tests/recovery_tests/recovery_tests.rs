//! Tests for recovery replay
//!
//! These tests verify:
//! - A recovery worker replays every live record in write order
//! - The processor comes back with its state, and `finish` has run
//! - Stop and abort from the processor reach the caller
//! - Open failures and processor panics are reported, not lost
//! - A large catalog replays correctly after its oldest segment is reclaimed

use std::sync::Arc;

use catlog::{
    Catalog, CatlogError, Config, Cookie, LogEntry, LogId, LogRecord, MemStore, RecordProcessor,
    RecoveryWorker, Result, ScanControl,
};

// =============================================================================
// Helper Types
// =============================================================================

/// Collects payloads; optionally stops or fails at the n-th record
#[derive(Default)]
struct Collector {
    seen: Vec<Vec<u8>>,
    finished: bool,
    stop_after: Option<usize>,
    fail_at: Option<usize>,
}

impl RecordProcessor for Collector {
    fn process(&mut self, entry: &LogEntry) -> Result<ScanControl> {
        if self.fail_at == Some(self.seen.len()) {
            return Err(CatlogError::Aborted { code: -5 });
        }
        self.seen.push(entry.record.payload.to_vec());
        if self.stop_after == Some(self.seen.len()) {
            return Ok(ScanControl::Stop);
        }
        Ok(ScanControl::Continue)
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

struct Panicker;

impl RecordProcessor for Panicker {
    fn process(&mut self, _entry: &LogEntry) -> Result<ScanControl> {
        panic!("processor blew up");
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn small_config() -> Config {
    Config::builder()
        .catalog_capacity(16)
        .segment_capacity(4)
        .chunk_size(1024)
        .build()
}

/// Catalog with `count` records, closed; returns its id and the cookies
fn populated(store: &Arc<MemStore>, config: &Config, count: usize) -> (LogId, Vec<Cookie>) {
    let catalog = Catalog::create(store.clone(), config.clone()).unwrap();
    let cookies = (0..count)
        .map(|i| {
            catalog
                .add(&LogRecord::new(11, format!("op-{}", i).into_bytes()))
                .unwrap()
        })
        .collect();
    let id = catalog.id();
    catalog.close().unwrap();
    (id, cookies)
}

fn expected_payloads(range: std::ops::Range<usize>) -> Vec<Vec<u8>> {
    range.map(|i| format!("op-{}", i).into_bytes()).collect()
}

// =============================================================================
// Worker Tests
// =============================================================================

#[test]
fn test_worker_replays_all_records() {
    let store = Arc::new(MemStore::new());
    let config = small_config();
    let (id, _) = populated(&store, &config, 10);

    let handle = RecoveryWorker::spawn(store.clone(), id, config, Collector::default()).unwrap();
    assert_eq!(handle.catalog_id(), id);

    let outcome = handle.wait().unwrap();
    let summary = outcome.result.unwrap();

    assert_eq!(summary.records, 10);
    assert_eq!(summary.segments, 4);
    assert!(!summary.stopped);
    assert_eq!(outcome.processor.seen, expected_payloads(0..10));
    assert!(outcome.processor.finished);
}

#[test]
fn test_worker_reports_stop() {
    let store = Arc::new(MemStore::new());
    let config = small_config();
    let (id, _) = populated(&store, &config, 10);

    let collector = Collector {
        stop_after: Some(4),
        ..Collector::default()
    };
    let outcome = RecoveryWorker::spawn(store.clone(), id, config, collector)
        .unwrap()
        .wait()
        .unwrap();

    let summary = outcome.result.unwrap();
    assert!(summary.stopped);
    assert_eq!(summary.records, 4);
    assert_eq!(outcome.processor.seen, expected_payloads(0..4));
    assert!(outcome.processor.finished);
}

#[test]
fn test_worker_propagates_abort() {
    let store = Arc::new(MemStore::new());
    let config = small_config();
    let (id, _) = populated(&store, &config, 10);

    let collector = Collector {
        fail_at: Some(6),
        ..Collector::default()
    };
    let outcome = RecoveryWorker::spawn(store.clone(), id, config, collector)
        .unwrap()
        .wait()
        .unwrap();

    assert!(matches!(outcome.result, Err(CatlogError::Aborted { code: -5 })));
    assert_eq!(outcome.processor.seen.len(), 6);
    // finish runs whatever the outcome
    assert!(outcome.processor.finished);
}

#[test]
fn test_worker_reports_missing_catalog() {
    let store = Arc::new(MemStore::new());
    let missing = LogId::new(404, 1);

    let outcome = RecoveryWorker::spawn(store, missing, small_config(), Collector::default())
        .unwrap()
        .wait()
        .unwrap();

    assert!(matches!(outcome.result, Err(CatlogError::LogNotFound(id)) if id == missing));
    assert!(outcome.processor.seen.is_empty());
    assert!(!outcome.processor.finished);
}

#[test]
fn test_worker_panic_is_reported() {
    let store = Arc::new(MemStore::new());
    let config = small_config();
    let (id, _) = populated(&store, &config, 2);

    let result = RecoveryWorker::spawn(store, id, config, Panicker).unwrap().wait();
    assert!(matches!(result, Err(CatlogError::Worker(_))));
}

#[test]
fn test_recovery_after_partial_cancel() {
    let store = Arc::new(MemStore::new());
    let config = small_config();
    let (id, cookies) = populated(&store, &config, 9);

    let catalog = Catalog::open(store.clone(), id, config.clone()).unwrap();
    catalog.cancel(&[cookies[0], cookies[4], cookies[8]]).unwrap();
    catalog.close().unwrap();

    let outcome = RecoveryWorker::spawn(store, id, config, Collector::default())
        .unwrap()
        .wait()
        .unwrap();
    outcome.result.unwrap();

    let expected: Vec<Vec<u8>> = [1, 2, 3, 5, 6, 7]
        .iter()
        .map(|i| format!("op-{}", i).into_bytes())
        .collect();
    assert_eq!(outcome.processor.seen, expected);
}

// =============================================================================
// Large Catalog Tests
// =============================================================================

#[test]
fn test_large_catalog_reclaims_oldest_segment() {
    let store = Arc::new(MemStore::new());
    let config = Config::builder()
        .catalog_capacity(32)
        .segment_capacity(1024)
        .chunk_size(4096)
        .build();
    let catalog = Catalog::create(store.clone(), config.clone()).unwrap();
    let id = catalog.id();

    let cookies: Vec<Cookie> = (0..5000u32)
        .map(|i| {
            let mut payload = vec![0u8; 64];
            payload[..4].copy_from_slice(&i.to_le_bytes());
            catalog.add(&LogRecord::new(1, payload)).unwrap()
        })
        .collect();

    // 1023 records per segment
    assert_eq!(catalog.segment_count(), 5);
    let first = cookies[0].log;
    assert!(cookies[..1023].iter().all(|c| c.log == first));
    assert_ne!(cookies[1023].log, first);

    let summary = catalog.cancel(&cookies[..1023]).unwrap();
    assert_eq!(summary.cancelled, 1023);
    assert_eq!(summary.destroyed, vec![first]);
    assert!(!store.contains(first));
    assert_eq!(catalog.oldest_index(), 1);
    catalog.verify().unwrap();
    catalog.close().unwrap();

    let mut next = 1023u32;
    let outcome = RecoveryWorker::spawn(
        store.clone(),
        id,
        config,
        move |entry: &LogEntry| -> Result<ScanControl> {
            let mut tag = [0u8; 4];
            tag.copy_from_slice(&entry.record.payload[..4]);
            assert_eq!(u32::from_le_bytes(tag), next, "record out of order");
            next += 1;
            Ok(ScanControl::Continue)
        },
    )
    .unwrap()
    .wait()
    .unwrap();

    let summary = outcome.result.unwrap();
    assert_eq!(summary.records, 5000 - 1023);
    assert_eq!(summary.segments, 4);
}
