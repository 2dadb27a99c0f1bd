//! Tests for the catalog cancel path
//!
//! These tests verify:
//! - Cancelling a cookie twice reports not-found without touching state
//! - Emptied segments are destroyed and their catalog slot released
//! - The oldest boundary advances over released slots, including past
//!   slots released out of order
//! - Batch semantics: best effort, aggregated failures, real errors win
//!   over not-found
//! - Generation mismatches are skipped, never matched

use std::sync::Arc;

use catlog::store::FaultPoint;
use catlog::{Catalog, CatlogError, Config, Cookie, LogId, LogRecord, MemStore, Result};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_catalog(catalog_capacity: u32, segment_capacity: u32) -> (Arc<MemStore>, Catalog) {
    let store = Arc::new(MemStore::new());
    let config = Config::builder()
        .catalog_capacity(catalog_capacity)
        .segment_capacity(segment_capacity)
        .chunk_size(4096)
        .build();
    let catalog = Catalog::create(store.clone(), config).unwrap();
    (store, catalog)
}

fn fill(catalog: &Catalog, count: usize) -> Vec<Cookie> {
    (0..count)
        .map(|i| {
            catalog
                .add(&LogRecord::new(2, format!("op-{}", i).into_bytes()))
                .unwrap()
        })
        .collect()
}

fn live_count(catalog: &Catalog) -> usize {
    catalog.scan(None).collect::<Result<Vec<_>>>().unwrap().len()
}

fn failure_source(err: CatlogError) -> CatlogError {
    match err {
        CatlogError::CancelFailed { source, .. } => *source,
        other => panic!("expected CancelFailed, got {:?}", other),
    }
}

// =============================================================================
// Single Cancel Tests
// =============================================================================

#[test]
fn test_cancel_removes_record_from_scan() {
    let (_store, catalog) = setup_catalog(16, 8);
    let cookies = fill(&catalog, 3);

    let summary = catalog.cancel(&[cookies[1]]).unwrap();
    assert_eq!(summary.cancelled, 1);
    assert!(summary.destroyed.is_empty());

    let remaining: Vec<Cookie> = catalog
        .scan(None)
        .map(|e| e.unwrap().cookie)
        .collect();
    assert_eq!(remaining, vec![cookies[0], cookies[2]]);
    catalog.verify().unwrap();
}

#[test]
fn test_cancel_twice_reports_not_found() {
    let (_store, catalog) = setup_catalog(16, 8);
    let cookies = fill(&catalog, 3);

    catalog.cancel(&[cookies[0]]).unwrap();
    let err = catalog.cancel(&[cookies[0]]).unwrap_err();

    let source = failure_source(err);
    assert!(source.is_not_found());
    assert!(matches!(source, CatlogError::RecordNotFound { index: 1, .. }));

    assert_eq!(live_count(&catalog), 2);
    catalog.verify().unwrap();
}

#[test]
fn test_cancel_reserved_index_is_invalid() {
    let (_store, catalog) = setup_catalog(16, 8);
    let cookies = fill(&catalog, 1);

    let err = catalog.cancel(&[Cookie::new(cookies[0].log, 0)]).unwrap_err();
    assert!(matches!(
        failure_source(err),
        CatlogError::InvalidIndex { index: 0, .. }
    ));
}

// =============================================================================
// Segment Destruction Tests
// =============================================================================

#[test]
fn test_emptied_segment_is_destroyed() {
    // 3 records per segment
    let (store, catalog) = setup_catalog(16, 4);
    let cookies = fill(&catalog, 6);
    let first = cookies[0].log;

    let summary = catalog.cancel(&cookies[0..3]).unwrap();

    assert_eq!(summary.cancelled, 3);
    assert_eq!(summary.destroyed, vec![first]);
    assert!(!store.contains(first));
    assert_eq!(catalog.segment_count(), 1);
    assert_eq!(catalog.oldest_index(), 1);
    assert_eq!(live_count(&catalog), 3);
    catalog.verify().unwrap();
}

#[test]
fn test_destroyed_current_segment_is_replaced() {
    let (store, catalog) = setup_catalog(16, 8);
    let cookies = fill(&catalog, 2);
    let current = catalog.current_log().unwrap();

    let summary = catalog.cancel(&cookies).unwrap();
    assert_eq!(summary.destroyed, vec![current]);
    assert_eq!(catalog.current_log(), None);

    let cookie = catalog.add(&LogRecord::new(2, b"after".to_vec())).unwrap();
    assert_ne!(cookie.log, current);
    assert!(store.contains(cookie.log));
    assert_eq!(catalog.segments(), vec![(2, cookie.log)]);
    catalog.verify().unwrap();
}

#[test]
fn test_oldest_waits_for_first_live_slot() {
    // 2 records per segment: segments at slots 1, 2, 3
    let (_store, catalog) = setup_catalog(16, 3);
    let cookies = fill(&catalog, 6);

    // middle segment first: oldest stays behind slot 1
    catalog.cancel(&cookies[2..4]).unwrap();
    assert_eq!(catalog.oldest_index(), 0);
    catalog.verify().unwrap();

    // first segment: oldest sweeps over slot 2 as well
    catalog.cancel(&cookies[0..2]).unwrap();
    assert_eq!(catalog.oldest_index(), 2);
    catalog.verify().unwrap();

    // last segment: catalog empty, oldest meets last
    catalog.cancel(&cookies[4..6]).unwrap();
    assert_eq!(catalog.segment_count(), 0);
    assert_eq!(catalog.oldest_index(), catalog.last_index());
    catalog.verify().unwrap();
}

#[test]
fn test_catalog_slots_wrap_around() {
    // capacity 6: slots 1..=5, at most 4 live; 1 record per segment
    let (_store, catalog) = setup_catalog(6, 3);

    let mut live: Vec<Cookie> = Vec::new();
    for round in 0..12 {
        let cookie = catalog
            .add(&LogRecord::new(2, format!("round-{}", round).into_bytes()))
            .unwrap();
        let filler = catalog
            .add(&LogRecord::new(2, format!("filler-{}", round).into_bytes()))
            .unwrap();
        assert_eq!(cookie.log, filler.log);
        live.push(cookie);
        live.push(filler);

        if live.len() > 6 {
            let released: Vec<Cookie> = live.drain(0..2).collect();
            let summary = catalog.cancel(&released).unwrap();
            assert_eq!(summary.destroyed.len(), 1);
        }
        catalog.verify().unwrap();
    }

    // slot 0 never used
    assert!(catalog.segments().iter().all(|(slot, _)| *slot != 0));
    let scanned: Vec<Cookie> = catalog.scan(None).map(|e| e.unwrap().cookie).collect();
    assert_eq!(scanned, live);
}

// =============================================================================
// Batch Semantics Tests
// =============================================================================

#[test]
fn test_batch_is_best_effort() {
    let (_store, catalog) = setup_catalog(16, 8);
    let cookies = fill(&catalog, 4);
    catalog.cancel(&[cookies[1]]).unwrap();

    let err = catalog.cancel(&cookies).unwrap_err();
    match err {
        CatlogError::CancelFailed {
            failed,
            total,
            source,
        } => {
            assert_eq!(failed, 1);
            assert_eq!(total, 4);
            assert!(source.is_not_found());
        }
        other => panic!("expected CancelFailed, got {:?}", other),
    }

    // the other three were cancelled and the segment destroyed
    assert_eq!(live_count(&catalog), 0);
    assert_eq!(catalog.segment_count(), 0);
    catalog.verify().unwrap();
}

#[test]
fn test_real_error_not_overridden_by_not_found() {
    let (store, catalog) = setup_catalog(16, 8);
    let cookies = fill(&catalog, 3);

    store.inject_fault(FaultPoint::WriteHeader, Some(cookies[0].log));
    let missing = Cookie::new(LogId::new(9999, 1), 1);

    let err = catalog.cancel(&[cookies[0], missing, cookies[1]]).unwrap_err();
    match err {
        CatlogError::CancelFailed { failed, source, .. } => {
            assert_eq!(failed, 2);
            assert!(matches!(*source, CatlogError::Io(_)));
        }
        other => panic!("expected CancelFailed, got {:?}", other),
    }

    // failed cancel left its record live
    let remaining: Vec<Cookie> = catalog.scan(None).map(|e| e.unwrap().cookie).collect();
    assert_eq!(remaining, vec![cookies[0], cookies[2]]);
    catalog.verify().unwrap();
}

#[test]
fn test_empty_batch_is_a_no_op() {
    let (_store, catalog) = setup_catalog(16, 8);
    fill(&catalog, 2);

    let summary = catalog.cancel(&[]).unwrap();
    assert_eq!(summary.cancelled, 0);
    assert_eq!(live_count(&catalog), 2);
}

// =============================================================================
// Generation Tests
// =============================================================================

#[test]
fn test_generation_mismatch_is_not_found() {
    let (_store, catalog) = setup_catalog(16, 8);
    let cookies = fill(&catalog, 2);

    let stale = LogId::new(cookies[0].log.oid, cookies[0].log.generation + 1);
    let err = catalog.cancel(&[Cookie::new(stale, 1)]).unwrap_err();

    assert!(matches!(failure_source(err), CatlogError::LogNotFound(id) if id == stale));
    assert_eq!(live_count(&catalog), 2);
    catalog.verify().unwrap();
}

#[test]
fn test_cancel_after_reopen_opens_segment_from_store() {
    let (store, catalog) = setup_catalog(16, 4);
    let id = catalog.id();
    let config = catalog.config().clone();
    let cookies = fill(&catalog, 5);
    catalog.close().unwrap();

    let reopened = Catalog::open(store.clone(), id, config).unwrap();
    let summary = reopened.cancel(&cookies[0..3]).unwrap();

    assert_eq!(summary.destroyed, vec![cookies[0].log]);
    assert!(!store.contains(cookies[0].log));
    assert_eq!(reopened.oldest_index(), 1);
    assert_eq!(live_count(&reopened), 2);
    reopened.verify().unwrap();
}

#[test]
fn test_cancel_of_other_catalogs_record_is_not_found() {
    let (store, a) = setup_catalog(16, 4);
    let b = Catalog::create(store.clone(), a.config().clone()).unwrap();
    let a_cookie = fill(&a, 1)[0];
    let b_cookie = fill(&b, 1)[0];
    assert_eq!(a_cookie.index, b_cookie.index);

    let err = b.cancel(&[a_cookie]).unwrap_err();
    assert!(matches!(failure_source(err), CatlogError::LogNotFound(id) if id == a_cookie.log));

    assert_eq!(b.segments(), vec![(1, b_cookie.log)]);
    assert_eq!(live_count(&b), 1);
    b.verify().unwrap();

    assert!(store.contains(a_cookie.log));
    assert!(store.contains(b_cookie.log));
    assert_eq!(live_count(&a), 1);
    a.verify().unwrap();
}
