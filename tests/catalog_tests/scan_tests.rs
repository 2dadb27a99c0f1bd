//! Tests for catalog scans
//!
//! These tests verify:
//! - Forward scans return records in write order, across segments
//! - Reverse scans return the exact opposite order
//! - Both orders stay correct once the catalog ring wraps past slot 0
//! - Resuming from a checkpoint continues strictly after it
//! - Stop ends a scan cleanly, errors abort it and propagate
//! - Processors may cancel records while scanning

use std::sync::Arc;

use catlog::{
    Catalog, CatlogError, Config, Cookie, LogEntry, LogRecord, MemStore, Result, ScanControl,
    ScanPosition,
};

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

fn append(catalog: &Catalog, tag: &str) -> Cookie {
    catalog
        .add(&LogRecord::new(3, tag.as_bytes().to_vec()))
        .unwrap()
}

fn payloads(entries: &[LogEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| String::from_utf8(e.record.payload.to_vec()).unwrap())
        .collect()
}

fn forward(catalog: &Catalog) -> Vec<LogEntry> {
    catalog.scan(None).collect::<Result<Vec<_>>>().unwrap()
}

fn reverse(catalog: &Catalog) -> Vec<LogEntry> {
    catalog.scan_reverse().collect::<Result<Vec<_>>>().unwrap()
}

/// Drive a catalog of capacity 6 (one record per segment) until its live
/// range crosses slot 0. Returns the live payloads in write order.
fn wrapped_catalog() -> (Arc<MemStore>, Catalog, Vec<String>) {
    let (store, catalog) = setup_catalog(6, 2);

    let mut live: Vec<(Cookie, String)> = Vec::new();
    for i in 0..7 {
        let tag = format!("r{}", i);
        live.push((append(&catalog, &tag), tag));
        if live.len() > 3 {
            let (cookie, _) = live.remove(0);
            catalog.cancel(&[cookie]).unwrap();
        }
    }

    assert!(
        catalog.oldest_index() > catalog.last_index(),
        "ring should wrap: oldest {} last {}",
        catalog.oldest_index(),
        catalog.last_index()
    );
    let tags = live.into_iter().map(|(_, tag)| tag).collect();
    (store, catalog, tags)
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_empty_catalog_scans_nothing() {
    let (_store, catalog) = setup_catalog(16, 8);
    assert!(forward(&catalog).is_empty());
    assert!(reverse(&catalog).is_empty());
}

#[test]
fn test_forward_scan_in_write_order() {
    let (_store, catalog) = setup_catalog(16, 4);
    let expected: Vec<String> = (0..10).map(|i| format!("r{}", i)).collect();
    for tag in &expected {
        append(&catalog, tag);
    }

    let entries = forward(&catalog);
    assert_eq!(payloads(&entries), expected);

    // positions ascend through (slot, index)
    let positions: Vec<(u32, u32)> = entries
        .iter()
        .map(|e| (e.position.catalog_slot, e.position.index))
        .collect();
    let mut sorted = positions.clone();
    sorted.sort();
    assert_eq!(positions, sorted);
}

#[test]
fn test_reverse_scan_is_exact_opposite() {
    let (_store, catalog) = setup_catalog(16, 4);
    for i in 0..10 {
        append(&catalog, &format!("r{}", i));
    }

    let mut expected = payloads(&forward(&catalog));
    expected.reverse();
    assert_eq!(payloads(&reverse(&catalog)), expected);
}

#[test]
fn test_scan_entries_carry_usable_cookies() {
    let (_store, catalog) = setup_catalog(16, 4);
    let cookies: Vec<Cookie> = (0..5).map(|i| append(&catalog, &format!("r{}", i))).collect();

    let scanned: Vec<Cookie> = forward(&catalog).into_iter().map(|e| e.cookie).collect();
    assert_eq!(scanned, cookies);
}

// =============================================================================
// Wraparound Tests
// =============================================================================

#[test]
fn test_forward_scan_after_wraparound() {
    let (_store, catalog, expected) = wrapped_catalog();

    let entries = forward(&catalog);
    assert_eq!(payloads(&entries), expected);

    // write order crosses from high slots back to low ones
    let slots: Vec<u32> = entries.iter().map(|e| e.position.catalog_slot).collect();
    assert!(slots.windows(2).any(|w| w[1] < w[0]));
    catalog.verify().unwrap();
}

#[test]
fn test_reverse_scan_after_wraparound() {
    let (_store, catalog, mut expected) = wrapped_catalog();
    expected.reverse();
    assert_eq!(payloads(&reverse(&catalog)), expected);
}

// =============================================================================
// Resume Tests
// =============================================================================

#[test]
fn test_resume_continues_after_checkpoint() {
    let (_store, catalog) = setup_catalog(16, 4);
    for i in 0..10 {
        append(&catalog, &format!("r{}", i));
    }
    let all = forward(&catalog);

    for split in 0..all.len() {
        let checkpoint = all[split].position;
        let rest: Vec<LogEntry> = catalog
            .scan(Some(checkpoint))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(rest, all[split + 1..].to_vec(), "resume after {}", checkpoint);
    }
}

#[test]
fn test_cursor_position_resumes_partial_scan() {
    let (_store, catalog) = setup_catalog(16, 4);
    for i in 0..8 {
        append(&catalog, &format!("r{}", i));
    }

    let mut cursor = catalog.scan(None);
    let first: Vec<LogEntry> = cursor.by_ref().take(5).map(|e| e.unwrap()).collect();
    let checkpoint = cursor.position().unwrap();
    drop(cursor);

    let rest: Vec<LogEntry> = catalog
        .scan(Some(checkpoint))
        .collect::<Result<Vec<_>>>()
        .unwrap();
    let mut combined = first;
    combined.extend(rest);
    assert_eq!(combined, forward(&catalog));
}

#[test]
fn test_resume_after_wraparound() {
    let (_store, catalog, expected) = wrapped_catalog();
    let all = forward(&catalog);

    let rest: Vec<LogEntry> = catalog
        .scan(Some(all[0].position))
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(payloads(&rest), expected[1..].to_vec());
}

#[test]
fn test_resume_from_reclaimed_segment_scans_everything() {
    let (_store, catalog) = setup_catalog(16, 3);
    let cookies: Vec<Cookie> = (0..6).map(|i| append(&catalog, &format!("r{}", i))).collect();
    let checkpoint = forward(&catalog)[1].position;

    catalog.cancel(&cookies[0..2]).unwrap();

    let rest: Vec<LogEntry> = catalog
        .scan(Some(checkpoint))
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(rest, forward(&catalog));
    assert_eq!(rest.len(), 4);
}

#[test]
fn test_process_resumes_from_position() {
    let (_store, catalog) = setup_catalog(16, 4);
    for i in 0..6 {
        append(&catalog, &format!("r{}", i));
    }

    let mut seen = Vec::new();
    let summary = catalog
        .process(Some(ScanPosition::new(1, 2)), &mut |entry: &LogEntry| -> Result<ScanControl> {
            seen.push(String::from_utf8(entry.record.payload.to_vec()).unwrap());
            Ok(ScanControl::Continue)
        })
        .unwrap();

    assert_eq!(seen, vec!["r2", "r3", "r4", "r5"]);
    assert_eq!(summary.records, 4);
    assert_eq!(summary.segments, 2);
    assert!(!summary.stopped);
}

// =============================================================================
// Processor Control Tests
// =============================================================================

#[test]
fn test_stop_ends_scan_successfully() {
    let (_store, catalog) = setup_catalog(16, 4);
    for i in 0..10 {
        append(&catalog, &format!("r{}", i));
    }

    let mut count = 0;
    let summary = catalog
        .process(None, &mut |_: &LogEntry| -> Result<ScanControl> {
            count += 1;
            Ok(if count == 4 {
                ScanControl::Stop
            } else {
                ScanControl::Continue
            })
        })
        .unwrap();

    assert_eq!(count, 4);
    assert!(summary.stopped);
    assert_eq!(summary.records, 4);
    assert_eq!(summary.last.unwrap().index, 1);
}

#[test]
fn test_processor_error_aborts_and_propagates() {
    let (_store, catalog) = setup_catalog(16, 4);
    for i in 0..10 {
        append(&catalog, &format!("r{}", i));
    }

    let mut count = 0;
    let result = catalog.process(None, &mut |_: &LogEntry| -> Result<ScanControl> {
        count += 1;
        if count == 3 {
            Err(CatlogError::Aborted { code: -22 })
        } else {
            Ok(ScanControl::Continue)
        }
    });

    assert!(matches!(result, Err(CatlogError::Aborted { code: -22 })));
    assert_eq!(count, 3);
}

#[test]
fn test_reverse_process_stop() {
    let (_store, catalog) = setup_catalog(16, 4);
    for i in 0..10 {
        append(&catalog, &format!("r{}", i));
    }

    let mut seen = Vec::new();
    let summary = catalog
        .reverse_process(&mut |entry: &LogEntry| -> Result<ScanControl> {
            seen.push(String::from_utf8(entry.record.payload.to_vec()).unwrap());
            Ok(if seen.len() == 2 {
                ScanControl::Stop
            } else {
                ScanControl::Continue
            })
        })
        .unwrap();

    assert_eq!(seen, vec!["r9", "r8"]);
    assert!(summary.stopped);
}

#[test]
fn test_processor_may_cancel_while_scanning() {
    let (store, catalog) = setup_catalog(16, 4);
    for i in 0..9 {
        append(&catalog, &format!("r{}", i));
    }

    let summary = catalog
        .process(None, &mut |entry: &LogEntry| -> Result<ScanControl> {
            catalog.cancel(&[entry.cookie])?;
            Ok(ScanControl::Continue)
        })
        .unwrap();

    assert_eq!(summary.records, 9);
    assert!(forward(&catalog).is_empty());
    assert_eq!(catalog.segment_count(), 0);
    // the declared next segment was never created
    assert_eq!(store.object_count(), 1);
    catalog.verify().unwrap();
}
