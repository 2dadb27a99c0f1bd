//! Background Recovery
//!
//! Runs a full catalog replay on a dedicated thread so the caller that
//! triggers recovery does not wait for it.
//!
//! ```text
//!   caller ──spawn()──▶ [catlog-recovery thread]
//!                         open catalog
//!                         recover(processor)   ← callbacks run here
//!                         close catalog
//!                         send (result, processor) ──▶ channel
//!   caller ◀──wait()───────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};

use crate::catalog::{Catalog, RecordProcessor, ScanSummary};
use crate::config::Config;
use crate::error::{CatlogError, Result};
use crate::record::LogId;
use crate::store::LogStore;

/// What a finished worker hands back
pub struct RecoveryOutcome<P> {
    /// Scan summary, or the first error from open, scan, finish, sync or close
    pub result: Result<ScanSummary>,
    /// The processor, with whatever state it accumulated
    pub processor: P,
}

/// Spawns recovery workers
pub struct RecoveryWorker;

impl RecoveryWorker {
    /// Replay catalog `catalog_id` on a new thread through `processor`.
    ///
    /// The worker opens its own handle on the catalog and closes it when
    /// done.
    pub fn spawn<P>(
        store: Arc<dyn LogStore>,
        catalog_id: LogId,
        config: Config,
        mut processor: P,
    ) -> Result<RecoveryHandle<P>>
    where
        P: RecordProcessor + Send + 'static,
    {
        let (done_tx, done_rx) = channel::bounded(1);

        let join = thread::Builder::new()
            .name("catlog-recovery".into())
            .spawn(move || {
                let result = run(store, catalog_id, config, &mut processor);
                if let Err(e) = &result {
                    tracing::error!("Recovery of catalog {} failed: {}", catalog_id, e);
                }
                if done_tx.send(RecoveryOutcome { result, processor }).is_err() {
                    tracing::warn!("Recovery of catalog {} finished unobserved", catalog_id);
                }
            })?;

        tracing::debug!("Spawned recovery worker for catalog {}", catalog_id);

        Ok(RecoveryHandle {
            catalog_id,
            done: done_rx,
            join,
        })
    }
}

fn run<P>(store: Arc<dyn LogStore>, catalog_id: LogId, config: Config, processor: &mut P) -> Result<ScanSummary>
where
    P: RecordProcessor,
{
    let catalog = Catalog::open(store, catalog_id, config)?;
    let recovered = catalog.recover(processor);
    let closed = catalog.close();

    let summary = recovered?;
    closed?;
    Ok(summary)
}

/// A running recovery worker
pub struct RecoveryHandle<P> {
    catalog_id: LogId,
    done: Receiver<RecoveryOutcome<P>>,
    join: JoinHandle<()>,
}

impl<P> RecoveryHandle<P> {
    pub fn catalog_id(&self) -> LogId {
        self.catalog_id
    }

    /// True once the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Block until the worker reports.
    ///
    /// Fails with `Worker` only if the thread died without reporting.
    pub fn wait(self) -> Result<RecoveryOutcome<P>> {
        let outcome = self.done.recv();

        if self.join.join().is_err() {
            return Err(CatlogError::Worker(format!(
                "recovery worker for catalog {} panicked",
                self.catalog_id
            )));
        }

        outcome.map_err(|_| {
            CatlogError::Worker(format!(
                "recovery worker for catalog {} exited without reporting",
                self.catalog_id
            ))
        })
    }
}
