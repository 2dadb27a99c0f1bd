//! Cancel path
//!
//! Clears records by cookie. A segment whose last record goes away is
//! destroyed, and its LOGID record in the catalog is cancelled in turn,
//! which moves the catalog's oldest boundary forward. The catalog itself
//! is never destroyed this way.

use crate::error::{CatlogError, Result};
use crate::log::CancelOutcome;
use crate::record::{Cookie, LogId};
use crate::store::{self, Reservation, Transaction};

use super::lock::CatalogWrite;
use super::Catalog;

/// What a successful cancel batch did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelSummary {
    /// Records cleared
    pub cancelled: usize,
    /// Segments destroyed because they emptied
    pub destroyed: Vec<LogId>,
}

impl Catalog {
    /// Cancel every record named by `cookies`.
    ///
    /// Best effort: every cookie is tried. When some fail the batch reports
    /// `CancelFailed` carrying the failure count and the last real error;
    /// a not-found outcome only shows up there if no real error occurred.
    /// Cancels that succeeded are committed either way.
    ///
    /// The catalog write lock is held for the whole batch.
    pub fn cancel(&self, cookies: &[Cookie]) -> Result<CancelSummary> {
        let mut reservation = Reservation::default();
        for _ in cookies {
            reservation += Reservation::cancel();
        }

        let (summary, failed, last_error) =
            store::transact(self.store.as_ref(), reservation, |txn| {
                let mut state = self.lock.write();
                let mut summary = CancelSummary::default();
                let mut failed = 0;
                let mut last_error: Option<CatlogError> = None;

                for cookie in cookies {
                    match self.cancel_one(&mut state, cookie, txn) {
                        Ok(destroyed) => {
                            summary.cancelled += 1;
                            summary.destroyed.extend(destroyed);
                        }
                        Err(e) if e.is_not_found() => {
                            failed += 1;
                            tracing::debug!("Cancel of {} found nothing: {}", cookie, e);
                            if last_error.is_none() {
                                last_error = Some(e);
                            }
                        }
                        Err(e) => {
                            failed += 1;
                            tracing::error!("Cannot cancel record {}: {}", cookie, e);
                            last_error = Some(e);
                        }
                    }
                }
                Ok((summary, failed, last_error))
            })?;

        match last_error {
            Some(source) => {
                if failed < cookies.len() {
                    tracing::error!(
                        "Cancel of {} of {} records failed in catalog {}",
                        failed,
                        cookies.len(),
                        self.id
                    );
                }
                Err(CatlogError::CancelFailed {
                    failed,
                    total: cookies.len(),
                    source: Box::new(source),
                })
            }
            None => Ok(summary),
        }
    }

    /// Clear one record; returns the segment id if it was destroyed
    fn cancel_one(
        &self,
        state: &mut CatalogWrite<'_>,
        cookie: &Cookie,
        txn: &mut Transaction,
    ) -> Result<Option<LogId>> {
        let store = self.store.as_ref();
        let segment = self.lookup(state, cookie.log)?;
        let mut log = state.lock_segment(&segment);

        if log.cancel(store, txn, cookie.index)? == CancelOutcome::Cancelled {
            tracing::trace!("Cancelled record {}", cookie);
            return Ok(None);
        }

        let id = log.id();
        let own = segment.catalog_cookie();
        drop(log);

        state.open.remove(&id);
        if state.current == Some(id) {
            state.current = None;
        }
        if state.next == Some(id) {
            state.next = None;
        }

        if state.slots.get(&own.index) != Some(&id) {
            return Err(CatlogError::Corruption(format!(
                "destroyed segment {} does not own catalog slot {}",
                id, own.index
            )));
        }
        if let Err(e) = state.log.cancel(store, txn, own.index) {
            tracing::error!(
                "Failure cancelling catalog record {} of destroyed segment {}: {}",
                own,
                id,
                e
            );
            return Err(e);
        }
        state.slots.remove(&own.index);

        tracing::debug!(
            "Segment {} destroyed, catalog record {} released (oldest now {})",
            id,
            own,
            state.log.header().oldest_index
        );
        Ok(Some(id))
    }
}
