//! In-memory Store
//!
//! Keeps every log object in a map behind a mutex. Writes apply
//! immediately; aborting a transaction does not roll anything back.
//!
//! One-shot faults can be armed per operation kind to exercise the
//! catalog's rollback paths.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::{CatlogError, Result};
use crate::log::LogHeader;
use crate::record::{LogId, LogRecord};

use super::{LogStore, Transaction, TxnOp};

/// Operation a fault can be armed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultPoint {
    Create,
    Destroy,
    Append,
    WriteHeader,
}

struct Fault {
    point: FaultPoint,
    target: Option<LogId>,
}

struct MemObject {
    header: LogHeader,
    records: Vec<LogRecord>,
}

/// Process-local backing store
pub struct MemStore {
    objects: Mutex<HashMap<LogId, MemObject>>,
    faults: Mutex<Vec<Fault>>,
    next_oid: AtomicU64,
    next_txn: AtomicU64,
    generation: u32,
}

impl MemStore {
    /// Empty store handing out generation 1 ids
    pub fn new() -> Self {
        Self::with_generation(1)
    }

    /// Empty store handing out ids with the given generation
    pub fn with_generation(generation: u32) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
            next_oid: AtomicU64::new(1),
            next_txn: AtomicU64::new(1),
            generation,
        }
    }

    /// Fail the next `point` operation (on `target` only, if given)
    pub fn inject_fault(&self, point: FaultPoint, target: Option<LogId>) {
        self.faults.lock().push(Fault { point, target });
    }

    /// Number of live objects
    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn contains(&self, id: LogId) -> bool {
        self.objects.lock().contains_key(&id)
    }

    /// Number of frames appended to `id` (0 if it does not exist)
    pub fn record_count(&self, id: LogId) -> usize {
        self.objects
            .lock()
            .get(&id)
            .map(|object| object.records.len())
            .unwrap_or(0)
    }

    /// Every live object id, sorted
    pub fn ids(&self) -> Vec<LogId> {
        let mut ids: Vec<LogId> = self.objects.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    fn check_fault(&self, point: FaultPoint, id: LogId) -> Result<()> {
        let mut faults = self.faults.lock();
        let armed = faults
            .iter()
            .position(|f| f.point == point && f.target.map_or(true, |t| t == id));

        match armed {
            Some(pos) => {
                faults.remove(pos);
                tracing::debug!("Injected {:?} fault on {}", point, id);
                Err(CatlogError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    format!("injected {:?} fault on {}", point, id),
                )))
            }
            None => Ok(()),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore for MemStore {
    fn allocate_id(&self) -> Result<LogId> {
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        Ok(LogId::new(oid, self.generation))
    }

    fn exists(&self, id: LogId) -> Result<bool> {
        Ok(self.contains(id))
    }

    fn open(&self, id: LogId) -> Result<LogHeader> {
        self.objects
            .lock()
            .get(&id)
            .map(|object| object.header.clone())
            .ok_or(CatlogError::LogNotFound(id))
    }

    fn create(&self, id: LogId, header: &LogHeader, txn: &mut Transaction) -> Result<()> {
        txn.charge(TxnOp::Create, id)?;
        self.check_fault(FaultPoint::Create, id)?;

        let mut objects = self.objects.lock();
        if objects.contains_key(&id) {
            return Err(CatlogError::AlreadyExists(id));
        }
        objects.insert(
            id,
            MemObject {
                header: header.clone(),
                records: Vec::new(),
            },
        );
        Ok(())
    }

    fn destroy(&self, id: LogId, txn: &mut Transaction) -> Result<()> {
        txn.charge(TxnOp::Destroy, id)?;
        self.check_fault(FaultPoint::Destroy, id)?;

        self.objects
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(CatlogError::LogNotFound(id))
    }

    fn write_header(&self, id: LogId, header: &LogHeader, txn: &mut Transaction) -> Result<()> {
        txn.charge(TxnOp::WriteHeader, id)?;
        self.check_fault(FaultPoint::WriteHeader, id)?;

        let mut objects = self.objects.lock();
        let object = objects.get_mut(&id).ok_or(CatlogError::LogNotFound(id))?;
        object.header = header.clone();
        Ok(())
    }

    fn append(&self, id: LogId, record: &LogRecord, txn: &mut Transaction) -> Result<()> {
        txn.charge(
            TxnOp::Append {
                bytes: record.encoded_len(),
            },
            id,
        )?;
        self.check_fault(FaultPoint::Append, id)?;

        let mut objects = self.objects.lock();
        let object = objects.get_mut(&id).ok_or(CatlogError::LogNotFound(id))?;
        object.records.push(record.clone());
        Ok(())
    }

    fn read_records(&self, id: LogId) -> Result<Vec<LogRecord>> {
        self.objects
            .lock()
            .get(&id)
            .map(|object| object.records.clone())
            .ok_or(CatlogError::LogNotFound(id))
    }

    fn sync(&self, id: LogId) -> Result<()> {
        if !self.contains(id) {
            return Err(CatlogError::LogNotFound(id));
        }
        Ok(())
    }

    fn begin(&self) -> Result<Transaction> {
        Ok(Transaction::new(self.next_txn.fetch_add(1, Ordering::SeqCst)))
    }
}
