//! File Store
//!
//! Directory-backed store: every log object is a header file plus an
//! append-only record file.
//!
//! ## Layout
//! ```text
//! {data_dir}/objects/
//!   ├── 0000000000000001.00000001.hdr   crc (4) | len (4) | bincode header
//!   └── 0000000000000001.00000001.rec   [crc (4) | len (4) | record frame]*
//! ```
//!
//! Headers are replaced atomically (write temp file, rename). A record file
//! whose last frame is short or fails its checksum is read up to the last
//! good frame: a crash mid-append loses only that append. Opening the store
//! truncates such a tail so later appends land right after the good frames.

use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Buf;
use parking_lot::Mutex;

use crate::config::{Config, SyncStrategy};
use crate::error::{CatlogError, Result};
use crate::log::LogHeader;
use crate::record::{LogId, LogRecord};

use super::{LogStore, Transaction, TxnOp};

/// Checksum (4) + length (4) in front of every record frame
const FRAME_PREFIX: usize = 8;

/// Generation stamped on every id this store hands out
const GENERATION: u32 = 1;

/// Directory-backed store
///
/// ## Concurrency:
/// - Distinct objects are distinct files; callers serialize writers of
///   one object (the catalog's segment locks do this)
/// - `next_oid`: Atomic counter (lock-free)
/// - `dirty`: objects committed but not yet synced
pub struct FileStore {
    /// Directory holding object files
    objects_dir: PathBuf,

    /// When committed writes are fsynced
    sync_strategy: SyncStrategy,

    /// Next object id to hand out
    next_oid: AtomicU64,

    /// Next transaction id
    next_txn: AtomicU64,

    /// Objects written since the last sync
    dirty: Mutex<BTreeSet<LogId>>,

    /// Commits since the last sync (EveryNCommits)
    commits_since_sync: AtomicUsize,
}

impl FileStore {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const OBJECT_DIR: &'static str = "objects";
    const HEADER_EXT: &'static str = "hdr";
    const RECORD_EXT: &'static str = "rec";

    /// Open or create a store under `config.data_dir`
    ///
    /// On startup:
    /// 1. Create the objects directory if it doesn't exist
    /// 2. Discover existing object files
    /// 3. Truncate partial writes at the end of record files
    /// 4. Continue id allocation after the highest id found
    pub fn open(config: &Config) -> Result<Self> {
        let objects_dir = config.data_dir.join(Self::OBJECT_DIR);
        fs::create_dir_all(&objects_dir)?;

        let mut max_oid = 0;
        for entry in fs::read_dir(&objects_dir)? {
            let path = entry?.path();
            if let Some(id) = Self::parse_object_id(&path) {
                max_oid = max_oid.max(id.oid);
                if path.extension().and_then(|e| e.to_str()) == Some(Self::RECORD_EXT) {
                    Self::truncate_torn_tail(id, &path)?;
                }
            }
        }

        tracing::debug!(
            "Opened file store at {} (next oid {})",
            objects_dir.display(),
            max_oid + 1
        );

        Ok(Self {
            objects_dir,
            sync_strategy: config.sync_strategy,
            next_oid: AtomicU64::new(max_oid + 1),
            next_txn: AtomicU64::new(1),
            dirty: Mutex::new(BTreeSet::new()),
            commits_since_sync: AtomicUsize::new(0),
        })
    }

    /// Directory holding object files
    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    /// Ids of every object with a header file, sorted
    pub fn ids(&self) -> Result<Vec<LogId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.objects_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some(Self::HEADER_EXT) {
                if let Some(id) = Self::parse_object_id(&path) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Sync every object written since the last sync
    pub fn sync_dirty(&self) -> Result<()> {
        let dirty: Vec<LogId> = std::mem::take(&mut *self.dirty.lock()).into_iter().collect();
        for id in dirty {
            match self.sync(id) {
                // destroyed since it was written
                Ok(()) | Err(CatlogError::LogNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.commits_since_sync.store(0, Ordering::SeqCst);
        Ok(())
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn header_path(&self, id: LogId) -> PathBuf {
        self.object_path(id, Self::HEADER_EXT)
    }

    fn record_path(&self, id: LogId) -> PathBuf {
        self.object_path(id, Self::RECORD_EXT)
    }

    fn object_path(&self, id: LogId, ext: &str) -> PathBuf {
        self.objects_dir
            .join(format!("{:016x}.{:08x}.{}", id.oid, id.generation, ext))
    }

    /// Parse an object id from a file name
    /// "000000000000002a.00000001.hdr" → Some(0x2a:0x1)
    fn parse_object_id(path: &Path) -> Option<LogId> {
        let stem = path.file_stem()?.to_string_lossy();
        let (oid, generation) = stem.split_once('.')?;
        Some(LogId::new(
            u64::from_str_radix(oid, 16).ok()?,
            u32::from_str_radix(generation, 16).ok()?,
        ))
    }

    /// Replace a header file atomically
    fn store_header(&self, id: LogId, header: &LogHeader) -> Result<()> {
        let path = self.header_path(id);
        let tmp = path.with_extension("hdr.tmp");

        let bytes = header.encode()?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.flush()?;
        }
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn not_found(id: LogId, err: io::Error) -> CatlogError {
        if err.kind() == io::ErrorKind::NotFound {
            CatlogError::LogNotFound(id)
        } else {
            CatlogError::Io(err)
        }
    }

    /// Cut a record file back to its last good frame
    fn truncate_torn_tail(id: LogId, path: &Path) -> Result<()> {
        let data = fs::read(path)?;
        let (_, good_len) = Self::parse_frames(id, &data)?;
        if good_len < data.len() {
            tracing::warn!(
                "Truncating log {} from {} to {} bytes",
                id,
                data.len(),
                good_len
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(good_len as u64)?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Split a record file into frames, stopping at a torn tail.
    ///
    /// Also returns the length of the good prefix.
    fn parse_frames(id: LogId, data: &[u8]) -> Result<(Vec<LogRecord>, usize)> {
        let mut records = Vec::new();
        let mut pos = 0;

        while pos < data.len() {
            if pos + FRAME_PREFIX > data.len() {
                tracing::warn!("Torn frame prefix at offset {} in log {}", pos, id);
                break;
            }

            let mut prefix = &data[pos..pos + FRAME_PREFIX];
            let crc = prefix.get_u32_le();
            let len = prefix.get_u32_le() as usize;
            let start = pos + FRAME_PREFIX;

            if start + len > data.len() {
                tracing::warn!(
                    "Torn frame at offset {} in log {}: need {} bytes, have {}",
                    pos,
                    id,
                    len,
                    data.len() - start
                );
                break;
            }

            let frame = &data[start..start + len];
            if crc32fast::hash(frame) != crc {
                tracing::warn!("Checksum mismatch at offset {} in log {}", pos, id);
                break;
            }

            records.push(LogRecord::decode(frame)?);
            pos = start + len;
        }

        Ok((records, pos))
    }
}

impl LogStore for FileStore {
    fn allocate_id(&self) -> Result<LogId> {
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        Ok(LogId::new(oid, GENERATION))
    }

    fn exists(&self, id: LogId) -> Result<bool> {
        Ok(self.header_path(id).exists())
    }

    fn open(&self, id: LogId) -> Result<LogHeader> {
        let bytes = fs::read(self.header_path(id)).map_err(|e| Self::not_found(id, e))?;
        LogHeader::decode(&bytes)
    }

    fn create(&self, id: LogId, header: &LogHeader, txn: &mut Transaction) -> Result<()> {
        txn.charge(TxnOp::Create, id)?;

        if self.header_path(id).exists() {
            return Err(CatlogError::AlreadyExists(id));
        }

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.record_path(id))
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    CatlogError::AlreadyExists(id)
                } else {
                    CatlogError::Io(e)
                }
            })?;

        self.store_header(id, header)
    }

    fn destroy(&self, id: LogId, txn: &mut Transaction) -> Result<()> {
        txn.charge(TxnOp::Destroy, id)?;

        fs::remove_file(self.header_path(id)).map_err(|e| Self::not_found(id, e))?;
        match fs::remove_file(self.record_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_header(&self, id: LogId, header: &LogHeader, txn: &mut Transaction) -> Result<()> {
        txn.charge(TxnOp::WriteHeader, id)?;

        if !self.header_path(id).exists() {
            return Err(CatlogError::LogNotFound(id));
        }
        self.store_header(id, header)
    }

    fn append(&self, id: LogId, record: &LogRecord, txn: &mut Transaction) -> Result<()> {
        txn.charge(
            TxnOp::Append {
                bytes: record.encoded_len(),
            },
            id,
        )?;

        let file = OpenOptions::new()
            .append(true)
            .open(self.record_path(id))
            .map_err(|e| Self::not_found(id, e))?;

        let frame = record.encode();
        let mut writer = BufWriter::new(file);
        writer.write_all(&crc32fast::hash(&frame).to_le_bytes())?;
        writer.write_all(&(frame.len() as u32).to_le_bytes())?;
        writer.write_all(&frame)?;
        writer.flush()?;
        Ok(())
    }

    fn read_records(&self, id: LogId) -> Result<Vec<LogRecord>> {
        let data = fs::read(self.record_path(id)).map_err(|e| Self::not_found(id, e))?;
        Self::parse_frames(id, &data).map(|(records, _)| records)
    }

    fn sync(&self, id: LogId) -> Result<()> {
        File::open(self.header_path(id))
            .map_err(|e| Self::not_found(id, e))?
            .sync_all()?;
        File::open(self.record_path(id))
            .map_err(|e| Self::not_found(id, e))?
            .sync_all()?;
        Ok(())
    }

    fn begin(&self) -> Result<Transaction> {
        Ok(Transaction::new(self.next_txn.fetch_add(1, Ordering::SeqCst)))
    }

    fn stop(&self, mut txn: Transaction, commit: bool) -> Result<()> {
        txn.finish()?;
        if !commit {
            return Ok(());
        }

        self.dirty.lock().extend(txn.touched());
        match self.sync_strategy {
            SyncStrategy::EveryCommit => self.sync_dirty(),
            SyncStrategy::EveryNCommits { count } => {
                let commits = self.commits_since_sync.fetch_add(1, Ordering::SeqCst) + 1;
                if commits >= count {
                    self.sync_dirty()
                } else {
                    Ok(())
                }
            }
            SyncStrategy::Manual => Ok(()),
        }
    }
}
