use std::{
    fs::{self, File},
    io::{Seek, SeekFrom, Write as _},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::{
    index::{Entry, IndexFile, DEFAULT_INDEX_CAPACITY},
    message::{self, ReadOutcome, StoredMessage},
    Error, Result,
};

pub(crate) const LOG_SUFFIX: &str = ".log";
pub(crate) const INDEX_SUFFIX: &str = ".index";
/// Suffix of the transient files built during truncation. Any left behind
/// by a crash are removed when the log is reopened.
pub(crate) const TRUNCATED_SUFFIX: &str = ".truncated";

pub(crate) fn log_path(dir: &Path, base_offset: i64) -> PathBuf {
    dir.join(format!("{base_offset:020}{LOG_SUFFIX}"))
}

pub(crate) fn index_path(dir: &Path, base_offset: i64) -> PathBuf {
    dir.join(format!("{base_offset:020}{INDEX_SUFFIX}"))
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// One contiguous offset range `[base_offset, next_offset)` of the log,
/// stored as a paired log and index file.
///
/// `next_offset` and `position` are published with `Release` ordering only
/// after both the log bytes and the index entries of a write are in place,
/// so a reader that `Acquire`-loads them never addresses a half-written
/// record.
#[derive(Debug)]
pub struct Segment {
    base_offset: i64,
    max_bytes: i64,
    log_path: PathBuf,
    index_path: PathBuf,
    /// One past the last written offset.
    next_offset: AtomicI64,
    /// Byte length of the log file (the append point).
    position: AtomicI64,
    /// Wall clock (millis) of the first append; zero while empty.
    first_write_time: AtomicI64,
    /// Timestamp of the newest record; zero while empty.
    last_timestamp: AtomicI64,
    sealed: AtomicBool,
    writer: Mutex<File>,
    index: RwLock<IndexFile>,
}

impl Segment {
    /// Create a fresh, writable segment.
    ///
    /// # Errors
    ///
    /// [`Error::SegmentExists`] if a log file with this base offset is
    /// already present.
    pub fn create(dir: &Path, base_offset: i64, max_bytes: i64) -> Result<Self> {
        Self::create_at(
            log_path(dir, base_offset),
            index_path(dir, base_offset),
            base_offset,
            max_bytes,
        )
    }

    /// Create the transient replacement segment used by truncation. Its
    /// files carry [`TRUNCATED_SUFFIX`] until [`Segment::replace`] renames
    /// them over the originals.
    pub(crate) fn create_replacement(dir: &Path, base_offset: i64, max_bytes: i64) -> Result<Self> {
        let log = log_path(dir, base_offset);
        let index = index_path(dir, base_offset);
        Self::create_at(
            log.with_extension("log.truncated"),
            index.with_extension("index.truncated"),
            base_offset,
            max_bytes,
        )
    }

    fn create_at(
        log_path: PathBuf,
        index_path: PathBuf,
        base_offset: i64,
        max_bytes: i64,
    ) -> Result<Self> {
        debug!("creating segment {}", log_path.display());
        let writer = File::options()
            .append(true)
            .create_new(true)
            .open(&log_path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::SegmentExists { base_offset }
                } else {
                    e.into()
                }
            })?;
        let index = IndexFile::open_or_create(&index_path, base_offset, DEFAULT_INDEX_CAPACITY)?;

        Ok(Self {
            base_offset,
            max_bytes,
            log_path,
            index_path,
            next_offset: AtomicI64::new(base_offset),
            position: AtomicI64::new(0),
            first_write_time: AtomicI64::new(0),
            last_timestamp: AtomicI64::new(0),
            sealed: AtomicBool::new(false),
            writer: Mutex::new(writer),
            index: RwLock::new(index),
        })
    }

    /// Open an existing segment, recovering `next_offset` and `position` by
    /// scanning forward from the last index entry that agrees with the log.
    ///
    /// Index entries with no intact record behind them are discarded, a
    /// record missing from the index is re-indexed, and a torn record at
    /// the tail is truncated away.
    pub fn open(dir: &Path, base_offset: i64, max_bytes: i64) -> Result<Self> {
        let log_path = log_path(dir, base_offset);
        let index_path = index_path(dir, base_offset);

        let writer = File::options().append(true).open(&log_path)?;
        let mut index = IndexFile::open_or_create(&index_path, base_offset, DEFAULT_INDEX_CAPACITY)?;
        let mut reader = File::open(&log_path)?;

        // Walk the index back to the newest entry backed by an intact record.
        let mut recovered = None;
        while let Some(entry) = index.last_entry() {
            reader.seek(SeekFrom::Start(entry.position as u64))?;
            if let ReadOutcome::Message(message, len) = message::read_message_from(&mut reader)? {
                if message.offset == entry.offset && message.timestamp == entry.timestamp {
                    recovered = Some((entry, len));
                    break;
                }
            }
            debug!(
                "dropping index entry without intact record: segment={} offset={}",
                base_offset, entry.offset
            );
            index.truncate_entries_after(entry.offset - 1)?;
        }

        let (mut next_offset, mut position, mut last_timestamp) = match recovered {
            Some((entry, len)) => (entry.offset + 1, entry.position + len as i64, entry.timestamp),
            None => (base_offset, 0, 0),
        };

        // Scan the remainder of the log, re-indexing as we go. A torn or
        // corrupt tail is silently truncated to the last record boundary.
        reader.seek(SeekFrom::Start(position as u64))?;
        loop {
            match message::read_message_from(&mut reader)? {
                ReadOutcome::Message(message, len) => {
                    index.append(Entry {
                        offset: message.offset,
                        position,
                        timestamp: message.timestamp,
                    })?;
                    position += len as i64;
                    next_offset = message.offset + 1;
                    last_timestamp = message.timestamp;
                }
                ReadOutcome::Eof => break,
                ReadOutcome::Torn | ReadOutcome::Corrupt { .. } => {
                    warn!(
                        "discarding torn tail of {} at position {}",
                        log_path.display(),
                        position
                    );
                    writer.set_len(position as u64)?;
                    break;
                }
            }
        }

        debug!(
            "opened segment {}: next_offset={} position={}",
            base_offset, next_offset, position
        );

        Ok(Self {
            base_offset,
            max_bytes,
            log_path,
            index_path,
            next_offset: AtomicI64::new(next_offset),
            position: AtomicI64::new(position),
            // The original write time is not persisted; restart the roll
            // clock for a non-empty segment.
            first_write_time: AtomicI64::new(if next_offset > base_offset { now_millis() } else { 0 }),
            last_timestamp: AtomicI64::new(last_timestamp),
            sealed: AtomicBool::new(false),
            writer: Mutex::new(writer),
            index: RwLock::new(index),
        })
    }

    pub fn base_offset(&self) -> i64 {
        self.base_offset
    }

    /// One past the last written offset.
    pub fn next_offset(&self) -> i64 {
        self.next_offset.load(Ordering::Acquire)
    }

    /// Current byte length of the log file.
    pub fn position(&self) -> i64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.next_offset() == self.base_offset
    }

    pub fn message_count(&self) -> i64 {
        self.next_offset() - self.base_offset
    }

    /// Timestamp of the newest record, zero if the segment is empty.
    pub fn last_timestamp(&self) -> i64 {
        self.last_timestamp.load(Ordering::Acquire)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Append under the segment's write lock, letting `encode` observe the
    /// settled `(next_offset, position)` pair.
    pub(crate) fn append_with<F>(&self, encode: F) -> Result<Vec<Entry>>
    where
        F: FnOnce(i64, i64) -> Result<(Vec<u8>, Vec<Entry>)>,
    {
        let writer = self.writer.lock();
        self.check_writable()?;
        let base_offset = self.next_offset.load(Ordering::Acquire);
        let position = self.position.load(Ordering::Acquire);
        let (bytes, entries) = encode(base_offset, position)?;
        self.write_locked(&writer, position, &bytes, &entries)?;
        Ok(entries)
    }

    /// Append a preformed message set together with its index entries.
    ///
    /// The entries must describe `bytes` as laid out at the segment's
    /// current append position.
    ///
    /// # Errors
    ///
    /// [`Error::SegmentFull`] if the write does not fit and the segment is
    /// non-empty; [`Error::SegmentSealed`] if the segment was sealed.
    pub fn write_message_set(&self, bytes: &[u8], entries: &[Entry]) -> Result<()> {
        let writer = self.writer.lock();
        self.check_writable()?;
        let position = self.position.load(Ordering::Acquire);
        self.write_locked(&writer, position, bytes, entries)
    }

    fn check_writable(&self) -> Result<()> {
        if self.sealed.load(Ordering::Acquire) {
            return Err(Error::SegmentSealed {
                base_offset: self.base_offset,
            });
        }
        Ok(())
    }

    fn write_locked(
        &self,
        mut writer: &File,
        position: i64,
        bytes: &[u8],
        entries: &[Entry],
    ) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if !self.is_empty() && position + bytes.len() as i64 > self.max_bytes {
            return Err(Error::SegmentFull {
                base_offset: self.base_offset,
            });
        }

        writer.write_all(bytes)?;
        {
            let mut index = self.index.write();
            for entry in entries {
                index.append(*entry)?;
            }
        }

        if self.first_write_time.load(Ordering::Relaxed) == 0 {
            self.first_write_time.store(now_millis(), Ordering::Relaxed);
        }
        if let Some(last) = entries.last() {
            self.last_timestamp.store(last.timestamp, Ordering::Release);
        }
        // Publish only after the record and its index entries are in place.
        self.position
            .store(position + bytes.len() as i64, Ordering::Release);
        if let Some(last) = entries.last() {
            self.next_offset.store(last.offset + 1, Ordering::Release);
        }
        Ok(())
    }

    /// A forward cursor over the segment, starting at the first record with
    /// `offset >= from_offset`. Reads through an independent file handle,
    /// so it stays valid until the segment is deleted.
    pub fn scan(self: &Arc<Self>, from_offset: i64) -> Result<SegmentScanner> {
        let mut file = File::open(&self.log_path)?;
        let (mut position, mut next_expected) = (0, self.base_offset);
        if from_offset > self.base_offset {
            match self.index.read().lookup_offset(from_offset) {
                Ok(entry) => {
                    position = entry.position;
                    next_expected = entry.offset;
                }
                Err(Error::EntryNotFound) => {}
                Err(e) => return Err(e),
            }
        }
        file.seek(SeekFrom::Start(position as u64))?;

        Ok(SegmentScanner {
            segment: Arc::clone(self),
            file,
            position,
            next_expected,
            from_offset,
        })
    }

    /// The earliest index entry with `timestamp >= timestamp`.
    pub fn find_entry_by_timestamp(&self, timestamp: i64) -> Result<Entry> {
        self.index.read().lookup_timestamp(timestamp)
    }

    /// `true` once the segment must be sealed and a successor created:
    /// the soft byte cap is reached, or `roll_time` has passed since the
    /// first write. A zero `roll_time` disables time-based rolling.
    pub fn check_split(&self, roll_time: Duration) -> bool {
        if self.position() >= self.max_bytes {
            return true;
        }
        let first_write = self.first_write_time.load(Ordering::Relaxed);
        !roll_time.is_zero()
            && first_write != 0
            && now_millis() - first_write >= roll_time.as_millis() as i64
    }

    /// Make the segment immutable: flush the log file and shrink the index
    /// to its exact used size. Idempotent.
    pub fn seal(&self) -> Result<()> {
        let writer = self.writer.lock();
        self.sealed.store(true, Ordering::Release);
        writer.sync_all()?;
        self.index.write().shrink_to_fit()?;
        Ok(())
    }

    /// Reject writes without flushing or shrinking anything. Used to freeze
    /// the offset range ahead of a rotation or truncation.
    pub(crate) fn mark_sealed(&self) {
        let _writer = self.writer.lock();
        self.sealed.store(true, Ordering::Release);
    }

    /// Flush both files without sealing.
    pub fn flush(&self) -> Result<()> {
        let writer = self.writer.lock();
        writer.sync_all()?;
        self.index.read().flush_async()?;
        Ok(())
    }

    /// Atomically rename this segment's files over `other`'s, replacing
    /// them. The caller is expected to reopen the segment afterwards.
    pub fn replace(&self, other: &Segment) -> Result<()> {
        self.index.write().flush()?;
        fs::rename(&self.log_path, &other.log_path)?;
        fs::rename(&self.index_path, &other.index_path)?;
        Ok(())
    }

    /// Unlink both files.
    pub fn delete(&self) -> Result<()> {
        debug!("deleting segment {}", self.base_offset);
        fs::remove_file(&self.log_path)?;
        fs::remove_file(&self.index_path)?;
        Ok(())
    }
}

/// Forward cursor over one segment. Yields records in offset order up to
/// the published `next_offset` at the time of each call.
#[derive(Debug)]
pub struct SegmentScanner {
    segment: Arc<Segment>,
    file: File,
    position: i64,
    next_expected: i64,
    from_offset: i64,
}

impl SegmentScanner {
    pub fn next(&mut self) -> Result<Option<StoredMessage>> {
        loop {
            if self.next_expected >= self.segment.next_offset() {
                return Ok(None);
            }
            match message::read_message_from(&mut self.file)? {
                ReadOutcome::Message(message, len) => {
                    self.position += len as i64;
                    self.next_expected = message.offset + 1;
                    if message.offset < self.from_offset {
                        continue;
                    }
                    return Ok(Some(message));
                }
                ReadOutcome::Eof => return Ok(None),
                ReadOutcome::Torn => {
                    return Err(Error::CorruptFormat {
                        position: self.position,
                        reason: "torn record",
                    })
                }
                ReadOutcome::Corrupt { reason } => {
                    return Err(Error::CorruptFormat {
                        position: self.position,
                        reason,
                    })
                }
            }
        }
    }

    pub fn base_offset(&self) -> i64 {
        self.segment.base_offset()
    }

    pub(crate) fn segment(&self) -> &Arc<Segment> {
        &self.segment
    }
}
