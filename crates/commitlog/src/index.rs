use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use log::debug;
use memmap2::MmapMut;

use crate::{
    message::{be_i32, be_i64},
    Error, Result,
};

/// On-disk width of one index entry:
/// `offset_delta: u32`, `position: u32`, `timestamp: i64`, big-endian.
pub(crate) const ENTRY_LEN: usize = 4 + 4 + 8;

/// Initial capacity (in entries) of a freshly created index file.
pub(crate) const DEFAULT_INDEX_CAPACITY: usize = 1024;

/// An index record: the log-file byte position and timestamp of the message
/// with this offset.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Entry {
    pub offset: i64,
    pub position: i64,
    pub timestamp: i64,
}

/// A memory-mapped index over one segment's log file.
///
/// Entries are stored in append order; both `offset` and `position` are
/// strictly increasing, `timestamp` is nondecreasing for ordinary appends.
/// Offsets are stored as 32-bit deltas against the segment's base offset.
#[derive(Debug)]
pub struct IndexFile {
    file: File,
    mmap: MmapMut,
    path: PathBuf,
    base_offset: i64,
    num_entries: usize,
}

impl IndexFile {
    /// Open the index file at `path`, creating it with room for `capacity`
    /// entries if it does not exist.
    pub fn open_or_create(path: &Path, base_offset: i64, capacity: usize) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            file.set_len((capacity.max(1) * ENTRY_LEN) as u64)?;
        } else if len % ENTRY_LEN as u64 != 0 {
            // A crash while growing the file can leave a ragged tail.
            file.set_len(len.next_multiple_of(ENTRY_LEN as u64))?;
        }
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut index = Self {
            file,
            mmap,
            path: path.to_path_buf(),
            base_offset,
            num_entries: 0,
        };
        index.num_entries = index.scan_entries();
        Ok(index)
    }

    /// Number of used entry slots, determined by the first all-zero slot.
    ///
    /// A segment whose first record is `(offset = base, position = 0,
    /// timestamp = 0)` is miscounted as empty here; segment recovery
    /// rebuilds the tail from the log, which covers that case.
    fn scan_entries(&self) -> usize {
        let capacity = self.capacity();
        for i in 0..capacity {
            if self.slot(i).iter().all(|&b| b == 0) {
                return i;
            }
        }
        capacity
    }

    fn capacity(&self) -> usize {
        self.mmap.len() / ENTRY_LEN
    }

    fn slot(&self, i: usize) -> &[u8] {
        &self.mmap[i * ENTRY_LEN..(i + 1) * ENTRY_LEN]
    }

    pub fn len(&self) -> usize {
        self.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.num_entries == 0
    }

    /// The entry at slot `i`. Caller must ensure `i < self.len()`.
    pub fn entry(&self, i: usize) -> Entry {
        let slot = self.slot(i);
        Entry {
            offset: self.base_offset + be_i32(&slot[0..4]) as u32 as i64,
            position: be_i32(&slot[4..8]) as u32 as i64,
            timestamp: be_i64(&slot[8..16]),
        }
    }

    pub fn last_entry(&self) -> Option<Entry> {
        self.num_entries.checked_sub(1).map(|i| self.entry(i))
    }

    /// Append `entry` at the current slot, extending the mapping if the
    /// file is at capacity.
    pub fn append(&mut self, entry: Entry) -> io::Result<()> {
        let delta = entry.offset - self.base_offset;
        if delta < 0 || delta > u32::MAX as i64 || !(0..=u32::MAX as i64).contains(&entry.position)
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("index entry out of range: {entry:?}"),
            ));
        }
        if let Some(last) = self.last_entry() {
            if entry.offset <= last.offset {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("non-monotonic index append: {} after {}", entry.offset, last.offset),
                ));
            }
        }

        if self.num_entries == self.capacity() {
            self.grow()?;
        }

        let start = self.num_entries * ENTRY_LEN;
        self.mmap[start..start + 4].copy_from_slice(&(delta as u32).to_be_bytes());
        self.mmap[start + 4..start + 8].copy_from_slice(&(entry.position as u32).to_be_bytes());
        self.mmap[start + 8..start + 16].copy_from_slice(&entry.timestamp.to_be_bytes());
        self.num_entries += 1;
        Ok(())
    }

    fn grow(&mut self) -> io::Result<()> {
        let new_capacity = (self.capacity() * 2).max(DEFAULT_INDEX_CAPACITY);
        debug!(
            "growing index {} to {} entries",
            self.path.display(),
            new_capacity
        );
        self.mmap.flush()?;
        self.file.set_len((new_capacity * ENTRY_LEN) as u64)?;
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }

    /// The greatest entry with `offset <= target`.
    ///
    /// # Errors
    ///
    /// [`Error::EntryNotFound`] if the index is empty or `target` precedes
    /// the first indexed offset.
    pub fn lookup_offset(&self, target: i64) -> Result<Entry> {
        if self.num_entries == 0 || target < self.base_offset {
            return Err(Error::EntryNotFound);
        }

        // Number of entries with offset <= target.
        let mut lo = 0;
        let mut hi = self.num_entries;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid).offset <= target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return Err(Error::EntryNotFound);
        }
        Ok(self.entry(lo - 1))
    }

    /// The earliest entry with `timestamp >= target`.
    ///
    /// # Errors
    ///
    /// [`Error::EntryNotFound`] if every indexed timestamp precedes `target`.
    pub fn lookup_timestamp(&self, target: i64) -> Result<Entry> {
        // Number of entries with timestamp < target.
        let mut lo = 0;
        let mut hi = self.num_entries;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid).timestamp < target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == self.num_entries {
            return Err(Error::EntryNotFound);
        }
        Ok(self.entry(lo))
    }

    /// Discard every entry with `offset > target`, zeroing the vacated slots.
    pub fn truncate_entries_after(&mut self, target: i64) -> io::Result<()> {
        let mut lo = 0;
        let mut hi = self.num_entries;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid).offset <= target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        let start = lo * ENTRY_LEN;
        let end = self.num_entries * ENTRY_LEN;
        if start < end {
            self.mmap[start..end].fill(0);
            self.num_entries = lo;
            self.mmap.flush()?;
        }
        Ok(())
    }

    /// Shrink the file to its exact used size. Called when the segment is
    /// sealed so lookups never consider preallocated slack.
    pub fn shrink_to_fit(&mut self) -> io::Result<()> {
        let used = self.num_entries.max(1) * ENTRY_LEN;
        if used as u64 == self.file.metadata()?.len() {
            return Ok(());
        }
        self.mmap.flush()?;
        // A zero-length file cannot be mapped, so an empty index keeps one
        // zeroed slot.
        self.file.set_len(used as u64)?;
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        Ok(())
    }

    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }

    /// Schedule a flush without waiting for it to complete.
    pub fn flush_async(&self) -> io::Result<()> {
        self.mmap.flush_async()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    fn entry(offset: i64, position: i64, timestamp: i64) -> Entry {
        Entry {
            offset,
            position,
            timestamp,
        }
    }

    fn new_index(dir: &Path, base_offset: i64, capacity: usize) -> IndexFile {
        IndexFile::open_or_create(&dir.join(format!("{base_offset:020}.index")), base_offset, capacity)
            .unwrap()
    }

    #[test]
    fn lookup_offset_returns_greatest_entry_not_past_target() {
        let tmp = tempdir().unwrap();
        let mut index = new_index(tmp.path(), 100, 16);
        for i in 0..5 {
            index.append(entry(100 + i * 2, i * 64, 1000 + i)).unwrap();
        }

        // Exact hit.
        assert_eq!(index.lookup_offset(104).unwrap().position, 2 * 64);
        // Between entries: the preceding one.
        assert_eq!(index.lookup_offset(105).unwrap().offset, 104);
        // Past the end: the last entry.
        assert_eq!(index.lookup_offset(1_000).unwrap().offset, 108);
        // Before the base offset.
        assert!(matches!(index.lookup_offset(99), Err(Error::EntryNotFound)));
    }

    #[test]
    fn lookup_timestamp_returns_earliest_entry_at_or_after_target() {
        let tmp = tempdir().unwrap();
        let mut index = new_index(tmp.path(), 0, 16);
        for (i, ts) in [100, 200, 200, 400].into_iter().enumerate() {
            index.append(entry(i as i64, i as i64 * 32, ts)).unwrap();
        }

        assert_eq!(index.lookup_timestamp(200).unwrap().offset, 1);
        assert_eq!(index.lookup_timestamp(300).unwrap().offset, 3);
        assert_eq!(index.lookup_timestamp(100).unwrap().offset, 0);
        assert!(matches!(
            index.lookup_timestamp(500),
            Err(Error::EntryNotFound)
        ));
    }

    #[test]
    fn append_grows_past_initial_capacity() {
        let tmp = tempdir().unwrap();
        let mut index = new_index(tmp.path(), 0, 2);
        for i in 0..9 {
            index.append(entry(i, i * 10, i)).unwrap();
        }

        assert_eq!(index.len(), 9);
        assert_eq!(index.lookup_offset(8).unwrap().position, 80);
    }

    #[test]
    fn append_rejects_non_monotonic_offsets() {
        let tmp = tempdir().unwrap();
        let mut index = new_index(tmp.path(), 0, 4);
        index.append(entry(3, 0, 0)).unwrap();

        assert!(index.append(entry(3, 16, 1)).is_err());
        assert!(index.append(entry(2, 16, 1)).is_err());
    }

    #[test]
    fn truncate_discards_entries_after_target() {
        let tmp = tempdir().unwrap();
        let mut index = new_index(tmp.path(), 0, 16);
        for i in 0..8 {
            index.append(entry(i, i * 10, i)).unwrap();
        }

        index.truncate_entries_after(4).unwrap();
        assert_eq!(index.len(), 5);
        assert_eq!(index.last_entry().unwrap().offset, 4);
        // Truncating past the end is a no-op.
        index.truncate_entries_after(100).unwrap();
        assert_eq!(index.len(), 5);
        // Vacated slots accept new appends.
        index.append(entry(5, 50, 5)).unwrap();
        assert_eq!(index.last_entry().unwrap().offset, 5);
    }

    #[test]
    fn reopen_recovers_entry_count() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("00000000000000000000.index");
        {
            let mut index = IndexFile::open_or_create(&path, 0, 16).unwrap();
            for i in 1..=5 {
                index.append(entry(i, i * 10, i)).unwrap();
            }
            index.flush().unwrap();
        }

        let index = IndexFile::open_or_create(&path, 0, 16).unwrap();
        assert_eq!(index.len(), 5);
        assert_eq!(index.lookup_offset(3).unwrap().position, 30);
    }

    #[test]
    fn shrink_to_fit_then_append_after_reopen() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("00000000000000000000.index");
        {
            let mut index = IndexFile::open_or_create(&path, 0, 16).unwrap();
            for i in 1..=3 {
                index.append(entry(i, i * 10, i)).unwrap();
            }
            index.shrink_to_fit().unwrap();
            assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * ENTRY_LEN as u64);
        }

        let mut index = IndexFile::open_or_create(&path, 0, 16).unwrap();
        assert_eq!(index.len(), 3);
        index.append(entry(4, 40, 4)).unwrap();
        assert_eq!(index.last_entry().unwrap().offset, 4);
    }
}
