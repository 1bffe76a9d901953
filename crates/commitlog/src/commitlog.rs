use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, Write as _},
    mem,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use arc_swap::ArcSwap;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender, TryRecvError};
use log::{debug, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use scopeguard::ScopeGuard;
use tempfile::NamedTempFile;

use crate::{
    cleaner::Cleaner,
    index::Entry,
    message::{self, Message},
    reader::{LogScanner, Reader, ReaderInterrupt},
    segment::{self, Segment},
    Error, Options, Result,
};

/// Name of the file holding the durably checkpointed high watermark.
pub const CHECKPOINT_FILE: &str = "replication-offset-checkpoint";

/// A rotation or seal was observed mid-append this many times in a row
/// before giving up. Each retry follows forward progress by another
/// thread, so the bound is never reached in practice.
const MAX_APPEND_RETRIES: usize = 32;

/// A durable, append-only log of messages, partitioned into segments.
///
/// The log hands out offsets densely: appends on the active segment are
/// totally ordered, and across a rotation every offset of the successor is
/// greater than every offset of its predecessor. The high watermark tracks
/// the greatest offset considered committed by the replication layer and
/// is checkpointed to [`CHECKPOINT_FILE`] in the background.
pub struct CommitLog {
    dir: PathBuf,
    opts: Options,
    cleaner: Cleaner,
    /// The segment currently accepting appends, readable without taking
    /// `inner`. Swapping this pointer is the linearization point of a
    /// rotation.
    active: ArcSwap<Segment>,
    inner: RwLock<Inner>,
    closed: AtomicBool,
    next_reader_id: AtomicU64,
    workers: Mutex<Workers>,
}

struct Inner {
    /// Offset-sorted and non-empty; every element but the last is sealed.
    segments: Vec<Arc<Segment>>,
    /// Greatest committed offset; `-1` until the first commit.
    hw: i64,
    /// Pending high-watermark waiters keyed by reader id. Dropping a
    /// sender closes the paired receiver, which is the wake-up.
    hw_waiters: HashMap<u64, Sender<()>>,
}

#[derive(Default)]
struct Workers {
    shutdown: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl CommitLog {
    /// Open the log in `dir`, creating the directory if needed.
    ///
    /// Recovery removes leftover truncation and checkpoint temp files as
    /// well as orphaned index files, re-validates every segment against
    /// its log file, and reads the high watermark from [`CHECKPOINT_FILE`].
    pub fn open(dir: impl Into<PathBuf>, opts: Options) -> Result<Arc<Self>> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let bases = sweep_log_dir(&dir)?;
        let mut segments = Vec::with_capacity(bases.len().max(1));
        for base in bases {
            segments.push(Arc::new(Segment::open(&dir, base, opts.max_segment_bytes)?));
        }
        if segments.is_empty() {
            segments.push(Arc::new(Segment::create(&dir, 0, opts.max_segment_bytes)?));
        }
        let active = segments[segments.len() - 1].clone();
        for segment in &segments[..segments.len() - 1] {
            segment.seal()?;
        }

        let hw = read_checkpoint(&dir)?;
        info!(
            "opened commit log at {}: segments={} newest={} hw={}",
            dir.display(),
            segments.len(),
            active.next_offset() - 1,
            hw
        );

        let log = Arc::new(Self {
            dir,
            cleaner: Cleaner::new(opts.retention),
            opts,
            active: ArcSwap::new(active),
            inner: RwLock::new(Inner {
                segments,
                hw,
                hw_waiters: HashMap::new(),
            }),
            closed: AtomicBool::new(false),
            next_reader_id: AtomicU64::new(0),
            workers: Mutex::new(Workers::default()),
        });
        log.spawn_workers();
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Append `messages` to the log, returning their assigned offsets.
    pub fn append(&self, messages: &[Message]) -> Result<Vec<i64>> {
        self.ensure_open()?;
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        self.append_loop(|base_offset, base_position| {
            Ok(message::encode_message_set(
                base_offset,
                base_position,
                messages,
            ))
        })
    }

    /// Append a preformed message set, e.g. one received from the
    /// replication leader. Offsets are read from the set itself; the index
    /// entries are derived without re-encoding.
    pub fn append_message_set(&self, bytes: &[u8]) -> Result<Vec<i64>> {
        self.ensure_open()?;
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        self.append_loop(|_base_offset, base_position| {
            let entries = message::entries_for_message_set(base_position, bytes)?;
            Ok((bytes.to_vec(), entries))
        })
    }

    fn append_loop<F>(&self, encode: F) -> Result<Vec<i64>>
    where
        F: Fn(i64, i64) -> Result<(Vec<u8>, Vec<Entry>)>,
    {
        for _ in 0..MAX_APPEND_RETRIES {
            self.check_and_perform_split()?;
            let segment = self.active.load_full();
            match segment.append_with(&encode) {
                Ok(entries) => return Ok(entries.iter().map(|e| e.offset).collect()),
                // The write alone would overflow the segment; roll and retry.
                Err(Error::SegmentFull { .. }) => self.split(&segment)?,
                // A rotation or truncation froze the segment under us.
                // Truncation holds the log lock while it swaps the
                // pointer, so briefly taking it lines this appender up
                // behind the swap before retrying.
                Err(Error::SegmentSealed { .. }) => {
                    drop(self.inner.read());
                    thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }
        Err(io::Error::other("append did not settle after repeated rotations").into())
    }

    /// Roll the active segment if [`Segment::check_split`] asks for it.
    ///
    /// Returns `true` if a rotation happened (ours or a racing appender's).
    fn check_and_perform_split(&self) -> Result<bool> {
        let active = self.active.load_full();
        if !active.check_split(self.opts.roll_time) {
            return Ok(false);
        }
        self.split(&active)?;
        Ok(true)
    }

    /// Rotate `old` out of the active slot.
    ///
    /// `old` is frozen first so that its `next_offset` — the successor's
    /// base offset — is final. Racing appenders then either lose the file
    /// creation (the segment already exists) or the pointer swap, and back
    /// off; the winner registers the successor and seals `old` under the
    /// log's lock, running a retention pass while it holds it.
    fn split(&self, old: &Arc<Segment>) -> Result<()> {
        {
            let current = self.active.load();
            if !Arc::ptr_eq(&current, old) {
                return Ok(());
            }
        }
        old.mark_sealed();

        let new = match Segment::create(&self.dir, old.next_offset(), self.opts.max_segment_bytes)
        {
            Ok(segment) => Arc::new(segment),
            // Another appender beat us to the same base offset; its swap
            // installs the successor.
            Err(Error::SegmentExists { .. }) => return Ok(()),
            Err(e) => return Err(e),
        };

        let prev = self.active.compare_and_swap(old, Arc::clone(&new));
        if !Arc::ptr_eq(&prev, old) {
            debug!("lost rotation race at base offset {}", new.base_offset());
            new.delete()?;
            return Ok(());
        }

        {
            let mut inner = self.inner.write();
            inner.segments.push(Arc::clone(&new));
            if let Err(e) = self.cleaner.clean(&mut inner.segments) {
                warn!("retention pass after rotation failed: {e}");
            }
            old.seal()?;
        }
        debug!(
            "rolled segment {} -> {}",
            old.base_offset(),
            new.base_offset()
        );
        Ok(())
    }

    /// Run the retention policy against the current segment list.
    pub fn clean(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.cleaner.clean(&mut inner.segments)
    }

    /// Remove all data at and past `offset`, reconciling the log to a
    /// replica-agreed prefix. A no-op if `offset` is past the newest offset
    /// or precedes the retained range.
    ///
    /// Afterwards the newest offset is `offset - 1` and the trailing
    /// segment is writable again.
    pub fn truncate(&self, offset: i64) -> Result<()> {
        self.ensure_open()?;
        let mut inner = self.inner.write();

        if offset > self.newest_offset() {
            return Ok(());
        }
        let Some(idx) = inner
            .segments
            .iter()
            .rposition(|s| s.base_offset() <= offset)
        else {
            return Ok(());
        };
        info!("truncating log to offset {offset}");

        // Freeze writes on everything we are about to surgically alter, so
        // in-flight appenders back off and retry against the new pointer.
        for segment in &inner.segments[idx..] {
            segment.mark_sealed();
        }

        let removed: Vec<_> = inner.segments.drain(idx + 1..).collect();
        for segment in removed.iter().rev() {
            segment.delete()?;
        }
        let Some(containing) = inner.segments.pop() else {
            return Ok(());
        };

        let predecessor = inner.segments.last().map(|s| s.base_offset());
        let reopen_base = if let (true, Some(prev_base)) =
            (containing.base_offset() == offset, predecessor)
        {
            // The whole segment goes; its predecessor becomes the tail.
            containing.delete()?;
            inner.segments.pop();
            prev_base
        } else {
            // Copy the retained records into a replacement segment, then
            // atomically rename it over the original.
            let replacement = Segment::create_replacement(
                &self.dir,
                containing.base_offset(),
                self.opts.max_segment_bytes,
            )?;
            let replacement = scopeguard::guard(replacement, |r| {
                if let Err(e) = r.delete() {
                    warn!("failed to remove truncation leftovers: {e}");
                }
            });

            let mut scanner = containing.scan(containing.base_offset())?;
            let mut buf = Vec::new();
            while let Some(msg) = scanner.next()? {
                if msg.offset >= offset {
                    break;
                }
                buf.clear();
                message::put_record(&mut buf, msg.offset, msg.timestamp, msg.key.as_deref(), &msg.value);
                let entry = Entry {
                    offset: msg.offset,
                    position: replacement.position(),
                    timestamp: msg.timestamp,
                };
                replacement.write_message_set(&buf, std::slice::from_ref(&entry))?;
            }

            let replacement = ScopeGuard::into_inner(replacement);
            replacement.replace(&containing)?;
            containing.base_offset()
        };

        // Reopen the trailing segment writable and swap the pointer.
        let active = Arc::new(Segment::open(
            &self.dir,
            reopen_base,
            self.opts.max_segment_bytes,
        )?);
        inner.segments.push(Arc::clone(&active));
        self.active.store(active);

        // Keep the watermark within the retained range.
        if inner.hw > self.newest_offset() {
            inner.hw = self.newest_offset();
        }
        Ok(())
    }

    /// The greatest offset written to the log, `-1` if nothing was written.
    pub fn newest_offset(&self) -> i64 {
        self.active.load().next_offset() - 1
    }

    /// The first offset still retained.
    pub fn oldest_offset(&self) -> i64 {
        self.inner
            .read()
            .segments
            .first()
            .map(|s| s.base_offset())
            .unwrap_or(0)
    }

    /// The greatest offset considered committed, `-1` if none.
    pub fn high_watermark(&self) -> i64 {
        self.inner.read().hw
    }

    /// Advance the high watermark and wake every pending waiter. Values
    /// not strictly greater than the current watermark are ignored.
    ///
    /// The watermark is persisted by the periodic checkpoint, not here.
    pub fn set_high_watermark(&self, hw: i64) -> Result<()> {
        self.ensure_open()?;
        let waiters = {
            let mut inner = self.inner.write();
            if hw <= inner.hw {
                return Ok(());
            }
            trace!("advancing hw {} -> {}", inner.hw, hw);
            inner.hw = hw;
            mem::take(&mut inner.hw_waiters)
        };
        // Dropping the senders fires every waiter, outside the lock.
        drop(waiters);
        Ok(())
    }

    /// Obtain a signal that fires once the high watermark moves away from
    /// `observed_hw`. If it already has, the signal is born ready.
    ///
    /// A reader registers at most one pending signal; a newer call with
    /// the same `reader_id` supersedes (and thereby fires) the older one.
    pub fn wait_for_hw_change(&self, reader_id: u64, observed_hw: i64) -> HwSignal {
        let (tx, rx) = bounded::<()>(0);
        {
            let mut inner = self.inner.write();
            if inner.hw == observed_hw {
                inner.hw_waiters.insert(reader_id, tx);
            }
            // Otherwise drop the sender, leaving the signal pre-fired.
        }
        HwSignal { rx }
    }

    /// Drop the pending waiter registration of `reader_id`, firing its
    /// signal. Used to propagate cancellation.
    pub fn remove_hw_waiter(&self, reader_id: u64) {
        let waiter = self.inner.write().hw_waiters.remove(&reader_id);
        drop(waiter);
    }

    /// The earliest offset whose message timestamp is at or past
    /// `timestamp`, or one past the newest offset if every message is
    /// older.
    pub fn offset_for_timestamp(&self, timestamp: i64) -> i64 {
        {
            let inner = self.inner.read();
            for segment in &inner.segments {
                if let Ok(entry) = segment.find_entry_by_timestamp(timestamp) {
                    return entry.offset;
                }
            }
        }
        self.newest_offset() + 1
    }

    /// Snapshot of the current segment list, oldest first.
    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.inner.read().segments.clone()
    }

    /// A non-blocking cursor starting at `from_offset`.
    pub fn scanner(self: &Arc<Self>, from_offset: i64) -> LogScanner {
        LogScanner::new(Arc::clone(self), from_offset)
    }

    /// A blocking reader of committed messages starting at `from_offset`,
    /// paired with the handle that interrupts it.
    pub fn reader(self: &Arc<Self>, from_offset: i64) -> (Reader, ReaderInterrupt) {
        Reader::new(Arc::clone(self), from_offset)
    }

    pub(crate) fn next_reader_id(&self) -> u64 {
        self.next_reader_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Resolve the segment whose offset range contains `offset`; beyond
    /// the newest offset this is the active segment.
    pub(crate) fn segment_containing(&self, offset: i64) -> Result<Arc<Segment>> {
        let inner = self.inner.read();
        let Some(idx) = inner
            .segments
            .iter()
            .rposition(|s| s.base_offset() <= offset)
        else {
            return Err(Error::SegmentNotFound { offset });
        };
        Ok(inner.segments[idx].clone())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Stop the background loops, checkpoint the high watermark and flush
    /// the active segment. Idempotent.
    ///
    /// Pending high-watermark waiters are not woken; cancellation is the
    /// caller's responsibility via [`ReaderInterrupt`].
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("closing commit log at {}", self.dir.display());

        let workers = mem::take(&mut *self.workers.lock());
        drop(workers.shutdown);
        for handle in workers.handles {
            if handle.join().is_err() {
                warn!("a background worker panicked before close");
            }
        }

        self.checkpoint_hw()?;
        self.active.load().flush()?;
        Ok(())
    }

    /// Close the log and remove its directory entirely.
    pub fn delete(&self) -> Result<()> {
        self.close()?;
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    fn spawn_workers(self: &Arc<Self>) {
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let mut handles = Vec::with_capacity(2);

        let log = Arc::downgrade(self);
        let shutdown = shutdown_rx.clone();
        let interval = self.opts.checkpoint_interval;
        handles.push(thread::spawn(move || checkpoint_loop(log, shutdown, interval)));

        let log = Arc::downgrade(self);
        let interval = self.opts.cleaner_interval;
        handles.push(thread::spawn(move || cleaner_loop(log, shutdown_rx, interval)));

        *self.workers.lock() = Workers {
            shutdown: Some(shutdown_tx),
            handles,
        };
    }

    /// Write the high watermark to [`CHECKPOINT_FILE`] via a temp file and
    /// an atomic rename.
    fn checkpoint_hw(&self) -> Result<()> {
        let hw = self.high_watermark();
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        write!(tmp, "{hw}")?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(CHECKPOINT_FILE))
            .map_err(|e| e.error)?;
        trace!("checkpointed hw {hw}");
        Ok(())
    }
}

impl fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitLog")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

impl Drop for CommitLog {
    fn drop(&mut self) {
        // The loops hold weak references and exit on their own; dropping
        // the shutdown sender just wakes them early.
        let workers = mem::take(&mut *self.workers.lock());
        drop(workers.shutdown);
    }
}

/// Signal handed to a high-watermark waiter.
///
/// Becomes ready when the watermark advances past the observed value or
/// the waiter is removed; never carries data.
#[derive(Debug)]
pub struct HwSignal {
    rx: Receiver<()>,
}

impl HwSignal {
    /// Block until the signal fires.
    pub fn wait(&self) {
        let _ = self.rx.recv();
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }
}

/// Writes the current high watermark to disk every `interval`.
///
/// A checkpoint failure means the filesystem cannot keep the durability
/// promise, so it is treated as fatal.
fn checkpoint_loop(log: Weak<CommitLog>, shutdown: Receiver<()>, interval: Duration) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                let Some(log) = log.upgrade() else { break };
                if log.is_closed() {
                    break;
                }
                if let Err(e) = log.checkpoint_hw() {
                    panic!("failed to checkpoint high watermark: {e}");
                }
            }
            recv(shutdown) -> _ => break,
        }
    }
    debug!("checkpoint loop exited");
}

/// Periodically attempts a split (which runs the cleaner itself) and falls
/// back to a direct retention pass. Errors are logged, never fatal.
fn cleaner_loop(log: Weak<CommitLog>, shutdown: Receiver<()>, interval: Duration) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                let Some(log) = log.upgrade() else { break };
                if log.is_closed() {
                    break;
                }
                match log.check_and_perform_split() {
                    Ok(true) => {}
                    Ok(false) => {
                        if let Err(e) = log.clean() {
                            warn!("retention pass failed: {e}");
                        }
                    }
                    Err(e) => warn!("time-based roll failed: {e}"),
                }
            }
            recv(shutdown) -> _ => break,
        }
    }
    debug!("cleaner loop exited");
}

/// Scan the log directory: remove truncation and checkpoint temp files
/// left behind by a crash, drop orphaned index files, and return the
/// sorted base offsets of the segments found.
fn sweep_log_dir(dir: &Path) -> Result<Vec<i64>> {
    let mut bases = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(segment::TRUNCATED_SUFFIX) || name.starts_with(".tmp") {
            warn!("removing leftover file {name}");
            fs::remove_file(entry.path())?;
            continue;
        }
        if let Some(base) = name.strip_suffix(segment::LOG_SUFFIX) {
            if let Ok(base) = base.parse::<i64>() {
                bases.push(base);
            }
        }
    }
    bases.sort_unstable();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(base) = name.strip_suffix(segment::INDEX_SUFFIX) {
            if let Ok(base) = base.parse::<i64>() {
                if bases.binary_search(&base).is_err() {
                    warn!("removing orphaned index file {name}");
                    fs::remove_file(entry.path())?;
                }
            }
        }
    }

    Ok(bases)
}

fn read_checkpoint(dir: &Path) -> Result<i64> {
    match fs::read_to_string(dir.join(CHECKPOINT_FILE)) {
        Ok(contents) => contents.trim().parse::<i64>().map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("malformed high watermark checkpoint: {contents:?}"),
            )
            .into()
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(-1),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;
    use crate::tests::helpers::{log_opts, messages};

    #[test]
    fn fresh_log_starts_at_base_zero() {
        let tmp = tempdir().unwrap();
        let log = CommitLog::open(tmp.path(), log_opts(1 << 20)).unwrap();

        assert_eq!(log.newest_offset(), -1);
        assert_eq!(log.oldest_offset(), 0);
        assert_eq!(log.high_watermark(), -1);
        assert_eq!(log.segments().len(), 1);
    }

    #[test]
    fn append_returns_contiguous_offsets() {
        let tmp = tempdir().unwrap();
        let log = CommitLog::open(tmp.path(), log_opts(1 << 20)).unwrap();

        assert_eq!(log.append(&messages(3, 0)).unwrap(), vec![0, 1, 2]);
        assert_eq!(log.append(&messages(2, 3)).unwrap(), vec![3, 4]);
        assert_eq!(log.newest_offset(), 4);
    }

    #[test]
    fn append_message_set_uses_embedded_offsets() {
        let tmp = tempdir().unwrap();
        let log = CommitLog::open(tmp.path(), log_opts(1 << 20)).unwrap();
        log.append(&messages(2, 0)).unwrap();

        let (bytes, _) = message::encode_message_set(2, log.active.load().position(), &messages(3, 2));
        assert_eq!(log.append_message_set(&bytes).unwrap(), vec![2, 3, 4]);
        assert_eq!(log.newest_offset(), 4);
    }

    #[test]
    fn wait_for_changed_hw_is_born_ready() {
        let tmp = tempdir().unwrap();
        let log = CommitLog::open(tmp.path(), log_opts(1 << 20)).unwrap();

        // Observed value is stale already.
        let signal = log.wait_for_hw_change(0, 7);
        assert!(signal.is_ready());

        // Observed value matches: pending until the hw moves.
        let signal = log.wait_for_hw_change(0, -1);
        assert!(!signal.is_ready());
        log.append(&messages(1, 0)).unwrap();
        log.set_high_watermark(0).unwrap();
        assert!(signal.is_ready());
        assert_eq!(log.high_watermark(), 0);
    }

    #[test]
    fn removing_a_waiter_fires_its_signal() {
        let tmp = tempdir().unwrap();
        let log = CommitLog::open(tmp.path(), log_opts(1 << 20)).unwrap();

        let signal = log.wait_for_hw_change(42, -1);
        assert!(!signal.is_ready());
        log.remove_hw_waiter(42);
        assert!(signal.is_ready());
    }

    #[test]
    fn hw_never_regresses() {
        let tmp = tempdir().unwrap();
        let log = CommitLog::open(tmp.path(), log_opts(1 << 20)).unwrap();
        log.append(&messages(5, 0)).unwrap();

        log.set_high_watermark(3).unwrap();
        log.set_high_watermark(1).unwrap();
        assert_eq!(log.high_watermark(), 3);
    }

    #[test]
    fn operations_fail_after_close() {
        let tmp = tempdir().unwrap();
        let log = CommitLog::open(tmp.path(), log_opts(1 << 20)).unwrap();
        log.append(&messages(1, 0)).unwrap();
        log.close().unwrap();
        log.close().unwrap();

        assert!(matches!(log.append(&messages(1, 1)), Err(Error::Closed)));
        assert!(matches!(log.truncate(0), Err(Error::Closed)));
        assert!(matches!(log.set_high_watermark(0), Err(Error::Closed)));
    }

    #[test]
    fn close_checkpoints_the_hw() {
        let tmp = tempdir().unwrap();
        let log = CommitLog::open(tmp.path(), log_opts(1 << 20)).unwrap();
        log.append(&messages(3, 0)).unwrap();
        log.set_high_watermark(2).unwrap();
        log.close().unwrap();

        let contents = fs::read_to_string(tmp.path().join(CHECKPOINT_FILE)).unwrap();
        assert_eq!(contents.trim(), "2");

        drop(log);
        let log = CommitLog::open(tmp.path(), log_opts(1 << 20)).unwrap();
        assert_eq!(log.high_watermark(), 2);
    }

    #[test]
    fn delete_removes_the_directory() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("partition-0");
        let log = CommitLog::open(&dir, log_opts(1 << 20)).unwrap();
        log.append(&messages(1, 0)).unwrap();

        log.delete().unwrap();
        assert!(!dir.exists());
    }
}
