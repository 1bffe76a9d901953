use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::trace;

use crate::{
    commitlog::CommitLog, message::StoredMessage, segment::SegmentScanner, Error, Result,
};

/// A non-blocking cursor over the log.
///
/// Yields messages in offset order, following the segment chain as it
/// advances, and reports `None` at the current end of data.
pub struct LogScanner {
    log: Arc<CommitLog>,
    next_offset: i64,
    scanner: Option<SegmentScanner>,
}

impl LogScanner {
    pub(crate) fn new(log: Arc<CommitLog>, from_offset: i64) -> Self {
        Self {
            log,
            next_offset: from_offset.max(0),
            scanner: None,
        }
    }

    /// Offset of the next message this scanner will yield.
    pub fn offset(&self) -> i64 {
        self.next_offset
    }

    /// The next message, or `None` when the scanner has caught up with the
    /// end of the written log.
    ///
    /// # Errors
    ///
    /// [`Error::SegmentNotFound`] if the position was retained out from
    /// underneath the scanner; the caller may restart from
    /// [`CommitLog::oldest_offset`].
    pub fn next_message(&mut self) -> Result<Option<StoredMessage>> {
        loop {
            let Some(scanner) = self.scanner.as_mut() else {
                let segment = self.log.segment_containing(self.next_offset)?;
                self.scanner = Some(segment.scan(self.next_offset)?);
                continue;
            };

            match scanner.next()? {
                Some(message) => {
                    self.next_offset = message.offset + 1;
                    return Ok(Some(message));
                }
                None => {
                    // Either the segment is exhausted and a successor
                    // exists, or the segment object went stale (rotation
                    // landed a successor, or truncation swapped the files).
                    let segment = self.log.segment_containing(self.next_offset)?;
                    if Arc::ptr_eq(scanner.segment(), &segment) {
                        return Ok(None);
                    }
                    trace!("scanner advancing to segment {}", segment.base_offset());
                    self.scanner = Some(segment.scan(self.next_offset)?);
                }
            }
        }
    }
}

/// A reader of committed messages.
///
/// [`Reader::next_message`] blocks while the reader is at the committed
/// edge, parking on the log's high-watermark signal until the watermark
/// advances or the paired [`ReaderInterrupt`] fires.
pub struct Reader {
    log: Arc<CommitLog>,
    scanner: LogScanner,
    id: u64,
    cancelled: Arc<AtomicBool>,
}

/// Cancellation handle paired with a [`Reader`].
///
/// The log does not wake pending waiters when it closes; a consumer that
/// goes away must interrupt its reader instead.
pub struct ReaderInterrupt {
    log: Arc<CommitLog>,
    id: u64,
    cancelled: Arc<AtomicBool>,
}

impl ReaderInterrupt {
    /// Unblock the reader and make it return [`Error::Cancelled`].
    pub fn interrupt(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        // Dropping the registered sender wakes the reader if it is parked.
        self.log.remove_hw_waiter(self.id);
    }
}

impl Reader {
    pub(crate) fn new(log: Arc<CommitLog>, from_offset: i64) -> (Self, ReaderInterrupt) {
        let id = log.next_reader_id();
        let cancelled = Arc::new(AtomicBool::new(false));
        let interrupt = ReaderInterrupt {
            log: Arc::clone(&log),
            id,
            cancelled: Arc::clone(&cancelled),
        };
        let reader = Self {
            scanner: LogScanner::new(Arc::clone(&log), from_offset),
            log,
            id,
            cancelled,
        };
        (reader, interrupt)
    }

    /// Offset of the next message this reader will yield.
    pub fn offset(&self) -> i64 {
        self.scanner.offset()
    }

    /// The next committed message, blocking at the committed edge until
    /// the high watermark advances.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] once the paired [`ReaderInterrupt`] has fired.
    pub fn next_message(&mut self) -> Result<StoredMessage> {
        loop {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(Error::Cancelled);
            }

            let hw = self.log.high_watermark();
            let committed_edge = hw.min(self.log.newest_offset());
            if self.scanner.offset() > committed_edge {
                let signal = self.log.wait_for_hw_change(self.id, hw);
                // The interrupt may have fired between the check above and
                // the waiter registration; re-check before parking.
                if self.cancelled.load(Ordering::SeqCst) {
                    self.log.remove_hw_waiter(self.id);
                    return Err(Error::Cancelled);
                }
                trace!("reader {} parked at hw {}", self.id, hw);
                signal.wait();
                continue;
            }

            if let Some(message) = self.scanner.next_message()? {
                return Ok(message);
            }
            // Committed data is published before the watermark moves, so
            // reaching this point means the edge check is about to pass or
            // the log was truncated; re-evaluate from the top.
            std::thread::yield_now();
        }
    }
}
