//! Durable, append-only commit log backing a streambed partition.
//!
//! Messages are persisted to a directory of fixed-size segments (paired
//! log and index files), indexed by offset and timestamp, bounded by a
//! retention policy, and coordinated with readers through a high
//! watermark maintained by the replication layer.

use std::time::Duration;

mod cleaner;
mod commitlog;
mod index;
mod message;
mod reader;
mod segment;

pub mod error;

pub use crate::{
    cleaner::Retention,
    commitlog::{CommitLog, HwSignal, CHECKPOINT_FILE},
    error::{Error, Result},
    index::Entry,
    message::{encode_message_set, entries_for_message_set, Message, StoredMessage, RECORD_OVERHEAD},
    reader::{LogScanner, Reader, ReaderInterrupt},
    segment::{Segment, SegmentScanner},
};

#[cfg(test)]
mod tests;

/// [`CommitLog`] options.
#[derive(Clone, Copy, Debug)]
pub struct Options {
    /// Soft cap on the size of a segment's log file. Once a segment
    /// reaches it, the segment is sealed and a successor is created.
    ///
    /// A single message set larger than the cap is still written whole
    /// (into an otherwise empty segment), so segments may overshoot.
    ///
    /// Default: 256 MiB
    pub max_segment_bytes: i64,
    /// Policy bounding the log's disk footprint; see [`Retention`].
    ///
    /// Default: retain everything.
    pub retention: Retention,
    /// Roll the active segment once this much time has passed since its
    /// first write, even below `max_segment_bytes`. Zero disables
    /// time-based rolling.
    ///
    /// Default: disabled
    pub roll_time: Duration,
    /// Interval of the background retention pass.
    ///
    /// Default: 5 minutes
    pub cleaner_interval: Duration,
    /// Interval at which the high watermark is checkpointed to disk.
    ///
    /// Default: 5 seconds
    pub checkpoint_interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_segment_bytes: 256 * 1024 * 1024,
            retention: Retention::default(),
            roll_time: Duration::ZERO,
            cleaner_interval: Duration::from_secs(5 * 60),
            checkpoint_interval: Duration::from_secs(5),
        }
    }
}
