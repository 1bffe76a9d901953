use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error returned by commit log operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A record could not be decoded: checksum mismatch, impossible length
    /// field, or index/log disagreement found outside of recovery.
    ///
    /// The log stays online, only the failing read is lost.
    #[error("corrupt record at position={position}: {reason}")]
    CorruptFormat {
        /// Byte position within the segment's log file at which decoding failed.
        position: i64,
        reason: &'static str,
    },

    /// An offset or timestamp lookup found no matching index entry.
    ///
    /// This is a normal control-flow outcome, not a failure.
    #[error("no index entry for the requested offset or timestamp")]
    EntryNotFound,

    /// The requested offset is outside the retained range of the log.
    #[error("offset {offset} is not in the retained range of the log")]
    SegmentNotFound { offset: i64 },

    /// A segment with this base offset already exists on disk.
    ///
    /// Internal to the rotation protocol: the appender lost the
    /// active-segment swap race and should retry.
    #[error("segment with base offset {base_offset} already exists")]
    SegmentExists { base_offset: i64 },

    /// The write does not fit into the segment; the caller must roll.
    #[error("segment {base_offset} is full")]
    SegmentFull { base_offset: i64 },

    /// The segment was sealed while the write was in flight; the caller
    /// should reload the active segment and retry.
    #[error("segment {base_offset} is sealed")]
    SegmentSealed { base_offset: i64 },

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Operation invoked after [`crate::CommitLog::close`].
    #[error("commit log is closed")]
    Closed,

    /// The reader was interrupted via its [`crate::ReaderInterrupt`] handle.
    #[error("reader was cancelled")]
    Cancelled,
}
