use std::{sync::Arc, time::Duration};

use log::{debug, info};

use crate::{
    segment::{now_millis, Segment},
    Result,
};

/// Retention policy bounding a log's disk footprint.
///
/// A zero value disables the corresponding rule; active rules compose with
/// OR, i.e. a segment is deleted as soon as *any* rule requires it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Retention {
    /// Maximum total bytes retained across all segments.
    pub max_bytes: i64,
    /// Maximum total number of messages retained.
    pub max_messages: i64,
    /// Maximum age of a segment's newest message.
    pub max_age: Duration,
}

impl Retention {
    fn is_disabled(&self) -> bool {
        self.max_bytes == 0 && self.max_messages == 0 && self.max_age.is_zero()
    }
}

/// Deletes prefix segments until the [`Retention`] policy is satisfied.
#[derive(Debug)]
pub(crate) struct Cleaner {
    retention: Retention,
}

impl Cleaner {
    pub fn new(retention: Retention) -> Self {
        Self { retention }
    }

    /// Delete eligible segments oldest-first, removing each from disk
    /// before dropping it from `segments`. The trailing (active) segment is
    /// never deleted.
    ///
    /// On a deletion failure the list reflects the segments deleted so far.
    pub fn clean(&self, segments: &mut Vec<Arc<Segment>>) -> Result<()> {
        if self.retention.is_disabled() {
            return Ok(());
        }

        let mut total_bytes: i64 = segments.iter().map(|s| s.position()).sum();
        let mut total_messages: i64 = segments.iter().map(|s| s.message_count()).sum();
        let now = now_millis();
        let mut deleted = 0;

        while segments.len() > 1 {
            let candidate = segments[0].clone();
            let over_bytes = self.retention.max_bytes > 0 && total_bytes > self.retention.max_bytes;
            let over_messages =
                self.retention.max_messages > 0 && total_messages > self.retention.max_messages;
            let stale = !self.retention.max_age.is_zero()
                && candidate.last_timestamp() != 0
                && now - candidate.last_timestamp() > self.retention.max_age.as_millis() as i64;
            if !(over_bytes || over_messages || stale) {
                break;
            }

            debug!(
                "retention: deleting segment {} (bytes={} messages={} stale={})",
                candidate.base_offset(),
                over_bytes,
                over_messages,
                stale
            );
            candidate.delete()?;
            total_bytes -= candidate.position();
            total_messages -= candidate.message_count();
            segments.remove(0);
            deleted += 1;
        }

        if deleted > 0 {
            info!(
                "retention deleted {} segment(s), oldest base offset now {}",
                deleted,
                segments[0].base_offset()
            );
        }
        Ok(())
    }
}
