use std::time::Duration;

use crate::{Message, Options};

/// Options with background loops effectively parked, so tests control
/// every split, clean and checkpoint themselves.
pub fn log_opts(max_segment_bytes: i64) -> Options {
    Options {
        max_segment_bytes,
        cleaner_interval: Duration::from_secs(3600),
        checkpoint_interval: Duration::from_secs(3600),
        ..Options::default()
    }
}

/// `n` small messages with timestamps `ts0, ts0 + 1, ..`.
pub fn messages(n: usize, ts0: i64) -> Vec<Message> {
    (0..n)
        .map(|i| Message::new(format!("value-{}", ts0 + i as i64)).with_timestamp(ts0 + i as i64))
        .collect()
}

pub fn enable_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}
