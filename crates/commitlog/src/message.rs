use std::io::{self, Read};

use crate::index::Entry;

/// Fixed-width prefix of a record: `offset: i64`, `timestamp: i64`,
/// `key_size: i32`. All integers in the record are big-endian.
pub(crate) const RECORD_PREFIX_LEN: usize = 8 + 8 + 4;

/// Encoded size of a record with neither key nor value bytes:
/// the prefix plus `value_size: i32` plus the trailing `crc32: u32`.
pub const RECORD_OVERHEAD: usize = RECORD_PREFIX_LEN + 4 + 4;

/// A message to be appended to the log.
///
/// The log treats the key and value as opaque bytes. The offset is assigned
/// by the codec at append time; the timestamp is supplied by the caller
/// (milliseconds, source of truth is the enclosing server's clock).
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Message {
    pub timestamp: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

impl Message {
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            timestamp: 0,
            key: None,
            value: value.into(),
        }
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Size of this message on disk once encoded.
    pub fn encoded_len(&self) -> usize {
        RECORD_OVERHEAD + self.key.as_ref().map(Vec::len).unwrap_or(0) + self.value.len()
    }
}

/// A message as read back from the log, carrying its assigned offset.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoredMessage {
    pub offset: i64,
    pub timestamp: i64,
    pub key: Option<Vec<u8>>,
    pub value: Vec<u8>,
}

impl StoredMessage {
    pub(crate) fn encoded_len(&self) -> usize {
        RECORD_OVERHEAD + self.key.as_ref().map(Vec::len).unwrap_or(0) + self.value.len()
    }
}

/// Encode `messages` into a contiguous message set, assigning offsets
/// `base_offset, base_offset + 1, ..` and index entry positions relative to
/// `base_position` (the byte position at which the buffer will be appended).
pub fn encode_message_set(
    base_offset: i64,
    base_position: i64,
    messages: &[Message],
) -> (Vec<u8>, Vec<Entry>) {
    let cap = messages.iter().map(Message::encoded_len).sum();
    let mut buf = Vec::with_capacity(cap);
    let mut entries = Vec::with_capacity(messages.len());

    for (i, message) in messages.iter().enumerate() {
        let offset = base_offset + i as i64;
        let position = base_position + buf.len() as i64;
        put_record(
            &mut buf,
            offset,
            message.timestamp,
            message.key.as_deref(),
            &message.value,
        );
        entries.push(Entry {
            offset,
            position,
            timestamp: message.timestamp,
        });
    }

    (buf, entries)
}

/// Parse a preformed message set (e.g. received from a replication peer)
/// and compute its index entries without re-encoding.
///
/// Offsets and timestamps are read from the buffer itself.
///
/// # Errors
///
/// [`crate::error::Error::CorruptFormat`] on a length-field mismatch, a
/// truncated trailing record, or a checksum mismatch.
pub fn entries_for_message_set(base_position: i64, bytes: &[u8]) -> crate::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;

    while pos < bytes.len() {
        let mut reader = &bytes[pos..];
        match read_message_from(&mut reader)? {
            ReadOutcome::Message(message, len) => {
                entries.push(Entry {
                    offset: message.offset,
                    position: base_position + pos as i64,
                    timestamp: message.timestamp,
                });
                pos += len;
            }
            ReadOutcome::Eof => break,
            ReadOutcome::Torn => {
                return Err(crate::Error::CorruptFormat {
                    position: base_position + pos as i64,
                    reason: "truncated record",
                })
            }
            ReadOutcome::Corrupt { reason } => {
                return Err(crate::Error::CorruptFormat {
                    position: base_position + pos as i64,
                    reason,
                })
            }
        }
    }

    Ok(entries)
}

/// Append one encoded record to `buf`.
pub(crate) fn put_record(
    buf: &mut Vec<u8>,
    offset: i64,
    timestamp: i64,
    key: Option<&[u8]>,
    value: &[u8],
) {
    let start = buf.len();
    buf.extend_from_slice(&offset.to_be_bytes());
    buf.extend_from_slice(&timestamp.to_be_bytes());
    match key {
        Some(key) => {
            buf.extend_from_slice(&(key.len() as i32).to_be_bytes());
            buf.extend_from_slice(key);
        }
        None => buf.extend_from_slice(&(-1i32).to_be_bytes()),
    }
    buf.extend_from_slice(&(value.len() as i32).to_be_bytes());
    buf.extend_from_slice(value);
    let crc = crc32c::crc32c(&buf[start..]);
    buf.extend_from_slice(&crc.to_be_bytes());
}

/// Outcome of attempting to read one record.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// A fully decoded record and its encoded length in bytes.
    Message(StoredMessage, usize),
    /// Clean end of data at a record boundary.
    Eof,
    /// A partially written record at the tail.
    Torn,
    /// A structurally invalid or checksum-mismatched record.
    Corrupt { reason: &'static str },
}

/// Attempt to read one record from `reader`.
///
/// Only I/O errors other than an unexpected EOF are returned as `Err`; a
/// short read is reported as [`ReadOutcome::Torn`] so that recovery can
/// truncate at the last record boundary.
pub(crate) fn read_message_from<R: Read>(reader: &mut R) -> io::Result<ReadOutcome> {
    let mut prefix = [0u8; RECORD_PREFIX_LEN];
    match read_fully(reader, &mut prefix)? {
        0 => return Ok(ReadOutcome::Eof),
        n if n < RECORD_PREFIX_LEN => return Ok(ReadOutcome::Torn),
        _ => {}
    }

    let offset = be_i64(&prefix[0..8]);
    let timestamp = be_i64(&prefix[8..16]);
    let key_size = be_i32(&prefix[16..20]);
    let mut crc = crc32c::crc32c(&prefix);

    let key = match key_size {
        -1 => None,
        n if n < -1 => return Ok(ReadOutcome::Corrupt {
            reason: "negative key length",
        }),
        n => {
            let mut key = Vec::new();
            if (&mut *reader).take(n as u64).read_to_end(&mut key)? < n as usize {
                return Ok(ReadOutcome::Torn);
            }
            crc = crc32c::crc32c_append(crc, &key);
            Some(key)
        }
    };

    let mut value_size_buf = [0u8; 4];
    if read_fully(reader, &mut value_size_buf)? < 4 {
        return Ok(ReadOutcome::Torn);
    }
    crc = crc32c::crc32c_append(crc, &value_size_buf);
    let value_size = i32::from_be_bytes(value_size_buf);
    if value_size < 0 {
        return Ok(ReadOutcome::Corrupt {
            reason: "negative value length",
        });
    }

    let mut value = Vec::new();
    if (&mut *reader).take(value_size as u64).read_to_end(&mut value)? < value_size as usize {
        return Ok(ReadOutcome::Torn);
    }
    crc = crc32c::crc32c_append(crc, &value);

    let mut crc_buf = [0u8; 4];
    if read_fully(reader, &mut crc_buf)? < 4 {
        return Ok(ReadOutcome::Torn);
    }
    if u32::from_be_bytes(crc_buf) != crc {
        return Ok(ReadOutcome::Corrupt {
            reason: "checksum mismatch",
        });
    }

    let len = RECORD_PREFIX_LEN
        + key.as_ref().map(Vec::len).unwrap_or(0)
        + 4
        + value.len()
        + 4;
    Ok(ReadOutcome::Message(
        StoredMessage {
            offset,
            timestamp,
            key,
            value,
        },
        len,
    ))
}

pub(crate) fn be_i64(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    i64::from_be_bytes(raw)
}

pub(crate) fn be_i32(bytes: &[u8]) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    i32::from_be_bytes(raw)
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;
    use crate::Error;

    fn decode_all(bytes: &[u8]) -> Vec<StoredMessage> {
        let mut reader = bytes;
        let mut out = Vec::new();
        loop {
            match read_message_from(&mut reader).unwrap() {
                ReadOutcome::Message(message, _) => out.push(message),
                ReadOutcome::Eof => return out,
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn assigns_contiguous_offsets_and_positions() {
        let messages = vec![
            Message::new("one").with_timestamp(10),
            Message::new("two").with_key("k").with_timestamp(20),
            Message::new("three").with_timestamp(30),
        ];
        let (bytes, entries) = encode_message_set(42, 1000, &messages);

        assert_eq!(
            entries.iter().map(|e| e.offset).collect::<Vec<_>>(),
            vec![42, 43, 44]
        );
        assert_eq!(entries[0].position, 1000);
        assert_eq!(
            entries[1].position,
            1000 + messages[0].encoded_len() as i64
        );
        assert_eq!(
            bytes.len(),
            messages.iter().map(Message::encoded_len).sum::<usize>()
        );
    }

    #[test]
    fn roundtrip_preserves_payload_and_timestamp() {
        let messages = vec![
            Message::new("payload").with_timestamp(123),
            Message::new(vec![]).with_key(vec![]).with_timestamp(124),
        ];
        let (bytes, _) = encode_message_set(7, 0, &messages);

        let decoded = decode_all(&bytes);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].offset, 7);
        assert_eq!(decoded[0].timestamp, 123);
        assert_eq!(decoded[0].key, None);
        assert_eq!(decoded[0].value, b"payload");
        // An empty key is distinct from an absent one.
        assert_eq!(decoded[1].key, Some(vec![]));
        assert_eq!(decoded[1].value, Vec::<u8>::new());
    }

    #[test]
    fn entries_for_preformed_set_match_encoder() {
        let messages = vec![
            Message::new("a").with_timestamp(1),
            Message::new("b").with_timestamp(2),
        ];
        let (bytes, expected) = encode_message_set(5, 99, &messages);

        let entries = entries_for_message_set(99, &bytes).unwrap();
        assert_eq!(entries, expected);
    }

    #[test]
    fn flipped_bit_is_detected() {
        let (mut bytes, _) = encode_message_set(0, 0, &[Message::new("abc").with_timestamp(1)]);
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x40;

        let err = entries_for_message_set(0, &bytes).unwrap_err();
        assert!(matches!(err, Error::CorruptFormat { .. }), "got: {err}");
    }

    #[test]
    fn truncated_set_is_rejected() {
        let (bytes, _) = encode_message_set(0, 0, &[Message::new("abcdef").with_timestamp(1)]);

        for cut in 1..bytes.len() {
            let err = entries_for_message_set(0, &bytes[..cut]).unwrap_err();
            assert!(matches!(err, Error::CorruptFormat { .. }), "cut={cut}");
        }
    }

    #[test]
    fn torn_tail_is_distinguished_from_eof() {
        let (bytes, _) = encode_message_set(0, 0, &[Message::new("abcdef").with_timestamp(1)]);

        let mut reader = &bytes[..bytes.len() - 3];
        // First read consumes the intact prefix bytes of the record.
        assert!(matches!(
            read_message_from(&mut reader).unwrap(),
            ReadOutcome::Torn
        ));

        let mut reader = &bytes[..];
        assert!(matches!(
            read_message_from(&mut reader).unwrap(),
            ReadOutcome::Message(..)
        ));
        assert!(matches!(
            read_message_from(&mut reader).unwrap(),
            ReadOutcome::Eof
        ));
    }

    fn any_message() -> impl Strategy<Value = Message> {
        (
            any::<i64>(),
            proptest::option::of(proptest::collection::vec(any::<u8>(), 0..64)),
            proptest::collection::vec(any::<u8>(), 0..256),
        )
            .prop_map(|(timestamp, key, value)| Message {
                timestamp,
                key,
                value,
            })
    }

    proptest! {
        #[test]
        fn arbitrary_messages_roundtrip(
            messages in proptest::collection::vec(any_message(), 1..8),
            base_offset in 0i64..1_000_000,
        ) {
            let (bytes, entries) = encode_message_set(base_offset, 0, &messages);
            let decoded = decode_all(&bytes);

            prop_assert_eq!(decoded.len(), messages.len());
            for (i, (message, decoded)) in messages.iter().zip(&decoded).enumerate() {
                prop_assert_eq!(decoded.offset, base_offset + i as i64);
                prop_assert_eq!(decoded.timestamp, message.timestamp);
                prop_assert_eq!(&decoded.key, &message.key);
                prop_assert_eq!(&decoded.value, &message.value);
            }
            prop_assert_eq!(entries.len(), messages.len());
        }
    }
}
