//! Message framer for byte-stream channels.
//!
//! Channels whose socket does not preserve record boundaries deliver JSON
//! objects back to back, split at arbitrary points. The framer accumulates
//! those bytes in a `bytes::BytesMut` and extracts complete top-level
//! objects by scanning brace depth, suppressing depth changes inside quoted
//! strings and treating a backslash as escaping the following character.
//!
//! A span that balances but fails to decode is discarded with a diagnostic
//! so one garbled frame never stalls the buffer; an incomplete tail stays
//! buffered until more data arrives.
//!
//! # Example
//!
//! ```
//! use admwire::protocol::MessageFramer;
//!
//! let mut framer = MessageFramer::new();
//!
//! // Data arrives in chunks from the socket
//! let values = framer.push(br#"{"a":1}{"b":"#);
//! assert_eq!(values.len(), 1);
//!
//! let values = framer.push(b"2}");
//! assert_eq!(values.len(), 1);
//! assert!(framer.is_empty());
//! ```

use bytes::BytesMut;
use serde_json::Value;

/// Scanner position within the current (possibly incomplete) object.
#[derive(Debug, Clone, Copy)]
struct Scan {
    /// Next byte index to examine.
    pos: usize,
    /// Index of the current object's opening brace, if one was seen.
    start: Option<usize>,
    /// Current brace depth (0 = between objects).
    depth: usize,
    /// Inside a quoted string.
    in_string: bool,
    /// Previous byte was an unconsumed backslash.
    escaped: bool,
}

impl Scan {
    const fn reset() -> Self {
        Self {
            pos: 0,
            start: None,
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }
}

/// Buffer for accumulating undelimited bytes and extracting complete
/// top-level JSON objects.
///
/// Scan state persists across [`push`](Self::push) calls, so feeding the
/// stream one byte at a time costs the same as feeding it in bulk.
pub struct MessageFramer {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Persistent scan state.
    scan: Scan,
}

impl MessageFramer {
    /// Create a new framer with a 64KB initial buffer.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            scan: Scan::reset(),
        }
    }

    /// Push data into the buffer and extract all complete objects.
    ///
    /// Returns the decoded objects in stream order (may be empty if the
    /// buffer still ends mid-object). Garbled spans are dropped with a
    /// warning rather than returned as errors.
    pub fn push(&mut self, data: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(data);

        let mut values = Vec::new();
        while let Some(value) = self.try_extract_one() {
            values.push(value);
        }
        values
    }

    /// Try to extract a single object from the buffer.
    ///
    /// Returns `None` when the buffer is exhausted before an object
    /// completes; the partial tail is left in place for the next push.
    fn try_extract_one(&mut self) -> Option<Value> {
        while self.scan.pos < self.buffer.len() {
            let byte = self.buffer[self.scan.pos];

            if self.scan.start.is_none() {
                // Between objects: resync on the next opening brace.
                if byte == b'{' {
                    self.scan.start = Some(self.scan.pos);
                    self.scan.depth = 1;
                } else if !byte.is_ascii_whitespace() {
                    tracing::debug!(byte, "skipping stray byte between frames");
                }
                self.scan.pos += 1;
                continue;
            }

            if self.scan.escaped {
                self.scan.escaped = false;
            } else if self.scan.in_string {
                match byte {
                    b'\\' => self.scan.escaped = true,
                    b'"' => self.scan.in_string = false,
                    _ => {}
                }
            } else {
                match byte {
                    b'"' => self.scan.in_string = true,
                    b'{' => self.scan.depth += 1,
                    b'}' => {
                        self.scan.depth -= 1;
                        if self.scan.depth == 0 {
                            let start = self.scan.start.expect("object start recorded");
                            let end = self.scan.pos + 1;
                            let decoded = serde_json::from_slice(&self.buffer[start..end]);

                            let _ = self.buffer.split_to(end);
                            self.scan = Scan::reset();

                            match decoded {
                                Ok(value) => return Some(value),
                                Err(e) => {
                                    tracing::warn!("discarding undecodable frame: {}", e);
                                    continue;
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
            self.scan.pos += 1;
        }

        // Nothing but garbage before any object start: drop it.
        if self.scan.start.is_none() && !self.buffer.is_empty() {
            self.buffer.clear();
            self.scan = Scan::reset();
        }
        None
    }

    /// Number of buffered bytes not yet framed.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset scan state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scan = Scan::reset();
    }
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_complete_object() {
        let mut framer = MessageFramer::new();
        let values = framer.push(br#"{"command":"info","transaction":"t1"}"#);

        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["command"], "info");
        assert!(framer.is_empty());
    }

    #[test]
    fn test_multiple_objects_in_one_push() {
        let mut framer = MessageFramer::new();
        let values = framer.push(br#"{"a":1}{"b":2}{"c":3}"#);

        assert_eq!(values.len(), 3);
        assert_eq!(values[0], json!({"a": 1}));
        assert_eq!(values[1], json!({"b": 2}));
        assert_eq!(values[2], json!({"c": 3}));
        assert!(framer.is_empty());
    }

    #[test]
    fn test_split_mid_object() {
        let mut framer = MessageFramer::new();

        let values = framer.push(br#"{"command":"in"#);
        assert!(values.is_empty());
        assert!(!framer.is_empty());

        let values = framer.push(br#"fo","id":7}"#);
        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["id"], 7);
        assert!(framer.is_empty());
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut framer = MessageFramer::new();
        let data = br#"{"transaction":"t1","ok":true}"#;

        let mut all = Vec::new();
        for byte in data {
            all.extend(framer.push(&[*byte]));
        }

        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["transaction"], "t1");
    }

    #[test]
    fn test_braces_inside_strings() {
        let mut framer = MessageFramer::new();
        let values = framer.push(br#"{"value":"{}"}"#);

        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["value"], "{}");
        assert!(framer.is_empty());
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let mut framer = MessageFramer::new();
        let values = framer.push(br#"{"value":"a \"{\" b"}{"next":1}"#);

        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["value"], r#"a "{" b"#);
        assert_eq!(values[1]["next"], 1);
    }

    #[test]
    fn test_escaped_backslash_before_closing_quote() {
        // The backslash escapes itself, so the quote after it ends the string.
        let mut framer = MessageFramer::new();
        let values = framer.push(br#"{"path":"C:\\"}"#);

        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["path"], r"C:\");
    }

    #[test]
    fn test_whitespace_between_objects() {
        let mut framer = MessageFramer::new();
        let values = framer.push(b"{\"a\":1}\n  {\"b\":2}\r\n{\"c\":3}");

        assert_eq!(values.len(), 3);
        assert!(framer.is_empty());
    }

    #[test]
    fn test_stray_bytes_before_object_are_skipped() {
        let mut framer = MessageFramer::new();
        let values = framer.push(br#"xx{"a":1}"#);

        assert_eq!(values.len(), 1);
        assert_eq!(values[0], json!({"a": 1}));
    }

    #[test]
    fn test_garbage_only_buffer_is_dropped() {
        let mut framer = MessageFramer::new();
        let values = framer.push(b"garbage without any object");

        assert!(values.is_empty());
        assert!(framer.is_empty());
    }

    #[test]
    fn test_undecodable_span_is_discarded() {
        let mut framer = MessageFramer::new();
        // Balanced braces but invalid JSON, followed by a valid object.
        let values = framer.push(br#"{bogus}{"ok":true}"#);

        assert_eq!(values.len(), 1);
        assert_eq!(values[0], json!({"ok": true}));
        assert!(framer.is_empty());
    }

    #[test]
    fn test_incomplete_tail_survives_many_pushes() {
        let mut framer = MessageFramer::new();

        assert!(framer.push(br#"{"deep":{"nested":"#).is_empty());
        assert!(framer.push(br#"{"value":"#).is_empty());
        let values = framer.push(br#""x"}}}"#);

        assert_eq!(values.len(), 1);
        assert_eq!(values[0], json!({"deep": {"nested": {"value": "x"}}}));
    }

    #[test]
    fn test_nested_objects_counted_once() {
        let mut framer = MessageFramer::new();
        let values = framer.push(br#"{"outer":{"inner":{"x":1}}}{"y":2}"#);

        assert_eq!(values.len(), 2);
        assert_eq!(values[0]["outer"]["inner"]["x"], 1);
    }

    #[test]
    fn test_multibyte_utf8_content() {
        let mut framer = MessageFramer::new();
        let data = r#"{"name":"日本語 {braces} ok"}"#.as_bytes();

        // Split inside the multi-byte sequence.
        let values = framer.push(&data[..12]);
        assert!(values.is_empty());
        let values = framer.push(&data[12..]);

        assert_eq!(values.len(), 1);
        assert_eq!(values[0]["name"], "日本語 {braces} ok");
    }

    #[test]
    fn test_clear_resets_state() {
        let mut framer = MessageFramer::new();
        framer.push(br#"{"partial":"#);
        assert!(!framer.is_empty());

        framer.clear();
        assert!(framer.is_empty());

        let values = framer.push(br#"{"fresh":1}"#);
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_concatenation_order_preserved() {
        let mut framer = MessageFramer::new();
        let mut data = Vec::new();
        for i in 0..10 {
            data.extend_from_slice(json!({"seq": i}).to_string().as_bytes());
        }

        // Feed in uneven chunks.
        let mut all = Vec::new();
        for chunk in data.chunks(7) {
            all.extend(framer.push(chunk));
        }

        assert_eq!(all.len(), 10);
        for (i, value) in all.iter().enumerate() {
            assert_eq!(value["seq"], i as u64);
        }
    }
}
