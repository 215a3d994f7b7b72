//! Incremental decoder for `text/event-stream` bodies.
//!
//! Only `data:` fields are of interest. Network chunks can split a line, or
//! a multi-byte character, anywhere, so bytes are buffered until a newline
//! arrives.

const DONE: &str = "[DONE]";

/// Payloads decoded from one push, and whether the terminal `[DONE]` was seen.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    pub events: Vec<String>,
    pub done: bool,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    /// Feed raw body bytes. Lines after `[DONE]` are dropped.
    pub fn push(&mut self, bytes: &[u8]) -> Decoded {
        self.pending.extend_from_slice(bytes);
        let mut decoded = Decoded::default();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.take_line(&line, &mut decoded);
        }

        decoded.done = self.done;
        decoded
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> Decoded {
        let mut decoded = Decoded::default();
        let rest = std::mem::take(&mut self.pending);
        if !rest.is_empty() {
            self.take_line(&rest, &mut decoded);
        }
        decoded.done = self.done;
        decoded
    }

    fn take_line(&mut self, line: &[u8], decoded: &mut Decoded) {
        if self.done {
            return;
        }
        let line = String::from_utf8_lossy(line);
        let Some(data) = line.trim_end_matches(['\r', '\n']).strip_prefix("data:") else {
            return;
        };
        let data = data.trim();
        if data == DONE {
            self.done = true;
        } else if !data.is_empty() {
            decoded.events.push(data.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_events_across_chunks() {
        let mut dec = SseDecoder::default();
        let first = dec.push(b"data: {\"a\":1}\n\ndata: {\"b\"");
        assert_eq!(first.events, vec![r#"{"a":1}"#]);
        assert!(!first.done);

        let second = dec.push(b":2}\n\ndata: [DONE]\n\n");
        assert_eq!(second.events, vec![r#"{"b":2}"#]);
        assert!(second.done);
    }

    #[test]
    fn ignores_comments_and_other_fields() {
        let mut dec = SseDecoder::default();
        let out = dec.push(b": keep-alive\nevent: message\nid: 3\ndata: x\r\n\r\n");
        assert_eq!(out.events, vec!["x"]);
    }

    #[test]
    fn multibyte_character_split_between_chunks() {
        let mut dec = SseDecoder::default();
        let bytes = "data: caf\u{e9}\n".as_bytes();
        let (head, tail) = bytes.split_at(bytes.len() - 2);
        assert!(dec.push(head).events.is_empty());
        assert_eq!(dec.push(tail).events, vec!["caf\u{e9}"]);
    }

    #[test]
    fn finish_flushes_unterminated_line() {
        let mut dec = SseDecoder::default();
        assert!(dec.push(b"data: [DONE]").events.is_empty());
        let tail = dec.finish();
        assert!(tail.done);
        assert!(tail.events.is_empty());
    }

    #[test]
    fn events_after_done_are_dropped() {
        let mut dec = SseDecoder::default();
        let out = dec.push(b"data: [DONE]\n\ndata: late\n\n");
        assert!(out.done);
        assert!(out.events.is_empty());
    }
}
