use crate::core::state::StreamEvent;
use anyhow::Result;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use log::{debug, warn};
use std::collections::VecDeque;

pub type ByteStream = BoxStream<'static, Result<Vec<u8>>>;

pub type EventStream = BoxStream<'static, Result<StreamEvent>>;

/// Incremental newline-delimited JSON decoder.
///
/// Chunks may split a record (or a UTF-8 sequence) at any byte. Complete
/// lines are parsed as they arrive; the trailing fragment waits for the next
/// chunk, or for [`StreamDecoder::finish`] when the stream ends without a
/// final newline. Malformed lines are logged and skipped.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    buffer: String,
    pending: Vec<u8>,
    malformed: usize,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.decode_utf8(chunk);

        let Some(last_newline) = self.buffer.rfind('\n') else {
            return Vec::new();
        };
        let remainder = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, remainder);

        complete
            .split('\n')
            .filter_map(|line| self.parse_record(line))
            .collect()
    }

    pub fn finish(&mut self) -> Option<StreamEvent> {
        if !self.pending.is_empty() {
            let tail = String::from_utf8_lossy(&self.pending).into_owned();
            self.buffer.push_str(&tail);
            self.pending.clear();
        }
        let rest = std::mem::take(&mut self.buffer);
        self.parse_record(&rest)
    }

    pub fn malformed(&self) -> usize {
        self.malformed
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(bad) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn parse_record(&mut self, line: &str) -> Option<StreamEvent> {
        let record = line.trim();
        if record.is_empty() {
            return None;
        }
        match serde_json::from_str::<StreamEvent>(record) {
            Ok(event) => Some(event),
            Err(e) => {
                self.malformed += 1;
                warn!("Dropping malformed stream record ({}): {}", e, record);
                None
            }
        }
    }
}

struct DecodeState {
    chunks: ByteStream,
    decoder: StreamDecoder,
    ready: VecDeque<StreamEvent>,
    finished: bool,
}

pub fn decode_stream(chunks: ByteStream) -> EventStream {
    let state = DecodeState {
        chunks,
        decoder: StreamDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.ready.pop_front() {
                return Some((Ok(event), state));
            }
            if state.finished {
                return None;
            }
            match state.chunks.next().await {
                Some(Ok(chunk)) => {
                    debug!("Stream chunk of {} bytes", chunk.len());
                    let events = state.decoder.push(&chunk);
                    state.ready.extend(events);
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
                None => {
                    state.finished = true;
                    let last = state.decoder.finish();
                    state.ready.extend(last);
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn status(s: &str) -> StreamEvent {
        StreamEvent {
            status: Some(s.to_string()),
            ..Default::default()
        }
    }

    fn byte_stream(chunks: Vec<Result<Vec<u8>>>) -> ByteStream {
        stream::iter(chunks).boxed()
    }

    #[test]
    fn test_record_split_across_chunks() {
        let mut decoder = StreamDecoder::new();
        let mut events = decoder.push(b"{\"status\":\"a\"}\n{\"status\":");
        events.extend(decoder.push(b"\"b\"}\n"));
        events.extend(decoder.finish());

        assert_eq!(events, vec![status("a"), status("b")]);
    }

    #[test]
    fn test_every_split_point_yields_same_events() {
        let body = b"{\"status\":\"a\"}\n{\"status\":\"b\"}\n";
        for split in 0..=body.len() {
            let mut decoder = StreamDecoder::new();
            let mut events = decoder.push(&body[..split]);
            events.extend(decoder.push(&body[split..]));
            events.extend(decoder.finish());
            assert_eq!(events, vec![status("a"), status("b")], "split at {}", split);
        }
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"{\"progress\":10}\n{\"progress\":20}\n{\"progress\":30}\n");

        let progress: Vec<Option<f64>> = events.iter().map(|e| e.progress).collect();
        assert_eq!(progress, vec![Some(10.0), Some(20.0), Some(30.0)]);
    }

    #[test]
    fn test_empty_chunk() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"").is_empty());
        assert!(decoder.push(b"{\"status\":\"a\"}").is_empty());
        assert!(decoder.push(b"").is_empty());
        assert_eq!(decoder.push(b"\n"), vec![status("a")]);
    }

    #[test]
    fn test_boundary_exactly_at_newline() {
        let mut decoder = StreamDecoder::new();
        assert_eq!(decoder.push(b"{\"status\":\"a\"}\n"), vec![status("a")]);
        assert_eq!(decoder.push(b"{\"status\":\"b\"}\n"), vec![status("b")]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_malformed_line_between_valid_lines() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"{\"status\":\"a\"}\n{not json\n{\"status\":\"b\"}\n");

        assert_eq!(events, vec![status("a"), status("b")]);
        assert_eq!(decoder.malformed(), 1);
    }

    #[test]
    fn test_malformed_trailing_line() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"{\"status\":\"a\"}\n{\"status\":");

        assert_eq!(events, vec![status("a")]);
        assert_eq!(decoder.finish(), None);
        assert_eq!(decoder.malformed(), 1);
    }

    #[test]
    fn test_final_record_without_newline() {
        let mut decoder = StreamDecoder::new();
        assert!(decoder.push(b"{\"complete\":true,\"path\":\"story.txt\"}").is_empty());

        let last = decoder.finish().unwrap();
        assert!(last.is_terminal());
        assert_eq!(last.path.as_deref(), Some("story.txt"));
    }

    #[test]
    fn test_blank_lines_and_crlf_are_ignored() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(b"\n\r\n  \n{\"status\":\"a\"}\r\n{}\n");

        assert_eq!(events, vec![status("a"), StreamEvent::default()]);
        assert_eq!(decoder.malformed(), 0);
    }

    #[test]
    fn test_utf8_sequence_split_across_chunks() {
        let body = "{\"status\":\"Écriture…\"}\n".as_bytes();
        // Split inside the two-byte "É".
        let split = body.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut decoder = StreamDecoder::new();
        let mut events = decoder.push(&body[..split]);
        events.extend(decoder.push(&body[split..]));

        assert_eq!(events, vec![status("Écriture…")]);
    }

    #[tokio::test]
    async fn test_decode_stream_is_ordered_and_flushes_tail() {
        let chunks = byte_stream(vec![
            Ok(b"{\"progress\":10}\n{\"prog".to_vec()),
            Ok(b"ress\":90}\n".to_vec()),
            Ok(Vec::new()),
            Ok(b"{\"complete\":true,\"path\":\"story.txt\"}".to_vec()),
        ]);

        let events: Vec<StreamEvent> = decode_stream(chunks)
            .map(|e| e.unwrap())
            .collect()
            .await;

        assert_eq!(events.len(), 3);
        assert_eq!(events[0].progress, Some(10.0));
        assert_eq!(events[1].progress, Some(90.0));
        assert!(events[2].is_terminal());
    }

    #[tokio::test]
    async fn test_decode_stream_surfaces_transport_error_once() {
        let chunks = byte_stream(vec![
            Ok(b"{\"status\":\"a\"}\n".to_vec()),
            Err(anyhow!("connection reset")),
            Ok(b"{\"status\":\"never\"}\n".to_vec()),
        ]);

        let items: Vec<Result<StreamEvent>> = decode_stream(chunks).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &status("a"));
        assert!(items[1].is_err());
    }
}
