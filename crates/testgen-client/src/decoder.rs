use std::collections::VecDeque;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::TransportError;
use crate::transport::ByteStream;

/// Blank line separating two records on the wire.
pub const RECORD_DELIMITER: &str = "\n\n";

/// Incremental text decoder that cuts a chunked byte stream into records.
///
/// Chunks may end in the middle of a UTF-8 sequence or in the middle of a
/// record; both are carried into the next `push_chunk` call. Invalid byte
/// sequences decode to U+FFFD rather than failing the stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    carry: Vec<u8>,
    buffer: String,
}

impl FrameDecoder {
    /// Feeds one chunk and returns every record it completed, in order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        // The residue holds no delimiter; only its tail can start one.
        let mut from = self.buffer.len().saturating_sub(RECORD_DELIMITER.len() - 1);
        while !self.buffer.is_char_boundary(from) {
            from -= 1;
        }
        self.decode(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(rel) = self.buffer[from..].find(RECORD_DELIMITER) {
            records.push(self.buffer[start..from + rel].to_owned());
            start = from + rel + RECORD_DELIMITER.len();
            from = start;
        }
        self.buffer.drain(..start);
        records
    }

    /// Returns whatever was still buffered when the stream ended.
    ///
    /// The backend always terminates records, so callers discard this.
    pub fn finish(&mut self) -> Option<String> {
        let mut rest = std::mem::take(&mut self.buffer);
        if !self.carry.is_empty() {
            rest.push_str(&String::from_utf8_lossy(&std::mem::take(&mut self.carry)));
        }
        (!rest.is_empty()).then_some(rest)
    }

    fn decode(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.carry);
        bytes.extend_from_slice(chunk);

        let mut input = bytes.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, rest) = input.split_at(err.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        // Truncated sequence: wait for the next chunk.
                        None => {
                            self.carry = rest.to_vec();
                            return;
                        }
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                    }
                }
            }
        }
    }
}

/// Turns a response body into a lazy stream of complete records.
///
/// A trailing partial record at end of stream is dropped.
pub fn record_stream(
    bytes: ByteStream,
) -> impl futures::Stream<Item = Result<String, TransportError>> + Send {
    struct State {
        bytes: ByteStream,
        decoder: FrameDecoder,
        pending: VecDeque<String>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes,
            decoder: FrameDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(record) = state.pending.pop_front() {
                    return Ok(Some((record, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.decoder.push_chunk(&chunk));
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        if let Some(rest) = state.decoder.finish() {
                            debug!(bytes = rest.len(), "discarding unterminated trailing record");
                        }
                        state.done = true;
                    }
                }
            }
        },
    )
}
