//! Server-sent event decoding.
//!
//! Providers stream responses either as SSE (`event:`/`data:` blocks separated
//! by blank lines) or as newline-delimited JSON. Both reduce to the same shape
//! here: a lazy sequence of [`SseFrame`]s. Frame payloads split across network
//! chunks are reassembled by the line codec; interpretation of the payload is
//! the normalizer's job.

use crate::types::{PrismError, Result};
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing_error::SpanTrace;

/// Hard cap on a single line, shared with the line codec. Tool-call argument
/// deltas can get long but a megabyte means the upstream is misbehaving.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Upper bound on lines per response, as a runaway-stream guard.
const MAX_STREAM_LINES: usize = 200_000;

/// One decoded frame: the optional `event:` field and the concatenated
/// `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental line-oriented SSE parser. Feed lines in order; a completed
/// frame is returned when its terminating blank line (or a bare NDJSON line)
/// arrives.
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&mut self, line: &str) -> Option<SseFrame> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.flush();
        }

        // Comment line per the SSE spec.
        if line.starts_with(':') {
            return None;
        }

        if let Some(rest) = line.strip_prefix("event:") {
            self.event = Some(rest.trim_start().to_string());
            return None;
        }

        if let Some(rest) = line.strip_prefix("data:") {
            self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            return None;
        }

        // NDJSON style: the whole line is the payload and there is no
        // terminating blank line.
        if self.data.is_empty() && self.event.is_none() {
            return Some(SseFrame {
                event: None,
                data: line.to_string(),
            });
        }

        // Unknown field inside a frame, ignore it.
        None
    }

    /// Emits the frame under construction, if any. Called on blank lines and
    /// once more at end of stream so a missing final blank line loses nothing.
    pub fn flush(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() && self.event.is_none() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(frame)
    }
}

/// Async frame reader over a streaming HTTP response body.
pub struct SseReader {
    lines: FramedRead<StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>, LinesCodec>,
    parser: SseParser,
    lines_seen: usize,
    done: bool,
}

impl SseReader {
    pub fn new(response: reqwest::Response) -> Self {
        Self::from_stream(
            response
                .bytes_stream()
                .map_err(std::io::Error::other)
                .boxed(),
        )
    }

    /// Reader over a raw byte stream, for sources other than a live HTTP
    /// response.
    pub fn from_stream(bytes: BoxStream<'static, std::io::Result<Bytes>>) -> Self {
        let reader = StreamReader::new(bytes);
        Self {
            lines: FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
            parser: SseParser::new(),
            lines_seen: 0,
            done: false,
        }
    }

    /// Next complete frame, or `None` at clean end of stream. No terminating
    /// sentinel is required; EOF flushes whatever frame was in progress.
    pub async fn next_frame(&mut self) -> Result<Option<SseFrame>> {
        if self.done {
            return Ok(None);
        }

        while let Some(line) = self.lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    self.done = true;
                    return Err(PrismError::Api(format!("stream read failed: {e}")).into());
                }
            };

            self.lines_seen += 1;
            if self.lines_seen > MAX_STREAM_LINES {
                self.done = true;
                return Err(PrismError::Internal(
                    "stream exceeded line limit".to_string(),
                    SpanTrace::capture(),
                )
                .into());
            }

            if let Some(frame) = self.parser.push_line(&line) {
                return Ok(Some(frame));
            }
        }

        self.done = true;
        Ok(self.parser.flush())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(lines: &[&str]) -> Vec<SseFrame> {
        let mut parser = SseParser::new();
        let mut frames = Vec::new();
        for line in lines {
            if let Some(frame) = parser.push_line(line) {
                frames.push(frame);
            }
        }
        if let Some(frame) = parser.flush() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn plain_data_frames() {
        let frames = collect(&["data: {\"a\":1}", "", "data: {\"b\":2}", ""]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert_eq!(frames[1].data, "{\"b\":2}");
        assert!(frames[0].event.is_none());
    }

    #[test]
    fn event_field_is_carried() {
        let frames = collect(&[
            "event: message_start",
            "data: {\"type\":\"message_start\"}",
            "",
        ]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("message_start"));
    }

    #[test]
    fn multi_line_data_is_joined() {
        let frames = collect(&["data: line one", "data: line two", ""]);
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn ndjson_lines_are_frames() {
        let frames = collect(&["{\"event_type\":\"text-generation\"}"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "{\"event_type\":\"text-generation\"}");
    }

    #[test]
    fn missing_final_blank_line_still_flushes() {
        let frames = collect(&["data: tail"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "tail");
    }

    #[test]
    fn comments_and_crlf_are_handled() {
        let frames = collect(&[": keep-alive", "data: x\r", "\r"]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
    }

    #[tokio::test]
    async fn runaway_streams_are_cut_off() {
        let chunk = Bytes::from_static(b"data: x\n\ndata: y\n\n");
        let stream = futures_util::stream::iter(std::iter::repeat(chunk).take(60_000).map(Ok));
        let mut reader = SseReader::from_stream(stream.boxed());

        let err = loop {
            match reader.next_frame().await {
                Ok(Some(_)) => {}
                Ok(None) => panic!("line guard never fired"),
                Err(e) => break e,
            }
        };
        assert!(matches!(err.inner, PrismError::Internal(..)));

        // The reader stays closed afterwards.
        assert!(reader.next_frame().await.unwrap().is_none());
    }
}
