//! Incremental server-sent events decoder
//!
//! Splits an arbitrary chunking of the byte stream into lines (`\n` or
//! `\r\n`), parses fields and assembles frames at blank lines. Comment lines
//! (`: heartbeat`) are dropped. A line longer than the decoder's limit is
//! rejected instead of being buffered without bound.

use thiserror::Error;

/// Default longest accepted line, terminator excluded
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Decoder failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SseError {
    #[error("SSE line exceeds {limit} bytes")]
    LineTooLong { limit: usize },
}

/// A field line of an SSE stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SseLine {
    Data(String),
    Event(String),
    Id(String),
    Retry(u64),
    Comment(String),
    Empty,
}

/// One dispatched SSE record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

fn field_value<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(name)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Parse one line (without its terminator).
pub fn parse_line(line: &str) -> SseLine {
    if line.is_empty() {
        return SseLine::Empty;
    }
    if let Some(comment) = line.strip_prefix(':') {
        return SseLine::Comment(comment.trim_start().to_string());
    }
    if let Some(data) = field_value(line, "data") {
        return SseLine::Data(data.to_string());
    }
    if let Some(event) = field_value(line, "event") {
        return SseLine::Event(event.to_string());
    }
    if let Some(id) = field_value(line, "id") {
        return SseLine::Id(id.to_string());
    }
    if let Some(retry) = field_value(line, "retry") {
        if let Ok(ms) = retry.trim().parse() {
            return SseLine::Retry(ms);
        }
    }
    // Unknown fields are ignored like comments
    SseLine::Comment(line.to_string())
}

#[derive(Default)]
struct FrameBuilder {
    data_lines: Vec<String>,
    event: Option<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl FrameBuilder {
    fn push(&mut self, line: SseLine) -> Option<SseFrame> {
        match line {
            SseLine::Data(data) => self.data_lines.push(data),
            SseLine::Event(event) => self.event = Some(event),
            SseLine::Id(id) => self.id = Some(id),
            SseLine::Retry(ms) => self.retry = Some(ms),
            SseLine::Comment(_) => {}
            SseLine::Empty => return self.take(),
        }
        None
    }

    fn take(&mut self) -> Option<SseFrame> {
        if self.data_lines.is_empty() && self.event.is_none() {
            self.id = None;
            self.retry = None;
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
            id: self.id.take(),
            retry: self.retry.take(),
        };
        self.data_lines.clear();
        Some(frame)
    }
}

/// Push-based decoder for a byte stream of SSE records.
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known to contain no `\n`
    scanned: usize,
    max_line: usize,
    builder: FrameBuilder,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line,
            builder: FrameBuilder::default(),
        }
    }

    /// Feed a chunk; returns every frame completed by it, in order.
    ///
    /// Fails once an unterminated line grows past the limit; the decoder is
    /// reset and the connection should be treated as corrupt.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, SseError> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start + self.scanned..]
            .iter()
            .position(|b| *b == b'\n')
        {
            let end = start + self.scanned + offset;
            self.scanned = 0;
            let mut line = &self.buffer[start..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            if line.len() > self.max_line {
                return Err(self.overflow());
            }
            let line = String::from_utf8_lossy(line);
            if let Some(frame) = self.builder.push(parse_line(&line)) {
                frames.push(frame);
            }
            start = end + 1;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        if self.buffer.len() > self.max_line {
            return Err(self.overflow());
        }
        Ok(frames)
    }

    fn overflow(&mut self) -> SseError {
        self.reset();
        SseError::LineTooLong { limit: self.max_line }
    }

    /// Flush a trailing record that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            self.scanned = 0;
            let line = String::from_utf8_lossy(&rest);
            self.builder.push(parse_line(line.trim_end_matches('\r')));
        }
        self.builder.take()
    }

    /// Drop any partial state, e.g. before reading a fresh connection.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.builder = FrameBuilder::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_fields() {
        assert_eq!(parse_line("data: {}"), SseLine::Data("{}".into()));
        assert_eq!(parse_line("data:{}"), SseLine::Data("{}".into()));
        assert_eq!(parse_line("event: complete"), SseLine::Event("complete".into()));
        assert_eq!(parse_line(": heartbeat"), SseLine::Comment("heartbeat".into()));
        assert_eq!(parse_line("retry: 3000"), SseLine::Retry(3000));
        assert_eq!(parse_line(""), SseLine::Empty);
    }

    #[test]
    fn test_decoder_handles_split_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: prog").unwrap().is_empty());
        assert!(decoder.push(b"ress\r\ndata: {\"attempt\":1}\r\n").unwrap().is_empty());
        let frames = decoder.push(b"\r\nevent: complete\ndata: {}\n\n").unwrap();

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event.as_deref(), Some("progress"));
        assert_eq!(frames[0].data, r#"{"attempt":1}"#);
        assert_eq!(frames[1].event.as_deref(), Some("complete"));
    }

    #[test]
    fn test_decoder_skips_heartbeats() {
        let mut decoder = SseDecoder::new();
        let frames = decoder
            .push(b": heartbeat\n\n: heartbeat\n\nevent: thinking\ndata: {}\n\n")
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("thinking"));
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.push(b"data: a\ndata: b\n\n").unwrap();
        assert_eq!(frames[0].data, "a\nb");
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn test_finish_flushes_trailing_record() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: error\ndata: {\"message\":\"x\"}").unwrap().is_empty());
        let frame = decoder.finish().unwrap();
        assert_eq!(frame.event.as_deref(), Some("error"));
        assert_eq!(frame.data, r#"{"message":"x"}"#);
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let text = "data: \"héllo\"\n\n".as_bytes();
        let split = text.iter().position(|b| *b == 0xc3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&text[..split]).unwrap().is_empty());
        let frames = decoder.push(&text[split..]).unwrap();
        assert_eq!(frames[0].data, "\"héllo\"");
    }

    #[test]
    fn test_unterminated_line_over_limit_rejected() {
        let mut decoder = SseDecoder::with_max_line(16);
        assert!(decoder.push(b"data: 0123").unwrap().is_empty());
        assert_eq!(
            decoder.push(b"456789abcdef"),
            Err(SseError::LineTooLong { limit: 16 })
        );

        // state was dropped, a well-formed record decodes afterwards
        let frames = decoder.push(b"event: done\ndata: {}\n\n").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event.as_deref(), Some("done"));
    }

    #[test]
    fn test_line_split_across_many_chunks_within_limit() {
        let mut decoder = SseDecoder::with_max_line(32);
        for byte in b"data: {\"n\":1}\r\n" {
            assert!(decoder.push(&[*byte]).unwrap().is_empty());
        }
        let frames = decoder.push(b"\n").unwrap();
        assert_eq!(frames[0].data, r#"{"n":1}"#);
    }
}
