use bytes::Bytes;

#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// What one framed line contributes to the current event.
#[derive(Debug, PartialEq, Eq)]
enum SseLine<'a> {
    /// Empty line: the event boundary.
    Blank,
    /// Leading-colon comment (keep-alives); carries nothing.
    Comment,
    /// `name[: value]`. A bare field name counts as an empty value.
    Field { name: &'a str, value: &'a str },
}

fn classify(line: &str) -> SseLine<'_> {
    if line.is_empty() {
        return SseLine::Blank;
    }
    if line.starts_with(':') {
        return SseLine::Comment;
    }
    match line.split_once(':') {
        Some((name, value)) => SseLine::Field {
            name,
            value: value.trim_start(),
        },
        None => SseLine::Field {
            name: line,
            value: "",
        },
    }
}

/// Incremental SSE parser with byte-level carry-over.
///
/// Lines are delimited by `\n`; a trailing partial line (and a trailing
/// partial UTF-8 sequence) is preserved across `push_bytes` calls.
#[derive(Debug, Default)]
pub struct SseParser {
    carry: Vec<u8>,
    buffer: String,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<SseEvent> {
        let text = if self.carry.is_empty() {
            match std::str::from_utf8(chunk) {
                Ok(text) => text.to_string(),
                Err(err) => self.split_valid(chunk, err.valid_up_to()),
            }
        } else {
            self.carry.extend_from_slice(chunk);
            let bytes = std::mem::take(&mut self.carry);
            match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(err) => {
                    let valid = err.utf8_error().valid_up_to();
                    let bytes = err.into_bytes();
                    self.carry = bytes[valid..].to_vec();
                    String::from_utf8_lossy(&bytes[..valid]).into_owned()
                }
            }
        };
        self.push_str(&text)
    }

    fn split_valid(&mut self, chunk: &Bytes, valid: usize) -> String {
        self.carry = chunk[valid..].to_vec();
        String::from_utf8_lossy(&chunk[..valid]).into_owned()
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();
        while let Some(line) = self.next_line() {
            self.apply_line(&line, &mut events);
        }
        events
    }

    /// Pop one complete line off the buffer, minus its `\n` / `\r\n`.
    fn next_line(&mut self) -> Option<String> {
        let newline = self.buffer.find('\n')?;
        let mut line: String = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    fn apply_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        match classify(line) {
            SseLine::Blank => self.finish_event(events),
            SseLine::Comment => {}
            SseLine::Field {
                name: "data",
                value,
            } => self.data_lines.push(value.to_string()),
            SseLine::Field {
                name: "event",
                value,
            } => {
                self.event = (!value.is_empty()).then(|| value.to_string());
            }
            // Unknown fields (id, retry, vendor extensions) are dropped.
            SseLine::Field { .. } => {}
        }
    }

    /// Flush any buffered partial event at end-of-stream.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let mut line = std::mem::take(&mut self.buffer);
            if line.ends_with('\r') {
                line.pop();
            }
            self.apply_line(&line, &mut events);
        }
        self.finish_event(&mut events);
        events
    }

    fn finish_event(&mut self, events: &mut Vec<SseEvent>) {
        if self.event.is_none() && self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        events.push(SseEvent {
            event: self.event.take(),
            data,
        });
        self.data_lines.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_split_frames() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: {\"a\":").is_empty());
        let events = parser.push_str("1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn carries_partial_utf8_across_chunks() {
        let mut parser = SseParser::new();
        let text = "data: héllo\n\n".as_bytes();
        let split = 8; // inside the two-byte é
        assert!(parser.push_bytes(&Bytes::copy_from_slice(&text[..split])).is_empty());
        let events = parser.push_bytes(&Bytes::copy_from_slice(&text[split..]));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "héllo");
    }

    #[test]
    fn named_events_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.push_str(": keep-alive\nevent: message_start\ndata: {}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{}");
    }

    #[test]
    fn unnormalized_data_prefix() {
        let mut parser = SseParser::new();
        let events = parser.push_str("data:{\"x\":1}\n\n");
        assert_eq!(events[0].data, "{\"x\":1}");
    }

    #[test]
    fn bare_field_names_count_as_empty_values() {
        let mut parser = SseParser::new();
        let events = parser.push_str("event: ping\nevent\ndata\n\n");
        assert_eq!(events.len(), 1);
        // The bare `event` line reset the name; the bare `data` line is an
        // empty payload line.
        assert!(events[0].event.is_none());
        assert_eq!(events[0].data, "");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let mut parser = SseParser::new();
        let events = parser.push_str("id: 7\nretry: 100\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn finish_flushes_trailing_line() {
        let mut parser = SseParser::new();
        assert!(parser.push_str("data: [DONE]").is_empty());
        let events = parser.finish();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "[DONE]");
    }
}
