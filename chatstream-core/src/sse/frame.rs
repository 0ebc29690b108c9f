/// Event name used when a frame has no `event:` line.
pub const DEFAULT_EVENT: &str = "message";
/// Reserved event name that terminates the stream.
pub const DONE_EVENT: &str = "done";
/// Blank-line boundary between frames.
pub const FRAME_SEPARATOR: &str = "\n\n";

/// One line of a frame, classified by prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLine<'a> {
    Empty,
    Event(&'a str),
    Data(&'a str),
    Comment(&'a str),
    /// `id:`, `retry:` and anything unrecognised.
    Ignored(&'a str),
}

/// Classify a single line. Surrounding whitespace is not significant.
pub fn classify_line(line: &str) -> SseLine<'_> {
    let line = line.trim();
    if line.is_empty() {
        return SseLine::Empty;
    }
    if let Some(rest) = line.strip_prefix("event:") {
        return SseLine::Event(rest.trim());
    }
    if let Some(rest) = line.strip_prefix("data:") {
        return SseLine::Data(rest.trim());
    }
    if let Some(rest) = line.strip_prefix(':') {
        return SseLine::Comment(rest.trim());
    }
    SseLine::Ignored(line)
}

/// A complete event block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    /// All `data:` contents concatenated with no separator.
    pub data: String,
}

impl Frame {
    pub fn parse(block: &str) -> Self {
        let mut event = DEFAULT_EVENT.to_string();
        let mut data = String::new();
        for line in block.split('\n') {
            match classify_line(line) {
                SseLine::Event(name) => event = name.to_string(),
                SseLine::Data(chunk) => data.push_str(chunk),
                SseLine::Empty | SseLine::Comment(_) | SseLine::Ignored(_) => {}
            }
        }
        Self { event, data }
    }

    pub fn is_done(&self) -> bool {
        self.event == DONE_EVENT
    }
}

/// Remove and return the first complete frame from `buffer`, if any.
/// The trailing incomplete frame stays in place.
pub fn take_frame(buffer: &mut String) -> Option<String> {
    let idx = buffer.find(FRAME_SEPARATOR)?;
    let block = buffer[..idx].to_string();
    buffer.drain(..idx + FRAME_SEPARATOR.len());
    Some(block)
}
