//! Server-Sent Events stream parser.
//!
//! Wire format consumed:
//! - frames are separated by a blank line (`\n\n`), lines by `\n`
//! - `event: <name>` sets the frame's event (default `message`; `done` terminates)
//! - `data: <json>` lines are trimmed and concatenated with no separator
//! - lines starting with `:` are comments; `id:`, `retry:` and unknown lines are ignored
//!
//! # Module structure
//! - `decoder` - incremental UTF-8 decoding across reads
//! - `frame` - line classification and frame extraction
//! - `parser` - the read loop (`parse_stream`) and its lazy form (`event_stream`)

mod decoder;
mod frame;
mod parser;

pub use decoder::Utf8Decoder;
pub use frame::{DEFAULT_EVENT, DONE_EVENT, Frame, SseLine, classify_line, take_frame};
pub use parser::{
    Flow, ParseOutcome, ParseState, ParseStats, decode_delta, event_stream, parse_stream,
};
