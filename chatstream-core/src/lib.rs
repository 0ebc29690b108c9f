//! Client-side streaming for agent chat: an incremental SSE parser, a paced
//! typewriter display, and the conversation state a reply is folded into.

pub mod chat;
pub mod config;
pub mod conversation;
pub mod display;
pub mod error;
pub mod http_client;
pub mod model;
pub mod source;
pub mod sse;
pub mod stream;
pub mod telemetry;
