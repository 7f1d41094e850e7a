//! HTTP client for the avatar server.
//!
//! Each endpoint decodes its response once, at this boundary, into typed
//! values; nothing downstream sees raw JSON.

pub mod bootstrap;
mod chat;
mod shared;
mod speech;
mod sse;

pub use bootstrap::{Persona, SessionInfo, UserProfile};
pub use chat::{ChatRequest, ChatTransport, FrameStream, HttpChatTransport};
pub use shared::{ApiClient, ClientError, ClientErrorKind, ClientResult, USER_AGENT};
pub use speech::{HttpSpeechSynthesizer, SpeechSynthesizer};
pub use sse::{
    ChatFrame, ChunkFrame, FrameKind, FrameParser, ToolCallFrame, UPDATE_USERINFO_TOOL,
    parse_frame,
};
