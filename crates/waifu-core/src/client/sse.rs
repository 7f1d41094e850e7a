//! `/chat` response frames and the SSE decoder that produces them.

use std::pin::Pin;
use std::task::{Context, Poll};

use eventsource_stream::{EventStream, EventStreamError, Eventsource};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::Value;

use super::shared::{ClientError, ClientErrorKind, ClientResult};

/// Tool whose finished result carries a new user name and relation.
pub const UPDATE_USERINFO_TOOL: &str = "update_userinfo";

/// One decoded `/chat` frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatFrame {
    pub context_id: Option<String>,
    pub kind: FrameKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Start,
    Chunk(ChunkFrame),
    ToolCall(ToolCallFrame),
    /// Server-side failure; the text is what the user should see.
    Error(String),
    Final,
    /// Frame types this client has no use for.
    Other(String),
}

/// One sentence of the reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChunkFrame {
    pub text: Option<String>,
    pub voice_text: Option<String>,
    pub language: Option<String>,
    pub face_name: Option<String>,
}

/// Progress of a server-side tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallFrame {
    pub name: String,
    /// Present once the tool finished with a non-empty result.
    pub data: Option<Value>,
}

impl ToolCallFrame {
    pub fn is_finished(&self) -> bool {
        self.data.is_some()
    }

    /// New `(user_name, relation)` when this is a finished `update_userinfo` call.
    pub fn profile_update(&self) -> Option<(Option<String>, Option<String>)> {
        if self.name != UPDATE_USERINFO_TOOL {
            return None;
        }
        let data = self.data.as_ref()?;
        let field = |key: &str| {
            data.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        Some((field("username"), field("relation")))
    }
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: String,
    context_id: Option<String>,
    text: Option<String>,
    voice_text: Option<String>,
    language: Option<String>,
    avatar_control_request: Option<RawAvatarControl>,
    metadata: Option<Value>,
}

#[derive(Deserialize)]
struct RawAvatarControl {
    face_name: Option<String>,
}

/// Empty strings, empty containers, zero, false and null count as "no data".
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Decodes the JSON payload of one `data:` line.
///
/// # Errors
/// Returns a `Parse` error for invalid JSON or a `tool_call` frame without a
/// tool name.
pub fn parse_frame(data: &str) -> ClientResult<ChatFrame> {
    let raw: RawFrame = serde_json::from_str(data.trim())
        .map_err(|err| ClientError::parse(format!("Failed to parse chat frame: {err}")))?;
    let context_id = raw.context_id.filter(|id| !id.is_empty());

    let kind = match raw.frame_type.as_str() {
        "start" => FrameKind::Start,
        "chunk" => FrameKind::Chunk(ChunkFrame {
            text: raw.text,
            voice_text: raw.voice_text,
            language: raw.language,
            face_name: raw.avatar_control_request.and_then(|a| a.face_name),
        }),
        "tool_call" => {
            let tool_call = raw.metadata.as_ref().and_then(|m| m.get("tool_call"));
            let name = tool_call
                .and_then(|t| t.get("name"))
                .and_then(Value::as_str)
                .ok_or_else(|| ClientError::parse("tool_call frame without a tool name"))?;
            let data = tool_call
                .and_then(|t| t.get("result"))
                .and_then(|r| r.get("data"))
                .filter(|d| is_truthy(d))
                .cloned();
            FrameKind::ToolCall(ToolCallFrame {
                name: name.to_string(),
                data,
            })
        }
        "error" => {
            let from_metadata = raw
                .metadata
                .as_ref()
                .and_then(|m| m.get("error"))
                .and_then(|e| match e {
                    Value::String(s) => Some(s.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                });
            let message = from_metadata
                .or(raw.text)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "The server failed to respond".to_string());
            FrameKind::Error(message)
        }
        "final" => FrameKind::Final,
        other => FrameKind::Other(other.to_string()),
    };

    Ok(ChatFrame { context_id, kind })
}

/// Turns a response byte stream into decoded chat frames.
///
/// Keep-alive events and events with an empty payload are skipped.
pub struct FrameParser<S> {
    inner: EventStream<S>,
}

impl<S> FrameParser<S> {
    pub fn new(stream: S) -> Self
    where
        S: Eventsource,
    {
        Self {
            inner: stream.eventsource(),
        }
    }
}

impl<S, E> Stream for FrameParser<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ClientResult<ChatFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    let named = !event.event.is_empty() && event.event != "message";
                    if named || event.data.trim().is_empty() {
                        continue;
                    }
                    return Poll::Ready(Some(parse_frame(&event.data)));
                }
                Poll::Ready(Some(Err(EventStreamError::Transport(e)))) => {
                    return Poll::Ready(Some(Err(ClientError::new(
                        ClientErrorKind::Connection,
                        format!("Chat stream broke: {e}"),
                    ))));
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(ClientError::parse(format!(
                        "SSE stream error: {e}"
                    )))));
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};

    use super::*;

    async fn frames(body: &'static str) -> Vec<ClientResult<ChatFrame>> {
        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> =
            vec![Ok(bytes::Bytes::from_static(body.as_bytes()))];
        FrameParser::new(stream::iter(chunks)).collect().await
    }

    #[test]
    fn test_parse_chunk_with_face() {
        let frame = parse_frame(
            r#"{"type":"chunk","context_id":"ctx_1","text":"[face:joy]Hi!","voice_text":"Hi!","language":"en","avatar_control_request":{"face_name":"Joy","face_duration":4.0}}"#,
        )
        .unwrap();
        assert_eq!(frame.context_id.as_deref(), Some("ctx_1"));
        assert_eq!(
            frame.kind,
            FrameKind::Chunk(ChunkFrame {
                text: Some("[face:joy]Hi!".to_string()),
                voice_text: Some("Hi!".to_string()),
                language: Some("en".to_string()),
                face_name: Some("Joy".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_tool_call_progress_and_result() {
        let running = parse_frame(
            r#"{"type":"tool_call","metadata":{"tool_call":{"name":"search_memory","result":{"data":null}}}}"#,
        )
        .unwrap();
        let FrameKind::ToolCall(call) = running.kind else {
            panic!("expected tool call");
        };
        assert!(!call.is_finished());
        assert_eq!(call.profile_update(), None);

        let done = parse_frame(
            r#"{"type":"tool_call","metadata":{"tool_call":{"name":"update_userinfo","result":{"data":{"username":"Alice","relation":""}}}}}"#,
        )
        .unwrap();
        let FrameKind::ToolCall(call) = done.kind else {
            panic!("expected tool call");
        };
        assert!(call.is_finished());
        assert_eq!(call.profile_update(), Some((Some("Alice".to_string()), None)));
    }

    #[test]
    fn test_parse_error_message_sources() {
        let frame = parse_frame(r#"{"type":"error","metadata":{"error":"LLM down"}}"#).unwrap();
        assert_eq!(frame.kind, FrameKind::Error("LLM down".to_string()));

        let frame = parse_frame(r#"{"type":"error","text":"oops"}"#).unwrap();
        assert_eq!(frame.kind, FrameKind::Error("oops".to_string()));

        let frame = parse_frame(r#"{"type":"error"}"#).unwrap();
        assert!(matches!(frame.kind, FrameKind::Error(_)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(
            parse_frame("{not json").unwrap_err().kind,
            ClientErrorKind::Parse
        );
        assert!(parse_frame(r#"{"type":"tool_call","metadata":{}}"#).is_err());
    }

    #[test]
    fn test_unknown_types_are_kept() {
        let frame = parse_frame(r#"{"type":"vision","context_id":""}"#).unwrap();
        assert_eq!(frame.kind, FrameKind::Other("vision".to_string()));
        assert_eq!(frame.context_id, None);
    }

    #[tokio::test]
    async fn test_frame_parser_decodes_stream() {
        let out = frames(
            "data: {\"type\":\"start\",\"context_id\":\"c\"}\n\n\
             : keep-alive\n\n\
             event: ping\ndata: 2024-01-01\n\n\
             data: {broken\n\n\
             data: {\"type\":\"final\"}\n\n",
        )
        .await;
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].as_ref().unwrap().kind, FrameKind::Start);
        assert!(out[1].is_err());
        assert_eq!(out[2].as_ref().unwrap().kind, FrameKind::Final);
    }
}
