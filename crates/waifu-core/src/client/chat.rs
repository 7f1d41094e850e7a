use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reqwest::Method;
use serde::Serialize;
use tracing::debug;

use super::shared::{ApiClient, ClientResult};
use super::sse::{ChatFrame, FrameParser};

/// Decoded frames of one `/chat` response.
pub type FrameStream = BoxStream<'static, ClientResult<ChatFrame>>;

/// Body of `POST /chat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    #[serde(rename = "type")]
    pub request_type: &'static str,
    pub session_id: String,
    pub user_id: Option<String>,
    pub context_id: Option<String>,
    pub text: String,
}

impl ChatRequest {
    pub fn start(
        session_id: impl Into<String>,
        user_id: Option<String>,
        context_id: Option<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            request_type: "start",
            session_id: session_id.into(),
            user_id,
            context_id,
            text: text.into(),
        }
    }
}

/// Streaming request/response channel to the avatar server.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Opens one reply stream.
    ///
    /// # Errors
    /// Returns an error on connection failure or a non-success status.
    async fn open(&self, request: &ChatRequest) -> ClientResult<FrameStream>;
}

/// [`ChatTransport`] over `POST {base_url}/chat`.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    client: ApiClient,
}

impl HttpChatTransport {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn open(&self, request: &ChatRequest) -> ClientResult<FrameStream> {
        debug!(
            session_id = %request.session_id,
            context_id = ?request.context_id,
            "opening chat stream"
        );
        let builder = self
            .client
            .request(Method::POST, "/chat")
            .header("accept", "text/event-stream")
            .json(request);
        let response = self.client.send(builder).await?;
        Ok(FrameParser::new(response.bytes_stream()).boxed())
    }
}
