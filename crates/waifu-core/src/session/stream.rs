//! Reply streaming: a producer task turns chat frames into display events.
//!
//! The producer owns the network stream and the speech requests; the
//! controller only ever sees [`ResponseEvent`]s arriving on a bounded
//! channel. Every frame boundary produces an empty text fragment so the
//! controller gets a checkpoint even when a frame renders nothing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::turn::TurnRequest;
use crate::audio::AudioClip;
use crate::client::{
    ChatFrame, ChatRequest, ChatTransport, ChunkFrame, ClientErrorKind, FrameKind,
    SpeechSynthesizer, ToolCallFrame,
};

/// Events buffered between producer and controller.
pub const RESPONSE_CHANNEL_CAPACITY: usize = 64;

/// Renderable output, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayToken {
    /// Expression name; the controller maps it to a glyph.
    Face { expression: String },
    /// Reply text. Empty fragments are checkpoints.
    TextFragment { text: String },
    /// Tool progress, printed on its own line.
    StatusLine { text: String },
    /// Server-side failure; nothing follows it.
    ErrorLine { text: String },
}

impl DisplayToken {
    pub fn text(text: impl Into<String>) -> Self {
        DisplayToken::TextFragment { text: text.into() }
    }

    pub fn face(expression: impl Into<String>) -> Self {
        DisplayToken::Face {
            expression: expression.into(),
        }
    }
}

/// Everything a reply can deliver to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    Token(DisplayToken),
    Voice(AudioClip),
    ContextChanged(String),
    ProfileChanged {
        user_name: Option<String>,
        relation: Option<String>,
    },
}

impl ResponseEvent {
    pub fn checkpoint() -> Self {
        ResponseEvent::Token(DisplayToken::text(""))
    }
}

/// Receiving half of one reply.
///
/// Dropping it (or calling [`ResponseStream::abandon`]) cancels the
/// producer at its next frame boundary.
#[derive(Debug)]
pub struct ResponseStream {
    rx: mpsc::Receiver<ResponseEvent>,
    cancel: CancellationToken,
}

/// Sending half of one reply.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<ResponseEvent>,
    cancel: CancellationToken,
}

impl ResponseStream {
    pub fn channel(capacity: usize) -> (EventSender, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        (
            EventSender {
                tx,
                cancel: cancel.clone(),
            },
            Self { rx, cancel },
        )
    }

    /// A finished stream that yields `events` and then ends.
    pub fn from_events(events: impl IntoIterator<Item = ResponseEvent>) -> Self {
        let events: Vec<_> = events.into_iter().collect();
        let (tx, stream) = Self::channel(events.len());
        for event in events {
            let _ = tx.tx.try_send(event);
        }
        stream
    }

    /// Next event, or `None` once the producer is done.
    pub async fn next(&mut self) -> Option<ResponseEvent> {
        self.rx.recv().await
    }

    pub fn abandon(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl EventSender {
    /// Delivers one event; false once the reply was abandoned.
    pub async fn send(&self, event: ResponseEvent) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

/// Opens reply streams for the controller.
pub trait Responder {
    fn respond(&mut self, request: TurnRequest) -> ResponseStream;
}

/// [`Responder`] backed by the avatar server.
pub struct RemoteResponder {
    transport: Arc<dyn ChatTransport>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    session_id: String,
    user_id: Option<String>,
    next_clip: Arc<AtomicU64>,
}

impl RemoteResponder {
    /// `speech` is `None` when voice is disabled.
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        speech: Option<Arc<dyn SpeechSynthesizer>>,
        session_id: impl Into<String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            transport,
            speech,
            session_id: session_id.into(),
            user_id,
            next_clip: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl Responder for RemoteResponder {
    fn respond(&mut self, request: TurnRequest) -> ResponseStream {
        let (tx, stream) = ResponseStream::channel(RESPONSE_CHANNEL_CAPACITY);
        let producer = Producer {
            transport: Arc::clone(&self.transport),
            speech: self.speech.clone(),
            next_clip: Arc::clone(&self.next_clip),
            tx,
        };
        let chat = ChatRequest::start(
            self.session_id.clone(),
            self.user_id.clone(),
            request.context_id,
            request.text,
        );
        let turn_id = request.turn_id;
        tokio::spawn(async move {
            producer.run(chat).await;
            trace!(turn_id, "producer finished");
        });
        stream
    }
}

struct Producer {
    transport: Arc<dyn ChatTransport>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    next_clip: Arc<AtomicU64>,
    tx: EventSender,
}

impl Producer {
    async fn run(self, request: ChatRequest) {
        let opened = tokio::select! {
            () = self.tx.cancelled() => return,
            opened = self.transport.open(&request) => opened,
        };
        let mut frames = match opened {
            Ok(frames) => frames,
            Err(err) => {
                warn!(kind = %err.kind, error = %err, details = ?err.details, "chat request failed");
                return;
            }
        };

        loop {
            let next = tokio::select! {
                () = self.tx.cancelled() => {
                    debug!("reply abandoned");
                    return;
                }
                next = frames.next() => next,
            };
            let frame = match next {
                None => return,
                Some(Ok(frame)) => frame,
                Some(Err(err)) if err.kind == ClientErrorKind::Parse => {
                    warn!(error = %err, "skipping malformed frame");
                    if !self.tx.send(ResponseEvent::checkpoint()).await {
                        return;
                    }
                    continue;
                }
                Some(Err(err)) => {
                    warn!(kind = %err.kind, error = %err, "chat stream failed");
                    return;
                }
            };

            if !self.tx.send(ResponseEvent::checkpoint()).await {
                return;
            }
            if !self.handle_frame(frame).await {
                return;
            }
        }
    }

    /// Returns false when production should stop.
    async fn handle_frame(&self, frame: ChatFrame) -> bool {
        if let Some(context_id) = frame.context_id
            && !self.tx.send(ResponseEvent::ContextChanged(context_id)).await
        {
            return false;
        }

        match frame.kind {
            FrameKind::Chunk(chunk) => self.handle_chunk(chunk).await,
            FrameKind::ToolCall(call) => self.handle_tool_call(&call).await,
            FrameKind::Error(message) => {
                warn!(%message, "server reported an error");
                let _ = self
                    .tx
                    .send(ResponseEvent::Token(DisplayToken::ErrorLine { text: message }))
                    .await;
                false
            }
            FrameKind::Start | FrameKind::Final => true,
            FrameKind::Other(kind) => {
                trace!(%kind, "ignoring frame");
                true
            }
        }
    }

    async fn handle_chunk(&self, chunk: ChunkFrame) -> bool {
        if let Some(face) = chunk.face_name.filter(|f| !f.is_empty())
            && !self
                .tx
                .send(ResponseEvent::Token(DisplayToken::face(face)))
                .await
        {
            return false;
        }

        let Some(text) = chunk.voice_text.filter(|t| !t.is_empty()) else {
            return true;
        };
        if !self
            .tx
            .send(ResponseEvent::Token(DisplayToken::text(text.clone())))
            .await
        {
            return false;
        }

        let Some(speech) = &self.speech else {
            return true;
        };
        let audio = tokio::select! {
            () = self.tx.cancelled() => return false,
            audio = speech.synthesize(&text, chunk.language.as_deref()) => audio,
        };
        match audio {
            Ok(bytes) => {
                let sequence_no = self.next_clip.fetch_add(1, Ordering::Relaxed);
                self.tx
                    .send(ResponseEvent::Voice(AudioClip::detect(bytes, sequence_no)))
                    .await
            }
            Err(err) => {
                warn!(error = %err, "speech synthesis failed");
                true
            }
        }
    }

    async fn handle_tool_call(&self, call: &ToolCallFrame) -> bool {
        let text = if call.is_finished() {
            format!("[Finish {} !]", call.name)
        } else {
            format!("[Processing {} ...]", call.name)
        };
        if !self
            .tx
            .send(ResponseEvent::Token(DisplayToken::StatusLine { text }))
            .await
        {
            return false;
        }

        match call.profile_update() {
            Some((user_name, relation)) => {
                self.tx
                    .send(ResponseEvent::ProfileChanged {
                        user_name,
                        relation,
                    })
                    .await
            }
            None => true,
        }
    }
}
