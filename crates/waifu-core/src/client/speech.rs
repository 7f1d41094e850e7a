use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde::Serialize;

use super::shared::{ApiClient, ClientResult, classify_reqwest_error};

/// Text-to-speech backend.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns audio for `text`, normally a complete WAV file.
    ///
    /// # Errors
    /// Returns an error if the request fails.
    async fn synthesize(&self, text: &str, language: Option<&str>) -> ClientResult<Bytes>;
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
}

/// [`SpeechSynthesizer`] over `POST {base_url}/synthesize`.
#[derive(Debug, Clone)]
pub struct HttpSpeechSynthesizer {
    client: ApiClient,
}

impl HttpSpeechSynthesizer {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(&self, text: &str, language: Option<&str>) -> ClientResult<Bytes> {
        let builder = self
            .client
            .request(Method::POST, "/synthesize")
            .json(&SynthesizeRequest { text, language });
        let response = self.client.send(builder).await?;
        response
            .bytes()
            .await
            .map_err(|e| classify_reqwest_error(&e))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_synthesize_returns_audio_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/synthesize"))
            .and(body_json(serde_json::json!({"text": "Hello", "language": "en"})))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF....WAVE".to_vec()))
            .mount(&server)
            .await;

        let client = ApiClient::new(
            server.uri(),
            None,
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .unwrap();
        let audio = HttpSpeechSynthesizer::new(client)
            .synthesize("Hello", Some("en"))
            .await
            .unwrap();
        assert_eq!(&audio[..], b"RIFF....WAVE");
    }
}
