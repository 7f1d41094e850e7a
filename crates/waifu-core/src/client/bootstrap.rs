//! Session bootstrap: persona, user profile and conversation context.

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::shared::{ApiClient, ClientError, ClientResult, classify_reqwest_error};

/// The assistant persona served by `/waifu`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub id: String,
    pub name: Option<String>,
    /// Decoded icon image, when the server sent one.
    pub image: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    pub user_name: Option<String>,
    pub relation: Option<String>,
}

/// Everything the session needs before the first turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: String,
    pub persona: Persona,
    pub user: UserProfile,
    pub context_id: Option<String>,
}

#[derive(Deserialize)]
struct PersonaResponse {
    waifu_id: String,
    waifu_name: Option<String>,
    waifu_image: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContextResponse {
    context_id: Option<String>,
}

pub fn new_session_id() -> String {
    format!("waifu_ses_{}", Uuid::new_v4())
}

/// Decodes a JSON body, treating a top-level `error` field as a failure.
fn decode_body<T: DeserializeOwned>(body: &str, what: &str) -> ClientResult<T> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| ClientError::parse(format!("Invalid {what} response: {e}")))?;
    if let Some(error) = value.get("error").filter(|e| !e.is_null()) {
        let message = error
            .as_str()
            .map_or_else(|| error.to_string(), str::to_string);
        return Err(ClientError::api(message));
    }
    serde_json::from_value(value)
        .map_err(|e| ClientError::parse(format!("Invalid {what} response: {e}")))
}

async fn get_json<T: DeserializeOwned>(
    client: &ApiClient,
    path: &str,
    query: &[(&str, &str)],
) -> ClientResult<T> {
    let builder = client.request(Method::GET, path).query(query);
    let response = client.send(builder).await?;
    let body = response
        .text()
        .await
        .map_err(|e| classify_reqwest_error(&e))?;
    decode_body(&body, path.trim_start_matches('/'))
}

/// `GET /waifu`
///
/// # Errors
/// Returns the HTTP/API error; a 404 means no persona exists yet.
pub async fn fetch_persona(client: &ApiClient) -> ClientResult<Persona> {
    let resp: PersonaResponse = get_json(client, "/waifu", &[]).await?;
    let image = match resp.waifu_image.as_deref().filter(|s| !s.is_empty()) {
        Some(encoded) => match STANDARD.decode(encoded) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(error = %err, "persona image is not valid base64");
                None
            }
        },
        None => None,
    };
    Ok(Persona {
        id: resp.waifu_id,
        name: resp.waifu_name.filter(|n| !n.is_empty()),
        image,
    })
}

/// `GET /user?waifu_id&user_id`; the server creates the user when `user_id` is unknown.
///
/// # Errors
/// Returns the HTTP/API error.
pub async fn fetch_user(
    client: &ApiClient,
    waifu_id: &str,
    user_id: Option<&str>,
) -> ClientResult<UserProfile> {
    let mut query = vec![("waifu_id", waifu_id)];
    if let Some(user_id) = user_id {
        query.push(("user_id", user_id));
    }
    let mut profile: UserProfile = get_json(client, "/user", &query).await?;
    profile.user_name = profile.user_name.filter(|n| !n.is_empty());
    profile.relation = profile.relation.filter(|r| !r.is_empty());
    Ok(profile)
}

/// `GET /context?user_id`
///
/// # Errors
/// Returns the HTTP/API error.
pub async fn fetch_context(client: &ApiClient, user_id: &str) -> ClientResult<Option<String>> {
    let resp: ContextResponse = get_json(client, "/context", &[("user_id", user_id)]).await?;
    Ok(resp.context_id.filter(|c| !c.is_empty()))
}

/// Fetches persona, user and context in order.
///
/// `save_user_id` is called when the server assigns a user id that differs
/// from `user_id`.
///
/// # Errors
/// Any failure is fatal for the session; the message names the server.
pub async fn bootstrap(
    client: &ApiClient,
    user_id: Option<&str>,
    save_user_id: impl FnOnce(&str) -> Result<()>,
) -> Result<SessionInfo> {
    let base_url = client.base_url();
    let persona = fetch_persona(client).await.map_err(|err| {
        if err.is_not_found() {
            anyhow!("No waifus on your server yet. Create one before you start chatting. ({base_url}): {err}")
        } else {
            anyhow!("Can't connect to your waifu server ({base_url}): {err}")
        }
    })?;
    debug!(waifu_id = %persona.id, "persona loaded");

    let user = fetch_user(client, &persona.id, user_id)
        .await
        .with_context(|| format!("Failed to load user from {base_url}"))?;
    if user_id != Some(user.user_id.as_str()) {
        debug!(user_id = %user.user_id, "server assigned a new user id");
        save_user_id(&user.user_id).context("Failed to save user id")?;
    }

    let context_id = fetch_context(client, &user.user_id)
        .await
        .with_context(|| format!("Failed to load conversation context from {base_url}"))?;

    Ok(SessionInfo {
        session_id: new_session_id(),
        persona,
        user,
        context_id,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::time::Duration;

    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::client::ClientErrorKind;

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(
            server.uri(),
            Some("k".to_string()),
            Duration::from_secs(2),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    async fn mount_json(server: &MockServer, route: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[test]
    fn test_session_id_format() {
        let id = new_session_id();
        assert!(id.starts_with("waifu_ses_"));
        assert_eq!(id.len(), "waifu_ses_".len() + 36);
    }

    #[test]
    fn test_decode_body_error_field() {
        let err = decode_body::<ContextResponse>(r#"{"error":"user_id required"}"#, "context")
            .unwrap_err();
        assert_eq!(err.kind, ClientErrorKind::Api);
        assert_eq!(err.message, "user_id required");
    }

    #[tokio::test]
    async fn test_bootstrap_saves_new_user_id() {
        let server = MockServer::start().await;
        mount_json(
            &server,
            "/waifu",
            serde_json::json!({"waifu_id": "w1", "waifu_name": "Mio", "waifu_image": STANDARD.encode(b"png")}),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(query_param("waifu_id", "w1"))
            .and(query_param("user_id", "stale"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "user_id": "u2", "user_name": "Alice", "relation": ""
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/context"))
            .and(query_param("user_id", "u2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"context_id": "ctx"})),
            )
            .mount(&server)
            .await;

        let saved = RefCell::new(None);
        let info = bootstrap(&client(&server), Some("stale"), |id| {
            *saved.borrow_mut() = Some(id.to_string());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(saved.into_inner().as_deref(), Some("u2"));
        assert_eq!(info.persona.name.as_deref(), Some("Mio"));
        assert_eq!(info.persona.image.as_deref(), Some(&b"png"[..]));
        assert_eq!(info.user.user_name.as_deref(), Some("Alice"));
        assert_eq!(info.user.relation, None);
        assert_eq!(info.context_id.as_deref(), Some("ctx"));
    }

    #[tokio::test]
    async fn test_bootstrap_keeps_matching_user_id() {
        let server = MockServer::start().await;
        mount_json(&server, "/waifu", serde_json::json!({"waifu_id": "w1"})).await;
        mount_json(
            &server,
            "/user",
            serde_json::json!({"user_id": "u1", "user_name": null, "relation": null}),
        )
        .await;
        mount_json(&server, "/context", serde_json::json!({"context_id": null})).await;

        let info = bootstrap(&client(&server), Some("u1"), |_| {
            panic!("user id should not be saved")
        })
        .await
        .unwrap();
        assert_eq!(info.persona.image, None);
        assert_eq!(info.context_id, None);
    }

    #[tokio::test]
    async fn test_bootstrap_without_persona_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/waifu"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(serde_json::json!({"error": "No waifus"})),
            )
            .mount(&server)
            .await;

        let err = bootstrap(&client(&server), None, |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("No waifus on your server yet"));
    }
}
