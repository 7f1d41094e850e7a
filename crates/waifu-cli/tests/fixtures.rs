//! SSE fixture helpers for integration tests.

#![allow(dead_code)]

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// Load fixture templates at compile time
pub const SSE_TEXT: &str = include_str!("fixtures/chat_text.sse");
pub const SSE_PROFILE_UPDATE: &str = include_str!("fixtures/chat_profile_update.sse");
pub const SSE_ERROR: &str = include_str!("fixtures/chat_error.sse");

/// A chunk reply with one face and one sentence.
pub fn text_sse(context_id: &str, face: &str, text: &str) -> String {
    SSE_TEXT
        .replace("{{CONTEXT_ID}}", context_id)
        .replace("{{FACE}}", face)
        .replace("{{TEXT}}", &escape_json(text))
}

/// An `update_userinfo` tool call in progress, then finished.
pub fn profile_update_sse(context_id: &str, user_name: &str, relation: &str) -> String {
    SSE_PROFILE_UPDATE
        .replace("{{CONTEXT_ID}}", context_id)
        .replace("{{USER_NAME}}", &escape_json(user_name))
        .replace("{{RELATION}}", &escape_json(relation))
}

/// An error frame followed by a chunk that must never render.
pub fn error_sse(context_id: &str, error: &str) -> String {
    SSE_ERROR
        .replace("{{CONTEXT_ID}}", context_id)
        .replace("{{ERROR}}", &escape_json(error))
}

/// Wrap SSE body string in a ResponseTemplate.
pub fn sse_response(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body.to_string())
}

/// Mounts `/waifu`, `/user` and `/context` for a persona named `waifu_name`.
pub async fn mount_bootstrap(
    server: &MockServer,
    waifu_name: &str,
    user_name: Option<&str>,
    relation: Option<&str>,
) {
    Mock::given(method("GET"))
        .and(path("/waifu"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "waifu_id": "waifu_1",
            "waifu_name": waifu_name,
            "waifu_image": null,
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "user_id": "user_1",
            "user_name": user_name,
            "relation": relation,
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/context"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "context_id": "ctx_1",
        })))
        .mount(server)
        .await;
}

/// Escape special characters for JSON string embedding.
fn escape_json(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
