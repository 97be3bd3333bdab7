//! Adapter for anthropic-compatible messages APIs.

use serde::{Deserialize, Serialize};

use crate::dispatch::adapters::{extract_error_message, parse_retry_after, AdapterError};
use crate::dispatch::request::{ChatRequest, ChatResponse, ChatRole, FinishReason, TokenUsage};
use crate::providers::records::AIProvider;

/// API version header value pinned by the wire contract.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Completion budget sent when the request leaves it unset; the messages
/// contract requires an explicit `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 1024;

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<WireContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireContent {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

const fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

/// Hoist the first system message into the top-level `system` field; the
/// remaining messages become the `messages` array.
fn build_body(request: &ChatRequest) -> WireRequest<'_> {
    let system_idx = request
        .messages
        .iter()
        .position(|m| m.role == ChatRole::System);
    let system = system_idx.map(|idx| request.messages[idx].content.as_str());

    let messages = request
        .messages
        .iter()
        .enumerate()
        .filter(|(idx, _)| Some(*idx) != system_idx)
        .map(|(_, m)| WireMessage {
            role: role_str(m.role),
            content: &m.content,
        })
        .collect();

    WireRequest {
        model: &request.model,
        max_tokens: request.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: request.temperature,
        system,
        messages,
    }
}

fn parse_body(raw: &str, requested_model: &str) -> Result<ChatResponse, AdapterError> {
    let wire: WireResponse =
        serde_json::from_str(raw).map_err(|err| AdapterError::Parse(err.to_string()))?;

    let content = wire
        .content
        .into_iter()
        .next()
        .and_then(|block| block.text)
        .ok_or_else(|| AdapterError::Parse("response carried no text content".to_string()))?;

    let raw_stop = wire.stop_reason;
    let finish_reason = raw_stop
        .as_deref()
        .map_or(FinishReason::Other, FinishReason::from_anthropic);

    let usage = wire.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
    });

    Ok(ChatResponse {
        id: wire.id.unwrap_or_default(),
        model: wire.model.unwrap_or_else(|| requested_model.to_string()),
        content,
        finish_reason,
        usage,
        metadata: serde_json::json!({
            "stop_reason_raw": raw_stop,
        }),
    })
}

/// Send one attempt to an anthropic-compatible upstream.
///
/// Function declarations in the request are ignored; the family does not
/// take them through this contract.
///
/// # Errors
/// Returns an [`AdapterError`] on transport failure, non-2xx status, or a
/// body that does not match the wire contract.
pub async fn send(
    client: &reqwest::Client,
    provider: &AIProvider,
    api_key: &str,
    request: &ChatRequest,
) -> Result<ChatResponse, AdapterError> {
    let url = format!("{}/v1/messages", provider.effective_base_url());

    let response = client
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&build_body(request))
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(AdapterError::Status {
            status: status.as_u16(),
            message: extract_error_message(&body),
            retry_after,
        });
    }

    let raw = response.text().await?;
    parse_body(&raw, &request.model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::request::ChatMessage;

    #[test]
    fn test_system_message_is_hoisted() {
        let request = ChatRequest::new("claude-3-haiku-20240307")
            .with_message(ChatMessage::system("be terse"))
            .with_message(ChatMessage::user("ping"))
            .with_message(ChatMessage::assistant("pong"))
            .with_message(ChatMessage::user("again"));

        let value = serde_json::to_value(build_body(&request)).unwrap();
        assert_eq!(value["system"], "be terse");
        let messages = value["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "assistant");
    }

    #[test]
    fn test_body_without_system_omits_the_field() {
        let request = ChatRequest::new("claude-3-haiku-20240307")
            .with_message(ChatMessage::user("ping"));

        let value = serde_json::to_value(build_body(&request)).unwrap();
        assert!(value.get("system").is_none());
        assert_eq!(value["max_tokens"], u64::from(DEFAULT_MAX_TOKENS));
    }

    #[test]
    fn test_parse_remaps_usage_fields() {
        let raw = r#"{
            "id": "msg_01",
            "model": "claude-3-haiku-20240307",
            "content": [{"type": "text", "text": "pong"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 9, "output_tokens": 2}
        }"#;

        let response = parse_body(raw, "claude-3-haiku-20240307").unwrap();
        assert_eq!(response.content, "pong");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.prompt_tokens, 9);
        assert_eq!(response.usage.completion_tokens, 2);
    }

    #[test]
    fn test_parse_without_text_is_an_error() {
        let err = parse_body(r#"{"id": "msg", "content": []}"#, "claude-3-haiku-20240307")
            .unwrap_err();
        assert!(matches!(err, AdapterError::Parse(_)));
    }
}
