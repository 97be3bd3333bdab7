//! Adapter for openai-compatible chat completion APIs.

use serde::{Deserialize, Serialize};

use crate::dispatch::adapters::{extract_error_message, parse_retry_after, AdapterError};
use crate::dispatch::request::{ChatRequest, ChatResponse, ChatRole, FinishReason, TokenUsage};
use crate::providers::records::AIProvider;

const fn role_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::User => "user",
        ChatRole::Assistant => "assistant",
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    functions: Option<&'a [serde_json::Value]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<&'a serde_json::Value>,
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn build_body(request: &ChatRequest) -> WireRequest<'_> {
    WireRequest {
        model: &request.model,
        messages: request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: role_str(m.role),
                content: &m.content,
            })
            .collect(),
        max_tokens: request.max_output_tokens,
        temperature: request.temperature,
        top_p: request.top_p,
        frequency_penalty: request.frequency_penalty,
        presence_penalty: request.presence_penalty,
        stop: request.stop.as_deref(),
        functions: request.functions.as_deref(),
        function_call: request.function_call.as_ref(),
    }
}

fn parse_body(raw: &str, requested_model: &str) -> Result<ChatResponse, AdapterError> {
    let wire: WireResponse =
        serde_json::from_str(raw).map_err(|err| AdapterError::Parse(err.to_string()))?;

    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| AdapterError::Parse("response carried no choices".to_string()))?;

    let raw_finish = choice.finish_reason;
    let finish_reason = raw_finish
        .as_deref()
        .map_or(FinishReason::Other, FinishReason::from_openai);

    let usage = wire.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
    });

    Ok(ChatResponse {
        id: wire.id.unwrap_or_default(),
        model: wire.model.unwrap_or_else(|| requested_model.to_string()),
        content: choice.message.content.unwrap_or_default(),
        finish_reason,
        usage,
        metadata: serde_json::json!({
            "finish_reason_raw": raw_finish,
        }),
    })
}

/// Send one attempt to an openai-compatible upstream.
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
    let url = format!("{}/v1/chat/completions", provider.effective_base_url());

    let mut builder = client
        .post(&url)
        .header("authorization", format!("Bearer {api_key}"))
        .json(&build_body(request));
    if let Some(organization) = &provider.organization {
        builder = builder.header("openai-organization", organization);
    }

    let response = builder.send().await?;
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
    fn test_body_carries_contract_keys_and_omits_unset_ones() {
        let request = ChatRequest::new("gpt-4")
            .with_message(ChatMessage::system("be brief"))
            .with_message(ChatMessage::user("ping"))
            .with_max_output_tokens(128)
            .with_temperature(0.7);

        let value = serde_json::to_value(build_body(&request)).unwrap();
        assert_eq!(value["model"], "gpt-4");
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "ping");
        assert_eq!(value["max_tokens"], 128);
        assert_eq!(value["temperature"], 0.7);
        assert!(value.get("top_p").is_none());
        assert!(value.get("functions").is_none());
    }

    #[test]
    fn test_parse_extracts_first_choice_and_usage() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4-0613",
            "choices": [
                {"message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
        }"#;

        let response = parse_body(raw, "gpt-4").unwrap();
        assert_eq!(response.id, "chatcmpl-1");
        assert_eq!(response.model, "gpt-4-0613");
        assert_eq!(response.content, "pong");
        assert_eq!(response.finish_reason, FinishReason::Stop);
        assert_eq!(response.usage.prompt_tokens, 3);
        assert_eq!(response.usage.completion_tokens, 1);
    }

    #[test]
    fn test_parse_without_choices_is_an_error() {
        let err = parse_body(r#"{"id": "x", "choices": []}"#, "gpt-4").unwrap_err();
        assert!(matches!(err, AdapterError::Parse(_)));
    }

    #[test]
    fn test_parse_defaults_model_to_request() {
        let raw = r#"{"choices": [{"message": {"content": "hi"}}]}"#;
        let response = parse_body(raw, "gpt-4").unwrap();
        assert_eq!(response.model, "gpt-4");
        assert_eq!(response.finish_reason, FinishReason::Other);
        assert_eq!(response.usage.total(), 0);
    }
}
