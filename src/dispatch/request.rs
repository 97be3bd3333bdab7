//! The uniform request/response contract over heterogeneous chat APIs.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{ChatError, ChatResult};

/// Role of a chat message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions to the model.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

impl FromStr for ChatRole {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(ChatError::InvalidRole(other.to_string())),
        }
    }
}

/// A role-tagged message in the uniform request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role.
    pub role: ChatRole,
    /// Message content.
    pub content: String,
}

impl ChatMessage {
    /// Build a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Build an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A dispatch request in the uniform contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Target model id.
    pub model: String,
    /// Ordered message list; the first entry may carry role `system`.
    pub messages: Vec<ChatMessage>,
    /// Completion budget in tokens.
    pub max_output_tokens: Option<u32>,
    /// Sampling temperature, in `[0, 2]`.
    pub temperature: f64,
    /// Nucleus sampling cutoff, in `[0, 1]`.
    pub top_p: Option<f64>,
    /// Frequency penalty, in `[-2, 2]`.
    pub frequency_penalty: Option<f64>,
    /// Presence penalty, in `[-2, 2]`.
    pub presence_penalty: Option<f64>,
    /// Stop sequences.
    pub stop: Option<Vec<String>>,
    /// Function declarations, passed through verbatim to families that
    /// support them and ignored by those that do not.
    pub functions: Option<Vec<serde_json::Value>>,
    /// Function selector, passed through alongside `functions`.
    pub function_call: Option<serde_json::Value>,
}

impl ChatRequest {
    /// Create a request for a model with default sampling settings.
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: Vec::new(),
            max_output_tokens: None,
            temperature: 1.0,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            functions: None,
            function_call: None,
        }
    }

    /// Set the message list.
    #[must_use]
    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    /// Append one message.
    #[must_use]
    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    /// Set the completion budget.
    #[must_use]
    pub const fn with_max_output_tokens(mut self, max: u32) -> Self {
        self.max_output_tokens = Some(max);
        self
    }

    /// Set the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the stop sequences.
    #[must_use]
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Validate parameter ranges and shape.
    ///
    /// # Errors
    /// Returns `invalid_argument` for any parameter outside its documented
    /// range, an empty model id, or an empty message list.
    pub fn validate(&self) -> ChatResult<()> {
        if self.model.trim().is_empty() {
            return Err(ChatError::InvalidArgument(
                "model must not be empty".to_string(),
            ));
        }
        if self.messages.is_empty() {
            return Err(ChatError::InvalidArgument(
                "messages must not be empty".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ChatError::InvalidArgument(format!(
                "temperature must be within [0, 2], got {}",
                self.temperature
            )));
        }
        if let Some(top_p) = self.top_p {
            if !(0.0..=1.0).contains(&top_p) {
                return Err(ChatError::InvalidArgument(format!(
                    "top_p must be within [0, 1], got {top_p}"
                )));
            }
        }
        for (name, value) in [
            ("frequency_penalty", self.frequency_penalty),
            ("presence_penalty", self.presence_penalty),
        ] {
            if let Some(penalty) = value {
                if !(-2.0..=2.0).contains(&penalty) {
                    return Err(ChatError::InvalidArgument(format!(
                        "{name} must be within [-2, 2], got {penalty}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Why the upstream stopped generating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of the reply or a stop sequence.
    Stop,
    /// The completion budget was exhausted.
    Length,
    /// The upstream filtered the content.
    ContentFilter,
    /// The model asked to call a declared function.
    FunctionCall,
    /// Anything the families report that does not map above.
    Other,
}

impl FinishReason {
    /// Map an openai-compatible `finish_reason` string.
    #[must_use]
    pub fn from_openai(reason: &str) -> Self {
        match reason {
            "stop" => Self::Stop,
            "length" => Self::Length,
            "content_filter" => Self::ContentFilter,
            "function_call" | "tool_calls" => Self::FunctionCall,
            _ => Self::Other,
        }
    }

    /// Map an anthropic-compatible `stop_reason` string.
    #[must_use]
    pub fn from_anthropic(reason: &str) -> Self {
        match reason {
            "end_turn" | "stop_sequence" => Self::Stop,
            "max_tokens" => Self::Length,
            "refusal" => Self::ContentFilter,
            "tool_use" => Self::FunctionCall,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => write!(f, "stop"),
            Self::Length => write!(f, "length"),
            Self::ContentFilter => write!(f, "content_filter"),
            Self::FunctionCall => write!(f, "function_call"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Token accounting for one exchange.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens produced in the completion.
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Prompt plus completion tokens.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A dispatch response in the uniform contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Upstream response id.
    pub id: String,
    /// Model id actually used.
    pub model: String,
    /// Reply content.
    pub content: String,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Token accounting.
    pub usage: TokenUsage,
    /// Free-form metadata preserved from the upstream.
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_request() -> ChatRequest {
        ChatRequest::new("gpt-4").with_message(ChatMessage::user("hi"))
    }

    #[test]
    fn test_temperature_out_of_range_is_rejected() {
        let request = minimal_request().with_temperature(2.5);
        let err = request.validate().unwrap_err();
        assert_eq!(err.kind(), crate::core::ErrorKind::InvalidArgument);

        let request = minimal_request().with_temperature(-0.1);
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_boundary_temperatures_are_accepted() {
        assert!(minimal_request().with_temperature(0.0).validate().is_ok());
        assert!(minimal_request().with_temperature(2.0).validate().is_ok());
    }

    #[test]
    fn test_penalty_ranges() {
        let mut request = minimal_request();
        request.frequency_penalty = Some(2.5);
        assert!(request.validate().is_err());

        let mut request = minimal_request();
        request.presence_penalty = Some(-2.0);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_empty_messages_are_rejected() {
        let request = ChatRequest::new("gpt-4");
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("user".parse::<ChatRole>().unwrap(), ChatRole::User);
        assert!("tool".parse::<ChatRole>().is_err());
    }

    #[test]
    fn test_finish_reason_mappings() {
        assert_eq!(FinishReason::from_openai("stop"), FinishReason::Stop);
        assert_eq!(
            FinishReason::from_openai("tool_calls"),
            FinishReason::FunctionCall
        );
        assert_eq!(FinishReason::from_anthropic("end_turn"), FinishReason::Stop);
        assert_eq!(
            FinishReason::from_anthropic("max_tokens"),
            FinishReason::Length
        );
        assert_eq!(FinishReason::from_anthropic("banana"), FinishReason::Other);
    }
}
