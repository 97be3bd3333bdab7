//! Static model catalog: per-model limits, prices, and capabilities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dispatch::request::TokenUsage;
use crate::providers::records::ProviderFamily;

/// One entry of the model catalog.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AIModel {
    /// Model id as sent on the wire.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Wire-contract family the model is served through.
    pub family: ProviderFamily,
    /// Context window in tokens.
    pub context_window: u32,
    /// Maximum completion size in tokens.
    pub max_output_tokens: u32,
    /// Whether the model accepts function declarations.
    pub supports_functions: bool,
    /// Whether the model accepts image input.
    pub supports_vision: bool,
    /// Price per 1K prompt tokens, USD.
    pub input_price_per_1k: f64,
    /// Price per 1K completion tokens, USD.
    pub output_price_per_1k: f64,
    /// Inactive models are kept for price lookups but not offered.
    pub active: bool,
}

/// In-memory model table, loaded once at startup and never user-mutable.
#[derive(Clone, Debug)]
pub struct ModelCatalog {
    models: HashMap<String, AIModel>,
}

impl ModelCatalog {
    /// Build a catalog from an explicit model list.
    #[must_use]
    pub fn new(models: Vec<AIModel>) -> Self {
        let models = models.into_iter().map(|m| (m.id.clone(), m)).collect();
        Self { models }
    }

    /// The built-in catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new(builtin_models())
    }

    /// Look up a model by id.
    #[must_use]
    pub fn get(&self, model_id: &str) -> Option<&AIModel> {
        self.models.get(model_id)
    }

    /// All catalog entries, in no particular order.
    pub fn models(&self) -> impl Iterator<Item = &AIModel> {
        self.models.values()
    }

    /// Cost of an exchange in USD per the declared price table.
    ///
    /// Unknown models cost zero; the caller still gets token accounting.
    #[must_use]
    pub fn cost(&self, model_id: &str, usage: &TokenUsage) -> f64 {
        self.get(model_id).map_or(0.0, |model| {
            let input = f64::from(usage.prompt_tokens) / 1000.0 * model.input_price_per_1k;
            let output = f64::from(usage.completion_tokens) / 1000.0 * model.output_price_per_1k;
            input + output
        })
    }

    /// Default completion budget for admission estimates.
    #[must_use]
    pub fn default_max_output(&self, model_id: &str) -> Option<u32> {
        self.get(model_id).map(|model| model.max_output_tokens)
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn model(
    id: &str,
    display_name: &str,
    family: ProviderFamily,
    context_window: u32,
    max_output_tokens: u32,
    input_price_per_1k: f64,
    output_price_per_1k: f64,
    supports_functions: bool,
    supports_vision: bool,
) -> AIModel {
    AIModel {
        id: id.to_string(),
        display_name: display_name.to_string(),
        family,
        context_window,
        max_output_tokens,
        supports_functions,
        supports_vision,
        input_price_per_1k,
        output_price_per_1k,
        active: true,
    }
}

fn builtin_models() -> Vec<AIModel> {
    use ProviderFamily::{AnthropicCompatible, OpenaiCompatible};

    vec![
        model("gpt-4", "GPT-4", OpenaiCompatible, 8_192, 4_096, 0.03, 0.06, true, false),
        model(
            "gpt-4-turbo",
            "GPT-4 Turbo",
            OpenaiCompatible,
            128_000,
            4_096,
            0.01,
            0.03,
            true,
            true,
        ),
        model(
            "gpt-4o",
            "GPT-4o",
            OpenaiCompatible,
            128_000,
            16_384,
            0.0025,
            0.01,
            true,
            true,
        ),
        model(
            "gpt-3.5-turbo",
            "GPT-3.5 Turbo",
            OpenaiCompatible,
            16_385,
            4_096,
            0.0005,
            0.0015,
            true,
            false,
        ),
        model(
            "claude-3-opus-20240229",
            "Claude 3 Opus",
            AnthropicCompatible,
            200_000,
            4_096,
            0.015,
            0.075,
            false,
            true,
        ),
        model(
            "claude-3-5-sonnet-20241022",
            "Claude 3.5 Sonnet",
            AnthropicCompatible,
            200_000,
            8_192,
            0.003,
            0.015,
            false,
            true,
        ),
        model(
            "claude-3-haiku-20240307",
            "Claude 3 Haiku",
            AnthropicCompatible,
            200_000,
            4_096,
            0.00025,
            0.00125,
            false,
            true,
        ),
    ]
}
