//! Request and result types for a single code generation.

use serde::{Deserialize, Serialize};

pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// What the caller wants generated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Target language. Callers normally fill this in with
    /// [`detect_language`](crate::language::detect_language) when the user
    /// did not pick one.
    pub language: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Model to use instead of the adapter's own choice.
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            language: language.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Reason the request cannot be sent, if any.
    pub fn validate(&self) -> Option<String> {
        if self.prompt.trim().is_empty() {
            return Some("prompt must not be empty".to_string());
        }
        if self.max_tokens == 0 {
            return Some("max_tokens must be positive".to_string());
        }
        None
    }
}

/// Outcome of a generation.
///
/// Built only through [`GenerationResult::succeeded`] and
/// [`GenerationResult::failed`]: a success never carries an error and a
/// failure never carries code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    pub code: String,
    pub raw_output: String,
    pub elapsed_ms: u64,
    pub model_used: Option<String>,
    pub error: Option<String>,
}

impl GenerationResult {
    pub fn succeeded(code: String, raw_output: String, elapsed_ms: u64, model: String) -> Self {
        Self {
            success: true,
            code,
            raw_output,
            elapsed_ms,
            model_used: Some(model),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, elapsed_ms: u64, model: Option<String>) -> Self {
        Self {
            success: false,
            code: String::new(),
            raw_output: String::new(),
            elapsed_ms,
            model_used: model,
            error: Some(error.into()),
        }
    }
}
