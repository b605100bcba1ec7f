//! Deterministic model choice from a backend's advertised models.

use crate::transport::ProviderKind;

/// Ordered preference tokens plus an optional last-resort identifier.
///
/// Tokens are matched as case-insensitive substrings of model ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPreferences {
    pub tokens: Vec<String>,
    pub last_resort: Option<String>,
}

impl ModelPreferences {
    pub fn new(tokens: &[&str], last_resort: Option<&str>) -> Self {
        Self {
            tokens: tokens.iter().map(|t| t.to_lowercase()).collect(),
            last_resort: last_resort.map(str::to_string),
        }
    }

    /// The built-in table for a backend family.
    pub fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::OpenAi => Self::new(&["gpt-4o-mini", "gpt-4o", "gpt-4"], Some("gpt-4o-mini")),
            ProviderKind::Groq => Self::new(&["mistral", "mixtral", "llama"], Some("llama-3.1-8b-instant")),
            ProviderKind::Ollama => Self::new(
                &["codellama", "deepseek-coder", "mistral", "llama3", "phi", "qwen"],
                None,
            ),
        }
    }

    /// Picks a model.
    ///
    /// An override wins verbatim and is not checked against `known_models`;
    /// the backend decides whether it exists. Otherwise the preference order
    /// is the outer loop and the backend's order the inner one.
    pub fn select(&self, known_models: &[String], explicit_override: Option<&str>) -> Option<String> {
        if let Some(model) = explicit_override {
            return Some(model.to_string());
        }

        for token in &self.tokens {
            if let Some(model) = known_models
                .iter()
                .find(|m| m.to_lowercase().contains(token.as_str()))
            {
                return Some(model.clone());
            }
        }

        known_models
            .first()
            .cloned()
            .or_else(|| self.last_resort.clone())
    }
}
