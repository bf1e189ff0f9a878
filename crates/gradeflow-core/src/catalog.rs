// Static catalog of supported AI providers and their models.

use std::fmt;

use serde::{Deserialize, Serialize};

const OLLAMA_MODELS: &[&str] = &[
    "llama3.1:8b",
    "llama3.1:70b",
    "codellama:13b",
    "mistral:7b",
    "mixtral:8x7b",
    "deepseek-coder:6.7b",
];

const OPENAI_MODELS: &[&str] = &["gpt-4o", "gpt-4o-mini", "gpt-4-turbo"];

const ANTHROPIC_MODELS: &[&str] = &["claude-sonnet-4-20250514", "claude-3-5-sonnet-20241022"];

/// A grading backend the user can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Locally hosted Ollama server.
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    #[serde(rename = "openrouter")]
    OpenRouter,
}

impl ProviderKind {
    /// Catalog order, as presented to the user.
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Ollama,
        ProviderKind::OpenAi,
        ProviderKind::Anthropic,
        ProviderKind::OpenRouter,
    ];

    pub fn id(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "ollama",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenRouter => "openrouter",
        }
    }

    pub fn from_id(id: &str) -> Option<ProviderKind> {
        ProviderKind::ALL.into_iter().find(|p| p.id() == id)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::Ollama => "Ollama (local)",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Anthropic => "Anthropic",
            ProviderKind::OpenRouter => "OpenRouter",
        }
    }

    pub fn requires_credential(self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }

    /// Whether the provider exposes a cheap liveness endpoint.
    pub fn supports_probe(self) -> bool {
        matches!(self, ProviderKind::Ollama)
    }

    /// Environment variable consulted when no credential is stored.
    pub fn credential_env_var(self) -> Option<&'static str> {
        match self {
            ProviderKind::Ollama => None,
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
            ProviderKind::OpenRouter => Some("OPENROUTER_API_KEY"),
        }
    }

    /// Model ids offered for this provider. Never empty.
    pub fn models(self) -> Vec<&'static str> {
        match self {
            ProviderKind::Ollama => OLLAMA_MODELS.to_vec(),
            ProviderKind::OpenAi => OPENAI_MODELS.to_vec(),
            ProviderKind::Anthropic => ANTHROPIC_MODELS.to_vec(),
            ProviderKind::OpenRouter => ANTHROPIC_MODELS
                .iter()
                .chain(OPENAI_MODELS.iter())
                .copied()
                .collect(),
        }
    }

    pub fn default_model(self) -> &'static str {
        self.models()[0]
    }

    pub fn has_model(self, model: &str) -> bool {
        self.models().contains(&model)
    }

    /// `model` if the provider offers it, otherwise the provider's first model.
    pub fn resolve_model(self, model: Option<&str>) -> &'static str {
        model
            .and_then(|m| self.models().into_iter().find(|known| *known == m))
            .unwrap_or_else(|| self.default_model())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_from_id() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_id(kind.id()), Some(kind));
        }
        assert_eq!(ProviderKind::from_id("gemini"), None);
    }

    #[test]
    fn only_ollama_is_keyless_and_probed() {
        assert!(!ProviderKind::Ollama.requires_credential());
        assert!(ProviderKind::Ollama.supports_probe());
        for kind in [ProviderKind::OpenAi, ProviderKind::Anthropic, ProviderKind::OpenRouter] {
            assert!(kind.requires_credential());
            assert!(!kind.supports_probe());
            assert!(kind.credential_env_var().is_some());
        }
    }

    #[test]
    fn openrouter_offers_both_hosted_catalogs() {
        let models = ProviderKind::OpenRouter.models();
        assert_eq!(models.first(), Some(&"claude-sonnet-4-20250514"));
        assert!(models.contains(&"gpt-4o-mini"));
        assert_eq!(models.len(), 5);
    }

    #[test]
    fn unknown_model_resolves_to_first() {
        assert_eq!(ProviderKind::OpenAi.resolve_model(Some("gpt-4o-mini")), "gpt-4o-mini");
        assert_eq!(ProviderKind::OpenAi.resolve_model(Some("llama3.1:8b")), "gpt-4o");
        assert_eq!(ProviderKind::Ollama.resolve_model(None), "llama3.1:8b");
    }

    #[test]
    fn serde_uses_provider_ids() {
        assert_eq!(serde_json::to_string(&ProviderKind::OpenAi).unwrap(), "\"openai\"");
        let kind: ProviderKind = serde_json::from_str("\"openrouter\"").unwrap();
        assert_eq!(kind, ProviderKind::OpenRouter);
    }
}
