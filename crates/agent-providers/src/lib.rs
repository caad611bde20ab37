//! # agent-providers
//!
//! Provider adapters for the agentcore engine.
//!
//! ## Providers
//!
//! - **OpenAI**: chat-completions API
//! - **Anthropic**: messages API
//! - **Gemini**: generateContent API
//! - **Ollama**: local inference, no credentials
//!
//! Credentials are resolved from the process environment exactly once into
//! [`ProviderSettings`]; a missing credential surfaces as a configuration
//! error when the provider is built, before any run starts.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_providers::{ProviderKind, ProviderSettings, connect};
//!
//! let settings = ProviderSettings::from_env();
//! let provider = connect(ProviderKind::Ollama, &settings)?;
//! ```

use std::str::FromStr;
use std::sync::Arc;

use agent_core::{AgentError, LlmProvider, Result};

pub mod anthropic;
pub mod gemini;
mod http;
pub mod ollama;
pub mod openai;
pub mod retry;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use ollama::{OllamaConfig, OllamaProvider};
pub use openai::OpenAiProvider;
pub use retry::RetryPolicy;

/// Supported provider backends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Gemini => write!(f, "gemini"),
            ProviderKind::Ollama => write!(f, "ollama"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "google" | "gemini" => Ok(ProviderKind::Gemini),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(AgentError::Config(format!(
                "Unknown provider: {}. Available providers: openai, anthropic, gemini, ollama",
                other
            ))),
        }
    }
}

/// Process-wide provider configuration, resolved from the environment once
/// at startup and passed to adapters at construction.
#[derive(Clone, Debug, Default)]
pub struct ProviderSettings {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub ollama: Option<OllamaConfig>,
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: env_nonempty("OPENAI_API_KEY"),
            anthropic_api_key: env_nonempty("ANTHROPIC_API_KEY"),
            gemini_api_key: env_nonempty("GEMINI_API_KEY"),
            ollama: Some(OllamaConfig::from_env()),
        }
    }

    /// Providers that can be built from this configuration. Ollama needs no
    /// credential, so it is always considered configured.
    pub fn configured_kinds(&self) -> Vec<ProviderKind> {
        let mut kinds = Vec::new();
        if self.openai_api_key.is_some() {
            kinds.push(ProviderKind::OpenAi);
        }
        if self.anthropic_api_key.is_some() {
            kinds.push(ProviderKind::Anthropic);
        }
        if self.gemini_api_key.is_some() {
            kinds.push(ProviderKind::Gemini);
        }
        kinds.push(ProviderKind::Ollama);
        kinds
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Build the adapter for `kind`, failing with a configuration error when
/// the needed credential is absent.
pub fn connect(kind: ProviderKind, settings: &ProviderSettings) -> Result<Arc<dyn LlmProvider>> {
    match kind {
        ProviderKind::OpenAi => {
            let key = settings
                .openai_api_key
                .as_deref()
                .ok_or_else(|| AgentError::Config("OPENAI_API_KEY is not set".into()))?;
            Ok(Arc::new(OpenAiProvider::new(key)))
        }
        ProviderKind::Anthropic => {
            let key = settings
                .anthropic_api_key
                .as_deref()
                .ok_or_else(|| AgentError::Config("ANTHROPIC_API_KEY is not set".into()))?;
            Ok(Arc::new(AnthropicProvider::new(key)))
        }
        ProviderKind::Gemini => {
            let key = settings
                .gemini_api_key
                .as_deref()
                .ok_or_else(|| AgentError::Config("GEMINI_API_KEY is not set".into()))?;
            Ok(Arc::new(GeminiProvider::new(key)))
        }
        ProviderKind::Ollama => {
            let config = settings.ollama.clone().unwrap_or_default();
            Ok(Arc::new(OllamaProvider::from_config(config)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parsing() {
        assert_eq!("openai".parse::<ProviderKind>().unwrap(), ProviderKind::OpenAi);
        assert_eq!("google".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert_eq!("Gemini".parse::<ProviderKind>().unwrap(), ProviderKind::Gemini);
        assert!("bedrock".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_connect_requires_credential() {
        let settings = ProviderSettings::default();
        let err = connect(ProviderKind::OpenAi, &settings).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }

    #[test]
    fn test_ollama_needs_no_credential() {
        let settings = ProviderSettings::default();
        let provider = connect(ProviderKind::Ollama, &settings).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn test_configured_kinds_always_include_ollama() {
        let settings = ProviderSettings {
            anthropic_api_key: Some("key".into()),
            ..Default::default()
        };
        let kinds = settings.configured_kinds();
        assert!(kinds.contains(&ProviderKind::Anthropic));
        assert!(kinds.contains(&ProviderKind::Ollama));
        assert!(!kinds.contains(&ProviderKind::OpenAi));
    }
}
