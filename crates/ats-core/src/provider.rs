use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::security::ApiKey;

/// Supported LLM backends.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    OpenAI,
    Claude,
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 4] = [Self::Ollama, Self::OpenAI, Self::Claude, Self::Gemini];

    /// Model used when the configuration leaves `model` empty.
    pub fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => "llama3.2",
            Self::OpenAI => "gpt-4o-mini",
            Self::Claude => "claude-3-5-sonnet-20241022",
            Self::Gemini => "gemini-1.5-flash",
        }
    }

    /// Hosted providers need a key; a local Ollama does not.
    pub fn requires_api_key(self) -> bool {
        !matches!(self, Self::Ollama)
    }

    /// Ollama is always addressed by URL; OpenAI accepts one for compatible endpoints.
    pub fn accepts_base_url(self) -> bool {
        matches!(self, Self::Ollama | Self::OpenAI)
    }

    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Self::Ollama => Some("http://localhost:11434"),
            _ => None,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ollama => f.write_str("ollama"),
            Self::OpenAI => f.write_str("openai"),
            Self::Claude => f.write_str("claude"),
            Self::Gemini => f.write_str("gemini"),
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "claude" | "anthropic" => Ok(Self::Claude),
            "gemini" | "google" => Ok(Self::Gemini),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// User-supplied provider configuration.
///
/// Never mutated after it has been submitted for testing: a changed
/// configuration is a new value and yields a new session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub provider: Provider,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<ApiKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_name: Option<String>,
}

impl ProviderConfig {
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            api_key: None,
            url: None,
            model: None,
            organization_id: None,
            deployment_name: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(ApiKey::new(key));
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_organization_id(mut self, id: impl Into<String>) -> Self {
        self.organization_id = Some(id.into());
        self
    }

    pub fn with_deployment_name(mut self, name: impl Into<String>) -> Self {
        self.deployment_name = Some(name.into());
        self
    }

    /// Explicit model, or the provider default when absent or blank.
    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.provider.default_model())
    }

    /// Base URL sent to the server; only for providers that accept one.
    pub fn base_url(&self) -> Option<&str> {
        if !self.provider.accepts_base_url() {
            return None;
        }
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .or_else(|| self.provider.default_base_url())
    }

    /// Local sanity checks run before any remote call.
    pub fn check(&self) -> Result<(), SessionError> {
        if self.provider.requires_api_key()
            && self.api_key.as_ref().map_or(true, ApiKey::is_blank)
        {
            return Err(SessionError::ConfigurationTest(format!(
                "an API key is required for {}",
                self.provider
            )));
        }
        if let Some(url) = self.base_url() {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(SessionError::ConfigurationTest(format!(
                    "provider URL must start with http:// or https://, got {url}"
                )));
            }
        }
        Ok(())
    }
}
