use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An upstream LLM provider. Request/response translation for each is
/// out of scope (spec §1) — this enum only identifies routing and
/// pricing-table rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[serde(alias = "OpenAI", alias = "openai")]
    OpenAI,

    #[serde(alias = "Anthropic", alias = "anthropic")]
    Anthropic,

    #[serde(alias = "Google", alias = "google", alias = "vertex")]
    Google,

    Custom(String),
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::OpenAI => "openai",
            Provider::Anthropic => "anthropic",
            Provider::Google => "google",
            Provider::Custom(name) => name,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "openai" => Provider::OpenAI,
            "anthropic" => Provider::Anthropic,
            "google" | "vertex" => Provider::Google,
            other => Provider::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Provider::parse(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parsing() {
        assert_eq!(Provider::from_str("OpenAI").unwrap(), Provider::OpenAI);
        assert_eq!(Provider::from_str("openai").unwrap(), Provider::OpenAI);
        assert_eq!(Provider::from_str("anthropic").unwrap(), Provider::Anthropic);
        assert_eq!(
            Provider::from_str("custom-provider").unwrap(),
            Provider::Custom("custom-provider".to_string())
        );
    }

    #[test]
    fn test_provider_serialization() {
        let provider = Provider::OpenAI;
        let json = serde_json::to_string(&provider).unwrap();
        assert_eq!(json, "\"openai\"");

        let deserialized: Provider = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, Provider::OpenAI);
    }
}
