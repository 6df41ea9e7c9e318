use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Stable identifier of a backend family. Immutable per client instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTag {
    /// Self-hosted Ollama server.
    Ollama,
    /// Hosted Ollama Cloud (same wire format, authenticated).
    OllamaCloud,
    /// OpenAI chat completions.
    OpenAi,
    /// DeepSeek chat completions (OpenAI-compatible).
    DeepSeek,
}

impl ProviderTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTag::Ollama => "ollama",
            ProviderTag::OllamaCloud => "ollama_cloud",
            ProviderTag::OpenAi => "openai",
            ProviderTag::DeepSeek => "deepseek",
        }
    }

    pub const ALL: [ProviderTag; 4] = [
        ProviderTag::Ollama,
        ProviderTag::OllamaCloud,
        ProviderTag::OpenAi,
        ProviderTag::DeepSeek,
    ];
}

impl std::fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderTag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ollama" => Ok(ProviderTag::Ollama),
            "ollama_cloud" => Ok(ProviderTag::OllamaCloud),
            "openai" => Ok(ProviderTag::OpenAi),
            "deepseek" => Ok(ProviderTag::DeepSeek),
            other => Err(Error::Config(format!("unknown provider '{other}'"))),
        }
    }
}
