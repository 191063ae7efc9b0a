// src/config/env.rs
// Provider credentials from the environment (.env supported)

/// API credentials for the optional HTTP providers. Absence of a key
/// simply means the corresponding provider is not configured - never an
/// error.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    /// Key for the embeddings API (`GEMINI_API_KEY`).
    pub embeddings_api_key: Option<String>,
    /// Key for the OpenAI-compatible completion API
    /// (`ENGRAM_COMPLETION_API_KEY`, falling back to `OPENAI_API_KEY`).
    pub completion_api_key: Option<String>,
    /// Completion endpoint base URL (`ENGRAM_COMPLETION_BASE_URL`).
    pub completion_base_url: Option<String>,
    /// Completion model name (`ENGRAM_COMPLETION_MODEL`).
    pub completion_model: Option<String>,
}

impl ProviderKeys {
    /// Read credentials from the environment, loading a `.env` file
    /// first when one exists.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            embeddings_api_key: std::env::var("GEMINI_API_KEY").ok(),
            completion_api_key: std::env::var("ENGRAM_COMPLETION_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok(),
            completion_base_url: std::env::var("ENGRAM_COMPLETION_BASE_URL").ok(),
            completion_model: std::env::var("ENGRAM_COMPLETION_MODEL").ok(),
        }
    }
}
