use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::GenerationError;
use super::prompt::grounded_prompt;
use crate::config::GeminiConfig;

pub const APOLOGY: &str = "Sorry, an error occurred while contacting the hosted generation API.";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Gemini `generateContent` provider.
pub struct HostedGenerator {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl HostedGenerator {
    /// Reads the API key from the environment variable named in `cfg`.
    pub fn new(cfg: &GeminiConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&cfg.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                GenerationError::Configuration(format!(
                    "API key not found, set the {} environment variable",
                    cfg.api_key_env
                ))
            })?;
        Self::with_api_key(cfg, api_key)
    }

    pub fn with_api_key(cfg: &GeminiConfig, api_key: String) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Configuration(format!("http client: {e}")))?;

        info!("Hosted generator initialized with model {}", cfg.model);
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
        })
    }

    pub fn current_model(&self) -> &str {
        &self.model
    }

    /// Never fails: errors become [`APOLOGY`].
    pub async fn generate(&self, context: &str, query: &str) -> String {
        match self.request(&grounded_prompt(context, query)).await {
            Ok(text) => text,
            Err(e) => {
                error!("Hosted generation failed: {e}");
                APOLOGY.to_string()
            }
        }
    }

    async fn request(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let body = GenerateRequest {
            contents: [Content {
                parts: [Part { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(GenerationError::from_http)?
            .error_for_status()
            .map_err(GenerationError::from_http)?;

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(GenerationError::from_http)?;

        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .ok_or_else(|| GenerationError::Failed("response has no candidates".to_string()))?;

        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: &str) -> GeminiConfig {
        GeminiConfig {
            base_url: base_url.to_string(),
            api_key_env: "DOCRAG_TEST_UNSET_GEMINI_KEY".to_string(),
            ..GeminiConfig::default()
        }
    }

    #[test]
    fn test_missing_api_key() {
        let err = HostedGenerator::new(&config("http://localhost:1"))
            .err()
            .unwrap();
        assert!(matches!(err, GenerationError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_generate_returns_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"parts": [{"text": "  Paris.  "}]}}]
            })))
            .mount(&server)
            .await;

        let generator =
            HostedGenerator::with_api_key(&config(&server.uri()), "secret".to_string()).unwrap();
        assert_eq!(generator.generate("ctx", "capital?").await, "Paris.");
    }

    #[tokio::test]
    async fn test_generate_error_becomes_apology() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let generator =
            HostedGenerator::with_api_key(&config(&server.uri()), "secret".to_string()).unwrap();
        assert_eq!(generator.generate("ctx", "q").await, APOLOGY);
    }
}
