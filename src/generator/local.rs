use std::sync::RwLock;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::GenerationError;
use super::prompt::instruct_prompt;
use crate::config::OllamaConfig;

pub const TIMEOUT_MESSAGE: &str = "Sorry, generation took too long and timed out.";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Short-timeout liveness check against `GET /api/tags`.
pub(crate) async fn probe(client: &Client, base_url: &str, timeout: Duration) -> bool {
    let result = client
        .get(format!("{base_url}/api/tags"))
        .timeout(timeout)
        .send()
        .await;
    match result {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            debug!("Local inference server probe failed: {e}");
            false
        }
    }
}

/// Provider backed by a local Ollama server.
pub struct LocalGenerator {
    client: Client,
    base_url: String,
    /// Swappable at runtime; read on every request.
    model: RwLock<String>,
    temperature: f32,
    max_tokens: u32,
    probe_timeout: Duration,
}

impl LocalGenerator {
    pub fn new(cfg: &OllamaConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Configuration(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: cfg.url.trim_end_matches('/').to_string(),
            model: RwLock::new(cfg.model.clone()),
            temperature: cfg.temperature,
            max_tokens: cfg.max_tokens,
            probe_timeout: Duration::from_secs(cfg.probe_timeout_secs),
        })
    }

    pub fn current_model(&self) -> String {
        match self.model.read() {
            Ok(model) => model.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_model(&self, name: &str) {
        match self.model.write() {
            Ok(mut model) => *model = name.to_string(),
            Err(poisoned) => *poisoned.into_inner() = name.to_string(),
        }
        info!("Local generator now uses model {name}");
    }

    pub async fn is_available(&self) -> bool {
        probe(&self.client, &self.base_url, self.probe_timeout).await
    }

    /// Never fails: a timeout yields [`TIMEOUT_MESSAGE`], any other error a
    /// communication-error message.
    pub async fn generate(&self, context: &str, query: &str) -> String {
        match self.request(&instruct_prompt(context, query)).await {
            Ok(text) => text,
            Err(GenerationError::Timeout) => {
                warn!("Local generation timed out");
                TIMEOUT_MESSAGE.to_string()
            }
            Err(e) => {
                error!("Local generation failed: {e}");
                format!("Sorry, communication with the local inference server failed: {e}")
            }
        }
    }

    async fn request(&self, prompt: &str) -> Result<String, GenerationError> {
        let model = self.current_model();
        let body = GenerateRequest {
            model: &model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
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
        Ok(parsed.response.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(url: &str) -> OllamaConfig {
        OllamaConfig {
            url: url.to_string(),
            ..OllamaConfig::default()
        }
    }

    #[tokio::test]
    async fn test_generate_sends_model_and_options() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(serde_json::json!({
                "model": "mistral",
                "stream": false,
                "options": {"num_predict": 1000}
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": " The answer. "})),
            )
            .mount(&server)
            .await;

        let generator = LocalGenerator::new(&config(&server.uri())).unwrap();
        assert_eq!(generator.generate("ctx", "q").await, "The answer.");
    }

    #[tokio::test]
    async fn test_timeout_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "late"}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let cfg = OllamaConfig {
            timeout_secs: 1,
            ..config(&server.uri())
        };
        let generator = LocalGenerator::new(&cfg).unwrap();
        assert_eq!(generator.generate("ctx", "q").await, TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn test_server_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let generator = LocalGenerator::new(&config(&server.uri())).unwrap();
        let answer = generator.generate("ctx", "q").await;
        assert!(answer.starts_with("Sorry, communication"));
        assert_ne!(answer, TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn test_set_model_used_in_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"model": "llama3"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "ok"})),
            )
            .mount(&server)
            .await;

        let generator = LocalGenerator::new(&config(&server.uri())).unwrap();
        generator.set_model("llama3");
        assert_eq!(generator.current_model(), "llama3");
        assert_eq!(generator.generate("ctx", "q").await, "ok");
    }

    #[tokio::test]
    async fn test_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"models": []})))
            .mount(&server)
            .await;

        let generator = LocalGenerator::new(&config(&server.uri())).unwrap();
        assert!(generator.is_available().await);

        let offline = LocalGenerator::new(&config("http://127.0.0.1:9")).unwrap();
        assert!(!offline.is_available().await);
    }
}
