//! Response generation behind a closed set of providers.
//!
//! The provider is picked once by [`get_handler`]. Whatever the configuration,
//! the factory hands back a usable generator, falling back to the offline
//! template when a backend cannot be constructed or does not answer its
//! probe. [`ResponseGenerator::generate`] never returns an error: provider
//! failures are turned into user-facing text.
pub mod hosted;
pub mod local;
pub mod prompt;
pub mod template;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::LlmConfig;
pub use hosted::HostedGenerator;
pub use local::LocalGenerator;
pub use template::TemplateGenerator;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("generation timed out")]
    Timeout,

    #[error("generation failed: {0}")]
    Failed(String),

    #[error("provider configuration error: {0}")]
    Configuration(String),
}

impl GenerationError {
    pub(crate) fn from_http(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Failed(e.to_string())
        }
    }
}

pub enum ResponseGenerator {
    Template(TemplateGenerator),
    Hosted(HostedGenerator),
    Local(LocalGenerator),
}

impl ResponseGenerator {
    pub async fn generate(&self, context: &str, query: &str) -> String {
        match self {
            Self::Template(g) => g.generate(context, query),
            Self::Hosted(g) => g.generate(context, query).await,
            Self::Local(g) => g.generate(context, query).await,
        }
    }

    pub fn current_model(&self) -> String {
        match self {
            Self::Template(_) => TemplateGenerator::MODEL_NAME.to_string(),
            Self::Hosted(g) => g.current_model().to_string(),
            Self::Local(g) => g.current_model(),
        }
    }

    /// Switch the model used for subsequent requests. Only the local
    /// provider supports this; returns whether the switch happened.
    pub fn set_model(&self, name: &str) -> bool {
        match self {
            Self::Local(g) => {
                g.set_model(name);
                true
            }
            _ => false,
        }
    }

    pub fn provider(&self) -> &'static str {
        match self {
            Self::Template(_) => "template",
            Self::Hosted(_) => "gemini",
            Self::Local(_) => "ollama",
        }
    }
}

/// Build the configured provider, degrading to the template provider on any
/// failure. Provider names are matched case-insensitively.
pub async fn get_handler(cfg: &LlmConfig) -> ResponseGenerator {
    let provider = cfg.provider.trim().to_ascii_lowercase();

    let built = match provider.as_str() {
        "gemini" => {
            info!("LLM provider: gemini");
            build_hosted(cfg)
        }
        "ollama" => {
            info!("LLM provider: ollama");
            build_local(cfg).await
        }
        "template" | "simple" => return ResponseGenerator::Template(TemplateGenerator),
        other => {
            info!("Unknown LLM provider '{other}', using the template provider");
            return ResponseGenerator::Template(TemplateGenerator);
        }
    };

    match built {
        Ok(generator) => generator,
        Err(e) => {
            error!("Failed to initialize {provider} provider: {e}");
            warn!("Falling back to the template provider");
            ResponseGenerator::Template(TemplateGenerator)
        }
    }
}

fn build_hosted(cfg: &LlmConfig) -> Result<ResponseGenerator, GenerationError> {
    let gemini = cfg
        .gemini
        .as_ref()
        .ok_or_else(|| GenerationError::Configuration("missing llm.gemini section".to_string()))?;
    Ok(ResponseGenerator::Hosted(HostedGenerator::new(gemini)?))
}

async fn build_local(cfg: &LlmConfig) -> Result<ResponseGenerator, GenerationError> {
    let ollama = cfg
        .ollama
        .as_ref()
        .ok_or_else(|| GenerationError::Configuration("missing llm.ollama section".to_string()))?;
    let generator = LocalGenerator::new(ollama)?;

    if !generator.is_available().await {
        return Err(GenerationError::BackendUnavailable(ollama.url.clone()));
    }
    info!(
        "Local inference server available, model {}",
        generator.current_model()
    );
    Ok(ResponseGenerator::Local(generator))
}
