//! Text completion: the seam between the pipeline and an LLM provider.
//!
//! Cleanup and validation only need "prompt in, text out". They talk to a
//! [`CompletionService`], which keeps them testable with scripted fakes. The
//! production implementation, [`ProviderCompletion`], drives an
//! `edgequake_llm` provider and sorts failures into rate-limit vs everything
//! else, since the two are handled differently upstream.

use crate::config::ConversionConfig;
use crate::error::ServiceError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// Text-in / text-out completion.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, ServiceError>;
}

/// [`CompletionService`] backed by an `edgequake_llm` provider.
pub struct ProviderCompletion {
    provider: Arc<dyn LLMProvider>,
    timeout_secs: u64,
}

impl ProviderCompletion {
    pub fn new(provider: Arc<dyn LLMProvider>, timeout_secs: u64) -> Self {
        Self {
            provider,
            timeout_secs,
        }
    }
}

#[async_trait]
impl CompletionService for ProviderCompletion {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: usize,
        temperature: f32,
    ) -> Result<String, ServiceError> {
        let start = Instant::now();
        let messages = vec![ChatMessage::user(prompt)];
        let options = CompletionOptions {
            temperature: Some(temperature),
            max_tokens: Some(max_tokens),
            ..Default::default()
        };

        let call = self.provider.chat(&messages, Some(&options));
        let response = match timeout(Duration::from_secs(self.timeout_secs), call).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(classify_error(&e.to_string())),
            Err(_) => {
                return Err(ServiceError::Timeout {
                    secs: self.timeout_secs,
                })
            }
        };

        debug!(
            "Completion: {} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );
        Ok(response.content)
    }
}

/// Sort a provider error message into rate-limit or generic failure.
///
/// Providers surface quota exhaustion in several shapes: an HTTP 429 status,
/// OpenAI's `insufficient_quota` / `rate_limit_exceeded` codes, Gemini's
/// `RESOURCE_EXHAUSTED`, or a plain "rate limit" sentence.
pub fn classify_error(message: &str) -> ServiceError {
    let lower = message.to_ascii_lowercase();
    let rate_limited = [
        "429",
        "rate limit",
        "rate_limit",
        "ratelimit",
        "too many requests",
        "quota",
        "resource_exhausted",
    ]
    .iter()
    .any(|needle| lower.contains(needle));

    if rate_limited {
        ServiceError::RateLimited(message.to_string())
    } else {
        ServiceError::Failed(message.to_string())
    }
}

/// Environment variables that indicate a configured provider credential.
const CREDENTIAL_VARS: &[&str] = &[
    "ANTHROPIC_API_KEY",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
    "AZURE_OPENAI_API_KEY",
    "MISTRAL_API_KEY",
    "OPENROUTER_API_KEY",
    "OLLAMA_HOST",
];

/// Instantiate a named provider with the given model.
fn create_provider(provider_name: &str, model: &str) -> Option<Arc<dyn LLMProvider>> {
    match ProviderFactory::create_llm_provider(provider_name, model) {
        Ok(provider) => Some(provider),
        Err(e) => {
            warn!("LLM provider '{}' could not be created: {}", provider_name, e);
            None
        }
    }
}

/// Resolve the completion service, from most-specific to least-specific.
///
/// 1. **Named provider + model** (`config.provider_name`).
/// 2. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 3. **OpenAI key** (`OPENAI_API_KEY`) with `config.model` or `gpt-4.1-nano`.
/// 4. **Full auto-detection** (`ProviderFactory::from_env`), only when one of
///    the known credential variables is set.
///
/// Returns `None` when no credential is available. That is not an error: the
/// pipeline runs with AI cleanup and validation disabled.
pub fn resolve_completion(config: &ConversionConfig) -> Option<Arc<dyn CompletionService>> {
    let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");

    let provider = if let Some(ref name) = config.provider_name {
        create_provider(name, model)
    } else if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            create_provider(&prov, &env_model)
        } else {
            None
        }
    } else if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        create_provider("openai", model)
    } else if CREDENTIAL_VARS
        .iter()
        .any(|v| std::env::var(v).is_ok_and(|k| !k.is_empty()))
    {
        match ProviderFactory::from_env() {
            Ok((llm, _embedding)) => Some(llm),
            Err(e) => {
                debug!("No LLM provider detected from environment: {}", e);
                None
            }
        }
    } else {
        None
    };

    match provider {
        Some(p) => {
            info!("AI completion enabled");
            let service: Arc<dyn CompletionService> =
                Arc::new(ProviderCompletion::new(p, config.api_timeout_secs));
            Some(service)
        }
        None => {
            info!("No AI credential configured; cleanup and validation run in degraded mode");
            None
        }
    }
}
