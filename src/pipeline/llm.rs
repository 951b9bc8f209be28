//! VLM interaction: pick a model once, then send it invoice images.
//!
//! [`VisionModel`] is the seam between the pipeline and a provider. The
//! production implementation, [`LlmVisionModel`], wraps any `edgequake-llm`
//! provider; tests and embedders can plug in their own.
//!
//! ## Model selection
//!
//! [`ModelClient::connect`] walks the configured candidates in order and keeps
//! the first one that constructs (API key present, provider known). That
//! choice is final: later call failures are retried on the same model rather
//! than falling through to the next candidate, so one session never mixes
//! answers from different models. [`ClientCell`] caches the client for the
//! process lifetime.
//!
//! ## Retry strategy
//!
//! Every call is bounded by `api_timeout_secs`. A failed or timed-out call is
//! retried up to `max_retries` times with exponential backoff
//! (`retry_backoff_ms * 2^attempt`, capped at [`MAX_BACKOFF_MS`]).

use crate::config::{ExtractionConfig, ModelCandidate};
use crate::error::InvoiceError;
use crate::pipeline::normalize::EncodedImage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Error returned by a single model call.
pub type ModelCallError = Box<dyn std::error::Error + Send + Sync>;

/// Text and token usage of one successful model call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub content: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

/// A vision-capable model that answers one image plus one instruction.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Human-readable identity, e.g. `openai:gpt-4.1-nano`.
    fn label(&self) -> &str;

    async fn complete(
        &self,
        instruction: &str,
        image: &EncodedImage,
        options: &CompletionOptions,
    ) -> Result<ModelReply, ModelCallError>;
}

/// [`VisionModel`] backed by an `edgequake-llm` provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    label: String,
}

impl LlmVisionModel {
    pub fn new(provider: Arc<dyn LLMProvider>, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }

    /// Build the provider for `candidate` via [`ProviderFactory`], which reads
    /// the matching API key (`OPENAI_API_KEY`, …) from the environment.
    pub fn from_candidate(candidate: &ModelCandidate) -> Result<Self, ModelCallError> {
        let provider =
            ProviderFactory::create_llm_provider(&candidate.provider, &candidate.model)
                .map_err(|e| e.to_string())?;
        Ok(Self::new(provider, candidate.to_string()))
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    fn label(&self) -> &str {
        &self.label
    }

    /// One user turn carrying both the instruction and the photo.
    async fn complete(
        &self,
        instruction: &str,
        image: &EncodedImage,
        options: &CompletionOptions,
    ) -> Result<ModelReply, ModelCallError> {
        let messages = vec![ChatMessage::user_with_images(
            instruction,
            vec![image.to_image_data()],
        )];
        let response = self
            .provider
            .chat(&messages, Some(options))
            .await
            .map_err(|e| e.to_string())?;
        Ok(ModelReply {
            content: response.content,
            input_tokens: response.prompt_tokens as usize,
            output_tokens: response.completion_tokens as usize,
        })
    }
}

/// The model's answer as received, with call metadata.
#[derive(Debug, Clone)]
pub struct RawModelResponse {
    pub text: String,
    pub model: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub retries: u32,
    pub duration_ms: u64,
}

/// Handle on the committed model. Cheap to clone, immutable once built.
#[derive(Clone)]
pub struct ModelClient {
    model: Arc<dyn VisionModel>,
}

impl std::fmt::Debug for ModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelClient")
            .field("model", &self.model.label())
            .finish()
    }
}

impl ModelClient {
    /// Wrap an already-built model.
    pub fn from_model(model: Arc<dyn VisionModel>) -> Self {
        Self { model }
    }

    pub fn label(&self) -> &str {
        self.model.label()
    }

    /// Resolve the model, from most-specific to least-specific:
    ///
    /// 1. **Pre-built model** (`config.model`), used as-is.
    /// 2. **Candidates** (`config.candidates`), first one that constructs.
    /// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
    /// 4. **OpenAI** when `OPENAI_API_KEY` is set (`gpt-4.1-nano`).
    /// 5. **Full auto-detection** (`ProviderFactory::from_env`).
    pub fn connect(config: &ExtractionConfig) -> Result<Self, InvoiceError> {
        if let Some(ref model) = config.model {
            return Ok(Self::from_model(Arc::clone(model)));
        }

        if !config.candidates.is_empty() {
            return Self::connect_with(&config.candidates, |c| {
                LlmVisionModel::from_candidate(c).map(|m| Arc::new(m) as Arc<dyn VisionModel>)
            });
        }

        if let (Ok(prov), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                let candidate = ModelCandidate::new(prov, model);
                return Self::connect_with(std::slice::from_ref(&candidate), |c| {
                    LlmVisionModel::from_candidate(c).map(|m| Arc::new(m) as Arc<dyn VisionModel>)
                });
            }
        }

        if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
            if !openai_key.is_empty() {
                let candidate = ModelCandidate::new("openai", "gpt-4.1-nano");
                return Self::connect_with(std::slice::from_ref(&candidate), |c| {
                    LlmVisionModel::from_candidate(c).map(|m| Arc::new(m) as Arc<dyn VisionModel>)
                });
            }
        }

        let (provider, _embedding) =
            ProviderFactory::from_env().map_err(|e| InvoiceError::ModelUnavailable {
                tried: vec!["auto".to_string()],
                detail: format!(
                    "No vision provider could be auto-detected from environment.\n\
                    Set OPENAI_API_KEY, ANTHROPIC_API_KEY, GEMINI_API_KEY or pass --model provider:model.\n\
                    Error: {e}"
                ),
            })?;
        info!("Auto-detected vision provider from environment");
        Ok(Self::from_model(Arc::new(LlmVisionModel::new(provider, "auto"))))
    }

    /// Try `candidates` in order with `build`, committing to the first success.
    pub fn connect_with<F>(candidates: &[ModelCandidate], mut build: F) -> Result<Self, InvoiceError>
    where
        F: FnMut(&ModelCandidate) -> Result<Arc<dyn VisionModel>, ModelCallError>,
    {
        let mut failures = Vec::new();
        for candidate in candidates {
            match build(candidate) {
                Ok(model) => {
                    info!("Using vision model {}", candidate);
                    return Ok(Self::from_model(model));
                }
                Err(e) => {
                    warn!("Model {} unavailable — {}", candidate, e);
                    failures.push(format!("{candidate}: {e}"));
                }
            }
        }

        Err(InvoiceError::ModelUnavailable {
            tried: candidates.iter().map(ToString::to_string).collect(),
            detail: if failures.is_empty() {
                "no model candidates configured".to_string()
            } else {
                failures.join("\n")
            },
        })
    }

    /// Process-wide client, built on first use and reused afterwards.
    ///
    /// The configuration only matters for the first successful call; later
    /// calls get the committed client whatever they pass.
    pub fn shared(config: &ExtractionConfig) -> Result<&'static ModelClient, InvoiceError> {
        static SHARED: ClientCell = ClientCell::new();
        SHARED.get_or_connect(config)
    }

    /// Send `instruction` and `image` to the committed model.
    pub async fn extract(
        &self,
        image: &EncodedImage,
        instruction: &str,
        config: &ExtractionConfig,
    ) -> Result<RawModelResponse, InvoiceError> {
        let start = Instant::now();
        let options = build_options(config);
        let limit = Duration::from_secs(config.api_timeout_secs);

        let mut last_err = String::from("Unknown error");
        let mut timed_out = false;

        for attempt in 0..=config.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(config.retry_backoff_ms, attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    self.label(),
                    attempt,
                    config.max_retries,
                    backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match timeout(limit, self.model.complete(instruction, image, &options)).await {
                Ok(Ok(reply)) => {
                    let duration = start.elapsed();
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        self.label(),
                        reply.input_tokens,
                        reply.output_tokens,
                        duration
                    );
                    return Ok(RawModelResponse {
                        text: reply.content,
                        model: self.label().to_string(),
                        input_tokens: reply.input_tokens,
                        output_tokens: reply.output_tokens,
                        retries: attempt,
                        duration_ms: duration.as_millis() as u64,
                    });
                }
                Ok(Err(e)) => {
                    warn!("{}: attempt {} failed — {}", self.label(), attempt + 1, e);
                    last_err = e.to_string();
                    timed_out = false;
                }
                Err(_) => {
                    warn!(
                        "{}: attempt {} timed out after {}s",
                        self.label(),
                        attempt + 1,
                        config.api_timeout_secs
                    );
                    last_err = format!("timed out after {}s", config.api_timeout_secs);
                    timed_out = true;
                }
            }
        }

        Err(InvoiceError::ModelInvocation {
            model: self.label().to_string(),
            attempts: config.max_retries.saturating_add(1),
            timed_out,
            detail: last_err,
        })
    }
}

/// One-time-initialised slot holding a [`ModelClient`].
///
/// A failed initialisation leaves the slot empty, so the next call tries the
/// candidates again.
pub struct ClientCell {
    inner: OnceCell<ModelClient>,
}

impl ClientCell {
    pub const fn new() -> Self {
        Self {
            inner: OnceCell::new(),
        }
    }

    pub fn get(&self) -> Option<&ModelClient> {
        self.inner.get()
    }

    pub fn get_or_connect(&self, config: &ExtractionConfig) -> Result<&ModelClient, InvoiceError> {
        self.inner.get_or_try_init(|| ModelClient::connect(config))
    }
}

impl Default for ClientCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest single wait between two attempts.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Delay before retry number `attempt` (1-based).
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base.saturating_mul(factor).min(MAX_BACKOFF_MS)
}

/// Build `CompletionOptions` from the extraction config.
fn build_options(config: &ExtractionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl VisionModel for Named {
        fn label(&self) -> &str {
            self.0
        }

        async fn complete(
            &self,
            _instruction: &str,
            _image: &EncodedImage,
            _options: &CompletionOptions,
        ) -> Result<ModelReply, ModelCallError> {
            Ok(ModelReply {
                content: "{}".into(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn backoff_doubles_then_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 4), 4000);
        assert_eq!(backoff_ms(500, 70), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(u64::MAX, 2), MAX_BACKOFF_MS);
        assert_eq!(backoff_ms(0, u32::MAX), 0);
    }

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&ExtractionConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(1024));
    }

    #[test]
    fn first_constructible_candidate_wins() {
        let candidates = vec![
            ModelCandidate::new("groq", "llama-3.2-11b-vision-preview"),
            ModelCandidate::new("openai", "gpt-4.1-nano"),
            ModelCandidate::new("gemini", "gemini-2.0-flash"),
        ];
        let mut attempted = Vec::new();
        let client = ModelClient::connect_with(&candidates, |c| {
            attempted.push(c.to_string());
            match c.provider.as_str() {
                "groq" => Err("model decommissioned".into()),
                "openai" => Ok(Arc::new(Named("openai:gpt-4.1-nano")) as Arc<dyn VisionModel>),
                _ => panic!("should not try past the first working candidate"),
            }
        })
        .unwrap();
        assert_eq!(client.label(), "openai:gpt-4.1-nano");
        assert_eq!(attempted.len(), 2);
    }

    #[test]
    fn no_working_candidate_is_unavailable() {
        let candidates = vec![
            ModelCandidate::new("groq", "llama-3.2-11b-vision-preview"),
            ModelCandidate::new("openai", "gpt-4.1-nano"),
        ];
        let err = ModelClient::connect_with(&candidates, |_| Err("missing API key".into()))
            .unwrap_err();
        match err {
            InvoiceError::ModelUnavailable { tried, detail } => {
                assert_eq!(tried.len(), 2);
                assert!(detail.contains("missing API key"));
            }
            other => panic!("expected ModelUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn empty_candidate_list_is_unavailable() {
        let err = ModelClient::connect_with(&[], |_| unreachable!()).unwrap_err();
        assert!(matches!(err, InvoiceError::ModelUnavailable { .. }));
    }

    #[test]
    fn injected_model_takes_precedence() {
        let config = ExtractionConfig::builder()
            .model(Arc::new(Named("fake:vision")))
            .candidate(ModelCandidate::new("openai", "gpt-4.1"))
            .build()
            .unwrap();
        let client = ModelClient::connect(&config).unwrap();
        assert_eq!(client.label(), "fake:vision");
    }

    #[test]
    fn cell_commits_to_first_client() {
        let cell = ClientCell::new();
        assert!(cell.get().is_none());

        let first = ExtractionConfig::builder()
            .model(Arc::new(Named("first")))
            .build()
            .unwrap();
        let second = ExtractionConfig::builder()
            .model(Arc::new(Named("second")))
            .build()
            .unwrap();

        assert_eq!(cell.get_or_connect(&first).unwrap().label(), "first");
        assert_eq!(cell.get_or_connect(&second).unwrap().label(), "first");
    }
}
