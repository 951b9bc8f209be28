//! Configuration types for invoice extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. Callers set only what they care about
//! and rely on the documented defaults for the rest.

use crate::error::InvoiceError;
use crate::pipeline::llm::VisionModel;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Upper bound the builder applies to `max_retries`.
pub const MAX_RETRIES: u32 = 5;

/// Configuration for one or more invoice extractions.
///
/// # Example
/// ```rust
/// use comptasnap::{ExtractionConfig, ModelCandidate};
///
/// let config = ExtractionConfig::builder()
///     .candidate("openai:gpt-4.1-nano".parse::<ModelCandidate>().unwrap())
///     .candidate("anthropic:claude-haiku-4-20250514".parse::<ModelCandidate>().unwrap())
///     .api_timeout_secs(30)
///     .build()
///     .unwrap();
/// assert_eq!(config.candidates.len(), 2);
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// Models to try, in order, when the client is first built. The first one
    /// that constructs is kept for the rest of the process. Empty means
    /// auto-detect from the environment.
    pub candidates: Vec<ModelCandidate>,

    /// Pre-constructed model. Takes precedence over `candidates`.
    pub model: Option<Arc<dyn VisionModel>>,

    /// Sampling temperature. Default: 0.1.
    ///
    /// Transcription wants the model faithful to the page, not creative.
    pub temperature: f32,

    /// Maximum tokens the model may generate. Default: 1024.
    ///
    /// The expected answer is a six-key object; the headroom covers models
    /// that ignore the "no prose" rule and explain themselves first.
    pub max_tokens: usize,

    /// Extra attempts after a failed or timed-out model call. Default: 1.
    /// The builder caps it at [`MAX_RETRIES`].
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call model timeout in seconds. Default: 30.
    pub api_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 60.
    pub download_timeout_secs: u64,

    /// Largest width or height sent to the model, in pixels. Default: 2000.
    ///
    /// Phone photos are often 4000 px or more, well past what providers bill
    /// usefully for. Larger images are downscaled before encoding. `None`
    /// sends the original bytes untouched.
    pub max_image_dimension: Option<u32>,

    /// How strictly the model answer is read. Default: [`ParseMode::Lenient`].
    pub parse_mode: ParseMode,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            candidates: Vec::new(),
            model: None,
            temperature: 0.1,
            max_tokens: 1024,
            max_retries: 1,
            retry_backoff_ms: 500,
            api_timeout_secs: 30,
            download_timeout_secs: 60,
            max_image_dimension: Some(2000),
            parse_mode: ParseMode::default(),
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("candidates", &self.candidates)
            .field("model", &self.model.as_ref().map(|m| m.label().to_string()))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_image_dimension", &self.max_image_dimension)
            .field("parse_mode", &self.parse_mode)
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn candidate(mut self, candidate: ModelCandidate) -> Self {
        self.config.candidates.push(candidate);
        self
    }

    pub fn candidates(mut self, candidates: impl IntoIterator<Item = ModelCandidate>) -> Self {
        self.config.candidates.extend(candidates);
        self
    }

    pub fn model(mut self, model: Arc<dyn VisionModel>) -> Self {
        self.config.model = Some(model);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(MAX_RETRIES);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn max_image_dimension(mut self, px: Option<u32>) -> Self {
        self.config.max_image_dimension = px.map(|p| p.max(64));
        self
    }

    pub fn parse_mode(mut self, mode: ParseMode) -> Self {
        self.config.parse_mode = mode;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, InvoiceError> {
        let c = &self.config;
        if c.api_timeout_secs == 0 {
            return Err(InvoiceError::InvalidConfig(
                "API timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_tokens < 64 {
            return Err(InvoiceError::InvalidConfig(format!(
                "max_tokens must be ≥ 64, got {}",
                c.max_tokens
            )));
        }
        Ok(self.config)
    }
}

// ── Model candidates ─────────────────────────────────────────────────────

/// One provider/model pair to try when building the client.
///
/// Parsed from `provider:model`, e.g. `openai:gpt-4.1-nano` or
/// `ollama:llama3.2-vision`. Only the first `:` separates the two halves, so
/// model tags such as `ollama:llava:13b` keep their own colon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub provider: String,
    pub model: String,
}

impl ModelCandidate {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for ModelCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

impl FromStr for ModelCandidate {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (provider, model) = s.trim().split_once(':').ok_or_else(|| {
            InvoiceError::InvalidConfig(format!(
                "model candidate '{s}' must look like provider:model"
            ))
        })?;
        let (provider, model) = (provider.trim(), model.trim());
        if provider.is_empty() || model.is_empty() {
            return Err(InvoiceError::InvalidConfig(format!(
                "model candidate '{s}' has an empty provider or model"
            )));
        }
        Ok(Self::new(provider.to_lowercase(), model))
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the response parser locates the JSON object in the model's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ParseMode {
    /// Take the span from the first `{` to the last `}`. Tolerates prose and
    /// code fences around the object. (default)
    #[default]
    Lenient,
    /// The whole trimmed answer must be a single JSON object.
    Strict,
}
