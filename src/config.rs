//! Configuration types for attachment text extraction.
//!
//! All behaviour is controlled through [`ExtractorConfig`], built via its
//! [`ExtractorConfigBuilder`]. The config is handed to the
//! [`crate::extractor::Extractor`] at construction; changing the active
//! backend means building a new config and calling
//! [`crate::extractor::Extractor::reconfigure`], which releases the old
//! backend before the new one is created.

use crate::error::ExtractError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default number of OCR calls in flight at once.
pub const DEFAULT_WAVE_SIZE: usize = 5;
/// Default number of additional attempts for retryable backend errors.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Default title written after the callout marker.
pub const DEFAULT_CALLOUT_TITLE: &str = "Extracted text";

/// Which OCR backend handles attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Local recognition engine (tesseract).
    #[default]
    Tesseract,
    /// Mistral OCR cloud API.
    Mistral,
    /// Vision LLM through edgequake-llm.
    Vision,
    /// User-supplied shell command.
    Command,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Tesseract => "tesseract",
            BackendKind::Mistral => "mistral",
            BackendKind::Vision => "vision",
            BackendKind::Command => "command",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            BackendKind::Tesseract => "Tesseract",
            BackendKind::Mistral => "Mistral OCR",
            BackendKind::Vision => "Vision LLM",
            BackendKind::Command => "Custom command",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tesseract" | "local" => Some(BackendKind::Tesseract),
            "mistral" => Some(BackendKind::Mistral),
            "vision" | "llm" => Some(BackendKind::Vision),
            "command" | "custom" | "customcommand" => Some(BackendKind::Command),
            _ => None,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for an extraction run.
///
/// Built via [`ExtractorConfig::builder()`] or using
/// [`ExtractorConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_ocr_notes::{BackendKind, ExtractorConfig};
///
/// let config = ExtractorConfig::builder()
///     .backend(BackendKind::Command)
///     .custom_command("ocr.sh {input} {output}")
///     .wave_size(3)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractorConfig {
    /// Active backend variant. Default: [`BackendKind::Tesseract`].
    pub backend: BackendKind,

    /// Maximum OCR calls in flight at once. Default: 5.
    ///
    /// Calls run in waves: a wave must fully settle before the next starts,
    /// which keeps cloud backends under their rate limits.
    pub wave_size: usize,

    /// Additional attempts after a retryable backend error. Default: 3.
    pub max_retries: u32,

    /// First backoff delay; doubles after each attempt. Default: 1 s.
    pub retry_base_delay: Duration,

    /// How often in-flight OCR calls check for cancellation. Default: 1 s.
    pub cancel_poll_interval: Duration,

    /// Hard timeout for one external-command invocation. Default: 120 s.
    pub command_timeout: Duration,

    /// Title written after the callout marker. Default: "Extracted text".
    pub callout_title: String,

    /// Use the PDF text layer when it has text, skipping OCR. Default: false.
    pub use_embedded_pdf_text: bool,

    /// Tesseract language code. Default: "eng".
    pub tesseract_language: String,

    /// API key for the Mistral OCR backend.
    pub mistral_api_key: Option<String>,

    /// Mistral OCR model. Default: "mistral-ocr-latest".
    pub mistral_model: String,

    /// Shell command template for the external-process backend, using
    /// `{input}` and `{output}` placeholders.
    pub custom_command: String,

    /// Rasterise PDF pages to PNG before running the custom command. Default: false.
    pub custom_command_convert_pdfs: bool,

    /// edgequake-llm provider name (e.g. "openai"). If None, auto-detected.
    pub vision_provider: Option<String>,

    /// Vision model id. If None, uses "gpt-4.1-nano".
    pub vision_model: Option<String>,

    /// Pre-constructed vision provider. Takes precedence over `vision_provider`.
    pub vision_llm: Option<Arc<dyn LLMProvider>>,

    /// Longest edge in pixels when rasterising PDF pages. Default: 2000.
    pub render_max_pixels: u32,

    /// Emit per-document and per-attachment debug events. Default: false.
    pub debug_logging: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            wave_size: DEFAULT_WAVE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: Duration::from_secs(1),
            cancel_poll_interval: Duration::from_secs(1),
            command_timeout: Duration::from_secs(120),
            callout_title: DEFAULT_CALLOUT_TITLE.to_string(),
            use_embedded_pdf_text: false,
            tesseract_language: "eng".to_string(),
            mistral_api_key: None,
            mistral_model: "mistral-ocr-latest".to_string(),
            custom_command: String::new(),
            custom_command_convert_pdfs: false,
            vision_provider: None,
            vision_model: None,
            vision_llm: None,
            render_max_pixels: 2000,
            debug_logging: false,
        }
    }
}

impl fmt::Debug for ExtractorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractorConfig")
            .field("backend", &self.backend)
            .field("wave_size", &self.wave_size)
            .field("max_retries", &self.max_retries)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("cancel_poll_interval", &self.cancel_poll_interval)
            .field("command_timeout", &self.command_timeout)
            .field("callout_title", &self.callout_title)
            .field("use_embedded_pdf_text", &self.use_embedded_pdf_text)
            .field("tesseract_language", &self.tesseract_language)
            .field(
                "mistral_api_key",
                &self.mistral_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("mistral_model", &self.mistral_model)
            .field("custom_command", &self.custom_command)
            .field("custom_command_convert_pdfs", &self.custom_command_convert_pdfs)
            .field("vision_provider", &self.vision_provider)
            .field("vision_model", &self.vision_model)
            .field("vision_llm", &self.vision_llm.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("render_max_pixels", &self.render_max_pixels)
            .field("debug_logging", &self.debug_logging)
            .finish()
    }
}

impl ExtractorConfig {
    /// Create a new builder for `ExtractorConfig`.
    pub fn builder() -> ExtractorConfigBuilder {
        ExtractorConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ExtractorConfig`].
#[derive(Debug)]
pub struct ExtractorConfigBuilder {
    config: ExtractorConfig,
}

impl ExtractorConfigBuilder {
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.config.backend = kind;
        self
    }

    pub fn wave_size(mut self, n: usize) -> Self {
        self.config.wave_size = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn cancel_poll_interval(mut self, interval: Duration) -> Self {
        self.config.cancel_poll_interval = interval;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout = timeout;
        self
    }

    pub fn callout_title(mut self, title: impl Into<String>) -> Self {
        self.config.callout_title = title.into();
        self
    }

    pub fn use_embedded_pdf_text(mut self, v: bool) -> Self {
        self.config.use_embedded_pdf_text = v;
        self
    }

    pub fn tesseract_language(mut self, lang: impl Into<String>) -> Self {
        self.config.tesseract_language = lang.into();
        self
    }

    pub fn mistral_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.mistral_api_key = Some(key.into());
        self
    }

    pub fn mistral_model(mut self, model: impl Into<String>) -> Self {
        self.config.mistral_model = model.into();
        self
    }

    pub fn custom_command(mut self, command: impl Into<String>) -> Self {
        self.config.custom_command = command.into();
        self
    }

    pub fn custom_command_convert_pdfs(mut self, v: bool) -> Self {
        self.config.custom_command_convert_pdfs = v;
        self
    }

    pub fn vision_provider(mut self, name: impl Into<String>) -> Self {
        self.config.vision_provider = Some(name.into());
        self
    }

    pub fn vision_model(mut self, model: impl Into<String>) -> Self {
        self.config.vision_model = Some(model.into());
        self
    }

    pub fn vision_llm(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.vision_llm = Some(provider);
        self
    }

    pub fn render_max_pixels(mut self, px: u32) -> Self {
        self.config.render_max_pixels = px.max(100);
        self
    }

    pub fn debug_logging(mut self, v: bool) -> Self {
        self.config.debug_logging = v;
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Backend-specific settings (API key, command template) are checked when
    /// the backend runs, so that a misconfiguration surfaces as a user-facing
    /// run error rather than preventing startup.
    pub fn build(self) -> Result<ExtractorConfig, ExtractError> {
        let c = &self.config;
        if c.wave_size == 0 {
            return Err(ExtractError::InvalidConfig("Wave size must be at least 1".into()));
        }
        if c.cancel_poll_interval.is_zero() {
            return Err(ExtractError::InvalidConfig(
                "Cancellation poll interval must be > 0".into(),
            ));
        }
        if c.command_timeout.is_zero() {
            return Err(ExtractError::InvalidConfig(
                "Command timeout must be > 0".into(),
            ));
        }
        if c.callout_title.contains('\n') {
            return Err(ExtractError::InvalidConfig(
                "Callout title must be a single line".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_values() {
        let c = ExtractorConfig::default();
        assert_eq!(c.wave_size, 5);
        assert_eq!(c.max_retries, 3);
        assert_eq!(c.retry_base_delay, Duration::from_secs(1));
        assert_eq!(c.cancel_poll_interval, Duration::from_secs(1));
        assert_eq!(c.callout_title, "Extracted text");
        assert_eq!(c.backend, BackendKind::Tesseract);
    }

    #[test]
    fn zero_wave_size_rejected() {
        let err = ExtractorConfig::builder().wave_size(0).build().unwrap_err();
        assert!(err.to_string().contains("Wave size"));
    }

    #[test]
    fn multiline_title_rejected() {
        assert!(ExtractorConfig::builder()
            .callout_title("a\nb")
            .build()
            .is_err());
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ExtractorConfig::builder()
            .mistral_api_key("sk-secret")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn backend_kind_parse() {
        assert_eq!(BackendKind::parse("Mistral"), Some(BackendKind::Mistral));
        assert_eq!(BackendKind::parse("custom"), Some(BackendKind::Command));
        assert_eq!(BackendKind::parse("nope"), None);
        assert_eq!(BackendKind::Vision.to_string(), "vision");
    }
}
