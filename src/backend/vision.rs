//! Vision-LLM backend: transcribe page images with a multimodal chat model.
//!
//! PDF pages are rasterised and sent one request per page; images are sent
//! as is. The provider comes from edgequake-llm and is resolved on first use,
//! in this order:
//!
//! 1. a pre-built provider in [`ExtractorConfig::vision_llm`]
//! 2. `vision_provider` (+ `vision_model`) from the config
//! 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` from the environment
//! 4. `OPENAI_API_KEY` from the environment
//! 5. `ProviderFactory::from_env` auto-detection
//!
//! edgequake-llm reports failures as opaque errors, so classification works
//! on the message: authentication problems are fatal, everything else is
//! treated as transient.

use super::OcrBackend;
use crate::config::ExtractorConfig;
use crate::error::BackendError;
use crate::pipeline::{encode, mime, postprocess, render};
use crate::prompts::OCR_SYSTEM_PROMPT;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::{Arc, Mutex};
use tracing::debug;

const DEFAULT_VISION_MODEL: &str = "gpt-4.1-nano";

pub struct VisionBackend {
    configured: Option<Arc<dyn LLMProvider>>,
    provider_name: Option<String>,
    model: Option<String>,
    max_pixels: u32,
    resolved: Mutex<Option<Arc<dyn LLMProvider>>>,
}

impl VisionBackend {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            configured: config.vision_llm.clone(),
            provider_name: config.vision_provider.clone(),
            model: config.vision_model.clone(),
            max_pixels: config.render_max_pixels,
            resolved: Mutex::new(None),
        }
    }

    fn provider(&self) -> Result<Arc<dyn LLMProvider>, BackendError> {
        if let Some(p) = &self.configured {
            return Ok(Arc::clone(p));
        }
        let mut resolved = self.resolved.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(p) = resolved.as_ref() {
            return Ok(Arc::clone(p));
        }
        let provider = self.resolve()?;
        *resolved = Some(Arc::clone(&provider));
        Ok(provider)
    }

    fn resolve(&self) -> Result<Arc<dyn LLMProvider>, BackendError> {
        let model = self.model.as_deref().unwrap_or(DEFAULT_VISION_MODEL);

        if let Some(name) = &self.provider_name {
            return create_provider(name, model);
        }

        if let (Ok(prov), Ok(env_model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !env_model.is_empty() {
                return create_provider(&prov, &env_model);
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            return create_provider("openai", model);
        }

        let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| {
            BackendError::fatal(format!(
                "No vision provider configured. Set OPENAI_API_KEY or ANTHROPIC_API_KEY, or choose a provider ({e})"
            ))
        })?;
        Ok(llm)
    }

    async fn transcribe(
        &self,
        provider: &Arc<dyn LLMProvider>,
        image: ImageData,
    ) -> Result<String, BackendError> {
        let messages = vec![
            ChatMessage::system(OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images("", vec![image]),
        ];
        let options = CompletionOptions {
            temperature: Some(0.0),
            max_tokens: Some(4096),
            ..Default::default()
        };

        let response = provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| classify_llm_error(&e.to_string()))?;
        debug!(
            "Vision call: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(postprocess::clean_model_output(&response.content))
    }
}

fn create_provider(name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, BackendError> {
    ProviderFactory::create_llm_provider(name, model).map_err(|e| {
        BackendError::fatal(format!("Vision provider '{name}' is not configured: {e}"))
    })
}

/// Authentication failures are fatal; anything else may clear on retry.
fn classify_llm_error(message: &str) -> BackendError {
    let lower = message.to_lowercase();
    let is_auth = ["401", "unauthorized", "authentication", "invalid api key", "api key"]
        .iter()
        .any(|needle| lower.contains(needle));
    if is_auth {
        BackendError::fatal("Unauthorized, check your API key")
    } else {
        BackendError::retryable(format!("Vision model request failed: {message}"))
    }
}

#[async_trait]
impl OcrBackend for VisionBackend {
    fn name(&self) -> &'static str {
        "vision"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        mime::is_pdf(mime_type) || mime::is_image(mime_type)
    }

    async fn extract_pages(
        &self,
        data: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> Result<Option<Vec<String>>, BackendError> {
        let provider = self.provider()?;

        if !mime::is_pdf(mime_type) {
            let text = self
                .transcribe(&provider, encode::image_data(mime_type, data))
                .await?;
            return Ok(Some(vec![text]));
        }

        let images = render::rasterise_pdf(data.to_vec(), self.max_pixels).await?;
        debug!("{filename}: {} pages to transcribe", images.len());
        let mut pages = Vec::with_capacity(images.len());
        for image in &images {
            let png = encode::encode_png(image)
                .map_err(|e| BackendError::skip(format!("could not encode page: {e}")))?;
            pages.push(
                self.transcribe(&provider, encode::image_data("image/png", &png))
                    .await?,
            );
        }
        Ok(Some(pages))
    }

    async fn release(&self) {
        self.resolved.lock().unwrap_or_else(|p| p.into_inner()).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn auth_errors_are_fatal() {
        assert_eq!(
            classify_llm_error("HTTP 401: Incorrect API key provided").kind,
            ErrorKind::Fatal
        );
        assert_eq!(
            classify_llm_error("Authentication failed").kind,
            ErrorKind::Fatal
        );
    }

    #[test]
    fn other_errors_are_retryable() {
        assert!(classify_llm_error("HTTP 529 overloaded").is_retryable());
        assert!(classify_llm_error("connection reset by peer").is_retryable());
    }

    #[test]
    fn supports_pdf_and_images() {
        let b = VisionBackend::new(&ExtractorConfig::default());
        assert!(b.is_type_supported("image/webp"));
        assert!(b.is_type_supported("application/pdf"));
        assert!(!b.is_type_supported("application/zip"));
    }
}
