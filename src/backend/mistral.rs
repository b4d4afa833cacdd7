//! Cloud OCR API: Mistral `/v1/ocr`.
//!
//! The file is sent inline as a `data:` URL, images as `image_url` chunks and
//! everything else as `document_url`. Embedded images are not requested; only
//! the per-page Markdown is used.
//!
//! Status codes are classified once, here:
//!
//! | Status | Kind |
//! |--------|------|
//! | 401 | Fatal, "Unauthorized, check your API key" |
//! | 400, 422 | Skip, the file is not accepted |
//! | 408, 429, 5xx, transport errors | Retryable |
//! | anything else | Fatal |

use super::OcrBackend;
use crate::config::ExtractorConfig;
use crate::error::BackendError;
use crate::pipeline::{encode, mime, postprocess};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::debug;

const OCR_ENDPOINT: &str = "https://api.mistral.ai/v1/ocr";

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: DocumentChunk,
    image_limit: u32,
    image_min_size: u32,
    include_image_base64: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DocumentChunk {
    ImageUrl { image_url: String },
    DocumentUrl { document_url: String },
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    pages: Vec<OcrPage>,
}

#[derive(Debug, Deserialize)]
struct OcrPage {
    markdown: String,
}

pub struct MistralBackend {
    api_key: Option<String>,
    model: String,
    endpoint: String,
    client: Mutex<Option<Client>>,
}

impl MistralBackend {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            api_key: config.mistral_api_key.clone(),
            model: config.mistral_model.clone(),
            endpoint: OCR_ENDPOINT.to_string(),
            client: Mutex::new(None),
        }
    }

    /// Point the backend at another server (e.g. a proxy or a test double).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn client(&self) -> Result<Client, BackendError> {
        let mut cached = self.client.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(c) = cached.as_ref() {
            return Ok(c.clone());
        }
        let client = Client::builder()
            .build()
            .map_err(|e| BackendError::fatal(format!("Could not create HTTP client: {e}")))?;
        *cached = Some(client.clone());
        Ok(client)
    }

    fn request_body<'a>(&'a self, data: &[u8], mime_type: &str) -> OcrRequest<'a> {
        let url = encode::data_url(mime_type, data);
        let document = if mime::is_image(mime_type) {
            DocumentChunk::ImageUrl { image_url: url }
        } else {
            DocumentChunk::DocumentUrl { document_url: url }
        };
        OcrRequest {
            model: &self.model,
            document,
            image_limit: 0,
            image_min_size: 0,
            include_image_base64: false,
        }
    }
}

/// Map a non-success HTTP status to a tagged error.
fn page_texts(response: OcrResponse) -> Vec<String> {
    response
        .pages
        .into_iter()
        .map(|p| postprocess::drop_image_links(&p.markdown))
        .collect()
}

fn classify_status(status: u16) -> BackendError {
    match status {
        401 => BackendError::fatal("Unauthorized, check your API key").with_status(status),
        400 | 422 => {
            BackendError::skip("file type not supported by Mistral OCR").with_status(status)
        }
        _ => BackendError::http(status, format!("Mistral OCR request failed (HTTP {status})")),
    }
}

#[async_trait]
impl OcrBackend for MistralBackend {
    fn name(&self) -> &'static str {
        "mistral"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        mime_type != "application/xml"
    }

    async fn extract_pages(
        &self,
        data: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> Result<Option<Vec<String>>, BackendError> {
        let api_key = match self.api_key.as_deref() {
            Some(k) if !k.trim().is_empty() => k,
            _ => return Err(BackendError::fatal("No Mistral API key configured")),
        };

        let body = self.request_body(data, mime_type);
        debug!("{filename}: sending {} bytes to Mistral OCR", data.len());

        let response = self
            .client()?
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::retryable(format!("Mistral OCR request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16()));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| BackendError::retryable(format!("Invalid Mistral OCR response: {e}")))?;

        Ok(Some(page_texts(parsed)))
    }

    async fn release(&self) {
        self.client.lock().unwrap_or_else(|p| p.into_inner()).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn backend() -> MistralBackend {
        MistralBackend::new(
            &ExtractorConfig::builder()
                .mistral_api_key("test-key")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn status_classification() {
        let e = classify_status(401);
        assert_eq!(e.kind, ErrorKind::Fatal);
        assert_eq!(e.message, "Unauthorized, check your API key");

        assert_eq!(classify_status(400).kind, ErrorKind::Skip);
        assert_eq!(classify_status(422).kind, ErrorKind::Skip);
        assert_eq!(classify_status(429).kind, ErrorKind::Retryable);
        assert_eq!(classify_status(502).kind, ErrorKind::Retryable);
        assert_eq!(classify_status(403).kind, ErrorKind::Fatal);
        assert_eq!(classify_status(503).status, Some(503));
    }

    #[test]
    fn image_request_body() {
        let b = backend();
        let json = serde_json::to_value(b.request_body(b"abc", "image/png")).unwrap();
        assert_eq!(json["model"], "mistral-ocr-latest");
        assert_eq!(json["document"]["type"], "image_url");
        assert_eq!(json["document"]["image_url"], "data:image/png;base64,YWJj");
        assert_eq!(json["image_limit"], 0);
        assert_eq!(json["include_image_base64"], false);
    }

    #[test]
    fn document_request_body() {
        let b = backend();
        let json = serde_json::to_value(b.request_body(b"abc", "application/pdf")).unwrap();
        assert_eq!(json["document"]["type"], "document_url");
        assert!(json["document"]["document_url"]
            .as_str()
            .unwrap()
            .starts_with("data:application/pdf;base64,"));
    }

    #[test]
    fn rejects_xml_only() {
        let b = backend();
        assert!(!b.is_type_supported("application/xml"));
        assert!(b.is_type_supported("application/pdf"));
        assert!(b.is_type_supported("application/vnd.openxmlformats-officedocument.wordprocessingml.document"));
    }

    #[tokio::test]
    async fn missing_key_is_fatal() {
        let b = MistralBackend::new(&ExtractorConfig::default());
        let err = b.extract_pages(b"x", "image/png", "x.png").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Fatal);
    }

    #[test]
    fn response_parsing() {
        let body = r##"{"pages":[{"index":0,"markdown":"# Title","images":[]},{"index":1,"markdown":"body"}],"model":"m"}"##;
        let parsed: OcrResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page_texts(parsed), vec!["# Title", "body"]);
    }

    #[test]
    fn unreturned_image_links_are_dropped() {
        let body = r#"{"pages":[{"index":0,"markdown":"Scan\n\n![img-0.jpeg](img-0.jpeg)\n\n![Figure 2](img-1.jpeg)"}]}"#;
        let parsed: OcrResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page_texts(parsed), vec!["Scan\n\n\n\n*Figure 2*"]);
    }
}
