//! External-process backend: run a user-supplied shell command.
//!
//! The command template uses `{input}` and `{output}` placeholders. For every
//! file the backend writes the attachment into a fresh temporary directory,
//! substitutes quoted paths into the template, runs it through the platform
//! shell and reads `{output}` back as UTF-8 text.
//!
//! Temp file names never contain anything taken from the attachment name
//! except its extension, reduced to ASCII letters and digits, so a crafted
//! file name cannot inject shell syntax.
//!
//! Every failure here is fatal: a broken command will fail the same way for
//! every attachment, so the run stops with a message the user can act on.
//! A command skips a file by writing an empty output file.

use super::OcrBackend;
use crate::config::ExtractorConfig;
use crate::error::BackendError;
use crate::pipeline::{encode, mime, render};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error};

pub struct CommandBackend {
    template: String,
    convert_pdfs: bool,
    timeout: Duration,
    max_pixels: u32,
}

impl CommandBackend {
    pub fn new(config: &ExtractorConfig) -> Self {
        Self {
            template: config.custom_command.clone(),
            convert_pdfs: config.custom_command_convert_pdfs,
            timeout: config.command_timeout,
            max_pixels: config.render_max_pixels,
        }
    }

    fn template(&self) -> Result<&str, BackendError> {
        let command = self.template.trim();
        if command.is_empty() {
            return Err(BackendError::fatal("No custom command configured"));
        }
        Ok(command)
    }

    /// Run the command on one file; `None` when it wrote an empty output.
    async fn process_file(
        &self,
        template: &str,
        data: &[u8],
        extension: &str,
    ) -> Result<Option<String>, BackendError> {
        let dir = tempfile::Builder::new()
            .prefix("ocrnotes-")
            .tempdir()
            .map_err(|e| BackendError::fatal(format!("Could not create temp directory: {e}")))?;
        let input = dir.path().join(format!("input.{}", sanitise_extension(extension)));
        let output = dir.path().join("output.md");

        tokio::fs::write(&input, data)
            .await
            .map_err(|e| BackendError::fatal(format!("Could not write temp file: {e}")))?;

        self.run(&render_command(template, &input, &output)).await?;

        let text = tokio::fs::read(&output)
            .await
            .map_err(|_| BackendError::fatal("Custom command did not create output file"))?;
        let text = String::from_utf8_lossy(&text).into_owned();
        Ok((!text.trim().is_empty()).then_some(text))
    }

    async fn run(&self, command: &str) -> Result<(), BackendError> {
        debug!("Running custom command: {command}");
        let mut child = shell(command);
        child
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, child.output())
            .await
            .map_err(|_| BackendError::fatal("Custom command timed out"))?
            .map_err(|e| BackendError::fatal(format!("Could not start custom command: {e}")))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(code) => {
                error!("Custom command failed (exit code {code}): {}", stderr.trim());
                Err(
                    BackendError::fatal(format!("Custom command failed with exit code {code}"))
                        .with_status(u16::try_from(code).unwrap_or(u16::MAX)),
                )
            }
            None => {
                error!("Custom command was terminated: {}", stderr.trim());
                Err(BackendError::fatal("Custom command was terminated by a signal"))
            }
        }
    }
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut c = Command::new("cmd");
    c.args(["/C", command]);
    c
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut c = Command::new("sh");
    c.args(["-c", command]);
    c
}

/// Keep ASCII letters and digits only.
fn sanitise_extension(extension: &str) -> String {
    extension.chars().filter(char::is_ascii_alphanumeric).collect()
}

/// Substitute double-quoted paths for `{input}` and `{output}`.
fn render_command(template: &str, input: &Path, output: &Path) -> String {
    template
        .replace("{input}", &format!("\"{}\"", input.display()))
        .replace("{output}", &format!("\"{}\"", output.display()))
}

fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[async_trait]
impl OcrBackend for CommandBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    /// The command sees every file; it skips by writing an empty output.
    fn is_type_supported(&self, _mime: &str) -> bool {
        true
    }

    async fn extract_pages(
        &self,
        data: &[u8],
        mime_type: &str,
        filename: &str,
    ) -> Result<Option<Vec<String>>, BackendError> {
        let template = self.template()?;

        if mime::is_pdf(mime_type) && self.convert_pdfs {
            let images = render::rasterise_pdf(data.to_vec(), self.max_pixels).await?;
            let mut pages = Vec::with_capacity(images.len());
            for image in &images {
                let png = encode::encode_png(image)
                    .map_err(|e| BackendError::skip(format!("could not encode page: {e}")))?;
                if let Some(text) = self.process_file(template, &png, "png").await? {
                    pages.push(text);
                }
            }
            return Ok((!pages.is_empty()).then_some(pages));
        }

        let text = self
            .process_file(template, data, &extension_of(filename))
            .await?;
        Ok(text.map(|t| vec![t]))
    }
}

/// Run the configured command once against a 1×1 white PNG.
///
/// Succeeds when the command exits cleanly and creates its output file, even
/// if the output is empty.
pub async fn test_command(config: &ExtractorConfig) -> Result<(), BackendError> {
    let backend = CommandBackend::new(config);
    let png = encode::blank_png()
        .map_err(|e| BackendError::fatal(format!("Could not create test image: {e}")))?;
    backend.extract_pages(&png, "image/png", "test.png").await?;
    Ok(())
}

/// Paths the backend would hand to the command, for display purposes.
pub fn describe(template: &str) -> String {
    render_command(
        template,
        &PathBuf::from("<input>"),
        &PathBuf::from("<output>"),
    )
}
