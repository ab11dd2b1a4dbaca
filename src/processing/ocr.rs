//! Text recognition for PDFs without a usable text layer.
//!
//! Pages are rasterised by a [`PageRasterizer`] (`pdftoppm` by default) and handed to an
//! [`OcrEngine`] one image at a time. Recognised text is stitched back together with a
//! `--- Page N ---` marker ahead of each page so the chunker can attribute page numbers.

use crate::config::{OcrProvider, OcrSettings};
use crate::processing::chunking::page_marker_line;
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Errors raised while rasterising or recognising pages.
#[derive(Debug, Error)]
pub enum OcrError {
    /// A required external tool could not be started.
    #[error("OCR tool unavailable: {0}")]
    Unavailable(String),
    /// Filesystem failure while staging page images.
    #[error("OCR I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// `pdftoppm` failed or produced no images.
    #[error("Failed to rasterise PDF: {0}")]
    Rasterize(String),
    /// The recognition engine reported an error.
    #[error("OCR engine failed: {0}")]
    Engine(String),
    /// HTTP layer failed before receiving a response.
    #[error("OCR request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Cloud service responded with an unexpected status code.
    #[error("Unexpected OCR response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the service.
        status: StatusCode,
        /// Body of the failing response.
        body: String,
    },
    /// Every page came back empty.
    #[error("OCR produced no text")]
    NoText,
}

/// Recognises text in a single rasterised page image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Return the text found in a PNG image.
    async fn recognize(&self, image: Vec<u8>) -> Result<String, OcrError>;
}

/// Local `tesseract` CLI engine.
pub struct TesseractOcr {
    binary: String,
    language: String,
}

impl TesseractOcr {
    /// Engine invoking `tesseract` from `PATH` with English language data.
    pub fn new() -> Self {
        Self {
            binary: "tesseract".into(),
            language: "eng".into(),
        }
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image: Vec<u8>) -> Result<String, OcrError> {
        let mut child = Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| OcrError::Unavailable(format!("{}: {err}", self.binary)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&image).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Engine(stderr.trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Cloud document-text-detection engine speaking the Vision `images:annotate` protocol.
pub struct CloudVisionOcr {
    pub(crate) client: Client,
    pub(crate) endpoint: String,
    pub(crate) api_key: Option<String>,
}

impl CloudVisionOcr {
    /// Construct an engine posting to `endpoint`.
    pub fn new(endpoint: String, api_key: Option<String>) -> Result<Self, OcrError> {
        let client = Client::builder().user_agent("ragingest/0.1").build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateResult {
    #[serde(default)]
    full_text_annotation: Option<TextAnnotation>,
    #[serde(default)]
    error: Option<AnnotateError>,
}

#[derive(Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct AnnotateError {
    #[serde(default)]
    message: String,
}

#[async_trait]
impl OcrEngine for CloudVisionOcr {
    async fn recognize(&self, image: Vec<u8>) -> Result<String, OcrError> {
        let body = json!({
            "requests": [{
                "image": { "content": base64::engine::general_purpose::STANDARD.encode(&image) },
                "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }]
            }]
        });

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.query(&[("key", key)]);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = OcrError::UnexpectedStatus { status, body };
            tracing::error!(error = %error, "Cloud OCR request failed");
            return Err(error);
        }

        let payload: AnnotateResponse = response.json().await?;
        let Some(result) = payload.responses.into_iter().next() else {
            return Ok(String::new());
        };
        if let Some(error) = result.error {
            return Err(OcrError::Engine(error.message));
        }
        Ok(result
            .full_text_annotation
            .map(|annotation| annotation.text)
            .unwrap_or_default())
    }
}

/// Turns a PDF into one PNG image per page, in page order.
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// Render every page of `pdf` at `dpi`.
    async fn rasterize(&self, pdf: &[u8], dpi: u32) -> Result<Vec<Vec<u8>>, OcrError>;
}

/// Rasteriser backed by the poppler `pdftoppm` tool.
pub struct Pdftoppm;

#[async_trait]
impl PageRasterizer for Pdftoppm {
    async fn rasterize(&self, pdf: &[u8], dpi: u32) -> Result<Vec<Vec<u8>>, OcrError> {
        let workspace = tempfile::tempdir()?;
        let input = workspace.path().join("input.pdf");
        tokio::fs::write(&input, pdf).await?;

        let paths = render_pages(&input, workspace.path(), dpi).await?;
        let mut images = Vec::with_capacity(paths.len());
        for path in &paths {
            images.push(tokio::fs::read(path).await?);
        }
        Ok(images)
    }
}

/// Rasterises a PDF and runs every page through an [`OcrEngine`].
#[derive(Clone)]
pub struct PdfOcr {
    engine: Arc<dyn OcrEngine>,
    rasterizer: Arc<dyn PageRasterizer>,
    dpi: u32,
}

impl PdfOcr {
    /// Pair an engine with `pdftoppm` rasterisation at `dpi`.
    pub fn new(engine: Arc<dyn OcrEngine>, dpi: u32) -> Self {
        Self::with_rasterizer(engine, Arc::new(Pdftoppm), dpi)
    }

    /// Pair an engine with a custom rasteriser.
    pub fn with_rasterizer(
        engine: Arc<dyn OcrEngine>,
        rasterizer: Arc<dyn PageRasterizer>,
        dpi: u32,
    ) -> Self {
        Self {
            engine,
            rasterizer,
            dpi,
        }
    }

    /// Build the configured engine, or `None` when OCR is disabled.
    pub fn from_settings(settings: &OcrSettings) -> Result<Option<Self>, OcrError> {
        let engine: Arc<dyn OcrEngine> = match settings.provider {
            OcrProvider::None => return Ok(None),
            OcrProvider::Tesseract => Arc::new(TesseractOcr::new()),
            OcrProvider::Cloud => {
                let Some(url) = settings.cloud_url.clone() else {
                    return Err(OcrError::Unavailable("CLOUD_OCR_URL is not set".into()));
                };
                Arc::new(CloudVisionOcr::new(url, settings.cloud_api_key.clone())?)
            }
        };
        Ok(Some(Self::new(engine, settings.dpi)))
    }

    /// Recognise every page of `pdf`, returning page-delimited text.
    pub async fn recognize_pdf(&self, pdf: &[u8]) -> Result<String, OcrError> {
        let pages = self.rasterizer.rasterize(pdf, self.dpi).await?;
        if pages.is_empty() {
            return Err(OcrError::Rasterize("no pages rendered".into()));
        }
        let total = pages.len();
        let mut pages_text = Vec::with_capacity(total);
        for (idx, image) in pages.into_iter().enumerate() {
            let text = self.engine.recognize(image).await?;
            pages_text.push(text);
            tracing::debug!(page = idx + 1, total, "Recognised page");
        }

        let combined = join_pages(&pages_text);
        if combined.trim().is_empty() {
            return Err(OcrError::NoText);
        }
        tracing::info!(pages = total, chars = combined.len(), "OCR extracted text");
        Ok(combined)
    }
}

async fn render_pages(input: &Path, out_dir: &Path, dpi: u32) -> Result<Vec<PathBuf>, OcrError> {
    let prefix = out_dir.join("page");
    let output = Command::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(dpi.to_string())
        .arg(input)
        .arg(&prefix)
        .output()
        .await
        .map_err(|err| OcrError::Unavailable(format!("pdftoppm: {err}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(OcrError::Rasterize(stderr.trim().to_string()));
    }

    let mut images = Vec::new();
    let mut entries = tokio::fs::read_dir(out_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "png") {
            images.push(path);
        }
    }
    // pdftoppm zero-pads page numbers, so lexical order is page order.
    images.sort();

    if images.is_empty() {
        return Err(OcrError::Rasterize("pdftoppm produced no images".into()));
    }
    Ok(images)
}

/// Prefix each page with its marker line and separate pages by blank lines.
pub fn join_pages(pages: &[String]) -> String {
    pages
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(idx, text)| format!("{}\n{}", page_marker_line(idx as u32 + 1), text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}
