//! Input acquisition: download URL sources and classify what came back.
//!
//! pdfium and lopdf both parse from memory, so downloads are kept as bytes
//! rather than spooled to a temp file. Classification decides whether the
//! body goes through the PDF strategy chain or is treated as plain text.

use crate::error::ConvertError;
use tracing::{debug, info};

/// A downloaded document body plus what the server said about it.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub url: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl FetchedDocument {
    /// Whether the body should be parsed as a PDF.
    pub fn is_pdf(&self) -> bool {
        is_pdf(self.content_type.as_deref(), &self.url, &self.bytes)
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// A body is a PDF when the content type says so, the name ends in `.pdf`,
/// or the bytes start with the `%PDF` magic.
pub fn is_pdf(content_type: Option<&str>, name_or_url: &str, bytes: &[u8]) -> bool {
    if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("application/pdf")) {
        return true;
    }
    // Ignore query strings and fragments when checking the suffix.
    let path = name_or_url
        .split(['?', '#'])
        .next()
        .unwrap_or(name_or_url);
    path.to_ascii_lowercase().ends_with(".pdf") || bytes.starts_with(b"%PDF")
}

/// Download `url` with a whole-request timeout.
pub async fn fetch_url(url: &str, timeout_secs: u64) -> Result<FetchedDocument, ConvertError> {
    if !is_url(url) {
        return Err(ConvertError::InvalidInput {
            input: url.to_string(),
        });
    }
    info!("Downloading document from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let map_err = |e: reqwest::Error| {
        if e.is_timeout() {
            ConvertError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            ConvertError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    };

    let response = client.get(url).send().await.map_err(map_err)?;

    if !response.status().is_success() {
        return Err(ConvertError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let bytes = response.bytes().await.map_err(map_err)?.to_vec();
    debug!(
        "Downloaded {} bytes (content-type: {:?})",
        bytes.len(),
        content_type
    );

    Ok(FetchedDocument {
        url: url.to_string(),
        content_type,
        bytes,
    })
}
