//! Article download and visible-text extraction.
//!
//! The page is fetched through the retrying transport, parsed with `scraper`,
//! and reduced to the text a reader would see: every text node in document
//! order, minus script-like containers.

use crate::error::{AppError, Result};
use crate::http::{RetryPolicy, send_with_backoff};
use crate::utils::normalize_text;
use reqwest::Client;
use scraper::{Html, Node};
use tracing::{debug, info, instrument};
use url::Url;

/// Elements whose text never reaches the reader.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Parse `raw` and require an http(s) URL.
pub fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| AppError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(AppError::InvalidUrl {
            url: raw.to_string(),
            reason: "URL has no host".to_string(),
        }),
        other => Err(AppError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme '{other}', expected http or https"),
        }),
    }
}

/// Download the page body, failing on any non-success status.
#[instrument(level = "info", skip_all, fields(%url))]
pub async fn fetch_html(client: &Client, url: &Url, retry: &RetryPolicy) -> Result<String> {
    let response = send_with_backoff(retry, || client.get(url.clone()))
        .await
        .map_err(|source| AppError::FetchTransport {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(AppError::FetchStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = response.text().await.map_err(|source| AppError::FetchTransport {
        url: url.to_string(),
        source,
    })?;
    debug!(bytes = body.len(), "Downloaded page");
    Ok(body)
}

/// Concatenate the document's visible text nodes.
pub fn extract_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut text = String::new();

    for node in document.root_element().descendants() {
        let Node::Text(chunk) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_ELEMENTS.contains(&el.name()))
        });
        if !hidden {
            text.push_str(&chunk.text);
        }
    }
    text
}

/// Fetch `url` and return its cleaned text.
///
/// # Arguments
///
/// * `client` - Shared HTTP client (timeout and user agent already set)
/// * `url` - A URL that passed [`validate_url`]
/// * `retry` - Backoff policy for 429/5xx answers
/// * `limit_clean` - Pass budget handed to [`normalize_text`]
///
/// # Errors
///
/// [`AppError::FetchStatus`] for a non-success status after retries,
/// [`AppError::FetchTransport`] when no response arrived.
#[instrument(level = "info", skip_all, fields(%url, limit_clean))]
pub async fn fetch_article(
    client: &Client,
    url: &Url,
    retry: &RetryPolicy,
    limit_clean: usize,
) -> Result<String> {
    let html = fetch_html(client, url, retry).await?;
    let raw = extract_text(&html);
    let cleaned = normalize_text(&raw, limit_clean);
    info!(raw_bytes = raw.len(), bytes = cleaned.len(), "Extracted article text");
    Ok(cleaned)
}
