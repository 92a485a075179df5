//! URL canonicalization for stable cache keys.

use url::Url;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Canonicalize a request URL so equal resources share a cache key.
///
/// Normalization steps:
/// 1. Trim leading/trailing whitespace
/// 2. Resolve root-relative paths (`/app.js`) against `origin`
/// 3. Default scheme to https:// if missing
/// 4. Lowercase the host and drop the fragment (#...)
/// 5. Keep query string intact (do not reorder)
pub fn canonicalize(input: &str, origin: &Url) -> Result<Url, UrlError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let mut parsed = if trimmed.starts_with('/') && !trimmed.starts_with("//") {
        origin.join(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?
    } else if trimmed.contains("://") {
        Url::parse(trimmed).map_err(|e| UrlError::InvalidUrl(e.to_string()))?
    } else {
        Url::parse(&format!("https://{}", trimmed.trim_start_matches('/')))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?
    };

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlError::UnsupportedScheme(scheme.to_string())),
    }

    if let Some(host) = parsed.host_str().map(str::to_lowercase) {
        parsed
            .set_host(Some(&host))
            .map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }

    parsed.set_fragment(None);

    Ok(parsed)
}
