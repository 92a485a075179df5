//! Substitute content for requests neither cache nor network can answer.
//!
//! Fallbacks live in their own table, outside every cache generation, so
//! generation sweeps and entry eviction never remove them. Built-in bodies
//! are used until the store has been seeded.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::classify::Category;
use offsync_core::{CacheStore, Error, Response};

/// Header marking a response as fallback content.
pub const FALLBACK_HEADER: &str = "x-offsync-fallback";

const OFFLINE_DOCUMENT: &str = "<!doctype html>
<html lang=\"en\">
<head><meta charset=\"utf-8\"><title>Offline</title></head>
<body>
<h1>You are offline</h1>
<p>This page is not available right now. Changes you make are saved and will sync when the connection returns.</p>
</body>
</html>
";

const PLACEHOLDER_IMAGE: &str = "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"256\" height=\"256\" viewBox=\"0 0 256 256\">\
<rect width=\"256\" height=\"256\" fill=\"#e5e7eb\"/>\
<path d=\"M64 176l40-48 32 36 24-28 32 40z\" fill=\"#9ca3af\"/>\
</svg>";

/// Kinds of substitute content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackKind {
    OfflineDocument,
    PlaceholderImage,
    OfflineJson,
}

impl FallbackKind {
    pub const ALL: [FallbackKind; 3] =
        [FallbackKind::OfflineDocument, FallbackKind::PlaceholderImage, FallbackKind::OfflineJson];

    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackKind::OfflineDocument => "offline_document",
            FallbackKind::PlaceholderImage => "placeholder_image",
            FallbackKind::OfflineJson => "offline_json",
        }
    }

    fn from_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    /// Fallback used for a request category, if that category has one.
    pub fn for_category(category: Category) -> Option<Self> {
        match category {
            Category::Navigation => Some(FallbackKind::OfflineDocument),
            Category::Image => Some(FallbackKind::PlaceholderImage),
            Category::RemoteApi => Some(FallbackKind::OfflineJson),
            Category::StaticAsset | Category::Dynamic => None,
        }
    }

    /// Compiled-in content for this kind.
    pub fn builtin(&self) -> Response {
        let response = match self {
            FallbackKind::OfflineDocument => {
                Response::with_content_type(200, "text/html; charset=utf-8", OFFLINE_DOCUMENT)
            }
            FallbackKind::PlaceholderImage => Response::with_content_type(200, "image/svg+xml", PLACEHOLDER_IMAGE),
            FallbackKind::OfflineJson => Response::json(
                503,
                &serde_json::json!({
                    "error": "offline",
                    "code": "OFFLINE",
                    "message": "The remote service is unreachable. Try again when back online."
                }),
            ),
        };
        tag(response, *self)
    }
}

fn tag(mut response: Response, kind: FallbackKind) -> Response {
    if response.header(FALLBACK_HEADER).is_none() {
        response.headers.push((FALLBACK_HEADER.to_string(), kind.as_str().to_string()));
    }
    response
}

/// Category-keyed lookup of pre-seeded substitute content.
pub struct FallbackProvider {
    store: Arc<dyn CacheStore>,
    entries: RwLock<HashMap<FallbackKind, Response>>,
}

impl FallbackProvider {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        let entries = FallbackKind::ALL.into_iter().map(|kind| (kind, kind.builtin())).collect();
        Self { store, entries: RwLock::new(entries) }
    }

    /// Overlay whatever was seeded by a previous install.
    pub async fn load(&self) -> Result<usize, Error> {
        let stored = self.store.list_fallbacks().await?;
        let mut entries = self.entries.write().await;
        let mut loaded = 0;
        for (name, response) in stored {
            match FallbackKind::from_name(&name) {
                Some(kind) => {
                    entries.insert(kind, response);
                    loaded += 1;
                }
                None => tracing::warn!(kind = %name, "Ignoring unknown fallback entry"),
            }
        }
        Ok(loaded)
    }

    /// Persist every fallback so it is available on the first offline request.
    ///
    /// `offline_document` replaces the built-in offline page when given.
    pub async fn seed(&self, offline_document: Option<&Path>) -> Result<(), Error> {
        let mut seeded = HashMap::new();
        for kind in FallbackKind::ALL {
            seeded.insert(kind, kind.builtin());
        }

        if let Some(path) = offline_document {
            let html = tokio::fs::read(path)
                .await
                .map_err(|e| Error::InvalidInput(format!("failed to read {}: {e}", path.display())))?;
            let page = Response::with_content_type(200, "text/html; charset=utf-8", html);
            seeded.insert(FallbackKind::OfflineDocument, tag(page, FallbackKind::OfflineDocument));
        }

        for (kind, response) in &seeded {
            self.store.put_fallback(kind.as_str(), response).await?;
        }
        *self.entries.write().await = seeded;

        tracing::info!(count = FallbackKind::ALL.len(), "Seeded fallback entries");
        Ok(())
    }

    /// Substitute content for `category`, or `None` when it has no fallback.
    pub async fn for_category(&self, category: Category) -> Option<Response> {
        let kind = FallbackKind::for_category(category)?;
        self.entries.read().await.get(&kind).cloned()
    }
}
