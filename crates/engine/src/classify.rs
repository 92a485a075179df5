//! Request classification.
//!
//! Maps each inbound request to exactly one [`Category`] using only the URL,
//! the declared destination and a few request headers. No cache or network
//! access happens here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use url::Url;

use offsync_core::{AppConfig, Destination, Error, ResourceRequest};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "avif", "svg", "ico", "bmp"];

const STATIC_EXTENSIONS: &[&str] =
    &["js", "mjs", "css", "woff", "woff2", "ttf", "otf", "eot", "wasm", "webmanifest", "map", "html"];

/// Caching category of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    StaticAsset,
    RemoteApi,
    Image,
    Navigation,
    Dynamic,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::StaticAsset => "static_asset",
            Category::RemoteApi => "remote_api",
            Category::Image => "image",
            Category::Navigation => "navigation",
            Category::Dynamic => "dynamic",
        }
    }
}

/// Pure request classifier built from static configuration.
#[derive(Debug, Clone)]
pub struct Classifier {
    app_origin: Url,
    api_origins: Vec<Url>,
    manifest_paths: HashSet<String>,
}

impl Classifier {
    pub fn new(app_origin: Url, api_origins: Vec<Url>, manifest: &[Url]) -> Self {
        let manifest_paths = manifest
            .iter()
            .filter(|u| same_origin(u, &app_origin))
            .map(|u| u.path().to_string())
            .collect();
        Self { app_origin, api_origins, manifest_paths }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let invalid = |e: offsync_core::config::ConfigError| Error::InvalidInput(e.to_string());
        Ok(Self::new(
            config.app_origin_url().map_err(invalid)?,
            config.remote_api_origin_urls().map_err(invalid)?,
            &config.manifest_urls().map_err(invalid)?,
        ))
    }

    /// Assign a category. Total: anything unrecognized is `Dynamic`.
    ///
    /// Checks run in a fixed order: remote-API origin, navigation, image,
    /// same-origin static asset, then the `Dynamic` default.
    pub fn classify(&self, request: &ResourceRequest) -> Category {
        let url = &request.url;

        if self.is_remote_api(url) {
            return Category::RemoteApi;
        }
        if is_navigation(request) {
            return Category::Navigation;
        }
        if is_image(request) {
            return Category::Image;
        }
        if same_origin(url, &self.app_origin) && self.is_static(request) {
            return Category::StaticAsset;
        }
        Category::Dynamic
    }

    fn is_remote_api(&self, url: &Url) -> bool {
        self.api_origins
            .iter()
            .any(|api| same_origin(url, api) && url.path().starts_with(api.path()))
    }

    fn is_static(&self, request: &ResourceRequest) -> bool {
        if self.manifest_paths.contains(request.url.path()) {
            return true;
        }
        if matches!(
            request.destination,
            Some(Destination::Script | Destination::Style | Destination::Font | Destination::Manifest | Destination::Worker)
        ) {
            return true;
        }
        extension(&request.url).is_some_and(|ext| STATIC_EXTENSIONS.contains(&ext.as_str()))
    }
}

fn same_origin(a: &Url, b: &Url) -> bool {
    a.scheme() == b.scheme() && a.host_str() == b.host_str() && a.port_or_known_default() == b.port_or_known_default()
}

fn is_navigation(request: &ResourceRequest) -> bool {
    match request.destination {
        Some(Destination::Document) => true,
        Some(_) => false,
        None => {
            request
                .header("sec-fetch-mode")
                .is_some_and(|mode| mode.eq_ignore_ascii_case("navigate"))
                || request.header("accept").is_some_and(|accept| accept.contains("text/html"))
        }
    }
}

fn is_image(request: &ResourceRequest) -> bool {
    if request.destination == Some(Destination::Image) {
        return true;
    }
    if request.header("accept").is_some_and(|accept| accept.starts_with("image/")) {
        return true;
    }
    extension(&request.url).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Lower-cased extension of the last path segment.
fn extension(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let (_, ext) = last.rsplit_once('.')?;
    (!ext.is_empty()).then(|| ext.to_ascii_lowercase())
}
