//! Resource classification
//!
//! Maps an intercepted request to the resource class that selects its
//! caching strategy. Classification looks at the URL path only.

use http::Method;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::{Origin, Url};

/// Coarse resource category driving strategy selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    /// Build artifacts and media, served cache-first
    #[serde(rename = "static")]
    StaticAsset,
    /// API responses, served network-first
    #[serde(rename = "api")]
    ApiResource,
    /// HTML documents, served stale-while-revalidate
    #[serde(rename = "html")]
    HtmlPage,
    /// Anything else on the origin, passed through
    Other,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::StaticAsset => "static",
            ResourceClass::ApiResource => "api",
            ResourceClass::HtmlPage => "html",
            ResourceClass::Other => "other",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule sets used by the classifier
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// File extensions (without dot) treated as static assets
    pub static_extensions: Vec<String>,
    /// Path fragments that mark a static asset anywhere in the path
    pub static_prefixes: Vec<String>,
    /// Path prefix of API endpoints
    pub api_prefix: String,
    /// Extension (without dot) of page documents
    pub page_extension: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let static_extensions = [
            "css", "js", "png", "jpg", "jpeg", "gif", "svg", "ico", "woff", "woff2", "ttf", "mp4",
        ];

        Self {
            static_extensions: static_extensions.iter().map(|s| s.to_string()).collect(),
            static_prefixes: vec!["/src/".to_string(), "/uploads/".to_string()],
            api_prefix: "/api/".to_string(),
            page_extension: "html".to_string(),
        }
    }
}

/// Request classifier bound to the origin it serves
pub struct Classifier {
    origin: Origin,
    static_extensions: Vec<String>,
    static_prefixes: Vec<String>,
    api_prefix: String,
    page_suffix: String,
}

impl Classifier {
    pub fn new(origin: &Url, config: ClassifierConfig) -> Self {
        let static_extensions = config
            .static_extensions
            .iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();

        Self {
            origin: origin.origin(),
            static_extensions,
            static_prefixes: config.static_prefixes,
            api_prefix: config.api_prefix,
            page_suffix: format!(".{}", config.page_extension.trim_start_matches('.')),
        }
    }

    /// Whether the cache handles this request at all
    ///
    /// Only same-origin GETs are intercepted; everything else goes straight
    /// to the network.
    pub fn intercepts(&self, method: &Method, url: &Url) -> bool {
        method == Method::GET && url.origin() == self.origin
    }

    /// Classify a URL; first matching rule wins
    pub fn classify(&self, url: &Url) -> ResourceClass {
        self.classify_path(url.path())
    }

    pub fn classify_path(&self, path: &str) -> ResourceClass {
        if self.has_static_extension(path)
            || self.static_prefixes.iter().any(|p| path.contains(p.as_str()))
        {
            ResourceClass::StaticAsset
        } else if path.starts_with(&self.api_prefix) {
            ResourceClass::ApiResource
        } else if path == "/" || path.ends_with(&self.page_suffix) {
            ResourceClass::HtmlPage
        } else {
            ResourceClass::Other
        }
    }

    fn has_static_extension(&self, path: &str) -> bool {
        let segment = path.rsplit('/').next().unwrap_or(path);
        match segment.rsplit_once('.') {
            Some((_, ext)) => {
                let ext = ext.to_ascii_lowercase();
                self.static_extensions.iter().any(|e| *e == ext)
            }
            None => false,
        }
    }
}
