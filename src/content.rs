use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::Url;

use crate::error::{BridgeError, Result};
use crate::resources::ResourceTable;

/// Scheme token reserved for embedded-resource addressing.
pub const EMBEDDED_SCHEME: &str = "embedded";
/// Fixed authority used in embedded URLs.
pub const EMBEDDED_HOST: &str = "app";

/// Where a window's pages come from.
#[derive(Debug, Clone)]
pub enum ContentSource {
    /// Served from the in-memory resource table via the virtual protocol.
    Embedded(Arc<ResourceTable>),
    /// Served from the platform resource directory, under `base`.
    Resource(String),
    /// URLs are passed through unmodified.
    Standard,
}

impl ContentSource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Embedded(_) => "embedded",
            Self::Resource(_) => "resource",
            Self::Standard => "standard",
        }
    }
}

/// Outbound URL resolution and inbound key normalization for one window.
#[derive(Debug, Clone)]
pub struct UrlResolver {
    source: ContentSource,
    resource_root: PathBuf,
}

impl UrlResolver {
    pub fn new(source: ContentSource, resource_root: impl Into<PathBuf>) -> Self {
        Self {
            source,
            resource_root: resource_root.into(),
        }
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    /// Fully-qualified URL the script host should load for `url`.
    pub fn resolve(&self, url: &str) -> Result<String> {
        let trimmed = url.trim();
        if is_http(trimmed) {
            return Ok(trimmed.to_string());
        }
        match &self.source {
            ContentSource::Embedded(_) => Ok(embedded_url(&normalize(trimmed))),
            ContentSource::Resource(base) => self.resource_url(base, trimmed),
            ContentSource::Standard => {
                if has_scheme(trimmed) {
                    Ok(trimmed.to_string())
                } else {
                    self.resource_url("", trimmed)
                }
            }
        }
    }

    /// Path reported to the application once `url` has loaded.
    pub fn logical_path(&self, url: &str) -> String {
        match &self.source {
            ContentSource::Embedded(_) => normalize(url),
            ContentSource::Resource(base) => {
                let root = self.base_dir(base);
                Url::parse(url)
                    .ok()
                    .filter(|parsed| parsed.scheme() == "file")
                    .and_then(|parsed| parsed.to_file_path().ok())
                    .and_then(|path| {
                        path.strip_prefix(&root)
                            .ok()
                            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
                    })
                    .unwrap_or_else(|| url.to_string())
            }
            ContentSource::Standard => url.to_string(),
        }
    }

    fn base_dir(&self, base: &str) -> PathBuf {
        let base = base.trim_matches('/');
        if base.is_empty() {
            self.resource_root.clone()
        } else {
            self.resource_root.join(base)
        }
    }

    fn resource_url(&self, base: &str, url: &str) -> Result<String> {
        let relative = url.trim_start_matches('/');
        let path = self.base_dir(base).join(relative);
        file_url(&path, url)
    }
}

fn file_url(path: &Path, original: &str) -> Result<String> {
    Url::from_file_path(path)
        .map(|url| url.to_string())
        .map_err(|_| BridgeError::InvalidUrl {
            url: original.to_string(),
            reason: format!("{} is not an absolute path", path.display()),
        })
}

/// `embedded://app/<path>` for an already-normalized logical path.
pub fn embedded_url(path: &str) -> String {
    format!("{EMBEDDED_SCHEME}://{EMBEDDED_HOST}/{path}")
}

pub fn is_embedded(url: &str) -> bool {
    url.strip_prefix(EMBEDDED_SCHEME)
        .map_or(false, |rest| rest.starts_with(':'))
}

fn is_http(url: &str) -> bool {
    let lowered = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

fn has_scheme(url: &str) -> bool {
    Url::parse(url).is_ok()
}

/// Canonical resource-table key for an intercepted embedded URL.
///
/// Strips the scheme token, `:`, `//`, the host token, and surrounding
/// slashes, plus any query or fragment. Repeated until nothing changes, so
/// `normalize(normalize(u)) == normalize(u)` holds for every input.
pub fn normalize(url: &str) -> String {
    let mut current = url.trim();
    loop {
        let next = strip_once(current);
        if next == current {
            return next.to_string();
        }
        current = next;
    }
}

fn strip_once(url: &str) -> &str {
    let mut rest = url;
    if let Some(end) = rest.find(['?', '#']) {
        rest = &rest[..end];
    }
    if let Some(after) = rest.strip_prefix(EMBEDDED_SCHEME) {
        if after.starts_with(':') {
            rest = after;
        }
    }
    rest = rest.strip_prefix(':').unwrap_or(rest);
    if let Some(after) = rest.strip_prefix("//") {
        rest = after;
        if let Some(after_host) = rest.strip_prefix(EMBEDDED_HOST) {
            if after_host.is_empty() || after_host.starts_with('/') {
                rest = after_host;
            }
        }
    }
    rest = rest.strip_prefix('/').unwrap_or(rest);
    rest.strip_suffix('/').unwrap_or(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn embedded() -> UrlResolver {
        UrlResolver::new(
            ContentSource::Embedded(Arc::new(ResourceTable::default())),
            "/opt/app/resources",
        )
    }

    #[test]
    fn embedded_urls_are_prefixed_once() {
        let resolver = embedded();
        assert_eq!(
            resolver.resolve("html/index.html").unwrap(),
            "embedded://app/html/index.html"
        );
        assert_eq!(
            resolver.resolve("embedded://app/html/index.html").unwrap(),
            "embedded://app/html/index.html"
        );
        assert_eq!(
            resolver.resolve("/index.html").unwrap(),
            "embedded://app/index.html"
        );
    }

    #[test]
    fn http_passes_through() {
        let resolver = embedded();
        assert_eq!(
            resolver.resolve("https://example.com/a").unwrap(),
            "https://example.com/a"
        );
    }

    #[test]
    fn normalize_strips_in_order() {
        assert_eq!(normalize("embedded://app/html/index.html"), "html/index.html");
        assert_eq!(normalize("embedded:html/index.html"), "html/index.html");
        assert_eq!(normalize("embedded://app/dir/"), "dir");
        assert_eq!(normalize("embedded://app/a.js?v=2#top"), "a.js");
        assert_eq!(normalize("embedded://app"), "");
    }

    #[test]
    fn host_token_only_stripped_as_authority() {
        assert_eq!(normalize("embedded://app/application.js"), "application.js");
        assert_eq!(normalize("app/main.js"), "app/main.js");
        assert_eq!(normalize("application.js"), "application.js");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "embedded://app/html/index.html",
            "embedded://app/embedded:odd.js",
            "embedded://app//app/x/",
            "embedded:",
            "//app/",
            "index.html",
            "embedded://app/app",
            "embedded://app/q?x=1/",
            "",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn resource_urls_use_the_resource_root() {
        let resolver = UrlResolver::new(
            ContentSource::Resource("/ui/".into()),
            "/opt/app/resources",
        );
        let url = resolver.resolve("index.html").unwrap();
        assert_eq!(url, "file:///opt/app/resources/ui/index.html");
        assert_eq!(resolver.logical_path(&url), "index.html");
    }

    #[test]
    fn standard_keeps_absolute_urls() {
        let resolver = UrlResolver::new(ContentSource::Standard, "/opt/app/resources");
        assert_eq!(
            resolver.resolve("file:///tmp/page.html").unwrap(),
            "file:///tmp/page.html"
        );
        assert_eq!(
            resolver.resolve("page.html").unwrap(),
            "file:///opt/app/resources/page.html"
        );
    }

    #[test]
    fn relative_root_is_rejected() {
        let resolver = UrlResolver::new(ContentSource::Resource("ui".into()), "relative/root");
        assert!(matches!(
            resolver.resolve("index.html"),
            Err(BridgeError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn embedded_detection() {
        assert!(is_embedded("embedded://app/x"));
        assert!(!is_embedded("embeddedx://app/x"));
    }
}
