use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{BridgeError, Result};

/// One packed asset.
#[derive(Debug)]
pub struct ResourceEntry {
    bytes: Cow<'static, [u8]>,
    mime_type: String,
    is_text: bool,
}

impl ResourceEntry {
    pub fn new(bytes: impl Into<Cow<'static, [u8]>>, mime_type: impl Into<String>, is_text: bool) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            is_text,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Whether the packer collapsed whitespace when producing this entry.
    pub fn is_text(&self) -> bool {
        self.is_text
    }
}

/// Immutable mapping from logical path to packed asset.
///
/// Built once before any window opens and shared via `Arc` afterwards; no
/// method takes `&mut self`, so concurrent readers need no locking.
#[derive(Debug, Default)]
pub struct ResourceTable {
    entries: HashMap<String, Arc<ResourceEntry>>,
}

/// Packer output row: `(logical path, bytes, mime type, is text)`.
pub type PackedResource = (&'static str, &'static [u8], &'static str, bool);

impl ResourceTable {
    pub fn builder() -> ResourceTableBuilder {
        ResourceTableBuilder::default()
    }

    /// Wrap the packer's static output. The bytes are borrowed, not copied.
    pub fn from_static(rows: &[PackedResource]) -> Result<Self> {
        let mut builder = Self::builder();
        for (path, bytes, mime_type, is_text) in rows {
            builder = builder.insert_entry(path, ResourceEntry::new(*bytes, *mime_type, *is_text))?;
        }
        Ok(builder.build())
    }

    pub fn get(&self, path: &str) -> Option<&Arc<ResourceEntry>> {
        self.entries.get(path)
    }

    /// Look up `path`, failing with `ResourceNotFound` naming the key.
    pub fn lookup(&self, path: &str) -> Result<Arc<ResourceEntry>> {
        self.entries
            .get(path)
            .cloned()
            .ok_or_else(|| BridgeError::ResourceNotFound {
                path: path.to_string(),
            })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[derive(Debug, Default)]
pub struct ResourceTableBuilder {
    entries: HashMap<String, Arc<ResourceEntry>>,
}

impl ResourceTableBuilder {
    /// Add an asset, deriving mime type and text flag from the path.
    pub fn insert(self, path: &str, bytes: impl Into<Cow<'static, [u8]>>) -> Result<Self> {
        let mime_type = mime_type_for_path(path);
        let is_text = is_text_mime(mime_type);
        self.insert_entry(path, ResourceEntry::new(bytes, mime_type, is_text))
    }

    pub fn insert_entry(mut self, path: &str, entry: ResourceEntry) -> Result<Self> {
        let key = path.trim_start_matches('/').to_string();
        if self.entries.contains_key(&key) {
            return Err(BridgeError::DuplicateRegistration { name: key });
        }
        self.entries.insert(key, Arc::new(entry));
        Ok(self)
    }

    pub fn build(self) -> ResourceTable {
        ResourceTable {
            entries: self.entries,
        }
    }
}

/// Mime type for a logical path, keyed by its final extension.
pub fn mime_type_for_path(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let ext = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "text/plain",
    };
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "txt" => "text/plain",
        "js" => "application/javascript",
        "css" => "text/css",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "png" => "image/png",
        "wasm" => "application/wasm",
        _ => "text/plain",
    }
}

pub fn is_text_mime(mime_type: &str) -> bool {
    mime_type.starts_with("text/")
        || matches!(
            mime_type,
            "application/javascript" | "application/json" | "image/svg+xml"
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    static INDEX: &[u8] = b"<html><body>hi</body></html>";

    #[test]
    fn static_rows_are_borrowed() {
        let table =
            ResourceTable::from_static(&[("index.html", INDEX, "text/html", true)]).unwrap();
        let entry = table.lookup("index.html").unwrap();
        assert_eq!(entry.bytes().as_ptr(), INDEX.as_ptr());
        assert_eq!(entry.len(), INDEX.len());
        assert_eq!(entry.mime_type(), "text/html");
        assert!(entry.is_text());
    }

    #[test]
    fn miss_names_the_key() {
        let table = ResourceTable::default();
        let err = table.lookup("missing.js").unwrap_err();
        assert_eq!(
            err,
            BridgeError::ResourceNotFound {
                path: "missing.js".into()
            }
        );
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let table = ResourceTable::builder()
            .insert("html/Index.html", &b"x"[..])
            .unwrap()
            .build();
        assert!(table.contains("html/Index.html"));
        assert!(!table.contains("html/index.html"));
    }

    #[test]
    fn builder_rejects_duplicates() {
        let result = ResourceTable::builder()
            .insert("app.js", &b"1"[..])
            .unwrap()
            .insert("/app.js", &b"2"[..]);
        assert!(matches!(
            result,
            Err(BridgeError::DuplicateRegistration { .. })
        ));
    }

    #[test]
    fn mime_types_follow_extension() {
        assert_eq!(mime_type_for_path("html/index.HTM"), "text/html");
        assert_eq!(mime_type_for_path("js/app.js"), "application/javascript");
        assert_eq!(mime_type_for_path("img/logo.png"), "image/png");
        assert_eq!(mime_type_for_path("dir.d/README"), "text/plain");
        assert!(!is_text_mime("image/png"));
    }
}
