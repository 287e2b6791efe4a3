use std::sync::Arc;

use tracing::{debug, warn};

use crate::content::{normalize, EMBEDDED_SCHEME};
use crate::error::Result;
use crate::resources::{ResourceEntry, ResourceTable};

/// Role of a request within a page load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// The page's own document; a miss fails the navigation.
    Primary,
    /// Scripts, stylesheets and images referenced by the page.
    Secondary,
}

/// Answers resource loads for the embedded scheme from a `ResourceTable`.
#[derive(Debug, Clone)]
pub struct VirtualProtocolHandler {
    table: Arc<ResourceTable>,
}

impl VirtualProtocolHandler {
    pub fn new(table: Arc<ResourceTable>) -> Self {
        Self { table }
    }

    pub fn scheme(&self) -> &'static str {
        EMBEDDED_SCHEME
    }

    pub fn table(&self) -> &Arc<ResourceTable> {
        &self.table
    }

    /// Start serving `url`. The returned stream owns its read cursor.
    pub fn open(&self, url: &str, kind: RequestKind) -> Result<ResourceStream> {
        let key = normalize(url);
        match self.table.lookup(&key) {
            Ok(entry) => {
                debug!(
                    target: "protocol",
                    %key,
                    mime = entry.mime_type(),
                    length = entry.len(),
                    "serving embedded resource"
                );
                Ok(ResourceStream::new(key, entry))
            }
            Err(err) => {
                match kind {
                    RequestKind::Primary => {
                        warn!(target: "protocol", %key, "primary document missing from resource table")
                    }
                    RequestKind::Secondary => {
                        warn!(target: "protocol", %key, "secondary asset missing from resource table")
                    }
                }
                Err(err)
            }
        }
    }

    /// Serve `url` in one piece.
    pub fn respond(&self, url: &str, kind: RequestKind) -> Result<ResourceResponse> {
        let mut stream = self.open(url, kind)?;
        let mime_type = stream.mime_type().to_string();
        let body = stream.read_to_end();
        Ok(ResourceResponse {
            key: stream.key,
            mime_type,
            body,
        })
    }
}

/// Streaming view over one resource with a per-request cursor.
#[derive(Debug)]
pub struct ResourceStream {
    key: String,
    entry: Arc<ResourceEntry>,
    cursor: usize,
}

impl ResourceStream {
    fn new(key: String, entry: Arc<ResourceEntry>) -> Self {
        Self {
            key,
            entry,
            cursor: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn mime_type(&self) -> &str {
        self.entry.mime_type()
    }

    pub fn len(&self) -> usize {
        self.entry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.entry.len() - self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.entry.len()
    }

    /// Copy the next chunk into `buf`. Returns 0 once the resource is
    /// exhausted.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let bytes = self.entry.bytes();
        let available = &bytes[self.cursor.min(bytes.len())..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.cursor += count;
        count
    }

    pub fn read_to_end(&mut self) -> Vec<u8> {
        let bytes = self.entry.bytes();
        let rest = bytes[self.cursor.min(bytes.len())..].to_vec();
        self.cursor = bytes.len();
        rest
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
    pub key: String,
    pub mime_type: String,
    pub body: Vec<u8>,
}
