//! Blob storage adapter for source documents and processed JSON output.
//!
//! Blob URLs follow the `https://{account}.blob.core.windows.net/{container}/{name}`
//! layout; helpers here split such URLs into container and blob name with
//! [`url::Url`] and handle the percent-encoding of names.
//! Signed (SAS) URL generation is left to the storage SDK.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use percent_encoding::{AsciiSet, CONTROLS, percent_decode_str, utf8_percent_encode};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::config::KbConfig;
use crate::docstore::stamp_record;
use crate::error::{KbError, Result};

/// Host suffix of blob storage accounts.
pub const BLOB_HOST_SUFFIX: &str = ".blob.core.windows.net";

/// Name used when a URL carries no usable file name.
pub const DEFAULT_FILE_NAME: &str = "default_file_name";

/// Characters escaped in blob URL paths; `/` and existing `%` escapes are kept.
const PATH: &AsciiSet =
    &CONTROLS.add(b' ').add(b'"').add(b'#').add(b'<').add(b'>').add(b'?').add(b'`').add(b'{').add(b'}');

/// A blob storage account.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// The storage account name.
    fn account_name(&self) -> &str;

    /// Create the container if it does not exist.
    async fn ensure_container(&self, container: &str) -> Result<()>;

    /// Write a blob, replacing any existing content.
    async fn put(&self, container: &str, name: &str, data: Vec<u8>) -> Result<()>;

    /// Read a blob.
    async fn get(&self, container: &str, name: &str) -> Result<Vec<u8>>;

    /// Names of all blobs in a container.
    async fn list(&self, container: &str) -> Result<Vec<String>>;
}

fn not_a_blob_url(url: &str, reason: &str) -> KbError {
    KbError::BlobStore { backend: "url".to_string(), message: format!("{reason}: {url}") }
}

/// Parse `url` and split its path into the container and the blob name
/// segments, both still percent-encoded.
fn blob_path(url: &str) -> Result<(String, Vec<String>)> {
    let parsed = Url::parse(url).map_err(|_| not_a_blob_url(url, "not a URL"))?;
    if !parsed.host_str().is_some_and(|host| host.ends_with(BLOB_HOST_SUFFIX)) {
        return Err(not_a_blob_url(url, "not a blob storage URL"));
    }
    let mut segments = parsed.path_segments().into_iter().flatten().filter(|s| !s.is_empty());
    let container = segments.next().ok_or_else(|| not_a_blob_url(url, "URL has no container"))?;
    Ok((container.to_string(), segments.map(str::to_string).collect()))
}

/// The container segment of a blob URL.
///
/// # Errors
///
/// Returns [`KbError::BlobStore`] if `url` is not a blob storage URL.
pub fn container_from_url(url: &str) -> Result<String> {
    let (container, _) = blob_path(url)?;
    Ok(percent_decode_str(&container).decode_utf8_lossy().into_owned())
}

/// The percent-decoded file name of a blob path or URL, ignoring any query
/// string.
pub fn filename_from_url(url: &str) -> String {
    let path = url.split('?').next().unwrap_or_default();
    let base = path.rsplit('/').next().unwrap_or_default();
    let name = percent_decode_str(base).decode_utf8_lossy();
    if name.is_empty() { DEFAULT_FILE_NAME.to_string() } else { name.into_owned() }
}

/// The path after the container of a blob URL (blob names may contain
/// `/`), percent-decoded.
fn blob_name_from_url(url: &str) -> Result<String> {
    let (_, segments) = blob_path(url)?;
    if segments.is_empty() {
        return Err(not_a_blob_url(url, "URL has no blob name"));
    }
    Ok(percent_decode_str(&segments.join("/")).decode_utf8_lossy().into_owned())
}

/// The public URL of a blob, with unsafe path characters escaped.
pub fn blob_url(account: &str, container: &str, name: &str) -> String {
    format!(
        "https://{account}{BLOB_HOST_SUFFIX}/{}/{}",
        utf8_percent_encode(container, PATH),
        utf8_percent_encode(name, PATH)
    )
}

/// Blob name of the JSON rendition of a document: the `doc_url` file name
/// with its extension replaced by `.json`.
pub fn json_blob_name(doc_url: &str) -> String {
    Path::new(&filename_from_url(doc_url)).with_extension("json").to_string_lossy().into_owned()
}

/// Document-level blob operations over an injected [`BlobStore`].
pub struct BlobRepository {
    store: Arc<dyn BlobStore>,
    config: KbConfig,
}

impl BlobRepository {
    /// Create a repository over `store`.
    pub fn new(store: Arc<dyn BlobStore>, config: KbConfig) -> Self {
        Self { store, config }
    }

    /// Save a processed document as pretty-printed JSON.
    ///
    /// The record gets the same bookkeeping fields as a database content
    /// record. It is written to `container` (the configured output
    /// container when `None`), which is created if missing. Returns the blob
    /// name.
    pub async fn save_json_document(
        &self,
        data: Map<String, Value>,
        container: Option<&str>,
    ) -> Result<String> {
        let container = container.unwrap_or(&self.config.output_blob_container);
        let record = stamp_record(data, &self.config.category_id);
        let doc_url = record.get("doc_url").and_then(Value::as_str).unwrap_or_default();
        let name = json_blob_name(doc_url);

        let mut body = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
        record.serialize(&mut serializer).map_err(|e| KbError::BlobStore {
            backend: "json".to_string(),
            message: format!("failed to serialize document: {e}"),
        })?;

        self.store.ensure_container(container).await?;
        self.store.put(container, &name, body).await?;

        let id = record.get("id").and_then(Value::as_str).unwrap_or_default();
        info!(document.id = %id, container, blob = %name, "saved JSON document");
        Ok(name)
    }

    /// URLs of every blob in `container`.
    pub async fn list_documents(&self, container: &str) -> Result<Vec<String>> {
        let names = self.store.list(container).await?;
        let account = self.store.account_name();
        Ok(names.iter().map(|name| blob_url(account, container, name)).collect())
    }

    /// The URL of one blob.
    pub fn document_url(&self, container: &str, name: &str) -> String {
        blob_url(self.store.account_name(), container, name)
    }

    /// Read a blob as UTF-8 text.
    pub async fn get_document(&self, container: &str, name: &str) -> Result<String> {
        let bytes = self.store.get(container, name).await?;
        String::from_utf8(bytes).map_err(|e| KbError::BlobStore {
            backend: "utf8".to_string(),
            message: format!("blob {container}/{name} is not UTF-8: {e}"),
        })
    }

    /// Download the blob a URL points at.
    pub async fn download_document(&self, url: &str) -> Result<Vec<u8>> {
        let container = container_from_url(url)?;
        let name = blob_name_from_url(url)?;
        debug!(container = %container, blob = %name, "downloading blob");
        self.store.get(&container, &name).await
    }

    /// Download the blob a URL points at as UTF-8 text.
    pub async fn download_text(&self, url: &str) -> Result<String> {
        let bytes = self.download_document(url).await?;
        String::from_utf8(bytes).map_err(|e| KbError::BlobStore {
            backend: "utf8".to_string(),
            message: format!("blob at {url} is not UTF-8: {e}"),
        })
    }
}

/// An in-memory [`BlobStore`] for development and testing.
#[derive(Debug)]
pub struct InMemoryBlobStore {
    account: String,
    containers: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    /// Create an empty store for `account`.
    pub fn new(account: impl Into<String>) -> Self {
        Self { account: account.into(), containers: RwLock::new(HashMap::new()) }
    }

    fn missing_container(container: &str) -> KbError {
        KbError::BlobStore {
            backend: "InMemory".to_string(),
            message: format!("container '{container}' does not exist"),
        }
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    fn account_name(&self) -> &str {
        &self.account
    }

    async fn ensure_container(&self, container: &str) -> Result<()> {
        self.containers.write().await.entry(container.to_string()).or_default();
        Ok(())
    }

    async fn put(&self, container: &str, name: &str, data: Vec<u8>) -> Result<()> {
        let mut containers = self.containers.write().await;
        let blobs = containers.get_mut(container).ok_or_else(|| Self::missing_container(container))?;
        blobs.insert(name.to_string(), data);
        Ok(())
    }

    async fn get(&self, container: &str, name: &str) -> Result<Vec<u8>> {
        let containers = self.containers.read().await;
        let blobs = containers.get(container).ok_or_else(|| Self::missing_container(container))?;
        blobs.get(name).cloned().ok_or_else(|| KbError::BlobStore {
            backend: "InMemory".to_string(),
            message: format!("blob '{container}/{name}' does not exist"),
        })
    }

    async fn list(&self, container: &str) -> Result<Vec<String>> {
        let containers = self.containers.read().await;
        let blobs = containers.get(container).ok_or_else(|| Self::missing_container(container))?;
        Ok(blobs.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://acct.blob.core.windows.net/kb-docs/reports/Q1%20summary.pdf?sv=1&sig=x";

    #[test]
    fn test_container_from_url() {
        assert_eq!(container_from_url(URL).unwrap(), "kb-docs");
        assert!(container_from_url("https://example.com/a/b.pdf").is_err());
        assert!(container_from_url("kb-docs/a.pdf").is_err());
        assert!(container_from_url("https://acct.blob.core.windows.net/").is_err());
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(filename_from_url(URL), "Q1 summary.pdf");
        assert_eq!(filename_from_url("plain.txt"), "plain.txt");
        assert_eq!(filename_from_url("https://acct.blob.core.windows.net/c/"), DEFAULT_FILE_NAME);
    }

    #[test]
    fn test_blob_name_keeps_virtual_directories() {
        assert_eq!(blob_name_from_url(URL).unwrap(), "reports/Q1 summary.pdf");
    }

    #[test]
    fn test_blob_url_escapes_spaces() {
        assert_eq!(
            blob_url("acct", "kb", "my file.pdf"),
            "https://acct.blob.core.windows.net/kb/my%20file.pdf"
        );
    }

    #[test]
    fn test_json_blob_name() {
        assert_eq!(json_blob_name(URL), "Q1 summary.json");
        assert_eq!(json_blob_name("https://h/x/archive.tar.gz"), "archive.tar.json");
        assert_eq!(json_blob_name("https://h/x/README"), "README.json");
    }
}
