//! Request fingerprints
//!
//! A [`CacheKey`] is the SHA-256 of the stable JSON form of
//! `(category, normalized query, ordered file fingerprints)`, so two
//! logically identical requests always map to the same key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tooling::serialization::{sha256_hex, stable_digest};

use crate::{RelayError, Result};

/// Largest attachment accepted, in bytes (10 MiB).
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

/// Request class; each category has its own cache policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    General,
    Researcher,
    Coder,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::General, Category::Researcher, Category::Coder];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Researcher => "researcher",
            Category::Coder => "coder",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Category::General),
            "researcher" => Ok(Category::Researcher),
            "coder" => Ok(Category::Coder),
            other => Err(RelayError::InvalidRequest(format!(
                "unknown category '{}'",
                other
            ))),
        }
    }
}

/// Trim, collapse internal whitespace and lowercase a query.
///
/// ```rust
/// use relay::fingerprint::normalize_query;
///
/// assert_eq!(normalize_query("  Explain \n  Recursion "), "explain recursion");
/// ```
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic lookup key for a request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct KeyMaterial<'a> {
    category: Category,
    query: String,
    files: &'a [String],
}

impl CacheKey {
    /// Derive the key for `(category, query, file fingerprints)`.
    ///
    /// The query is normalized with [`normalize_query`]; fingerprint order
    /// is significant.
    pub fn derive(category: Category, query: &str, file_fingerprints: &[String]) -> Result<Self> {
        let material = KeyMaterial {
            category,
            query: normalize_query(query),
            files: file_fingerprints,
        };
        Ok(CacheKey(stable_digest(&material)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Infer a MIME type from a file name's extension.
pub fn mime_for(name: &str) -> &'static str {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Metadata of a file attached to a query.
///
/// Only the fingerprint travels with the request; content extraction is the
/// caller's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub name: String,
    pub mime_type: String,
    pub size: usize,
    pub sha256: String,
}

impl FileAttachment {
    /// Fingerprint `bytes`, rejecting payloads over [`MAX_ATTACHMENT_BYTES`].
    pub fn from_bytes(name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let name = name.into();
        if bytes.len() > MAX_ATTACHMENT_BYTES {
            return Err(RelayError::InvalidRequest(format!(
                "file '{}' is {} bytes, limit is {} bytes",
                name,
                bytes.len(),
                MAX_ATTACHMENT_BYTES
            )));
        }

        Ok(Self {
            mime_type: mime_for(&name).to_string(),
            size: bytes.len(),
            sha256: sha256_hex(bytes),
            name,
        })
    }

    /// Read and fingerprint a file from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let size = std::fs::metadata(path)?.len();
        if size > MAX_ATTACHMENT_BYTES as u64 {
            return Err(RelayError::InvalidRequest(format!(
                "file '{}' is {} bytes, limit is {} bytes",
                path.display(),
                size,
                MAX_ATTACHMENT_BYTES
            )));
        }
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::from_bytes(name, &bytes)
    }

    pub fn fingerprint(&self) -> &str {
        &self.sha256
    }
}
