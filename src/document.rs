use std::{fmt, path::Path, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Coarse document format tag stored alongside every indexed document.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Word,
    Excel,
    PowerPoint,
    Text,
    Markdown,
    Html,
    Csv,
    Rtf,
    Json,
    Xml,
    Image,
    Unknown,
}

impl DocumentType {
    pub const ALL: &[DocumentType] = &[
        Self::Pdf,
        Self::Word,
        Self::Excel,
        Self::PowerPoint,
        Self::Text,
        Self::Markdown,
        Self::Html,
        Self::Csv,
        Self::Rtf,
        Self::Json,
        Self::Xml,
        Self::Image,
        Self::Unknown,
    ];

    /// Classify a file by its extension (case-insensitive).
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => Self::Pdf,
            "doc" | "docx" | "odt" => Self::Word,
            "xls" | "xlsx" | "ods" => Self::Excel,
            "ppt" | "pptx" | "odp" => Self::PowerPoint,
            "txt" | "text" | "log" => Self::Text,
            "md" | "markdown" => Self::Markdown,
            "html" | "htm" => Self::Html,
            "csv" | "tsv" => Self::Csv,
            "rtf" => Self::Rtf,
            "json" => Self::Json,
            "xml" => Self::Xml,
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff"
            | "webp" => Self::Image,
            _ => Self::Unknown,
        }
    }

    /// The tag written to the index.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Word => "word",
            Self::Excel => "excel",
            Self::PowerPoint => "powerpoint",
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Csv => "csv",
            Self::Rtf => "rtf",
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Image => "image",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored tag, mapping anything unrecognised to `Unknown`.
    pub fn from_tag(tag: &str) -> Self {
        tag.parse().unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == lower)
            .ok_or_else(|| format!("unknown document type: {s}"))
    }
}

/// The persisted record for one source file.
///
/// Documents are immutable once written; indexing the same file again
/// appends a second record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedDocument {
    pub filepath: String,
    pub filename: String,
    pub title: String,
    pub content: String,
    pub doc_type: DocumentType,
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub author: Option<String>,
    pub keywords: Option<String>,
}

impl IndexedDocument {
    /// Check the invariants required before a document may be written.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason| Error::InvalidDocument {
            path: self.filepath.clone(),
            reason,
        };

        if self.filepath.trim().is_empty() {
            return Err(invalid("empty file path"));
        }
        if self.filename.trim().is_empty() {
            return Err(invalid("empty file name"));
        }
        if self.author.as_deref().is_some_and(|a| a.trim().is_empty()) {
            return Err(invalid("author present but blank"));
        }
        if self.keywords.as_deref().is_some_and(|k| k.trim().is_empty()) {
            return Err(invalid("keywords present but blank"));
        }
        Ok(())
    }
}
