use std::{io::Read, path::Path, time::SystemTime};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::document::DocumentType;

/// Structured metadata reported by an extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMetadata {
    pub file_name: String,
    pub title: Option<String>,
    pub modified: DateTime<Utc>,
    pub size_bytes: u64,
    pub author: Option<String>,
    pub keywords: Option<String>,
}

/// Plain text and metadata pulled out of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub text: String,
    pub metadata: ExtractedMetadata,
    pub doc_type: DocumentType,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("unsupported format: {0}")]
    Unsupported(String),

    /// The file is encrypted; the payload names what gave it away.
    #[error("password protected: {0}")]
    PasswordProtected(String),

    #[error("corrupt document: {0}")]
    Corrupt(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("extraction cancelled")]
    Cancelled,
}

/// Turns a file on disk into indexable text.
///
/// Implementations must be callable from many worker threads at once and
/// should poll `cancel` between expensive steps.
pub trait ContentExtractor: Send + Sync {
    fn extract(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExtractedContent, ExtractionError>;
}

/// How many leading bytes are inspected for binary content.
const SNIFF_LEN: usize = 8192;

/// Magic bytes of an OLE compound file; encrypted OOXML packages use it.
const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Extractor for text-like formats.
///
/// Binary office formats are not parsed, but encrypted PDFs and encrypted
/// OOXML packages are recognised so they land in the password-protected
/// bucket rather than the generic failure bucket.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

impl ContentExtractor for PlainTextExtractor {
    fn extract(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExtractedContent, ExtractionError> {
        if cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let doc_type = DocumentType::from_path(path);
        let fs_meta = std::fs::metadata(path)?;

        match doc_type {
            DocumentType::Text
            | DocumentType::Markdown
            | DocumentType::Html
            | DocumentType::Csv
            | DocumentType::Rtf
            | DocumentType::Json
            | DocumentType::Xml => {}
            DocumentType::Pdf => {
                let bytes = std::fs::read(path)?;
                if !bytes.starts_with(b"%PDF") {
                    return Err(ExtractionError::Corrupt(
                        "missing %PDF header".to_string(),
                    ));
                }
                if contains(&bytes, b"/Encrypt") {
                    return Err(ExtractionError::PasswordProtected(
                        "PDF /Encrypt dictionary".to_string(),
                    ));
                }
                return Err(ExtractionError::Unsupported(doc_type.to_string()));
            }
            DocumentType::Word
            | DocumentType::Excel
            | DocumentType::PowerPoint => {
                if is_ooxml(path)
                    && read_head(path, OLE_MAGIC.len())? == OLE_MAGIC
                {
                    return Err(ExtractionError::PasswordProtected(
                        "encrypted OOXML package".to_string(),
                    ));
                }
                return Err(ExtractionError::Unsupported(doc_type.to_string()));
            }
            DocumentType::Image | DocumentType::Unknown => {
                return Err(ExtractionError::Unsupported(doc_type.to_string()));
            }
        }

        let bytes = std::fs::read(path)?;
        if bytes[..bytes.len().min(SNIFF_LEN)].contains(&0) {
            return Err(ExtractionError::Corrupt(
                "binary content in text file".to_string(),
            ));
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();

        if cancel.is_cancelled() {
            return Err(ExtractionError::Cancelled);
        }

        let title = (doc_type == DocumentType::Markdown)
            .then(|| markdown_title(&text))
            .flatten();

        Ok(ExtractedContent {
            metadata: ExtractedMetadata {
                file_name: file_name(path),
                title,
                modified: modified_time(fs_meta.modified().ok()),
                size_bytes: fs_meta.len(),
                author: None,
                keywords: None,
            },
            text,
            doc_type,
        })
    }
}

/// First non-empty `# ` heading in markdown text.
pub fn markdown_title(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let heading = line.trim().strip_prefix("# ")?.trim();
        (!heading.is_empty()).then(|| heading.to_string())
    })
}

/// Title fallback: file name without its extension.
pub fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

pub fn modified_time(time: Option<SystemTime>) -> DateTime<Utc> {
    time.map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn is_ooxml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .is_some_and(|e| matches!(e.as_str(), "docx" | "xlsx" | "pptx"))
}

fn read_head(path: &Path, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(len);
    std::fs::File::open(path)?
        .take(len as u64)
        .read_to_end(&mut buf)?;
    Ok(buf)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}
