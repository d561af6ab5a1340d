use std::{
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    document::IndexedDocument,
    error::{Error, Result},
    extractor::{self, ContentExtractor, ExtractedContent, ExtractionError},
    manager::IndexManager,
    tantivy_index::IndexResources,
    walker::{self, DiscoveredFile, WalkOptions},
};

/// Files larger than this are skipped unless configured otherwise.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// How a directory tree is turned into candidates and processed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IndexerOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Glob patterns matched against paths relative to the root.
    pub include: Vec<String>,
    /// Glob patterns matched against relative and absolute paths.
    pub exclude: Vec<String>,
    /// Files larger than this many bytes are not candidates.
    pub max_file_size: u64,
    /// Upper bound on simultaneous extractions.
    pub max_concurrency: usize,
    /// When false, password-protected files are also reported as failed.
    pub skip_password_protected: bool,
}

impl Default for IndexerOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            include: vec!["*".to_string()],
            exclude: Vec::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            skip_password_protected: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDocument {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectedDocument {
    pub path: PathBuf,
    /// What revealed the encryption.
    pub signal: String,
}

/// Per-build report.
///
/// Every candidate lands in exactly one of `successful`, `failed` or
/// `password_protected`, except that with `skip_password_protected = false`
/// a protected file is listed in both `password_protected` and `failed`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingResult {
    pub index_name: String,
    pub root_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub successful: Vec<PathBuf>,
    pub failed: Vec<FailedDocument>,
    pub password_protected: Vec<ProtectedDocument>,
}

impl IndexingResult {
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }

    /// Number of distinct candidates processed, counting a document that is
    /// both protected and failed once.
    pub fn total(&self) -> usize {
        let double_counted = self
            .password_protected
            .iter()
            .filter(|p| self.failed.iter().any(|f| f.path == p.path))
            .count();
        self.successful.len() + self.failed.len() + self.password_protected.len()
            - double_counted
    }
}

/// What happened to a single candidate.
#[derive(Debug)]
enum Outcome {
    Indexed(PathBuf),
    Failed(PathBuf, String),
    Protected(PathBuf, String),
    Cancelled,
}

/// Builds named indexes from directory trees.
pub struct Indexer {
    manager: Arc<IndexManager>,
    extractor: Arc<dyn ContentExtractor>,
}

impl Indexer {
    pub fn new(
        manager: Arc<IndexManager>,
        extractor: Arc<dyn ContentExtractor>,
    ) -> Self {
        Self { manager, extractor }
    }

    /// Index every candidate under `root` into `name`.
    ///
    /// Building into an existing index appends: documents already present
    /// stay, and a file indexed twice appears twice.
    pub fn build_index(
        &self,
        name: &str,
        root: &Path,
        options: &IndexerOptions,
    ) -> Result<IndexingResult> {
        self.build_index_with_cancel(
            name,
            root,
            options,
            &CancellationToken::new(),
        )
    }

    /// Like [`build_index`](Self::build_index), aborting when `cancel`
    /// fires. An aborted build rolls back and commits nothing.
    pub fn build_index_with_cancel(
        &self,
        name: &str,
        root: &Path,
        options: &IndexerOptions,
        cancel: &CancellationToken,
    ) -> Result<IndexingResult> {
        if !root.exists() {
            return Err(Error::RootNotFound(root.to_path_buf()));
        }
        let started_at = Utc::now();

        self.manager.with_exclusive(name, |resources| {
            let files = walker::discover_files(
                root,
                &WalkOptions {
                    recursive: options.recursive,
                    include: &options.include,
                    exclude: &options.exclude,
                    max_file_size: options.max_file_size,
                },
            )?;
            info!(
                index = name,
                root = %root.display(),
                candidates = files.len(),
                concurrency = options.max_concurrency,
                "building index"
            );

            let outcomes =
                self.process_all(resources, &files, options, cancel)?;

            if cancel.is_cancelled()
                || outcomes.iter().any(|o| matches!(o, Outcome::Cancelled))
            {
                resources.rollback()?;
                warn!(index = name, "build cancelled, staged documents discarded");
                return Err(Error::Cancelled(name.to_string()));
            }

            resources.commit()?;

            let result = collect_outcomes(
                name,
                root,
                started_at,
                outcomes,
                options.skip_password_protected,
            );
            info!(
                index = name,
                successful = result.successful.len(),
                failed = result.failed.len(),
                password_protected = result.password_protected.len(),
                elapsed_ms = result.duration().as_millis() as u64,
                "build committed"
            );
            Ok(result)
        })
    }

    fn process_all(
        &self,
        resources: &IndexResources,
        files: &[DiscoveredFile],
        options: &IndexerOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Outcome>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(options.max_concurrency.max(1))
            .thread_name(|i| format!("docshelf-extract-{i}"))
            .build()?;

        Ok(pool.install(|| {
            files
                .par_iter()
                .map(|file| self.process_one(resources, file, cancel))
                .collect()
        }))
    }

    fn process_one(
        &self,
        resources: &IndexResources,
        file: &DiscoveredFile,
        cancel: &CancellationToken,
    ) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        let path = file.absolute_path.clone();

        let extracted = panic::catch_unwind(AssertUnwindSafe(|| {
            self.extractor.extract(&path, cancel)
        }))
        .unwrap_or_else(|_| {
            Err(ExtractionError::Corrupt("extractor panicked".to_string()))
        });

        match extracted {
            Ok(content) => {
                let document = to_document(&path, file, content);
                match resources.add_document(&document) {
                    Ok(()) => {
                        debug!(path = %path.display(), "indexed");
                        Outcome::Indexed(path)
                    }
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            error = %e,
                            "failed to write document"
                        );
                        Outcome::Failed(path, e.to_string())
                    }
                }
            }
            Err(ExtractionError::Cancelled) => Outcome::Cancelled,
            Err(ExtractionError::PasswordProtected(signal)) => {
                debug!(path = %path.display(), %signal, "password protected");
                Outcome::Protected(path, signal)
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "extraction failed");
                Outcome::Failed(path, e.to_string())
            }
        }
    }
}

fn to_document(
    path: &Path,
    file: &DiscoveredFile,
    content: ExtractedContent,
) -> IndexedDocument {
    let ExtractedContent {
        text,
        metadata,
        doc_type,
    } = content;

    let filename = if metadata.file_name.is_empty() {
        extractor::file_name(path)
    } else {
        metadata.file_name
    };
    let title = metadata
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| extractor::title_from_path(path));
    let size = if metadata.size_bytes > 0 {
        metadata.size_bytes
    } else {
        file.size
    };

    IndexedDocument {
        filepath: path.to_string_lossy().into_owned(),
        filename,
        title,
        content: text,
        doc_type,
        modified: metadata.modified,
        size,
        author: metadata.author.filter(|a| !a.trim().is_empty()),
        keywords: metadata.keywords.filter(|k| !k.trim().is_empty()),
    }
}

fn collect_outcomes(
    name: &str,
    root: &Path,
    started_at: DateTime<Utc>,
    outcomes: Vec<Outcome>,
    skip_password_protected: bool,
) -> IndexingResult {
    let mut result = IndexingResult {
        index_name: name.to_string(),
        root_path: root.to_path_buf(),
        started_at,
        finished_at: started_at,
        successful: Vec::new(),
        failed: Vec::new(),
        password_protected: Vec::new(),
    };

    for outcome in outcomes {
        match outcome {
            Outcome::Indexed(path) => result.successful.push(path),
            Outcome::Failed(path, error) => {
                result.failed.push(FailedDocument { path, error })
            }
            Outcome::Protected(path, signal) => {
                if !skip_password_protected {
                    result.failed.push(FailedDocument {
                        path: path.clone(),
                        error: format!("password protected: {signal}"),
                    });
                }
                result
                    .password_protected
                    .push(ProtectedDocument { path, signal });
            }
            Outcome::Cancelled => {}
        }
    }

    result.finished_at = Utc::now();
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tantivy::schema::Value;

    use super::*;
    use crate::{
        document::DocumentType,
        extractor::{ExtractedMetadata, PlainTextExtractor},
        manager::ManagerOptions,
    };

    /// Treats files containing `LOCKED` as protected and `BROKEN` as corrupt.
    struct StubExtractor {
        calls: AtomicUsize,
    }

    impl StubExtractor {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ContentExtractor for StubExtractor {
        fn extract(
            &self,
            path: &Path,
            _cancel: &CancellationToken,
        ) -> std::result::Result<ExtractedContent, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = std::fs::read_to_string(path)?;
            if text.contains("LOCKED") {
                return Err(ExtractionError::PasswordProtected(
                    "stub".to_string(),
                ));
            }
            if text.contains("BROKEN") {
                return Err(ExtractionError::Corrupt("stub".to_string()));
            }
            if text.contains("PANIC") {
                panic!("extractor blew up");
            }
            Ok(ExtractedContent {
                metadata: ExtractedMetadata {
                    file_name: extractor::file_name(path),
                    title: None,
                    modified: DateTime::from_timestamp(1_700_000_000, 0)
                        .unwrap(),
                    size_bytes: text.len() as u64,
                    author: Some("tester".to_string()),
                    keywords: None,
                },
                text,
                doc_type: DocumentType::from_path(path),
            })
        }
    }

    /// Cancels the shared token as soon as it is called.
    struct CancellingExtractor(CancellationToken);

    impl ContentExtractor for CancellingExtractor {
        fn extract(
            &self,
            _path: &Path,
            _cancel: &CancellationToken,
        ) -> std::result::Result<ExtractedContent, ExtractionError> {
            self.0.cancel();
            Err(ExtractionError::Cancelled)
        }
    }

    fn setup(
        extractor: Arc<dyn ContentExtractor>,
    ) -> (Indexer, Arc<IndexManager>, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let manager = Arc::new(
            IndexManager::with_options(
                &tmp.path().join("indexes"),
                ManagerOptions {
                    writer_memory_budget: 15_000_000,
                },
            )
            .unwrap(),
        );
        (Indexer::new(Arc::clone(&manager), extractor), manager, tmp)
    }

    fn corpus(root: &Path) {
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("good.txt"), "hello world").unwrap();
        std::fs::write(root.join("sub").join("deep.md"), "nested note").unwrap();
        std::fs::write(root.join("locked.txt"), "LOCKED").unwrap();
        std::fs::write(root.join("broken.txt"), "BROKEN").unwrap();
        std::fs::write(root.join("empty.txt"), "").unwrap();
    }

    #[test]
    fn buckets_account_for_every_candidate() {
        let (indexer, manager, tmp) = setup(Arc::new(StubExtractor::new()));
        let root = tmp.path().join("src");
        corpus(&root);

        let result = indexer
            .build_index("docs", &root, &IndexerOptions::default())
            .unwrap();

        assert_eq!(result.successful.len(), 2);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.password_protected.len(), 1);
        assert_eq!(result.total(), 4);
        assert!(result.failed[0].error.contains("corrupt"));
        assert_eq!(manager.document_count("docs").unwrap(), 2);
        assert!(result.finished_at >= result.started_at);
    }

    #[test]
    fn strict_mode_double_buckets_protected_files() {
        let (indexer, _manager, tmp) = setup(Arc::new(StubExtractor::new()));
        let root = tmp.path().join("src");
        corpus(&root);

        let options = IndexerOptions {
            skip_password_protected: false,
            ..Default::default()
        };
        let result = indexer.build_index("docs", &root, &options).unwrap();

        assert_eq!(result.password_protected.len(), 1);
        assert_eq!(result.failed.len(), 2);
        assert!(
            result
                .failed
                .iter()
                .any(|f| f.path == result.password_protected[0].path)
        );
        assert_eq!(result.total(), 4);
    }

    #[test]
    fn concurrency_does_not_change_totals() {
        let tmp_root = tempfile::tempdir().unwrap();
        for i in 0..100 {
            let body = match i % 10 {
                0 => "LOCKED".to_string(),
                1 => "BROKEN".to_string(),
                _ => format!("document number {i}"),
            };
            std::fs::write(tmp_root.path().join(format!("f{i:03}.txt")), body)
                .unwrap();
        }

        let mut totals = Vec::new();
        for (n, concurrency) in [1usize, 4].into_iter().enumerate() {
            let (indexer, _manager, _tmp) = setup(Arc::new(StubExtractor::new()));
            let options = IndexerOptions {
                max_concurrency: concurrency,
                ..Default::default()
            };
            let result = indexer
                .build_index(&format!("run{n}"), tmp_root.path(), &options)
                .unwrap();
            totals.push((
                result.successful.len(),
                result.failed.len(),
                result.password_protected.len(),
            ));
        }

        assert_eq!(totals[0], (80, 10, 10));
        assert_eq!(totals[0], totals[1]);
    }

    #[test]
    fn panicking_extractor_is_isolated() {
        let (indexer, _manager, tmp) = setup(Arc::new(StubExtractor::new()));
        let root = tmp.path().join("src");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.txt"), "fine").unwrap();
        std::fs::write(root.join("b.txt"), "PANIC").unwrap();

        let result = indexer
            .build_index("docs", &root, &IndexerOptions::default())
            .unwrap();
        assert_eq!(result.successful.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].error.contains("panicked"));
    }

    #[test]
    fn missing_root_fails_fast() {
        let (indexer, manager, tmp) = setup(Arc::new(StubExtractor::new()));
        let err = indexer
            .build_index(
                "docs",
                &tmp.path().join("nope"),
                &IndexerOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::RootNotFound(_)));
        assert!(!manager.exists("docs"));
    }

    #[test]
    fn empty_candidate_set_is_a_successful_build() {
        let (indexer, manager, tmp) = setup(Arc::new(StubExtractor::new()));
        let root = tmp.path().join("src");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.txt"), "x").unwrap();

        let options = IndexerOptions {
            include: vec!["*.pdf".to_string()],
            ..Default::default()
        };
        let result = indexer.build_index("docs", &root, &options).unwrap();
        assert_eq!(result.total(), 0);
        assert!(manager.exists("docs"));
        assert_eq!(manager.document_count("docs").unwrap(), 0);
    }

    #[test]
    fn builds_are_additive() {
        let (indexer, manager, tmp) = setup(Arc::new(PlainTextExtractor));
        let root = tmp.path().join("src");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.txt"), "alpha").unwrap();

        indexer
            .build_index("docs", &root, &IndexerOptions::default())
            .unwrap();
        indexer
            .build_index("docs", &root, &IndexerOptions::default())
            .unwrap();
        assert_eq!(manager.document_count("docs").unwrap(), 2);
    }

    #[test]
    fn cancelled_build_commits_nothing() {
        let token = CancellationToken::new();
        let (indexer, manager, tmp) =
            setup(Arc::new(CancellingExtractor(token.clone())));
        let root = tmp.path().join("src");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("a.txt"), "alpha").unwrap();

        let err = indexer
            .build_index_with_cancel(
                "docs",
                &root,
                &IndexerOptions::default(),
                &token,
            )
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
        assert_eq!(manager.document_count("docs").unwrap(), 0);
    }

    #[test]
    fn documents_carry_extracted_metadata() {
        let (indexer, manager, tmp) = setup(Arc::new(StubExtractor::new()));
        let root = tmp.path().join("src");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("report.txt"), "quarterly numbers").unwrap();

        indexer
            .build_index("docs", &root, &IndexerOptions::default())
            .unwrap();

        let res = manager.get_or_create_resources("docs").unwrap();
        let searcher = res.searcher().unwrap();
        let f = res.fields();
        let (_, addr) = searcher
            .search(
                &tantivy::query::AllQuery,
                &tantivy::collector::TopDocs::with_limit(1),
            )
            .unwrap()[0];
        let doc: tantivy::TantivyDocument = searcher.doc(addr).unwrap();
        assert_eq!(
            doc.get_first(f.title).and_then(|v| v.as_str()),
            Some("report")
        );
        assert_eq!(
            doc.get_first(f.author).and_then(|v| v.as_str()),
            Some("tester")
        );
        assert_eq!(
            doc.get_first(f.doc_type).and_then(|v| v.as_str()),
            Some("text")
        );
    }
}
