use std::{
    path::Path,
    sync::{Arc, Mutex, mpsc},
    time::{Duration, SystemTime},
};

use docshelf::{
    ContentExtractor,
    DocumentType,
    Error,
    ExtractionError,
    IndexManager,
    Indexer,
    IndexerOptions,
    PlainTextExtractor,
    SearchOptions,
    Searcher,
    SortBy,
    extractor::ExtractedContent,
};
use tokio_util::sync::CancellationToken;

/// Treats files whose text starts with `LOCKED` as encrypted.
struct LockAwareExtractor;

impl ContentExtractor for LockAwareExtractor {
    fn extract(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExtractedContent, ExtractionError> {
        let content = PlainTextExtractor.extract(path, cancel)?;
        if content.text.starts_with("LOCKED") {
            return Err(ExtractionError::PasswordProtected(
                "test marker".to_string(),
            ));
        }
        Ok(content)
    }
}

/// Blocks on `slow.txt` until released; everything else is plain text.
struct GatedExtractor {
    started: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl ContentExtractor for GatedExtractor {
    fn extract(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<ExtractedContent, ExtractionError> {
        if path.file_name().is_some_and(|n| n == "slow.txt") {
            self.started.lock().unwrap().send(()).unwrap();
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(30))
                .unwrap();
        }
        PlainTextExtractor.extract(path, cancel)
    }
}

struct Fixture {
    _tmp: tempfile::TempDir,
    manager: Arc<IndexManager>,
    indexer: Indexer,
    searcher: Searcher,
    docs: std::path::PathBuf,
    indexes: std::path::PathBuf,
}

fn fixture() -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    let docs = tmp.path().join("docs");
    let indexes = tmp.path().join("indexes");
    std::fs::create_dir_all(&docs).unwrap();

    let manager = Arc::new(IndexManager::open(&indexes).unwrap());
    let indexer =
        Indexer::new(Arc::clone(&manager), Arc::new(LockAwareExtractor));
    let searcher = Searcher::new(Arc::clone(&manager));

    Fixture {
        _tmp: tmp,
        manager,
        indexer,
        searcher,
        docs,
        indexes,
    }
}

fn options() -> IndexerOptions {
    IndexerOptions {
        max_concurrency: 2,
        ..Default::default()
    }
}

fn set_mtime(path: &Path, unix_secs: u64) {
    std::fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(unix_secs))
        .unwrap();
}

#[test]
fn empty_and_protected_files_are_bucketed() {
    let f = fixture();
    std::fs::write(f.docs.join("empty.txt"), "").unwrap();
    std::fs::write(f.docs.join("good.txt"), "quarterly numbers").unwrap();
    std::fs::write(f.docs.join("locked.txt"), "LOCKED payload").unwrap();

    let result = f.indexer.build_index("docs", &f.docs, &options()).unwrap();
    assert_eq!(result.successful.len(), 1);
    assert_eq!(result.password_protected.len(), 1);
    assert_eq!(result.failed.len(), 0);
    assert_eq!(result.total(), 2);

    let hits = f
        .searcher
        .search("", "docs", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits.total_hits, 1);
    assert!(hits.results[0].filepath.ends_with("good.txt"));
}

#[test]
fn date_sort_puts_newest_first_regardless_of_score() {
    let f = fixture();
    let old = f.docs.join("old.log");
    let new = f.docs.join("new.log");
    std::fs::write(&old, "error error error error").unwrap();
    std::fs::write(&new, "a single error among many other words here").unwrap();
    // 2024-01-01 and 2024-06-01
    set_mtime(&old, 1_704_067_200);
    set_mtime(&new, 1_717_200_000);

    f.indexer.build_index("logs", &f.docs, &options()).unwrap();

    let by_relevance = f
        .searcher
        .search("error", "logs", &SearchOptions::default())
        .unwrap();
    assert!(by_relevance.results[0].filepath.ends_with("old.log"));

    let by_date = f
        .searcher
        .search("error", "logs", &SearchOptions {
            sort_by: SortBy::Date,
            sort_descending: true,
            ..Default::default()
        })
        .unwrap();
    assert!(by_date.results[0].filepath.ends_with("new.log"));
    assert_eq!(by_date.results[0].modified.timestamp(), 1_717_200_000);
}

#[test]
fn unload_and_reload_yield_identical_results() {
    let f = fixture();
    for i in 0..10 {
        std::fs::write(
            f.docs.join(format!("note{i}.md")),
            format!("# Note {i}\nrust ownership {}\n", "borrow ".repeat(i)),
        )
        .unwrap();
    }
    f.indexer.build_index("notes", &f.docs, &options()).unwrap();

    let before = f
        .searcher
        .search("borrow", "notes", &SearchOptions::default())
        .unwrap();
    assert!(f.manager.unload("notes"));
    let after = f
        .searcher
        .search("borrow", "notes", &SearchOptions::default())
        .unwrap();

    assert_eq!(before.total_hits, 9);
    assert_eq!(before.results, after.results);
    assert_eq!(before.by_type, after.by_type);
}

#[test]
fn indexes_survive_a_new_manager() {
    let f = fixture();
    std::fs::write(f.docs.join("a.txt"), "persistent content").unwrap();
    f.indexer.build_index("keep", &f.docs, &options()).unwrap();
    f.manager.shutdown();

    let reopened = Arc::new(IndexManager::open(&f.indexes).unwrap());
    assert_eq!(reopened.list_names(), vec!["keep"]);
    assert!(!reopened.is_loaded("keep"));

    let searcher = Searcher::new(Arc::clone(&reopened));
    let hits = searcher
        .search("persistent", "keep", &SearchOptions::default())
        .unwrap();
    assert_eq!(hits.total_hits, 1);
}

#[test]
fn remove_then_rebuild_starts_fresh() {
    let f = fixture();
    std::fs::write(f.docs.join("a.txt"), "alpha").unwrap();
    std::fs::write(f.docs.join("b.txt"), "beta").unwrap();

    f.indexer.build_index("tmp", &f.docs, &options()).unwrap();
    f.indexer.build_index("tmp", &f.docs, &options()).unwrap();
    assert_eq!(f.manager.document_count("tmp").unwrap(), 4);

    assert!(f.manager.remove("tmp").unwrap());
    assert!(!f.manager.exists("tmp"));
    assert!(!f.indexes.join("tmp").exists());
    assert!(matches!(
        f.searcher.search("alpha", "tmp", &SearchOptions::default()),
        Err(Error::IndexNotFound { .. })
    ));

    f.indexer.build_index("tmp", &f.docs, &options()).unwrap();
    assert_eq!(f.manager.document_count("tmp").unwrap(), 2);
}

#[test]
fn type_filter_without_matches_is_empty() {
    let f = fixture();
    std::fs::write(f.docs.join("a.txt"), "invoice total").unwrap();
    std::fs::write(f.docs.join("b.md"), "# Invoice\ninvoice notes").unwrap();
    f.indexer.build_index("mixed", &f.docs, &options()).unwrap();

    let pdf_only = SearchOptions {
        file_types: vec![DocumentType::Pdf],
        ..Default::default()
    };
    let hits = f.searcher.search("invoice", "mixed", &pdf_only).unwrap();
    assert_eq!(hits.total_hits, 0);
    assert!(hits.results.is_empty());

    let md_only = SearchOptions {
        file_types: vec![DocumentType::Markdown],
        ..Default::default()
    };
    let hits = f.searcher.search("invoice", "mixed", &md_only).unwrap();
    assert_eq!(hits.total_hits, 1);
    assert_eq!(hits.results[0].title, "Invoice");
}

#[test]
fn concurrent_builds_on_different_names() {
    let f = fixture();
    for i in 0..20 {
        std::fs::write(f.docs.join(format!("f{i}.txt")), format!("doc {i}"))
            .unwrap();
    }

    std::thread::scope(|s| {
        for name in ["one", "two", "three"] {
            let indexer = &f.indexer;
            let docs = &f.docs;
            s.spawn(move || {
                let result =
                    indexer.build_index(name, docs, &options()).unwrap();
                assert_eq!(result.successful.len(), 20);
            });
        }
    });

    assert_eq!(f.manager.list_names(), vec!["one", "three", "two"]);
    for name in ["one", "two", "three"] {
        assert_eq!(f.manager.document_count(name).unwrap(), 20);
    }
}

#[test]
fn search_proceeds_while_same_index_is_building() {
    let f = fixture();
    std::fs::write(f.docs.join("hello.txt"), "hello world").unwrap();
    f.indexer.build_index("docs", &f.docs, &options()).unwrap();
    // Warm the cache so the search below is a pure cache hit.
    assert_eq!(
        f.searcher
            .search("hello", "docs", &SearchOptions::default())
            .unwrap()
            .total_hits,
        1
    );

    let more = f.docs.parent().unwrap().join("more");
    std::fs::create_dir_all(&more).unwrap();
    std::fs::write(more.join("slow.txt"), "hello again").unwrap();

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gated = Indexer::new(
        Arc::clone(&f.manager),
        Arc::new(GatedExtractor {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        }),
    );

    std::thread::scope(|s| {
        let build = s.spawn(|| gated.build_index("docs", &more, &options()));
        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let searcher = &f.searcher;
        s.spawn(move || {
            let hits = searcher
                .search("hello", "docs", &SearchOptions::default())
                .map(|r| r.total_hits);
            done_tx.send(hits).unwrap();
        });

        let during = done_rx.recv_timeout(Duration::from_secs(5));
        release_tx.send(()).unwrap();
        assert_eq!(during.expect("search blocked behind build").unwrap(), 1);

        let result = build.join().unwrap().unwrap();
        assert_eq!(result.successful.len(), 1);
    });

    let after = f
        .searcher
        .search("hello", "docs", &SearchOptions::default())
        .unwrap();
    assert_eq!(after.total_hits, 2);
}
