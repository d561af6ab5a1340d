//! docshelf - named full-text indexes over directories of documents.
//!
//! docshelf walks a directory tree, extracts text and metadata from each
//! candidate file through a pluggable [`ContentExtractor`], and stores the
//! result in a per-name [Tantivy](https://github.com/quickwit-oss/tantivy)
//! index. Indexes are discovered on startup, loaded lazily on first use and
//! can be unloaded or removed at any time.
//!
//! # Quick start
//!
//! ```no_run
//! use std::{path::Path, sync::Arc};
//!
//! use docshelf::{
//!     DataDir,
//!     IndexManager,
//!     Indexer,
//!     IndexerOptions,
//!     PlainTextExtractor,
//!     SearchOptions,
//!     Searcher,
//! };
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let manager = Arc::new(IndexManager::open(&data_dir.indexes_dir().unwrap()).unwrap());
//!
//! let indexer = Indexer::new(Arc::clone(&manager), Arc::new(PlainTextExtractor));
//! let report = indexer
//!     .build_index("notes", Path::new("/home/me/notes"), &IndexerOptions::default())
//!     .unwrap();
//! println!("indexed {} of {}", report.successful.len(), report.total());
//!
//! let searcher = Searcher::new(manager);
//! let results = searcher
//!     .search("ownership", "notes", &SearchOptions::default())
//!     .unwrap();
//! for r in &results.results {
//!     println!("{} (score: {:.3})", r.filepath, r.score);
//! }
//! ```

pub mod data_dir;
pub mod document;
pub mod error;
pub mod extractor;
pub mod indexer;
pub mod manager;
pub mod mcp;
pub mod search;
pub mod snippet;
pub mod tantivy_index;
pub mod walker;

pub use data_dir::DataDir;
pub use document::{DocumentType, IndexedDocument};
pub use error::{Error, Result};
pub use extractor::{ContentExtractor, ExtractionError, PlainTextExtractor};
pub use indexer::{Indexer, IndexerOptions, IndexingResult};
pub use manager::{IndexManager, ManagerOptions};
pub use search::{SearchOptions, SearchResults, Searcher, SortBy};
