use std::{
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    Searcher,
    TantivyDocument,
    directory::MmapDirectory,
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};
use tracing::{debug, warn};

use crate::{
    document::IndexedDocument,
    error::{Error, Result},
};

/// Field names used in the schema.
pub mod fields {
    pub const FILEPATH: &str = "filepath";
    pub const FILENAME: &str = "filename";
    pub const TITLE: &str = "title";
    pub const CONTENT: &str = "content";
    pub const DOC_TYPE: &str = "doc_type";
    pub const MODIFIED: &str = "modified";
    pub const SIZE: &str = "size";
    pub const AUTHOR: &str = "author";
    pub const KEYWORDS: &str = "keywords";
}

const EN_STEM: &str = "en_stem";

/// Resolved field handles for the schema.
#[derive(Debug, Clone, Copy)]
pub struct SchemaFields {
    pub filepath: Field,
    pub filename: Field,
    pub title: Field,
    pub content: Field,
    pub doc_type: Field,
    pub modified: Field,
    pub size: Field,
    pub author: Field,
    pub keywords: Field,
}

fn build_schema() -> (Schema, SchemaFields) {
    let mut builder = Schema::builder();

    let stemmed = TextOptions::default()
        .set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(EN_STEM)
                .set_index_option(IndexRecordOption::WithFreqsAndPositions),
        )
        .set_stored();

    let filepath = builder.add_text_field(fields::FILEPATH, STRING | STORED);
    let filename = builder.add_text_field(fields::FILENAME, TEXT | STORED);
    let title = builder.add_text_field(fields::TITLE, stemmed.clone());
    let content = builder.add_text_field(fields::CONTENT, stemmed);
    let doc_type =
        builder.add_text_field(fields::DOC_TYPE, STRING | STORED | FAST);
    let modified =
        builder.add_i64_field(fields::MODIFIED, INDEXED | STORED | FAST);
    let size = builder.add_u64_field(fields::SIZE, STORED | FAST);
    let author = builder.add_text_field(fields::AUTHOR, TEXT | STORED);
    let keywords = builder.add_text_field(fields::KEYWORDS, TEXT | STORED);

    let schema = builder.build();
    let fields = SchemaFields {
        filepath,
        filename,
        title,
        content,
        doc_type,
        modified,
        size,
        author,
        keywords,
    };

    (schema, fields)
}

fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register(EN_STEM, en_stem);
}

fn open_mmap(dir: &Path) -> Result<MmapDirectory> {
    MmapDirectory::open(dir).map_err(|e| {
        Error::Tantivy(tantivy::TantivyError::SystemError(e.to_string()))
    })
}

/// Whether `dir` holds a committed tantivy index (a `meta.json` marker).
pub fn is_index_dir(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    let mmap_dir = open_mmap(dir)?;
    Index::exists(&mmap_dir).map_err(|e| {
        Error::Tantivy(tantivy::TantivyError::SystemError(e.to_string()))
    })
}

/// Total size in bytes of the regular files directly inside `dir`.
pub fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

/// The live handles for one loaded index: storage, writer and analyzer.
///
/// The writer sits behind an `RwLock` so extraction workers can add
/// documents concurrently under the read side, while commit, rollback and
/// close take the write side. Closing drops the writer (releasing the
/// directory lock) even if other holders of this value are still alive.
pub struct IndexResources {
    name: String,
    dir: Option<PathBuf>,
    index: Index,
    reader: IndexReader,
    writer: RwLock<Option<IndexWriter>>,
    fields: SchemaFields,
}

impl IndexResources {
    /// Open or create the index stored in `dir`.
    pub fn open(name: &str, dir: &Path, memory_budget: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let (schema, fields) = build_schema();

        let mmap_dir = open_mmap(dir)?;
        let index = if Index::exists(&mmap_dir)
            .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
        {
            Index::open(mmap_dir)?
        } else {
            debug!(index = name, dir = %dir.display(), "creating new index");
            Index::create(
                mmap_dir,
                schema,
                tantivy::IndexSettings::default(),
            )?
        };

        let dir = Some(dir.to_path_buf());
        Self::from_index(name, dir, index, fields, memory_budget)
    }

    /// Create an in-memory index (for testing).
    pub fn open_in_ram(name: &str, memory_budget: usize) -> Result<Self> {
        let (schema, fields) = build_schema();
        let index = Index::create_in_ram(schema);
        Self::from_index(name, None, index, fields, memory_budget)
    }

    fn from_index(
        name: &str,
        dir: Option<PathBuf>,
        index: Index,
        fields: SchemaFields,
        memory_budget: usize,
    ) -> Result<Self> {
        register_tokenizers(&index);
        let reader = index.reader()?;
        let writer = index.writer(memory_budget)?;

        Ok(Self {
            name: name.to_string(),
            dir,
            index,
            reader,
            writer: RwLock::new(Some(writer)),
            fields,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn fields(&self) -> SchemaFields {
        self.fields
    }

    /// Validate and stage one document. Invisible to readers until commit.
    pub fn add_document(&self, document: &IndexedDocument) -> Result<()> {
        document.validate()?;

        let f = self.fields;
        let mut doc = TantivyDocument::default();
        doc.add_text(f.filepath, &document.filepath);
        doc.add_text(f.filename, &document.filename);
        doc.add_text(f.title, &document.title);
        doc.add_text(f.content, &document.content);
        doc.add_text(f.doc_type, document.doc_type.as_str());
        doc.add_i64(f.modified, document.modified.timestamp());
        doc.add_u64(f.size, document.size);
        if let Some(author) = &document.author {
            doc.add_text(f.author, author);
        }
        if let Some(keywords) = &document.keywords {
            doc.add_text(f.keywords, keywords);
        }

        let guard = self.writer.read().unwrap_or_else(PoisonError::into_inner);
        let writer = guard
            .as_ref()
            .ok_or_else(|| Error::IndexClosed(self.name.clone()))?;
        writer.add_document(doc)?;
        Ok(())
    }

    /// Make every staged document visible to new snapshots.
    pub fn commit(&self) -> Result<()> {
        let mut guard =
            self.writer.write().unwrap_or_else(PoisonError::into_inner);
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::IndexClosed(self.name.clone()))?;
        writer.commit()?;
        Ok(())
    }

    /// Discard every document staged since the last commit.
    pub fn rollback(&self) -> Result<()> {
        let mut guard =
            self.writer.write().unwrap_or_else(PoisonError::into_inner);
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::IndexClosed(self.name.clone()))?;
        writer.rollback()?;
        Ok(())
    }

    /// Open a fresh read snapshot reflecting the latest commit.
    pub fn searcher(&self) -> Result<Searcher> {
        self.reader.reload()?;
        Ok(self.reader.searcher())
    }

    /// Number of committed documents.
    pub fn num_docs(&self) -> Result<u64> {
        Ok(self.searcher()?.num_docs())
    }

    /// Estimated on-disk footprint; zero for in-memory indexes.
    pub fn disk_size(&self) -> u64 {
        self.dir.as_deref().map(dir_size).unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.writer
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Release the writer. Uncommitted documents are dropped.
    pub fn close(&self) {
        let writer = self
            .writer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer
            && let Err(e) = writer.wait_merging_threads()
        {
            warn!(
                index = %self.name,
                error = %e,
                "merge threads did not finish cleanly"
            );
        }
    }
}

impl std::fmt::Debug for IndexResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexResources")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

pub(crate) fn extract_text(
    doc: &TantivyDocument,
    field: Field,
) -> Option<String> {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

pub(crate) fn extract_i64(doc: &TantivyDocument, field: Field) -> Option<i64> {
    doc.get_first(field).and_then(|v| v.as_i64())
}

pub(crate) fn extract_u64(doc: &TantivyDocument, field: Field) -> u64 {
    doc.get_first(field).and_then(|v| v.as_u64()).unwrap_or(0)
}
