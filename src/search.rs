use std::{
    cmp::Ordering,
    collections::BTreeMap,
    ops::Bound,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tantivy::{
    TantivyDocument,
    Term,
    collector::{Count, TopDocs},
    query::{
        AllQuery,
        BooleanQuery,
        Occur,
        Query,
        QueryParser,
        RangeQuery,
        TermQuery,
    },
    schema::IndexRecordOption,
};
use tracing::debug;

use crate::{
    document::DocumentType,
    error::Result,
    manager::IndexManager,
    snippet::{self, LineSnippetExtractor, SnippetExtractor},
    tantivy_index::{IndexResources, extract_i64, extract_text, extract_u64},
};

pub const DEFAULT_MAX_RESULTS: usize = 50;

/// Key used to re-order results after retrieval.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Relevance,
    Date,
    Title,
    Path,
    Size,
}

/// Per-call search knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchOptions {
    /// Upper bound on returned results.
    pub max_results: usize,
    pub include_snippets: bool,
    pub sort_by: SortBy,
    pub sort_descending: bool,
    /// Restrict to these document types; empty means any type.
    pub file_types: Vec<DocumentType>,
    /// Inclusive lower bound on the modification date.
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the modification date.
    pub date_to: Option<DateTime<Utc>>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            max_results: DEFAULT_MAX_RESULTS,
            include_snippets: true,
            sort_by: SortBy::Relevance,
            sort_descending: true,
            file_types: Vec::new(),
            date_from: None,
            date_to: None,
        }
    }
}

/// One ranked hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub filepath: String,
    pub filename: String,
    pub title: String,
    pub score: f32,
    pub doc_type: DocumentType,
    /// `DateTime::<Utc>::MIN_UTC` when the stored date was missing.
    pub modified: DateTime<Utc>,
    pub size: u64,
    pub author: Option<String>,
    pub snippets: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub query: String,
    pub index_name: String,
    /// Hits matched by the query, which may exceed `results.len()`.
    pub total_hits: usize,
    #[serde(rename = "elapsedMs", serialize_with = "serialize_millis")]
    pub elapsed: Duration,
    pub results: Vec<SearchResult>,
    pub by_type: BTreeMap<DocumentType, usize>,
    pub by_directory: BTreeMap<String, usize>,
}

fn serialize_millis<S: serde::Serializer>(
    d: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Runs queries against indexes owned by an [`IndexManager`].
pub struct Searcher {
    manager: Arc<IndexManager>,
    snippets: Box<dyn SnippetExtractor>,
}

impl Searcher {
    pub fn new(manager: Arc<IndexManager>) -> Self {
        Self::with_snippet_extractor(
            manager,
            Box::new(LineSnippetExtractor::default()),
        )
    }

    pub fn with_snippet_extractor(
        manager: Arc<IndexManager>,
        snippets: Box<dyn SnippetExtractor>,
    ) -> Self {
        Self { manager, snippets }
    }

    /// Execute `query_text` against index `name`.
    ///
    /// 1. Resolve (lazily loading) the index
    /// 2. Compose the base query with type and date filters
    /// 3. Retrieve the top `max_results` hits by relevance
    /// 4. Map stored fields, extract snippets, tally aggregates
    /// 5. Re-sort if a non-relevance key was requested
    pub fn search(
        &self,
        query_text: &str,
        name: &str,
        options: &SearchOptions,
    ) -> Result<SearchResults> {
        let start = Instant::now();
        let resources = self.manager.open_existing(name)?;
        let searcher = resources.searcher()?;
        let query = build_query(&resources, query_text, options)?;

        let (total_hits, top_docs) = if options.max_results == 0 {
            (searcher.search(&*query, &Count)?, Vec::new())
        } else {
            searcher.search(
                &*query,
                &(Count, TopDocs::with_limit(options.max_results)),
            )?
        };

        let terms = if options.include_snippets {
            snippet::query_terms(query_text)
        } else {
            Vec::new()
        };

        let f = resources.fields();
        let mut results = Vec::with_capacity(top_docs.len());
        let mut by_type = BTreeMap::new();
        let mut by_directory = BTreeMap::new();

        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher.doc(doc_address)?;
            let filepath = extract_text(&doc, f.filepath).unwrap_or_default();
            let doc_type = extract_text(&doc, f.doc_type)
                .map(|tag| DocumentType::from_tag(&tag))
                .unwrap_or(DocumentType::Unknown);
            let modified = extract_i64(&doc, f.modified)
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let snippets = if terms.is_empty() {
                Vec::new()
            } else {
                let content = extract_text(&doc, f.content).unwrap_or_default();
                self.snippets.snippets(&content, &terms)
            };

            *by_type.entry(doc_type).or_insert(0) += 1;
            *by_directory.entry(parent_dir(&filepath)).or_insert(0) += 1;

            results.push(SearchResult {
                filename: extract_text(&doc, f.filename).unwrap_or_default(),
                title: extract_text(&doc, f.title).unwrap_or_default(),
                score,
                doc_type,
                modified,
                size: extract_u64(&doc, f.size),
                author: extract_text(&doc, f.author),
                snippets,
                filepath,
            });
        }

        sort_results(&mut results, options.sort_by, options.sort_descending);

        let elapsed = start.elapsed();
        debug!(
            index = name,
            query = query_text,
            total_hits,
            returned = results.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "search finished"
        );

        Ok(SearchResults {
            query: query_text.to_string(),
            index_name: name.to_string(),
            total_hits,
            elapsed,
            results,
            by_type,
            by_directory,
        })
    }

    /// Run the same query pipeline but only report the hit count.
    pub fn test_query(
        &self,
        query_text: &str,
        name: &str,
        options: &SearchOptions,
    ) -> Result<usize> {
        let resources = self.manager.open_existing(name)?;
        let searcher = resources.searcher()?;
        let query = build_query(&resources, query_text, options)?;
        let (count, _top) =
            searcher.search(&*query, &(Count, TopDocs::with_limit(1)))?;
        Ok(count)
    }

}

/// Whether `query_text` means "every document".
fn is_match_all(query_text: &str) -> bool {
    let trimmed = query_text.trim();
    trimmed.is_empty() || trimmed == "*"
}

/// Base relevance query AND-ed with any type/date filters.
fn build_query(
    resources: &IndexResources,
    query_text: &str,
    options: &SearchOptions,
) -> Result<Box<dyn Query>> {
    let f = resources.fields();

    let base: Box<dyn Query> = if is_match_all(query_text) {
        Box::new(AllQuery)
    } else {
        let mut parser = QueryParser::for_index(
            resources.index(),
            vec![f.content, f.title, f.filename],
        );
        parser.set_field_boost(f.title, 2.0);
        parser.parse_query(query_text)?
    };

    let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

    if !options.file_types.is_empty() {
        let by_type: Vec<(Occur, Box<dyn Query>)> = options
            .file_types
            .iter()
            .map(|t| {
                let term = Term::from_field_text(f.doc_type, t.as_str());
                let q: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                (Occur::Should, q)
            })
            .collect();
        clauses.push((Occur::Must, Box::new(BooleanQuery::new(by_type))));
    }

    if options.date_from.is_some() || options.date_to.is_some() {
        let lower = options
            .date_from
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
            .timestamp();
        let upper = options
            .date_to
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
            .timestamp();
        let range = RangeQuery::new(
            Bound::Included(Term::from_field_i64(f.modified, lower)),
            Bound::Included(Term::from_field_i64(f.modified, upper)),
        );
        clauses.push((Occur::Must, Box::new(range)));
    }

    if clauses.is_empty() {
        return Ok(base);
    }
    clauses.insert(0, (Occur::Must, base));
    Ok(Box::new(BooleanQuery::new(clauses)))
}

fn parent_dir(filepath: &str) -> String {
    Path::new(filepath)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Stable re-sort by `key`; equal keys keep their relevance order.
fn sort_results(results: &mut [SearchResult], key: SortBy, descending: bool) {
    let compare: fn(&SearchResult, &SearchResult) -> Ordering = match key {
        SortBy::Relevance => return,
        SortBy::Date => |a, b| a.modified.cmp(&b.modified),
        SortBy::Title => |a, b| a.title.to_lowercase().cmp(&b.title.to_lowercase()),
        SortBy::Path => |a, b| a.filepath.cmp(&b.filepath),
        SortBy::Size => |a, b| a.size.cmp(&b.size),
    };

    results.sort_by(|a, b| {
        let ord = compare(a, b);
        if descending { ord.reverse() } else { ord }
    });
}
