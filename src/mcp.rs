use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    data_dir::DataDir,
    document::DocumentType,
    error::{self, Error},
    extractor::PlainTextExtractor,
    indexer::{Indexer, IndexerOptions, IndexingResult},
    manager::IndexManager,
    search::{SearchOptions, SearchResults, Searcher, SortBy},
};

const DEFAULT_SEARCH_LIMIT: usize = 10;

struct DocshelfState {
    manager: Arc<IndexManager>,
    indexer: Indexer,
    searcher: Searcher,
}

impl DocshelfState {
    fn new(manager: Arc<IndexManager>) -> Self {
        Self {
            indexer: Indexer::new(
                Arc::clone(&manager),
                Arc::new(PlainTextExtractor),
            ),
            searcher: Searcher::new(Arc::clone(&manager)),
            manager,
        }
    }
}

#[derive(Clone)]
pub struct DocshelfMcpServer {
    state: Arc<DocshelfState>,
    tool_router: ToolRouter<Self>,
}

impl DocshelfMcpServer {
    fn new(state: DocshelfState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocshelfMcpServer {
    #[tool(
        name = "docshelf_list",
        description = "List the names of all known document indexes."
    )]
    pub async fn docshelf_list(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let names = self.state.manager.list_names();
        let summary = if names.is_empty() {
            "No indexes found.".to_string()
        } else {
            names.join("\n")
        };
        structured(summary, &json!({ "indexes": names }))
    }

    #[tool(
        name = "docshelf_status",
        description = "Report which indexes are loaded in memory and their estimated on-disk size."
    )]
    pub async fn docshelf_status(
        &self,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let status = self.state.manager.memory_status();
        let summary = status
            .iter()
            .map(|s| {
                let state = if s.loaded { "loaded" } else { "unloaded" };
                format!("{} {state} {} bytes", s.name, s.estimated_bytes)
            })
            .collect::<Vec<_>>()
            .join("\n");
        structured(summary, &json!({ "indexes": status }))
    }

    /// Index a directory tree into a named index.
    #[tool(
        name = "docshelf_build",
        description = "Index the files under a directory into a named index. Existing documents in the index are kept."
    )]
    pub async fn docshelf_build(
        &self,
        params: Parameters<BuildParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let options = params.to_options();
        let state = Arc::clone(&self.state);

        let result = tokio::task::spawn_blocking(move || {
            state.indexer.build_index(&params.name, &params.path, &options)
        })
        .await
        .map_err(|e| mcp_error("build task failed", e))?
        .map_err(tool_error)?;

        structured(format_build_summary(&result), &result)
    }

    /// Query a named index.
    #[tool(
        name = "docshelf_search",
        description = "Search a named index. Supports the tantivy query syntax (field:value, AND/OR, phrases), type and date filters, and sorting."
    )]
    pub async fn docshelf_search(
        &self,
        params: Parameters<SearchParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let params = params.0;
        let options = params.to_options()?;
        let state = Arc::clone(&self.state);

        let results = tokio::task::spawn_blocking(move || {
            state.searcher.search(&params.query, &params.index, &options)
        })
        .await
        .map_err(|e| mcp_error("search task failed", e))?
        .map_err(tool_error)?;

        structured(format_search_summary(&results), &results)
    }

    #[tool(
        name = "docshelf_unload",
        description = "Release the in-memory handles of an index. It is reloaded on next use."
    )]
    pub async fn docshelf_unload(
        &self,
        params: Parameters<NameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        let manager = Arc::clone(&self.state.manager);
        let unloaded = {
            let name = name.clone();
            tokio::task::spawn_blocking(move || manager.unload(&name))
                .await
                .map_err(|e| mcp_error("unload task failed", e))?
        };
        let summary = if unloaded {
            format!("Unloaded index '{name}'")
        } else {
            format!("Index '{name}' was not loaded")
        };
        structured(summary, &json!({ "name": name, "unloaded": unloaded }))
    }

    #[tool(
        name = "docshelf_remove",
        description = "Delete an index and all of its stored documents."
    )]
    pub async fn docshelf_remove(
        &self,
        params: Parameters<NameParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let name = params.0.name;
        let manager = Arc::clone(&self.state.manager);
        let removed = {
            let manager = Arc::clone(&manager);
            let name = name.clone();
            tokio::task::spawn_blocking(move || manager.remove(&name))
                .await
                .map_err(|e| mcp_error("remove task failed", e))?
                .map_err(tool_error)?
        };
        if !removed {
            return Err(tool_error(manager.not_found(&name)));
        }
        structured(
            format!("Removed index '{name}'"),
            &json!({ "name": name, "removed": true }),
        )
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocshelfMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docshelf", env!("CARGO_PKG_VERSION"))
                    .with_title("docshelf MCP"),
            )
            .with_instructions(
                "Use docshelf_list to see available indexes, docshelf_build to index a directory and docshelf_search to query an index.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NameParams {
    /// Index name.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildParams {
    /// Index name to build into.
    pub name: String,
    /// Root directory to index.
    pub path: PathBuf,
    /// Glob patterns of files to include (default: all files).
    pub include: Option<Vec<String>>,
    /// Glob patterns of files to exclude.
    pub exclude: Option<Vec<String>>,
    /// Descend into subdirectories (default: true).
    pub recursive: Option<bool>,
    /// Skip files larger than this many bytes.
    pub max_file_size: Option<u64>,
    /// Number of files extracted in parallel.
    pub max_concurrency: Option<usize>,
    /// When false, password-protected files are also reported as failed
    /// (default: true).
    pub skip_password_protected: Option<bool>,
}

impl BuildParams {
    fn to_options(&self) -> IndexerOptions {
        let defaults = IndexerOptions::default();
        IndexerOptions {
            recursive: self.recursive.unwrap_or(defaults.recursive),
            include: self.include.clone().unwrap_or(defaults.include),
            exclude: self.exclude.clone().unwrap_or(defaults.exclude),
            max_file_size: self.max_file_size.unwrap_or(defaults.max_file_size),
            max_concurrency: self
                .max_concurrency
                .unwrap_or(defaults.max_concurrency),
            skip_password_protected: self
                .skip_password_protected
                .unwrap_or(defaults.skip_password_protected),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    /// Index name to search.
    pub index: String,
    /// Query string; empty or `*` matches every document.
    #[serde(default)]
    pub query: String,
    /// Maximum number of results (default: 10).
    pub limit: Option<usize>,
    /// Sort key (default: relevance).
    pub sort_by: Option<SortBy>,
    /// Sort ascending instead of descending.
    pub ascending: Option<bool>,
    /// Restrict to these document types.
    pub file_types: Option<Vec<DocumentType>>,
    /// Earliest modification date, RFC 3339 or YYYY-MM-DD.
    pub date_from: Option<String>,
    /// Latest modification date, RFC 3339 or YYYY-MM-DD.
    pub date_to: Option<String>,
    /// Include matching lines (default: true).
    pub include_snippets: Option<bool>,
}

impl SearchParams {
    fn to_options(&self) -> Result<SearchOptions, rmcp::ErrorData> {
        Ok(SearchOptions {
            max_results: self.limit.unwrap_or(DEFAULT_SEARCH_LIMIT),
            include_snippets: self.include_snippets.unwrap_or(true),
            sort_by: self.sort_by.unwrap_or_default(),
            sort_descending: !self.ascending.unwrap_or(false),
            file_types: self.file_types.clone().unwrap_or_default(),
            date_from: parse_date(self.date_from.as_deref(), NaiveTime::MIN)?,
            date_to: parse_date(
                self.date_to.as_deref(),
                NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN),
            )?,
        })
    }
}

/// Accept a full timestamp, or a bare day expanded with `day_time`.
fn parse_date(
    value: Option<&str>,
    day_time: NaiveTime,
) -> Result<Option<DateTime<Utc>>, rmcp::ErrorData> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|day| Some(day.and_time(day_time).and_utc()))
        .map_err(|e| {
            rmcp::ErrorData::invalid_params(
                format!("invalid date '{value}'"),
                Some(json!({ "error": e.to_string() })),
            )
        })
}

fn format_build_summary(result: &IndexingResult) -> String {
    let mut lines = vec![format!(
        "Indexed {} of {} files into '{}'",
        result.successful.len(),
        result.total(),
        result.index_name
    )];
    for p in &result.password_protected {
        lines.push(format!("protected {} ({})", p.path.display(), p.signal));
    }
    for f in &result.failed {
        lines.push(format!("failed {}: {}", f.path.display(), f.error));
    }
    lines.join("\n")
}

fn format_search_summary(results: &SearchResults) -> String {
    if results.results.is_empty() {
        return format!("No results found for \"{}\"", results.query);
    }

    let mut lines = Vec::with_capacity(results.results.len() + 1);
    let suffix = if results.total_hits == 1 { "" } else { "s" };
    lines.push(format!(
        "Found {} result{suffix} for \"{}\" (showing {}):",
        results.total_hits,
        results.query,
        results.results.len()
    ));
    for r in &results.results {
        lines.push(format!("{:.3} {}", r.score, r.filepath));
    }
    lines.join("\n")
}

fn structured(
    summary: String,
    value: &impl Serialize,
) -> Result<CallToolResult, rmcp::ErrorData> {
    let structured = serde_json::to_value(value)
        .map_err(|e| mcp_error("failed to serialize result", e))?;
    let mut result = CallToolResult::success(vec![Content::text(summary)]);
    result.structured_content = Some(structured);
    Ok(result)
}

/// Caller mistakes become invalid-params errors, the rest internal errors.
fn tool_error(error: Error) -> rmcp::ErrorData {
    match error {
        Error::IndexNotFound { .. }
        | Error::InvalidIndexName { .. }
        | Error::QuerySyntax(_)
        | Error::InvalidPattern(_)
        | Error::RootNotFound(_) => rmcp::ErrorData::invalid_params(
            error.to_string(),
            None,
        ),
        other => mcp_error("operation failed", other),
    }
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(data_dir: &DataDir) -> error::Result<()> {
    let manager = Arc::new(IndexManager::open(&data_dir.indexes_dir()?)?);
    let server = DocshelfMcpServer::new(DocshelfState::new(Arc::clone(&manager)));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            Error::Config(format!("MCP server initialization failed: {e}"))
        })?;
        running
            .waiting()
            .await
            .map_err(|e| Error::Config(format!("MCP server error: {e}")))?;
        Ok::<(), Error>(())
    })?;

    manager.shutdown();
    Ok(())
}
