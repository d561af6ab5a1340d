use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("search index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("invalid query: {0}")]
    QuerySyntax(#[from] tantivy::query::QueryParserError),

    #[error("invalid glob pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("index not found: {name} (available: {})", list_names(.available))]
    IndexNotFound {
        name: String,
        available: Vec<String>,
    },

    #[error("invalid index name '{name}': {reason}")]
    InvalidIndexName { name: String, reason: &'static str },

    #[error("root path does not exist: {0}")]
    RootNotFound(PathBuf),

    #[error("invalid document {path}: {reason}")]
    InvalidDocument { path: String, reason: &'static str },

    #[error("index '{0}' was unloaded while in use")]
    IndexClosed(String),

    #[error("build of index '{0}' was cancelled")]
    Cancelled(String),

    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

fn list_names(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}
