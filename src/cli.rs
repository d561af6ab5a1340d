use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use docshelf::{DocumentType, SortBy};

#[derive(Debug, Parser)]
#[command(
    name = "docshelf",
    about = "Build and query named full-text indexes over your documents"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Index a directory into a named index
    Build(BuildArgs),
    /// Search a named index
    Search(SearchArgs),
    /// Count the documents matching a query
    Count(CountArgs),
    /// List known indexes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which indexes are loaded and their estimated footprint
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an index and its storage
    Remove {
        /// Name of the index to remove
        name: String,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Build --

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Name of the index to build into
    pub name: String,

    /// Root directory to index
    pub path: PathBuf,

    /// Glob patterns of files to include (default: all files)
    #[arg(short, long)]
    pub include: Vec<String>,

    /// Glob patterns of files to exclude
    #[arg(short, long)]
    pub exclude: Vec<String>,

    /// Only index the top-level directory
    #[arg(long)]
    pub no_recursive: bool,

    /// Skip files larger than this many bytes
    #[arg(long)]
    pub max_size: Option<u64>,

    /// Number of files extracted in parallel
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Also report password-protected files as failures
    #[arg(long)]
    pub strict_password: bool,

    /// Output the build report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// Name of the index to search
    pub name: String,

    /// The search query (empty or `*` matches everything)
    #[arg(default_value = "")]
    pub query: String,

    /// Maximum number of results to return
    #[arg(short = 'n', long, default_value = "50")]
    pub count: usize,

    /// Order results by this key
    #[arg(long, value_enum, default_value_t = SortBy::Relevance)]
    pub sort: SortBy,

    /// Sort ascending instead of descending
    #[arg(long)]
    pub asc: bool,

    /// Only return documents of this type (can be repeated)
    #[arg(short = 't', long = "type", value_parser = parse_doc_type)]
    pub types: Vec<DocumentType>,

    /// Only documents modified on or after this day (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day_start)]
    pub from: Option<DateTime<Utc>>,

    /// Only documents modified on or before this day (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day_end)]
    pub to: Option<DateTime<Utc>>,

    /// Do not extract snippets
    #[arg(long)]
    pub no_snippets: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Count --

#[derive(Debug, Parser)]
pub struct CountArgs {
    /// Name of the index to query
    pub name: String,

    /// The query to count matches for
    #[arg(default_value = "")]
    pub query: String,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "docshelf",
            &mut std::io::stdout(),
        );
    }
}

fn parse_doc_type(s: &str) -> Result<DocumentType, String> {
    s.parse()
}

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD: {e}"))
}

fn parse_day_start(s: &str) -> Result<DateTime<Utc>, String> {
    Ok(parse_day(s)?.and_time(NaiveTime::MIN).and_utc())
}

fn parse_day_end(s: &str) -> Result<DateTime<Utc>, String> {
    let end = NaiveTime::from_hms_opt(23, 59, 59)
        .ok_or_else(|| "invalid end of day".to_string())?;
    Ok(parse_day(s)?.and_time(end).and_utc())
}
