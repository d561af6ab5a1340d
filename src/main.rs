use std::sync::Arc;

use clap::Parser;
use docshelf::{
    DataDir,
    IndexManager,
    Indexer,
    IndexerOptions,
    IndexingResult,
    PlainTextExtractor,
    SearchOptions,
    SearchResults,
    Searcher,
    error,
    mcp,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{BuildArgs, Cli, Command, SearchArgs};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSHELF_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    match cli.command {
        Command::Mcp => mcp::run_mcp(&data_dir)?,
        Command::Build(args) => {
            let manager = open_manager(&data_dir)?;
            cmd_build(manager, &args)?;
        }
        Command::Search(args) => {
            let manager = open_manager(&data_dir)?;
            cmd_search(manager, &args)?;
        }
        Command::Count(args) => {
            let searcher = Searcher::new(open_manager(&data_dir)?);
            let count = searcher.test_query(
                &args.query,
                &args.name,
                &SearchOptions::default(),
            )?;
            println!("{count}");
        }
        Command::List { json } => {
            let manager = open_manager(&data_dir)?;
            let names = manager.list_names();
            if json {
                print_json(&names)?;
            } else if names.is_empty() {
                println!("No indexes found.");
            } else {
                for name in &names {
                    println!("{name}");
                }
            }
        }
        Command::Status { json } => {
            let manager = open_manager(&data_dir)?;
            let status = manager.memory_status();
            if json {
                print_json(&serde_json::json!({
                    "dataDir": data_dir.root(),
                    "indexes": status,
                }))?;
            } else {
                println!("Data directory: {}", data_dir.root().display());
                println!("Indexes: {}", status.len());
                for s in &status {
                    let count = manager.document_count(&s.name)?;
                    println!("  {}: {count} documents", s.name);
                }
            }
        }
        Command::Remove { name } => {
            let manager = open_manager(&data_dir)?;
            if !manager.remove(&name)? {
                return Err(manager.not_found(&name));
            }
            println!("Removed index '{name}'");
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn open_manager(data_dir: &DataDir) -> error::Result<Arc<IndexManager>> {
    Ok(Arc::new(IndexManager::open(&data_dir.indexes_dir()?)?))
}

fn print_json<T: serde::Serialize>(value: &T) -> error::Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| error::Error::Config(format!("JSON output failed: {e}")))?;
    println!("{text}");
    Ok(())
}

fn cmd_build(manager: Arc<IndexManager>, args: &BuildArgs) -> error::Result<()> {
    let mut options = IndexerOptions {
        recursive: !args.no_recursive,
        exclude: args.exclude.clone(),
        skip_password_protected: !args.strict_password,
        ..Default::default()
    };
    if !args.include.is_empty() {
        options.include = args.include.clone();
    }
    if let Some(max) = args.max_size {
        options.max_file_size = max;
    }
    if let Some(n) = args.concurrency {
        options.max_concurrency = n;
    }

    let indexer = Indexer::new(manager, Arc::new(PlainTextExtractor));
    let result = indexer.build_index(&args.name, &args.path, &options)?;

    if args.json {
        print_json(&result)?;
    } else {
        format_build_report(&result);
    }
    Ok(())
}

fn format_build_report(result: &IndexingResult) {
    println!(
        "Indexed {} of {} files into '{}' in {:.2}s",
        result.successful.len(),
        result.total(),
        result.index_name,
        result.duration().as_secs_f64()
    );
    if !result.password_protected.is_empty() {
        println!("Password protected: {}", result.password_protected.len());
        for p in &result.password_protected {
            println!("  {} ({})", p.path.display(), p.signal);
        }
    }
    if !result.failed.is_empty() {
        println!("Failed: {}", result.failed.len());
        for f in &result.failed {
            println!("  {}: {}", f.path.display(), f.error);
        }
    }
}

fn cmd_search(manager: Arc<IndexManager>, args: &SearchArgs) -> error::Result<()> {
    let options = SearchOptions {
        max_results: args.count,
        include_snippets: !args.no_snippets,
        sort_by: args.sort,
        sort_descending: !args.asc,
        file_types: args.types.clone(),
        date_from: args.from,
        date_to: args.to,
    };

    let searcher = Searcher::new(manager);
    let results = searcher.search(&args.query, &args.name, &options)?;

    if args.json {
        print_json(&results)?;
    } else {
        format_search_results(&results);
    }
    Ok(())
}

fn format_search_results(results: &SearchResults) {
    if results.results.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, r) in results.results.iter().enumerate() {
        println!(
            "{:>3}. [{:.3}] {} ({}, {})",
            i + 1,
            r.score,
            r.filepath,
            r.doc_type,
            r.modified.format("%Y-%m-%d")
        );
        if !r.title.is_empty() {
            println!("     {}", r.title);
        }
        for snippet in &r.snippets {
            println!("     > {snippet}");
        }
    }
    println!(
        "\n{} of {} hits in {}ms",
        results.results.len(),
        results.total_hits,
        results.elapsed.as_millis()
    );
}
