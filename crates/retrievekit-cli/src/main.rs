//! RetrieveKit CLI - list, retrieve and inspect cached documents

use clap::{ArgAction, Args, Parser, Subcommand};
use retrievekit::{
    FileCacheBackend, RetrievalContext, RetrievalEngine, RetrieveError, RetrieverParams,
    RetrieverRegistry,
};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Cache subfolder under the platform cache directory
const CACHE_SUBDIR: &str = "web_cache";

/// RetrieveKit - cached, rate-limited retrieval of web documents
#[derive(Parser, Debug)]
#[command(name = "retrievekit")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Cache root directory
    #[arg(long, global = true, env = "RETRIEVEKIT_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Custom User-Agent
    #[arg(long, global = true)]
    user_agent: Option<String>,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered retrievers
    Help,
    /// Print candidate inputs of a retriever
    List {
        #[command(flatten)]
        target: Target,

        /// Number of candidates
        #[arg(short, default_value_t = 20)]
        n: usize,
    },
    /// Retrieve one URL or identifier
    Retrieve {
        #[command(flatten)]
        target: Target,

        /// URL or identifier
        input: String,

        #[command(flatten)]
        flags: CacheFlags,

        /// Do not print the parsed text
        #[arg(long)]
        no_print: bool,
    },
    /// List candidates and retrieve them in one batch
    RetrieveMany {
        #[command(flatten)]
        target: Target,

        /// Number of candidates
        #[arg(short, default_value_t = 50)]
        n: usize,

        #[command(flatten)]
        flags: CacheFlags,
    },
    /// Print identifiers cached by a retriever
    Cached {
        #[command(flatten)]
        target: Target,
    },
}

#[derive(Args, Debug)]
struct Target {
    /// Retriever name
    retriever: String,

    /// Retriever parameters, e.g. `mean_delay=2,parser=links`
    #[arg(long, default_value = "")]
    params: String,
}

#[derive(Args, Debug, Default)]
struct CacheFlags {
    /// Fetch even if raw content is cached
    #[arg(long)]
    force_fetch: bool,

    /// Parse again even if parsed text is cached
    #[arg(long)]
    force_parse: bool,

    /// Do not write anything to the cache
    #[arg(long)]
    no_update_cache: bool,
}

impl CacheFlags {
    fn apply(&self, mut params: RetrieverParams) -> RetrieverParams {
        if self.force_fetch {
            params.insert("force_fetch", true);
        }
        if self.force_parse {
            params.insert("force_parse", true);
        }
        if self.no_update_cache {
            params.insert("update_cache", false);
        }
        params
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cache_dir = cli.cache_dir.unwrap_or_else(default_cache_dir);
    let mut context = RetrievalContext::new(Arc::new(FileCacheBackend::new(&cache_dir)));
    if let Some(ua) = cli.user_agent {
        context = context.with_user_agent(ua);
    }
    let registry = RetrieverRegistry::with_defaults(context);

    let result = match cli.command {
        None | Some(Commands::Help) => {
            writeln_safe(&format_retrievers(&registry));
            return ExitCode::SUCCESS;
        }
        Some(Commands::List { target, n }) => run_list(&registry, &target, n),
        Some(Commands::Retrieve {
            target,
            input,
            flags,
            no_print,
        }) => run_retrieve(&registry, &target, &flags, &input, no_print).await,
        Some(Commands::RetrieveMany { target, n, flags }) => {
            run_retrieve_many(&registry, &target, &flags, n).await
        }
        Some(Commands::Cached { target }) => run_cached(&registry, &target),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(RetrieveError::UnknownRetriever(name)) => {
            eprintln!("Unknown retriever: {name}\n");
            eprintln!("{}", format_retrievers(&registry));
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr; `RUST_LOG` wins over the flags
fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "everruns", "retrievekit")
        .map(|dirs| dirs.cache_dir().join(CACHE_SUBDIR))
        .unwrap_or_else(|| PathBuf::from(CACHE_SUBDIR))
}

fn engine(
    registry: &RetrieverRegistry,
    target: &Target,
    flags: Option<&CacheFlags>,
) -> Result<RetrievalEngine, RetrieveError> {
    let mut params = RetrieverParams::parse_kv(&target.params)?;
    if let Some(flags) = flags {
        params = flags.apply(params);
    }
    registry.lookup(&target.retriever, &params)
}

fn run_list(registry: &RetrieverRegistry, target: &Target, n: usize) -> Result<(), RetrieveError> {
    let engine = engine(registry, target, None)?;
    let items = engine.list(n);
    if let Some(notice) = listing_notice(engine.name(), n, &items) {
        eprintln!("{notice}");
    }
    for item in items {
        writeln_safe(&item);
    }
    Ok(())
}

async fn run_retrieve(
    registry: &RetrieverRegistry,
    target: &Target,
    flags: &CacheFlags,
    input: &str,
    no_print: bool,
) -> Result<(), RetrieveError> {
    let engine = engine(registry, target, Some(flags))?;
    match engine.retrieve(input).await? {
        Some(text) if !no_print => writeln_safe(&text),
        Some(_) => info!(input, "Retrieved"),
        None => eprintln!("Not available: {input}"),
    }
    Ok(())
}

async fn run_retrieve_many(
    registry: &RetrieverRegistry,
    target: &Target,
    flags: &CacheFlags,
    n: usize,
) -> Result<(), RetrieveError> {
    let engine = engine(registry, target, Some(flags))?;
    let inputs = engine.list(n);
    if let Some(notice) = listing_notice(engine.name(), n, &inputs) {
        eprintln!("{notice}");
        return Ok(());
    }
    let results = engine.retrieve_many(&inputs).await?;
    writeln_safe(&format_batch(&inputs, &results));
    Ok(())
}

fn run_cached(registry: &RetrieverRegistry, target: &Target) -> Result<(), RetrieveError> {
    let engine = engine(registry, target, None)?;
    for id in engine.cached_ids()? {
        writeln_safe(&id);
    }
    Ok(())
}

/// One `name - description` line per retriever
fn format_retrievers(registry: &RetrieverRegistry) -> String {
    let mut output = String::from("Available retrievers:\n");
    for (name, description) in registry.names() {
        output.push_str(&format!("  {name:<12} {description}\n"));
    }
    output.push_str("\nUsage: retrievekit <list|retrieve|retrieve-many|cached> <retriever> ...");
    output
}

/// Explanation for an empty listing when items were asked for
fn listing_notice(name: &str, n: usize, items: &[String]) -> Option<String> {
    (n > 0 && items.is_empty()).then(|| format!("Retriever {name} doesn't support listing"))
}

/// `done`/`failed` per input, then a summary
fn format_batch(inputs: &[String], results: &[Option<String>]) -> String {
    let mut output = String::new();
    for (input, result) in inputs.iter().zip(results) {
        let status = if result.is_some() { "done" } else { "failed" };
        output.push_str(&format!("{status}\t{input}\n"));
    }
    let done = results.iter().filter(|r| r.is_some()).count();
    output.push_str(&format!("{done}/{} retrieved", results.len()));
    output
}

/// Write to stdout, exit silently on broken pipe
fn writeln_safe(s: &str) {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", s) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            std::process::exit(0);
        }
        eprintln!("Error writing to stdout: {}", e);
        std::process::exit(1);
    }
}
