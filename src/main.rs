//! stexdex CLI entry point

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "stexdex")]
#[command(about = "Incremental symbol index for sTeX archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to $XDG_CONFIG_HOME/stexdex/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Corpus root containing the archives (overrides MATHHUB)
    #[arg(short, long, global = true)]
    root: Option<PathBuf>,

    /// Base cache directory (overrides STEXDEX_CACHE_DIR)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Reuse caches written by other versions
    #[arg(long, global = true)]
    keep_cache: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bring the index up to date and print a summary
    Index,
    /// Delete the cache of the corpus root
    Clear,
    /// Show a symbol and its verbalizations
    Symbol {
        /// Symbol URI, e.g. `smglom/sets?set?member`
        uri: String,
    },
    /// Rank symbols that a word may refer to, as seen from a file
    Candidates {
        word: String,
        /// File giving the import scope, as `<archive>:<path>`
        #[arg(short, long)]
        file: String,
        /// Language of the word (defaults to the configured language)
        #[arg(short, long)]
        lang: Option<String>,
    },
    /// List the modules visible from a module
    Closure {
        /// Module URI
        uri: String,
    },
    /// Print link diagnostics
    Diagnostics,
    /// Fuzzy search over symbol names
    Search {
        query: String,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Show version
    Version,
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!("stexdex={log_level}")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = stexdex_core::Config::load(cli.config.as_deref())?;
    if let Some(root) = cli.root {
        config.corpus_root = Some(root);
    }
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = Some(dir);
    }
    config.keep_cache |= cli.keep_cache;

    match cli.command {
        Commands::Index => commands::index(&config),
        Commands::Clear => commands::clear(&config),
        Commands::Symbol { uri } => commands::symbol(&config, &uri),
        Commands::Candidates { word, file, lang } => {
            let lang = lang.unwrap_or_else(|| config.language.clone());
            commands::candidates(&config, &word, &file, &lang)
        }
        Commands::Closure { uri } => commands::closure(&config, &uri),
        Commands::Diagnostics => commands::diagnostics(&config),
        Commands::Search { query, limit } => commands::search(&config, &query, limit),
        Commands::Version => {
            println!("stexdex v{}", stexdex_indexer::VERSION);
            Ok(())
        }
    }
}
