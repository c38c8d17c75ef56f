mod commands;
mod logging;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "senti",
    about = "Cached, budget-aware sentiment analysis with an offline fallback"
)]
struct Cli {
    /// Show debug logs on stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize senti: create ~/.senti/, config, and database
    Init,
    /// Analyze a text, or a JSONL file of {"id", "text"} records
    Analyze {
        /// Text to analyze
        text: Option<String>,
        /// JSONL file with one {"id": ..., "text": ...} record per line
        #[arg(long, short, conflicts_with = "text")]
        file: Option<std::path::PathBuf>,
        /// Also detect emotions
        #[arg(long)]
        emotions: bool,
        /// Also extract key phrases
        #[arg(long)]
        key_phrases: bool,
        /// Comma-separated remote backends to use instead of the configured chain
        /// (empty string for local analysis only)
        #[arg(long)]
        backends: Option<String>,
        /// Print results as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show budget, cache, and storage status
    Status,
    /// Inspect or maintain the result cache
    Cache {
        /// Remove every cached result
        #[arg(long)]
        clear: bool,
        /// Remove only expired results
        #[arg(long, conflicts_with = "clear")]
        purge_expired: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Init => commands::init::run(),
        Commands::Analyze {
            text,
            file,
            emotions,
            key_phrases,
            backends,
            json,
        } => commands::analyze::run(commands::analyze::AnalyzeArgs {
            text,
            file,
            emotions,
            key_phrases,
            backends,
            json,
        }),
        Commands::Status => commands::status::run(),
        Commands::Cache {
            clear,
            purge_expired,
        } => commands::cache::run(clear, purge_expired),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
