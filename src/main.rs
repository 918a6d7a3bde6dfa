use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tutorgen::cli::commands::{self, generate::GenerateOptions};

#[derive(Parser)]
#[command(name = "tutorgen")]
#[command(
    version,
    about = "Incremental, cache-aware tutorial generator for source repositories"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate (or incrementally update) a tutorial
    Generate {
        #[arg(long, help = "Local checkout to crawl")]
        dir: Option<PathBuf>,
        #[arg(long, help = "Repository URL used as cache identity and source link")]
        repo: Option<String>,
        #[arg(long, short, help = "Output root directory")]
        output: Option<PathBuf>,
        #[arg(long, help = "Model provider (openai, ollama)")]
        provider: Option<String>,
        #[arg(long, help = "Model to use")]
        model: Option<String>,
        #[arg(long, help = "Output language")]
        language: Option<String>,
        #[arg(long, help = "Project name override")]
        name: Option<String>,
        #[arg(long = "include", short = 'i', help = "Glob to include (repeatable)")]
        include: Vec<String>,
        #[arg(long = "exclude", short = 'e', help = "Extra glob to exclude (repeatable)")]
        exclude: Vec<String>,
        #[arg(long, help = "Maximum number of abstractions")]
        max_abstractions: Option<usize>,
        #[arg(long, help = "Ignore the cache and regenerate everything")]
        no_cache: bool,
        #[arg(long, help = "Print a JSON report instead of a summary")]
        json: bool,
    },

    /// Show the regeneration plan without calling the model
    Plan {
        #[arg(long, help = "Local checkout to crawl")]
        dir: Option<PathBuf>,
        #[arg(long, help = "Repository URL used as cache identity")]
        repo: Option<String>,
        #[arg(long, help = "Print JSON")]
        json: bool,
    },

    /// Inspect and clear repository caches
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached repositories
    List {
        #[arg(long, help = "Print JSON")]
        json: bool,
    },
    /// Show one repository's cache
    Show {
        repo: String,
        #[arg(long, help = "Print the raw record as JSON")]
        json: bool,
    },
    /// Remove one repository's cache
    Clear { repo: String },
    /// Remove every cache
    ClearAll,
    /// Drop index entries whose cache record is missing
    Reconcile,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(
            short = 'f',
            long,
            default_value = "text",
            help = "Output format: text, json"
        )]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mtutorgen encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Call default hook for backtrace (if RUST_BACKTRACE=1)
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            if let Some(remediation) = e
                .downcast_ref::<tutorgen::TutorError>()
                .and_then(|e| e.extensions.remediation.as_deref())
            {
                eprintln!("\x1b[33mHint:\x1b[0m {}", remediation);
            }
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "tutorgen=debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Generate {
            dir,
            repo,
            output,
            provider,
            model,
            language,
            name,
            include,
            exclude,
            max_abstractions,
            no_cache,
            json,
        } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::generate::run(GenerateOptions {
                repo,
                dir,
                output,
                provider,
                model,
                language,
                project_name: name,
                include,
                exclude,
                max_abstractions,
                no_cache,
                json,
                quiet: cli.quiet,
            }))?;
        }
        Commands::Plan { dir, repo, json } => {
            let rt = Runtime::new()?;
            rt.block_on(commands::plan::run(repo, dir, json))?;
        }
        Commands::Cache { action } => {
            let rt = Runtime::new()?;
            match action {
                CacheAction::List { json } => rt.block_on(commands::cache::list(json))?,
                CacheAction::Show { repo, json } => {
                    rt.block_on(commands::cache::show(&repo, json))?
                }
                CacheAction::Clear { repo } => rt.block_on(commands::cache::clear(&repo))?,
                CacheAction::ClearAll => rt.block_on(commands::cache::clear_all())?,
                CacheAction::Reconcile => rt.block_on(commands::cache::reconcile())?,
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { global, format } => {
                commands::config::show(global, &format)?;
            }
            ConfigAction::Path => {
                commands::config::path()?;
            }
            ConfigAction::Init { global, force } => {
                commands::config::init(global, force)?;
            }
        },
    }

    Ok(())
}
