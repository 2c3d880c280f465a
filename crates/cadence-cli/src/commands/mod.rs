use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use std::path::{Path, PathBuf};

use cadence_config::{CadenceConfig, ConfigLoader};
use cadence_core::CadenceError;

mod inspect;
mod recall;
pub mod render;
mod run;
mod stack;

/// Cadence: plan, execute, verify and remember, one task at a time
#[derive(Parser)]
#[command(name = "cadence", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to cadence.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a run towards an objective
    Run {
        /// What the run should achieve
        objective: String,
        /// Thread id for the run (generated if omitted)
        #[arg(short, long)]
        thread: Option<String>,
        /// User the run and its memories belong to
        #[arg(short, long, env = "CADENCE_USER", default_value = "default")]
        user: String,
    },
    /// Continue a run from its latest checkpoint
    Resume {
        /// Thread id of the run
        thread: String,
    },
    /// Show a run's tasks, outcome and log
    Show {
        /// Thread id of the run
        thread: String,
        /// Output the raw checkpoint as JSON
        #[arg(long)]
        json: bool,
    },
    /// List known runs, most recent first
    Threads,
    /// Search long-term memory
    Recall {
        /// Text to search for
        query: String,
        /// User whose memories to search
        #[arg(short, long, env = "CADENCE_USER", default_value = "default")]
        user: String,
        /// Restrict to one run
        #[arg(short, long)]
        thread: Option<String>,
        /// Maximum results
        #[arg(short = 'n', long, default_value = "5")]
        limit: usize,
        /// Minimum similarity (0.0 - 1.0, default from config)
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions for bash, zsh, or fish
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    pub async fn run(self) -> cadence_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(&config.logging.format, log_level);

        match self.command {
            Commands::Run {
                objective,
                thread,
                user,
            } => run::cmd_run(config, objective, thread, user, self.quiet).await,
            Commands::Resume { thread } => run::cmd_resume(config, &thread, self.quiet).await,
            Commands::Show { thread, json } => inspect::cmd_show(config, &thread, json).await,
            Commands::Threads => inspect::cmd_threads(config).await,
            Commands::Recall {
                query,
                user,
                thread,
                limit,
                threshold,
            } => recall::cmd_recall(config, &query, &user, thread.as_deref(), limit, threshold).await,
            Commands::Config { json } => Self::cmd_config(config, config_loader.path(), json),
            Commands::Completions { shell } => Self::cmd_completions(shell),
        }
    }

    fn cmd_config(config: &CadenceConfig, path: &Path, json: bool) -> cadence_core::Result<()> {
        if path.exists() {
            eprintln!("# loaded from {}", path.display());
        } else {
            eprintln!("# {} not found, showing defaults", path.display());
        }

        let mut shown = config.clone();
        if shown.services.openai_api_key.is_some() {
            shown.services.openai_api_key = Some("********".into());
        }

        if json {
            println!("{}", serde_json::to_string_pretty(&shown)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&shown).map_err(|e| CadenceError::Config(e.to_string()))?
            );
        }

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    eprintln!("  {w}");
                }
            }
            Err(e) => eprintln!("{e}"),
        }
        Ok(())
    }

    fn cmd_completions(shell: Shell) -> cadence_core::Result<()> {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "cadence", &mut std::io::stdout());
        Ok(())
    }
}

/// Log output format, from `logging.format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

impl LogFormat {
    /// Unknown names fall back to pretty; config validation reports them.
    fn from_name(name: &str) -> Self {
        match name {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        }
    }
}

fn init_tracing(format: &str, level: &str) {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level))
    };

    match LogFormat::from_name(format) {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .pretty()
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}
