use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use rcm::adapter::ConvertOptions;
use rcm::cli::{self, convert, export, flow, import, index, orphans, query};
use rcm::config::Config;
use rcm::flow::TransitionRequest;
use rcm::index::IndexQuery;
use rcm::model::{FidelityLevel, FlowState, Platform};

#[derive(Parser)]
#[command(name = "rcm")]
#[command(about = "Archive LLM chat sessions as canonical YAML and curate them through flow states")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "rcm.yaml", global = true)]
    config: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import raw exports into the archive
    Import {
        /// Raw export files
        #[arg(required = true)]
        sources: Vec<PathBuf>,

        /// Source platform (claude-code, chatgpt, gemini)
        #[arg(short, long)]
        platform: Platform,

        /// Archive root
        #[arg(short, long)]
        root: Option<String>,

        /// Comma-separated tags
        #[arg(short, long)]
        tags: Option<String>,

        /// One-line summary stored in the record
        #[arg(long)]
        summary: Option<String>,

        /// Working directory override
        #[arg(long)]
        working_directory: Option<String>,

        /// Fidelity level (standard, full)
        #[arg(long)]
        fidelity: Option<FidelityLevel>,

        /// Do not commit the import
        #[arg(long)]
        no_commit: bool,
    },

    /// Convert a raw export to canonical YAML without archiving it
    Convert {
        /// Raw export file
        source: PathBuf,

        /// Source platform (claude-code, chatgpt, gemini)
        #[arg(short, long)]
        platform: Platform,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Comma-separated tags
        #[arg(short, long)]
        tags: Option<String>,

        /// Fidelity level (standard, full)
        #[arg(long)]
        fidelity: Option<FidelityLevel>,
    },

    /// Flow state management
    Flow {
        /// Archive root
        #[arg(short, long, global = true)]
        root: Option<String>,

        #[command(subcommand)]
        command: FlowCommands,
    },

    /// Build the session index across archive roots
    Index {
        /// Archive roots (repeatable); defaults to configured roots
        #[arg(short, long)]
        root: Vec<String>,

        /// Output path for the index
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Query the session index
    Query {
        /// Case-insensitive text search over title and tags
        search: Option<String>,

        /// Comma-separated tags; any may match
        #[arg(short, long)]
        tags: Option<String>,

        /// Repository name
        #[arg(long)]
        repo: Option<String>,

        /// Flow state
        #[arg(short, long)]
        state: Option<FlowState>,

        /// Source platform
        #[arg(short, long)]
        platform: Option<Platform>,

        /// Only the N most recent sessions
        #[arg(long)]
        recent: Option<usize>,

        /// Output format (table, json, list)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Index file; defaults to the configured output
        #[arg(short, long)]
        index: Option<PathBuf>,
    },

    /// Export canonical records to Markdown
    Export {
        /// Record files or glob patterns
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output file or directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Resolve relative patterns against this archive root
        #[arg(short, long)]
        root: Option<PathBuf>,
    },

    /// List Claude Code transcripts that were never imported
    Orphans {
        /// Archive root
        #[arg(short, long)]
        root: Option<String>,

        /// Claude Code projects directory
        #[arg(short, long)]
        source: Option<PathBuf>,

        /// Import every orphan found
        #[arg(long)]
        import: bool,
    },
}

#[derive(Subcommand)]
enum FlowCommands {
    /// Move a session to another flow state
    Promote {
        /// Session ID (short hash, full ID, or filename fragment)
        session: String,

        /// Target state
        #[arg(long)]
        to: FlowState,

        /// Expected current state
        #[arg(long)]
        from: Option<FlowState>,

        /// Quality score (0-100)
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(0..=100))]
        quality: Option<u32>,

        /// Comma-separated tags to merge
        #[arg(short, long)]
        tags: Option<String>,

        /// Validate and report without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// List sessions in a flow state
    List {
        /// Flow state
        #[arg(default_value = "hypothesis")]
        state: FlowState,

        /// Show tags and filenames
        #[arg(short, long)]
        long: bool,
    },
    /// Show where a session is and what it can become
    Status {
        /// Session ID (short hash, full ID, or filename fragment)
        session: String,
    },
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config))?;

    match cli.command {
        Commands::Import {
            sources,
            platform,
            root,
            tags,
            summary,
            working_directory,
            fidelity,
            no_commit,
        } => {
            import::run(
                &config,
                import::ImportArgs {
                    sources,
                    platform,
                    root,
                    tags: cli::split_tags(tags.as_deref()),
                    summary,
                    working_directory,
                    fidelity,
                    no_commit,
                },
            )?;
        }
        Commands::Convert {
            source,
            platform,
            output,
            tags,
            fidelity,
        } => {
            let mut options = ConvertOptions::from_config(&config);
            options.tags.extend(cli::split_tags(tags.as_deref()));
            if let Some(fidelity) = fidelity {
                options.fidelity = fidelity;
            }
            convert::run(&config, &source, platform, &output, &options)?;
        }
        Commands::Flow { root, command } => {
            let root = config.resolve_root(root.as_deref());
            let engine = cli::engine(&config, &root);
            match command {
                FlowCommands::Promote {
                    session,
                    to,
                    from,
                    quality,
                    tags,
                    dry_run,
                } => {
                    let request = TransitionRequest {
                        from,
                        to,
                        quality_score: quality,
                        tags: cli::split_tags(tags.as_deref()),
                        dry_run,
                    };
                    flow::promote(&engine, &session, request)?;
                }
                FlowCommands::List { state, long } => {
                    flow::list(&engine, state, long)?;
                }
                FlowCommands::Status { session } => {
                    flow::status(&engine, &session)?;
                }
            }
        }
        Commands::Index { root, output } => {
            let roots = config.index_roots(&root);
            let output = output.unwrap_or_else(|| config.index_output());
            index::run(&roots, &output)?;
        }
        Commands::Query {
            search,
            tags,
            repo,
            state,
            platform,
            recent,
            format,
            index,
        } => {
            let query = IndexQuery {
                search,
                tags: cli::split_tags(tags.as_deref()),
                repository: repo,
                state,
                platform,
                recent,
            };
            let index = index.unwrap_or_else(|| config.index_output());
            query::run(&index, &query, &format)?;
        }
        Commands::Export {
            inputs,
            output,
            root,
        } => {
            export::run(&inputs, &output, root.as_deref())?;
        }
        Commands::Orphans {
            root,
            source,
            import,
        } => {
            orphans::run(&config, root, source.as_deref(), import)?;
        }
    }

    Ok(())
}
