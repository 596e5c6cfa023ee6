mod cmd;
mod output;
mod render;
mod root;
mod signal;

use clap::{Parser, Subcommand};
use cmd::config::ConfigSubcommand;
use cmd::Overrides;
use std::path::PathBuf;
use story_core::StoryError;

#[derive(Parser)]
#[command(
    name = "code-stories",
    about = "Generate guided, chapter-by-chapter tours of a codebase with an AI agent",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: nearest directory holding .code-stories.yaml or .git)
    #[arg(long, global = true, env = "CODE_STORIES_ROOT")]
    root: Option<PathBuf>,

    /// Stories directory, overriding the config file
    #[arg(long, global = true, env = "CODE_STORIES_DIR")]
    stories_dir: Option<PathBuf>,

    /// Agent executable, overriding the config file
    #[arg(long, global = true, env = "CODE_STORIES_AGENT")]
    agent: Option<String>,

    /// Output JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a story that answers QUERY
    Generate {
        query: String,

        /// Narrate a GitHub repository (user/repo or URL) instead of the local tree
        #[arg(long)]
        repo: Option<String>,
    },

    /// Show how far a generation has got
    Progress { generation_id: String },

    /// List stories in the catalog
    List {
        /// List retained working directories of unfinished or failed generations
        #[arg(long)]
        working: bool,
    },

    /// Render a story in the terminal
    Show {
        /// Story id, path to a .json file, or URL
        #[arg(conflicts_with_all = ["repo", "story"])]
        source: Option<String>,

        /// GitHub repository holding the story (with --story)
        #[arg(long, requires = "story")]
        repo: Option<String>,

        /// Story id inside --repo
        #[arg(long, requires = "repo")]
        story: Option<String>,

        /// Render only chapter N (1-based)
        #[arg(long)]
        chapter: Option<usize>,
    },

    /// Rebuild the manifest from the story files on disk
    Reindex,

    /// Serve the HTTP API
    Serve {
        #[arg(long, default_value = "3141")]
        port: u16,

        /// Open a browser on the story list
        #[arg(long)]
        open: bool,
    },

    /// Inspect and validate configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Iteratively tune the authoring guidance against a goals document
    Optimize(cmd::optimize::OptimizeArgs),
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } | Commands::Optimize(_) => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let overrides = Overrides {
        stories_dir: cli.stories_dir,
        agent: cli.agent,
    };

    let result = match cli.command {
        Commands::Generate { query, repo } => {
            cmd::generate::run(&root, &overrides, &query, repo.as_deref(), cli.json)
        }
        Commands::Progress { generation_id } => {
            cmd::progress::run(&root, &overrides, &generation_id, cli.json)
        }
        Commands::List { working } => cmd::list::run(&root, &overrides, working, cli.json),
        Commands::Show {
            source,
            repo,
            story,
            chapter,
        } => cmd::show::run(
            &root,
            &overrides,
            cmd::show::ShowTarget {
                source,
                repo,
                story,
            },
            chapter,
            cli.json,
        ),
        Commands::Reindex => cmd::reindex::run(&root, &overrides, cli.json),
        Commands::Serve { port, open } => cmd::serve::run(&root, &overrides, port, open),
        Commands::Config { subcommand } => cmd::config::run(&root, &overrides, subcommand, cli.json),
        Commands::Optimize(args) => cmd::optimize::run(&root, &overrides, args),
    };

    if let Err(e) = result {
        if let Some(signal::Interrupted(shutdown)) = e.downcast_ref::<signal::Interrupted>() {
            eprintln!("interrupted");
            std::process::exit(shutdown.exit_code());
        }
        if matches!(e.downcast_ref::<StoryError>(), Some(StoryError::Cancelled)) {
            eprintln!("interrupted");
            std::process::exit(signal::Shutdown::Interrupt.exit_code());
        }
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
