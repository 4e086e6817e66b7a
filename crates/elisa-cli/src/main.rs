//! Elisa CLI: run skills, build sessions and serve the HTTP backend.
//!
//! Reuses the same engine (elisa-core) and server bootstrap (elisa-server)
//! that power the block editor.

use clap::{Parser, Subcommand};

use elisa_cli::commands;

/// Elisa CLI: kid-friendly AI build orchestration
#[derive(Parser)]
#[command(name = "elisa", version, about = "Elisa CLI: kid-friendly AI build orchestration")]
pub struct Cli {
    /// Root directory for per-session project workspaces
    #[arg(long, env = "ELISA_PROJECTS_DIR")]
    projects_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Elisa HTTP backend server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 8000)]
        port: u16,
        /// Path to static frontend directory
        #[arg(long)]
        static_dir: Option<String>,
    },

    /// Run or inspect skills
    Skill {
        #[command(subcommand)]
        action: SkillAction,
    },

    /// Run a whole build session from a project spec JSON file
    Build {
        /// Path to the project spec
        spec: String,
        /// Approve every human gate without asking
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SkillAction {
    /// Run a skill plan (YAML or JSON), answering questions interactively
    Run {
        /// Path to the plan or composite skill file
        file: String,
        /// Directory of skills the plan may invoke
        #[arg(long)]
        skills: Option<String>,
    },
    /// Print the plan interpreted from a block workspace JSON file
    Parse {
        /// Path to the workspace JSON
        file: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "elisa_core=warn,elisa_server=warn,elisa_cli=info".into()),
        )
        .init();

    let config = commands::engine_config(cli.projects_dir.as_deref());

    let result = match cli.command {
        Commands::Server {
            host,
            port,
            static_dir,
        } => commands::server::run(host, port, static_dir, config).await,

        Commands::Skill { action } => match action {
            SkillAction::Run { file, skills } => {
                commands::skill::run(config, &file, skills.as_deref()).await
            }
            SkillAction::Parse { file } => commands::skill::parse(&file),
        },

        Commands::Build { spec, yes } => commands::build::run(config, &spec, yes).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
