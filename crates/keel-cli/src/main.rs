mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "keel", about = "Build and launch single-process container images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add keel.toml to an existing project
    Init,
    /// Show the build steps, phases, and layer cache keys
    Plan {
        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
    /// Eject Dockerfile for manual customization
    Eject,
    /// Stage the build context and build the image
    Build {
        /// Image tag (default: <name>:latest)
        #[arg(long, short = 't')]
        tag: Option<String>,
        /// Rebuild every layer
        #[arg(long)]
        no_cache: bool,
    },
    /// Run the entrypoint locally with the runtime environment
    Run {
        /// Spawn and wait instead of replacing the keel process
        #[arg(long)]
        no_exec: bool,
        /// Extra arguments appended to the entrypoint
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Run the built image in a container
    Up {
        /// Image tag (default: <name>:latest)
        #[arg(long, short = 't')]
        tag: Option<String>,
        /// Host directory mounted over the data directory
        #[arg(long)]
        data: Option<PathBuf>,
    },
    /// Check docker and project setup
    Doctor,
    /// Remove the staged build context
    Clean {
        /// Also remove the built image
        #[arg(long)]
        image: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Init => {
            commands::init_project().await?;
            None
        }
        Commands::Plan { json } => {
            commands::plan(json).await?;
            None
        }
        Commands::Eject => {
            commands::eject().await?;
            None
        }
        Commands::Build { tag, no_cache } => {
            commands::build(tag, no_cache).await?;
            None
        }
        Commands::Run { no_exec, args } => Some(commands::run(no_exec, args).await?),
        Commands::Up { tag, data } => Some(commands::up(tag, data).await?),
        Commands::Doctor => {
            commands::doctor().await?;
            None
        }
        Commands::Clean { image } => {
            commands::clean(image).await?;
            None
        }
    };

    // The entrypoint's exit code is keel's exit code.
    if let Some(code) = exit_code {
        std::process::exit(code);
    }

    Ok(())
}
