use anyhow::Result;
use clap::Parser;
use sonance_etl::Config;
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "sonance", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the database (default: ~/.local/share/sonance/sonance.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to the vector index (default: ~/.local/share/sonance/index.bin)
    #[arg(long, global = true)]
    index: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Index a music directory
    ///
    /// Recursively walks the directory for audio files and brings the
    /// library up to date:
    ///
    /// - Stores tags and duration for new or modified files
    /// - Extracts a feature vector and tempo for every track missing one
    /// - Removes tracks whose files no longer exist
    /// - Updates or rebuilds the similarity index
    ///
    /// Runs are incremental: files whose modification time is unchanged are
    /// skipped. Press Ctrl-C to stop; completed work is kept and the next
    /// run resumes from there.
    Index {
        /// Path to the music directory
        path: PathBuf,
    },
    /// Generate a playlist of songs similar to one or more seeds
    Generate {
        /// Seed song as "Title|Artist|Album" (repeatable; exact match)
        #[arg(long = "seed", required = true)]
        seeds: Vec<String>,

        /// Number of songs
        #[arg(long)]
        length: Option<usize>,

        /// Random tempo variation when ordering, in percent
        #[arg(long)]
        jitter: Option<f32>,

        /// Output file; .m3u, .m3u8 or .json
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Seed for reproducible output
        #[arg(long)]
        random_seed: Option<u64>,
    },
    /// Show indexing status
    Status,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, clap::Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Print an example config file
    Example,
    /// Create the config file with defaults if it doesn't exist
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load()?.with_overrides(cli.db, cli.index);

    if let Err(e) = twyg::setup(config.logging.clone()) {
        eprintln!("Failed to set up logging: {e:?}");
    }

    match cli.command {
        Commands::Index { path } => {
            commands::run_index(&path, &config).await?;
        }
        Commands::Generate {
            seeds,
            length,
            jitter,
            output,
            random_seed,
        } => {
            commands::run_generate(
                &config,
                &commands::GenerateArgs {
                    seeds,
                    length,
                    jitter,
                    output,
                    random_seed,
                },
            )?;
        }
        Commands::Status => {
            commands::show_status(&config)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config::show_config(&config),
            ConfigAction::Path => commands::config::show_path(),
            ConfigAction::Example => commands::config::show_example(),
            ConfigAction::Init => commands::config::init_config()?,
        },
    }

    Ok(())
}
