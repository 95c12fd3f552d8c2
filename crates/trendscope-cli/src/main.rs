mod demo;
mod replay;
mod session;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use trendscope_core::Platform;

#[derive(Debug, Parser)]
#[command(name = "trendscope-cli")]
#[command(about = "Trendscope operator command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormat {
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the engine over synthetic multi-platform traffic for a topic
    Demo {
        /// Topic or hashtag to simulate (for example "fashion")
        topic: String,

        /// Posts generated per platform
        #[arg(long, short = 'l', default_value_t = 30)]
        limit: usize,

        /// Aggregation cycles to simulate
        #[arg(long, default_value_t = 8)]
        cycles: u32,

        /// Platforms to simulate; repeat the flag for several (default: all)
        #[arg(long = "platform", short = 'p')]
        platforms: Vec<Platform>,

        /// Seed for reproducible traffic
        #[arg(long)]
        seed: Option<u64>,

        /// Write the resulting trends to a file
        #[arg(long, short = 'e', value_enum)]
        export: Option<ExportFormat>,

        /// Directory for exported files
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Replay recorded ingest batches (one JSON batch per line) offline
    Replay {
        /// JSON Lines file of ingest batches
        file: PathBuf,

        /// Write the resulting trends to a file
        #[arg(long, short = 'e', value_enum)]
        export: Option<ExportFormat>,

        /// Directory for exported files
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let engine_config = trendscope_core::load_engine_config_from_env()?;
    let cli = Cli::parse();
    let summary = match &cli.command {
        Commands::Demo {
            topic,
            limit,
            cycles,
            platforms,
            seed,
            ..
        } => {
            let platforms = if platforms.is_empty() {
                Platform::ALL.to_vec()
            } else {
                platforms.clone()
            };
            let options = demo::DemoOptions {
                topic: topic.clone(),
                limit: *limit,
                cycles: *cycles,
                platforms,
                seed: seed.unwrap_or_else(rand::random),
            };
            demo::run_demo(engine_config, &options).await?
        }
        Commands::Replay { file, .. } => replay::run_replay(engine_config, file).await?,
    };

    session::print_summary(&summary);

    let (export, output_dir, stem) = match &cli.command {
        Commands::Demo {
            export,
            output_dir,
            topic,
            ..
        } => (*export, output_dir, topic.clone()),
        Commands::Replay {
            export,
            output_dir,
            file,
        } => (
            *export,
            output_dir,
            file.file_stem()
                .map_or_else(|| "replay".to_string(), |s| s.to_string_lossy().into_owned()),
        ),
    };
    if export == Some(ExportFormat::Json) {
        let path = session::export_json(&summary, output_dir, &stem)?;
        println!("\nresults written to {}", path.display());
    }

    Ok(())
}
