use std::path::PathBuf;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use serde_json::json;
use source_plugins::{Query, SourceRegistry, SourcesConfig, TrackInfo};
use tokio::io::AsyncWriteExt;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

type Error = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser)]
#[command(name = "source-plugins", version, about = "Resolve and stream tracks from third-party music sources")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print source ids in routing order
    List,
    /// Resolve a URL or a tagged search such as `dzsearch:daft punk`
    Resolve {
        input: String,
    },
    /// Write the media of a resolved track to a file
    Stream {
        /// Source id the track was resolved by
        #[arg(long)]
        source: String,
        /// Track descriptor as printed by `resolve`
        #[arg(long)]
        track: String,
        #[arg(long)]
        out: PathBuf,
        /// Ask for a stream the host's fallback decoder can probe
        #[arg(long)]
        fallback: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("source_plugins=debug,warn")),
        )
        .with_writer(std::io::stderr)
        .with_line_number(true)
        .with_file(true)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = SourcesConfig::from_env();
    let registry = SourceRegistry::with_defaults(&config);

    match cli.command {
        Command::List => {
            for source in registry.priority() {
                println!("{}", source);
            }
        }
        Command::Resolve { input } => {
            registry.initialize_all().await;
            let query = Query::parse(&input);
            let (source, result) = registry.resolve(&query).await?;
            info!("{} resolved {} entries", source, result.entries.len());
            let output = json!({
                "source": source,
                "entries": result.entries,
                "plData": result.pl_data,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Command::Stream {
            source,
            track,
            out,
            fallback,
        } => {
            let track: TrackInfo = serde_json::from_str(&track)?;
            let mut output = registry.stream(&source, &track, fallback).await?;
            if let Some(kind) = output.kind {
                info!("Stream type hint: {:?}", kind);
            }

            let mut file = tokio::fs::File::create(&out).await?;
            let mut written = 0usize;
            while let Some(chunk) = output.stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                written += chunk.len();
            }
            file.flush().await?;
            info!("Wrote {} bytes to {}", written, out.display());
        }
    }

    Ok(())
}
