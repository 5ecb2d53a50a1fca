use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3push::cli::commands;
use s3push::config;
use s3push::s3::S3Client;

#[derive(Parser)]
#[command(name = "s3push")]
#[command(version, about = "Resumable S3 uploads with multipart transfer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file, resuming an earlier incomplete upload of the same key
    Put {
        /// Local file
        source: PathBuf,

        /// Destination (s3://bucket/key)
        destination: String,

        /// Content type (default: application/octet-stream)
        #[arg(long)]
        content_type: Option<String>,
    },

    /// List incomplete multipart uploads
    LsIncomplete {
        /// S3 path (s3://bucket/prefix)
        path: String,

        /// List recursively
        #[arg(short, long)]
        recursive: bool,
    },

    /// List the parts stored for an incomplete upload
    Parts {
        /// S3 path (s3://bucket/key)
        path: String,

        /// Upload ID
        #[arg(long)]
        upload_id: String,
    },

    /// Abort every incomplete upload for an object
    RmIncomplete {
        /// S3 path (s3://bucket/key)
        path: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parts are sent one at a time, so a single-threaded runtime is enough
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    // Load configuration
    let config = config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    let options = config.client_options(cli.profile.as_deref())?;
    let client = S3Client::new(options).context("Failed to create S3 client")?;

    match cli.command {
        Commands::Put {
            source,
            destination,
            content_type,
        } => {
            commands::cmd_put(&client, &source, &destination, content_type.as_deref()).await?;
        }
        Commands::LsIncomplete { path, recursive } => {
            commands::cmd_ls_incomplete(&client, &path, recursive).await?;
        }
        Commands::Parts { path, upload_id } => {
            commands::cmd_parts(&client, &path, &upload_id).await?;
        }
        Commands::RmIncomplete { path } => {
            commands::cmd_rm_incomplete(&client, &path).await?;
        }
    }

    Ok(())
}
