//! `seine` — chunk, dedup, and upload files to a CAS-backed hub repo.
//!
//! # Usage
//!
//! ```text
//! seine upload --repo user/repo model.safetensors tokenizer.json
//! seine upload --repo user/ds --repo-type dataset --rev dev data.parquet
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use seine_engine::{UploadSource, Uploader};
use seine_net::{HttpCasClient, TokenConfig};
use seine_types::{UploadConfig, UploadEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "seine", version, about = "Content-defined dedup uploader")]
struct Cli {
    /// Log level when RUST_LOG is not set (e.g. "info", "debug").
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload files to a repository.
    Upload {
        /// Repository name, e.g. "user/repo".
        #[arg(long)]
        repo: String,

        /// Repository type: model, dataset, or space.
        #[arg(long, default_value = "model")]
        repo_type: String,

        /// Target revision (branch or commit).
        #[arg(long, default_value = "main")]
        rev: String,

        /// Hub base URL.
        #[arg(long, default_value = "https://huggingface.co")]
        hub_url: String,

        /// Hub access token. Anonymous if omitted.
        #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Files chunked concurrently.
        #[arg(long, default_value_t = 4)]
        file_workers: usize,

        /// Network uploads in flight concurrently.
        #[arg(long, default_value_t = 4)]
        upload_workers: usize,

        /// Files to upload.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Upload {
            repo,
            repo_type,
            rev,
            hub_url,
            token,
            file_workers,
            upload_workers,
            files,
        } => {
            let client = Arc::new(HttpCasClient::new(TokenConfig {
                hub_url,
                access_token: token,
                repo_type,
                repo,
                rev,
            }));
            let config = UploadConfig {
                file_workers,
                upload_workers,
                ..UploadConfig::default()
            };
            let uploader = Uploader::new(client, config);

            let mut sources = Vec::with_capacity(files.len());
            for path in &files {
                let source = UploadSource::from_path(path)
                    .await
                    .with_context(|| format!("failed to open {}", path.display()))?;
                sources.push(source);
            }

            let cancel = CancellationToken::new();
            let ctrl_c_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received, aborting upload");
                    ctrl_c_cancel.cancel();
                }
            });

            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let reporter = tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    match event {
                        UploadEvent::FileProgress { path, progress } => {
                            debug!(path, progress = format!("{:.0}%", progress * 100.0), "chunking");
                        }
                        UploadEvent::FileDone {
                            path, dedup_ratio, ..
                        } => {
                            info!(path, dedup = format!("{:.1}%", dedup_ratio * 100.0), "file done");
                        }
                        UploadEvent::FileFailed { path, error } => {
                            warn!(path, error, "file failed");
                        }
                        UploadEvent::XorbUploaded { hash, size } => {
                            debug!(%hash, size, "xorb uploaded");
                        }
                    }
                }
            });

            let results = uploader
                .upload(sources, events_tx, cancel)
                .await
                .context("upload failed")?;
            let _ = reporter.await;

            let total: u64 = results.iter().map(|r| r.total_bytes).sum();
            let deduped: u64 = results.iter().map(|r| r.dedup_bytes).sum();
            for file in &results {
                println!("{}  sha256={}  dedup={:.1}%", file.path, file.sha256, file.dedup_ratio * 100.0);
            }
            println!(
                "uploaded {} files, {} bytes ({} deduplicated)",
                results.len(),
                total,
                deduped
            );
        }
    }

    Ok(())
}
