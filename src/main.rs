use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use docrag::config::DEFAULT_CONFIG_PATH;
use docrag::models::{DownloadStatus, InstallOutcome};
use docrag::service::ChatService;

#[derive(Parser)]
#[command(name = "docrag")]
#[command(about = "Ask questions about your documents")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract, chunk and index one or more files
    Ingest {
        paths: Vec<PathBuf>,

        /// Document id (single file only; defaults to the file name)
        #[arg(long)]
        id: Option<String>,
    },

    /// Answer a question from the indexed documents
    Ask { question: String },

    /// Show the nearest chunks for a query
    Search {
        query: String,

        #[arg(short, long, default_value = "5")]
        limit: usize,
    },

    /// Remove every chunk of a document
    Delete { doc_id: String },

    /// Number of indexed chunks
    Stats,

    /// Generator, backend and index status
    Status,

    /// Manage local inference models
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// Models installed on the local backend
    List,
    /// Catalog models with installed/downloading flags
    Available,
    /// Download a model and show its progress
    Install { name: String },
    /// Remove an installed model
    Remove { name: String },
    /// Make a model the active one and rebuild the generator
    Use { name: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let service = ChatService::from_config_file(&cli.config)
        .await
        .with_context(|| format!("failed to start with {}", cli.config.display()))?;
    service.check_backend().await;

    match cli.command {
        Commands::Ingest { paths, id } => ingest(&service, paths, id).await?,
        Commands::Ask { question } => {
            let answer = service.chat(&question).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.response);
                if !answer.sources.is_empty() {
                    println!("\nSources: {}", answer.sources.join(", "));
                }
                info!("Answered in {:.2}s", answer.response_time_secs);
            }
        }
        Commands::Search { query, limit } => {
            let results = service.index().search(&query, limit).await?;
            if results.is_empty() {
                println!("No results.");
            }
            for (rank, r) in results.iter().enumerate() {
                let source = r
                    .metadata
                    .get("filename")
                    .or_else(|| r.metadata.get("doc_id"))
                    .map_or("?", String::as_str);
                println!("{}. [{:.4}] {source}", rank + 1, r.distance);
                println!("   {}", r.content.replace('\n', " "));
            }
        }
        Commands::Delete { doc_id } => {
            let removed = service.index().delete_document(&doc_id).await?;
            println!("Removed {removed} chunks of {doc_id}");
        }
        Commands::Stats => {
            let index = service.index();
            let stats = index.get_stats().await?;
            let collection = index.collection();
            println!("Collection:   {}", collection.name);
            println!(
                "Embeddings:   {} ({} dims)",
                collection.model_name, collection.dimensions
            );
            println!(
                "Chunking:     {} chars, {} overlap",
                index.splitter().chunk_size(),
                index.splitter().chunk_overlap()
            );
            println!("Total chunks: {}", stats.total_chunks);
        }
        Commands::Status => {
            let status = service.status().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Provider:          {}", status.provider);
                println!("Model:             {}", status.current_model);
                println!("Backend available: {}", status.backend_available);
                println!("Installed models:  {}", status.installed_models);
                println!("Indexed chunks:    {}", status.total_chunks);
            }
        }
        Commands::Models { command } => models(&service, command, cli.json).await?,
    }

    Ok(())
}

async fn ingest(service: &ChatService, paths: Vec<PathBuf>, id: Option<String>) -> Result<()> {
    if paths.is_empty() {
        bail!("no files given");
    }
    if id.is_some() && paths.len() > 1 {
        bail!("--id can only be used with a single file");
    }

    let mut failures = 0;
    for path in &paths {
        let doc_id = match &id {
            Some(id) => id.clone(),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("{} has no file name", path.display()))?,
        };

        if !docrag::extractor::is_supported(path) {
            warn!("Skipping {}: unsupported file type", path.display());
            failures += 1;
            continue;
        }

        // One bad file does not stop the others.
        match service.ingest_file(&doc_id, path).await {
            Ok(count) => println!("{}: {count} chunks", path.display()),
            Err(e) => {
                error!("Failed to ingest {}: {e:#}", path.display());
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {} files failed", paths.len());
    }
    Ok(())
}

async fn models(service: &ChatService, command: ModelsCommand, json: bool) -> Result<()> {
    let manager = service.models();
    match command {
        ModelsCommand::List => {
            if !manager.is_available().await {
                warn!("Local inference server is not available");
            }
            let installed = manager.list_installed().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&installed)?);
            } else {
                for m in installed {
                    println!("{:<24} {:>10}  {}", m.full_name, m.size, m.digest);
                }
            }
        }
        ModelsCommand::Available => {
            let available = manager.list_available().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&available)?);
            } else {
                for m in available {
                    let state = if m.downloading {
                        "downloading"
                    } else if m.installed {
                        "installed"
                    } else {
                        ""
                    };
                    println!("{:<24} {:>10}  {:<12} {}", m.name, m.size, state, m.description);
                }
            }
        }
        ModelsCommand::Install { name } => {
            match manager.install(&name).await? {
                InstallOutcome::Accepted { model } => println!("Download of {model} started"),
                InstallOutcome::AlreadyInProgress(p) => {
                    println!("{name} is already downloading ({:.0}%)", p.progress)
                }
            }
            // The pull runs on this process's runtime, so stay until it ends.
            follow_download(service, &name).await?;
        }
        ModelsCommand::Remove { name } => {
            let removed = manager.remove(&name).await?;
            println!("Removed {removed}");
        }
        ModelsCommand::Use { name } => {
            let generator = service.activate_model(&name).await?;
            println!(
                "Active generator: {} ({})",
                generator.provider(),
                generator.current_model()
            );
        }
    }
    Ok(())
}

/// Poll the progress table until the download leaves the in-flight states.
async fn follow_download(service: &ChatService, name: &str) -> Result<()> {
    let pb = ProgressBar::new(100);
    if let Ok(style) =
        ProgressStyle::default_bar().template("  {bar:40.cyan/blue} {pos}% {msg}")
    {
        pb.set_style(style.progress_chars("█▓░"));
    }

    loop {
        let Some(progress) = service.models().download_status(name) else {
            bail!("no download recorded for {name}");
        };
        pb.set_position(progress.progress as u64);
        pb.set_message(progress.message.clone());

        match progress.status {
            DownloadStatus::Completed => {
                pb.finish_and_clear();
                println!("{name} installed");
                return Ok(());
            }
            DownloadStatus::Error => {
                pb.abandon();
                bail!("download of {name} failed: {}", progress.message);
            }
            DownloadStatus::Starting | DownloadStatus::Downloading => {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}
