use std::{collections::HashSet, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    chat::{self, ChatView},
    config::{load_settings, Settings},
    dashboard::Dashboard,
    gallery::GalleryView,
    metrics::HttpMetricsSource,
    session::BackendSession,
    upload::SelectedFile,
    LoadPhase,
};
use shared::domain::MessageId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rtview", about = "Terminal front end for the realtime chat, gallery and dashboard")]
struct Cli {
    /// Config file; `client.toml` in the working directory is read when present.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    metrics_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Join the chat room; each stdin line is sent as a message, `/retry` reloads
    /// history after a failed load, `/quit` leaves.
    Chat {
        #[arg(long)]
        username: String,
    },
    /// List gallery images newest first.
    Gallery {
        #[arg(long)]
        search: Option<String>,
        /// Pages to load, including the first.
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Extra attempts at the first page when it fails to load.
        #[arg(long, default_value_t = 0)]
        retries: usize,
    },
    /// Upload an image file with a title.
    Upload {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        title: String,
    },
    /// Poll the metrics endpoint and print each sample.
    Dashboard {
        /// Stop after this many samples; runs until interrupted when omitted.
        #[arg(long)]
        samples: Option<usize>,
    },
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = load_settings(self.config.as_deref())?;
        if let Some(v) = &self.backend_url {
            settings.backend_url = v.clone();
        }
        if let Some(v) = &self.api_key {
            settings.api_key = v.clone();
        }
        if let Some(v) = &self.metrics_url {
            settings.metrics_url = v.clone();
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings = cli.settings()?;

    match cli.command {
        Command::Chat { username } => run_chat(settings, &username).await,
        Command::Gallery {
            search,
            pages,
            retries,
        } => run_gallery(settings, search.as_deref(), pages, retries).await,
        Command::Upload { file, title } => run_upload(settings, file, &title).await,
        Command::Dashboard { samples } => run_dashboard(settings, samples).await,
    }
}

async fn run_chat(settings: Settings, username: &str) -> Result<()> {
    let session = BackendSession::connect(settings).await?;
    let profile = chat::join(session.rows().as_ref(), username).await?;
    let mut view = ChatView::mount(&session, profile).await?;
    println!("joined as {} (id {})", view.profile().username, view.profile().id);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown: HashSet<MessageId> = HashSet::new();
    let mut banner: Option<String> = None;
    let mut online: Vec<String> = Vec::new();
    let mut reported = false;

    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(line) if line.trim() == "/quit" => break,
                Some(line) if line.trim() == "/retry" => {
                    if view.retry_history() {
                        reported = false;
                    } else {
                        eprintln!("history is not in a failed state");
                    }
                }
                Some(line) => {
                    view.set_draft(&line).await;
                    if let Err(error) = view.send().await {
                        eprintln!("send failed: {error}");
                    }
                }
                None => break,
            },
            open = view.step() => {
                if !open {
                    break;
                }
            }
        }

        if view.phase() == LoadPhase::Idle && !reported {
            if let Some(error) = view.last_error() {
                eprintln!("history failed to load: {error} (type /retry to try again)");
                reported = true;
            }
        }
        for message in view.messages() {
            if shown.insert(message.id.clone()) {
                let marker = if view.is_own(message) { ">" } else { " " };
                println!(
                    "{marker} [{}] {}: {}",
                    message.created_at.format("%H:%M:%S"),
                    message.author_name(),
                    message.content
                );
            }
        }
        let users = view.online_users();
        if users != online {
            println!("online: {}", users.join(", "));
            online = users;
        }
        let next_banner = view.typing_banner();
        if next_banner != banner {
            if let Some(text) = &next_banner {
                println!("{text}");
            }
            banner = next_banner;
        }
    }

    view.unmount().await;
    session.shutdown().await;
    Ok(())
}

async fn loaded(view: &mut GalleryView) -> bool {
    while matches!(view.phase(), LoadPhase::LoadingInitial | LoadPhase::LoadingMore) {
        if !view.step().await {
            return false;
        }
    }
    true
}

async fn run_gallery(
    settings: Settings,
    search: Option<&str>,
    pages: usize,
    retries: usize,
) -> Result<()> {
    let session = BackendSession::connect(settings).await?;
    let mut view = GalleryView::mount(&session).await?;
    if let Some(term) = search {
        view.set_search(term);
    }
    loaded(&mut view).await;
    for attempt in 1..=retries {
        if view.phase() != LoadPhase::Idle {
            break;
        }
        warn!(attempt, error = view.last_error().unwrap_or_default(), "retrying first page");
        view.retry();
        loaded(&mut view).await;
    }

    for _ in 1..pages {
        if !view.near_bottom() {
            break;
        }
        loaded(&mut view).await;
    }

    if let Some(error) = view.last_error() {
        warn!(%error, "gallery load incomplete");
    }
    for image in view.images() {
        println!(
            "#{:<6} {:<32} {}",
            image.id.to_string(),
            image.title,
            image.image_url
        );
    }
    if view.images().next().is_none() {
        println!("no images");
    } else if view.has_more() {
        println!("(more available)");
    }

    view.unmount().await;
    session.shutdown().await;
    Ok(())
}

async fn run_upload(settings: Settings, file: PathBuf, title: &str) -> Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("failed to read '{}'", file.display()))?;
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".into());
    let content_type = match file
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("png") => Some("image/png".to_string()),
        Some("jpg") | Some("jpeg") => Some("image/jpeg".to_string()),
        Some("gif") => Some("image/gif".to_string()),
        Some("webp") => Some("image/webp".to_string()),
        _ => None,
    };

    let session = BackendSession::connect(settings).await?;
    let mut view = GalleryView::mount(&session).await?;
    loaded(&mut view).await;

    let uploader = view.uploader();
    uploader.select_file(SelectedFile {
        file_name,
        content_type,
        bytes,
    })?;
    uploader.set_title(title)?;
    let receipt = uploader.submit().await?;
    println!("uploaded {} -> {}", receipt.key, receipt.public_url);

    // the reload request is queued behind any pushes; wait for the fresh page
    while !view.is_loading() {
        if !view.step().await {
            break;
        }
    }
    loaded(&mut view).await;
    if let Some(newest) = view.images().next() {
        println!("newest: #{} {}", newest.id, newest.title);
    }

    view.unmount().await;
    session.shutdown().await;
    Ok(())
}

async fn run_dashboard(settings: Settings, samples: Option<usize>) -> Result<()> {
    settings.validate()?;
    let source = Arc::new(HttpMetricsSource::new(settings.metrics_url.clone()));
    let mut dashboard = Dashboard::mount(source, settings.metrics_interval())?;
    println!("Loading...");

    let mut seen = 0usize;
    while samples.map_or(true, |limit| seen < limit) {
        if dashboard.next_sample().await.is_none() {
            break;
        }
        seen += 1;
        println!("--- sample {seen} ---");
        for card in dashboard.cards() {
            println!(
                "{:<14} {:>12.1} {:<4} {:<8} {}",
                card.title,
                card.value,
                card.unit,
                card.status.label(),
                card.advice()
            );
        }
    }

    dashboard.unmount();
    Ok(())
}
