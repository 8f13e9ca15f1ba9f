use anyhow::{Context, Result};
use cached_photo_frame::config::{Configuration, ScreenSize};
use cached_photo_frame::events::{Displayed, SlideshowCommand};
use cached_photo_frame::provider::{Provider, ProviderOptions};
use cached_photo_frame::service::{LibraryService, PhotoService};
use cached_photo_frame::tasks::slideshow::{self, SlideshowOptions};
use clap::{ArgAction, Parser};
use std::io::{self, BufRead, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "cached-photo-frame",
    version,
    about = "photo frame with a prefetching, disk-cached photo provider"
)]
struct Args {
    /// Path to YAML config
    #[arg(value_name = "CONFIG")]
    config: PathBuf,
    /// Screen size override, e.g. 1280x800
    #[arg(long, value_name = "WxH")]
    size: Option<ScreenSize>,
    /// Keep the library's listing order instead of shuffling
    #[arg(long = "no-shuffle")]
    no_shuffle: bool,
    /// Slide interval override, e.g. 10s or 2m
    #[arg(long = "slide-interval", value_name = "DURATION", value_parser = humantime::parse_duration)]
    slide_interval: Option<Duration>,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) {
    let fallback = match verbosity {
        0 => "info",
        1 => "cached_photo_frame=debug,info",
        _ => "cached_photo_frame=trace,debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        config,
        size,
        no_shuffle,
        slide_interval,
        verbose,
    } = Args::parse();
    init_tracing(verbose);

    let mut cfg = Configuration::from_yaml_file(&config)
        .with_context(|| format!("failed to load configuration from {}", config.display()))?;
    if let Some(size) = size {
        cfg.screen = size;
    }
    if no_shuffle {
        cfg.shuffle = false;
    }
    if let Some(interval) = slide_interval {
        cfg.slide_interval = interval;
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    tracing::info!(
        "Loaded configuration from {}:\n{:#?}",
        config.display(),
        cfg
    );

    let cancel = CancellationToken::new();
    let service: Arc<dyn PhotoService> = Arc::new(LibraryService::new(&cfg.library_path));
    let provider = Provider::open(service, ProviderOptions::from(&cfg), cancel.clone())
        .await
        .context("failed to start photo provider")?;

    let (command_tx, command_rx) = mpsc::channel::<SlideshowCommand>(16); // stdin -> slideshow
    let (displayed_tx, mut displayed_rx) = mpsc::channel::<Displayed>(64); // slideshow -> log

    // Line commands on a terminal; Ctrl-D cancels the pipeline
    if io::stdin().is_terminal() {
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            tracing::info!("commands: n(ext) p(revious) s(tar) r(emove) o(verlay)");
            for line in io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!("stdin watcher failed: {err}");
                        break;
                    }
                };
                match slideshow::parse_command(&line) {
                    Some(command) => {
                        if command_tx.blocking_send(command).is_err() {
                            return;
                        }
                    }
                    None if line.trim().is_empty() => {}
                    None => tracing::warn!("unknown command {:?}", line.trim()),
                }
            }
            tracing::info!("stdin closed; initiating shutdown");
            cancel.cancel();
        });
    } else {
        tracing::debug!("stdin is not a terminal; commands disabled");
        drop(command_tx);
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("ctrl-c handler failed: {err}");
                return;
            }
            tracing::info!("ctrl-c received; initiating shutdown");
            cancel.cancel();
        });
    }

    let mut tasks = JoinSet::new();

    tasks.spawn({
        let cancel = cancel.clone();
        let options = SlideshowOptions {
            interval: cfg.slide_interval,
            screen: cfg.screen,
            crop_threshold: cfg.crop_threshold,
            refresh_interval: cfg.refresh_interval,
        };
        async move {
            slideshow::run(provider, command_rx, displayed_tx, cancel, options)
                .await
                .context("slideshow task failed")
        }
    });

    tasks.spawn(async move {
        let mut shown = 0usize;
        while let Some(Displayed(id)) = displayed_rx.recv().await {
            shown += 1;
            tracing::debug!(%id, shown, "displayed");
        }
        Ok(())
    });

    // Drain JoinSet (wait for tasks to complete)
    while let Some(res) = tasks.join_next().await {
        match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("task error: {e:?}");
                cancel.cancel();
            }
            Err(e) => tracing::error!("join error: {e}"),
        }
    }

    Ok(())
}
