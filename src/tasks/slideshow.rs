use crate::config::ScreenSize;
use crate::events::{
    Direction, Displayed, PhotoId, ProviderEvent, REMOVE_TAG, STAR_TAG, SlideshowCommand,
};
use crate::layout::compute_dest_rect;
use crate::provider::Provider;
use anyhow::Result;
use std::time::Duration;
use tokio::select;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SlideshowOptions {
    /// How long a loaded photo stays up before auto-advancing.
    pub interval: Duration,
    pub screen: ScreenSize,
    pub crop_threshold: u8,
    /// Periodic listing refresh; `None` disables it.
    pub refresh_interval: Option<Duration>,
}

/// Parse one stdin line into a command. Unknown input yields `None`.
pub fn parse_command(line: &str) -> Option<SlideshowCommand> {
    match line.trim().to_ascii_lowercase().as_str() {
        "n" | "next" => Some(SlideshowCommand::Next),
        "p" | "prev" | "previous" => Some(SlideshowCommand::Previous),
        "s" | "star" => Some(SlideshowCommand::ToggleStar),
        "r" | "remove" => Some(SlideshowCommand::ToggleRemove),
        "o" | "overlay" | "pause" => Some(SlideshowCommand::ToggleOverlay),
        _ => None,
    }
}

/// Headless presentation loop.
///
/// Owns the slide timer and the provider. The timer only runs while a photo is
/// on screen and the overlay is hidden; it restarts whenever the current photo
/// loads or fails, so one bad photo never stalls the show. Events for anything
/// other than the provider's current photo are stale and ignored.
pub async fn run(
    mut provider: Provider,
    mut commands: Receiver<SlideshowCommand>,
    displayed: Sender<Displayed>,
    cancel: CancellationToken,
    options: SlideshowOptions,
) -> Result<()> {
    info!(
        interval = ?options.interval,
        screen = %options.screen,
        photos = provider.len(),
        "slideshow started"
    );
    let mut refresh = options.refresh_interval.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let mut deadline: Option<Instant> = None;
    let mut overlay = false;
    let mut commands_open = true;
    let mut on_screen: Option<PhotoId> = None;

    provider.next(Direction::Forward);

    loop {
        let timer = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
        select! {
            _ = cancel.cancelled() => break,
            command = commands.recv(), if commands_open => {
                let Some(command) = command else {
                    debug!("command channel closed");
                    commands_open = false;
                    continue;
                };
                debug!(?command, "command");
                match command {
                    SlideshowCommand::Next => {
                        provider.next(Direction::Forward);
                        deadline = None;
                    }
                    SlideshowCommand::Previous => {
                        provider.next(Direction::Backward);
                        deadline = None;
                    }
                    SlideshowCommand::ToggleStar => toggle(&mut provider, STAR_TAG),
                    SlideshowCommand::ToggleRemove => toggle(&mut provider, REMOVE_TAG),
                    SlideshowCommand::ToggleOverlay => {
                        overlay = !overlay;
                        info!(overlay, "overlay toggled");
                        deadline = if overlay || on_screen.is_none() {
                            None
                        } else {
                            Some(Instant::now() + options.interval)
                        };
                    }
                }
            }
            event = provider.recv() => {
                let Some(event) = event else {
                    warn!("provider workers are gone; stopping slideshow");
                    break;
                };
                if provider.current() != Some(event.id()) {
                    debug!(id = %event.id(), "ignoring stale event");
                    continue;
                }
                match event {
                    ProviderEvent::PhotoInfo { id, description, tags } => {
                        info!(%id, %description, ?tags, "photo info");
                    }
                    ProviderEvent::PhotoLoaded { id, image } => {
                        let rect = compute_dest_rect(
                            image.width,
                            image.height,
                            options.screen.width,
                            options.screen.height,
                            options.crop_threshold,
                        );
                        info!(
                            %id,
                            width = image.width,
                            height = image.height,
                            x = rect.x,
                            y = rect.y,
                            dest_width = rect.width,
                            dest_height = rect.height,
                            cropped = rect.is_cropped(),
                            "displaying photo"
                        );
                        on_screen = Some(id.clone());
                        if displayed.send(Displayed(id)).await.is_err() {
                            debug!("no one is listening for displayed photos");
                        }
                        if !overlay {
                            deadline = Some(Instant::now() + options.interval);
                        }
                    }
                    ProviderEvent::Error { id, error } => {
                        warn!(%id, "photo unavailable: {error}");
                        if !overlay {
                            deadline = Some(Instant::now() + options.interval);
                        }
                    }
                }
            }
            _ = timer, if deadline.is_some() => {
                deadline = None;
                provider.next(Direction::Forward);
            }
            _ = tick(&mut refresh) => {
                provider.request_refresh();
                if provider.current().is_none() {
                    provider.next(Direction::Forward);
                }
            }
        }
    }

    info!("slideshow stopping");
    provider.shutdown().await;
    Ok(())
}

fn toggle(provider: &mut Provider, tag: &str) {
    let Some(id) = provider.current().cloned() else {
        return;
    };
    match provider.toggle_tag(&id, tag) {
        Some(present) => info!(%id, tag, present, "tag toggled"),
        None => warn!(%id, tag, "metadata not loaded yet; tag unchanged"),
    }
}

async fn tick(refresh: &mut Option<Interval>) {
    match refresh {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
