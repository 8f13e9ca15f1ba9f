//! The photo provider: play order, prefetch window and the two fetch workers.
//!
//! The presentation layer drives it with [`Provider::next`] and drains
//! [`Provider::recv`] for [`ProviderEvent`]s. Neither call touches the network
//! or the disk: `next` only updates in-memory state and posts work to the
//! metadata and content workers, and `recv` turns their reports into events.
//!
//! Request flow for one photo:
//! 1. `next` moves the cursor. Known metadata is announced right away as
//!    `PhotoInfo` and the content is requested; otherwise the metadata worker
//!    is asked first.
//! 2. When metadata lands, `PhotoInfo` goes out and the content is requested.
//! 3. When content lands, `PhotoLoaded` goes out.
//!
//! User requests always go to the front of a queue; look-ahead requests go to
//! the back and never overtake them.

use anyhow::{Context, Result};
use rand::{SeedableRng, rngs::StdRng};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, Receiver};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{DiskCache, SharedCache};
use crate::config::Configuration;
use crate::error::FetchError;
use crate::events::{
    Direction, FetchOutcome, FetchStage, PhotoId, PhotoMetadata, Priority, ProviderEvent,
};
use crate::play_order::PlayOrder;
use crate::queue::{Mailbox, RequestQueue};
use crate::service::PhotoService;
use crate::tasks::metadata::{MetadataJobs, TagWrite};
use crate::tasks::{content, metadata};

/// Worker reports in flight before the workers wait on the provider.
const OUTCOME_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// How many upcoming photos to warm on every move.
    pub prefetch_depth: usize,
    pub shuffle: bool,
    /// Deterministic seed for the initial shuffle.
    pub shuffle_seed: Option<u64>,
    pub cache_path: PathBuf,
    pub cache_budget_bytes: u64,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            prefetch_depth: 5,
            shuffle: true,
            shuffle_seed: None,
            cache_path: PathBuf::from("photo-cache"),
            cache_budget_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl From<&Configuration> for ProviderOptions {
    fn from(cfg: &Configuration) -> Self {
        Self {
            prefetch_depth: cfg.prefetch_depth,
            shuffle: cfg.shuffle,
            shuffle_seed: cfg.shuffle_seed,
            cache_path: cfg.cache_path.clone(),
            cache_budget_bytes: cfg.cache_budget_bytes(),
        }
    }
}

pub struct Provider {
    order: PlayOrder,
    known: HashMap<PhotoId, PhotoMetadata>,
    /// Photos with tag writes still queued; their local tags win over fetches.
    pending_tag_writes: HashMap<PhotoId, usize>,
    missing: HashSet<PhotoId>,
    ready: VecDeque<ProviderEvent>,
    metadata_jobs: Arc<Mailbox<MetadataJobs>>,
    content_jobs: Arc<Mailbox<RequestQueue>>,
    outcomes: Receiver<FetchOutcome>,
    workers: JoinSet<Result<()>>,
    cancel: CancellationToken,
    prefetch_depth: usize,
}

impl Provider {
    /// List the service, open the cache and start the workers.
    pub async fn open(
        service: Arc<dyn PhotoService>,
        options: ProviderOptions,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let listing = service
            .list_photos()
            .await
            .context("failed to list photos")?;
        let (path, budget) = (options.cache_path.clone(), options.cache_budget_bytes);
        let cache = tokio::task::spawn_blocking(move || DiskCache::open(path, budget))
            .await?
            .with_context(|| format!("failed to open cache at {}", options.cache_path.display()))?;
        Ok(Self::start(service, cache, listing, options, cancel))
    }

    /// Start the workers over an already opened cache. Must be called from
    /// within a tokio runtime.
    pub fn start(
        service: Arc<dyn PhotoService>,
        cache: DiskCache,
        listing: Vec<PhotoId>,
        options: ProviderOptions,
        cancel: CancellationToken,
    ) -> Self {
        let order = if options.shuffle {
            let mut rng = match options.shuffle_seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            PlayOrder::shuffled(listing, &mut rng)
        } else {
            PlayOrder::new(listing)
        };
        info!(
            photos = order.len(),
            shuffle = options.shuffle,
            prefetch_depth = options.prefetch_depth,
            "provider starting"
        );

        let cache = SharedCache::new(cache);
        let metadata_jobs = Arc::new(Mailbox::new(MetadataJobs::default()));
        let content_jobs = Arc::new(Mailbox::new(RequestQueue::new()));
        let (outcome_tx, outcomes) = mpsc::channel(OUTCOME_CAPACITY);

        let mut workers = JoinSet::new();
        workers.spawn(metadata::run(
            Arc::clone(&metadata_jobs),
            Arc::clone(&service),
            cache.clone(),
            outcome_tx.clone(),
            cancel.clone(),
        ));
        workers.spawn(content::run(
            Arc::clone(&content_jobs),
            service,
            cache,
            outcome_tx,
            cancel.clone(),
        ));

        let provider = Self {
            order,
            known: HashMap::new(),
            pending_tag_writes: HashMap::new(),
            missing: HashSet::new(),
            ready: VecDeque::new(),
            metadata_jobs,
            content_jobs,
            outcomes,
            workers,
            cancel,
            prefetch_depth: options.prefetch_depth,
        };
        provider.prefetch(Direction::Forward);
        provider
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The photo the cursor points at.
    pub fn current(&self) -> Option<&PhotoId> {
        self.order.current()
    }

    pub fn play_order(&self) -> &PlayOrder {
        &self.order
    }

    pub fn metadata(&self, id: &PhotoId) -> Option<&PhotoMetadata> {
        self.known.get(id)
    }

    /// Move to the next photo in `direction` and request it. Never blocks and
    /// never fails; problems surface later as `ProviderEvent::Error`.
    pub fn next(&mut self, direction: Direction) -> Option<PhotoId> {
        let Some(id) = self.order.next(direction).cloned() else {
            warn!("next requested but the play order is empty");
            return None;
        };
        debug!(%id, ?direction, position = ?self.order.position(), "advancing");

        if let Some(meta) = self.known.get(&id) {
            self.ready.push_back(info_event(meta));
            self.request_content(&id, Priority::User);
        } else {
            self.metadata_jobs
                .post(|jobs| jobs.requests.push_front(id.clone(), Priority::User));
        }
        self.prefetch(direction);
        Some(id)
    }

    pub fn add_tag(&mut self, id: &PhotoId, tag: &str) -> bool {
        self.set_tag(id, tag, true)
    }

    pub fn remove_tag(&mut self, id: &PhotoId, tag: &str) -> bool {
        self.set_tag(id, tag, false)
    }

    /// Flip `tag` on `id`. Returns whether the tag is now present, or `None`
    /// when the photo's metadata is not known yet.
    pub fn toggle_tag(&mut self, id: &PhotoId, tag: &str) -> Option<bool> {
        let present = !self.known.get(id)?.tags.contains(tag);
        self.set_tag(id, tag, present);
        Some(present)
    }

    /// Ask the metadata worker to re-list the service. Photos that vanished
    /// drop out of the play order when the listing lands.
    pub fn request_refresh(&self) {
        self.metadata_jobs.post(|jobs| jobs.refresh_listing = true);
    }

    /// Next event for the presentation layer. Cancel safe. Returns `None` once
    /// both workers are gone.
    pub async fn recv(&mut self) -> Option<ProviderEvent> {
        loop {
            if let Some(event) = self.ready.pop_front() {
                return Some(event);
            }
            let outcome = self.outcomes.recv().await?;
            self.handle(outcome);
        }
    }

    /// Stop the workers and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.outcomes.close();
        while let Some(res) = self.workers.join_next().await {
            match res {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("worker error: {e:?}"),
                Err(e) => warn!("worker join error: {e}"),
            }
        }
    }

    fn set_tag(&mut self, id: &PhotoId, tag: &str, present: bool) -> bool {
        let Some(meta) = self.known.get_mut(id) else {
            warn!(%id, tag, "tag change for a photo without metadata; ignoring");
            return false;
        };
        let changed = if present {
            meta.tags.insert(tag.to_owned())
        } else {
            meta.tags.remove(tag)
        };
        if changed {
            info!(%id, tag, present, "tag changed");
            let write = TagWrite {
                tag: tag.to_owned(),
                present,
                metadata: meta.clone(),
            };
            *self.pending_tag_writes.entry(id.clone()).or_default() += 1;
            self.metadata_jobs.post(|jobs| jobs.tag_writes.push_back(write));
        }
        changed
    }

    fn request_content(&self, id: &PhotoId, priority: Priority) {
        let id = id.clone();
        self.content_jobs.post(|queue| match priority {
            Priority::User => queue.push_front(id, priority),
            Priority::Prefetch => queue.push_back(id, priority),
        });
    }

    fn prefetch(&self, direction: Direction) {
        let (warm_content, need_metadata): (Vec<PhotoId>, Vec<PhotoId>) = self
            .order
            .upcoming(direction, self.prefetch_depth)
            .into_iter()
            .partition(|id| self.known.contains_key(id));
        if !need_metadata.is_empty() {
            self.metadata_jobs.post(|jobs| {
                for id in need_metadata {
                    jobs.requests.push_back(id, Priority::Prefetch);
                }
            });
        }
        if !warm_content.is_empty() {
            self.content_jobs.post(|queue| {
                for id in warm_content {
                    queue.push_back(id, Priority::Prefetch);
                }
            });
        }
    }

    fn handle(&mut self, outcome: FetchOutcome) {
        match outcome {
            FetchOutcome::Metadata {
                id,
                priority,
                mut metadata,
                cache_error,
            } => {
                // Only the photo on screen jumps the content queue; a user
                // request the cursor already left is look-ahead by now.
                let is_current = self.order.current() == Some(&id);
                debug!(%id, requested = ?priority, is_current, "metadata ready");
                let priority = if is_current {
                    Priority::User
                } else {
                    Priority::Prefetch
                };
                if is_current {
                    self.metadata_jobs
                        .take(|jobs| jobs.requests.remove(&id).then_some(()));
                }
                if self.pending_tag_writes.contains_key(&id) {
                    if let Some(local) = self.known.get(&id) {
                        metadata.tags = local.tags.clone();
                    }
                }
                self.missing.remove(&id);
                self.ready.push_back(info_event(&metadata));
                self.known.insert(id.clone(), metadata);
                self.report_cache_error(&id, priority, cache_error);
                self.request_content(&id, priority);
            }
            FetchOutcome::Content {
                id,
                image,
                cache_error,
            } => {
                debug!(%id, width = image.width, height = image.height, "content ready");
                self.ready.push_back(ProviderEvent::PhotoLoaded {
                    id: id.clone(),
                    image,
                });
                self.report_cache_error(&id, Priority::User, cache_error);
            }
            FetchOutcome::Prefetched { id, cache_error } => {
                debug!(%id, "content prefetched");
                self.report_cache_error(&id, Priority::Prefetch, cache_error);
            }
            FetchOutcome::Failed {
                id,
                priority,
                stage,
                error,
            } => self.handle_failure(id, priority, stage, error),
            FetchOutcome::TagWritten { id } => {
                if let Some(count) = self.pending_tag_writes.get_mut(&id) {
                    *count -= 1;
                    if *count == 0 {
                        self.pending_tag_writes.remove(&id);
                    }
                }
            }
            FetchOutcome::Listing(ids) => {
                let before = self.order.len();
                self.order.refresh(ids);
                let listed: HashSet<&PhotoId> = self.order.iter().collect();
                self.known.retain(|id, _| listed.contains(id));
                self.missing.clear();
                info!(before, after = self.order.len(), "play order refreshed");
            }
        }
    }

    fn handle_failure(
        &mut self,
        id: PhotoId,
        priority: Priority,
        stage: FetchStage,
        error: FetchError,
    ) {
        if let FetchError::NotFound(_) = error {
            self.known.remove(&id);
            if self.missing.insert(id.clone()) {
                info!(%id, "photo vanished from the service; refreshing listing");
                self.request_refresh();
            }
        }
        if priority == Priority::User || self.order.current() == Some(&id) {
            self.ready.push_back(ProviderEvent::Error { id, error });
        } else {
            debug!(%id, ?stage, "look-ahead fetch failed: {error}");
        }
    }

    fn report_cache_error(
        &mut self,
        id: &PhotoId,
        priority: Priority,
        error: Option<FetchError>,
    ) {
        let Some(error) = error else {
            return;
        };
        warn!(%id, "serving uncached photo: {error}");
        if priority == Priority::User {
            self.ready.push_back(ProviderEvent::Error {
                id: id.clone(),
                error,
            });
        }
    }
}

fn info_event(meta: &PhotoMetadata) -> ProviderEvent {
    ProviderEvent::PhotoInfo {
        id: meta.id.clone(),
        description: meta.description.clone(),
        tags: meta.tags.clone(),
    }
}
