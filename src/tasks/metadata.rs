use crate::cache::{SharedCache, metadata_key};
use crate::error::FetchError;
use crate::events::{FetchOutcome, FetchStage, PhotoId, PhotoMetadata};
use crate::queue::{Mailbox, PendingRequest, RequestQueue};
use crate::service::PhotoService;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A local tag change waiting to be pushed to the service and the cache.
#[derive(Debug, Clone)]
pub struct TagWrite {
    pub tag: String,
    pub present: bool,
    /// Metadata as it looks after the change; written to the cache verbatim.
    pub metadata: PhotoMetadata,
}

/// Everything the metadata worker can be asked to do.
#[derive(Debug, Default)]
pub struct MetadataJobs {
    pub requests: RequestQueue,
    pub tag_writes: VecDeque<TagWrite>,
    pub refresh_listing: bool,
}

#[derive(Debug)]
enum Job {
    WriteTag(TagWrite),
    RefreshListing,
    Fetch(PendingRequest),
}

impl MetadataJobs {
    /// Tag writes go first so later fetches read the updated cache entry.
    fn next_job(&mut self) -> Option<Job> {
        if let Some(write) = self.tag_writes.pop_front() {
            return Some(Job::WriteTag(write));
        }
        if std::mem::take(&mut self.refresh_listing) {
            return Some(Job::RefreshListing);
        }
        self.requests.pop().map(Job::Fetch)
    }

    pub fn is_idle(&self) -> bool {
        self.tag_writes.is_empty() && !self.refresh_listing && self.requests.is_empty()
    }
}

/// Metadata worker: one job at a time, most recent request first.
///
/// - Cache hit: decode the cached JSON; a corrupt entry is dropped and refetched.
/// - Cache miss: fetch from the service and store the JSON.
/// - Failures are reported to the provider and never end the loop.
pub async fn run(
    jobs: Arc<Mailbox<MetadataJobs>>,
    service: Arc<dyn PhotoService>,
    cache: SharedCache,
    to_provider: Sender<FetchOutcome>,
    cancel: CancellationToken,
) -> Result<()> {
    info!("metadata worker started");
    loop {
        let Some(job) = jobs.take(MetadataJobs::next_job) else {
            select! {
                _ = cancel.cancelled() => break,
                _ = jobs.wait() => {}
            }
            continue;
        };

        // In-flight work is only abandoned on shutdown.
        let outcome = select! {
            _ = cancel.cancelled() => break,
            outcome = process(job, service.as_ref(), &cache) => outcome,
        };
        let Some(outcome) = outcome else {
            continue;
        };
        // A full channel must not outlive shutdown.
        select! {
            _ = cancel.cancelled() => break,
            sent = to_provider.send(outcome) => {
                if sent.is_err() {
                    debug!("provider dropped; stopping metadata worker");
                    break;
                }
            }
        }
    }
    info!("metadata worker stopped");
    Ok(())
}

async fn process(job: Job, service: &dyn PhotoService, cache: &SharedCache) -> Option<FetchOutcome> {
    match job {
        Job::Fetch(PendingRequest { id, priority, .. }) => {
            debug!(%id, ?priority, "metadata: fetching");
            Some(match fetch(&id, service, cache).await {
                Ok((metadata, cache_error)) => FetchOutcome::Metadata {
                    id,
                    priority,
                    metadata,
                    cache_error,
                },
                Err(error) => {
                    warn!(%id, ?priority, "metadata fetch failed: {error}");
                    FetchOutcome::Failed {
                        id,
                        priority,
                        stage: FetchStage::Metadata,
                        error,
                    }
                }
            })
        }
        Job::WriteTag(write) => {
            let id = write.metadata.id.clone();
            write_tag(write, service, cache).await;
            Some(FetchOutcome::TagWritten { id })
        }
        Job::RefreshListing => match service.list_photos().await {
            Ok(ids) => {
                info!(photos = ids.len(), "listing refreshed");
                Some(FetchOutcome::Listing(ids))
            }
            Err(err) => {
                warn!("listing refresh failed: {err}");
                None
            }
        },
    }
}

/// Cached metadata when present, otherwise the service's. The second value
/// reports a cache write failure on an otherwise successful fetch.
pub async fn fetch(
    id: &PhotoId,
    service: &dyn PhotoService,
    cache: &SharedCache,
) -> Result<(PhotoMetadata, Option<FetchError>), FetchError> {
    let key = metadata_key(id);
    match cache.get(key.clone()).await {
        Ok(Some(bytes)) => match serde_json::from_slice::<PhotoMetadata>(&bytes) {
            Ok(metadata) if metadata.id == *id => {
                debug!(%id, "metadata: cache hit");
                return Ok((metadata, None));
            }
            Ok(_) | Err(_) => {
                warn!(%id, "metadata: dropping unreadable cache entry");
                if let Err(err) = cache.remove(key.clone()).await {
                    warn!(%id, "metadata: could not drop cache entry: {err}");
                }
            }
        },
        Ok(None) => {}
        Err(err) => warn!(%id, "metadata: cache read failed, going to the service: {err}"),
    }

    let metadata = service.get_metadata(id).await?;
    let cache_error = store(cache, &metadata).await.err();
    Ok((metadata, cache_error))
}

async fn store(cache: &SharedCache, metadata: &PhotoMetadata) -> Result<(), FetchError> {
    let json = serde_json::to_vec(metadata).map_err(FetchError::cache_write)?;
    cache
        .put(metadata_key(&metadata.id), json)
        .await
        .map_err(|err| {
            warn!(id = %metadata.id, "metadata: cache write failed: {err}");
            FetchError::cache_write(err)
        })
}

/// Best effort: the local change stands whatever the service says.
async fn write_tag(write: TagWrite, service: &dyn PhotoService, cache: &SharedCache) {
    let TagWrite {
        tag,
        present,
        metadata,
    } = write;
    let id = &metadata.id;
    match service.set_tag(id, &tag, present).await {
        Ok(()) => debug!(%id, tag = %tag, present, "tag written to service"),
        Err(err) => warn!(%id, tag = %tag, present, "tag write failed; keeping local change: {err}"),
    }
    if store(cache, &metadata).await.is_ok() {
        debug!(%id, "cached metadata updated after tag change");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DiskCache;
    use crate::events::Priority;
    use crate::service::LibraryService;

    fn write(id: &str) -> TagWrite {
        TagWrite {
            tag: "starred".into(),
            present: true,
            metadata: PhotoMetadata {
                id: id.into(),
                description: String::new(),
                tags: Default::default(),
                download_url: String::new(),
            },
        }
    }

    #[test]
    fn tag_writes_then_refresh_then_fetches() {
        let mut jobs = MetadataJobs::default();
        jobs.requests.push_front("a".into(), Priority::User);
        jobs.refresh_listing = true;
        jobs.tag_writes.push_back(write("b"));

        assert!(matches!(jobs.next_job(), Some(Job::WriteTag(_))));
        assert!(matches!(jobs.next_job(), Some(Job::RefreshListing)));
        assert!(matches!(jobs.next_job(), Some(Job::Fetch(r)) if r.id.as_str() == "a"));
        assert!(jobs.next_job().is_none());
        assert!(jobs.is_idle());
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_refetched() {
        let library = tempfile::tempdir().unwrap();
        std::fs::write(library.path().join("a.png"), b"x").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut disk = DiskCache::open(dir.path(), 1 << 20).unwrap();
        let id = PhotoId::new("a.png");
        disk.put(&metadata_key(&id), b"{not json").unwrap();
        let cache = SharedCache::new(disk);
        let service = LibraryService::new(library.path());

        let (metadata, cache_error) = fetch(&id, &service, &cache).await.unwrap();
        assert_eq!(metadata.id, id);
        assert!(cache_error.is_none());
        let bytes = cache.get(metadata_key(&id)).await.unwrap().unwrap();
        let cached: PhotoMetadata = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(cached, metadata);
    }
}
