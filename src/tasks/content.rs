use crate::cache::{SharedCache, content_key};
use crate::error::FetchError;
use crate::events::{FetchOutcome, FetchStage, PhotoContent, PhotoId, PreparedImageCpu, Priority};
use crate::queue::{Mailbox, PendingRequest, RequestQueue};
use crate::service::PhotoService;
use anyhow::Result;
use std::io::Cursor;
use std::sync::Arc;
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Decodes an image to RGBA8 and applies EXIF orientation if available.
// Orientation handling is best-effort; without metadata the stored
// orientation is kept.
fn decode_rgba8_apply_exif(bytes: &[u8]) -> anyhow::Result<image::RgbaImage> {
    let img = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()?;
    let mut img = img.to_rgba8();

    match read_orientation(bytes).unwrap_or(1) {
        1 => {}
        2 => img = image::imageops::flip_horizontal(&img),
        3 => img = image::imageops::rotate180(&img),
        4 => img = image::imageops::flip_vertical(&img),
        5 => {
            img = image::imageops::rotate90(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        6 => img = image::imageops::rotate90(&img),
        7 => {
            img = image::imageops::rotate270(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        8 => img = image::imageops::rotate270(&img),
        _ => {}
    }

    Ok(img)
}

fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let exif = exif::Reader::new()
        .read_from_container(&mut Cursor::new(bytes))
        .ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!("exif orientation {o}");
    Some(o)
}

/// Decode on the blocking pool. Undecodable bytes are malformed content.
async fn prepare(content: PhotoContent) -> Result<PreparedImageCpu, FetchError> {
    let PhotoContent { id, bytes, hash } = content;
    let decoded = tokio::task::spawn_blocking(move || decode_rgba8_apply_exif(&bytes))
        .await
        .map_err(FetchError::malformed)?
        .map_err(FetchError::malformed)?;
    let (width, height) = decoded.dimensions();
    Ok(PreparedImageCpu {
        id,
        width,
        height,
        pixels: decoded.into_raw(),
        content_hash: hash,
    })
}

/// Content worker: one request at a time, most recent first.
///
/// - `User` requests end in a decoded image for the viewer.
/// - `Prefetch` requests only make sure the bytes are in the cache.
/// - A failed fetch caches nothing and never ends the loop.
pub async fn run(
    jobs: Arc<Mailbox<RequestQueue>>,
    service: Arc<dyn PhotoService>,
    cache: SharedCache,
    to_provider: Sender<FetchOutcome>,
    cancel: CancellationToken,
) -> Result<()> {
    info!("content worker started");
    loop {
        let Some(request) = jobs.take(RequestQueue::pop) else {
            select! {
                _ = cancel.cancelled() => break,
                _ = jobs.wait() => {}
            }
            continue;
        };

        let outcome = select! {
            _ = cancel.cancelled() => break,
            outcome = process(request, service.as_ref(), &cache) => outcome,
        };
        select! {
            _ = cancel.cancelled() => break,
            sent = to_provider.send(outcome) => {
                if sent.is_err() {
                    debug!("provider dropped; stopping content worker");
                    break;
                }
            }
        }
    }
    info!("content worker stopped");
    Ok(())
}

async fn process(
    request: PendingRequest,
    service: &dyn PhotoService,
    cache: &SharedCache,
) -> FetchOutcome {
    let PendingRequest { id, priority, .. } = request;
    debug!(%id, ?priority, "content: fetching");
    let result = match priority {
        Priority::User => load(&id, service, cache)
            .await
            .map(|(image, cache_error)| FetchOutcome::Content {
                id: id.clone(),
                image: Arc::new(image),
                cache_error,
            }),
        Priority::Prefetch => warm(&id, service, cache)
            .await
            .map(|cache_error| FetchOutcome::Prefetched {
                id: id.clone(),
                cache_error,
            }),
    };
    result.unwrap_or_else(|error| {
        warn!(%id, ?priority, "content fetch failed: {error}");
        FetchOutcome::Failed {
            id,
            priority,
            stage: FetchStage::Content,
            error,
        }
    })
}

/// Decoded content, from the cache when possible. Bytes are only cached once
/// they decode; a cached entry that no longer decodes is dropped.
pub async fn load(
    id: &PhotoId,
    service: &dyn PhotoService,
    cache: &SharedCache,
) -> Result<(PreparedImageCpu, Option<FetchError>), FetchError> {
    let key = content_key(id);
    match cache.get(key.clone()).await {
        Ok(Some(bytes)) => {
            debug!(%id, bytes = bytes.len(), "content: cache hit");
            return match prepare(PhotoContent::new(id.clone(), bytes)).await {
                Ok(image) => Ok((image, None)),
                Err(err) => {
                    warn!(%id, "content: cached bytes no longer decode; dropping entry");
                    if let Err(rm) = cache.remove(key).await {
                        warn!(%id, "content: could not drop cache entry: {rm}");
                    }
                    Err(err)
                }
            };
        }
        Ok(None) => {}
        Err(err) => warn!(%id, "content: cache read failed, going to the service: {err}"),
    }

    let bytes = service.get_content(id).await?;
    let content = PhotoContent::new(id.clone(), bytes);
    // decode consumes the buffer, so keep a copy for the cache
    let raw = content.bytes.clone();
    let image = prepare(content).await?;
    let cache_error = store(cache, id, raw).await.err();
    Ok((image, cache_error))
}

/// Make sure the bytes are cached without decoding them.
pub async fn warm(
    id: &PhotoId,
    service: &dyn PhotoService,
    cache: &SharedCache,
) -> Result<Option<FetchError>, FetchError> {
    match cache.contains(content_key(id)).await {
        Ok(true) => {
            debug!(%id, "content: already warm");
            return Ok(None);
        }
        Ok(false) => {}
        Err(err) => warn!(%id, "content: cache lookup failed: {err}"),
    }
    let bytes = service.get_content(id).await?;
    image::guess_format(&bytes).map_err(FetchError::malformed)?;
    Ok(store(cache, id, bytes).await.err())
}

async fn store(cache: &SharedCache, id: &PhotoId, bytes: Vec<u8>) -> Result<(), FetchError> {
    let len = bytes.len();
    cache.put(content_key(id), bytes).await.map_err(|err| {
        warn!(%id, bytes = len, "content: cache write failed: {err}");
        FetchError::cache_write(err)
    })
}
