use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::FetchError;

/// Tag marking a photo as starred.
pub const STAR_TAG: &str = "starred";
/// Tag marking a photo for removal from the library.
pub const REMOVE_TAG: &str = "remove";

/// Opaque key naming one photo on the service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(String);

impl PhotoId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(id.as_ref().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhotoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhotoId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoMetadata {
    pub id: PhotoId,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub download_url: String,
}

impl PhotoMetadata {
    pub fn is_starred(&self) -> bool {
        self.tags.contains(STAR_TAG)
    }

    pub fn is_marked_for_removal(&self) -> bool {
        self.tags.contains(REMOVE_TAG)
    }
}

/// Raw photo bytes as fetched from the service or the cache.
#[derive(Debug, Clone)]
pub struct PhotoContent {
    pub id: PhotoId,
    pub bytes: Vec<u8>,
    /// BLAKE3 hex digest of `bytes`.
    pub hash: String,
}

impl PhotoContent {
    pub fn new(id: PhotoId, bytes: Vec<u8>) -> Self {
        let hash = blake3::hash(&bytes).to_hex().to_string();
        Self { id, bytes, hash }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedImageCpu {
    pub id: PhotoId,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub content_hash: String,
}

/// Who asked for a photo. User requests always outrank look-ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Prefetch,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn step(self) -> isize {
        match self {
            Self::Forward => 1,
            Self::Backward => -1,
        }
    }
}

/// Events the provider hands to the presentation layer.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    PhotoInfo {
        id: PhotoId,
        description: String,
        tags: BTreeSet<String>,
    },
    PhotoLoaded {
        id: PhotoId,
        image: Arc<PreparedImageCpu>,
    },
    Error {
        id: PhotoId,
        error: FetchError,
    },
}

impl ProviderEvent {
    pub fn id(&self) -> &PhotoId {
        match self {
            Self::PhotoInfo { id, .. } | Self::PhotoLoaded { id, .. } | Self::Error { id, .. } => id,
        }
    }
}

/// Emitted by the slideshow after a photo is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Displayed(pub PhotoId);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideshowCommand {
    Next,
    Previous,
    ToggleStar,
    ToggleRemove,
    /// Show or hide the overlay; the slide timer is paused while it is shown.
    ToggleOverlay,
}

/// Worker -> provider reports. Every report names the photo and the priority
/// the request carried when it was dequeued.
#[derive(Debug)]
pub enum FetchOutcome {
    Metadata {
        id: PhotoId,
        priority: Priority,
        metadata: PhotoMetadata,
        /// Set when the fetch succeeded but the result could not be cached.
        cache_error: Option<FetchError>,
    },
    Content {
        id: PhotoId,
        image: Arc<PreparedImageCpu>,
        cache_error: Option<FetchError>,
    },
    /// Look-ahead content landed in the cache; nothing to show.
    Prefetched {
        id: PhotoId,
        cache_error: Option<FetchError>,
    },
    Failed {
        id: PhotoId,
        priority: Priority,
        stage: FetchStage,
        error: FetchError,
    },
    TagWritten {
        id: PhotoId,
    },
    Listing(Vec<PhotoId>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    Metadata,
    Content,
}
