//! The photo service the provider pulls from.
//!
//! [`PhotoService`] is the seam between the provider pipeline and wherever the
//! photos actually live. [`LibraryService`] serves a local directory tree and
//! keeps descriptions and tags in a JSON sidecar next to the photos.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::FetchError;
use crate::events::{PhotoId, PhotoMetadata};

#[async_trait]
pub trait PhotoService: Send + Sync {
    /// Every photo currently available, in the service's listing order.
    async fn list_photos(&self) -> Result<Vec<PhotoId>, FetchError>;

    async fn get_metadata(&self, id: &PhotoId) -> Result<PhotoMetadata, FetchError>;

    async fn get_content(&self, id: &PhotoId) -> Result<Vec<u8>, FetchError>;

    /// Add (`present = true`) or remove a tag on the service side.
    async fn set_tag(&self, id: &PhotoId, tag: &str, present: bool) -> Result<(), FetchError>;
}

pub const SIDECAR_FILE: &str = "photo-tags.json";

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SidecarEntry {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    description: String,
    #[serde(default)]
    tags: BTreeSet<String>,
}

type Sidecar = BTreeMap<String, SidecarEntry>;

/// Photos from a local directory tree. Identifiers are `/`-separated paths
/// relative to the root.
#[derive(Debug)]
pub struct LibraryService {
    root: PathBuf,
    sidecar: Mutex<()>,
}

impl LibraryService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sidecar: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &PhotoId) -> Result<PathBuf, FetchError> {
        let rel = Path::new(id.as_str());
        let safe = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe || id.as_str().is_empty() {
            return Err(FetchError::NotFound(id.clone()));
        }
        Ok(self.root.join(rel))
    }

    async fn load_sidecar(&self) -> Result<Sidecar, FetchError> {
        let path = self.root.join(SIDECAR_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|err| FetchError::network(format!("{}: {err}", path.display()))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Sidecar::new()),
            Err(err) => Err(FetchError::network(format!("{}: {err}", path.display()))),
        }
    }

    async fn store_sidecar(&self, sidecar: &Sidecar) -> Result<(), FetchError> {
        let path = self.root.join(SIDECAR_FILE);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(sidecar).map_err(FetchError::network)?;
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(FetchError::network)?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(FetchError::network)
    }
}

#[async_trait]
impl PhotoService for LibraryService {
    async fn list_photos(&self) -> Result<Vec<PhotoId>, FetchError> {
        let root = self.root.clone();
        let ids = tokio::task::spawn_blocking(move || scan_library(&root))
            .await
            .map_err(FetchError::network)??;
        info!(root = %self.root.display(), photos = ids.len(), "library listed");
        Ok(ids)
    }

    async fn get_metadata(&self, id: &PhotoId) -> Result<PhotoMetadata, FetchError> {
        let path = self.resolve(id)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(FetchError::NotFound(id.clone())),
            Err(err) => return Err(io_error(id, err)),
        }
        let entry = self
            .load_sidecar()
            .await?
            .remove(id.as_str())
            .unwrap_or_default();
        Ok(PhotoMetadata {
            id: id.clone(),
            description: entry.description,
            tags: entry.tags,
            download_url: format!("file://{}", path.display()),
        })
    }

    async fn get_content(&self, id: &PhotoId) -> Result<Vec<u8>, FetchError> {
        let path = self.resolve(id)?;
        tokio::fs::read(&path).await.map_err(|err| io_error(id, err))
    }

    async fn set_tag(&self, id: &PhotoId, tag: &str, present: bool) -> Result<(), FetchError> {
        let path = self.resolve(id)?;
        if !tokio::fs::try_exists(&path).await.map_err(|err| io_error(id, err))? {
            return Err(FetchError::NotFound(id.clone()));
        }
        let _guard = self.sidecar.lock().await;
        let mut sidecar = self.load_sidecar().await?;
        let entry = sidecar.entry(id.as_str().to_owned()).or_default();
        let changed = if present {
            entry.tags.insert(tag.to_owned())
        } else {
            entry.tags.remove(tag)
        };
        if changed {
            self.store_sidecar(&sidecar).await?;
        }
        debug!(%id, tag, present, changed, "library tag updated");
        Ok(())
    }
}

fn io_error(id: &PhotoId, err: io::Error) -> FetchError {
    if err.kind() == io::ErrorKind::NotFound {
        FetchError::NotFound(id.clone())
    } else {
        FetchError::network(err)
    }
}

fn scan_library(root: &Path) -> Result<Vec<PhotoId>, FetchError> {
    if !root.is_dir() {
        return Err(FetchError::network(format!(
            "library root {} is not a directory",
            root.display()
        )));
    }
    let mut ids: Vec<PhotoId> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && is_image(e.path()))
        .filter_map(|e| {
            let rel = e.path().strip_prefix(root).ok()?;
            let parts: Option<Vec<&str>> = rel.components().map(|c| c.as_os_str().to_str()).collect();
            Some(PhotoId::new(parts?.join("/")))
        })
        .collect();
    ids.sort();
    Ok(ids)
}

#[inline]
pub fn is_image(p: &Path) -> bool {
    matches!(
        p.extension()
            .and_then(OsStr::to_str)
            .map(|s| s.to_ascii_lowercase()),
        Some(ref e) if ["jpg", "jpeg", "png", "webp", "gif"].contains(&e.as_str())
    )
}
