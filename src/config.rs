use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, ensure};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl fmt::Display for ScreenSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// `WIDTHxHEIGHT`, as accepted by `--size`.
impl FromStr for ScreenSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {s:?}"))?;
        let width = w.trim().parse().with_context(|| format!("bad width in {s:?}"))?;
        let height = h.trim().parse().with_context(|| format!("bad height in {s:?}"))?;
        Ok(Self { width, height })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Root of the photo library served by the local service.
    pub library_path: PathBuf,
    /// Directory holding cached metadata and content.
    pub cache_path: PathBuf,
    /// Cache budget in MiB.
    pub cache_size_mb: u64,
    /// Shuffle the play order once at startup.
    pub shuffle: bool,
    /// Optional deterministic seed for the startup shuffle.
    pub shuffle_seed: Option<u64>,
    pub screen: ScreenSize,
    /// Aspect mismatch in percent below which photos are cropped to fill.
    pub crop_threshold: u8,
    /// Time a photo stays on screen before the slideshow advances.
    #[serde(with = "humantime_serde")]
    pub slide_interval: Duration,
    /// How many upcoming photos are fetched ahead of display.
    pub prefetch_depth: usize,
    /// Re-list the library this often; unset disables periodic refresh.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Option<Duration>,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            !self.library_path.as_os_str().is_empty(),
            "library-path must be set"
        );
        ensure!(
            !self.cache_path.as_os_str().is_empty(),
            "cache-path must not be empty"
        );
        ensure!(self.cache_size_mb > 0, "cache-size-mb must be greater than zero");
        ensure!(
            self.screen.width > 0 && self.screen.height > 0,
            "screen width and height must be greater than zero"
        );
        ensure!(
            self.crop_threshold <= 100,
            "crop-threshold is a percentage and must be at most 100"
        );
        ensure!(
            !self.slide_interval.is_zero(),
            "slide-interval must be greater than zero"
        );
        if let Some(refresh) = self.refresh_interval {
            ensure!(!refresh.is_zero(), "refresh-interval must be greater than zero");
        }
        Ok(self)
    }

    pub fn cache_budget_bytes(&self) -> u64 {
        self.cache_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            library_path: PathBuf::new(),
            cache_path: PathBuf::from("photo-cache"),
            cache_size_mb: 1024,
            shuffle: true,
            shuffle_seed: None,
            screen: ScreenSize::default(),
            crop_threshold: 10,
            slide_interval: Duration::from_secs(30),
            prefetch_depth: 5,
            refresh_interval: None,
        }
    }
}
