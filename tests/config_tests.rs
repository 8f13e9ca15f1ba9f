use cached_photo_frame::config::{Configuration, ScreenSize};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn parse_kebab_case_config_with_defaults() {
    let yaml = r#"
library-path: "/photos"
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let cfg = cfg.validated().unwrap();
    assert_eq!(cfg.library_path, PathBuf::from("/photos"));
    assert_eq!(cfg.cache_path, PathBuf::from("photo-cache"));
    assert_eq!(cfg.cache_size_mb, 1024);
    assert_eq!(cfg.cache_budget_bytes(), 1024 * 1024 * 1024);
    assert!(cfg.shuffle);
    assert_eq!(cfg.shuffle_seed, None);
    assert_eq!(
        cfg.screen,
        ScreenSize {
            width: 1920,
            height: 1080
        }
    );
    assert_eq!(cfg.crop_threshold, 10);
    assert_eq!(cfg.slide_interval, Duration::from_secs(30));
    assert_eq!(cfg.prefetch_depth, 5);
    assert_eq!(cfg.refresh_interval, None);
}

#[test]
fn parse_full_config() {
    let yaml = r#"
library-path: "/photos"
cache-path: "/var/cache/frame"
cache-size-mb: 64
shuffle: false
shuffle-seed: 7
screen:
  width: 1280
  height: 800
crop-threshold: 15
slide-interval: 1m 30s
prefetch-depth: 3
refresh-interval: 10m
"#;
    let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
    let cfg = cfg.validated().unwrap();
    assert_eq!(cfg.cache_path, PathBuf::from("/var/cache/frame"));
    assert_eq!(cfg.cache_budget_bytes(), 64 * 1024 * 1024);
    assert!(!cfg.shuffle);
    assert_eq!(cfg.shuffle_seed, Some(7));
    assert_eq!(cfg.screen.to_string(), "1280x800");
    assert_eq!(cfg.crop_threshold, 15);
    assert_eq!(cfg.slide_interval, Duration::from_secs(90));
    assert_eq!(cfg.prefetch_depth, 3);
    assert_eq!(cfg.refresh_interval, Some(Duration::from_secs(600)));
}

#[test]
fn unknown_keys_are_rejected() {
    let yaml = r#"
library-path: "/photos"
oversample: 1.5
"#;
    assert!(serde_yaml::from_str::<Configuration>(yaml).is_err());
}

#[test]
fn validation_rejects_bad_values() {
    let missing_library: Configuration = serde_yaml::from_str("cache-size-mb: 10").unwrap();
    assert!(missing_library.validated().is_err());

    for yaml in [
        "library-path: /p\ncache-size-mb: 0",
        "library-path: /p\nscreen: {width: 0, height: 10}",
        "library-path: /p\ncrop-threshold: 101",
        "library-path: /p\nslide-interval: 0s",
        "library-path: /p\nrefresh-interval: 0s",
    ] {
        let cfg: Configuration = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validated().is_err(), "accepted {yaml:?}");
    }
}

#[test]
fn screen_size_from_cli_string() {
    let size: ScreenSize = "1024x600".parse().unwrap();
    assert_eq!(
        size,
        ScreenSize {
            width: 1024,
            height: 600
        }
    );
    assert_eq!("800X480".parse::<ScreenSize>().unwrap().height, 480);
    assert!("1024".parse::<ScreenSize>().is_err());
    assert!("wide x tall".parse::<ScreenSize>().is_err());
}

#[test]
fn load_from_yaml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "library-path: /srv/photos\nprefetch-depth: 0\n").unwrap();
    let cfg = Configuration::from_yaml_file(&path).unwrap().validated().unwrap();
    assert_eq!(cfg.library_path, PathBuf::from("/srv/photos"));
    assert_eq!(cfg.prefetch_depth, 0);
}
