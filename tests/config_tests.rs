use picture_frame::config::{FrameConfig, RenderingType};
use picture_frame::error::ConfigError;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn parse_frame_config_json() {
    let json = r#"{
        "photos_directory": "/srv/photos",
        "import_directory": "/srv/incoming",
        "slideshow_duration": 10,
        "fade_duration": 250,
        "full_screen": true,
        "rendering_type": "CPU",
        "server_host": "0.0.0.0",
        "server_port": 5000
    }"#;
    let cfg: FrameConfig = serde_json::from_str(json).unwrap();
    assert_eq!(cfg.photos_directory, PathBuf::from("/srv/photos"));
    assert_eq!(cfg.import_directory, Some(PathBuf::from("/srv/incoming")));
    assert_eq!(cfg.hold_duration(), Duration::from_secs(10));
    assert_eq!(cfg.fade(), Duration::from_millis(250));
    assert!(cfg.full_screen);
    assert_eq!(cfg.rendering_type, RenderingType::Cpu);
}

#[test]
fn parse_yaml_with_humantime_interval() {
    let yaml = r#"
photos_directory: "/photos"
import_interval: 2m
frame_interval_ms: 16
"#;
    let cfg: FrameConfig = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(cfg.import_interval, Duration::from_secs(120));
    assert_eq!(cfg.frame_interval(), Duration::from_millis(16));
    assert_eq!(cfg.slideshow_duration, 5);
}

#[test]
fn unknown_rendering_type_falls_back_to_gpu() {
    let cfg: FrameConfig = serde_json::from_str(r#"{"rendering_type": "Vulkan"}"#).unwrap();
    assert_eq!(cfg.rendering_type, RenderingType::Gpu);
}

#[test]
fn from_file_picks_parser_by_extension() {
    let tmp = tempdir().unwrap();
    let yaml = tmp.path().join("frame.yaml");
    fs::write(&yaml, "slideshow_duration: 7\n").unwrap();
    let json = tmp.path().join("frame-config.json");
    fs::write(&json, r#"{"slideshow_duration": 9}"#).unwrap();

    assert_eq!(FrameConfig::from_file(&yaml).unwrap().slideshow_duration, 7);
    assert_eq!(FrameConfig::from_file(&json).unwrap().slideshow_duration, 9);
}

#[test]
fn load_validates_and_makes_paths_absolute() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("frame-config.json");
    fs::write(&path, r#"{"photos_directory": "images", "fade_duration": 0}"#).unwrap();
    let cfg = FrameConfig::load(Some(path.as_path())).unwrap();
    assert!(cfg.photos_directory.is_absolute());
    assert!(cfg.fade().is_zero());
}

#[test]
fn malformed_json_is_a_config_error() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("frame-config.json");
    fs::write(&path, "{ not json").unwrap();
    let err = FrameConfig::load(Some(path.as_path())).unwrap_err();
    assert!(matches!(err, ConfigError::Json { .. }));
}

#[test]
fn missing_explicit_file_is_a_read_error() {
    let tmp = tempdir().unwrap();
    let err = FrameConfig::load(Some(tmp.path().join("absent.json").as_path())).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn same_import_and_serving_directory_is_rejected() {
    let cfg = FrameConfig {
        photos_directory: PathBuf::from("/p"),
        import_directory: Some(PathBuf::from("/p")),
        ..FrameConfig::default()
    };
    assert!(matches!(cfg.validated(), Err(ConfigError::Invalid(_))));
}

#[test]
fn jpeg_quality_out_of_range_is_rejected() {
    let cfg = FrameConfig {
        jpeg_quality: 0,
        ..FrameConfig::default()
    };
    assert!(matches!(cfg.validated(), Err(ConfigError::Invalid(_))));
}
