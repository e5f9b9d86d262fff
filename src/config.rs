use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tracing::{debug, info, warn};

use crate::error::ConfigError;

const CONFIG_FILE_NAME: &str = "frame-config.json";
const HOME_CONFIG_DIR: &str = ".picture-frame-ui";

/// Preferred rendering backend for the display layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderingType {
    #[default]
    Gpu,
    Cpu,
}

impl RenderingType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Gpu => "GPU",
            Self::Cpu => "CPU",
        }
    }
}

impl fmt::Display for RenderingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Unknown values fall back to GPU rather than rejecting the whole file.
impl<'de> Deserialize<'de> for RenderingType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        match raw.as_str() {
            "GPU" => Ok(Self::Gpu),
            "CPU" => Ok(Self::Cpu),
            other => {
                warn!(
                    value = other,
                    "invalid rendering_type, must be 'GPU' or 'CPU'; using 'GPU'"
                );
                Ok(Self::Gpu)
            }
        }
    }
}

/// Resolved frame configuration. Loaded once at startup; immutable afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    /// Serving directory the slideshow reads from.
    pub photos_directory: PathBuf,
    /// Source directory for the importer. `None` disables importing.
    pub import_directory: Option<PathBuf>,
    /// Hold time per photo, in seconds.
    pub slideshow_duration: u64,
    /// Crossfade time, in milliseconds. Zero means a hard cut.
    pub fade_duration: u64,
    pub full_screen: bool,
    pub rendering_type: RenderingType,
    /// Bounds photos are fitted into, both on import and on display.
    pub screen_width: u32,
    pub screen_height: u32,
    /// Poll cadence of the background importer.
    #[serde(with = "humantime_serde")]
    pub import_interval: Duration,
    /// Tick cadence of the slideshow engine.
    pub frame_interval_ms: u64,
    pub jpeg_quality: u8,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            photos_directory: PathBuf::from("images"),
            import_directory: None,
            slideshow_duration: 5,
            fade_duration: 1000,
            full_screen: false,
            rendering_type: RenderingType::Gpu,
            screen_width: 1920,
            screen_height: 1080,
            import_interval: Duration::from_secs(30),
            frame_interval_ms: 33,
            jpeg_quality: 95,
        }
    }
}

impl FrameConfig {
    /// Load from `explicit` or, when absent, from the first config file found
    /// in the standard locations. The result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => Self::locate()?,
        };
        let cfg = Self::from_file(&path)?.validated()?;
        info!(path = %path.display(), "loaded configuration");
        Ok(cfg)
    }

    /// `./frame-config.json`, then `$HOME/.picture-frame-ui/frame-config.json`.
    pub fn locate() -> Result<PathBuf, ConfigError> {
        let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(
                PathBuf::from(home)
                    .join(HOME_CONFIG_DIR)
                    .join(CONFIG_FILE_NAME),
            );
        }
        for candidate in &candidates {
            if candidate.is_file() {
                debug!(path = %candidate.display(), "found config file");
                return Ok(candidate.clone());
            }
        }
        let searched = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::NotFound { searched })
    }

    /// Parse JSON, or YAML when the extension is `.yaml`/`.yml`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
        if is_yaml {
            serde_yaml::from_str(&s).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })
        } else {
            serde_json::from_str(&s).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    /// Validate runtime invariants and make directories absolute.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        ensure(
            !self.photos_directory.as_os_str().is_empty(),
            "photos_directory must not be empty",
        )?;
        ensure(
            self.slideshow_duration > 0,
            "slideshow_duration must be greater than zero",
        )?;
        ensure(
            self.screen_width > 0 && self.screen_height > 0,
            "screen_width and screen_height must be greater than zero",
        )?;
        ensure(
            self.frame_interval_ms > 0,
            "frame_interval_ms must be greater than zero",
        )?;
        ensure(
            !self.import_interval.is_zero(),
            "import_interval must be positive",
        )?;
        ensure(
            (1..=100).contains(&self.jpeg_quality),
            "jpeg_quality must be between 1 and 100",
        )?;
        if self.fade_duration > self.slideshow_duration.saturating_mul(1000) {
            warn!(
                fade_ms = self.fade_duration,
                hold_s = self.slideshow_duration,
                "fade_duration exceeds slideshow_duration; transition time is added to hold time"
            );
        }

        self.photos_directory = absolute(&self.photos_directory)?;
        if let Some(import) = self.import_directory.take() {
            let import = absolute(&import)?;
            // compared after resolving so `images` and `./images` collide
            ensure(
                import != self.photos_directory,
                "import_directory must differ from photos_directory",
            )?;
            self.import_directory = Some(import);
        }
        Ok(self)
    }

    pub fn hold_duration(&self) -> Duration {
        Duration::from_secs(self.slideshow_duration)
    }

    pub fn fade(&self) -> Duration {
        Duration::from_millis(self.fade_duration)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn screen_bounds(&self) -> (u32, u32) {
        (self.screen_width, self.screen_height)
    }
}

fn ensure(cond: bool, msg: &str) -> Result<(), ConfigError> {
    if cond {
        Ok(())
    } else {
        Err(ConfigError::Invalid(msg.to_string()))
    }
}

fn absolute(path: &Path) -> Result<PathBuf, ConfigError> {
    std::path::absolute(path).map_err(|err| {
        ConfigError::Invalid(format!("cannot resolve {}: {err}", path.display()))
    })
}
