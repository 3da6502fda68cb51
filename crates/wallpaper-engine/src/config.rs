use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use wallpaper_contracts::gallery::{FileSlot, DEFAULT_SLOT_KEY};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "imagen-3.0-generate-002";
pub const DEFAULT_EDIT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_REQUEST_TIMEOUT_S: f64 = 90.0;

const CREDENTIAL_VARS: [&str; 3] = ["API_KEY", "GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// Process-wide settings, read once from the environment.
#[derive(Clone)]
pub struct StudioConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_model: String,
    pub edit_model: String,
    pub request_timeout: Duration,
    pub data_dir: PathBuf,
    pub gallery_cap: Option<usize>,
}

impl StudioConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let api_key = CREDENTIAL_VARS.iter().find_map(|key| non_empty(*key));
        let api_base = non_empty("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let request_timeout = non_empty("WALLPAPER_REQUEST_TIMEOUT")
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|value| value.is_finite())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_S)
            .clamp(5.0, 600.0);
        let data_dir = non_empty("WALLPAPER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let gallery_cap = non_empty("WALLPAPER_GALLERY_CAP")
            .and_then(|raw| raw.parse::<usize>().ok())
            .filter(|cap| *cap > 0);

        Self {
            api_key,
            api_base,
            image_model: non_empty("WALLPAPER_IMAGE_MODEL")
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            edit_model: non_empty("WALLPAPER_EDIT_MODEL")
                .unwrap_or_else(|| DEFAULT_EDIT_MODEL.to_string()),
            request_timeout: Duration::from_secs_f64(request_timeout),
            data_dir,
            gallery_cap,
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn gallery_slot(&self) -> FileSlot {
        FileSlot::new(&self.data_dir, DEFAULT_SLOT_KEY)
    }

    pub fn activity_path(&self) -> PathBuf {
        self.data_dir.join("activity.jsonl")
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

impl fmt::Debug for StudioConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StudioConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("image_model", &self.image_model)
            .field("edit_model", &self.edit_model)
            .field("request_timeout", &self.request_timeout)
            .field("data_dir", &self.data_dir)
            .field("gallery_cap", &self.gallery_cap)
            .finish()
    }
}

fn default_data_dir() -> PathBuf {
    dirs_next::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wallpaper-studio")
}
