use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::annotation::SURFACE_FILL;
use crate::backend::{MemoryBackend, RestBackend, SurveyBackend};
use crate::identity::{COOKIE_LIFETIME_DAYS, FORM_TOKEN_KEY, PARTICIPANT_COOKIE};
use crate::surface::SurfaceSize;

pub const URL_ENV: &str = "MARKUP_SURVEY_URL";
pub const ANON_KEY_ENV: &str = "MARKUP_SURVEY_ANON_KEY";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process store, optionally seeded from a directory of images.
    Memory { seed_dir: Option<PathBuf> },
    Rest { url: String, anon_key: String },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory { seed_dir: None }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SurveyConfig {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub fill_color: [u8; 4],
    pub batch_size: usize,
    pub bucket: String,
    pub annotation_prefix: String,
    pub cache_control_seconds: u32,
    pub participant_cookie: String,
    pub form_token_key: String,
    pub cookie_lifetime_days: i64,
    pub backend: BackendConfig,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            canvas_width: 800,
            canvas_height: 600,
            fill_color: SURFACE_FILL,
            batch_size: 5,
            bucket: "survey_images".to_string(),
            annotation_prefix: "annotations".to_string(),
            cache_control_seconds: 3600,
            participant_cookie: PARTICIPANT_COOKIE.to_string(),
            form_token_key: FORM_TOKEN_KEY.to_string(),
            cookie_lifetime_days: COOKIE_LIFETIME_DAYS,
            backend: BackendConfig::default(),
        }
    }
}

impl SurveyConfig {
    fn project_dirs() -> Option<ProjectDirs> {
        ProjectDirs::from("com", "markup-survey", "markup-survey")
    }

    fn file_path() -> Option<PathBuf> {
        let dirs = Self::project_dirs()?;
        let config_dir = dirs.config_dir();
        std::fs::create_dir_all(config_dir).ok()?;
        Some(config_dir.join("survey.json"))
    }

    /// Where the participant cookie jar lives.
    pub fn cookie_jar_path() -> Option<PathBuf> {
        let dirs = Self::project_dirs()?;
        Some(dirs.data_dir().join("cookies.json"))
    }

    /// Reads the config file, then applies environment overrides. A first run
    /// writes the defaults out so there is a file to edit.
    pub fn load() -> Result<Self> {
        let path = Self::file_path().context("cannot resolve config path")?;
        let mut config = Self::load_or_init(&path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_or_init(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from(path);
        }
        let config = Self::default();
        match config.save_to(path) {
            Ok(()) => info!(path = %path.display(), "wrote default survey config"),
            Err(err) => warn!(error = %format!("{err:#}"), "cannot write default config"),
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("cannot parse {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("cannot write {}", path.display()))?;
        Ok(())
    }

    /// A URL and key in the environment select the hosted backend.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let (Some(url), Some(anon_key)) = (lookup(URL_ENV), lookup(ANON_KEY_ENV)) {
            self.backend = BackendConfig::Rest { url, anon_key };
        }
    }

    pub fn surface_size(&self) -> SurfaceSize {
        SurfaceSize::new(self.canvas_width, self.canvas_height)
    }

    pub fn build_backend(&self) -> Result<Arc<dyn SurveyBackend>> {
        match &self.backend {
            BackendConfig::Memory { seed_dir: None } => {
                Ok(Arc::new(MemoryBackend::new(self.bucket.clone())))
            }
            BackendConfig::Memory {
                seed_dir: Some(dir),
            } => Ok(Arc::new(MemoryBackend::seeded_from_dir(
                self.bucket.clone(),
                dir,
            )?)),
            BackendConfig::Rest { url, anon_key } => Ok(Arc::new(RestBackend::new(
                url.clone(),
                anon_key.clone(),
                self.bucket.clone(),
            ))),
        }
    }
}
