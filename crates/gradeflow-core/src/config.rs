// Configuration loading (gradeflow.toml) and the client-local provider file
// (provider.toml) holding the selected provider, model and credentials.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::ProviderKind;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{path} not found")]
    FileNotFound { path: PathBuf },

    #[error("{path} is not valid TOML: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("gradeflow.toml: `{field}` {message}")]
    ValidationError { field: String, message: String },

    #[error("cannot seed config/{file}: {message}")]
    SeedError { file: &'static str, message: String },

    #[error("failed to write {path}: {message}")]
    WriteError { path: PathBuf, message: String },

    #[error("no usable config directory on this platform")]
    NoConfigDir,
}

// ---------------------------------------------------------------------------
// gradeflow.toml
// ---------------------------------------------------------------------------

pub const SETTINGS_FILE: &str = "gradeflow.toml";

/// Where grading requests are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GradingMode {
    /// Call the selected AI provider directly from this process.
    #[default]
    Direct,
    /// Ask the backend's per-submission grade endpoint.
    Backend,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendSettings,
    pub grading: GradingSettings,
    pub providers: ProviderEndpoints,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradingSettings {
    /// Upper bound on provider calls in flight during a batch.
    pub max_concurrent: usize,
    pub provider_timeout_secs: u64,
    pub max_tokens: u32,
    #[serde(default)]
    pub mode: GradingMode,
}

impl GradingSettings {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEndpoints {
    pub ollama_url: String,
    pub openai_url: String,
    pub openrouter_url: String,
    pub anthropic_url: String,
    pub probe_timeout_ms: u64,
}

impl ProviderEndpoints {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        ProviderEndpoints {
            ollama_url: "http://localhost:11434".into(),
            openai_url: "https://api.openai.com/v1".into(),
            openrouter_url: "https://openrouter.ai/api/v1".into(),
            anthropic_url: "https://api.anthropic.com/v1/messages".into(),
            probe_timeout_ms: 1500,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            backend: BackendSettings {
                base_url: "http://localhost:8000/api".into(),
            },
            grading: GradingSettings {
                max_concurrent: 4,
                provider_timeout_secs: 60,
                max_tokens: 1500,
                mode: GradingMode::Direct,
            },
            providers: ProviderEndpoints::default(),
        }
    }
}

/// Raw deserialization target for gradeflow.toml.
#[derive(Debug, Deserialize)]
struct SettingsFile {
    backend: BackendSettings,
    grading: GradingSettings,
    #[serde(default)]
    providers: Option<ProviderEndpoints>,
}

/// Load and validate `config/gradeflow.toml` relative to `base_dir`.
///
/// Does not seed defaults; see [`load_settings_in`].
pub fn load_settings_from(base_dir: &Path) -> Result<Settings, ConfigError> {
    let path = base_dir.join("config").join(SETTINGS_FILE);
    let text = read_file(&path)?;
    let file: SettingsFile = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    let settings = Settings {
        backend: file.backend,
        grading: file.grading,
        providers: file.providers.unwrap_or_default(),
    };
    validate(&settings)?;
    Ok(settings)
}

/// Files `config/` must hold before settings can load, seeded from the copy
/// shipped in `defaults/`. The provider file lives elsewhere and starts empty.
const SEEDED_FILES: &[&str] = &[SETTINGS_FILE];

/// Seed `config/` from `defaults/` for every seeded file it lacks.
/// Returns the files that were written; an existing file is never replaced.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let config_dir = base_dir.join("config");
    let mut seeded = Vec::new();

    for &name in SEEDED_FILES {
        let target = config_dir.join(name);
        if target.is_file() {
            continue;
        }
        let shipped = base_dir.join("defaults").join(name);
        if !shipped.is_file() {
            return Err(ConfigError::SeedError {
                file: name,
                message: format!(
                    "no config/{name} or defaults/{name} under {}; pass --base-dir pointing at the project root",
                    base_dir.display()
                ),
            });
        }

        std::fs::create_dir_all(&config_dir).map_err(|e| ConfigError::SeedError {
            file: name,
            message: format!("cannot create {}: {e}", config_dir.display()),
        })?;
        std::fs::copy(&shipped, &target).map_err(|e| ConfigError::SeedError {
            file: name,
            message: format!("cannot copy {}: {e}", shipped.display()),
        })?;
        debug!("Seeded {} from {}", target.display(), shipped.display());
        seeded.push(target);
    }

    Ok(seeded)
}

/// Seed `config/` under `base_dir` if needed, then load it.
pub fn load_settings_in(base_dir: &Path) -> Result<Settings, ConfigError> {
    let copied = ensure_config_files(base_dir)?;
    for path in &copied {
        info!("Initialized {} from defaults", path.display());
    }
    load_settings_from(base_dir)
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn validate(settings: &Settings) -> Result<(), ConfigError> {
    if settings.backend.base_url.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "backend.base_url".into(),
            message: "must not be empty".into(),
        });
    }

    let max = settings.grading.max_concurrent;
    if !(1..=16).contains(&max) {
        return Err(ConfigError::ValidationError {
            field: "grading.max_concurrent".into(),
            message: format!("must be between 1 and 16 inclusive, got {max}"),
        });
    }

    let numeric_fields: &[(&str, u64)] = &[
        ("grading.provider_timeout_secs", settings.grading.provider_timeout_secs),
        ("grading.max_tokens", u64::from(settings.grading.max_tokens)),
        ("providers.probe_timeout_ms", settings.providers.probe_timeout_ms),
    ];
    for (name, val) in numeric_fields {
        if *val == 0 {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: "must be > 0".into(),
            });
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// provider.toml
// ---------------------------------------------------------------------------

/// An API key or token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Returns `None` for blank input.
    pub fn new(secret: &str) -> Option<Credential> {
        let trimmed = secret.trim();
        (!trimmed.is_empty()).then(|| Credential(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// The persisted provider selection and per-provider credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSelection {
    #[serde(default)]
    pub provider: Option<ProviderKind>,
    #[serde(default)]
    pub model: Option<String>,
    /// Keyed by provider id.
    #[serde(default)]
    credentials: BTreeMap<String, String>,
}

impl ProviderSelection {
    /// Selected provider, defaulting to the local Ollama server.
    pub fn provider(&self) -> ProviderKind {
        self.provider.unwrap_or(ProviderKind::Ollama)
    }

    /// Selected model, falling back to the provider's first model when the
    /// stored one is missing or not offered by the provider.
    pub fn model(&self) -> &'static str {
        self.provider().resolve_model(self.model.as_deref())
    }

    pub fn credential(&self, kind: ProviderKind) -> Option<Credential> {
        self.credentials
            .get(kind.id())
            .and_then(|s| Credential::new(s))
    }

    /// Store `credential` for `kind`. `None` leaves any stored value alone.
    pub fn set_credential(&mut self, kind: ProviderKind, credential: Option<Credential>) {
        if let Some(c) = credential {
            self.credentials.insert(kind.id().to_string(), c.0);
        }
    }
}

/// Reads and writes the provider file.
#[derive(Debug, Clone)]
pub struct ProviderConfigStore {
    path: PathBuf,
}

impl ProviderConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ProviderConfigStore { path: path.into() }
    }

    /// `$GRADEFLOW_PROVIDER_FILE` if set, otherwise `provider.toml` in the
    /// platform config directory.
    pub fn default_location() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var("GRADEFLOW_PROVIDER_FILE") {
            return Ok(Self::new(path));
        }
        let dirs = directories::ProjectDirs::from("", "", "gradeflow")
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::new(dirs.config_dir().join("provider.toml")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file yields the default selection.
    pub fn load(&self) -> Result<ProviderSelection, ConfigError> {
        if !self.path.exists() {
            debug!("No provider file at {}, using defaults", self.path.display());
            return Ok(ProviderSelection::default());
        }
        let text = read_file(&self.path)?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseError {
            path: self.path.clone(),
            source: e,
        })
    }

    pub fn save(&self, selection: &ProviderSelection) -> Result<(), ConfigError> {
        let text = toml::to_string(selection).map_err(|e| ConfigError::WriteError {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::WriteError {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        }
        std::fs::write(&self.path, text).map_err(|e| ConfigError::WriteError {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
