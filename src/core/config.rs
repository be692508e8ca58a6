use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Reserved user key whose preset catalog serves users that have none of
/// their own.
pub const SHARED_CATALOG_USER: &str = "shared";

/// Catalog entry every session is seeded from.
pub const DEFAULT_PRESET_NAME: &str = "default";

/// Catalog entry used to seed the assistant-mode system message when
/// present.
pub const ASSISTANT_PRESET_NAME: &str = "Assistants";

/// Fallback system message when no catalog provides a `default` entry.
pub const FALLBACK_SYSTEM_MESSAGE: &str = "你是一个人工智能助手，帮助人们查找信息。";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Chat,
    Vision,
    Image,
    Assistant,
}

/// One configured model deployment. Immutable once loaded; shared
/// read-only across every user session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: String,
    pub deployment: String,
    pub endpoint: String,
    pub key: String,
    #[serde(rename = "api-version")]
    pub api_version: String,
    #[serde(default)]
    pub model_info: String,
    #[serde(default)]
    pub deployment_info: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cv_key: Option<String>,
}

impl ModelConfig {
    pub fn kind(&self) -> ModelKind {
        match self.model_name.as_str() {
            "GPT-4 Vision" => ModelKind::Vision,
            "Dall-E-3" => ModelKind::Image,
            "Assistants" => ModelKind::Assistant,
            _ => ModelKind::Chat,
        }
    }
}

pub type PresetCatalog = BTreeMap<String, String>;

/// On-disk user file: a 2-element JSON array of the credentials map and
/// the per-user preset catalogs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig(
    pub BTreeMap<String, String>,
    pub BTreeMap<String, PresetCatalog>,
);

impl UserConfig {
    pub fn credentials(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn catalogs(&self) -> &BTreeMap<String, PresetCatalog> {
        &self.1
    }

    pub fn catalogs_mut(&mut self) -> &mut BTreeMap<String, PresetCatalog> {
        &mut self.1
    }
}

/// Errors raised while loading the configuration files. Load failures are
/// fatal: the process cannot serve any user without model definitions or
/// the credentials file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config at {}: {}", path.display(), source)
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

/// Loads the model-definitions file and the user file at startup and
/// persists the latter on every mutation.
///
/// Persistence is a whole-file overwrite through a temp-file rename, so a
/// crash mid-write leaves the previous file intact rather than a
/// truncated one.
pub struct ConfigStore {
    users_path: PathBuf,
    models: Vec<ModelConfig>,
    users: Mutex<UserConfig>,
}

impl ConfigStore {
    pub fn load(models_path: &Path, users_path: &Path) -> Result<Self, ConfigError> {
        let models: Vec<ModelConfig> = read_json(models_path)?;
        let users: UserConfig = read_json(users_path)?;
        Ok(Self {
            users_path: users_path.to_path_buf(),
            models,
            users: Mutex::new(users),
        })
    }

    pub fn models(&self) -> &[ModelConfig] {
        &self.models
    }

    pub fn model(&self, model_name: &str) -> Option<&ModelConfig> {
        self.models
            .iter()
            .find(|config| config.model_name == model_name)
    }

    pub fn verify_credentials(&self, username: &str, password: &str) -> bool {
        let users = self.users.lock().expect("user config lock poisoned");
        users
            .credentials()
            .get(username)
            .is_some_and(|stored| stored == password)
    }

    /// The user's preset catalog, falling back to the shared catalog for
    /// users with none of their own.
    pub fn catalog_for(&self, username: &str) -> PresetCatalog {
        let users = self.users.lock().expect("user config lock poisoned");
        users
            .catalogs()
            .get(username)
            .or_else(|| users.catalogs().get(SHARED_CATALOG_USER))
            .cloned()
            .unwrap_or_default()
    }

    /// Applies `mutate` to the user file contents and persists the result
    /// synchronously before returning the user's updated catalog.
    pub fn mutate_catalogs<F>(
        &self,
        username: &str,
        mutate: F,
    ) -> Result<PresetCatalog, Box<dyn StdError + Send + Sync>>
    where
        F: FnOnce(&mut BTreeMap<String, PresetCatalog>),
    {
        let mut users = self.users.lock().expect("user config lock poisoned");
        mutate(users.catalogs_mut());
        save_json(&self.users_path, &*users)?;
        Ok(users.catalogs().get(username).cloned().unwrap_or_default())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn save_json<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), Box<dyn StdError + Send + Sync>> {
    let parent = path.parent().filter(|dir| !dir.as_os_str().is_empty());

    if let Some(dir) = parent {
        fs::create_dir_all(dir)?;
    }

    let contents = serde_json::to_string_pretty(value)?;
    let mut temp_file = match parent {
        Some(dir) => NamedTempFile::new_in(dir)?,
        None => NamedTempFile::new()?,
    };

    temp_file.write_all(contents.as_bytes())?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path)?;
    Ok(())
}
