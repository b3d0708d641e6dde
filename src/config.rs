use crate::error::ConfigError;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_GAME_ID: u64 = 508;
pub const DEFAULT_API_URL: &str = "https://api.mod.io/v1";
pub const DEFAULT_MODS_DIR: &str = "./mods";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModioConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_game_id")]
    pub game_id: u64,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for ModioConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            game_id: DEFAULT_GAME_ID,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub modio: ModioConfig,
    #[serde(default = "default_mods_dir")]
    pub mods_directory: PathBuf,
    #[serde(skip)]
    pub path: PathBuf,
}

impl AppConfig {
    pub fn with_defaults(path: PathBuf) -> Self {
        Self {
            modio: ModioConfig::default(),
            mods_directory: default_mods_dir(),
            path,
        }
    }

    /// Loads the config at `path` (or the per-user default location), writing
    /// the defaults back when no file exists yet.
    pub fn load_or_create(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => default_config_path()?,
        };
        if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let mut config: AppConfig =
                serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
            config.path = path;
            return Ok(config);
        }

        tracing::info!("No config at {}, writing defaults", path.display());
        let config = AppConfig::with_defaults(path);
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let write_err = |source: std::io::Error| ConfigError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(write_err)?;
            }
        }
        let raw = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        fs::write(&self.path, raw).map_err(write_err)?;
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "api_key" | "modio.api_key" => self.modio.api_key = value.trim().to_string(),
            "game_id" | "modio.game_id" => {
                self.modio.game_id =
                    value
                        .trim()
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue {
                            key: key.to_string(),
                            value: value.to_string(),
                        })?;
            }
            "api_url" | "modio.api_url" => {
                let url = value.trim().trim_end_matches('/');
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    });
                }
                self.modio.api_url = url.to_string();
            }
            "mods_directory" => self.mods_directory = PathBuf::from(value.trim()),
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// The mods directory must exist before any scan or install runs.
    pub fn validate_mods_directory(&self) -> Result<&Path, ConfigError> {
        let dir = self.mods_directory.as_path();
        if !dir.exists() {
            return Err(ConfigError::MissingModsDirectory(dir.to_path_buf()));
        }
        if !dir.is_dir() {
            return Err(ConfigError::ModsDirectoryNotDir(dir.to_path_buf()));
        }
        Ok(dir)
    }

    pub fn validate_credentials(&self) -> Result<(), ConfigError> {
        if self.modio.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let base = BaseDirs::new().ok_or(ConfigError::NoConfigDir)?;
    Ok(base.data_local_dir().join("ccmm").join("config.json"))
}

fn default_game_id() -> u64 {
    DEFAULT_GAME_ID
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_mods_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MODS_DIR)
}
