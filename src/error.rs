use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("parse config {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("write config {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("mods directory not found: {0:?}")]
    MissingModsDirectory(PathBuf),
    #[error("mods directory is not a directory: {0:?}")]
    ModsDirectoryNotDir(PathBuf),
    #[error("mod.io api_key is not set (use `ccmm config set api_key <key>`)")]
    MissingApiKey,
    #[error("unknown config key: {0}")]
    UnknownKey(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("could not resolve a config directory")]
    NoConfigDir,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("mods directory not found: {0:?}")]
    MissingModsDirectory(PathBuf),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("mod {0} not found")]
    NotFound(u64),
    #[error("operation cancelled")]
    Cancelled,
}

impl CatalogError {
    pub fn from_ureq(url: &str, err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, _) => CatalogError::Status {
                url: url.to_string(),
                status,
            },
            ureq::Error::Transport(transport) => CatalogError::Transport {
                url: url.to_string(),
                message: transport.to_string(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("mod {0} has no downloadable files")]
    NoFiles(u64),
    #[error("download failed")]
    Download(#[from] CatalogError),
    #[error("downloaded archive for {0} is empty")]
    EmptyArchive(String),
    #[error("read archive {path:?}")]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("archive for {0} has no top-level .rte package directory")]
    MissingPackage(String),
    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("install cancelled")]
    Cancelled,
}

impl InstallError {
    pub fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| InstallError::Io { context, source }
    }
}
