use crate::{catalog::RemoteModSummary, error::ScanError};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use walkdir::WalkDir;

pub const PACKAGE_SUFFIX: &str = ".rte";
pub const BASE_PACKAGE: &str = "Base.rte";
pub const INDEX_FILE: &str = "index.ini";
pub const SIDECAR_FILE: &str = "ccmm.json";
pub const UNKNOWN: &str = "Unknown";

const NAME_KEY: &str = "ModuleName";
const VERSION_KEY: &str = "Version";

#[derive(Debug, Clone)]
pub struct InstalledMod {
    pub source_path: PathBuf,
    pub package_dir: PathBuf,
    pub name: String,
    pub version: String,
    pub tags: Vec<String>,
    pub linked_remote: Option<Arc<RemoteModSummary>>,
}

impl InstalledMod {
    pub fn package_name(&self) -> String {
        self.package_dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Contents of `ccmm.json`, written next to `index.ini` on install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sidecar {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub fn is_package_dir_name(name: &str) -> bool {
    name.len() > PACKAGE_SUFFIX.len()
        && name
            .get(name.len() - PACKAGE_SUFFIX.len()..)
            .is_some_and(|suffix| suffix.eq_ignore_ascii_case(PACKAGE_SUFFIX))
}

/// `key = value` pairs of an `index.ini`. Lines without `=` and `#` comments
/// are skipped; the first `=` splits key from value.
pub fn parse_index_ini(raw: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        values.insert(key.trim().to_string(), value.trim().to_string());
    }
    values
}

pub fn read_sidecar(package_dir: &Path) -> Option<Sidecar> {
    let path = package_dir.join(SIDECAR_FILE);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!("Unreadable {} ({err}), using index.ini", path.display());
            return None;
        }
    };
    match serde_json::from_str::<Sidecar>(&raw) {
        Ok(sidecar) => {
            tracing::debug!("Found valid {}: {sidecar:?}", path.display());
            Some(sidecar)
        }
        Err(err) => {
            tracing::warn!("Malformed {} ({err}), using index.ini", path.display());
            None
        }
    }
}

pub fn write_sidecar(package_dir: &Path, sidecar: &Sidecar) -> io::Result<()> {
    let raw = serde_json::to_string_pretty(sidecar)?;
    fs::write(package_dir.join(SIDECAR_FILE), raw)
}

/// Reads one package directory. `None` when it has no `index.ini`.
pub fn read_installed_mod(package_dir: &Path) -> Option<InstalledMod> {
    let source_path = package_dir.join(INDEX_FILE);
    let raw = match fs::read(&source_path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(err) => {
            tracing::debug!("Skipping {} ({err})", package_dir.display());
            return None;
        }
    };
    let index = parse_index_ini(&raw);
    let mut name = index
        .get(NAME_KEY)
        .cloned()
        .unwrap_or_else(|| UNKNOWN.to_string());
    let mut version = index
        .get(VERSION_KEY)
        .cloned()
        .unwrap_or_else(|| UNKNOWN.to_string());
    let mut tags = Vec::new();

    if let Some(sidecar) = read_sidecar(package_dir) {
        if let Some(value) = sidecar.name {
            name = value;
        }
        if let Some(value) = sidecar.version {
            version = value;
        }
        tags = sidecar.tags;
    }

    Some(InstalledMod {
        source_path,
        package_dir: package_dir.to_path_buf(),
        name,
        version,
        tags,
        linked_remote: None,
    })
}

/// Lists installed packages in directory-enumeration order.
pub fn scan_mods_dir(mods_dir: &Path) -> Result<Vec<InstalledMod>, ScanError> {
    if !mods_dir.is_dir() {
        return Err(ScanError::MissingModsDirectory(mods_dir.to_path_buf()));
    }

    let mut mods = Vec::new();
    let mut candidates = 0usize;
    for entry in WalkDir::new(mods_dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("Skipping unreadable entry in {}: {err}", mods_dir.display());
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir_name = entry.file_name().to_string_lossy();
        if !is_package_dir_name(&dir_name) || dir_name.eq_ignore_ascii_case(BASE_PACKAGE) {
            continue;
        }
        candidates += 1;
        if let Some(installed) = read_installed_mod(entry.path()) {
            mods.push(installed);
        }
    }

    tracing::debug!(
        "Found {} valid installed mods in {candidates} packages",
        mods.len()
    );
    Ok(mods)
}
