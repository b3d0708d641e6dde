use crate::{cancel::CancelToken, config::ModioConfig, error::CatalogError};
use serde::Deserialize;
use std::{
    io::Read,
    sync::{Arc, OnceLock},
    time::Duration,
};

const USER_AGENT: &str = concat!("ccmm/", env!("CARGO_PKG_VERSION"));
const PAGE_LIMIT: u64 = 100;

/// One catalog entry as returned by the last fetch. The icon and image slots
/// are filled at most once, by whichever worker fetches them.
#[derive(Debug, Clone, Default)]
pub struct RemoteModSummary {
    pub id: u64,
    pub name: String,
    pub summary: String,
    pub description: String,
    pub tags: Vec<String>,
    pub downloads: u64,
    pub likes: u64,
    pub dislikes: u64,
    pub updated_at: i64,
    pub icon_url: Option<String>,
    pub image_urls: Vec<String>,
    pub download_url: Option<String>,
    pub profile_url: Option<String>,
    pub icon: OnceLock<Vec<u8>>,
    pub images: OnceLock<Vec<Vec<u8>>>,
}

impl RemoteModSummary {
    pub fn has_tag(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.tags.iter().any(|own| own.to_lowercase() == tag)
    }

    pub fn icon(&self) -> Option<&[u8]> {
        self.icon.get().map(Vec::as_slice)
    }

    pub fn images(&self) -> Option<&[Vec<u8>]> {
        self.images.get().map(Vec::as_slice)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModFile {
    pub id: u64,
    pub version: Option<String>,
    pub filename: String,
    pub filesize: u64,
    pub date_added: i64,
    pub download_url: String,
}

/// The process-local snapshot of the catalog. Replaced wholesale on refresh.
#[derive(Debug, Clone, Default)]
pub struct ModCollection {
    pub mods: Vec<Arc<RemoteModSummary>>,
}

impl ModCollection {
    pub fn from_summaries(mods: Vec<RemoteModSummary>) -> Self {
        Self {
            mods: mods.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn find(&self, id: u64) -> Option<&Arc<RemoteModSummary>> {
        self.mods.iter().find(|summary| summary.id == id)
    }
}

/// Remote mod listing for one game.
pub trait Catalog: Send + Sync {
    /// Fetches every mod of the configured game, in catalog order.
    /// `progress` receives `(fetched, total)` after each page.
    fn list_mods(
        &self,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<RemoteModSummary>, CatalogError>;

    fn get_mod(&self, id: u64) -> Result<RemoteModSummary, CatalogError>;

    /// File releases of a mod, in catalog order.
    fn list_files(&self, id: u64, cancel: &CancelToken) -> Result<Vec<ModFile>, CatalogError>;

    /// Opens a streaming download of `url`.
    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, CatalogError>;

    fn download_file(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        let mut reader = self.open(url)?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|source| CatalogError::Decode {
                url: url.to_string(),
                source,
            })?;
        Ok(bytes)
    }
}

pub struct ModioClient {
    agent: ureq::Agent,
    download_agent: ureq::Agent,
    api_url: String,
    api_key: String,
    game_id: u64,
}

impl ModioClient {
    pub fn new(config: &ModioConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(15))
            .timeout_write(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .build();
        let download_agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(60))
            .timeout_write(Duration::from_secs(60))
            .user_agent(USER_AGENT)
            .build();
        Self {
            agent,
            download_agent,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            game_id: config.game_id,
        }
    }

    fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, CatalogError> {
        let url = format!("{}/games/{}{}", self.api_url, self.game_id, path);
        let mut request = self
            .agent
            .get(&url)
            .set("Accept", "application/json")
            .query("api_key", &self.api_key);
        for (key, value) in query {
            request = request.query(key, value);
        }
        let response = request
            .call()
            .map_err(|err| CatalogError::from_ureq(&url, err))?;
        response
            .into_json()
            .map_err(|source| CatalogError::Decode { url, source })
    }

    /// Walks `_offset` pages of `path` until `result_total` items were seen.
    fn get_all_pages<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<T>, CatalogError> {
        let mut items = Vec::new();
        let mut offset = 0u64;
        loop {
            if cancel.is_cancelled() {
                return Err(CatalogError::Cancelled);
            }
            let page: ModioPage<T> = self.get_json(
                path,
                &[
                    ("_offset", offset.to_string()),
                    ("_limit", PAGE_LIMIT.to_string()),
                ],
            )?;
            let received = page.data.len() as u64;
            items.extend(page.data);
            progress(items.len(), page.result_total as usize);
            tracing::debug!(
                "Fetched {path} at offset {offset}: {received} of {}",
                page.result_total
            );

            offset += received;
            if received == 0 || offset >= page.result_total {
                break;
            }
        }
        Ok(items)
    }
}

impl Catalog for ModioClient {
    fn list_mods(
        &self,
        cancel: &CancelToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<RemoteModSummary>, CatalogError> {
        let mods: Vec<ModioMod> = self.get_all_pages("/mods", cancel, progress)?;
        Ok(mods.into_iter().map(RemoteModSummary::from).collect())
    }

    fn get_mod(&self, id: u64) -> Result<RemoteModSummary, CatalogError> {
        match self.get_json::<ModioMod>(&format!("/mods/{id}"), &[]) {
            Ok(raw) => Ok(raw.into()),
            Err(CatalogError::Status { status: 404, .. }) => Err(CatalogError::NotFound(id)),
            Err(err) => Err(err),
        }
    }

    fn list_files(&self, id: u64, cancel: &CancelToken) -> Result<Vec<ModFile>, CatalogError> {
        let files: Vec<ModioFile> =
            self.get_all_pages(&format!("/mods/{id}/files"), cancel, &mut |_, _| {})?;
        Ok(files.into_iter().map(ModFile::from).collect())
    }

    fn open(&self, url: &str) -> Result<Box<dyn Read + Send>, CatalogError> {
        let response = self
            .download_agent
            .get(url)
            .call()
            .map_err(|err| CatalogError::from_ureq(url, err))?;
        Ok(Box::new(response.into_reader()))
    }
}

#[derive(Debug, Deserialize)]
struct ModioPage<T> {
    data: Vec<T>,
    #[serde(default)]
    result_total: u64,
}

#[derive(Debug, Deserialize)]
struct ModioMod {
    id: u64,
    name: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description_plaintext: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    date_updated: i64,
    #[serde(default)]
    profile_url: Option<String>,
    #[serde(default)]
    logo: Option<ModioLogo>,
    #[serde(default)]
    media: Option<ModioMedia>,
    #[serde(default)]
    modfile: Option<ModioFile>,
    #[serde(default)]
    stats: Option<ModioStats>,
    #[serde(default)]
    tags: Vec<ModioTag>,
}

#[derive(Debug, Deserialize)]
struct ModioLogo {
    #[serde(default)]
    thumb_320x180: Option<String>,
    #[serde(default)]
    original: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ModioMedia {
    #[serde(default)]
    images: Vec<ModioImage>,
}

#[derive(Debug, Deserialize)]
struct ModioImage {
    original: String,
}

#[derive(Debug, Default, Deserialize)]
struct ModioStats {
    #[serde(default)]
    downloads_total: u64,
    #[serde(default)]
    ratings_positive: u64,
    #[serde(default)]
    ratings_negative: u64,
}

#[derive(Debug, Deserialize)]
struct ModioTag {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ModioFile {
    id: u64,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    filename: String,
    #[serde(default)]
    filesize: u64,
    #[serde(default)]
    date_added: i64,
    download: ModioDownload,
}

#[derive(Debug, Deserialize)]
struct ModioDownload {
    binary_url: String,
}

impl From<ModioMod> for RemoteModSummary {
    fn from(raw: ModioMod) -> Self {
        let stats = raw.stats.unwrap_or_default();
        let icon_url = raw
            .logo
            .and_then(|logo| logo.thumb_320x180.or(logo.original));
        let image_urls = raw
            .media
            .unwrap_or_default()
            .images
            .into_iter()
            .map(|image| image.original)
            .collect();
        Self {
            id: raw.id,
            name: raw.name,
            summary: raw.summary.unwrap_or_default(),
            description: raw
                .description_plaintext
                .or(raw.description)
                .unwrap_or_default(),
            tags: raw.tags.into_iter().map(|tag| tag.name).collect(),
            downloads: stats.downloads_total,
            likes: stats.ratings_positive,
            dislikes: stats.ratings_negative,
            updated_at: raw.date_updated,
            icon_url,
            image_urls,
            download_url: raw.modfile.map(|file| file.download.binary_url),
            profile_url: raw.profile_url,
            icon: OnceLock::new(),
            images: OnceLock::new(),
        }
    }
}

impl From<ModioFile> for ModFile {
    fn from(raw: ModioFile) -> Self {
        Self {
            id: raw.id,
            version: raw.version.filter(|version| !version.trim().is_empty()),
            filename: raw.filename,
            filesize: raw.filesize,
            date_added: raw.date_added,
            download_url: raw.download.binary_url,
        }
    }
}
