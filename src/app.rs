use crate::{
    browse::{self, FilterCriteria, SortSpec},
    cancel::CancelToken,
    catalog::{Catalog, ModCollection, ModioClient, RemoteModSummary},
    config::AppConfig,
    error::{CatalogError, InstallError},
    install::{self, InstallLocks, InstallOutcome},
    installed::{self, InstalledMod},
    reconcile,
};
use anyhow::{anyhow, Context, Result};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

const ICON_BATCH: usize = 16;
const WAIT_TICK_MS: u64 = 200;

enum RefreshMessage {
    Progress { fetched: usize, total: usize },
    Completed(ModCollection),
    Failed { error: String },
    Cancelled,
}

enum InstallMessage {
    Finished(InstallOutcome),
    Failed { mod_id: u64, name: String, error: String },
}

enum MediaMessage {
    ImagesReady { mod_id: u64, count: usize },
}

/// What changed during a poll, for the caller to render.
#[derive(Debug, Clone)]
pub enum AppEvent {
    RefreshProgress { fetched: usize, total: usize },
    RefreshCompleted { count: usize },
    RefreshFailed { error: String },
    RefreshCancelled,
    InstallFinished(InstallOutcome),
    InstallFailed { mod_id: u64, name: String, error: String },
    ImagesReady { mod_id: u64, count: usize },
}

pub struct App {
    pub config: AppConfig,
    pub fetch_icons: bool,
    catalog: Arc<dyn Catalog>,
    collection: Arc<ModCollection>,
    installed: Vec<InstalledMod>,
    refresh_active: bool,
    refresh_cancel: Option<CancelToken>,
    refresh_worker: Option<JoinHandle<()>>,
    refresh_tx: Sender<RefreshMessage>,
    refresh_rx: Receiver<RefreshMessage>,
    installs_active: HashMap<u64, CancelToken>,
    install_tx: Sender<InstallMessage>,
    install_rx: Receiver<InstallMessage>,
    install_locks: Arc<InstallLocks>,
    images_active: HashMap<u64, JoinHandle<()>>,
    media_tx: Sender<MediaMessage>,
    media_rx: Receiver<MediaMessage>,
}

impl App {
    /// Builds the controller against mod.io. Missing credentials or a missing
    /// mods directory stop here, before any work is scheduled.
    pub fn initialize(config: AppConfig) -> Result<Self> {
        config.validate_credentials()?;
        config.validate_mods_directory()?;
        let catalog = Arc::new(ModioClient::new(&config.modio));
        Ok(Self::with_catalog(config, catalog))
    }

    /// Local-only controller: the catalog is never contacted unless a refresh
    /// is started, so no API key is needed.
    pub fn initialize_offline(config: AppConfig) -> Result<Self> {
        config.validate_mods_directory()?;
        let catalog = Arc::new(ModioClient::new(&config.modio));
        Ok(Self::with_catalog(config, catalog))
    }

    pub fn with_catalog(config: AppConfig, catalog: Arc<dyn Catalog>) -> Self {
        let (refresh_tx, refresh_rx) = mpsc::channel();
        let (install_tx, install_rx) = mpsc::channel();
        let (media_tx, media_rx) = mpsc::channel();
        Self {
            config,
            fetch_icons: true,
            catalog,
            collection: Arc::new(ModCollection::default()),
            installed: Vec::new(),
            refresh_active: false,
            refresh_cancel: None,
            refresh_worker: None,
            refresh_tx,
            refresh_rx,
            installs_active: HashMap::new(),
            install_tx,
            install_rx,
            install_locks: Arc::new(InstallLocks::default()),
            images_active: HashMap::new(),
            media_tx,
            media_rx,
        }
    }

    pub fn mods_dir(&self) -> PathBuf {
        self.config.mods_directory.clone()
    }

    /// Current catalog snapshot. Never changes under a caller that holds it.
    pub fn snapshot(&self) -> Arc<ModCollection> {
        self.collection.clone()
    }

    pub fn installed(&self) -> &[InstalledMod] {
        &self.installed
    }

    pub fn refresh_active(&self) -> bool {
        self.refresh_active
    }

    pub fn browse(&self, criteria: &FilterCriteria, spec: SortSpec) -> Vec<Arc<RemoteModSummary>> {
        browse::apply(&self.collection.mods, criteria, spec)
    }

    /// Starts a background catalog fetch. Returns `false` without doing
    /// anything while another refresh is still running.
    pub fn start_catalog_refresh(&mut self) -> bool {
        if self.refresh_active {
            tracing::debug!("Catalog refresh already running");
            return false;
        }
        self.refresh_active = true;
        let cancel = CancelToken::new();
        self.refresh_cancel = Some(cancel.clone());
        tracing::info!("Catalog refresh started");

        let catalog = self.catalog.clone();
        let tx = self.refresh_tx.clone();
        let fetch_icons = self.fetch_icons;
        self.refresh_worker = Some(thread::spawn(move || {
            let mut progress = |fetched: usize, total: usize| {
                let _ = tx.send(RefreshMessage::Progress { fetched, total });
            };
            let message = match catalog.list_mods(&cancel, &mut progress) {
                Ok(mods) => {
                    let collection = ModCollection::from_summaries(mods);
                    if fetch_icons {
                        fetch_icons_blocking(catalog.as_ref(), &collection, &cancel);
                    }
                    if cancel.is_cancelled() {
                        RefreshMessage::Cancelled
                    } else {
                        RefreshMessage::Completed(collection)
                    }
                }
                Err(CatalogError::Cancelled) => RefreshMessage::Cancelled,
                Err(err) => RefreshMessage::Failed {
                    error: err.to_string(),
                },
            };
            let _ = tx.send(message);
        }));
        true
    }

    pub fn cancel_refresh(&mut self) {
        if let Some(cancel) = &self.refresh_cancel {
            tracing::info!("Cancelling catalog refresh");
            cancel.cancel();
        }
    }

    pub fn poll_catalog_refresh(&mut self) -> Vec<AppEvent> {
        let mut events = Vec::new();
        loop {
            match self.refresh_rx.try_recv() {
                Ok(message) => events.push(self.apply_refresh_message(message)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.finish_refresh();
                    break;
                }
            }
        }
        events
    }

    /// Blocks until the running refresh (if any) reports back.
    pub fn wait_for_refresh(&mut self) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while self.refresh_active {
            match self
                .refresh_rx
                .recv_timeout(Duration::from_millis(WAIT_TICK_MS))
            {
                Ok(message) => events.push(self.apply_refresh_message(message)),
                Err(RecvTimeoutError::Timeout) => {
                    let finished = self
                        .refresh_worker
                        .as_ref()
                        .map_or(true, |worker| worker.is_finished());
                    if finished {
                        events.extend(self.poll_catalog_refresh());
                        if self.refresh_active {
                            let error = "catalog worker exited without a result".to_string();
                            tracing::error!("{error}");
                            self.finish_refresh();
                            events.push(AppEvent::RefreshFailed { error });
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => self.finish_refresh(),
            }
        }
        events
    }

    fn apply_refresh_message(&mut self, message: RefreshMessage) -> AppEvent {
        match message {
            RefreshMessage::Progress { fetched, total } => {
                AppEvent::RefreshProgress { fetched, total }
            }
            RefreshMessage::Completed(collection) => {
                self.finish_refresh();
                self.collection = Arc::new(collection);
                let count = self.collection.len();
                tracing::info!("Catalog refresh finished: {count} mods");
                if !self.installed.is_empty() {
                    reconcile::reconcile(&mut self.installed, &self.collection);
                }
                AppEvent::RefreshCompleted { count }
            }
            RefreshMessage::Failed { error } => {
                self.finish_refresh();
                tracing::warn!("Catalog refresh failed: {error}");
                AppEvent::RefreshFailed { error }
            }
            RefreshMessage::Cancelled => {
                self.finish_refresh();
                tracing::info!("Catalog refresh cancelled");
                AppEvent::RefreshCancelled
            }
        }
    }

    fn finish_refresh(&mut self) {
        self.refresh_active = false;
        self.refresh_cancel = None;
        if let Some(worker) = self.refresh_worker.take() {
            if worker.is_finished() {
                let _ = worker.join();
            }
        }
    }

    /// Rescans the mods directory and links the result to the current snapshot.
    pub fn rescan_installed(&mut self) -> Result<&[InstalledMod]> {
        let mods_dir = self.config.validate_mods_directory()?.to_path_buf();
        let mut mods = installed::scan_mods_dir(&mods_dir)?;
        if !self.collection.is_empty() {
            let linked = reconcile::reconcile(&mut mods, &self.collection);
            tracing::info!("Linked {linked} of {} installed mods to mod.io", mods.len());
        }
        self.installed = mods;
        Ok(&self.installed)
    }

    /// Looks a mod up in the snapshot, falling back to a single fetch on a
    /// worker thread.
    pub fn resolve_mod(&self, id: u64) -> Result<Arc<RemoteModSummary>> {
        if let Some(found) = self.collection.find(id) {
            return Ok(found.clone());
        }
        let catalog = self.catalog.clone();
        let worker = thread::spawn(move || catalog.get_mod(id));
        let summary = worker
            .join()
            .map_err(|_| anyhow!("mod lookup worker panicked"))?
            .with_context(|| format!("look up mod {id}"))?;
        Ok(Arc::new(summary))
    }

    /// Queues an install on its own worker. Returns `false` if this mod is
    /// already being installed.
    pub fn start_install(&mut self, summary: Arc<RemoteModSummary>) -> bool {
        if self.installs_active.contains_key(&summary.id) {
            tracing::debug!("Install of {} already running", summary.name);
            return false;
        }
        let cancel = CancelToken::new();
        self.installs_active.insert(summary.id, cancel.clone());
        tracing::info!("Installing {} ({})", summary.name, summary.id);

        let catalog = self.catalog.clone();
        let locks = self.install_locks.clone();
        let mods_dir = self.mods_dir();
        let tx = self.install_tx.clone();
        thread::spawn(move || {
            let result =
                install::install_mod(catalog.as_ref(), &summary, &mods_dir, &locks, &cancel);
            let message = match result {
                Ok(outcome) => InstallMessage::Finished(outcome),
                Err(err) => InstallMessage::Failed {
                    mod_id: summary.id,
                    name: summary.name.clone(),
                    error: describe_install_error(&err),
                },
            };
            let _ = tx.send(message);
        });
        true
    }

    pub fn installs_active(&self) -> usize {
        self.installs_active.len()
    }

    pub fn cancel_installs(&mut self) {
        for cancel in self.installs_active.values() {
            cancel.cancel();
        }
    }

    pub fn poll_installs(&mut self) -> Vec<AppEvent> {
        let mut events = Vec::new();
        loop {
            match self.install_rx.try_recv() {
                Ok(message) => events.push(self.apply_install_message(message)),
                Err(_) => break,
            }
        }
        self.after_installs(&events);
        events
    }

    pub fn wait_for_installs(&mut self) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while !self.installs_active.is_empty() {
            match self.install_rx.recv() {
                Ok(message) => events.push(self.apply_install_message(message)),
                Err(_) => {
                    self.installs_active.clear();
                    break;
                }
            }
        }
        self.after_installs(&events);
        events
    }

    fn apply_install_message(&mut self, message: InstallMessage) -> AppEvent {
        match message {
            InstallMessage::Finished(outcome) => {
                self.installs_active.remove(&outcome.mod_id);
                AppEvent::InstallFinished(outcome)
            }
            InstallMessage::Failed {
                mod_id,
                name,
                error,
            } => {
                self.installs_active.remove(&mod_id);
                tracing::warn!("Install of {name} failed: {error}");
                AppEvent::InstallFailed {
                    mod_id,
                    name,
                    error,
                }
            }
        }
    }

    fn after_installs(&mut self, events: &[AppEvent]) {
        let any_installed = events
            .iter()
            .any(|event| matches!(event, AppEvent::InstallFinished(_)));
        if any_installed {
            if let Err(err) = self.rescan_installed() {
                tracing::warn!("Rescan after install failed: {err:#}");
            }
        }
    }

    /// Fetches the gallery images of one mod into its `images` slot.
    pub fn start_image_fetch(&mut self, summary: Arc<RemoteModSummary>) -> bool {
        if summary.images().is_some() || self.images_active.contains_key(&summary.id) {
            return false;
        }
        let catalog = self.catalog.clone();
        let tx = self.media_tx.clone();
        let mod_id = summary.id;
        let worker = thread::spawn(move || {
            let mut images = Vec::new();
            for url in &summary.image_urls {
                match catalog.download_file(url) {
                    Ok(bytes) => images.push(bytes),
                    Err(err) => tracing::warn!("Image for {} failed: {err}", summary.name),
                }
            }
            let count = images.len();
            let _ = summary.images.set(images);
            let _ = tx.send(MediaMessage::ImagesReady { mod_id, count });
        });
        self.images_active.insert(mod_id, worker);
        true
    }

    pub fn wait_for_images(&mut self) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while !self.images_active.is_empty() {
            match self.media_rx.recv() {
                Ok(message) => events.push(self.apply_media_message(message)),
                Err(_) => break,
            }
        }
        events
    }

    fn apply_media_message(&mut self, message: MediaMessage) -> AppEvent {
        match message {
            MediaMessage::ImagesReady { mod_id, count } => {
                if let Some(worker) = self.images_active.remove(&mod_id) {
                    let _ = worker.join();
                }
                AppEvent::ImagesReady { mod_id, count }
            }
        }
    }
}

/// Fetches icons in batches of scoped workers and returns once every worker
/// has finished. Each worker only writes its own mod's slot.
fn fetch_icons_blocking(catalog: &dyn Catalog, collection: &ModCollection, cancel: &CancelToken) {
    let pending: Vec<&Arc<RemoteModSummary>> = collection
        .mods
        .iter()
        .filter(|summary| summary.icon_url.is_some() && summary.icon().is_none())
        .collect();
    for batch in pending.chunks(ICON_BATCH) {
        if cancel.is_cancelled() {
            return;
        }
        thread::scope(|scope| {
            for summary in batch {
                scope.spawn(move || {
                    let Some(url) = summary.icon_url.as_deref() else {
                        return;
                    };
                    match catalog.download_file(url) {
                        Ok(bytes) => {
                            let _ = summary.icon.set(bytes);
                        }
                        Err(err) => tracing::warn!("Icon for {} failed: {err}", summary.name),
                    }
                });
            }
        });
    }
    tracing::debug!("Fetched icons for {} mods", pending.len());
}

fn describe_install_error(err: &InstallError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = std::error::Error::source(inner);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        browse::SortKey,
        catalog::testing::{file, summary, FakeCatalog, Gate},
    };
    use std::{fs, io::Write};
    use tempfile::TempDir;

    fn config(mods_dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::with_defaults(mods_dir.join("config.json"));
        config.mods_directory = mods_dir.to_path_buf();
        config.modio.api_key = "test".to_string();
        config
    }

    fn refresh(app: &mut App) -> Result<usize> {
        app.start_catalog_refresh();
        for event in app.wait_for_refresh() {
            match event {
                AppEvent::RefreshFailed { error } => return Err(anyhow!("refresh failed: {error}")),
                AppEvent::RefreshCancelled => return Err(anyhow!("refresh cancelled")),
                _ => {}
            }
        }
        Ok(app.snapshot().len())
    }

    fn catalog_with(names: &[&str]) -> FakeCatalog {
        FakeCatalog::with_mods(
            names
                .iter()
                .enumerate()
                .map(|(index, name)| summary(index as u64 + 1, name, &["Weapons"]))
                .collect(),
        )
    }

    fn zip_with_package(package: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        writer
            .start_file(
                format!("{package}/index.ini"),
                zip::write::SimpleFileOptions::default(),
            )
            .expect("start file");
        writer
            .write_all(b"ModuleName = Packaged\n")
            .expect("write file");
        writer.finish().expect("finish zip").into_inner()
    }

    #[test]
    fn refresh_replaces_snapshot_and_relinks_installed() {
        let temp = TempDir::new().expect("temp dir");
        let package = temp.path().join("Foo.rte");
        fs::create_dir_all(&package).expect("create package");
        fs::write(package.join("index.ini"), "ModuleName = FooMod\n").expect("write index");

        let catalog = Arc::new(catalog_with(&["Other", "FooMod Extended"]));
        let mut app = App::with_catalog(config(temp.path()), catalog);
        app.rescan_installed().expect("scan");
        assert!(app.installed()[0].linked_remote.is_none());

        assert_eq!(refresh(&mut app).expect("refresh"), 2);
        assert!(!app.refresh_active());
        let linked = app.installed()[0].linked_remote.as_ref().expect("linked");
        assert_eq!(linked.name, "FooMod Extended");
    }

    #[test]
    fn refresh_is_single_flight_and_filters_read_previous_snapshot() {
        let temp = TempDir::new().expect("temp dir");
        let gate = Arc::new(Gate::default());
        let mut fake = catalog_with(&["Alpha", "Beta"]);
        fake.gate = Some(gate.clone());
        let fake = Arc::new(fake);
        let mut app = App::with_catalog(config(temp.path()), fake.clone());

        assert!(app.start_catalog_refresh());
        assert!(!app.start_catalog_refresh());
        assert!(app.refresh_active());
        // Still the empty pre-refresh snapshot while the fetch is blocked.
        let during = app.browse(&FilterCriteria::default(), SortSpec::default());
        assert!(during.is_empty());
        assert!(app.poll_catalog_refresh().is_empty());

        gate.open();
        let events = app.wait_for_refresh();
        assert!(events
            .iter()
            .any(|event| matches!(event, AppEvent::RefreshCompleted { count: 2 })));
        assert_eq!(fake.list_calls(), 1);

        let sorted = app.browse(
            &FilterCriteria::default(),
            SortSpec::new(SortKey::Name, true),
        );
        let names: Vec<&str> = sorted.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Beta", "Alpha"]);

        assert!(app.start_catalog_refresh());
        app.wait_for_refresh();
        assert_eq!(fake.list_calls(), 2);
    }

    #[test]
    fn held_snapshot_survives_refresh() {
        let temp = TempDir::new().expect("temp dir");
        let mut app = App::with_catalog(config(temp.path()), Arc::new(catalog_with(&["One"])));
        refresh(&mut app).expect("first refresh");
        let before = app.snapshot();
        refresh(&mut app).expect("second refresh");
        assert_eq!(before.len(), 1);
        assert!(!Arc::ptr_eq(&before, &app.snapshot()));
    }

    #[test]
    fn cancelled_refresh_keeps_previous_snapshot() {
        let temp = TempDir::new().expect("temp dir");
        let gate = Arc::new(Gate::default());
        let mut fake = catalog_with(&["Alpha"]);
        fake.gate = Some(gate.clone());
        let mut app = App::with_catalog(config(temp.path()), Arc::new(fake));

        assert!(app.start_catalog_refresh());
        app.cancel_refresh();
        gate.open();
        let events = app.wait_for_refresh();
        assert!(events
            .iter()
            .any(|event| matches!(event, AppEvent::RefreshCancelled)));
        assert!(app.snapshot().is_empty());
        assert!(!app.refresh_active());
    }

    #[test]
    fn refresh_fetches_icons_and_isolates_failures() {
        let temp = TempDir::new().expect("temp dir");
        let mut fake = catalog_with(&["With Icon", "Broken Icon", "No Icon"]);
        fake.mods[0].icon_url = Some("https://cdn/icon1.png".to_string());
        fake.mods[1].icon_url = Some("https://cdn/missing.png".to_string());
        fake.payloads
            .insert("https://cdn/icon1.png".to_string(), vec![0x89, b'P', b'N', b'G']);
        let mut app = App::with_catalog(config(temp.path()), Arc::new(fake));

        refresh(&mut app).expect("refresh");
        let snapshot = app.snapshot();
        assert_eq!(snapshot.mods[0].icon(), Some(&[0x89, b'P', b'N', b'G'][..]));
        assert!(snapshot.mods[1].icon().is_none());
        assert!(snapshot.mods[2].icon().is_none());
    }

    #[test]
    fn every_icon_batch_finishes_before_the_snapshot_is_published() {
        let temp = TempDir::new().expect("temp dir");
        let names: Vec<String> = (0..ICON_BATCH * 2 + 3).map(|n| format!("Mod {n}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let mut fake = catalog_with(&refs);
        for summary in &mut fake.mods {
            let url = format!("https://cdn/icon{}.png", summary.id);
            fake.payloads.insert(url.clone(), summary.id.to_le_bytes().to_vec());
            summary.icon_url = Some(url);
        }
        let mut app = App::with_catalog(config(temp.path()), Arc::new(fake));

        assert_eq!(refresh(&mut app).expect("refresh"), ICON_BATCH * 2 + 3);
        for summary in &app.snapshot().mods {
            assert_eq!(summary.icon(), Some(&summary.id.to_le_bytes()[..]));
        }
    }

    #[test]
    fn concurrent_installs_report_independently() {
        let temp = TempDir::new().expect("temp dir");
        let mut fake = catalog_with(&["Good Mod", "Bad Mod"]);
        fake.files.insert(1, vec![file(10, Some("2.0"), "https://dl/good")]);
        fake.files.insert(2, vec![file(20, Some("1.0"), "https://dl/bad")]);
        fake.payloads
            .insert("https://dl/good".to_string(), zip_with_package("Good.rte"));
        let fake = Arc::new(fake);
        let mut app = App::with_catalog(config(temp.path()), fake.clone());

        let good = Arc::new(fake.mods[0].clone());
        let bad = Arc::new(fake.mods[1].clone());
        assert!(app.start_install(good.clone()));
        assert!(!app.start_install(good));
        assert!(app.start_install(bad));
        assert_eq!(app.installs_active(), 2);

        let events = app.wait_for_installs();
        assert_eq!(app.installs_active(), 0);
        assert!(events.iter().any(|event| matches!(
            event,
            AppEvent::InstallFinished(outcome) if outcome.mod_id == 1 && outcome.version == "2.0"
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            AppEvent::InstallFailed { mod_id: 2, .. }
        )));
        assert_eq!(app.installed().len(), 1);
        assert_eq!(app.installed()[0].name, "Good Mod");
    }

    #[test]
    fn image_fetch_fills_slot_once() {
        let temp = TempDir::new().expect("temp dir");
        let mut fake = catalog_with(&["Gallery"]);
        fake.mods[0].image_urls = vec![
            "https://cdn/a.png".to_string(),
            "https://cdn/gone.png".to_string(),
        ];
        fake.payloads
            .insert("https://cdn/a.png".to_string(), vec![1, 2, 3]);
        let mut app = App::with_catalog(config(temp.path()), Arc::new(fake));
        refresh(&mut app).expect("refresh");

        let gallery = app.resolve_mod(1).expect("resolve");
        assert!(app.start_image_fetch(gallery.clone()));
        let events = app.wait_for_images();
        assert!(matches!(
            events.as_slice(),
            [AppEvent::ImagesReady { mod_id: 1, count: 1 }]
        ));
        assert_eq!(gallery.images().map(|images| images.len()), Some(1));
        assert!(!app.start_image_fetch(gallery));
    }

    #[test]
    fn resolve_mod_falls_back_to_catalog_lookup() {
        let temp = TempDir::new().expect("temp dir");
        let app = App::with_catalog(config(temp.path()), Arc::new(catalog_with(&["Solo"])));
        assert_eq!(app.resolve_mod(1).expect("lookup").name, "Solo");
        assert!(app.resolve_mod(99).is_err());
    }

    #[test]
    fn initialize_rejects_missing_credentials_and_dir() {
        let temp = TempDir::new().expect("temp dir");
        let mut cfg = config(temp.path());
        cfg.modio.api_key.clear();
        assert!(App::initialize(cfg).is_err());

        let mut cfg = config(temp.path());
        cfg.mods_directory = temp.path().join("missing");
        assert!(App::initialize(cfg).is_err());
    }
}
