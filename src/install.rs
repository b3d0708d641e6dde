use crate::{
    cancel::CancelToken,
    catalog::{Catalog, RemoteModSummary},
    error::{CatalogError, InstallError},
    installed::{self, Sidecar, UNKNOWN},
};
use filetime::{set_file_mtime, FileTime};
use std::{
    collections::HashSet,
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Condvar, Mutex,
    },
    time::{SystemTime, UNIX_EPOCH},
};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub mod_id: u64,
    pub name: String,
    pub version: String,
    pub package_dir: PathBuf,
    pub replaced: bool,
    pub bytes: u64,
}

/// Serialises commits into the same package directory.
#[derive(Debug, Default)]
pub struct InstallLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

pub struct InstallLockGuard<'a> {
    locks: &'a InstallLocks,
    key: String,
}

impl InstallLocks {
    pub fn lock(&self, package: &str) -> InstallLockGuard<'_> {
        let key = package.to_ascii_lowercase();
        let mut held = self.held.lock().unwrap_or_else(|poison| poison.into_inner());
        while held.contains(&key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poison| poison.into_inner());
        }
        held.insert(key.clone());
        InstallLockGuard { locks: self, key }
    }
}

impl Drop for InstallLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        held.remove(&self.key);
        self.locks.released.notify_all();
    }
}

/// Downloads the newest file release of `summary` and installs its package
/// into `mods_dir`. On any error the mods directory is left as it was.
pub fn install_mod(
    catalog: &dyn Catalog,
    summary: &RemoteModSummary,
    mods_dir: &Path,
    locks: &InstallLocks,
    cancel: &CancelToken,
) -> Result<InstallOutcome, InstallError> {
    if !mods_dir.is_dir() {
        return Err(InstallError::Io {
            context: format!("mods directory {}", mods_dir.display()),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
    }
    if cancel.is_cancelled() {
        return Err(InstallError::Cancelled);
    }

    let files = catalog.list_files(summary.id, cancel)?;
    // Catalog order is taken as chronological; the last release is the newest.
    let file = files.last().ok_or(InstallError::NoFiles(summary.id))?;
    let version = file.version.clone().unwrap_or_else(|| UNKNOWN.to_string());
    tracing::debug!(
        "Installing {} ({}) file {} ({}, {} bytes, added {}) version {version}",
        summary.name,
        summary.id,
        file.id,
        file.filename,
        file.filesize,
        file.date_added
    );

    let archive_path = make_temp_path(mods_dir, summary.id, "zip.part");
    let stage_dir = make_temp_path(mods_dir, summary.id, "stage");
    let result = install_release(
        catalog,
        summary,
        &file.download_url,
        &version,
        mods_dir,
        &archive_path,
        &stage_dir,
        locks,
        cancel,
    );
    let _ = fs::remove_file(&archive_path);
    let _ = fs::remove_dir_all(&stage_dir);
    tracing::debug!("Removed temporary archive for {}", summary.name);
    result
}

#[allow(clippy::too_many_arguments)]
fn install_release(
    catalog: &dyn Catalog,
    summary: &RemoteModSummary,
    url: &str,
    version: &str,
    mods_dir: &Path,
    archive_path: &Path,
    stage_dir: &Path,
    locks: &InstallLocks,
    cancel: &CancelToken,
) -> Result<InstallOutcome, InstallError> {
    let bytes = download_archive(catalog, url, archive_path, cancel)?;
    if bytes == 0 {
        return Err(InstallError::EmptyArchive(summary.name.clone()));
    }
    tracing::debug!("Downloaded {bytes} bytes for {}", summary.name);

    fs::create_dir_all(stage_dir).map_err(InstallError::io("create staging dir"))?;
    let package = extract_package(archive_path, stage_dir, &summary.name, cancel)?;
    let staged = stage_dir.join(&package);

    let sidecar = Sidecar {
        name: Some(summary.name.clone()),
        version: Some(version.to_string()),
        tags: summary.tags.clone(),
    };
    installed::write_sidecar(&staged, &sidecar).map_err(InstallError::io("write ccmm.json"))?;

    if cancel.is_cancelled() {
        return Err(InstallError::Cancelled);
    }

    let _guard = locks.lock(&package);
    let package_dir = mods_dir.join(&package);
    let replaced = commit_package(&staged, &package_dir, mods_dir, summary.id)?;
    tracing::info!(
        "Installed {} {version} to {}",
        summary.name,
        package_dir.display()
    );

    Ok(InstallOutcome {
        mod_id: summary.id,
        name: summary.name.clone(),
        version: version.to_string(),
        package_dir,
        replaced,
        bytes,
    })
}

fn download_archive(
    catalog: &dyn Catalog,
    url: &str,
    path: &Path,
    cancel: &CancelToken,
) -> Result<u64, InstallError> {
    let mut reader = catalog.open(url)?;
    let mut file = File::create(path).map_err(InstallError::io("create archive file"))?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(InstallError::Download(CatalogError::Decode {
                    url: url.to_string(),
                    source,
                }))
            }
        };
        file.write_all(&buffer[..read])
            .map_err(InstallError::io("write archive file"))?;
        total += read as u64;
    }
    file.sync_all().map_err(InstallError::io("flush archive file"))?;
    Ok(total)
}

/// Extracts the first top-level `*.rte` directory of the archive into
/// `stage_dir` and returns its name. Other top-level entries, including a
/// bundled `Base.rte`, are ignored.
fn extract_package(
    archive_path: &Path,
    stage_dir: &Path,
    label: &str,
    cancel: &CancelToken,
) -> Result<String, InstallError> {
    let archive_err = |source: zip::result::ZipError| InstallError::Archive {
        path: archive_path.to_path_buf(),
        source,
    };
    let file = File::open(archive_path).map_err(InstallError::io("open archive"))?;
    let mut archive = zip::ZipArchive::new(file).map_err(archive_err)?;

    let mut package = None;
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(archive_err)?;
        let Some(path) = entry.enclosed_name() else {
            continue;
        };
        if let Some(name) = top_level_package(&path, entry.is_dir()) {
            package = Some(name);
            break;
        }
    }
    let package = package.ok_or_else(|| InstallError::MissingPackage(label.to_string()))?;

    for i in 0..archive.len() {
        if cancel.is_cancelled() {
            return Err(InstallError::Cancelled);
        }
        let mut entry = archive.by_index(i).map_err(archive_err)?;
        let Some(rel_path) = entry.enclosed_name() else {
            tracing::warn!("Skipping unsafe archive entry {}", entry.name());
            continue;
        };
        if !rel_path.starts_with(&package) {
            continue;
        }

        let out_path = stage_dir.join(&rel_path);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(InstallError::io("create package dir"))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).map_err(InstallError::io("create package dir"))?;
        }
        let mut out_file =
            File::create(&out_path).map_err(InstallError::io("write package file"))?;
        io::copy(&mut entry, &mut out_file).map_err(InstallError::io("extract package file"))?;
        if let Some(mtime) = entry.last_modified().and_then(zip_time_to_unix) {
            let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
        }
    }

    let staged = stage_dir.join(&package);
    if !staged.is_dir() {
        return Err(InstallError::MissingPackage(label.to_string()));
    }
    tracing::debug!("Extracted {package} from {}", archive_path.display());
    Ok(package)
}

fn top_level_package(path: &Path, is_dir: bool) -> Option<String> {
    let mut components = path.components();
    let first = components.next()?.as_os_str().to_string_lossy().to_string();
    let nested = components.next().is_some();
    let reserved = first.eq_ignore_ascii_case(installed::BASE_PACKAGE);
    if (nested || is_dir) && installed::is_package_dir_name(&first) && !reserved {
        Some(first)
    } else {
        None
    }
}

/// Swaps the staged package into place, keeping the previous copy until the
/// rename succeeded.
fn commit_package(
    staged: &Path,
    dest: &Path,
    mods_dir: &Path,
    mod_id: u64,
) -> Result<bool, InstallError> {
    let backup = if dest.exists() {
        let backup = make_temp_path(mods_dir, mod_id, "replaced");
        fs::rename(dest, &backup).map_err(InstallError::io("move previous package aside"))?;
        Some(backup)
    } else {
        None
    };

    if let Err(source) = fs::rename(staged, dest) {
        if let Some(backup) = &backup {
            let _ = fs::rename(backup, dest);
        }
        return Err(InstallError::Io {
            context: format!("move package into {}", dest.display()),
            source,
        });
    }

    if let Some(backup) = &backup {
        if let Err(err) = fs::remove_dir_all(backup) {
            tracing::warn!("Could not remove previous package {}: {err}", backup.display());
        }
    }
    Ok(backup.is_some())
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn make_temp_path(mods_dir: &Path, mod_id: u64, suffix: &str) -> PathBuf {
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    mods_dir.join(format!(".ccmm-{mod_id}-{nanos}-{counter}.{suffix}"))
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc().unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        catalog::testing::{file, summary, FakeCatalog},
        installed::{scan_mods_dir, SIDECAR_FILE},
    };
    use std::{io::Cursor, sync::mpsc, thread, time::Duration};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        for (name, body) in entries {
            if name.ends_with('/') {
                writer.add_directory(*name, options).expect("add dir");
            } else {
                writer.start_file(*name, options).expect("start file");
                writer.write_all(body.as_bytes()).expect("write file");
            }
        }
        writer.finish().expect("finish zip").into_inner()
    }

    fn bar_catalog(payload: Vec<u8>) -> FakeCatalog {
        let mut catalog = FakeCatalog::with_mods(vec![summary(
            42,
            "Bar Armory",
            &["Weapons", "Tech"],
        )]);
        catalog.files.insert(
            42,
            vec![file(1, Some("1.0"), "https://dl/old"), file(2, Some("1.1"), "https://dl/new")],
        );
        catalog.payloads.insert("https://dl/new".to_string(), payload);
        catalog
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    fn run(catalog: &FakeCatalog, mods_dir: &Path) -> Result<InstallOutcome, InstallError> {
        let summary = catalog.mods[0].clone();
        install_mod(
            catalog,
            &summary,
            mods_dir,
            &InstallLocks::default(),
            &CancelToken::new(),
        )
    }

    #[test]
    fn installs_package_with_sidecar_and_removes_archive() {
        let temp = TempDir::new().expect("temp dir");
        let payload = build_zip(&[
            ("Bar.rte/", ""),
            ("Bar.rte/index.ini", "DataModule\n\tModuleName = Bar\n\tVersion = 0.9\n"),
            ("Bar.rte/Devices/Rifle.ini", "AddDevice = HDFirearm\n"),
            ("README.txt", "not part of the package"),
        ]);
        let catalog = bar_catalog(payload);

        let outcome = run(&catalog, temp.path()).expect("install");
        assert_eq!(outcome.version, "1.1");
        assert!(!outcome.replaced);
        assert_eq!(outcome.package_dir, temp.path().join("Bar.rte"));
        assert_eq!(entries(temp.path()), vec!["Bar.rte"]);
        assert!(temp.path().join("Bar.rte/Devices/Rifle.ini").is_file());

        let raw = fs::read_to_string(temp.path().join("Bar.rte").join(SIDECAR_FILE))
            .expect("read sidecar");
        let sidecar: Sidecar = serde_json::from_str(&raw).expect("parse sidecar");
        assert_eq!(sidecar.name.as_deref(), Some("Bar Armory"));
        assert_eq!(sidecar.version.as_deref(), Some("1.1"));
        assert_eq!(sidecar.tags, vec!["Weapons", "Tech"]);

        let mods = scan_mods_dir(temp.path()).expect("scan");
        assert_eq!(mods.len(), 1);
        assert_eq!((mods[0].name.as_str(), mods[0].version.as_str()), ("Bar Armory", "1.1"));
    }

    #[test]
    fn package_without_directory_entries_is_found_from_file_paths() {
        let temp = TempDir::new().expect("temp dir");
        let catalog = bar_catalog(build_zip(&[("Bar.rte/index.ini", "ModuleName = Bar\n")]));
        run(&catalog, temp.path()).expect("install");
        assert!(temp.path().join("Bar.rte/index.ini").is_file());
    }

    #[test]
    fn missing_version_resolves_to_unknown() {
        let temp = TempDir::new().expect("temp dir");
        let mut catalog = bar_catalog(build_zip(&[("Bar.rte/index.ini", "ModuleName = Bar\n")]));
        catalog
            .files
            .insert(42, vec![file(3, None, "https://dl/new")]);
        let outcome = run(&catalog, temp.path()).expect("install");
        assert_eq!(outcome.version, UNKNOWN);
    }

    #[test]
    fn replaces_existing_package() {
        let temp = TempDir::new().expect("temp dir");
        let old = temp.path().join("Bar.rte");
        fs::create_dir_all(&old).expect("create old");
        fs::write(old.join("Stale.ini"), "old").expect("write stale");

        let catalog = bar_catalog(build_zip(&[("Bar.rte/index.ini", "ModuleName = Bar\n")]));
        let outcome = run(&catalog, temp.path()).expect("install");
        assert!(outcome.replaced);
        assert!(!old.join("Stale.ini").exists());
        assert_eq!(entries(temp.path()), vec!["Bar.rte"]);
    }

    #[test]
    fn archive_without_package_leaves_no_trace() {
        let temp = TempDir::new().expect("temp dir");
        let catalog = bar_catalog(build_zip(&[
            ("Bar/index.ini", "ModuleName = Bar\n"),
            ("Loose.rte", "a file, not a directory"),
        ]));
        let err = run(&catalog, temp.path()).expect_err("no package");
        assert!(matches!(err, InstallError::MissingPackage(_)));
        assert!(entries(temp.path()).is_empty());
    }

    #[test]
    fn bundled_base_package_is_never_installed() {
        let temp = TempDir::new().expect("temp dir");
        let base = temp.path().join("Base.rte");
        fs::create_dir_all(&base).expect("create base");
        fs::write(base.join("Core.ini"), "game data").expect("write core");

        let catalog = bar_catalog(build_zip(&[("base.RTE/index.ini", "ModuleName = Base\n")]));
        let err = run(&catalog, temp.path()).expect_err("base only");
        assert!(matches!(err, InstallError::MissingPackage(_)));
        assert!(base.join("Core.ini").is_file());
        assert_eq!(entries(temp.path()), vec!["Base.rte"]);

        let catalog = bar_catalog(build_zip(&[
            ("Base.rte/index.ini", "ModuleName = Base\n"),
            ("Bar.rte/index.ini", "ModuleName = Bar\n"),
        ]));
        let outcome = run(&catalog, temp.path()).expect("install");
        assert_eq!(outcome.package_dir, temp.path().join("Bar.rte"));
        assert!(base.join("Core.ini").is_file());
        assert!(!base.join(SIDECAR_FILE).exists());
    }

    #[test]
    fn network_failure_leaves_no_trace() {
        let temp = TempDir::new().expect("temp dir");
        let mut catalog = bar_catalog(Vec::new());
        catalog.payloads.clear();
        let err = run(&catalog, temp.path()).expect_err("network down");
        assert!(matches!(err, InstallError::Download(_)));
        assert!(entries(temp.path()).is_empty());
    }

    #[test]
    fn empty_or_corrupt_archives_are_rejected() {
        let temp = TempDir::new().expect("temp dir");
        let err = run(&bar_catalog(Vec::new()), temp.path()).expect_err("empty");
        assert!(matches!(err, InstallError::EmptyArchive(_)));
        assert!(entries(temp.path()).is_empty());

        let err = run(&bar_catalog(b"definitely not a zip".to_vec()), temp.path())
            .expect_err("corrupt");
        assert!(matches!(err, InstallError::Archive { .. }));
        assert!(entries(temp.path()).is_empty());
    }

    #[test]
    fn mod_without_files_fails() {
        let temp = TempDir::new().expect("temp dir");
        let mut catalog = bar_catalog(Vec::new());
        catalog.files.clear();
        let err = run(&catalog, temp.path()).expect_err("no files");
        assert!(matches!(err, InstallError::NoFiles(42)));
    }

    #[test]
    fn cancelled_install_leaves_no_trace() {
        let temp = TempDir::new().expect("temp dir");
        let catalog = bar_catalog(build_zip(&[("Bar.rte/index.ini", "ModuleName = Bar\n")]));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = install_mod(
            &catalog,
            &catalog.mods[0],
            temp.path(),
            &InstallLocks::default(),
            &cancel,
        )
        .expect_err("cancelled");
        assert!(matches!(err, InstallError::Cancelled));
        assert!(entries(temp.path()).is_empty());
    }

    #[test]
    fn install_locks_serialise_same_package() {
        let locks = std::sync::Arc::new(InstallLocks::default());
        let guard = locks.lock("Bar.rte");
        let (tx, rx) = mpsc::channel();
        let worker_locks = locks.clone();
        let worker = thread::spawn(move || {
            let _guard = worker_locks.lock("bar.RTE");
            tx.send(()).expect("send");
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        let _other = locks.lock("Other.rte");
        drop(guard);
        rx.recv_timeout(Duration::from_secs(5)).expect("worker acquired lock");
        worker.join().expect("join");
    }

    #[test]
    fn top_level_package_detection() {
        assert_eq!(
            top_level_package(Path::new("Foo.rte/index.ini"), false),
            Some("Foo.rte".to_string())
        );
        assert_eq!(
            top_level_package(Path::new("Foo.rte"), true),
            Some("Foo.rte".to_string())
        );
        assert_eq!(top_level_package(Path::new("Foo.rte"), false), None);
        assert_eq!(top_level_package(Path::new("BASE.rte/index.ini"), false), None);
        assert_eq!(top_level_package(Path::new("Mods/Foo.rte/index.ini"), false), None);
    }
}
