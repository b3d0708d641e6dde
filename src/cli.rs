use crate::{
    app::{App, AppEvent},
    browse::{FilterCriteria, SortKey, SortSpec},
    cancel::CancelToken,
    catalog::RemoteModSummary,
    config::AppConfig,
    installed::InstalledMod,
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{path::PathBuf, sync::Arc, thread, time::Duration};

const POLL_INTERVAL_MS: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verbosity {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

impl Verbosity {
    /// Default log filter when `RUST_LOG` is not set.
    pub fn filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn",
            Verbosity::Verbose => "info",
            Verbosity::Debug => "debug",
        }
    }
}

#[derive(Debug)]
pub struct Invocation {
    pub verbosity: Verbosity,
    format: OutputFormat,
    config_path: Option<PathBuf>,
    command: CliCommand,
}

#[derive(Debug, PartialEq, Eq)]
enum CliCommand {
    Browse(BrowseOptions),
    Installed { offline: bool },
    Show { id: u64, images: bool },
    Install { ids: Vec<u64> },
    ConfigShow,
    ConfigSet { key: String, value: String },
    Help,
    Version,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct BrowseOptions {
    filter: Option<String>,
    tags: Option<Vec<String>>,
    sort: SortKey,
    reverse: bool,
    icons: bool,
}

pub fn parse_args(args: &[String]) -> Result<Invocation> {
    let mut format = OutputFormat::Text;
    let mut config_path = None;
    let mut verbosity = Verbosity::Normal;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--format" => {
                let Some(value) = iter.next() else {
                    bail!("--format requires a value");
                };
                format = parse_format(value)?;
            }
            value if value.starts_with("--format=") => {
                format = parse_format(value.trim_start_matches("--format="))?;
            }
            "--config" => {
                let Some(value) = iter.next() else {
                    bail!("--config requires a path");
                };
                config_path = Some(PathBuf::from(value));
            }
            value if value.starts_with("--config=") => {
                config_path = Some(PathBuf::from(value.trim_start_matches("--config=")));
            }
            "-q" | "--quiet" => verbosity = Verbosity::Quiet,
            "--verbose" => verbosity = Verbosity::Verbose,
            value if value.starts_with("-v") && value.chars().skip(1).all(|ch| ch == 'v') => {
                verbosity = if value.len() >= 3 {
                    Verbosity::Debug
                } else {
                    Verbosity::Verbose
                };
            }
            _ => tokens.push(arg.to_string()),
        }
    }

    let command = parse_command(&tokens)?;
    Ok(Invocation {
        verbosity,
        format,
        config_path,
        command,
    })
}

fn parse_format(value: &str) -> Result<OutputFormat> {
    OutputFormat::parse(value).with_context(|| format!("Unknown output format: {value}"))
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    match head.as_str() {
        "--help" | "-h" | "help" => Ok(CliCommand::Help),
        "--version" | "-V" | "version" => Ok(CliCommand::Version),
        "browse" => Ok(CliCommand::Browse(parse_browse(rest)?)),
        "installed" => {
            let mut offline = false;
            for arg in rest {
                match arg.as_str() {
                    "--offline" => offline = true,
                    other => bail!("Unknown option for installed: {other}"),
                }
            }
            Ok(CliCommand::Installed { offline })
        }
        "show" => {
            let mut id = None;
            let mut images = false;
            for arg in rest {
                match arg.as_str() {
                    "--images" => images = true,
                    value => id = Some(parse_mod_id(value)?),
                }
            }
            let Some(id) = id else {
                bail!("show requires a mod id");
            };
            Ok(CliCommand::Show { id, images })
        }
        "install" => {
            if rest.is_empty() {
                bail!("install requires one or more mod ids");
            }
            let ids = rest
                .iter()
                .map(|value| parse_mod_id(value))
                .collect::<Result<Vec<_>>>()?;
            Ok(CliCommand::Install { ids })
        }
        "config" => match rest {
            [] => Ok(CliCommand::ConfigShow),
            [set, key, value] if set == "set" => Ok(CliCommand::ConfigSet {
                key: key.to_string(),
                value: value.to_string(),
            }),
            _ => bail!("Usage: ccmm config [set <key> <value>]"),
        },
        other => bail!("Unknown command: {other} (see --help)"),
    }
}

fn parse_browse(args: &[String]) -> Result<BrowseOptions> {
    let mut options = BrowseOptions::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--filter" => {
                let Some(value) = iter.next() else {
                    bail!("--filter requires a value");
                };
                options.filter = Some(value.to_string());
            }
            value if value.starts_with("--filter=") => {
                options.filter = Some(value.trim_start_matches("--filter=").to_string());
            }
            "--tags" => {
                let Some(value) = iter.next() else {
                    bail!("--tags requires a value");
                };
                options.tags = Some(split_tags(value));
            }
            value if value.starts_with("--tags=") => {
                options.tags = Some(split_tags(value.trim_start_matches("--tags=")));
            }
            "--sort" => {
                let Some(value) = iter.next() else {
                    bail!("--sort requires a value");
                };
                options.sort = parse_sort_key(value)?;
            }
            value if value.starts_with("--sort=") => {
                options.sort = parse_sort_key(value.trim_start_matches("--sort="))?;
            }
            "--reverse" | "-r" => options.reverse = true,
            "--icons" => options.icons = true,
            other => bail!("Unknown option for browse: {other}"),
        }
    }
    if options.reverse && options.sort == SortKey::Catalog {
        bail!("--reverse needs a --sort key other than catalog");
    }
    Ok(options)
}

fn split_tags(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_sort_key(value: &str) -> Result<SortKey> {
    SortKey::parse(value).with_context(|| format!("Unknown sort key: {value}"))
}

fn parse_mod_id(value: &str) -> Result<u64> {
    value
        .parse()
        .with_context(|| format!("Invalid mod id: {value}"))
}

pub fn run(invocation: Invocation) -> Result<()> {
    let Invocation {
        verbosity,
        format,
        config_path,
        command,
    } = invocation;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("ccmm v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliCommand::ConfigShow => {
            let config = AppConfig::load_or_create(config_path.as_deref())?;
            show_config(&config, format)
        }
        CliCommand::ConfigSet { key, value } => {
            let mut config = AppConfig::load_or_create(config_path.as_deref())?;
            config.set(&key, &value)?;
            config.save()?;
            if verbosity != Verbosity::Quiet {
                println!("Updated {key} in {}", config.path.display());
            }
            Ok(())
        }
        CliCommand::Installed { offline: true } => {
            let config = AppConfig::load_or_create(config_path.as_deref())?;
            let mut app = App::initialize_offline(config)?;
            app.rescan_installed()?;
            list_installed(app.installed(), format)
        }
        command => {
            let config = AppConfig::load_or_create(config_path.as_deref())?;
            let mut app = App::initialize(config)?;
            let interrupt = interrupt_token();
            run_online(&mut app, command, format, verbosity, &interrupt)
        }
    }
}

/// Ctrl-C cancels background work instead of killing the process, so
/// temporary files are cleaned up.
fn interrupt_token() -> CancelToken {
    let token = CancelToken::new();
    let handler_token = token.clone();
    if let Err(err) = ctrlc::set_handler(move || handler_token.cancel()) {
        tracing::warn!("Could not install Ctrl-C handler: {err}");
    }
    token
}

fn run_online(
    app: &mut App,
    command: CliCommand,
    format: OutputFormat,
    verbosity: Verbosity,
    interrupt: &CancelToken,
) -> Result<()> {
    match command {
        CliCommand::Browse(options) => {
            app.fetch_icons = options.icons;
            refresh_catalog(app, verbosity, interrupt)?;
            browse(app, &options, format)
        }
        CliCommand::Installed { .. } => {
            app.fetch_icons = false;
            app.rescan_installed()?;
            if let Err(err) = refresh_catalog(app, verbosity, interrupt) {
                tracing::warn!("{err:#}; listing installed mods without mod.io links");
            }
            list_installed(app.installed(), format)
        }
        CliCommand::Show { id, images } => show_mod(app, id, images, format),
        CliCommand::Install { ids } => install_mods(app, &ids, format, verbosity, interrupt),
        _ => Ok(()),
    }
}

/// Drives a background refresh from the foreground, reporting progress on
/// stderr.
fn refresh_catalog(app: &mut App, verbosity: Verbosity, interrupt: &CancelToken) -> Result<()> {
    app.start_catalog_refresh();
    loop {
        if interrupt.is_cancelled() && app.refresh_active() {
            app.cancel_refresh();
            if verbosity != Verbosity::Quiet {
                eprintln!();
            }
            let cancelled = app
                .wait_for_refresh()
                .iter()
                .any(|event| matches!(event, AppEvent::RefreshCancelled));
            if cancelled {
                bail!("Catalog refresh cancelled");
            }
        }
        for event in app.poll_catalog_refresh() {
            match event {
                AppEvent::RefreshProgress { fetched, total } => {
                    if verbosity != Verbosity::Quiet {
                        eprint!("\rFetching catalog: {fetched}/{total}");
                    }
                }
                AppEvent::RefreshCompleted { count } => {
                    if verbosity != Verbosity::Quiet {
                        eprintln!("\rFetched {count} mods from mod.io");
                    }
                }
                AppEvent::RefreshFailed { error } => {
                    bail!("Catalog refresh failed: {error}");
                }
                AppEvent::RefreshCancelled => bail!("Catalog refresh cancelled"),
                _ => {}
            }
        }
        if !app.refresh_active() {
            return Ok(());
        }
        thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }
}

#[derive(Serialize)]
struct ModListItem {
    id: u64,
    name: String,
    tags: Vec<String>,
    downloads: u64,
    likes: u64,
    updated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    icon_bytes: Option<usize>,
}

impl ModListItem {
    fn from_summary(summary: &RemoteModSummary) -> Self {
        Self {
            id: summary.id,
            name: summary.name.clone(),
            tags: summary.tags.clone(),
            downloads: summary.downloads,
            likes: summary.likes,
            updated: format_date(summary.updated_at),
            icon_bytes: summary.icon().map(<[u8]>::len),
        }
    }
}

fn browse(app: &App, options: &BrowseOptions, format: OutputFormat) -> Result<()> {
    let criteria = FilterCriteria {
        name: options.filter.clone(),
        tags: options.tags.clone(),
    };
    let spec = SortSpec::new(options.sort, options.reverse);
    let items: Vec<ModListItem> = app
        .browse(&criteria, spec)
        .iter()
        .map(|summary| ModListItem::from_summary(summary))
        .collect();
    tracing::info!("Showing {} of {} mods", items.len(), app.snapshot().len());

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            for item in items {
                println!(
                    "{id:>8} {downloads:>9} {likes:>6} {updated:<10} {name} [{tags}]",
                    id = item.id,
                    downloads = item.downloads,
                    likes = item.likes,
                    updated = item.updated.as_deref().unwrap_or("-"),
                    name = item.name,
                    tags = item.tags.join(", ")
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct InstalledListItem {
    package: String,
    name: String,
    version: String,
    tags: Vec<String>,
    mod_id: Option<u64>,
    mod_name: Option<String>,
}

impl InstalledListItem {
    fn from_installed(installed: &InstalledMod) -> Self {
        Self {
            package: installed.package_name(),
            name: installed.name.clone(),
            version: installed.version.clone(),
            tags: installed.tags.clone(),
            mod_id: installed.linked_remote.as_ref().map(|remote| remote.id),
            mod_name: installed
                .linked_remote
                .as_ref()
                .map(|remote| remote.name.clone()),
        }
    }
}

fn list_installed(installed: &[InstalledMod], format: OutputFormat) -> Result<()> {
    let items: Vec<InstalledListItem> = installed
        .iter()
        .map(InstalledListItem::from_installed)
        .collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No mods installed");
            }
            for item in items {
                let link = match (item.mod_id, &item.mod_name) {
                    (Some(id), Some(name)) => format!("mod.io {id} ({name})"),
                    _ => "local only".to_string(),
                };
                println!(
                    "{package:<24} {version:<10} {name}  -> {link}",
                    package = item.package,
                    version = item.version,
                    name = item.name
                );
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ModDetails {
    #[serde(flatten)]
    item: ModListItem,
    summary: String,
    description: String,
    dislikes: u64,
    profile_url: Option<String>,
    download_url: Option<String>,
    images: Option<Vec<usize>>,
}

fn show_mod(app: &mut App, id: u64, images: bool, format: OutputFormat) -> Result<()> {
    let summary = app.resolve_mod(id)?;
    if images {
        app.start_image_fetch(summary.clone());
        app.wait_for_images();
    }
    let details = ModDetails {
        item: ModListItem::from_summary(&summary),
        summary: summary.summary.clone(),
        description: summary.description.clone(),
        dislikes: summary.dislikes,
        profile_url: summary.profile_url.clone(),
        download_url: summary.download_url.clone(),
        images: summary
            .images()
            .map(|images| images.iter().map(Vec::len).collect()),
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        OutputFormat::Text => {
            println!("{} ({})", details.item.name, details.item.id);
            if !details.summary.is_empty() {
                println!("{}", details.summary);
            }
            println!("Tags: {}", details.item.tags.join(", "));
            println!(
                "Downloads: {}  Likes: {}  Dislikes: {}",
                details.item.downloads, details.item.likes, details.dislikes
            );
            if let Some(updated) = &details.item.updated {
                println!("Updated: {updated}");
            }
            if let Some(url) = &details.profile_url {
                println!("Page: {url}");
            }
            if let Some(url) = &details.download_url {
                println!("Download: {url}");
            }
            if let Some(images) = &details.images {
                println!("Images: {} fetched", images.len());
            }
            if !details.description.is_empty() {
                println!();
                println!("{}", details.description);
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct InstallResultItem {
    mod_id: u64,
    name: String,
    ok: bool,
    version: Option<String>,
    package: Option<String>,
    replaced: bool,
    error: Option<String>,
}

fn install_mods(
    app: &mut App,
    ids: &[u64],
    format: OutputFormat,
    verbosity: Verbosity,
    interrupt: &CancelToken,
) -> Result<()> {
    let mut summaries: Vec<Arc<RemoteModSummary>> = Vec::new();
    for id in ids {
        summaries.push(app.resolve_mod(*id)?);
    }
    for summary in summaries {
        if verbosity != Verbosity::Quiet && format == OutputFormat::Text {
            println!("Installing: {} ({})", summary.name, summary.id);
        }
        app.start_install(summary);
    }

    let mut events = Vec::new();
    while app.installs_active() > 0 {
        if interrupt.is_cancelled() {
            tracing::warn!("Interrupted, cancelling {} installs", app.installs_active());
            app.cancel_installs();
            events.extend(app.wait_for_installs());
            break;
        }
        thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
        for event in app.poll_installs() {
            if let AppEvent::InstallFinished(outcome) = &event {
                tracing::info!("{} finished ({} bytes)", outcome.name, outcome.bytes);
            }
            events.push(event);
        }
    }

    let mut results: Vec<InstallResultItem> = events
        .into_iter()
        .filter_map(|event| match event {
            AppEvent::InstallFinished(outcome) => Some(InstallResultItem {
                mod_id: outcome.mod_id,
                name: outcome.name,
                ok: true,
                version: Some(outcome.version),
                package: outcome
                    .package_dir
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string()),
                replaced: outcome.replaced,
                error: None,
            }),
            AppEvent::InstallFailed {
                mod_id,
                name,
                error,
            } => Some(InstallResultItem {
                mod_id,
                name,
                ok: false,
                version: None,
                package: None,
                replaced: false,
                error: Some(error),
            }),
            _ => None,
        })
        .collect();
    results.sort_by_key(|item| ids.iter().position(|id| *id == item.mod_id));

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        OutputFormat::Text => {
            for item in &results {
                if item.ok {
                    println!(
                        "Installed {} {} into {}{}",
                        item.name,
                        item.version.as_deref().unwrap_or_default(),
                        item.package.as_deref().unwrap_or_default(),
                        if item.replaced { " (replaced)" } else { "" }
                    );
                } else {
                    eprintln!(
                        "Install failed: {} ({})",
                        item.name,
                        item.error.as_deref().unwrap_or_default()
                    );
                }
            }
        }
    }

    let failed = results.iter().filter(|item| !item.ok).count();
    if failed > 0 {
        bail!("{failed} of {} installs failed", results.len());
    }
    Ok(())
}

#[derive(Serialize)]
struct ConfigOutput {
    path: String,
    api_key: String,
    game_id: u64,
    api_url: String,
    mods_directory: String,
}

fn show_config(config: &AppConfig, format: OutputFormat) -> Result<()> {
    let output = ConfigOutput {
        path: config.path.display().to_string(),
        api_key: mask_key(&config.modio.api_key),
        game_id: config.modio.game_id,
        api_url: config.modio.api_url.clone(),
        mods_directory: config.mods_directory.display().to_string(),
    };

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            println!("Config: {}", output.path);
            println!("API key: {}", output.api_key);
            println!("Game id: {}", output.game_id);
            println!("API url: {}", output.api_url);
            println!("Mods directory: {}", output.mods_directory);
        }
    }
    Ok(())
}

fn mask_key(key: &str) -> String {
    let key = key.trim();
    if key.is_empty() {
        return "(not set)".to_string();
    }
    let tail: String = key.chars().skip(key.chars().count().saturating_sub(4)).collect();
    format!("****{tail}")
}

fn format_date(timestamp: i64) -> Option<String> {
    if timestamp <= 0 {
        return None;
    }
    let date = time::OffsetDateTime::from_unix_timestamp(timestamp).ok()?;
    date.format(time::macros::format_description!("[year]-[month]-[day]"))
        .ok()
}

fn print_help() {
    println!("ccmm v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  ccmm browse                      List mods on mod.io");
    println!("    --filter <text>                Name contains text (any case)");
    println!("    --tags <a,b>                   Mod has every tag");
    println!("    --sort <key>                   catalog | name | downloads | likes | updated");
    println!("    --reverse                      Descending order (needs --sort)");
    println!("    --icons                        Fetch icons with the catalog");
    println!("  ccmm installed [--offline]       List installed mods and their mod.io match");
    println!("  ccmm show <id> [--images]        Show one mod");
    println!("  ccmm install <id>...             Download and install mods");
    println!("  ccmm config                      Show configuration");
    println!("  ccmm config set <key> <value>    api_key | game_id | api_url | mods_directory");
    println!();
    println!("Global options:");
    println!("  --format <json|text>             Output format");
    println!("  --config <path>                  Config file to use");
    println!("  -q, --quiet                      Errors only");
    println!("  -v, -vv                          Increase verbosity");
    println!("  -h, --help                       Show help");
    println!("  -V, --version                    Show version");
}
