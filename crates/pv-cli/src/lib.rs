mod render;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use pv_core::{Category, Database, FolderState, NameResolver, NoNames, PresetRepository};
use pv_fs::{resolve_data_dir, DatabaseFile, GitPresetRepository, Settings, CONFIG_FILE_NAME};
use pv_resolver::{
    apply_event, plan_refresh, search, spawn_refresh, HttpSource, MetadataResolver, RefreshEvent,
    SearchPlatform,
};
use pv_script::{ParseReport, ScriptCodec, Template};
use pv_utils::{contains_potential_secret, CancellationToken};

#[derive(Parser)]
#[command(name = "pv", version, about = "Provisioning script builder for ComfyUI instances")]
struct Cli {
    /// Log debug output to stderr.
    #[arg(long, short, global = true)]
    verbose: bool,
    /// Data directory holding the database and settings.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Template to generate scripts from.
    #[arg(long, global = true)]
    template: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List every category.
    Categories,
    /// List items, optionally for one category.
    List {
        category: Option<Category>,
        /// Only show checked items.
        #[arg(long)]
        checked: bool,
    },
    /// Add URLs or package names to a category.
    Add {
        category: Category,
        #[arg(required = true)]
        urls: Vec<String>,
        /// Add without selecting for the next script.
        #[arg(long)]
        unchecked: bool,
        /// Folder to place the new items in.
        #[arg(long)]
        folder: Option<String>,
        /// Skip looking up display names.
        #[arg(long)]
        offline: bool,
    },
    /// Remove items from a category.
    Remove {
        category: Category,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Select items for the next script.
    Check {
        category: Category,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Deselect items.
    Uncheck {
        category: Category,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Select every item of a category.
    CheckAll { category: Category },
    /// Deselect every item of a category.
    UncheckAll { category: Category },
    /// Deselect every item of every category.
    Clear,
    /// Set how many downloads the script runs at once.
    SetParallel { value: String },
    /// Manage display folders.
    #[command(subcommand)]
    Folder(FolderCommand),
    /// Write the provisioning script for the checked items.
    Generate {
        /// File to write instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Merge the selection of an existing script into the database.
    Load {
        script: PathBuf,
        /// Skip looking up names of new items.
        #[arg(long)]
        offline: bool,
    },
    /// Work with presets in the git repository.
    #[command(subcommand)]
    Preset(PresetCommand),
    /// Show or change settings.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Look up display names again for items whose names were generated.
    RefreshNames,
    /// Search CivitAI or Hugging Face.
    Search {
        platform: SearchPlatform,
        query: String,
        /// Category used to filter results and to add to.
        #[arg(long)]
        category: Option<Category>,
        /// Add the result with this number to the category.
        #[arg(long, requires = "category")]
        add: Option<usize>,
    },
}

#[derive(Subcommand)]
enum FolderCommand {
    /// Create an empty folder.
    Create { category: Category, path: String },
    /// Rename a folder and everything below it.
    Rename {
        category: Category,
        from: String,
        to: String,
    },
    /// Delete a folder, moving its items to the root.
    Delete { category: Category, path: String },
    /// Move an item into a folder; an empty path moves it to the root.
    Move {
        category: Category,
        url: String,
        path: String,
    },
    /// Show the folder hierarchy of a category.
    Tree { category: Category },
    /// Select every item in a folder.
    Check { category: Category, path: String },
    /// Deselect every item in a folder.
    Uncheck { category: Category, path: String },
}

#[derive(Subcommand)]
enum PresetCommand {
    /// List presets in the repository.
    List,
    /// Merge a preset into the database.
    Load {
        id: String,
        #[arg(long)]
        offline: bool,
    },
    /// Save the current selection as a preset.
    Save {
        id: String,
        /// Commit and push with this message.
        #[arg(long, short)]
        message: Option<String>,
    },
    /// Clone the repository, or pull when already cloned.
    Sync,
    /// Commit and push every change in the repository.
    Push {
        #[arg(long, short, default_value = "Update presets")]
        message: String,
    },
    /// Show uncommitted changes.
    Status,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the current settings.
    Show,
    /// Change one setting.
    Set { key: String, value: String },
    /// Check that the repository remote is reachable.
    Test,
}

/// Loaded database plus where it lives.
struct Workspace {
    data_dir: PathBuf,
    file: DatabaseFile,
    db: Database,
}

impl Workspace {
    fn open(data_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => resolve_data_dir().context("failed to resolve data directory")?,
        };
        let file = DatabaseFile::in_dir(&data_dir);
        let db = file.load();
        Ok(Self { data_dir, file, db })
    }

    fn commit(&self) -> Result<()> {
        self.file
            .commit(&self.db)
            .with_context(|| format!("failed to save {}", self.file.path().display()))
    }

    fn settings_path(&self) -> PathBuf {
        self.data_dir.join(CONFIG_FILE_NAME)
    }

    fn settings(&self) -> Result<Settings> {
        Settings::load(&self.settings_path()).context("failed to load settings")
    }

    fn presets(&self) -> Result<GitPresetRepository> {
        Ok(GitPresetRepository::from_settings(
            &self.settings()?,
            &self.data_dir,
        ))
    }

    fn codec(&self, template: Option<&Path>) -> Result<ScriptCodec> {
        let template = match template {
            Some(path) => Template::from_file(path)?,
            None => Template::locate(&[self.data_dir.clone()])?,
        };
        if let Some(source) = template.source() {
            debug!(path = %source.display(), "loaded template");
        }
        Ok(ScriptCodec::new(template))
    }
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut ws = Workspace::open(cli.data_dir)?;
    let template = cli.template.as_deref();

    let Some(command) = cli.command else {
        print!("{}", render::summary(&ws.db));
        return Ok(());
    };

    match command {
        Command::Categories => {
            for category in Category::ALL {
                println!("{:<22}{}", category.key(), category.label());
            }
            Ok(())
        }
        Command::List { category, checked } => {
            print!("{}", render::listing(&ws.db, category, checked));
            Ok(())
        }
        Command::Add {
            category,
            urls,
            unchecked,
            folder,
            offline,
        } => add_items(&mut ws, category, &urls, !unchecked, folder.as_deref(), offline),
        Command::Remove { category, urls } => {
            for url in &urls {
                if !ws.db.remove_item(category, url) {
                    eprintln!("not found: {url}");
                }
            }
            ws.commit()
        }
        Command::Check { category, urls } => set_checked(&mut ws, category, &urls, true),
        Command::Uncheck { category, urls } => set_checked(&mut ws, category, &urls, false),
        Command::CheckAll { category } => {
            ws.db.set_all_checked(category, true);
            ws.commit()
        }
        Command::UncheckAll { category } => {
            ws.db.set_all_checked(category, false);
            ws.commit()
        }
        Command::Clear => {
            ws.db.clear_all_checked();
            ws.commit()
        }
        Command::SetParallel { value } => {
            if !ws.db.update_max_parallel_downloads(&value) {
                bail!("invalid parallel download count: {value} (expected a whole number of at least 1)");
            }
            ws.commit()?;
            println!("Max parallel downloads: {}", ws.db.max_parallel_downloads());
            Ok(())
        }
        Command::Folder(command) => folder(&mut ws, command),
        Command::Generate { output } => generate(&ws, template, output.as_deref()),
        Command::Load { script, offline } => {
            let text = fs::read_to_string(&script)
                .with_context(|| format!("failed to read {}", script.display()))?;
            merge_script(&mut ws, &text, offline)
        }
        Command::Preset(command) => preset(&mut ws, template, command),
        Command::Config(command) => config(&ws, command),
        Command::RefreshNames => refresh_names(&mut ws),
        Command::Search {
            platform,
            query,
            category,
            add,
        } => search_models(&mut ws, platform, &query, category, add),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

fn name_resolver(offline: bool) -> Result<Box<dyn NameResolver>> {
    if offline {
        return Ok(Box::new(NoNames));
    }
    let source = HttpSource::new().context("failed to initialize http client")?;
    Ok(Box::new(MetadataResolver::new(source)))
}

fn add_items(
    ws: &mut Workspace,
    category: Category,
    urls: &[String],
    checked: bool,
    folder: Option<&str>,
    offline: bool,
) -> Result<()> {
    let resolver = name_resolver(offline)?;
    let resolver = resolver.as_ref();
    for url in urls {
        let url = url.trim();
        if !ws.db.add_item(category, url, checked, &resolver) {
            eprintln!("skipped (blank or already present): {url}");
            continue;
        }
        if let Some(folder) = folder {
            ws.db.set_folder(category, url, folder);
        }
        let name = ws
            .db
            .find(category, url)
            .map(|item| item.display_name().to_string())
            .unwrap_or_default();
        println!("added {name}");
    }
    ws.commit()
}

fn set_checked(ws: &mut Workspace, category: Category, urls: &[String], checked: bool) -> Result<()> {
    for url in urls {
        if !ws.db.set_checked(category, url, checked) {
            eprintln!("not found: {url}");
        }
    }
    ws.commit()
}

fn folder(ws: &mut Workspace, command: FolderCommand) -> Result<()> {
    match command {
        FolderCommand::Create { category, path } => {
            if !ws.db.create_folder(category, &path) {
                bail!("folder path is empty");
            }
        }
        FolderCommand::Rename { category, from, to } => {
            if !ws.db.rename_folder(category, &from, &to) {
                bail!("cannot rename {from} to {to}");
            }
        }
        FolderCommand::Delete { category, path } => {
            if !ws.db.delete_folder(category, &path) {
                bail!("folder not found: {path}");
            }
        }
        FolderCommand::Move {
            category,
            url,
            path,
        } => {
            if !ws.db.set_folder(category, &url, &path) {
                bail!("not found: {url}");
            }
        }
        FolderCommand::Tree { category } => {
            print!("{}", render::tree(category, &ws.db.folder_tree(category)));
            return Ok(());
        }
        FolderCommand::Check { category, path } => {
            if !ws.db.set_folder_state(category, &path, FolderState::Checked) {
                bail!("folder not found: {path}");
            }
        }
        FolderCommand::Uncheck { category, path } => {
            if !ws.db.set_folder_state(category, &path, FolderState::Unchecked) {
                bail!("folder not found: {path}");
            }
        }
    }
    ws.commit()
}

fn generate(ws: &Workspace, template: Option<&Path>, output: Option<&Path>) -> Result<()> {
    let script = ws.codec(template)?.generate(&ws.db);
    warn_on_secrets(&script);
    match output {
        Some(path) => {
            fs::write(path, &script)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Script written to {}", path.display());
        }
        None => print!("{script}"),
    }
    Ok(())
}

fn merge_script(ws: &mut Workspace, text: &str, offline: bool) -> Result<()> {
    let resolver = name_resolver(offline)?;
    let report = pv_script::parse(text, &mut ws.db, &resolver.as_ref());
    ws.commit()?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &ParseReport) {
    println!(
        "Selected {} items ({} already known, {} new, {} named from comments)",
        report.total(),
        report.checked,
        report.added,
        report.named
    );
    if let Some(value) = report.max_parallel_downloads {
        println!("Max parallel downloads: {value}");
    }
    for failure in &report.failures {
        eprintln!("failed: {failure}");
    }
}

fn warn_on_secrets(script: &str) {
    if contains_potential_secret(script) {
        warn!("generated script may contain a secret");
        eprintln!("warning: the script looks like it contains a token or API key; review it before sharing");
    }
}

fn preset(ws: &mut Workspace, template: Option<&Path>, command: PresetCommand) -> Result<()> {
    let repo = ws.presets()?;
    match command {
        PresetCommand::List => {
            for id in repo.list().context("failed to list presets")? {
                println!("{id}");
            }
        }
        PresetCommand::Load { id, offline } => {
            let text = repo
                .read(&id)
                .context("failed to read preset")?
                .ok_or_else(|| anyhow!("preset not found: {id}"))?;
            merge_script(ws, &text, offline)?;
            println!("Loaded preset: {id}");
        }
        PresetCommand::Save { id, message } => {
            ws.commit()?;
            let script = ws.codec(template)?.generate(&ws.db);
            warn_on_secrets(&script);
            repo.write(&id, &script).context("failed to write preset")?;
            if let Some(message) = message {
                let outcome = repo
                    .commit_and_push(&message, std::slice::from_ref(&id))
                    .context("preset saved locally but push failed")?;
                println!("{outcome}");
            }
            println!("Preset saved: {id}");
        }
        PresetCommand::Sync => println!("{}", repo.clone_or_pull()?),
        PresetCommand::Push { message } => println!("{}", repo.commit_and_push(&message, &[])?),
        PresetCommand::Status => println!("{}", repo.status()?),
    }
    Ok(())
}

fn config(ws: &Workspace, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let settings = ws.settings()?.redacted();
            println!("data_dir: {}", ws.data_dir.display());
            println!("repo_url: {}", settings.repo_url);
            println!("branch: {}", settings.branch);
            println!(
                "github_token: {}",
                settings.github_token.as_deref().unwrap_or("(not set)")
            );
            println!(
                "local_path: {}",
                settings.local_path_or_default(&ws.data_dir).display()
            );
        }
        ConfigCommand::Set { key, value } => {
            let mut settings = ws.settings()?;
            settings.set(&key, &value)?;
            settings
                .save(&ws.settings_path())
                .context("failed to save settings")?;
        }
        ConfigCommand::Test => {
            ws.presets()?.test_connection()?;
            println!("Connection successful");
        }
    }
    Ok(())
}

fn refresh_names(ws: &mut Workspace) -> Result<()> {
    let targets = plan_refresh(&ws.db);
    if targets.is_empty() {
        println!("Nothing to refresh");
        return Ok(());
    }
    let resolver =
        MetadataResolver::new(HttpSource::new().context("failed to initialize http client")?);
    let cancel = CancellationToken::new();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to initialize runtime")?;
    let db = &mut ws.db;
    let summary = runtime
        .block_on(async {
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    interrupt.cancel();
                }
            });

            let (mut events, worker) = spawn_refresh(resolver, targets, cancel.clone());
            while let Some(event) = events.recv().await {
                if let RefreshEvent::Progress { processed, total } = event {
                    eprint!("\rRefreshing names... ({processed}/{total})");
                }
                apply_event(db, &event);
            }
            eprintln!();
            worker.await
        })
        .context("refresh worker failed")?;

    ws.commit()?;
    if summary.cancelled {
        println!(
            "Refresh cancelled. Updated {} out of {} items.",
            summary.processed, summary.total
        );
    } else {
        println!("Refreshed {} item names.", summary.processed);
    }
    Ok(())
}

fn search_models(
    ws: &mut Workspace,
    platform: SearchPlatform,
    query: &str,
    category: Option<Category>,
    add: Option<usize>,
) -> Result<()> {
    let source = HttpSource::new().context("failed to initialize http client")?;
    let results = search(&source, platform, query, category);
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    let (Some(number), Some(category)) = (add, category) else {
        print!("{}", render::search_results(&results));
        return Ok(());
    };
    let result = number
        .checked_sub(1)
        .and_then(|index| results.get(index))
        .ok_or_else(|| anyhow!("no result number {number} (got {})", results.len()))?;
    let url = result.download_url.clone();
    add_items(ws, category, &[url], true, None, false)
}
