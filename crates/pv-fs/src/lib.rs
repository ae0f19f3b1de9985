//! Filesystem-backed persistence for the provisioning database.

mod presets;
mod settings;
mod snapshot;

use std::fs;
use std::path::{Path, PathBuf};

use pv_core::{CoreError, CoreResult, Database};
use tracing::{debug, warn};

pub use presets::{is_excluded_preset, GitPresetRepository, EXCLUDED_PRESETS};
pub use settings::{Settings, DEFAULT_BRANCH};
pub use snapshot::{from_json, to_json};

/// Name of the data directory under the home directory.
pub const DATA_DIR_NAME: &str = ".vastai-provisioning";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "PROVISIONER_HOME";

/// File name of the database snapshot.
pub const DATABASE_FILE_NAME: &str = "model_database.json";

/// File name of the YAML settings.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Resolve the data directory ($PROVISIONER_HOME, then ~/.vastai-provisioning).
pub fn resolve_data_dir() -> CoreResult<PathBuf> {
    if let Ok(value) = std::env::var(DATA_DIR_ENV) {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value));
        }
    }
    if let Some(home) = dirs::home_dir() {
        return Ok(home.join(DATA_DIR_NAME));
    }
    Err(CoreError::Storage(
        "unable to determine a data directory".into(),
    ))
}

/// The JSON database snapshot on disk.
#[derive(Debug, Clone)]
pub struct DatabaseFile {
    path: PathBuf,
}

impl DatabaseFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The snapshot inside a data directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(DATABASE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot, falling back to an empty database.
    ///
    /// A missing file is not an error. An unreadable or corrupt file is
    /// logged, moved aside with a `.bak` suffix, and replaced by defaults.
    /// Bytes that are not UTF-8 are decoded lossily after a copy of the
    /// file is kept under the same backup name.
    pub fn load(&self) -> Database {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no database yet, starting empty");
                return Database::new();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "could not read database, using defaults");
                self.move_aside();
                return Database::new();
            }
        };

        let contents = match String::from_utf8(bytes) {
            Ok(contents) => contents,
            Err(err) => {
                warn!(path = %self.path.display(), "database is not valid UTF-8, replacing bad bytes");
                if let Err(err) = fs::copy(&self.path, self.backup_path()) {
                    warn!(error = %err, "could not keep a copy of the database");
                }
                String::from_utf8_lossy(err.as_bytes()).into_owned()
            }
        };

        match from_json(&contents) {
            Ok(database) => database,
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "database is corrupt, using defaults");
                self.move_aside();
                Database::new()
            }
        }
    }

    /// Where an unusable snapshot is kept.
    pub fn backup_path(&self) -> PathBuf {
        self.path.with_extension("json.bak")
    }

    fn move_aside(&self) {
        if let Err(err) = fs::rename(&self.path, self.backup_path()) {
            warn!(error = %err, "could not keep a copy of the unusable database");
        }
    }

    /// Write the whole database, replacing the previous snapshot atomically.
    pub fn commit(&self, database: &Database) -> CoreResult<()> {
        let contents = to_json(database)?;
        snapshot::write_atomic(&self.path, &contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_core::{Category, NoNames};
    use tempfile::TempDir;

    #[test]
    fn commit_then_load_round_trips() {
        let temp = TempDir::new().expect("temp dir");
        let file = DatabaseFile::in_dir(&temp.path().join("data"));

        let mut db = Database::new();
        db.add_item(Category::LoraModels, "https://x/a.safetensors", true, &NoNames);
        db.set_folder(Category::LoraModels, "https://x/a.safetensors", "styles/anime");
        db.set_max_parallel_downloads(8);
        file.commit(&db).expect("commit");

        assert_eq!(file.load(), db);
    }

    #[test]
    fn missing_file_loads_empty() {
        let temp = TempDir::new().expect("temp dir");
        let file = DatabaseFile::in_dir(temp.path());
        assert_eq!(file.load(), Database::new());
    }

    #[test]
    fn corrupt_file_is_moved_aside() {
        let temp = TempDir::new().expect("temp dir");
        let file = DatabaseFile::in_dir(temp.path());
        fs::write(file.path(), "{ not json").expect("write");

        assert_eq!(file.load(), Database::new());
        assert!(!file.path().exists());
        assert!(temp.path().join("model_database.json.bak").exists());
    }

    #[test]
    fn invalid_utf8_keeps_items_and_a_backup() {
        let temp = TempDir::new().expect("temp dir");
        let file = DatabaseFile::in_dir(temp.path());
        let original = b"{\"lora_models\":[{\"url\":\"https://x/keep.safetensors\",\"name\":\"caf\xE9\"}]}";
        fs::write(file.path(), original).expect("write");

        let mut db = file.load();
        let items = db.items(Category::LoraModels);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].url, "https://x/keep.safetensors");
        assert_eq!(items[0].name.as_deref(), Some("caf\u{FFFD}"));
        assert_eq!(fs::read(file.backup_path()).expect("backup"), original.to_vec());

        db.add_item(Category::LoraModels, "https://x/new.safetensors", true, &NoNames);
        file.commit(&db).expect("commit");
        assert_eq!(file.load().items(Category::LoraModels).len(), 2);
        assert_eq!(fs::read(file.backup_path()).expect("backup"), original.to_vec());
    }

    #[test]
    fn unreadable_file_is_moved_aside() {
        let temp = TempDir::new().expect("temp dir");
        let file = DatabaseFile::new(temp.path().join("model_database.json"));
        fs::create_dir(file.path()).expect("dir in place of the file");

        assert_eq!(file.load(), Database::new());
        assert!(!file.path().exists());
        assert!(file.backup_path().is_dir());
    }
}
