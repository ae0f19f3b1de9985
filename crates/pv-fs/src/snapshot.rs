//! JSON snapshot format of the database.
//!
//! Layout: one key per category holding a list of items, plus
//! `max_parallel_downloads` and `folder_metadata` (category, then folder
//! path, then metadata). Loading accepts older shapes: bare URL strings and
//! item objects missing `name`, `folder` or `checked`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use pv_core::{Category, CoreError, CoreResult, Database, FolderMeta, Item};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

const MAX_PARALLEL_KEY: &str = "max_parallel_downloads";
const FOLDER_METADATA_KEY: &str = "folder_metadata";

#[derive(Serialize)]
struct Snapshot<'a> {
    #[serde(flatten)]
    categories: BTreeMap<&'static str, &'a [Item]>,
    max_parallel_downloads: u32,
    folder_metadata: BTreeMap<&'static str, BTreeMap<&'a str, &'a FolderMeta>>,
}

/// Serialize a database to pretty-printed JSON.
pub fn to_json(database: &Database) -> CoreResult<String> {
    let snapshot = Snapshot {
        categories: Category::ALL
            .iter()
            .map(|&category| (category.key(), database.items(category)))
            .collect(),
        max_parallel_downloads: database.max_parallel_downloads(),
        folder_metadata: Category::ALL
            .iter()
            .map(|&category| {
                let entries: BTreeMap<&str, &FolderMeta> = database
                    .folder_metadata_entries(category)
                    .map(|(path, meta)| (path.as_str(), meta))
                    .collect();
                (category.key(), entries)
            })
            .filter(|(_, entries)| !entries.is_empty())
            .collect(),
    };
    serde_json::to_string_pretty(&snapshot).map_err(|err| CoreError::Storage(err.to_string()))
}

/// Parse a snapshot, upgrading legacy shapes.
///
/// Only malformed JSON or a non-object document is an error; bad sections
/// and entries are skipped with a warning.
pub fn from_json(contents: &str) -> CoreResult<Database> {
    let value: Value =
        serde_json::from_str(contents).map_err(|err| CoreError::Storage(err.to_string()))?;
    let Value::Object(root) = value else {
        return Err(CoreError::Storage("database root is not an object".into()));
    };

    let mut database = Database::new();
    for category in Category::ALL {
        match root.get(category.key()) {
            None => {}
            Some(Value::Array(entries)) => load_items(&mut database, category, entries),
            Some(_) => warn!(%category, "category is not a list, skipping"),
        }
    }

    match root.get(MAX_PARALLEL_KEY) {
        None => {}
        Some(value) => {
            let parsed = value.as_u64().and_then(|value| u32::try_from(value).ok());
            if !parsed.is_some_and(|value| database.set_max_parallel_downloads(value)) {
                warn!(%value, "ignoring invalid max_parallel_downloads");
            }
        }
    }

    match root.get(FOLDER_METADATA_KEY) {
        None => {}
        Some(Value::Object(by_category)) => load_folder_metadata(&mut database, by_category),
        Some(_) => warn!("folder_metadata is not an object, resetting"),
    }

    Ok(database)
}

fn load_items(database: &mut Database, category: Category, entries: &[Value]) {
    for entry in entries {
        let item = match entry {
            Value::String(url) => Some(Item::new(url.clone())),
            Value::Object(fields) => match fields.get("url") {
                Some(Value::String(url)) => Some(item_from_fields(category, url, fields)),
                _ => {
                    warn!(%category, "skipping item without a url");
                    None
                }
            },
            _ => {
                warn!(%category, "skipping item without a url");
                None
            }
        };
        if let Some(item) = item {
            if !database.insert(category, item) {
                debug!(%category, "dropping blank or duplicate item");
            }
        }
    }
}

/// Build an item from its object form; each bad field falls back to its default.
fn item_from_fields(category: Category, url: &str, fields: &Map<String, Value>) -> Item {
    let mut item = Item::new(url);
    match fields.get("checked") {
        None => {}
        Some(Value::Bool(checked)) => item.checked = *checked,
        Some(other) => warn!(%category, url, value = %other, "invalid checked flag, keeping item checked"),
    }
    match fields.get("name") {
        None | Some(Value::Null) => {}
        Some(Value::String(name)) => item.name = Some(name.clone()),
        Some(other) => warn!(%category, url, value = %other, "invalid name, ignoring it"),
    }
    match fields.get("folder") {
        None | Some(Value::Null) => {}
        Some(Value::String(folder)) => item.folder = folder.clone(),
        Some(other) => warn!(%category, url, value = %other, "invalid folder, using the root"),
    }
    item
}

fn load_folder_metadata(database: &mut Database, by_category: &Map<String, Value>) {
    for (key, folders) in by_category {
        let Some(category) = Category::from_key(key) else {
            debug!(key = %key, "ignoring folder metadata of unknown category");
            continue;
        };
        let Value::Object(folders) = folders else {
            warn!(%category, "folder metadata is not an object, skipping");
            continue;
        };
        for (path, meta) in folders {
            match serde_json::from_value::<FolderMeta>(meta.clone()) {
                Ok(meta) => {
                    database.set_folder_metadata(category, path, meta);
                }
                Err(err) => warn!(%category, path = %path, error = %err, "skipping folder metadata"),
            }
        }
    }
}

/// Replace `path` with `contents` through a temporary file and a rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> CoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| CoreError::Storage(err.to_string()))?;
    }

    let temp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        file.write_all(contents.as_bytes())
            .map_err(|err| CoreError::Storage(err.to_string()))?;
        file.sync_all()
            .map_err(|err| CoreError::Storage(err.to_string()))?;
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(CoreError::Storage(err.to_string()));
    }
    Ok(())
}
