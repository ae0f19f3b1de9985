//! Item storage: the persistent catalogue of every URL ever referenced.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Category, NameResolver};

/// Parallel download setting of a freshly created database.
pub const DEFAULT_MAX_PARALLEL_DOWNLOADS: u32 = 4;

/// One URL or package reference within a category.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Item {
    /// Identity of the item within its category.
    pub url: String,
    /// Whether the item goes into the next generated script.
    #[serde(default = "default_true")]
    pub checked: bool,
    /// Cached display label.
    #[serde(default)]
    pub name: Option<String>,
    /// Slash-delimited display folder, empty for the root.
    #[serde(default)]
    pub folder: String,
}

impl Item {
    /// Create a checked, unnamed item at the root folder.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            checked: true,
            name: None,
            folder: String::new(),
        }
    }

    /// The cached name, falling back to the URL.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.url)
    }
}

/// Cosmetic per-folder state.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct FolderMeta {
    /// Whether the folder is shown expanded.
    #[serde(default = "default_true")]
    pub expanded: bool,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Optional icon override.
    #[serde(default)]
    pub custom_icon: Option<String>,
}

impl Default for FolderMeta {
    fn default() -> Self {
        Self {
            expanded: true,
            description: String::new(),
            custom_icon: None,
        }
    }
}

/// The aggregate of every category plus global settings.
///
/// Mutations only touch memory; callers persist explicitly afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Database {
    pub(crate) items: [Vec<Item>; Category::COUNT],
    pub(crate) folder_metadata: [BTreeMap<String, FolderMeta>; Category::COUNT],
    max_parallel_downloads: u32,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Create a database with every category empty.
    pub fn new() -> Self {
        Self {
            items: std::array::from_fn(|_| Vec::new()),
            folder_metadata: std::array::from_fn(|_| BTreeMap::new()),
            max_parallel_downloads: DEFAULT_MAX_PARALLEL_DOWNLOADS,
        }
    }

    /// All items of a category in insertion order.
    pub fn items(&self, category: Category) -> &[Item] {
        &self.items[category.index()]
    }

    /// Checked items of a category in insertion order.
    pub fn checked_items(&self, category: Category) -> Vec<&Item> {
        self.items(category)
            .iter()
            .filter(|item| item.checked)
            .collect()
    }

    /// Look up an item by URL.
    pub fn find(&self, category: Category, url: &str) -> Option<&Item> {
        self.items(category).iter().find(|item| item.url == url)
    }

    fn find_mut(&mut self, category: Category, url: &str) -> Option<&mut Item> {
        self.items[category.index()]
            .iter_mut()
            .find(|item| item.url == url)
    }

    /// Whether the category already holds `url`.
    pub fn contains(&self, category: Category, url: &str) -> bool {
        self.find(category, url).is_some()
    }

    /// Number of items across every category.
    pub fn total_items(&self) -> usize {
        self.items.iter().map(Vec::len).sum()
    }

    /// Add a URL, resolving its display name through `resolver`.
    ///
    /// Returns `false` without mutating anything when the URL is blank or
    /// already present in the category.
    pub fn add_item(
        &mut self,
        category: Category,
        url: &str,
        checked: bool,
        resolver: &impl NameResolver,
    ) -> bool {
        if url.trim().is_empty() || self.contains(category, url) {
            debug!(%category, url, "rejecting blank or duplicate item");
            return false;
        }
        let name = resolver.resolve(url);
        self.items[category.index()].push(Item {
            url: url.to_string(),
            checked,
            name,
            folder: String::new(),
        });
        true
    }

    /// Append a fully formed item, keeping its name and folder.
    ///
    /// Same rejection rules as [`Database::add_item`].
    pub fn insert(&mut self, category: Category, mut item: Item) -> bool {
        if item.url.trim().is_empty() || self.contains(category, &item.url) {
            return false;
        }
        item.folder = normalize_folder(&item.folder);
        self.items[category.index()].push(item);
        true
    }

    /// Delete an item. Returns whether anything was removed.
    pub fn remove_item(&mut self, category: Category, url: &str) -> bool {
        let items = &mut self.items[category.index()];
        let before = items.len();
        items.retain(|item| item.url != url);
        items.len() != before
    }

    /// Set the checked flag of one item. `false` when the URL is unknown.
    pub fn set_checked(&mut self, category: Category, url: &str, checked: bool) -> bool {
        match self.find_mut(category, url) {
            Some(item) => {
                item.checked = checked;
                true
            }
            None => false,
        }
    }

    /// Replace the cached name of one item. `false` when the URL is unknown.
    pub fn set_name(&mut self, category: Category, url: &str, name: Option<String>) -> bool {
        match self.find_mut(category, url) {
            Some(item) => {
                item.name = name;
                true
            }
            None => false,
        }
    }

    /// Set the checked flag of every item in a category, folders included.
    pub fn set_all_checked(&mut self, category: Category, checked: bool) -> bool {
        for item in &mut self.items[category.index()] {
            item.checked = checked;
        }
        true
    }

    /// Uncheck every item of every category.
    pub fn clear_all_checked(&mut self) {
        for items in &mut self.items {
            for item in items {
                item.checked = false;
            }
        }
    }

    /// Move one item into a folder, creating the folder chain if needed.
    ///
    /// An empty path moves the item back to the root.
    pub fn set_folder(&mut self, category: Category, url: &str, folder: &str) -> bool {
        let folder = normalize_folder(folder);
        let Some(item) = self.find_mut(category, url) else {
            return false;
        };
        item.folder = folder.clone();
        if !folder.is_empty() {
            self.ensure_folder_chain(category, &folder);
        }
        true
    }

    /// Items whose folder is exactly `folder` (empty for the root).
    pub fn items_in_folder(&self, category: Category, folder: &str) -> Vec<&Item> {
        let folder = normalize_folder(folder);
        self.items(category)
            .iter()
            .filter(|item| item.folder == folder)
            .collect()
    }

    /// The global parallel download setting.
    pub fn max_parallel_downloads(&self) -> u32 {
        self.max_parallel_downloads
    }

    /// Set the parallel download count; values below one are rejected.
    pub fn set_max_parallel_downloads(&mut self, value: u32) -> bool {
        if value < 1 {
            return false;
        }
        self.max_parallel_downloads = value;
        true
    }

    /// Parse and apply a parallel download count from user input.
    ///
    /// Non-integer or non-positive input leaves the prior value in place.
    pub fn update_max_parallel_downloads(&mut self, value: &str) -> bool {
        match value.trim().parse::<u32>() {
            Ok(parsed) => self.set_max_parallel_downloads(parsed),
            Err(_) => {
                debug!(value, "ignoring invalid parallel download count");
                false
            }
        }
    }
}

/// Canonical form of a folder path: trimmed segments joined by `/`.
pub(crate) fn normalize_folder(path: &str) -> String {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn default_true() -> bool {
    true
}
