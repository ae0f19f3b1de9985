//! Folder view derived from the `folder` field of each item.
//!
//! Folders never influence script generation. Their only persisted state is
//! the cosmetic [`FolderMeta`] map; structure is recomputed from item paths.

use std::collections::BTreeSet;

use crate::database::normalize_folder;
use crate::{Category, Database, FolderMeta, Item};

/// Aggregate check state of a folder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FolderState {
    /// Every child is checked.
    Checked,
    /// No child is checked, or the folder is empty.
    Unchecked,
    /// Some children are checked.
    Partial,
}

impl FolderState {
    /// Weight of this state in half units when aggregated by a parent.
    fn halves(self) -> u32 {
        match self {
            FolderState::Checked => 2,
            FolderState::Partial => 1,
            FolderState::Unchecked => 0,
        }
    }

    fn from_halves(halves: u32, children: u32) -> Self {
        if children == 0 || halves == 0 {
            FolderState::Unchecked
        } else if halves == children * 2 {
            FolderState::Checked
        } else {
            FolderState::Partial
        }
    }
}

/// One node of a category's folder hierarchy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FolderNode<'a> {
    /// Last path segment, empty for the root.
    pub name: String,
    /// Full slash-delimited path, empty for the root.
    pub path: String,
    /// Items placed directly in this folder.
    pub items: Vec<&'a Item>,
    /// Direct subfolders, sorted by path.
    pub children: Vec<FolderNode<'a>>,
    /// Aggregated check state.
    pub state: FolderState,
}

impl Database {
    /// Every folder path known for a category, ancestors included, sorted.
    pub fn folder_paths(&self, category: Category) -> Vec<String> {
        self.folder_set(category).into_iter().collect()
    }

    fn folder_set(&self, category: Category) -> BTreeSet<String> {
        let mut paths = BTreeSet::new();
        let metadata_paths = self.folder_metadata[category.index()].keys();
        let item_paths = self.items(category).iter().map(|item| &item.folder);
        for path in metadata_paths.chain(item_paths) {
            let mut prefix = String::new();
            for segment in path.split('/').filter(|segment| !segment.is_empty()) {
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(segment);
                paths.insert(prefix.clone());
            }
        }
        paths
    }

    /// Register a folder (and its ancestors). `false` for an empty path.
    pub fn create_folder(&mut self, category: Category, path: &str) -> bool {
        let path = normalize_folder(path);
        if path.is_empty() {
            return false;
        }
        self.ensure_folder_chain(category, &path);
        true
    }

    pub(crate) fn ensure_folder_chain(&mut self, category: Category, path: &str) {
        let metadata = &mut self.folder_metadata[category.index()];
        let mut prefix = String::new();
        for segment in path.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            metadata.entry(prefix.clone()).or_default();
        }
    }

    /// Rename a folder, rewriting the paths of every item and subfolder below it.
    ///
    /// Fails for unknown sources, empty targets and targets nested in the source.
    pub fn rename_folder(&mut self, category: Category, old_path: &str, new_path: &str) -> bool {
        let old_path = normalize_folder(old_path);
        let new_path = normalize_folder(new_path);
        if old_path.is_empty() || new_path.is_empty() {
            return false;
        }
        if !self.folder_set(category).contains(&old_path) {
            return false;
        }
        if old_path == new_path {
            return true;
        }
        if is_within(&new_path, &old_path) {
            return false;
        }

        for item in &mut self.items[category.index()] {
            if is_within(&item.folder, &old_path) {
                item.folder = format!("{new_path}{}", &item.folder[old_path.len()..]);
            }
        }

        let metadata = &mut self.folder_metadata[category.index()];
        let moved: Vec<String> = metadata
            .keys()
            .filter(|key| is_within(key, &old_path))
            .cloned()
            .collect();
        for key in moved {
            if let Some(meta) = metadata.remove(&key) {
                metadata.insert(format!("{new_path}{}", &key[old_path.len()..]), meta);
            }
        }
        self.ensure_folder_chain(category, &new_path);
        true
    }

    /// Delete a folder and its subfolders, moving their items to the root.
    ///
    /// Returns whether the folder existed.
    pub fn delete_folder(&mut self, category: Category, path: &str) -> bool {
        let path = normalize_folder(path);
        if path.is_empty() || !self.folder_set(category).contains(&path) {
            return false;
        }
        for item in &mut self.items[category.index()] {
            if is_within(&item.folder, &path) {
                item.folder.clear();
            }
        }
        self.folder_metadata[category.index()].retain(|key, _| !is_within(key, &path));
        true
    }

    /// Stored metadata for a folder, or the default when none is stored.
    pub fn folder_metadata(&self, category: Category, path: &str) -> FolderMeta {
        self.folder_metadata[category.index()]
            .get(&normalize_folder(path))
            .cloned()
            .unwrap_or_default()
    }

    /// Every stored metadata entry of a category, keyed by path.
    pub fn folder_metadata_entries(
        &self,
        category: Category,
    ) -> impl Iterator<Item = (&String, &FolderMeta)> {
        self.folder_metadata[category.index()].iter()
    }

    /// Store metadata for a folder. `false` for an empty path.
    pub fn set_folder_metadata(&mut self, category: Category, path: &str, meta: FolderMeta) -> bool {
        let path = normalize_folder(path);
        if path.is_empty() {
            return false;
        }
        self.folder_metadata[category.index()].insert(path, meta);
        true
    }

    /// Aggregated check state of a folder; the empty path is the category root.
    pub fn folder_state(&self, category: Category, path: &str) -> FolderState {
        let paths = self.folder_set(category);
        self.state_of(category, &normalize_folder(path), &paths)
    }

    fn state_of(&self, category: Category, path: &str, paths: &BTreeSet<String>) -> FolderState {
        let mut children = 0;
        let mut halves = 0;
        for item in self.items(category).iter().filter(|item| item.folder == path) {
            children += 1;
            if item.checked {
                halves += 2;
            }
        }
        for child in direct_children(paths, path) {
            children += 1;
            halves += self.state_of(category, child, paths).halves();
        }
        FolderState::from_halves(halves, children)
    }

    /// Check or uncheck every item at or below a folder.
    ///
    /// [`FolderState::Partial`] is derived only and is rejected, as are unknown folders.
    pub fn set_folder_state(&mut self, category: Category, path: &str, state: FolderState) -> bool {
        let checked = match state {
            FolderState::Checked => true,
            FolderState::Unchecked => false,
            FolderState::Partial => return false,
        };
        let path = normalize_folder(path);
        if !path.is_empty() && !self.folder_set(category).contains(&path) {
            return false;
        }
        for item in &mut self.items[category.index()] {
            if path.is_empty() || is_within(&item.folder, &path) {
                item.checked = checked;
            }
        }
        true
    }

    /// Hierarchical view of a category, rooted at the empty path.
    pub fn folder_tree(&self, category: Category) -> FolderNode<'_> {
        let paths = self.folder_set(category);
        self.build_node(category, "", &paths)
    }

    fn build_node<'a>(
        &'a self,
        category: Category,
        path: &str,
        paths: &BTreeSet<String>,
    ) -> FolderNode<'a> {
        let children: Vec<FolderNode<'a>> = direct_children(paths, path)
            .map(|child| self.build_node(category, child, paths))
            .collect();
        let items: Vec<&Item> = self
            .items(category)
            .iter()
            .filter(|item| item.folder == path)
            .collect();

        let mut halves: u32 = items.iter().filter(|item| item.checked).count() as u32 * 2;
        halves += children.iter().map(|child| child.state.halves()).sum::<u32>();
        let state = FolderState::from_halves(halves, (items.len() + children.len()) as u32);

        FolderNode {
            name: path.rsplit('/').next().unwrap_or_default().to_string(),
            path: path.to_string(),
            items,
            children,
            state,
        }
    }
}

/// Whether `folder` equals `path` or lies below it.
fn is_within(folder: &str, path: &str) -> bool {
    folder == path
        || (folder.len() > path.len()
            && folder.starts_with(path)
            && folder.as_bytes()[path.len()] == b'/')
}

fn direct_children<'p>(
    paths: &'p BTreeSet<String>,
    parent: &'p str,
) -> impl Iterator<Item = &'p String> + 'p {
    paths.iter().filter(move |candidate| {
        let own_parent = candidate.rsplit_once('/').map_or("", |(head, _)| head);
        own_parent == parent
    })
}
