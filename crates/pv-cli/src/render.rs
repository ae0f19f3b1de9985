//! Plain-text views of the database for terminal output.

use std::fmt::Write;

use pv_core::{Category, Database, FolderNode, FolderState, Item};
use pv_resolver::SearchResult;

/// Checked and total counts per category, then the parallel setting.
pub fn summary(db: &Database) -> String {
    let mut out = String::new();
    for category in Category::ALL {
        let items = db.items(category);
        let checked = items.iter().filter(|item| item.checked).count();
        let _ = writeln!(out, "{:<20}{checked}/{}", category.label(), items.len());
    }
    let _ = writeln!(out, "Max parallel downloads: {}", db.max_parallel_downloads());
    out
}

/// Items of one category, or of every non-empty category.
pub fn listing(db: &Database, category: Option<Category>, checked_only: bool) -> String {
    let categories: Vec<Category> = match category {
        Some(category) => vec![category],
        None => Category::ALL
            .into_iter()
            .filter(|&category| !db.items(category).is_empty())
            .collect(),
    };

    let mut out = String::new();
    for category in categories {
        let items = db.items(category);
        let checked = items.iter().filter(|item| item.checked).count();
        let _ = writeln!(
            out,
            "{} ({}) {checked}/{}",
            category.key(),
            category.label(),
            items.len()
        );
        for item in items.iter().filter(|item| item.checked || !checked_only) {
            let _ = writeln!(out, "  {}", item_line(item));
        }
    }
    out
}

fn item_line(item: &Item) -> String {
    let mut line = format!("[{}] {}", mark(item.checked), item.display_name());
    if item.name.as_deref().is_some_and(|name| name != item.url) {
        let _ = write!(line, " <{}>", item.url);
    }
    if !item.folder.is_empty() {
        let _ = write!(line, " in {}", item.folder);
    }
    line
}

/// Folder hierarchy of a category with aggregated states.
pub fn tree(category: Category, root: &FolderNode<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} [{}]", category.key(), state_label(root.state));
    write_node(&mut out, root, 1);
    out
}

fn write_node(out: &mut String, node: &FolderNode<'_>, depth: usize) {
    let indent = "  ".repeat(depth);
    for item in &node.items {
        let _ = writeln!(out, "{indent}[{}] {}", mark(item.checked), item.display_name());
    }
    for child in &node.children {
        let _ = writeln!(out, "{indent}{}/ [{}]", child.name, state_label(child.state));
        write_node(out, child, depth + 1);
    }
}

/// Numbered search hits.
pub fn search_results(results: &[SearchResult]) -> String {
    let mut out = String::new();
    for (index, result) in results.iter().enumerate() {
        let _ = writeln!(
            out,
            "{:>2}. {} by {} [{}, {} downloads]",
            index + 1,
            result.title,
            result.author,
            result.kind,
            result.downloads
        );
        let _ = writeln!(out, "    {}", result.download_url);
    }
    out
}

fn mark(checked: bool) -> char {
    if checked {
        'x'
    } else {
        ' '
    }
}

fn state_label(state: FolderState) -> &'static str {
    match state {
        FolderState::Checked => "checked",
        FolderState::Partial => "partial",
        FolderState::Unchecked => "unchecked",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_core::NoNames;
    use pv_resolver::SearchPlatform;

    fn sample() -> Database {
        let mut db = Database::new();
        db.add_item(Category::LoraModels, "https://x/a.safetensors", true, &NoNames);
        db.add_item(Category::LoraModels, "https://x/b.safetensors", false, &NoNames);
        db.add_item(Category::LoraModels, "https://x/c.safetensors", true, &NoNames);
        db.set_name(Category::LoraModels, "https://x/a.safetensors", Some("Model A".into()));
        db.set_folder(Category::LoraModels, "https://x/a.safetensors", "styles/anime");
        db.set_folder(Category::LoraModels, "https://x/b.safetensors", "styles");
        db.add_item(Category::Nodes, "https://github.com/a/b", true, &NoNames);
        db
    }

    #[test]
    fn listing_snapshot() {
        insta::assert_snapshot!(listing(&sample(), None, false), @r"
        nodes (ComfyUI Nodes) 1/1
          [x] https://github.com/a/b
        lora_models (LoRA Models) 2/3
          [x] Model A <https://x/a.safetensors> in styles/anime
          [ ] https://x/b.safetensors in styles
          [x] https://x/c.safetensors
        ");
    }

    #[test]
    fn checked_only_listing_hides_unchecked() {
        let out = listing(&sample(), Some(Category::LoraModels), true);
        assert!(!out.contains("b.safetensors"));
        assert!(out.starts_with("lora_models (LoRA Models) 2/3\n"));
    }

    #[test]
    fn tree_snapshot() {
        let db = sample();
        let root = db.folder_tree(Category::LoraModels);
        insta::assert_snapshot!(tree(Category::LoraModels, &root), @r"
        lora_models [partial]
          [x] https://x/c.safetensors
          styles/ [partial]
            [ ] https://x/b.safetensors
            anime/ [checked]
              [x] Model A
        ");
    }

    #[test]
    fn summary_counts_checked_items() {
        let out = summary(&sample());
        assert!(out.contains("LoRA Models         2/3\n"));
        assert!(out.contains("ComfyUI Nodes       1/1\n"));
        assert!(out.ends_with("Max parallel downloads: 4\n"));
    }

    #[test]
    fn search_results_are_numbered() {
        let results = vec![SearchResult {
            title: "Flux".into(),
            author: "bfl".into(),
            description: String::new(),
            download_url: "https://huggingface.co/bfl/flux".into(),
            downloads: 12,
            kind: "text-to-image".into(),
            platform: SearchPlatform::HuggingFace,
        }];
        assert_eq!(
            search_results(&results),
            " 1. Flux by bfl [text-to-image, 12 downloads]\n    https://huggingface.co/bfl/flux\n"
        );
    }
}
