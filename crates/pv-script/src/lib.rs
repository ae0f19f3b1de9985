//! Provisioning script generation and merge-parsing.
//!
//! Each category becomes a shell array of double-quoted entries, one per
//! line, optionally followed by a `# name` comment:
//!
//! ```text
//! CHECKPOINT_MODELS=(
//!     "https://host/a.safetensors" # Model A
//! )
//! ```
//!
//! [`parse`] recognizes exactly what [`generate`] emits and merges it into an
//! existing database instead of replacing it. Parsing needs no template.

mod template;

use std::path::PathBuf;
use std::sync::LazyLock;

use pv_core::{Category, Database, Item, NameResolver};
use regex::{Captures, Regex};
use thiserror::Error;
use tracing::{debug, error};

pub use template::{candidate_paths, Template, TEMPLATE_ENV, TEMPLATE_FILE_NAME};

/// Result type for script operations.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Errors raised while producing scripts.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// No template file exists at any searched location.
    #[error("template file not found (searched: {})", display_paths(.searched))]
    TemplateMissing {
        /// Every location that was checked.
        searched: Vec<PathBuf>,
    },
    /// A template file exists but cannot be read.
    #[error("failed to read template {}: {source}", .path.display())]
    TemplateUnreadable {
        /// The template path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Placeholder holding the parallel download count.
pub const MAX_PARALLEL_PLACEHOLDER: &str = "max_parallel_downloads";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([a-z_]+)\}").expect("valid placeholder pattern"));

static ARRAY_STARTS: LazyLock<Vec<(Category, Regex)>> = LazyLock::new(|| {
    Category::ALL
        .into_iter()
        .map(|category| {
            let pattern = format!(r"\b{}=\(", category.array_name());
            (category, Regex::new(&pattern).expect("valid array pattern"))
        })
        .collect()
});

static ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^"([^"]+)"(?:\s*#\s*(.*))?"#).expect("valid entry pattern")
});

static MAX_PARALLEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"MAX_PARALLEL_DOWNLOADS=(\d+)").expect("valid setting pattern")
});

/// One quoted entry recovered from a script array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScriptEntry {
    /// The quoted URL or package name.
    pub url: String,
    /// Trailing `# comment`, used as a display name.
    pub comment: Option<String>,
}

/// Summary of a merge-parse.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseReport {
    /// Existing items that were re-checked.
    pub checked: usize,
    /// Items that were new to the database.
    pub added: usize,
    /// Names adopted from script comments.
    pub named: usize,
    /// Parallel download count applied from the script.
    pub max_parallel_downloads: Option<u32>,
    /// Entries that could not be applied.
    pub failures: Vec<String>,
}

impl ParseReport {
    /// Total number of entries that ended up checked.
    pub fn total(&self) -> usize {
        self.checked + self.added
    }
}

/// Script generator bound to a loaded template; see [`parse`] for the reverse direction.
#[derive(Clone, Debug)]
pub struct ScriptCodec {
    template: Template,
}

impl ScriptCodec {
    /// Create a codec around a loaded template.
    pub fn new(template: Template) -> Self {
        Self { template }
    }

    /// Render the checked items of `db` into the template.
    pub fn generate(&self, db: &Database) -> String {
        generate(db, &self.template)
    }
}

/// Render the checked items of `db` into `template`.
///
/// Unknown placeholders are left untouched.
pub fn generate(db: &Database, template: &Template) -> String {
    PLACEHOLDER
        .replace_all(template.text(), |caps: &Captures<'_>| {
            let key = &caps[1];
            if key == MAX_PARALLEL_PLACEHOLDER {
                return db.max_parallel_downloads().to_string();
            }
            match Category::from_key(key) {
                Some(category) => format_array(db.items(category)),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Render the checked items of one category as array lines.
pub fn format_array(items: &[Item]) -> String {
    items
        .iter()
        .filter(|item| item.checked && !item.url.is_empty())
        .map(|item| match item.name.as_deref() {
            Some(name) if !name.is_empty() && name != item.url => {
                format!("    \"{}\" # {}", item.url, single_line(name))
            }
            _ => format!("    \"{}\"", item.url),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn single_line(name: &str) -> String {
    name.lines().map(str::trim).collect::<Vec<_>>().join(" ")
}

/// Merge a script into `db`.
///
/// Every item is unchecked first; entries named by the script are then
/// checked, or added when new. Items the script does not mention are kept.
/// A comment becomes the name of a new item, or of an existing item that has
/// none. Arrays for unknown categories are ignored.
pub fn parse(text: &str, db: &mut Database, resolver: &impl NameResolver) -> ParseReport {
    let mut report = ParseReport::default();
    db.clear_all_checked();

    for category in Category::ALL {
        for entry in extract_entries(text, category) {
            apply_entry(db, category, entry, resolver, &mut report);
        }
    }

    if let Some(caps) = MAX_PARALLEL.captures(text) {
        if db.update_max_parallel_downloads(&caps[1]) {
            report.max_parallel_downloads = Some(db.max_parallel_downloads());
        }
    }

    debug!(
        checked = report.checked,
        added = report.added,
        named = report.named,
        "merged script"
    );
    report
}

fn apply_entry(
    db: &mut Database,
    category: Category,
    entry: ScriptEntry,
    resolver: &impl NameResolver,
    report: &mut ParseReport,
) {
    let ScriptEntry { url, comment } = entry;

    if let Some(existing) = db.find(category, &url) {
        let unnamed = existing.name.as_deref().map_or(true, str::is_empty);
        db.set_checked(category, &url, true);
        report.checked += 1;
        if let (true, Some(comment)) = (unnamed, comment) {
            db.set_name(category, &url, Some(comment));
            report.named += 1;
        }
        return;
    }

    let added = match comment {
        Some(comment) => {
            let inserted = db.insert(
                category,
                Item {
                    name: Some(comment),
                    ..Item::new(url.as_str())
                },
            );
            if inserted {
                report.named += 1;
            }
            inserted
        }
        None => db.add_item(category, &url, true, resolver),
    };

    if added {
        report.added += 1;
    } else {
        error!(%category, url = %url, "failed to add script entry");
        report.failures.push(format!("{category}: could not add {url}"));
    }
}

/// Quoted entries of one category's array, in script order.
pub fn extract_entries(text: &str, category: Category) -> Vec<ScriptEntry> {
    let Some(block) = array_block(text, category) else {
        return Vec::new();
    };
    block
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('"'))
        .filter_map(|line| ENTRY.captures(line))
        .map(|caps| ScriptEntry {
            url: caps[1].to_string(),
            comment: caps
                .get(2)
                .map(|comment| comment.as_str().trim().to_string())
                .filter(|comment| !comment.is_empty()),
        })
        .collect()
}

/// Body of `NAME=( ... )` for a category.
///
/// The closing parenthesis is the first one outside a quoted string or a
/// `#` comment, so names such as `Model (v2) by someone` survive.
fn array_block(text: &str, category: Category) -> Option<&str> {
    let (_, pattern) = ARRAY_STARTS
        .iter()
        .find(|(candidate, _)| *candidate == category)?;
    let start = pattern.find(text)?.end();
    let body = &text[start..];

    let mut in_quote = false;
    let mut in_comment = false;
    for (offset, ch) in body.char_indices() {
        match ch {
            '\n' => in_comment = false,
            _ if in_comment => {}
            '"' => in_quote = !in_quote,
            '#' if !in_quote => in_comment = true,
            ')' if !in_quote => return Some(&body[..offset]),
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_core::NoNames;

    const SMALL_TEMPLATE: &str = "#!/bin/bash\nAPT_PACKAGES=(\n{apt_packages}\n)\n\nCHECKPOINT_MODELS=(\n{checkpoint_models}\n)\n\nMAX_PARALLEL_DOWNLOADS={max_parallel_downloads}\n";

    fn full_template() -> Template {
        let mut text = String::from("#!/bin/bash\n");
        for category in Category::ALL {
            text.push_str(&format!(
                "{}=(\n{{{}}}\n)\n\n",
                category.array_name(),
                category.key()
            ));
        }
        text.push_str("MAX_PARALLEL_DOWNLOADS={max_parallel_downloads}\n");
        Template::new(text)
    }

    fn named(url: &str, name: Option<&str>, checked: bool) -> Item {
        Item {
            checked,
            name: name.map(str::to_string),
            ..Item::new(url)
        }
    }

    struct Resolved;

    impl NameResolver for Resolved {
        fn resolve(&self, url: &str) -> Option<String> {
            Some(format!("resolved {url}"))
        }
    }

    #[test]
    fn generates_checked_items_with_name_comments() {
        let mut db = Database::new();
        db.insert(Category::AptPackages, named("git", None, true));
        db.insert(Category::AptPackages, named("htop", None, false));
        db.insert(
            Category::CheckpointModels,
            named("https://host/a.safetensors", Some("Model A"), true),
        );
        db.insert(
            Category::CheckpointModels,
            named("https://host/b.ckpt", Some("https://host/b.ckpt"), true),
        );
        db.set_max_parallel_downloads(6);

        let script = generate(&db, &Template::new(SMALL_TEMPLATE));
        insta::assert_snapshot!(script, @r###"
        #!/bin/bash
        APT_PACKAGES=(
            "git"
        )

        CHECKPOINT_MODELS=(
            "https://host/a.safetensors" # Model A
            "https://host/b.ckpt"
        )

        MAX_PARALLEL_DOWNLOADS=6
        "###);
    }

    #[test]
    fn empty_categories_render_as_empty_arrays() {
        let script = generate(&Database::new(), &Template::new(SMALL_TEMPLATE));
        assert!(script.contains("APT_PACKAGES=(\n\n)"));
        assert!(script.contains("MAX_PARALLEL_DOWNLOADS=4"));
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let template = Template::new("echo {workspace} {nodes}");
        let mut db = Database::new();
        db.insert(Category::Nodes, Item::new("https://github.com/a/b"));
        assert_eq!(
            generate(&db, &template),
            "echo {workspace}     \"https://github.com/a/b\""
        );
    }

    #[test]
    fn unchecked_items_never_appear() {
        let mut db = Database::new();
        db.insert(Category::CheckpointModels, named("https://host/off", None, false));
        let script = generate(&db, &full_template());
        assert!(!script.contains("https://host/off"));
        assert_eq!(db.items(Category::CheckpointModels).len(), 1);
    }

    #[test]
    fn round_trip_restores_checked_set_and_names() {
        let mut db = Database::new();
        db.insert(
            Category::CheckpointModels,
            named("https://host/a.safetensors", Some("Model A"), true),
        );
        db.insert(Category::LoraModels, named("https://host/l.safetensors", None, true));
        db.insert(Category::LoraModels, named("https://host/off.pt", Some("Off"), false));
        db.set_folder(Category::LoraModels, "https://host/l.safetensors", "styles");
        db.set_max_parallel_downloads(3);

        let script = generate(&db, &full_template());
        assert!(script.contains("\"https://host/a.safetensors\" # Model A"));

        let mut copy = db.clone();
        copy.clear_all_checked();
        copy.set_max_parallel_downloads(9);
        let report = parse(&script, &mut copy, &NoNames);

        assert_eq!(copy, db);
        assert_eq!(report.checked, 2);
        assert_eq!(report.added, 0);
        assert!(report.failures.is_empty());
        assert_eq!(generate(&copy, &full_template()), script);
    }

    #[test]
    fn names_with_parentheses_survive_round_trip() {
        let mut db = Database::new();
        db.insert(
            Category::LoraModels,
            named(
                "https://civitai.com/api/download/models/1",
                Some("🎨 Detail (v2.0) by someone"),
                true,
            ),
        );
        db.insert(Category::LoraModels, named("https://host/second.pt", None, true));
        let script = generate(&db, &full_template());

        let entries = extract_entries(&script, Category::LoraModels);
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].comment.as_deref(),
            Some("🎨 Detail (v2.0) by someone")
        );
    }

    #[test]
    fn merge_keeps_unmentioned_items() {
        let mut db = Database::new();
        db.insert(Category::CheckpointModels, named("A", None, true));
        db.insert(Category::CheckpointModels, named("B", None, false));

        let text = "CHECKPOINT_MODELS=(\n    \"A\"\n)\n";
        parse(text, &mut db, &NoNames);

        assert!(db.find(Category::CheckpointModels, "A").unwrap().checked);
        assert!(!db.find(Category::CheckpointModels, "B").unwrap().checked);
        assert_eq!(db.items(Category::CheckpointModels).len(), 2);
    }

    #[test]
    fn categories_missing_from_text_end_up_unchecked() {
        let mut db = Database::new();
        db.insert(Category::VaeModels, named("vae", Some("V"), true));
        parse("NODES=(\n)\n", &mut db, &NoNames);

        let item = db.find(Category::VaeModels, "vae").unwrap();
        assert!(!item.checked);
        assert_eq!(item.name.as_deref(), Some("V"));
    }

    #[test]
    fn comments_name_new_and_unnamed_items_only() {
        let mut db = Database::new();
        db.insert(Category::LoraModels, named("kept", Some("Original"), false));
        db.insert(Category::LoraModels, named("bare", None, false));

        let text = r#"LORA_MODELS=(
    "kept" # Replacement
    "bare" # Adopted
    "fresh" # Fresh Name
    "resolved"
)"#;
        let report = parse(text, &mut db, &Resolved);

        let name = |url: &str| db.find(Category::LoraModels, url).unwrap().name.clone();
        assert_eq!(name("kept").as_deref(), Some("Original"));
        assert_eq!(name("bare").as_deref(), Some("Adopted"));
        assert_eq!(name("fresh").as_deref(), Some("Fresh Name"));
        assert_eq!(name("resolved").as_deref(), Some("resolved resolved"));
        assert_eq!(report.added, 2);
        assert_eq!(report.checked, 2);
        assert_eq!(report.named, 2);
        assert_eq!(report.total(), 4);
    }

    #[test]
    fn unknown_arrays_and_noise_are_ignored() {
        let mut db = Database::new();
        let text = r#"
GGUF_MODELS=(
    "https://host/unknown.gguf"
)
NODES=(
    # a shell comment
    "https://github.com/a/b"
    not-quoted
)
"#;
        let report = parse(text, &mut db, &NoNames);
        assert_eq!(report.added, 1);
        assert_eq!(db.total_items(), 1);
        assert!(db.contains(Category::Nodes, "https://github.com/a/b"));
    }

    #[test]
    fn similar_array_names_do_not_collide() {
        let text = "CLIP_VISION_MODELS=(\n    \"vision\"\n)\nCLIP_MODELS=(\n    \"clip\"\n)\n";
        let urls = |category| {
            extract_entries(text, category)
                .into_iter()
                .map(|entry| entry.url)
                .collect::<Vec<_>>()
        };
        assert_eq!(urls(Category::ClipVisionModels), ["vision"]);
        assert_eq!(urls(Category::ClipModels), ["clip"]);
    }

    #[test]
    fn parallel_download_setting_is_applied_when_valid() {
        let mut db = Database::new();
        let report = parse("MAX_PARALLEL_DOWNLOADS=12\n", &mut db, &NoNames);
        assert_eq!(report.max_parallel_downloads, Some(12));
        assert_eq!(db.max_parallel_downloads(), 12);

        let report = parse("MAX_PARALLEL_DOWNLOADS=0\n", &mut db, &NoNames);
        assert_eq!(report.max_parallel_downloads, None);
        assert_eq!(db.max_parallel_downloads(), 12);

        parse("MAX_PARALLEL_DOWNLOADS=abc\n", &mut db, &NoNames);
        assert_eq!(db.max_parallel_downloads(), 12);
    }

    #[test]
    fn unterminated_array_yields_nothing() {
        assert!(extract_entries("NODES=(\n    \"a\"\n", Category::Nodes).is_empty());
    }

    #[test]
    fn shipped_template_round_trips() {
        let template = Template::new(include_str!("../../../resources/template.sh"));
        for category in Category::ALL {
            let placeholder = format!("{{{}}}", category.key());
            assert!(
                template.text().contains(&placeholder),
                "missing {placeholder}"
            );
        }

        let mut db = Database::new();
        for category in Category::ALL {
            db.insert(
                category,
                named(&format!("https://host/{}.bin", category.key()), Some("N (1)"), true),
            );
        }
        let script = generate(&db, &template);

        let mut copy = db.clone();
        copy.clear_all_checked();
        let report = parse(&script, &mut copy, &NoNames);
        assert_eq!(report.checked, Category::COUNT);
        assert_eq!(copy, db);
    }
}
