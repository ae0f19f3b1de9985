//! Locating and loading the provisioning script template.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{ScriptError, ScriptResult};

/// File name of the template on disk.
pub const TEMPLATE_FILE_NAME: &str = "template.sh";

/// Environment variable pointing at an explicit template file.
pub const TEMPLATE_ENV: &str = "PROVISIONER_TEMPLATE";

/// A shell script with `{category_key}` and `{max_parallel_downloads}` placeholders.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    text: String,
    source: Option<PathBuf>,
}

impl Template {
    /// Wrap template text that did not come from a file.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
        }
    }

    /// Load a template from an explicit path.
    pub fn from_file(path: &Path) -> ScriptResult<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Self {
                text,
                source: Some(path.to_path_buf()),
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ScriptError::TemplateMissing {
                searched: vec![path.to_path_buf()],
            }),
            Err(source) => Err(ScriptError::TemplateUnreadable {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Search the standard locations, then `extra_dirs`, for a template file.
    pub fn locate(extra_dirs: &[PathBuf]) -> ScriptResult<Self> {
        let searched = candidate_paths(extra_dirs);
        for path in &searched {
            if path.is_file() {
                debug!("using template at {}", path.display());
                return Self::from_file(path);
            }
        }
        Err(ScriptError::TemplateMissing { searched })
    }

    /// Raw template text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// File the template was read from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

/// Candidate template paths in lookup order.
pub fn candidate_paths(extra_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(custom) = std::env::var(TEMPLATE_ENV) {
        if !custom.trim().is_empty() {
            candidates.push(PathBuf::from(custom));
        }
    }

    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(TEMPLATE_FILE_NAME));
        candidates.push(cwd.join("resources").join(TEMPLATE_FILE_NAME));
    }

    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(PathBuf::from))
    {
        candidates.push(exe_dir.join(TEMPLATE_FILE_NAME));
        candidates.push(exe_dir.join("resources").join(TEMPLATE_FILE_NAME));
        if let Some(parent) = exe_dir.parent() {
            candidates.push(parent.join("resources").join(TEMPLATE_FILE_NAME));
        }
    }

    candidates.extend(extra_dirs.iter().map(|dir| dir.join(TEMPLATE_FILE_NAME)));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_reported_as_missing_template() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("nope.sh");
        match Template::from_file(&path) {
            Err(ScriptError::TemplateMissing { searched }) => assert_eq!(searched, vec![path]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn locate_falls_back_to_extra_dirs() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join(TEMPLATE_FILE_NAME);
        fs::write(&path, "NODES=(\n{nodes}\n)\n").expect("write template");

        let candidates = candidate_paths(&[temp.path().to_path_buf()]);
        assert_eq!(candidates.last(), Some(&path));

        let template = Template::from_file(&path).expect("template");
        assert_eq!(template.source(), Some(path.as_path()));
        assert!(template.text().contains("{nodes}"));
    }
}
