//! YAML settings for the preset repository.

use std::fs;
use std::path::{Path, PathBuf};

use pv_core::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};

/// Branch used when none is configured.
pub const DEFAULT_BRANCH: &str = "main";

const PRESETS_DIR_NAME: &str = "presets-repo";

/// Contents of `config.yaml`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Settings {
    /// Remote of the preset repository.
    #[serde(default)]
    pub repo_url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Access token injected into GitHub remotes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
    /// Working copy location; defaults to a directory inside the data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repo_url: String::new(),
            branch: default_branch(),
            github_token: None,
            local_path: None,
        }
    }
}

impl Settings {
    /// Load settings; a missing file yields defaults.
    pub fn load(path: &Path) -> CoreResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            fs::read_to_string(path).map_err(|err| CoreError::Storage(err.to_string()))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents).map_err(|err| CoreError::Storage(err.to_string()))
    }

    pub fn save(&self, path: &Path) -> CoreResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| CoreError::Storage(err.to_string()))?;
        }
        let contents =
            serde_yaml::to_string(self).map_err(|err| CoreError::Storage(err.to_string()))?;
        fs::write(path, contents).map_err(|err| CoreError::Storage(err.to_string()))
    }

    /// Update one setting by its YAML key. Empty values clear optional settings.
    pub fn set(&mut self, key: &str, value: &str) -> CoreResult<()> {
        let value = value.trim();
        match key {
            "repo_url" => self.repo_url = value.to_string(),
            "branch" => {
                self.branch = if value.is_empty() {
                    default_branch()
                } else {
                    value.to_string()
                };
            }
            "github_token" => {
                self.github_token = (!value.is_empty()).then(|| value.to_string());
            }
            "local_path" => {
                self.local_path = (!value.is_empty()).then(|| PathBuf::from(value));
            }
            other => {
                return Err(CoreError::Validation(format!(
                    "unknown setting: {other} (expected repo_url, branch, github_token or local_path)"
                )))
            }
        }
        Ok(())
    }

    /// Working copy path, resolved against the data directory.
    pub fn local_path_or_default(&self, data_dir: &Path) -> PathBuf {
        self.local_path
            .clone()
            .unwrap_or_else(|| data_dir.join(PRESETS_DIR_NAME))
    }

    pub fn is_configured(&self) -> bool {
        !self.repo_url.trim().is_empty()
    }

    /// Copy safe to print, with the token masked.
    pub fn redacted(&self) -> Self {
        Self {
            github_token: self.github_token.as_ref().map(|_| "***".to_string()),
            ..self.clone()
        }
    }
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let temp = TempDir::new().expect("temp dir");
        let settings = Settings::load(&temp.path().join("config.yaml")).expect("load");
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.branch, "main");
        assert!(!settings.is_configured());
    }

    #[test]
    fn set_save_and_reload() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("config.yaml");

        let mut settings = Settings::default();
        settings
            .set("repo_url", "https://github.com/me/presets.git")
            .expect("repo");
        settings.set("github_token", "ghp_secret").expect("token");
        settings.set("branch", "").expect("branch");
        settings.save(&path).expect("save");

        let loaded = Settings::load(&path).expect("load");
        assert_eq!(loaded, settings);
        assert_eq!(loaded.branch, "main");
        assert_eq!(loaded.redacted().github_token.as_deref(), Some("***"));
        assert!(settings.set("colour", "blue").is_err());
    }

    #[test]
    fn local_path_defaults_inside_data_dir() {
        let settings = Settings::default();
        assert_eq!(
            settings.local_path_or_default(Path::new("/data")),
            PathBuf::from("/data/presets-repo")
        );
    }
}
