//! Preset scripts stored in a git working copy.

use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::process::Command;

use pv_core::{CoreError, CoreResult, PresetRepository};
use pv_utils::{redact, with_token};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::settings::{Settings, DEFAULT_BRANCH};

/// Script names in the repository that are never listed as presets.
pub const EXCLUDED_PRESETS: [&str; 6] = [
    "default.sh",
    "provisioning.sh",
    "template.sh",
    "nocheck.sh",
    "install.sh",
    "setup.sh",
];

const COMMIT_USER_NAME: &str = "VastAI Provisioning";
const COMMIT_USER_EMAIL: &str = "provisioning@localhost";

/// Whether a repository-relative path names a system script rather than a preset.
pub fn is_excluded_preset(id: &str) -> bool {
    let file_name = Path::new(id)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(id)
        .to_lowercase();
    EXCLUDED_PRESETS.contains(&file_name.as_str())
}

/// Preset repository backed by a local clone of a git remote.
#[derive(Debug, Clone)]
pub struct GitPresetRepository {
    root: PathBuf,
    repo_url: String,
    branch: String,
    token: Option<String>,
}

impl GitPresetRepository {
    /// A repository over an existing directory, without a remote.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            repo_url: String::new(),
            branch: DEFAULT_BRANCH.to_string(),
            token: None,
        }
    }

    pub fn from_settings(settings: &Settings, data_dir: &Path) -> Self {
        Self {
            root: settings.local_path_or_default(data_dir),
            repo_url: settings.repo_url.trim().to_string(),
            branch: settings.branch.clone(),
            token: settings.github_token.clone(),
        }
    }

    /// Path of the working copy.
    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn is_cloned(&self) -> bool {
        self.root.join(".git").exists()
    }

    /// Clone the remote when absent, otherwise pull the configured branch.
    ///
    /// Pulling is refused while the working copy has uncommitted changes.
    pub fn clone_or_pull(&self) -> CoreResult<String> {
        if self.repo_url.is_empty() {
            return Err(CoreError::Validation(
                "no repository URL configured".into(),
            ));
        }

        if self.is_cloned() {
            if !self.git(&["status", "--porcelain"])?.trim().is_empty() {
                return Err(CoreError::Validation(
                    "uncommitted changes in repository, commit or stash them first".into(),
                ));
            }
            self.git(&["pull", "origin", &self.branch])?;
            info!(path = %self.root.display(), "preset repository updated");
            return Ok("Repository updated successfully".into());
        }

        if self.root.exists()
            && fs::read_dir(&self.root)
                .map_err(|err| CoreError::Storage(err.to_string()))?
                .next()
                .is_some()
        {
            return Err(CoreError::Validation(format!(
                "{} exists and is not a git repository",
                self.root.display()
            )));
        }
        if let Some(parent) = self.root.parent() {
            fs::create_dir_all(parent).map_err(|err| CoreError::Storage(err.to_string()))?;
        }

        let remote = with_token(&self.repo_url, self.token.as_deref());
        let target = self.root.to_string_lossy().to_string();
        self.run(None, &["clone", "-b", &self.branch, &remote, &target])?;
        self.configure_user();
        info!(path = %self.root.display(), "preset repository cloned");
        Ok("Repository cloned successfully".into())
    }

    /// Stage `files` (everything when empty), commit, and push.
    pub fn commit_and_push(&self, message: &str, files: &[String]) -> CoreResult<String> {
        if !self.is_cloned() {
            return Err(CoreError::NotFound("repository not cloned".into()));
        }

        if files.is_empty() {
            self.git(&["add", "-A"])?;
        } else {
            for file in files {
                self.git(&["add", file])?;
            }
        }

        if self.git(&["status", "--porcelain"])?.trim().is_empty() {
            return Ok("No changes to commit".into());
        }

        self.git(&["commit", "-m", message])?;
        self.git(&["push", "origin", &self.branch])?;
        Ok("Changes pushed successfully".into())
    }

    /// Short description of the working copy state.
    pub fn status(&self) -> CoreResult<String> {
        if !self.is_cloned() {
            return Err(CoreError::NotFound("repository not cloned".into()));
        }
        let output = self.git(&["status", "--porcelain"])?;
        if output.trim().is_empty() {
            Ok("Working directory clean".into())
        } else {
            Ok(format!("Uncommitted changes:\n{output}"))
        }
    }

    /// Check that the remote answers `git ls-remote`.
    pub fn test_connection(&self) -> CoreResult<()> {
        if self.repo_url.is_empty() {
            return Err(CoreError::Validation(
                "no repository URL configured".into(),
            ));
        }
        let remote = with_token(&self.repo_url, self.token.as_deref());
        self.run(None, &["ls-remote", "--heads", &remote])?;
        Ok(())
    }

    fn preset_path(&self, id: &str) -> CoreResult<PathBuf> {
        let relative = Path::new(id);
        let valid = !id.trim().is_empty()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_)));
        if !valid {
            return Err(CoreError::Validation(format!("invalid preset name: {id}")));
        }
        Ok(self.root.join(relative))
    }

    fn configure_user(&self) {
        for (key, value) in [("user.name", COMMIT_USER_NAME), ("user.email", COMMIT_USER_EMAIL)] {
            if let Err(err) = self.git(&["config", key, value]) {
                debug!(error = %err, "could not set commit identity");
            }
        }
    }

    fn git(&self, args: &[&str]) -> CoreResult<String> {
        self.run(Some(&self.root), args)
    }

    fn run(&self, cwd: Option<&Path>, args: &[&str]) -> CoreResult<String> {
        let mut command = Command::new("git");
        command.args(args);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let output = match command.output() {
            Ok(output) => output,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CoreError::External("git is not installed".into()));
            }
            Err(err) => return Err(CoreError::External(err.to_string())),
        };

        let token = self.token.as_deref();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = redact(stderr.trim(), token);
            warn!(command = args.first().copied().unwrap_or("git"), %message, "git failed");
            return Err(CoreError::External(format!(
                "git {} failed: {message}",
                args.first().copied().unwrap_or_default()
            )));
        }

        Ok(redact(&String::from_utf8_lossy(&output.stdout), token))
    }
}

impl PresetRepository for GitPresetRepository {
    fn list(&self) -> CoreResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut presets = Vec::new();
        for entry in WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git")
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.path().extension().and_then(|ext| ext.to_str()) != Some("sh") {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let id = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !is_excluded_preset(&id) {
                presets.push(id);
            }
        }
        presets.sort();
        Ok(presets)
    }

    fn read(&self, id: &str) -> CoreResult<Option<String>> {
        let path = self.preset_path(id)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CoreError::Storage(err.to_string())),
        }
    }

    fn write(&self, id: &str, text: &str) -> CoreResult<()> {
        let path = self.preset_path(id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| CoreError::Storage(err.to_string()))?;
        }
        fs::write(path, text).map_err(|err| CoreError::Storage(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lists_scripts_except_system_files() {
        let temp = TempDir::new().expect("temp dir");
        let repo = GitPresetRepository::new(temp.path().to_path_buf());
        for id in ["flux.sh", "sdxl/anime.sh", "template.sh", "sdxl/Setup.sh", "notes.md"] {
            repo.write(id, "#!/bin/bash\n").expect("write");
        }
        fs::create_dir_all(temp.path().join(".git")).expect("git dir");
        fs::write(temp.path().join(".git").join("hook.sh"), "").expect("hook");

        assert_eq!(
            repo.list().expect("list"),
            vec!["flux.sh".to_string(), "sdxl/anime.sh".to_string()]
        );
    }

    #[test]
    fn read_missing_preset_is_none() {
        let temp = TempDir::new().expect("temp dir");
        let repo = GitPresetRepository::new(temp.path().to_path_buf());
        assert_eq!(repo.read("nope.sh").expect("read"), None);

        repo.write("a/b.sh", "echo hi\n").expect("write");
        assert_eq!(repo.read("a/b.sh").expect("read").as_deref(), Some("echo hi\n"));
    }

    #[test]
    fn rejects_paths_outside_the_repository() {
        let temp = TempDir::new().expect("temp dir");
        let repo = GitPresetRepository::new(temp.path().join("repo"));
        assert!(matches!(
            repo.write("../escape.sh", ""),
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(repo.read("/etc/passwd"), Err(CoreError::Validation(_))));
        assert!(matches!(repo.read("  "), Err(CoreError::Validation(_))));
    }

    #[test]
    fn missing_repository_lists_nothing() {
        let temp = TempDir::new().expect("temp dir");
        let repo = GitPresetRepository::new(temp.path().join("absent"));
        assert!(repo.list().expect("list").is_empty());
        assert!(!repo.is_cloned());
        assert!(matches!(repo.status(), Err(CoreError::NotFound(_))));
    }

    #[test]
    fn remote_operations_need_a_url() {
        let temp = TempDir::new().expect("temp dir");
        let repo = GitPresetRepository::from_settings(&Settings::default(), temp.path());
        assert_eq!(repo.path(), temp.path().join("presets-repo"));
        assert!(matches!(repo.clone_or_pull(), Err(CoreError::Validation(_))));
        assert!(matches!(repo.test_connection(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn system_scripts_match_by_file_name() {
        assert!(is_excluded_preset("nested/INSTALL.sh"));
        assert!(is_excluded_preset("default.sh"));
        assert!(!is_excluded_preset("my-default.sh"));
    }
}
