//! Display-name resolution for item URLs, model-hub search, and batch name refresh.

mod platform;
mod refresh;
mod search;

use std::sync::LazyLock;
use std::time::Duration;

use pv_core::NameResolver;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

pub use platform::{extract_filename, has_model_extension, Platform};
pub use refresh::{
    apply_event, plan_refresh, should_refresh, spawn_refresh, RefreshEvent, RefreshSummary,
    RefreshTarget,
};
pub use search::{search, SearchPlatform, SearchResult, SEARCH_LIMIT};

/// Timeout applied to every metadata request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const CIVITAI_VERSION_API: &str = "https://civitai.com/api/v1/model-versions";

static CIVITAI_VERSION_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/models/(\d+)").expect("valid version id regex"));
static HF_REPO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"huggingface\.co/([^/]+/[^/]+)").expect("valid repo regex"));
static HF_FILE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/([^/]+\.(?:safetensors|ckpt|pt|bin|pth|json|yaml|yml))(?:\?|$)")
        .expect("valid file regex")
});
static GITHUB_REPO: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"github\.com/([^/]+/[^/]+)").expect("valid github regex"));

/// Result type for resolver setup.
pub type ResolverResult<T> = Result<T, ResolverError>;

/// Errors raised while building the network stack.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Source of JSON documents for catalogue lookups.
///
/// Every failure is reported as `None`.
pub trait MetadataSource {
    fn fetch_json(&self, url: &str) -> Option<Value>;
}

impl<S: MetadataSource + ?Sized> MetadataSource for &S {
    fn fetch_json(&self, url: &str) -> Option<Value> {
        (**self).fetch_json(url)
    }
}

/// Blocking HTTP metadata source.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::blocking::Client,
}

impl HttpSource {
    /// Build a client with the standard request timeout.
    pub fn new() -> ResolverResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("provisioner/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl MetadataSource for HttpSource {
    fn fetch_json(&self, url: &str) -> Option<Value> {
        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(err) => {
                debug!(url, error = %err, "metadata request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(url, status = %response.status(), "metadata request rejected");
            return None;
        }
        match response.json::<Value>() {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(url, error = %err, "metadata response was not json");
                None
            }
        }
    }
}

/// Derives best-effort display names from item URLs.
///
/// Rules are tried in a fixed order and the first matching one decides the
/// name. A rule that matches but cannot produce a name falls back to the
/// plain file name of the URL.
#[derive(Debug, Clone)]
pub struct MetadataResolver<S> {
    source: S,
}

impl<S: MetadataSource> MetadataResolver<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Name for `url`, or `None` when not even a file name can be extracted.
    pub fn resolve_name(&self, url: &str) -> Option<String> {
        if let Some(name) = self.platform_name(url) {
            return Some(name);
        }
        extract_filename(url).map(|filename| labelled(Platform::Link, &filename))
    }

    fn platform_name(&self, url: &str) -> Option<String> {
        if url.contains("civitai.com/api/download/models/") {
            self.civitai_version_name(url)
        } else if url.contains("civitai.com") && url.contains("/models/") {
            Some(labelled(Platform::CivitAi, &extract_filename(url)?))
        } else if url.contains("huggingface.co") {
            let repo = HF_REPO.captures(url)?.get(1)?.as_str().to_string();
            let subject = HF_FILE
                .captures(url)
                .and_then(|caps| caps.get(1))
                .map_or(repo, |file| file.as_str().to_string());
            Some(labelled(Platform::HuggingFace, &subject))
        } else if url.contains("github.com") {
            let repo = GITHUB_REPO.captures(url)?.get(1)?.as_str().to_string();
            Some(labelled(Platform::GitHub, &repo))
        } else if url.contains("drive.google.com") || url.contains("googleapis.com") {
            Some(storage_name(Platform::GoogleDrive, url))
        } else if url.contains("onedrive.live.com")
            || url.contains("sharepoint.com")
            || url.contains("1drv.ms")
        {
            Some(storage_name(Platform::OneDrive, url))
        } else if url.contains("dropbox.com") {
            Some(storage_name(Platform::Dropbox, url))
        } else if has_model_extension(url) {
            Some(labelled(
                Platform::for_file_host(url),
                &extract_filename(url)?,
            ))
        } else {
            None
        }
    }

    /// `"🎨 {model} ({version}) by {creator}"` from the version API.
    fn civitai_version_name(&self, url: &str) -> Option<String> {
        let version_id = CIVITAI_VERSION_ID.captures(url)?.get(1)?.as_str();
        let data = self
            .source
            .fetch_json(&format!("{CIVITAI_VERSION_API}/{version_id}"))?;

        let model = data.get("model");
        let model_name = model
            .and_then(|model| model.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown Model");
        let version_name = data.get("name").and_then(Value::as_str).unwrap_or_default();
        let creator = model
            .and_then(|model| model.get("creator"))
            .and_then(|creator| creator.get("username"))
            .and_then(Value::as_str)
            .unwrap_or("Unknown");

        let mut name = format!("{} {model_name}", Platform::CivitAi.emoji());
        if !version_name.is_empty() && version_name.to_lowercase() != model_name.to_lowercase() {
            name.push_str(&format!(" ({version_name})"));
        }
        name.push_str(&format!(" by {creator}"));
        Some(name)
    }
}

impl<S: MetadataSource> NameResolver for MetadataResolver<S> {
    fn resolve(&self, url: &str) -> Option<String> {
        self.resolve_name(url)
    }
}

fn labelled(platform: Platform, subject: &str) -> String {
    format!("{} {subject}", platform.emoji())
}

fn storage_name(platform: Platform, url: &str) -> String {
    let subject = extract_filename(url).unwrap_or_else(|| platform.generic_label().to_string());
    labelled(platform, &subject)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::Value;

    use crate::MetadataSource;

    /// In-memory source that records every requested URL.
    #[derive(Debug, Default)]
    pub struct FakeSource {
        pub documents: HashMap<String, Value>,
        pub requests: Mutex<Vec<String>>,
    }

    impl FakeSource {
        pub fn with(url: &str, document: Value) -> Self {
            let mut source = Self::default();
            source.documents.insert(url.to_string(), document);
            source
        }

        pub fn requested(&self) -> Vec<String> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    impl MetadataSource for FakeSource {
        fn fetch_json(&self, url: &str) -> Option<Value> {
            if let Ok(mut requests) = self.requests.lock() {
                requests.push(url.to_string());
            }
            self.documents
                .iter()
                .find(|(prefix, _)| url.starts_with(prefix.as_str()))
                .map(|(_, document)| document.clone())
        }
    }
}
