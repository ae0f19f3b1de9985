//! Model-hub search.

use std::fmt;
use std::str::FromStr;

use pv_core::{Category, CoreError};
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::MetadataSource;

/// Maximum number of results requested from a hub.
pub const SEARCH_LIMIT: usize = 20;

const CIVITAI_SEARCH_API: &str = "https://civitai.com/api/v1/models";
const HF_SEARCH_API: &str = "https://huggingface.co/api/models";
const DESCRIPTION_LIMIT: usize = 200;

/// Hub that can be searched for models.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchPlatform {
    CivitAi,
    HuggingFace,
}

impl SearchPlatform {
    pub fn key(self) -> &'static str {
        match self {
            SearchPlatform::CivitAi => "civitai",
            SearchPlatform::HuggingFace => "huggingface",
        }
    }

    /// CivitAI `types` filter for a category.
    fn civitai_type(category: Category) -> Option<&'static str> {
        match category {
            Category::CheckpointModels | Category::DiffusionModels => Some("Checkpoint"),
            Category::LoraModels => Some("LORA"),
            Category::VaeModels => Some("VAE"),
            Category::ControlnetModels => Some("ControlNet"),
            Category::UpscaleModels => Some("Upscaler"),
            Category::Workflows => Some("Workflows"),
            Category::TextEncoderModels => Some("TextualInversion"),
            _ => None,
        }
    }

    /// Hugging Face tag filter for a category.
    fn hf_tag(category: Category) -> Option<&'static str> {
        match category {
            Category::CheckpointModels => Some("diffusers"),
            Category::LoraModels => Some("lora"),
            Category::ControlnetModels => Some("controlnet"),
            Category::VaeModels => Some("vae"),
            _ => None,
        }
    }
}

impl fmt::Display for SearchPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for SearchPlatform {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "civitai" => Ok(SearchPlatform::CivitAi),
            "huggingface" | "hf" => Ok(SearchPlatform::HuggingFace),
            other => Err(CoreError::Validation(format!(
                "unknown search platform: {other}"
            ))),
        }
    }
}

/// One downloadable search hit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResult {
    pub title: String,
    pub author: String,
    pub description: String,
    pub download_url: String,
    pub downloads: u64,
    pub kind: String,
    pub platform: SearchPlatform,
}

/// Search a hub, most downloaded first.
///
/// Failures are logged and produce an empty list.
pub fn search<S: MetadataSource>(
    source: &S,
    platform: SearchPlatform,
    query: &str,
    category: Option<Category>,
) -> Vec<SearchResult> {
    let request = match request_url(platform, query, category) {
        Ok(url) => url,
        Err(err) => {
            warn!(%platform, error = %err, "could not build search request");
            return Vec::new();
        }
    };
    let Some(body) = source.fetch_json(request.as_str()) else {
        warn!(%platform, query, "search request failed");
        return Vec::new();
    };

    let mut results = match platform {
        SearchPlatform::CivitAi => civitai_results(&body, category),
        SearchPlatform::HuggingFace => hf_results(&body),
    };
    results.sort_by(|a, b| b.downloads.cmp(&a.downloads));
    results
}

fn request_url(
    platform: SearchPlatform,
    query: &str,
    category: Option<Category>,
) -> Result<Url, url::ParseError> {
    let limit = SEARCH_LIMIT.to_string();
    match platform {
        SearchPlatform::CivitAi => {
            let mut params = vec![
                ("query", query),
                ("limit", limit.as_str()),
                ("sort", "Most Downloaded"),
            ];
            if let Some(kind) = category.and_then(SearchPlatform::civitai_type) {
                params.push(("types", kind));
            }
            Url::parse_with_params(CIVITAI_SEARCH_API, params)
        }
        SearchPlatform::HuggingFace => {
            let mut params = vec![
                ("search", query),
                ("limit", limit.as_str()),
                ("sort", "downloads"),
                ("direction", "-1"),
            ];
            if let Some(tag) = category.and_then(SearchPlatform::hf_tag) {
                params.push(("filter", tag));
            }
            Url::parse_with_params(HF_SEARCH_API, params)
        }
    }
}

fn civitai_results(body: &Value, category: Option<Category>) -> Vec<SearchResult> {
    let Some(items) = body.get("items").and_then(Value::as_array) else {
        return Vec::new();
    };
    let workflows = category == Some(Category::Workflows);

    items
        .iter()
        .filter_map(|item| {
            let latest = item.get("modelVersions")?.as_array()?.first()?;
            let files = latest.get("files")?.as_array()?;
            let primary = files
                .iter()
                .find(|file| file.get("primary").and_then(Value::as_bool).unwrap_or(false))
                .or_else(|| {
                    if !workflows {
                        return None;
                    }
                    files.iter().find(|file| {
                        str_field(file, "name").is_some_and(|name| name.ends_with(".json"))
                    })
                })?;
            let download_url = str_field(primary, "downloadUrl")?;

            Some(SearchResult {
                title: str_field(item, "name").unwrap_or("Unknown").to_string(),
                author: item
                    .get("creator")
                    .and_then(|creator| str_field(creator, "username"))
                    .unwrap_or("Unknown")
                    .to_string(),
                description: truncate(str_field(item, "description").unwrap_or_default()),
                download_url: download_url.to_string(),
                downloads: item
                    .get("stats")
                    .and_then(|stats| stats.get("downloadCount"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                kind: str_field(item, "type").unwrap_or("Unknown").to_string(),
                platform: SearchPlatform::CivitAi,
            })
        })
        .collect()
}

fn hf_results(body: &Value) -> Vec<SearchResult> {
    let Some(items) = body.as_array() else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let model_id = str_field(item, "modelId").filter(|id| !id.is_empty())?;
            let (author, title) = match model_id.split_once('/') {
                Some((author, _)) => (
                    author,
                    model_id.rsplit('/').next().unwrap_or(model_id),
                ),
                None => ("Unknown", model_id),
            };
            let pipeline = str_field(item, "pipeline_tag").unwrap_or_default();
            let tags: Vec<&str> = item
                .get("tags")
                .and_then(Value::as_array)
                .map(|tags| tags.iter().filter_map(Value::as_str).take(3).collect())
                .unwrap_or_default();

            Some(SearchResult {
                title: title.to_string(),
                author: author.to_string(),
                description: format!("{pipeline} - {}", tags.join(", ")),
                download_url: format!("https://huggingface.co/{model_id}"),
                downloads: item.get("downloads").and_then(Value::as_u64).unwrap_or(0),
                kind: (if pipeline.is_empty() { "Unknown" } else { pipeline }).to_string(),
                platform: SearchPlatform::HuggingFace,
            })
        })
        .collect()
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn truncate(text: &str) -> String {
    if text.chars().count() > DESCRIPTION_LIMIT {
        let cut: String = text.chars().take(DESCRIPTION_LIMIT).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}
