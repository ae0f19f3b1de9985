//! URL shapes of the hosts models are usually pulled from.

use url::Url;

/// Host family an item URL belongs to, as far as naming is concerned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Platform {
    CivitAi,
    HuggingFace,
    GitHub,
    GoogleDrive,
    OneDrive,
    Dropbox,
    Link,
}

impl Platform {
    /// Every platform, in classification order.
    pub const ALL: [Platform; 7] = [
        Platform::CivitAi,
        Platform::HuggingFace,
        Platform::GitHub,
        Platform::GoogleDrive,
        Platform::OneDrive,
        Platform::Dropbox,
        Platform::Link,
    ];

    /// Prefix placed in front of generated names.
    pub fn emoji(self) -> &'static str {
        match self {
            Platform::CivitAi => "🎨",
            Platform::HuggingFace => "🤗",
            Platform::GitHub => "📁",
            Platform::GoogleDrive => "💾",
            Platform::OneDrive => "☁️",
            Platform::Dropbox => "📦",
            Platform::Link => "🔗",
        }
    }

    /// Label used when a cloud-storage link carries no usable file name.
    pub fn generic_label(self) -> &'static str {
        match self {
            Platform::GoogleDrive => "Google Drive File",
            Platform::OneDrive => "OneDrive File",
            Platform::Dropbox => "Dropbox File",
            _ => "File",
        }
    }

    /// Host family of a direct file link.
    pub fn for_file_host(url: &str) -> Self {
        if url.contains("huggingface.co") {
            Platform::HuggingFace
        } else if url.contains("github.com") || url.contains("githubusercontent.com") {
            Platform::GitHub
        } else {
            Platform::Link
        }
    }

    /// Whether a display name looks like one produced by the resolver.
    pub fn is_generated_name(name: &str) -> bool {
        Platform::ALL
            .iter()
            .any(|platform| name.contains(platform.emoji()))
    }
}

const MODEL_EXTENSIONS: [&str; 6] = [".pth", ".onnx", ".pkl", ".bin", ".safetensors", ".pt"];

/// Whether the URL path ends in a known model or binary file extension.
pub fn has_model_extension(url: &str) -> bool {
    let (path, _) = split_url(url);
    let path = path.to_lowercase();
    MODEL_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Best-effort file name for a URL.
///
/// Drive links may carry the name in a `filename` query parameter. Otherwise
/// the last path segment wins when it has an extension, then the one before
/// it, and finally the last non-empty segment as is.
pub fn extract_filename(url: &str) -> Option<String> {
    let (path, query) = split_url(url);

    if url.contains("drive.google.com") {
        if let Some(name) = query.iter().find_map(|(key, value)| {
            (key == "filename" && !value.is_empty()).then(|| value.clone())
        }) {
            return Some(name);
        }
    }

    let last = path.rsplit('/').next().unwrap_or_default();
    if !last.is_empty() && last.contains('.') {
        return Some(last.to_string());
    }

    let segments: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
    if segments.len() >= 2 && segments[segments.len() - 2].contains('.') {
        return Some(segments[segments.len() - 2].to_string());
    }

    segments.last().map(|segment| (*segment).to_string())
}

/// Decoded path and query pairs of a URL.
///
/// Inputs that are not absolute URLs, such as bare package names, are treated
/// as a path with everything from the first `?` or `#` stripped.
fn split_url(url: &str) -> (String, Vec<(String, String)>) {
    match Url::parse(url) {
        Ok(parsed) => {
            let query = parsed
                .query_pairs()
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            (parsed.path().to_string(), query)
        }
        Err(_) => {
            let end = url.find(['?', '#']).unwrap_or(url.len());
            (url[..end].to_string(), Vec::new())
        }
    }
}
