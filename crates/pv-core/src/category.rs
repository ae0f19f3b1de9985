//! The closed set of item categories.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A fixed bucket of items in the provisioning database.
///
/// Declaration order is the order categories appear in generated scripts.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// System packages installed with apt.
    AptPackages,
    /// Python packages installed with pip.
    PipPackages,
    /// ComfyUI custom node repositories.
    Nodes,
    /// Workflow files.
    Workflows,
    /// Checkpoint models.
    CheckpointModels,
    /// UNET models.
    UnetModels,
    /// LoRA models.
    LoraModels,
    /// VAE models.
    VaeModels,
    /// ESRGAN upscalers.
    EsrganModels,
    /// Generic upscale models.
    UpscaleModels,
    /// ControlNet models.
    ControlnetModels,
    /// Annotator models used by preprocessors.
    AnnotatorModels,
    /// CLIP vision encoders.
    ClipVisionModels,
    /// Text encoders.
    TextEncoderModels,
    /// Diffusion models.
    DiffusionModels,
    /// CLIP models.
    ClipModels,
    /// Style models.
    StyleModels,
    /// PuLID models.
    PulidModels,
}

impl Category {
    /// Number of categories.
    pub const COUNT: usize = 18;

    /// Every category, in script order.
    pub const ALL: [Category; Self::COUNT] = [
        Category::AptPackages,
        Category::PipPackages,
        Category::Nodes,
        Category::Workflows,
        Category::CheckpointModels,
        Category::UnetModels,
        Category::LoraModels,
        Category::VaeModels,
        Category::EsrganModels,
        Category::UpscaleModels,
        Category::ControlnetModels,
        Category::AnnotatorModels,
        Category::ClipVisionModels,
        Category::TextEncoderModels,
        Category::DiffusionModels,
        Category::ClipModels,
        Category::StyleModels,
        Category::PulidModels,
    ];

    /// Position of this category in [`Category::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Persistence key, also used as the template placeholder name.
    pub fn key(self) -> &'static str {
        match self {
            Category::AptPackages => "apt_packages",
            Category::PipPackages => "pip_packages",
            Category::Nodes => "nodes",
            Category::Workflows => "workflows",
            Category::CheckpointModels => "checkpoint_models",
            Category::UnetModels => "unet_models",
            Category::LoraModels => "lora_models",
            Category::VaeModels => "vae_models",
            Category::EsrganModels => "esrgan_models",
            Category::UpscaleModels => "upscale_models",
            Category::ControlnetModels => "controlnet_models",
            Category::AnnotatorModels => "annotator_models",
            Category::ClipVisionModels => "clip_vision_models",
            Category::TextEncoderModels => "text_encoder_models",
            Category::DiffusionModels => "diffusion_models",
            Category::ClipModels => "clip_models",
            Category::StyleModels => "style_models",
            Category::PulidModels => "pulid_models",
        }
    }

    /// Name of the shell array variable holding this category in scripts.
    pub fn array_name(self) -> String {
        self.key().to_ascii_uppercase()
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        match self {
            Category::AptPackages => "APT Packages",
            Category::PipPackages => "PIP Packages",
            Category::Nodes => "ComfyUI Nodes",
            Category::Workflows => "Workflows",
            Category::CheckpointModels => "Checkpoints",
            Category::UnetModels => "UNET Models",
            Category::LoraModels => "LoRA Models",
            Category::VaeModels => "VAE Models",
            Category::EsrganModels => "ESRGAN Models",
            Category::UpscaleModels => "Upscale Models",
            Category::ControlnetModels => "ControlNet",
            Category::AnnotatorModels => "Annotators",
            Category::ClipVisionModels => "CLIP Vision",
            Category::TextEncoderModels => "Text Encoders",
            Category::DiffusionModels => "Diffusion Models",
            Category::ClipModels => "CLIP",
            Category::StyleModels => "Style Models",
            Category::PulidModels => "PuLID",
        }
    }

    /// Look up a category by its persistence key.
    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.key() == key)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        Self::from_key(&normalized)
            .ok_or_else(|| CoreError::Validation(format!("unknown category: {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_matches_declaration_order() {
        for (position, category) in Category::ALL.iter().enumerate() {
            assert_eq!(category.index(), position);
        }
    }

    #[test]
    fn keys_round_trip() {
        for category in Category::ALL {
            assert_eq!(Category::from_key(category.key()), Some(category));
        }
        assert_eq!(Category::from_key("max_parallel_downloads"), None);
    }

    #[test]
    fn parses_dashed_and_uppercase_names() {
        assert_eq!(
            "CLIP-VISION-MODELS".parse::<Category>().unwrap(),
            Category::ClipVisionModels
        );
        assert!("gguf_models".parse::<Category>().is_err());
    }

    #[test]
    fn array_names_are_uppercase_keys() {
        assert_eq!(Category::TextEncoderModels.array_name(), "TEXT_ENCODER_MODELS");
    }
}
