//! Image generation and manipulation
//!
//! Builds task bodies for a Nova-Canvas-style image model (text to image,
//! background removal, inpainting), sends them through an [`ImageModel`] and
//! keeps every request, response and image in a timestamped directory under
//! the workspace.

pub mod generator;

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub use generator::{list_generations, save_base64_images, Generation, HttpImageModel, ImageGenerator, ImageModel};

pub const MIN_SIDE: u32 = 320;
pub const MAX_SIDE: u32 = 4096;
pub const SIDE_STEP: u32 = 16;
/// Exclusive upper bound on width × height
pub const MAX_PIXELS: u32 = 4_194_304;
pub const MAX_SEED: u64 = 858_993_459;
/// Negative text sent when the prompt has none
pub const DEFAULT_NEGATIVE_TEXT: &str = ".";

/// Image generation failures
#[derive(Debug, Error)]
pub enum CanvasError {
    #[error("invalid image size {width}x{height}: {reason}")]
    InvalidSize { width: u32, height: u32, reason: String },
    #[error("image model request failed: {0:#}")]
    Model(#[source] anyhow::Error),
    #[error("model returned no images (see {})", .output_dir.display())]
    NoImages { output_dir: PathBuf },
    #[error("failed to store generation output: {0:#}")]
    Storage(#[source] anyhow::Error),
}

/// Output dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ImageSize {
    fn default() -> Self {
        Self { width: 1024, height: 1024 }
    }
}

impl ImageSize {
    /// 1024x768
    pub const LANDSCAPE: ImageSize = ImageSize { width: 1024, height: 768 };
    pub const HD: ImageSize = ImageSize { width: 1280, height: 720 };
    /// Closest valid size to 1920x1080
    pub const FHD: ImageSize = ImageSize { width: 1920, height: 1072 };

    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Every rule the size breaks
    pub fn problems(&self) -> Vec<&'static str> {
        let mut problems = Vec::new();
        let (w, h) = (self.width, self.height);
        if !(MIN_SIDE..=MAX_SIDE).contains(&w) || !(MIN_SIDE..=MAX_SIDE).contains(&h) {
            problems.push("both sides must be between 320 and 4096");
        }
        if w % SIDE_STEP != 0 || h % SIDE_STEP != 0 {
            problems.push("both width and height must be divisible by 16");
        }
        let (long, short) = (w.max(h) as f64, w.min(h).max(1) as f64);
        if long / short > 4.0 {
            problems.push("aspect ratio must be between 1:4 and 4:1");
        }
        if (w as u64) * (h as u64) >= MAX_PIXELS as u64 {
            problems.push("total pixel count must be less than 4,194,304");
        }
        problems
    }

    pub fn validate(&self) -> Result<(), CanvasError> {
        let problems = self.problems();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CanvasError::InvalidSize {
                width: self.width,
                height: self.height,
                reason: problems.join("; "),
            })
        }
    }

    /// Snap arbitrary dimensions (e.g. of an uploaded image) to the grid and range
    pub fn fit(width: u32, height: u32) -> Self {
        let snap = |v: u32| ((v / SIDE_STEP) * SIDE_STEP).clamp(MIN_SIDE, MAX_SIDE);
        Self { width: snap(width), height: snap(height) }
    }
}

/// Sampling settings shared by generating tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub number_of_images: u32,
    pub quality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub cfg_scale: f32,
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            number_of_images: 1,
            quality: "standard".to_string(),
            width: None,
            height: None,
            cfg_scale: 6.5,
            seed: random_seed(),
        }
    }
}

impl GenerationConfig {
    pub fn with_size(mut self, size: ImageSize) -> Self {
        self.width = Some(size.width);
        self.height = Some(size.height);
        self
    }

    pub fn from_config(config: &crate::config::CanvasConfig) -> Self {
        Self {
            number_of_images: config.number_of_images.max(1),
            quality: config.quality.clone(),
            width: None,
            height: None,
            cfg_scale: config.cfg_scale,
            seed: config.seed.map(|s| s.min(MAX_SEED)).unwrap_or_else(random_seed),
        }
    }
}

/// Seed in the range accepted by the model
pub fn random_seed() -> u64 {
    rand::rng().random_range(0..=MAX_SEED)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextToImageParams {
    pub text: String,
    pub negative_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundRemovalParams {
    /// Base64-encoded source image
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InpaintingParams {
    /// Base64-encoded source image
    pub image: String,
    pub mask_prompt: String,
}

/// One request to the image model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "taskType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationTask {
    TextImage {
        #[serde(rename = "textToImageParams")]
        params: TextToImageParams,
        #[serde(rename = "imageGenerationConfig")]
        config: GenerationConfig,
    },
    BackgroundRemoval {
        #[serde(rename = "backgroundRemovalParams")]
        params: BackgroundRemovalParams,
    },
    Inpainting {
        #[serde(rename = "inPaintingParams")]
        params: InpaintingParams,
        #[serde(rename = "imageGenerationConfig")]
        config: GenerationConfig,
    },
}

impl GenerationTask {
    /// Text to image; the size is validated first
    pub fn text_image(prompt: &str, size: ImageSize, config: GenerationConfig) -> Result<Self, CanvasError> {
        size.validate()?;
        let (text, negative_text) = parse_prompt(prompt);
        Ok(GenerationTask::TextImage {
            params: TextToImageParams { text, negative_text },
            config: config.with_size(size),
        })
    }

    pub fn background_removal(image_base64: String) -> Self {
        GenerationTask::BackgroundRemoval {
            params: BackgroundRemovalParams { image: image_base64 },
        }
    }

    pub fn inpainting(image_base64: String, mask_prompt: &str, config: GenerationConfig) -> Self {
        GenerationTask::Inpainting {
            params: InpaintingParams { image: image_base64, mask_prompt: mask_prompt.trim().to_string() },
            config,
        }
    }

    /// Images requested, 1 when the task has no config
    pub fn image_count(&self) -> u32 {
        match self {
            GenerationTask::TextImage { config, .. } | GenerationTask::Inpainting { config, .. } => config.number_of_images,
            GenerationTask::BackgroundRemoval { .. } => 1,
        }
    }

    pub fn seed(&self) -> Option<u64> {
        match self {
            GenerationTask::TextImage { config, .. } | GenerationTask::Inpainting { config, .. } => Some(config.seed),
            GenerationTask::BackgroundRemoval { .. } => None,
        }
    }
}

/// Split `"prompt NEGATIVE: negative"` into its two trimmed halves
pub fn parse_prompt(input: &str) -> (String, String) {
    match input.split_once("NEGATIVE:") {
        Some((prompt, negative)) => (prompt.trim().to_string(), negative.trim().to_string()),
        None => (input.trim().to_string(), DEFAULT_NEGATIVE_TEXT.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_sizes() {
        for size in [ImageSize::default(), ImageSize::LANDSCAPE, ImageSize::HD, ImageSize::FHD, ImageSize::new(320, 1280)] {
            assert!(size.validate().is_ok(), "{:?} should be valid", size);
        }
    }

    #[test]
    fn test_invalid_sizes() {
        assert!(ImageSize::new(1000, 1024).validate().is_err());
        assert!(ImageSize::new(304, 1024).validate().is_err());
        assert!(ImageSize::new(320, 1296).validate().is_err());
        // exactly at the pixel limit
        assert!(ImageSize::new(2048, 2048).validate().is_err());
        let problems = ImageSize::new(4100, 1000).problems();
        assert!(problems.len() >= 2);
    }

    #[test]
    fn test_fit_snaps_to_grid_and_range() {
        assert_eq!(ImageSize::fit(1921, 1080), ImageSize::new(1920, 1072));
        assert_eq!(ImageSize::fit(100, 5000), ImageSize::new(320, 4096));
    }

    #[test]
    fn test_parse_prompt() {
        assert_eq!(parse_prompt(" a cat NEGATIVE: dogs "), ("a cat".to_string(), "dogs".to_string()));
        assert_eq!(parse_prompt("a cat"), ("a cat".to_string(), ".".to_string()));
    }

    #[test]
    fn test_text_image_body() {
        let config = GenerationConfig { seed: 42, ..GenerationConfig::default() };
        let task = GenerationTask::text_image("sunset NEGATIVE: people", ImageSize::HD, config).unwrap();
        let body = serde_json::to_value(&task).unwrap();
        assert_eq!(body, json!({
            "taskType": "TEXT_IMAGE",
            "textToImageParams": {"text": "sunset", "negativeText": "people"},
            "imageGenerationConfig": {
                "numberOfImages": 1,
                "quality": "standard",
                "width": 1280,
                "height": 720,
                "cfgScale": 6.5,
                "seed": 42
            }
        }));
    }

    #[test]
    fn test_other_task_bodies() {
        let body = serde_json::to_value(GenerationTask::background_removal("AAA".into())).unwrap();
        assert_eq!(body, json!({"taskType": "BACKGROUND_REMOVAL", "backgroundRemovalParams": {"image": "AAA"}}));

        let config = GenerationConfig { seed: 7, ..GenerationConfig::default() };
        let body = serde_json::to_value(GenerationTask::inpainting("AAA".into(), "the sky", config)).unwrap();
        assert_eq!(body["taskType"], "INPAINTING");
        assert_eq!(body["inPaintingParams"]["maskPrompt"], "the sky");
        assert!(body["imageGenerationConfig"].get("width").is_none());
    }

    #[test]
    fn test_invalid_size_rejected_before_request() {
        let result = GenerationTask::text_image("x", ImageSize::new(10, 10), GenerationConfig::default());
        assert!(matches!(result, Err(CanvasError::InvalidSize { .. })));
    }

    #[test]
    fn test_random_seed_in_range() {
        for _ in 0..100 {
            assert!(random_seed() <= MAX_SEED);
        }
    }
}
