//! Image model client and the generation workspace

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{CanvasError, GenerationTask};

pub const DEFAULT_MODEL_ID: &str = "amazon.nova-canvas-v1:0";
/// Prefix of every generation directory in the workspace
pub const GENERATION_DIR_PREFIX: &str = "nova_canvas_";

/// Anything that turns a task body into a response body
#[async_trait]
pub trait ImageModel: Send + Sync {
    async fn invoke(&self, body: &Value) -> Result<Value>;
}

/// [`ImageModel`] reached over HTTP at `{base_url}/model/{model_id}/invoke`
#[derive(Clone)]
pub struct HttpImageModel {
    client: Arc<Client>,
    base_url: String,
    model_id: String,
    api_key: String,
}

impl HttpImageModel {
    pub fn new(base_url: impl Into<String>, model_id: impl Into<String>, api_key: String) -> Self {
        Self {
            client: Arc::new(Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model_id: model_id.into(),
            api_key,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Result<Self> {
        let api_key = crate::security::get_api_key()?;
        Ok(Self::new(&config.canvas.base_url, &config.canvas.model_id, api_key))
    }
}

#[async_trait]
impl ImageModel for HttpImageModel {
    async fn invoke(&self, body: &Value) -> Result<Value> {
        let response = self.client
            .post(format!("{}/model/{}/invoke", self.base_url, self.model_id))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .context("Failed to send request to image model")?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            bail!("Image model error ({}): {}", status, crate::truncate_safe(&text, 500));
        }

        response.json().await.context("Image model returned invalid JSON")
    }
}

/// Output of one successful generation
#[derive(Debug, Clone)]
pub struct Generation {
    pub output_dir: PathBuf,
    pub images: Vec<PathBuf>,
    pub response: Value,
}

/// Sends tasks and keeps their artifacts under `workspace`
pub struct ImageGenerator {
    model: Arc<dyn ImageModel>,
    workspace: PathBuf,
}

impl ImageGenerator {
    pub fn new(model: Arc<dyn ImageModel>, workspace: impl Into<PathBuf>) -> Self {
        Self { model, workspace: workspace.into() }
    }

    /// Run `task`, storing `request.json`, `response_body.json` and
    /// `image_N.png` in a fresh timestamped directory.
    pub async fn generate(&self, task: &GenerationTask) -> Result<Generation, CanvasError> {
        let output_dir = self.workspace.join(format!(
            "{}{}",
            GENERATION_DIR_PREFIX,
            chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
        ));
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create {}", output_dir.display()))
            .map_err(CanvasError::Storage)?;

        let body = serde_json::to_value(task)
            .context("Failed to encode task")
            .map_err(CanvasError::Storage)?;
        write_json(&output_dir.join("request.json"), &body).map_err(CanvasError::Storage)?;
        info!(
            "Invoking image model: {} image(s), seed {:?}",
            task.image_count(),
            task.seed()
        );

        let response = match self.model.invoke(&body).await {
            Ok(response) => response,
            Err(e) => {
                let record = serde_json::json!({ "error": format!("{:#}", e) });
                if let Err(write_err) = write_json(&output_dir.join("error_response.json"), &record) {
                    debug!("Could not record error response: {}", write_err);
                }
                return Err(CanvasError::Model(e));
            }
        };
        write_json(&output_dir.join("response_body.json"), &response).map_err(CanvasError::Storage)?;

        match response.get("error") {
            Some(Value::String(s)) if s.is_empty() => {
                warn!("Image model returned an empty string error (possible API bug)");
            }
            Some(Value::Null) | None => {}
            Some(other) => warn!("Image model returned an error: {}", other),
        }

        let encoded: Vec<String> = response
            .get("images")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        if encoded.is_empty() {
            return Err(CanvasError::NoImages { output_dir });
        }

        let images = save_base64_images(&encoded, &output_dir, "image").map_err(CanvasError::Storage)?;
        info!("Saved {} image(s) to {}", images.len(), output_dir.display());
        Ok(Generation { output_dir, images, response })
    }

    /// Earlier generation directories, newest first
    pub fn list_generations(&self) -> Result<Vec<PathBuf>> {
        list_generations(&self.workspace)
    }
}

/// Generation directories under `workspace`, newest first
pub fn list_generations(workspace: &Path) -> Result<Vec<PathBuf>> {
    if !workspace.exists() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(workspace)
        .with_context(|| format!("Failed to read {}", workspace.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(GENERATION_DIR_PREFIX))
        .map(|entry| entry.path())
        .collect();
    dirs.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(dirs)
}

/// Decode each image and write it as `{base_name}_{n}.png`, n starting at 1
pub fn save_base64_images(images: &[String], dir: &Path, base_name: &str) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(images.len());
    for (i, encoded) in images.iter().enumerate() {
        let bytes = BASE64
            .decode(encoded.trim())
            .with_context(|| format!("Image {} is not valid base64", i + 1))?;
        let img = image::load_from_memory(&bytes)
            .with_context(|| format!("Image {} could not be decoded", i + 1))?;
        let path = dir.join(format!("{}_{}.png", base_name, i + 1));
        img.save_with_format(&path, image::ImageFormat::Png)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        paths.push(path);
    }
    Ok(paths)
}

/// Read an image file as base64 for a task body
pub fn encode_image_file(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    image::load_from_memory(&bytes)
        .with_context(|| format!("{} is not a supported image", path.display()))?;
    Ok(BASE64.encode(bytes))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{GenerationConfig, ImageSize};
    use serde_json::json;
    use std::io::Cursor;
    use tempfile::tempdir;
    use tokio::sync::Mutex;

    struct FakeModel {
        response: Result<Value, String>,
        seen: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl ImageModel for FakeModel {
        async fn invoke(&self, body: &Value) -> Result<Value> {
            self.seen.lock().await.push(body.clone());
            match &self.response {
                Ok(v) => Ok(v.clone()),
                Err(e) => bail!("{}", e),
            }
        }
    }

    fn tiny_png_base64() -> String {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 10, 10]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        BASE64.encode(buf.into_inner())
    }

    fn task() -> GenerationTask {
        let config = GenerationConfig { seed: 1, ..GenerationConfig::default() };
        GenerationTask::text_image("a red square", ImageSize::default(), config).unwrap()
    }

    #[tokio::test]
    async fn test_generate_saves_artifacts() {
        let dir = tempdir().unwrap();
        let model = Arc::new(FakeModel {
            response: Ok(json!({ "images": [tiny_png_base64(), tiny_png_base64()], "error": null })),
            seen: Mutex::new(Vec::new()),
        });
        let generator = ImageGenerator::new(model.clone(), dir.path());

        let generation = generator.generate(&task()).await.unwrap();
        assert_eq!(generation.images.len(), 2);
        assert!(generation.images[0].ends_with("image_1.png"));
        assert!(generation.output_dir.join("request.json").exists());
        assert!(generation.output_dir.join("response_body.json").exists());
        assert!(generation
            .output_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(GENERATION_DIR_PREFIX));

        let sent = model.seen.lock().await;
        assert_eq!(sent[0]["taskType"], "TEXT_IMAGE");
    }

    #[tokio::test]
    async fn test_empty_error_still_returns_images() {
        let dir = tempdir().unwrap();
        let model = Arc::new(FakeModel {
            response: Ok(json!({ "images": [tiny_png_base64()], "error": "" })),
            seen: Mutex::new(Vec::new()),
        });
        let generation = ImageGenerator::new(model, dir.path()).generate(&task()).await.unwrap();
        assert_eq!(generation.images.len(), 1);
    }

    #[tokio::test]
    async fn test_no_images_is_an_error() {
        let dir = tempdir().unwrap();
        let model = Arc::new(FakeModel {
            response: Ok(json!({ "error": "content filtered" })),
            seen: Mutex::new(Vec::new()),
        });
        let result = ImageGenerator::new(model, dir.path()).generate(&task()).await;
        assert!(matches!(result, Err(CanvasError::NoImages { .. })));
    }

    #[tokio::test]
    async fn test_model_failure_is_recorded() {
        let dir = tempdir().unwrap();
        let model = Arc::new(FakeModel {
            response: Err("throttled".into()),
            seen: Mutex::new(Vec::new()),
        });
        let generator = ImageGenerator::new(model, dir.path());
        let result = generator.generate(&task()).await;
        assert!(matches!(result, Err(CanvasError::Model(_))));

        let dirs = generator.list_generations().unwrap();
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].join("error_response.json").exists());
    }

    #[test]
    fn test_list_generations_newest_first() {
        let dir = tempdir().unwrap();
        for name in ["nova_canvas_2024-01-01_10-00-00", "nova_canvas_2024-03-01_10-00-00", "other"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        let dirs = list_generations(dir.path()).unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].ends_with("nova_canvas_2024-03-01_10-00-00"));
    }

    #[test]
    fn test_save_rejects_bad_base64() {
        let dir = tempdir().unwrap();
        assert!(save_base64_images(&["!!not base64!!".to_string()], dir.path(), "image").is_err());
    }
}
