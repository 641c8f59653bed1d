use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::builder_config::BuilderConfig;
use crate::errors::{PredError, Result};
use crate::io::{abs_listdir, adaptive_imread, adaptive_imsave, is_supported_image_format, Volume};
use crate::traits::{BuilderLoader, SegmentationBuilder};

/// Test builder whose prediction is the input image itself.
#[derive(Debug, Clone)]
pub struct MockBuilder {
    config: BuilderConfig,
    folder_calls: Arc<Mutex<Vec<(PathBuf, PathBuf)>>>,
}

impl SegmentationBuilder for MockBuilder {
    fn run_prediction_single(&self, image_path: &Path) -> Result<Volume> {
        adaptive_imread(image_path).map(|(volume, _)| volume)
    }

    fn run_prediction_folder(&self, dir_in: &Path, dir_out: &Path) -> Result<()> {
        self.folder_calls
            .lock()
            .push((dir_in.to_path_buf(), dir_out.to_path_buf()));

        fs::create_dir_all(dir_out)
            .map_err(|e| PredError::file_system(dir_out, "create output directory", e))?;
        for path in abs_listdir(dir_in)? {
            if !is_supported_image_format(&path) {
                continue;
            }
            let (volume, spacing) = adaptive_imread(&path)?;
            if let Some(file_name) = path.file_name() {
                adaptive_imsave(&dir_out.join(file_name), &volume, &spacing)?;
            }
        }
        Ok(())
    }

    fn config(&self) -> &BuilderConfig {
        &self.config
    }
}

/// Loader handing out [`MockBuilder`]s and recording every call.
#[derive(Debug, Clone)]
pub struct MockBuilderLoader {
    pub config: BuilderConfig,
    loads: Arc<Mutex<Vec<PathBuf>>>,
    folder_calls: Arc<Mutex<Vec<(PathBuf, PathBuf)>>>,
}

impl MockBuilderLoader {
    pub fn new(num_classes: usize) -> Self {
        Self {
            config: BuilderConfig::new(num_classes, [64, 64]),
            loads: Arc::default(),
            folder_calls: Arc::default(),
        }
    }

    /// Model directories passed to `load`, in call order.
    pub fn loads(&self) -> Vec<PathBuf> {
        self.loads.lock().clone()
    }

    /// `(dir_in, dir_out)` pairs passed to `run_prediction_folder`, in call order.
    pub fn folder_calls(&self) -> Vec<(PathBuf, PathBuf)> {
        self.folder_calls.lock().clone()
    }
}

impl BuilderLoader for MockBuilderLoader {
    type Builder = MockBuilder;

    fn load(&self, model_dir: &Path) -> Result<MockBuilder> {
        self.loads.lock().push(model_dir.to_path_buf());
        Ok(MockBuilder {
            config: self.config.clone(),
            folder_calls: Arc::clone(&self.folder_calls),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use tempfile::TempDir;

    #[test]
    fn test_mock_loader_records_loads() -> Result<()> {
        let loader = MockBuilderLoader::new(2);
        let builder = loader.load(Path::new("model_a"))?;
        loader.load(Path::new("model_b"))?;

        assert_eq!(builder.config().num_classes, 2);
        assert_eq!(
            loader.loads(),
            vec![PathBuf::from("model_a"), PathBuf::from("model_b")]
        );
        Ok(())
    }

    #[test]
    fn test_mock_folder_prediction_copies_images() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let dir_in = temp_dir.path().join("in");
        fs::create_dir(&dir_in)?;
        GrayImage::from_pixel(3, 3, Luma([1])).save(dir_in.join("img.png"))?;
        fs::write(dir_in.join("notes.txt"), b"skip me")?;

        let loader = MockBuilderLoader::new(1);
        let dir_out = temp_dir.path().join("out");
        loader.load(Path::new("model"))?.run_prediction_folder(&dir_in, &dir_out)?;

        assert!(dir_out.join("img.png").exists());
        assert!(!dir_out.join("notes.txt").exists());
        assert_eq!(loader.folder_calls().len(), 1);
        Ok(())
    }
}
