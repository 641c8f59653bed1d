use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{PredError, Result};

/// File holding the builder config inside a model directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Dataset and class metadata stored next to a trained model.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct BuilderConfig {
    /// Number of foreground classes.
    #[serde(rename = "NUM_CLASSES")]
    pub num_classes: usize,

    /// Softmax models output one channel per class including background,
    /// sigmoid models one channel per foreground class.
    #[serde(rename = "USE_SOFTMAX", default = "default_use_softmax")]
    pub use_softmax: bool,

    #[serde(rename = "NUM_CHANNELS", default = "default_num_channels")]
    pub num_channels: usize,

    /// Model input size as `[height, width]`.
    #[serde(rename = "PATCH_SIZE")]
    pub patch_size: [u32; 2],

    #[serde(rename = "MODEL_FILE", default = "default_model_file")]
    pub model_file: PathBuf,
}

const fn default_use_softmax() -> bool {
    true
}

const fn default_num_channels() -> usize {
    1
}

fn default_model_file() -> PathBuf {
    PathBuf::from("model.onnx")
}

impl BuilderConfig {
    pub fn new(num_classes: usize, patch_size: [u32; 2]) -> Self {
        Self {
            num_classes,
            use_softmax: default_use_softmax(),
            num_channels: default_num_channels(),
            patch_size,
            model_file: default_model_file(),
        }
    }

    /// Reads `config.toml` from a model directory.
    pub fn from_model_dir(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(CONFIG_FILE_NAME);
        let text = fs::read_to_string(&path)
            .map_err(|e| PredError::file_system(&path, "read builder config", e))?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(PredError::validation("NUM_CLASSES", "must be at least 1"));
        }
        if !matches!(self.num_channels, 1 | 3) {
            return Err(PredError::validation(
                "NUM_CHANNELS",
                format!("must be 1 or 3, got {}", self.num_channels),
            ));
        }
        if self.patch_size.contains(&0) {
            return Err(PredError::validation("PATCH_SIZE", "must not contain 0"));
        }
        Ok(())
    }

    /// Number of channels the model outputs.
    pub const fn output_channels(&self) -> usize {
        if self.use_softmax {
            self.num_classes + 1
        } else {
            self.num_classes
        }
    }
}
