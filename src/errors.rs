use std::path::PathBuf;
use thiserror::Error;

/// Errors of a prediction or evaluation run.
#[derive(Error, Debug)]
pub enum PredError {
    /// Bad run request or model directory: missing label path, unreadable
    /// `config.toml`, model folder without a name.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Listing input/label/prediction folders or creating output folders failed.
    #[error("Filesystem error: {operation} failed for {path:?}")]
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// An image or label file could not be decoded or a prediction not encoded.
    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Loading the ONNX session or running inference failed.
    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Inputs that cannot be paired or scored: label/prediction count or
    /// shape mismatch, class index out of range, unwritable volume depth.
    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PredError>;

impl PredError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Wraps an I/O error with the path and operation that produced it.
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }
}

/// Fallback for bare I/O errors; listing and saving code attaches the path
/// through [`PredError::file_system`] instead.
impl From<std::io::Error> for PredError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            path: PathBuf::from("unknown"),
            operation: "unknown".to_string(),
            source: err,
        }
    }
}

/// Test fixtures and decode helpers without a path at hand.
impl From<image::ImageError> for PredError {
    fn from(err: image::ImageError) -> Self {
        Self::ImageProcessing {
            path: "unknown".to_string(),
            operation: "image processing".to_string(),
            source: Box::new(err),
        }
    }
}

/// Session runs and tensor extraction inside `OnnxBuilder::predict`.
impl From<ort::Error> for PredError {
    fn from(err: ort::Error) -> Self {
        Self::Model {
            operation: "ort operation".to_string(),
            source: Box::new(err),
        }
    }
}

/// Stacking predicted slices and reshaping logits; reported as model errors.
impl From<ndarray::ShapeError> for PredError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Model {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<toml::de::Error> for PredError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration {
            message: format!("invalid builder config: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message() {
        let err = PredError::validation("labels", "count 3 differs from predictions count 2");
        assert_eq!(
            err.to_string(),
            "Validation error: labels count 3 differs from predictions count 2"
        );
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error;

        let err = PredError::file_system(
            "/tmp/missing",
            "read directory",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("read directory"));
        assert_eq!(err.source().map(|s| s.to_string()), Some("gone".to_string()));
    }

    #[test]
    fn test_bad_builder_config_is_configuration_error() {
        let err: PredError = toml::from_str::<toml::Table>("NUM_CLASSES = ")
            .unwrap_err()
            .into();
        match err {
            PredError::Configuration { message } => {
                assert!(message.starts_with("invalid builder config"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
