use std::path::Path;

use crate::builder_config::BuilderConfig;
use crate::errors::Result;
use crate::io::Volume;

/// A loaded model able to run predictions.
///
/// The orchestrator only talks to this trait, so any inference backend that
/// can predict an image and a folder of images plugs in.
pub trait SegmentationBuilder {
    /// Predict one image and return its label volume.
    fn run_prediction_single(&self, image_path: &Path) -> Result<Volume>;

    /// Predict every image of `dir_in` and write the results into `dir_out`.
    fn run_prediction_folder(&self, dir_in: &Path, dir_out: &Path) -> Result<()>;

    /// Dataset and class metadata of the model.
    fn config(&self) -> &BuilderConfig;
}

/// Builds a [`SegmentationBuilder`] from a model directory.
pub trait BuilderLoader {
    type Builder: SegmentationBuilder;

    fn load(&self, model_dir: &Path) -> Result<Self::Builder>;
}
