use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{Config, Operation};
use crate::errors::{PredError, Result};
use crate::io::{
    abs_listdir, adaptive_imread, adaptive_imsave, list_subdirs, Spacing, Volume,
    DEFAULT_SPACING,
};
use crate::metrics::{dice, versus_one};
use crate::traits::{BuilderLoader, SegmentationBuilder};

/// Per-file scores of a folder evaluation, in sorted file order.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalReport {
    pub predictions: Vec<PathBuf>,
    pub labels: Vec<PathBuf>,
    pub scores: Vec<f64>,
}

impl EvalReport {
    /// Arithmetic mean of the scores, `None` when nothing was evaluated.
    pub fn mean(&self) -> Option<f64> {
        if self.scores.is_empty() {
            None
        } else {
            Some(self.scores.iter().sum::<f64>() / self.scores.len() as f64)
        }
    }
}

/// Outcome of `seg_eval_single`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SingleEvalReport {
    /// Class count, background included, used for the metric.
    pub num_classes: usize,
    pub score: f64,
}

/// Substitutes unit spacing when the image did not provide any.
pub fn resolve_spacing(spacing: Spacing) -> Spacing {
    if spacing.is_empty() {
        DEFAULT_SPACING.to_vec()
    } else {
        spacing
    }
}

/// Writes `prediction` with the spacing of `image_path`, unit spacing when it has none.
///
/// Returns the spacing handed to the writer.
pub fn save_prediction(
    image_path: &Path,
    output_path: &Path,
    prediction: &Volume,
) -> Result<Spacing> {
    let (_, spacing) = adaptive_imread(image_path)?;
    let spacing = resolve_spacing(spacing);
    adaptive_imsave(output_path, prediction, &spacing)?;
    Ok(spacing)
}

/// Folder receiving the predictions of a model: `dir_out/<model_dir name>`.
pub fn prediction_dir(model_dir: &Path, dir_out: &Path) -> Result<PathBuf> {
    let name = model_dir.file_name().ok_or_else(|| {
        PredError::configuration(format!(
            "cannot name the prediction folder after {}",
            model_dir.display()
        ))
    })?;
    Ok(dir_out.join(name))
}

/// Runs the prediction and evaluation methods against builders produced by `L`.
pub struct Orchestrator<L: BuilderLoader> {
    loader: L,
}

impl<L: BuilderLoader> Orchestrator<L> {
    pub const fn new(loader: L) -> Self {
        Self { loader }
    }

    /// Dispatches the method selected in `config`.
    pub fn run(&self, config: &Config) -> Result<()> {
        let (model_dir, dir_in, dir_out) = (&config.bui_dir, &config.dir_in, &config.dir_out);
        match config.name {
            Operation::Seg => self.seg(model_dir, dir_in, dir_out),
            Operation::SegEval => self
                .seg_eval(
                    model_dir,
                    dir_in,
                    dir_out,
                    config.dir_lab.as_deref(),
                    config.eval_only,
                )
                .map(|_| ()),
            Operation::SegMultiple => self.seg_multiple(model_dir, dir_in, dir_out).map(|_| ()),
            Operation::SegSingle => self.seg_single(model_dir, dir_in, dir_out).map(|_| ()),
            Operation::SegEvalSingle => {
                let label_path = config.dir_lab.as_deref().ok_or_else(|| {
                    PredError::configuration("seg_eval_single needs a label image (--dir-lab)")
                })?;
                self.seg_eval_single(model_dir, dir_in, dir_out, label_path)
                    .map(|_| ())
            }
        }
    }

    /// Predicts a single image and writes it with the input spacing.
    ///
    /// Returns the class count, background included, for the evaluation that may follow.
    pub fn seg_single(
        &self,
        model_dir: &Path,
        image_path: &Path,
        output_path: &Path,
    ) -> Result<usize> {
        let builder = self.loader.load(model_dir)?;
        let prediction = builder.run_prediction_single(image_path)?;
        save_prediction(image_path, output_path, &prediction)?;
        Ok(builder.config().num_classes + 1)
    }

    /// Predicts a folder of images into `dir_out/<model_dir name>`.
    pub fn seg(&self, model_dir: &Path, dir_in: &Path, dir_out: &Path) -> Result<()> {
        let dir_out = prediction_dir(model_dir, dir_out)?;
        let builder = self.loader.load(model_dir)?;
        builder.run_prediction_folder(dir_in, &dir_out)
    }

    /// Predicts a folder of folders, loading a fresh builder for each subfolder.
    ///
    /// Returns the output folders, one per input subfolder with the same name.
    pub fn seg_multiple(
        &self,
        model_dir: &Path,
        dir_in: &Path,
        dir_out: &Path,
    ) -> Result<Vec<PathBuf>> {
        let mut outputs = Vec::new();
        for sub_in in list_subdirs(dir_in)? {
            let name = sub_in.file_name().ok_or_else(|| {
                PredError::validation("subfolder", format!("{} has no name", sub_in.display()))
            })?;
            let sub_out = dir_out.join(name);

            info!("Predict {} into {}", sub_in.display(), sub_out.display());
            let builder = self.loader.load(model_dir)?;
            builder.run_prediction_folder(&sub_in, &sub_out)?;
            outputs.push(sub_out);
        }
        Ok(outputs)
    }

    /// Predicts a folder (unless `eval_only`), then scores the predictions
    /// against `dir_lab` when given.
    ///
    /// Label and prediction files are paired by their position in name order.
    pub fn seg_eval(
        &self,
        model_dir: &Path,
        dir_in: &Path,
        dir_out: &Path,
        dir_lab: Option<&Path>,
        eval_only: bool,
    ) -> Result<Option<EvalReport>> {
        info!("Start inference");
        let builder = self.loader.load(model_dir)?;

        let dir_out = prediction_dir(model_dir, dir_out)?;
        if !eval_only {
            builder.run_prediction_folder(dir_in, &dir_out)?;
        }
        info!("Inference done!");

        let Some(dir_lab) = dir_lab else {
            return Ok(None);
        };

        info!("Start evaluation");
        let labels = abs_listdir(dir_lab)?;
        let predictions = abs_listdir(&dir_out)?;
        if labels.len() != predictions.len() {
            return Err(PredError::validation(
                "labels",
                format!(
                    "Not the same number of labels and predictions! [{}, {}]",
                    labels.len(),
                    predictions.len()
                ),
            ));
        }

        let num_classes = builder.config().num_classes + 1;
        let mut scores = Vec::with_capacity(labels.len());
        for (prediction, label) in predictions.iter().zip(&labels) {
            info!("Metric computation for: {}", prediction.display());
            let score = versus_one(dice, prediction, label, num_classes, None)?;
            println!("Metric result: {score}");
            scores.push(score);
        }

        let report = EvalReport {
            predictions,
            labels,
            scores,
        };
        println!(
            "Evaluation done! Average result: {}",
            report.mean().unwrap_or(f64::NAN)
        );
        Ok(Some(report))
    }

    /// Predicts a single image and scores it against its label.
    pub fn seg_eval_single(
        &self,
        model_dir: &Path,
        image_path: &Path,
        output_path: &Path,
        label_path: &Path,
    ) -> Result<SingleEvalReport> {
        info!("Run prediction for: {}", image_path.display());
        let num_classes = self.seg_single(model_dir, image_path, output_path)?;
        info!("Done! Prediction saved in: {}", output_path.display());

        info!("Metric computation with mask: {}", label_path.display());
        let score = versus_one(dice, output_path, label_path, num_classes, None)?;
        println!("Metric result: {score}");
        Ok(SingleEvalReport { num_classes, score })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_of_scores() {
        let report = EvalReport {
            predictions: vec![],
            labels: vec![],
            scores: vec![0.8, 0.6, 1.0],
        };
        assert!((report.mean().unwrap() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_mean_of_nothing() {
        let report = EvalReport {
            predictions: vec![],
            labels: vec![],
            scores: vec![],
        };
        assert_eq!(report.mean(), None);
    }

    #[test]
    fn test_resolve_spacing() {
        assert_eq!(resolve_spacing(vec![]), vec![1.0, 1.0, 1.0]);
        assert_eq!(resolve_spacing(vec![0.5, 0.2, 0.2]), vec![0.5, 0.2, 0.2]);
    }

    #[test]
    fn test_save_prediction_defaults_to_unit_spacing() -> Result<()> {
        use image::{GrayImage, Luma};
        use tempfile::TempDir;

        let temp_dir = TempDir::new()?;
        let image_path = temp_dir.path().join("img.png");
        GrayImage::from_pixel(3, 2, Luma([7])).save(&image_path)?;

        let output_path = temp_dir.path().join("out").join("img.png");
        let prediction = Volume::from_elem((1, 2, 3), 1.0);
        let spacing = save_prediction(&image_path, &output_path, &prediction)?;

        assert_eq!(spacing, vec![1.0, 1.0, 1.0]);
        let (written, _) = adaptive_imread(&output_path)?;
        assert_eq!(written, prediction);
        Ok(())
    }

    #[test]
    fn test_prediction_dir_uses_model_name() -> Result<()> {
        assert_eq!(
            prediction_dir(Path::new("logs/20230101-unet_nucleus"), Path::new("preds"))?,
            PathBuf::from("preds/20230101-unet_nucleus")
        );
        assert_eq!(
            prediction_dir(Path::new("logs/unet/"), Path::new("preds"))?,
            PathBuf::from("preds/unet")
        );
        assert!(prediction_dir(Path::new("/"), Path::new("preds")).is_err());
        Ok(())
    }
}
