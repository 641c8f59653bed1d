use std::{
    fs,
    path::{Path, PathBuf},
};

use image::{imageops, imageops::FilterType, ImageBuffer, Luma};
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    builder_config::BuilderConfig,
    errors::{PredError, Result},
    io::{
        abs_listdir, adaptive_imread, adaptive_imsave, is_supported_image_format, read_rgb,
        Spacing, Volume,
    },
    traits::{BuilderLoader, SegmentationBuilder},
};

/// Builder backed by an ONNX Runtime session loaded from a model directory.
pub struct OnnxBuilder {
    config: BuilderConfig,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl OnnxBuilder {
    pub fn new(model_dir: &Path, device_id: i32) -> Result<Self> {
        let config = BuilderConfig::from_model_dir(model_dir)?;
        let model_path = model_dir.join(&config.model_file);

        let session = SessionBuilder::new()
            .map_err(|e| PredError::Model {
                operation: "session builder initialization".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| PredError::Model {
                operation: "execution provider setup".to_string(),
                source: Box::new(e),
            })?
            .with_memory_pattern(true)
            .map_err(|e| PredError::Model {
                operation: "memory pattern setup".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(&model_path)
            .map_err(|e| PredError::Model {
                operation: format!("model file load: {}", model_path.display()),
                source: Box::new(e),
            })?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| PredError::validation("model", "has no input tensor"))?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| PredError::validation("model", "has no output tensor"))?;

        info!(
            "Loaded {} ({} classes, softmax: {})",
            model_path.display(),
            config.num_classes,
            config.use_softmax
        );

        Ok(Self {
            config,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }

    /// Runs the session on a `(n, c, h, w)` tensor.
    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        Ok(outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }

    /// Predicts one `(c, h, w)` slice and returns its label map.
    fn predict_slice(&self, slice: ArrayView3<f32>) -> Result<Array2<f32>> {
        let (_, height, width) = slice.dim();
        let tensor = preprocess(slice, self.config.patch_size)?;
        let logits = self.predict(tensor.view())?;

        let channels = logits.dim().1;
        if channels != self.config.output_channels() {
            return Err(PredError::validation(
                "model output",
                format!(
                    "has {channels} channels, config expects {}",
                    self.config.output_channels()
                ),
            ));
        }

        let labels = logits_to_labels(logits.index_axis(Axis(0), 0), self.config.use_softmax);
        Ok(resize_nearest(labels.view(), width, height))
    }

    fn predict_file(&self, image_path: &Path) -> Result<(Volume, Spacing)> {
        // (z, c, y, x)
        let (input, spacing) = if self.config.num_channels == 3 {
            let (rgb, spacing) = read_rgb(image_path)?;
            (rgb.insert_axis(Axis(0)), spacing)
        } else {
            let (volume, spacing) = adaptive_imread(image_path)?;
            (volume.insert_axis(Axis(1)), spacing)
        };

        let slices = input
            .outer_iter()
            .map(|slice| self.predict_slice(slice))
            .collect::<Result<Vec<_>>>()?;
        let views: Vec<_> = slices.iter().map(|s| s.view()).collect();
        let prediction = ndarray::stack(Axis(0), &views)?;

        debug!("Predicted {}", image_path.display());
        Ok((prediction, spacing))
    }
}

impl SegmentationBuilder for OnnxBuilder {
    fn run_prediction_single(&self, image_path: &Path) -> Result<Volume> {
        self.predict_file(image_path).map(|(prediction, _)| prediction)
    }

    fn run_prediction_folder(&self, dir_in: &Path, dir_out: &Path) -> Result<()> {
        fs::create_dir_all(dir_out)
            .map_err(|e| PredError::file_system(dir_out, "create output directory", e))?;

        let image_paths: Vec<PathBuf> = abs_listdir(dir_in)?
            .into_iter()
            .filter(|path| is_supported_image_format(path))
            .collect();
        if image_paths.is_empty() {
            info!("No image to predict in {}", dir_in.display());
            return Ok(());
        }

        let pb = ProgressBar::new(image_paths.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )
                .map_err(|e| PredError::configuration(e.to_string()))?
                .progress_chars("#>-"),
        );

        for image_path in &image_paths {
            let (prediction, spacing) = self.predict_file(image_path)?;
            let file_name = image_path.file_name().ok_or_else(|| {
                PredError::validation(
                    "image path",
                    format!("{} has no file name", image_path.display()),
                )
            })?;
            adaptive_imsave(&dir_out.join(file_name), &prediction, &spacing)?;
            pb.inc(1);
        }

        pb.finish();
        Ok(())
    }

    fn config(&self) -> &BuilderConfig {
        &self.config
    }
}

/// Loads an [`OnnxBuilder`] on the given device.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxBuilderLoader {
    pub device_id: i32,
}

impl OnnxBuilderLoader {
    pub const fn new(device_id: i32) -> Self {
        Self { device_id }
    }
}

impl BuilderLoader for OnnxBuilderLoader {
    type Builder = OnnxBuilder;

    fn load(&self, model_dir: &Path) -> Result<OnnxBuilder> {
        OnnxBuilder::new(model_dir, self.device_id)
    }
}

/// Resizes a `(c, h, w)` slice to the patch size and z-score normalizes it,
/// returning a `(1, c, ph, pw)` tensor.
pub fn preprocess(slice: ArrayView3<f32>, patch_size: [u32; 2]) -> Result<Array4<f32>> {
    let [patch_height, patch_width] = patch_size;
    let channels = slice
        .outer_iter()
        .map(|plane| resize_plane(plane, patch_width, patch_height, FilterType::Triangle))
        .collect::<Result<Vec<_>>>()?;
    let views: Vec<_> = channels.iter().map(|c| c.view()).collect();
    let mut tensor = ndarray::stack(Axis(0), &views)?;

    let mean = tensor.mean().unwrap_or(0.0);
    let std = tensor.std(0.0).max(1e-8);
    tensor.mapv_inplace(|v| (v - mean) / std);

    Ok(tensor.insert_axis(Axis(0)))
}

/// Turns `(k, h, w)` logits into a label map.
///
/// Softmax outputs take the arg max over channels. Sigmoid outputs label a
/// pixel with `1 +` its most confident channel when that channel's logit is
/// positive, background otherwise.
pub fn logits_to_labels(logits: ArrayView3<f32>, use_softmax: bool) -> Array2<f32> {
    let (_, height, width) = logits.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        let pixel = logits.slice(s![.., y, x]);
        let (best, score) = pixel
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        if use_softmax {
            best as f32
        } else if score > 0.0 {
            (best + 1) as f32
        } else {
            0.0
        }
    })
}

/// Nearest-neighbour resize that never mixes label values.
fn resize_nearest(plane: ArrayView2<f32>, width: usize, height: usize) -> Array2<f32> {
    let (rows, cols) = plane.dim();
    Array2::from_shape_fn((height, width), |(y, x)| {
        plane[[y * rows / height, x * cols / width]]
    })
}

fn resize_plane(
    plane: ArrayView2<f32>,
    width: u32,
    height: u32,
    filter: FilterType,
) -> Result<Array2<f32>> {
    let (rows, cols) = plane.dim();
    if (cols as u32, rows as u32) == (width, height) {
        return Ok(plane.to_owned());
    }

    let pixels = plane.iter().copied().collect();
    let buffer = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(cols as u32, rows as u32, pixels)
        .ok_or_else(|| PredError::validation("plane", "pixel buffer does not match its shape"))?;
    let resized = imageops::resize(&buffer, width, height, filter);
    Ok(Array2::from_shape_vec(
        (height as usize, width as usize),
        resized.into_raw(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_softmax_labels_take_argmax() {
        let logits = array![
            [[5.0, 0.0], [0.0, 0.0]],
            [[1.0, 3.0], [0.0, 0.0]],
            [[0.0, 2.0], [0.0, 9.0]],
        ];
        let labels = logits_to_labels(logits.view(), true);
        assert_eq!(labels, array![[0.0, 1.0], [0.0, 2.0]]);
    }

    #[test]
    fn test_sigmoid_labels_need_positive_logit() {
        let logits = array![[[-1.0, 2.0], [0.5, -3.0]], [[-2.0, 4.0], [0.1, -0.5]]];
        let labels = logits_to_labels(logits.view(), false);
        assert_eq!(labels, array![[0.0, 2.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_preprocess_shape_and_normalization() -> Result<()> {
        let slice = Array3::from_shape_fn((1, 10, 6), |(_, y, x)| (y * 6 + x) as f32);
        let tensor = preprocess(slice.view(), [4, 8])?;

        assert_eq!(tensor.dim(), (1, 1, 4, 8));
        assert!(tensor.mean().unwrap().abs() < 1e-4);
        assert!((tensor.std(0.0) - 1.0).abs() < 1e-3);
        Ok(())
    }

    #[test]
    fn test_preprocess_constant_image() -> Result<()> {
        let slice = Array3::from_elem((3, 4, 4), 7.0);
        let tensor = preprocess(slice.view(), [4, 4])?;
        assert!(tensor.iter().all(|v| *v == 0.0));
        Ok(())
    }

    #[test]
    fn test_nearest_resize_keeps_labels() {
        let labels = array![[0.0, 1.0], [2.0, 3.0]];
        let resized = resize_nearest(labels.view(), 4, 3);
        assert_eq!(resized.dim(), (3, 4));
        assert_eq!(
            resized,
            array![
                [0.0, 0.0, 1.0, 1.0],
                [0.0, 0.0, 1.0, 1.0],
                [2.0, 2.0, 3.0, 3.0],
            ]
        );
    }
}
