use std::path::Path;

use ndarray::prelude::*;

use crate::errors::{PredError, Result};
use crate::io::{adaptive_imread, Volume};

/// Metric comparing a one-hot prediction with a one-hot target, both `(c, z, y, x)`.
pub type MetricFn = fn(ArrayView4<bool>, ArrayView4<bool>) -> f64;

/// One-hot encodes a label volume into `num_classes` channels.
///
/// Distinct values are mapped to classes by rank, so a `{0, 255}` mask and a
/// `{0, 1}` mask encode the same way. Values ranked past the last class are
/// left out of every channel.
pub fn one_hot(volume: &Volume, num_classes: usize) -> Array4<bool> {
    let mut values: Vec<f32> = volume.iter().copied().collect();
    values.sort_by(f32::total_cmp);
    values.dedup_by(|a, b| a.total_cmp(b).is_eq());

    let (depth, height, width) = volume.dim();
    let mut encoded = Array4::from_elem((num_classes, depth, height, width), false);
    for ((z, y, x), value) in volume.indexed_iter() {
        if let Ok(class) = values.binary_search_by(|probe| probe.total_cmp(value)) {
            if class < num_classes {
                encoded[[class, z, y, x]] = true;
            }
        }
    }
    encoded
}

/// Smoothed Dice coefficient, averaged over channels.
pub fn dice(inputs: ArrayView4<bool>, targets: ArrayView4<bool>) -> f64 {
    const SMOOTH: f64 = 1.0;

    let scores: Vec<f64> = inputs
        .outer_iter()
        .zip(targets.outer_iter())
        .map(|(input, target)| {
            let (mut inter, mut input_sum, mut target_sum) = (0u64, 0u64, 0u64);
            for (&i, &t) in input.iter().zip(target.iter()) {
                inter += u64::from(i && t);
                input_sum += u64::from(i);
                target_sum += u64::from(t);
            }
            (2.0 * inter as f64 + SMOOTH) / (input_sum as f64 + target_sum as f64 + SMOOTH)
        })
        .collect();

    if scores.is_empty() {
        return f64::NAN;
    }
    scores.iter().sum::<f64>() / scores.len() as f64
}

/// Compares a prediction file with a label file using `fct`.
///
/// Both images are one-hot encoded with `num_classes` channels (background
/// included) and the background channel is dropped. `single_class` keeps only
/// one foreground channel, counted from 0.
pub fn versus_one(
    fct: MetricFn,
    in_path: &Path,
    tg_path: &Path,
    num_classes: usize,
    single_class: Option<usize>,
) -> Result<f64> {
    if num_classes < 2 {
        return Err(PredError::validation(
            "num_classes",
            format!("must count the background and at least one class, got {num_classes}"),
        ));
    }

    let (prediction, _) = adaptive_imread(in_path)?;
    let (target, _) = adaptive_imread(tg_path)?;
    if prediction.dim() != target.dim() {
        return Err(PredError::validation(
            "prediction",
            format!(
                "{} has shape {:?} but label {} has shape {:?}",
                in_path.display(),
                prediction.dim(),
                tg_path.display(),
                target.dim()
            ),
        ));
    }

    let prediction = one_hot(&prediction, num_classes);
    let target = one_hot(&target, num_classes);
    let foreground = s![1.., .., .., ..];
    let (prediction, target) = (prediction.slice(foreground), target.slice(foreground));

    match single_class {
        Some(class) if class >= num_classes - 1 => Err(PredError::validation(
            "single_class",
            format!("{class} is out of range for {} foreground classes", num_classes - 1),
        )),
        Some(class) => {
            let channel = s![class..=class, .., .., ..];
            Ok(fct(prediction.slice(channel), target.slice(channel)))
        }
        None => Ok(fct(prediction, target)),
    }
}
