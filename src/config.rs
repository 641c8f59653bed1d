use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Operation selected with `--name`.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[value(rename_all = "snake_case")]
pub enum Operation {
    /// Predict a folder of images.
    Seg,
    /// Predict a folder of images, then compare them with a label folder.
    SegEval,
    /// Predict a folder of folders of images.
    SegMultiple,
    /// Predict a single image.
    SegSingle,
    /// Predict a single image, then compare it with its label.
    SegEvalSingle,
}

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Name of the method to run.
    #[arg(short, long, value_enum, default_value_t = Operation::Seg)]
    pub name: Operation,

    /// Path of the builder (model) directory.
    #[arg(short, long, visible_alias = "bui_dir")]
    pub bui_dir: PathBuf,

    /// Path to the input image directory, or the input image for single-image methods.
    #[arg(short = 'i', long, visible_alias = "dir_in")]
    pub dir_in: PathBuf,

    /// Path to the output prediction directory, or the output image for single-image methods.
    #[arg(short = 'o', long, visible_alias = "dir_out")]
    pub dir_out: PathBuf,

    /// Path to the label directory, or the label image for `seg_eval_single`.
    #[arg(short = 'a', long, visible_alias = "dir_lab")]
    pub dir_lab: Option<PathBuf>,

    /// Do only the evaluation and skip the prediction (predictions must have been done already).
    #[arg(short, long, visible_alias = "eval_only")]
    pub eval_only: bool,

    /// Device used by the CUDA/TensorRT execution providers.
    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,
}
