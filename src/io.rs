//! Image reading and writing plus directory listing helpers.
//!
//! Volumes are stored as `(z, y, x)` arrays of raw intensities. Raster formats
//! decoded by the `image` crate yield volumes of depth 1 and carry no physical
//! voxel size, so their spacing is empty.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, ImageBuffer, ImageFormat, Luma, Primitive};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use num_traits::ToPrimitive;
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{PredError, Result};

/// Image intensities laid out as `(z, y, x)`.
pub type Volume = Array3<f32>;

/// Physical voxel size per axis. Empty when the format does not store it.
pub type Spacing = Vec<f64>;

/// Spacing substituted when the input image does not provide one.
pub const DEFAULT_SPACING: [f64; 3] = [1.0, 1.0, 1.0];

fn open_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).map_err(|e| PredError::ImageProcessing {
        path: path.display().to_string(),
        operation: "image read".to_string(),
        source: Box::new(e),
    })
}

fn raw_to_volume<S>((width, height): (u32, u32), raw: Vec<S>) -> Result<Volume>
where
    S: Into<f32> + Clone,
{
    let slice = Array2::from_shape_vec((height as usize, width as usize), raw)?;
    Ok(slice.mapv(Into::into).insert_axis(Axis(0)))
}

/// Reads an image and its spacing.
///
/// 8- and 16-bit grayscale images keep their raw values so label images read
/// back with their class values; other pixel layouts are converted to 8-bit luma.
pub fn adaptive_imread(path: &Path) -> Result<(Volume, Spacing)> {
    let volume = match open_image(path)? {
        DynamicImage::ImageLuma8(buffer) => raw_to_volume(buffer.dimensions(), buffer.into_raw())?,
        DynamicImage::ImageLuma16(buffer) => raw_to_volume(buffer.dimensions(), buffer.into_raw())?,
        other => {
            let buffer = other.into_luma8();
            raw_to_volume(buffer.dimensions(), buffer.into_raw())?
        }
    };
    Ok((volume, Spacing::new()))
}

/// Reads an image as a `(3, y, x)` RGB array, with its spacing.
pub fn read_rgb(path: &Path) -> Result<(Array3<f32>, Spacing)> {
    let rgb = open_image(path)?.into_rgb8();
    Ok((rgb.as_ndarray3().mapv(f32::from), Spacing::new()))
}

fn to_pixels<S>(slice: ArrayView2<f32>) -> Vec<S>
where
    S: Primitive,
{
    let max = S::DEFAULT_MAX_VALUE.to_f32().unwrap_or(f32::MAX);
    slice
        .iter()
        .map(|v| {
            let v = if v.is_finite() { v.round().clamp(0.0, max) } else { 0.0 };
            num_traits::cast::<f32, S>(v).unwrap_or_else(S::zero)
        })
        .collect()
}

fn write_error(path: &Path, err: image::ImageError) -> PredError {
    PredError::ImageProcessing {
        path: path.display().to_string(),
        operation: "image write".to_string(),
        source: Box::new(err),
    }
}

fn shape_error() -> PredError {
    PredError::validation("volume", "pixel buffer does not match its shape")
}

/// Writes a volume of depth 1.
///
/// Values are rounded and stored as 8-bit luma when they all fit in
/// `0..=255`, as 16-bit luma otherwise.
pub fn adaptive_imsave(path: &Path, volume: &Volume, spacing: &[f64]) -> Result<()> {
    let (depth, _, _) = volume.dim();
    if depth != 1 {
        return Err(PredError::validation(
            "volume",
            format!(
                "depth {depth} cannot be written to {}, only single-slice images are supported",
                path.display()
            ),
        ));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| PredError::file_system(parent, "create output directory", e))?;
    }

    if !spacing.is_empty() {
        debug!(
            "{} cannot store spacing {:?}, dropped",
            path.display(),
            spacing
        );
    }

    let slice = volume.index_axis(Axis(0), 0);
    let (height, width) = slice.dim();
    let (width, height) = (width as u32, height as u32);
    let fits_u8 = slice.iter().all(|v| v.round() <= f32::from(u8::MAX));
    if fits_u8 {
        GrayImage::from_raw(width, height, to_pixels::<u8>(slice))
            .ok_or_else(shape_error)?
            .save(path)
            .map_err(|e| write_error(path, e))
    } else {
        ImageBuffer::<Luma<u16>, Vec<u16>>::from_raw(width, height, to_pixels::<u16>(slice))
            .ok_or_else(shape_error)?
            .save(path)
            .map_err(|e| write_error(path, e))
    }
}

pub fn is_supported_image_format(path: &Path) -> bool {
    ImageFormat::from_path(path)
        .map(|format| format.reading_enabled())
        .unwrap_or(false)
}

fn list_entries(path: &Path, keep: impl Fn(&walkdir::DirEntry) -> bool) -> Result<Vec<PathBuf>> {
    let root = std::path::absolute(path)
        .map_err(|e| PredError::file_system(path, "resolve absolute path", e))?;
    let metadata =
        fs::metadata(&root).map_err(|e| PredError::file_system(&root, "read directory", e))?;
    if !metadata.is_dir() {
        return Err(PredError::file_system(
            &root,
            "read directory",
            std::io::Error::from(std::io::ErrorKind::NotADirectory),
        ));
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(&root)
        .follow_links(true)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(&root).to_path_buf();
            PredError::file_system(path, "read directory", e.into())
        })?;
        if keep(&entry) {
            entries.push(entry.into_path());
        }
    }
    Ok(entries)
}

/// Absolute paths of the files directly inside `path`, sorted by name.
pub fn abs_listdir(path: &Path) -> Result<Vec<PathBuf>> {
    list_entries(path, |entry| entry.file_type().is_file())
}

/// Immediate subdirectories of `path`, sorted by name.
pub fn list_subdirs(path: &Path) -> Result<Vec<PathBuf>> {
    list_entries(path, |entry| entry.file_type().is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    #[test]
    fn test_imread_keeps_label_values() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("label.png");
        let mut label = GrayImage::new(4, 3);
        label.put_pixel(1, 2, Luma([2]));
        label.save(&path)?;

        let (volume, spacing) = adaptive_imread(&path)?;
        assert_eq!(volume.dim(), (1, 3, 4));
        assert_eq!(volume[[0, 2, 1]], 2.0);
        assert_eq!(volume.sum(), 2.0);
        assert!(spacing.is_empty());
        Ok(())
    }

    #[test]
    fn test_imsave_picks_bit_depth() -> Result<()> {
        let temp_dir = TempDir::new()?;

        let small = temp_dir.path().join("nested/small.png");
        adaptive_imsave(&small, &Array3::from_elem((1, 2, 2), 3.2), &DEFAULT_SPACING)?;
        assert!(matches!(image::open(&small)?, DynamicImage::ImageLuma8(_)));

        let large = temp_dir.path().join("large.png");
        adaptive_imsave(&large, &Array3::from_elem((1, 2, 2), 1000.0), &[])?;
        let (volume, _) = adaptive_imread(&large)?;
        assert_eq!(volume[[0, 1, 1]], 1000.0);
        Ok(())
    }

    #[test]
    fn test_imsave_rejects_stacks() {
        let temp_dir = TempDir::new().unwrap();
        let err = adaptive_imsave(
            &temp_dir.path().join("stack.png"),
            &Array3::zeros((2, 2, 2)),
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, PredError::Validation { .. }));
    }

    #[test]
    fn test_read_rgb_channel_first() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("rgb.png");
        RgbImage::from_pixel(5, 2, Rgb([10, 20, 30])).save(&path)?;

        let (rgb, spacing) = read_rgb(&path)?;
        assert!(spacing.is_empty());
        assert_eq!(rgb.dim(), (3, 2, 5));
        assert_eq!(rgb[[2, 1, 4]], 30.0);
        Ok(())
    }

    #[test]
    fn test_listing_is_sorted_and_split_by_kind() -> Result<()> {
        let temp_dir = TempDir::new()?;
        for name in ["b.png", "a.png", "c.png"] {
            fs::write(temp_dir.path().join(name), b"")?;
        }
        fs::create_dir(temp_dir.path().join("z_dir"))?;
        fs::create_dir(temp_dir.path().join("a_dir"))?;

        let files = abs_listdir(temp_dir.path())?;
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["a.png", "b.png", "c.png"]);
        assert!(files.iter().all(|p| p.is_absolute()));

        let dirs = list_subdirs(temp_dir.path())?;
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].ends_with("a_dir"));
        assert!(dirs[1].ends_with("z_dir"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_listing_follows_symlinks() -> Result<()> {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new()?;
        let store = temp_dir.path().join("store");
        let patient = store.join("patient_1");
        fs::create_dir_all(&patient)?;
        GrayImage::new(2, 2).save(store.join("a.png"))?;

        let listed = temp_dir.path().join("listed");
        fs::create_dir(&listed)?;
        symlink(store.join("a.png"), listed.join("a.png"))?;
        symlink(&patient, listed.join("patient_1"))?;

        let files = abs_listdir(&listed)?;
        assert_eq!(files, vec![listed.join("a.png")]);
        let dirs = list_subdirs(&listed)?;
        assert_eq!(dirs, vec![listed.join("patient_1")]);
        Ok(())
    }

    #[test]
    fn test_listing_a_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("img.png");
        fs::write(&file, b"").unwrap();

        for result in [abs_listdir(&file), list_subdirs(&file)] {
            match result.unwrap_err() {
                PredError::FileSystem { source, .. } => {
                    assert_eq!(source.kind(), std::io::ErrorKind::NotADirectory)
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn test_listing_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let err = abs_listdir(&temp_dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, PredError::FileSystem { .. }));
    }

    #[test]
    fn test_supported_formats() {
        assert!(is_supported_image_format(Path::new("img.png")));
        assert!(is_supported_image_format(Path::new("img.TIF")));
        assert!(!is_supported_image_format(Path::new("notes.txt")));
        assert!(!is_supported_image_format(Path::new("noext")));
    }
}
