//! Image file decoding into [`Bitmap`]s and PNG export.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{ImageFormat, RgbaImage};
use tracing::debug;

use crate::codec::Bitmap;

pub const DEFAULT_OUTPUT_PREFIX: &str = "CiptaDigital-HD-";

/// Decode an image file (any format the `image` crate reads) into RGBA8.
pub fn load_bitmap(path: &Path) -> Result<Bitmap> {
    let img = image::open(path)
        .with_context(|| format!("failed to decode image: {}", path.display()))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    debug!(
        path = %path.display(),
        width,
        height,
        color = ?img.color(),
        "Decoded input image"
    );

    Ok(Bitmap::new(width, height, rgba.into_raw()))
}

/// Write `bitmap` as a PNG file, creating the parent directory if needed.
pub fn save_png(bitmap: &Bitmap, path: &Path) -> Result<()> {
    let img = to_rgba_image(bitmap)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory: {}", parent.display()))?;
    }

    img.save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("failed to write PNG: {}", path.display()))?;

    debug!(
        path = %path.display(),
        width = bitmap.width,
        height = bitmap.height,
        "Wrote PNG"
    );
    Ok(())
}

pub(crate) fn to_rgba_image(bitmap: &Bitmap) -> Result<RgbaImage> {
    bitmap.validate()?;
    RgbaImage::from_raw(bitmap.width, bitmap.height, bitmap.data.clone())
        .context("bitmap buffer does not fit its dimensions")
}

pub(crate) fn from_rgba_image(img: RgbaImage) -> Bitmap {
    let (width, height) = img.dimensions();
    Bitmap::new(width, height, img.into_raw())
}

/// `<input dir>/<prefix><stem>.png`, where `<stem>` is the file name up to
/// its first `.`.
pub fn default_output_path(input: &Path, prefix: &str) -> PathBuf {
    let file_name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name.split('.').next().unwrap_or_default();
    let stem = if stem.is_empty() { "image" } else { stem };

    let name = format!("{prefix}{stem}.png");
    match input.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}
