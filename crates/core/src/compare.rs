//! Before/after comparison composite.
//!
//! Renders the comparison slider as a still image: the left part of the frame
//! shows the super-resolved result, the right part shows the source scaled up
//! to the result's size, separated by a thin white divider.

use anyhow::Result;
use image::imageops::{self, FilterType};

use crate::codec::{Bitmap, RGBA_CHANNELS};
use crate::imageio::{from_rgba_image, to_rgba_image};

pub const DEFAULT_SPLIT_PERCENT: u8 = 50;

const DIVIDER_WIDTH: u32 = 2;
const DIVIDER_COLOR: [u8; 4] = [255, 255, 255, 255];

/// Column at which the `before` image starts for a slider at `split_percent`.
pub fn split_column(width: u32, split_percent: u8) -> u32 {
    let pct = u64::from(split_percent.min(100));
    (u64::from(width) * pct / 100) as u32
}

/// Compose a before/after image with the dimensions of `after`.
pub fn compose(before: &Bitmap, after: &Bitmap, split_percent: u8) -> Result<Bitmap> {
    before.validate()?;
    after.validate()?;

    let scaled = if before.width == after.width && before.height == after.height {
        before.clone()
    } else {
        let src = to_rgba_image(before)?;
        from_rgba_image(imageops::resize(
            &src,
            after.width,
            after.height,
            FilterType::Triangle,
        ))
    };

    let width = after.width as usize;
    let split = split_column(after.width, split_percent) as usize;
    let divider_start = split.saturating_sub(DIVIDER_WIDTH as usize / 2);
    let divider_end = (divider_start + DIVIDER_WIDTH as usize).min(width);

    let mut data = scaled.data;
    let row_bytes = width * RGBA_CHANNELS;
    let left = split * RGBA_CHANNELS;
    for (dst, src) in data
        .chunks_exact_mut(row_bytes)
        .zip(after.data.chunks_exact(row_bytes))
    {
        dst[..left].copy_from_slice(&src[..left]);
        for x in divider_start..divider_end {
            let offset = x * RGBA_CHANNELS;
            dst[offset..offset + RGBA_CHANNELS].copy_from_slice(&DIVIDER_COLOR);
        }
    }

    Ok(Bitmap::new(after.width, after.height, data))
}
