//! Pixel/tensor codec: interleaved RGBA8 bitmaps <-> planar RGB f32 tensors.
//!
//! The planar layout is channel-major (`RRR..GGG..BBB..`), which is what the
//! super-resolution model consumes once viewed as `(1, 3, H, W)`. Alpha is not
//! modelled: it is dropped on encode and written as fully opaque on decode.

use std::fmt;

use thiserror::Error;

/// Bytes per pixel in an interleaved bitmap (R, G, B, A).
pub const RGBA_CHANNELS: usize = 4;

/// Planes in a tensor (R, G, B).
pub const RGB_CHANNELS: usize = 3;

/// Decoded image: `width * height` pixels, row-major, top-to-bottom, RGBA8.
///
/// Fields are public so callers can hand over buffers from any decoder;
/// [`encode`] checks `data.len()` against the declared dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl Bitmap {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            data,
        }
    }

    /// Bitmap with every pixel set to `rgba`.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self, CodecError> {
        let len = buffer_len(width, height, RGBA_CHANNELS)?;
        let mut data = Vec::with_capacity(len);
        for _ in 0..len / RGBA_CHANNELS {
            data.extend_from_slice(&rgba);
        }
        Ok(Self::new(width, height, data))
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Check that the buffer length matches `width * height * 4`.
    pub fn validate(&self) -> Result<(), CodecError> {
        check_len(
            BufferKind::Bitmap,
            self.width,
            self.height,
            RGBA_CHANNELS,
            self.data.len(),
        )
        .map(|_| ())
    }

    /// RGBA value at `(x, y)`, or `None` outside the bitmap.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * RGBA_CHANNELS;
        let px = self.data.get(idx..idx + RGBA_CHANNELS)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InvalidInput),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidInput {
    #[error("dimensions {width}x{height} must both be positive")]
    ZeroDimension { width: u32, height: u32 },

    #[error("dimensions {width}x{height} overflow the addressable buffer size")]
    Overflow { width: u32, height: u32 },

    #[error("{buffer} length mismatch for {width}x{height}: expected {expected}, got {actual}")]
    LengthMismatch {
        buffer: BufferKind,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    Bitmap,
    Tensor,
}

impl fmt::Display for BufferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bitmap => write!(f, "bitmap"),
            Self::Tensor => write!(f, "tensor"),
        }
    }
}

/// Number of elements a `width x height` buffer with `channels` values per
/// pixel holds.
pub fn buffer_len(width: u32, height: u32, channels: usize) -> Result<usize, CodecError> {
    if width == 0 || height == 0 {
        return Err(InvalidInput::ZeroDimension { width, height }.into());
    }
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(channels))
        .ok_or_else(|| InvalidInput::Overflow { width, height }.into())
}

fn check_len(
    buffer: BufferKind,
    width: u32,
    height: u32,
    channels: usize,
    actual: usize,
) -> Result<usize, CodecError> {
    let expected = buffer_len(width, height, channels)?;
    if actual != expected {
        return Err(InvalidInput::LengthMismatch {
            buffer,
            width,
            height,
            expected,
            actual,
        }
        .into());
    }
    Ok(expected)
}

/// Encode a bitmap into a planar `[0, 1]` tensor of length `3 * W * H`.
pub fn encode(bitmap: &Bitmap) -> Result<Vec<f32>, CodecError> {
    encode_rgba(bitmap.width, bitmap.height, &bitmap.data)
}

/// Encode a raw interleaved RGBA8 buffer. Alpha bytes are ignored.
pub fn encode_rgba(width: u32, height: u32, rgba: &[u8]) -> Result<Vec<f32>, CodecError> {
    let len = check_len(BufferKind::Bitmap, width, height, RGBA_CHANNELS, rgba.len())?;
    let hw = len / RGBA_CHANNELS;

    let mut tensor = vec![0.0f32; hw * RGB_CHANNELS];
    let (r_plane, rest) = tensor.split_at_mut(hw);
    let (g_plane, b_plane) = rest.split_at_mut(hw);

    for (i, px) in rgba.chunks_exact(RGBA_CHANNELS).enumerate() {
        r_plane[i] = f32::from(px[0]) / 255.0;
        g_plane[i] = f32::from(px[1]) / 255.0;
        b_plane[i] = f32::from(px[2]) / 255.0;
    }

    Ok(tensor)
}

/// Decode a planar tensor of length `3 * W * H` into an opaque RGBA8 bitmap.
///
/// Values are scaled by 255, rounded and saturated into `0..=255`, so model
/// overshoot never wraps.
pub fn decode(tensor: &[f32], width: u32, height: u32) -> Result<Bitmap, CodecError> {
    let out_len = buffer_len(width, height, RGBA_CHANNELS)?;
    let len = check_len(BufferKind::Tensor, width, height, RGB_CHANNELS, tensor.len())?;
    let hw = len / RGB_CHANNELS;

    let (r_plane, rest) = tensor.split_at(hw);
    let (g_plane, b_plane) = rest.split_at(hw);

    let mut data = vec![0u8; out_len];
    for (i, px) in data.chunks_exact_mut(RGBA_CHANNELS).enumerate() {
        px[0] = denormalize(r_plane[i]);
        px[1] = denormalize(g_plane[i]);
        px[2] = denormalize(b_plane[i]);
        px[3] = u8::MAX;
    }

    Ok(Bitmap::new(width, height, data))
}

/// Map a normalized intensity to a byte with a saturating clamp.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn denormalize(value: f32) -> u8 {
    // NaN passes through clamp; the float-to-int cast maps it to 0.
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}
