//! End-to-end upscale job: decode, validate, encode, infer, decode, export.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::codec;
use crate::compare;
use crate::imageio;
use crate::upscaler::{output_dimensions, Upscaler, UpscalerConfig};

/// Largest accepted input, in pixels.
pub const DEFAULT_MAX_PIXELS: u64 = 1_000_000;

/// Progress stages of a job, in the order they are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Initializing,
    Preparing,
    Upscaling,
    Rendering,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Initializing => "Initializing AI Engine...",
            Self::Preparing => "Preparing Image...",
            Self::Upscaling => "Upscaling...",
            Self::Rendering => "Rendering...",
            Self::Done => "Done!",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("image too large: {width}x{height} exceeds the limit of {max_pixels} pixels")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },
}

/// Reject images above `max_pixels`. A limit of 0 disables the check.
pub fn check_pixel_budget(width: u32, height: u32, max_pixels: u64) -> Result<(), PipelineError> {
    let pixels = u64::from(width) * u64::from(height);
    if max_pixels > 0 && pixels > max_pixels {
        return Err(PipelineError::ImageTooLarge {
            width,
            height,
            max_pixels,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscaleJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub max_pixels: u64,
    /// Before/after composite destination and slider position in percent.
    pub compare: Option<(PathBuf, u8)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageTimings {
    pub decode_ms: u64,
    pub encode_ms: u64,
    pub inference_ms: u64,
    pub render_ms: u64,
    pub export_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpscaleReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub comparison: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
    pub output_width: u32,
    pub output_height: u32,
    pub scale: u32,
    pub backend: String,
    pub model: PathBuf,
    pub timings: StageTimings,
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Load the model, then run `job` with it. `progress` is called once per
/// [`Stage`].
pub fn run<F>(job: &UpscaleJob, config: &UpscalerConfig, mut progress: F) -> Result<UpscaleReport>
where
    F: FnMut(Stage),
{
    progress(Stage::Initializing);
    let mut upscaler = Upscaler::load(config)?;
    process(job, &mut upscaler, progress)
}

/// Run one job with an already loaded model, starting at [`Stage::Preparing`].
pub fn process<F>(job: &UpscaleJob, upscaler: &mut Upscaler, mut progress: F) -> Result<UpscaleReport>
where
    F: FnMut(Stage),
{
    let mut timings = StageTimings::default();

    progress(Stage::Preparing);
    let started = Instant::now();
    let bitmap = imageio::load_bitmap(&job.input)?;
    timings.decode_ms = elapsed_ms(started);

    check_pixel_budget(bitmap.width, bitmap.height, job.max_pixels)?;
    let (out_w, out_h) = output_dimensions(bitmap.width, bitmap.height, upscaler.scale())?;

    let started = Instant::now();
    let tensor = codec::encode(&bitmap)?;
    timings.encode_ms = elapsed_ms(started);
    debug!(
        width = bitmap.width,
        height = bitmap.height,
        elements = tensor.len(),
        "Encoded input tensor"
    );

    progress(Stage::Upscaling);
    let started = Instant::now();
    let output = upscaler.infer(tensor, bitmap.width, bitmap.height)?;
    timings.inference_ms = elapsed_ms(started);
    info!(
        width = bitmap.width,
        height = bitmap.height,
        out_width = out_w,
        out_height = out_h,
        elapsed_ms = timings.inference_ms,
        "Inference finished"
    );

    progress(Stage::Rendering);
    let started = Instant::now();
    let upscaled = codec::decode(&output, out_w, out_h)?;
    timings.render_ms = elapsed_ms(started);

    let started = Instant::now();
    imageio::save_png(&upscaled, &job.output)?;
    let comparison = match &job.compare {
        Some((path, split)) => {
            let composite = compare::compose(&bitmap, &upscaled, *split)?;
            imageio::save_png(&composite, path)?;
            Some(path.clone())
        }
        None => None,
    };
    timings.export_ms = elapsed_ms(started);

    progress(Stage::Done);

    let io = upscaler.model_io();
    Ok(UpscaleReport {
        input: job.input.clone(),
        output: job.output.clone(),
        comparison,
        input_width: bitmap.width,
        input_height: bitmap.height,
        output_width: out_w,
        output_height: out_h,
        scale: upscaler.scale(),
        backend: io.backend.clone(),
        model: io.model_path.clone(),
        timings,
    })
}
