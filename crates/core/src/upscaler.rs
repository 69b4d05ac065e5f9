//! Super-resolution via `ort::Session`.
//!
//! Supports FP32 and FP16 models whose first input is a `(1, 3, H, W)` RGB
//! tensor in `[0, 1]` and whose first output is `(1, 3, H * scale, W * scale)`
//! in the same range (Real-ESRGAN style x4 models).

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use half::f16;
use half::slice::HalfFloatSliceExt;
use ndarray::{Array4, ArrayD, IxDyn};
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use serde::Serialize;
use tracing::debug;

use crate::backend::{build_session, InferenceBackend, SessionConfig};
use crate::codec::RGB_CHANNELS;

/// Spatial scale of the bundled Real-ESRGAN model.
pub const DEFAULT_SCALE: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpscalerConfig {
    pub model_path: PathBuf,
    pub backend: InferenceBackend,
    pub scale: u32,
    pub trt_cache_dir: Option<PathBuf>,
}

impl UpscalerConfig {
    pub fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            backend: InferenceBackend::default(),
            scale: DEFAULT_SCALE,
            trt_cache_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TensorInfo {
    pub name: String,
    /// Element type, e.g. "float32", "float16".
    pub data_type: String,
    /// Dimensions. `-1` is a dynamic/symbolic dimension.
    pub shape: Vec<i64>,
}

/// Model input/output description reported by `cipta inspect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelIo {
    pub model_path: PathBuf,
    pub backend: String,
    pub scale: u32,
    pub is_fp16: bool,
    pub inputs: Vec<TensorInfo>,
    pub outputs: Vec<TensorInfo>,
}

pub struct Upscaler {
    session: Session,
    scale: u32,
    input_name: String,
    output_name: String,
    is_fp16: bool,
    io: ModelIo,
}

impl Upscaler {
    /// Load the model and discover its first input/output.
    pub fn load(config: &UpscalerConfig) -> Result<Self> {
        if config.scale == 0 {
            bail!("scale must be positive");
        }
        if !config.model_path.is_file() {
            bail!("model file not found: {}", config.model_path.display());
        }

        debug!(
            model = %config.model_path.display(),
            scale = config.scale,
            backend = %config.backend,
            "Loading ONNX super-resolution model"
        );

        let session = build_session(&SessionConfig {
            model_path: &config.model_path,
            backend: &config.backend,
            trt_cache_dir: config.trt_cache_dir.as_deref(),
        })?;

        let inputs: Vec<TensorInfo> = session
            .inputs()
            .iter()
            .map(|outlet| tensor_info(outlet.name(), outlet.dtype()))
            .collect();
        let outputs: Vec<TensorInfo> = session
            .outputs()
            .iter()
            .map(|outlet| tensor_info(outlet.name(), outlet.dtype()))
            .collect();

        let Some(input) = inputs.first() else {
            bail!("model has no inputs: {}", config.model_path.display());
        };
        let Some(output) = outputs.first() else {
            bail!("model has no outputs: {}", config.model_path.display());
        };

        let input_name = input.name.clone();
        let output_name = output.name.clone();
        let is_fp16 = matches!(
            session.inputs()[0].dtype(),
            ValueType::Tensor {
                ty: TensorElementType::Float16,
                ..
            }
        );

        debug!(%input_name, %output_name, is_fp16, "Detected model IO");

        let io = ModelIo {
            model_path: config.model_path.clone(),
            backend: config.backend.to_string(),
            scale: config.scale,
            is_fp16,
            inputs,
            outputs,
        };

        Ok(Self {
            session,
            scale: config.scale,
            input_name,
            output_name,
            is_fp16,
            io,
        })
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn is_fp16(&self) -> bool {
        self.is_fp16
    }

    pub fn model_io(&self) -> &ModelIo {
        &self.io
    }

    /// Run the model on a planar `3 * W * H` tensor and return the planar
    /// output of length `3 * (W * scale) * (H * scale)`.
    pub fn infer(&mut self, tensor: Vec<f32>, width: u32, height: u32) -> Result<Vec<f32>> {
        let (out_w, out_h) = output_dimensions(width, height, self.scale)?;
        let h = height as usize;
        let w = width as usize;

        let (shape, data) = if self.is_fp16 {
            self.run_fp16(&tensor, h, w)?
        } else {
            self.run_fp32(tensor, h, w)?
        };

        check_output_shape(&shape, out_w, out_h)?;
        Ok(data)
    }

    fn run_fp32(&mut self, tensor: Vec<f32>, h: usize, w: usize) -> Result<(Vec<usize>, Vec<f32>)> {
        let input = Array4::from_shape_vec((1, RGB_CHANNELS, h, w), tensor)
            .context("input tensor does not match (1, 3, H, W)")?;
        let input_tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => &input_tensor])?;
        let output = outputs[self.output_name.as_str()].try_extract_array::<f32>()?;

        let shape = output.shape().to_vec();
        let data: Vec<f32> = output.iter().copied().collect();
        Ok((shape, data))
    }

    fn run_fp16(&mut self, tensor: &[f32], h: usize, w: usize) -> Result<(Vec<usize>, Vec<f32>)> {
        let mut fp16_data = vec![f16::ZERO; tensor.len()];
        fp16_data.convert_from_f32_slice(tensor);

        let input = ArrayD::from_shape_vec(IxDyn(&[1, RGB_CHANNELS, h, w]), fp16_data)
            .context("input tensor does not match (1, 3, H, W)")?;
        let input_tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => &input_tensor])?;
        let output = outputs[self.output_name.as_str()].try_extract_array::<f16>()?;

        let shape = output.shape().to_vec();
        let contiguous = output.as_standard_layout();
        let mut data = vec![0.0f32; contiguous.len()];
        match contiguous.as_slice() {
            Some(slice) => slice.convert_to_f32_slice(&mut data),
            None => {
                for (dst, v) in data.iter_mut().zip(contiguous.iter()) {
                    *dst = v.to_f32();
                }
            }
        }
        Ok((shape, data))
    }
}

/// Output size for a `width x height` input at `scale`.
pub fn output_dimensions(width: u32, height: u32, scale: u32) -> Result<(u32, u32)> {
    let out_w = width
        .checked_mul(scale)
        .with_context(|| format!("output width overflows: {width} x {scale}"))?;
    let out_h = height
        .checked_mul(scale)
        .with_context(|| format!("output height overflows: {height} x {scale}"))?;
    Ok((out_w, out_h))
}

fn check_output_shape(shape: &[usize], out_w: u32, out_h: u32) -> Result<()> {
    let expected = [1, RGB_CHANNELS, out_h as usize, out_w as usize];
    if shape != expected {
        bail!("unexpected model output shape {shape:?}, expected {expected:?}");
    }
    Ok(())
}

fn tensor_info(name: &str, dtype: &ValueType) -> TensorInfo {
    match dtype {
        ValueType::Tensor { ty, shape, .. } => TensorInfo {
            name: name.to_string(),
            data_type: element_type_name(ty),
            shape: shape.iter().copied().collect(),
        },
        _ => TensorInfo {
            name: name.to_string(),
            data_type: "non-tensor".to_string(),
            shape: Vec::new(),
        },
    }
}

fn element_type_name(ty: &TensorElementType) -> String {
    format!("{ty:?}").to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::codec::{self, Bitmap};

    #[test]
    fn test_output_dimensions() {
        assert_eq!(output_dimensions(3, 2, 4).unwrap(), (12, 8));
        assert_eq!(output_dimensions(1000, 1000, 4).unwrap(), (4000, 4000));
        assert!(output_dimensions(u32::MAX, 1, 4).is_err());
    }

    #[test]
    fn test_check_output_shape() {
        assert!(check_output_shape(&[1, 3, 8, 12], 12, 8).is_ok());
        assert!(check_output_shape(&[1, 3, 12, 8], 12, 8).is_err());
        assert!(check_output_shape(&[3, 8, 12], 12, 8).is_err());
        assert!(check_output_shape(&[1, 4, 8, 12], 12, 8).is_err());
    }

    #[test]
    fn test_element_type_name() {
        assert_eq!(element_type_name(&TensorElementType::Float32), "float32");
        assert_eq!(element_type_name(&TensorElementType::Float16), "float16");
    }

    #[test]
    fn test_upscaler_config_defaults() {
        let config = UpscalerConfig::new(PathBuf::from("models/realesrgan.onnx"));
        assert_eq!(config.scale, DEFAULT_SCALE);
        assert_eq!(config.backend, InferenceBackend::Cpu);
        assert!(config.trt_cache_dir.is_none());
    }

    #[test]
    fn test_load_missing_model_fails_before_ort() {
        let config = UpscalerConfig::new(PathBuf::from("no/such/model.onnx"));
        let err = Upscaler::load(&config).err().expect("load should fail");
        assert!(err.to_string().contains("no/such/model.onnx"));
    }

    #[test]
    fn test_load_zero_scale_rejected() {
        let mut config = UpscalerConfig::new(PathBuf::from("no/such/model.onnx"));
        config.scale = 0;
        let err = Upscaler::load(&config).err().expect("load should fail");
        assert!(err.to_string().contains("scale"));
    }

    /// Requires ONNX Runtime + `models/realesrgan.onnx`.
    #[test]
    #[ignore]
    fn test_full_inference_small_bitmap() {
        let model = Path::new("models/realesrgan.onnx");
        let mut upscaler =
            Upscaler::load(&UpscalerConfig::new(model.to_path_buf())).expect("model should load");

        let bitmap = Bitmap::filled(16, 12, [100, 150, 200, 255]).unwrap();
        let input = codec::encode(&bitmap).unwrap();
        let output = upscaler
            .infer(input, bitmap.width, bitmap.height)
            .expect("inference should succeed");
        assert_eq!(output.len(), 3 * 64 * 48);
        let result = codec::decode(&output, 64, 48).unwrap();

        assert_eq!((result.width, result.height), (64, 48));
        assert_eq!(result.data.len(), 64 * 48 * 4);
        assert!(result.data.chunks_exact(4).all(|px| px[3] == 255));
    }
}
