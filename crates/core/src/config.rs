use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::InferenceBackend;
use crate::compare::DEFAULT_SPLIT_PERCENT;
use crate::imageio::DEFAULT_OUTPUT_PREFIX;
use crate::pipeline::DEFAULT_MAX_PIXELS;
use crate::upscaler::{UpscalerConfig, DEFAULT_SCALE};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "CIPTA_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub inference: InferenceConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub models_dir: PathBuf,
    pub trt_cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InferenceConfig {
    /// Model file, relative to `paths.models_dir` unless absolute.
    pub model: PathBuf,
    pub backend: String,
    pub scale: u32,
    /// 0 disables the size check.
    pub max_pixels: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    pub file_prefix: String,
    pub compare_split: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            inference: InferenceConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            trt_cache_dir: PathBuf::from("trt_cache"),
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("realesrgan.onnx"),
            backend: InferenceBackend::default().to_string(),
            scale: DEFAULT_SCALE,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            file_prefix: DEFAULT_OUTPUT_PREFIX.to_string(),
            compare_split: DEFAULT_SPLIT_PERCENT,
        }
    }
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Model path with `models_dir` and the data directory applied.
    pub fn model_path(&self, data_dir: &Path) -> PathBuf {
        let models_dir = resolve_relative_to(data_dir, &self.paths.models_dir);
        resolve_relative_to(&models_dir, &self.inference.model)
    }

    pub fn upscaler_config(&self, data_dir: &Path) -> UpscalerConfig {
        UpscalerConfig {
            model_path: self.model_path(data_dir),
            backend: InferenceBackend::from_str_lossy(&self.inference.backend),
            scale: self.inference.scale,
            trt_cache_dir: Some(resolve_relative_to(data_dir, &self.paths.trt_cache_dir)),
        }
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. CIPTA_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

/// Returns the path to config.toml within the given data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Create the data directory and write a default config.toml if none exists.
pub fn initialize_data_dir(data_dir: &Path) -> Result<()> {
    if !data_dir.exists() {
        fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    }

    let cfg_path = config_path(data_dir);
    if !cfg_path.exists() {
        AppConfig::default().save_to_path(&cfg_path)?;
    }

    Ok(())
}

/// Returns `path` as-is if absolute, otherwise joined to `base`.
pub fn resolve_relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = AppConfig::default();

        assert_eq!(cfg.paths.models_dir, PathBuf::from("models"));
        assert_eq!(cfg.paths.trt_cache_dir, PathBuf::from("trt_cache"));
        assert_eq!(cfg.inference.model, PathBuf::from("realesrgan.onnx"));
        assert_eq!(cfg.inference.backend, "cpu");
        assert_eq!(cfg.inference.scale, 4);
        assert_eq!(cfg.inference.max_pixels, 1_000_000);
        assert_eq!(cfg.output.file_prefix, "CiptaDigital-HD-");
        assert_eq!(cfg.output.compare_split, 50);
    }

    #[test]
    fn toml_roundtrip_preserves_values() {
        let mut original = AppConfig::default();
        original.inference.backend = "tensorrt".to_string();
        original.output.compare_split = 30;

        let encoded = toml::to_string_pretty(&original).expect("serialize config");
        let decoded: AppConfig = toml::from_str(&encoded).expect("deserialize config");
        assert_eq!(decoded, original);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: AppConfig =
            toml::from_str("[inference]\nmax_pixels = 0\n").expect("deserialize config");
        assert_eq!(cfg.inference.max_pixels, 0);
        assert_eq!(cfg.inference.scale, 4);
        assert_eq!(cfg.paths, PathsConfig::default());
    }

    #[test]
    fn load_from_nonexistent_file_returns_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let loaded = AppConfig::load_from_path(&temp.path().join("missing.toml"))
            .expect("load config from nonexistent path");
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn load_from_empty_file_returns_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "  \n").expect("write empty config");
        assert_eq!(
            AppConfig::load_from_path(&path).expect("load"),
            AppConfig::default()
        );
    }

    #[test]
    fn load_from_invalid_toml_names_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "[inference\nscale = ").expect("write broken config");
        let err = AppConfig::load_from_path(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config TOML"));
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let result = data_dir(Some(Path::new("/custom")));
        assert_eq!(result, PathBuf::from("/custom"));
    }

    #[test]
    fn data_dir_env_then_default() {
        let old = env::var_os(ENV_DATA_DIR);

        env::set_var(ENV_DATA_DIR, "/env/path");
        let from_env = data_dir(None);
        env::remove_var(ENV_DATA_DIR);
        let fallback = data_dir(None);

        if let Some(val) = old {
            env::set_var(ENV_DATA_DIR, val);
        }

        assert_eq!(from_env, PathBuf::from("/env/path"));
        assert_eq!(fallback, PathBuf::from("data"));
    }

    #[test]
    fn config_path_is_data_dir_join_config_toml() {
        let result = config_path(Path::new("/data"));
        assert_eq!(result, PathBuf::from("/data/config.toml"));
    }

    #[test]
    fn initialize_creates_data_dir_and_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path().join("data");
        initialize_data_dir(&dir).expect("initialize data dir");

        assert!(dir.join("config.toml").exists());
        let loaded = AppConfig::load_from_path(&config_path(&dir)).expect("load config");
        assert_eq!(loaded, AppConfig::default());
    }

    #[test]
    fn initialize_preserves_existing_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg_path = temp.path().join("config.toml");
        let custom_content = "[inference]\nbackend = \"cuda\"\n";
        fs::write(&cfg_path, custom_content).expect("write custom config");

        initialize_data_dir(temp.path()).expect("initialize data dir");

        let content = fs::read_to_string(&cfg_path).expect("read config");
        assert_eq!(content, custom_content);
    }

    #[test]
    fn model_path_resolves_against_models_and_data_dirs() {
        let cfg = AppConfig::default();
        assert_eq!(
            cfg.model_path(Path::new("/data")),
            PathBuf::from("/data/models/realesrgan.onnx")
        );

        let mut absolute = AppConfig::default();
        absolute.inference.model = PathBuf::from("/opt/models/x4.onnx");
        assert_eq!(
            absolute.model_path(Path::new("/data")),
            PathBuf::from("/opt/models/x4.onnx")
        );
    }

    #[test]
    fn upscaler_config_maps_inference_section() {
        let mut cfg = AppConfig::default();
        cfg.inference.backend = "TRT".to_string();
        cfg.inference.scale = 2;

        let up = cfg.upscaler_config(Path::new("/data"));
        assert_eq!(up.backend, InferenceBackend::Tensorrt);
        assert_eq!(up.scale, 2);
        assert_eq!(up.trt_cache_dir, Some(PathBuf::from("/data/trt_cache")));
    }

    #[test]
    fn resolve_relative_to_handles_absolute_and_relative() {
        assert_eq!(
            resolve_relative_to(Path::new("/base"), Path::new("/abs/path")),
            PathBuf::from("/abs/path")
        );
        assert_eq!(
            resolve_relative_to(Path::new("/base"), Path::new("sub")),
            PathBuf::from("/base/sub")
        );
    }
}
