use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::engine::EngineConfig;
use crate::ingest::{CaptureBackend, CaptureConfig};

pub const DEFAULT_TRAJECTORY_PATH: &str = "KeyFrameTrajectory.txt";

#[derive(Debug, Deserialize, Default)]
struct LiveConfigFile {
    capture: Option<CaptureConfigFile>,
    trajectory_path: Option<PathBuf>,
    viewer: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    backend: Option<String>,
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    grayscale: Option<bool>,
    pipeline: Option<String>,
}

/// Command-line choices layered over file and environment settings.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub grayscale: bool,
    pub gstreamer: bool,
    pub device_index: Option<u32>,
    pub pipeline: Option<String>,
    pub trajectory: Option<PathBuf>,
    pub no_viewer: bool,
}

#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub vocabulary: PathBuf,
    pub settings: PathBuf,
    pub capture: CaptureConfig,
    pub trajectory_path: PathBuf,
    pub enable_viewer: bool,
}

impl LiveConfig {
    /// Resolve defaults, then `MONO_LIVE_CONFIG`, then environment, then CLI.
    pub fn load(
        vocabulary: impl Into<PathBuf>,
        settings: impl Into<PathBuf>,
        cli: &CliOverrides,
    ) -> Result<Self> {
        let config_path = std::env::var("MONO_LIVE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(
            vocabulary.into(),
            settings.into(),
            file_cfg.unwrap_or_default(),
        )?;
        cfg.apply_env();
        cfg.apply_cli(cli);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(vocabulary: PathBuf, settings: PathBuf, file: LiveConfigFile) -> Result<Self> {
        let defaults = CaptureConfig::default();
        let capture_file = file.capture.unwrap_or_default();
        let backend = match capture_file.backend.as_deref() {
            Some(name) => parse_backend(name)?,
            None => defaults.backend,
        };
        let capture = CaptureConfig {
            backend,
            device: capture_file.device.unwrap_or(defaults.device),
            width: capture_file.width.unwrap_or(defaults.width),
            height: capture_file.height.unwrap_or(defaults.height),
            fps: capture_file.fps.unwrap_or(defaults.fps),
            grayscale: capture_file.grayscale.unwrap_or(defaults.grayscale),
            pipeline: capture_file.pipeline.unwrap_or(defaults.pipeline),
        };
        Ok(Self {
            vocabulary,
            settings,
            capture,
            trajectory_path: file
                .trajectory_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_TRAJECTORY_PATH)),
            enable_viewer: file.viewer.unwrap_or(true),
        })
    }

    fn apply_env(&mut self) {
        if let Ok(device) = std::env::var("MONO_LIVE_DEVICE") {
            if !device.trim().is_empty() {
                self.capture.device = device;
            }
        }
        if let Ok(pipeline) = std::env::var("MONO_LIVE_PIPELINE") {
            if !pipeline.trim().is_empty() {
                self.capture.pipeline = pipeline;
            }
        }
        if let Ok(path) = std::env::var("MONO_LIVE_TRAJECTORY") {
            if !path.trim().is_empty() {
                self.trajectory_path = PathBuf::from(path);
            }
        }
    }

    fn apply_cli(&mut self, cli: &CliOverrides) {
        if cli.grayscale {
            self.capture.grayscale = true;
        }
        if cli.gstreamer {
            self.capture.backend = CaptureBackend::PipelineDescription;
        }
        if let Some(index) = cli.device_index {
            self.capture.device = CaptureConfig::device_for_index(index);
        }
        if let Some(pipeline) = &cli.pipeline {
            self.capture.pipeline = pipeline.clone();
        }
        if let Some(path) = &cli.trajectory {
            self.trajectory_path = path.clone();
        }
        if cli.no_viewer {
            self.enable_viewer = false;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!(
                "capture mode {}x{} must have non-zero width and height",
                self.capture.width,
                self.capture.height
            ));
        }
        if self.capture.fps == 0 {
            return Err(anyhow!("capture fps must be greater than zero"));
        }
        match self.capture.backend {
            CaptureBackend::DirectDevice if self.capture.device.trim().is_empty() => {
                Err(anyhow!("capture device must not be empty"))
            }
            CaptureBackend::PipelineDescription if self.capture.pipeline.trim().is_empty() => {
                Err(anyhow!("capture pipeline must not be empty"))
            }
            _ => Ok(()),
        }?;
        if self.trajectory_path.as_os_str().is_empty() {
            return Err(anyhow!("trajectory path must not be empty"));
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::monocular(&self.vocabulary, &self.settings);
        engine.enable_viewer = self.enable_viewer;
        engine
    }
}

fn parse_backend(name: &str) -> Result<CaptureBackend> {
    match name.trim().to_ascii_lowercase().as_str() {
        "device" | "v4l2" => Ok(CaptureBackend::DirectDevice),
        "pipeline" | "gstreamer" => Ok(CaptureBackend::PipelineDescription),
        other => Err(anyhow!(
            "unknown capture backend '{}' (expected device or pipeline)",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<LiveConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
