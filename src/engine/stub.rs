use anyhow::{anyhow, bail, Context, Result};
use std::path::Path;

use super::trajectory::{write_tum, KeyframePose};
use super::{EngineConfig, SensorMode, TrackingEngine};
use crate::frame::Frame;

/// Settings key holding the per-frame image scale.
pub const IMAGE_SCALE_KEY: &str = "Camera.imageScale";

/// Frames between recorded keyframes.
const KEYFRAME_INTERVAL: u64 = 5;

/// Stand-in engine for runs without a real tracker.
///
/// Validates its inputs the way a real engine would, reads the image scale
/// from the settings file, and records a keyframe every few frames with an
/// identity pose. Useful for exercising capture setups end to end.
pub struct StubEngine {
    image_scale: f32,
    frames_tracked: u64,
    last_timestamp: Option<f64>,
    keyframes: Vec<KeyframePose>,
    shut_down: bool,
}

impl StubEngine {
    pub fn initialize(config: &EngineConfig) -> Result<Self> {
        if config.sensor != SensorMode::Monocular {
            bail!("stub engine only supports monocular input");
        }

        let vocabulary = std::fs::metadata(&config.vocabulary).with_context(|| {
            format!("failed to open vocabulary {}", config.vocabulary.display())
        })?;
        if vocabulary.len() == 0 {
            bail!("vocabulary {} is empty", config.vocabulary.display());
        }

        let settings = std::fs::read_to_string(&config.settings)
            .with_context(|| format!("failed to open settings {}", config.settings.display()))?;
        let image_scale = parse_image_scale(&settings)
            .with_context(|| format!("invalid settings {}", config.settings.display()))?;

        log::info!(
            "StubEngine: monocular, image scale {}, viewer {}",
            image_scale,
            if config.enable_viewer { "requested" } else { "off" }
        );

        Ok(Self {
            image_scale,
            frames_tracked: 0,
            last_timestamp: None,
            keyframes: Vec::new(),
            shut_down: false,
        })
    }

    pub fn frames_tracked(&self) -> u64 {
        self.frames_tracked
    }

    pub fn keyframes(&self) -> &[KeyframePose] {
        &self.keyframes
    }
}

impl TrackingEngine for StubEngine {
    fn image_scale(&self) -> f32 {
        self.image_scale
    }

    fn track_monocular(&mut self, frame: Frame, timestamp: f64) {
        if self.shut_down {
            log::warn!("StubEngine: frame at {:.6}s after shutdown ignored", timestamp);
            return;
        }
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                log::warn!(
                    "StubEngine: timestamp went backwards ({:.6}s < {:.6}s)",
                    timestamp,
                    last
                );
            }
        }

        if self.frames_tracked % KEYFRAME_INTERVAL == 0 {
            self.keyframes.push(KeyframePose::identity(timestamp));
        }
        log::trace!(
            "StubEngine: tracked {}x{} frame at {:.6}s",
            frame.width,
            frame.height,
            timestamp
        );

        self.frames_tracked += 1;
        self.last_timestamp = Some(timestamp);
    }

    fn shutdown(&mut self) {
        self.shut_down = true;
        log::info!(
            "StubEngine: shut down after {} frames, {} keyframes",
            self.frames_tracked,
            self.keyframes.len()
        );
    }

    fn save_keyframe_trajectory(&self, path: &Path) -> Result<()> {
        if !self.shut_down {
            bail!("trajectory can only be saved after shutdown");
        }
        write_tum(path, &self.keyframes)
    }
}

/// Find `Camera.imageScale` in an engine settings file. Defaults to 1.0.
///
/// Settings files are OpenCV-flavoured YAML; only top-level `key: value`
/// lines are inspected.
pub fn parse_image_scale(settings: &str) -> Result<f32> {
    for line in settings.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim() != IMAGE_SCALE_KEY {
            continue;
        }
        let scale: f32 = value
            .trim()
            .parse()
            .map_err(|_| anyhow!("{} must be a number, got '{}'", IMAGE_SCALE_KEY, value.trim()))?;
        if !scale.is_finite() {
            bail!("{} must be finite, got {}", IMAGE_SCALE_KEY, scale);
        }
        return Ok(scale);
    }
    Ok(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("temp file");
        file.write_all(contents.as_bytes()).expect("write temp file");
        file
    }

    fn gray(ts: f64) -> Frame {
        Frame::new(vec![0u8; 4], 2, 2, PixelFormat::Gray8)
            .unwrap()
            .stamped(ts)
    }

    #[test]
    fn image_scale_is_read_from_settings() -> Result<()> {
        let settings = "%YAML:1.0\n\nCamera.type: \"PinHole\"\nCamera.imageScale: 0.5 # half\n";
        assert_eq!(parse_image_scale(settings)?, 0.5);
        assert_eq!(parse_image_scale("Camera.fps: 30\n")?, 1.0);
        assert!(parse_image_scale("Camera.imageScale: big\n").is_err());
        Ok(())
    }

    #[test]
    fn initialize_rejects_missing_vocabulary() {
        let settings = write_file("Camera.imageScale: 1.0\n");
        let config = EngineConfig::monocular("/nonexistent/ORBvoc.txt", settings.path());
        assert!(StubEngine::initialize(&config).is_err());
    }

    #[test]
    fn records_keyframes_and_saves_after_shutdown() -> Result<()> {
        let vocabulary = write_file("vocabulary");
        let settings = write_file("Camera.imageScale: 0.5\n");
        let config = EngineConfig::monocular(vocabulary.path(), settings.path());
        let mut engine = StubEngine::initialize(&config)?;
        assert_eq!(engine.image_scale(), 0.5);

        for i in 0..12 {
            let ts = i as f64 * 0.1;
            engine.track_monocular(gray(ts), ts);
        }
        assert_eq!(engine.frames_tracked(), 12);
        assert_eq!(engine.keyframes().len(), 3);

        let out = tempfile::tempdir()?;
        let path = out.path().join("traj.txt");
        assert!(engine.save_keyframe_trajectory(&path).is_err());

        engine.shutdown();
        engine.save_keyframe_trajectory(&path)?;
        assert_eq!(std::fs::read_to_string(&path)?.lines().count(), 3);
        Ok(())
    }
}
