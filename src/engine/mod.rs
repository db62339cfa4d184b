//! Boundary to the monocular tracking engine.
//!
//! The tracking, mapping and loop-closure algorithms live behind
//! `TrackingEngine`. This crate only initializes an engine, feeds it ordered
//! frames, shuts it down and asks it to persist its keyframe trajectory.
//!
//! - `stub`: bundled engine that records keyframe timestamps with identity poses
//! - `trajectory`: keyframe poses and the TUM text format

pub mod stub;
pub mod trajectory;

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::frame::Frame;

pub use stub::StubEngine;
pub use trajectory::{write_tum, KeyframePose};

/// Sensor configuration requested from the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SensorMode {
    Monocular,
}

/// Everything an engine needs to initialize.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Feature vocabulary file, opaque to this crate.
    pub vocabulary: PathBuf,
    /// Engine settings file, opaque apart from the image scale.
    pub settings: PathBuf,
    pub sensor: SensorMode,
    /// Let the engine open its own viewer.
    pub enable_viewer: bool,
}

impl EngineConfig {
    pub fn monocular(vocabulary: impl Into<PathBuf>, settings: impl Into<PathBuf>) -> Self {
        Self {
            vocabulary: vocabulary.into(),
            settings: settings.into(),
            sensor: SensorMode::Monocular,
            enable_viewer: true,
        }
    }
}

/// An initialized tracking engine.
///
/// Callers must feed frames with non-decreasing timestamps, call `shutdown`
/// at most once, and only save the trajectory after `shutdown`.
pub trait TrackingEngine {
    /// Scale applied to every frame before it is fed, from the engine settings.
    fn image_scale(&self) -> f32;

    /// Feed one preprocessed frame. The engine takes ownership.
    fn track_monocular(&mut self, frame: Frame, timestamp: f64);

    /// Flush internal state and stop worker threads.
    fn shutdown(&mut self);

    /// Write accumulated keyframe poses in TUM format.
    fn save_keyframe_trajectory(&self, path: &Path) -> Result<()>;
}

impl<E: TrackingEngine + ?Sized> TrackingEngine for Box<E> {
    fn image_scale(&self) -> f32 {
        (**self).image_scale()
    }

    fn track_monocular(&mut self, frame: Frame, timestamp: f64) {
        (**self).track_monocular(frame, timestamp)
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }

    fn save_keyframe_trajectory(&self, path: &Path) -> Result<()> {
        (**self).save_keyframe_trajectory(path)
    }
}
