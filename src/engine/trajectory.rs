//! Keyframe trajectory persistence.
//!
//! TUM format: one keyframe per line,
//! `timestamp tx ty tz qx qy qz qw`, space separated.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Pose of one keyframe: camera position and orientation (unit quaternion,
/// x y z w order) at a capture timestamp.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KeyframePose {
    pub timestamp: f64,
    pub translation: [f64; 3],
    pub rotation: [f64; 4],
}

impl KeyframePose {
    pub fn identity(timestamp: f64) -> Self {
        Self {
            timestamp,
            translation: [0.0; 3],
            rotation: [0.0, 0.0, 0.0, 1.0],
        }
    }

    /// One TUM line, without the trailing newline.
    pub fn to_tum_line(&self) -> String {
        let [tx, ty, tz] = self.translation;
        let [qx, qy, qz, qw] = self.rotation;
        format!(
            "{:.6} {:.7} {:.7} {:.7} {:.7} {:.7} {:.7} {:.7}",
            self.timestamp, tx, ty, tz, qx, qy, qz, qw
        )
    }
}

/// Write keyframes to `path`, replacing any existing file.
pub fn write_tum(path: &Path, keyframes: &[KeyframePose]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("create trajectory file {}", path.display()))?;
    let mut out = BufWriter::new(file);
    for keyframe in keyframes {
        writeln!(out, "{}", keyframe.to_tum_line())
            .with_context(|| format!("write trajectory file {}", path.display()))?;
    }
    out.flush()
        .with_context(|| format!("flush trajectory file {}", path.display()))?;
    Ok(())
}
