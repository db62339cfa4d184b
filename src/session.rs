//! Tracking session lifecycle.
//!
//! `TrackingSession` owns an initialized engine and the `SessionState`
//! machine around it:
//!
//! ```text
//! Idle -> Running -> Terminating -> Terminated
//!   \_______________/
//! ```
//!
//! State only changes through `transition`. Shutdown followed by trajectory
//! export happens in `finish`, which runs its body once; later calls are
//! no-ops. If the session is dropped before `finish` (early return, panic
//! unwinding) the drop guard finishes it.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::engine::TrackingEngine;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Terminating,
    Terminated,
}

impl SessionState {
    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Running) | (Idle, Terminating) | (Running, Terminating) | (Terminating, Terminated)
        )
    }
}

pub struct TrackingSession<E: TrackingEngine> {
    engine: E,
    state: SessionState,
    trajectory_path: PathBuf,
    frames_fed: u64,
    last_timestamp: Option<f64>,
}

impl<E: TrackingEngine> TrackingSession<E> {
    /// Wrap an initialized engine. The trajectory is written to
    /// `trajectory_path` when the session finishes.
    pub fn new(engine: E, trajectory_path: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            state: SessionState::Idle,
            trajectory_path: trajectory_path.into(),
            frames_fed: 0,
            last_timestamp: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn frames_fed(&self) -> u64 {
        self.frames_fed
    }

    pub fn trajectory_path(&self) -> &Path {
        &self.trajectory_path
    }

    pub fn image_scale(&self) -> f32 {
        self.engine.image_scale()
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            bail!(
                "invalid session transition {:?} -> {:?}",
                self.state,
                next
            );
        }
        log::debug!("session: {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    /// Enter Running. Called once the source is open and the engine is up.
    pub fn start(&mut self) -> Result<()> {
        self.transition(SessionState::Running)
    }

    /// Hand a preprocessed, stamped frame to the engine.
    pub fn feed(&mut self, frame: Frame) -> Result<()> {
        if self.state != SessionState::Running {
            bail!("cannot feed a frame while session is {:?}", self.state);
        }
        let timestamp = frame.timestamp;
        if let Some(last) = self.last_timestamp {
            // Equal timestamps are fine when the clock is coarser than the
            // capture rate.
            if timestamp < last {
                bail!(
                    "frame timestamp {:.6}s precedes previous {:.6}s",
                    timestamp,
                    last
                );
            }
        }

        self.engine.track_monocular(frame, timestamp);
        self.frames_fed += 1;
        self.last_timestamp = Some(timestamp);
        Ok(())
    }

    /// Mark the session as leaving the feed loop. Idempotent.
    pub fn begin_termination(&mut self) {
        if matches!(self.state, SessionState::Idle | SessionState::Running) {
            // Both edges are legal, so this cannot fail.
            let _ = self.transition(SessionState::Terminating);
        }
    }

    /// Shut the engine down and export its trajectory.
    ///
    /// The first call does the work and returns the export result; further
    /// calls return `Ok(())` without touching the engine.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == SessionState::Terminated {
            return Ok(());
        }
        self.begin_termination();

        log::info!("session: shutting down after {} frames", self.frames_fed);
        self.engine.shutdown();
        let export = self
            .engine
            .save_keyframe_trajectory(&self.trajectory_path)
            .with_context(|| {
                format!(
                    "save keyframe trajectory to {}",
                    self.trajectory_path.display()
                )
            });

        self.transition(SessionState::Terminated)?;
        if export.is_ok() {
            log::info!(
                "session: keyframe trajectory saved to {}",
                self.trajectory_path.display()
            );
        }
        export
    }
}

impl<E: TrackingEngine> Drop for TrackingSession<E> {
    fn drop(&mut self) {
        if self.state != SessionState::Terminated {
            log::warn!("session dropped while {:?}; finishing now", self.state);
            if let Err(err) = self.finish() {
                log::error!("session: {:#}", err);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
