//! Live monocular capture for a visual SLAM engine.
//!
//! Pulls frames from a local camera, either a numbered device or a
//! GStreamer pipeline description, stamps them on a monotonic clock,
//! converts and scales them, and feeds them to a tracking engine until the
//! stream ends or the user quits. Shutdown and keyframe trajectory export
//! then run exactly once.
//!
//! # Module Structure
//!
//! - `ingest`: capture backends behind `FrameSource`
//! - `frame`: owned pixel buffers with a capture timestamp
//! - `clock`: monotonic session time
//! - `preprocess`: grayscale conversion and engine-requested scaling
//! - `engine`: `TrackingEngine` boundary, bundled stub engine, TUM output
//! - `session`: engine lifecycle state machine
//! - `preview`: frame display and quit key polling
//! - `capture_loop`: wires the above into one run
//! - `config`: layered runtime configuration

pub mod capture_loop;
pub mod clock;
pub mod config;
pub mod engine;
pub mod frame;
pub mod ingest;
pub mod preprocess;
pub mod preview;
pub mod session;

pub use capture_loop::{CaptureLoop, LoopExit, LoopSettings, RunSummary};
pub use clock::{Clock, MonotonicClock};
pub use config::{CliOverrides, LiveConfig};
pub use engine::{EngineConfig, KeyframePose, SensorMode, StubEngine, TrackingEngine};
pub use frame::{Frame, PixelFormat};
pub use ingest::{CaptureBackend, CaptureConfig, FrameSource, SourceStats};
pub use preprocess::{scaled_dimensions, FramePreprocessor};
pub use preview::{ConsolePreview, NoPreview, Preview};
pub use session::{SessionState, TrackingSession};
