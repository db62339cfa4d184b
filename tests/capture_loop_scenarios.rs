use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{anyhow, bail, Result};

use mono_live::{
    ingest, CaptureBackend, CaptureConfig, CaptureLoop, Clock, Frame, FrameSource, LoopExit,
    LoopSettings, MonotonicClock, NoPreview, PixelFormat, Preview, SourceStats, StubEngine,
    TrackingEngine,
};

#[derive(Default)]
struct Calls {
    initialized: u32,
    fed: Vec<(f64, u32, u32, usize)>,
    shutdowns: u32,
    exports: u32,
    order: Vec<&'static str>,
}

struct RecordingEngine {
    calls: Rc<RefCell<Calls>>,
    scale: f32,
}

impl RecordingEngine {
    fn initialize(calls: &Rc<RefCell<Calls>>, scale: f32) -> Result<Self> {
        calls.borrow_mut().initialized += 1;
        Ok(Self {
            calls: calls.clone(),
            scale,
        })
    }
}

impl TrackingEngine for RecordingEngine {
    fn image_scale(&self) -> f32 {
        self.scale
    }

    fn track_monocular(&mut self, frame: Frame, timestamp: f64) {
        let mut calls = self.calls.borrow_mut();
        calls
            .fed
            .push((timestamp, frame.width, frame.height, frame.channels()));
        calls.order.push("track");
    }

    fn shutdown(&mut self) {
        let mut calls = self.calls.borrow_mut();
        calls.shutdowns += 1;
        calls.order.push("shutdown");
    }

    fn save_keyframe_trajectory(&self, _path: &Path) -> Result<()> {
        let mut calls = self.calls.borrow_mut();
        calls.exports += 1;
        calls.order.push("export");
        Ok(())
    }
}

/// Advances 1/30 s per reading.
struct StepClock(f64);

impl Clock for StepClock {
    fn start(&mut self) {
        self.0 = 0.0;
    }

    fn elapsed_seconds(&mut self) -> f64 {
        self.0 += 1.0 / 30.0;
        self.0
    }
}

struct QuitAfter(u32);

impl Preview for QuitAfter {
    fn render(&mut self, _frame: &Frame) {}

    fn poll_key(&mut self) -> Option<u8> {
        self.0 = self.0.saturating_sub(1);
        if self.0 == 0 {
            Some(b'q')
        } else {
            None
        }
    }
}

/// Yields `good` frames, then fails every read.
struct FailingSource {
    good: u32,
    reads: u64,
}

impl FrameSource for FailingSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.reads += 1;
        if self.good == 0 {
            return Err(anyhow!("select timeout"));
        }
        self.good -= 1;
        Ok(Some(Frame::new(vec![128u8; 8 * 6 * 3], 8, 6, PixelFormat::Rgb24)?))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.reads,
            address: "failing".to_string(),
            width: 8,
            height: 6,
        }
    }
}

fn stub_device(frames: u32) -> CaptureConfig {
    CaptureConfig {
        backend: CaptureBackend::DirectDevice,
        device: format!("stub://camera?frames={}", frames),
        ..CaptureConfig::default()
    }
}

fn settings(grayscale: bool) -> LoopSettings {
    LoopSettings {
        grayscale,
        trajectory: PathBuf::from("KeyFrameTrajectory.txt"),
    }
}

#[test]
fn direct_device_ten_frames_untouched() -> Result<()> {
    let calls = Rc::new(RefCell::new(Calls::default()));
    let config = stub_device(10);
    let mut capture = CaptureLoop::new(settings(false), StepClock(0.0), NoPreview);

    let summary = capture.run(
        || ingest::open(&config),
        || RecordingEngine::initialize(&calls, 1.0),
    )?;

    assert_eq!(summary.exit, LoopExit::EndOfStream);
    assert_eq!(summary.frames_fed, 10);
    assert_eq!(summary.source.frames_captured, 10);

    let calls = calls.borrow();
    assert_eq!(calls.fed.len(), 10);
    assert!(calls
        .fed
        .iter()
        .all(|&(_, w, h, channels)| (w, h, channels) == (640, 480, 3)));
    assert!(calls.fed.windows(2).all(|pair| pair[0].0 < pair[1].0));
    assert_eq!(calls.order.last(), Some(&"export"));
    assert_eq!(calls.order[calls.order.len() - 2], "shutdown");
    assert_eq!((calls.shutdowns, calls.exports), (1, 1));
    Ok(())
}

#[test]
fn engine_scale_halves_frames() -> Result<()> {
    let calls = Rc::new(RefCell::new(Calls::default()));
    let config = stub_device(3);
    let mut capture = CaptureLoop::new(settings(false), StepClock(0.0), NoPreview);

    let summary = capture.run(
        || ingest::open(&config),
        || RecordingEngine::initialize(&calls, 0.5),
    )?;

    assert_eq!(summary.image_scale, 0.5);
    assert!(calls
        .borrow()
        .fed
        .iter()
        .all(|&(_, w, h, _)| (w, h) == (320, 240)));
    Ok(())
}

#[test]
fn early_end_of_stream_feeds_what_arrived() -> Result<()> {
    let calls = Rc::new(RefCell::new(Calls::default()));
    let config = stub_device(4);
    let mut capture = CaptureLoop::new(settings(false), MonotonicClock::new(), NoPreview);

    let summary = capture.run(
        || ingest::open(&config),
        || RecordingEngine::initialize(&calls, 1.0),
    )?;

    assert_eq!(summary.exit, LoopExit::EndOfStream);
    let calls = calls.borrow();
    assert_eq!(calls.fed.len(), 4);
    assert!(calls.fed.windows(2).all(|pair| pair[0].0 <= pair[1].0));
    assert_eq!((calls.shutdowns, calls.exports), (1, 1));
    Ok(())
}

#[test]
fn open_failure_never_initializes_engine() {
    let calls = Rc::new(RefCell::new(Calls::default()));
    let config = CaptureConfig {
        backend: CaptureBackend::DirectDevice,
        device: "/dev/mono-live-missing".to_string(),
        ..CaptureConfig::default()
    };
    let mut capture = CaptureLoop::new(settings(false), StepClock(0.0), NoPreview);

    let result = capture.run(
        || ingest::open(&config),
        || RecordingEngine::initialize(&calls, 1.0),
    );

    assert!(result.is_err());
    let calls = calls.borrow();
    assert_eq!(calls.initialized, 0);
    assert_eq!((calls.shutdowns, calls.exports), (0, 0));
}

#[test]
fn cancellation_persists_exactly_once() -> Result<()> {
    let calls = Rc::new(RefCell::new(Calls::default()));
    let config = CaptureConfig {
        backend: CaptureBackend::PipelineDescription,
        pipeline: "stub://pipeline".to_string(),
        ..CaptureConfig::default()
    };
    let mut capture = CaptureLoop::new(settings(true), StepClock(0.0), QuitAfter(6));

    let summary = capture.run(
        || ingest::open(&config),
        || RecordingEngine::initialize(&calls, 1.0),
    )?;

    assert_eq!(summary.exit, LoopExit::Cancelled);
    assert_eq!(summary.frames_fed, 6);
    let calls = calls.borrow();
    assert!(calls.fed.iter().all(|&(_, _, _, channels)| channels == 1));
    assert_eq!((calls.shutdowns, calls.exports), (1, 1));
    Ok(())
}

#[test]
fn read_error_persists_exactly_once() -> Result<()> {
    let calls = Rc::new(RefCell::new(Calls::default()));
    let mut capture = CaptureLoop::new(settings(false), StepClock(0.0), NoPreview);

    let summary = capture.run(
        || Ok(FailingSource { good: 2, reads: 0 }),
        || RecordingEngine::initialize(&calls, 1.0),
    )?;

    assert_eq!(summary.exit, LoopExit::ReadError);
    assert_eq!(summary.source.frames_captured, 3);
    let calls = calls.borrow();
    assert_eq!(calls.fed.len(), 2);
    assert_eq!((calls.shutdowns, calls.exports), (1, 1));
    Ok(())
}

#[test]
fn stub_engine_writes_trajectory_end_to_end() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let vocabulary = dir.path().join("ORBvoc.txt");
    let engine_settings = dir.path().join("camera.yaml");
    let trajectory = dir.path().join("KeyFrameTrajectory.txt");
    std::fs::write(&vocabulary, "vocabulary")?;
    std::fs::write(&engine_settings, "%YAML:1.0\nCamera.imageScale: 0.5\n")?;

    let config = stub_device(12);
    let engine_config = mono_live::EngineConfig::monocular(&vocabulary, &engine_settings);
    let loop_settings = LoopSettings {
        grayscale: true,
        trajectory: trajectory.clone(),
    };
    let mut capture = CaptureLoop::new(loop_settings, StepClock(0.0), NoPreview);

    let summary = capture.run(
        || ingest::open(&config),
        || StubEngine::initialize(&engine_config),
    )?;

    assert_eq!(summary.frames_fed, 12);
    let text = std::fs::read_to_string(&trajectory)?;
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    for line in lines {
        if line.split(' ').count() != 8 {
            bail!("malformed trajectory line: {}", line);
        }
    }
    Ok(())
}
