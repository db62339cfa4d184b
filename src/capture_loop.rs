//! The capture loop: open, feed until exit, always shut down and persist.
//!
//! Order of operations:
//! 1. Open the capture source. Failure returns before any engine exists.
//! 2. Initialize the engine and read its image scale.
//! 3. Running: read, stamp, preview, preprocess, feed, poll for quit.
//! 4. Leave on end of stream, read error or quit key.
//! 5. Shut down and export the trajectory, whatever the exit path.
//!
//! Everything runs on the calling thread. The blocking read is the only
//! suspension point; the quit key is polled once per iteration.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::clock::Clock;
use crate::engine::TrackingEngine;
use crate::ingest::{FrameSource, SourceStats};
use crate::preprocess::FramePreprocessor;
use crate::preview::{is_quit_key, Preview};
use crate::session::TrackingSession;

/// Why the feed loop stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// Source reported end of stream or delivered an empty frame.
    EndOfStream,
    /// A read failed. Not retried.
    ReadError,
    /// The quit key was pressed.
    Cancelled,
}

/// Outcome of a completed run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub exit: LoopExit,
    pub frames_fed: u64,
    pub image_scale: f32,
    pub trajectory: PathBuf,
    pub source: SourceStats,
}

/// Per-run settings not owned by the capture backend or engine.
#[derive(Clone, Debug)]
pub struct LoopSettings {
    pub grayscale: bool,
    pub trajectory: PathBuf,
}

pub struct CaptureLoop<C: Clock, P: Preview> {
    settings: LoopSettings,
    clock: C,
    preview: P,
}

impl<C: Clock, P: Preview> CaptureLoop<C, P> {
    pub fn new(settings: LoopSettings, clock: C, preview: P) -> Self {
        Self {
            settings,
            clock,
            preview,
        }
    }

    /// Run one session.
    ///
    /// `open_source` runs first; if it fails, `init_engine` is never called.
    /// Once the engine exists, shutdown and trajectory export happen exactly
    /// once regardless of how the loop ends.
    pub fn run<S, E, O, I>(&mut self, open_source: O, init_engine: I) -> Result<RunSummary>
    where
        S: FrameSource,
        E: TrackingEngine,
        O: FnOnce() -> Result<S>,
        I: FnOnce() -> Result<E>,
    {
        let mut source = open_source().context("open capture source")?;
        let engine = init_engine().context("initialize tracking engine")?;

        let mut session = TrackingSession::new(engine, self.settings.trajectory.clone());
        let image_scale = session.image_scale();
        let preprocessor = FramePreprocessor::new(self.settings.grayscale, image_scale);
        log::info!(
            "capture loop: grayscale={}, image scale={}",
            preprocessor.grayscale(),
            preprocessor.scale()
        );

        session.start()?;
        self.clock.start();

        let outcome = self.feed_until_exit(&mut source, &mut session, &preprocessor);
        session.begin_termination();
        let finished = session.finish();

        let stats = source.stats();
        drop(source);
        log::info!(
            "capture loop: source {} captured {} frames at {}x{}",
            stats.address,
            stats.frames_captured,
            stats.width,
            stats.height
        );

        let exit = outcome?;
        finished?;

        Ok(RunSummary {
            exit,
            frames_fed: session.frames_fed(),
            image_scale,
            trajectory: session.trajectory_path().to_path_buf(),
            source: stats,
        })
    }

    fn feed_until_exit<S, E>(
        &mut self,
        source: &mut S,
        session: &mut TrackingSession<E>,
        preprocessor: &FramePreprocessor,
    ) -> Result<LoopExit>
    where
        S: FrameSource,
        E: TrackingEngine,
    {
        loop {
            let frame = match source.read_frame() {
                Ok(Some(frame)) if !frame.is_empty() => frame,
                Ok(_) => {
                    log::info!("capture loop: end of stream");
                    return Ok(LoopExit::EndOfStream);
                }
                Err(err) => {
                    log::error!("capture loop: failed to grab frame: {:#}", err);
                    return Ok(LoopExit::ReadError);
                }
            };

            let frame = frame.stamped(self.clock.elapsed_seconds());
            // The preview shows the frame as captured, before conversion.
            self.preview.render(&frame);

            let frame = preprocessor.process(frame).context("preprocess frame")?;
            session.feed(frame)?;

            if let Some(key) = self.preview.poll_key() {
                if is_quit_key(key) {
                    log::info!("capture loop: quit requested");
                    return Ok(LoopExit::Cancelled);
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Frame, PixelFormat};
    use crate::preview::{NoPreview, KEY_ESC};
    use anyhow::bail;
    use std::cell::RefCell;
    use std::path::Path;
    use std::rc::Rc;

    struct StepClock {
        now: f64,
    }

    impl Clock for StepClock {
        fn start(&mut self) {
            self.now = 0.0;
        }

        fn elapsed_seconds(&mut self) -> f64 {
            self.now += 0.033;
            self.now
        }
    }

    struct ScriptedSource {
        script: Vec<Result<Option<Frame>>>,
        reads: u64,
    }

    impl ScriptedSource {
        fn frames(n: usize) -> Self {
            let script = (0..n)
                .map(|_| Ok(Some(Frame::new(vec![0u8; 12], 2, 2, PixelFormat::Bgr24).unwrap())))
                .collect();
            Self { script, reads: 0 }
        }
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> Result<Option<Frame>> {
            self.reads += 1;
            if self.script.is_empty() {
                return Ok(None);
            }
            self.script.remove(0)
        }

        fn stats(&self) -> SourceStats {
            SourceStats {
                frames_captured: self.reads,
                address: "scripted".to_string(),
                width: 2,
                height: 2,
            }
        }
    }

    #[derive(Default)]
    struct Log {
        fed: Vec<(f64, usize)>,
        shutdowns: u32,
        exports: u32,
    }

    struct FakeEngine(Rc<RefCell<Log>>);

    impl TrackingEngine for FakeEngine {
        fn image_scale(&self) -> f32 {
            1.0
        }

        fn track_monocular(&mut self, frame: Frame, timestamp: f64) {
            self.0.borrow_mut().fed.push((timestamp, frame.channels()));
        }

        fn shutdown(&mut self) {
            self.0.borrow_mut().shutdowns += 1;
        }

        fn save_keyframe_trajectory(&self, _path: &Path) -> Result<()> {
            self.0.borrow_mut().exports += 1;
            Ok(())
        }
    }

    struct QuitAfter {
        remaining: u32,
    }

    impl Preview for QuitAfter {
        fn render(&mut self, _frame: &Frame) {}

        fn poll_key(&mut self) -> Option<u8> {
            self.remaining = self.remaining.saturating_sub(1);
            (self.remaining == 0).then_some(KEY_ESC)
        }
    }

    struct SeenChannels(Rc<RefCell<Vec<usize>>>);

    impl Preview for SeenChannels {
        fn render(&mut self, frame: &Frame) {
            self.0.borrow_mut().push(frame.channels());
        }

        fn poll_key(&mut self) -> Option<u8> {
            None
        }
    }

    fn settings(grayscale: bool) -> LoopSettings {
        LoopSettings {
            grayscale,
            trajectory: PathBuf::from("unused.txt"),
        }
    }

    #[test]
    fn quit_key_cancels_and_still_persists() -> Result<()> {
        let log = Rc::new(RefCell::new(Log::default()));
        let engine_log = log.clone();
        let mut capture = CaptureLoop::new(
            settings(false),
            StepClock { now: 0.0 },
            QuitAfter { remaining: 3 },
        );

        let summary = capture.run(
            || Ok(ScriptedSource::frames(10)),
            || Ok(FakeEngine(engine_log)),
        )?;

        assert_eq!(summary.exit, LoopExit::Cancelled);
        assert_eq!(summary.frames_fed, 3);
        let log = log.borrow();
        assert_eq!((log.shutdowns, log.exports), (1, 1));
        Ok(())
    }

    #[test]
    fn read_error_ends_loop_without_failing() -> Result<()> {
        let log = Rc::new(RefCell::new(Log::default()));
        let engine_log = log.clone();
        let mut source = ScriptedSource::frames(2);
        source.script.push(Err(anyhow::anyhow!("device unplugged")));
        source.script.extend(ScriptedSource::frames(3).script);

        let mut capture = CaptureLoop::new(settings(true), StepClock { now: 0.0 }, NoPreview);
        let summary = capture.run(|| Ok(source), || Ok(FakeEngine(engine_log)))?;

        assert_eq!(summary.exit, LoopExit::ReadError);
        assert_eq!(summary.frames_fed, 2);
        let log = log.borrow();
        assert!(log.fed.iter().all(|&(_, channels)| channels == 1));
        assert_eq!((log.shutdowns, log.exports), (1, 1));
        Ok(())
    }

    #[test]
    fn engine_init_failure_skips_session() {
        let mut capture = CaptureLoop::new(settings(false), StepClock { now: 0.0 }, NoPreview);
        let result = capture.run(
            || Ok(ScriptedSource::frames(1)),
            || -> Result<FakeEngine> { bail!("bad vocabulary") },
        );
        let err = result.err().expect("init failure");
        assert!(format!("{:#}", err).contains("bad vocabulary"));
    }

    #[test]
    fn preview_shows_captured_frame_before_conversion() -> Result<()> {
        let log = Rc::new(RefCell::new(Log::default()));
        let engine_log = log.clone();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut capture = CaptureLoop::new(
            settings(true),
            StepClock { now: 0.0 },
            SeenChannels(seen.clone()),
        );

        capture.run(
            || Ok(ScriptedSource::frames(2)),
            || Ok(FakeEngine(engine_log)),
        )?;

        assert_eq!(*seen.borrow(), vec![3, 3]);
        assert!(log.borrow().fed.iter().all(|&(_, channels)| channels == 1));
        Ok(())
    }
}
