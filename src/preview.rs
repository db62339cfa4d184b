//! Minimal preview and interactive cancellation.
//!
//! The loop renders each frame and then polls for a key without blocking.
//! `q` or ESC ends the run. Without a window, `ConsolePreview` reports
//! progress through the log and maps Ctrl-C to ESC. A second Ctrl-C exits
//! the process at once, for reads that never return.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::frame::Frame;

pub const KEY_ESC: u8 = 27;

/// Exit status after a forced second interrupt (128 + SIGINT).
const FORCED_EXIT_CODE: i32 = 130;

pub fn is_quit_key(key: u8) -> bool {
    key == b'q' || key == KEY_ESC
}

/// Frame display plus non-blocking key poll.
pub trait Preview {
    fn render(&mut self, frame: &Frame);

    /// Most recent key press since the last poll, if any. Must not block.
    fn poll_key(&mut self) -> Option<u8>;
}

/// Preview that shows nothing and never quits.
#[derive(Debug, Default)]
pub struct NoPreview;

impl Preview for NoPreview {
    fn render(&mut self, _frame: &Frame) {}

    fn poll_key(&mut self) -> Option<u8> {
        None
    }
}

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Headless preview: periodic progress lines, Ctrl-C as the quit key.
pub struct ConsolePreview {
    interrupted: Arc<AtomicBool>,
    frames: u64,
    window_frames: u64,
    window_start: Instant,
}

impl ConsolePreview {
    /// Install the Ctrl-C handler. Only one handler may exist per process.
    pub fn install() -> Result<Self> {
        let interrupted = Arc::new(AtomicBool::new(false));
        let flag = interrupted.clone();
        let presses = AtomicU32::new(0);
        ctrlc::set_handler(move || {
            if record_interrupt(&flag, &presses) {
                log::warn!("preview: second interrupt, exiting without saving");
                std::process::exit(FORCED_EXIT_CODE);
            }
        })
        .context("error setting Ctrl-C handler")?;
        Ok(Self::with_flag(interrupted))
    }

    /// Build around an externally owned interrupt flag.
    pub fn with_flag(interrupted: Arc<AtomicBool>) -> Self {
        Self {
            interrupted,
            frames: 0,
            window_frames: 0,
            window_start: Instant::now(),
        }
    }
}

impl Preview for ConsolePreview {
    fn render(&mut self, frame: &Frame) {
        self.frames += 1;
        self.window_frames += 1;

        let elapsed = self.window_start.elapsed();
        if elapsed >= REPORT_INTERVAL {
            log::info!(
                "preview: {} frames, {:.1} fps, last {}x{} {:?} at {:.3}s",
                self.frames,
                self.window_frames as f64 / elapsed.as_secs_f64(),
                frame.width,
                frame.height,
                frame.format,
                frame.timestamp
            );
            self.window_frames = 0;
            self.window_start = Instant::now();
        }
    }

    fn poll_key(&mut self) -> Option<u8> {
        if self.interrupted.swap(false, Ordering::SeqCst) {
            log::info!("preview: interrupt received, quitting");
            Some(KEY_ESC)
        } else {
            None
        }
    }
}

/// Raise the quit flag. Returns true from the second press on.
fn record_interrupt(flag: &AtomicBool, presses: &AtomicU32) -> bool {
    flag.store(true, Ordering::SeqCst);
    presses.fetch_add(1, Ordering::SeqCst) >= 1
}
