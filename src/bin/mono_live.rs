//! mono_live - live monocular tracking from a local camera
//!
//! This binary:
//! 1. Opens the selected capture backend (device node or GStreamer pipeline)
//! 2. Initializes the tracking engine from a vocabulary and settings file
//! 3. Feeds timestamped, preprocessed frames until end of stream or quit
//! 4. Shuts the engine down and writes the keyframe trajectory

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use mono_live::{
    ingest, CaptureLoop, CliOverrides, ConsolePreview, LiveConfig, LoopSettings, MonotonicClock,
    StubEngine,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Live monocular tracking from a local camera")]
struct Args {
    /// Feature vocabulary file for the tracking engine.
    vocabulary: PathBuf,

    /// Engine settings file (camera intrinsics, Camera.imageScale).
    settings: PathBuf,

    /// Convert frames to grayscale before tracking.
    #[arg(long)]
    gray: bool,

    /// Capture through a GStreamer pipeline instead of a device node.
    #[arg(long)]
    gstreamer: bool,

    /// Camera device index (/dev/videoN).
    #[arg(long, value_name = "INDEX")]
    device: Option<u32>,

    /// Pipeline description used with --gstreamer.
    #[arg(long, value_name = "DESC")]
    pipeline: Option<String>,

    /// Output path for the keyframe trajectory.
    #[arg(long, value_name = "PATH")]
    trajectory: Option<PathBuf>,

    /// Do not ask the engine to open its viewer.
    #[arg(long)]
    no_viewer: bool,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            grayscale: self.gray,
            gstreamer: self.gstreamer,
            device_index: self.device,
            pipeline: self.pipeline.clone(),
            trajectory: self.trajectory.clone(),
            no_viewer: self.no_viewer,
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let ui = ui::Ui::from_args(Some(&args.ui), std::io::stderr().is_terminal());
    let config = LiveConfig::load(&args.vocabulary, &args.settings, &args.overrides())?;
    log::info!(
        "mono_live: {:?} capture from {}",
        config.capture.backend,
        config.capture.address()
    );

    let preview = ConsolePreview::install()?;
    let settings = LoopSettings {
        grayscale: config.capture.grayscale,
        trajectory: config.trajectory_path.clone(),
    };
    let mut capture = CaptureLoop::new(settings, MonotonicClock::new(), preview);

    let summary = capture.run(
        || ui.stage("Open capture source").track(ingest::open(&config.capture)),
        || {
            ui.stage("Load tracking engine")
                .track(StubEngine::initialize(&config.engine_config()))
        },
    )?;

    log::info!(
        "mono_live: {:?} after {} frames, trajectory in {}",
        summary.exit,
        summary.frames_fed,
        summary.trajectory.display()
    );
    Ok(())
}
