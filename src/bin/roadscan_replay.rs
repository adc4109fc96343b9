//! roadscan_replay - run the capture pipeline over a directory of images
//!
//! Frames are processed synchronously in file-name order (no frame drops).
//! Captures wait for upload queue space instead of being rejected, uploads
//! go through the configured stores, and a JSON summary is printed on stdout
//! once every upload has finished.

use anyhow::Result;
use clap::Parser;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::PathBuf;

use roadscan::capture::FrameOutcome;
use roadscan::ingest::{DirectoryConfig, DirectorySource, FrameSource};
use roadscan::worker::{process_frame, WorkerStats};
use roadscan::{Roadscan, RoadscanConfig, Rotation, UploadStats};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Directory of PNG/JPEG frames.
    dir: PathBuf,
    /// Configuration file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "ROADSCAN_CONFIG")]
    config: Option<PathBuf>,
    /// Clockwise rotation hint for every frame (0, 90, 180, 270).
    #[arg(long)]
    rotation: Option<u32>,
    /// Frames come from a front-facing (mirrored) camera.
    #[arg(long)]
    mirrored: bool,
    /// Override the detector backend (cpu, stub, tract).
    #[arg(long)]
    backend: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Serialize)]
struct Summary {
    frames: WorkerStats,
    uploads: UploadStats,
    captures: Vec<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::from_args(&args.ui, std::io::stderr().is_terminal());

    let mut cfg = RoadscanConfig::load_from(args.config.as_deref())?;
    if let Some(backend) = args.backend {
        cfg.detector.backend = backend;
    }
    let rotation = match args.rotation {
        Some(degrees) => Rotation::from_degrees(degrees)?,
        None => cfg.source.rotation,
    };
    let mirrored = args.mirrored || cfg.source.mirrored;

    let mut source = DirectorySource::new(DirectoryConfig {
        path: args.dir.clone(),
        target_fps: 0,
        rotation,
        mirrored,
        looped: false,
    })?;

    let roadscan = {
        let _stage = ui.stage("setting up pipeline");
        Roadscan::from_config(cfg)?
    };
    let mut orchestrator = roadscan.replay_orchestrator();

    let mut frames = WorkerStats::default();
    let mut captures = Vec::new();
    let mut counter = ui.counter("frames", source.len() as u64);
    while let Some(frame) = source.next_frame()? {
        let outcome = process_frame(&mut orchestrator, &frame);
        frames.processed += 1;
        let note = match &outcome {
            FrameOutcome::Submitted { filename } => {
                frames.captures += 1;
                captures.push(filename.clone());
                format!("captured {}", filename)
            }
            FrameOutcome::Rejected { filename } => {
                frames.rejected += 1;
                format!("rejected {}", filename)
            }
            FrameOutcome::DetectorUnavailable => {
                frames.unavailable += 1;
                String::new()
            }
            FrameOutcome::SnapshotUnavailable => {
                frames.abandoned += 1;
                String::new()
            }
            FrameOutcome::NoDetection | FrameOutcome::Suppressed => String::new(),
        };
        counter.tick(&note);
    }
    counter.finish();

    let uploads = {
        let _stage = ui.stage("waiting for uploads");
        drop(orchestrator);
        roadscan.shutdown()?
    };

    let summary = Summary {
        frames,
        uploads,
        captures,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
