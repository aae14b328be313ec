use anyhow::{Context, Result};
use atelier_canvas::draw::settings::{self, EngineConfig};
use atelier_canvas::draw::{Canvas, DefaultFetcher, EngineError, HostControls, HostHooks};
use atelier_canvas::{logging, replay};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Replays a gesture script on a drawing canvas and writes the exported PNG.
#[derive(Parser, Debug)]
#[command(name = "atelier_canvas")]
#[command(version)]
struct Args {
    /// JSON array of gesture steps
    script: PathBuf,

    /// Where to write the exported PNG
    out: PathBuf,

    /// Canvas settings file (defaults apply when missing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Export resolution multiplier (overrides the settings file)
    #[arg(long)]
    multiplier: Option<f32>,

    /// How long to wait for the reference image, in milliseconds
    #[arg(long, default_value_t = 10_000)]
    reference_timeout_ms: u64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.debug);

    let mut config = match &args.config {
        Some(path) => settings::load_from_path(path)?,
        None => EngineConfig::default(),
    };
    if let Some(multiplier) = args.multiplier {
        config.export_multiplier = multiplier;
    }

    let hooks = HostHooks {
        on_reference_error: Some(Box::new(|err: &EngineError| {
            tracing::warn!(error = %err, "reference image unavailable")
        })),
        ..HostHooks::default()
    };
    let canvas = Canvas::new(config, HostControls::default(), Arc::new(DefaultFetcher), hooks)?;
    canvas.attach()?;
    // Let the initial reference settle so strokes are replayed over it.
    canvas.wait_reference(Duration::from_millis(args.reference_timeout_ms));

    let steps = replay::load_script(&args.script)?;
    let summary = replay::replay(&canvas, &steps);
    canvas.wait_reference(Duration::from_millis(args.reference_timeout_ms));
    tracing::info!(
        applied = summary.applied,
        rejected = summary.rejected,
        strokes = summary.strokes,
        "script replayed"
    );

    let raster = canvas
        .handle()
        .complete()
        .context("export replayed canvas")?;
    raster.write_to(&args.out)?;
    tracing::info!(path = %args.out.display(), width = raster.width, height = raster.height, "artwork written");
    canvas.dispose();
    Ok(())
}
