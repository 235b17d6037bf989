use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

use livemap::{geometry::GeoVec, render::DisplayList, ScenarioLoader};

#[derive(Debug, Parser)]
#[command(author, version, about = "Headless livemap runner")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, default_value = "scenarios/demo.yaml")]
    scenario: PathBuf,

    /// Override frame count (uses scenario default when omitted)
    #[arg(long)]
    frames: Option<u64>,

    /// Zoom to this level before the first frame
    #[arg(long)]
    zoom_to: Option<f64>,

    /// Center longitude before the first frame
    #[arg(long, requires = "pan_lat", allow_hyphen_values = true)]
    pan_lon: Option<f64>,

    /// Center latitude before the first frame
    #[arg(long, requires = "pan_lon", allow_hyphen_values = true)]
    pan_lat: Option<f64>,

    /// Write diagnostics here (overrides the scenario's output_dir)
    #[arg(long)]
    diagnostics_dir: Option<PathBuf>,

    /// Write the last frame's display list as JSON
    #[arg(long)]
    frame_out: Option<PathBuf>,

    /// Hit-test this client point after the run, as `x,y`
    #[arg(long, value_parser = parse_pointer)]
    pointer: Option<(f64, f64)>,
}

fn parse_pointer(text: &str) -> Result<(f64, f64), String> {
    let (x, y) = text
        .split_once(',')
        .ok_or_else(|| format!("expected x,y, got '{text}'"))?;
    let parse = |v: &str| v.trim().parse::<f64>().map_err(|err| format!("'{v}': {err}"));
    Ok((parse(x)?, parse(y)?))
}

/// Install the global subscriber; `RUST_LOG` overrides `level`.
fn init_logging(level: &str) -> Result<()> {
    let directive = level
        .parse::<Directive>()
        .with_context(|| format!("invalid logging.level '{level}'"))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(directive)
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|err| anyhow!("failed to install log subscriber: {err}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loader = ScenarioLoader::new(".");
    let mut scenario = loader.load(&cli.scenario)?;
    if let Some(dir) = &cli.diagnostics_dir {
        scenario.config.diagnostics.output_dir = dir.display().to_string();
        if scenario.config.diagnostics.interval_ticks == 0 {
            scenario.config.diagnostics.interval_ticks = 10;
        }
    }

    init_logging(&scenario.config.logging.level)?;

    let mut map = scenario.map_builder().build()?;
    scenario.populate(&mut map)?;
    if let Some(zoom) = cli.zoom_to {
        map.set_zoom(zoom)?;
    }
    if let (Some(lon), Some(lat)) = (cli.pan_lon, cli.pan_lat) {
        map.pan_to(GeoVec::new(lon, lat))?;
    }

    let frames = scenario.frames(cli.frames);
    let frame_time = Duration::from_secs_f64(scenario.frame_ms.max(0.0) / 1000.0);
    for _ in 0..frames {
        let summary = map.tick(scenario.frame_ms);
        for failed in summary.failed() {
            warn!(tick = summary.tick, system = %failed.name, "system failed this frame");
        }
        tokio::time::sleep(frame_time).await;
    }

    if let Some(metrics) = map.metrics() {
        info!(
            scenario = %scenario.name,
            frames,
            entities = metrics.entity_count,
            tiles_cached = metrics.tiles_cached,
            tiles_downloading = metrics.tiles_downloading,
            tiles_failed = metrics.tiles_failed,
            slowest = metrics.slowest_system.as_deref().unwrap_or("-"),
            "run complete"
        );
    }

    if let Some(path) = &cli.frame_out {
        let mut frame = DisplayList::new();
        let drawn = map.render(&mut frame);
        let json = serde_json::to_string_pretty(&frame)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), drawn, commands = frame.len(), "frame written");
    }

    if let Some((x, y)) = cli.pointer {
        match map.search(x, y) {
            Some(hit) => println!("{}", serde_json::to_string(&hit)?),
            None => println!("null"),
        }
    }

    println!(
        "Scenario '{}' completed for {} frames at zoom {:.2}",
        scenario.name,
        frames,
        map.viewport().zoom
    );
    Ok(())
}
