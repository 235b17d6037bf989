//! Per-frame metrics and periodic JSON dumps

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ecs::World;
use crate::engine::{SystemRunReport, TickSummary};
use crate::tiles::{LoaderStats, TileLoader};

/// What one tick cost and what the tile subsystem looked like afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameMetrics {
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub frame_ms: f64,
    pub slowest_system: Option<String>,
    pub slowest_system_ms: f64,
    pub systems: Vec<SystemRunReport>,
    pub entity_count: usize,
    pub tiles_downloading: usize,
    pub tiles_queued: usize,
    pub tiles_cached: usize,
    pub tiles_failed: usize,
    pub loader: LoaderStats,
}

impl FrameMetrics {
    pub fn collect(summary: &TickSummary, world: &World, loader: Option<&TileLoader>) -> Self {
        let slowest = summary.slowest();
        Self {
            tick: summary.tick,
            timestamp: Utc::now(),
            frame_ms: summary.total_ms(),
            slowest_system: slowest.map(|r| r.name.clone()),
            slowest_system_ms: slowest.map_or(0.0, |r| r.duration_ms),
            systems: summary.system_reports.clone(),
            entity_count: world.entity_count(),
            tiles_downloading: loader.map_or(0, TileLoader::in_flight_count),
            tiles_queued: loader.map_or(0, TileLoader::queued_count),
            tiles_cached: loader.map_or(0, |l| l.cache().len()),
            tiles_failed: loader.map_or(0, TileLoader::failed_count),
            loader: loader.map(TileLoader::stats).unwrap_or_default(),
        }
    }

    pub fn dropped_results(&self) -> u64 {
        self.loader.dropped_results
    }
}

/// Writes `tick_NNNNNN.json` every `interval_ticks` ticks.
pub struct DiagnosticsWriter {
    output_dir: PathBuf,
    interval_ticks: u64,
    last_written_tick: u64,
}

impl DiagnosticsWriter {
    pub fn new(output_dir: impl AsRef<Path>, interval_ticks: u64) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)
            .with_context(|| format!("Failed to create diagnostics dir {}", output_dir.display()))?;
        Ok(Self {
            output_dir,
            interval_ticks,
            last_written_tick: 0,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn should_write(&self, tick: u64) -> bool {
        if self.interval_ticks == 0 {
            return false;
        }
        tick > 0 && tick - self.last_written_tick >= self.interval_ticks
    }

    pub fn write(&mut self, metrics: &FrameMetrics) -> Result<PathBuf> {
        let path = self.output_dir.join(format!("tick_{:06}.json", metrics.tick));
        let json = serde_json::to_string_pretty(metrics)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        self.last_written_tick = metrics.tick;
        Ok(path)
    }

    /// Write if the interval has elapsed.
    pub fn maybe_write(&mut self, metrics: &FrameMetrics) -> Result<Option<PathBuf>> {
        if !self.should_write(metrics.tick) {
            return Ok(None);
        }
        self.write(metrics).map(Some)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<FrameMetrics> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let metrics = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(metrics)
    }

    /// Dumps in tick order.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            let is_dump = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("tick_") && name.ends_with(".json"));
            if is_dump {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
