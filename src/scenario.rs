use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;

use crate::chart::{BarSpec, Palette, PathSpec, PieSpec, PointSpec};
use crate::config::LiveMapConfig;
use crate::ecs::Entity;
use crate::livemap::{LiveMap, LiveMapBuilder};
use crate::projection::MAX_LATITUDE;

fn default_frame_ms() -> f64 {
    16.0
}

fn default_point_radius() -> f64 {
    4.0
}

fn default_lon_range() -> [f64; 2] {
    [-180.0, 180.0]
}

fn default_lat_range() -> [f64; 2] {
    [-60.0, 60.0]
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub frames: Option<u64>,
    #[serde(default = "default_frame_ms")]
    pub frame_ms: f64,
    #[serde(default)]
    pub config: LiveMapConfig,
    #[serde(default)]
    pub palette: Option<Palette>,
    #[serde(default)]
    pub layers: Vec<ScenarioLayer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioLayer {
    pub name: String,
    #[serde(default)]
    pub points: Vec<PointSpec>,
    #[serde(default)]
    pub generated_points: Option<GeneratedPoints>,
    #[serde(default)]
    pub pies: Vec<PieSpec>,
    #[serde(default)]
    pub bars: Vec<BarSpec>,
    #[serde(default)]
    pub paths: Vec<PathSpec>,
}

/// A reproducible random point cloud.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedPoints {
    pub count: usize,
    pub seed: u64,
    #[serde(default = "default_point_radius")]
    pub radius: f64,
    #[serde(default = "default_lon_range")]
    pub lon_range: [f64; 2],
    #[serde(default = "default_lat_range")]
    pub lat_range: [f64; 2],
}

impl GeneratedPoints {
    pub fn generate(&self) -> Result<Vec<PointSpec>> {
        let [lon_min, lon_max] = self.lon_range;
        let [lat_min, lat_max] = self.lat_range;
        if !(lon_min < lon_max && lat_min < lat_max) {
            bail!("generated point ranges must be non-empty");
        }
        let (lat_min, lat_max) = (lat_min.max(-MAX_LATITUDE), lat_max.min(MAX_LATITUDE));
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        Ok((0..self.count)
            .map(|_| PointSpec {
                lon: rng.gen_range(lon_min..lon_max),
                lat: rng.gen_range(lat_min..lat_max),
                radius: self.radius,
                fill: None,
                stroke: None,
                stroke_width: 1.0,
            })
            .collect())
    }
}

pub struct ScenarioLoader {
    base_dir: PathBuf,
}

impl ScenarioLoader {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self, file: impl AsRef<Path>) -> Result<Scenario> {
        let path = self.base_dir.join(file);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        let scenario: Scenario = serde_yaml::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        scenario
            .config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(scenario)
    }
}

impl Scenario {
    pub fn map_builder(&self) -> LiveMapBuilder {
        LiveMap::builder(self.config.clone()).with_palette(self.palette.clone().unwrap_or_default())
    }

    /// Create the scenario's layers on `map`, in declaration order. Objects
    /// are indexed per layer in the order points, generated points, pies,
    /// bars, paths.
    pub fn populate(&self, map: &mut LiveMap) -> Result<Vec<Entity>> {
        let mut created = Vec::with_capacity(self.layers.len());
        for layer_spec in &self.layers {
            let layer = map.add_layer(&layer_spec.name)?;
            let mut index = 0;
            let generated = match &layer_spec.generated_points {
                Some(cloud) => cloud
                    .generate()
                    .with_context(|| format!("layer '{}'", layer_spec.name))?,
                None => Vec::new(),
            };
            for spec in layer_spec.points.iter().chain(&generated) {
                map.add_point(layer, index, spec)
                    .with_context(|| format!("point {index} in layer '{}'", layer_spec.name))?;
                index += 1;
            }
            for spec in &layer_spec.pies {
                map.add_pie(layer, index, spec)
                    .with_context(|| format!("pie {index} in layer '{}'", layer_spec.name))?;
                index += 1;
            }
            for spec in &layer_spec.bars {
                map.add_bar(layer, index, spec)
                    .with_context(|| format!("bar {index} in layer '{}'", layer_spec.name))?;
                index += 1;
            }
            for spec in &layer_spec.paths {
                map.add_path(layer, index, spec)
                    .with_context(|| format!("path {index} in layer '{}'", layer_spec.name))?;
                index += 1;
            }
            created.push(layer);
        }
        Ok(created)
    }

    pub fn frames(&self, override_frames: Option<u64>) -> u64 {
        override_frames.or(self.frames).unwrap_or(60)
    }
}
