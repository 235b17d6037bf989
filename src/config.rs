//! Map configuration

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{ClientVec, GeoVec};
use crate::projection::MAX_LATITUDE;
use crate::tiles::{TileLoaderOptions, UrlTemplate};

/// Largest accepted viewport side in pixels. Keeps the tile covering set
/// within 33 tiles per side at any zoom.
pub const MAX_VIEWPORT_EXTENT: f64 = 8192.0;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("config validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveMapConfig {
    pub viewport: ViewportConfig,
    pub camera: CameraConfig,
    pub tiles: TilesConfig,
    pub diagnostics: DiagnosticsConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewportConfig {
    pub width: f64,
    pub height: f64,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
        }
    }
}

impl ViewportConfig {
    pub fn size(&self) -> ClientVec {
        ClientVec::new(self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CenterConfig {
    pub lon: f64,
    pub lat: f64,
}

impl CenterConfig {
    pub fn to_geo(self) -> GeoVec {
        GeoVec::new(self.lon, self.lat)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub zoom: f64,
    pub center: CenterConfig,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            zoom: 2.0,
            center: CenterConfig::default(),
            min_zoom: 0.0,
            max_zoom: 18.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilesConfig {
    pub url_template: String,
    /// Rows counted from the bottom of the grid.
    pub tms: bool,
    pub cache_limit: usize,
    pub fetch_timeout_ms: u64,
    pub max_concurrent_fetches: usize,
}

impl Default for TilesConfig {
    fn default() -> Self {
        Self {
            url_template: "https://tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            tms: false,
            cache_limit: 256,
            fetch_timeout_ms: 10_000,
            max_concurrent_fetches: 8,
        }
    }
}

impl TilesConfig {
    pub fn loader_options(&self) -> Result<TileLoaderOptions, ConfigError> {
        let template = UrlTemplate::new(self.url_template.clone())
            .map_err(|err| ConfigError::Validation(err.to_string()))?
            .with_tms(self.tms);
        Ok(TileLoaderOptions {
            template,
            cache_limit: self.cache_limit,
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            max_concurrent_fetches: self.max_concurrent_fetches,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// 0 disables the JSON dumps.
    pub interval_ticks: u64,
    pub output_dir: String,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            interval_ticks: 0,
            output_dir: "diagnostics".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LiveMapConfig {
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        check_viewport_size(self.viewport.width, self.viewport.height)?;

        let camera = &self.camera;
        if !(camera.min_zoom >= 0.0 && camera.min_zoom <= camera.max_zoom) {
            return invalid(format!(
                "zoom range [{}, {}] is empty or negative",
                camera.min_zoom, camera.max_zoom
            ));
        }
        if !(camera.min_zoom..=camera.max_zoom).contains(&camera.zoom) {
            return invalid(format!(
                "zoom {} outside [{}, {}]",
                camera.zoom, camera.min_zoom, camera.max_zoom
            ));
        }
        if camera.center.lat.abs() > MAX_LATITUDE || camera.center.lon.abs() > 180.0 {
            return invalid(format!(
                "center ({}, {}) outside the map",
                camera.center.lon, camera.center.lat
            ));
        }

        let template = &self.tiles.url_template;
        let addressed = template.contains("{q}")
            || (template.contains("{z}")
                && template.contains("{x}")
                && (template.contains("{y}") || template.contains("{-y}")));
        if !addressed {
            return invalid(format!(
                "url template {template:?} needs {{z}}, {{x}} and {{y}}/{{-y}}, or {{q}}"
            ));
        }
        if self.tiles.max_concurrent_fetches == 0 {
            return invalid("max_concurrent_fetches must be at least 1".to_string());
        }
        if self.tiles.fetch_timeout_ms == 0 {
            return invalid("fetch_timeout_ms must be positive".to_string());
        }
        Ok(())
    }
}

/// A viewport must be non-empty and no larger than `MAX_VIEWPORT_EXTENT`
/// on either side.
pub fn check_viewport_size(width: f64, height: f64) -> Result<(), ConfigError> {
    let fits = |side: f64| side > 0.0 && side <= MAX_VIEWPORT_EXTENT;
    if fits(width) && fits(height) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "viewport sides must be in (0, {MAX_VIEWPORT_EXTENT}], got {width}x{height}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        LiveMapConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config = LiveMapConfig::from_yaml_str(
            r#"
camera:
  zoom: 3.5
  center: { lon: 10.0, lat: 50.0 }
tiles:
  url_template: "file:///tiles/{z}/{x}/{-y}.png"
  cache_limit: 16
"#,
        )
        .unwrap();
        assert_eq!(config.camera.zoom, 3.5);
        assert_eq!(config.camera.max_zoom, 18.0);
        assert_eq!(config.tiles.cache_limit, 16);
        assert_eq!(config.tiles.max_concurrent_fetches, 8);
        assert_eq!(config.viewport, ViewportConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = LiveMapConfig::default();
        config.camera.zoom = 30.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = LiveMapConfig::default();
        config.viewport.width = 0.0;
        assert!(config.validate().is_err());

        let mut config = LiveMapConfig::default();
        config.tiles.url_template = "https://tiles/{z}/{x}.png".to_string();
        assert!(config.validate().is_err());

        let mut config = LiveMapConfig::default();
        config.tiles.url_template = "https://tiles/{q}.png".to_string();
        config.validate().unwrap();
    }

    #[test]
    fn viewport_size_is_bounded() {
        let mut config = LiveMapConfig::default();
        config.viewport.width = MAX_VIEWPORT_EXTENT;
        config.validate().unwrap();

        config.viewport.width = 1e6;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
        assert!(check_viewport_size(f64::INFINITY, 10.0).is_err());
        assert!(check_viewport_size(f64::NAN, 10.0).is_err());
    }

    #[test]
    fn yaml_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("map.yaml");
        let mut config = LiveMapConfig::default();
        config.tiles.tms = true;
        config.diagnostics.interval_ticks = 5;
        config.to_yaml(&path).unwrap();
        assert_eq!(LiveMapConfig::from_yaml(&path).unwrap(), config);
    }

    #[test]
    fn loader_options_carry_tms_flag() {
        let mut tiles = TilesConfig::default();
        tiles.url_template = "/{z}/{x}/{y}.png".to_string();
        tiles.tms = true;
        let options = tiles.loader_options().unwrap();
        let key: crate::tiles::CellKey = "0".parse().unwrap();
        assert_eq!(options.template.url_for(&key), "/1/0/1.png");
        assert_eq!(options.fetch_timeout, Duration::from_millis(10_000));
    }
}
