//! The map facade: one `World`, one ordered `Engine`, and the commands a host
//! UI drives it with.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::camera::{
    CameraComponent, CameraUpdateComponent, CameraUpdateDetectionSystem, Viewport,
    ViewportComponent, ZoomChangedComponent,
};
use crate::chart::{self, BarSpec, Palette, PathSpec, PieSpec, PointSpec};
use crate::config::{check_viewport_size, LiveMapConfig};
use crate::diagnostics::{DiagnosticsWriter, FrameMetrics};
use crate::ecs::{Entity, World};
use crate::engine::{Engine, EngineBuilder, TickSummary};
use crate::geometry::{ClientVec, GeoVec};
use crate::layers::{self, LayerKind};
use crate::locator::{self, HoverObject};
use crate::placement::{
    ScaleUpdateSystem, VisibilityUpdateSystem, WorldDimension2ScreenUpdateSystem,
    WorldGeometry2ScreenUpdateSystem, WorldOrigin2ScreenUpdateSystem,
};
use crate::projection;
use crate::render::{self, Canvas, RenderContext};
use crate::tiles::{
    transport_for, CellStateUpdateSystem, RasterTileDecoder, RequestTilesComponent, TileDecoder,
    TileLoader, TileLoadingSystem, TileTransport,
};

/// Unique debug names for entities, owned by the map that creates them.
#[derive(Debug, Default)]
pub struct NameGenerator {
    next: u64,
}

impl NameGenerator {
    pub fn next(&mut self, prefix: &str) -> String {
        let id = self.next;
        self.next += 1;
        format!("{prefix}_{id}")
    }
}

pub struct LiveMapBuilder {
    config: LiveMapConfig,
    transport: Option<Arc<dyn TileTransport>>,
    decoder: Option<Arc<dyn TileDecoder>>,
    runtime: Option<Handle>,
    palette: Palette,
}

impl LiveMapBuilder {
    pub fn new(config: LiveMapConfig) -> Self {
        Self {
            config,
            transport: None,
            decoder: None,
            runtime: None,
            palette: Palette::default(),
        }
    }

    /// Defaults to HTTP or filesystem depending on the url template.
    pub fn with_transport(mut self, transport: Arc<dyn TileTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn TileDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Defaults to the runtime `build` is called from.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn with_palette(mut self, palette: Palette) -> Self {
        self.palette = palette;
        self
    }

    pub fn build(self) -> Result<LiveMap> {
        let config = self.config;
        config.validate()?;

        let options = config.tiles.loader_options()?;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::from(transport_for(&options.template, options.fetch_timeout)?),
        };
        let decoder = self.decoder.unwrap_or_else(|| Arc::new(RasterTileDecoder));
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().context("LiveMap needs a tokio runtime to fetch tiles")?,
        };
        let loader = TileLoader::new(options, transport, decoder, runtime);

        let mut world = World::new();
        let center = projection::geo_to_world_clamped(config.camera.center.to_geo());
        let camera = world.create_entity("camera");
        let (min_zoom, max_zoom) = (config.camera.min_zoom, config.camera.max_zoom);
        world.add_component(
            camera,
            CameraComponent::new(config.camera.zoom, center, min_zoom, max_zoom),
        )?;
        world.add_component(camera, CameraUpdateComponent::default())?;
        world.add_component(
            camera,
            ViewportComponent(Viewport::new(config.viewport.size(), center, config.camera.zoom)),
        )?;
        let cells = world.create_entity("cell_state");
        world.add_component(cells, RequestTilesComponent::default())?;
        layers::create_layer(&mut world, "basemap", LayerKind::Basemap)?;

        let engine = EngineBuilder::new()
            .with_system(CameraUpdateDetectionSystem)
            .with_system(ScaleUpdateSystem)
            .with_system(CellStateUpdateSystem)
            .with_system(TileLoadingSystem::new(loader))
            .with_system(WorldOrigin2ScreenUpdateSystem)
            .with_system(WorldGeometry2ScreenUpdateSystem)
            .with_system(WorldDimension2ScreenUpdateSystem)
            .with_system(VisibilityUpdateSystem)
            .with_transient::<ZoomChangedComponent>()
            .build();

        let diagnostics = match config.diagnostics.interval_ticks {
            0 => None,
            interval => Some(DiagnosticsWriter::new(&config.diagnostics.output_dir, interval)?),
        };

        info!(
            zoom = config.camera.zoom,
            template = %config.tiles.url_template,
            "livemap ready"
        );
        Ok(LiveMap {
            world,
            engine,
            camera,
            names: NameGenerator::default(),
            palette: self.palette,
            diagnostics,
            metrics: None,
            config,
        })
    }
}

pub struct LiveMap {
    world: World,
    engine: Engine,
    camera: Entity,
    names: NameGenerator,
    palette: Palette,
    diagnostics: Option<DiagnosticsWriter>,
    metrics: Option<FrameMetrics>,
    config: LiveMapConfig,
}

impl LiveMap {
    pub fn builder(config: LiveMapConfig) -> LiveMapBuilder {
        LiveMapBuilder::new(config)
    }

    /// Run every system once. Finished tile fetches become visible here, never
    /// in between ticks.
    pub fn tick(&mut self, dt_ms: f64) -> TickSummary {
        let summary = self.engine.tick(&mut self.world, dt_ms);
        let metrics = FrameMetrics::collect(&summary, &self.world, self.tile_loader());
        if let Some(writer) = self.diagnostics.as_mut() {
            if let Err(err) = writer.maybe_write(&metrics) {
                warn!(tick = summary.tick, error = %err, "diagnostics write failed");
            }
        }
        self.metrics = Some(metrics);
        summary
    }

    pub fn config(&self) -> &LiveMapConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn current_tick(&self) -> u64 {
        self.engine.current_tick()
    }

    /// Metrics of the last tick.
    pub fn metrics(&self) -> Option<&FrameMetrics> {
        self.metrics.as_ref()
    }

    pub fn tile_loader(&self) -> Option<&TileLoader> {
        self.engine.get_system::<TileLoadingSystem>().map(TileLoadingSystem::loader)
    }

    /// The viewport applied by the last tick.
    pub fn viewport(&self) -> Viewport {
        self.world
            .try_get::<ViewportComponent>(self.camera)
            .map(|v| v.0)
            .unwrap_or_else(|| {
                let center = projection::map_rect().center();
                Viewport::new(self.config.viewport.size(), center, 0.0)
            })
    }

    pub fn camera(&self) -> Result<&CameraComponent> {
        Ok(self.world.get_component::<CameraComponent>(self.camera)?)
    }

    fn camera_mut(&mut self) -> Result<&mut CameraComponent> {
        Ok(self.world.get_component_mut::<CameraComponent>(self.camera)?)
    }

    /// Clamped to the configured zoom range; applied on the next tick.
    pub fn set_zoom(&mut self, zoom: f64) -> Result<()> {
        self.camera_mut()?.set_zoom(zoom);
        Ok(())
    }

    pub fn zoom_by(&mut self, delta: f64) -> Result<()> {
        let camera = self.camera_mut()?;
        let zoom = camera.zoom + delta;
        camera.set_zoom(zoom);
        Ok(())
    }

    pub fn pan_to(&mut self, center: GeoVec) -> Result<()> {
        let center = projection::geo_to_world(center)?;
        self.camera_mut()?.set_center(center);
        Ok(())
    }

    /// Move the view so the point `delta` client pixels away from the center
    /// becomes the new center.
    pub fn pan_by(&mut self, delta: ClientVec) -> Result<()> {
        let size = self.viewport().size;
        let camera = self.camera_mut()?;
        let pending = Viewport::new(size, camera.center, camera.zoom);
        let center = pending.client_to_world(size / 2.0 + delta);
        camera.set_center(center);
        Ok(())
    }

    pub fn resize(&mut self, width: f64, height: f64) -> Result<()> {
        check_viewport_size(width, height)?;
        self.world
            .get_component_mut::<ViewportComponent>(self.camera)?
            .0
            .size = ClientVec::new(width, height);
        Ok(())
    }

    pub fn add_layer(&mut self, name: &str) -> Result<Entity> {
        layers::create_layer(&mut self.world, name, LayerKind::Overlay)
    }

    pub fn remove_layer(&mut self, layer: Entity) -> Result<()> {
        layers::remove_layer(&mut self.world, layer)
    }

    pub fn add_point(&mut self, layer: Entity, index: usize, spec: &PointSpec) -> Result<Entity> {
        let name = self.names.next("point");
        chart::spawn_point(&mut self.world, name, layer, index, spec, &self.palette)
    }

    pub fn add_pie(&mut self, layer: Entity, index: usize, spec: &PieSpec) -> Result<Entity> {
        let name = self.names.next("pie");
        chart::spawn_pie(&mut self.world, name, layer, index, spec, &self.palette)
    }

    pub fn add_bar(&mut self, layer: Entity, index: usize, spec: &BarSpec) -> Result<Entity> {
        let name = self.names.next("bar");
        chart::spawn_bar(&mut self.world, name, layer, index, spec, &self.palette)
    }

    pub fn add_path(&mut self, layer: Entity, index: usize, spec: &PathSpec) -> Result<Entity> {
        let name = self.names.next("path");
        chart::spawn_path(&mut self.world, name, layer, index, spec, &self.palette)
    }

    pub fn remove_entity(&mut self, entity: Entity) -> Result<()> {
        layers::remove_from_layer(&mut self.world, entity)
    }

    /// Topmost object under the client point `(x, y)`.
    pub fn search(&self, x: f64, y: f64) -> Option<HoverObject> {
        locator::search(&self.world, &self.viewport(), ClientVec::new(x, y))
    }

    /// Paint the current frame; returns the number of entities drawn.
    pub fn render(&self, canvas: &mut dyn Canvas) -> usize {
        let viewport = self.viewport();
        let ctx = RenderContext {
            viewport: &viewport,
            tiles: self.tile_loader().map(TileLoader::cache),
        };
        render::render_frame(&self.world, &ctx, canvas)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique_per_generator() {
        let mut names = NameGenerator::default();
        assert_eq!(names.next("point"), "point_0");
        assert_eq!(names.next("pie"), "pie_1");

        let mut other = NameGenerator::default();
        assert_eq!(other.next("point"), "point_0");
    }
}
