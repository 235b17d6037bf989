use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use super::cell_key::CellKey;
use super::loader::TileLoader;
use super::TileState;
use crate::camera::{CameraListenerComponent, CameraUpdateComponent, ViewportComponent};
use crate::ecs::{Component, ComponentSet, Entity, World};
use crate::engine::{System, SystemContext};
use crate::layers::{self, BasemapLayerComponent};
use crate::placement::{ScaleComponent, WorldDimensionComponent, WorldOriginComponent};
use crate::render::{RendererComponent, TileRenderer};

/// Singleton: the keys covering the current viewport.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestTilesComponent {
    pub keys: BTreeSet<CellKey>,
    pub zoom: i32,
    /// Bumped on every recomputation.
    pub generation: u64,
}

impl Component for RequestTilesComponent {}

/// The cell a tile entity stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellComponent(pub CellKey);

impl Component for CellComponent {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TileComponent {
    pub state: TileState,
}

impl Component for TileComponent {}

#[derive(Default)]
pub struct CellStateUpdateSystem;

impl System for CellStateUpdateSystem {
    fn name(&self) -> &str {
        "CellStateUpdateSystem"
    }

    fn required_components(&self) -> ComponentSet {
        ComponentSet::new().with::<RequestTilesComponent>()
    }

    fn update(&mut self, ctx: &SystemContext<'_>, world: &mut World) -> Result<()> {
        let changed = world.singleton_component::<CameraUpdateComponent>()?.is_changed();
        let viewport = world.singleton_component::<ViewportComponent>()?.0;
        for &entity in ctx.entities {
            let request = world.get_component_mut::<RequestTilesComponent>(entity)?;
            if !changed && request.generation > 0 {
                continue;
            }
            let zoom = viewport.integer_zoom().max(0);
            request.keys = CellKey::covering(&viewport.world_rect(), zoom as usize);
            request.zoom = zoom;
            request.generation += 1;
            debug!(
                tick = ctx.tick,
                zoom,
                cells = request.keys.len(),
                generation = request.generation,
                "needed cells recomputed"
            );
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Drives the loader and keeps one tile entity per needed cell in the
/// basemap layer.
pub struct TileLoadingSystem {
    loader: TileLoader,
}

impl TileLoadingSystem {
    pub fn new(loader: TileLoader) -> Self {
        Self { loader }
    }

    /// Read-only view; the cache is only ever mutated by the loader.
    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    fn spawn_tile(world: &mut World, basemap: Entity, key: &CellKey, zoom: i32) -> Result<Entity> {
        let rect = key.world_rect();
        let tile = world.create_entity(format!("tile_{key}"));
        world.add_component(tile, CellComponent(key.clone()))?;
        world.add_component(tile, TileComponent::default())?;
        world.add_component(tile, WorldOriginComponent(rect.origin))?;
        world.add_component(tile, WorldDimensionComponent(rect.dimension))?;
        world.add_component(tile, ScaleComponent::new(key.zoom() as i32, zoom))?;
        world.add_component(tile, CameraListenerComponent)?;
        world.add_component(tile, RendererComponent(Arc::new(TileRenderer)))?;
        layers::add_to_layer(world, basemap, tile)?;
        Ok(tile)
    }
}

impl System for TileLoadingSystem {
    fn name(&self) -> &str {
        "TileLoadingSystem"
    }

    fn required_components(&self) -> ComponentSet {
        ComponentSet::new().with::<CellComponent>().with::<TileComponent>()
    }

    fn update(&mut self, ctx: &SystemContext<'_>, world: &mut World) -> Result<()> {
        let request = world.singleton_component::<RequestTilesComponent>()?;
        let (needed, generation) = (request.keys.clone(), request.generation);
        let zoom = world.singleton_component::<ViewportComponent>()?.0.integer_zoom();
        let basemap = world
            .singleton::<BasemapLayerComponent>()
            .context("tile loading needs a basemap layer")?;

        self.loader.sync(&needed, generation, ctx.tick);

        let mut existing: HashMap<CellKey, Entity> = HashMap::with_capacity(ctx.entities.len());
        for &entity in ctx.entities {
            let key = world.get_component::<CellComponent>(entity)?.0.clone();
            if needed.contains(&key) {
                existing.insert(key, entity);
            } else {
                layers::remove_from_layer(world, entity)?;
            }
        }
        for key in &needed {
            if !existing.contains_key(key) {
                let tile = Self::spawn_tile(world, basemap, key, zoom)?;
                existing.insert(key.clone(), tile);
            }
        }
        for (key, entity) in &existing {
            world.get_component_mut::<TileComponent>(*entity)?.state = self.loader.state(key);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
