//! World-to-screen placement of map entities
//!
//! Entities are authored in world space. These systems keep their
//! screen-space mirrors current for the viewport's integer zoom: they run for
//! entities tagged `ZoomChangedComponent` and for entities that have no
//! screen state yet.

use std::any::Any;

use anyhow::Result;

use crate::camera::{
    CameraListenerComponent, CameraUpdateComponent, ViewportComponent, ZoomChangedComponent,
    ZoomState,
};
use crate::ecs::{Component, ComponentSet, Entity, World};
use crate::engine::{System, SystemContext};
use crate::geometry::{Client, ClientRect, LocalRect, ScreenRect, ScreenVec, WorldVec};
use crate::projection::{self, zoom_factor};

/// Ratio between the current integer zoom and the zoom at which an entity's
/// screen geometry was built: `scale = 2^(current - zoom)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleComponent {
    pub scale: f64,
    pub zoom: i32,
}

impl Component for ScaleComponent {}

impl ScaleComponent {
    pub fn new(zoom: i32, current_zoom: i32) -> Self {
        Self {
            scale: zoom_factor(current_zoom - zoom),
            zoom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldOriginComponent(pub WorldVec);

impl Component for WorldOriginComponent {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenOriginComponent(pub ScreenVec);

impl Component for ScreenOriginComponent {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldDimensionComponent(pub WorldVec);

impl Component for WorldDimensionComponent {}

/// Screen size at `ScaleComponent::zoom` (or the current zoom when the
/// entity has no scale).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenDimensionComponent(pub ScreenVec);

impl Component for ScreenDimensionComponent {}

/// Absolute world-space polyline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorldGeometryComponent(pub Vec<WorldVec>);

impl Component for WorldGeometryComponent {}

/// The polyline in screen space, relative to the entity's screen origin.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScreenGeometryComponent(pub Vec<ScreenVec>);

impl Component for ScreenGeometryComponent {}

/// Pixel-sized symbol bounds around the anchor; not affected by zoom.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolExtentComponent(pub LocalRect);

impl Component for SymbolExtentComponent {}

/// Present while some part of the entity overlaps the viewport.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisibleComponent;

impl Component for VisibleComponent {}

fn needs_placement<T: Component>(world: &World, entity: Entity) -> bool {
    world.has_component::<ZoomChangedComponent>(entity) || !world.has_component::<T>(entity)
}

#[derive(Default)]
pub struct ScaleUpdateSystem;

impl System for ScaleUpdateSystem {
    fn name(&self) -> &str {
        "ScaleUpdateSystem"
    }

    fn required_components(&self) -> ComponentSet {
        ComponentSet::new().with::<ScaleComponent>()
    }

    fn update(&mut self, ctx: &SystemContext<'_>, world: &mut World) -> Result<()> {
        if world.singleton_component::<CameraUpdateComponent>()?.state == ZoomState::Idle {
            return Ok(());
        }
        let zoom = world.singleton_component::<ViewportComponent>()?.0.integer_zoom();
        for &entity in ctx.entities {
            let scale = world.get_component_mut::<ScaleComponent>(entity)?;
            scale.scale = zoom_factor(zoom - scale.zoom);
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

#[derive(Default)]
pub struct WorldOrigin2ScreenUpdateSystem;

impl System for WorldOrigin2ScreenUpdateSystem {
    fn name(&self) -> &str {
        "WorldOrigin2ScreenUpdateSystem"
    }

    fn required_components(&self) -> ComponentSet {
        ComponentSet::new()
            .with::<WorldOriginComponent>()
            .with::<CameraListenerComponent>()
    }

    fn update(&mut self, ctx: &SystemContext<'_>, world: &mut World) -> Result<()> {
        let zoom = world.singleton_component::<ViewportComponent>()?.0.integer_zoom();
        for &entity in ctx.entities {
            if !needs_placement::<ScreenOriginComponent>(world, entity) {
                continue;
            }
            let origin = world.get_component::<WorldOriginComponent>(entity)?.0;
            world.add_component(
                entity,
                ScreenOriginComponent(projection::world_to_screen(origin, zoom)),
            )?;
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

/// Screen dimensions follow the entity's own scale zoom when it has one, so a
/// tile keeps its native pixel size and is stretched by `ScaleComponent`.
/// Must run after `WorldGeometry2ScreenUpdateSystem`, which moves a rebuilt
/// polyline's scale zoom to the current level.
#[derive(Default)]
pub struct WorldDimension2ScreenUpdateSystem;

impl System for WorldDimension2ScreenUpdateSystem {
    fn name(&self) -> &str {
        "WorldDimension2ScreenUpdateSystem"
    }

    fn required_components(&self) -> ComponentSet {
        ComponentSet::new()
            .with::<WorldDimensionComponent>()
            .with::<CameraListenerComponent>()
    }

    fn update(&mut self, ctx: &SystemContext<'_>, world: &mut World) -> Result<()> {
        let zoom = world.singleton_component::<ViewportComponent>()?.0.integer_zoom();
        for &entity in ctx.entities {
            if !needs_placement::<ScreenDimensionComponent>(world, entity) {
                continue;
            }
            let dimension = world.get_component::<WorldDimensionComponent>(entity)?.0;
            let at = world.try_get::<ScaleComponent>(entity).map_or(zoom, |s| s.zoom);
            world.add_component(
                entity,
                ScreenDimensionComponent(projection::world_to_screen(dimension, at)),
            )?;
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

/// Rebuilds polylines at the current zoom and resets their scale to 1.
#[derive(Default)]
pub struct WorldGeometry2ScreenUpdateSystem;

impl System for WorldGeometry2ScreenUpdateSystem {
    fn name(&self) -> &str {
        "WorldGeometry2ScreenUpdateSystem"
    }

    fn required_components(&self) -> ComponentSet {
        ComponentSet::new()
            .with::<WorldGeometryComponent>()
            .with::<WorldOriginComponent>()
            .with::<CameraListenerComponent>()
    }

    fn update(&mut self, ctx: &SystemContext<'_>, world: &mut World) -> Result<()> {
        let zoom = world.singleton_component::<ViewportComponent>()?.0.integer_zoom();
        for &entity in ctx.entities {
            if !needs_placement::<ScreenGeometryComponent>(world, entity) {
                continue;
            }
            let world_origin = world.get_component::<WorldOriginComponent>(entity)?.0;
            let origin = projection::world_to_screen(world_origin, zoom);
            let points = world
                .get_component::<WorldGeometryComponent>(entity)?
                .0
                .iter()
                .map(|p| projection::world_to_screen(*p, zoom) - origin)
                .collect();
            world.add_component(entity, ScreenGeometryComponent(points))?;
            world.add_component(entity, ScaleComponent::new(zoom, zoom))?;
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

/// Screen-space bounds of a placed entity, if it has been placed.
pub fn screen_bounds(world: &World, entity: Entity) -> Option<ScreenRect> {
    let origin = world.try_get::<ScreenOriginComponent>(entity)?.0;
    let dimension = world
        .try_get::<ScreenDimensionComponent>(entity)
        .map_or(ScreenVec::zero(), |d| d.0);
    let scale = world.try_get::<ScaleComponent>(entity).map_or(1.0, |s| s.scale);
    Some(ScreenRect::new(origin, dimension * scale))
}

#[derive(Default)]
pub struct VisibilityUpdateSystem;

impl System for VisibilityUpdateSystem {
    fn name(&self) -> &str {
        "VisibilityUpdateSystem"
    }

    fn required_components(&self) -> ComponentSet {
        ComponentSet::new().with::<ScreenOriginComponent>()
    }

    fn update(&mut self, ctx: &SystemContext<'_>, world: &mut World) -> Result<()> {
        let viewport = world.singleton_component::<ViewportComponent>()?.0;
        let screen_view = viewport.screen_rect();
        let client_view = viewport.client_rect();
        for &entity in ctx.entities {
            let Some(bounds) = screen_bounds(world, entity) else {
                continue;
            };
            let visible = if let Some(extent) = world.try_get::<SymbolExtentComponent>(entity) {
                let anchor = viewport.screen_to_client(bounds.origin);
                let symbol = ClientRect::new(
                    anchor + extent.0.origin.retag::<Client>(),
                    extent.0.dimension.retag(),
                );
                symbol.intersects(&client_view)
            } else if bounds.width() > 0.0 || bounds.height() > 0.0 {
                bounds.intersects(&screen_view)
            } else {
                screen_view.contains(bounds.origin)
            };
            match (visible, world.has_component::<VisibleComponent>(entity)) {
                (true, false) => world.add_component(entity, VisibleComponent)?,
                (false, true) => {
                    world.remove_component::<VisibleComponent>(entity)?;
                }
                _ => {}
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraComponent, CameraUpdateDetectionSystem, Viewport};
    use crate::engine::{Engine, EngineBuilder};
    use crate::geometry::{ClientVec, LocalVec};

    fn setup(zoom: f64) -> (World, Entity, Engine) {
        let mut world = World::new();
        let center = WorldVec::new(128.0, 128.0);
        let camera = world.create_entity("camera");
        world
            .add_component(camera, CameraComponent::new(zoom, center, 0.0, 18.0))
            .unwrap();
        world.add_component(camera, CameraUpdateComponent::default()).unwrap();
        world
            .add_component(
                camera,
                ViewportComponent(Viewport::new(ClientVec::new(256.0, 256.0), center, zoom)),
            )
            .unwrap();
        let engine = EngineBuilder::new()
            .with_system(CameraUpdateDetectionSystem)
            .with_system(ScaleUpdateSystem)
            .with_system(WorldOrigin2ScreenUpdateSystem)
            .with_system(WorldGeometry2ScreenUpdateSystem)
            .with_system(WorldDimension2ScreenUpdateSystem)
            .with_system(VisibilityUpdateSystem)
            .with_transient::<ZoomChangedComponent>()
            .build();
        (world, camera, engine)
    }

    fn set_zoom(world: &mut World, camera: Entity, zoom: f64) {
        world.get_component_mut::<CameraComponent>(camera).unwrap().set_zoom(zoom);
    }

    #[test]
    fn scale_follows_integer_zoom() {
        let (mut world, camera, mut engine) = setup(2.0);
        let tile = world.create_entity("tile");
        world.add_component(tile, ScaleComponent::new(2, 2)).unwrap();
        engine.tick(&mut world, 16.0);
        assert_eq!(world.get_component::<ScaleComponent>(tile).unwrap().scale, 1.0);

        set_zoom(&mut world, camera, 3.7);
        engine.tick(&mut world, 16.0);
        assert_eq!(world.get_component::<ScaleComponent>(tile).unwrap().scale, 2.0);

        set_zoom(&mut world, camera, 1.2);
        engine.tick(&mut world, 16.0);
        assert_eq!(world.get_component::<ScaleComponent>(tile).unwrap().scale, 0.5);
    }

    #[test]
    fn screen_origin_recomputed_only_on_level_change() {
        let (mut world, camera, mut engine) = setup(1.0);
        let point = world.create_entity("point");
        world
            .add_component(point, WorldOriginComponent(WorldVec::new(10.0, 20.0)))
            .unwrap();
        world.add_component(point, CameraListenerComponent).unwrap();
        engine.tick(&mut world, 16.0);
        assert_eq!(
            world.get_component::<ScreenOriginComponent>(point).unwrap().0,
            ScreenVec::new(20.0, 40.0)
        );

        set_zoom(&mut world, camera, 1.5);
        engine.tick(&mut world, 16.0);
        assert_eq!(
            world.get_component::<ScreenOriginComponent>(point).unwrap().0,
            ScreenVec::new(20.0, 40.0)
        );

        set_zoom(&mut world, camera, 3.0);
        engine.tick(&mut world, 16.0);
        assert_eq!(
            world.get_component::<ScreenOriginComponent>(point).unwrap().0,
            ScreenVec::new(80.0, 160.0)
        );
    }

    #[test]
    fn geometry_is_relative_to_origin_and_resets_scale() {
        let (mut world, camera, mut engine) = setup(0.0);
        let path = world.create_entity("path");
        world.add_component(path, WorldOriginComponent(WorldVec::new(10.0, 10.0))).unwrap();
        world
            .add_component(
                path,
                WorldGeometryComponent(vec![WorldVec::new(10.0, 10.0), WorldVec::new(20.0, 15.0)]),
            )
            .unwrap();
        world.add_component(path, CameraListenerComponent).unwrap();
        engine.tick(&mut world, 16.0);

        set_zoom(&mut world, camera, 2.0);
        engine.tick(&mut world, 16.0);
        let geometry = world.get_component::<ScreenGeometryComponent>(path).unwrap();
        assert_eq!(geometry.0, vec![ScreenVec::zero(), ScreenVec::new(40.0, 20.0)]);
        let scale = world.get_component::<ScaleComponent>(path).unwrap();
        assert_eq!((scale.zoom, scale.scale), (2, 1.0));
    }

    #[test]
    fn polyline_bounds_follow_a_level_change() {
        let (mut world, camera, mut engine) = setup(0.0);
        let path = world.create_entity("path");
        world.add_component(path, WorldOriginComponent(WorldVec::new(64.0, 128.0))).unwrap();
        world
            .add_component(path, WorldDimensionComponent(WorldVec::new(128.0, 0.0)))
            .unwrap();
        world
            .add_component(
                path,
                WorldGeometryComponent(vec![
                    WorldVec::new(64.0, 128.0),
                    WorldVec::new(192.0, 128.0),
                ]),
            )
            .unwrap();
        world.add_component(path, CameraListenerComponent).unwrap();
        engine.tick(&mut world, 16.0);
        assert!(world.has_component::<VisibleComponent>(path));

        // zoom 3 around world x 184 shows screen x 1344..1600
        let cam = world.get_component_mut::<CameraComponent>(camera).unwrap();
        cam.set_zoom(3.0);
        cam.set_center(WorldVec::new(184.0, 128.0));
        engine.tick(&mut world, 16.0);

        assert_eq!(
            world.get_component::<ScreenDimensionComponent>(path).unwrap().0,
            ScreenVec::new(1024.0, 0.0)
        );
        let bounds = screen_bounds(&world, path).unwrap();
        assert_eq!((bounds.left(), bounds.right()), (512.0, 1536.0));
        assert!(world.has_component::<VisibleComponent>(path));
    }

    #[test]
    fn visibility_tracks_viewport() {
        let (mut world, camera, mut engine) = setup(1.0);
        // viewport at zoom 1 shows world 64..192
        let inside = world.create_entity("inside");
        world.add_component(inside, WorldOriginComponent(WorldVec::new(100.0, 100.0))).unwrap();
        world.add_component(inside, CameraListenerComponent).unwrap();

        let outside = world.create_entity("outside");
        world.add_component(outside, WorldOriginComponent(WorldVec::new(10.0, 10.0))).unwrap();
        world.add_component(outside, CameraListenerComponent).unwrap();

        let symbol = world.create_entity("symbol");
        world.add_component(symbol, WorldOriginComponent(WorldVec::new(60.0, 100.0))).unwrap();
        world.add_component(symbol, CameraListenerComponent).unwrap();
        let extent = LocalRect::centered(LocalVec::zero(), LocalVec::new(20.0, 20.0));
        world
            .add_component(symbol, SymbolExtentComponent(extent))
            .unwrap();

        engine.tick(&mut world, 16.0);
        assert!(world.has_component::<VisibleComponent>(inside));
        assert!(!world.has_component::<VisibleComponent>(outside));
        assert!(world.has_component::<VisibleComponent>(symbol));

        world
            .get_component_mut::<CameraComponent>(camera)
            .unwrap()
            .set_center(WorldVec::new(20.0, 20.0));
        engine.tick(&mut world, 16.0);
        assert!(!world.has_component::<VisibleComponent>(inside));
        assert!(world.has_component::<VisibleComponent>(outside));
    }
}
