//! Pointer hit-testing
//!
//! Candidates are tested front to back (reverse draw order) and the search
//! stops at the first hit. Inside a multi-part symbol the parts are tested in
//! reverse draw order too, so the part painted last wins.

use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::Arc;

use serde::Serialize;

use crate::camera::Viewport;
use crate::chart::{BarComponent, ObjectIndexComponent, PathComponent, PieComponent, PointComponent};
use crate::ecs::{Component, Entity, World};
use crate::geometry::{distance_to_segment, ClientVec, Local};
use crate::layers;
use crate::placement::{
    ScaleComponent, ScreenGeometryComponent, ScreenOriginComponent, VisibleComponent,
};

/// What the pointer is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HoverObject {
    pub entity: Entity,
    pub layer_index: usize,
    /// Index of the object inside its layer's data.
    pub index: usize,
    /// Sub-part (pie sector, bar segment); 0 for single-part symbols.
    pub part: usize,
}

pub trait Locator: Send + Sync {
    /// The hit part of `entity`, if `pointer` is over it.
    fn hit(
        &self,
        pointer: ClientVec,
        entity: Entity,
        world: &World,
        viewport: &Viewport,
    ) -> Option<usize>;
}

#[derive(Clone)]
pub struct LocatorComponent(pub Arc<dyn Locator>);

impl Component for LocatorComponent {}

fn anchor(world: &World, entity: Entity, viewport: &Viewport) -> Option<ClientVec> {
    let origin = world.try_get::<ScreenOriginComponent>(entity)?.0;
    Some(viewport.screen_to_client(origin))
}

pub struct PointLocator;

impl Locator for PointLocator {
    fn hit(
        &self,
        pointer: ClientVec,
        entity: Entity,
        world: &World,
        viewport: &Viewport,
    ) -> Option<usize> {
        let point = world.try_get::<PointComponent>(entity)?;
        let center = anchor(world, entity, viewport)?;
        ((pointer - center).length() <= point.radius + point.stroke_width / 2.0).then_some(0)
    }
}

pub struct PieLocator;

impl Locator for PieLocator {
    fn hit(
        &self,
        pointer: ClientVec,
        entity: Entity,
        world: &World,
        viewport: &Viewport,
    ) -> Option<usize> {
        let pie = world.try_get::<PieComponent>(entity)?;
        let local = pointer - anchor(world, entity, viewport)?;
        if local.length() > pie.radius {
            return None;
        }
        let mut angle = local.y.atan2(local.x);
        if angle < -FRAC_PI_2 {
            angle += 2.0 * PI;
        }
        pie.sectors
            .iter()
            .rev()
            .find(|sector| sector.contains_angle(angle))
            .map(|sector| sector.index)
    }
}

pub struct BarLocator;

impl Locator for BarLocator {
    fn hit(
        &self,
        pointer: ClientVec,
        entity: Entity,
        world: &World,
        viewport: &Viewport,
    ) -> Option<usize> {
        let bars = world.try_get::<BarComponent>(entity)?;
        let local = (pointer - anchor(world, entity, viewport)?).retag::<Local>();
        bars.segments
            .iter()
            .rev()
            .find(|segment| segment.rect.contains(local))
            .map(|segment| segment.index)
    }
}

/// Hits within half the stroke width plus `tolerance` pixels of any segment.
pub struct PathLocator {
    pub tolerance: f64,
}

impl Default for PathLocator {
    fn default() -> Self {
        Self { tolerance: 3.0 }
    }
}

impl Locator for PathLocator {
    fn hit(
        &self,
        pointer: ClientVec,
        entity: Entity,
        world: &World,
        viewport: &Viewport,
    ) -> Option<usize> {
        let path = world.try_get::<PathComponent>(entity)?;
        let geometry = world.try_get::<ScreenGeometryComponent>(entity)?;
        let origin = world.try_get::<ScreenOriginComponent>(entity)?.0;
        let scale = world.try_get::<ScaleComponent>(entity).map_or(1.0, |s| s.scale);
        let points: Vec<ClientVec> = geometry
            .0
            .iter()
            .map(|p| viewport.screen_to_client(origin + *p * scale))
            .collect();
        let reach = path.stroke_width / 2.0 + self.tolerance;
        let hit = match points.as_slice() {
            [] => false,
            [only] => (pointer - *only).length() <= reach,
            _ => points
                .windows(2)
                .any(|w| distance_to_segment(pointer, w[0], w[1]) <= reach),
        };
        hit.then_some(0)
    }
}

/// Test `candidates`, given front to back, and return the first hit.
pub fn search_candidates(
    world: &World,
    viewport: &Viewport,
    pointer: ClientVec,
    candidates: impl IntoIterator<Item = (usize, Entity)>,
) -> Option<HoverObject> {
    for (layer_index, entity) in candidates {
        let Some(locator) = world.try_get::<LocatorComponent>(entity) else {
            continue;
        };
        if let Some(part) = locator.0.hit(pointer, entity, world, viewport) {
            return Some(HoverObject {
                entity,
                layer_index,
                index: world.try_get::<ObjectIndexComponent>(entity).map_or(0, |i| i.0),
                part,
            });
        }
    }
    None
}

/// Hit-test every visible overlay entity, topmost first.
pub fn search(world: &World, viewport: &Viewport, pointer: ClientVec) -> Option<HoverObject> {
    let candidates = layers::render_order(world)
        .into_iter()
        .rev()
        .filter(|(_, entity)| world.has_component::<VisibleComponent>(*entity));
    search_candidates(world, viewport, pointer, candidates)
}
