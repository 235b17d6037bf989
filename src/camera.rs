//! Camera, viewport and zoom change detection
//!
//! The camera holds the requested fractional zoom and world-space center.
//! Each tick `CameraUpdateDetectionSystem` compares it against the last
//! applied state, classifies the change, rebuilds the viewport and tags
//! listeners with `ZoomChangedComponent` when the integer zoom moved.

use std::any::Any;

use anyhow::Result;
use tracing::{debug, trace};

use crate::ecs::{Component, ComponentSet, World};
use crate::engine::{System, SystemContext};
use crate::geometry::{
    ClientRect, ClientVec, GeoVec, Screen, ScreenRect, ScreenVec, WorldRect, WorldVec,
};
use crate::projection::{self, MapProjection, ProjectionError};

/// What is shown on screen: client size, world center and fractional zoom.
///
/// Screen space is built at `integer_zoom()`; the remaining fraction is a
/// uniform scale applied between screen and client space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub size: ClientVec,
    pub center: WorldVec,
    pub zoom: f64,
}

impl Viewport {
    pub fn new(size: ClientVec, center: WorldVec, zoom: f64) -> Self {
        Self { size, center, zoom }
    }

    pub fn integer_zoom(&self) -> i32 {
        self.zoom.floor() as i32
    }

    /// `2^(zoom - floor(zoom))`, always in `[1, 2)`.
    pub fn fraction_scale(&self) -> f64 {
        2f64.powf(self.zoom - self.zoom.floor())
    }

    /// Screen-space point at the top-left client corner.
    pub fn origin(&self) -> ScreenVec {
        let center = projection::world_to_screen(self.center, self.integer_zoom());
        center - (self.size / self.fraction_scale()).retag::<Screen>() / 2.0
    }

    pub fn client_to_screen(&self, p: ClientVec) -> ScreenVec {
        projection::client_to_screen(p / self.fraction_scale(), self.origin())
    }

    pub fn screen_to_client(&self, p: ScreenVec) -> ClientVec {
        projection::screen_to_client(p, self.origin()) * self.fraction_scale()
    }

    pub fn client_to_world(&self, p: ClientVec) -> WorldVec {
        projection::screen_to_world(self.client_to_screen(p), self.integer_zoom())
    }

    pub fn world_to_client(&self, p: WorldVec) -> ClientVec {
        self.screen_to_client(projection::world_to_screen(p, self.integer_zoom()))
    }

    pub fn geo_to_client(&self, p: GeoVec) -> Result<ClientVec, ProjectionError> {
        Ok(self.world_to_client(projection::geo_to_world(p)?))
    }

    pub fn client_to_geo(&self, p: ClientVec) -> GeoVec {
        projection::world_to_geo(self.client_to_world(p))
    }

    pub fn client_rect(&self) -> ClientRect {
        ClientRect::new(ClientVec::zero(), self.size)
    }

    /// Visible area in screen space at `integer_zoom()`.
    pub fn screen_rect(&self) -> ScreenRect {
        ScreenRect::new(self.origin(), (self.size / self.fraction_scale()).retag())
    }

    pub fn world_rect(&self) -> WorldRect {
        let rect = self.screen_rect();
        WorldRect::new(
            projection::screen_to_world(rect.origin, self.integer_zoom()),
            projection::screen_to_world(rect.dimension, self.integer_zoom()),
        )
    }

    /// Integer-zoom projection; exact only when `fraction_scale() == 1`.
    pub fn projection(&self) -> MapProjection {
        MapProjection::new(self.integer_zoom(), self.origin())
    }
}

/// Requested camera state; commands write here, the detection system reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraComponent {
    pub zoom: f64,
    pub center: WorldVec,
    pub min_zoom: f64,
    pub max_zoom: f64,
}

impl Component for CameraComponent {}

impl CameraComponent {
    pub fn new(zoom: f64, center: WorldVec, min_zoom: f64, max_zoom: f64) -> Self {
        let mut camera = Self {
            zoom,
            center,
            min_zoom,
            max_zoom,
        };
        camera.set_zoom(zoom);
        camera.set_center(center);
        camera
    }

    pub fn set_zoom(&mut self, zoom: f64) {
        if zoom.is_finite() {
            self.zoom = zoom.clamp(self.min_zoom, self.max_zoom);
        }
    }

    /// Centers outside the world square are pulled back onto it.
    pub fn set_center(&mut self, center: WorldVec) {
        if !center.is_finite() {
            return;
        }
        let map = projection::map_rect();
        self.center = WorldVec::new(
            center.x.clamp(map.left(), map.right()),
            center.y.clamp(map.top(), map.bottom()),
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub enum ZoomState {
    #[default]
    Idle,
    /// Same integer zoom, different fraction.
    ZoomFractionChanging,
    /// The integer zoom changed; screen-space geometry is stale.
    ZoomLevelChanging,
}

impl ZoomState {
    pub fn between(previous: f64, current: f64) -> Self {
        if previous.floor() != current.floor() {
            ZoomState::ZoomLevelChanging
        } else if previous != current {
            ZoomState::ZoomFractionChanging
        } else {
            ZoomState::Idle
        }
    }
}

/// What changed during the current tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CameraUpdateComponent {
    pub state: ZoomState,
    pub is_moved: bool,
    pub is_resized: bool,
    applied_zoom: Option<f64>,
    applied_center: WorldVec,
    applied_size: ClientVec,
}

impl Component for CameraUpdateComponent {}

impl CameraUpdateComponent {
    pub fn is_zoom_level_changed(&self) -> bool {
        self.state == ZoomState::ZoomLevelChanging
    }

    pub fn is_zoom_fraction_changed(&self) -> bool {
        self.state == ZoomState::ZoomFractionChanging
    }

    pub fn is_changed(&self) -> bool {
        self.state != ZoomState::Idle || self.is_moved || self.is_resized
    }
}

/// The current viewport, rebuilt from the camera every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportComponent(pub Viewport);

impl Component for ViewportComponent {}

/// Entities whose screen-space state depends on the integer zoom.
#[derive(Debug, Clone, Copy, Default)]
pub struct CameraListenerComponent;

impl Component for CameraListenerComponent {}

/// Transient tag set on listeners during a tick in which the integer zoom
/// changed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZoomChangedComponent;

impl Component for ZoomChangedComponent {}

#[derive(Default)]
pub struct CameraUpdateDetectionSystem;

impl System for CameraUpdateDetectionSystem {
    fn name(&self) -> &str {
        "CameraUpdateDetectionSystem"
    }

    fn required_components(&self) -> ComponentSet {
        ComponentSet::new()
            .with::<CameraComponent>()
            .with::<CameraUpdateComponent>()
            .with::<ViewportComponent>()
    }

    fn update(&mut self, ctx: &SystemContext<'_>, world: &mut World) -> Result<()> {
        let mut level_changed = false;
        for &entity in ctx.entities {
            let camera = world.get_component::<CameraComponent>(entity)?.clone();
            let size = world.get_component::<ViewportComponent>(entity)?.0.size;

            let update = world.get_component_mut::<CameraUpdateComponent>(entity)?;
            let previous = update.applied_zoom.unwrap_or(camera.zoom);
            update.state = ZoomState::between(previous, camera.zoom);
            update.is_moved = update.applied_center != camera.center;
            update.is_resized = update.applied_size != size;
            update.applied_zoom = Some(camera.zoom);
            update.applied_center = camera.center;
            update.applied_size = size;
            let state = update.state;
            if state != ZoomState::Idle {
                debug!(tick = ctx.tick, from = previous, to = camera.zoom, ?state, "zoom changed");
            }
            level_changed |= state == ZoomState::ZoomLevelChanging;

            world.get_component_mut::<ViewportComponent>(entity)?.0 =
                Viewport::new(size, camera.center, camera.zoom);
        }

        if level_changed {
            let listeners = world.entities_with::<CameraListenerComponent>();
            trace!(count = listeners.len(), "tagging zoom listeners");
            for listener in listeners {
                world.add_component(listener, ZoomChangedComponent)?;
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
