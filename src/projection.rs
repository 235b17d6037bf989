//! Coordinate projection pipeline
//!
//! Geographic --mercator--> World --x 2^zoom--> Screen --minus origin--> Client.
//! Every step names both spaces; there is no implicit conversion.

use std::f64::consts::PI;

use thiserror::Error;

use crate::geometry::{ClientVec, GeoVec, ScreenVec, WorldRect, WorldVec};

/// Side of the world square, in world units (and in pixels at zoom 0).
pub const TILE_PIXEL_SIZE: f64 = 256.0;

/// Latitude at which the spherical Mercator square ends.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum ProjectionError {
    #[error("latitude {0} is outside the Mercator range")]
    InvalidLatitude(f64),
}

/// The whole projected map in world space.
pub fn map_rect() -> WorldRect {
    WorldRect::new(WorldVec::zero(), WorldVec::new(TILE_PIXEL_SIZE, TILE_PIXEL_SIZE))
}

pub fn clamp_latitude(lat: f64) -> f64 {
    lat.clamp(-MAX_LATITUDE, MAX_LATITUDE)
}

/// Spherical Mercator, y grows southward.
pub fn geo_to_world(p: GeoVec) -> Result<WorldVec, ProjectionError> {
    if !(-MAX_LATITUDE..=MAX_LATITUDE).contains(&p.y) || p.y.is_nan() {
        return Err(ProjectionError::InvalidLatitude(p.y));
    }
    let x = (p.x + 180.0) / 360.0 * TILE_PIXEL_SIZE;
    let lat = p.y.to_radians();
    let merc = (PI / 4.0 + lat / 2.0).tan().ln();
    let y = (1.0 - merc / PI) / 2.0 * TILE_PIXEL_SIZE;
    Ok(WorldVec::new(x, y))
}

pub fn world_to_geo(p: WorldVec) -> GeoVec {
    let lon = p.x / TILE_PIXEL_SIZE * 360.0 - 180.0;
    let merc = (1.0 - 2.0 * p.y / TILE_PIXEL_SIZE) * PI;
    let lat = merc.sinh().atan().to_degrees();
    GeoVec::new(lon, lat)
}

/// Geographic input from users: clamp latitude instead of failing.
pub fn geo_to_world_clamped(p: GeoVec) -> WorldVec {
    let clamped = GeoVec::new(p.x, clamp_latitude(p.y));
    // clamped latitude is always inside the valid domain
    geo_to_world(clamped).unwrap_or_else(|_| WorldVec::zero())
}

pub fn zoom_factor(zoom: i32) -> f64 {
    2f64.powi(zoom)
}

pub fn world_to_screen(p: WorldVec, zoom: i32) -> ScreenVec {
    (p * zoom_factor(zoom)).retag()
}

pub fn screen_to_world(p: ScreenVec, zoom: i32) -> WorldVec {
    (p / zoom_factor(zoom)).retag()
}

pub fn screen_to_client(p: ScreenVec, origin: ScreenVec) -> ClientVec {
    (p - origin).retag()
}

pub fn client_to_screen(p: ClientVec, origin: ScreenVec) -> ScreenVec {
    p.retag::<crate::geometry::Screen>() + origin
}

/// The full pipeline for one integer zoom and viewport origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapProjection {
    pub zoom: i32,
    pub origin: ScreenVec,
}

impl MapProjection {
    pub fn new(zoom: i32, origin: ScreenVec) -> Self {
        Self { zoom, origin }
    }

    pub fn geo_to_client(&self, p: GeoVec) -> Result<ClientVec, ProjectionError> {
        let world = geo_to_world(p)?;
        Ok(self.world_to_client(world))
    }

    pub fn world_to_client(&self, p: WorldVec) -> ClientVec {
        screen_to_client(world_to_screen(p, self.zoom), self.origin)
    }

    pub fn client_to_world(&self, p: ClientVec) -> WorldVec {
        screen_to_world(client_to_screen(p, self.origin), self.zoom)
    }

    pub fn client_to_geo(&self, p: ClientVec) -> GeoVec {
        world_to_geo(self.client_to_world(p))
    }
}
