//! Overlay symbols: points, pies, bars and paths
//!
//! Each `*Spec` is the serializable description used by scenarios and the
//! `LiveMap` API; `spawn_*` turns one into an entity inside a layer.

use std::f64::consts::{FRAC_PI_2, PI};
use std::fmt;
use std::sync::Arc;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::CameraListenerComponent;
use crate::ecs::{Component, Entity, World};
use crate::geometry::{GeoVec, LocalRect, LocalVec, WorldVec};
use crate::layers;
use crate::locator::{BarLocator, LocatorComponent, PathLocator, PieLocator, PointLocator};
use crate::placement::{
    SymbolExtentComponent, WorldDimensionComponent, WorldGeometryComponent, WorldOriginComponent,
};
use crate::projection;
use crate::render::{BarRenderer, PathRenderer, PieRenderer, PointRenderer, RendererComponent};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid color '{0}', expected #rgb, #rrggbb or #rrggbbaa")]
pub struct ColorError(String);

/// sRGB color with alpha; serialized as a hex string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::rgba(r, g, b, 255)
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn parse(text: &str) -> Result<Self, ColorError> {
        let err = || ColorError(text.to_string());
        let hex = text.strip_prefix('#').ok_or_else(err)?;
        if !hex.is_ascii() {
            return Err(err());
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| err());
        let nibble = |i: usize| {
            u8::from_str_radix(&hex[i..i + 1], 16)
                .map(|v| v * 17)
                .map_err(|_| err())
        };
        match hex.len() {
            3 => Ok(Self::rgb(nibble(0)?, nibble(1)?, nibble(2)?)),
            6 => Ok(Self::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Ok(Self::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => Err(err()),
        }
    }

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl fmt::Debug for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Color {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Color::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

/// Colors handed out by index, wrapping around.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette(pub Vec<Color>);

impl Default for Palette {
    fn default() -> Self {
        Palette(vec![
            Color::rgb(0x1f, 0x77, 0xb4),
            Color::rgb(0xff, 0x7f, 0x0e),
            Color::rgb(0x2c, 0xa0, 0x2c),
            Color::rgb(0xd6, 0x27, 0x28),
            Color::rgb(0x94, 0x67, 0xbd),
            Color::rgb(0x8c, 0x56, 0x4b),
            Color::rgb(0xe3, 0x77, 0xc2),
            Color::rgb(0x7f, 0x7f, 0x7f),
        ])
    }
}

impl Palette {
    pub fn color(&self, index: usize) -> Color {
        if self.0.is_empty() {
            Color::BLACK
        } else {
            self.0[index % self.0.len()]
        }
    }
}

/// Position of the source object inside its layer's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectIndexComponent(pub usize);

impl Component for ObjectIndexComponent {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointComponent {
    pub radius: f64,
    pub fill: Color,
    pub stroke: Color,
    pub stroke_width: f64,
}

impl Component for PointComponent {}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PieSector {
    /// Index into the values the pie was built from.
    pub index: usize,
    pub value: f64,
    pub color: Color,
    pub start_angle: f64,
    pub end_angle: f64,
}

impl PieSector {
    /// `angle` must be normalized to `[-PI/2, 3PI/2)`.
    pub fn contains_angle(&self, angle: f64) -> bool {
        angle >= self.start_angle && angle < self.end_angle
    }
}

/// Sectors run clockwise from 12 o'clock.
#[derive(Debug, Clone, PartialEq)]
pub struct PieComponent {
    pub radius: f64,
    pub sectors: Vec<PieSector>,
}

impl Component for PieComponent {}

impl PieComponent {
    /// Non-positive and non-finite values get no sector.
    pub fn new(radius: f64, values: &[f64], palette: &Palette) -> Self {
        let total: f64 = values.iter().filter(|v| v.is_finite() && **v > 0.0).sum();
        let mut sectors = Vec::with_capacity(values.len());
        let mut angle = -FRAC_PI_2;
        if total > 0.0 {
            for (index, value) in values.iter().copied().enumerate() {
                if !(value.is_finite() && value > 0.0) {
                    continue;
                }
                let sweep = value / total * 2.0 * PI;
                sectors.push(PieSector {
                    index,
                    value,
                    color: palette.color(index),
                    start_angle: angle,
                    end_angle: angle + sweep,
                });
                angle += sweep;
            }
        }
        if let Some(last) = sectors.last_mut() {
            // absorb rounding so the circle closes exactly
            last.end_angle = 3.0 * FRAC_PI_2;
        }
        Self { radius, sectors }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarSegment {
    pub index: usize,
    pub value: f64,
    pub color: Color,
    /// Relative to the anchor; bars grow upward from it.
    pub rect: LocalRect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarLayout {
    #[default]
    Stacked,
    SideBySide,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarComponent {
    pub segments: Vec<BarSegment>,
}

impl Component for BarComponent {}

impl BarComponent {
    /// `max_value` maps to `max_height` pixels. Stacked bars share one column
    /// of `width`; side-by-side bars each get `width`, centered as a group.
    pub fn new(
        values: &[f64],
        layout: BarLayout,
        width: f64,
        max_value: f64,
        max_height: f64,
        palette: &Palette,
    ) -> Self {
        let unit = if max_value > 0.0 { max_height / max_value } else { 0.0 };
        let mut segments = Vec::with_capacity(values.len());
        let mut stacked = 0.0;
        let group = width * values.len() as f64;
        for (index, value) in values.iter().copied().enumerate() {
            if !(value.is_finite() && value > 0.0) {
                continue;
            }
            let height = value * unit;
            let rect = match layout {
                BarLayout::Stacked => {
                    let rect = LocalRect::new(
                        LocalVec::new(-width / 2.0, -stacked - height),
                        LocalVec::new(width, height),
                    );
                    stacked += height;
                    rect
                }
                BarLayout::SideBySide => LocalRect::new(
                    LocalVec::new(-group / 2.0 + width * index as f64, -height),
                    LocalVec::new(width, height),
                ),
            };
            segments.push(BarSegment {
                index,
                value,
                color: palette.color(index),
                rect,
            });
        }
        Self { segments }
    }

    pub fn extent(&self) -> LocalRect {
        let mut iter = self.segments.iter();
        let Some(first) = iter.next() else {
            return LocalRect::new(LocalVec::zero(), LocalVec::zero());
        };
        let rect = &first.rect;
        let (mut l, mut t, mut r, mut b) = (rect.left(), rect.top(), rect.right(), rect.bottom());
        for segment in iter {
            l = l.min(segment.rect.left());
            t = t.min(segment.rect.top());
            r = r.max(segment.rect.right());
            b = b.max(segment.rect.bottom());
        }
        LocalRect::from_ltrb(l, t, r, b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathComponent {
    pub stroke_width: f64,
    pub color: Color,
}

impl Component for PathComponent {}

fn default_radius() -> f64 {
    6.0
}

fn default_stroke_width() -> f64 {
    2.0
}

fn default_bar_width() -> f64 {
    8.0
}

fn default_max_height() -> f64 {
    60.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSpec {
    pub lon: f64,
    pub lat: f64,
    #[serde(default = "default_radius")]
    pub radius: f64,
    #[serde(default)]
    pub fill: Option<Color>,
    #[serde(default)]
    pub stroke: Option<Color>,
    #[serde(default)]
    pub stroke_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieSpec {
    pub lon: f64,
    pub lat: f64,
    #[serde(default = "default_radius")]
    pub radius: f64,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarSpec {
    pub lon: f64,
    pub lat: f64,
    pub values: Vec<f64>,
    #[serde(default)]
    pub layout: BarLayout,
    #[serde(default = "default_bar_width")]
    pub width: f64,
    #[serde(default = "default_max_height")]
    pub max_height: f64,
    /// Value drawn at `max_height`; defaults to the sum (stacked) or the
    /// largest value (side by side).
    #[serde(default)]
    pub max_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSpec {
    /// `[lon, lat]` pairs.
    pub coordinates: Vec<[f64; 2]>,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,
    #[serde(default)]
    pub color: Option<Color>,
}

fn anchor(
    world: &mut World,
    name: String,
    layer: Entity,
    index: usize,
    lon: f64,
    lat: f64,
) -> Result<Entity> {
    let origin = projection::geo_to_world(GeoVec::new(lon, lat))?;
    let entity = world.create_entity(name);
    world.add_component(entity, WorldOriginComponent(origin))?;
    world.add_component(entity, CameraListenerComponent)?;
    world.add_component(entity, ObjectIndexComponent(index))?;
    layers::add_to_layer(world, layer, entity)?;
    Ok(entity)
}

pub fn spawn_point(
    world: &mut World,
    name: String,
    layer: Entity,
    index: usize,
    spec: &PointSpec,
    palette: &Palette,
) -> Result<Entity> {
    if !(spec.radius.is_finite() && spec.radius > 0.0) {
        bail!("point radius must be positive, got {}", spec.radius);
    }
    let entity = anchor(world, name, layer, index, spec.lon, spec.lat)?;
    let point = PointComponent {
        radius: spec.radius,
        fill: spec.fill.unwrap_or_else(|| palette.color(index)),
        stroke: spec.stroke.unwrap_or(Color::WHITE),
        stroke_width: spec.stroke_width.max(0.0),
    };
    let reach = point.radius + point.stroke_width / 2.0;
    let extent = LocalRect::centered(LocalVec::zero(), LocalVec::new(2.0 * reach, 2.0 * reach));
    world.add_component(entity, SymbolExtentComponent(extent))?;
    world.add_component(entity, point)?;
    world.add_component(entity, LocatorComponent(Arc::new(PointLocator)))?;
    world.add_component(entity, RendererComponent(Arc::new(PointRenderer)))?;
    Ok(entity)
}

pub fn spawn_pie(
    world: &mut World,
    name: String,
    layer: Entity,
    index: usize,
    spec: &PieSpec,
    palette: &Palette,
) -> Result<Entity> {
    if !(spec.radius.is_finite() && spec.radius > 0.0) {
        bail!("pie radius must be positive, got {}", spec.radius);
    }
    let entity = anchor(world, name, layer, index, spec.lon, spec.lat)?;
    let pie = PieComponent::new(spec.radius, &spec.values, palette);
    let diameter = 2.0 * pie.radius;
    let extent = LocalRect::centered(LocalVec::zero(), LocalVec::new(diameter, diameter));
    world.add_component(entity, SymbolExtentComponent(extent))?;
    world.add_component(entity, pie)?;
    world.add_component(entity, LocatorComponent(Arc::new(PieLocator)))?;
    world.add_component(entity, RendererComponent(Arc::new(PieRenderer)))?;
    Ok(entity)
}

pub fn spawn_bar(
    world: &mut World,
    name: String,
    layer: Entity,
    index: usize,
    spec: &BarSpec,
    palette: &Palette,
) -> Result<Entity> {
    let positive = spec.values.iter().copied().filter(|v| v.is_finite() && *v > 0.0);
    let max_value = spec.max_value.unwrap_or_else(|| match spec.layout {
        BarLayout::Stacked => positive.sum(),
        BarLayout::SideBySide => positive.fold(0.0, f64::max),
    });
    let entity = anchor(world, name, layer, index, spec.lon, spec.lat)?;
    let bars = BarComponent::new(
        &spec.values,
        spec.layout,
        spec.width,
        max_value,
        spec.max_height,
        palette,
    );
    world.add_component(entity, SymbolExtentComponent(bars.extent()))?;
    world.add_component(entity, bars)?;
    world.add_component(entity, LocatorComponent(Arc::new(BarLocator)))?;
    world.add_component(entity, RendererComponent(Arc::new(BarRenderer)))?;
    Ok(entity)
}

pub fn spawn_path(
    world: &mut World,
    name: String,
    layer: Entity,
    index: usize,
    spec: &PathSpec,
    palette: &Palette,
) -> Result<Entity> {
    if spec.coordinates.is_empty() {
        bail!("path needs at least one coordinate");
    }
    let points = spec
        .coordinates
        .iter()
        .map(|[lon, lat]| projection::geo_to_world(GeoVec::new(*lon, *lat)))
        .collect::<Result<Vec<WorldVec>, _>>()?;
    let (mut left, mut top) = (f64::INFINITY, f64::INFINITY);
    let (mut right, mut bottom) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for p in &points {
        left = left.min(p.x);
        top = top.min(p.y);
        right = right.max(p.x);
        bottom = bottom.max(p.y);
    }

    let entity = world.create_entity(name);
    world.add_component(entity, WorldOriginComponent(WorldVec::new(left, top)))?;
    let dimension = WorldVec::new(right - left, bottom - top);
    world.add_component(entity, WorldDimensionComponent(dimension))?;
    world.add_component(entity, WorldGeometryComponent(points))?;
    world.add_component(entity, CameraListenerComponent)?;
    world.add_component(entity, ObjectIndexComponent(index))?;
    world.add_component(
        entity,
        PathComponent {
            stroke_width: spec.stroke_width.max(0.0),
            color: spec.color.unwrap_or_else(|| palette.color(index)),
        },
    )?;
    world.add_component(entity, LocatorComponent(Arc::new(PathLocator::default())))?;
    world.add_component(entity, RendererComponent(Arc::new(PathRenderer)))?;
    layers::add_to_layer(world, layer, entity)?;
    Ok(entity)
}
