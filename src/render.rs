//! Frame rendering onto a caller-owned canvas
//!
//! Everything is drawn in client pixels. Tiles and paths scale with zoom;
//! point, pie and bar symbols keep their pixel size.

use std::f64::consts::PI;
use std::sync::Arc;

use serde::Serialize;
use tracing::trace;

use crate::camera::Viewport;
use crate::chart::{BarComponent, Color, PathComponent, PieComponent, PointComponent};
use crate::ecs::{Component, Entity, World};
use crate::geometry::{ClientRect, ClientVec, LocalRect, LocalVec};
use crate::layers;
use crate::placement::{
    ScaleComponent, ScreenDimensionComponent, ScreenGeometryComponent, ScreenOriginComponent,
    VisibleComponent,
};
use crate::tiles::{CellComponent, CellKey, DecodedTile, TileCache};

/// The drawing surface. Mirrors a 2D canvas context; transforms stack with
/// `save`/`restore`.
pub trait Canvas {
    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, x: f64, y: f64);
    fn scale(&mut self, sx: f64, sy: f64);

    fn begin_path(&mut self);
    fn move_to(&mut self, x: f64, y: f64);
    fn line_to(&mut self, x: f64, y: f64);
    /// Clockwise from `start` to `end`, radians, 0 at 3 o'clock.
    fn arc(&mut self, x: f64, y: f64, radius: f64, start: f64, end: f64);
    fn close_path(&mut self);

    fn set_fill_color(&mut self, color: Color);
    fn set_stroke_color(&mut self, color: Color);
    fn set_line_width(&mut self, width: f64);
    fn fill(&mut self);
    fn stroke(&mut self);
    fn fill_rect(&mut self, rect: ClientRect);

    /// Draw the `src` pixels of `image` into `dst`.
    fn draw_image(&mut self, key: &CellKey, image: &DecodedTile, src: LocalRect, dst: ClientRect);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawCommand {
    Save,
    Restore,
    Translate { x: f64, y: f64 },
    Scale { x: f64, y: f64 },
    BeginPath,
    MoveTo { x: f64, y: f64 },
    LineTo { x: f64, y: f64 },
    Arc { x: f64, y: f64, radius: f64, start: f64, end: f64 },
    ClosePath,
    FillColor { color: Color },
    StrokeColor { color: Color },
    LineWidth { width: f64 },
    Fill,
    Stroke,
    FillRect { x: f64, y: f64, width: f64, height: f64 },
    DrawImage { cell: String, src: [f64; 4], dst: [f64; 4] },
}

/// A canvas that records what it is told; the headless output format.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DisplayList {
    pub commands: Vec<DrawCommand>,
}

impl DisplayList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn images(&self) -> impl Iterator<Item = &DrawCommand> {
        self.commands
            .iter()
            .filter(|c| matches!(c, DrawCommand::DrawImage { .. }))
    }
}

fn rect4<S>(rect: &crate::geometry::Rect<S>) -> [f64; 4] {
    [rect.left(), rect.top(), rect.width(), rect.height()]
}

impl Canvas for DisplayList {
    fn save(&mut self) {
        self.commands.push(DrawCommand::Save);
    }

    fn restore(&mut self) {
        self.commands.push(DrawCommand::Restore);
    }

    fn translate(&mut self, x: f64, y: f64) {
        self.commands.push(DrawCommand::Translate { x, y });
    }

    fn scale(&mut self, x: f64, y: f64) {
        self.commands.push(DrawCommand::Scale { x, y });
    }

    fn begin_path(&mut self) {
        self.commands.push(DrawCommand::BeginPath);
    }

    fn move_to(&mut self, x: f64, y: f64) {
        self.commands.push(DrawCommand::MoveTo { x, y });
    }

    fn line_to(&mut self, x: f64, y: f64) {
        self.commands.push(DrawCommand::LineTo { x, y });
    }

    fn arc(&mut self, x: f64, y: f64, radius: f64, start: f64, end: f64) {
        self.commands.push(DrawCommand::Arc { x, y, radius, start, end });
    }

    fn close_path(&mut self) {
        self.commands.push(DrawCommand::ClosePath);
    }

    fn set_fill_color(&mut self, color: Color) {
        self.commands.push(DrawCommand::FillColor { color });
    }

    fn set_stroke_color(&mut self, color: Color) {
        self.commands.push(DrawCommand::StrokeColor { color });
    }

    fn set_line_width(&mut self, width: f64) {
        self.commands.push(DrawCommand::LineWidth { width });
    }

    fn fill(&mut self) {
        self.commands.push(DrawCommand::Fill);
    }

    fn stroke(&mut self) {
        self.commands.push(DrawCommand::Stroke);
    }

    fn fill_rect(&mut self, rect: ClientRect) {
        self.commands.push(DrawCommand::FillRect {
            x: rect.left(),
            y: rect.top(),
            width: rect.width(),
            height: rect.height(),
        });
    }

    fn draw_image(&mut self, key: &CellKey, _image: &DecodedTile, src: LocalRect, dst: ClientRect) {
        self.commands.push(DrawCommand::DrawImage {
            cell: key.as_str().to_string(),
            src: rect4(&src),
            dst: rect4(&dst),
        });
    }
}

pub struct RenderContext<'a> {
    pub viewport: &'a Viewport,
    pub tiles: Option<&'a TileCache>,
}

impl RenderContext<'_> {
    fn anchor(&self, world: &World, entity: Entity) -> Option<ClientVec> {
        let origin = world.try_get::<ScreenOriginComponent>(entity)?.0;
        Some(self.viewport.screen_to_client(origin))
    }
}

pub trait EntityRenderer: Send + Sync {
    fn render(
        &self,
        entity: Entity,
        world: &World,
        ctx: &RenderContext<'_>,
        canvas: &mut dyn Canvas,
    );
}

#[derive(Clone)]
pub struct RendererComponent(pub Arc<dyn EntityRenderer>);

impl Component for RendererComponent {}

/// Draws a tile from the cache, or the matching part of its nearest cached
/// ancestor while it loads. Missing tiles stay blank.
pub struct TileRenderer;

impl TileRenderer {
    /// Source rectangle of `key` inside the image of its ancestor `donor`.
    pub fn donor_rect(key: &CellKey, donor: &CellKey, image: &DecodedTile) -> LocalRect {
        let depth = key.zoom() - donor.zoom();
        let (x, y) = key.to_xy();
        let (dx, dy) = donor.to_xy();
        let span = 1u64 << depth;
        let rel_x = u64::from(x) - (u64::from(dx) << depth);
        let rel_y = u64::from(y) - (u64::from(dy) << depth);
        let w = f64::from(image.width) / span as f64;
        let h = f64::from(image.height) / span as f64;
        LocalRect::new(LocalVec::new(rel_x as f64 * w, rel_y as f64 * h), LocalVec::new(w, h))
    }
}

impl EntityRenderer for TileRenderer {
    fn render(
        &self,
        entity: Entity,
        world: &World,
        ctx: &RenderContext<'_>,
        canvas: &mut dyn Canvas,
    ) {
        let (Some(cell), Some(cache)) = (world.try_get::<CellComponent>(entity), ctx.tiles) else {
            return;
        };
        let (Some(anchor), Some(dimension)) = (
            ctx.anchor(world, entity),
            world.try_get::<ScreenDimensionComponent>(entity),
        ) else {
            return;
        };
        let own_scale = world.try_get::<ScaleComponent>(entity).map_or(1.0, |s| s.scale);
        let scale = own_scale * ctx.viewport.fraction_scale();
        let dst = ClientRect::new(ClientVec::zero(), ClientVec::new(dimension.0.x, dimension.0.y));

        let (source_key, image, src) = if let Some(image) = cache.get(&cell.0) {
            let size = LocalVec::new(f64::from(image.width), f64::from(image.height));
            let full = LocalRect::new(LocalVec::zero(), size);
            (cell.0.clone(), image.clone(), full)
        } else if let Some((donor, image)) = cache.donor(&cell.0) {
            let src = TileRenderer::donor_rect(&cell.0, &donor, &image);
            trace!(cell = %cell.0, donor = %donor, "drawing donor tile");
            (donor, image, src)
        } else {
            return;
        };
        canvas.save();
        canvas.translate(anchor.x, anchor.y);
        canvas.scale(scale, scale);
        canvas.draw_image(&source_key, &image, src, dst);
        canvas.restore();
    }
}

pub struct PointRenderer;

impl EntityRenderer for PointRenderer {
    fn render(
        &self,
        entity: Entity,
        world: &World,
        ctx: &RenderContext<'_>,
        canvas: &mut dyn Canvas,
    ) {
        let (Some(point), Some(center)) = (
            world.try_get::<PointComponent>(entity),
            ctx.anchor(world, entity),
        ) else {
            return;
        };
        canvas.begin_path();
        canvas.arc(center.x, center.y, point.radius, 0.0, 2.0 * PI);
        canvas.set_fill_color(point.fill);
        canvas.fill();
        if point.stroke_width > 0.0 {
            canvas.set_stroke_color(point.stroke);
            canvas.set_line_width(point.stroke_width);
            canvas.stroke();
        }
    }
}

pub struct PieRenderer;

impl EntityRenderer for PieRenderer {
    fn render(
        &self,
        entity: Entity,
        world: &World,
        ctx: &RenderContext<'_>,
        canvas: &mut dyn Canvas,
    ) {
        let (Some(pie), Some(center)) = (
            world.try_get::<PieComponent>(entity),
            ctx.anchor(world, entity),
        ) else {
            return;
        };
        for sector in &pie.sectors {
            canvas.begin_path();
            canvas.move_to(center.x, center.y);
            canvas.arc(center.x, center.y, pie.radius, sector.start_angle, sector.end_angle);
            canvas.close_path();
            canvas.set_fill_color(sector.color);
            canvas.fill();
        }
    }
}

pub struct BarRenderer;

impl EntityRenderer for BarRenderer {
    fn render(
        &self,
        entity: Entity,
        world: &World,
        ctx: &RenderContext<'_>,
        canvas: &mut dyn Canvas,
    ) {
        let (Some(bars), Some(base)) = (
            world.try_get::<BarComponent>(entity),
            ctx.anchor(world, entity),
        ) else {
            return;
        };
        for segment in &bars.segments {
            let origin = base + ClientVec::new(segment.rect.left(), segment.rect.top());
            canvas.set_fill_color(segment.color);
            let size = ClientVec::new(segment.rect.width(), segment.rect.height());
            canvas.fill_rect(ClientRect::new(origin, size));
        }
    }
}

pub struct PathRenderer;

impl EntityRenderer for PathRenderer {
    fn render(
        &self,
        entity: Entity,
        world: &World,
        ctx: &RenderContext<'_>,
        canvas: &mut dyn Canvas,
    ) {
        let (Some(path), Some(geometry), Some(origin)) = (
            world.try_get::<PathComponent>(entity),
            world.try_get::<ScreenGeometryComponent>(entity),
            world.try_get::<ScreenOriginComponent>(entity),
        ) else {
            return;
        };
        let scale = world.try_get::<ScaleComponent>(entity).map_or(1.0, |s| s.scale);
        let mut points = geometry
            .0
            .iter()
            .map(|p| ctx.viewport.screen_to_client(origin.0 + *p * scale));
        let Some(first) = points.next() else {
            return;
        };
        canvas.begin_path();
        canvas.move_to(first.x, first.y);
        for p in points {
            canvas.line_to(p.x, p.y);
        }
        canvas.set_stroke_color(path.color);
        canvas.set_line_width(path.stroke_width);
        canvas.stroke();
    }
}

/// Paint every visible entity back to front.
pub fn render_frame(world: &World, ctx: &RenderContext<'_>, canvas: &mut dyn Canvas) -> usize {
    let mut drawn = 0;
    canvas.save();
    for (_, entity) in layers::render_order(world) {
        if !world.has_component::<VisibleComponent>(entity) {
            continue;
        }
        if let Some(renderer) = world.try_get::<RendererComponent>(entity) {
            renderer.0.render(entity, world, ctx, canvas);
            drawn += 1;
        }
    }
    canvas.restore();
    drawn
}
