//! Coordinate-space tagged vectors and rectangles
//!
//! `Vec2<S>` carries its space in the type, so a geographic point cannot be
//! passed where a screen point is expected. Moving between spaces goes
//! through `crate::projection`.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// Longitude/latitude in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geographic {}

/// Zoom-independent projected plane, `TILE_PIXEL_SIZE` units square.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum World {}

/// World scaled by `2^zoom` for an integer zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {}

/// Viewport-relative pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Client {}

/// Pixels relative to an entity's anchor; also image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Local {}

pub type GeoVec = Vec2<Geographic>;
pub type WorldVec = Vec2<World>;
pub type ScreenVec = Vec2<Screen>;
pub type ClientVec = Vec2<Client>;
pub type LocalVec = Vec2<Local>;

pub type WorldRect = Rect<World>;
pub type ScreenRect = Rect<Screen>;
pub type ClientRect = Rect<Client>;
pub type LocalRect = Rect<Local>;

pub struct Vec2<S> {
    pub x: f64,
    pub y: f64,
    space: PhantomData<S>,
}

impl<S> Vec2<S> {
    pub const fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            space: PhantomData,
        }
    }

    pub const fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn dot(self, other: Self) -> f64 {
        self.x * other.x + self.y * other.y
    }

    pub fn scale(self, sx: f64, sy: f64) -> Self {
        Self::new(self.x * sx, self.y * sy)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Reinterpret the coordinates in another space. Only projection code
    /// may do this.
    pub(crate) fn retag<T>(self) -> Vec2<T> {
        Vec2::new(self.x, self.y)
    }
}

impl<S> Clone for Vec2<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Vec2<S> {}

impl<S> PartialEq for Vec2<S> {
    fn eq(&self, other: &Self) -> bool {
        self.x == other.x && self.y == other.y
    }
}

impl<S> Default for Vec2<S> {
    fn default() -> Self {
        Self::zero()
    }
}

impl<S> fmt::Debug for Vec2<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let space = std::any::type_name::<S>().rsplit("::").next().unwrap_or("?");
        write!(f, "{space}({}, {})", self.x, self.y)
    }
}

impl<S> Add for Vec2<S> {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl<S> AddAssign for Vec2<S> {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl<S> Sub for Vec2<S> {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl<S> SubAssign for Vec2<S> {
    fn sub_assign(&mut self, rhs: Self) {
        self.x -= rhs.x;
        self.y -= rhs.y;
    }
}

impl<S> Mul<f64> for Vec2<S> {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl<S> Div<f64> for Vec2<S> {
    type Output = Self;
    fn div(self, rhs: f64) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl<S> Neg for Vec2<S> {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y)
    }
}

/// Axis-aligned rectangle; `origin` is the top-left corner.
pub struct Rect<S> {
    pub origin: Vec2<S>,
    pub dimension: Vec2<S>,
}

impl<S> Rect<S> {
    pub fn new(origin: Vec2<S>, dimension: Vec2<S>) -> Self {
        Self { origin, dimension }
    }

    pub fn from_ltrb(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self::new(Vec2::new(left, top), Vec2::new(right - left, bottom - top))
    }

    pub fn centered(center: Vec2<S>, dimension: Vec2<S>) -> Self {
        Self::new(center - dimension / 2.0, dimension)
    }

    pub fn left(&self) -> f64 {
        self.origin.x
    }

    pub fn top(&self) -> f64 {
        self.origin.y
    }

    pub fn right(&self) -> f64 {
        self.origin.x + self.dimension.x
    }

    pub fn bottom(&self) -> f64 {
        self.origin.y + self.dimension.y
    }

    pub fn width(&self) -> f64 {
        self.dimension.x
    }

    pub fn height(&self) -> f64 {
        self.dimension.y
    }

    pub fn center(&self) -> Vec2<S> {
        self.origin + self.dimension / 2.0
    }

    pub fn contains(&self, p: Vec2<S>) -> bool {
        p.x >= self.left() && p.x <= self.right() && p.y >= self.top() && p.y <= self.bottom()
    }

    pub fn intersects(&self, other: &Rect<S>) -> bool {
        self.left() < other.right()
            && other.left() < self.right()
            && self.top() < other.bottom()
            && other.top() < self.bottom()
    }

    pub fn intersection(&self, other: &Rect<S>) -> Option<Rect<S>> {
        let left = self.left().max(other.left());
        let top = self.top().max(other.top());
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (left < right && top < bottom).then(|| Rect::from_ltrb(left, top, right, bottom))
    }

    pub(crate) fn retag<T>(&self) -> Rect<T> {
        Rect::new(self.origin.retag(), self.dimension.retag())
    }
}

impl<S> Clone for Rect<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for Rect<S> {}

impl<S> PartialEq for Rect<S> {
    fn eq(&self, other: &Self) -> bool {
        self.origin == other.origin && self.dimension == other.dimension
    }
}

impl<S> fmt::Debug for Rect<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rect")
            .field("origin", &self.origin)
            .field("dimension", &self.dimension)
            .finish()
    }
}

/// Distance from `p` to the segment `a..b`.
pub fn distance_to_segment<S>(p: Vec2<S>, a: Vec2<S>, b: Vec2<S>) -> f64 {
    let ab = b - a;
    let len_sq = ab.dot(ab);
    if len_sq == 0.0 {
        return (p - a).length();
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).length()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_edges_and_containment() {
        let rect = ScreenRect::from_ltrb(10.0, 20.0, 30.0, 60.0);
        assert_eq!(rect.width(), 20.0);
        assert_eq!(rect.height(), 40.0);
        assert_eq!(rect.center(), ScreenVec::new(20.0, 40.0));
        assert!(rect.contains(ScreenVec::new(10.0, 60.0)));
        assert!(!rect.contains(ScreenVec::new(9.9, 30.0)));
    }

    #[test]
    fn rect_intersection_excludes_touching_edges() {
        let a = WorldRect::from_ltrb(0.0, 0.0, 10.0, 10.0);
        let b = WorldRect::from_ltrb(10.0, 0.0, 20.0, 10.0);
        assert!(!a.intersects(&b));
        assert!(a.intersection(&b).is_none());

        let c = WorldRect::from_ltrb(5.0, 5.0, 15.0, 15.0);
        assert_eq!(a.intersection(&c), Some(WorldRect::from_ltrb(5.0, 5.0, 10.0, 10.0)));
    }

    #[test]
    fn segment_distance_clamps_to_endpoints() {
        let a = ClientVec::new(0.0, 0.0);
        let b = ClientVec::new(10.0, 0.0);
        assert_eq!(distance_to_segment(ClientVec::new(5.0, 3.0), a, b), 3.0);
        assert_eq!(distance_to_segment(ClientVec::new(13.0, 4.0), a, b), 5.0);
        assert_eq!(distance_to_segment(ClientVec::new(1.0, 1.0), a, a), 2f64.sqrt());
    }
}
