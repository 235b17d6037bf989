//! Quad-key tile addressing

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::geometry::{WorldRect, WorldVec};
use crate::projection::TILE_PIXEL_SIZE;

/// Deepest zoom a key can address while x/y still fit in `u32`.
pub const MAX_CELL_ZOOM: usize = 31;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CellKeyError {
    #[error("invalid quad digit '{0}' in cell key")]
    InvalidDigit(char),
    #[error("cell key deeper than zoom {MAX_CELL_ZOOM}")]
    TooDeep,
    #[error("tile ({x}, {y}) is outside the grid at zoom {zoom}")]
    OutOfGrid { x: u32, y: u32, zoom: usize },
}

/// Tile address in the quad tree: one base-4 digit per zoom level, most
/// significant first. Digit = `(ybit << 1) | xbit`. The empty key is the
/// zoom-0 root tile.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CellKey(String);

impl CellKey {
    pub fn new(key: impl Into<String>) -> Result<Self, CellKeyError> {
        let key = key.into();
        if let Some(bad) = key.chars().find(|c| !matches!(c, '0'..='3')) {
            return Err(CellKeyError::InvalidDigit(bad));
        }
        if key.len() > MAX_CELL_ZOOM {
            return Err(CellKeyError::TooDeep);
        }
        Ok(Self(key))
    }

    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn zoom(&self) -> usize {
        self.0.len()
    }

    pub fn parent(&self) -> Option<CellKey> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_string()))
        }
    }

    pub fn children(&self) -> [CellKey; 4] {
        ['0', '1', '2', '3'].map(|digit| {
            let mut key = self.0.clone();
            key.push(digit);
            Self(key)
        })
    }

    /// Ancestors from the parent up to the root.
    pub fn ancestors(&self) -> impl Iterator<Item = CellKey> + '_ {
        (0..self.0.len()).rev().map(move |len| Self(self.0[..len].to_string()))
    }

    pub fn is_ancestor_of(&self, other: &CellKey) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }

    /// Integer tile coordinates at `zoom()`.
    pub fn to_xy(&self) -> (u32, u32) {
        let (mut x, mut y) = (0u32, 0u32);
        for digit in self.0.bytes() {
            let quad = u32::from(digit - b'0');
            x = (x << 1) | (quad & 1);
            y = (y << 1) | (quad >> 1);
        }
        (x, y)
    }

    pub fn from_xy(x: u32, y: u32, zoom: usize) -> Result<Self, CellKeyError> {
        if zoom > MAX_CELL_ZOOM {
            return Err(CellKeyError::TooDeep);
        }
        let count = 1u64 << zoom;
        if u64::from(x) >= count || u64::from(y) >= count {
            return Err(CellKeyError::OutOfGrid { x, y, zoom });
        }
        let key = (0..zoom)
            .rev()
            .map(|bit| {
                let quad = ((x >> bit) & 1) | (((y >> bit) & 1) << 1);
                char::from(b'0' + quad as u8)
            })
            .collect();
        Ok(Self(key))
    }

    /// The tile's square in world space.
    pub fn world_rect(&self) -> WorldRect {
        let (x, y) = self.to_xy();
        let size = TILE_PIXEL_SIZE / (1u64 << self.zoom()) as f64;
        WorldRect::new(
            WorldVec::new(f64::from(x) * size, f64::from(y) * size),
            WorldVec::new(size, size),
        )
    }

    /// Every key at `zoom` whose tile intersects `rect`, after clipping `rect`
    /// to the tile grid.
    pub fn covering(rect: &WorldRect, zoom: usize) -> BTreeSet<CellKey> {
        let mut keys = BTreeSet::new();
        let zoom = zoom.min(MAX_CELL_ZOOM);
        let Some(clipped) = rect.intersection(&crate::projection::map_rect()) else {
            return keys;
        };
        let count = 1u64 << zoom;
        let size = TILE_PIXEL_SIZE / count as f64;
        let last = (count - 1) as f64;
        let cell = |v: f64| (v / size).floor().clamp(0.0, last) as u32;
        // right/bottom edges are exclusive
        let edge = |v: f64| ((v / size).ceil() - 1.0).clamp(0.0, last) as u32;
        for x in cell(clipped.left())..=edge(clipped.right()) {
            for y in cell(clipped.top())..=edge(clipped.bottom()) {
                if let Ok(key) = CellKey::from_xy(x, y, zoom) {
                    keys.insert(key);
                }
            }
        }
        keys
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<root>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl FromStr for CellKey {
    type Err = CellKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CellKey::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CellKey {
        CellKey::new(s).unwrap()
    }

    #[test]
    fn rejects_non_quad_digits() {
        assert_eq!(CellKey::new("0124"), Err(CellKeyError::InvalidDigit('4')));
        assert!(CellKey::new("").is_ok());
    }

    #[test]
    fn children_round_trip_to_parent() {
        for k in ["", "0", "3", "213", "0000123"] {
            let k = key(k);
            for child in k.children() {
                assert_eq!(child.zoom(), k.zoom() + 1);
                assert_eq!(child.parent(), Some(k.clone()));
                assert!(k.is_ancestor_of(&child));
            }
        }
        assert_eq!(CellKey::root().parent(), None);
    }

    #[test]
    fn xy_round_trip_recovers_key() {
        for k in ["", "0", "1", "2", "3", "30", "123", "3210", "0231013"] {
            let k = key(k);
            let (x, y) = k.to_xy();
            assert_eq!(CellKey::from_xy(x, y, k.zoom()).unwrap(), k);
        }
        assert_eq!(key("30").to_xy(), (2, 2));
        assert_eq!(key("1").to_xy(), (1, 0));
        assert_eq!(key("2").to_xy(), (0, 1));
    }

    #[test]
    fn every_tile_at_zoom_three_has_a_unique_key() {
        let mut seen = BTreeSet::new();
        for x in 0..8 {
            for y in 0..8 {
                let k = CellKey::from_xy(x, y, 3).unwrap();
                assert_eq!(k.to_xy(), (x, y));
                assert!(seen.insert(k));
            }
        }
        assert_eq!(seen.len(), 64);
        assert!(CellKey::from_xy(8, 0, 3).is_err());
    }

    #[test]
    fn ancestors_walk_to_root() {
        let chain: Vec<String> = key("012").ancestors().map(|k| k.as_str().to_string()).collect();
        assert_eq!(chain, vec!["01", "0", ""]);
    }

    #[test]
    fn world_rect_of_key() {
        let rect = key("30").world_rect();
        assert_eq!(rect, WorldRect::from_ltrb(128.0, 128.0, 192.0, 192.0));
        assert_eq!(CellKey::root().world_rect(), crate::projection::map_rect());
    }

    #[test]
    fn covering_clips_to_grid_and_excludes_touching_edges() {
        let whole = WorldRect::from_ltrb(-100.0, -100.0, 400.0, 400.0);
        assert_eq!(CellKey::covering(&whole, 1).len(), 4);

        let quadrant = WorldRect::from_ltrb(0.0, 0.0, 128.0, 128.0);
        let keys: Vec<_> = CellKey::covering(&quadrant, 1).into_iter().collect();
        assert_eq!(keys, vec![key("0")]);

        let center = WorldRect::from_ltrb(100.0, 100.0, 150.0, 150.0);
        assert_eq!(CellKey::covering(&center, 1).len(), 4);
        let root: Vec<_> = CellKey::covering(&center, 0).into_iter().collect();
        assert_eq!(root, vec![CellKey::root()]);

        let outside = WorldRect::from_ltrb(300.0, 300.0, 400.0, 400.0);
        assert!(CellKey::covering(&outside, 4).is_empty());
    }
}
