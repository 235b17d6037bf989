//! Tile payload decoding

use std::fmt;

use bytes::Bytes;

use super::cell_key::CellKey;
use super::TileError;

/// A decoded raster tile, RGBA8 row-major.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedTile {
    pub width: u32,
    pub height: u32,
    pub pixels: Bytes,
}

impl DecodedTile {
    pub fn new(width: u32, height: u32, pixels: Bytes) -> Self {
        Self { width, height, pixels }
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for DecodedTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodedTile")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Turns fetched bytes into something drawable.
pub trait TileDecoder: Send + Sync {
    fn decode(&self, key: &CellKey, bytes: &[u8]) -> Result<DecodedTile, TileError>;
}

/// PNG/JPEG raster tiles via `image`.
#[derive(Debug, Default, Clone)]
pub struct RasterTileDecoder;

impl TileDecoder for RasterTileDecoder {
    fn decode(&self, key: &CellKey, bytes: &[u8]) -> Result<DecodedTile, TileError> {
        let image = image::load_from_memory(bytes).map_err(|err| TileError::DecodeFailed {
            key: key.clone(),
            reason: err.to_string(),
        })?;
        let rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(DecodedTile::new(width, height, Bytes::from(rgba.into_raw())))
    }
}

#[cfg(test)]
pub(crate) fn encode_png(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut out = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_png_to_rgba() {
        let png = encode_png(4, 2, [10, 20, 30, 255]);
        let tile = RasterTileDecoder.decode(&CellKey::root(), &png).unwrap();
        assert_eq!((tile.width, tile.height), (4, 2));
        assert_eq!(tile.byte_len(), 4 * 2 * 4);
        assert_eq!(&tile.pixels[..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn garbage_is_a_decode_failure() {
        let key = CellKey::new("12").unwrap();
        let err = RasterTileDecoder.decode(&key, b"not an image").unwrap_err();
        assert!(matches!(err, TileError::DecodeFailed { key: k, .. } if k == key));
    }
}
