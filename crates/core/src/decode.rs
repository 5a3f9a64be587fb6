//! Image decoding behind a replaceable trait

use std::io::Cursor;

use image::{DynamicImage, ImageReader};
use pageflow_cache::{DecodedBitmap, Dimensions};

use crate::error::DecodeError;

/// Turns page bytes into sizes and pixels.
pub trait ImageDecoder: Send + Sync {
    /// Image size, ideally from the header alone
    fn dimensions(&self, bytes: &[u8]) -> Result<Dimensions, DecodeError>;

    /// Full RGBA decode
    fn decode(&self, bytes: &[u8]) -> Result<DecodedBitmap, DecodeError>;

    /// RGBA decode scaled to fit within `max_edge` on both axes
    fn thumbnail(&self, bytes: &[u8], max_edge: u32) -> Result<DecodedBitmap, DecodeError>;
}

/// [`ImageDecoder`] backed by the `image` crate
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl ImageCrateDecoder {
    fn load(bytes: &[u8]) -> Result<DynamicImage, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(image::load_from_memory(bytes)?)
    }
}

fn to_bitmap(image: DynamicImage) -> DecodedBitmap {
    let rgba = image.into_rgba8();
    let (width, height) = rgba.dimensions();
    DecodedBitmap::new(width, height, rgba.into_raw())
}

impl ImageDecoder for ImageCrateDecoder {
    fn dimensions(&self, bytes: &[u8]) -> Result<Dimensions, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let (width, height) = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_dimensions()?;
        Ok(Dimensions::new(width, height))
    }

    fn decode(&self, bytes: &[u8]) -> Result<DecodedBitmap, DecodeError> {
        Self::load(bytes).map(to_bitmap)
    }

    fn thumbnail(&self, bytes: &[u8], max_edge: u32) -> Result<DecodedBitmap, DecodeError> {
        let image = Self::load(bytes)?;
        let max_edge = max_edge.max(1);
        let image = if image.width() <= max_edge && image.height() <= max_edge {
            image
        } else {
            image.thumbnail(max_edge, max_edge)
        };
        Ok(to_bitmap(image))
    }
}
