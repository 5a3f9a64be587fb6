//! The boundary to whatever actually performs super-resolution

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::{Mutex, PoisonError};

use image::imageops::FilterType;
use image::ImageFormat;
use pageflow_cache::{ContentHash, PageBuffer, PageIndex};

/// Work handed to an [`UpscaleEngine`]
#[derive(Debug, Clone)]
pub struct UpscaleRequest {
    pub job_id: u64,
    pub page: PageIndex,
    pub hash: ContentHash,
    pub input: PageBuffer,
    pub model: String,
    pub scale: u32,
    /// 0 lets the engine choose
    pub tile_size: u32,
    /// -1 lets the engine choose
    pub noise_level: i32,
}

/// What the engine did with a request
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutcome {
    Success(PageBuffer),
    /// Temporarily unable to accept work; retry after a backoff
    Requeue,
    Failure(String),
    Cancelled,
}

/// A super-resolution backend.
///
/// `submit` blocks until the request is resolved and is called from upscale
/// worker threads only. `cancel` may arrive from any thread while a request
/// for that page is in flight.
pub trait UpscaleEngine: Send + Sync {
    fn submit(&self, request: &UpscaleRequest) -> EngineOutcome;

    /// Ask the engine to abandon in-flight work for `page`
    fn cancel(&self, page: PageIndex);
}

/// CPU engine that enlarges pages with a Lanczos filter and re-encodes
/// them as PNG.
///
/// Useful as a fallback when no model-based engine is installed.
#[derive(Debug, Default)]
pub struct ResizeEngine {
    cancelled: Mutex<HashSet<PageIndex>>,
}

impl ResizeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn take_cancelled(&self, page: PageIndex) -> bool {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&page)
    }
}

impl UpscaleEngine for ResizeEngine {
    fn submit(&self, request: &UpscaleRequest) -> EngineOutcome {
        // A cancel aimed at an earlier request must not leak into this one.
        self.take_cancelled(request.page);

        let image = match image::load_from_memory(&request.input) {
            Ok(image) => image,
            Err(e) => return EngineOutcome::Failure(e.to_string()),
        };
        let scale = request.scale.max(1);
        let width = image.width().saturating_mul(scale);
        let height = image.height().saturating_mul(scale);
        let resized = image.resize_exact(width, height, FilterType::Lanczos3);

        if self.take_cancelled(request.page) {
            return EngineOutcome::Cancelled;
        }

        let mut encoded = Cursor::new(Vec::new());
        match resized.write_to(&mut encoded, ImageFormat::Png) {
            Ok(()) => EngineOutcome::Success(PageBuffer::from(encoded.into_inner())),
            Err(e) => EngineOutcome::Failure(e.to_string()),
        }
    }

    fn cancel(&self, page: PageIndex) {
        self.cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn request(input: Vec<u8>, scale: u32) -> UpscaleRequest {
        UpscaleRequest {
            job_id: 1,
            page: 0,
            hash: ContentHash::of(&input),
            input: PageBuffer::from(input),
            model: "lanczos".into(),
            scale,
            tile_size: 0,
            noise_level: -1,
        }
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]));
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_resize_engine_scales_image() {
        let engine = ResizeEngine::new();
        match engine.submit(&request(png(8, 5), 2)) {
            EngineOutcome::Success(output) => {
                let image = image::load_from_memory(&output).unwrap();
                assert_eq!((image.width(), image.height()), (16, 10));
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_resize_engine_reports_bad_input() {
        let engine = ResizeEngine::new();
        assert!(matches!(
            engine.submit(&request(b"nope".to_vec(), 2)),
            EngineOutcome::Failure(_)
        ));
    }

    #[test]
    fn test_stale_cancel_is_ignored() {
        let engine = ResizeEngine::new();
        engine.cancel(0);
        assert!(matches!(
            engine.submit(&request(png(2, 2), 2)),
            EngineOutcome::Success(_)
        ));
    }
}
