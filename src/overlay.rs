//! Overlay image compositor.
//!
//! Holds at most one decoded image. The overlay is visible exactly when an
//! image is held; a failed decode drops whatever was there before, so a bad
//! payload can never leave a stale picture on screen.

use image::imageops::{self, FilterType};
use image::RgbaImage;

use crate::preview::{Rect, Size};

/// Why an overlay payload was refused.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("Overlay payload is empty")]
    EmptyPayload,
    #[error("Failed to decode overlay image: {0}")]
    InvalidFormat(String),
}

/// Largest rect with the aspect ratio of `image` that fits inside `container`, centered.
pub fn fit_center(image: Size, container: Size) -> Rect {
    if image.is_empty() || container.is_empty() {
        return Rect {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        };
    }

    let lhs = image.width as u64 * container.height as u64;
    let rhs = container.width as u64 * image.height as u64;
    let (width, height) = if lhs > rhs {
        // Wider than the container: width-bound.
        let height = (container.width as u64 * image.height as u64 / image.width as u64) as u32;
        (container.width, height.max(1))
    } else {
        let width = (container.height as u64 * image.width as u64 / image.height as u64) as u32;
        (width.max(1), container.height)
    };

    Rect {
        x: (container.width - width) / 2,
        y: (container.height - height) / 2,
        width,
        height,
    }
}

/// Optional decoded overlay drawn above the preview.
#[derive(Debug, Default)]
pub struct OverlayCompositor {
    image: Option<RgbaImage>,
    released: u64,
}

impl OverlayCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes` and show the result.
    ///
    /// On failure the overlay is hidden and any previous image released.
    pub fn set_overlay(&mut self, bytes: &[u8]) -> Result<(), DecodeError> {
        let decoded = if bytes.is_empty() {
            Err(DecodeError::EmptyPayload)
        } else {
            image::load_from_memory(bytes)
                .map(|img| img.to_rgba8())
                .map_err(|e| DecodeError::InvalidFormat(e.to_string()))
        };

        match decoded {
            Ok(image) => {
                log::debug!("Overlay set ({}x{})", image.width(), image.height());
                self.release();
                self.image = Some(image);
                Ok(())
            }
            Err(e) => {
                log::warn!("{}", e);
                self.release();
                Err(e)
            }
        }
    }

    /// Release the image and hide the overlay. Safe with nothing set.
    pub fn clear_overlay(&mut self) {
        if self.release() {
            log::debug!("Overlay cleared");
        }
    }

    fn release(&mut self) -> bool {
        if self.image.take().is_some() {
            self.released += 1;
            true
        } else {
            false
        }
    }

    pub fn is_visible(&self) -> bool {
        self.image.is_some()
    }

    pub fn image_size(&self) -> Option<Size> {
        self.image
            .as_ref()
            .map(|img| Size::new(img.width(), img.height()))
    }

    /// Number of images released so far.
    pub fn release_count(&self) -> u64 {
        self.released
    }

    /// Alpha-blend the overlay onto `canvas`, scaled to fit and centered.
    ///
    /// Transparent overlay pixels leave the canvas unchanged.
    pub fn compose_onto(&self, canvas: &mut RgbaImage) {
        let Some(image) = &self.image else {
            return;
        };
        let rect = fit_center(
            Size::new(image.width(), image.height()),
            Size::new(canvas.width(), canvas.height()),
        );
        if rect.width == 0 || rect.height == 0 {
            return;
        }

        let scaled = if (rect.width, rect.height) == image.dimensions() {
            image.clone()
        } else {
            imageops::resize(image, rect.width, rect.height, FilterType::Triangle)
        };
        imageops::overlay(canvas, &scaled, rect.x as i64, rect.y as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba};
    use std::io::Cursor;

    fn png(width: u32, height: u32, fill: Rgba<u8>) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, fill);
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_set_overlay_shows_image() {
        let mut overlay = OverlayCompositor::new();
        assert!(!overlay.is_visible());

        overlay.set_overlay(&png(4, 2, Rgba([0, 255, 0, 128]))).unwrap();
        assert!(overlay.is_visible());
        assert_eq!(overlay.image_size(), Some(Size::new(4, 2)));
    }

    #[test]
    fn test_invalid_bytes_hide_previous_overlay() {
        let mut overlay = OverlayCompositor::new();
        overlay.set_overlay(&png(2, 2, Rgba([1, 2, 3, 255]))).unwrap();

        let result = overlay.set_overlay(b"definitely not an image");
        assert!(matches!(result, Err(DecodeError::InvalidFormat(_))));
        assert!(!overlay.is_visible());
        assert_eq!(overlay.release_count(), 1);
    }

    #[test]
    fn test_empty_payload() {
        let mut overlay = OverlayCompositor::new();
        assert_eq!(overlay.set_overlay(&[]), Err(DecodeError::EmptyPayload));
        assert!(!overlay.is_visible());
        assert_eq!(overlay.release_count(), 0);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut overlay = OverlayCompositor::new();
        overlay.clear_overlay();
        overlay.set_overlay(&png(2, 2, Rgba([1, 2, 3, 255]))).unwrap();
        overlay.clear_overlay();
        overlay.clear_overlay();
        assert!(!overlay.is_visible());
        assert_eq!(overlay.release_count(), 1);
    }

    #[test]
    fn test_replace_releases_previous_image() {
        let mut overlay = OverlayCompositor::new();
        overlay.set_overlay(&png(2, 2, Rgba([1, 2, 3, 255]))).unwrap();
        overlay.set_overlay(&png(3, 3, Rgba([1, 2, 3, 255]))).unwrap();
        assert_eq!(overlay.release_count(), 1);
        assert_eq!(overlay.image_size(), Some(Size::new(3, 3)));
    }

    #[test]
    fn test_fit_center() {
        // Square image in a tall container: width-bound, vertically centered.
        let rect = fit_center(Size::new(100, 100), Size::new(50, 200));
        assert_eq!(rect, Rect { x: 0, y: 75, width: 50, height: 50 });

        // Wide container: height-bound, horizontally centered.
        let rect = fit_center(Size::new(10, 20), Size::new(100, 40));
        assert_eq!(rect, Rect { x: 40, y: 0, width: 20, height: 40 });
    }

    #[test]
    fn test_compose_transparent_regions_keep_preview() {
        // Left half opaque blue, right half fully transparent.
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 0]));
        for y in 0..4 {
            for x in 0..2 {
                img.put_pixel(x, y, Rgba([0, 0, 255, 255]));
            }
        }
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let mut overlay = OverlayCompositor::new();
        overlay.set_overlay(&bytes).unwrap();

        let preview = Rgba([200, 10, 10, 255]);
        let mut canvas = RgbaImage::from_pixel(4, 4, preview);
        overlay.compose_onto(&mut canvas);

        assert_eq!(canvas.get_pixel(0, 0), &Rgba([0, 0, 255, 255]));
        assert_eq!(canvas.get_pixel(3, 3), &preview);
    }

    #[test]
    fn test_compose_without_overlay_is_noop() {
        let overlay = OverlayCompositor::new();
        let preview = Rgba([9, 9, 9, 255]);
        let mut canvas = RgbaImage::from_pixel(3, 3, preview);
        overlay.compose_onto(&mut canvas);
        assert!(canvas.pixels().all(|p| *p == preview));
    }
}
