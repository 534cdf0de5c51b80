//! Preview surface and binder.
//!
//! A [`PreviewSurface`] is the render target owned by a view. The capture
//! backend only ever sees a `Weak` handle to it, so dropping the view drops
//! the surface no matter what the camera is doing.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::camera::{CaptureBackend, CaptureSession, Frame};

/// Container size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Size {
    type Err = String;

    /// Parse `WIDTHxHEIGHT`, e.g. `1080x1920`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s.split_once(['x', 'X']).ok_or_else(|| {
            format!("Invalid size '{}'. Use WIDTHxHEIGHT (e.g., 1080x1920)", s)
        })?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| format!("Invalid width '{}' in size", w))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| format!("Invalid height '{}' in size", h))?;
        if width == 0 || height == 0 {
            return Err("Size width and height must be greater than 0".to_string());
        }
        Ok(Size { width, height })
    }
}

/// Axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Centered region of `source` with the aspect ratio of `bounds`.
///
/// Cropping `source` to this rect and scaling it to `bounds` fills the
/// container completely without distortion.
pub fn fill_center(source: Size, bounds: Size) -> Rect {
    if source.is_empty() || bounds.is_empty() {
        return Rect {
            x: 0,
            y: 0,
            width: source.width,
            height: source.height,
        };
    }

    // Compare source.w/source.h against bounds.w/bounds.h without floats.
    let lhs = source.width as u64 * bounds.height as u64;
    let rhs = bounds.width as u64 * source.height as u64;
    if lhs > rhs {
        // Source is wider: keep full height, trim the sides.
        let width = ((rhs / bounds.height as u64) as u32).max(1);
        Rect {
            x: (source.width - width) / 2,
            y: 0,
            width,
            height: source.height,
        }
    } else {
        let height = ((lhs / bounds.width as u64) as u32).max(1);
        Rect {
            x: 0,
            y: (source.height - height) / 2,
            width: source.width,
            height,
        }
    }
}

#[derive(Debug)]
struct SurfaceState {
    bounds: Size,
    bound: bool,
    latest: Option<RgbaImage>,
    frames_presented: u64,
}

/// View-owned render target for the live preview.
#[derive(Debug)]
pub struct PreviewSurface {
    state: Mutex<SurfaceState>,
}

impl PreviewSurface {
    pub fn new(bounds: Size) -> Self {
        Self {
            state: Mutex::new(SurfaceState {
                bounds,
                bound: false,
                latest: None,
                frames_presented: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Render one captured frame, crop-to-fill at the current bounds.
    ///
    /// Frames arrive already oriented (the capture input mirrors them).
    pub fn present(&self, frame: &Frame) {
        let bounds = self.bounds();
        if bounds.is_empty() || frame.width == 0 || frame.height == 0 {
            return;
        }
        let Some(rendered) = render_fill(frame, bounds) else {
            log::debug!(
                "Dropping malformed {}x{} frame ({} bytes)",
                frame.width,
                frame.height,
                frame.data.len()
            );
            return;
        };

        let mut state = self.lock();
        // Bounds may have changed while we were scaling.
        if state.bounds == bounds {
            state.latest = Some(rendered);
            state.frames_presented += 1;
        }
    }

    /// Change the container size. The current image is dropped; the next
    /// frame renders at the new size.
    pub fn resize(&self, bounds: Size) {
        let mut state = self.lock();
        if state.bounds != bounds {
            state.bounds = bounds;
            state.latest = None;
        }
    }

    pub fn bounds(&self) -> Size {
        self.lock().bounds
    }

    pub fn is_bound(&self) -> bool {
        self.lock().bound
    }

    fn set_bound(&self, bound: bool) {
        self.lock().bound = bound;
    }

    /// Copy of the most recently rendered frame.
    pub fn latest_frame(&self) -> Option<RgbaImage> {
        self.lock().latest.clone()
    }

    pub fn frames_presented(&self) -> u64 {
        self.lock().frames_presented
    }
}

fn render_fill(frame: &Frame, bounds: Size) -> Option<RgbaImage> {
    let bpp = frame.bytes_per_pixel();
    let expected = frame.width as usize * frame.height as usize * bpp;
    if frame.data.len() < expected {
        return None;
    }

    let mut rgba = RgbaImage::new(frame.width, frame.height);
    for (i, pixel) in rgba.pixels_mut().enumerate() {
        let offset = i * bpp;
        *pixel = Rgba([
            frame.data[offset],
            frame.data[offset + 1],
            frame.data[offset + 2],
            255,
        ]);
    }

    let crop = fill_center(Size::new(frame.width, frame.height), bounds);
    let cropped = imageops::crop_imm(&rgba, crop.x, crop.y, crop.width, crop.height).to_image();
    Some(imageops::resize(
        &cropped,
        bounds.width,
        bounds.height,
        FilterType::Nearest,
    ))
}

/// Connects a session's live output to a view's surface.
#[derive(Debug, Default)]
pub struct PreviewSurfaceBinder {
    surface: Option<Arc<PreviewSurface>>,
}

impl PreviewSurfaceBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `surface` at `bounds`.
    ///
    /// Binding the surface that is already bound only resizes it; the capture
    /// configuration is never touched.
    pub fn bind<B: CaptureBackend>(
        &mut self,
        session: &mut CaptureSession<B>,
        surface: &Arc<PreviewSurface>,
        bounds: Size,
    ) {
        surface.resize(bounds);
        if let Some(current) = &self.surface {
            if Arc::ptr_eq(current, surface) && session.has_output() {
                return;
            }
            current.set_bound(false);
        }

        session.attach_output(Arc::downgrade(surface));
        surface.set_bound(session.has_output());
        self.surface = Some(Arc::clone(surface));
        log::debug!("Preview surface bound at {}", bounds);
    }

    /// Resize the bound surface. Returns false when nothing is bound.
    pub fn resize(&self, bounds: Size) -> bool {
        match &self.surface {
            Some(surface) => {
                surface.resize(bounds);
                true
            }
            None => false,
        }
    }

    /// Detach the surface from the session. Run state is untouched.
    pub fn unbind<B: CaptureBackend>(&mut self, session: &mut CaptureSession<B>) -> bool {
        match self.surface.take() {
            Some(surface) => {
                session.detach_output();
                surface.set_bound(false);
                log::debug!("Preview surface unbound");
                true
            }
            None => false,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.surface.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{test_pattern, SessionSettings, SimulatedBackend};

    #[test]
    fn test_size_parse() {
        assert_eq!("1080x1920".parse::<Size>(), Ok(Size::new(1080, 1920)));
        assert_eq!("640X480".parse::<Size>(), Ok(Size::new(640, 480)));
        assert!("1080".parse::<Size>().is_err());
        assert!("0x10".parse::<Size>().is_err());
        assert!("axb".parse::<Size>().is_err());
    }

    #[test]
    fn test_fill_center_wide_source_in_tall_container() {
        let rect = fill_center(Size::new(1280, 720), Size::new(1080, 1920));
        assert_eq!(rect.height, 720);
        assert_eq!(rect.width, 405);
        assert_eq!(rect.x, (1280 - 405) / 2);
        assert_eq!(rect.y, 0);
    }

    #[test]
    fn test_fill_center_tall_source_in_wide_container() {
        let rect = fill_center(Size::new(100, 200), Size::new(200, 100));
        assert_eq!(rect, Rect { x: 0, y: 75, width: 100, height: 50 });
    }

    #[test]
    fn test_fill_center_same_aspect_is_identity() {
        let rect = fill_center(Size::new(640, 480), Size::new(320, 240));
        assert_eq!(rect, Rect { x: 0, y: 0, width: 640, height: 480 });
    }

    #[test]
    fn test_present_renders_at_bounds() {
        let surface = PreviewSurface::new(Size::new(20, 10));
        surface.present(&test_pattern(64, 48));

        let image = surface.latest_frame().unwrap();
        assert_eq!(image.dimensions(), (20, 10));
        assert_eq!(surface.frames_presented(), 1);
    }

    #[test]
    fn test_present_keeps_mirrored_marker() {
        // Marker column on the right after mirroring must stay on the right.
        let mut frame = test_pattern(8, 8);
        crate::camera::mirror_horizontal(&mut frame);
        let surface = PreviewSurface::new(Size::new(8, 8));
        surface.present(&frame);

        let image = surface.latest_frame().unwrap();
        assert_eq!(image.get_pixel(7, 0), &Rgba([255, 255, 255, 255]));
        assert_ne!(image.get_pixel(0, 0), &Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn test_present_ignores_short_buffers() {
        let surface = PreviewSurface::new(Size::new(4, 4));
        let mut frame = test_pattern(4, 4);
        frame.data.truncate(5);
        surface.present(&frame);
        assert!(surface.latest_frame().is_none());
    }

    #[test]
    fn test_resize_drops_stale_image() {
        let surface = PreviewSurface::new(Size::new(4, 4));
        surface.present(&test_pattern(4, 4));
        surface.resize(Size::new(8, 8));
        assert!(surface.latest_frame().is_none());
        assert_eq!(surface.bounds(), Size::new(8, 8));
    }

    #[test]
    fn test_bind_resize_unbind() {
        let backend = SimulatedBackend::default();
        let mut session = CaptureSession::new(Arc::new(backend.clone()), SessionSettings::default());
        let surface = Arc::new(PreviewSurface::new(Size::new(10, 10)));
        let mut binder = PreviewSurfaceBinder::new();

        binder.bind(&mut session, &surface, Size::new(10, 10));
        assert!(binder.is_bound());
        assert!(surface.is_bound());
        assert!(backend.stats().output_bound);

        binder.bind(&mut session, &surface, Size::new(30, 20));
        assert_eq!(surface.bounds(), Size::new(30, 20));
        assert_eq!(session.state(), crate::camera::SessionState::Unconfigured);

        assert!(binder.unbind(&mut session));
        assert!(!binder.unbind(&mut session));
        assert!(!surface.is_bound());
        assert!(!backend.stats().output_bound);
    }

    #[test]
    fn test_session_holds_only_weak_reference() {
        let backend = SimulatedBackend::default();
        let mut session = CaptureSession::new(Arc::new(backend), SessionSettings::default());
        let surface = Arc::new(PreviewSurface::new(Size::new(10, 10)));
        let mut binder = PreviewSurfaceBinder::new();
        binder.bind(&mut session, &surface, Size::new(10, 10));
        binder.unbind(&mut session);

        assert_eq!(Arc::strong_count(&surface), 1);
    }
}
