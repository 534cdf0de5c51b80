//! Frame conversion and transformation utilities.

use std::time::Instant;

use super::types::{Frame, FrameFormat};

/// Convert a nokhwa buffer to our RGB Frame format.
///
/// Returns `None` if the conversion fails (unsupported format or corrupt data).
#[cfg(feature = "native")]
pub fn convert_to_rgb(buffer: &nokhwa::Buffer) -> Option<Frame> {
    use nokhwa::pixel_format::RgbFormat;

    let decoded = buffer.decode_image::<RgbFormat>().ok()?;
    let resolution = buffer.resolution();

    Some(Frame {
        data: decoded.into_raw(),
        width: resolution.width(),
        height: resolution.height(),
        format: FrameFormat::Rgb,
        timestamp: Instant::now(),
    })
}

/// Mirror a frame horizontally (flip left-right) for selfie mode.
pub fn mirror_horizontal(frame: &mut Frame) {
    let width = frame.width as usize;
    let height = frame.height as usize;
    let bpp = frame.bytes_per_pixel();

    for y in 0..height {
        let row_start = y * width * bpp;
        let row = &mut frame.data[row_start..row_start + width * bpp];

        for x in 0..width / 2 {
            let left = x * bpp;
            let right = (width - 1 - x) * bpp;
            for i in 0..bpp {
                row.swap(left + i, right + i);
            }
        }
    }
}

/// Build a synthetic frame: a horizontal red ramp with a bright marker column on the left.
///
/// The marker makes mirroring observable once the frame reaches a surface.
pub fn test_pattern(width: u32, height: u32) -> Frame {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for _y in 0..height {
        for x in 0..width {
            if x == 0 {
                data.extend_from_slice(&[255, 255, 255]);
            } else {
                let red = (x * 255 / width.max(1)) as u8;
                data.extend_from_slice(&[red, 32, 96]);
            }
        }
    }

    Frame {
        data,
        width,
        height,
        format: FrameFormat::Rgb,
        timestamp: Instant::now(),
    }
}
