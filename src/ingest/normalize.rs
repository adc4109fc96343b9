use image::{Rgba, RgbaImage};

use crate::frame::{nv12_chroma_stride, PixelFormat, RawFrame};

/// Convert a frame's buffer to an RGBA image in sensor orientation.
///
/// `RawFrame::new` has already validated the buffer length for the frame's
/// format, so this conversion cannot fail.
pub fn to_rgba(frame: &RawFrame) -> RgbaImage {
    let pixels = frame.pixels();
    let w = frame.width as usize;
    match frame.format {
        PixelFormat::Rgba8888 => RgbaImage::from_fn(frame.width, frame.height, |x, y| {
            let i = (y as usize * w + x as usize) * 4;
            Rgba([pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]])
        }),
        PixelFormat::Rgb24 => RgbaImage::from_fn(frame.width, frame.height, |x, y| {
            let i = (y as usize * w + x as usize) * 3;
            Rgba([pixels[i], pixels[i + 1], pixels[i + 2], 255])
        }),
        PixelFormat::Nv12 => nv12_to_rgba(pixels, frame.width, frame.height),
    }
}

fn nv12_to_rgba(pixels: &[u8], width: u32, height: u32) -> RgbaImage {
    let w = width as usize;
    let y_plane = w * height as usize;
    let chroma_stride = nv12_chroma_stride(width);
    RgbaImage::from_fn(width, height, |i, j| {
        let (i, j) = (i as usize, j as usize);
        let y = pixels[j * w + i] as f32;
        let uv_index = y_plane + (j / 2) * chroma_stride + (i / 2) * 2;
        let u = pixels[uv_index] as f32 - 128.0;
        let v = pixels[uv_index + 1] as f32 - 128.0;

        let r = y + 1.402_f32 * v;
        let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
        let b = y + 1.772_f32 * u;

        Rgba([clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b), 255])
    })
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
