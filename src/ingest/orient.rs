//! Frame transformer.
//!
//! Bakes a frame's rotation hint and mirror flag into the pixel data so that
//! detection and snapshotting both see the upright image. Rotation is applied
//! first (clockwise), then the horizontal flip about the vertical center.
//! Inputs are never mutated.

use image::imageops;
use image::RgbaImage;

use super::normalize::to_rgba;
use crate::frame::{RawFrame, Rotation};

/// Produce the canonical upright image for a raw frame.
pub fn upright(frame: &RawFrame) -> RgbaImage {
    let sensor = to_rgba(frame);
    orient(&sensor, frame.rotation, frame.mirrored)
}

/// Rotate clockwise by `rotation`, then mirror horizontally when `mirrored`.
pub fn orient(image: &RgbaImage, rotation: Rotation, mirrored: bool) -> RgbaImage {
    let rotated = rotate(image, rotation);
    if mirrored {
        imageops::flip_horizontal(&rotated)
    } else {
        rotated
    }
}

/// Undo `orient`: unmirror, then rotate back.
pub fn restore(image: &RgbaImage, rotation: Rotation, mirrored: bool) -> RgbaImage {
    let unmirrored = if mirrored {
        imageops::flip_horizontal(image)
    } else {
        image.clone()
    };
    rotate(&unmirrored, rotation.inverse())
}

fn rotate(image: &RgbaImage, rotation: Rotation) -> RgbaImage {
    match rotation {
        Rotation::Deg0 => image.clone(),
        Rotation::Deg90 => imageops::rotate90(image),
        Rotation::Deg180 => imageops::rotate180(image),
        Rotation::Deg270 => imageops::rotate270(image),
    }
}

/// Output dimensions of `orient` for an input of `width` x `height`.
pub fn oriented_dimensions(width: u32, height: u32, rotation: Rotation) -> (u32, u32) {
    if rotation.swaps_dimensions() {
        (height, width)
    } else {
        (width, height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use image::Rgba;

    fn numbered(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let n = (y * width + x) as u8;
            Rgba([n, n.wrapping_mul(3), x as u8, y as u8])
        })
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let image = numbered(4, 3);
        for rotation in Rotation::ALL {
            for mirrored in [false, true] {
                let out = orient(&image, rotation, mirrored);
                assert_eq!(out.dimensions(), oriented_dimensions(4, 3, rotation));
            }
        }
    }

    #[test]
    fn restore_recovers_every_orientation() {
        let image = numbered(5, 2);
        for rotation in Rotation::ALL {
            for mirrored in [false, true] {
                let out = orient(&image, rotation, mirrored);
                assert_eq!(restore(&out, rotation, mirrored), image);
            }
        }
    }

    #[test]
    fn rotate_90_is_clockwise() {
        // 2x1: [A B] becomes a 1x2 column with A on top.
        let image = numbered(2, 1);
        let out = orient(&image, Rotation::Deg90, false);
        assert_eq!(out.dimensions(), (1, 2));
        assert_eq!(out.get_pixel(0, 0), image.get_pixel(0, 0));
        assert_eq!(out.get_pixel(0, 1), image.get_pixel(1, 0));
    }

    #[test]
    fn mirror_flips_about_vertical_center() {
        let image = numbered(3, 1);
        let out = orient(&image, Rotation::Deg0, true);
        assert_eq!(out.get_pixel(0, 0), image.get_pixel(2, 0));
        assert_eq!(out.get_pixel(1, 0), image.get_pixel(1, 0));
        assert_eq!(out.get_pixel(2, 0), image.get_pixel(0, 0));
    }

    #[test]
    fn upright_leaves_frame_untouched() {
        let data: Vec<u8> = (0..24).collect();
        let frame = RawFrame::new(data.clone(), 3, 2, PixelFormat::Rgba8888)
            .unwrap()
            .with_orientation(Rotation::Deg270, true);
        let out = upright(&frame);
        assert_eq!(out.dimensions(), (2, 3));
        assert_eq!(frame.pixels(), data.as_slice());
    }
}
