//! Transparency detection and flattening onto a solid background.
//!
//! The flag from [`has_transparency`] is computed once per animation, from
//! its first frame, and the same flag is passed to [`composite`] for every
//! frame.

use image::{Rgb, RgbImage, RgbaImage};

/// Opaque white, the default backdrop for transparent pixels.
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// True iff any pixel of `frame` is less than fully opaque.
pub fn has_transparency(frame: &RgbaImage) -> bool {
    frame.pixels().any(|p| p[3] < u8::MAX)
}

/// Flatten `frame` to RGB.
///
/// With `transparent` set, every pixel is blended over `background` using
/// its own (straight) alpha as the weight. Otherwise the alpha channel is
/// dropped as-is.
pub fn composite(frame: &RgbaImage, transparent: bool, background: Rgb<u8>) -> RgbImage {
    let (width, height) = frame.dimensions();
    let [bg_r, bg_g, bg_b] = background.0.map(u16::from);

    RgbImage::from_fn(width, height, |x, y| {
        let p = frame.get_pixel(x, y);
        if transparent {
            let a = u16::from(p[3]);
            let inv = 255 - a;
            Rgb([
                blend(p[0], a, bg_r, inv),
                blend(p[1], a, bg_g, inv),
                blend(p[2], a, bg_b, inv),
            ])
        } else {
            Rgb([p[0], p[1], p[2]])
        }
    })
}

fn blend(src: u8, a: u16, bg: u16, inv: u16) -> u8 {
    (mul_div255(u16::from(src), a) + mul_div255(bg, inv)).min(255) as u8
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}
