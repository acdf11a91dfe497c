//! Generated image fixtures
#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;

/// Bytes that no image decoder accepts.
pub const CORRUPT_IMAGE: &[u8] = b"\x89PNG\r\n\x1a\nthis is not really a png";

/// A small RGBA gradient encoded as PNG, with a half-transparent right column.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        let alpha = if x + 1 == width { 128 } else { 255 };
        Rgba([r, g, 96, alpha])
    });

    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("encode fixture png");
    buf
}

/// Source keys used across tests.
pub const CAT_KEY: &str = "images/cat.png";
pub const DOG_KEY: &str = "images/dog.png";
pub const BROKEN_KEY: &str = "images/broken.png";
