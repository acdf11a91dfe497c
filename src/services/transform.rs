//! Pixel-level image transforms.
//!
//! Every transform is a pure function from encoded image bytes to PNG bytes.
//! The pipeline iterates over a configured list of them, so adding a transform
//! is a matter of configuration.

use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use strum::{Display, EnumString};

use crate::config::AppConfig;

/// A named image transform and the folder its results are uploaded to.
pub trait ImageTransform: Send + Sync {
    /// Suffix used in scratch file names and result keys.
    fn name(&self) -> &str;

    fn destination_folder(&self) -> &str;

    /// Transform encoded image bytes into PNG bytes.
    fn apply(&self, source: &[u8]) -> Result<Vec<u8>, TransformError>;
}

pub type TransformSet = Arc<[Arc<dyn ImageTransform>]>;

/// Transforms selectable by name in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum TransformKind {
    Bright,
    Monochrome,
}

/// Gamma adjustment of the colour channels. Gamma below 1 brightens.
pub struct Brighten {
    gamma: f32,
    folder: String,
}

impl Brighten {
    pub fn new(gamma: f32, folder: impl Into<String>) -> Self {
        Self {
            gamma,
            folder: folder.into(),
        }
    }

    fn lookup_table(&self) -> [u8; 256] {
        let mut table = [0u8; 256];
        for (value, slot) in table.iter_mut().enumerate() {
            let normalized = value as f32 / 255.0;
            *slot = (normalized.powf(self.gamma) * 255.0).round().clamp(0.0, 255.0) as u8;
        }
        table
    }
}

impl ImageTransform for Brighten {
    fn name(&self) -> &str {
        "bright"
    }

    fn destination_folder(&self) -> &str {
        &self.folder
    }

    fn apply(&self, source: &[u8]) -> Result<Vec<u8>, TransformError> {
        let mut pixels = decode(source)?.to_rgba8();
        let table = self.lookup_table();
        for pixel in pixels.pixels_mut() {
            for channel in pixel.0.iter_mut().take(3) {
                *channel = table[*channel as usize];
            }
        }
        encode_png(DynamicImage::ImageRgba8(pixels))
    }
}

/// Grayscale conversion. Transparent areas are composited onto white first.
pub struct Monochrome {
    folder: String,
}

impl Monochrome {
    pub fn new(folder: impl Into<String>) -> Self {
        Self {
            folder: folder.into(),
        }
    }
}

impl ImageTransform for Monochrome {
    fn name(&self) -> &str {
        "monochrome"
    }

    fn destination_folder(&self) -> &str {
        &self.folder
    }

    fn apply(&self, source: &[u8]) -> Result<Vec<u8>, TransformError> {
        let rgba = decode(source)?.to_rgba8();
        encode_png(DynamicImage::ImageLuma8(to_gray(&rgba)))
    }
}

fn to_gray(rgba: &RgbaImage) -> GrayImage {
    GrayImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let alpha = a as f32 / 255.0;
        let over_white = |c: u8| c as f32 * alpha + 255.0 * (1.0 - alpha);
        // ITU-R BT.709 luma
        let luma = 0.2125 * over_white(r) + 0.7154 * over_white(g) + 0.0721 * over_white(b);
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

fn decode(source: &[u8]) -> Result<DynamicImage, TransformError> {
    image::load_from_memory(source).map_err(TransformError::Decode)
}

fn encode_png(image: DynamicImage) -> Result<Vec<u8>, TransformError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(TransformError::Encode)?;
    Ok(buf)
}

/// Instantiate transforms by name, in order, all uploading to `folder`.
pub fn build_transforms(
    names: &[String],
    folder: &str,
    gamma: f32,
) -> Result<TransformSet, TransformError> {
    names
        .iter()
        .map(|name| -> Result<Arc<dyn ImageTransform>, TransformError> {
            let kind: TransformKind = name
                .parse()
                .map_err(|_| TransformError::UnknownKind(name.clone()))?;
            let transform: Arc<dyn ImageTransform> = match kind {
                TransformKind::Bright => Arc::new(Brighten::new(gamma, folder)),
                TransformKind::Monochrome => Arc::new(Monochrome::new(folder)),
            };
            Ok(transform)
        })
        .collect()
}

pub fn transforms_from_config(config: &AppConfig) -> Result<TransformSet, TransformError> {
    build_transforms(&config.transforms, &config.output_folder, config.brighten_gamma)
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Failed to decode source image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode transformed image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Unknown transform: {0}")]
    UnknownKind(String),

    #[error("Transform worker aborted: {0}")]
    Aborted(String),
}
