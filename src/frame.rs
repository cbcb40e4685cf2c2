//! Frame types flowing through a session.
//!
//! - `RawFrame`: one decoded RGB frame plus its 1-based decode position.
//! - `ModelInput`: the network's view of a frame (NCHW f32, values in 0..1).
//! - `AnnotatedFrame`: the presentation-sized image with overlays drawn on it,
//!   ready for the presentation sink.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::detect::{AcceptedDetection, ModelDescriptor, PixelBox};

/// Decoded frame in packed RGB24.
pub struct RawFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1-based position in decode order.
    pub position: u64,
}

impl RawFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, position: u64) -> Self {
        Self {
            data,
            width,
            height,
            position,
        }
    }

    /// Empty or malformed frames end the stream rather than fail the session.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.len() != self.expected_len()
    }

    fn expected_len(&self) -> usize {
        (self.width as usize)
            .saturating_mul(self.height as usize)
            .saturating_mul(3)
    }

    pub fn into_image(self) -> Result<RgbImage> {
        let (width, height) = (self.width, self.height);
        RgbImage::from_raw(width, height, self.data)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{} RGB", width, height))
    }

    /// Resize to the presentation surface size.
    pub fn to_presentation(self, width: u32, height: u32) -> Result<RgbImage> {
        let image = self.into_image()?;
        if image.width() == width && image.height() == height {
            return Ok(image);
        }
        Ok(imageops::resize(&image, width, height, FilterType::Triangle))
    }
}

/// Network input: planar channels, row-major, values scaled to 0..1.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelInput {
    pub width: u32,
    pub height: u32,
    /// `3 * height * width` values, channel-major.
    pub data: Vec<f32>,
}

impl ModelInput {
    /// Scale `image` to the model's input size and normalise. Channel order is
    /// RGB unless the descriptor asks for BGR.
    pub fn from_image(image: &RgbImage, descriptor: &ModelDescriptor) -> Self {
        let (width, height) = (descriptor.input_width, descriptor.input_height);
        let scaled;
        let source = if image.width() == width && image.height() == height {
            image
        } else {
            scaled = imageops::resize(image, width, height, FilterType::Triangle);
            &scaled
        };

        let plane = (width as usize) * (height as usize);
        let mut data = vec![0.0f32; plane * 3];
        for (index, pixel) in source.pixels().enumerate() {
            let [r, g, b] = pixel.0;
            let (first, third) = if descriptor.swap_rb { (b, r) } else { (r, b) };
            data[index] = first as f32 / 255.0;
            data[plane + index] = g as f32 / 255.0;
            data[2 * plane + index] = third as f32 / 255.0;
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; 3 * width as usize * height as usize],
        }
    }
}

/// One drawn detection: the rectangle and the caption placed above it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Overlay {
    pub rect: PixelBox,
    pub caption: String,
    pub caption_origin: (i32, i32),
}

/// A finished frame for the presentation sink.
pub struct AnnotatedFrame {
    /// Session that produced the frame.
    pub session: u64,
    /// Decode position of the source frame.
    pub position: u64,
    pub image: RgbImage,
    pub detections: Vec<AcceptedDetection>,
    pub overlays: Vec<Overlay>,
}
