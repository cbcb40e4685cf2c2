//! Overlay rendering: a hollow rectangle per accepted detection with its
//! caption just above the top-left corner.

mod glyphs;

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::detect::AcceptedDetection;
use crate::frame::{AnnotatedFrame, Overlay};

pub const BOX_COLOR: Rgb<u8> = Rgb([0, 0, 139]);
pub const TEXT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: u32 = 2;
const CAPTION_OFFSET: i32 = 10;
const CAPTION_SCALE: f32 = 16.0;

/// Draws detections onto presentation frames.
///
/// Captions use the configured label font, or the built-in bitmap glyphs
/// when there is none.
#[derive(Default)]
pub struct OverlayRenderer {
    font: Option<FontVec>,
}

impl OverlayRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read label font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .with_context(|| format!("invalid label font {}", path.display()))?;
        Ok(Self { font: Some(font) })
    }

    /// Draw every detection onto `image`. Detections are only read.
    pub fn render(
        &self,
        session: u64,
        position: u64,
        mut image: RgbImage,
        detections: Vec<AcceptedDetection>,
    ) -> AnnotatedFrame {
        let overlays = detections
            .iter()
            .map(|detection| self.draw(&mut image, detection))
            .collect();
        AnnotatedFrame {
            session,
            position,
            image,
            detections,
            overlays,
        }
    }

    fn draw(&self, image: &mut RgbImage, detection: &AcceptedDetection) -> Overlay {
        let bbox = detection.bbox;
        for inset in 0..BOX_THICKNESS {
            let width = bbox.width.saturating_sub(2 * inset);
            let height = bbox.height.saturating_sub(2 * inset);
            if width == 0 || height == 0 {
                break;
            }
            let rect = Rect::at(bbox.x + inset as i32, bbox.y + inset as i32).of_size(width, height);
            draw_hollow_rect_mut(image, rect, BOX_COLOR);
        }

        let caption = detection.caption();
        let caption_origin = (bbox.x, bbox.y - CAPTION_OFFSET);
        // Text is laid out from its top edge; lift it so it ends at the origin.
        match &self.font {
            Some(font) => draw_text_mut(
                image,
                TEXT_COLOR,
                caption_origin.0,
                caption_origin.1 - CAPTION_SCALE as i32,
                PxScale::from(CAPTION_SCALE),
                font,
                &caption,
            ),
            None => glyphs::draw_bitmap_text(
                image,
                TEXT_COLOR,
                caption_origin.0,
                caption_origin.1 - glyphs::GLYPH_HEIGHT,
                &caption,
            ),
        }

        Overlay {
            rect: bbox,
            caption,
            caption_origin,
        }
    }
}
