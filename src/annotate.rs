//! Image decode and box annotation.

use std::io::Cursor;

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detect::BoundingBox;

/// Upper bound on an encoded input image.
pub const MAX_IMAGE_BYTES: usize = 32 * 1024 * 1024;

/// Decode an encoded image buffer (JPEG or PNG) into RGB8 pixels.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.len() > MAX_IMAGE_BYTES {
        anyhow::bail!(
            "encoded image is {} bytes, limit is {}",
            bytes.len(),
            MAX_IMAGE_BYTES
        );
    }
    let image = image::load_from_memory(bytes).context("decode image")?;
    Ok(image.to_rgb8())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnnotationStyle {
    pub color: [u8; 3],
    /// Border width in pixels, drawn outward from the box edge.
    pub thickness: u32,
    pub jpeg_quality: u8,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            color: [255, 0, 0],
            thickness: 2,
            jpeg_quality: 90,
        }
    }
}

/// Draws bounding boxes onto a copy of an image and re-encodes it as JPEG.
#[derive(Clone, Debug, Default)]
pub struct Annotator {
    style: AnnotationStyle,
}

impl Annotator {
    pub fn new(style: AnnotationStyle) -> Self {
        Self { style }
    }

    /// Draw `boxes` onto a copy of `image`. The source image is untouched.
    pub fn draw(&self, image: &RgbImage, boxes: &[BoundingBox]) -> RgbImage {
        let mut canvas = image.clone();
        let (width, height) = canvas.dimensions();
        if width == 0 || height == 0 {
            return canvas;
        }
        let color = Rgb(self.style.color);
        for bbox in boxes {
            let Some(base) = clamp_to_image(bbox, width, height) else {
                continue;
            };
            for i in 0..self.style.thickness.max(1) {
                let grow = i as i32;
                let rect = Rect::at(base.left() - grow, base.top() - grow)
                    .of_size(base.width() + 2 * i, base.height() + 2 * i);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }
        }
        canvas
    }

    /// Encode an image as JPEG with the configured quality.
    pub fn encode(&self, image: &RgbImage) -> Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut out, self.style.jpeg_quality);
        image
            .write_with_encoder(encoder)
            .context("encode annotated image")?;
        Ok(out.into_inner())
    }

    /// Draw and encode in one step.
    pub fn annotate(&self, image: &RgbImage, boxes: &[BoundingBox]) -> Result<Vec<u8>> {
        self.encode(&self.draw(image, boxes))
    }
}

/// Integer rect inside the image, or `None` when the box misses it entirely.
fn clamp_to_image(bbox: &BoundingBox, width: u32, height: u32) -> Option<Rect> {
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;
    if !(bbox.x1.is_finite() && bbox.y1.is_finite() && bbox.x2.is_finite() && bbox.y2.is_finite())
    {
        return None;
    }
    let x1 = bbox.x1.min(bbox.x2).clamp(0.0, max_x).round() as i32;
    let y1 = bbox.y1.min(bbox.y2).clamp(0.0, max_y).round() as i32;
    let x2 = bbox.x1.max(bbox.x2).clamp(0.0, max_x).round() as i32;
    let y2 = bbox.y1.max(bbox.y2).clamp(0.0, max_y).round() as i32;
    if bbox.x2.max(bbox.x1) < 0.0 || bbox.y2.max(bbox.y1) < 0.0 {
        return None;
    }
    if bbox.x1.min(bbox.x2) > max_x || bbox.y1.min(bbox.y2) > max_y {
        return None;
    }
    let w = (x2 - x1 + 1).max(1) as u32;
    let h = (y2 - y1 + 1).max(1) as u32;
    Some(Rect::at(x1, y1).of_size(w, h))
}
