use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{AuthMethod, CaptureProvenance};

/// Canonical artifact dimensions. Every accepted signature is rasterized
/// onto this grid regardless of the source canvas.
pub const CANVAS_WIDTH: u32 = 400;
pub const CANVAS_HEIGHT: u32 = 160;

/// Minimum fraction of the source canvas the drawn bounding box must cover.
pub const MIN_INK_RATIO: f32 = 0.01;

/// Error raised when raw input cannot become a usable signature.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("signature input is empty")]
    EmptyInput,
    #[error("signature covers {coverage:.4} of the canvas, below the {MIN_INK_RATIO} minimum")]
    InsufficientInk { coverage: f32 },
    #[error("image dimensions {width}x{height} do not match {len} pixels")]
    MalformedImage { width: u32, height: u32, len: usize },
}

/// One sampled point of a stroke, in source-canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokePoint {
    pub x: f32,
    pub y: f32,
}

/// Raw signature input: either sampled stroke paths on a declared canvas, or
/// a grayscale image where any nonzero pixel counts as ink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SignatureInput {
    Strokes {
        width: u32,
        height: u32,
        strokes: Vec<Vec<StrokePoint>>,
    },
    Image {
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    },
}

/// Caller-supplied facts attached to the artifact as provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub captured_at: DateTime<Utc>,
    pub ip_address: String,
    pub geolocation: Option<String>,
    pub auth_method: AuthMethod,
}

/// Canonical signature bitmap plus provenance. The bitmap is row-major,
/// bit-packed, `CANVAS_WIDTH * CANVAS_HEIGHT / 8` bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureArtifact {
    pub bitmap: Vec<u8>,
    pub ink_coverage: f32,
    pub provenance: CaptureProvenance,
}

impl SignatureArtifact {
    pub fn pixel(&self, x: u32, y: u32) -> bool {
        let index = (y * CANVAS_WIDTH + x) as usize;
        self.bitmap[index / 8] & (1 << (index % 8)) != 0
    }

    pub fn lit_pixels(&self) -> usize {
        self.bitmap
            .iter()
            .map(|byte| byte.count_ones() as usize)
            .sum()
    }
}

/// Converts raw stroke or image input into the canonical artifact. Pure
/// function of its inputs: same input and metadata, same artifact.
pub fn capture(
    input: &SignatureInput,
    metadata: &CaptureMetadata,
) -> Result<SignatureArtifact, CaptureError> {
    let (bitmap, coverage) = match input {
        SignatureInput::Strokes {
            width,
            height,
            strokes,
        } => rasterize_strokes(*width, *height, strokes)?,
        SignatureInput::Image {
            width,
            height,
            pixels,
        } => rasterize_image(*width, *height, pixels)?,
    };

    Ok(SignatureArtifact {
        bitmap,
        ink_coverage: coverage,
        provenance: CaptureProvenance {
            captured_at: metadata.captured_at,
            ip_address: metadata.ip_address.clone(),
            geolocation: metadata.geolocation.clone(),
            auth_method: metadata.auth_method,
        },
    })
}

fn rasterize_strokes(
    width: u32,
    height: u32,
    strokes: &[Vec<StrokePoint>],
) -> Result<(Vec<u8>, f32), CaptureError> {
    let points: Vec<StrokePoint> = strokes.iter().flatten().copied().collect();
    if points.is_empty() || width == 0 || height == 0 {
        return Err(CaptureError::EmptyInput);
    }

    let coverage = bounding_box_coverage(&points, width as f32, height as f32);
    if coverage < MIN_INK_RATIO {
        return Err(CaptureError::InsufficientInk { coverage });
    }

    let mut bitmap = empty_bitmap();
    let scale_x = (CANVAS_WIDTH - 1) as f32 / (width.max(2) - 1) as f32;
    let scale_y = (CANVAS_HEIGHT - 1) as f32 / (height.max(2) - 1) as f32;

    for stroke in strokes {
        for pair in stroke.windows(2) {
            draw_segment(&mut bitmap, pair[0], pair[1], scale_x, scale_y);
        }
        if stroke.len() == 1 {
            set_scaled(&mut bitmap, stroke[0], scale_x, scale_y);
        }
    }

    Ok((bitmap, coverage))
}

fn rasterize_image(width: u32, height: u32, pixels: &[u8]) -> Result<(Vec<u8>, f32), CaptureError> {
    if width == 0 || height == 0 {
        return Err(CaptureError::EmptyInput);
    }
    if pixels.len() != (width * height) as usize {
        return Err(CaptureError::MalformedImage {
            width,
            height,
            len: pixels.len(),
        });
    }

    let mut lit: Vec<StrokePoint> = Vec::new();
    for y in 0..height {
        for x in 0..width {
            if pixels[(y * width + x) as usize] != 0 {
                lit.push(StrokePoint {
                    x: x as f32,
                    y: y as f32,
                });
            }
        }
    }

    if lit.is_empty() {
        return Err(CaptureError::EmptyInput);
    }

    let coverage = bounding_box_coverage(&lit, width as f32, height as f32);
    if coverage < MIN_INK_RATIO {
        return Err(CaptureError::InsufficientInk { coverage });
    }

    let mut bitmap = empty_bitmap();
    let scale_x = (CANVAS_WIDTH - 1) as f32 / (width.max(2) - 1) as f32;
    let scale_y = (CANVAS_HEIGHT - 1) as f32 / (height.max(2) - 1) as f32;
    for point in &lit {
        set_scaled(&mut bitmap, *point, scale_x, scale_y);
    }

    Ok((bitmap, coverage))
}

fn bounding_box_coverage(points: &[StrokePoint], width: f32, height: f32) -> f32 {
    let mut min_x = f32::MAX;
    let mut min_y = f32::MAX;
    let mut max_x = f32::MIN;
    let mut max_y = f32::MIN;

    for point in points {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }

    let area = (max_x - min_x).max(0.0) * (max_y - min_y).max(0.0);
    area / (width * height)
}

fn empty_bitmap() -> Vec<u8> {
    vec![0u8; (CANVAS_WIDTH * CANVAS_HEIGHT / 8) as usize]
}

fn set_pixel(bitmap: &mut [u8], x: u32, y: u32) {
    let x = x.min(CANVAS_WIDTH - 1);
    let y = y.min(CANVAS_HEIGHT - 1);
    let index = (y * CANVAS_WIDTH + x) as usize;
    bitmap[index / 8] |= 1 << (index % 8);
}

fn set_scaled(bitmap: &mut [u8], point: StrokePoint, scale_x: f32, scale_y: f32) {
    let x = (point.x.max(0.0) * scale_x).round() as u32;
    let y = (point.y.max(0.0) * scale_y).round() as u32;
    set_pixel(bitmap, x, y);
}

fn draw_segment(
    bitmap: &mut [u8],
    from: StrokePoint,
    to: StrokePoint,
    scale_x: f32,
    scale_y: f32,
) {
    let x0 = from.x * scale_x;
    let y0 = from.y * scale_y;
    let x1 = to.x * scale_x;
    let y1 = to.y * scale_y;

    let steps = (x1 - x0).abs().max((y1 - y0).abs()).ceil() as u32;
    if steps == 0 {
        set_scaled(bitmap, from, scale_x, scale_y);
        return;
    }

    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        let x = (x0 + (x1 - x0) * t).max(0.0).round() as u32;
        let y = (y0 + (y1 - y0) * t).max(0.0).round() as u32;
        set_pixel(bitmap, x, y);
    }
}
