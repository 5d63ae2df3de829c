//! Result overlay for displayed frames.
//!
//! [`plan`] turns a classification into draw instructions with no side
//! effects; [`render`] rasterizes them onto a frame copy.

use crate::classify::ClassificationResult;
use crate::config::OverlayPolicy;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{Rgb, RgbImage};

const MARGIN: u32 = 10;
const PANEL_WIDTH: u32 = 390;
const PANEL_HEIGHT: u32 = 70;
const DOT_RADIUS: u32 = 15;
/// Each 8x8 glyph pixel becomes a square this many pixels wide
const GLYPH_SCALE: u32 = 2;
const GLYPH_SIZE: u32 = 8 * GLYPH_SCALE;

const PANEL_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// How the displayed result should be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Confidently healthy
    Clear,
    /// Below the confidence threshold
    Uncertain,
    /// Confidently a flagged class
    Alert,
}

impl Severity {
    pub fn color(self) -> Rgb<u8> {
        match self {
            Severity::Clear => Rgb([0, 200, 0]),
            Severity::Uncertain => Rgb([255, 191, 0]),
            Severity::Alert => Rgb([220, 0, 0]),
        }
    }
}

pub fn assess(result: &ClassificationResult, policy: &OverlayPolicy) -> Severity {
    if !policy.is_confident(result.confidence) {
        Severity::Uncertain
    } else if result.label == policy.healthy_label {
        Severity::Clear
    } else {
        Severity::Alert
    }
}

/// A single drawing instruction in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Panel {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        color: Rgb<u8>,
    },
    /// Horizontal bar filled to `fill` (0..=1) of its width
    Bar {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        fill: f32,
        color: Rgb<u8>,
    },
    Dot {
        cx: u32,
        cy: u32,
        radius: u32,
        color: Rgb<u8>,
    },
    /// A line of text whose baseline is `y`
    Text {
        x: u32,
        y: u32,
        text: String,
        color: Rgb<u8>,
    },
}

/// Lay out the overlay for `result` on a frame of `frame_size`.
pub fn plan(
    result: &ClassificationResult,
    policy: &OverlayPolicy,
    frame_size: (u32, u32),
) -> Vec<DrawOp> {
    let (frame_width, frame_height) = frame_size;
    let severity = assess(result, policy);
    let color = severity.color();

    let panel_width = PANEL_WIDTH.min(frame_width.saturating_sub(2 * MARGIN));
    let panel_height = PANEL_HEIGHT.min(frame_height.saturating_sub(2 * MARGIN));

    let mut ops = vec![
        DrawOp::Panel {
            x: MARGIN,
            y: MARGIN,
            width: panel_width,
            height: panel_height,
            color: PANEL_COLOR,
        },
        DrawOp::Text {
            x: 2 * MARGIN,
            y: 35,
            text: format!("Disease: {}", result.display_label()),
            color,
        },
        DrawOp::Text {
            x: 2 * MARGIN,
            y: 60,
            text: format!("Confidence: {:.2}", result.confidence),
            color: TEXT_COLOR,
        },
        DrawOp::Bar {
            x: 2 * MARGIN,
            y: 66,
            width: panel_width.saturating_sub(2 * MARGIN),
            height: 6,
            fill: result.confidence.clamp(0.0, 1.0),
            color,
        },
    ];

    if frame_width > 2 * DOT_RADIUS && frame_height > 2 * DOT_RADIUS {
        ops.push(DrawOp::Dot {
            cx: frame_width - 2 * DOT_RADIUS,
            cy: 2 * DOT_RADIUS,
            radius: DOT_RADIUS,
            color,
        });
    }

    ops
}

/// Rasterize `ops` onto `image`, clipping to its bounds.
///
/// Text uses a fixed 8x8 bitmap font scaled by [`GLYPH_SCALE`]. Characters
/// outside the basic Latin set are drawn as blanks.
pub fn render(image: &mut RgbImage, ops: &[DrawOp]) {
    for op in ops {
        match *op {
            DrawOp::Panel {
                x,
                y,
                width,
                height,
                color,
            } => fill_rect(image, x, y, width, height, color),
            DrawOp::Bar {
                x,
                y,
                width,
                height,
                fill,
                color,
            } => {
                let filled = (width as f32 * fill).round() as u32;
                fill_rect(image, x, y, filled, height, color);
            }
            DrawOp::Dot { cx, cy, radius, color } => fill_circle(image, cx, cy, radius, color),
            DrawOp::Text {
                x,
                y,
                ref text,
                color,
            } => draw_text(image, x, y.saturating_sub(GLYPH_SIZE), text, color),
        }
    }
}

/// The text lines of an overlay, in drawing order.
pub fn captions(ops: &[DrawOp]) -> Vec<&str> {
    ops.iter()
        .filter_map(|op| match op {
            DrawOp::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn fill_rect(image: &mut RgbImage, x: u32, y: u32, width: u32, height: u32, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    let x1 = x.saturating_add(width).min(w);
    let y1 = y.saturating_add(height).min(h);
    for py in y.min(h)..y1 {
        for px in x.min(w)..x1 {
            image.put_pixel(px, py, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, x: u32, top: u32, text: &str, color: Rgb<u8>) {
    let mut left = x;
    for ch in text.chars() {
        if left >= image.width() {
            break;
        }
        if let Some(glyph) = BASIC_FONTS.get(ch) {
            for (row, bits) in (0u32..).zip(glyph) {
                for col in 0..8 {
                    if bits & (1u8 << col) != 0 {
                        let px = left.saturating_add(col * GLYPH_SCALE);
                        let py = top.saturating_add(row * GLYPH_SCALE);
                        fill_rect(image, px, py, GLYPH_SCALE, GLYPH_SCALE, color);
                    }
                }
            }
        }
        left = left.saturating_add(GLYPH_SIZE);
    }
}

fn fill_circle(image: &mut RgbImage, cx: u32, cy: u32, radius: u32, color: Rgb<u8>) {
    let (w, h) = image.dimensions();
    let r2 = (radius * radius) as i64;
    for py in cy.saturating_sub(radius)..cy.saturating_add(radius + 1).min(h) {
        for px in cx.saturating_sub(radius)..cx.saturating_add(radius + 1).min(w) {
            let dx = px as i64 - cx as i64;
            let dy = py as i64 - cy as i64;
            if dx * dx + dy * dy <= r2 {
                image.put_pixel(px, py, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(label: &str, confidence: f32) -> ClassificationResult {
        let labels = vec![label.to_string(), "other".to_string()];
        ClassificationResult::from_probabilities(&labels, &[confidence, 1.0 - confidence]).unwrap()
    }

    #[test]
    fn confident_healthy_is_green() {
        let policy = OverlayPolicy::default();
        assert_eq!(assess(&result("healthy", 0.9), &policy), Severity::Clear);
    }

    #[test]
    fn confident_disease_is_red() {
        let policy = OverlayPolicy::default();
        assert_eq!(assess(&result("leaf_curl", 0.7), &policy), Severity::Alert);
    }

    #[test]
    fn low_confidence_is_amber_even_when_healthy() {
        let policy = OverlayPolicy {
            confidence_threshold: 0.8,
            ..OverlayPolicy::default()
        };
        assert_eq!(assess(&result("healthy", 0.6), &policy), Severity::Uncertain);
        assert_eq!(assess(&result("whitefly", 0.6), &policy), Severity::Uncertain);
    }

    #[test]
    fn plan_carries_label_and_confidence_text() {
        let ops = plan(&result("leaf_spot", 0.85), &OverlayPolicy::default(), (640, 480));
        assert_eq!(captions(&ops), vec!["Disease: Leaf Spot", "Confidence: 0.85"]);
        assert!(ops.iter().any(|op| matches!(op, DrawOp::Dot { cx: 610, cy: 30, .. })));
    }

    #[test]
    fn render_draws_severity_color() {
        let ops = plan(&result("leaf_spot", 0.95), &OverlayPolicy::default(), (640, 480));
        let white = Rgb([255, 255, 255]);
        let mut image = RgbImage::from_pixel(640, 480, white);
        render(&mut image, &ops);

        assert_eq!(image.get_pixel(610, 30), &Severity::Alert.color());
        assert_eq!(image.get_pixel(15, 15), &PANEL_COLOR);
        assert_eq!(image.get_pixel(20, 68), &Severity::Alert.color());
        assert_eq!(image.get_pixel(320, 300), &white);
    }

    #[test]
    fn render_draws_caption_glyphs() {
        let policy = OverlayPolicy::default();
        let white = Rgb([255, 255, 255]);
        let draw = |label: &str| {
            let mut image = RgbImage::from_pixel(640, 480, white);
            render(&mut image, &plan(&result(label, 0.9), &policy, (640, 480)));
            image
        };

        let leaf_spot = draw("leaf_spot");
        let whitefly = draw("whitefly");

        // Same severity and confidence, so only the label text can differ
        assert_ne!(leaf_spot, whitefly);

        // Label line sits on the panel between its top and the baseline
        let label_pixels = (19..35)
            .flat_map(|y| (20..320).map(move |x| (x, y)))
            .filter(|&(x, y)| leaf_spot.get_pixel(x, y) == &Severity::Alert.color())
            .count();
        assert!(label_pixels > 100, "only {} label pixels", label_pixels);

        let confidence_pixels = (44..60)
            .flat_map(|y| (20..320).map(move |x| (x, y)))
            .filter(|&(x, y)| leaf_spot.get_pixel(x, y) == &TEXT_COLOR)
            .count();
        assert!(confidence_pixels > 100, "only {} caption pixels", confidence_pixels);
    }

    #[test]
    fn text_is_clipped_at_the_frame_edge() {
        let mut image = RgbImage::new(30, 12);
        let ops = [DrawOp::Text {
            x: 20,
            y: 10,
            text: "WWWW".to_string(),
            color: TEXT_COLOR,
        }];
        render(&mut image, &ops);
        assert!(image.pixels().any(|p| p == &TEXT_COLOR));
    }

    #[test]
    fn tiny_frames_do_not_panic() {
        let ops = plan(&result("healthy", 0.9), &OverlayPolicy::default(), (8, 8));
        let mut image = RgbImage::new(8, 8);
        render(&mut image, &ops);
        assert!(!ops.iter().any(|op| matches!(op, DrawOp::Dot { .. })));
    }
}
