//! Draws the mesh, capture progress and prediction onto an outgoing frame.

use image::{Rgb, RgbImage};

use crate::font;
use crate::ttf::FontRenderer;
use crate::types::Landmarks;

pub const CAPTURE_TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 255]);
pub const PREDICTION_TEXT_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CAPTURE_TEXT_ORIGIN: (u32, u32) = (10, 30);
const PREDICTION_TEXT_ORIGIN: (u32, u32) = (10, 70);
const DEFAULT_MESH_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

/// Face-mesh contours as closed or open polylines of landmark indices:
/// face oval, lips, eyes and eyebrows.
const MESH_CONTOURS: &[&[usize]] = &[
    &[
        10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
        148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109, 10,
    ],
    &[61, 146, 91, 181, 84, 17, 314, 405, 321, 375, 291],
    &[61, 185, 40, 39, 37, 0, 267, 269, 270, 409, 291],
    &[78, 95, 88, 178, 87, 14, 317, 402, 318, 324, 308],
    &[78, 191, 80, 81, 82, 13, 312, 311, 310, 415, 308],
    &[263, 249, 390, 373, 374, 380, 381, 382, 362],
    &[263, 466, 388, 387, 386, 385, 384, 398, 362],
    &[33, 7, 163, 144, 145, 153, 154, 155, 133],
    &[33, 246, 161, 160, 159, 158, 157, 173, 133],
    &[276, 283, 282, 295, 285],
    &[300, 293, 334, 296, 336],
    &[46, 53, 52, 65, 55],
    &[70, 63, 105, 66, 107],
];

/// Everything painted on one frame. Fields left `None` are not drawn.
#[derive(Debug, Default, Clone, Copy)]
pub struct Annotations<'a> {
    pub mesh: Option<&'a Landmarks>,
    pub capture: Option<&'a str>,
    pub prediction: Option<&'a str>,
}

enum TextRenderer {
    TrueType { font: FontRenderer, size_pt: f32 },
    Bitmap { scale: u32 },
}

pub struct FramePainter {
    show_mesh: bool,
    mesh_color: Rgb<u8>,
    dot_size: u32,
    text: TextRenderer,
}

impl FramePainter {
    /// Uses the TrueType family when it can be found, the bitmap font otherwise.
    pub fn new(show_mesh: bool, mesh_color_hex: &str, dot_size: u32, font_family: &str, font_size_pt: u32) -> Self {
        let text = match FontRenderer::try_load(font_family) {
            Some(font) => TextRenderer::TrueType {
                font,
                size_pt: font_size_pt as f32,
            },
            None => TextRenderer::Bitmap {
                scale: (font_size_pt / 6).max(1),
            },
        };
        Self {
            show_mesh,
            mesh_color: parse_hex_color(mesh_color_hex),
            dot_size: dot_size.max(1),
            text,
        }
    }

    /// Bitmap-only painter, no font lookup.
    pub fn bitmap(show_mesh: bool, mesh_color: Rgb<u8>, dot_size: u32, scale: u32) -> Self {
        Self {
            show_mesh,
            mesh_color,
            dot_size: dot_size.max(1),
            text: TextRenderer::Bitmap { scale: scale.max(1) },
        }
    }

    pub fn paint(&self, frame: &mut RgbImage, annotations: &Annotations<'_>) {
        if self.show_mesh {
            if let Some(mesh) = annotations.mesh {
                self.draw_mesh(frame, mesh);
            }
        }
        if let Some(text) = annotations.capture {
            let (x, y) = CAPTURE_TEXT_ORIGIN;
            self.draw_text(frame, x, y, text, CAPTURE_TEXT_COLOR);
        }
        if let Some(label) = annotations.prediction {
            let (x, y) = PREDICTION_TEXT_ORIGIN;
            self.draw_text(frame, x, y, &format!("Prediction: {}", label), PREDICTION_TEXT_COLOR);
        }
    }

    fn draw_mesh(&self, frame: &mut RgbImage, mesh: &Landmarks) {
        for contour in MESH_CONTOURS {
            for pair in contour.windows(2) {
                if let (Some(a), Some(b)) = (mesh.points.get(pair[0]), mesh.points.get(pair[1])) {
                    draw_segment(frame, (a.x, a.y), (b.x, b.y), self.mesh_color);
                }
            }
        }

        let (width, height) = frame.dimensions();
        for p in &mesh.points {
            if p.x < 0.0 || p.y < 0.0 {
                continue;
            }
            let (x, y) = (p.x as u32, p.y as u32);
            for py in y..y.saturating_add(self.dot_size).min(height) {
                for px in x..x.saturating_add(self.dot_size).min(width) {
                    frame.put_pixel(px, py, self.mesh_color);
                }
            }
        }
    }

    fn draw_text(&self, frame: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>) {
        match &self.text {
            TextRenderer::TrueType { font, size_pt } => font.draw_text(frame, x, y, text, color, *size_pt),
            TextRenderer::Bitmap { scale } => font::draw_text_line(frame, x, y, text, color, *scale),
        }
    }
}

/// One-pixel line, sampled once per pixel along the longer axis.
fn draw_segment(frame: &mut RgbImage, from: (f32, f32), to: (f32, f32), color: Rgb<u8>) {
    let (dx, dy) = (to.0 - from.0, to.1 - from.1);
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as u32;
    let (width, height) = frame.dimensions();
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let (x, y) = ((from.0 + dx * t).round(), (from.1 + dy * t).round());
        if x >= 0.0 && y >= 0.0 && (x as u32) < width && (y as u32) < height {
            frame.put_pixel(x as u32, y as u32, color);
        }
    }
}

/// `#RRGGBB` to a pixel; anything else falls back to red.
pub fn parse_hex_color(hex: &str) -> Rgb<u8> {
    let Some(digits) = hex.strip_prefix('#') else {
        return DEFAULT_MESH_COLOR;
    };
    if digits.len() != 6 || !digits.is_ascii() {
        return DEFAULT_MESH_COLOR;
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
    match (channel(0), channel(2), channel(4)) {
        (Some(r), Some(g), Some(b)) => Rgb([r, g, b]),
        _ => DEFAULT_MESH_COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point3D;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex_color("#FF0000"), Rgb([255, 0, 0]));
        assert_eq!(parse_hex_color("#00ff00"), Rgb([0, 255, 0]));
        assert_eq!(parse_hex_color("#0A6E50"), Rgb([10, 110, 80]));
        assert_eq!(parse_hex_color("invalid"), Rgb([255, 0, 0]));
        assert_eq!(parse_hex_color("#GG0000"), Rgb([255, 0, 0]));
    }

    #[test]
    fn mesh_dots_are_clipped_and_optional() {
        let mesh = Landmarks::new(vec![
            Point3D { x: 3.0, y: 3.0, z: 0.0 },
            Point3D { x: 9.5, y: 9.5, z: 0.0 },
            Point3D { x: -4.0, y: 2.0, z: 0.0 },
        ]);
        let white = Rgb([255, 255, 255]);
        let painter = FramePainter::bitmap(true, white, 2, 1);
        let mut frame = RgbImage::new(10, 10);
        painter.paint(
            &mut frame,
            &Annotations {
                mesh: Some(&mesh),
                ..Annotations::default()
            },
        );
        assert_eq!(*frame.get_pixel(4, 4), white);
        assert_eq!(*frame.get_pixel(9, 9), white);
        assert_eq!(*frame.get_pixel(0, 2), Rgb([0, 0, 0]));

        let hidden = FramePainter::bitmap(false, white, 2, 1);
        let mut blank = RgbImage::new(10, 10);
        hidden.paint(
            &mut blank,
            &Annotations {
                mesh: Some(&mesh),
                ..Annotations::default()
            },
        );
        assert!(blank.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn prediction_text_lands_below_capture_text() {
        let painter = FramePainter::bitmap(false, DEFAULT_MESH_COLOR, 1, 1);
        let mut frame = RgbImage::new(120, 90);
        painter.paint(
            &mut frame,
            &Annotations {
                mesh: None,
                capture: Some("Capturing: a (1/2)"),
                prediction: Some("happy"),
            },
        );

        let rows_with = |color: Rgb<u8>| {
            (0..frame.height())
                .filter(|&y| (0..frame.width()).any(|x| *frame.get_pixel(x, y) == color))
                .collect::<Vec<_>>()
        };
        let capture_rows = rows_with(CAPTURE_TEXT_COLOR);
        let prediction_rows = rows_with(PREDICTION_TEXT_COLOR);
        assert_eq!(capture_rows.first(), Some(&30));
        assert_eq!(prediction_rows.first(), Some(&70));
    }

    #[test]
    fn contours_join_mesh_points() {
        let mut points = vec![Point3D { x: 0.0, y: 0.0, z: 0.0 }; 468];
        points[10] = Point3D { x: 2.0, y: 5.0, z: 0.0 };
        points[338] = Point3D { x: 8.0, y: 5.0, z: 0.0 };
        let mesh = Landmarks::new(points);

        let white = Rgb([255, 255, 255]);
        let painter = FramePainter::bitmap(true, white, 1, 1);
        let mut frame = RgbImage::new(10, 10);
        painter.paint(
            &mut frame,
            &Annotations {
                mesh: Some(&mesh),
                ..Annotations::default()
            },
        );
        for x in 2..=8 {
            assert_eq!(*frame.get_pixel(x, 5), white, "gap at x={x}");
        }
        assert_eq!(*frame.get_pixel(5, 8), Rgb([0, 0, 0]));
    }
}
