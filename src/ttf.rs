use std::fs;
use std::path::Path;

use image::{Rgb, RgbImage};
use rusttype::{point, Font, Scale};
use tracing::{info, warn};

/// Glyph coverage below this is not drawn.
const ALPHA_CUTOFF: f32 = 0.2;

pub struct FontRenderer {
    font: Font<'static>,
}

impl FontRenderer {
    /// Look for `<family>.ttf` in the usual system font folders and the
    /// working directory.
    pub fn try_load(family: &str) -> Option<Self> {
        let candidates = [
            format!("/Library/Fonts/{}.ttf", family),
            format!("/System/Library/Fonts/{}.ttf", family),
            format!("/System/Library/Fonts/Supplemental/{}.ttf", family),
            format!("/usr/share/fonts/truetype/{}.ttf", family),
            format!("/usr/share/fonts/TTF/{}.ttf", family),
            format!("{}.ttf", family),
        ];

        let found = candidates
            .iter()
            .filter(|p| Path::new(p.as_str()).exists())
            .find_map(|p| {
                let font = fs::read(p).ok().and_then(Font::try_from_vec)?;
                Some((p, font))
            });

        match found {
            Some((path, font)) => {
                info!("Loaded font from {}", path);
                Some(Self { font })
            }
            None => {
                warn!("Could not find font family '{}'; using the bitmap font", family);
                None
            }
        }
    }

    /// Draw `text` with its top-left corner at (x, y).
    pub fn draw_text(&self, frame: &mut RgbImage, x: u32, y: u32, text: &str, color: Rgb<u8>, size_pt: f32) {
        let scale = Scale::uniform(size_pt);
        let ascent = self.font.v_metrics(scale).ascent;
        let origin = point(x as f32, y as f32 + ascent);
        let (width, height) = frame.dimensions();

        for glyph in self.font.layout(text, scale, origin) {
            let Some(bb) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, coverage| {
                if coverage < ALPHA_CUTOFF {
                    return;
                }
                let px = bb.min.x + gx as i32;
                let py = bb.min.y + gy as i32;
                if px < 0 || py < 0 || px as u32 >= width || py as u32 >= height {
                    return;
                }
                let dst = frame.get_pixel_mut(px as u32, py as u32);
                for c in 0..3 {
                    let blended = color[c] as f32 * coverage + dst[c] as f32 * (1.0 - coverage);
                    dst[c] = blended.round() as u8;
                }
            });
        }
    }
}
