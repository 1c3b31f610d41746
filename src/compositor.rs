use ab_glyph::{FontRef, PxScale};
use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;
use std::path::{Path, PathBuf};

use crate::types::{Artwork, DisplayState};

/// Fonts tried in order when no font is configured
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/SFNS.ttf",
];

pub const CARD_WIDTH: u32 = 800;
pub const CARD_HEIGHT: u32 = 240;
pub const ARTWORK_SIZE: u32 = 200;
const PADDING: u32 = 20;
const TEXT_X_OFFSET: i32 = (PADDING * 2 + ARTWORK_SIZE) as i32;
const DEBUG_LINE_HEIGHT: u32 = 18;

const DEFAULT_BACKGROUND: [u8; 3] = [0x12, 0x12, 0x12];
const PLACEHOLDER_COLOR: Rgba<u8> = Rgba([0x33, 0x33, 0x33, 255]);

/// Pick a readable text color for the card background
fn text_color_for(background: [u8; 3]) -> Rgba<u8> {
    let [r, g, b] = background;
    let luminance = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    if luminance < 128.0 {
        Rgba([255, 255, 255, 255])
    } else {
        Rgba([0, 0, 0, 255])
    }
}

/// Parse `#rrggbb` (or `rrggbb`) into RGB components
pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }

    let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
    Some([channel(0..2)?, channel(2..4)?, channel(4..6)?])
}

fn rgba(rgb: [u8; 3]) -> Rgba<u8> {
    Rgba([rgb[0], rgb[1], rgb[2], 255])
}

pub struct Compositor {
    font: Vec<u8>,
}

impl Compositor {
    /// Load the configured font, or the first system font found
    pub fn new(font_path: Option<&Path>) -> Result<Self> {
        let candidates: Vec<PathBuf> = match font_path {
            Some(path) => vec![path.to_path_buf()],
            None => FONT_CANDIDATES.iter().map(PathBuf::from).collect(),
        };

        for path in &candidates {
            match std::fs::read(path) {
                Ok(font) => {
                    FontRef::try_from_slice(&font)
                        .with_context(|| format!("Failed to parse font {:?}", path))?;
                    log::info!("Using font {:?}", path);
                    return Ok(Self { font });
                }
                Err(e) => log::debug!("Font {:?} not usable: {}", path, e),
            }
        }

        anyhow::bail!(
            "No usable font found (tried {:?}). Pass --font with a TrueType font path.",
            candidates
        )
    }

    /// Render the now-playing card for the current display state
    pub fn render_card(&self, state: &DisplayState) -> Result<RgbaImage> {
        let debug_lines: Vec<&str> = state
            .debug_text
            .as_deref()
            .map(|text| text.lines().collect())
            .unwrap_or_default();
        let height = CARD_HEIGHT + debug_lines.len() as u32 * DEBUG_LINE_HEIGHT;

        let background = state.background.unwrap_or(DEFAULT_BACKGROUND);
        let mut canvas = RgbaImage::from_pixel(CARD_WIDTH, height, rgba(background));

        match &state.artwork {
            Artwork::Image(art) => {
                image::imageops::overlay(&mut canvas, art, PADDING as i64, PADDING as i64);
            }
            Artwork::Default => draw_placeholder_art(&mut canvas, PADDING, ARTWORK_SIZE),
        }

        let font = FontRef::try_from_slice(&self.font).context("Failed to parse font data")?;
        let text_color = text_color_for(background);
        let available_width = (CARD_WIDTH as i32 - TEXT_X_OFFSET - PADDING as i32).max(0);

        let lines: [(&str, f32, i32, Rgba<u8>); 3] = [
            (state.title.as_str(), 40.0, 24, text_color),
            (state.artist.as_str(), 30.0, 76, text_color),
            (state.album.as_str(), 26.0, 116, text_color),
        ];
        for (text, size, y, color) in lines {
            let scale = PxScale::from(size);
            let display_text = self.truncate_text(text, available_width, scale);
            draw_text_mut(&mut canvas, color, TEXT_X_OFFSET, y, scale, &font, &display_text);
        }

        let (status_text, status_color) = match state.connection {
            Some(connection) => (connection.label(), rgba(connection.color())),
            None => ("Connecting...", text_color),
        };
        draw_text_mut(
            &mut canvas,
            status_color,
            TEXT_X_OFFSET,
            168,
            PxScale::from(22.0),
            &font,
            status_text,
        );
        draw_text_mut(
            &mut canvas,
            rgba(state.visualizer.color()),
            TEXT_X_OFFSET,
            198,
            PxScale::from(20.0),
            &font,
            state.visualizer.label(),
        );

        let debug_scale = PxScale::from(14.0);
        for (i, line) in debug_lines.iter().enumerate() {
            let y = (CARD_HEIGHT + i as u32 * DEBUG_LINE_HEIGHT) as i32;
            let line = self.truncate_text(line, (CARD_WIDTH - PADDING * 2) as i32, debug_scale);
            draw_text_mut(&mut canvas, text_color, PADDING as i32, y, debug_scale, &font, &line);
        }

        Ok(canvas)
    }

    /// Truncate text to fit within available width
    fn truncate_text(&self, text: &str, max_width: i32, scale: PxScale) -> String {
        let full_width = self.measure_text_width(text, scale);

        if full_width <= max_width as f32 {
            return text.to_string();
        }

        let ellipsis = "...";
        let ellipsis_width = self.measure_text_width(ellipsis, scale);
        let available_for_text = max_width as f32 - ellipsis_width;

        let mut truncated = String::new();
        let mut width = 0.0;
        for ch in text.chars() {
            let advance = self.measure_text_width(ch.encode_utf8(&mut [0; 4]), scale);
            if width + advance > available_for_text {
                break;
            }
            width += advance;
            truncated.push(ch);
        }

        format!("{}{}", truncated, ellipsis)
    }

    /// Measure the width of text in pixels
    fn measure_text_width(&self, text: &str, scale: PxScale) -> f32 {
        use ab_glyph::{Font, ScaleFont};

        let font = match FontRef::try_from_slice(&self.font) {
            Ok(f) => f,
            Err(_) => return 0.0,
        };

        let scaled_font = font.as_scaled(scale);
        text.chars()
            .map(|ch| scaled_font.h_advance(font.glyph_id(ch)))
            .sum()
    }
}

/// Draw a flat square where the artwork goes when none is available
fn draw_placeholder_art(canvas: &mut RgbaImage, offset: u32, size: u32) {
    for py in offset..(offset + size).min(canvas.height()) {
        for px in offset..(offset + size).min(canvas.width()) {
            canvas.put_pixel(px, py, PLACEHOLDER_COLOR);
        }
    }
}

/// Decode artwork bytes and scale them to the card's artwork square
pub fn decode_artwork(bytes: &[u8], size: u32) -> Result<RgbaImage> {
    let img = image::load_from_memory(bytes).context("Failed to load image from memory")?;
    let resized = img.resize_exact(size, size, image::imageops::FilterType::Lanczos3);

    Ok(resized.to_rgba8())
}

/// Encode image as PNG bytes
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    use image::codecs::png::PngEncoder;
    use image::ImageEncoder;

    let mut buffer = Vec::new();
    let encoder = PngEncoder::new(&mut buffer);

    encoder
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgba8,
        )
        .context("Failed to encode PNG")?;

    Ok(buffer)
}

/// Write a PNG next to its destination and rename it into place, so readers
/// never see a partially written frame
pub fn write_png_atomic(path: &Path, image: &RgbaImage) -> Result<()> {
    let bytes = encode_png(image)?;
    let tmp_path = path.with_extension("png.tmp");

    std::fs::write(&tmp_path, &bytes)
        .with_context(|| format!("Failed to write {:?}", tmp_path))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move frame into place at {:?}", path))?;

    Ok(())
}
