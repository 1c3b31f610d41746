use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::types::SpectrumFrame;

pub const MAX_BARS: usize = 64;
/// Magnitude mapped to an empty bar
pub const FLOOR_DB: f32 = -80.0;
/// Span above the floor mapped to a full bar
pub const RANGE_DB: f32 = 40.0;

const INITIAL_MAX_ENERGY: f32 = 0.5;
const ENERGY_HEADROOM: f32 = 1.2;
const ENERGY_DECAY: f32 = 0.995;

const VOLUME_GAP: u32 = 8;

const SPECTRUM_GRADIENT: &[(f32, [u8; 3])] = &[
    (0.0, [0x1D, 0xB9, 0x54]),
    (0.5, [0x2E, 0x77, 0xD0]),
    (1.0, [0x9B, 0x59, 0xB6]),
];
const LINE_COLOR: Rgba<u8> = Rgba([255, 255, 255, 179]);
const METER_TRACK_COLOR: Rgba<u8> = Rgba([0x33, 0x33, 0x33, 255]);

/// Map a dB magnitude into `[0, 1]`
pub fn normalize_db(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    ((value - FLOOR_DB) / RANGE_DB).clamp(0.0, 1.0)
}

/// Bar heights in pixels for a canvas of `height`. Higher bins are scaled
/// down, up to half height for the last bin, so the bass dominates.
pub fn bar_heights(bins: &[f32], height: f32) -> Vec<f32> {
    let total = bins.len() as f32;
    bins.iter()
        .take(MAX_BARS)
        .enumerate()
        .map(|(i, &value)| {
            let decay = 1.0 - (i as f32 / total) * 0.5;
            normalize_db(value) * height * decay
        })
        .collect()
}

/// Volume level relative to a self-adjusting reference maximum
#[derive(Debug, Clone)]
pub struct VolumeMeter {
    max_energy: f32,
}

impl Default for VolumeMeter {
    fn default() -> Self {
        Self {
            max_energy: INITIAL_MAX_ENERGY,
        }
    }
}

impl VolumeMeter {
    /// Feed one frame's RMS energy and return the level in percent. The
    /// reference jumps up immediately on louder input and otherwise decays by
    /// half a percent per frame.
    pub fn update(&mut self, rms_energy: f32) -> f32 {
        let rms_energy = if rms_energy.is_finite() { rms_energy.max(0.0) } else { 0.0 };
        let candidate = rms_energy * ENERGY_HEADROOM;

        if candidate > self.max_energy {
            self.max_energy = candidate;
        } else {
            self.max_energy *= ENERGY_DECAY;
        }

        if self.max_energy <= f32::EPSILON {
            return 0.0;
        }
        (rms_energy / self.max_energy * 100.0).min(100.0)
    }
}

pub fn volume_color(percentage: f32) -> Rgba<u8> {
    if percentage > 80.0 {
        Rgba([0xFF, 0x45, 0x00, 255])
    } else if percentage > 50.0 {
        Rgba([0xFF, 0xA5, 0x00, 255])
    } else {
        Rgba([0x1D, 0xB9, 0x54, 255])
    }
}

fn gradient_at(t: f32) -> Rgba<u8> {
    let t = t.clamp(0.0, 1.0);
    for pair in SPECTRUM_GRADIENT.windows(2) {
        let (start, from) = pair[0];
        let (end, to) = pair[1];
        if t <= end {
            let local = if end > start { (t - start) / (end - start) } else { 0.0 };
            let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * local).round() as u8;
            return Rgba([mix(from[0], to[0]), mix(from[1], to[1]), mix(from[2], to[2]), 255]);
        }
    }

    let (_, last) = SPECTRUM_GRADIENT[SPECTRUM_GRADIENT.len() - 1];
    Rgba([last[0], last[1], last[2], 255])
}

/// Draws spectrum frames as a bar chart with a volume bar underneath
pub struct SpectrumRenderer {
    width: u32,
    spectrum_height: u32,
    meter_height: u32,
    meter: VolumeMeter,
    canvas: RgbaImage,
}

impl SpectrumRenderer {
    pub fn new(width: u32, spectrum_height: u32, meter_height: u32) -> Self {
        let height = spectrum_height + VOLUME_GAP + meter_height;
        Self {
            width,
            spectrum_height,
            meter_height,
            meter: VolumeMeter::default(),
            canvas: RgbaImage::new(width, height),
        }
    }

    /// Redraw the canvas for one frame. Frames without bins leave the
    /// previous drawing in place and return `None`.
    pub fn render(&mut self, frame: &SpectrumFrame) -> Option<&RgbaImage> {
        if frame.bins.is_empty() {
            return None;
        }

        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }

        let heights = bar_heights(&frame.bins, self.spectrum_height as f32);
        self.draw_bars(&heights);
        self.draw_outline(&heights);

        let level = self.meter.update(frame.rms_energy);
        self.draw_volume(level);

        Some(&self.canvas)
    }

    fn bar_width(&self, bars: usize) -> f32 {
        self.width as f32 / bars.max(1) as f32
    }

    fn draw_bars(&mut self, heights: &[f32]) {
        let bar_width = self.bar_width(heights.len());
        let bottom = self.spectrum_height;

        for (i, &height) in heights.iter().enumerate() {
            let x0 = (i as f32 * bar_width).round() as u32;
            // One pixel gap between bars once they are wide enough for it
            let gap = if bar_width >= 2.0 { 1 } else { 0 };
            let x1 = (((i + 1) as f32 * bar_width).round() as u32)
                .saturating_sub(gap)
                .min(self.width);
            let top = bottom.saturating_sub(height.round() as u32);

            for y in top..bottom {
                let color = gradient_at(y as f32 / bottom.max(1) as f32);
                for x in x0..x1 {
                    self.canvas.put_pixel(x, y, color);
                }
            }
        }
    }

    fn draw_outline(&mut self, heights: &[f32]) {
        let bar_width = self.bar_width(heights.len());
        let bottom = self.spectrum_height as f32;

        let points: Vec<(f32, f32)> = heights
            .iter()
            .enumerate()
            .map(|(i, &height)| (i as f32 * bar_width, bottom - height))
            .collect();

        for pair in points.windows(2) {
            draw_line_segment_mut(&mut self.canvas, pair[0], pair[1], LINE_COLOR);
        }
    }

    fn draw_volume(&mut self, percentage: f32) {
        let y = (self.spectrum_height + VOLUME_GAP) as i32;
        if self.meter_height == 0 || self.width == 0 {
            return;
        }

        draw_filled_rect_mut(
            &mut self.canvas,
            Rect::at(0, y).of_size(self.width, self.meter_height),
            METER_TRACK_COLOR,
        );

        let filled = (self.width as f32 * percentage / 100.0).round() as u32;
        if filled > 0 {
            draw_filled_rect_mut(
                &mut self.canvas,
                Rect::at(0, y).of_size(filled.min(self.width), self.meter_height),
                volume_color(percentage),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bins: Vec<f32>, rms_energy: f32) -> SpectrumFrame {
        SpectrumFrame { bins, rms_energy }
    }

    #[test]
    fn normalizes_db_range() {
        assert_eq!(normalize_db(-80.0), 0.0);
        assert_eq!(normalize_db(-60.0), 0.5);
        assert_eq!(normalize_db(-40.0), 1.0);
        assert_eq!(normalize_db(-120.0), 0.0);
        assert_eq!(normalize_db(0.0), 1.0);
        assert_eq!(normalize_db(f32::NAN), 0.0);
    }

    #[test]
    fn silent_frame_has_zero_height_bars() {
        let heights = bar_heights(&[-80.0; 32], 100.0);
        assert_eq!(heights.len(), 32);
        assert!(heights.iter().all(|&h| h == 0.0));
    }

    #[test]
    fn silent_frame_draws_no_bars() {
        let mut renderer = SpectrumRenderer::new(64, 50, 10);
        let canvas = renderer.render(&frame(vec![-80.0; 64], 0.0)).unwrap();

        for y in 0..49 {
            for x in 0..64 {
                assert_eq!(canvas.get_pixel(x, y)[3], 0, "pixel ({}, {}) drawn", x, y);
            }
        }
    }

    #[test]
    fn higher_bins_are_shorter_at_equal_level() {
        let heights = bar_heights(&[-40.0; 4], 100.0);
        assert_eq!(heights, vec![100.0, 87.5, 75.0, 62.5]);
    }

    #[test]
    fn bars_are_limited_to_sixty_four() {
        let heights = bar_heights(&vec![-40.0; 128], 100.0);
        assert_eq!(heights.len(), MAX_BARS);
        // Decay still follows the full bin count
        assert_eq!(heights[63], 100.0 * (1.0 - 63.0 / 128.0 * 0.5));
    }

    #[test]
    fn volume_reference_rises_instantly_and_decays_slowly() {
        let mut meter = VolumeMeter::default();

        let level = meter.update(1.0);
        assert!((meter.max_energy - 1.2).abs() < 1e-6);
        assert!((level - 100.0 / 1.2).abs() < 1e-3);

        meter.update(0.1);
        assert!((meter.max_energy - 1.2 * 0.995).abs() < 1e-6);
    }

    #[test]
    fn volume_level_is_capped() {
        let mut meter = VolumeMeter::default();
        for _ in 0..2000 {
            meter.update(0.0);
        }
        assert!(meter.update(0.0001) <= 100.0);
    }

    #[test]
    fn volume_colors_follow_thresholds() {
        assert_eq!(volume_color(10.0), Rgba([0x1D, 0xB9, 0x54, 255]));
        assert_eq!(volume_color(60.0), Rgba([0xFF, 0xA5, 0x00, 255]));
        assert_eq!(volume_color(90.0), Rgba([0xFF, 0x45, 0x00, 255]));
    }

    #[test]
    fn empty_frame_keeps_previous_canvas() {
        let mut renderer = SpectrumRenderer::new(16, 20, 4);
        renderer.render(&frame(vec![-40.0; 16], 0.3));
        let before = renderer.canvas.clone();

        assert!(renderer.render(&frame(Vec::new(), 0.9)).is_none());
        assert_eq!(renderer.canvas, before);
    }

    #[test]
    fn loud_bin_fills_its_column() {
        let mut renderer = SpectrumRenderer::new(4, 10, 2);
        let canvas = renderer.render(&frame(vec![-40.0, -80.0, -80.0, -80.0], 0.0)).unwrap();

        let filled = (0..10).filter(|&y| canvas.get_pixel(0, y)[3] > 0).count();
        assert_eq!(filled, 10);
        assert_eq!(canvas.get_pixel(2, 5)[3], 0);
    }
}
