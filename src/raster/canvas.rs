//! Pixel surface the simulator draws on.
//!
//! Coordinates are in pixel space with the origin at the top-left corner;
//! pixel `(i, j)` covers `[i, i + 1) x [j, j + 1)`. Every primitive is
//! clipped to the surface before rasterising, so the work done per call is
//! bounded by the canvas size no matter how far off-screen the input is.

use std::fmt;
use std::path::Path;

use image::{GrayImage, Luma, Rgb as ImageRgb, RgbImage};

use crate::core::domain::{CanvasSize, Rgb};

pub type Point = (f64, f64);

const GRID_SPACING: u32 = 50;
const GRID_COLOR: Rgb = Rgb(200, 200, 200);
const AXIS_COLOR: Rgb = Rgb(150, 150, 150);

#[derive(Clone)]
pub struct Canvas {
    width: u32,
    height: u32,
    background: Rgb,
    pixels: Vec<Rgb>,
    /// Pixel writes and edge tests since the last [`Canvas::take_work`].
    work: u64,
}

impl PartialEq for Canvas {
    fn eq(&self, other: &Self) -> bool {
        (self.width, self.height, self.background) == (other.width, other.height, other.background)
            && self.pixels == other.pixels
    }
}

impl Eq for Canvas {}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canvas")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("background", &self.background)
            .finish()
    }
}

impl Canvas {
    pub fn new(size: CanvasSize, background: Rgb) -> Self {
        let len = size.width as usize * size.height as usize;
        Self {
            width: size.width,
            height: size.height,
            background,
            pixels: vec![background; len],
            work: 0,
        }
    }

    pub fn size(&self) -> CanvasSize {
        CanvasSize {
            width: self.width,
            height: self.height,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x < self.width && y < self.height {
            Some(self.pixels[(y * self.width + x) as usize])
        } else {
            None
        }
    }

    /// Drains the work counter so a caller can charge it to a time budget.
    pub fn take_work(&mut self) -> u64 {
        std::mem::take(&mut self.work)
    }

    pub fn background(&self) -> Rgb {
        self.background
    }

    /// Wipes every drawing back to the current background.
    pub fn clear(&mut self) {
        let bg = self.background;
        self.pixels.iter_mut().for_each(|p| *p = bg);
        self.work += self.pixels.len() as u64;
    }

    /// Changes the background without touching drawn pixels.
    pub fn set_background(&mut self, color: Rgb) {
        let old = self.background;
        for p in self.pixels.iter_mut().filter(|p| **p == old) {
            *p = color;
        }
        self.background = color;
        self.work += self.pixels.len() as u64;
    }

    fn put(&mut self, x: i64, y: i64, color: Rgb) {
        self.work += 1;
        if x >= 0 && y >= 0 && (x as u64) < self.width as u64 && (y as u64) < self.height as u64 {
            let idx = y as usize * self.width as usize + x as usize;
            self.pixels[idx] = color;
        }
    }

    pub fn draw_line(&mut self, from: Point, to: Point, width: f64, color: Rgb) {
        if !finite(from) || !finite(to) || width <= 0.0 {
            return;
        }
        let margin = width.max(1.0) + 1.0;
        let Some((a, b)) = clip_segment(
            from,
            to,
            (-margin, -margin),
            (self.width as f64 + margin, self.height as f64 + margin),
        ) else {
            return;
        };

        if width <= 1.5 {
            self.draw_thin_line(a, b, color);
            return;
        }

        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let len = (dx * dx + dy * dy).sqrt();
        let half = width / 2.0;
        if len > f64::EPSILON {
            let (nx, ny) = (-dy / len * half, dx / len * half);
            self.fill_polygon(
                &[
                    (a.0 + nx, a.1 + ny),
                    (b.0 + nx, b.1 + ny),
                    (b.0 - nx, b.1 - ny),
                    (a.0 - nx, a.1 - ny),
                ],
                color,
            );
        }
        // Round caps close the gaps between consecutive thick segments.
        self.fill_circle(a, half, color);
        self.fill_circle(b, half, color);
    }

    fn draw_thin_line(&mut self, a: Point, b: Point, color: Rgb) {
        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as usize;
        for k in 0..=steps {
            let t = k as f64 / steps as f64;
            let x = a.0 + dx * t;
            let y = a.1 + dy * t;
            self.put(x.floor() as i64, y.floor() as i64, color);
        }
    }

    /// Even-odd scanline fill sampled at pixel centres.
    pub fn fill_polygon(&mut self, points: &[Point], color: Rgb) {
        if points.len() < 3 || points.iter().any(|p| !finite(*p)) {
            return;
        }
        let min_y = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max_y = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        let first_row = min_y.floor().max(0.0) as i64;
        let last_row = max_y.ceil().min(self.height as f64 - 1.0) as i64;

        let mut crossings: Vec<f64> = Vec::new();
        for row in first_row..=last_row {
            let yc = row as f64 + 0.5;
            self.work += points.len() as u64;
            crossings.clear();
            for i in 0..points.len() {
                let (x0, y0) = points[i];
                let (x1, y1) = points[(i + 1) % points.len()];
                if (y0 <= yc && yc < y1) || (y1 <= yc && yc < y0) {
                    crossings.push(x0 + (yc - y0) * (x1 - x0) / (y1 - y0));
                }
            }
            crossings.sort_by(|a, b| a.total_cmp(b));
            for pair in crossings.chunks_exact(2) {
                self.fill_span(row, pair[0], pair[1], color);
            }
        }
    }

    /// Pixels whose centre lies in `[x_start, x_end)`, matching the half-open
    /// rows of [`Canvas::fill_polygon`].
    fn fill_span(&mut self, row: i64, x_start: f64, x_end: f64, color: Rgb) {
        let first = (x_start - 0.5).ceil().max(0.0) as i64;
        let last = ((x_end - 0.5).ceil() - 1.0).min(self.width as f64 - 1.0) as i64;
        for x in first..=last {
            self.put(x, row, color);
        }
    }

    pub fn fill_circle(&mut self, center: Point, radius: f64, color: Rgb) {
        if !finite(center) || !radius.is_finite() || radius <= 0.0 {
            return;
        }
        let r = radius.max(0.5);
        let first_row = (center.1 - r).floor().max(0.0) as i64;
        let last_row = (center.1 + r).ceil().min(self.height as f64 - 1.0) as i64;
        for row in first_row..=last_row {
            let dy = row as f64 + 0.5 - center.1;
            let span = r * r - dy * dy;
            if span < 0.0 {
                continue;
            }
            let half = span.sqrt();
            self.fill_span(row, center.0 - half, center.0 + half, color);
        }
    }

    /// Copy with a reference grid and centre axes, for human inspection only.
    pub fn with_grid(&self) -> Canvas {
        let mut grid = self.clone();
        let (w, h) = (self.width as f64, self.height as f64);
        for i in (0..self.width).step_by(GRID_SPACING as usize) {
            grid.draw_line((i as f64, 0.0), (i as f64, h), 1.0, GRID_COLOR);
        }
        for j in (0..self.height).step_by(GRID_SPACING as usize) {
            grid.draw_line((0.0, j as f64), (w, j as f64), 1.0, GRID_COLOR);
        }
        grid.draw_line((w / 2.0, 0.0), (w / 2.0, h), 2.0, AXIS_COLOR);
        grid.draw_line((0.0, h / 2.0), (w, h / 2.0), 2.0, AXIS_COLOR);
        grid
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            let Rgb(r, g, b) = self.pixels[(y * self.width + x) as usize];
            ImageRgb([r, g, b])
        })
    }

    /// Single-channel intensity using the ITU-R 601 weights.
    pub fn to_luma(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([luma(self.pixels[(y * self.width + x) as usize])])
        })
    }

    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        self.to_rgb_image().save(path)
    }
}

/// ITU-R 601 intensity of one colour.
pub fn luma(Rgb(r, g, b): Rgb) -> u8 {
    let y = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
    y.round().clamp(0.0, 255.0) as u8
}

fn finite(p: Point) -> bool {
    p.0.is_finite() && p.1.is_finite()
}

/// Liang-Barsky clipping of segment `a-b` against the box `min..max`.
fn clip_segment(a: Point, b: Point, min: Point, max: Point) -> Option<(Point, Point)> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    let checks = [
        (-dx, a.0 - min.0),
        (dx, max.0 - a.0),
        (-dy, a.1 - min.1),
        (dy, max.1 - a.1),
    ];
    for (p, q) in checks {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }
    Some((
        (a.0 + t0 * dx, a.1 + t0 * dy),
        (a.0 + t1 * dx, a.1 + t1 * dy),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(w: u32, h: u32) -> Canvas {
        Canvas::new(CanvasSize { width: w, height: h }, Rgb::WHITE)
    }

    fn count(canvas: &Canvas, color: Rgb) -> usize {
        canvas.pixels.iter().filter(|p| **p == color).count()
    }

    #[test]
    fn test_thin_horizontal_line() {
        let mut c = blank(20, 20);
        c.draw_line((2.5, 5.5), (12.5, 5.5), 1.0, Rgb::BLACK);
        assert_eq!(count(&c, Rgb::BLACK), 11);
        assert_eq!(c.pixel(2, 5), Some(Rgb::BLACK));
        assert_eq!(c.pixel(12, 5), Some(Rgb::BLACK));
        assert_eq!(c.pixel(13, 5), Some(Rgb::WHITE));
    }

    #[test]
    fn test_far_offscreen_line_is_clipped() {
        let mut c = blank(10, 10);
        c.draw_line((-1e12, 5.5), (1e12, 5.5), 1.0, Rgb::BLACK);
        assert_eq!(count(&c, Rgb::BLACK), 10);
        c.draw_line((-1e12, -1e12), (-1e11, -5.0), 3.0, Rgb::BLACK);
        assert_eq!(count(&c, Rgb::BLACK), 10);
    }

    #[test]
    fn test_thick_line_covers_its_width() {
        let mut c = blank(30, 30);
        c.draw_line((5.0, 15.0), (25.0, 15.0), 5.0, Rgb::BLACK);
        for y in 13..=16 {
            assert_eq!(c.pixel(15, y), Some(Rgb::BLACK), "row {}", y);
        }
        assert_eq!(c.pixel(15, 20), Some(Rgb::WHITE));
    }

    #[test]
    fn test_thick_line_coverage_does_not_depend_on_direction() {
        let mut horizontal = blank(64, 64);
        horizontal.draw_line((8.0, 32.0), (56.0, 32.0), 3.0, Rgb::BLACK);
        let mut vertical = blank(64, 64);
        vertical.draw_line((32.0, 8.0), (32.0, 56.0), 3.0, Rgb::BLACK);
        assert_eq!(count(&horizontal, Rgb::BLACK), count(&vertical, Rgb::BLACK));
    }

    #[test]
    fn test_work_counter_tracks_painting() {
        let mut c = blank(20, 20);
        assert_eq!(c.take_work(), 0);
        c.fill_polygon(&[(5.0, 5.0), (15.0, 5.0), (15.0, 15.0), (5.0, 15.0)], Rgb::BLACK);
        assert!(c.take_work() >= 100);
        assert_eq!(c.take_work(), 0);
        c.clear();
        assert_eq!(c.take_work(), 400);
    }

    #[test]
    fn test_fill_square() {
        let mut c = blank(20, 20);
        c.fill_polygon(&[(5.0, 5.0), (15.0, 5.0), (15.0, 15.0), (5.0, 15.0)], Rgb::BLACK);
        assert_eq!(count(&c, Rgb::BLACK), 100);
    }

    #[test]
    fn test_degenerate_polygons_are_ignored() {
        let mut c = blank(10, 10);
        c.fill_polygon(&[(1.0, 1.0), (8.0, 8.0)], Rgb::BLACK);
        c.fill_polygon(&[(1.0, 1.0), (f64::NAN, 8.0), (3.0, 3.0)], Rgb::BLACK);
        assert_eq!(count(&c, Rgb::BLACK), 0);
    }

    #[test]
    fn test_fill_circle_area() {
        let mut c = blank(100, 100);
        c.fill_circle((50.0, 50.0), 20.0, Rgb::BLACK);
        let area = count(&c, Rgb::BLACK) as f64;
        let expected = std::f64::consts::PI * 400.0;
        assert!((area - expected).abs() / expected < 0.05, "area {}", area);
    }

    #[test]
    fn test_background_change_keeps_drawing() {
        let mut c = blank(10, 10);
        c.draw_line((0.5, 0.5), (9.5, 0.5), 1.0, Rgb::BLACK);
        c.set_background(Rgb(0, 0, 255));
        assert_eq!(c.pixel(3, 0), Some(Rgb::BLACK));
        assert_eq!(c.pixel(3, 3), Some(Rgb(0, 0, 255)));
        c.clear();
        assert_eq!(c.pixel(3, 0), Some(Rgb(0, 0, 255)));
    }

    #[test]
    fn test_luma_conversion() {
        let mut c = blank(2, 1);
        c.put(0, 0, Rgb::BLACK);
        let gray = c.to_luma();
        assert_eq!(gray.get_pixel(0, 0).0[0], 0);
        assert_eq!(gray.get_pixel(1, 0).0[0], 255);
    }
}
