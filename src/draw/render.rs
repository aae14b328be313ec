//! Software rasterisation of strokes into straight-alpha RGBA buffers.
//!
//! Buffers are tightly packed `width * height * 4` byte slices. Geometry is in
//! device pixels; a pixel is covered when its centre lies within the brush
//! radius of the segment, which gives round caps and joins for free.

use crate::draw::model::{Point, Rgba, Stroke};

/// Smallest radius that still covers the pixel nearest to any point.
pub const MIN_BRUSH_RADIUS: f32 = 0.75;

/// Pixel coordinates are pinned to this magnitude before integer maths, far
/// outside any surface the compositor allocates.
const COORD_LIMIT: f32 = (1 << 24) as f32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl DirtyRect {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: i32::try_from(width).unwrap_or(i32::MAX),
            height: i32::try_from(height).unwrap_or(i32::MAX),
        }
    }

    pub fn union(self, other: DirtyRect) -> DirtyRect {
        let min_x = self.x.min(other.x);
        let min_y = self.y.min(other.y);
        let max_x = self.right().max(other.right());
        let max_y = self.bottom().max(other.bottom());
        DirtyRect {
            x: min_x,
            y: min_y,
            width: max_x.saturating_sub(min_x).max(1),
            height: max_y.saturating_sub(min_y).max(1),
        }
    }

    fn right(self) -> i32 {
        self.x.saturating_add(self.width)
    }

    fn bottom(self) -> i32 {
        self.y.saturating_add(self.height)
    }

    pub fn clamp(self, width: u32, height: u32) -> Option<DirtyRect> {
        let max_w = i32::try_from(width).unwrap_or(i32::MAX);
        let max_h = i32::try_from(height).unwrap_or(i32::MAX);
        let x0 = self.x.clamp(0, max_w);
        let y0 = self.y.clamp(0, max_h);
        let x1 = self.right().clamp(0, max_w);
        let y1 = self.bottom().clamp(0, max_h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(DirtyRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }

    pub fn rows(self) -> std::ops::Range<i32> {
        self.y..self.bottom()
    }

    pub fn columns(self) -> std::ops::Range<i32> {
        self.x..self.right()
    }
}

/// What a stroke does to the pixels it covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paint {
    /// Replace the pixel with this colour.
    Color(Rgba),
    /// Punch the pixel out to full transparency.
    Clear,
}

impl Paint {
    fn value(self) -> [u8; 4] {
        match self {
            Paint::Color(color) => color.to_array(),
            Paint::Clear => Rgba::TRANSPARENT.to_array(),
        }
    }
}

pub fn brush_radius(width: f32, scale: f32) -> f32 {
    (width * scale * 0.5).max(MIN_BRUSH_RADIUS)
}

/// Pixel bounds touched by a capsule from `from` to `to`.
pub fn segment_dirty_bounds(from: Point, to: Point, radius: f32) -> DirtyRect {
    let pixel = |v: f32| v.clamp(-COORD_LIMIT, COORD_LIMIT) as i32;
    let x0 = pixel((from.x.min(to.x) - radius).floor()) - 1;
    let y0 = pixel((from.y.min(to.y) - radius).floor()) - 1;
    let x1 = pixel((from.x.max(to.x) + radius).ceil()) + 1;
    let y1 = pixel((from.y.max(to.y) + radius).ceil()) + 1;
    DirtyRect {
        x: x0,
        y: y0,
        width: (x1 - x0).max(1),
        height: (y1 - y0).max(1),
    }
}

fn point_segment_distance_sq(px: f32, py: f32, from: Point, to: Point) -> f32 {
    let vx = to.x - from.x;
    let vy = to.y - from.y;
    let wx = px - from.x;
    let wy = py - from.y;
    let len_sq = vx * vx + vy * vy;
    if len_sq <= f32::EPSILON {
        return wx * wx + wy * wy;
    }
    let t = ((wx * vx + wy * vy) / len_sq).clamp(0.0, 1.0);
    let dx = px - (from.x + vx * t);
    let dy = py - (from.y + vy * t);
    dx * dx + dy * dy
}

/// Paints one round-capped segment. A zero-length segment paints a dot.
/// Returns the clamped area that was touched.
pub fn paint_segment(
    pixels: &mut [u8],
    width: u32,
    height: u32,
    from: Point,
    to: Point,
    radius: f32,
    paint: Paint,
) -> Option<DirtyRect> {
    let bounds = segment_dirty_bounds(from, to, radius).clamp(width, height)?;
    let radius_sq = radius * radius;
    let value = paint.value();
    for y in bounds.rows() {
        let row_base = (y as usize) * (width as usize) * 4;
        for x in bounds.columns() {
            let cx = x as f32 + 0.5;
            let cy = y as f32 + 0.5;
            if point_segment_distance_sq(cx, cy, from, to) <= radius_sq {
                let idx = row_base + (x as usize) * 4;
                pixels[idx..idx + 4].copy_from_slice(&value);
            }
        }
    }
    Some(bounds)
}

/// Paints a whole stroke at `scale` device pixels per logical unit.
pub fn paint_stroke(
    pixels: &mut [u8],
    width: u32,
    height: u32,
    stroke: &Stroke,
    paint: Paint,
    scale: f32,
) -> Option<DirtyRect> {
    let radius = brush_radius(stroke.style.width, scale);
    let mut dirty: Option<DirtyRect> = None;
    let mut merge = |rect: Option<DirtyRect>| {
        if let Some(rect) = rect {
            dirty = Some(dirty.map_or(rect, |d| d.union(rect)));
        }
    };
    match stroke.points.as_slice() {
        [] => {}
        [only] => {
            let p = only.scaled(scale);
            merge(paint_segment(pixels, width, height, p, p, radius, paint));
        }
        points => {
            for pair in points.windows(2) {
                merge(paint_segment(
                    pixels,
                    width,
                    height,
                    pair[0].scaled(scale),
                    pair[1].scaled(scale),
                    radius,
                    paint,
                ));
            }
        }
    }
    dirty
}

/// Straight-alpha source-over.
pub fn blend_pixel(bottom: Rgba, top: Rgba) -> Rgba {
    if top.a == 255 {
        return top;
    }
    if top.a == 0 {
        return bottom;
    }
    let sa = top.a as f32 / 255.0;
    let da = bottom.a as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);

    if out_a <= f32::EPSILON {
        return Rgba::TRANSPARENT;
    }

    let blend = |s: u8, d: u8| -> u8 {
        (((s as f32 * sa) + (d as f32 * da * (1.0 - sa))) / out_a)
            .round()
            .clamp(0.0, 255.0) as u8
    };

    Rgba {
        r: blend(top.r, bottom.r),
        g: blend(top.g, bottom.g),
        b: blend(top.b, bottom.b),
        a: (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    }
}

pub fn pixel_at(pixels: &[u8], width: u32, x: u32, y: u32) -> Rgba {
    let idx = ((y as usize) * (width as usize) + x as usize) * 4;
    Rgba::rgba(pixels[idx], pixels[idx + 1], pixels[idx + 2], pixels[idx + 3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::model::{StrokeId, StrokeStyle, Tool};

    fn buffer(width: u32, height: u32) -> Vec<u8> {
        vec![0u8; (width * height * 4) as usize]
    }

    fn painted(pixels: &[u8]) -> usize {
        pixels.chunks_exact(4).filter(|px| px[3] != 0).count()
    }

    #[test]
    fn dot_covers_pixels_around_point() {
        let mut pixels = buffer(8, 8);
        let p = Point::new(4.0, 4.0);
        paint_segment(&mut pixels, 8, 8, p, p, 1.0, Paint::Color(Rgba::BLACK));
        assert_eq!(painted(&pixels), 4);
        assert_eq!(pixel_at(&pixels, 8, 3, 3), Rgba::BLACK);
        assert_eq!(pixel_at(&pixels, 8, 4, 4), Rgba::BLACK);
        assert_eq!(pixel_at(&pixels, 8, 5, 5), Rgba::TRANSPARENT);
    }

    #[test]
    fn thinnest_brush_still_marks_a_pixel() {
        let mut pixels = buffer(4, 4);
        let p = Point::new(1.0, 1.0);
        let radius = brush_radius(0.1, 1.0);
        paint_segment(&mut pixels, 4, 4, p, p, radius, Paint::Color(Rgba::BLACK));
        assert!(painted(&pixels) >= 1);
    }

    #[test]
    fn clear_paint_punches_transparent_pixels() {
        let mut pixels = vec![255u8; 4 * 4 * 4];
        paint_segment(
            &mut pixels,
            4,
            4,
            Point::new(0.0, 2.0),
            Point::new(4.0, 2.0),
            1.0,
            Paint::Clear,
        );
        assert_eq!(pixel_at(&pixels, 4, 2, 1), Rgba::TRANSPARENT);
        assert_eq!(pixel_at(&pixels, 4, 2, 2), Rgba::TRANSPARENT);
        assert_eq!(pixel_at(&pixels, 4, 2, 0), Rgba::WHITE);
    }

    #[test]
    fn painting_off_canvas_is_bounds_safe() {
        let mut pixels = buffer(4, 4);
        let dirty = paint_segment(
            &mut pixels,
            4,
            4,
            Point::new(-50.0, -50.0),
            Point::new(-40.0, -40.0),
            3.0,
            Paint::Color(Rgba::BLACK),
        );
        assert_eq!(dirty, None);
        assert_eq!(painted(&pixels), 0);

        let dirty = paint_segment(
            &mut pixels,
            4,
            4,
            Point::new(-2.0, 2.0),
            Point::new(10.0, 2.0),
            1.0,
            Paint::Color(Rgba::BLACK),
        )
        .expect("crosses the canvas");
        assert!(dirty.x >= 0 && dirty.x + dirty.width <= 4);
    }

    #[test]
    fn far_away_points_keep_bounds_finite() {
        let bounds = segment_dirty_bounds(Point::new(5.0, 5.0), Point::new(3.0e9, 5.0), 1.0);
        assert!(bounds.width > 0 && bounds.x < 5);
        let clamped = bounds.clamp(8, 8).expect("crosses the canvas");
        assert_eq!((clamped.x, clamped.width), (3, 5));

        let extreme = DirtyRect {
            x: i32::MAX - 1,
            y: i32::MIN,
            width: i32::MAX,
            height: i32::MAX,
        };
        assert_eq!(extreme.clamp(8, 8), None);
        let merged = extreme.union(DirtyRect::full(8, 8));
        assert!(merged.width > 0 && merged.height > 0);
    }

    #[test]
    fn stroke_scale_widens_coverage() {
        let stroke = Stroke {
            id: StrokeId(1),
            style: StrokeStyle {
                tool: Tool::Brush,
                color: Rgba::BLACK,
                width: 2.0,
            },
            points: vec![Point::new(2.0, 2.0), Point::new(6.0, 2.0)],
        };
        let mut small = buffer(10, 10);
        let mut large = buffer(20, 20);
        paint_stroke(&mut small, 10, 10, &stroke, Paint::Color(Rgba::BLACK), 1.0);
        paint_stroke(&mut large, 20, 20, &stroke, Paint::Color(Rgba::BLACK), 2.0);
        assert!(painted(&large) > painted(&small) * 3);
    }

    #[test]
    fn union_and_clamp_cover_both_rects() {
        let a = DirtyRect {
            x: -2,
            y: 1,
            width: 4,
            height: 2,
        };
        let b = DirtyRect {
            x: 5,
            y: 5,
            width: 10,
            height: 10,
        };
        let merged = a.union(b).clamp(8, 8).expect("inside");
        assert_eq!(
            merged,
            DirtyRect {
                x: 0,
                y: 1,
                width: 8,
                height: 7
            }
        );
    }

    #[test]
    fn blend_matches_source_over() {
        let out = blend_pixel(
            Rgba::rgba(100, 100, 100, 255),
            Rgba::rgba(200, 0, 0, 128),
        );
        assert_eq!(out, Rgba::rgba(150, 50, 50, 255));
        assert_eq!(blend_pixel(Rgba::WHITE, Rgba::TRANSPARENT), Rgba::WHITE);
        assert_eq!(blend_pixel(Rgba::TRANSPARENT, Rgba::TRANSPARENT), Rgba::TRANSPARENT);
    }
}
