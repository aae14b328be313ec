//! Stacks the reference layer and the ink layer into the visible surface.
//!
//! Live rendering and export share [`Compositor::compose`]; export only
//! changes the scale. The live frame at scale 1 is cached together with the
//! reference state it was built from, so a growing stroke can repaint just the
//! rectangle its newest segment touches.

use crate::draw::error::{EngineError, Result};
use crate::draw::model::{InkLayer, Point, Rgba, StrokeStyle, Tool};
use crate::draw::reference::ReferenceLayer;
use crate::draw::render::{
    blend_pixel, brush_radius, paint_segment, paint_stroke, pixel_at, DirtyRect, Paint,
};
use serde::{Deserialize, Serialize};

/// Largest surface, in pixels, that live rendering or export will allocate.
pub const MAX_SURFACE_PIXELS: u64 = 64 * 1024 * 1024;

/// Device size of `logical` at `scale`, or `None` when a side is not
/// representable or the area exceeds [`MAX_SURFACE_PIXELS`].
pub fn scaled_size(logical: (u32, u32), scale: f32) -> Option<(u32, u32)> {
    let side = |len: u32| {
        let scaled = (f64::from(len) * f64::from(scale)).round();
        (scaled.is_finite() && scaled <= f64::from(u32::MAX)).then(|| (scaled as u32).max(1))
    };
    let (width, height) = (side(logical.0)?, side(logical.1)?);
    let area = u64::from(width).checked_mul(u64::from(height))?;
    (area <= MAX_SURFACE_PIXELS).then_some((width, height))
}

/// Which layers an eraser stroke removes pixels from.
///
/// `Ink` keeps "showing the reference after erasing changes the erased
/// pixels": erased ink reveals whatever reference is currently shown.
/// `AllLayers` punches through the reference as well, so erased areas stay
/// bare paper whether the reference is shown or hidden and toggling it no
/// longer changes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EraserReach {
    /// Erase ink only; the reference shows through erased areas.
    #[default]
    Ink,
    /// Erase through ink and the reference, leaving bare paper.
    AllLayers,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbaBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl RgbaBuffer {
    pub fn new(width: u32, height: u32, fill: Rgba) -> Self {
        let mut pixels = vec![0u8; (width as usize) * (height as usize) * 4];
        if fill != Rgba::TRANSPARENT {
            for chunk in pixels.chunks_exact_mut(4) {
                chunk.copy_from_slice(&fill.to_array());
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Rgba {
        pixel_at(&self.pixels, self.width, x, y)
    }

    fn set(&mut self, x: u32, y: u32, color: Rgba) {
        let idx = ((y as usize) * (self.width as usize) + x as usize) * 4;
        self.pixels[idx..idx + 4].copy_from_slice(&color.to_array());
    }
}

/// Places `surface` over an opaque paper colour (or leaves it as is for a
/// transparent export).
pub fn flatten(surface: &RgbaBuffer, background: Option<Rgba>) -> RgbaBuffer {
    let Some(background) = background else {
        return surface.clone();
    };
    let mut output = RgbaBuffer::new(surface.width, surface.height, background);
    for (dst, src) in output
        .pixels
        .chunks_exact_mut(4)
        .zip(surface.pixels.chunks_exact(4))
    {
        let blended = blend_pixel(
            Rgba::rgba(dst[0], dst[1], dst[2], dst[3]),
            Rgba::rgba(src[0], src[1], src[2], src[3]),
        );
        dst.copy_from_slice(&blended.to_array());
    }
    output
}

fn paint_for(style: &StrokeStyle) -> Paint {
    match style.tool {
        Tool::Brush => Paint::Color(style.color),
        Tool::Eraser => Paint::Clear,
    }
}

/// The reference state a frame was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FrameKey {
    reference_revision: Option<u64>,
}

impl FrameKey {
    fn of(reference: &ReferenceLayer) -> Self {
        Self {
            reference_revision: reference.shown_image().map(|_| reference.revision()),
        }
    }
}

#[derive(Debug, Clone)]
struct Frame {
    key: FrameKey,
    base: RgbaBuffer,
    /// Separate ink pixels; only kept when erasing must not touch the base.
    ink: Option<Vec<u8>>,
    surface: RgbaBuffer,
}

#[derive(Debug)]
pub struct Compositor {
    logical_size: (u32, u32),
    reach: EraserReach,
    frame: Option<Frame>,
    full_renders: usize,
}

impl Compositor {
    pub fn new(logical_size: (u32, u32), reach: EraserReach) -> Self {
        Self {
            logical_size,
            reach,
            frame: None,
            full_renders: 0,
        }
    }

    /// `None` when the surface at `scale` would be too large to allocate.
    pub fn device_size(&self, scale: f32) -> Option<(u32, u32)> {
        scaled_size(self.logical_size, scale)
    }

    fn live_size(&self) -> (u32, u32) {
        (self.logical_size.0.max(1), self.logical_size.1.max(1))
    }

    /// The last rendered surface, if any render has happened yet.
    pub fn surface(&self) -> Option<&RgbaBuffer> {
        self.frame.as_ref().map(|frame| &frame.surface)
    }

    /// Number of from-scratch renders, for telling full and incremental
    /// repaints apart.
    pub fn full_renders(&self) -> usize {
        self.full_renders
    }

    pub fn invalidate(&mut self) {
        self.frame = None;
    }

    /// Whether the cached frame still matches the reference layer, so a new
    /// segment can be painted incrementally.
    pub fn is_current(&self, reference: &ReferenceLayer) -> bool {
        self.frame
            .as_ref()
            .is_some_and(|frame| frame.key == FrameKey::of(reference))
    }

    /// Pure composition at `scale` device pixels per logical unit.
    pub fn compose(&self, ink: &InkLayer, reference: &ReferenceLayer, scale: f32) -> Result<RgbaBuffer> {
        let size = self.device_size(scale).ok_or_else(|| {
            EngineError::ExportFailed(format!(
                "{}x{} at scale {scale} exceeds {MAX_SURFACE_PIXELS} pixels",
                self.logical_size.0, self.logical_size.1
            ))
        })?;
        Ok(self.build_frame(ink, reference, size, scale).surface)
    }

    /// Rebuilds the live frame at scale 1 from every stroke.
    pub fn render(&mut self, ink: &InkLayer, reference: &ReferenceLayer) -> &RgbaBuffer {
        self.full_renders += 1;
        let frame = self.build_frame(ink, reference, self.live_size(), 1.0);
        &self.frame.insert(frame).surface
    }

    /// Paints one new segment of the open stroke into the live frame. `None`
    /// when nothing on the canvas changed or no frame is cached.
    pub fn apply_segment(&mut self, style: &StrokeStyle, from: Point, to: Point) -> Option<DirtyRect> {
        let frame = self.frame.as_mut()?;
        let (width, height) = (frame.surface.width, frame.surface.height);
        let radius = brush_radius(style.width, 1.0);
        let paint = paint_for(style);
        match frame.ink.as_mut() {
            Some(ink) => {
                let dirty = paint_segment(ink, width, height, from, to, radius, paint)?;
                composite_region(&mut frame.surface, &frame.base, ink, dirty);
                Some(dirty)
            }
            None => paint_segment(&mut frame.surface.pixels, width, height, from, to, radius, paint),
        }
    }

    fn build_frame(
        &self,
        ink: &InkLayer,
        reference: &ReferenceLayer,
        (width, height): (u32, u32),
        scale: f32,
    ) -> Frame {
        let base = reference_base(reference, (width, height));
        match self.reach {
            EraserReach::Ink => {
                let mut ink_pixels = vec![0u8; base.pixels.len()];
                for stroke in ink.strokes() {
                    paint_stroke(&mut ink_pixels, width, height, stroke, paint_for(&stroke.style), scale);
                }
                let mut surface = base.clone();
                composite_region(&mut surface, &base, &ink_pixels, DirtyRect::full(width, height));
                Frame {
                    key: FrameKey::of(reference),
                    base,
                    ink: Some(ink_pixels),
                    surface,
                }
            }
            EraserReach::AllLayers => {
                let mut surface = base.clone();
                for stroke in ink.strokes() {
                    paint_stroke(&mut surface.pixels, width, height, stroke, paint_for(&stroke.style), scale);
                }
                Frame {
                    key: FrameKey::of(reference),
                    base,
                    ink: None,
                    surface,
                }
            }
        }
    }
}

/// The visible reference at `size`, alpha already scaled by its opacity.
fn reference_base(reference: &ReferenceLayer, size: (u32, u32)) -> RgbaBuffer {
    let mut base = RgbaBuffer::new(size.0, size.1, Rgba::TRANSPARENT);
    let Some(image) = reference.shown_image() else {
        return base;
    };
    let opacity = reference.opacity();
    let fitted = image.fitted_for(size);
    for (x, y, px) in fitted.enumerate_pixels() {
        if x >= size.0 || y >= size.1 {
            continue;
        }
        let alpha = (px[3] as f32 * opacity).round().clamp(0.0, 255.0) as u8;
        base.set(x, y, Rgba::rgba(px[0], px[1], px[2], alpha));
    }
    base
}

fn composite_region(surface: &mut RgbaBuffer, base: &RgbaBuffer, ink: &[u8], rect: DirtyRect) {
    let width = surface.width;
    for y in rect.rows() {
        for x in rect.columns() {
            let (x, y) = (x as u32, y as u32);
            let out = blend_pixel(base.pixel(x, y), pixel_at(ink, width, x, y));
            surface.set(x, y, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draw::input::{RecorderUpdate, StrokeRecorder};
    use crate::draw::reference::ReferenceImage;
    use image::RgbaImage;

    const RED: Rgba = Rgba::rgba(255, 0, 0, 255);

    fn style(tool: Tool, width: f32) -> StrokeStyle {
        StrokeStyle {
            tool,
            color: RED,
            width,
        }
    }

    fn grey_reference(size: u32) -> ReferenceLayer {
        let mut layer = ReferenceLayer::new(Some("grey.png".into()), 0.5, true, None);
        layer.apply(ReferenceImage::new(
            "grey.png".into(),
            RgbaImage::from_pixel(size, size, image::Rgba([100, 100, 100, 255])),
            (size, size),
        ));
        layer
    }

    fn draw_line(recorder: &mut StrokeRecorder, style: StrokeStyle, y: f32) {
        recorder.begin(Point::new(2.0, y), style);
        recorder.extend(Point::new(10.0, y));
        recorder.extend(Point::new(18.0, y));
        recorder.end();
    }

    #[test]
    fn render_is_idempotent() {
        let mut recorder = StrokeRecorder::default();
        draw_line(&mut recorder, style(Tool::Brush, 4.0), 5.0);
        let reference = grey_reference(20);
        let mut compositor = Compositor::new((20, 20), EraserReach::Ink);
        let first = compositor.render(recorder.ink(), &reference).clone();
        let second = compositor.render(recorder.ink(), &reference).clone();
        assert_eq!(first, second);
        assert_eq!(compositor.full_renders(), 2);
    }

    #[test]
    fn incremental_segments_match_full_render() {
        for reach in [EraserReach::Ink, EraserReach::AllLayers] {
            let reference = grey_reference(24);
            let mut recorder = StrokeRecorder::default();
            draw_line(&mut recorder, style(Tool::Brush, 6.0), 8.0);

            let mut live = Compositor::new((24, 24), reach);
            live.render(recorder.ink(), &reference);
            let eraser = style(Tool::Eraser, 3.0);
            if let RecorderUpdate::Began { .. } = recorder.begin(Point::new(5.0, 2.0), eraser) {
                live.apply_segment(&eraser, Point::new(5.0, 2.0), Point::new(5.0, 2.0));
            }
            for (x, y) in [(6.0, 8.0), (9.0, 14.0), (20.0, 20.0)] {
                if let RecorderUpdate::Extended { from, to, .. } = recorder.extend(Point::new(x, y)) {
                    assert!(live.is_current(&reference));
                    live.apply_segment(&eraser, from, to);
                }
            }
            assert_eq!(live.full_renders(), 1);

            let full = Compositor::new((24, 24), reach)
                .compose(recorder.ink(), &reference, 1.0)
                .expect("compose");
            assert_eq!(live.surface(), Some(&full), "reach {reach:?}");
        }
    }

    #[test]
    fn reference_is_dimmed_and_ink_sits_on_top() {
        let reference = grey_reference(20);
        let mut recorder = StrokeRecorder::default();
        draw_line(&mut recorder, style(Tool::Brush, 4.0), 5.0);
        let mut compositor = Compositor::new((20, 20), EraserReach::Ink);
        let surface = compositor.render(recorder.ink(), &reference);
        assert_eq!(surface.pixel(10, 5), RED);
        assert_eq!(surface.pixel(10, 15), Rgba::rgba(100, 100, 100, 128));
    }

    #[test]
    fn eraser_reach_decides_whether_reference_survives() {
        let reference = grey_reference(20);
        let mut recorder = StrokeRecorder::default();
        draw_line(&mut recorder, style(Tool::Brush, 4.0), 5.0);
        draw_line(&mut recorder, style(Tool::Eraser, 4.0), 5.0);

        let ink_only = Compositor::new((20, 20), EraserReach::Ink)
            .compose(recorder.ink(), &reference, 1.0)
            .expect("compose");
        assert_eq!(ink_only.pixel(10, 5), Rgba::rgba(100, 100, 100, 128));

        let all = Compositor::new((20, 20), EraserReach::AllLayers)
            .compose(recorder.ink(), &reference, 1.0)
            .expect("compose");
        assert_eq!(all.pixel(10, 5), Rgba::TRANSPARENT);
        assert_eq!(all.pixel(10, 15), Rgba::rgba(100, 100, 100, 128));

        let mut hidden = grey_reference(20);
        hidden.toggle();
        let erased_when_hidden = |reach| {
            Compositor::new((20, 20), reach)
                .compose(recorder.ink(), &hidden, 1.0)
                .expect("compose")
                .pixel(10, 5)
        };
        assert_ne!(erased_when_hidden(EraserReach::Ink), ink_only.pixel(10, 5));
        assert_eq!(erased_when_hidden(EraserReach::AllLayers), all.pixel(10, 5));
    }

    #[test]
    fn hiding_reference_invalidates_the_frame_key() {
        let mut reference = grey_reference(20);
        let mut compositor = Compositor::new((20, 20), EraserReach::Ink);
        compositor.render(&InkLayer::default(), &reference);
        assert!(compositor.is_current(&reference));
        reference.toggle();
        assert!(!compositor.is_current(&reference));
    }

    #[test]
    fn compose_at_double_scale_doubles_dimensions() {
        let compositor = Compositor::new((30, 20), EraserReach::Ink);
        let out = compositor
            .compose(&InkLayer::default(), &ReferenceLayer::new(None, 0.3, true, None), 2.0)
            .expect("compose");
        assert_eq!((out.width, out.height), (60, 40));
    }

    #[test]
    fn oversized_surfaces_are_refused_before_allocating() {
        assert_eq!(scaled_size((600, 600), 2.0), Some((1200, 1200)));
        assert_eq!(scaled_size((600, 600), 1.0e9), None);
        assert_eq!(scaled_size((600, 600), 100.0), None);
        assert_eq!(scaled_size((u32::MAX, u32::MAX), 1.0), None);

        let compositor = Compositor::new((600, 600), EraserReach::Ink);
        let err = compositor
            .compose(&InkLayer::default(), &ReferenceLayer::new(None, 0.3, true, None), 1.0e9)
            .expect_err("too large");
        assert!(matches!(err, EngineError::ExportFailed(_)));
    }

    #[test]
    fn flatten_places_surface_over_paper() {
        let mut surface = RgbaBuffer::new(2, 1, Rgba::TRANSPARENT);
        surface.set(1, 0, Rgba::rgba(0, 255, 0, 255));
        let bg = Rgba::rgba(10, 20, 30, 255);
        let out = flatten(&surface, Some(bg));
        assert_eq!(out.pixel(0, 0), bg);
        assert_eq!(out.pixel(1, 0), Rgba::rgba(0, 255, 0, 255));
        assert_eq!(flatten(&surface, None), surface);
    }
}
