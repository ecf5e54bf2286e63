use eframe::egui::{Pos2, Rect};
use image::{Rgba, RgbaImage};

use crate::components::history::{MaskHistory, MaskSnapshot};

/// Brush diameter bounds, in display pixels.
pub const MIN_BRUSH_SIZE: f32 = 5.0;
pub const MAX_BRUSH_SIZE: f32 = 150.0;
pub const DEFAULT_BRUSH_SIZE: f32 = 40.0;

/// Translucent red: visible over most photos without hiding them.
pub const DEFAULT_MASK_COLOR: Rgba<u8> = Rgba([255, 48, 48, 128]);

// ============================================================================
// TOOL / BRUSH STATE
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Tool {
    /// Adds translucent ink (source-over).
    #[default]
    Paint,
    /// Removes ink whatever its colour (destination-out).
    Erase,
}

impl Tool {
    pub fn label(&self) -> &'static str {
        match self {
            Tool::Paint => "Brush",
            Tool::Erase => "Eraser",
        }
    }

    pub fn all() -> &'static [Tool] {
        &[Tool::Paint, Tool::Erase]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BrushProperties {
    /// Diameter in display pixels, always within
    /// `MIN_BRUSH_SIZE..=MAX_BRUSH_SIZE`.
    size: f32,
    /// Unmultiplied ink colour used by the paint tool.
    pub color: Rgba<u8>,
}

impl Default for BrushProperties {
    fn default() -> Self {
        Self {
            size: DEFAULT_BRUSH_SIZE,
            color: DEFAULT_MASK_COLOR,
        }
    }
}

impl BrushProperties {
    pub fn new(size: f32, color: Rgba<u8>) -> Self {
        let mut props = Self { size: DEFAULT_BRUSH_SIZE, color };
        props.set_size(size);
        props
    }

    pub fn size(&self) -> f32 {
        self.size
    }

    pub fn set_size(&mut self, size: f32) {
        self.size = if size.is_finite() {
            size.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE)
        } else {
            DEFAULT_BRUSH_SIZE
        };
    }
}

// ============================================================================
// POINTER INPUT
// ============================================================================

/// Where a pointer sample came from. Touch input may carry several contact
/// points; only the first one steers the brush.
#[derive(Clone, Debug, PartialEq)]
pub enum PointerSource {
    Mouse(Pos2),
    Touch(Vec<Pos2>),
}

impl PointerSource {
    pub fn primary(&self) -> Option<Pos2> {
        match self {
            PointerSource::Mouse(pos) => Some(*pos),
            PointerSource::Touch(points) => points.first().copied(),
        }
    }

    /// Position relative to the top-left corner of `canvas_rect`, in display
    /// pixels.
    pub fn relative_to(&self, canvas_rect: Rect) -> Option<(f32, f32)> {
        let pos = self.primary()?;
        Some((pos.x - canvas_rect.min.x, pos.y - canvas_rect.min.y))
    }
}

// ============================================================================
// STROKE RENDERER
// ============================================================================

struct ActiveStroke {
    tool: Tool,
    radius: f32,
    color: Rgba<u8>,
    last: (f32, f32),
    points: usize,
    /// Pixels already composited by this stroke, so translucent ink is
    /// applied once per pixel however often the path crosses itself.
    covered: Vec<bool>,
    surface_size: (u32, u32),
}

impl ActiveStroke {
    fn reset_coverage(&mut self, size: (u32, u32)) {
        self.surface_size = size;
        self.covered = vec![false; size.0 as usize * size.1 as usize];
    }
}

/// Turns pointer samples into ink on the drawing surface. All coordinates
/// are display coordinates; the surface is the display-sized mask raster.
#[derive(Default)]
pub struct StrokeRenderer {
    pub tool: Tool,
    pub brush: BrushProperties,
    active: Option<ActiveStroke>,
}

impl StrokeRenderer {
    pub fn new(brush: BrushProperties) -> Self {
        Self {
            tool: Tool::Paint,
            brush,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Open a path at `pos`. Nothing is drawn until the pointer moves.
    pub fn begin(&mut self, surface: &RgbaImage, pos: (f32, f32)) {
        let size = surface.dimensions();
        self.active = Some(ActiveStroke {
            tool: self.tool,
            radius: self.brush.size() / 2.0,
            color: self.brush.color,
            last: pos,
            points: 1,
            covered: vec![false; size.0 as usize * size.1 as usize],
            surface_size: size,
        });
    }

    /// Extend the open path to `pos`. Returns whether any pixel changed.
    pub fn extend(&mut self, surface: &mut RgbaImage, pos: (f32, f32)) -> bool {
        let Some(stroke) = self.active.as_mut() else {
            return false;
        };
        // The surface was resized under us; keep drawing in the new space.
        if surface.dimensions() != stroke.surface_size {
            stroke.reset_coverage(surface.dimensions());
        }
        let from = stroke.last;
        let changed = rasterize_segment(surface, stroke, from, pos);
        stroke.last = pos;
        stroke.points += 1;
        changed
    }

    /// Close the path and record the whole surface as the next snapshot.
    /// Returns `false` when no stroke was open.
    pub fn end(&mut self, surface: &RgbaImage, history: &mut MaskHistory) -> bool {
        let Some(stroke) = self.active.take() else {
            return false;
        };
        history.push(MaskSnapshot::new(surface.clone()));
        crate::log_info!(
            "{} stroke committed ({} points, diameter {:.0}), history {}",
            stroke.tool.label(),
            stroke.points,
            stroke.radius * 2.0,
            history.len()
        );
        true
    }

    /// Drop the open path without recording anything.
    pub fn cancel(&mut self) {
        self.active = None;
    }
}

/// Composite every pixel whose centre lies within the stroke radius of the
/// segment `a`-`b`. Covering by distance to the segment gives round caps and
/// round joins between consecutive segments.
fn rasterize_segment(
    surface: &mut RgbaImage,
    stroke: &mut ActiveStroke,
    a: (f32, f32),
    b: (f32, f32),
) -> bool {
    let (width, height) = surface.dimensions();
    if width == 0 || height == 0 {
        return false;
    }
    let r = stroke.radius;
    let r_sq = r * r;

    let min_x = (a.0.min(b.0) - r).floor().max(0.0) as u32;
    let min_y = (a.1.min(b.1) - r).floor().max(0.0) as u32;
    let max_x = (a.0.max(b.0) + r).ceil().min(width as f32 - 1.0);
    let max_y = (a.1.max(b.1) + r).ceil().min(height as f32 - 1.0);
    if max_x < 0.0 || max_y < 0.0 {
        return false;
    }
    let (max_x, max_y) = (max_x as u32, max_y as u32);

    let mut changed = false;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let centre = (x as f32 + 0.5, y as f32 + 0.5);
            if distance_sq_to_segment(centre, a, b) > r_sq {
                continue;
            }
            let idx = (y * width + x) as usize;
            if stroke.covered[idx] {
                continue;
            }
            stroke.covered[idx] = true;

            let dst = *surface.get_pixel(x, y);
            let out = match stroke.tool {
                Tool::Paint => source_over(dst, stroke.color),
                Tool::Erase => Rgba([0, 0, 0, 0]),
            };
            if out != dst {
                surface.put_pixel(x, y, out);
                changed = true;
            }
        }
    }
    changed
}

fn distance_sq_to_segment(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq < 1e-6 {
        0.0
    } else {
        (((p.0 - a.0) * dx + (p.1 - a.1) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a.0 + dx * t, a.1 + dy * t);
    (p.0 - cx) * (p.0 - cx) + (p.1 - cy) * (p.1 - cy)
}

/// Porter-Duff source-over on unmultiplied RGBA.
pub fn source_over(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |i: usize| {
        let v = (src[i] as f32 * sa + dst[i] as f32 * da * (1.0 - sa)) / out_a;
        v.round().clamp(0.0, 255.0) as u8
    };
    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use eframe::egui::pos2;

    fn surface() -> RgbaImage {
        RgbaImage::new(100, 100)
    }

    fn renderer(size: f32) -> StrokeRenderer {
        StrokeRenderer::new(BrushProperties::new(size, DEFAULT_MASK_COLOR))
    }

    #[test]
    fn brush_size_is_clamped() {
        let mut brush = BrushProperties::default();
        brush.set_size(1.0);
        assert_eq!(brush.size(), MIN_BRUSH_SIZE);
        brush.set_size(400.0);
        assert_eq!(brush.size(), MAX_BRUSH_SIZE);
        brush.set_size(f32::NAN);
        assert_eq!(brush.size(), DEFAULT_BRUSH_SIZE);
    }

    #[test]
    fn touch_uses_first_contact() {
        let rect = Rect::from_min_max(pos2(10.0, 20.0), pos2(110.0, 120.0));
        let touch = PointerSource::Touch(vec![pos2(15.0, 25.0), pos2(90.0, 90.0)]);
        assert_eq!(touch.relative_to(rect), Some((5.0, 5.0)));
        assert_eq!(PointerSource::Touch(Vec::new()).relative_to(rect), None);
        assert_eq!(
            PointerSource::Mouse(pos2(60.0, 70.0)).relative_to(rect),
            Some((50.0, 50.0))
        );
    }

    #[test]
    fn begin_alone_draws_nothing() {
        let s = surface();
        let mut r = renderer(20.0);
        r.begin(&s, (50.0, 50.0));
        assert!(r.is_active());
        assert!(s.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn extend_without_begin_is_ignored() {
        let mut s = surface();
        let mut r = renderer(20.0);
        assert!(!r.extend(&mut s, (50.0, 50.0)));
        assert!(s.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn paint_segment_has_round_caps() {
        let mut s = surface();
        let mut r = renderer(20.0);
        r.begin(&s, (30.0, 50.0));
        assert!(r.extend(&mut s, (70.0, 50.0)));

        // On the path and inside the caps.
        assert_eq!(s.get_pixel(50, 50)[3], DEFAULT_MASK_COLOR[3]);
        assert!(s.get_pixel(22, 50)[3] > 0);
        assert!(s.get_pixel(77, 50)[3] > 0);
        // Beyond the radius.
        assert_eq!(s.get_pixel(50, 62)[3], 0);
        assert_eq!(s.get_pixel(18, 50)[3], 0);
        // Cap corners are rounded off.
        assert_eq!(s.get_pixel(21, 42)[3], 0);
    }

    #[test]
    fn overlapping_path_does_not_accumulate_within_a_stroke() {
        let mut s = surface();
        let mut r = renderer(20.0);
        r.begin(&s, (30.0, 50.0));
        r.extend(&mut s, (70.0, 50.0));
        r.extend(&mut s, (30.0, 50.0));
        assert_eq!(s.get_pixel(50, 50)[3], DEFAULT_MASK_COLOR[3]);
    }

    #[test]
    fn second_stroke_composites_over_first() {
        let mut s = surface();
        let mut history = MaskHistory::new(0);
        let mut r = renderer(20.0);
        for _ in 0..2 {
            r.begin(&s, (30.0, 50.0));
            r.extend(&mut s, (70.0, 50.0));
            r.end(&s, &mut history);
        }
        assert!(s.get_pixel(50, 50)[3] > DEFAULT_MASK_COLOR[3]);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn eraser_removes_ink_of_any_colour() {
        let mut s = surface();
        for p in s.pixels_mut() {
            *p = Rgba([10, 200, 30, 255]);
        }
        let mut r = renderer(30.0);
        r.tool = Tool::Erase;
        r.begin(&s, (50.0, 20.0));
        r.extend(&mut s, (50.0, 80.0));
        assert_eq!(*s.get_pixel(50, 50), Rgba([0, 0, 0, 0]));
        assert_eq!(s.get_pixel(5, 50)[3], 255);
    }

    #[test]
    fn end_pushes_full_surface_snapshot() {
        let mut s = surface();
        let mut history = MaskHistory::new(0);
        history.push(MaskSnapshot::blank(100, 100));
        let mut r = renderer(10.0);

        assert!(!r.end(&s, &mut history));
        r.begin(&s, (10.0, 10.0));
        r.extend(&mut s, (20.0, 20.0));
        assert!(r.end(&s, &mut history));
        assert!(!r.is_active());

        let head = history.current().unwrap();
        assert_eq!(head.pixels(), &s);
        assert_eq!(history.cursor(), Some(1));
    }

    #[test]
    fn brush_change_only_affects_later_strokes() {
        let mut s = surface();
        let mut r = renderer(10.0);
        r.begin(&s, (20.0, 50.0));
        r.brush.set_size(60.0);
        r.extend(&mut s, (40.0, 50.0));
        // Still drawn with the 10px diameter chosen at begin().
        assert_eq!(s.get_pixel(30, 58)[3], 0);
    }

    #[test]
    fn source_over_onto_transparent_keeps_source() {
        let out = source_over(Rgba([0, 0, 0, 0]), Rgba([255, 48, 48, 128]));
        assert_eq!(out, Rgba([255, 48, 48, 128]));
    }
}
