// ============================================================================
// MASK CANVAS - display surfaces, container fitting and reprojection
// ============================================================================
//
// Two raster spaces exist side by side:
//   * display space: the on-screen rectangle the user paints in. Both the
//     image-display surface and the drawing surface live here and are
//     rebuilt whenever the container changes size.
//   * native space: the original image's pixel grid. Only the mask
//     compositor works in it.
// Display surfaces move between sizes with `reproject`; the compositor
// brings ink into native space with `ops::mask::coverage_mask`.

use eframe::egui::{self, Color32, ColorImage, Pos2, Rect, TextureHandle, TextureOptions, Vec2};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use rayon::prelude::*;

use crate::components::history::{MaskHistory, MaskSnapshot};
use crate::io::SourceImage;

// ============================================================================
// DISPLAY GEOMETRY
// ============================================================================

/// Size of the on-screen image rectangle and where it sits inside its
/// container (letterbox / pillarbox offset).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayGeometry {
    pub width: u32,
    pub height: u32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl DisplayGeometry {
    /// Largest rectangle with the native aspect ratio that fits the
    /// container. Never crops, never distorts. `None` when either side has
    /// no area.
    pub fn fit_within(native: (u32, u32), container: (f32, f32)) -> Option<Self> {
        let (nw, nh) = native;
        let (cw, ch) = container;
        if nw == 0 || nh == 0 || !(cw >= 1.0) || !(ch >= 1.0) {
            return None;
        }
        let scale = (cw / nw as f32).min(ch / nh as f32);
        let width = ((nw as f32 * scale).floor() as u32).max(1);
        let height = ((nh as f32 * scale).floor() as u32).max(1);
        Some(Self {
            width,
            height,
            offset_x: ((cw - width as f32) / 2.0).max(0.0),
            offset_y: ((ch - height as f32) / 2.0).max(0.0),
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Screen rectangle of the image inside `container`.
    pub fn rect_in(&self, container: Rect) -> Rect {
        Rect::from_min_size(
            container.min + Vec2::new(self.offset_x, self.offset_y),
            Vec2::new(self.width as f32, self.height as f32),
        )
    }
}

// ============================================================================
// REPROJECTION
// ============================================================================

/// Redraw `src` at `width`×`height` with nearest-neighbour sampling. The
/// source is untouched. Nearest sampling keeps fully opaque and fully
/// transparent pixels exactly that, so binary ink coverage survives any
/// number of up/down round trips at integer factors.
pub fn reproject(src: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    if src.dimensions() == (width, height) {
        return src.clone();
    }
    let mut out = RgbaImage::new(width, height);
    let (sw, sh) = src.dimensions();
    if width == 0 || height == 0 || sw == 0 || sh == 0 {
        return out;
    }

    let x_map: Vec<usize> = (0..width)
        .map(|x| nearest_source(x, width, sw) as usize * 4)
        .collect();
    let src_raw = src.as_raw();
    let src_stride = sw as usize * 4;
    let dst_stride = width as usize * 4;

    let dst_raw: &mut [u8] = &mut out;
    dst_raw
        .par_chunks_mut(dst_stride)
        .enumerate()
        .for_each(|(y, row_out)| {
            let sy = nearest_source(y as u32, height, sh) as usize;
            let row_in = &src_raw[sy * src_stride..(sy + 1) * src_stride];
            for (x, &sx) in x_map.iter().enumerate() {
                row_out[x * 4..x * 4 + 4].copy_from_slice(&row_in[sx..sx + 4]);
            }
        });
    out
}

/// floor((dst + 0.5) * src_len / dst_len), in integers.
pub(crate) fn nearest_source(dst: u32, dst_len: u32, src_len: u32) -> u32 {
    let v = ((dst as u64 * 2 + 1) * src_len as u64) / (dst_len as u64 * 2);
    (v as u32).min(src_len - 1)
}

// ============================================================================
// MASK CANVAS
// ============================================================================

/// The dual-surface painting area: the original image scaled to the
/// display rectangle, and a transparent drawing surface of the same size
/// holding the mask ink.
pub struct MaskCanvas {
    geometry: Option<DisplayGeometry>,
    display_surface: RgbaImage,
    drawing_surface: RgbaImage,
    image_texture: Option<TextureHandle>,
    mask_texture: Option<TextureHandle>,
    image_dirty: bool,
    mask_dirty: bool,
    /// Display only; stored snapshots are unaffected.
    pub mask_visible: bool,
}

impl Default for MaskCanvas {
    fn default() -> Self {
        Self::new()
    }
}

impl MaskCanvas {
    pub fn new() -> Self {
        Self {
            geometry: None,
            display_surface: RgbaImage::new(0, 0),
            drawing_surface: RgbaImage::new(0, 0),
            image_texture: None,
            mask_texture: None,
            image_dirty: false,
            mask_dirty: false,
            mask_visible: true,
        }
    }

    pub fn geometry(&self) -> Option<DisplayGeometry> {
        self.geometry
    }

    pub fn display_surface(&self) -> &RgbaImage {
        &self.display_surface
    }

    pub fn drawing_surface(&self) -> &RgbaImage {
        &self.drawing_surface
    }

    /// Mutable access for the stroke renderer; schedules a texture upload.
    pub fn drawing_surface_mut(&mut self) -> &mut RgbaImage {
        self.mask_dirty = true;
        &mut self.drawing_surface
    }

    /// Blank snapshot matching the current drawing surface.
    pub fn blank_snapshot(&self) -> MaskSnapshot {
        let (w, h) = self.drawing_surface.dimensions();
        MaskSnapshot::blank(w, h)
    }

    /// React to a new container size (including the first layout after the
    /// image loaded). Returns whether the surfaces were rebuilt.
    ///
    /// The first sizing seeds `history` with a blank snapshot. Afterwards
    /// the current snapshot is reprojected onto the resized drawing surface;
    /// the snapshot itself is left as it was captured.
    pub fn on_container_resize(
        &mut self,
        image: &SourceImage,
        container: (f32, f32),
        history: &mut MaskHistory,
    ) -> bool {
        if !image.is_loaded() {
            return false;
        }
        let Some(geometry) = DisplayGeometry::fit_within(image.dimensions(), container) else {
            return false;
        };
        let unchanged = self
            .geometry
            .is_some_and(|g| g.size() == geometry.size());
        self.geometry = Some(geometry);
        if unchanged {
            return false;
        }

        let (w, h) = geometry.size();
        self.display_surface = imageops::resize(image.pixels(), w, h, FilterType::Triangle);
        self.drawing_surface = match history.current() {
            Some(snapshot) => reproject(snapshot.pixels(), w, h),
            None => {
                history.push(MaskSnapshot::blank(w, h));
                RgbaImage::new(w, h)
            }
        };
        self.image_dirty = true;
        self.mask_dirty = true;
        crate::log_info!(
            "Display resized to {}x{} (container {:.0}x{:.0})",
            w,
            h,
            container.0,
            container.1
        );
        true
    }

    /// Redraw the drawing surface from `snapshot` (after undo or clear).
    pub fn show_snapshot(&mut self, snapshot: &MaskSnapshot) {
        let (w, h) = self.drawing_surface.dimensions();
        self.drawing_surface = reproject(snapshot.pixels(), w, h);
        self.mask_dirty = true;
    }

    /// Forget the image; the next load starts from scratch.
    pub fn reset(&mut self) {
        *self = Self {
            mask_visible: self.mask_visible,
            ..Self::new()
        };
    }

    /// Upload changed surfaces and paint them into `rect`.
    pub fn paint(&mut self, ctx: &egui::Context, painter: &egui::Painter, rect: Rect) {
        if self.image_dirty {
            upload(ctx, &mut self.image_texture, "mask_canvas_image", &self.display_surface);
            self.image_dirty = false;
        }
        if self.mask_dirty {
            upload(ctx, &mut self.mask_texture, "mask_canvas_ink", &self.drawing_surface);
            self.mask_dirty = false;
        }

        let uv = Rect::from_min_max(Pos2::ZERO, egui::pos2(1.0, 1.0));
        if let Some(tex) = &self.image_texture {
            painter.image(tex.id(), rect, uv, Color32::WHITE);
        }
        if self.mask_visible
            && let Some(tex) = &self.mask_texture
        {
            painter.image(tex.id(), rect, uv, Color32::WHITE);
        }
    }
}

fn upload(ctx: &egui::Context, slot: &mut Option<TextureHandle>, name: &str, img: &RgbaImage) {
    let color = ColorImage::from_rgba_unmultiplied(
        [img.width() as usize, img.height() as usize],
        img.as_raw(),
    );
    match slot {
        Some(tex) => tex.set(color, TextureOptions::LINEAR),
        None => *slot = Some(ctx.load_texture(name, color, TextureOptions::LINEAR)),
    }
}
