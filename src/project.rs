use crate::canvas::MaskCanvas;
use crate::components::history::MaskHistory;
use crate::components::tools::{BrushProperties, StrokeRenderer, Tool};
use crate::io::SourceImage;
use crate::ops::mask::is_mask_empty;
use crate::settings::AppSettings;

/// Everything the edit screen works on: one uploaded image, its mask canvas
/// and undo history, the brush, and the prompt being typed. Lives only as
/// long as the window.
pub struct Session {
    image: Option<SourceImage>,
    pub canvas: MaskCanvas,
    pub history: MaskHistory,
    pub renderer: StrokeRenderer,
    pub prompt: String,
    max_history_steps: usize,
}

impl Session {
    pub fn new(settings: &AppSettings) -> Self {
        Self {
            image: None,
            canvas: MaskCanvas::new(),
            history: MaskHistory::new(settings.max_history_steps),
            renderer: StrokeRenderer::new(BrushProperties::new(
                settings.default_brush_size,
                settings.mask_color,
            )),
            prompt: String::new(),
            max_history_steps: settings.max_history_steps,
        }
    }

    /// Pick up changed settings. A new history cap takes effect on the next
    /// image.
    pub fn apply_settings(&mut self, settings: &AppSettings) {
        self.renderer.brush.color = settings.mask_color;
        self.max_history_steps = settings.max_history_steps;
    }

    pub fn image(&self) -> Option<&SourceImage> {
        self.image.as_ref()
    }

    pub fn has_image(&self) -> bool {
        self.image.as_ref().is_some_and(SourceImage::is_loaded)
    }

    /// Start editing `image`. The surfaces are built on the next
    /// [`Session::resize`].
    pub fn load_image(&mut self, image: SourceImage) {
        crate::log_info!(
            "Editing {} ({}x{})",
            image.name(),
            image.width(),
            image.height()
        );
        self.unload();
        self.image = Some(image);
    }

    /// Drop the image and everything drawn on it. Tool and brush persist.
    pub fn unload(&mut self) {
        self.image = None;
        self.canvas.reset();
        self.history = MaskHistory::new(self.max_history_steps);
        self.renderer.cancel();
        self.prompt.clear();
    }

    /// Fit the canvas to a container of `size` display pixels.
    pub fn resize(&mut self, size: (f32, f32)) -> bool {
        match &self.image {
            Some(image) => self.canvas.on_container_resize(image, size, &mut self.history),
            None => false,
        }
    }

    /// Positions are relative to the top-left of the displayed image.
    pub fn begin_stroke(&mut self, pos: (f32, f32)) {
        if self.canvas.geometry().is_some() {
            self.renderer.begin(self.canvas.drawing_surface(), pos);
        }
    }

    pub fn extend_stroke(&mut self, pos: (f32, f32)) -> bool {
        if !self.renderer.is_active() {
            return false;
        }
        self.renderer.extend(self.canvas.drawing_surface_mut(), pos)
    }

    pub fn end_stroke(&mut self) -> bool {
        self.renderer
            .end(self.canvas.drawing_surface(), &mut self.history)
    }

    /// Step back one snapshot. Ignored mid-stroke.
    pub fn undo(&mut self) -> bool {
        if self.renderer.is_active() {
            return false;
        }
        let Some(snapshot) = self.history.undo().cloned() else {
            return false;
        };
        self.canvas.show_snapshot(&snapshot);
        crate::log_info!("Undo, history position {:?}", self.history.cursor());
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.renderer.is_active() && self.history.can_undo()
    }

    /// Erase the whole mask. Undo brings it back.
    pub fn clear_mask(&mut self) {
        if self.canvas.geometry().is_none() {
            return;
        }
        self.renderer.cancel();
        let blank = self.canvas.blank_snapshot();
        self.history.reset(blank.clone());
        self.canvas.show_snapshot(&blank);
        crate::log_info!("Mask cleared");
    }

    pub fn mask_is_empty(&self) -> bool {
        self.history.current().is_none_or(is_mask_empty)
    }

    pub fn tool(&self) -> Tool {
        self.renderer.tool
    }

    /// Applies from the next stroke on.
    pub fn set_tool(&mut self, tool: Tool) {
        self.renderer.tool = tool;
    }

    pub fn brush_size(&self) -> f32 {
        self.renderer.brush.size()
    }

    pub fn set_brush_size(&mut self, size: f32) {
        self.renderer.brush.set_size(size);
    }

    pub fn mask_visible(&self) -> bool {
        self.canvas.mask_visible
    }

    pub fn set_mask_visible(&mut self, visible: bool) {
        self.canvas.mask_visible = visible;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn session_with_image(w: u32, h: u32, container: (f32, f32)) -> Session {
        let mut session = Session::new(&AppSettings::default());
        session.load_image(SourceImage::new("t.png", RgbaImage::new(w, h)));
        assert!(session.resize(container));
        session
    }

    fn stroke(session: &mut Session, from: (f32, f32), to: (f32, f32)) {
        session.begin_stroke(from);
        session.extend_stroke(to);
        assert!(session.end_stroke());
    }

    #[test]
    fn first_layout_seeds_a_blank_snapshot() {
        let session = session_with_image(800, 600, (400.0, 400.0));
        assert_eq!(session.history.len(), 1);
        assert!(session.mask_is_empty());
        assert_eq!(session.canvas.drawing_surface().dimensions(), (400, 300));
        assert!(!session.can_undo());
    }

    #[test]
    fn undo_walks_back_each_stroke() {
        let mut session = session_with_image(100, 100, (100.0, 100.0));
        stroke(&mut session, (10.0, 10.0), (20.0, 10.0));
        stroke(&mut session, (50.0, 50.0), (60.0, 50.0));
        assert_eq!(session.canvas.drawing_surface().get_pixel(55, 50)[3], 128);

        assert!(session.undo());
        assert_eq!(session.canvas.drawing_surface().get_pixel(55, 50)[3], 0);
        assert_eq!(session.canvas.drawing_surface().get_pixel(15, 10)[3], 128);

        assert!(session.undo());
        assert!(session.mask_is_empty());
        assert!(!session.undo());
    }

    #[test]
    fn clear_is_undoable() {
        let mut session = session_with_image(100, 100, (100.0, 100.0));
        stroke(&mut session, (10.0, 10.0), (20.0, 10.0));
        session.clear_mask();
        assert!(session.mask_is_empty());
        assert!(session.undo());
        assert!(!session.mask_is_empty());
    }

    #[test]
    fn strokes_before_layout_are_ignored() {
        let mut session = Session::new(&AppSettings::default());
        session.load_image(SourceImage::new("t.png", RgbaImage::new(10, 10)));
        session.begin_stroke((1.0, 1.0));
        assert!(!session.extend_stroke((5.0, 5.0)));
        assert!(!session.end_stroke());
        assert!(session.history.is_empty());
    }

    #[test]
    fn loading_a_new_image_starts_fresh() {
        let mut session = session_with_image(100, 100, (100.0, 100.0));
        session.set_brush_size(80.0);
        session.prompt = "sky".to_string();
        stroke(&mut session, (10.0, 10.0), (20.0, 10.0));

        session.load_image(SourceImage::new("b.png", RgbaImage::new(50, 50)));
        assert!(session.history.is_empty());
        assert!(session.canvas.geometry().is_none());
        assert!(session.prompt.is_empty());
        assert_eq!(session.brush_size(), 80.0);
    }
}
