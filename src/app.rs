use eframe::egui;
use eframe::egui::{Color32, ColorImage, Pos2, Rect, Sense, Stroke, TextureHandle, TextureOptions};
use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::time::Duration;

use crate::canvas::DisplayGeometry;
use crate::components::tools::{MAX_BRUSH_SIZE, MIN_BRUSH_SIZE, PointerSource, Tool};
use crate::io::{self, SourceImage};
use crate::ops::edit::{EditOrchestrator, EditResult};
use crate::ops::generate::{GeminiService, GenerationService};
use crate::project::Session;
use crate::settings::AppSettings;

const ERROR_COLOR: Color32 = Color32::from_rgb(230, 80, 80);
const MUTED_COLOR: Color32 = Color32::from_rgb(150, 150, 150);

/// Results from background file operations, polled each frame.
enum IoResult {
    Loaded(Result<SourceImage, String>),
    Saved(Result<PathBuf, String>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Screen {
    Upload,
    Edit,
    Result,
}

pub struct MaskEditApp {
    settings: AppSettings,
    /// Working copy while the settings window is open.
    settings_draft: Option<AppSettings>,
    service: Arc<dyn GenerationService>,
    has_credentials: bool,

    session: Session,
    orchestrator: EditOrchestrator,
    result: Option<EditResult>,
    result_texture: Option<TextureHandle>,

    io_sender: mpsc::Sender<IoResult>,
    io_receiver: mpsc::Receiver<IoResult>,
    pending_io_ops: usize,
    /// One-line feedback for file operations (load failures, saved path).
    status: Option<(String, bool)>,
}

impl MaskEditApp {
    pub fn new(cc: &eframe::CreationContext<'_>, settings: AppSettings) -> Self {
        cc.egui_ctx.set_visuals(egui::Visuals::dark());
        let gemini = GeminiService::from_settings(&settings);
        let has_credentials = gemini.has_credentials();
        if !has_credentials {
            crate::log_warn!("No API key configured; edits will fail until one is set");
        }
        let (io_sender, io_receiver) = mpsc::channel();
        Self {
            session: Session::new(&settings),
            settings,
            settings_draft: None,
            service: Arc::new(gemini),
            has_credentials,
            orchestrator: EditOrchestrator::new(),
            result: None,
            result_texture: None,
            io_sender,
            io_receiver,
            pending_io_ops: 0,
            status: None,
        }
    }

    fn screen(&self) -> Screen {
        if self.result.is_some() {
            Screen::Result
        } else if self.session.has_image() {
            Screen::Edit
        } else {
            Screen::Upload
        }
    }

    // ========================================================================
    // FILE OPERATIONS
    // ========================================================================

    fn open_dialog(&mut self) {
        if let Some(path) = io::pick_image_path() {
            self.open_path(path);
        }
    }

    /// Decode on a worker thread; the result arrives through `io_receiver`.
    fn open_path(&mut self, path: PathBuf) {
        let sender = self.io_sender.clone();
        self.pending_io_ops += 1;
        std::thread::spawn(move || {
            let _ = sender.send(IoResult::Loaded(io::load_source_image(&path)));
        });
    }

    fn download_result(&mut self) {
        let Some(result) = &self.result else { return };
        let default_name = self
            .session
            .image()
            .map(|img| io::result_file_name(img.name()))
            .unwrap_or_else(|| io::result_file_name(""));
        let Some(path) = io::pick_save_path(&default_name) else { return };
        let image = Arc::clone(&result.image);
        let sender = self.io_sender.clone();
        self.pending_io_ops += 1;
        std::thread::spawn(move || {
            let saved = io::save_png(&path, &image).map(|()| path);
            let _ = sender.send(IoResult::Saved(saved));
        });
    }

    fn poll_io(&mut self) {
        while let Ok(result) = self.io_receiver.try_recv() {
            self.pending_io_ops = self.pending_io_ops.saturating_sub(1);
            match result {
                IoResult::Loaded(Ok(image)) if image.is_loaded() => {
                    self.result = None;
                    self.result_texture = None;
                    self.orchestrator.reset();
                    self.session.load_image(image);
                    self.status = None;
                }
                IoResult::Loaded(Ok(image)) => {
                    self.status = Some((format!("{} has no pixels.", image.name()), true));
                }
                IoResult::Loaded(Err(e)) => {
                    crate::log_err!("{}", e);
                    self.status = Some((e, true));
                }
                IoResult::Saved(Ok(path)) => {
                    self.status = Some((format!("Saved to {}", path.display()), false));
                }
                IoResult::Saved(Err(e)) => {
                    crate::log_err!("{}", e);
                    self.status = Some((e, true));
                }
            }
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let dropped: Vec<egui::DroppedFile> = ctx.input(|i| i.raw.dropped_files.clone());
        if dropped.is_empty() || self.orchestrator.is_busy() {
            return;
        }
        // One image at a time; the first supported file wins.
        let path = dropped
            .into_iter()
            .filter_map(|f| f.path)
            .find(|p| io::is_supported_path(p));
        match path {
            Some(path) => self.open_path(path),
            None => self.status = Some(("Unsupported file type.".to_string(), true)),
        }
    }

    // ========================================================================
    // SCREENS
    // ========================================================================

    fn show_top_bar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("MaskEdit");
                if let Some(img) = self.session.image() {
                    ui.label(
                        egui::RichText::new(format!(
                            "{}  {}×{}",
                            img.name(),
                            img.width(),
                            img.height()
                        ))
                        .color(MUTED_COLOR),
                    );
                }
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    if ui.button("Settings").clicked() && self.settings_draft.is_none() {
                        self.settings_draft = Some(self.settings.clone());
                    }
                    if self.pending_io_ops > 0 {
                        ui.spinner();
                    }
                });
            });
        });
    }

    fn show_upload(&mut self, ctx: &egui::Context) {
        let hovering = ctx.input(|i| !i.raw.hovered_files.is_empty());
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.vertical_centered(|ui| {
                ui.add_space(ui.available_height() * 0.35);
                let text = if hovering {
                    "Release to open"
                } else {
                    "Drop an image here"
                };
                ui.heading(text);
                ui.add_space(8.0);
                if ui.button("Open image…").clicked() {
                    self.open_dialog();
                }
                ui.add_space(8.0);
                ui.label(
                    egui::RichText::new(io::SUPPORTED_EXTENSIONS.join(", ")).color(MUTED_COLOR),
                );
                self.show_status(ui);
            });
        });
    }

    fn show_edit(&mut self, ctx: &egui::Context) {
        let busy = self.orchestrator.is_busy();

        if !busy && ctx.input_mut(|i| i.consume_key(egui::Modifiers::COMMAND, egui::Key::Z)) {
            self.session.undo();
        }

        egui::SidePanel::left("controls")
            .resizable(false)
            .exact_width(250.0)
            .show(ctx, |ui| {
                ui.add_space(6.0);
                ui.add_enabled_ui(!busy, |ui| self.show_controls(ui));
                ui.add_space(8.0);
                ui.separator();
                if busy {
                    ui.horizontal(|ui| {
                        ui.spinner();
                        let secs = self.orchestrator.elapsed_secs().unwrap_or(0.0);
                        ui.label(format!("Generating… {:.0}s", secs));
                    });
                }
                if let Some(err) = self.orchestrator.last_error() {
                    ui.add(egui::Label::new(
                        egui::RichText::new(err.to_string()).color(ERROR_COLOR),
                    ).wrap(true));
                }
                if !self.has_credentials {
                    ui.add(egui::Label::new(
                        egui::RichText::new("No API key set. Open Settings to add one.")
                            .color(MUTED_COLOR),
                    ).wrap(true));
                }
                self.show_status(ui);
            });

        egui::CentralPanel::default()
            .frame(egui::Frame::none().fill(Color32::from_gray(24)))
            .show(ctx, |ui| self.show_canvas(ctx, ui, busy));
    }

    fn show_controls(&mut self, ui: &mut egui::Ui) {
        ui.label("Tool");
        let mut tool = self.session.tool();
        ui.horizontal(|ui| {
            for t in Tool::all() {
                ui.selectable_value(&mut tool, *t, t.label());
            }
        });
        if tool != self.session.tool() {
            self.session.set_tool(tool);
        }

        ui.add_space(6.0);
        let mut size = self.session.brush_size();
        if ui
            .add(egui::Slider::new(&mut size, MIN_BRUSH_SIZE..=MAX_BRUSH_SIZE).text("Size"))
            .changed()
        {
            self.session.set_brush_size(size);
        }

        let mut visible = self.session.mask_visible();
        if ui.checkbox(&mut visible, "Show mask").changed() {
            self.session.set_mask_visible(visible);
        }

        ui.add_space(6.0);
        ui.horizontal(|ui| {
            if ui
                .add_enabled(self.session.can_undo(), egui::Button::new("Undo"))
                .clicked()
            {
                self.session.undo();
            }
            if ui.button("Clear").clicked() {
                self.session.clear_mask();
            }
            if ui.button("New image").clicked() {
                self.start_over();
            }
        });
        ui.label(
            egui::RichText::new(format!(
                "{} steps, {:.1} MB",
                self.session.history.len(),
                self.session.history.memory_usage() as f64 / (1024.0 * 1024.0)
            ))
            .small()
            .color(MUTED_COLOR),
        );

        ui.add_space(10.0);
        ui.label("Describe the change");
        let edited = ui
            .add(
                egui::TextEdit::multiline(&mut self.session.prompt)
                    .hint_text("e.g. make the sky orange")
                    .desired_rows(4)
                    .desired_width(f32::INFINITY),
            )
            .changed();
        if edited {
            self.orchestrator.dismiss_error();
        }
        ui.add_space(6.0);
        if ui
            .add_sized([ui.available_width(), 28.0], egui::Button::new("Generate"))
            .clicked()
        {
            // Failures are recorded on the orchestrator and shown below.
            let _ = self.orchestrator.submit(
                &self.session.prompt,
                self.session.image(),
                &self.session.history,
                Arc::clone(&self.service),
            );
        }
    }

    fn show_canvas(&mut self, ctx: &egui::Context, ui: &mut egui::Ui, busy: bool) {
        let available = ui.available_size();
        let (container, response) = ui.allocate_exact_size(available, Sense::drag());
        self.session.resize((container.width(), container.height()));

        let Some(geometry) = self.session.canvas.geometry() else { return };
        let image_rect = geometry.rect_in(container);
        let painter = ui.painter_at(container);
        self.session.canvas.paint(ctx, &painter, image_rect);

        if busy {
            if self.session.renderer.is_active() {
                self.session.renderer.cancel();
            }
            return;
        }

        self.handle_pointer(ctx, &response, image_rect);

        if let Some(hover) = response.hover_pos()
            && image_rect.contains(hover)
        {
            let color = match self.session.tool() {
                Tool::Paint => Color32::WHITE,
                Tool::Erase => Color32::from_rgb(120, 200, 255),
            };
            painter.circle_stroke(hover, self.session.brush_size() / 2.0, Stroke::new(1.0, color));
        }
    }

    fn handle_pointer(&mut self, ctx: &egui::Context, response: &egui::Response, image_rect: Rect) {
        let touches: Vec<Pos2> = ctx.input(|i| {
            i.events
                .iter()
                .filter_map(|e| match e {
                    egui::Event::Touch {
                        phase: egui::TouchPhase::Start | egui::TouchPhase::Move,
                        pos,
                        ..
                    } => Some(*pos),
                    _ => None,
                })
                .collect()
        });
        let sample = if touches.is_empty() {
            response.interact_pointer_pos().map(PointerSource::Mouse)
        } else {
            Some(PointerSource::Touch(touches))
        };

        if response.drag_started() {
            let origin = ctx
                .input(|i| i.pointer.press_origin())
                .map(PointerSource::Mouse)
                .or_else(|| sample.clone());
            if let Some(pos) = origin.and_then(|s| s.relative_to(image_rect)) {
                self.session.begin_stroke(pos);
            }
        }
        if response.dragged()
            && let Some(pos) = sample.and_then(|s| s.relative_to(image_rect))
            && self.session.extend_stroke(pos)
        {
            ctx.request_repaint();
        }
        if response.drag_released() {
            self.session.end_stroke();
        }
    }

    fn show_result(&mut self, ctx: &egui::Context) {
        let Some(result) = &self.result else { return };
        let image = Arc::clone(&result.image);
        let prompt = result.prompt.clone();
        let texture = self
            .result_texture
            .get_or_insert_with(|| {
                let color = ColorImage::from_rgba_unmultiplied(
                    [image.width() as usize, image.height() as usize],
                    image.as_raw(),
                );
                ctx.load_texture("edit_result", color, TextureOptions::LINEAR)
            })
            .clone();

        let mut download = false;
        let mut keep_editing = false;
        let mut new_image = false;
        egui::TopBottomPanel::bottom("result_actions").show(ctx, |ui| {
            ui.add_space(4.0);
            ui.horizontal(|ui| {
                download = ui.button("Download").clicked();
                keep_editing = ui.button("Keep editing").clicked();
                new_image = ui.button("New image").clicked();
                ui.label(egui::RichText::new(format!("\"{}\"", prompt)).color(MUTED_COLOR));
            });
            self.show_status(ui);
            ui.add_space(4.0);
        });
        egui::CentralPanel::default().show(ctx, |ui| {
            let available = ui.available_size();
            let (container, _) = ui.allocate_exact_size(available, Sense::hover());
            if let Some(fit) = DisplayGeometry::fit_within(
                image.dimensions(),
                (container.width(), container.height()),
            ) {
                let uv = Rect::from_min_max(Pos2::ZERO, egui::pos2(1.0, 1.0));
                ui.painter()
                    .image(texture.id(), fit.rect_in(container), uv, Color32::WHITE);
            }
        });

        if download {
            self.download_result();
        }
        if keep_editing {
            self.result = None;
            self.result_texture = None;
            self.orchestrator.reset();
        }
        if new_image {
            self.start_over();
        }
    }

    fn start_over(&mut self) {
        self.result = None;
        self.result_texture = None;
        self.orchestrator.reset();
        self.session.unload();
        self.status = None;
    }

    fn show_status(&self, ui: &mut egui::Ui) {
        if let Some((text, is_error)) = &self.status {
            let color = if *is_error { ERROR_COLOR } else { MUTED_COLOR };
            ui.add(egui::Label::new(egui::RichText::new(text).color(color)).wrap(true));
        }
    }

    fn show_settings(&mut self, ctx: &egui::Context) {
        let Some(mut draft) = self.settings_draft.take() else { return };
        let mut open = true;
        let mut save = false;
        let mut cancel = false;
        egui::Window::new("Settings")
            .collapsible(false)
            .resizable(false)
            .open(&mut open)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                egui::Grid::new("settings_grid")
                    .num_columns(2)
                    .spacing([12.0, 6.0])
                    .show(ui, |ui| {
                        ui.label("API key");
                        ui.add(egui::TextEdit::singleline(&mut draft.api_key).password(true));
                        ui.end_row();

                        ui.label("Model");
                        ui.text_edit_singleline(&mut draft.model);
                        ui.end_row();

                        ui.label("API base URL");
                        ui.text_edit_singleline(&mut draft.api_base);
                        ui.end_row();

                        ui.label("Timeout (s)");
                        ui.add(
                            egui::DragValue::new(&mut draft.request_timeout_secs)
                                .clamp_range(5..=600),
                        );
                        ui.end_row();

                        ui.label("Undo steps");
                        ui.add(
                            egui::DragValue::new(&mut draft.max_history_steps)
                                .clamp_range(0..=500),
                        )
                        .on_hover_text("0 keeps every step");
                        ui.end_row();

                        ui.label("Default brush");
                        ui.add(egui::Slider::new(
                            &mut draft.default_brush_size,
                            MIN_BRUSH_SIZE..=MAX_BRUSH_SIZE,
                        ));
                        ui.end_row();

                        ui.label("Mask colour");
                        ui.color_edit_button_srgba_unmultiplied(&mut draft.mask_color.0);
                        ui.end_row();
                    });
                ui.label(
                    egui::RichText::new("GEMINI_API_KEY / GOOGLE_API_KEY override the key above.")
                        .color(MUTED_COLOR),
                );
                ui.add_space(6.0);
                ui.horizontal(|ui| {
                    save = ui.button("Save").clicked();
                    cancel = ui.button("Cancel").clicked();
                });
            });

        if save {
            if draft.mask_color[3] == 0 {
                draft.mask_color[3] = 1;
            }
            draft.api_base = draft.api_base.trim().trim_end_matches('/').to_string();
            draft.save();
            let gemini = GeminiService::from_settings(&draft);
            self.has_credentials = gemini.has_credentials();
            self.service = Arc::new(gemini);
            self.session.apply_settings(&draft);
            self.settings = draft;
        } else if open && !cancel {
            self.settings_draft = Some(draft);
        }
    }
}

impl eframe::App for MaskEditApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_io();
        if self.pending_io_ops > 0 {
            ctx.request_repaint();
        }

        // Failures stay recorded on the orchestrator for the edit screen.
        if let Some(Ok(result)) = self.orchestrator.poll() {
            self.result = Some(result);
            self.result_texture = None;
            self.status = None;
        }
        if self.orchestrator.is_busy() {
            ctx.request_repaint_after(Duration::from_millis(100));
        }

        self.handle_dropped_files(ctx);
        self.show_top_bar(ctx);
        match self.screen() {
            Screen::Upload => self.show_upload(ctx),
            Screen::Edit => self.show_edit(ctx),
            Screen::Result => self.show_result(ctx),
        }
        self.show_settings(ctx);
    }
}
