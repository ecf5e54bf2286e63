#![windows_subsystem = "windows"]

use eframe::egui;
use maskedit::app::MaskEditApp;
use maskedit::logger;
use maskedit::settings::AppSettings;

fn main() -> Result<(), eframe::Error> {
    // Initialize session log (overwrites previous session log)
    logger::init();

    let settings = AppSettings::load();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1100.0, 760.0])
            .with_min_inner_size([640.0, 480.0])
            .with_drag_and_drop(true)
            .with_title("MaskEdit"),
        ..Default::default()
    };

    eframe::run_native(
        "MaskEdit",
        options,
        Box::new(move |cc| Box::new(MaskEditApp::new(cc, settings))),
    )
}
