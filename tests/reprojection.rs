use image::{Rgb, RgbImage, RgbaImage};
use maskedit::io::SourceImage;
use maskedit::ops::mask::{build_submission_mask, white_pixel_count};
use maskedit::project::Session;
use maskedit::settings::AppSettings;
use pretty_assertions::assert_eq;

fn loaded_session(container: (f32, f32)) -> Session {
    session_for((800, 600), container)
}

fn session_for(native: (u32, u32), container: (f32, f32)) -> Session {
    let mut session = Session::new(&AppSettings::default());
    session.load_image(SourceImage::new("p.png", RgbaImage::new(native.0, native.1)));
    assert!(session.resize(container));
    session
}

/// Every inked display pixel must be white at the native pixel it lies in.
fn assert_no_ink_lost(session: &Session, mask: &RgbImage) {
    let ink = session.history.current().unwrap();
    let (sw, sh) = ink.dimensions();
    let (w, h) = mask.dimensions();
    for (x, y, px) in ink.pixels().enumerate_pixels() {
        if px[3] == 0 {
            continue;
        }
        let (nx, ny) = (
            (x as u64 * w as u64 / sw as u64) as u32,
            (y as u64 * h as u64 / sh as u64) as u32,
        );
        assert_eq!(
            *mask.get_pixel(nx, ny),
            Rgb([255, 255, 255]),
            "display ({x}, {y}) lost at native ({nx}, {ny})"
        );
    }
}

#[test]
fn resizing_never_alters_the_stored_snapshot() {
    let mut session = loaded_session((400.0, 300.0));
    session.begin_stroke((100.0, 100.0));
    session.extend_stroke((150.0, 120.0));
    session.end_stroke();
    let stored = session.history.current().unwrap().clone();
    let shown = session.canvas.drawing_surface().clone();

    for container in [(200.0, 150.0), (800.0, 600.0), (1000.0, 300.0), (400.0, 300.0)] {
        session.resize(container);
        assert!(session.history.current().unwrap().same_capture(&stored));
    }
    assert_eq!(session.canvas.drawing_surface(), &shown);
    assert_eq!(session.history.len(), 2);
}

#[test]
fn submission_mask_does_not_depend_on_current_display_size() {
    let mut session = loaded_session((400.0, 300.0));
    session.begin_stroke((60.0, 60.0));
    session.extend_stroke((90.0, 75.0));
    session.end_stroke();
    let before = build_submission_mask(session.history.current().unwrap(), 800, 600).unwrap();

    session.resize((200.0, 150.0));
    session.resize((1600.0, 1200.0));
    let after = build_submission_mask(session.history.current().unwrap(), 800, 600).unwrap();
    assert_eq!(before, after);
}

#[test]
fn undo_after_resize_reprojects_older_snapshot() {
    let mut session = loaded_session((400.0, 300.0));
    session.begin_stroke((200.0, 150.0));
    session.extend_stroke((210.0, 150.0));
    session.end_stroke();

    // Grow the window and draw again at the new resolution.
    session.resize((800.0, 600.0));
    assert_eq!(session.canvas.drawing_surface().dimensions(), (800, 600));
    assert!(session.canvas.drawing_surface().get_pixel(410, 300)[3] > 0);
    session.begin_stroke((50.0, 50.0));
    session.extend_stroke((60.0, 50.0));
    session.end_stroke();
    assert_eq!(session.history.current().unwrap().dimensions(), (800, 600));

    assert!(session.undo());
    let surface = session.canvas.drawing_surface();
    assert_eq!(surface.dimensions(), (800, 600));
    assert_eq!(surface.get_pixel(55, 50)[3], 0);
    assert!(surface.get_pixel(410, 300)[3] > 0);
    assert_eq!(session.history.current().unwrap().dimensions(), (400, 300));
}

#[test]
fn same_size_resize_is_a_no_op() {
    let mut session = loaded_session((400.0, 300.0));
    assert!(!session.resize((400.0, 300.0)));
    // Different container, same fitted size: only the offset moves.
    assert!(!session.resize((500.0, 300.0)));
    assert_eq!(session.canvas.geometry().unwrap().offset_x, 50.0);
}

#[test]
fn thin_stroke_on_enlarged_small_image_reaches_the_mask() {
    let mut session = session_for((100, 75), (800.0, 600.0));
    assert_eq!(session.canvas.drawing_surface().dimensions(), (800, 600));
    session.set_brush_size(5.0);
    session.begin_stroke((100.0, 8.0));
    session.extend_stroke((700.0, 8.0));
    session.end_stroke();

    let mask = build_submission_mask(session.history.current().unwrap(), 100, 75).unwrap();
    assert_eq!(mask.dimensions(), (100, 75));
    assert_eq!(*mask.get_pixel(50, 1), Rgb([255, 255, 255]));
    assert_eq!(*mask.get_pixel(50, 5), Rgb([0, 0, 0]));
    // The stroke spans native columns 12..=87 in a single row band.
    assert!(white_pixel_count(&mask) >= 76);
    assert_no_ink_lost(&session, &mask);
}

#[test]
fn non_integer_scale_keeps_every_inked_pixel() {
    let mut session = session_for((333, 250), (800.0, 600.0));
    assert_eq!(session.canvas.drawing_surface().dimensions(), (799, 600));
    session.set_brush_size(5.0);
    session.begin_stroke((10.0, 10.0));
    session.extend_stroke((780.0, 590.0));
    session.end_stroke();
    session.begin_stroke((400.0, 3.0));
    session.extend_stroke((401.0, 300.0));
    session.end_stroke();

    let mask = build_submission_mask(session.history.current().unwrap(), 333, 250).unwrap();
    assert_eq!(mask.dimensions(), (333, 250));
    assert!(
        mask.pixels()
            .all(|p| p.0 == [0, 0, 0] || p.0 == [255, 255, 255])
    );
    assert_no_ink_lost(&session, &mask);
    assert_eq!(*mask.get_pixel(332, 0), Rgb([0, 0, 0]));
}
