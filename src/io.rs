use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, RgbImage, RgbaImage};
use rfd::FileDialog;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Extensions offered by the open dialog and accepted from drag-and-drop.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "webp", "bmp", "gif", "tiff", "tif"];

// ============================================================================
// SOURCE IMAGE
// ============================================================================

/// The uploaded original, decoded once and never modified. Its dimensions
/// are the native resolution the submitted mask must match.
#[derive(Clone, Debug)]
pub struct SourceImage {
    pixels: Arc<RgbaImage>,
    name: String,
}

impl SourceImage {
    pub fn new(name: impl Into<String>, pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
            name: name.into(),
        }
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// False for a degenerate decode with zero natural dimensions.
    pub fn is_loaded(&self) -> bool {
        self.width() > 0 && self.height() > 0
    }
}

// ============================================================================
// DECODE / ENCODE
// ============================================================================

pub fn is_supported_path(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Decode an uploaded file into a [`SourceImage`].
pub fn load_source_image(path: &Path) -> Result<SourceImage, String> {
    let img = image::open(path)
        .map_err(|e| format!("Could not open {}: {}", path.display(), e))?
        .to_rgba8();
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    crate::log_info!(
        "Loaded {} ({}x{})",
        path.display(),
        img.width(),
        img.height()
    );
    Ok(SourceImage::new(name, img))
}

pub fn decode_image_bytes(bytes: &[u8]) -> Result<RgbaImage, String> {
    image::load_from_memory(bytes)
        .map(|img| img.to_rgba8())
        .map_err(|e| e.to_string())
}

/// Lossless RGBA PNG (the original image sent for editing).
pub fn encode_png_rgba(img: &RgbaImage) -> Result<Vec<u8>, String> {
    encode_png(img.as_raw(), img.width(), img.height(), ColorType::Rgba8)
}

/// Lossless PNG without an alpha channel (the binary mask).
pub fn encode_png_rgb(img: &RgbImage) -> Result<Vec<u8>, String> {
    encode_png(img.as_raw(), img.width(), img.height(), ColorType::Rgb8)
}

fn encode_png(raw: &[u8], width: u32, height: u32, color: ColorType) -> Result<Vec<u8>, String> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(raw, width, height, color)
        .map_err(|e| format!("PNG encode failed: {}", e))?;
    Ok(bytes)
}

// ============================================================================
// DIALOGS / SAVING
// ============================================================================

/// Native open dialog limited to decodable image formats.
pub fn pick_image_path() -> Option<PathBuf> {
    FileDialog::new()
        .add_filter("Images", SUPPORTED_EXTENSIONS)
        .add_filter("All Files", &["*"])
        .pick_file()
}

/// Native save dialog for the edited result.
pub fn pick_save_path(default_name: &str) -> Option<PathBuf> {
    FileDialog::new()
        .add_filter("PNG", &["png"])
        .set_file_name(default_name)
        .save_file()
}

/// `photo.jpg` -> `photo-edited.png`
pub fn result_file_name(source_name: &str) -> String {
    let stem = Path::new(source_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{}-edited.png", stem)
}

pub fn save_png(path: &Path, img: &RgbaImage) -> Result<(), String> {
    let bytes = encode_png_rgba(img)?;
    std::fs::write(path, bytes).map_err(|e| format!("Could not write {}: {}", path.display(), e))?;
    crate::log_info!("Saved result to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_supported_path(Path::new("a/b/Photo.JPG")));
        assert!(is_supported_path(Path::new("scan.tif")));
        assert!(!is_supported_path(Path::new("notes.txt")));
        assert!(!is_supported_path(Path::new("no_extension")));
    }

    #[test]
    fn result_name_replaces_extension() {
        assert_eq!(result_file_name("holiday.jpeg"), "holiday-edited.png");
        assert_eq!(result_file_name(""), "image-edited.png");
    }

    #[test]
    fn rgb_png_has_no_alpha_channel() {
        let mask = RgbImage::from_pixel(4, 3, image::Rgb([255, 255, 255]));
        let bytes = encode_png_rgb(&mask).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!(decoded.color(), ColorType::Rgb8);
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }

    #[test]
    fn rgba_png_decodes_to_same_pixels() {
        let mut img = RgbaImage::new(2, 2);
        img.put_pixel(1, 0, Rgba([1, 2, 3, 4]));
        let bytes = encode_png_rgba(&img).unwrap();
        assert_eq!(decode_image_bytes(&bytes).unwrap(), img);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(decode_image_bytes(b"not an image").is_err());
    }

    #[test]
    fn source_image_reports_native_size() {
        let src = SourceImage::new("x.png", RgbaImage::new(800, 600));
        assert_eq!(src.dimensions(), (800, 600));
        assert!(src.is_loaded());
        assert!(!SourceImage::new("empty", RgbaImage::new(0, 0)).is_loaded());
    }
}
