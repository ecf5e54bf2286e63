use image::Rgba;
use std::path::PathBuf;

use crate::components::tools::{DEFAULT_BRUSH_SIZE, DEFAULT_MASK_COLOR, MAX_BRUSH_SIZE, MIN_BRUSH_SIZE};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";

/// Settings that persist across sessions. Editing state never does.
#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Base URL of the generation API (no trailing slash)
    pub api_base: String,
    /// Image-capable model name
    pub model: String,
    /// API key. The `GEMINI_API_KEY` / `GOOGLE_API_KEY` environment
    /// variables take precedence when set.
    pub api_key: String,
    /// Per-request timeout for the generation call
    pub request_timeout_secs: u64,
    /// Maximum number of mask snapshots kept for undo (0 = unlimited)
    pub max_history_steps: usize,
    /// Brush diameter at startup, in display pixels
    pub default_brush_size: f32,
    /// Colour of the paint tool's ink (alpha must be non-zero)
    pub mask_color: Rgba<u8>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
            request_timeout_secs: 120,
            max_history_steps: 50,
            default_brush_size: DEFAULT_BRUSH_SIZE,
            mask_color: DEFAULT_MASK_COLOR,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/maskedit/maskedit_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\MaskEdit\maskedit_settings.cfg
    /// On macOS:   ~/Library/Application Support/MaskEdit/maskedit_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("maskedit");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("maskedit_settings.cfg"));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .unwrap_or_default();
            let config_dir = PathBuf::from(appdata).join("MaskEdit");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("maskedit_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            let config_dir = PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("MaskEdit");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join("maskedit_settings.cfg"));
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("maskedit_settings.cfg")))
        }
    }

    /// Serialize a colour as "r,g,b,a"
    fn color_to_str(c: Rgba<u8>) -> String {
        format!("{},{},{},{}", c[0], c[1], c[2], c[3])
    }

    /// Parse a colour from "r,g,b,a"
    fn str_to_color(s: &str) -> Option<Rgba<u8>> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() == 4 {
            let r = parts[0].trim().parse::<u8>().ok()?;
            let g = parts[1].trim().parse::<u8>().ok()?;
            let b = parts[2].trim().parse::<u8>().ok()?;
            let a = parts[3].trim().parse::<u8>().ok()?;
            // Invisible ink would make every mask empty.
            (a > 0).then_some(Rgba([r, g, b, a]))
        } else {
            None
        }
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "api_base={}\n\
             model={}\n\
             api_key={}\n\
             request_timeout_secs={}\n\
             max_history_steps={}\n\
             default_brush_size={}\n\
             mask_color={}\n",
            self.api_base,
            self.model,
            self.api_key,
            self.request_timeout_secs,
            self.max_history_steps,
            self.default_brush_size,
            Self::color_to_str(self.mask_color),
        )
    }

    /// Parse `key=value` lines. Unknown keys and malformed values keep their
    /// defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "api_base" => {
                    let base = val.trim_end_matches('/');
                    if !base.is_empty() {
                        s.api_base = base.to_string();
                    }
                }
                "model" => {
                    if !val.is_empty() {
                        s.model = val.to_string();
                    }
                }
                "api_key" => s.api_key = val.to_string(),
                "request_timeout_secs" => {
                    if let Ok(v) = val.parse::<u64>() {
                        s.request_timeout_secs = v.clamp(5, 600);
                    }
                }
                "max_history_steps" => {
                    if let Ok(v) = val.parse::<usize>() {
                        s.max_history_steps = v;
                    }
                }
                "default_brush_size" => {
                    if let Ok(v) = val.parse::<f32>()
                        && v.is_finite()
                    {
                        s.default_brush_size = v.clamp(MIN_BRUSH_SIZE, MAX_BRUSH_SIZE);
                    }
                }
                "mask_color" => {
                    if let Some(c) = Self::str_to_color(val) {
                        s.mask_color = c;
                    }
                }
                _ => {}
            }
        }
        s
    }

    /// Save settings to disk
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        match std::fs::write(&path, self.to_config_string()) {
            Ok(()) => crate::log_info!("Settings saved to {}", path.display()),
            Err(e) => crate::log_warn!("Could not save settings to {}: {}", path.display(), e),
        }
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        let Ok(content) = std::fs::read_to_string(&path) else { return Self::default() };
        Self::parse(&content)
    }
}
