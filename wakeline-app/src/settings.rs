//! Persistent host settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wakeline_core::PipelineConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// `sim`, `wav` or `mic`.
    pub input_source: String,
    pub preferred_input_device: Option<String>,
    pub wav_path: Option<String>,
    pub wav_loop: bool,
    /// Subtract the speaker reference from the microphone.
    pub echo_cancel: bool,
    /// Frames of sustained energy the wake detector needs.
    pub wake_window_frames: u32,
    /// What the demo cloud says back.
    pub demo_response: String,
    /// Length of the demo cloud's synthetic speech.
    pub demo_speech_ms: u32,
    pub pipeline: PipelineConfig,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            input_source: "sim".into(),
            preferred_input_device: None,
            wav_path: None,
            wav_loop: false,
            echo_cancel: true,
            wake_window_frames: 8,
            demo_response: "Okay.".into(),
            demo_speech_ms: 600,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.input_source = normalize_input_source(&self.input_source);
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.wav_path = self
            .wav_path
            .as_ref()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        if self.input_source == "wav" && self.wav_path.is_none() {
            self.input_source = "sim".into();
        }
        self.wake_window_frames = self.wake_window_frames.clamp(1, 100);
        self.demo_response = self.demo_response.trim().to_string();
        self.demo_speech_ms = self.demo_speech_ms.min(10_000);
        self.pipeline.normalize();
    }
}

pub fn normalize_input_source(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "wav" | "file" => "wav".into(),
        "mic" | "microphone" | "cpal" => "mic".into(),
        _ => "sim".into(),
    }
}

pub fn default_settings_path() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("wakeline")
        .join("settings.json")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
