//! Gridcap
//!
//! Extracts tabular account/position data from a desktop trading client's
//! grid widgets, solving the image challenge the host interposes before
//! releasing the data. The UI-automation layer, the OCR engine, and the
//! clipboard are external collaborators injected through traits; this
//! crate owns the recognition ensemble, the challenge retry state machine,
//! and the export orchestration.

pub mod captcha;
pub mod config;
pub mod driver;
pub mod error;
pub mod grid;
pub mod ocr;
pub mod paths;

pub use config::{ExtractionConfig, Preset};
pub use driver::{Bitmap, Clipboard, ControlHandle, Selector, UiDriver};
pub use error::ExtractError;
pub use grid::{ExportMode, ExtractSession, GridExtractor, GridRecord};
pub use ocr::engine::{EngineMode, OcrEngine, OcrError, TesseractEngine};

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Optional per-extraction log file, active while an extraction runs.
static SESSION_LOG: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Logs a message to both console and log file with timestamp.
pub fn log(msg: &str) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    let line = format!("[{}] {}\n", timestamp, msg);
    print!("{}", line);
    let log_path = paths::get_logs_dir().join("gridcap.log");
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        let _ = file.write_all(line.as_bytes());
    }
    if let Ok(guard) = SESSION_LOG.lock() {
        if let Some(path) = guard.as_ref() {
            if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
                let _ = file.write_all(line.as_bytes());
            }
        }
    }
}

/// Activates or deactivates per-extraction session logging.
pub fn set_session_log(path: Option<PathBuf>) {
    if let Ok(mut guard) = SESSION_LOG.lock() {
        *guard = path;
    }
}
