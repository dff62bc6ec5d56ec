//! OCR engine seam and the Tesseract-backed implementation.

use image::GrayImage;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Page-segmentation hint for short challenge text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    /// Uniform block of text.
    Block,
    /// Single text line.
    SingleLine,
    /// Single word.
    SingleWord,
}

impl EngineMode {
    fn psm(self) -> &'static str {
        match self {
            EngineMode::Block => "6",
            EngineMode::SingleLine => "7",
            EngineMode::SingleWord => "8",
        }
    }
}

/// Errors from one engine invocation.
#[derive(Debug, Error)]
pub enum OcrError {
    /// The engine binary is missing or cannot be started. Fatal for the
    /// whole pipeline; never retried per-variant.
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The engine ran but this invocation failed.
    #[error("recognition failed: {0}")]
    Recognition(String),
}

/// External OCR capability: one image in, raw text out.
///
/// The returned text may be empty and may contain characters outside the
/// whitelist despite the hint; cleaning is the caller's job.
pub trait OcrEngine {
    fn recognize(
        &self,
        img: &GrayImage,
        whitelist: &str,
        mode: EngineMode,
    ) -> Result<String, OcrError>;
}

/// Runs a Tesseract binary found on PATH (or at an explicit location).
pub struct TesseractEngine {
    binary: PathBuf,
}

impl TesseractEngine {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
        }
    }

    pub fn with_binary(path: impl Into<PathBuf>) -> Self {
        Self {
            binary: path.into(),
        }
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(
        &self,
        img: &GrayImage,
        whitelist: &str,
        mode: EngineMode,
    ) -> Result<String, OcrError> {
        let temp_input = NamedTempFile::with_suffix(".png")
            .map_err(|e| OcrError::Recognition(format!("temp file: {}", e)))?;
        img.save(temp_input.path())
            .map_err(|e| OcrError::Recognition(format!("save input: {}", e)))?;

        let output = Command::new(&self.binary)
            .arg(temp_input.path())
            .arg("stdout")
            .arg("-l")
            .arg("eng")
            .arg("--psm")
            .arg(mode.psm())
            .arg("-c")
            .arg(format!("tessedit_char_whitelist={}", whitelist))
            .output()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    OcrError::EngineUnavailable(self.binary.display().to_string())
                }
                _ => OcrError::Recognition(e.to_string()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Recognition(stderr.into_owned()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
