//! Write-only debug artifacts for challenge attempts.
//!
//! Each attempt's preprocessed bitmap is archived with a timestamped
//! name, and one line per attempt is appended to `attempts.log`. The
//! pipeline never reads any of this back, and no failure here may fail
//! an extraction: everything degrades to a log warning.

use chrono::Local;
use image::GrayImage;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

pub struct DebugStore {
    dir: PathBuf,
}

impl DebugStore {
    /// Opens (and creates) the debug directory.
    pub fn new(dir: PathBuf) -> Self {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            crate::log(&format!(
                "Could not create debug dir {}: {}",
                dir.display(),
                e
            ));
        }
        Self { dir }
    }

    /// Archives one attempt's challenge bitmap. Returns the file name
    /// for use in the outcome record.
    pub fn save_attempt(&self, img: &GrayImage, attempt: u32) -> Option<String> {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!("captcha_{}_{}.png", timestamp, attempt);
        let path = self.dir.join(&filename);
        match img.save(&path) {
            Ok(()) => Some(filename),
            Err(e) => {
                crate::log(&format!("Could not save debug image: {}", e));
                None
            }
        }
    }

    /// Appends one attempt's outcome to the append-only log.
    pub fn record(&self, attempt: u32, candidate: &str, outcome: &str, image_name: Option<&str>) {
        let line = format!(
            "{} attempt={} candidate={} outcome={} image={}\n",
            Local::now().format("%Y-%m-%dT%H:%M:%S"),
            attempt,
            if candidate.is_empty() { "-" } else { candidate },
            outcome,
            image_name.unwrap_or("-"),
        );
        let path = self.dir.join("attempts.log");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut file| file.write_all(line.as_bytes()));
        if let Err(e) = result {
            crate::log(&format!("Could not append to attempts.log: {}", e));
        }
    }
}
