//! Save dialog negotiation for the file-export mode.
//!
//! The host's save dialog is localized and its control ids vary between
//! builds, so everything here probes selectors in priority order with
//! short timeouts and falls back progressively: title match, then the
//! path-edit signature, then raw keystrokes.

use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ExtractionConfig;
use crate::driver::{ControlHandle, Selector, UiDriver};
use crate::error::ExtractError;

/// Owns the exported temp file's path. The file is removed on drop,
/// success or failure, so no exit path leaks exports.
pub struct TempExport {
    path: PathBuf,
}

impl TempExport {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempExport {
    fn drop(&mut self) {
        if self.path.exists() {
            match std::fs::remove_file(&self.path) {
                Ok(()) => crate::log(&format!("Removed temp export {}", self.path.display())),
                Err(e) => crate::log(&format!(
                    "Could not remove temp export {}: {}",
                    self.path.display(),
                    e
                )),
            }
        }
    }
}

pub struct SaveDialogNegotiator<'a, D: UiDriver + ?Sized> {
    driver: &'a D,
    config: &'a ExtractionConfig,
}

impl<'a, D: UiDriver + ?Sized> SaveDialogNegotiator<'a, D> {
    pub fn new(driver: &'a D, config: &'a ExtractionConfig) -> Self {
        Self { driver, config }
    }

    /// Drives the save dialog to completion: locate it, inject a temp
    /// path, confirm, and wait for the file to materialize. Returns a
    /// guard owning the exported file.
    pub fn negotiate(&self, grid: &ControlHandle) -> Result<TempExport, ExtractError> {
        if !self.locate_dialog() {
            // Single recovery attempt: the trigger may not have landed
            crate::log("Save dialog not found, re-issuing export trigger");
            let retrigger = self
                .driver
                .set_foreground(grid)
                .and_then(|_| self.driver.type_keys(grid, "^s"));
            if let Err(e) = retrigger {
                crate::log(&format!("Export re-trigger failed: {}", e));
            }
            wait_ms(self.config.settle_wait_ms);
            if !self.locate_dialog() {
                return Err(ExtractError::SaveDialogNotFound);
            }
        }

        let export = TempExport {
            path: self.temp_path(),
        };
        crate::log(&format!("Export path: {}", export.path().display()));

        self.inject_path(export.path());
        wait_ms(self.config.save_dialog_probe_interval_ms);
        self.confirm();
        self.handle_overwrite();
        self.await_file(&export)?;
        Ok(export)
    }

    /// Probes for the dialog: by title, then by its path-edit signature.
    fn locate_dialog(&self) -> bool {
        let probe_timeout = Duration::from_millis(self.config.save_dialog_probe_interval_ms);
        let by_title = Selector::title(&self.config.controls.save_dialog_title);
        let by_signature = self
            .config
            .controls
            .save_path_edit_ids
            .first()
            .map(|&id| Selector::control_id(id).with_class("Edit"));

        for probe in 0..self.config.save_dialog_probes {
            if let Ok(true) = self.driver.window_exists(&by_title, probe_timeout) {
                crate::log(&format!(
                    "Save dialog found by title (probe {}/{})",
                    probe + 1,
                    self.config.save_dialog_probes
                ));
                return true;
            }
            if let Some(selector) = &by_signature {
                if let Ok(true) = self.driver.window_exists(selector, probe_timeout) {
                    crate::log(&format!(
                        "Save dialog found by edit signature (probe {}/{})",
                        probe + 1,
                        self.config.save_dialog_probes
                    ));
                    return true;
                }
            }
            wait_ms(self.config.save_dialog_probe_interval_ms);
        }
        false
    }

    fn temp_path(&self) -> PathBuf {
        let dir = self
            .config
            .tmp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        dir.join(format!("grid_{}_{}.xls", stamp, std::process::id()))
    }

    /// Tries the known path-edit ids in priority order, falling back to
    /// raw keystrokes into the dialog itself.
    fn inject_path(&self, path: &Path) {
        let text = path.display().to_string();
        for &id in &self.config.controls.save_path_edit_ids {
            let selector = Selector::control_id(id).with_class("Edit");
            if let Ok(edit) = self.driver.find_control(&selector) {
                match self.driver.type_keys(&edit, &text) {
                    Ok(()) => return,
                    Err(e) => crate::log(&format!(
                        "Typing path into edit 0x{:X} failed: {}",
                        id, e
                    )),
                }
            }
        }

        crate::log("Path edit control not found, typing into the dialog");
        let by_title = Selector::title(&self.config.controls.save_dialog_title);
        let result = self
            .driver
            .find_control(&by_title)
            .and_then(|dialog| self.driver.type_keys(&dialog, &text));
        if let Err(e) = result {
            crate::log(&format!("Raw path keystrokes failed: {}", e));
        }
    }

    /// Alt+S confirms the localized dialog.
    fn confirm(&self) {
        let by_title = Selector::title(&self.config.controls.save_dialog_title);
        let result = self
            .driver
            .find_control(&by_title)
            .and_then(|dialog| self.driver.type_keys(&dialog, "%{s}"));
        if let Err(e) = result {
            crate::log(&format!("Save confirmation failed: {}", e));
        }
    }

    /// Handles the optional "file exists, overwrite?" sub-dialog.
    fn handle_overwrite(&self) {
        let overwrite = Selector::title(&self.config.controls.overwrite_dialog_title);
        let timeout = Duration::from_millis(self.config.save_dialog_probe_interval_ms);
        if let Ok(true) = self.driver.window_exists(&overwrite, timeout) {
            crate::log("File exists, confirming replace");
            let result = self
                .driver
                .find_control(&overwrite)
                .and_then(|dialog| self.driver.type_keys(&dialog, "%{y}"));
            if let Err(e) = result {
                crate::log(&format!("Overwrite confirmation failed: {}", e));
            }
        }
    }

    /// Polls the filesystem for the exported file, dismissing incidental
    /// pop-ups between polls.
    fn await_file(&self, export: &TempExport) -> Result<(), ExtractError> {
        for poll in 0..self.config.file_poll_retries {
            if export.path().exists() {
                crate::log(&format!(
                    "Export file appeared after {} polls",
                    poll
                ));
                return Ok(());
            }
            self.clear_popups();
            wait_ms(self.config.file_poll_interval_ms);
        }
        if export.path().exists() {
            return Ok(());
        }
        Err(ExtractError::ExportFileMissing {
            path: export.path().display().to_string(),
        })
    }

    fn clear_popups(&self) {
        let popup = &self.config.controls.popup_dialog;
        if let Ok(true) = self.driver.window_exists(popup, Duration::from_millis(50)) {
            crate::log("Pop-up detected while waiting for export, dismissing");
            let result = self
                .driver
                .find_control(&self.config.controls.popup_dismiss)
                .and_then(|button| self.driver.click(&button));
            if let Err(e) = result {
                crate::log(&format!("Pop-up dismissal failed: {}", e));
            }
        }
    }
}

fn wait_ms(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
