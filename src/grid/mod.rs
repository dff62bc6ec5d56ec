//! Grid extraction orchestration.
//!
//! One [`GridExtractor::extract`] call drives the full pipeline: locate
//! the grid, trigger the export, clear the challenge if one appears, and
//! hand the raw payload to the parser. The outcome is a single pass/fail
//! per call; partial progress is never reported.

pub mod mode;
pub mod parse;
pub mod save_dialog;

pub use mode::ExportMode;
pub use parse::{CellValue, ColumnKind, GridParser, GridRecord, TsvParser};
pub use save_dialog::{SaveDialogNegotiator, TempExport};

use anyhow::Context;
use std::time::Duration;

use crate::captcha::{ChallengeMonitor, ChallengeOutcome, ChallengeSolver};
use crate::config::ExtractionConfig;
use crate::driver::{Clipboard, ControlHandle, Selector, UiDriver};
use crate::error::ExtractError;
use crate::ocr::OcrEngine;

/// Wait between clipboard read retries.
const CLIPBOARD_RETRY_WAIT: Duration = Duration::from_millis(100);

/// Per-extraction state owned by the caller.
///
/// Whether the next export is expected to raise a challenge is a
/// property of this session, not of the process; unrelated controls get
/// unrelated sessions.
pub struct ExtractSession {
    challenge_expected: bool,
}

impl ExtractSession {
    /// A fresh session assumes the host will interpose a challenge.
    pub fn new() -> Self {
        Self {
            challenge_expected: true,
        }
    }

    /// Overrides the challenge expectation, e.g. for a host known to
    /// gate only the first export of a login session.
    pub fn expect_challenge(&mut self, expected: bool) {
        self.challenge_expected = expected;
    }

    pub fn challenge_expected(&self) -> bool {
        self.challenge_expected
    }
}

impl Default for ExtractSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Top-level driver for one grid control.
pub struct GridExtractor<'a, D, E, C, P>
where
    D: UiDriver + ?Sized,
    E: OcrEngine + ?Sized,
    C: Clipboard + ?Sized,
    P: GridParser + ?Sized,
{
    driver: &'a D,
    engine: &'a E,
    clipboard: &'a C,
    parser: &'a P,
    config: ExtractionConfig,
}

impl<'a, D, E, C, P> GridExtractor<'a, D, E, C, P>
where
    D: UiDriver + ?Sized,
    E: OcrEngine + ?Sized,
    C: Clipboard + ?Sized,
    P: GridParser + ?Sized,
{
    pub fn new(
        driver: &'a D,
        engine: &'a E,
        clipboard: &'a C,
        parser: &'a P,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            driver,
            engine,
            clipboard,
            parser,
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Runs one full extraction against the grid named by `selector`.
    pub fn extract(
        &self,
        session: &mut ExtractSession,
        selector: &Selector,
        mode: ExportMode,
    ) -> Result<Vec<GridRecord>, ExtractError> {
        let debug_dir = self
            .config
            .debug_dir
            .clone()
            .unwrap_or_else(crate::paths::get_debug_dir);
        crate::set_session_log(Some(debug_dir.join("session.log")));
        let result = self.run_extraction(session, selector, mode);
        crate::set_session_log(None);
        result
    }

    fn run_extraction(
        &self,
        session: &mut ExtractSession,
        selector: &Selector,
        mode: ExportMode,
    ) -> Result<Vec<GridRecord>, ExtractError> {
        crate::log(&format!("Extracting grid {} via {:?}", selector, mode));

        let grid = self.locate_grid(selector)?;
        if let Err(e) = self.driver.set_foreground(&grid) {
            crate::log(&format!("Could not bring grid to foreground: {}", e));
        }

        mode.trigger(self.driver, &grid, &self.config.controls)
            .context("export trigger failed")?;
        wait_ms(self.config.settle_wait_ms);

        if session.challenge_expected() {
            self.handle_challenge(session)?;
        } else {
            crate::log("Challenge not expected for this session, skipping check");
        }

        let records = if mode.uses_clipboard() {
            let text = mode::read_clipboard(
                self.clipboard,
                self.config.clipboard_retries,
                CLIPBOARD_RETRY_WAIT,
            )?;
            if text.trim().is_empty() {
                // An empty clipboard usually means a challenge ate the copy
                session.expect_challenge(true);
                return Err(ExtractError::EmptyPayload);
            }
            self.parser.parse_text(&text).map_err(|e| {
                session.expect_challenge(true);
                ExtractError::Other(e)
            })?
        } else {
            let negotiator = SaveDialogNegotiator::new(self.driver, &self.config);
            let export = negotiator.negotiate(&grid)?;
            // The export guard removes the file once parsing is done
            self.parser.parse_file(export.path())?
        };

        crate::log(&format!("Extracted {} records", records.len()));
        Ok(records)
    }

    /// Finds the named grid, falling back to the first control of the
    /// expected class. The fallback is logged, not fatal.
    fn locate_grid(&self, selector: &Selector) -> Result<ControlHandle, ExtractError> {
        match self.driver.find_control(selector) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                crate::log(&format!(
                    "Grid {} not found ({}), falling back to first {} control",
                    selector, e, self.config.controls.grid_class
                ));
                self.driver
                    .find_control(&Selector::class(&self.config.controls.grid_class))
                    .map_err(|_| ExtractError::GridNotFound)
            }
        }
    }

    /// Checks for a challenge dialog and clears it when present.
    fn handle_challenge(&self, session: &mut ExtractSession) -> Result<(), ExtractError> {
        let monitor = ChallengeMonitor::new(self.driver, &self.config.controls.challenge_dialog);
        let timeout = Duration::from_millis(self.config.challenge_check_timeout_ms);
        let present = match monitor.is_present(timeout) {
            Ok(present) => present,
            Err(e) => {
                crate::log(&format!("Challenge check failed ({}), assuming none", e));
                false
            }
        };

        if !present {
            crate::log("No challenge dialog");
            return Ok(());
        }

        if self.config.manual_input {
            return Err(ExtractError::ManualInputRequired);
        }

        let mut solver = ChallengeSolver::new(self.driver, self.engine, &self.config);
        match solver.solve()? {
            ChallengeOutcome::Solved => {
                // This session's exports are unchallenged from here on
                session.expect_challenge(false);
                Ok(())
            }
            ChallengeOutcome::Exhausted { attempts } => {
                Err(ExtractError::ChallengeExhausted { attempts })
            }
        }
    }
}

fn wait_ms(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Bitmap;
    use crate::ocr::{EngineMode, OcrError};
    use anyhow::{Result, anyhow};
    use image::{GrayImage, Rgba};
    use std::cell::{Cell, RefCell};
    use std::path::PathBuf;
    use tempfile::tempdir;

    const GRID_HANDLE: u64 = 10;
    const CHAL_IMAGE: u64 = 1;
    const CHAL_INPUT: u64 = 2;
    const CHAL_CANCEL: u64 = 3;
    const SAVE_EDIT: u64 = 4;
    const SAVE_DIALOG: u64 = 5;
    const POPUP_BUTTON: u64 = 6;

    const PAYLOAD: &str = "code\tname\tqty\n600000\tSPDB\t1200\n600519\tMoutai\t100\n";

    /// Stub host application. Scripted challenge presence, a save dialog
    /// whose exported file appears after a configurable number of pop-up
    /// checks, and a recorder for everything typed.
    struct StubHost {
        named_grid: bool,
        class_grid: bool,
        save_dialog: bool,
        /// Answers for challenge-dialog existence checks; empty falls
        /// back to `challenge_default`.
        challenge_script: RefCell<Vec<bool>>,
        challenge_default: bool,
        popup_checks: Cell<u32>,
        create_file_on_check: Option<u32>,
        export_path: RefCell<Option<PathBuf>>,
        typed: RefCell<Vec<(u64, String)>>,
    }

    impl StubHost {
        fn new() -> Self {
            Self {
                named_grid: true,
                class_grid: true,
                save_dialog: false,
                challenge_script: RefCell::new(Vec::new()),
                challenge_default: false,
                popup_checks: Cell::new(0),
                create_file_on_check: None,
                export_path: RefCell::new(None),
                typed: RefCell::new(Vec::new()),
            }
        }

        fn typed_on(&self, handle: u64) -> Vec<String> {
            self.typed
                .borrow()
                .iter()
                .filter(|(h, _)| *h == handle)
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    fn title_contains(selector: &Selector, needle: &str) -> bool {
        selector
            .title_pattern
            .as_deref()
            .is_some_and(|t| t.contains(needle))
    }

    impl UiDriver for StubHost {
        fn find_control(&self, selector: &Selector) -> Result<ControlHandle> {
            match selector.control_id {
                Some(0x965) => return Ok(ControlHandle(CHAL_IMAGE)),
                Some(0x964) => return Ok(ControlHandle(CHAL_INPUT)),
                Some(0x47C) => return Ok(ControlHandle(SAVE_EDIT)),
                Some(_) => {
                    return if self.named_grid {
                        Ok(ControlHandle(GRID_HANDLE))
                    } else {
                        Err(anyhow!("no control with that id"))
                    };
                }
                None => {}
            }
            if selector.class_name.as_deref() == Some("CVirtualGridCtrl") {
                return if self.class_grid {
                    Ok(ControlHandle(GRID_HANDLE))
                } else {
                    Err(anyhow!("no grid controls"))
                };
            }
            if title_contains(selector, "另存为") {
                return Ok(ControlHandle(SAVE_DIALOG));
            }
            if title_contains(selector, "取消") {
                return Ok(ControlHandle(CHAL_CANCEL));
            }
            if title_contains(selector, "确定") {
                return Ok(ControlHandle(POPUP_BUTTON));
            }
            Err(anyhow!("unmatched selector"))
        }

        fn click(&self, _: &ControlHandle) -> Result<()> {
            Ok(())
        }

        fn type_keys(&self, handle: &ControlHandle, text: &str) -> Result<()> {
            self.typed.borrow_mut().push((handle.0, text.to_string()));
            if handle.0 == SAVE_EDIT {
                *self.export_path.borrow_mut() = Some(PathBuf::from(text));
            }
            Ok(())
        }

        fn capture_image(&self, _: &ControlHandle) -> Result<Bitmap> {
            Ok(Bitmap::from_pixel(20, 10, Rgba([128, 128, 128, 255])))
        }

        fn window_exists(&self, selector: &Selector, _: Duration) -> Result<bool> {
            if title_contains(selector, "验证码") {
                let mut script = self.challenge_script.borrow_mut();
                return Ok(if script.is_empty() {
                    self.challenge_default
                } else {
                    script.remove(0)
                });
            }
            if title_contains(selector, "确认另存为") {
                return Ok(false);
            }
            if title_contains(selector, "另存为") || selector.control_id == Some(0x47C) {
                return Ok(self.save_dialog);
            }
            if title_contains(selector, "提示") {
                let checks = self.popup_checks.get() + 1;
                self.popup_checks.set(checks);
                if self.create_file_on_check == Some(checks) {
                    if let Some(path) = self.export_path.borrow().as_ref() {
                        std::fs::write(path, PAYLOAD).unwrap();
                    }
                }
                return Ok(false);
            }
            Ok(false)
        }

        fn set_foreground(&self, _: &ControlHandle) -> Result<()> {
            Ok(())
        }

        fn post_command(&self, _: &ControlHandle, _: u32) -> Result<()> {
            Ok(())
        }
    }

    struct StubEngine<F: Fn(usize) -> Result<String, OcrError>> {
        calls: Cell<usize>,
        script: F,
    }

    impl<F: Fn(usize) -> Result<String, OcrError>> OcrEngine for StubEngine<F> {
        fn recognize(&self, _: &GrayImage, _: &str, _: EngineMode) -> Result<String, OcrError> {
            let idx = self.calls.get();
            self.calls.set(idx + 1);
            (self.script)(idx)
        }
    }

    fn engine_returning(
        text: &'static str,
    ) -> StubEngine<impl Fn(usize) -> Result<String, OcrError>> {
        StubEngine {
            calls: Cell::new(0),
            script: move |_| Ok(text.to_string()),
        }
    }

    struct StubClipboard {
        text: String,
    }

    impl Clipboard for StubClipboard {
        fn read_text(&self) -> Result<String> {
            Ok(self.text.clone())
        }
    }

    fn test_config(debug_dir: &std::path::Path) -> ExtractionConfig {
        let mut config = ExtractionConfig::default();
        config.settle_wait_ms = 0;
        config.input_wait_ms = 0;
        config.refresh_wait_ms = 0;
        config.success_timeout_ms = 1;
        config.challenge_check_timeout_ms = 1;
        config.save_dialog_probes = 3;
        config.save_dialog_probe_interval_ms = 0;
        config.file_poll_retries = 20;
        config.file_poll_interval_ms = 0;
        config.debug_dir = Some(debug_dir.to_path_buf());
        config
    }

    fn grid_selector() -> Selector {
        Selector::control_id(0x417).with_class("CVirtualGridCtrl")
    }

    #[test]
    fn test_copy_extract_without_challenge() {
        let dir = tempdir().unwrap();
        let host = StubHost::new();
        let engine = engine_returning("ab3d");
        let clipboard = StubClipboard {
            text: PAYLOAD.to_string(),
        };
        let parser = TsvParser::new();
        let extractor =
            GridExtractor::new(&host, &engine, &clipboard, &parser, test_config(dir.path()));

        let mut session = ExtractSession::new();
        session.expect_challenge(false);
        let records = extractor
            .extract(&mut session, &grid_selector(), ExportMode::Copy)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("code"), Some(&CellValue::Number(600000.0)));
        // The copy trigger reached the grid control
        assert!(host.typed_on(GRID_HANDLE).contains(&"^a^c".to_string()));
    }

    #[test]
    fn test_challenge_is_solved_then_session_stops_expecting_it() {
        let dir = tempdir().unwrap();
        let host = StubHost::new();
        // Present at the orchestrator check, gone at the solver's verify
        host.challenge_script.borrow_mut().extend([true, false]);
        let engine = engine_returning("ab3d");
        let clipboard = StubClipboard {
            text: PAYLOAD.to_string(),
        };
        let parser = TsvParser::new();
        let extractor =
            GridExtractor::new(&host, &engine, &clipboard, &parser, test_config(dir.path()));

        let mut session = ExtractSession::new();
        let records = extractor
            .extract(&mut session, &grid_selector(), ExportMode::Copy)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(!session.challenge_expected());
        // The candidate went into the challenge input field
        assert!(host.typed_on(CHAL_INPUT).contains(&"ab3d".to_string()));
    }

    #[test]
    fn test_exhausted_challenge_is_a_definitive_error() {
        let dir = tempdir().unwrap();
        let mut host = StubHost::new();
        // Present at the check, and it never leaves afterwards
        host.challenge_default = true;
        let engine = engine_returning("zz"); // never a usable candidate
        let clipboard = StubClipboard {
            text: PAYLOAD.to_string(),
        };
        let parser = TsvParser::new();
        let mut config = test_config(dir.path());
        config.max_retry_count = 3;
        let extractor = GridExtractor::new(&host, &engine, &clipboard, &parser, config);

        let mut session = ExtractSession::new();
        match extractor.extract(&mut session, &grid_selector(), ExportMode::Copy) {
            Err(ExtractError::ChallengeExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("expected ChallengeExhausted, got {:?}", other),
        }
    }

    #[test]
    fn test_file_export_waits_for_the_file_and_cleans_up() {
        let dir = tempdir().unwrap();
        let tmp = tempdir().unwrap();
        let mut host = StubHost::new();
        host.save_dialog = true;
        host.create_file_on_check = Some(5);
        let engine = engine_returning("ab3d");
        let clipboard = StubClipboard {
            text: String::new(),
        };
        let parser = TsvParser::new();
        let mut config = test_config(dir.path());
        config.tmp_dir = Some(tmp.path().to_path_buf());
        let extractor = GridExtractor::new(&host, &engine, &clipboard, &parser, config);

        let mut session = ExtractSession::new();
        session.expect_challenge(false);
        let records = extractor
            .extract(&mut session, &grid_selector(), ExportMode::FileExport)
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(host.popup_checks.get() >= 5, "file appeared on the 5th poll");
        // Cleanup invariant: the temp export is gone after the call
        let export_path = host.export_path.borrow().clone().unwrap();
        assert!(!export_path.exists());
    }

    #[test]
    fn test_file_never_appearing_is_a_definitive_error() {
        let dir = tempdir().unwrap();
        let tmp = tempdir().unwrap();
        let mut host = StubHost::new();
        host.save_dialog = true; // dialog found, file never written
        let engine = engine_returning("ab3d");
        let clipboard = StubClipboard {
            text: String::new(),
        };
        let parser = TsvParser::new();
        let mut config = test_config(dir.path());
        config.tmp_dir = Some(tmp.path().to_path_buf());
        config.file_poll_retries = 3;
        let extractor = GridExtractor::new(&host, &engine, &clipboard, &parser, config);

        let mut session = ExtractSession::new();
        session.expect_challenge(false);
        match extractor.extract(&mut session, &grid_selector(), ExportMode::FileExport) {
            Err(ExtractError::ExportFileMissing { .. }) => {}
            other => panic!("expected ExportFileMissing, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_save_dialog_is_a_definitive_error() {
        let dir = tempdir().unwrap();
        let host = StubHost::new(); // save_dialog stays false
        let engine = engine_returning("ab3d");
        let clipboard = StubClipboard {
            text: String::new(),
        };
        let parser = TsvParser::new();
        let extractor =
            GridExtractor::new(&host, &engine, &clipboard, &parser, test_config(dir.path()));

        let mut session = ExtractSession::new();
        session.expect_challenge(false);
        match extractor.extract(&mut session, &grid_selector(), ExportMode::FileExport) {
            Err(ExtractError::SaveDialogNotFound) => {}
            other => panic!("expected SaveDialogNotFound, got {:?}", other),
        }
        // The recovery path re-issued the export trigger once
        let triggers = host
            .typed_on(GRID_HANDLE)
            .iter()
            .filter(|t| *t == "^s")
            .count();
        assert_eq!(triggers, 2);
    }

    #[test]
    fn test_named_grid_falls_back_to_first_of_class() {
        let dir = tempdir().unwrap();
        let mut host = StubHost::new();
        host.named_grid = false;
        let engine = engine_returning("ab3d");
        let clipboard = StubClipboard {
            text: PAYLOAD.to_string(),
        };
        let parser = TsvParser::new();
        let extractor =
            GridExtractor::new(&host, &engine, &clipboard, &parser, test_config(dir.path()));

        let mut session = ExtractSession::new();
        session.expect_challenge(false);
        let records = extractor
            .extract(&mut session, &grid_selector(), ExportMode::Copy)
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_no_grid_at_all_is_grid_not_found() {
        let dir = tempdir().unwrap();
        let mut host = StubHost::new();
        host.named_grid = false;
        host.class_grid = false;
        let engine = engine_returning("ab3d");
        let clipboard = StubClipboard {
            text: PAYLOAD.to_string(),
        };
        let parser = TsvParser::new();
        let extractor =
            GridExtractor::new(&host, &engine, &clipboard, &parser, test_config(dir.path()));

        let mut session = ExtractSession::new();
        match extractor.extract(&mut session, &grid_selector(), ExportMode::Copy) {
            Err(ExtractError::GridNotFound) => {}
            other => panic!("expected GridNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_clipboard_rearms_the_challenge_expectation() {
        let dir = tempdir().unwrap();
        let host = StubHost::new();
        let engine = engine_returning("ab3d");
        let clipboard = StubClipboard {
            text: "   \n".to_string(),
        };
        let parser = TsvParser::new();
        let extractor =
            GridExtractor::new(&host, &engine, &clipboard, &parser, test_config(dir.path()));

        let mut session = ExtractSession::new();
        session.expect_challenge(false);
        match extractor.extract(&mut session, &grid_selector(), ExportMode::Copy) {
            Err(ExtractError::EmptyPayload) => {}
            other => panic!("expected EmptyPayload, got {:?}", other),
        }
        assert!(session.challenge_expected());
    }

    #[test]
    fn test_consecutive_extracts_have_a_stable_column_set() {
        let dir = tempdir().unwrap();
        let host = StubHost::new();
        let engine = engine_returning("ab3d");
        let clipboard = StubClipboard {
            text: PAYLOAD.to_string(),
        };
        let parser = TsvParser::new();
        let extractor =
            GridExtractor::new(&host, &engine, &clipboard, &parser, test_config(dir.path()));

        let mut session = ExtractSession::new();
        session.expect_challenge(false);

        let first = extractor
            .extract(&mut session, &grid_selector(), ExportMode::Copy)
            .unwrap();
        let second = extractor
            .extract(&mut session, &grid_selector(), ExportMode::Copy)
            .unwrap();

        let first_columns: Vec<&str> = first[0].columns().collect();
        let second_columns: Vec<&str> = second[0].columns().collect();
        assert_eq!(first_columns, second_columns);
    }

    #[test]
    fn test_manual_input_mode_surfaces_to_the_caller() {
        let dir = tempdir().unwrap();
        let host = StubHost::new();
        host.challenge_script.borrow_mut().push(true);
        let engine = engine_returning("ab3d");
        let clipboard = StubClipboard {
            text: PAYLOAD.to_string(),
        };
        let parser = TsvParser::new();
        let mut config = test_config(dir.path());
        config.manual_input = true;
        let extractor = GridExtractor::new(&host, &engine, &clipboard, &parser, config);

        let mut session = ExtractSession::new();
        match extractor.extract(&mut session, &grid_selector(), ExportMode::Copy) {
            Err(ExtractError::ManualInputRequired) => {}
            other => panic!("expected ManualInputRequired, got {:?}", other),
        }
    }
}
