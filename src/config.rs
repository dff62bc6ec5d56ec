//! Extraction configuration.
//!
//! One [`ExtractionConfig`] is selected per extraction call and read-only
//! thereafter. Named presets are just different value sets of the same
//! structure; everything can also be overridden field by field or loaded
//! from a JSON file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::driver::Selector;
use crate::ocr::SweepPolicy;

/// Named timing/retry presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Fewer retries, short waits. Misses more challenges but finishes fast.
    Fast,
    /// The default trade-off.
    Balanced,
    /// More retries, generous waits for slow hosts.
    Accurate,
}

/// Control signature of the host application.
///
/// Defaults target the trading client this crate was written against;
/// every selector and command code can be overridden for other builds of
/// the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostControls {
    /// Class name of grid controls, used as the fallback when the named
    /// grid selector matches nothing.
    #[serde(default = "default_grid_class")]
    pub grid_class: String,
    /// The challenge dialog itself (presence checks run against this).
    #[serde(default = "default_challenge_dialog")]
    pub challenge_dialog: Selector,
    /// The static control rendering the challenge bitmap. Clicking it
    /// refreshes the challenge.
    #[serde(default = "default_challenge_image")]
    pub challenge_image: Selector,
    /// The edit control receiving the challenge code.
    #[serde(default = "default_challenge_input")]
    pub challenge_input: Selector,
    /// The challenge dialog's cancel button.
    #[serde(default = "default_challenge_cancel")]
    pub challenge_cancel: Selector,
    /// Title pattern of the save dialog.
    #[serde(default = "default_save_dialog_title")]
    pub save_dialog_title: String,
    /// Path edit-control ids tried in order before falling back to raw
    /// keystrokes into the dialog.
    #[serde(default = "default_save_path_edit_ids")]
    pub save_path_edit_ids: Vec<u32>,
    /// Title pattern of the "file exists, overwrite?" sub-dialog.
    #[serde(default = "default_overwrite_dialog_title")]
    pub overwrite_dialog_title: String,
    /// Incidental pop-up dialogs that may appear while waiting for the
    /// export file.
    #[serde(default = "default_popup_dialog")]
    pub popup_dialog: Selector,
    /// The button that dismisses such pop-ups.
    #[serde(default = "default_popup_dismiss")]
    pub popup_dismiss: Selector,
    /// Command code posted for the message-based copy mode.
    #[serde(default = "default_wm_copy_command")]
    pub wm_copy_command: u32,
}

fn default_grid_class() -> String {
    "CVirtualGridCtrl".to_string()
}

fn default_challenge_dialog() -> Selector {
    Selector::class("Static").with_title("验证码")
}

fn default_challenge_image() -> Selector {
    Selector::control_id(0x965).with_class("Static")
}

fn default_challenge_input() -> Selector {
    Selector::control_id(0x964).with_class("Edit")
}

fn default_challenge_cancel() -> Selector {
    Selector::title("取消|Cancel")
}

fn default_save_dialog_title() -> String {
    "另存为|Save As|文件另存为".to_string()
}

fn default_save_path_edit_ids() -> Vec<u32> {
    vec![0x47C, 0x3E9, 1001]
}

fn default_overwrite_dialog_title() -> String {
    "确认另存为|Confirm Save As|替换|Replace".to_string()
}

fn default_popup_dialog() -> Selector {
    Selector::title("提示|警告|错误")
}

fn default_popup_dismiss() -> Selector {
    Selector::title("确定|OK|是|Yes")
}

fn default_wm_copy_command() -> u32 {
    0xE122
}

impl Default for HostControls {
    fn default() -> Self {
        Self {
            grid_class: default_grid_class(),
            challenge_dialog: default_challenge_dialog(),
            challenge_image: default_challenge_image(),
            challenge_input: default_challenge_input(),
            challenge_cancel: default_challenge_cancel(),
            save_dialog_title: default_save_dialog_title(),
            save_path_edit_ids: default_save_path_edit_ids(),
            overwrite_dialog_title: default_overwrite_dialog_title(),
            popup_dialog: default_popup_dialog(),
            popup_dismiss: default_popup_dismiss(),
            wm_copy_command: default_wm_copy_command(),
        }
    }
}

/// Complete extraction configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Maximum challenge-solving cycles before definitive failure.
    #[serde(default = "default_max_retry_count")]
    pub max_retry_count: u32,
    /// Wait after submitting a candidate, before checking the outcome.
    #[serde(default = "default_input_wait_ms")]
    pub input_wait_ms: u64,
    /// Wait after clicking the challenge image to refresh it.
    #[serde(default = "default_refresh_wait_ms")]
    pub refresh_wait_ms: u64,
    /// Presence-check timeout used to decide whether the dialog is gone.
    #[serde(default = "default_success_timeout_ms")]
    pub success_timeout_ms: u64,
    /// Characters the engine is told to expect.
    #[serde(default = "default_char_whitelist")]
    pub char_whitelist: String,
    /// Wait after triggering the export, before looking for a challenge.
    #[serde(default = "default_settle_wait_ms")]
    pub settle_wait_ms: u64,
    /// Timeout for the initial "did a challenge appear?" check.
    #[serde(default = "default_challenge_check_timeout_ms")]
    pub challenge_check_timeout_ms: u64,
    /// Save-dialog probe count and interval.
    #[serde(default = "default_save_dialog_probes")]
    pub save_dialog_probes: u32,
    #[serde(default = "default_save_dialog_probe_interval_ms")]
    pub save_dialog_probe_interval_ms: u64,
    /// Export-file polling budget.
    #[serde(default = "default_file_poll_retries")]
    pub file_poll_retries: u32,
    #[serde(default = "default_file_poll_interval_ms")]
    pub file_poll_interval_ms: u64,
    /// Clipboard read retries for the copy modes.
    #[serde(default = "default_clipboard_retries")]
    pub clipboard_retries: u32,
    /// 2x upscale + sharpen shared pre-step before the variant menu.
    #[serde(default = "default_prescale")]
    pub prescale: bool,
    /// What the threshold sweep does with its per-threshold results.
    #[serde(default = "default_sweep_policy")]
    pub sweep_policy: SweepPolicy,
    /// Wall-clock ceiling for one whole challenge solve. Bounds the
    /// pathological case where every poll runs to its own timeout.
    #[serde(default = "default_overall_deadline_ms")]
    pub overall_deadline_ms: u64,
    /// Surface `ManualInputRequired` instead of solving automatically.
    #[serde(default)]
    pub manual_input: bool,
    /// Directory for exported temp files. Defaults to the system temp dir.
    #[serde(default)]
    pub tmp_dir: Option<PathBuf>,
    /// Directory for debug artifacts. Defaults to `captcha_debug/`.
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,
    /// Host control signature.
    #[serde(default)]
    pub controls: HostControls,
}

fn default_max_retry_count() -> u32 {
    5
}

fn default_input_wait_ms() -> u64 {
    800
}

fn default_refresh_wait_ms() -> u64 {
    600
}

fn default_success_timeout_ms() -> u64 {
    800
}

fn default_char_whitelist() -> String {
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz".to_string()
}

fn default_settle_wait_ms() -> u64 {
    2000
}

fn default_challenge_check_timeout_ms() -> u64 {
    3000
}

fn default_save_dialog_probes() -> u32 {
    15
}

fn default_save_dialog_probe_interval_ms() -> u64 {
    200
}

fn default_file_poll_retries() -> u32 {
    20
}

fn default_file_poll_interval_ms() -> u64 {
    300
}

fn default_clipboard_retries() -> u32 {
    5
}

fn default_prescale() -> bool {
    true
}

fn default_sweep_policy() -> SweepPolicy {
    SweepPolicy::InnerVote
}

fn default_overall_deadline_ms() -> u64 {
    120_000
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_retry_count: default_max_retry_count(),
            input_wait_ms: default_input_wait_ms(),
            refresh_wait_ms: default_refresh_wait_ms(),
            success_timeout_ms: default_success_timeout_ms(),
            char_whitelist: default_char_whitelist(),
            settle_wait_ms: default_settle_wait_ms(),
            challenge_check_timeout_ms: default_challenge_check_timeout_ms(),
            save_dialog_probes: default_save_dialog_probes(),
            save_dialog_probe_interval_ms: default_save_dialog_probe_interval_ms(),
            file_poll_retries: default_file_poll_retries(),
            file_poll_interval_ms: default_file_poll_interval_ms(),
            clipboard_retries: default_clipboard_retries(),
            prescale: default_prescale(),
            sweep_policy: default_sweep_policy(),
            overall_deadline_ms: default_overall_deadline_ms(),
            manual_input: false,
            tmp_dir: None,
            debug_dir: None,
            controls: HostControls::default(),
        }
    }
}

impl ExtractionConfig {
    /// Builds a configuration from a named preset.
    pub fn preset(preset: Preset) -> Self {
        let mut config = Self::default();
        config.apply_preset(preset);
        config
    }

    /// Overwrites the retry/timing fields with a preset's value set.
    /// Other fields are left untouched.
    pub fn apply_preset(&mut self, preset: Preset) {
        match preset {
            Preset::Fast => {
                self.max_retry_count = 3;
                self.input_wait_ms = 500;
                self.refresh_wait_ms = 400;
                self.success_timeout_ms = 500;
            }
            Preset::Balanced => {
                self.max_retry_count = 5;
                self.input_wait_ms = 800;
                self.refresh_wait_ms = 600;
                self.success_timeout_ms = 800;
            }
            Preset::Accurate => {
                self.max_retry_count = 8;
                self.input_wait_ms = 1200;
                self.refresh_wait_ms = 1000;
                self.success_timeout_ms = 1500;
            }
        }
        crate::log(&format!("Applied {:?} extraction preset", preset));
    }

    /// Loads configuration from a JSON file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Loads configuration from a JSON file, falling back to defaults on
    /// any error (logged, not fatal).
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::from_file(path) {
                Ok(config) => {
                    crate::log(&format!("Config loaded from {}", path.display()));
                    return config;
                }
                Err(e) => {
                    crate::log(&format!(
                        "Failed to load {}: {}. Using defaults.",
                        path.display(),
                        e
                    ));
                }
            }
        } else {
            crate::log(&format!(
                "{} not found. Using default config.",
                path.display()
            ));
        }
        Self::default()
    }
}
