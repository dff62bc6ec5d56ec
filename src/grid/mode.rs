//! Extraction modes.
//!
//! The three ways tabular data leaves the host grid are polymorphic over
//! two operations: trigger the export, then obtain the raw payload. The
//! payload side lives in the orchestrator; this module owns the triggers
//! and the clipboard retry loop.

use anyhow::{Result, anyhow};
use std::time::Duration;

use crate::config::HostControls;
use crate::driver::{Clipboard, ControlHandle, UiDriver};

/// How tabular data leaves the host grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportMode {
    /// Select-all + copy keystrokes; payload read from the clipboard.
    Copy,
    /// Host copy command posted as a window message; clipboard payload.
    WmCopy,
    /// Save-to-file command; payload parsed from the exported file.
    FileExport,
}

impl ExportMode {
    /// Issues the export action appropriate to this mode.
    pub(crate) fn trigger<D: UiDriver + ?Sized>(
        self,
        driver: &D,
        grid: &ControlHandle,
        controls: &HostControls,
    ) -> Result<()> {
        match self {
            ExportMode::Copy => driver.type_keys(grid, "^a^c"),
            ExportMode::WmCopy => driver.post_command(grid, controls.wm_copy_command),
            ExportMode::FileExport => driver.type_keys(grid, "^s"),
        }
    }

    pub fn uses_clipboard(self) -> bool {
        matches!(self, ExportMode::Copy | ExportMode::WmCopy)
    }
}

/// Reads the clipboard with a bounded retry loop. The host occasionally
/// holds the clipboard open right after a copy; transient read failures
/// are retried, persistent ones surface.
pub(crate) fn read_clipboard<C: Clipboard + ?Sized>(
    clipboard: &C,
    retries: u32,
    interval: Duration,
) -> Result<String> {
    let mut last_err = None;
    for attempt in 0..retries.max(1) {
        match clipboard.read_text() {
            Ok(text) => return Ok(text),
            Err(e) => {
                crate::log(&format!(
                    "Clipboard read failed (attempt {}): {}, retrying",
                    attempt + 1,
                    e
                ));
                last_err = Some(e);
                if interval > Duration::ZERO {
                    std::thread::sleep(interval);
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow!("clipboard unavailable")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FlakyClipboard {
        answers: RefCell<Vec<Result<String>>>,
    }

    impl Clipboard for FlakyClipboard {
        fn read_text(&self) -> Result<String> {
            self.answers.borrow_mut().remove(0)
        }
    }

    #[test]
    fn test_read_clipboard_retries_transient_failures() {
        let clipboard = FlakyClipboard {
            answers: RefCell::new(vec![
                Err(anyhow!("clipboard busy")),
                Err(anyhow!("clipboard busy")),
                Ok("a\tb\n1\t2\n".to_string()),
            ]),
        };

        let text = read_clipboard(&clipboard, 5, Duration::ZERO).unwrap();
        assert_eq!(text, "a\tb\n1\t2\n");
    }

    #[test]
    fn test_read_clipboard_gives_up_after_budget() {
        let clipboard = FlakyClipboard {
            answers: RefCell::new(vec![
                Err(anyhow!("clipboard busy")),
                Err(anyhow!("clipboard busy")),
                Err(anyhow!("clipboard busy")),
            ]),
        };

        assert!(read_clipboard(&clipboard, 3, Duration::ZERO).is_err());
    }

    #[test]
    fn test_mode_payload_kinds() {
        assert!(ExportMode::Copy.uses_clipboard());
        assert!(ExportMode::WmCopy.uses_clipboard());
        assert!(!ExportMode::FileExport.uses_clipboard());
    }
}
