//! Bounded presence checks for the challenge dialog.

use anyhow::Result;
use std::time::Duration;

use crate::driver::{Selector, UiDriver};

/// Wraps the external existence check for one specific dialog.
///
/// Both operations are advisory: a transient negative near the timeout
/// boundary is expected and tolerated by the retry loop, never treated
/// as fatal.
pub struct ChallengeMonitor<'a, D: UiDriver + ?Sized> {
    driver: &'a D,
    dialog: &'a Selector,
}

impl<'a, D: UiDriver + ?Sized> ChallengeMonitor<'a, D> {
    pub fn new(driver: &'a D, dialog: &'a Selector) -> Self {
        Self { driver, dialog }
    }

    /// True if the dialog shows up within the timeout.
    pub fn is_present(&self, timeout: Duration) -> Result<bool> {
        self.driver.window_exists(self.dialog, timeout)
    }

    /// True if the dialog is gone (does not show up within the timeout).
    pub fn is_absent(&self, timeout: Duration) -> Result<bool> {
        Ok(!self.driver.window_exists(self.dialog, timeout)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Bitmap, ControlHandle};
    use anyhow::anyhow;
    use std::cell::RefCell;

    /// Driver whose existence answers are scripted per call.
    struct ScriptedDriver {
        answers: RefCell<Vec<Result<bool>>>,
    }

    impl UiDriver for ScriptedDriver {
        fn find_control(&self, _: &Selector) -> Result<ControlHandle> {
            Err(anyhow!("not scripted"))
        }
        fn click(&self, _: &ControlHandle) -> Result<()> {
            Ok(())
        }
        fn type_keys(&self, _: &ControlHandle, _: &str) -> Result<()> {
            Ok(())
        }
        fn capture_image(&self, _: &ControlHandle) -> Result<Bitmap> {
            Err(anyhow!("not scripted"))
        }
        fn window_exists(&self, _: &Selector, _: Duration) -> Result<bool> {
            self.answers.borrow_mut().remove(0)
        }
        fn set_foreground(&self, _: &ControlHandle) -> Result<()> {
            Ok(())
        }
        fn post_command(&self, _: &ControlHandle, _: u32) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_present_and_absent_are_complements() {
        let driver = ScriptedDriver {
            answers: RefCell::new(vec![Ok(true), Ok(true)]),
        };
        let dialog = Selector::title("验证码");
        let monitor = ChallengeMonitor::new(&driver, &dialog);

        assert!(monitor.is_present(Duration::from_millis(1)).unwrap());
        assert!(!monitor.is_absent(Duration::from_millis(1)).unwrap());
    }

    #[test]
    fn test_check_errors_propagate_to_the_caller() {
        let driver = ScriptedDriver {
            answers: RefCell::new(vec![Err(anyhow!("window manager hiccup"))]),
        };
        let dialog = Selector::title("验证码");
        let monitor = ChallengeMonitor::new(&driver, &dialog);

        assert!(monitor.is_absent(Duration::from_millis(1)).is_err());
    }
}
