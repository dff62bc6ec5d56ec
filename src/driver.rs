//! Seam to the external UI-automation layer.
//!
//! Every interaction with the host application's widgets goes through
//! [`UiDriver`]. Production implementations wrap a real automation
//! toolkit; tests substitute stubs. All methods are fallible I/O with
//! bounded latency.

use anyhow::Result;
use image::{ImageBuffer, Rgba};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A captured widget bitmap (RGBA, row-major).
pub type Bitmap = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Opaque handle to an on-screen control, minted by [`UiDriver::find_control`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlHandle(pub u64);

/// Names a control within the host application.
///
/// Fields combine conjunctively: a selector with both a class name and a
/// title pattern matches controls satisfying both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    /// Numeric control id, if known.
    #[serde(default)]
    pub control_id: Option<u32>,
    /// Window class name (e.g. "CVirtualGridCtrl").
    #[serde(default)]
    pub class_name: Option<String>,
    /// Regex matched against the window title.
    #[serde(default)]
    pub title_pattern: Option<String>,
}

impl Selector {
    /// Selector matching a numeric control id.
    pub fn control_id(id: u32) -> Self {
        Self {
            control_id: Some(id),
            ..Self::default()
        }
    }

    /// Selector matching a window class name.
    pub fn class(name: &str) -> Self {
        Self {
            class_name: Some(name.to_string()),
            ..Self::default()
        }
    }

    /// Selector matching a title regex.
    pub fn title(pattern: &str) -> Self {
        Self {
            title_pattern: Some(pattern.to_string()),
            ..Self::default()
        }
    }

    /// Adds a class-name constraint.
    pub fn with_class(mut self, name: &str) -> Self {
        self.class_name = Some(name.to_string());
        self
    }

    /// Adds a title-pattern constraint.
    pub fn with_title(mut self, pattern: &str) -> Self {
        self.title_pattern = Some(pattern.to_string());
        self
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts = Vec::new();
        if let Some(id) = self.control_id {
            parts.push(format!("id=0x{:X}", id));
        }
        if let Some(class) = &self.class_name {
            parts.push(format!("class={}", class));
        }
        if let Some(title) = &self.title_pattern {
            parts.push(format!("title={}", title));
        }
        if parts.is_empty() {
            write!(f, "<any>")
        } else {
            write!(f, "{}", parts.join(" "))
        }
    }
}

/// Capabilities consumed from the UI-automation collaborator.
///
/// `window_exists` owns its timeout; the other calls are expected to
/// return promptly. When a selector matches several controls,
/// `find_control` returns the first.
pub trait UiDriver {
    fn find_control(&self, selector: &Selector) -> Result<ControlHandle>;
    fn click(&self, handle: &ControlHandle) -> Result<()>;
    fn type_keys(&self, handle: &ControlHandle, text: &str) -> Result<()>;
    fn capture_image(&self, handle: &ControlHandle) -> Result<Bitmap>;
    fn window_exists(&self, selector: &Selector, timeout: Duration) -> Result<bool>;
    fn set_foreground(&self, handle: &ControlHandle) -> Result<()>;
    /// Posts a raw command message to a control, for hosts whose export
    /// action is a menu command rather than a key sequence.
    fn post_command(&self, handle: &ControlHandle, command: u32) -> Result<()>;
}

/// Clipboard access, consumed by the copy-based extraction modes.
pub trait Clipboard {
    fn read_text(&self) -> Result<String>;
}
