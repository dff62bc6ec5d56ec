//! Challenge attempt state machine.
//!
//! The retry policy is an explicit state machine so it can be driven and
//! tested without real UI or OCR calls. One solver instance owns one
//! challenge dialog for its whole lifetime; the `&mut self` stepping API
//! keeps attempts serialized against a given control.

use image::GrayImage;
use std::time::{Duration, Instant};

use crate::captcha::debug::DebugStore;
use crate::captcha::monitor::ChallengeMonitor;
use crate::config::ExtractionConfig;
use crate::driver::UiDriver;
use crate::error::ExtractError;
use crate::ocr::{self, CODE_LEN, OcrEngine, OcrError};

/// Challenge solving states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    /// Waiting for the orchestrator to start the solve.
    Idle,
    /// Grabbing the challenge bitmap from the dialog.
    Capturing,
    /// Running the recognition ensemble.
    Recognizing,
    /// Injecting the candidate into the input field.
    Submitting,
    /// Waiting to learn whether the dialog dismissed.
    Verifying,
    /// Attempt failed; refresh the challenge and go again if budget remains.
    RetryPending,
    /// The dialog dismissed.
    Success,
    /// Budget ran out without a solve.
    Exhausted,
}

impl std::fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeState::Idle => write!(f, "Idle"),
            ChallengeState::Capturing => write!(f, "Capturing"),
            ChallengeState::Recognizing => write!(f, "Recognizing"),
            ChallengeState::Submitting => write!(f, "Submitting"),
            ChallengeState::Verifying => write!(f, "Verifying"),
            ChallengeState::RetryPending => write!(f, "Retry pending"),
            ChallengeState::Success => write!(f, "Success"),
            ChallengeState::Exhausted => write!(f, "Exhausted"),
        }
    }
}

/// Terminal outcome reported to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeOutcome {
    Solved,
    Exhausted { attempts: u32 },
}

/// Drives one challenge dialog to a terminal state.
pub struct ChallengeSolver<'a, D: UiDriver + ?Sized, E: OcrEngine + ?Sized> {
    state: ChallengeState,
    driver: &'a D,
    engine: &'a E,
    config: &'a ExtractionConfig,
    debug: DebugStore,
    /// Remaining attempts. Never goes below zero; zero without success
    /// is definitive.
    budget: u32,
    /// Capture cycles performed so far.
    attempts: u32,
    /// The current iteration's challenge image. Exists only between
    /// Capturing and Recognizing; dropped at the end of each iteration.
    image: Option<GrayImage>,
    image_name: Option<String>,
    /// The in-flight candidate, at most one at a time.
    candidate: Option<String>,
    deadline: Instant,
}

impl<'a, D: UiDriver + ?Sized, E: OcrEngine + ?Sized> ChallengeSolver<'a, D, E> {
    pub fn new(driver: &'a D, engine: &'a E, config: &'a ExtractionConfig) -> Self {
        let debug_dir = config
            .debug_dir
            .clone()
            .unwrap_or_else(crate::paths::get_debug_dir);
        Self {
            state: ChallengeState::Idle,
            driver,
            engine,
            config,
            debug: DebugStore::new(debug_dir),
            budget: config.max_retry_count,
            attempts: 0,
            image: None,
            image_name: None,
            candidate: None,
            deadline: Instant::now() + Duration::from_millis(config.overall_deadline_ms),
        }
    }

    pub fn state(&self) -> ChallengeState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Runs the state machine to a terminal state.
    pub fn solve(&mut self) -> Result<ChallengeOutcome, ExtractError> {
        while self.step()? {}
        match self.state {
            ChallengeState::Success => Ok(ChallengeOutcome::Solved),
            _ => Ok(ChallengeOutcome::Exhausted {
                attempts: self.attempts,
            }),
        }
    }

    /// Advances the state machine by one step.
    ///
    /// Returns `Ok(true)` while there is more to do, `Ok(false)` on a
    /// terminal state. Only an unavailable OCR engine is fatal here;
    /// every other collaborator failure costs an attempt and retries.
    pub fn step(&mut self) -> Result<bool, ExtractError> {
        // Per-operation timeouts don't add up to a global bound; the
        // deadline does.
        if Instant::now() >= self.deadline
            && !matches!(
                self.state,
                ChallengeState::Success | ChallengeState::Exhausted
            )
        {
            crate::log("Challenge deadline reached, cancelling");
            self.cancel_dialog();
            self.state = ChallengeState::Exhausted;
            return Ok(false);
        }

        match self.state {
            ChallengeState::Idle => {
                if self.budget == 0 {
                    self.cancel_dialog();
                    self.state = ChallengeState::Exhausted;
                    return Ok(false);
                }
                crate::log(&format!(
                    "Challenge detected, {} attempts budgeted",
                    self.budget
                ));
                self.state = ChallengeState::Capturing;
                Ok(true)
            }

            ChallengeState::Capturing => {
                self.attempts += 1;
                crate::log(&format!(
                    "Attempt {}/{}: capturing challenge image",
                    self.attempts, self.config.max_retry_count
                ));
                match self.capture() {
                    Ok(img) => {
                        self.image_name = self.debug.save_attempt(&img, self.attempts);
                        self.image = Some(img);
                        self.state = ChallengeState::Recognizing;
                    }
                    Err(e) => {
                        crate::log(&format!("Capture failed: {}", e));
                        self.debug.record(self.attempts, "", "capture-error", None);
                        self.state = ChallengeState::RetryPending;
                    }
                }
                Ok(true)
            }

            ChallengeState::Recognizing => {
                // The image lives exactly one iteration
                let Some(img) = self.image.take() else {
                    self.state = ChallengeState::RetryPending;
                    return Ok(true);
                };
                match ocr::recognize_challenge(
                    &img,
                    self.engine,
                    &self.config.char_whitelist,
                    self.config.sweep_policy,
                ) {
                    Ok(code) => {
                        self.candidate = Some(code);
                        self.state = ChallengeState::Submitting;
                    }
                    Err(OcrError::EngineUnavailable(path)) => {
                        return Err(ExtractError::EngineUnavailable(path));
                    }
                    Err(e) => {
                        crate::log(&format!("Recognition pass failed: {}", e));
                        self.candidate = None;
                        self.state = ChallengeState::Submitting;
                    }
                }
                Ok(true)
            }

            ChallengeState::Submitting => {
                let candidate = self.candidate.clone().unwrap_or_default();
                if candidate.len() != CODE_LEN {
                    // An unlucky recognition pass: no UI interaction,
                    // but the attempt still counts.
                    crate::log("No usable candidate this pass");
                    self.debug
                        .record(self.attempts, &candidate, "no-candidate", self.image_name.as_deref());
                    self.state = ChallengeState::RetryPending;
                } else {
                    crate::log(&format!("Submitting candidate: {}", candidate));
                    match self.submit(&candidate) {
                        Ok(()) => self.state = ChallengeState::Verifying,
                        Err(e) => {
                            crate::log(&format!("Submit failed: {}", e));
                            self.debug.record(
                                self.attempts,
                                &candidate,
                                "submit-error",
                                self.image_name.as_deref(),
                            );
                            self.state = ChallengeState::RetryPending;
                        }
                    }
                }
                Ok(true)
            }

            ChallengeState::Verifying => {
                wait_ms(self.config.input_wait_ms);
                let candidate = self.candidate.clone().unwrap_or_default();
                let monitor =
                    ChallengeMonitor::new(self.driver, &self.config.controls.challenge_dialog);
                match monitor.is_absent(Duration::from_millis(self.config.success_timeout_ms)) {
                    Ok(true) => {
                        crate::log(&format!("Challenge solved with '{}'", candidate));
                        self.debug.record(
                            self.attempts,
                            &candidate,
                            "success",
                            self.image_name.as_deref(),
                        );
                        self.state = ChallengeState::Success;
                    }
                    Ok(false) => {
                        crate::log(&format!("Candidate '{}' rejected", candidate));
                        self.debug.record(
                            self.attempts,
                            &candidate,
                            "failure",
                            self.image_name.as_deref(),
                        );
                        self.state = ChallengeState::RetryPending;
                    }
                    Err(e) => {
                        // A failed check proves nothing about the dialog;
                        // the outcome is unknown, so spend a retry on it.
                        crate::log(&format!(
                            "Presence check failed ({}), treating as unresolved",
                            e
                        ));
                        self.debug.record(
                            self.attempts,
                            &candidate,
                            "check-error",
                            self.image_name.as_deref(),
                        );
                        self.state = ChallengeState::RetryPending;
                    }
                }
                Ok(true)
            }

            ChallengeState::RetryPending => {
                self.candidate = None;
                self.image_name = None;
                self.budget = self.budget.saturating_sub(1);
                if self.budget >= 1 {
                    crate::log(&format!(
                        "Refreshing challenge, {} attempts left",
                        self.budget
                    ));
                    if let Err(e) = self.refresh() {
                        crate::log(&format!("Challenge refresh failed: {}", e));
                    }
                    wait_ms(self.config.refresh_wait_ms);
                    self.state = ChallengeState::Capturing;
                    Ok(true)
                } else {
                    crate::log("Challenge budget exhausted, cancelling");
                    self.cancel_dialog();
                    self.state = ChallengeState::Exhausted;
                    Ok(false)
                }
            }

            ChallengeState::Success | ChallengeState::Exhausted => Ok(false),
        }
    }

    /// Grabs the challenge bitmap and applies the shared pre-step.
    fn capture(&self) -> anyhow::Result<GrayImage> {
        let handle = self
            .driver
            .find_control(&self.config.controls.challenge_image)?;
        let bitmap = self.driver.capture_image(&handle)?;
        let gray = ocr::to_gray(&bitmap);
        Ok(if self.config.prescale {
            ocr::prescale(&gray)
        } else {
            gray
        })
    }

    /// Clears the input field, types the candidate, and confirms.
    fn submit(&self, candidate: &str) -> anyhow::Result<()> {
        let input = self
            .driver
            .find_control(&self.config.controls.challenge_input)?;
        self.driver.click(&input)?;
        self.driver.type_keys(&input, "^a{DELETE}")?;
        self.driver.type_keys(&input, candidate)?;
        self.driver.type_keys(&input, "{ENTER}")?;
        Ok(())
    }

    /// Clicking the challenge image regenerates it.
    fn refresh(&self) -> anyhow::Result<()> {
        let image = self
            .driver
            .find_control(&self.config.controls.challenge_image)?;
        self.driver.click(&image)
    }

    /// Best-effort cancel of the host dialog on the way out.
    fn cancel_dialog(&self) {
        let result = self
            .driver
            .find_control(&self.config.controls.challenge_cancel)
            .and_then(|cancel| self.driver.click(&cancel));
        if let Err(e) = result {
            crate::log(&format!("Could not cancel challenge dialog: {}", e));
        }
    }
}

fn wait_ms(ms: u64) {
    if ms > 0 {
        std::thread::sleep(Duration::from_millis(ms));
    }
}
