//! Ensemble recognition of challenge bitmaps.
//!
//! One recognition pass fans the (already captured and optionally
//! prescaled) challenge image through every preprocessing method, runs
//! the engine on each output, cleans the raw text into length-4
//! candidates, and lets the candidates vote.

pub mod candidate;
pub mod engine;
pub mod preprocess;

pub use candidate::{CODE_LEN, extract_candidate, most_common, vote};
pub use engine::{EngineMode, OcrEngine, OcrError, TesseractEngine};
pub use preprocess::{SWEEP_THRESHOLDS, VariantKind, prescale, to_gray, variants};

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// A length-4 guess tagged with the preprocessing method that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub method: &'static str,
    pub code: String,
}

/// What the threshold sweep does with its per-threshold results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepPolicy {
    /// The sweep majority-votes privately and contributes one candidate
    /// to the ensemble.
    InnerVote,
    /// Every threshold result joins the ensemble vote directly.
    Flatten,
}

/// Runs one full recognition pass and returns the accepted candidates.
///
/// Per-method failures (preprocessing errors, recognition errors, text
/// that doesn't clean to four characters) are isolated: they contribute
/// no candidate and the pass continues. The one exception is
/// [`OcrError::EngineUnavailable`], which aborts the pass and propagates.
pub fn recognition_pass<E: OcrEngine + ?Sized>(
    src: &GrayImage,
    engine: &E,
    whitelist: &str,
    sweep_policy: SweepPolicy,
) -> Result<Vec<Candidate>, OcrError> {
    let mut candidates = Vec::new();

    for (kind, result) in variants(src) {
        let images = match result {
            Ok(images) => images,
            Err(e) => {
                crate::log(&format!("Method {} failed: {}", kind.name(), e));
                continue;
            }
        };

        let mut method_codes = Vec::new();
        for img in &images {
            let raw = match engine.recognize(img, whitelist, kind.mode()) {
                Ok(text) => text,
                Err(e @ OcrError::EngineUnavailable(_)) => return Err(e),
                Err(e) => {
                    crate::log(&format!("Method {} recognition failed: {}", kind.name(), e));
                    continue;
                }
            };
            if let Some(code) = extract_candidate(&raw) {
                method_codes.push(code);
            }
        }

        match (kind, sweep_policy) {
            (VariantKind::ThresholdSweep, SweepPolicy::InnerVote) => {
                // The sweep settles on one result internally before
                // joining the ensemble.
                let winner = most_common(method_codes);
                if !winner.is_empty() {
                    crate::log(&format!("Method {} candidate: {}", kind.name(), winner));
                    candidates.push(Candidate {
                        method: kind.name(),
                        code: winner,
                    });
                }
            }
            _ => {
                for code in method_codes {
                    crate::log(&format!("Method {} candidate: {}", kind.name(), code));
                    candidates.push(Candidate {
                        method: kind.name(),
                        code,
                    });
                }
            }
        }
    }

    Ok(candidates)
}

/// Recognizes a challenge image: recognition pass + ensemble vote.
///
/// Returns the empty string when no method produced a usable candidate;
/// the caller treats that as a failed pass and spends a retry on it.
pub fn recognize_challenge<E: OcrEngine + ?Sized>(
    src: &GrayImage,
    engine: &E,
    whitelist: &str,
    sweep_policy: SweepPolicy,
) -> Result<String, OcrError> {
    let candidates = recognition_pass(src, engine, whitelist, sweep_policy)?;
    let codes: Vec<String> = candidates.iter().map(|c| c.code.clone()).collect();
    let winner = vote(&codes);
    crate::log(&format!(
        "Ensemble result: '{}' from {} candidates",
        winner,
        codes.len()
    ));
    Ok(winner)
}
