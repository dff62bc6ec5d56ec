//! Public error types for extraction.

use thiserror::Error;

/// Definitive failures surfaced to the caller of
/// [`GridExtractor::extract`](crate::grid::GridExtractor::extract).
///
/// Transient per-attempt conditions (an empty or malformed recognition
/// candidate, a presence check landing near its timeout) are absorbed by
/// the retry loops and never appear here.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The challenge attempt budget ran out without a successful solve.
    #[error("challenge not solved after {attempts} attempts")]
    ChallengeExhausted { attempts: u32 },

    /// No control matched the grid selector or its class fallback.
    #[error("grid control not found")]
    GridNotFound,

    /// The save dialog never appeared, even after re-issuing the export.
    #[error("save dialog not detected")]
    SaveDialogNotFound,

    /// The exported file never materialized within the polling budget.
    #[error("export file never appeared: {path}")]
    ExportFileMissing { path: String },

    /// The OCR engine binary could not be invoked at all.
    #[error("OCR engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The export completed but produced nothing to parse.
    #[error("export produced an empty payload")]
    EmptyPayload,

    /// Configuration requested manual challenge entry; the caller owns
    /// the input channel and must collect the code itself.
    #[error("manual challenge input required")]
    ManualInputRequired,

    /// Any other collaborator failure (UI driver, parser, filesystem).
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
