//! Error types for Persona Flux

use thiserror::Error;

/// Errors that can occur inside the classifier or at its collaborator seams.
///
/// None of these escape the tracker's event handlers: collaborator failures are
/// logged and swallowed there. They surface only from the replay pipeline, the
/// configuration loaders and the collaborator traits themselves.
#[derive(Debug, Error)]
pub enum PersonaError {
    #[error("Failed to parse recorded session: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage unavailable: {0}")]
    StorageError(String),

    #[error("Transport failed: {0}")]
    TransportError(String),

    #[error("Variant fetch failed: {0}")]
    VariantFetchError(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Invalid recorded event at index {index}: {reason}")]
    InvalidEvent { index: usize, reason: String },
}
