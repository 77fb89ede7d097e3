//! Error types for the CDC pipeline.

use thiserror::Error;

/// A raw record could not be turned into a change envelope.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Record bytes are not UTF-8 text
    #[error("Record is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// Record text is not well-formed JSON
    #[error("Malformed JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A JSON object was expected at the given location
    #[error("Expected a JSON object at '{0}'")]
    NotAnObject(&'static str),

    /// Change payload carries no `op` field
    #[error("Change payload has no 'op' field")]
    MissingOperation,

    /// `op` is present but not a string
    #[error("Change payload 'op' must be a string, got {0}")]
    InvalidOperation(String),

    /// The image the operation depends on is null or absent
    #[error("CDC {op} operation requires a non-null '{image}' image")]
    MissingImage { op: String, image: &'static str },
}

/// A decoded envelope could not be handled.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The image needed for this operation is absent
    #[error("CDC envelope has no '{0}' image")]
    MissingImage(&'static str),

    /// Structural mapping of the image into an event record failed
    #[error("Failed to map '{image}' image to event record: {source}")]
    Mapping {
        image: &'static str,
        source: serde_json::Error,
    },

    /// Update handling is switched to the self-test policy
    #[error("Update rejected: update handling is in dead-letter self-test mode")]
    UpdateRejected,

    /// A change handler returned an error
    #[error("Change handler failed: {0}")]
    Handler(#[from] anyhow::Error),
}

/// Per-record failure raised by the batch walker.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl RecordError {
    /// Short label used for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RecordError::Decode(_) => "decode",
            RecordError::Dispatch(_) => "dispatch",
        }
    }
}

/// Republishing a failed record to its dead-letter topic did not succeed.
///
/// There is no fallback for this error: the batch holding the record must not
/// be committed.
#[derive(Error, Debug)]
pub enum RouterPublishError {
    #[error(
        "Failed to publish dead letter for {topic}[{partition}]@{offset} to {dlt_topic}: {reason}"
    )]
    Publish {
        dlt_topic: String,
        topic: String,
        partition: i32,
        offset: i64,
        reason: String,
    },

    #[error("Failure signal position {0} is outside the batch")]
    UnknownPosition(usize),

    #[error("Dead-letter routing aborted: {0}")]
    Aborted(String),
}
