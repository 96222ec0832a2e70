use thiserror::Error;

/// Errors surfaced by the archive's search and add flows
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The recording has neither audio to upload nor a media location
    #[error("Recording has no media location")]
    MissingMediaLocation,

    /// Uploading the audio to object storage failed; nothing was inserted
    #[error("Failed to upload audio: {0:#}")]
    Upload(anyhow::Error),

    /// The store rejected or failed the query/insert
    #[error("Store error: {0:#}")]
    Store(anyhow::Error),
}

impl ArchiveError {
    /// Stable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            ArchiveError::MissingMediaLocation => "MISSING_MEDIA",
            ArchiveError::Upload(_) => "UPLOAD_ERROR",
            ArchiveError::Store(_) => "STORE_ERROR",
        }
    }
}
