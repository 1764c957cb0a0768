use thiserror::Error;

/// Control-surface errors returned by the registry
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    NotFound(String),
}

/// Failures reported by a pipeline before it starts streaming
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The source URL could not be turned into a playable stream URL
    #[error("resolve failed: {0}")]
    Resolve(String),

    /// The transcoder subprocess could not be launched
    #[error("transcoder failed to start: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("pipeline cancelled")]
    Cancelled,

    #[error("pipeline has no output")]
    NoOutput,
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("audio payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("event encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}
