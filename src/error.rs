use std::sync::Arc;

/// Why a sound never became playable.
///
/// Cloneable so the same cause can be handed to every observer, including
/// ones registered after the failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("sound failed to load: {0:#}")]
pub struct LoadError(Arc<anyhow::Error>);

impl LoadError {
    pub fn new(cause: anyhow::Error) -> Self {
        Self(Arc::new(cause))
    }

    /// The underlying cause, with its full context chain.
    pub fn cause(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for LoadError {
    fn from(cause: anyhow::Error) -> Self {
        Self::new(cause)
    }
}
