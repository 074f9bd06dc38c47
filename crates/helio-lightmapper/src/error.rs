use thiserror::Error;

use crate::context::BakeState;

/// Errors reported by the lightmapper.
///
/// `InvalidGeometry`, `InvalidTarget` and `InvalidConfiguration` are fatal at
/// setup time. `OutOfSequence` is returned for calls made in the wrong state;
/// the context ignores them and stays usable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BakeError {
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Out of sequence call: expected {expected:?}, context is {actual:?}")]
    OutOfSequence {
        expected: BakeState,
        actual: BakeState,
    },
}

impl BakeError {
    /// Whether a context that returned this from `submit` is still usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BakeError::OutOfSequence { .. } | BakeError::InvalidTarget(_))
    }
}
