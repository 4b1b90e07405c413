//! Error type shared by every fallible operation in the crate.

use thiserror::Error;

/// Result alias for fallible POVM operations.
pub type PovmResult<T> = Result<T, PovmError>;

/// Failure modes of the measurement, sampling, and estimation routines.
///
/// None of these are recovered from internally; they are propagated to the
/// caller as soon as they are detected.
#[derive(Debug, Error)]
pub enum PovmError {
    /// Site counts, Hilbert space dimensions, or leg counts disagree.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// A quantity that must be real, zero, one, or consistent with the
    /// Cauchy-Schwarz inequality deviates by more than the tolerance.
    #[error("numerical tolerance violated: {what} (deviation {dev:e}, eps {eps:e})")]
    Tolerance {
        what: &'static str,
        dev: f64,
        eps: f64,
    },

    /// Samples from one POVM cannot be converted to counts for another,
    /// either because the matching elements do not sum to a multiple of the
    /// identity or because a required outcome is not matched at all.
    #[error("samples cannot be converted to the requested outcomes")]
    Unconvertible,

    /// Unrecognized state representation.
    #[error("unknown state mode {0:?}")]
    UnknownMode(String),

    /// Unrecognized sampling method.
    #[error("unknown sampling method {0:?}")]
    UnknownMethod(String),

    /// Any other violated precondition.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl PovmError {
    pub(crate) fn shape<S: Into<String>>(msg: S) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Fail with [`PovmError::Tolerance`] unless `dev <= eps`.
pub(crate) fn check_tol(what: &'static str, dev: f64, eps: f64)
    -> PovmResult<()>
{
    // written so that a NaN deviation fails too
    if dev <= eps {
        Ok(())
    } else {
        Err(PovmError::Tolerance { what, dev, eps })
    }
}
