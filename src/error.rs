use thiserror::Error;

pub type MagResult<T> = Result<T, MagError>;

/// Errors surfaced by the evaluation engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MagError {
    /// Input outside the mathematically valid range (angles, degrees, non-finite values).
    #[error("Domain error: {message}")]
    Domain { message: String },

    /// The Legendre table does not reach the degree of the coefficients being synthesized.
    #[error(
        "Degree mismatch: coefficients of degree {required} but Legendre table of degree {available}"
    )]
    DegreeMismatch { required: usize, available: usize },

    /// Coefficient or apex data not supplied, or not covering the requested time.
    #[error("Missing model data: {message}")]
    MissingModel { message: String },

    /// Malformed coefficient structure handed over by a loader.
    #[error("Invalid model: {message}")]
    InvalidModel { message: String },
}

impl MagError {
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
        }
    }

    pub fn missing_model(message: impl Into<String>) -> Self {
        Self::MissingModel {
            message: message.into(),
        }
    }

    pub fn invalid_model(message: impl Into<String>) -> Self {
        Self::InvalidModel {
            message: message.into(),
        }
    }

    pub fn degree_mismatch(required: usize, available: usize) -> Self {
        Self::DegreeMismatch {
            required,
            available,
        }
    }
}

/// Rejects NaN and infinities with a `Domain` error naming the offending quantity.
pub(crate) fn ensure_finite(name: &str, value: f64) -> MagResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MagError::domain(format!("{name} must be finite, got {value}")))
    }
}
