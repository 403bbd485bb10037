//! Error types for the particle filter and its I/O helpers.
//!
//! Structural precondition violations (calling the filter before it is initialized, an empty
//! particle population) and malformed inputs (negative standard deviations, a negative sensor
//! range, a non-positive time step) are reported as [FilterError] values. Numeric degeneracies
//! that are local to a single particle, such as an observation with no landmark in range, are not
//! errors; the filter resolves them in place.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("particle filter has not been initialized")]
    NotInitialized,

    #[error("particle filter has already been initialized")]
    AlreadyInitialized,

    #[error("number of particles must be positive, got {0}")]
    InvalidParticleCount(usize),

    #[error("standard deviation `{name}` must be finite and non-negative, got {value}")]
    InvalidStandardDeviation { name: &'static str, value: f64 },

    #[error("measurement standard deviation `{name}` must be finite and positive, got {value}")]
    DegenerateMeasurementNoise { name: &'static str, value: f64 },

    #[error("sensor range must be finite and non-negative, got {0}")]
    InvalidSensorRange(f64),

    #[error("time step must be finite and positive, got {0}")]
    InvalidTimeStep(f64),

    #[error("association sequences differ in length (ids: {ids}, sense_x: {sense_x}, sense_y: {sense_y})")]
    AssociationLengthMismatch {
        ids: usize,
        sense_x: usize,
        sense_y: usize,
    },

    #[error("expected {expected} particle weights, got {got}")]
    WeightCountMismatch { expected: usize, got: usize },

    #[error("particle index {index} is out of range for {len} particles")]
    ParticleIndexOutOfRange { index: usize, len: usize },

    #[error("duplicate landmark id {0} in map")]
    DuplicateLandmark(i32),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, FilterError>;

/// Reject standard deviations that are negative or not finite.
pub(crate) fn check_std(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidStandardDeviation { name, value })
    }
}
