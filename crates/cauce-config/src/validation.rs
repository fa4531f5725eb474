//! Range and consistency checks for [`Settings`](crate::Settings).

use thiserror::Error;

use crate::settings::ClockSettings;

/// Highest graph rate accepted.
pub const MAX_RATE: u32 = 768_000;

/// Largest quantum accepted.
pub const MAX_QUANTUM: u32 = 65536;

/// Validation error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A numeric setting is out of range.
    #[error("'{field}' value {value} out of range [{min}, {max}]")]
    OutOfRange {
        /// Dotted setting name.
        field: &'static str,
        /// The offending value.
        value: u64,
        /// Minimum allowed value.
        min: u64,
        /// Maximum allowed value.
        max: u64,
    },

    /// The quantum bounds are inconsistent.
    #[error("quantum {quantum} must lie within [{min_quantum}, {max_quantum}]")]
    QuantumBounds {
        /// Configured quantum.
        quantum: u32,
        /// Configured lower bound.
        min_quantum: u32,
        /// Configured upper bound.
        max_quantum: u32,
    },

    /// The CPU flag override does not parse.
    #[error("unknown cpu flags: {0}")]
    InvalidCpuFlags(String),

    /// Multiple validation errors.
    #[error("multiple validation errors: {}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Create an out of range error.
    pub fn out_of_range(field: &'static str, value: u64, min: u64, max: u64) -> Self {
        ValidationError::OutOfRange {
            field,
            value,
            min,
            max,
        }
    }
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Folds a list of problems into a single result.
pub(crate) fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

pub(crate) fn check_clock(clock: &ClockSettings, errors: &mut Vec<ValidationError>) {
    if clock.rate == 0 || clock.rate > MAX_RATE {
        errors.push(ValidationError::out_of_range(
            "clock.rate",
            u64::from(clock.rate),
            1,
            u64::from(MAX_RATE),
        ));
    }
    for (field, value) in [
        ("clock.min_quantum", clock.min_quantum),
        ("clock.max_quantum", clock.max_quantum),
    ] {
        if value == 0 || value > MAX_QUANTUM {
            errors.push(ValidationError::out_of_range(
                field,
                u64::from(value),
                1,
                u64::from(MAX_QUANTUM),
            ));
        }
    }
    if clock.min_quantum > clock.max_quantum
        || clock.quantum < clock.min_quantum
        || clock.quantum > clock.max_quantum
    {
        errors.push(ValidationError::QuantumBounds {
            quantum: clock.quantum,
            min_quantum: clock.min_quantum,
            max_quantum: clock.max_quantum,
        });
    }
}
