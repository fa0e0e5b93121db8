use std::fmt;

/// Result type for policy and training operations
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Main error type for the crate
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// Invalid dimensions for operations
    DimensionMismatch {
        expected: String,
        actual: String,
    },

    /// Invalid parameter value
    InvalidParameter {
        name: String,
        reason: String,
    },

    /// IO errors (file operations)
    IoError(String),

    /// Serialization/deserialization errors
    SerializationError(String),

    /// Non-finite values showed up in a loss or gradient
    NumericalError(String),

    /// Empty batch or rollout
    EmptyBuffer(String),

    /// Discrete action outside the action space
    InvalidAction {
        action: usize,
        max_actions: usize,
    },

    /// Training error
    TrainingError(String),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::DimensionMismatch { expected, actual } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, actual)
            }
            PolicyError::InvalidParameter { name, reason } => {
                write!(f, "Invalid parameter '{}': {}", name, reason)
            }
            PolicyError::IoError(msg) => write!(f, "IO error: {}", msg),
            PolicyError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            PolicyError::NumericalError(msg) => write!(f, "Numerical error: {}", msg),
            PolicyError::EmptyBuffer(msg) => write!(f, "Empty buffer: {}", msg),
            PolicyError::InvalidAction { action, max_actions } => {
                write!(f, "Invalid action {}: must be less than {}", action, max_actions)
            }
            PolicyError::TrainingError(msg) => write!(f, "Training error: {}", msg),
        }
    }
}

impl std::error::Error for PolicyError {}

impl From<std::io::Error> for PolicyError {
    fn from(err: std::io::Error) -> Self {
        PolicyError::IoError(err.to_string())
    }
}

impl From<bincode::Error> for PolicyError {
    fn from(err: bincode::Error) -> Self {
        PolicyError::SerializationError(err.to_string())
    }
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::SerializationError(err.to_string())
    }
}

impl PolicyError {
    pub fn dimension_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        PolicyError::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        PolicyError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Error for a `(rows, cols)` array that does not match the expected width
    pub(crate) fn width_mismatch(what: &str, expected: usize, actual: usize) -> Self {
        PolicyError::DimensionMismatch {
            expected: format!("{} with {} columns", what, expected),
            actual: format!("{} columns", actual),
        }
    }
}
