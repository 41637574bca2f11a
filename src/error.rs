//! Error taxonomy for binding construction and invocation
//!
//! Construction-time errors abort binding of a single function or closure;
//! the affected entry point records the error and replays it on every call.
//! Call-time errors propagate to the caller of that one invocation.

use std::fmt;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, BindError>;

/// Binding and invocation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Logical type has no native mapping
    UnsupportedType(String),
    /// No invocation strategy accepted the signature
    UnsupportedSignature(String),
    /// Text could not be encoded or decoded
    EncodingError(String),
    /// Native integer has no matching enum constant
    UnknownEnumValue { enum_name: String, value: i64 },
    /// Symbol lookup failed for a function or variable
    SymbolNotFound(String),
    /// Page allocator returned no usable memory
    NativeMemoryExhausted { requested_bytes: usize },
    /// Converter received a value of the wrong runtime shape
    TypeMismatch { expected: String, found: String },
    /// Call supplied the wrong number of arguments
    ArgCountMismatch { expected: usize, found: usize },
    /// Configuration could not be parsed or validated
    InvalidConfig(String),
}

impl BindError {
    /// Errors raised while building a binding rather than while calling it
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedType(_)
                | Self::UnsupportedSignature(_)
                | Self::SymbolNotFound(_)
                | Self::NativeMemoryExhausted { .. }
                | Self::InvalidConfig(_)
        )
    }

    pub(crate) fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedType(ty) => write!(f, "Unsupported type: {}", ty),
            Self::UnsupportedSignature(sig) => write!(f, "Unsupported signature: {}", sig),
            Self::EncodingError(msg) => write!(f, "Encoding error: {}", msg),
            Self::UnknownEnumValue { enum_name, value } => {
                write!(f, "No constant of {} maps to native value {}", enum_name, value)
            }
            Self::SymbolNotFound(name) => write!(f, "Symbol not found: {}", name),
            Self::NativeMemoryExhausted { requested_bytes } => {
                write!(f, "Native memory exhausted allocating {} bytes", requested_bytes)
            }
            Self::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            Self::ArgCountMismatch { expected, found } => {
                write!(f, "Argument count mismatch: expected {}, found {}", expected, found)
            }
            Self::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for BindError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construction_classification() {
        assert!(BindError::UnsupportedType("Vec".into()).is_construction_error());
        assert!(BindError::SymbolNotFound("foo".into()).is_construction_error());
        assert!(BindError::NativeMemoryExhausted { requested_bytes: 4096 }.is_construction_error());
        assert!(!BindError::EncodingError("bad".into()).is_construction_error());
        assert!(!BindError::mismatch("Int", "Text").is_construction_error());
        assert!(!BindError::UnknownEnumValue { enum_name: "Color".into(), value: 9 }
            .is_construction_error());
    }

    #[test]
    fn test_display() {
        let err = BindError::UnknownEnumValue { enum_name: "Color".into(), value: 9 };
        assert_eq!(err.to_string(), "No constant of Color maps to native value 9");
        let err = BindError::ArgCountMismatch { expected: 2, found: 3 };
        assert_eq!(err.to_string(), "Argument count mismatch: expected 2, found 3");
    }
}
