pub mod identity;
pub mod image;
pub mod rate_limit;
pub mod sanitizer;
pub mod text;

use thiserror::Error;

/// Why a validator refused its input.
///
/// `Security` rejections look the same to the client as `Invalid` ones but
/// indicate a likely abuse attempt and are logged at a higher level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Security(String),
}

impl Rejection {
    pub fn invalid(message: impl Into<String>) -> Self {
        Rejection::Invalid(message.into())
    }

    pub fn security(message: impl Into<String>) -> Self {
        Rejection::Security(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Rejection::Invalid(m) | Rejection::Security(m) => m,
        }
    }

    pub fn is_security(&self) -> bool {
        matches!(self, Rejection::Security(_))
    }

    /// Prefix the message, keeping the rejection kind.
    pub fn annotate(self, prefix: &str) -> Self {
        match self {
            Rejection::Invalid(m) => Rejection::Invalid(format!("{}: {}", prefix, m)),
            Rejection::Security(m) => Rejection::Security(format!("{}: {}", prefix, m)),
        }
    }
}

/// Uniform return shape of every validator: `Ok(())` when the input passes,
/// otherwise the first failing rule.
pub type ValidationResult = Result<(), Rejection>;
