//! Tagged error support for the typed error channel.

use std::error::Error as StdError;
use std::fmt;

/// A closed error sum whose variants carry a discriminating tag.
///
/// `catch_tag` / `catch_tags` match on the tag to recover from an enumerable
/// subset of failures while re-raising everything else unchanged. Implement
/// this on the error enum itself so dispatch stays a plain `match`, never
/// runtime reflection.
///
/// # Examples
///
/// ```
/// use millrace::TaggedError;
///
/// #[derive(Debug)]
/// enum AppError {
///     Parse(String),
///     Request(u16),
/// }
///
/// impl TaggedError for AppError {
///     fn tag(&self) -> &'static str {
///         match self {
///             AppError::Parse(_) => "ParseError",
///             AppError::Request(_) => "RequestError",
///         }
///     }
/// }
/// ```
pub trait TaggedError {
    /// The tag discriminating this error value.
    fn tag(&self) -> &'static str;
}

/// Catch-all error for external failures with no anticipated type.
///
/// Produced by [`Effect::try_promise`](crate::Effect::try_promise), the
/// one-argument async bridge: whatever the external call failed with is
/// rendered into a message and carried under the single `"UnknownError"` tag.
/// Convert to a domain error with `map_err` as early as possible so that
/// downstream code can match on a closed set of conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownError {
    message: String,
}

impl UnknownError {
    /// Wrap an external failure's rendering.
    pub fn new(message: impl Into<String>) -> Self {
        UnknownError {
            message: message.into(),
        }
    }

    /// The rendered message of the underlying failure.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for UnknownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown error: {}", self.message)
    }
}

impl StdError for UnknownError {}

impl TaggedError for UnknownError {
    fn tag(&self) -> &'static str {
        "UnknownError"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_message() {
        let err = UnknownError::new("connection reset");
        assert_eq!(format!("{err}"), "unknown error: connection reset");
    }

    #[test]
    fn tag_is_fixed() {
        assert_eq!(UnknownError::new("x").tag(), "UnknownError");
    }
}
