//! Structured failure values.
//!
//! A [`Cause`] describes *why* an effect stopped, preserving the full shape of
//! the failure rather than collapsing it into a single error value. The three
//! leaf kinds are kept strictly apart:
//!
//! - [`Cause::Fail`] - an expected, statically typed failure. This is the only
//!   kind visible through the ordinary error channel (`catch_all`, `map_err`).
//! - [`Cause::Die`] - an unexpected defect (typically a caught panic). Defects
//!   sail past ordinary error handlers and can only be observed through
//!   cause-aware operators.
//! - [`Cause::Interrupt`] - a cancellation signal, not a domain failure.
//!
//! Causes compose: a failure that happens *after* another (a finalizer dying
//! during cleanup of an earlier failure) combines with [`Cause::Sequential`];
//! two sibling fibers failing independently combine with [`Cause::Parallel`].
//!
//! # Examples
//!
//! ```
//! use millrace::Cause;
//!
//! let cause: Cause<String> = Cause::fail("boom".to_string());
//! assert_eq!(cause.failure_option(), Some(&"boom".to_string()));
//! assert!(!cause.is_interrupted());
//! ```

use std::any::Any;
use std::fmt;

use crate::fiber::FiberId;

/// An unexpected, untyped failure.
///
/// Defects carry an opaque payload (usually the payload of a caught panic)
/// plus a best-effort human-readable message extracted from it. They are
/// deliberately *not* part of the typed error channel: a defect signals a
/// programming bug, not a recoverable domain condition.
pub struct Defect {
    message: String,
    payload: Option<Box<dyn Any + Send>>,
}

impl Defect {
    /// Create a defect from a message, with no payload.
    pub fn new(message: impl Into<String>) -> Self {
        Defect {
            message: message.into(),
            payload: None,
        }
    }

    /// Create a defect from a caught panic payload.
    ///
    /// Extracts the message for `&str` and `String` payloads; anything else
    /// renders as an opaque panic.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Defect {
            message,
            payload: Some(payload),
        }
    }

    /// The human-readable message for this defect.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying opaque payload, if one was captured.
    pub fn payload(&self) -> Option<&(dyn Any + Send)> {
        self.payload.as_deref()
    }
}

impl fmt::Debug for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Defect")
            .field("message", &self.message)
            .finish()
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A structured description of why an effect stopped.
///
/// See the [module documentation](self) for the taxonomy. `Cause` is a closed
/// sum matched exhaustively; there is no string-tag dispatch anywhere.
#[derive(Debug)]
pub enum Cause<E> {
    /// An expected failure carried on the typed error channel.
    Fail(E),
    /// An unexpected defect, opaque to the typed error channel.
    Die(Defect),
    /// The fiber with the given id was interrupted.
    Interrupt(FiberId),
    /// One failure happened causally after another.
    Sequential(Box<Cause<E>>, Box<Cause<E>>),
    /// Two failures happened concurrently in sibling fibers.
    Parallel(Box<Cause<E>>, Box<Cause<E>>),
}

impl<E> Cause<E> {
    /// An expected failure.
    pub fn fail(error: E) -> Self {
        Cause::Fail(error)
    }

    /// A defect.
    pub fn die(defect: Defect) -> Self {
        Cause::Die(defect)
    }

    /// Combine with a cause that happened after this one.
    pub fn then(self, later: Cause<E>) -> Self {
        Cause::Sequential(Box::new(self), Box::new(later))
    }

    /// Combine with a cause that happened concurrently with this one.
    pub fn both(self, other: Cause<E>) -> Self {
        Cause::Parallel(Box::new(self), Box::new(other))
    }

    /// The first expected failure in this cause, in pre-order.
    ///
    /// Returns `None` when the cause contains only defects and interruptions.
    pub fn failure_option(&self) -> Option<&E> {
        match self {
            Cause::Fail(e) => Some(e),
            Cause::Die(_) | Cause::Interrupt(_) => None,
            Cause::Sequential(a, b) | Cause::Parallel(a, b) => {
                a.failure_option().or_else(|| b.failure_option())
            }
        }
    }

    /// The first defect in this cause, in pre-order.
    pub fn defect_option(&self) -> Option<&Defect> {
        match self {
            Cause::Die(d) => Some(d),
            Cause::Fail(_) | Cause::Interrupt(_) => None,
            Cause::Sequential(a, b) | Cause::Parallel(a, b) => {
                a.defect_option().or_else(|| b.defect_option())
            }
        }
    }

    /// Whether this cause contains an expected failure anywhere.
    pub fn is_failure(&self) -> bool {
        self.failure_option().is_some()
    }

    /// Whether this cause contains a defect anywhere.
    pub fn is_die(&self) -> bool {
        self.defect_option().is_some()
    }

    /// Whether this cause contains an interruption anywhere.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Cause::Interrupt(_) => true,
            Cause::Fail(_) | Cause::Die(_) => false,
            Cause::Sequential(a, b) | Cause::Parallel(a, b) => {
                a.is_interrupted() || b.is_interrupted()
            }
        }
    }

    /// Transform every expected failure in this cause.
    pub fn map<E2, F>(self, f: F) -> Cause<E2>
    where
        F: Fn(E) -> E2,
    {
        fn go<E, E2, F: Fn(E) -> E2>(cause: Cause<E>, f: &F) -> Cause<E2> {
            match cause {
                Cause::Fail(e) => Cause::Fail(f(e)),
                Cause::Die(d) => Cause::Die(d),
                Cause::Interrupt(id) => Cause::Interrupt(id),
                Cause::Sequential(a, b) => {
                    Cause::Sequential(Box::new(go(*a, f)), Box::new(go(*b, f)))
                }
                Cause::Parallel(a, b) => {
                    Cause::Parallel(Box::new(go(*a, f)), Box::new(go(*b, f)))
                }
            }
        }
        go(self, &f)
    }
}

impl<E: fmt::Debug> Cause<E> {
    /// Render this cause as an indented, human-readable tree.
    ///
    /// Used for diagnostic output: each leaf shows its kind (`Fail`, `Die`,
    /// `Interrupt`) and payload, and composite causes show their nesting.
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::Cause;
    ///
    /// let cause: Cause<&str> = Cause::fail("one").then(Cause::fail("two"));
    /// let rendered = cause.pretty();
    /// assert!(rendered.contains("Sequential:"));
    /// assert!(rendered.contains("Fail: \"one\""));
    /// ```
    pub fn pretty(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, 0);
        out
    }

    fn render(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        match self {
            Cause::Fail(e) => out.push_str(&format!("{pad}Fail: {e:?}")),
            Cause::Die(d) => out.push_str(&format!("{pad}Die: {}", d.message())),
            Cause::Interrupt(id) => out.push_str(&format!("{pad}Interrupt: fiber {id}")),
            Cause::Sequential(a, b) => {
                out.push_str(&format!("{pad}Sequential:\n"));
                a.render(out, depth + 1);
                out.push('\n');
                b.render(out, depth + 1);
            }
            Cause::Parallel(a, b) => {
                out.push_str(&format!("{pad}Parallel:\n"));
                a.render(out, depth + 1);
                out.push('\n');
                b.render(out, depth + 1);
            }
        }
    }
}

impl<E: fmt::Debug> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_option_finds_first_fail() {
        let cause: Cause<i32> = Cause::die(Defect::new("bug")).then(Cause::fail(7));
        assert_eq!(cause.failure_option(), Some(&7));
    }

    #[test]
    fn failure_option_none_for_defect_only() {
        let cause: Cause<i32> = Cause::die(Defect::new("bug"));
        assert_eq!(cause.failure_option(), None);
        assert!(cause.is_die());
        assert!(!cause.is_failure());
    }

    #[test]
    fn interrupt_detected_through_nesting() {
        let cause: Cause<i32> =
            Cause::fail(1).both(Cause::Interrupt(FiberId::test_value(3)));
        assert!(cause.is_interrupted());
    }

    #[test]
    fn map_transforms_all_failures() {
        let cause: Cause<i32> = Cause::fail(1).then(Cause::fail(2));
        let mapped = cause.map(|n| n * 10);
        match mapped {
            Cause::Sequential(a, b) => {
                assert_eq!(a.failure_option(), Some(&10));
                assert_eq!(b.failure_option(), Some(&20));
            }
            other => panic!("expected Sequential, got {other:?}"),
        }
    }

    #[test]
    fn pretty_renders_kind_and_structure() {
        let cause: Cause<&str> = Cause::fail("parse")
            .then(Cause::die(Defect::new("cleanup panicked")));
        let rendered = cause.pretty();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "Sequential:");
        assert_eq!(lines[1], "  Fail: \"parse\"");
        assert_eq!(lines[2], "  Die: cleanup panicked");
    }

    #[test]
    fn pretty_distinguishes_interrupt_from_die() {
        let cause: Cause<&str> = Cause::Interrupt(FiberId::test_value(4));
        assert_eq!(cause.pretty(), "Interrupt: fiber #4");
        let cause: Cause<&str> = Cause::die(Defect::new("oops"));
        assert_eq!(cause.pretty(), "Die: oops");
    }

    #[test]
    fn defect_from_panic_extracts_str_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("index out of bounds");
        let defect = Defect::from_panic(payload);
        assert_eq!(defect.message(), "index out of bounds");
        assert!(defect.payload().is_some());
    }

    #[test]
    fn defect_from_panic_handles_opaque_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new(42u8);
        let defect = Defect::from_panic(payload);
        assert_eq!(defect.message(), "panic with non-string payload");
    }
}
