//! The effect computation description and its combinators.
//!
//! An [`Effect<A, E>`] is an immutable description of a deferred computation
//! with three channels: a success value `A`, a typed expected error `E`, and
//! service requirements resolved from the ambient [`Context`](crate::Context)
//! at run time. Nothing runs until the effect is handed to one of the run
//! entry points in [`crate::runtime`].
//!
//! # Building and composing
//!
//! ```
//! use millrace::{run_sync, Effect};
//!
//! fn divide(a: f64, b: f64) -> Effect<f64, String> {
//!     if b == 0.0 {
//!         Effect::fail("Cannot divide by zero".to_string())
//!     } else {
//!         Effect::succeed(a / b)
//!     }
//! }
//!
//! let effect = divide(1.0, 2.0).map(|x| x * 10.0);
//! assert_eq!(run_sync(effect).ok(), Some(5.0));
//! ```
//!
//! # Channels
//!
//! Expected failures travel on the typed error channel and are recoverable
//! with `catch_all` and friends. Defects (caught panics) and interruption are
//! *not* on that channel by design: they pass ordinary handlers untouched and
//! are reachable only through the cause-aware operators (`catch_all_cause`,
//! `tap_defect`). See [`crate::cause`].

mod combinators;
mod constructors;
mod error;
pub(crate) mod node;
#[cfg(test)]
mod tests;

use std::fmt;
use std::marker::PhantomData;

use node::Node;

pub use combinators::TagHandler;
pub use error::{TaggedError, UnknownError};

/// An immutable, composable description of a deferred computation.
///
/// `Effect<A, E>` succeeds with `A` or fails with a [`Cause<E>`]
/// (crate::Cause). Effects are lazy and single-shot: combinators return new
/// descriptions without running anything, and running consumes the effect.
///
/// The error type defaults to [`std::convert::Infallible`] for effects that
/// cannot fail expectedly.
pub struct Effect<A, E = std::convert::Infallible> {
    pub(crate) node: Node,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Effect<A, E> {
    pub(crate) fn from_node(node: Node) -> Self {
        Effect {
            node,
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for Effect<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect").field("node", &self.node).finish()
    }
}
