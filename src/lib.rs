//! # Millrace
//!
//! > *"Channel the water, turn the wheel"*
//!
//! A Rust library for typed, fiber-based effect composition.
//!
//! ## Philosophy
//!
//! **Millrace** embodies the principle of **describe, then run**:
//! - **Mill** = The program (a pure, inspectable description of work)
//! - **Race** = The runtime (the channel that actually drives the water)
//!
//! An [`Effect<A, E>`] is an immutable value describing a computation that,
//! when run, succeeds with `A`, fails with a typed error `E`, and may read
//! services from an ambient [`Context`]. Building an effect does nothing;
//! handing it to [`run_sync`], [`run_promise`], or a [`Runtime`] does
//! everything.
//!
//! ## Quick Example
//!
//! ```rust
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
//! let program = divide(10.0, 2.0)
//!     .map(|x| x + 1.0)
//!     .or_else(|_| Effect::succeed(0.0));
//!
//! assert_eq!(run_sync(program).ok(), Some(6.0));
//! ```
//!
//! ## Concurrency
//!
//! Effects run on cooperative fibers. [`Effect::fork`] starts a supervised
//! child fiber and returns a [`FiberHandle`] for joining or interrupting it;
//! a parent that completes first interrupts its non-daemon children, so a
//! forked effect's side effects never outlive the scope that forked it unless
//! [`Effect::fork_daemon`] says so. Interruption is cooperative and safe:
//! finalizers registered with [`Effect::ensuring`] or
//! [`Effect::acquire_release`] always run.
//!
//! ## Failure model
//!
//! Failures are structured [`Cause`] trees, not bare errors. Expected,
//! recoverable failures (`Fail`) travel on the typed error channel; caught
//! panics (`Die`) and interruption (`Interrupt`) deliberately do not, so
//! broad `catch_all` handlers cannot mask bugs. The cause-aware operators
//! ([`Effect::catch_all_cause`], [`Effect::tap_defect`]) see everything.
//!
//! ## Dependency injection
//!
//! Services live in a [`Context`], keyed by identity [`Tag`]s.
//! [`Layer`] values describe, possibly effectfully, how to build services and
//! how they depend on each other; [`Layer::build`] resolves a whole graph
//! with memoization so shared services are constructed once.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cause;
pub mod context;
pub mod effect;
pub mod fiber;
pub mod layer;
pub mod runtime;

// Re-exports
pub use cause::{Cause, Defect};
pub use context::{Context, Tag};
pub use effect::{Effect, TagHandler, TaggedError, UnknownError};
pub use fiber::{FiberHandle, FiberId, FiberStatus};
pub use layer::{Layer, LayerError};
pub use runtime::{run_promise, run_sync, Runtime};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cause::{Cause, Defect};
    pub use crate::context::{Context, Tag};
    pub use crate::effect::{Effect, TaggedError, UnknownError};
    pub use crate::fiber::{FiberHandle, FiberStatus};
    pub use crate::layer::{Layer, LayerError};
    pub use crate::runtime::{run_promise, run_sync, Runtime};
}
