//! Internal node representation of an effect.
//!
//! The public [`Effect`](super::Effect) type is a typed facade over this
//! type-erased tree. Erasure keeps the interpreter monomorphic (one loop for
//! every effect) while the facade's phantom types guarantee that every value
//! crossing the erased boundary downcasts back to the type it was boxed as.
//! A failed downcast is therefore an internal invariant breach and surfaces
//! as a defect, never as silent misbehavior.

use std::any::Any;

use crate::cause::{Cause, Defect};
use crate::context::Context;

/// Erased success value.
pub(crate) type AnyValue = Box<dyn Any + Send>;

/// Erased expected error.
pub(crate) type AnyError = Box<dyn Any + Send>;

/// Cause over the erased error channel.
pub(crate) type ErasedCause = Cause<AnyError>;

/// Final outcome of evaluating a node tree.
pub(crate) type Exit = Result<AnyValue, ErasedCause>;

/// Completion callback handed to an async registration.
pub(crate) type Callback = Box<dyn FnOnce(Exit) + Send>;

/// Success continuation of a bind.
pub(crate) type ContinueFn = Box<dyn FnOnce(AnyValue) -> Node + Send>;

/// Failure continuation of the error-channel bind.
pub(crate) type RecoverFn = Box<dyn FnOnce(ErasedCause) -> Node + Send>;

/// Continuation receiving a full exit. Internal to finalizer resumption.
pub(crate) type OnExitFn = Box<dyn FnOnce(Exit) -> Node + Send>;

/// One immutable node in an effect tree.
///
/// The tree is acyclic and never mutated after construction; combinators
/// always wrap, never rewrite.
pub(crate) enum Node {
    /// Pure success value.
    Succeed(AnyValue),
    /// Failure with a full cause (expected error, defect, or interruption).
    Fail(ErasedCause),
    /// Synchronous thunk; panics are caught and become defects.
    Sync(Box<dyn FnOnce() -> Exit + Send>),
    /// External asynchronous work. The registration receives a one-shot
    /// callback that resumes the suspended fiber.
    Async(Box<dyn FnOnce(Callback) + Send>),
    /// Sequence: feed the inner node's success into a continuation.
    FlatMap(Box<Node>, ContinueFn),
    /// Error-channel dual of `FlatMap`: feed the inner node's cause into a
    /// recovery continuation. Skipped while the fiber is interrupting.
    Catch(Box<Node>, RecoverFn),
    /// Run the inner node, then the finalizer on any exit, exactly once.
    Ensuring(Box<Node>, Box<Node>),
    /// Internal: resume with the inner node's full exit. Unlike `Catch`,
    /// never skipped; carries finalizer bookkeeping through interruption.
    OnExit(Box<Node>, OnExitFn),
    /// Read the ambient context.
    Access(Box<dyn FnOnce(&Context) -> Node + Send>),
    /// Run the inner node with extra context entries layered on top.
    Provide(Box<Node>, Context),
    /// Start the inner node on a new fiber; `true` forks a daemon bound to
    /// the root scope instead of the current fiber.
    Fork(Box<Node>, bool),
    /// Run the inner node with interruptibility set to the flag.
    Interruptible(Box<Node>, bool),
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Node::Succeed(_) => "Succeed",
            Node::Fail(_) => "Fail",
            Node::Sync(_) => "Sync",
            Node::Async(_) => "Async",
            Node::FlatMap(..) => "FlatMap",
            Node::Catch(..) => "Catch",
            Node::Ensuring(..) => "Ensuring",
            Node::OnExit(..) => "OnExit",
            Node::Access(_) => "Access",
            Node::Provide(..) => "Provide",
            Node::Fork(..) => "Fork",
            Node::Interruptible(..) => "Interruptible",
        };
        write!(f, "{name}")
    }
}

/// Box a success value for the erased channel.
pub(crate) fn boxed_value<A: Send + 'static>(value: A) -> AnyValue {
    Box::new(value)
}

/// The erased unit value.
pub(crate) fn unit_value() -> AnyValue {
    Box::new(())
}

/// Recover a typed value from the erased success channel.
pub(crate) fn downcast_value<A: Send + 'static>(value: AnyValue) -> Result<A, ErasedCause> {
    value.downcast::<A>().map(|b| *b).map_err(|_| {
        Cause::die(Defect::new(
            "internal invariant breach: success channel held an unexpected type",
        ))
    })
}

/// Recover a typed error from the erased failure channel.
pub(crate) fn downcast_error<E: Send + 'static>(error: AnyError) -> Result<E, ErasedCause> {
    error.downcast::<E>().map(|b| *b).map_err(|_| {
        Cause::die(Defect::new(
            "internal invariant breach: error channel held an unexpected type",
        ))
    })
}

/// Erase a typed cause for the internal channel.
pub(crate) fn erase_cause<E: Send + 'static>(cause: Cause<E>) -> ErasedCause {
    match cause {
        Cause::Fail(e) => Cause::Fail(Box::new(e) as AnyError),
        Cause::Die(d) => Cause::Die(d),
        Cause::Interrupt(id) => Cause::Interrupt(id),
        Cause::Sequential(a, b) => {
            Cause::Sequential(Box::new(erase_cause(*a)), Box::new(erase_cause(*b)))
        }
        Cause::Parallel(a, b) => {
            Cause::Parallel(Box::new(erase_cause(*a)), Box::new(erase_cause(*b)))
        }
    }
}

/// Rebuild a typed cause at the run boundary. An erased failure that does not
/// hold `E` becomes a defect.
pub(crate) fn reify_cause<E: Send + 'static>(cause: ErasedCause) -> Cause<E> {
    match cause {
        Cause::Fail(any) => match any.downcast::<E>() {
            Ok(e) => Cause::Fail(*e),
            Err(_) => Cause::die(Defect::new(
                "internal invariant breach: error channel held an unexpected type",
            )),
        },
        Cause::Die(d) => Cause::Die(d),
        Cause::Interrupt(id) => Cause::Interrupt(id),
        Cause::Sequential(a, b) => {
            Cause::Sequential(Box::new(reify_cause(*a)), Box::new(reify_cause(*b)))
        }
        Cause::Parallel(a, b) => {
            Cause::Parallel(Box::new(reify_cause(*a)), Box::new(reify_cause(*b)))
        }
    }
}

/// Split out the first expected failure, in pre-order.
///
/// `Ok(error)` when the cause contains an expected failure (the remainder of
/// a composite cause is dropped); `Err(original)` when it contains none.
/// This is the single rule `catch_all`, `map_err`, and `tap_error` share for
/// intercepting composite causes.
pub(crate) fn split_failure(cause: ErasedCause) -> Result<AnyError, ErasedCause> {
    match cause {
        Cause::Fail(e) => Ok(e),
        Cause::Die(_) | Cause::Interrupt(_) => Err(cause),
        Cause::Sequential(a, b) => match split_failure(*a) {
            Ok(e) => Ok(e),
            Err(a) => match split_failure(*b) {
                Ok(e) => Ok(e),
                Err(b) => Err(Cause::Sequential(Box::new(a), Box::new(b))),
            },
        },
        Cause::Parallel(a, b) => match split_failure(*a) {
            Ok(e) => Ok(e),
            Err(a) => match split_failure(*b) {
                Ok(e) => Ok(e),
                Err(b) => Err(Cause::Parallel(Box::new(a), Box::new(b))),
            },
        },
    }
}
