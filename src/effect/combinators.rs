//! Combinators over effects.
//!
//! Every combinator consumes an effect and returns a new one; the underlying
//! node tree is never mutated. `and_then` is the canonical sequencing
//! primitive and `catch_all_cause` its error-channel dual; everything else
//! here is a thin wrapper over those two bind shapes with a different
//! continuation.

use std::convert::Infallible;

use crate::cause::{Cause, Defect};
use crate::context::Context;
use crate::effect::error::TaggedError;
use crate::effect::node::{
    boxed_value, downcast_error, downcast_value, reify_cause, split_failure, ContinueFn, Node,
    RecoverFn,
};
use crate::effect::Effect;
use crate::fiber::{FiberHandle, RawHandle};
use crate::layer::{Layer, LayerError};

/// Boxed recovery continuation for one tag in [`Effect::catch_tags`].
pub type TagHandler<A, E> = Box<dyn FnOnce(E) -> Effect<A, E> + Send>;

/// Wrap a typed success continuation for the erased channel.
fn continue_with<A, F>(f: F) -> ContinueFn
where
    A: Send + 'static,
    F: FnOnce(A) -> Node + Send + 'static,
{
    Box::new(move |any| match downcast_value::<A>(any) {
        Ok(value) => f(value),
        Err(cause) => Node::Fail(cause),
    })
}

/// Wrap a typed expected-failure continuation for the erased channel.
///
/// Intercepts only expected failures; defects and interruption re-raise
/// unchanged. A composite cause recovers with its first expected failure.
fn recover_with<E, F>(f: F) -> RecoverFn
where
    E: Send + 'static,
    F: FnOnce(E) -> Node + Send + 'static,
{
    Box::new(move |cause| match split_failure(cause) {
        Ok(any) => match downcast_error::<E>(any) {
            Ok(error) => f(error),
            Err(cause) => Node::Fail(cause),
        },
        Err(other) => Node::Fail(other),
    })
}

/// Join a forked fiber, reflecting its full outcome into the success channel.
fn settle<T, E>(fiber: FiberHandle<T, E>) -> Effect<Result<T, Cause<E>>, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fiber
        .join()
        .map(Ok)
        .catch_all_cause(|cause| Effect::succeed(Err(cause)))
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// Transform the success value.
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::{run_sync, Effect};
    ///
    /// let effect = Effect::<_, String>::succeed(5).map(|x| x * 2);
    /// assert_eq!(run_sync(effect).ok(), Some(10));
    /// ```
    pub fn map<B, F>(self, f: F) -> Effect<B, E>
    where
        B: Send + 'static,
        F: FnOnce(A) -> B + Send + 'static,
    {
        Effect::from_node(Node::FlatMap(
            Box::new(self.node),
            continue_with::<A, _>(move |value| Node::Succeed(boxed_value(f(value)))),
        ))
    }

    /// Sequence: feed the success value into a continuation producing the
    /// next effect. Failures skip the continuation entirely.
    ///
    /// This is the single primitive from which `map`, `tap`, and the
    /// error-channel duals derive.
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::{run_sync, Effect};
    ///
    /// let effect = Effect::<_, String>::succeed(5)
    ///     .and_then(|x| Effect::succeed(x + 10));
    /// assert_eq!(run_sync(effect).ok(), Some(15));
    /// ```
    pub fn and_then<B, F>(self, f: F) -> Effect<B, E>
    where
        B: Send + 'static,
        F: FnOnce(A) -> Effect<B, E> + Send + 'static,
    {
        Effect::from_node(Node::FlatMap(
            Box::new(self.node),
            continue_with::<A, _>(move |value| f(value).node),
        ))
    }

    /// Run `other` after this effect and pair both results.
    pub fn zip<B>(self, other: Effect<B, E>) -> Effect<(A, B), E>
    where
        B: Send + 'static,
    {
        self.and_then(move |a| other.map(move |b| (a, b)))
    }

    /// Run `other` after this effect and combine both results with `f`.
    pub fn zip_with<B, C, F>(self, other: Effect<B, E>, f: F) -> Effect<C, E>
    where
        B: Send + 'static,
        C: Send + 'static,
        F: FnOnce(A, B) -> C + Send + 'static,
    {
        self.and_then(move |a| other.map(move |b| f(a, b)))
    }

    /// Run both effects concurrently on forked fibers and pair the results.
    ///
    /// Both sides run to completion even when one fails; if both fail, their
    /// causes combine with `Parallel`. The fibers are supervised by the
    /// current one, so interrupting the caller interrupts both sides.
    /// Requires a scheduler, so `run_sync` rejects it like any fork.
    pub fn zip_par<B>(self, other: Effect<B, E>) -> Effect<(A, B), E>
    where
        B: Send + 'static,
    {
        self.fork()
            .zip(other.fork())
            .and_then(|(left, right)| settle(left).zip(settle(right)))
            .and_then(|(a, b)| match (a, b) {
                (Ok(a), Ok(b)) => Effect::succeed((a, b)),
                (Err(first), Err(second)) => Effect::fail_cause(first.both(second)),
                (Err(cause), Ok(_)) | (Ok(_), Err(cause)) => Effect::fail_cause(cause),
            })
    }

    /// Perform a side effect with the value, then return the original value.
    ///
    /// If the side effect fails, the whole computation fails.
    pub fn tap<F>(self, f: F) -> Self
    where
        F: FnOnce(&A) -> Effect<(), E> + Send + 'static,
    {
        Effect::from_node(Node::FlatMap(
            Box::new(self.node),
            continue_with::<A, _>(move |value| {
                let side = f(&value);
                Node::FlatMap(
                    Box::new(side.node),
                    continue_with::<(), _>(move |_| Node::Succeed(boxed_value(value))),
                )
            }),
        ))
    }

    /// Fail with an error if the predicate rejects the value.
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::{run_sync, Effect};
    ///
    /// let effect = Effect::<_, String>::succeed(15)
    ///     .check(|age| *age >= 18, || "too young".to_string());
    /// let cause = run_sync(effect).unwrap_err();
    /// assert_eq!(cause.failure_option(), Some(&"too young".to_string()));
    /// ```
    pub fn check<P, F>(self, predicate: P, error_fn: F) -> Self
    where
        P: FnOnce(&A) -> bool + Send + 'static,
        F: FnOnce() -> E + Send + 'static,
    {
        self.and_then(move |value| {
            if predicate(&value) {
                Effect::succeed(value)
            } else {
                Effect::fail(error_fn())
            }
        })
    }

    /// Transform the expected error. Defects and interruption pass through
    /// untouched.
    pub fn map_err<E2, F>(self, f: F) -> Effect<A, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> E2 + Send + 'static,
    {
        Effect::from_node(Node::Catch(
            Box::new(self.node),
            recover_with::<E, _>(move |error| Node::Fail(Cause::Fail(Box::new(f(error))))),
        ))
    }

    /// Observe an expected failure, then re-raise it unchanged.
    pub fn tap_error<F>(self, f: F) -> Self
    where
        F: FnOnce(&E) -> Effect<(), E> + Send + 'static,
    {
        Effect::from_node(Node::Catch(
            Box::new(self.node),
            recover_with::<E, _>(move |error| {
                let side = f(&error);
                Node::FlatMap(
                    Box::new(side.node),
                    continue_with::<(), _>(move |_| Node::Fail(Cause::Fail(Box::new(error)))),
                )
            }),
        ))
    }

    /// Recover from any expected failure, possibly changing the error type.
    ///
    /// The recovery continuation runs only for `Fail` causes; a `Die` or
    /// `Interrupt` passes through untouched, which keeps programming bugs
    /// from being masked by broad handlers.
    ///
    /// Because the error type may change, inference needs the handler's
    /// error annotated when nothing else pins it down; [`Effect::or_else`]
    /// keeps the same error type and needs no annotation.
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::{run_sync, Effect};
    ///
    /// let effect = Effect::<i32, String>::fail("boom".to_string())
    ///     .catch_all(|_| Effect::<_, String>::succeed(0));
    /// assert_eq!(run_sync(effect).ok(), Some(0));
    /// ```
    pub fn catch_all<E2, F>(self, f: F) -> Effect<A, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> Effect<A, E2> + Send + 'static,
    {
        Effect::from_node(Node::Catch(
            Box::new(self.node),
            recover_with::<E, _>(move |error| f(error).node),
        ))
    }

    /// Recover from any expected failure with an alternative effect of the
    /// same error type.
    pub fn or_else<F>(self, f: F) -> Self
    where
        F: FnOnce(E) -> Effect<A, E> + Send + 'static,
    {
        self.catch_all(f)
    }

    /// Recover with access to the *full* cause, including defects and
    /// interruption observed from a joined fiber.
    pub fn catch_all_cause<E2, F>(self, f: F) -> Effect<A, E2>
    where
        E2: Send + 'static,
        F: FnOnce(Cause<E>) -> Effect<A, E2> + Send + 'static,
    {
        Effect::from_node(Node::Catch(
            Box::new(self.node),
            Box::new(move |cause| f(reify_cause::<E>(cause)).node),
        ))
    }

    /// Observe a defect, then re-raise the cause unchanged.
    ///
    /// The only non-cause-consuming way to see a `Die`; `catch_all` and
    /// `tap_error` never fire for defects.
    pub fn tap_defect<F>(self, f: F) -> Self
    where
        F: FnOnce(&Defect) -> Effect<(), Infallible> + Send + 'static,
    {
        Effect::from_node(Node::Catch(
            Box::new(self.node),
            Box::new(move |cause| {
                let side = cause.defect_option().map(|defect| f(defect));
                match side {
                    Some(side) => {
                        Node::FlatMap(Box::new(side.node), Box::new(move |_| Node::Fail(cause)))
                    }
                    None => Node::Fail(cause),
                }
            }),
        ))
    }

    /// Recover only from errors carrying the given tag.
    ///
    /// Any error with a different tag re-raises unchanged, as do defects and
    /// interruption.
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::{run_sync, Effect, TaggedError};
    ///
    /// #[derive(Debug, PartialEq)]
    /// enum AppError {
    ///     Parse,
    ///     Request,
    /// }
    ///
    /// impl TaggedError for AppError {
    ///     fn tag(&self) -> &'static str {
    ///         match self {
    ///             AppError::Parse => "ParseError",
    ///             AppError::Request => "RequestError",
    ///         }
    ///     }
    /// }
    ///
    /// let effect = Effect::<i32, _>::fail(AppError::Request)
    ///     .catch_tag("ParseError", |_| Effect::succeed(0));
    /// let cause = run_sync(effect).unwrap_err();
    /// assert_eq!(cause.failure_option(), Some(&AppError::Request));
    /// ```
    pub fn catch_tag<F>(self, tag: &'static str, f: F) -> Self
    where
        E: TaggedError,
        F: FnOnce(E) -> Effect<A, E> + Send + 'static,
    {
        Effect::from_node(Node::Catch(
            Box::new(self.node),
            recover_with::<E, _>(move |error| {
                if error.tag() == tag {
                    f(error).node
                } else {
                    Node::Fail(Cause::Fail(Box::new(error)))
                }
            }),
        ))
    }

    /// Recover from errors matching any of an enumerated set of tags.
    ///
    /// The handler whose tag equals the error's tag runs; with no match the
    /// failure re-raises unchanged.
    pub fn catch_tags<I>(self, handlers: I) -> Self
    where
        E: TaggedError,
        I: IntoIterator<Item = (&'static str, TagHandler<A, E>)>,
    {
        let mut handlers: Vec<(&'static str, TagHandler<A, E>)> =
            handlers.into_iter().collect();
        Effect::from_node(Node::Catch(
            Box::new(self.node),
            recover_with::<E, _>(move |error| {
                match handlers
                    .iter()
                    .position(|(tag, _)| *tag == error.tag())
                {
                    Some(index) => {
                        let (_, handler) = handlers.swap_remove(index);
                        handler(error).node
                    }
                    None => Node::Fail(Cause::Fail(Box::new(error))),
                }
            }),
        ))
    }

    /// Run a finalizer on any exit: success, failure, or interruption.
    ///
    /// The finalizer runs exactly once, cannot fail expectedly, and runs
    /// masked during interruption. A finalizer defect after an earlier
    /// failure combines sequentially into the cause.
    pub fn ensuring(self, finalizer: Effect<(), Infallible>) -> Self {
        Effect::from_node(Node::Ensuring(
            Box::new(self.node),
            Box::new(finalizer.node),
        ))
    }

    /// Scoped acquire/use/release.
    ///
    /// Acquisition is uninterruptible, the release is registered before the
    /// use effect starts, and the release runs exactly once on every exit,
    /// including interruption. Argument order follows `bracket`: acquire,
    /// release, use.
    ///
    /// The `release` closure itself is invoked right after acquisition, to
    /// build the finalizer effect; put the release's side effects inside
    /// the effect it returns, not in the closure body.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::atomic::{AtomicUsize, Ordering};
    /// use std::sync::Arc;
    /// use millrace::{run_sync, Effect};
    ///
    /// let released = Arc::new(AtomicUsize::new(0));
    /// let released_probe = released.clone();
    ///
    /// let effect = Effect::<_, String>::acquire_release(
    ///     Effect::sync(|| "resource"),
    ///     move |_res| {
    ///         Effect::sync(move || {
    ///             released_probe.fetch_add(1, Ordering::SeqCst);
    ///         })
    ///     },
    ///     |res: &&str| Effect::succeed(res.len()),
    /// );
    ///
    /// assert_eq!(run_sync(effect).ok(), Some(8));
    /// assert_eq!(released.load(Ordering::SeqCst), 1);
    /// ```
    pub fn acquire_release<R, FRel, FUse>(
        acquire: Effect<R, E>,
        release: FRel,
        use_fn: FUse,
    ) -> Effect<A, E>
    where
        R: Send + 'static,
        FRel: FnOnce(R) -> Effect<(), Infallible> + Send + 'static,
        FUse: FnOnce(&R) -> Effect<A, E> + Send + 'static,
    {
        // The mask covers acquisition and finalizer registration; only the
        // use effect itself is interruptible.
        Effect::from_node(Node::Interruptible(
            Box::new(Node::FlatMap(
                Box::new(acquire.node),
                continue_with::<R, _>(move |resource| {
                    let used = use_fn(&resource);
                    Node::Ensuring(
                        Box::new(Node::Interruptible(Box::new(used.node), true)),
                        Box::new(release(resource).node),
                    )
                }),
            )),
            false,
        ))
    }

    /// Start this effect on a new fiber supervised by the current one.
    ///
    /// The child runs concurrently; if the parent reaches `Done` first, the
    /// child is interrupted before it can produce observable side effects.
    /// Use [`Effect::fork_daemon`] to detach from the parent's lifetime.
    pub fn fork(self) -> Effect<FiberHandle<A, E>, E> {
        Effect::from_node(Node::FlatMap(
            Box::new(Node::Fork(Box::new(self.node), false)),
            continue_with::<RawHandle, _>(|raw| {
                Node::Succeed(boxed_value(FiberHandle::<A, E>::new(raw.0)))
            }),
        ))
    }

    /// Start this effect on a daemon fiber bound to the root scope.
    ///
    /// Daemon fibers outlive their creator; they wind down with the runtime
    /// instead of with the parent fiber.
    pub fn fork_daemon(self) -> Effect<FiberHandle<A, E>, E> {
        Effect::from_node(Node::FlatMap(
            Box::new(Node::Fork(Box::new(self.node), true)),
            continue_with::<RawHandle, _>(|raw| {
                Node::Succeed(boxed_value(FiberHandle::<A, E>::new(raw.0)))
            }),
        ))
    }

    /// Mark this region interruptible (the default).
    pub fn interruptible(self) -> Self {
        Effect::from_node(Node::Interruptible(Box::new(self.node), true))
    }

    /// Mark this region uninterruptible: interruption requests are deferred
    /// until the region completes.
    pub fn uninterruptible(self) -> Self {
        Effect::from_node(Node::Interruptible(Box::new(self.node), false))
    }

    /// Run with `context` entries layered over the ambient context.
    ///
    /// On a tag collision the provided entry wins; the ambient context is
    /// restored once this effect completes.
    pub fn provide_context(self, context: Context) -> Self {
        Effect::from_node(Node::Provide(Box::new(self.node), context))
    }

    /// Resolve `layer` and run with its output layered over the ambient
    /// context. Layer resolution errors convert into this effect's error
    /// channel.
    pub fn provide_layer(self, layer: Layer) -> Self
    where
        E: From<LayerError>,
    {
        layer
            .build()
            .map_err(E::from)
            .and_then(move |ctx| self.provide_context(ctx))
    }
}
