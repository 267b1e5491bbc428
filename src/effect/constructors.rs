//! Ways to get an effect into the world.
//!
//! Constructors lift plain values, thunks, results, futures, and callback
//! registrations into [`Effect`]s. They are all lazy: nothing executes until
//! a run entry point drives the effect.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::cause::{Cause, Defect};
use crate::context::Tag;
use crate::effect::error::UnknownError;
use crate::effect::node::{boxed_value, unit_value, Callback, Exit, Node};
use crate::effect::Effect;

/// Run a user future on the scheduler, converting panics to defects.
fn spawn_registered<T, F, C>(fut: F, done: Callback, convert: C)
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
    C: FnOnce(T) -> Exit + Send + 'static,
{
    tokio::spawn(async move {
        match std::panic::AssertUnwindSafe(fut).catch_unwind().await {
            Ok(value) => done(convert(value)),
            Err(payload) => done(Err(Cause::die(Defect::from_panic(payload)))),
        }
    });
}

impl<A, E> Effect<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    /// An effect that always succeeds with `value`.
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::{run_sync, Effect};
    ///
    /// let effect = Effect::<_, String>::succeed(42);
    /// assert_eq!(run_sync(effect).ok(), Some(42));
    /// ```
    pub fn succeed(value: A) -> Self {
        Effect::from_node(Node::Succeed(boxed_value(value)))
    }

    /// An effect that always fails with the expected error `error`.
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::{run_sync, Effect};
    ///
    /// let effect = Effect::<i32, _>::fail("nope");
    /// let cause = run_sync(effect).unwrap_err();
    /// assert_eq!(cause.failure_option(), Some(&"nope"));
    /// ```
    pub fn fail(error: E) -> Self {
        Effect::from_node(Node::Fail(Cause::Fail(Box::new(error))))
    }

    /// An effect that fails with a full, already-structured cause.
    pub fn fail_cause(cause: Cause<E>) -> Self {
        Effect::from_node(Node::Fail(crate::effect::node::erase_cause(cause)))
    }

    /// An effect that dies with a defect carrying `message`.
    ///
    /// Defects are invisible to the typed error channel; use this for
    /// conditions that indicate a programming bug rather than a recoverable
    /// domain failure.
    pub fn die(message: impl Into<String>) -> Self {
        Effect::from_node(Node::Fail(Cause::die(Defect::new(message))))
    }

    /// Defer a synchronous side effect.
    ///
    /// The thunk runs when the effect is executed; a panic inside it becomes
    /// a `Die` cause.
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::{run_sync, Effect};
    ///
    /// let effect = Effect::<_, String>::sync(|| 21 * 2);
    /// assert_eq!(run_sync(effect).ok(), Some(42));
    /// ```
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() -> A + Send + 'static,
    {
        Effect::from_node(Node::Sync(Box::new(move || Ok(boxed_value(f())))))
    }

    /// Defer a fallible synchronous computation.
    pub fn attempt<F>(f: F) -> Self
    where
        F: FnOnce() -> Result<A, E> + Send + 'static,
    {
        Effect::from_node(Node::Sync(Box::new(move || match f() {
            Ok(value) => Ok(boxed_value(value)),
            Err(error) => Err(Cause::Fail(Box::new(error))),
        })))
    }

    /// Lift a `Result` into an effect.
    pub fn from_result(result: Result<A, E>) -> Self {
        match result {
            Ok(value) => Effect::succeed(value),
            Err(error) => Effect::fail(error),
        }
    }

    /// Defer the *construction* of an effect until run time.
    pub fn suspend<F>(f: F) -> Self
    where
        F: FnOnce() -> Effect<A, E> + Send + 'static,
    {
        Effect::from_node(Node::FlatMap(
            Box::new(Node::Succeed(unit_value())),
            Box::new(move |_| f().node),
        ))
    }

    /// Bridge an infallible future into the effect tree.
    ///
    /// The fiber suspends at this boundary and resumes when the future
    /// completes. A panic inside the future becomes a `Die` cause.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = A> + Send + 'static,
    {
        Effect::from_node(Node::Async(Box::new(move |done| {
            spawn_registered(fut, done, |value| Ok(boxed_value(value)));
        })))
    }

    /// Bridge a fallible future, mapping its error deterministically.
    ///
    /// This is the two-argument async bridge: whatever the future fails with
    /// goes through `on_error` into the typed error channel.
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::{run_promise, Effect};
    ///
    /// # tokio_test::block_on(async {
    /// let effect = Effect::try_future(
    ///     async { "5".parse::<i32>() },
    ///     |e| format!("bad number: {e}"),
    /// );
    /// assert_eq!(run_promise(effect).await.ok(), Some(5));
    /// # });
    /// ```
    pub fn try_future<X, F, M>(fut: F, on_error: M) -> Self
    where
        X: Send + 'static,
        F: Future<Output = Result<A, X>> + Send + 'static,
        M: FnOnce(X) -> E + Send + 'static,
    {
        Effect::from_node(Node::Async(Box::new(move |done| {
            spawn_registered(fut, done, move |result| match result {
                Ok(value) => Ok(boxed_value(value)),
                Err(x) => Err(Cause::Fail(Box::new(on_error(x)))),
            });
        })))
    }

    /// Bridge external asynchronous work through a callback registration.
    ///
    /// Low-level escape hatch: `register` receives a one-shot completion
    /// callback and must eventually call it exactly once. Dropping the
    /// callback without calling it is a defect.
    pub fn from_callback<F>(register: F) -> Self
    where
        F: FnOnce(Box<dyn FnOnce(Result<A, E>) + Send>) + Send + 'static,
    {
        Effect::from_node(Node::Async(Box::new(move |done| {
            register(Box::new(move |result| {
                done(match result {
                    Ok(value) => Ok(boxed_value(value)),
                    Err(error) => Err(Cause::Fail(Box::new(error))),
                })
            }));
        })))
    }

    /// An effect that never completes. Useful as an interruption target.
    pub fn never() -> Self {
        Effect::from_node(Node::Async(Box::new(|done| {
            // The callback must stay alive: dropping it would complete the
            // suspension with a defect instead of pending forever.
            std::mem::forget(done);
        })))
    }
}

impl<A> Effect<A, UnknownError>
where
    A: Send + 'static,
{
    /// Bridge a fallible future, wrapping any error in [`UnknownError`].
    ///
    /// The one-argument async bridge: when the error type is not worth
    /// anticipating, the caught error is rendered into the catch-all
    /// `UnknownError` kind. Prefer [`Effect::try_future`] with a typed
    /// mapping wherever downstream code wants to match on failures.
    pub fn try_promise<X, F>(fut: F) -> Self
    where
        X: std::fmt::Display + Send + 'static,
        F: Future<Output = Result<A, X>> + Send + 'static,
    {
        Effect::try_future(fut, |x| UnknownError::new(x.to_string()))
    }
}

impl<E> Effect<(), E>
where
    E: Send + 'static,
{
    /// The unit effect.
    pub fn unit() -> Self {
        Effect::from_node(Node::Succeed(unit_value()))
    }

    /// Suspend the fiber for `duration`.
    ///
    /// A cooperative suspension point: interruption is honored here. The
    /// timer is created when the fiber reaches this effect, not at
    /// construction, so building a sleep needs no live runtime.
    pub fn sleep(duration: Duration) -> Self {
        Effect::from_future(async move { tokio::time::sleep(duration).await })
    }

    /// Yield the worker back to the scheduler before continuing.
    pub fn yield_now() -> Self {
        Effect::from_future(tokio::task::yield_now())
    }
}

impl<S, E> Effect<Arc<S>, E>
where
    S: Send + Sync + 'static,
    E: Send + 'static,
{
    /// Read the service registered under `tag` from the ambient context.
    ///
    /// A missing service is a defect: the context handed to a run entry
    /// point is expected to be fully resolved (see [`crate::layer`]). For a
    /// checked lookup use [`Effect::service_opt`].
    ///
    /// # Examples
    ///
    /// ```
    /// use millrace::{run_sync, Context, Effect, Tag};
    ///
    /// struct Greeter(&'static str);
    ///
    /// let tag: Tag<Greeter> = Tag::new("Greeter");
    /// let ctx = Context::empty().add(tag, Greeter("hello"));
    /// let effect = Effect::<_, String>::service(tag)
    ///     .map(|g| g.0)
    ///     .provide_context(ctx);
    /// assert_eq!(run_sync(effect).ok(), Some("hello"));
    /// ```
    pub fn service(tag: Tag<S>) -> Self {
        Effect::from_node(Node::Access(Box::new(move |ctx| match ctx.get(&tag) {
            Some(service) => Node::Succeed(boxed_value(service)),
            None => Node::Fail(Cause::die(Defect::new(format!(
                "no service registered for tag {tag}"
            )))),
        })))
    }
}

impl<S, E> Effect<Option<Arc<S>>, E>
where
    S: Send + Sync + 'static,
    E: Send + 'static,
{
    /// Checked variant of [`Effect::service`]: succeeds with `None` when the
    /// tag is absent instead of dying.
    pub fn service_opt(tag: Tag<S>) -> Self {
        Effect::from_node(Node::Access(Box::new(move |ctx| {
            Node::Succeed(boxed_value(ctx.get(&tag)))
        })))
    }
}
