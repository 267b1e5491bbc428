//! Run entry points.
//!
//! An effect is only a description; the operations here convert a
//! description plus a fully-resolved [`Context`] into an observable result.
//!
//! - [`run_sync`] drives the root fiber to completion without a reactor. It
//!   is for effects that never cross an async boundary; reaching one is a
//!   programming-contract violation and panics loudly.
//! - [`run_promise`] drives the root fiber on the tokio scheduler and may
//!   suspend indefinitely.
//! - [`Runtime`] pre-resolves a layer set once and exposes the same entry
//!   points against the resulting context, avoiding re-resolution per call.
//!
//! # Examples
//!
//! ```
//! use millrace::{run_promise, Effect};
//!
//! # tokio_test::block_on(async {
//! let effect = Effect::<_, String>::succeed(20).map(|x| x + 1);
//! assert_eq!(run_promise(effect).await.ok(), Some(21));
//! # });
//! ```

mod interpreter;

pub(crate) use interpreter::{FiberRuntime, RunMode};

use std::sync::Arc;

use crate::cause::{Cause, Defect};
use crate::context::Context;
use crate::effect::node::{downcast_value, reify_cause};
use crate::effect::Effect;
use crate::fiber::FiberState;
use crate::layer::{Layer, LayerError};

/// Pull the typed result out of a completed root fiber.
fn reify_exit<A, E>(fiber: &Arc<FiberState>) -> Result<A, Cause<E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    match fiber.take_exit() {
        Some(Ok(value)) => downcast_value::<A>(value).map_err(reify_cause),
        Some(Err(cause)) => Err(reify_cause(cause)),
        None => Err(Cause::die(Defect::new(
            "root fiber completed without publishing a result",
        ))),
    }
}

fn execute_sync<A, E>(effect: Effect<A, E>, context: Context) -> Result<A, Cause<E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    let fiber = FiberState::new();
    let runtime = FiberRuntime::new(fiber.clone(), context, RunMode::Sync);
    // Never parks: in sync mode the interpreter panics before any await
    futures::executor::block_on(runtime.run(effect.node));
    reify_exit(&fiber)
}

async fn execute<A, E>(effect: Effect<A, E>, context: Context) -> Result<A, Cause<E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    let fiber = FiberState::new();
    let runtime = FiberRuntime::new(fiber.clone(), context, RunMode::Async);
    runtime.run(effect.node).await;
    reify_exit(&fiber)
}

/// Run an effect to completion synchronously against an empty context.
///
/// Returns the success value or the uncaught [`Cause`].
///
/// # Panics
///
/// Panics if the effect ever suspends on external asynchrony or forks a
/// fiber; such effects require [`run_promise`]. This is a contract violation
/// by the caller, not a typed error.
///
/// # Examples
///
/// ```
/// use millrace::{run_sync, Effect};
///
/// let effect = Effect::<_, String>::sync(|| 6 * 7);
/// assert_eq!(run_sync(effect).ok(), Some(42));
/// ```
pub fn run_sync<A, E>(effect: Effect<A, E>) -> Result<A, Cause<E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    execute_sync(effect, Context::empty())
}

/// Run an effect to completion on the tokio scheduler against an empty
/// context.
///
/// Resolves with the success value or the uncaught [`Cause`] once the root
/// fiber is done. Non-daemon fibers forked by the effect are interrupted
/// when the root completes; daemon fibers keep running on the runtime.
pub async fn run_promise<A, E>(effect: Effect<A, E>) -> Result<A, Cause<E>>
where
    A: Send + 'static,
    E: Send + 'static,
{
    execute(effect, Context::empty()).await
}

/// A managed runtime holding a pre-resolved service context.
///
/// Resolving layers is effectful and potentially expensive; a `Runtime`
/// does it once and reuses the resulting read-only [`Context`] for every
/// subsequent run.
///
/// # Examples
///
/// ```
/// use millrace::{Effect, Layer, Runtime, Tag};
///
/// struct Config {
///     greeting: &'static str,
/// }
///
/// # tokio_test::block_on(async {
/// let tag: Tag<Config> = Tag::new("Config");
/// let layer = Layer::succeed(tag, Config { greeting: "hi" });
/// let runtime = Runtime::from_layer(&layer).await.unwrap();
///
/// let effect = Effect::<_, String>::service(tag).map(|c| c.greeting);
/// assert_eq!(runtime.run_promise(effect).await.ok(), Some("hi"));
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct Runtime {
    context: Context,
}

impl Runtime {
    /// Wrap an already-resolved context.
    pub fn new(context: Context) -> Self {
        Runtime { context }
    }

    /// Resolve `layer` once and manage its output context.
    pub async fn from_layer(layer: &Layer) -> Result<Self, Cause<LayerError>> {
        let context = run_promise(layer.build()).await?;
        Ok(Runtime::new(context))
    }

    /// The managed context.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// [`run_sync`] against the managed context.
    pub fn run_sync<A, E>(&self, effect: Effect<A, E>) -> Result<A, Cause<E>>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        execute_sync(effect, self.context.clone())
    }

    /// [`run_promise`] against the managed context.
    pub async fn run_promise<A, E>(&self, effect: Effect<A, E>) -> Result<A, Cause<E>>
    where
        A: Send + 'static,
        E: Send + 'static,
    {
        execute(effect, self.context.clone()).await
    }
}
