//! Fiber identity, status, and handles.
//!
//! A fiber is one lightweight, independently schedulable execution of an
//! effect tree. The interpreter in [`crate::runtime`] drives it; this module
//! holds the shared run-time record ([`FiberState`]) and the typed
//! [`FiberHandle`] returned by `fork`.
//!
//! A fiber exclusively owns its result slot: the first `join` consumes the
//! result, and a second `join` of the same fiber is a defect. Parents hold
//! only weak references to the children they supervise; supervision is for
//! interruption, never for value ownership.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{watch, Notify};

use crate::cause::{Cause, Defect};
use crate::effect::node::{AnyValue, Exit, Node};
use crate::effect::Effect;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a fiber, unique for the lifetime of the process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> Self {
        FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub(crate) fn test_value(n: u64) -> Self {
        FiberId(n)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a fiber is in its lifecycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FiberStatus {
    /// Evaluating nodes.
    Running,
    /// Parked at an async boundary, waiting for an external completion.
    Suspended,
    /// Finished; the result slot is populated.
    Done,
}

/// Shared mutable record for one fiber.
///
/// Owned by the interpreter loop and referenced (weakly by supervising
/// parents, strongly by handles) from outside.
pub(crate) struct FiberState {
    id: FiberId,
    status: watch::Sender<FiberStatus>,
    interrupt_requested: AtomicBool,
    interrupt_note: Notify,
    children: Mutex<Vec<Weak<FiberState>>>,
    result: Mutex<Option<Exit>>,
}

impl FiberState {
    pub(crate) fn new() -> Arc<Self> {
        let (status, _) = watch::channel(FiberStatus::Running);
        Arc::new(FiberState {
            id: FiberId::next(),
            status,
            interrupt_requested: AtomicBool::new(false),
            interrupt_note: Notify::new(),
            children: Mutex::new(Vec::new()),
            result: Mutex::new(None),
        })
    }

    pub(crate) fn id(&self) -> FiberId {
        self.id
    }

    pub(crate) fn status(&self) -> FiberStatus {
        *self.status.borrow()
    }

    pub(crate) fn set_status(&self, status: FiberStatus) {
        self.status.send_replace(status);
    }

    /// Ask this fiber to stop. Honored cooperatively at its next
    /// interruptible checkpoint or suspension point.
    pub(crate) fn request_interrupt(&self) {
        self.interrupt_requested.store(true, Ordering::Release);
        // notify_one stores a permit, so a request that races with the
        // fiber entering its suspension select is never lost
        self.interrupt_note.notify_one();
    }

    pub(crate) fn interrupt_requested(&self) -> bool {
        self.interrupt_requested.load(Ordering::Acquire)
    }

    /// Resolves once an interrupt has been requested.
    pub(crate) async fn on_interrupt(&self) {
        while !self.interrupt_requested() {
            self.interrupt_note.notified().await;
        }
    }

    pub(crate) fn add_child(&self, child: &Arc<FiberState>) {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(child));
    }

    /// Drain the supervised children that are still alive.
    pub(crate) fn take_children(&self) -> Vec<Arc<FiberState>> {
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .filter_map(|weak| weak.upgrade())
            .collect()
    }

    /// Publish the final exit and transition to `Done`.
    pub(crate) fn complete(&self, exit: Exit) {
        *self
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(exit);
        self.set_status(FiberStatus::Done);
    }

    /// Take the result out of the slot. `None` if already consumed.
    pub(crate) fn take_exit(&self) -> Option<Exit> {
        self.result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Resolves once this fiber reaches `Done`.
    pub(crate) async fn await_done(&self) {
        let mut rx = self.status.subscribe();
        // wait_for checks the current value before awaiting changes
        let _ = rx.wait_for(|s| *s == FiberStatus::Done).await;
    }
}

impl fmt::Debug for FiberState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberState")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

/// Untyped handle crossing the interpreter's value channel.
///
/// The `Fork` node produces this; the typed `fork` combinator immediately
/// rewraps it into a [`FiberHandle`].
pub(crate) struct RawHandle(pub(crate) Arc<FiberState>);

/// Handle to a forked fiber producing `A` or failing with `E`.
///
/// Obtained from [`Effect::fork`] / [`Effect::fork_daemon`]. Joining returns
/// the fiber's result through the usual channels: an interrupted fiber joins
/// with an `Interrupt` cause, a dead one with its `Die` cause.
///
/// # Examples
///
/// ```
/// use millrace::Effect;
///
/// # tokio_test::block_on(async {
/// let effect = Effect::<i32, String>::succeed(21)
///     .map(|x| x * 2)
///     .fork()
///     .and_then(|fiber| fiber.join());
/// assert_eq!(millrace::run_promise(effect).await.ok(), Some(42));
/// # });
/// ```
pub struct FiberHandle<A, E> {
    state: Arc<FiberState>,
    _marker: PhantomData<fn() -> (A, E)>,
}

impl<A, E> Clone for FiberHandle<A, E> {
    fn clone(&self) -> Self {
        FiberHandle {
            state: self.state.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, E> fmt::Debug for FiberHandle<A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberHandle")
            .field("id", &self.state.id())
            .field("status", &self.state.status())
            .finish()
    }
}

impl<A, E> FiberHandle<A, E>
where
    A: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(state: Arc<FiberState>) -> Self {
        FiberHandle {
            state,
            _marker: PhantomData,
        }
    }

    /// The fiber's identity.
    pub fn id(&self) -> FiberId {
        self.state.id()
    }

    /// The fiber's current lifecycle status.
    pub fn status(&self) -> FiberStatus {
        self.state.status()
    }

    /// Wait for the fiber to finish and surface its result.
    ///
    /// Success and failure flow through the joining effect's own channels;
    /// joining an interrupted fiber fails with its `Interrupt` cause. The
    /// result slot is single-owner: joining the same fiber twice is a defect.
    pub fn join(self) -> Effect<A, E> {
        let state = self.state;
        Effect::from_node(Node::Async(Box::new(move |done| {
            tokio::spawn(async move {
                state.await_done().await;
                let exit = state.take_exit().unwrap_or_else(|| {
                    Err(Cause::die(Defect::new(format!(
                        "fiber {} result already consumed",
                        state.id()
                    ))))
                });
                done(exit);
            });
        })))
    }

    /// Request interruption and wait for the fiber to wind down.
    ///
    /// Succeeds once the fiber is `Done`; the fiber's own exit (normally an
    /// `Interrupt` cause) stays in its result slot for a later `join`.
    pub fn interrupt(self) -> Effect<(), E> {
        let state = self.state;
        Effect::from_node(Node::Async(Box::new(move |done| {
            tokio::spawn(async move {
                state.request_interrupt();
                state.await_done().await;
                done(Ok(Box::new(()) as AnyValue));
            });
        })))
    }
}
