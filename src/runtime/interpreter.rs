//! The trampoline that evaluates effect trees.
//!
//! One [`FiberRuntime`] drives one fiber: an explicit continuation stack, one
//! node at a time, in strict program order. The loop never blocks a worker;
//! it suspends only at `Async` boundaries and resumes when the external
//! registration calls back. Interruption is observed cooperatively at the
//! top of the loop and at suspension points, and unwinds the stack running
//! pending finalizers in reverse order of registration while skipping user
//! error handlers.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::cause::{Cause, Defect};
use crate::context::Context;
use crate::effect::node::{
    AnyValue, Callback, ContinueFn, ErasedCause, Exit, Node, OnExitFn, RecoverFn,
};
use crate::fiber::{FiberState, FiberStatus, RawHandle};

/// How the root fiber is being driven.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum RunMode {
    /// `run_sync`: reaching an async boundary or a fork is fatal.
    Sync,
    /// `run_promise`: the full scheduler is available.
    Async,
}

/// One suspended continuation on a fiber's evaluation stack.
enum Frame {
    /// Success continuation of a bind.
    Continue(ContinueFn),
    /// User failure handler. Skipped while the fiber is interrupting.
    Recover(RecoverFn),
    /// Internal exit continuation; never skipped.
    OnExit(OnExitFn),
    /// Pending finalizer, run exactly once on any exit.
    Finalizer(Node),
    /// Restore the ambient context on the way out of a `Provide` region.
    RestoreContext(Context),
    /// Restore the interruptibility flag on the way out of a region.
    RestoreInterruptible(bool),
}

enum Step {
    Continue(Node),
    Done(Exit),
}

/// Catch panics out of user code, converting them to defects.
fn run_user<T>(f: impl FnOnce() -> T) -> Result<T, ErasedCause> {
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| Cause::die(Defect::from_panic(payload)))
}

fn step_from(result: Result<Node, ErasedCause>) -> Node {
    match result {
        Ok(node) => node,
        Err(cause) => Node::Fail(cause),
    }
}

/// Interpreter state for one fiber.
pub(crate) struct FiberRuntime {
    fiber: Arc<FiberState>,
    context: Context,
    stack: Vec<Frame>,
    interruptible: bool,
    interrupting: bool,
    mode: RunMode,
}

impl FiberRuntime {
    pub(crate) fn new(fiber: Arc<FiberState>, context: Context, mode: RunMode) -> Self {
        FiberRuntime {
            fiber,
            context,
            stack: Vec::new(),
            interruptible: true,
            interrupting: false,
            mode,
        }
    }

    /// Drive `node` to completion, publish the exit into the fiber's result
    /// slot, and wind down supervised children.
    ///
    /// Boxed so forked children can recursively spawn this same future.
    pub(crate) fn run(mut self, node: Node) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            #[cfg(feature = "tracing")]
            tracing::trace!(fiber = %self.fiber.id(), "fiber started");

            let mut current = node;
            let exit: Exit = loop {
                if self.interruptible
                    && !self.interrupting
                    && self.fiber.interrupt_requested()
                {
                    self.interrupting = true;
                    #[cfg(feature = "tracing")]
                    tracing::trace!(fiber = %self.fiber.id(), "fiber interrupting");
                    current = Node::Fail(Cause::Interrupt(self.fiber.id()));
                }

                match current {
                    Node::Succeed(value) => match self.unwind_success(value) {
                        Step::Continue(next) => current = next,
                        Step::Done(exit) => break exit,
                    },
                    Node::Fail(cause) => match self.unwind_failure(cause) {
                        Step::Continue(next) => current = next,
                        Step::Done(exit) => break exit,
                    },
                    Node::Sync(thunk) => {
                        current = match run_user(thunk) {
                            Ok(Ok(value)) => Node::Succeed(value),
                            Ok(Err(cause)) | Err(cause) => Node::Fail(cause),
                        };
                    }
                    Node::FlatMap(inner, k) => {
                        self.stack.push(Frame::Continue(k));
                        current = *inner;
                    }
                    Node::Catch(inner, k) => {
                        self.stack.push(Frame::Recover(k));
                        current = *inner;
                    }
                    Node::OnExit(inner, k) => {
                        self.stack.push(Frame::OnExit(k));
                        current = *inner;
                    }
                    Node::Ensuring(inner, finalizer) => {
                        self.stack.push(Frame::Finalizer(*finalizer));
                        current = *inner;
                    }
                    Node::Access(f) => {
                        let context = &self.context;
                        current = step_from(run_user(|| f(context)));
                    }
                    Node::Provide(inner, partial) => {
                        self.stack.push(Frame::RestoreContext(self.context.clone()));
                        self.context = self.context.merge(&partial);
                        current = *inner;
                    }
                    Node::Interruptible(inner, flag) => {
                        self.stack
                            .push(Frame::RestoreInterruptible(self.interruptible));
                        self.interruptible = flag;
                        current = *inner;
                    }
                    Node::Fork(inner, daemon) => {
                        if self.mode == RunMode::Sync {
                            panic!(
                                "run_sync: effect attempted to fork fiber; use run_promise"
                            );
                        }
                        let child = FiberState::new();
                        #[cfg(feature = "tracing")]
                        tracing::trace!(
                            fiber = %self.fiber.id(),
                            child = %child.id(),
                            daemon,
                            "fiber forked"
                        );
                        if !daemon {
                            self.fiber.add_child(&child);
                        }
                        let child_runtime = FiberRuntime::new(
                            child.clone(),
                            self.context.clone(),
                            RunMode::Async,
                        );
                        tokio::spawn(child_runtime.run(*inner));
                        current = Node::Succeed(Box::new(RawHandle(child)) as AnyValue);
                    }
                    Node::Async(register) => {
                        if self.mode == RunMode::Sync {
                            panic!(
                                "run_sync: effect suspended on an async boundary; \
                                 use run_promise"
                            );
                        }
                        current = self.suspend(register).await;
                    }
                }
            };

            self.finish(exit).await;
        })
    }

    /// Park at an async boundary until the registration calls back or an
    /// interrupt arrives (when interruptible).
    async fn suspend(&mut self, register: Box<dyn FnOnce(Callback) + Send>) -> Node {
        let (tx, rx) = oneshot::channel::<Exit>();
        let callback: Callback = Box::new(move |exit| {
            let _ = tx.send(exit);
        });
        if let Err(cause) = run_user(move || register(callback)) {
            return Node::Fail(cause);
        }

        self.fiber.set_status(FiberStatus::Suspended);
        // Once already interrupting, remaining suspensions belong to
        // finalizers and must run to completion.
        let received = if self.interruptible && !self.interrupting {
            tokio::select! {
                received = rx => Some(received),
                _ = self.fiber.on_interrupt() => None,
            }
        } else {
            Some(rx.await)
        };
        self.fiber.set_status(FiberStatus::Running);

        match received {
            None => {
                self.interrupting = true;
                #[cfg(feature = "tracing")]
                tracing::trace!(fiber = %self.fiber.id(), "fiber interrupted while suspended");
                Node::Fail(Cause::Interrupt(self.fiber.id()))
            }
            Some(Ok(Ok(value))) => Node::Succeed(value),
            Some(Ok(Err(cause))) => Node::Fail(cause),
            Some(Err(_)) => Node::Fail(Cause::die(Defect::new(
                "async registration dropped its callback without completing",
            ))),
        }
    }

    /// Pop frames with a success value.
    fn unwind_success(&mut self, value: AnyValue) -> Step {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::RestoreContext(context) => self.context = context,
                Frame::RestoreInterruptible(flag) => {
                    self.interruptible = flag;
                    // An interrupt deferred by a masked region is honored the
                    // moment the mask lifts, even when the region succeeded.
                    if self.interruptible
                        && !self.interrupting
                        && self.fiber.interrupt_requested()
                    {
                        self.interrupting = true;
                        return Step::Continue(Node::Fail(Cause::Interrupt(
                            self.fiber.id(),
                        )));
                    }
                }
                Frame::Recover(_) => {}
                Frame::Continue(k) => return Step::Continue(step_from(run_user(|| k(value)))),
                Frame::OnExit(k) => {
                    return Step::Continue(step_from(run_user(|| k(Ok(value)))))
                }
                Frame::Finalizer(finalizer) => {
                    return Step::Continue(Node::OnExit(
                        Box::new(finalizer),
                        Box::new(move |finalizer_exit| match finalizer_exit {
                            Ok(_) => Node::Succeed(value),
                            Err(cause) => Node::Fail(cause),
                        }),
                    ));
                }
            }
        }
        Step::Done(Ok(value))
    }

    /// Pop frames with a cause. Finalizers run in reverse registration
    /// order; user handlers are skipped while interrupting.
    fn unwind_failure(&mut self, cause: ErasedCause) -> Step {
        while let Some(frame) = self.stack.pop() {
            match frame {
                Frame::RestoreContext(context) => self.context = context,
                Frame::RestoreInterruptible(flag) => self.interruptible = flag,
                Frame::Continue(_) => {}
                Frame::Recover(k) => {
                    if self.interrupting && cause.is_interrupted() {
                        continue;
                    }
                    return Step::Continue(step_from(run_user(|| k(cause))));
                }
                Frame::OnExit(k) => {
                    return Step::Continue(step_from(run_user(|| k(Err(cause)))))
                }
                Frame::Finalizer(finalizer) => {
                    return Step::Continue(Node::OnExit(
                        Box::new(finalizer),
                        Box::new(move |finalizer_exit| {
                            let cause = match finalizer_exit {
                                Ok(_) => cause,
                                Err(finalizer_cause) => cause.then(finalizer_cause),
                            };
                            Node::Fail(cause)
                        }),
                    ));
                }
            }
        }
        Step::Done(Err(cause))
    }

    /// Interrupt and await supervised children, then publish the exit.
    async fn finish(self, exit: Exit) {
        let children = self.fiber.take_children();
        for child in &children {
            child.request_interrupt();
        }
        for child in children {
            child.await_done().await;
        }

        #[cfg(feature = "tracing")]
        match &exit {
            Ok(_) => tracing::trace!(fiber = %self.fiber.id(), "fiber completed"),
            Err(cause) if cause.is_interrupted() => {
                tracing::trace!(fiber = %self.fiber.id(), "fiber interrupted")
            }
            Err(_) => tracing::trace!(fiber = %self.fiber.id(), "fiber failed"),
        }

        self.fiber.complete(exit);
    }
}
