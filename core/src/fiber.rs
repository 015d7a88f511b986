//! Cooperative suspension for incremental parsers.
//!
//! A [`Resumable`] executes a function that may yield control back to its
//! caller before finishing, typically because a parser needs more input,
//! and can later be resumed to continue exactly where it left off.
//!
//! The function body is an `async` block; awaiting [`yield_now`] is the only
//! suspension point the runtime provides. The compiler's state-machine
//! transformation stands in for a stackful fiber: `run()` and `resume()`
//! poll the pinned state machine with a no-op waker, so control returns to
//! the caller whenever the body suspends. Scheduling is strictly
//! single-threaded and FIFO: resuming a resumable continues at its last
//! yield point, nothing else runs in between.
//!
//! Cancellation is explicit: [`Resumable::abort`] installs a sentinel that
//! the next yield point observes, making it resolve to
//! [`FiberError::Aborted`]; the body unwinds through its normal `?` paths
//! and the error lands in the resumable's error slot. Aborting is
//! idempotent.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::FiberError;

/// Lifecycle states of a resumable's underlying fiber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Created but not yet started.
    Init,
    /// Currently executing (observable only from inside the body).
    Running,
    /// Suspended at a yield point, waiting to be resumed.
    Yielded,
    /// Abort requested; the next resumption unwinds.
    Aborting,
    /// Completed and holding a result.
    Finished,
    /// Retired without a pending result.
    Idle,
}

/// Handle passed into a resumable's body, granting access to the yield
/// primitive. Cloning is cheap; all clones observe the same abort flag.
#[derive(Debug, Clone, Default)]
pub struct YieldHandle {
    aborted: Rc<Cell<bool>>,
}

impl YieldHandle {
    /// True once an abort has been requested.
    pub fn is_aborted(&self) -> bool {
        self.aborted.get()
    }
}

/// Suspends the current resumable, returning control to the caller of
/// `run()`/`resume()`.
///
/// Resolves to `Err(FiberError::Aborted)` instead of suspending (or upon
/// resumption) once the owning resumable was aborted; the body is expected
/// to propagate that with `?`.
pub fn yield_now(handle: &YieldHandle) -> YieldNow {
    YieldNow {
        aborted: handle.aborted.clone(),
        suspended: false,
    }
}

/// Future returned by [`yield_now`]. Pends exactly once.
#[derive(Debug)]
pub struct YieldNow {
    aborted: Rc<Cell<bool>>,
    suspended: bool,
}

impl Future for YieldNow {
    type Output = Result<(), FiberError>;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.aborted.get() {
            return Poll::Ready(Err(FiberError::Aborted));
        }

        if self.suspended {
            Poll::Ready(Ok(()))
        } else {
            self.suspended = true;
            Poll::Pending
        }
    }
}

/// Per-thread fiber accounting, for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Resumables ever created on this thread.
    pub total: u64,
    /// Resumables currently alive.
    pub current: u64,
    /// Peak number of simultaneously alive resumables.
    pub max: u64,
    /// Bodies that ran to completion.
    pub finished: u64,
}

thread_local! {
    static STATS: Cell<Statistics> = Cell::new(Statistics::default());
}

fn stats_update(f: impl FnOnce(&mut Statistics)) {
    // try_with: drops during thread teardown must not panic.
    let _ = STATS.try_with(|s| {
        let mut v = s.get();
        f(&mut v);
        s.set(v);
    });
}

/// Per-thread fiber statistics.
pub fn statistics() -> Statistics {
    STATS.with(Cell::get)
}

/// Executor for a function that may yield control back to the caller before
/// it's finished. The caller can later resume the function to continue its
/// operation.
pub struct Resumable<T> {
    future: Option<Pin<Box<dyn Future<Output = T>>>>,
    handle: YieldHandle,
    state: FiberState,
    result: Option<T>,
}

impl<T> Resumable<T> {
    /// Creates a resumable from a function building the body; the body
    /// receives a [`YieldHandle`] for its suspension points. Nothing runs
    /// until [`run`](Self::run) is called.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(YieldHandle) -> Fut,
        Fut: Future<Output = T> + 'static,
    {
        let handle = YieldHandle::default();
        stats_update(|s| {
            s.total += 1;
            s.current += 1;
            s.max = s.max.max(s.current);
        });

        Self {
            future: Some(Box::pin(f(handle.clone()))),
            handle,
            state: FiberState::Init,
            result: None,
        }
    }

    /// Starts execution of the body. Must be called exactly once, before any
    /// `resume()`.
    pub fn run(&mut self) {
        debug_assert_eq!(self.state, FiberState::Init, "run() called twice");
        self.poll();
    }

    /// Continues a yielded body at its last suspension point.
    ///
    /// A no-op once the body has completed.
    pub fn resume(&mut self) {
        if self.is_done() {
            return;
        }
        self.poll();
    }

    /// Requests cancellation.
    ///
    /// If the body has already completed this does nothing. Otherwise the
    /// abort sentinel is installed and the body is resumed once so its
    /// pending yield point unwinds with [`FiberError::Aborted`]. Idempotent.
    pub fn abort(&mut self) {
        if self.is_done() {
            return;
        }

        self.handle.aborted.set(true);

        match self.state {
            FiberState::Init => {
                // Never started: retire without running the body at all.
                self.future = None;
                self.state = FiberState::Idle;
            }
            _ => {
                self.state = FiberState::Aborting;
                self.poll();
            }
        }
    }

    fn poll(&mut self) {
        let Some(future) = self.future.as_mut() else {
            return;
        };

        let aborting = self.handle.is_aborted();
        self.state = FiberState::Running;

        let mut cx = Context::from_waker(Waker::noop());
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(value) => {
                self.result = Some(value);
                self.future = None;
                self.state = FiberState::Finished;
                stats_update(|s| s.finished += 1);
            }
            Poll::Pending => {
                self.state = if aborting {
                    FiberState::Aborting
                } else {
                    FiberState::Yielded
                };
            }
        }
    }

    /// The current lifecycle state.
    pub fn state(&self) -> FiberState {
        self.state
    }

    /// A handle sharing this resumable's abort flag.
    pub fn handle(&self) -> &YieldHandle {
        &self.handle
    }

    /// True once the body can no longer make progress: it completed, or was
    /// retired by an abort before starting.
    pub fn is_done(&self) -> bool {
        matches!(self.state, FiberState::Finished | FiberState::Idle)
    }

    /// True if the body completed and its result has not been taken.
    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }

    /// The result, once the body has completed.
    pub fn get(&self) -> Option<&T> {
        self.result.as_ref()
    }

    /// Takes the result out of the result slot.
    pub fn take(&mut self) -> Option<T> {
        self.result.take()
    }
}

impl<T> Drop for Resumable<T> {
    fn drop(&mut self) {
        stats_update(|s| s.current = s.current.saturating_sub(1));
    }
}

impl<T> core::fmt::Debug for Resumable<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Resumable")
            .field("state", &self.state)
            .field("has_result", &self.result.is_some())
            .finish()
    }
}

/// Constructs a resumable and immediately starts it.
pub fn execute<T, F, Fut>(f: F) -> Resumable<T>
where
    F: FnOnce(YieldHandle) -> Fut,
    Fut: Future<Output = T> + 'static,
{
    let mut r = Resumable::new(f);
    r.run();
    r
}

#[cfg(feature = "futures")]
mod futures_impl {
    //! Runtime-agnostic adapter exposing a resumable as a `Stream` that
    //! yields its final result.

    use super::Resumable;
    use core::pin::Pin;
    use core::task::{Context, Poll};
    use futures_core::Stream;

    impl<T: Unpin> Stream for Resumable<T> {
        type Item = T;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            let this = self.get_mut();

            if this.is_done() {
                return Poll::Ready(this.take());
            }

            match this.state {
                super::FiberState::Init => this.run(),
                _ => this.resume(),
            }

            if this.is_done() {
                Poll::Ready(this.take())
            } else {
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yield_and_resume() {
        let mut r = Resumable::new(|h| async move {
            let mut n = 0;
            n += 1;
            yield_now(&h).await?;
            n += 1;
            Ok::<_, FiberError>(n)
        });

        r.run();
        assert_eq!(r.state(), FiberState::Yielded);
        assert!(!r.is_done());

        r.resume();
        assert_eq!(r.state(), FiberState::Finished);
        assert_eq!(r.get(), Some(&Ok(2)));
    }

    #[test]
    fn test_completes_without_yield() {
        let r = execute(|_| async move { 7u32 });
        assert!(r.is_done());
        assert_eq!(r.get(), Some(&7));
    }

    #[test]
    fn test_resume_continues_fifo_at_last_yield() {
        let mut r = Resumable::new(|h| async move {
            let mut log = Vec::new();
            for i in 0..3 {
                log.push(i);
                yield_now(&h).await?;
            }
            Ok::<_, FiberError>(log)
        });

        r.run();
        r.resume();
        r.resume();
        r.resume();
        assert_eq!(r.take(), Some(Ok(vec![0, 1, 2])));
    }

    #[test]
    fn test_abort_unwinds_pending_yield() {
        let mut r = Resumable::new(|h| async move {
            yield_now(&h).await?;
            Ok::<_, FiberError>(())
        });

        r.run();
        r.abort();
        assert!(r.is_done());
        assert_eq!(r.get(), Some(&Err(FiberError::Aborted)));
    }

    #[test]
    fn test_abort_is_idempotent() {
        let mut r = Resumable::new(|h| async move {
            yield_now(&h).await?;
            Ok::<_, FiberError>(())
        });

        r.run();
        r.abort();
        r.abort();
        assert_eq!(r.get(), Some(&Err(FiberError::Aborted)));
    }

    #[test]
    fn test_abort_before_run_retires() {
        let mut r = Resumable::new(|h| async move {
            yield_now(&h).await?;
            Ok::<_, FiberError>(())
        });

        r.abort();
        assert_eq!(r.state(), FiberState::Idle);
        assert!(r.is_done());
        assert!(!r.has_result());
    }

    #[test]
    fn test_statistics_track_completion() {
        let before = statistics();
        let _r = execute(|_| async move { 1u8 });
        let after = statistics();
        assert_eq!(after.total, before.total + 1);
        assert_eq!(after.finished, before.finished + 1);
    }
}
