//! Completion signal the blocking entry points wait on.
//!
//! Continuations run on whatever thread delivers firmware messages; callers on other threads (or
//! tasks) use a [Completion] to find out when the exchange they started has finished.

use core::{
    sync::atomic::{AtomicBool, Ordering},
    task::{Poll, Waker},
    time::Duration,
};

use alloc::sync::Arc;
use crossbeam::queue::SegQueue;
use futures::Future;

use crate::transport::Clock;

struct CompletionInner {
    done: AtomicBool,
    waker_queue: SegQueue<Waker>,
}

/// A one-shot flag.
#[derive(Clone)]
pub struct Completion(Arc<CompletionInner>);

/// A future that resolves once the completion has been signalled.
struct WaitFuture {
    p: Arc<CompletionInner>,
}

impl Future for WaitFuture {
    type Output = ();

    fn poll(
        self: core::pin::Pin<&mut Self>,
        cx: &mut core::task::Context<'_>,
    ) -> Poll<Self::Output> {
        if self.p.done.load(Ordering::Acquire) {
            return Poll::Ready(());
        }
        self.p.waker_queue.push(cx.waker().clone());
        // the completion may have fired between the check and the push
        if self.p.done.load(Ordering::Acquire) {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl Completion {
    pub fn new() -> Completion {
        Completion(Arc::new(CompletionInner {
            done: AtomicBool::new(false),
            waker_queue: Default::default(),
        }))
    }

    /// Signal completion and wake every waiting task.
    pub fn complete(&self) {
        self.0.done.store(true, Ordering::Release);
        while let Some(w) = self.0.waker_queue.pop() {
            w.wake();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.0.done.load(Ordering::Acquire)
    }

    /// Returns a future that resolves once [Completion::complete] has been called.
    pub fn wait(&self) -> impl Future<Output = ()> {
        WaitFuture { p: self.0.clone() }
    }

    /// Spin until completed or until `timeout` has passed. Returns true if completed.
    pub fn wait_timeout(&self, clock: &dyn Clock, timeout: Duration) -> bool {
        let deadline = clock.now() + timeout;
        loop {
            if self.is_complete() {
                return true;
            }
            if clock.now() >= deadline {
                return self.is_complete();
            }
            clock.relax();
        }
    }
}
