use std::sync::atomic::{AtomicBool, Ordering::*};
use std::task::{Context, Poll, Waker};

use futures_util::future::poll_fn;
use parking_lot::Mutex;

/// A one-shot broadcast event.
///
/// Publishers call [`fire`](Flare::fire) at most once per transition;
/// every task parked in [`wait`](Flare::wait) is woken exactly once.
/// Waiting on an already-fired flare completes immediately.
pub struct Flare {
    fired: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

impl Flare {
    #[must_use]
    pub fn new() -> Self {
        Self { fired: AtomicBool::new(false), wakers: Mutex::new(Vec::new()) }
    }

    #[inline]
    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired.load(SeqCst)
    }

    pub fn fire(&self) {
        if self.fired.swap(true, SeqCst) {
            return;
        }
        let wakers = std::mem::take(&mut *self.wakers.lock());
        for waker in wakers {
            waker.wake();
        }
    }

    fn poll_fired(&self, cx: &mut Context<'_>) -> Poll<()> {
        if self.is_fired() {
            return Poll::Ready(());
        }
        {
            let mut wakers = self.wakers.lock();
            if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                wakers.push(cx.waker().clone());
            }
        }
        // the flare may have fired between the fast check and registration
        if self.is_fired() {
            return Poll::Ready(());
        }
        Poll::Pending
    }

    pub async fn wait(&self) {
        poll_fn(|cx| self.poll_fired(cx)).await;
    }
}

impl Default for Flare {
    fn default() -> Self {
        Self::new()
    }
}
