//! Panic containment scopes.
//!
//! A panic caught by one of these scopes has already been handled where it
//! happened. The process-wide panic hook checks [`is_absorbing`] and skips
//! forwarding such panics to recovery.

use futures::FutureExt;
use std::cell::Cell;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};

thread_local! {
    static ABSORBING: Cell<usize> = const { Cell::new(0) };
}

struct AbsorbGuard;

impl AbsorbGuard {
    fn enter() -> Self {
        ABSORBING.with(|depth| depth.set(depth.get() + 1));
        AbsorbGuard
    }
}

impl Drop for AbsorbGuard {
    fn drop(&mut self) {
        ABSORBING.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// True while the current thread runs inside an absorbing scope.
pub fn is_absorbing() -> bool {
    ABSORBING.with(|depth| depth.get() > 0)
}

/// `catch_unwind` for a panic that the caller handles itself.
pub fn absorb<R>(f: impl FnOnce() -> R) -> std::thread::Result<R> {
    let _guard = AbsorbGuard::enter();
    catch_unwind(AssertUnwindSafe(f))
}

/// Async counterpart of [`absorb`]. The scope is entered around every poll,
/// so it follows the task across worker threads.
pub fn absorb_async<F>(fut: F) -> impl Future<Output = std::thread::Result<F::Output>>
where
    F: Future,
{
    let mut fut = Box::pin(AssertUnwindSafe(fut).catch_unwind());
    futures::future::poll_fn(move |cx| {
        let _guard = AbsorbGuard::enter();
        fut.as_mut().poll(cx)
    })
}
