//! Runtime seam: wall clock, timers and local task spawning.
//!
//! Everything runs on the page's single thread, so futures are `!Send` and
//! boxed with `LocalBoxFuture`.

use futures_util::future::{self, Either, LocalBoxFuture};
use futures_util::FutureExt;

pub trait Runtime {
    /// Wall-clock milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    /// Resolve after `ms` milliseconds.
    fn sleep(&self, ms: u32) -> LocalBoxFuture<'static, ()>;

    /// Run a future to completion in the background.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

/// Race `task` against a timer; `None` means the timer won.
pub async fn with_timeout<T>(
    runtime: &dyn Runtime,
    ms: u32,
    task: LocalBoxFuture<'_, T>,
) -> Option<T> {
    match future::select(task, runtime.sleep(ms)).await {
        Either::Left((value, _)) => Some(value),
        Either::Right(((), _)) => None,
    }
}

/// Browser runtime backed by `Date.now`, `gloo-timers` and `spawn_local`.
#[cfg(target_arch = "wasm32")]
#[derive(Debug, Clone, Copy, Default)]
pub struct WebRuntime;

#[cfg(target_arch = "wasm32")]
impl Runtime for WebRuntime {
    fn now_ms(&self) -> i64 {
        js_sys::Date::now() as i64
    }

    fn sleep(&self, ms: u32) -> LocalBoxFuture<'static, ()> {
        gloo_timers::future::TimeoutFuture::new(ms).boxed_local()
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}
