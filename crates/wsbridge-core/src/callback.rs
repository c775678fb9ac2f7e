//! Panic isolation for user callbacks.
//!
//! A callback that panics is logged and reported as
//! [`BridgeError::CallbackFailed`]; the relay carries on.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::warn;

use crate::errors::BridgeError;

/// Run a synchronous callback, converting a panic into an error.
pub fn guard<F: FnOnce()>(name: &'static str, f: F) -> Result<(), BridgeError> {
    std::panic::catch_unwind(AssertUnwindSafe(f)).map_err(|panic| failed(name, &panic))
}

/// Await an async callback, converting a panic into an error.
pub async fn guard_async<Fut>(name: &'static str, fut: Fut) -> Result<(), BridgeError>
where
    Fut: Future<Output = ()>,
{
    AssertUnwindSafe(fut)
        .catch_unwind()
        .await
        .map_err(|panic| failed(name, &panic))
}

fn failed(name: &'static str, panic: &Box<dyn Any + Send>) -> BridgeError {
    let message = panic_message(panic);
    warn!(callback = name, panic = %message, "callback panicked, continuing");
    BridgeError::CallbackFailed(format!("{name}: {message}"))
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
