//! Shared utility functions.

use std::any::Any;

use tokio::task::spawn_blocking;

use crate::{Error, Result};

/// Run a synchronous closure on the blocking thread pool.
///
/// A panic inside the closure is returned as [`Error::TaskJoin`] carrying
/// the panic message.
pub async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f).await.map_err(|e| {
        if e.is_panic() {
            Error::TaskJoin(format!("panicked: {}", panic_message(&*e.into_panic())))
        } else {
            Error::TaskJoin(e.to_string())
        }
    })
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
