//! Buffer provenance and the corruption repair hook.

use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use crate::error::Result;

/// The future returned by a repair function.
pub type RepairFuture = BoxFuture<'static, Result<()>>;

/// Removes a corrupt entry from the backend the buffer originated from.
pub type RepairFn = Box<dyn FnOnce() -> RepairFuture + Send>;

/// Where a buffer's contents came from, and how to react to corruption.
///
/// User-provided data has not been validated yet; it is checked before any
/// backend trusts it, and there is nothing to repair when the check fails.
/// Backend-provided data was accepted in the past, so a failed check means
/// the backend holds a corrupt object; the repair hook deletes it.
pub struct BufferSource {
    repair: Option<RepairFn>,
}

impl BufferSource {
    /// Data uploaded by a client; validated before storage, nothing to repair.
    pub fn user_provided() -> Self {
        Self { repair: None }
    }

    /// Data served by a backend that cannot delete corrupt entries.
    pub fn irreparable() -> Self {
        Self { repair: None }
    }

    /// Data served by a backend; `repair` deletes the entry on corruption.
    ///
    /// The hook is invoked at most once, even when the buffer has been split
    /// with `clone_stream`. It must be idempotent on the backend side.
    pub fn reparable<F, Fut>(repair: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            repair: Some(Box::new(move || Box::pin(repair()))),
        }
    }

    pub(crate) fn into_repair_handle(self) -> RepairHandle {
        RepairHandle::new(self.repair)
    }
}

/// Shared at-most-once trigger for a buffer's repair function.
///
/// Cloned buffers (from `clone_stream` / `clone_copy`) share one handle, so
/// corruption observed by either consumer fires the repair exactly once.
#[derive(Clone)]
pub(crate) struct RepairHandle {
    repair: Arc<Mutex<Option<RepairFn>>>,
}

impl RepairHandle {
    pub(crate) fn new(repair: Option<RepairFn>) -> Self {
        Self {
            repair: Arc::new(Mutex::new(repair)),
        }
    }

    /// Fire the repair function if it has not fired yet.
    ///
    /// Repair failures are logged and swallowed; the integrity error that
    /// triggered the repair is what the caller needs to see.
    pub(crate) async fn fire(&self) {
        let repair = self.repair.lock().take();
        if let Some(repair) = repair {
            match repair().await {
                Ok(()) => debug!("corrupt blob repaired"),
                Err(e) => warn!(error = %e, "failed to repair corrupt blob"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    #[tokio::test]
    async fn repair_fires_at_most_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_repair = Arc::clone(&calls);
        let handle = BufferSource::reparable(move || {
            calls_in_repair.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .into_repair_handle();

        handle.fire().await;
        handle.fire().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clones_share_the_trigger() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_repair = Arc::clone(&calls);
        let handle = BufferSource::reparable(move || {
            calls_in_repair.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .into_repair_handle();

        let clone = handle.clone();
        handle.fire().await;
        clone.fire().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn user_provided_has_no_repair() {
        let handle = BufferSource::user_provided().into_repair_handle();
        // Nothing observable; firing must simply not panic.
        handle.fire().await;
    }
}
