//! Durable-Execution Runtime Binding (C9)
//!
//! A narrow trait boundary standing in for whatever durable-execution
//! product actually owns deterministic `now()`, persisted sleeps, and
//! child workflow spawning (§6). A concrete binding to an external
//! durable-execution server is out of scope for this repo; this trait and
//! an in-process `LocalDurableContext` exist so the interpreter and
//! orchestrator are unit-testable without one — the same split the
//! teacher draws between `BlobStore` and `LocalBlobStore`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

/// Detached unit of work handed to `DurableContext::start_child`.
pub type BoxedChildFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Deterministic clock, sleep, and child-spawn primitives (§5: "now() is
/// obtained through the runtime"). Object-safe so callers can hold
/// `Arc<dyn DurableContext>` rather than thread a concrete type through
/// every generic parameter.
#[async_trait]
pub trait DurableContext: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);

    /// Spawn a detached child unit of work. The returned handle is not
    /// awaited by callers that intend to abandon it on a parent stop
    /// (§4.9.5); callers that need the result await the handle directly.
    fn start_child(&self, fut: BoxedChildFuture) -> JoinHandle<()>;
}

/// Real wall-clock, `tokio::time::sleep`-backed implementation. Suitable
/// for local runs and integration tests; does not persist sleep
/// wake-times across process restarts (that durability is the external
/// runtime's job per §6).
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalDurableContext;

#[async_trait]
impl DurableContext for LocalDurableContext {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn start_child(&self, fut: BoxedChildFuture) -> JoinHandle<()> {
        tokio::spawn(fut)
    }
}

#[async_trait]
impl DurableContext for Arc<dyn DurableContext> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }

    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }

    fn start_child(&self, fut: BoxedChildFuture) -> JoinHandle<()> {
        (**self).start_child(fut)
    }
}

/// Type-erased sleep closure, used by modules (e.g. `connection`) that
/// need to inject a sleep implementation without taking a generic
/// `DurableContext` parameter at every call site.
pub type BoxSleepFn = Box<dyn Fn(Duration) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Build a `BoxSleepFn` bound to an `Arc<dyn DurableContext>`.
pub fn sleep_fn(ctx: Arc<dyn DurableContext>) -> BoxSleepFn {
    Box::new(move |d| {
        let ctx = ctx.clone();
        Box::pin(async move { ctx.sleep(d).await })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn local_context_sleep_advances_paused_clock() {
        let ctx = LocalDurableContext;
        let start = tokio::time::Instant::now();
        ctx.sleep(Duration::from_secs(5)).await;
        assert!(tokio::time::Instant::now() - start >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn start_child_runs_detached() {
        let ctx = LocalDurableContext;
        let (tx, rx) = tokio::sync::oneshot::channel();
        ctx.start_child(Box::pin(async move {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.await.unwrap(), 42);
    }
}
