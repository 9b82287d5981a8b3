/// Per-call context: deadline and cancellation
use futures::stream::{BoxStream, StreamExt};
use sbase_core::{Error, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Carries a deadline and a cancellation flag through every remote call.
///
/// Clones share the cancellation flag, so cancelling any clone cancels all
/// calls made with the others. Deadlines are per clone: `with_timeout`
/// derives a context that may expire earlier than its parent.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

impl Interrupt {
    fn into_error(self, op: &str) -> Error {
        match self {
            Interrupt::Cancelled => Error::Cancelled(op.to_string()),
            Interrupt::DeadlineExceeded => Error::Timeout(format!("{}: deadline exceeded", op)),
        }
    }
}

impl Context {
    /// A context with no deadline that is never cancelled unless asked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context that expires after `timeout`, or at the parent's
    /// deadline if that comes first.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        };
        Self {
            deadline: Some(deadline),
            cancel: self.cancel.clone(),
        }
    }

    /// Cancel every in-flight and future call made with this context or
    /// any of its clones.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    async fn expired(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
            }
            None => std::future::pending().await,
        }
    }

    async fn race<F: Future>(&self, fut: F) -> std::result::Result<F::Output, Interrupt> {
        if self.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        tokio::select! {
            output = fut => Ok(output),
            _ = self.cancel.cancelled() => Err(Interrupt::Cancelled),
            _ = self.expired() => Err(Interrupt::DeadlineExceeded),
        }
    }

    /// Run `fut` unless the context is cancelled or its deadline passes
    /// first, in which case `fut` is dropped and `Cancelled` or `Timeout`
    /// is returned.
    pub async fn run<F, T>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.race(fut).await {
            Ok(result) => result,
            Err(interrupt) => Err(interrupt.into_error(op)),
        }
    }

    /// Bind a result stream to this context. Once the context is cancelled
    /// or expires the stream yields one error and ends.
    pub fn bind_stream<T>(
        &self,
        op: &'static str,
        stream: BoxStream<'static, Result<T>>,
    ) -> BoxStream<'static, Result<T>>
    where
        T: Send + 'static,
    {
        futures::stream::unfold(Some((self.clone(), stream)), move |state| async move {
            let (ctx, mut stream) = state?;
            match ctx.race(stream.next()).await {
                Ok(Some(item)) => Some((item, Some((ctx, stream)))),
                Ok(None) => None,
                Err(interrupt) => Some((Err(interrupt.into_error(op)), None)),
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_cancellation() {
        let ctx = Context::new();
        let other = ctx.clone();
        assert!(!other.is_cancelled());

        ctx.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_child_deadline_never_extends_parent() {
        let parent = Context::new().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let shorter = parent.with_timeout(Duration::from_millis(1));
        assert!(shorter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn test_run_completes() {
        let ctx = Context::new();
        let value = ctx.run("op", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_after_cancel() {
        let ctx = Context::new();
        ctx.cancel();
        let err = ctx.run("get", async { Ok(()) }).await.unwrap_err();
        assert_eq!(err, Error::Cancelled("get".to_string()));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_call() {
        let ctx = Context::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = ctx
            .run("watch", std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_cancel_reaches_derived_context() {
        let ctx = Context::new();
        let derived = ctx.with_timeout(Duration::from_secs(60));
        let call = tokio::spawn(async move {
            derived
                .run("get", std::future::pending::<Result<()>>())
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.cancel();
        let err = call.await.unwrap().unwrap_err();
        assert_eq!(err, Error::Cancelled("get".to_string()));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = Context::new().with_timeout(Duration::from_millis(5));
        let err = ctx
            .run("scan", std::future::pending::<Result<()>>())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }

    #[tokio::test]
    async fn test_bound_stream_ends_after_cancel() {
        let ctx = Context::new();
        let source = futures::stream::iter(vec![Ok(1), Ok(2)])
            .chain(futures::stream::pending())
            .boxed();
        let mut stream = ctx.bind_stream("watch", source);

        assert_eq!(stream.next().await, Some(Ok(1)));
        assert_eq!(stream.next().await, Some(Ok(2)));
        ctx.cancel();
        assert!(matches!(stream.next().await, Some(Err(Error::Cancelled(_)))));
        assert_eq!(stream.next().await, None);
    }
}
