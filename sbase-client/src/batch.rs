/// Batch handles and the retrying batch runner
use crate::context::Context;
use crate::database::{Database, Scope};
use crate::guard::{BatchGuard, BatchState};
use crate::query::QueryResult;
use crate::table::Table;
use sbase_core::{BatchOptions, Error, Result, ResumeMarker, RetryPolicy};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A database handle scoped to one batch.
///
/// Reads observe the snapshot taken when the batch began, plus the
/// batch's own writes. Nothing is visible to others until [`commit`]
/// succeeds. After `commit` or `abort` has been called once, whatever its
/// outcome, every further operation fails with [`Error::TerminalBatch`].
/// Clones share that state.
///
/// [`commit`]: BatchDatabase::commit
#[derive(Clone)]
pub struct BatchDatabase {
    scope: Scope,
    guard: Arc<BatchGuard>,
    parent: Database,
}

impl std::fmt::Debug for BatchDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDatabase")
            .field("full_name", &self.full_name())
            .field("read_only", &self.is_read_only())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl BatchDatabase {
    pub(crate) fn new(parent: Database, suffix: &str, read_only: bool) -> Self {
        let guard = Arc::new(BatchGuard::new(read_only));
        let db = parent.scope();
        let scope = Scope {
            service: Arc::clone(&db.service),
            names: db.names.batch(suffix),
            schema_version: db.schema_version,
            guard: Some(Arc::clone(&guard)),
        };
        Self {
            scope,
            guard,
            parent,
        }
    }

    pub fn name(&self) -> &str {
        self.scope.names.name()
    }

    pub fn full_name(&self) -> &str {
        self.scope.full_name()
    }

    /// The database this batch was opened on.
    pub fn parent(&self) -> &Database {
        &self.parent
    }

    pub fn is_read_only(&self) -> bool {
        self.guard.read_only()
    }

    pub fn state(&self) -> BatchState {
        self.guard.state()
    }

    /// Handle on a table, scoped to this batch. No I/O; operations on the
    /// table check the batch state.
    pub fn table(&self, name: impl Into<String>) -> Table {
        self.scope.table(name)
    }

    pub async fn list_tables(&self, ctx: &Context) -> Result<Vec<String>> {
        self.scope.list_tables(ctx).await
    }

    /// The marker of the batch's snapshot. Allowed on read-only batches.
    pub async fn get_resume_marker(&self, ctx: &Context) -> Result<ResumeMarker> {
        self.scope.get_resume_marker(ctx).await
    }

    pub async fn exec(&self, ctx: &Context, query: &str) -> Result<QueryResult> {
        self.scope.exec(ctx, query).await
    }

    /// Persist the batch's writes. Fails with [`Error::ConcurrentBatch`] if
    /// data the batch read changed after it began; the batch is finished
    /// either way.
    pub async fn commit(&self, ctx: &Context) -> Result<()> {
        self.guard.finish("commit", BatchState::Committed)?;
        debug!(batch = %self.full_name(), "committing batch");
        ctx.run(
            "commit",
            self.scope
                .service
                .commit(self.full_name(), self.scope.schema_version),
        )
        .await
    }

    /// Discard the batch's writes.
    pub async fn abort(&self, ctx: &Context) -> Result<()> {
        self.guard.finish("abort", BatchState::Aborted)?;
        debug!(batch = %self.full_name(), "aborting batch");
        self.send_abort(ctx).await
    }

    async fn send_abort(&self, ctx: &Context) -> Result<()> {
        ctx.run(
            "abort",
            self.scope
                .service
                .abort(self.full_name(), self.scope.schema_version),
        )
        .await
    }

    /// Abort, logging instead of returning a failure.
    async fn abort_quietly(&self, ctx: &Context) {
        if let Err(err) = self.abort(ctx).await {
            warn!(batch = %self.full_name(), error = %err, "ignoring abort failure");
        }
    }

    /// Ask the server to release a batch whose commit failed. The handle
    /// is already terminal, so this bypasses the guard.
    async fn release(&self, ctx: &Context) {
        if let Err(err) = self.send_abort(ctx).await {
            warn!(batch = %self.full_name(), error = %err, "ignoring abort failure after commit");
        }
    }
}

/// Run `f` in a batch and commit it, re-running the whole batch when the
/// commit fails with a conflict.
///
/// Uses the database's retry policy (three attempts by default). See
/// [`run_in_batch_with_policy`].
///
/// `f` may be called more than once, each time with a new batch. It must be
/// safe to re-run: side effects outside the batch are repeated on retry.
///
/// # Example
/// ```no_run
/// # use sbase_client::{run_in_batch, Context, Database};
/// # use sbase_core::BatchOptions;
/// # async fn example(db: Database) -> sbase_core::Result<()> {
/// let ctx = Context::new();
/// run_in_batch(&ctx, &db, BatchOptions::new(), |batch| {
///     let ctx = ctx.clone();
///     async move {
///         let accounts = batch.table("accounts");
///         accounts.put(&ctx, "alice", "90").await?;
///         accounts.put(&ctx, "bob", "110").await
///     }
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_in_batch<F, Fut, T, E>(
    ctx: &Context,
    db: &Database,
    options: BatchOptions,
    f: F,
) -> std::result::Result<T, E>
where
    F: FnMut(BatchDatabase) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<Error>,
{
    let policy = db.retry_policy().clone();
    run_in_batch_with_policy(ctx, db, options, &policy, f).await
}

/// Run `f` in a fresh batch per attempt. `f` is re-run from the start on
/// every retry, so anything it does outside the batch must tolerate that.
///
/// - `f` fails: the batch is aborted and `f`'s error is returned as is.
///   It is not retried.
/// - read-only batch: the batch is aborted and `f`'s value returned.
/// - commit succeeds: `f`'s value is returned.
/// - commit fails: the batch is released on the server, and the attempt is
///   repeated if `policy` allows it; otherwise the commit error is
///   returned.
///
/// Failures to begin a batch are returned immediately. Abort failures are
/// logged and never replace the error being returned.
pub async fn run_in_batch_with_policy<F, Fut, T, E>(
    ctx: &Context,
    db: &Database,
    options: BatchOptions,
    policy: &RetryPolicy,
    mut f: F,
) -> std::result::Result<T, E>
where
    F: FnMut(BatchDatabase) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: From<Error>,
{
    let mut attempt = 0;
    loop {
        let batch = db.begin_batch(ctx, options.clone()).await?;

        let value = match f(batch.clone()).await {
            Ok(value) => value,
            Err(err) => {
                debug!(batch = %batch.full_name(), "batch function failed, aborting");
                batch.abort_quietly(ctx).await;
                return Err(err);
            }
        };

        if batch.is_read_only() {
            batch.abort_quietly(ctx).await;
            return Ok(value);
        }

        let err = match batch.commit(ctx).await {
            Ok(()) => return Ok(value),
            Err(err) => err,
        };
        batch.release(ctx).await;

        if attempt >= policy.max_attempts || !policy.should_retry(&err) {
            warn!(
                db = %db.full_name(),
                attempts = attempt + 1,
                error = %err,
                "batch commit failed"
            );
            return Err(err.into());
        }

        let backoff = policy.backoff_duration(attempt);
        attempt += 1;
        info!(
            db = %db.full_name(),
            attempt,
            max_retries = policy.max_attempts,
            error = %err,
            "retrying batch"
        );
        if !backoff.is_zero() {
            ctx.run("run_in_batch", async {
                tokio::time::sleep(backoff).await;
                Ok(())
            })
            .await?;
        }
    }
}
