/// Database handle
use crate::batch::BatchDatabase;
use crate::context::Context;
use crate::guard::BatchGuard;
use crate::query::QueryResult;
use crate::service::DatabaseService;
use crate::table::Table;
use futures::stream::{BoxStream, StreamExt};
use sbase_core::naming::validate_name;
use sbase_core::{BatchOptions, NamedScope, Result, ResumeMarker, RetryPolicy, WatchChange};
use std::sync::Arc;
use tracing::debug;

/// Schema version sent when the application has no schema.
pub const NO_SCHEMA_VERSION: i32 = -1;

/// Decoded change feed returned by [`Database::watch`].
pub type WatchStream = BoxStream<'static, Result<WatchChange>>;

/// What a database or batch handle shares with the tables and rows it
/// hands out: where to send calls, under which name, and the batch guard
/// when there is one.
#[derive(Clone)]
pub(crate) struct Scope {
    pub(crate) service: Arc<dyn DatabaseService>,
    pub(crate) names: NamedScope,
    pub(crate) schema_version: i32,
    pub(crate) guard: Option<Arc<BatchGuard>>,
}

impl Scope {
    pub(crate) fn full_name(&self) -> &str {
        self.names.full_name()
    }

    pub(crate) fn check_read(&self, op: &str) -> Result<()> {
        match &self.guard {
            Some(guard) => guard.check_open(op),
            None => Ok(()),
        }
    }

    pub(crate) fn check_write(&self, op: &str) -> Result<()> {
        match &self.guard {
            Some(guard) => guard.check_write(op),
            None => Ok(()),
        }
    }

    pub(crate) fn table(&self, name: impl Into<String>) -> Table {
        Table::new(self.clone(), name.into())
    }

    pub(crate) async fn list_tables(&self, ctx: &Context) -> Result<Vec<String>> {
        self.check_read("list_tables")?;
        ctx.run("list_tables", self.service.list_tables(self.full_name()))
            .await
    }

    pub(crate) async fn get_resume_marker(&self, ctx: &Context) -> Result<ResumeMarker> {
        self.check_read("get_resume_marker")?;
        ctx.run(
            "get_resume_marker",
            self.service.get_resume_marker(self.full_name()),
        )
        .await
    }

    pub(crate) async fn exec(&self, ctx: &Context, query: &str) -> Result<QueryResult> {
        self.check_read("exec")?;
        let stream = ctx
            .run(
                "exec",
                self.service.exec(self.full_name(), self.schema_version, query),
            )
            .await?;
        let stream = ctx.bind_stream("exec", stream);
        ctx.run("exec", QueryResult::from_stream(stream)).await
    }
}

/// A handle on a remote database.
///
/// Handles are cheap to clone and perform no I/O until an operation is
/// called.
///
/// # Example
/// ```no_run
/// # use sbase_client::{Context, Database, MemoryService};
/// # use std::sync::Arc;
/// # async fn example() -> sbase_core::Result<()> {
/// let db = Database::new(Arc::new(MemoryService::new()), "apps/notes", "db")?;
/// let ctx = Context::new();
/// let notes = db.create_table(&ctx, "notes").await?;
/// notes.put(&ctx, "n1", "hello").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    scope: Scope,
    retry_policy: RetryPolicy,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("full_name", &self.full_name())
            .field("schema_version", &self.scope.schema_version)
            .finish_non_exhaustive()
    }
}

impl Database {
    pub fn new(
        service: Arc<dyn DatabaseService>,
        parent_full_name: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            scope: Scope {
                service,
                names: NamedScope::new(parent_full_name, name)?,
                schema_version: NO_SCHEMA_VERSION,
                guard: None,
            },
            retry_policy: RetryPolicy::batch(),
        })
    }

    pub fn with_schema_version(mut self, schema_version: i32) -> Self {
        self.scope.schema_version = schema_version;
        self
    }

    /// Policy used by [`crate::run_in_batch`] for this database.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn name(&self) -> &str {
        self.scope.names.name()
    }

    pub fn full_name(&self) -> &str {
        self.scope.full_name()
    }

    pub fn schema_version(&self) -> i32 {
        self.scope.schema_version
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub(crate) fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Handle on a table of this database. No I/O.
    pub fn table(&self, name: impl Into<String>) -> Table {
        self.scope.table(name)
    }

    pub async fn list_tables(&self, ctx: &Context) -> Result<Vec<String>> {
        self.scope.list_tables(ctx).await
    }

    pub async fn create_table(&self, ctx: &Context, name: &str) -> Result<Table> {
        validate_name(name)?;
        ctx.run(
            "create_table",
            self.scope
                .service
                .create_table(self.full_name(), self.scope.schema_version, name),
        )
        .await?;
        debug!(db = %self.full_name(), table = name, "table created");
        Ok(self.table(name))
    }

    pub async fn delete_table(&self, ctx: &Context, name: &str) -> Result<()> {
        validate_name(name)?;
        ctx.run(
            "delete_table",
            self.scope
                .service
                .delete_table(self.full_name(), self.scope.schema_version, name),
        )
        .await?;
        debug!(db = %self.full_name(), table = name, "table deleted");
        Ok(())
    }

    /// Open a batch. The returned handle addresses the batch's snapshot
    /// under its own name.
    pub async fn begin_batch(&self, ctx: &Context, options: BatchOptions) -> Result<BatchDatabase> {
        let suffix = ctx
            .run(
                "begin_batch",
                self.scope
                    .service
                    .begin_batch(self.full_name(), self.scope.schema_version, &options),
            )
            .await?;

        let batch = BatchDatabase::new(self.clone(), &suffix, options.read_only);
        debug!(
            batch = %batch.full_name(),
            read_only = options.read_only,
            hint = ?options.hint,
            "batch started"
        );
        Ok(batch)
    }

    /// A marker for "now", usable to start a watch that skips the current
    /// contents.
    pub async fn get_resume_marker(&self, ctx: &Context) -> Result<ResumeMarker> {
        self.scope.get_resume_marker(ctx).await
    }

    pub async fn exec(&self, ctx: &Context, query: &str) -> Result<QueryResult> {
        self.scope.exec(ctx, query).await
    }

    /// Watch rows of `table` whose keys start with `prefix`. An empty
    /// `table` watches every table of the database.
    ///
    /// With a resume marker the stream continues right after the change
    /// the marker came from; without one it first replays the current
    /// contents as puts. Records that fail to decode surface as errors in
    /// the stream. The stream ends with `Cancelled` or `Timeout` when `ctx`
    /// does.
    pub async fn watch(
        &self,
        ctx: &Context,
        table: &str,
        prefix: &str,
        resume_marker: Option<ResumeMarker>,
    ) -> Result<WatchStream> {
        if !table.is_empty() {
            validate_name(table)?;
        }
        let raw = ctx
            .run(
                "watch",
                self.scope
                    .service
                    .watch(self.full_name(), table, prefix, resume_marker.as_ref()),
            )
            .await?;

        let changes = raw
            .map(|item| item.and_then(WatchChange::decode))
            .boxed();
        Ok(ctx.bind_stream("watch", changes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryService;
    use sbase_core::Error;

    fn database() -> Database {
        Database::new(Arc::new(MemoryService::new()), "apps/notes", "db").unwrap()
    }

    #[test]
    fn test_names() {
        let db = database();
        assert_eq!(db.name(), "db");
        assert_eq!(db.full_name(), "apps/notes/db");
        assert_eq!(db.schema_version(), NO_SCHEMA_VERSION);
        assert_eq!(db.with_schema_version(3).schema_version(), 3);
    }

    #[test]
    fn test_invalid_name() {
        let err = Database::new(Arc::new(MemoryService::new()), "apps", "a/b").unwrap_err();
        assert_eq!(err, Error::InvalidName("a/b".to_string()));
    }

    #[tokio::test]
    async fn test_create_and_list_tables() {
        let db = database();
        let ctx = Context::new();
        db.create_table(&ctx, "b").await.unwrap();
        db.create_table(&ctx, "a").await.unwrap();
        assert_eq!(db.list_tables(&ctx).await.unwrap(), vec!["a", "b"]);

        db.delete_table(&ctx, "a").await.unwrap();
        assert_eq!(db.list_tables(&ctx).await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_create_table_rejects_slash() {
        let db = database();
        let err = db.create_table(&Context::new(), "x/y").await.unwrap_err();
        assert!(matches!(err, Error::InvalidName(_)));
    }

    #[tokio::test]
    async fn test_exec() {
        let db = database();
        let ctx = Context::new();
        let table = db.create_table(&ctx, "t").await.unwrap();
        table.put(&ctx, "a", "1").await.unwrap();

        let result = db.exec(&ctx, "select k from t").await.unwrap();
        assert_eq!(result.headers(), ["k"]);
        let rows = result.collect_rows().await.unwrap();
        assert_eq!(rows, vec![vec![bytes::Bytes::from_static(b"a")]]);
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let db = database();
        let ctx = Context::new();
        ctx.cancel();
        let err = db.list_tables(&ctx).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(_)));
    }
}
