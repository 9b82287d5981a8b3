/// The remote-call surface every handle talks through.
///
/// Each method is addressed by the full name of a database or batch scope.
/// A batch scope is the database name followed by `##` and the
/// server-issued suffix; the server routes such calls to the batch's
/// snapshot. Implementations: [`crate::GrpcService`] for a live server and
/// [`crate::MemoryService`] for tests and embedding.
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use sbase_core::{BatchOptions, RawChange, Result, ResumeMarker, RowRange};

/// A row returned by a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Bytes,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

pub type RowStream = BoxStream<'static, Result<KeyValue>>;
pub type ChangeStream = BoxStream<'static, Result<RawChange>>;
/// Query output. The first item holds the column headers.
pub type ExecStream = BoxStream<'static, Result<Vec<Bytes>>>;

#[async_trait]
pub trait DatabaseService: Send + Sync {
    /// Open a batch and return the suffix that names it.
    async fn begin_batch(
        &self,
        db: &str,
        schema_version: i32,
        options: &BatchOptions,
    ) -> Result<String>;

    async fn commit(&self, batch: &str, schema_version: i32) -> Result<()>;

    async fn abort(&self, batch: &str, schema_version: i32) -> Result<()>;

    async fn list_tables(&self, db: &str) -> Result<Vec<String>>;

    async fn create_table(&self, db: &str, schema_version: i32, table: &str) -> Result<()>;

    async fn delete_table(&self, db: &str, schema_version: i32, table: &str) -> Result<()>;

    async fn table_exists(&self, db: &str, schema_version: i32, table: &str) -> Result<bool>;

    async fn get_resume_marker(&self, db: &str) -> Result<ResumeMarker>;

    async fn exec(&self, db: &str, schema_version: i32, query: &str) -> Result<ExecStream>;

    /// Stream changes to rows of `table` whose keys start with `prefix`.
    /// Without a resume marker the stream begins with the current contents.
    async fn watch(
        &self,
        db: &str,
        table: &str,
        prefix: &str,
        resume_marker: Option<&ResumeMarker>,
    ) -> Result<ChangeStream>;

    /// Read one row. `Ok(None)` when the row does not exist.
    async fn get(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        key: &str,
    ) -> Result<Option<Bytes>>;

    async fn put(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        key: &str,
        value: Bytes,
    ) -> Result<()>;

    async fn delete(&self, db: &str, schema_version: i32, table: &str, key: &str) -> Result<()>;

    async fn delete_range(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        range: &RowRange,
    ) -> Result<()>;

    async fn scan(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        range: &RowRange,
    ) -> Result<RowStream>;
}
