#![allow(dead_code)]
// Shared helpers for the client integration tests

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use sbase_client::{
    ChangeStream, Context, Database, DatabaseService, ExecStream, MemoryService, RowStream,
};
use sbase_core::{BatchOptions, Error, Result, ResumeMarker, RowRange};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Install a test subscriber once. `RUST_LOG` controls the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Wraps a [`MemoryService`], counting calls and optionally failing them.
#[derive(Default)]
pub struct CountingService {
    inner: MemoryService,
    begins: AtomicUsize,
    commits: AtomicUsize,
    aborts: AtomicUsize,
    writes: AtomicUsize,
    reads: AtomicUsize,
    begin_error: Mutex<Option<Error>>,
    commit_error: Mutex<Option<Error>>,
    abort_error: Mutex<Option<Error>>,
}

impl CountingService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_begins_with(&self, err: Error) {
        *self.begin_error.lock() = Some(err);
    }

    /// Every commit fails with `err` without reaching the inner service.
    pub fn fail_commits_with(&self, err: Error) {
        *self.commit_error.lock() = Some(err);
    }

    pub fn fail_aborts_with(&self, err: Error) {
        *self.abort_error.lock() = Some(err);
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn injected(slot: &Mutex<Option<Error>>) -> Result<()> {
        match slot.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DatabaseService for CountingService {
    async fn begin_batch(
        &self,
        db: &str,
        schema_version: i32,
        options: &BatchOptions,
    ) -> Result<String> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.begin_error)?;
        self.inner.begin_batch(db, schema_version, options).await
    }

    async fn commit(&self, batch: &str, schema_version: i32) -> Result<()> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.commit_error)?;
        self.inner.commit(batch, schema_version).await
    }

    async fn abort(&self, batch: &str, schema_version: i32) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        Self::injected(&self.abort_error)?;
        self.inner.abort(batch, schema_version).await
    }

    async fn list_tables(&self, db: &str) -> Result<Vec<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.list_tables(db).await
    }

    async fn create_table(&self, db: &str, schema_version: i32, table: &str) -> Result<()> {
        self.inner.create_table(db, schema_version, table).await
    }

    async fn delete_table(&self, db: &str, schema_version: i32, table: &str) -> Result<()> {
        self.inner.delete_table(db, schema_version, table).await
    }

    async fn table_exists(&self, db: &str, schema_version: i32, table: &str) -> Result<bool> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.table_exists(db, schema_version, table).await
    }

    async fn get_resume_marker(&self, db: &str) -> Result<ResumeMarker> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_resume_marker(db).await
    }

    async fn exec(&self, db: &str, schema_version: i32, query: &str) -> Result<ExecStream> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.exec(db, schema_version, query).await
    }

    async fn watch(
        &self,
        db: &str,
        table: &str,
        prefix: &str,
        resume_marker: Option<&ResumeMarker>,
    ) -> Result<ChangeStream> {
        self.inner.watch(db, table, prefix, resume_marker).await
    }

    async fn get(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        key: &str,
    ) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(db, schema_version, table, key).await
    }

    async fn put(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        key: &str,
        value: Bytes,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.put(db, schema_version, table, key, value).await
    }

    async fn delete(&self, db: &str, schema_version: i32, table: &str, key: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(db, schema_version, table, key).await
    }

    async fn delete_range(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        range: &RowRange,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_range(db, schema_version, table, range).await
    }

    async fn scan(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        range: &RowRange,
    ) -> Result<RowStream> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.scan(db, schema_version, table, range).await
    }
}

/// A database on a fresh [`MemoryService`] with one table named `table`.
pub async fn memory_database() -> (Database, Context) {
    init_tracing();
    let db = Database::new(Arc::new(MemoryService::new()), "apps/test", "db").unwrap();
    let ctx = Context::new();
    db.create_table(&ctx, "table").await.unwrap();
    (db, ctx)
}

/// Same as [`memory_database`], but through a [`CountingService`].
pub async fn counting_database() -> (Database, Context, Arc<CountingService>) {
    init_tracing();
    let service = CountingService::new();
    let db = Database::new(service.clone(), "apps/test", "db").unwrap();
    let ctx = Context::new();
    db.create_table(&ctx, "table").await.unwrap();
    (db, ctx, service)
}

pub fn bytes(value: &str) -> Bytes {
    Bytes::from(value.to_string())
}
