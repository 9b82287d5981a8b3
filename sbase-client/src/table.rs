/// Tables and rows
use crate::context::Context;
use crate::database::Scope;
use crate::service::RowStream;
use bytes::Bytes;
use sbase_core::naming::{join, validate_name};
use sbase_core::{Result, RowRange};
use tracing::trace;

/// A table of a database or of a batch. Obtaining one performs no I/O.
#[derive(Clone)]
pub struct Table {
    scope: Scope,
    name: String,
    full_name: String,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("full_name", &self.full_name)
            .finish_non_exhaustive()
    }
}

impl Table {
    pub(crate) fn new(scope: Scope, name: String) -> Self {
        let full_name = join(scope.full_name(), &name);
        Self {
            scope,
            name,
            full_name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn row(&self, key: impl Into<String>) -> Row {
        Row::new(self.clone(), key.into())
    }

    fn db(&self) -> &str {
        self.scope.full_name()
    }

    fn schema_version(&self) -> i32 {
        self.scope.schema_version
    }

    pub async fn exists(&self, ctx: &Context) -> Result<bool> {
        self.scope.check_read("exists")?;
        validate_name(&self.name)?;
        ctx.run(
            "exists",
            self.scope
                .service
                .table_exists(self.db(), self.schema_version(), &self.name),
        )
        .await
    }

    /// Read a row. `None` when the row does not exist.
    pub async fn get(&self, ctx: &Context, key: &str) -> Result<Option<Bytes>> {
        self.scope.check_read("get")?;
        self.validate(key)?;
        trace!(table = %self.full_name, key, "get");
        ctx.run(
            "get",
            self.scope
                .service
                .get(self.db(), self.schema_version(), &self.name, key),
        )
        .await
    }

    pub async fn put(&self, ctx: &Context, key: &str, value: impl Into<Bytes>) -> Result<()> {
        self.scope.check_write("put")?;
        self.validate(key)?;
        trace!(table = %self.full_name, key, "put");
        ctx.run(
            "put",
            self.scope
                .service
                .put(self.db(), self.schema_version(), &self.name, key, value.into()),
        )
        .await
    }

    pub async fn delete(&self, ctx: &Context, key: &str) -> Result<()> {
        self.scope.check_write("delete")?;
        self.validate(key)?;
        trace!(table = %self.full_name, key, "delete");
        ctx.run(
            "delete",
            self.scope
                .service
                .delete(self.db(), self.schema_version(), &self.name, key),
        )
        .await
    }

    pub async fn delete_range(&self, ctx: &Context, range: &RowRange) -> Result<()> {
        self.scope.check_write("delete_range")?;
        validate_name(&self.name)?;
        ctx.run(
            "delete_range",
            self.scope
                .service
                .delete_range(self.db(), self.schema_version(), &self.name, range),
        )
        .await
    }

    /// Stream the rows in `range` in key order.
    pub async fn scan(&self, ctx: &Context, range: &RowRange) -> Result<RowStream> {
        self.scope.check_read("scan")?;
        validate_name(&self.name)?;
        let rows = ctx
            .run(
                "scan",
                self.scope
                    .service
                    .scan(self.db(), self.schema_version(), &self.name, range),
            )
            .await?;
        Ok(ctx.bind_stream("scan", rows))
    }

    fn validate(&self, key: &str) -> Result<()> {
        validate_name(&self.name)?;
        validate_name(key)
    }
}

/// A single row of a table.
#[derive(Debug, Clone)]
pub struct Row {
    table: Table,
    key: String,
    full_name: String,
}

impl Row {
    fn new(table: Table, key: String) -> Self {
        let full_name = join(table.full_name(), &key);
        Self {
            table,
            key,
            full_name,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub async fn exists(&self, ctx: &Context) -> Result<bool> {
        Ok(self.get(ctx).await?.is_some())
    }

    pub async fn get(&self, ctx: &Context) -> Result<Option<Bytes>> {
        self.table.get(ctx, &self.key).await
    }

    pub async fn put(&self, ctx: &Context, value: impl Into<Bytes>) -> Result<()> {
        self.table.put(ctx, &self.key, value).await
    }

    pub async fn delete(&self, ctx: &Context) -> Result<()> {
        self.table.delete(ctx, &self.key).await
    }
}
