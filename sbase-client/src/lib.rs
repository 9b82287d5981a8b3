/// Syncbase NoSQL client library
///
/// Handles for databases, batches, tables and rows, a retrying batch runner
/// and a change feed, over a pluggable [`DatabaseService`] transport.

pub mod batch;
pub mod config;
pub mod context;
pub mod database;
pub mod grpc;
mod guard;
pub mod memory;
pub mod query;
pub mod service;
pub mod table;

// Re-export key types
pub use batch::{run_in_batch, run_in_batch_with_policy, BatchDatabase};
pub use config::ClientConfig;
pub use context::Context;
pub use database::{Database, WatchStream, NO_SCHEMA_VERSION};
pub use grpc::GrpcService;
pub use guard::BatchState;
pub use memory::MemoryService;
pub use query::QueryResult;
pub use service::{ChangeStream, DatabaseService, ExecStream, KeyValue, RowStream};
pub use table::{Row, Table};
pub use sbase_core::{
    BatchOptions, ChangeType, Error, ErrorKind, Result, ResumeMarker, RetryOn, RetryPolicy,
    RowRange, WatchChange,
};
