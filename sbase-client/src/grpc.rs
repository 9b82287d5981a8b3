/// gRPC transport for a Syncbase server
use crate::config::ClientConfig;
use crate::service::{ChangeStream, DatabaseService, ExecStream, KeyValue, RowStream};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::StreamExt;
use sbase_core::{BatchOptions, Error, RawChange, Result, ResumeMarker, RowRange};
use sbase_proto::{self as proto, DatabaseClient};
use std::time::Duration;
use tonic::transport::Channel;
use tonic::{Request, Status};
use tracing::debug;

/// Status metadata key holding the [`Error::code`] of a batch rejection.
/// Read-only and finished-batch rejections share `FAILED_PRECONDITION`, so
/// the code is the only way to tell them apart.
pub const ERROR_CODE_KEY: &str = "sbase-error-code";

/// Status metadata key holding the state of a finished batch.
pub const BATCH_STATE_KEY: &str = "sbase-batch-state";

/// Convert a gRPC status into the client error space.
pub fn map_status(status: Status) -> Error {
    let msg = status.message().to_string();
    let metadata = status.metadata();
    let error_code = metadata
        .get(ERROR_CODE_KEY)
        .and_then(|value| value.to_str().ok());

    match error_code {
        Some("CONCURRENT_BATCH") => return Error::ConcurrentBatch(msg),
        Some("READ_ONLY_BATCH") => return Error::ReadOnlyBatch(msg),
        Some("TERMINAL_BATCH") => {
            let state = metadata
                .get(BATCH_STATE_KEY)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("finished");
            return Error::terminal(state, &msg);
        }
        _ => {}
    }

    match status.code() {
        tonic::Code::Aborted => Error::ConcurrentBatch(msg),
        tonic::Code::NotFound => Error::NotFound(msg),
        tonic::Code::AlreadyExists => Error::AlreadyExists(msg),
        tonic::Code::InvalidArgument | tonic::Code::FailedPrecondition => {
            Error::InvalidArgument(msg)
        }
        tonic::Code::PermissionDenied | tonic::Code::Unauthenticated => {
            Error::PermissionDenied(msg)
        }
        tonic::Code::Unavailable => Error::Unavailable(msg),
        tonic::Code::DeadlineExceeded => Error::Timeout(msg),
        tonic::Code::Cancelled => Error::Cancelled(msg),
        tonic::Code::Internal | tonic::Code::DataLoss => Error::Internal(msg),
        tonic::Code::Unimplemented => Error::Unimplemented(msg),
        _ => Error::Unknown(msg),
    }
}

fn change_from_proto(change: proto::Change) -> RawChange {
    RawChange {
        name: change.name,
        state: change.state,
        value: change.value.map(Bytes::from),
        resume_marker: ResumeMarker::new(change.resume_marker),
        from_sync: change.from_sync,
        continued: change.continued,
    }
}

/// [`DatabaseService`] backed by a tonic channel.
#[derive(Debug, Clone)]
pub struct GrpcService {
    client: DatabaseClient<Channel>,
    request_timeout: Option<Duration>,
}

impl GrpcService {
    /// Connect to a Syncbase server
    ///
    /// # Example
    /// ```no_run
    /// # use sbase_client::{ClientConfig, GrpcService};
    /// # async fn example() -> sbase_core::Result<()> {
    /// let config = ClientConfig::new().with_endpoint("http://localhost:50051");
    /// let service = GrpcService::connect(&config).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        config.validate().map_err(Error::InvalidArgument)?;

        let channel = Channel::from_shared(config.endpoint.clone())
            .map_err(|e| Error::ConnectionError(format!("Invalid address: {}", e)))?
            .connect_timeout(config.connect_timeout)
            .tcp_nodelay(config.tcp_nodelay)
            .connect()
            .await
            .map_err(|e| Error::ConnectionError(format!("Failed to connect: {}", e)))?;

        debug!(endpoint = %config.endpoint, "connected to syncbase");
        Ok(Self::from_channel(channel, config))
    }

    /// Wrap an already established channel.
    pub fn from_channel(channel: Channel, config: &ClientConfig) -> Self {
        Self {
            client: DatabaseClient::new(channel),
            request_timeout: config.request_timeout,
        }
    }

    fn client(&self) -> DatabaseClient<Channel> {
        self.client.clone()
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        if let Some(timeout) = self.request_timeout {
            request.set_timeout(timeout);
        }
        request
    }

    fn range_request(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        range: &RowRange,
    ) -> Request<proto::RangeRequest> {
        self.request(proto::RangeRequest {
            name: db.to_string(),
            table: table.to_string(),
            start: range.start().to_vec(),
            limit: range.limit().to_vec(),
            schema_version,
        })
    }

    fn row_request(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        key: &str,
    ) -> Request<proto::RowRequest> {
        self.request(proto::RowRequest {
            name: db.to_string(),
            table: table.to_string(),
            key: key.to_string(),
            schema_version,
        })
    }

    fn table_request(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
    ) -> Request<proto::TableRequest> {
        self.request(proto::TableRequest {
            name: db.to_string(),
            table: table.to_string(),
            schema_version,
        })
    }
}

#[async_trait]
impl DatabaseService for GrpcService {
    async fn begin_batch(
        &self,
        db: &str,
        schema_version: i32,
        options: &BatchOptions,
    ) -> Result<String> {
        let request = self.request(proto::BeginBatchRequest {
            name: db.to_string(),
            schema_version,
            options: Some(proto::BatchOptions {
                hint: options.hint.clone().unwrap_or_default(),
                read_only: options.read_only,
            }),
        });

        let response = self
            .client()
            .begin_batch(request)
            .await
            .map_err(map_status)?
            .into_inner();
        Ok(response.batch_suffix)
    }

    async fn commit(&self, batch: &str, schema_version: i32) -> Result<()> {
        let request = self.request(proto::CommitRequest {
            name: batch.to_string(),
            schema_version,
        });
        self.client().commit(request).await.map_err(map_status)?;
        Ok(())
    }

    async fn abort(&self, batch: &str, schema_version: i32) -> Result<()> {
        let request = self.request(proto::AbortRequest {
            name: batch.to_string(),
            schema_version,
        });
        self.client().abort(request).await.map_err(map_status)?;
        Ok(())
    }

    async fn list_tables(&self, db: &str) -> Result<Vec<String>> {
        let request = self.request(proto::ListTablesRequest {
            name: db.to_string(),
        });
        let response = self
            .client()
            .list_tables(request)
            .await
            .map_err(map_status)?
            .into_inner();
        Ok(response.tables)
    }

    async fn create_table(&self, db: &str, schema_version: i32, table: &str) -> Result<()> {
        let request = self.table_request(db, schema_version, table);
        self.client().create_table(request).await.map_err(map_status)?;
        Ok(())
    }

    async fn delete_table(&self, db: &str, schema_version: i32, table: &str) -> Result<()> {
        let request = self.table_request(db, schema_version, table);
        self.client().delete_table(request).await.map_err(map_status)?;
        Ok(())
    }

    async fn table_exists(&self, db: &str, schema_version: i32, table: &str) -> Result<bool> {
        let request = self.table_request(db, schema_version, table);
        let response = self
            .client()
            .table_exists(request)
            .await
            .map_err(map_status)?
            .into_inner();
        Ok(response.exists)
    }

    async fn get_resume_marker(&self, db: &str) -> Result<ResumeMarker> {
        let request = self.request(proto::GetResumeMarkerRequest {
            name: db.to_string(),
        });
        let response = self
            .client()
            .get_resume_marker(request)
            .await
            .map_err(map_status)?
            .into_inner();
        Ok(ResumeMarker::new(response.resume_marker))
    }

    async fn exec(&self, db: &str, schema_version: i32, query: &str) -> Result<ExecStream> {
        let request = self.request(proto::ExecRequest {
            name: db.to_string(),
            schema_version,
            query: query.to_string(),
        });
        let stream = self
            .client()
            .exec(request)
            .await
            .map_err(map_status)?
            .into_inner();

        Ok(stream
            .map(|item| {
                item.map(|response| response.values.into_iter().map(Bytes::from).collect::<Vec<_>>())
                    .map_err(map_status)
            })
            .boxed())
    }

    async fn watch(
        &self,
        db: &str,
        table: &str,
        prefix: &str,
        resume_marker: Option<&ResumeMarker>,
    ) -> Result<ChangeStream> {
        // Watch streams are long lived; the per-request timeout does not apply.
        let request = Request::new(proto::WatchRequest {
            name: db.to_string(),
            table: table.to_string(),
            prefix: prefix.to_string(),
            resume_marker: resume_marker.map(|marker| marker.as_bytes().to_vec()),
        });
        let stream = self
            .client()
            .watch(request)
            .await
            .map_err(map_status)?
            .into_inner();

        Ok(stream
            .map(|item| item.map(change_from_proto).map_err(map_status))
            .boxed())
    }

    async fn get(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        key: &str,
    ) -> Result<Option<Bytes>> {
        let request = self.row_request(db, schema_version, table, key);
        let response = self
            .client()
            .get(request)
            .await
            .map_err(map_status)?
            .into_inner();
        Ok(response.value.map(Bytes::from))
    }

    async fn put(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        key: &str,
        value: Bytes,
    ) -> Result<()> {
        let request = self.request(proto::PutRequest {
            name: db.to_string(),
            table: table.to_string(),
            key: key.to_string(),
            schema_version,
            value: value.to_vec(),
        });
        self.client().put(request).await.map_err(map_status)?;
        Ok(())
    }

    async fn delete(&self, db: &str, schema_version: i32, table: &str, key: &str) -> Result<()> {
        let request = self.row_request(db, schema_version, table, key);
        self.client().delete(request).await.map_err(map_status)?;
        Ok(())
    }

    async fn delete_range(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        range: &RowRange,
    ) -> Result<()> {
        let request = self.range_request(db, schema_version, table, range);
        self.client().delete_range(request).await.map_err(map_status)?;
        Ok(())
    }

    async fn scan(
        &self,
        db: &str,
        schema_version: i32,
        table: &str,
        range: &RowRange,
    ) -> Result<RowStream> {
        let request = self.range_request(db, schema_version, table, range);
        let stream = self
            .client()
            .scan(request)
            .await
            .map_err(map_status)?
            .into_inner();

        Ok(stream
            .map(|item| {
                item.map(|kv| KeyValue::new(kv.key, kv.value))
                    .map_err(map_status)
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::metadata::MetadataValue;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            map_status(Status::aborted("row k changed")),
            Error::ConcurrentBatch("row k changed".to_string())
        );
        assert!(map_status(Status::aborted("x")).is_concurrent_batch());
        assert_eq!(
            map_status(Status::not_found("table t")),
            Error::NotFound("table t".to_string())
        );
        assert!(matches!(
            map_status(Status::deadline_exceeded("slow")),
            Error::Timeout(_)
        ));
        assert!(matches!(
            map_status(Status::unauthenticated("who")),
            Error::PermissionDenied(_)
        ));
        assert!(matches!(
            map_status(Status::resource_exhausted("full")),
            Error::Unknown(_)
        ));
    }

    fn with_code(mut status: Status, code: &'static str) -> Status {
        status
            .metadata_mut()
            .insert(ERROR_CODE_KEY, MetadataValue::from_static(code));
        status
    }

    #[test]
    fn test_batch_rejections_keep_their_kind() {
        let read_only = with_code(Status::failed_precondition("put"), "READ_ONLY_BATCH");
        assert_eq!(map_status(read_only), Error::ReadOnlyBatch("put".to_string()));

        let mut finished = with_code(Status::failed_precondition("get"), "TERMINAL_BATCH");
        finished
            .metadata_mut()
            .insert(BATCH_STATE_KEY, MetadataValue::from_static("aborted"));
        assert_eq!(map_status(finished), Error::terminal("aborted", "get"));

        let conflict = with_code(Status::failed_precondition("row k"), "CONCURRENT_BATCH");
        assert!(map_status(conflict).is_concurrent_batch());

        // Without the code a precondition failure stays generic.
        assert!(matches!(
            map_status(Status::failed_precondition("put")),
            Error::InvalidArgument(_)
        ));
        // An unknown code falls back to the status code.
        let unknown = with_code(Status::not_found("t"), "SOMETHING_ELSE");
        assert!(matches!(map_status(unknown), Error::NotFound(_)));
    }

    #[test]
    fn test_terminal_without_state_metadata() {
        let status = with_code(Status::failed_precondition("commit"), "TERMINAL_BATCH");
        assert_eq!(map_status(status), Error::terminal("finished", "commit"));
    }

    #[test]
    fn test_change_from_proto() {
        let raw = change_from_proto(proto::Change {
            name: "users/alice".to_string(),
            state: proto::ChangeState::Exists as i32,
            value: Some(b"v".to_vec()),
            resume_marker: b"3".to_vec(),
            from_sync: None,
            continued: Some(true),
        });

        assert_eq!(raw.name, "users/alice");
        assert_eq!(raw.value, Some(Bytes::from_static(b"v")));
        assert_eq!(raw.resume_marker.as_bytes(), b"3");
        assert_eq!(raw.continued, Some(true));
        assert!(raw.from_sync.is_none());
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_config() {
        let config = ClientConfig::new().with_endpoint("not-a-url");
        let err = GrpcService::connect(&config).await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }
}
