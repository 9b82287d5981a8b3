use crate::service::ExecStream;
use bytes::Bytes;
use futures::stream::{StreamExt, TryStreamExt};
use sbase_core::Result;

/// Output of `exec`: column headers and a stream of rows.
pub struct QueryResult {
    headers: Vec<String>,
    rows: ExecStream,
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl QueryResult {
    /// Split a raw exec stream into its header row and the remaining rows.
    pub(crate) async fn from_stream(mut stream: ExecStream) -> Result<Self> {
        let headers = match stream.next().await {
            Some(row) => row?
                .iter()
                .map(|header| String::from_utf8_lossy(header).into_owned())
                .collect(),
            None => Vec::new(),
        };
        Ok(Self {
            headers,
            rows: stream,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn into_rows(self) -> ExecStream {
        self.rows
    }

    /// Drain every remaining row.
    pub async fn collect_rows(self) -> Result<Vec<Vec<Bytes>>> {
        self.rows.try_collect().await
    }
}
