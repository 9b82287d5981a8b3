//! Protocol Buffers messages and gRPC client for the Syncbase database service
//!
//! Generated from `proto/syncbase.proto` by `tonic-build`.

tonic::include_proto!("syncbase");

pub use database_client::DatabaseClient;

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn test_change_optional_fields_survive_encoding() {
        let change = Change {
            name: "users/alice".to_string(),
            state: ChangeState::DoesNotExist as i32,
            value: None,
            resume_marker: b"12".to_vec(),
            from_sync: Some(true),
            continued: None,
        };

        let decoded = Change::decode(change.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded, change);
        assert!(decoded.value.is_none());
        assert_eq!(decoded.from_sync, Some(true));
        assert!(decoded.continued.is_none());
    }

    #[test]
    fn test_missing_value_is_distinct_from_empty() {
        let missing = GetResponse { value: None };
        let empty = GetResponse {
            value: Some(Vec::new()),
        };

        let decoded = GetResponse::decode(empty.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.value, Some(Vec::new()));
        let decoded = GetResponse::decode(missing.encode_to_vec().as_slice()).unwrap();
        assert!(decoded.value.is_none());
    }

    #[test]
    fn test_begin_batch_request_defaults() {
        let request = BeginBatchRequest::default();
        assert!(request.name.is_empty());
        assert!(request.options.is_none());
    }
}
