/// Change feed value types
///
/// The server streams one `RawChange` per mutated row. `WatchChange::decode`
/// turns it into the immutable value handed to callers.
use crate::{Error, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire state: the row exists and the record carries its new value.
pub const STATE_EXISTS: i32 = 0;
/// Wire state: the row was deleted.
pub const STATE_DOES_NOT_EXIST: i32 = 1;

/// Opaque cursor into the change log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResumeMarker(Bytes);

impl ResumeMarker {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResumeMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// One undecoded record of the change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    /// `<table>/<row>`
    pub name: String,
    /// One of [`STATE_EXISTS`] or [`STATE_DOES_NOT_EXIST`]
    pub state: i32,
    pub value: Option<Bytes>,
    pub resume_marker: ResumeMarker,
    pub from_sync: Option<bool>,
    pub continued: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Put,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeType::Put => f.write_str("put"),
            ChangeType::Delete => f.write_str("delete"),
        }
    }
}

/// A single row mutation observed on the change feed.
///
/// `value_bytes` is present exactly when `change_type` is [`ChangeType::Put`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchChange {
    table_name: String,
    row_name: String,
    change_type: ChangeType,
    value_bytes: Option<Bytes>,
    resume_marker: ResumeMarker,
    from_sync: bool,
    continued: bool,
}

impl WatchChange {
    /// Decode one change feed record.
    ///
    /// The table is everything before the last `/` of the record name and
    /// the row is the final component. A name without `/` is a row of the
    /// unnamed table.
    pub fn decode(raw: RawChange) -> Result<Self> {
        let change_type = match raw.state {
            STATE_EXISTS => ChangeType::Put,
            STATE_DOES_NOT_EXIST => ChangeType::Delete,
            other => return Err(Error::InvalidChangeState(other)),
        };

        let (table_name, row_name) = match raw.name.rsplit_once('/') {
            Some((table, row)) => (table.to_string(), row.to_string()),
            None => (String::new(), raw.name),
        };

        let value_bytes = match change_type {
            ChangeType::Put => Some(raw.value.unwrap_or_default()),
            ChangeType::Delete => None,
        };

        Ok(Self {
            table_name,
            row_name,
            change_type,
            value_bytes,
            resume_marker: raw.resume_marker,
            from_sync: raw.from_sync.unwrap_or(false),
            continued: raw.continued.unwrap_or(false),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn row_name(&self) -> &str {
        &self.row_name
    }

    pub fn change_type(&self) -> ChangeType {
        self.change_type
    }

    pub fn value_bytes(&self) -> Option<&Bytes> {
        self.value_bytes.as_ref()
    }

    /// The new row value, or an error for a delete.
    pub fn value(&self) -> Result<&Bytes> {
        self.value_bytes
            .as_ref()
            .ok_or_else(|| Error::InvalidArgument("invalid change type".to_string()))
    }

    pub fn resume_marker(&self) -> &ResumeMarker {
        &self.resume_marker
    }

    /// Whether the change arrived via sync rather than a local write.
    pub fn from_sync(&self) -> bool {
        self.from_sync
    }

    /// Whether more changes from the same originating batch follow.
    pub fn continued(&self) -> bool {
        self.continued
    }
}
