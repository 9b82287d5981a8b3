use serde::{Deserialize, Serialize};

/// Options for opening a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Free-form description, surfaced in server logs.
    pub hint: Option<String>,

    /// Reject all writes and never commit. Used to read a consistent
    /// snapshot (and optionally a resume marker).
    pub read_only: bool,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a read-only batch
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}
