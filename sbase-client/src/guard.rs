use parking_lot::Mutex;
use sbase_core::{Error, Result};

/// Lifecycle of a batch handle. `Committed` and `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Open,
    Committed,
    Aborted,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchState::Open)
    }

    fn as_str(&self) -> &'static str {
        match self {
            BatchState::Open => "open",
            BatchState::Committed => "committed",
            BatchState::Aborted => "aborted",
        }
    }
}

/// Client-side state shared by every clone of a batch handle and by the
/// tables and rows obtained through it.
#[derive(Debug)]
pub(crate) struct BatchGuard {
    read_only: bool,
    state: Mutex<BatchState>,
}

impl BatchGuard {
    pub(crate) fn new(read_only: bool) -> Self {
        Self {
            read_only,
            state: Mutex::new(BatchState::Open),
        }
    }

    pub(crate) fn read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn state(&self) -> BatchState {
        *self.state.lock()
    }

    pub(crate) fn check_open(&self, op: &str) -> Result<()> {
        let state = self.state();
        if state.is_terminal() {
            return Err(Error::terminal(state.as_str(), op));
        }
        Ok(())
    }

    /// A write must see an open batch first; only then does the read-only
    /// flag apply.
    pub(crate) fn check_write(&self, op: &str) -> Result<()> {
        self.check_open(op)?;
        if self.read_only {
            return Err(Error::ReadOnlyBatch(op.to_string()));
        }
        Ok(())
    }

    /// Move to a terminal state. Fails if the batch is already terminal.
    pub(crate) fn finish(&self, op: &str, to: BatchState) -> Result<()> {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return Err(Error::terminal(state.as_str(), op));
        }
        *state = to;
        Ok(())
    }
}
