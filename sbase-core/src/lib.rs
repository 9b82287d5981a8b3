pub mod error;
pub mod naming;
pub mod options;
pub mod range;
pub mod retry;
pub mod watch;

pub use error::{Error, ErrorKind, Result};
pub use naming::NamedScope;
pub use options::BatchOptions;
pub use range::RowRange;
pub use retry::{RetryOn, RetryPolicy};
pub use watch::{ChangeType, RawChange, ResumeMarker, WatchChange};
