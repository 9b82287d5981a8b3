/// Object naming shared by databases, batches, tables and rows
use crate::{Error, Result};

/// Separates a database name from the server-issued batch suffix.
pub const BATCH_SEPARATOR: &str = "##";

/// Join two name components with a single `/`.
pub fn join(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    match (parent.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => parent.to_string(),
        _ => format!("{}/{}", parent, child),
    }
}

/// Reject names the server would interpret as nested objects.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::InvalidName(name.to_string()));
    }
    Ok(())
}

/// The identity of a named resource: its relative name and the full name
/// formed by joining it under its parent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedScope {
    parent_full_name: String,
    name: String,
    full_name: String,
}

impl NamedScope {
    pub fn new(parent_full_name: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let parent_full_name = parent_full_name.into();
        let name = name.into();
        validate_name(&name)?;
        let full_name = join(&parent_full_name, &name);
        Ok(Self {
            parent_full_name,
            name,
            full_name,
        })
    }

    /// The scope of a batch opened on this database.
    pub fn batch(&self, suffix: &str) -> Self {
        let name = format!("{}{}{}", self.name, BATCH_SEPARATOR, suffix);
        let full_name = join(&self.parent_full_name, &name);
        Self {
            parent_full_name: self.parent_full_name.clone(),
            name,
            full_name,
        }
    }

    pub fn parent_full_name(&self) -> &str {
        &self.parent_full_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join() {
        assert_eq!(join("svc/app", "db"), "svc/app/db");
        assert_eq!(join("svc/app/", "/db"), "svc/app/db");
        assert_eq!(join("", "db"), "db");
        assert_eq!(join("svc", ""), "svc");
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("table1").is_ok());
        assert_eq!(
            validate_name("a/b"),
            Err(Error::InvalidName("a/b".to_string()))
        );
        assert!(validate_name("").is_err());
    }

    #[test]
    fn test_batch_scope_differs_from_parent() {
        let db = NamedScope::new("svc/app", "db").unwrap();
        let batch = db.batch("42");
        assert_eq!(batch.name(), "db##42");
        assert_eq!(batch.full_name(), "svc/app/db##42");
        assert_ne!(batch.full_name(), db.full_name());
        assert_eq!(batch.parent_full_name(), db.parent_full_name());
    }
}
