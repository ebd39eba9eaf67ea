use std::path::Path;

use super::ServiceError;

/// The full-text search index.
pub trait SearchIndex: Send + Sync {
    /// Add a newly archived object to the index.
    fn add(&self, reference: &str, location: &Path) -> Result<(), ServiceError>;

    /// Remove an object from the index.
    fn remove(&self, reference: &str) -> Result<(), ServiceError>;

    /// Can content of this media type be indexed?
    fn searchable(&self, mime: &str) -> bool;
}
