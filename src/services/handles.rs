use super::ServiceError;

/// The persistent-identifier (handle) service.
pub trait HandleService: Send + Sync {
    /// Mint a new handle pointing at `target`.
    fn mint(&self, target: &str) -> Result<String, ServiceError>;

    /// Repoint an existing handle at a new target.
    fn repoint(&self, handle: &str, target: &str) -> Result<(), ServiceError>;

    /// Delete a handle.
    fn delete(&self, handle: &str) -> Result<(), ServiceError>;

    /// Does this text look like a handle at all?
    fn is_handle(&self, text: &str) -> bool;

    /// Does this handle's prefix belong to this archive?
    fn is_ours(&self, handle: &str) -> bool;

    /// Do two handles identify the same object (ignoring syntax differences)?
    fn equivalent(&self, a: &str, b: &str) -> bool;
}
