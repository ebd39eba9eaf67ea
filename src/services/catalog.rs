use std::path::{Path, PathBuf};

use super::ServiceError;

/// An object known to the archive catalog.
#[derive(Clone, Debug)]
pub struct ArchiveObject {
    /// Catalog reference of this object.
    pub reference: String,
    /// Physical location of this object's content.
    pub location: PathBuf,
    /// Size of the content in bytes.
    pub size: u64,
    /// Is the content stored on-site (as opposed to a remote mirror)?
    pub on_site: bool,
    /// Declared media type, if the catalog records one.
    pub mime: Option<String>,
    /// Persistent identifier, if one was assigned.
    pub pid: Option<String>,
    /// Catalog references of all objects linking to this one.
    pub parents: Vec<String>,
}

/// The archive's object catalog.
pub trait ArchiveCatalog: Send + Sync {
    /// Resolve a catalog reference. Returns `None` for unknown references.
    fn resolve(&self, reference: &str) -> Result<Option<ArchiveObject>, ServiceError>;

    /// Look an object up by its persistent identifier.
    fn by_handle(&self, handle: &str) -> Result<Option<ArchiveObject>, ServiceError>;

    /// Register a new object below `parent`, returning its new catalog
    /// reference.
    fn register(&self, parent: &str, location: &Path, mime: &str)
        -> Result<String, ServiceError>;

    /// Update the recorded location of an object.
    fn relocate(&self, reference: &str, location: &Path) -> Result<(), ServiceError>;
}
