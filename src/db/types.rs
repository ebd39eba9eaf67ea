use diesel_derive_enum::DbEnum;
use serde::{Deserialize, Serialize};

use std::fmt;

/// Lifecycle state of a workspace.
#[derive(Clone, Copy, DbEnum, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[DieselType = "Workspace_status"]
#[serde(rename_all = "kebab-case")]
pub enum WorkspaceStatus {
    /// Import of the archive subtree is in progress.
    Initializing,
    /// The workspace is ready to be edited.
    Initialized,
    /// The workspace was submitted; data is being, or has been, written back
    /// to the archive and the crawler has been asked to confirm.
    Submitted,
    /// Terminal: data moved, crawl confirmed, bookkeeping complete.
    DataMovedSuccess,
    /// Terminal: writing data back to the archive failed.
    DataMovedError,
    /// Terminal: data moved but the crawler reported failure.
    CrawlerError,
    /// Terminal: data moved and crawl succeeded, but permanent version records
    /// could not be created.
    VersioningError,
}

impl WorkspaceStatus {
    /// Is this a status a submitted workspace ends up in?
    pub fn is_terminal(self) -> bool {
        match self {
            WorkspaceStatus::DataMovedSuccess
            | WorkspaceStatus::DataMovedError
            | WorkspaceStatus::CrawlerError
            | WorkspaceStatus::VersioningError => true,
            _ => false,
        }
    }
}

/// State of a single node within a workspace.
#[derive(Clone, Copy, DbEnum, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[DieselType = "Node_status"]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    /// Created inside the workspace, not yet backed by any file.
    Created,
    /// Uploaded by the user into the workspace staging area.
    Uploaded,
    /// Copied into the workspace from the archive.
    Iscopy,
    /// Read-only stand-in for an archive object; never exported.
    External,
    /// Marked for deletion on submit.
    Deleted,
    /// Replaced by another node; the old content moves to versioning storage
    /// on submit.
    Replaced,
    /// An external stand-in whose reference was removed.
    ExternalDeleted,
}

impl NodeStatus {
    /// Does this status mean the node's current archive content is retired
    /// on export?
    pub fn is_retired(self) -> bool {
        match self {
            NodeStatus::Deleted
            | NodeStatus::Replaced
            | NodeStatus::ExternalDeleted => true,
            _ => false,
        }
    }

    /// Status a node takes when its content is marked for removal.
    pub fn on_delete(self) -> NodeStatus {
        match self {
            NodeStatus::External => NodeStatus::ExternalDeleted,
            _ => NodeStatus::Deleted,
        }
    }
}

/// Broad classification of a node's content.
#[derive(Clone, Copy, DbEnum, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[DieselType = "Node_kind"]
#[serde(rename_all = "kebab-case")]
pub enum NodeKind {
    /// A metadata document which may reference other nodes.
    Metadata,
    /// A leaf resource.
    Resource,
    /// A file the type checker could not accept.
    Unknown,
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            WorkspaceStatus::Initializing => "initializing",
            WorkspaceStatus::Initialized => "initialized",
            WorkspaceStatus::Submitted => "submitted",
            WorkspaceStatus::DataMovedSuccess => "data-moved-success",
            WorkspaceStatus::DataMovedError => "data-moved-error",
            WorkspaceStatus::CrawlerError => "crawler-error",
            WorkspaceStatus::VersioningError => "versioning-error",
        })
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            NodeStatus::Created => "created",
            NodeStatus::Uploaded => "uploaded",
            NodeStatus::Iscopy => "iscopy",
            NodeStatus::External => "external",
            NodeStatus::Deleted => "deleted",
            NodeStatus::Replaced => "replaced",
            NodeStatus::ExternalDeleted => "external-deleted",
        })
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match *self {
            NodeKind::Metadata => "metadata",
            NodeKind::Resource => "resource",
            NodeKind::Unknown => "unknown",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleting_an_external_stand_in_keeps_it_external() {
        assert_eq!(NodeStatus::External.on_delete(),
            NodeStatus::ExternalDeleted);
        assert_eq!(NodeStatus::Iscopy.on_delete(), NodeStatus::Deleted);
        assert_eq!(NodeStatus::Uploaded.on_delete(), NodeStatus::Deleted);

        assert!(NodeStatus::External.on_delete().is_retired());
        assert!(NodeStatus::Iscopy.on_delete().is_retired());
    }
}
