//! Moving a submitted workspace's content into the permanent archive.
//!
//! Export runs on a synchronous worker after a workspace is submitted. Every
//! node is handled by exactly one strategy chosen from its status and its
//! position in the tree; an unexpected combination aborts the run before any
//! further content moves.

use actix::{Actor, Addr, Handler, Message, SyncArbiter, SyncContext};
use blake2::blake2b::blake2b;
use diesel::result::Error as DbError;
use failure::Fail;
use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use crate::{
    Config,
    db::{
        Connection,
        Pool,
        types::{NodeStatus, WorkspaceStatus},
    },
    models::{Workspace, WorkspaceNode, workspace::FindWorkspaceError},
    retire::{self, Destination, PlaceError},
    services::{ServiceError, Services},
    utils,
};

/// Export worker.
pub struct Exporter {
    pool: Pool,
    config: &'static Config,
    services: Services,
}

impl Exporter {
    pub fn new(pool: Pool, config: &'static Config, services: Services)
    -> Exporter {
        Exporter { pool, config, services }
    }

    /// Start the export worker on its own arbiter.
    pub fn start(pool: Pool, config: &'static Config, services: Services)
    -> Addr<Exporter> {
        SyncArbiter::start(1, move ||
            Exporter::new(pool.clone(), config, services.clone()))
    }
}

impl Actor for Exporter {
    type Context = SyncContext<Self>;
}

/// Move a submitted workspace's content into the archive and request
/// a crawl of the result.
pub struct ExportWorkspace {
    pub workspace: i32,
}

impl Message for ExportWorkspace {
    type Result = Result<(), ExportError>;
}

impl Handler<ExportWorkspace> for Exporter {
    type Result = Result<(), ExportError>;

    fn handle(&mut self, msg: ExportWorkspace, _: &mut Self::Context)
    -> Self::Result {
        match self.export(msg.workspace) {
            Ok(()) => {
                info!("Exported workspace {}, awaiting crawl", msg.workspace);
                Ok(())
            }
            Err(error) => {
                error!("Export of workspace {} failed: {}",
                    msg.workspace, error);
                self.record_failure(msg.workspace, &error);
                Err(error)
            }
        }
    }
}

/// How a single node leaves the workspace.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Strategy {
    /// Content already archived; staged changes, if any, overwrite it
    /// in place.
    General,
    /// New content entering the archive for the first time.
    Added,
    /// Old content retiring into trash or version storage.
    ReplacedOrDeleted,
    /// Content which fell out of the tree; trashed without touching its
    /// persistent identifier.
    Unlinked,
}

/// Choose the export strategy for one node.
///
/// `archived` is whether the node already carries an archive reference.
/// External leaves never export and are rejected here; callers filter them
/// out before asking.
pub(crate) fn select(
    status: NodeStatus,
    reachable: bool,
    is_top: bool,
    archived: bool,
) -> Result<Strategy, ExportError> {
    match status {
        NodeStatus::Deleted
        | NodeStatus::Replaced
        | NodeStatus::ExternalDeleted => Ok(Strategy::ReplacedOrDeleted),

        NodeStatus::External => Err(ExportError::Unexportable(status)),

        NodeStatus::Created
        | NodeStatus::Uploaded
        | NodeStatus::Iscopy => {
            if is_top && !archived {
                // The top of a workspace always comes from the archive.
                return Err(ExportError::Unexportable(status));
            }

            if !reachable {
                Ok(Strategy::Unlinked)
            } else if archived {
                Ok(Strategy::General)
            } else {
                Ok(Strategy::Added)
            }
        }
    }
}

impl Exporter {
    fn export(&self, workspace: i32) -> Result<(), ExportError> {
        let db = self.pool.get()?;
        let mut ws = Workspace::by_id(&*db, workspace)?;

        if ws.status != WorkspaceStatus::Submitted {
            return Err(ExportError::NotSubmitted(ws.status));
        }

        let mut top = ws.top_node(&*db)?
            .ok_or(ExportError::MissingTopNode(workspace))?;

        // Retired content moves aside first, freeing archive names for the
        // content replacing it.
        for mut node in WorkspaceNode::by_status(&*db, workspace, &[
            NodeStatus::Deleted,
            NodeStatus::Replaced,
            NodeStatus::ExternalDeleted,
        ])? {
            self.export_retired(&*db, workspace, &mut node)?;
        }

        for mut node in WorkspaceNode::unlinked(&*db, &ws)? {
            if node.status == NodeStatus::External
                || node.status.is_retired()
            {
                continue;
            }
            self.export_unlinked(&*db, workspace, &mut node)?;
        }

        select(top.status, true, true, top.archive_ref.is_some())?;
        self.export_subtree(&*db, &mut top)?;

        let top_ref = top.archive_ref.as_deref()
            .ok_or(ExportError::MissingTopNode(workspace))?;
        let crawl_id = self.services.crawler.invoke(top_ref)?;
        ws.set_crawl_id(&*db, &crawl_id)?;

        Ok(())
    }

    /// Export one reachable node's children, then its own content.
    ///
    /// Children come first so that identifiers minted for added content are
    /// already written into the parent's document when it is copied out.
    fn export_subtree(&self, dbconn: &Connection, node: &mut WorkspaceNode)
    -> Result<(), ExportError> {
        let staging = match node.kind {
            crate::db::types::NodeKind::Metadata =>
                node.staging_location.clone().map(PathBuf::from),
            _ => None,
        };

        let mut document = match staging {
            Some(ref staging) => {
                Some((self.services.documents.load(staging)
                    .map_err(ExportError::Service)?, staging.clone()))
            }
            None => None,
        };
        let mut dirty = false;

        for (link, mut child) in node.children(dbconn)? {
            if child.status == NodeStatus::External
                || child.status.is_retired()
            {
                continue;
            }

            let strategy = select(child.status, true, false,
                child.archive_ref.is_some())?;

            if strategy == Strategy::Added {
                self.place_added(dbconn, node, &mut child)?;

                if let Some(pid) = child.pid.as_deref() {
                    if let Some((doc, _)) = document.as_mut() {
                        dirty |= rewrite_reference(doc, &link.reference, pid);
                    }
                }
            }

            self.export_subtree(dbconn, &mut child)?;
        }

        if let Some((ref doc, ref staging)) = document {
            if dirty {
                self.services.documents.save(doc, staging)
                    .map_err(ExportError::Service)?;
            }
        }

        self.copy_content(node)
    }

    /// Give a freshly added node a place in the archive, a catalog entry and
    /// a persistent identifier.
    fn place_added(
        &self,
        dbconn: &Connection,
        parent: &WorkspaceNode,
        node: &mut WorkspaceNode,
    ) -> Result<(), ExportError> {
        let parent_ref = parent.archive_ref.as_deref()
            .ok_or_else(|| ExportError::Unexportable(parent.status))?;
        let parent_dir = parent.archive_location.as_deref()
            .map(Path::new)
            .and_then(Path::parent)
            .ok_or_else(|| ExportError::Unexportable(parent.status))?;

        let target = utils::next_available_name(parent_dir, &node.name);
        let target_str = target.to_str()
            .ok_or_else(|| ExportError::BadArchivePath(target.clone()))?;

        let mime = node.mime.as_deref().unwrap_or("application/octet-stream");
        let reference = self.services.catalog
            .register(parent_ref, &target, mime)?;
        let pid = self.services.handles.mint(target_str)?;

        info!("Adding {} to the archive as {} ({})",
            node.name, reference, pid);

        node.set_archived(dbconn, &reference, target_str, &pid)?;

        Ok(())
    }

    /// Copy a node's staged content over its archive location, verifying the
    /// copy, and index it.
    fn copy_content(&self, node: &WorkspaceNode) -> Result<(), ExportError> {
        let (staging, archive) = match (&node.staging_location,
                &node.archive_location) {
            (Some(staging), Some(archive)) => (staging, archive),
            // Nothing staged means nothing changed.
            _ => return Ok(()),
        };

        let archive = Path::new(archive);
        if let Some(dir) = archive.parent() {
            fs::create_dir_all(dir)?;
        }

        fs::copy(staging, archive)?;
        verify_copy(Path::new(staging), archive)?;

        if let Some(ref reference) = node.archive_ref {
            let searchable = node.mime.as_deref()
                .map_or(false, |m| self.services.search.searchable(m));

            if searchable {
                self.services.search.add(reference, archive)?;
            }
        }

        Ok(())
    }

    /// Retire a deleted or replaced node's old archive content.
    fn export_retired(
        &self,
        dbconn: &Connection,
        workspace: i32,
        node: &mut WorkspaceNode,
    ) -> Result<(), ExportError> {
        let location = match node.archive_location {
            Some(ref location) => PathBuf::from(location),
            // Never archived; there is nothing to retire.
            None => return Ok(()),
        };

        // A rerun after a partial failure finds content already retired.
        if location.starts_with(&self.config.storage.trash)
            || location.starts_with(&self.config.storage.versions)
        {
            return Ok(());
        }

        let destination = match node.status {
            NodeStatus::Replaced => Destination::Version,
            _ => Destination::Trash,
        };

        let target = retire::place(&self.config.storage, destination,
            workspace, node)?;
        let target_str = target.to_str()
            .ok_or_else(|| ExportError::BadArchivePath(target.clone()))?;

        if let Some(ref reference) = node.archive_ref {
            self.services.catalog.relocate(reference, &target)?;
            self.services.search.remove(reference)?;
        }

        // A deleted object's identifier dies with it; a replaced object's
        // identifier follows its old content into version storage.
        if let Some(pid) = node.pid.clone() {
            match node.status {
                NodeStatus::Replaced =>
                    self.services.handles.repoint(&pid, target_str)?,
                _ => self.services.handles.delete(&pid)?,
            }
        }

        node.set_archive_location(dbconn, target_str)?;

        Ok(())
    }

    /// Trash content which fell out of the tree. Its identifier, if any,
    /// stays untouched.
    fn export_unlinked(
        &self,
        dbconn: &Connection,
        workspace: i32,
        node: &mut WorkspaceNode,
    ) -> Result<(), ExportError> {
        if node.archive_location.is_none() {
            // An upload that was never linked; its staged copy simply stays
            // behind and is removed with the workspace.
            return Ok(());
        }

        let target = retire::place(&self.config.storage, Destination::Trash,
            workspace, node)?;
        let target_str = target.to_str()
            .ok_or_else(|| ExportError::BadArchivePath(target.clone()))?;

        if let Some(ref reference) = node.archive_ref {
            self.services.catalog.relocate(reference, &target)?;
            self.services.search.remove(reference)?;
        }

        node.set_archive_location(dbconn, target_str)?;

        Ok(())
    }

    /// Best-effort recording of a fatal export error on the workspace row.
    fn record_failure(&self, workspace: i32, error: &ExportError) {
        let result = self.pool.get()
            .map_err(failure::Error::from)
            .and_then(|db| {
                let mut ws = Workspace::by_id(&*db, workspace)?;
                ws.set_status(&*db, WorkspaceStatus::DataMovedError,
                    Some(&error.to_string()))?;
                Ok(())
            });

        if let Err(err) = result {
            error!("Could not record export failure on workspace {}: {}",
                workspace, err);
        }
    }
}

/// Point a document reference carrying `reference` at `pid`.
fn rewrite_reference(
    document: &mut crate::services::MetadataDocument,
    reference: &str,
    pid: &str,
) -> bool {
    let mut dirty = false;

    for entry in &mut document.references {
        let hit = entry.id.as_deref() == Some(reference)
            || (entry.id.is_none()
                && entry.location.as_deref() == Some(reference));

        if hit && entry.id.as_deref() != Some(pid) {
            entry.id = Some(pid.to_string());
            dirty = true;
        }
    }

    dirty
}

/// Compare source and destination digests after a copy.
fn verify_copy(source: &Path, target: &Path) -> Result<(), ExportError> {
    let expected = blake2b(64, &[], &fs::read(source)?);
    let actual = blake2b(64, &[], &fs::read(target)?);

    if expected != actual {
        return Err(ExportError::ChecksumMismatch(target.to_path_buf()));
    }

    Ok(())
}

#[derive(Debug, Fail)]
pub enum ExportError {
    /// The workspace is not in the submitted stage.
    #[fail(display = "Workspace in status {} cannot be exported", _0)]
    NotSubmitted(WorkspaceStatus),
    /// The workspace never finished importing.
    #[fail(display = "Workspace {} has no top node", _0)]
    MissingTopNode(i32),
    /// A node's status does not fit any export strategy at its position.
    #[fail(display = "Node in status {} cannot be exported here", _0)]
    Unexportable(NodeStatus),
    /// An archive path contained unrepresentable characters.
    #[fail(display = "{:?} is not a usable archive path", _0)]
    BadArchivePath(PathBuf),
    /// Copied content did not match its source.
    #[fail(display = "Copy at {:?} does not match its source", _0)]
    ChecksumMismatch(PathBuf),
    /// A collaborator failed.
    #[fail(display = "{}", _0)]
    Service(#[cause] ServiceError),
    /// Retiring old content failed.
    #[fail(display = "{}", _0)]
    Place(#[cause] PlaceError),
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// Error obtaining a database connection.
    #[fail(display = "Cannot obtain database connection: {}", _0)]
    DbPool(#[cause] r2d2::Error),
    /// The workspace could not be loaded.
    #[fail(display = "{}", _0)]
    Workspace(#[cause] FindWorkspaceError),
    /// An operating system error.
    #[fail(display = "System error: {}", _0)]
    System(#[cause] io::Error),
}

impl_from! { for ExportError ;
    ServiceError => |e| ExportError::Service(e),
    PlaceError => |e| ExportError::Place(e),
    DbError => |e| ExportError::Database(e),
    r2d2::Error => |e| ExportError::DbPool(e),
    FindWorkspaceError => |e| ExportError::Workspace(e),
    io::Error => |e| ExportError::System(e),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{DocumentReference, MetadataDocument};

    #[test]
    fn retired_statuses_always_retire() {
        for &status in &[
            NodeStatus::Deleted,
            NodeStatus::Replaced,
            NodeStatus::ExternalDeleted,
        ] {
            for &reachable in &[true, false] {
                assert_eq!(
                    select(status, reachable, false, true).unwrap(),
                    Strategy::ReplacedOrDeleted);
            }
        }
    }

    #[test]
    fn reachable_nodes_split_on_archive_membership() {
        assert_eq!(
            select(NodeStatus::Iscopy, true, false, true).unwrap(),
            Strategy::General);
        assert_eq!(
            select(NodeStatus::Uploaded, true, false, false).unwrap(),
            Strategy::Added);
        assert_eq!(
            select(NodeStatus::Created, true, false, false).unwrap(),
            Strategy::Added);
        assert_eq!(
            select(NodeStatus::Uploaded, true, false, true).unwrap(),
            Strategy::General);
    }

    #[test]
    fn unreachable_nodes_are_unlinked() {
        assert_eq!(
            select(NodeStatus::Uploaded, false, false, false).unwrap(),
            Strategy::Unlinked);
        assert_eq!(
            select(NodeStatus::Iscopy, false, false, true).unwrap(),
            Strategy::Unlinked);
    }

    #[test]
    fn the_top_node_must_come_from_the_archive() {
        assert_eq!(
            select(NodeStatus::Iscopy, true, true, true).unwrap(),
            Strategy::General);
        assert!(select(NodeStatus::Uploaded, true, true, false).is_err());
    }

    #[test]
    fn external_leaves_never_export() {
        assert!(select(NodeStatus::External, true, false, true).is_err());
    }

    #[test]
    fn rewriting_points_matching_references_at_the_new_identifier() {
        let mut doc = MetadataDocument {
            self_handle: None,
            title: None,
            references: vec![
                DocumentReference {
                    id: None,
                    location: Some("./audio.wav".to_string()),
                    mime: None,
                },
                DocumentReference {
                    id: Some("obj-2".to_string()),
                    location: None,
                    mime: None,
                },
            ],
        };

        assert!(rewrite_reference(&mut doc, "./audio.wav", "hdl:11142/a"));
        assert_eq!(doc.references[0].id.as_deref(), Some("hdl:11142/a"));

        // Already pointing at the identifier; nothing to do.
        assert!(!rewrite_reference(&mut doc, "hdl:11142/a", "hdl:11142/a"));

        assert!(rewrite_reference(&mut doc, "obj-2", "hdl:11142/b"));
        assert_eq!(doc.references[1].id.as_deref(), Some("hdl:11142/b"));
    }

    #[test]
    fn copies_are_verified_against_their_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("a");
        let good = dir.path().join("b");
        let bad = dir.path().join("c");

        fs::write(&source, b"content").unwrap();
        fs::write(&good, b"content").unwrap();
        fs::write(&bad, b"different").unwrap();

        assert!(verify_copy(&source, &good).is_ok());
        assert!(verify_copy(&source, &bad).is_err());
    }
}
