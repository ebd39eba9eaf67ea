//! Importing archive subtrees into workspaces.
//!
//! Import runs on a synchronous worker; callers send [`ImportSubtree`] and
//! observe completion through the returned future. A run either produces a
//! staged tree plus a list of recoverable [`ImportProblem`]s, or fails as a
//! whole with an [`ImportError`].

use actix::{Actor, Addr, Handler, Message, SyncArbiter, SyncContext};
use diesel::result::Error as DbError;
use failure::Fail;
use std::{
    collections::HashSet,
    fs,
    io,
    path::{Path, PathBuf},
};

use crate::{
    Config,
    db::{
        Connection,
        Pool,
        models as db,
        types::{NodeKind, NodeStatus, WorkspaceStatus},
    },
    models::{ImportProblem, Workspace, WorkspaceNode, workspace::FindWorkspaceError},
    services::{ArchiveObject, DocumentReference, ServiceError, Services},
    upload::{self, UploadError},
    utils,
};

/// Import worker.
pub struct Importer {
    pool: Pool,
    config: &'static Config,
    services: Services,
}

impl Importer {
    pub fn new(pool: Pool, config: &'static Config, services: Services)
    -> Importer {
        Importer { pool, config, services }
    }

    /// Start the import worker on its own arbiter.
    pub fn start(pool: Pool, config: &'static Config, services: Services)
    -> Addr<Importer> {
        SyncArbiter::start(1, move ||
            Importer::new(pool.clone(), config, services.clone()))
    }
}

impl Actor for Importer {
    type Context = SyncContext<Self>;
}

/// Stage the subtree rooted at an archive reference into a workspace.
pub struct ImportSubtree {
    pub workspace: i32,
    /// Archive reference of the subtree's root.
    pub reference: String,
}

impl Message for ImportSubtree {
    type Result = Result<ImportReport, ImportFailure>;
}

/// Route files left in a workspace's orphan directory back through upload
/// processing.
pub struct SweepOrphans {
    pub workspace: i32,
}

impl Message for SweepOrphans {
    type Result = Result<Vec<ImportProblem>, ImportFailure>;
}

/// Outcome of a successful import run.
#[derive(Debug)]
pub struct ImportReport {
    /// ID of the workspace's new top node.
    pub top_node: i32,
    /// Recoverable problems found along the way.
    pub problems: Vec<ImportProblem>,
}

/// Outcome of a failed import run.
///
/// Problems found before the fatal error are preserved for reporting.
#[derive(Debug, Fail)]
#[fail(display = "{}", error)]
pub struct ImportFailure {
    #[fail(cause)]
    pub error: ImportError,
    pub problems: Vec<ImportProblem>,
}

impl Handler<ImportSubtree> for Importer {
    type Result = Result<ImportReport, ImportFailure>;

    fn handle(&mut self, msg: ImportSubtree, _: &mut Self::Context)
    -> Self::Result {
        let mut ctx = ImportContext::new(msg.workspace);

        match self.import_subtree(&mut ctx, &msg.reference) {
            Ok(top_node) => {
                info!("Imported {} into workspace {} as node {} ({} problems)",
                    msg.reference, msg.workspace, top_node, ctx.problems.len());
                Ok(ImportReport { top_node, problems: ctx.problems })
            }
            Err(error) => {
                error!("Import of {} into workspace {} failed: {}",
                    msg.reference, msg.workspace, error);
                self.record_failure(msg.workspace, &error);
                Err(ImportFailure { error, problems: ctx.problems })
            }
        }
    }
}

impl Handler<SweepOrphans> for Importer {
    type Result = Result<Vec<ImportProblem>, ImportFailure>;

    fn handle(&mut self, msg: SweepOrphans, _: &mut Self::Context)
    -> Self::Result {
        self.sweep_orphans(msg.workspace)
            .map_err(|error| ImportFailure { error, problems: Vec::new() })
    }
}

/// State threaded through one import run.
struct ImportContext {
    workspace: i32,
    /// Archive references already imported in this run.
    visited: HashSet<String>,
    /// References of the ancestors currently being imported, innermost last.
    stack: Vec<String>,
    problems: Vec<ImportProblem>,
}

impl ImportContext {
    fn new(workspace: i32) -> ImportContext {
        ImportContext {
            workspace,
            visited: HashSet::new(),
            stack: Vec::new(),
            problems: Vec::new(),
        }
    }
}

/// How a reference relates to the tree built so far.
#[derive(Debug, Eq, PartialEq)]
enum TreeEntry {
    /// Not seen in this run yet.
    Fresh,
    /// Already imported through another reference in this tree.
    Revisit,
    /// Refers back to an ancestor still being imported.
    Cycle,
}

fn classify_entry(
    stack: &[String],
    visited: &HashSet<String>,
    reference: &str,
) -> TreeEntry {
    if stack.iter().any(|ancestor| ancestor == reference) {
        TreeEntry::Cycle
    } else if visited.contains(reference) {
        TreeEntry::Revisit
    } else {
        TreeEntry::Fresh
    }
}

/// A node's position below its parent during import.
struct ParentLink<'a> {
    node: &'a WorkspaceNode,
    /// Reference text as it appears in the parent's document.
    reference: &'a str,
    /// Media type the parent's document declares for this child.
    declared_mime: Option<&'a str>,
}

impl Importer {
    fn import_subtree(&self, ctx: &mut ImportContext, reference: &str)
    -> Result<i32, ImportError> {
        let db = self.pool.get()?;
        let mut workspace = Workspace::by_id(&*db, ctx.workspace)?;

        let top = self.import_node(&*db, ctx, reference, None)?;

        workspace.set_top_node(&*db, top.id)?;
        workspace.set_status(&*db, WorkspaceStatus::Initialized, None)?;

        Ok(top.id)
    }

    /// Import a single archive object, recursing into metadata documents.
    fn import_node(
        &self,
        dbconn: &Connection,
        ctx: &mut ImportContext,
        reference: &str,
        parent: Option<ParentLink>,
    ) -> Result<WorkspaceNode, ImportError> {
        let object = self.services.catalog.resolve(reference)?
            .ok_or_else(|| ImportError::ArchiveLookup(reference.to_string()))?;

        // Objects linked from elsewhere in the archive stay shared; they
        // enter the workspace as external leaves and their subtree is not
        // staged.
        if parent.is_some() && object.parents.len() > 1 {
            info!("{} has {} archive parents, keeping it external",
                object.reference, object.parents.len());
            return self.create_external(dbconn, ctx, &object, parent);
        }

        match classify_entry(&ctx.stack, &ctx.visited, &object.reference) {
            TreeEntry::Cycle =>
                return Err(ImportError::Circular(object.reference)),
            TreeEntry::Revisit => {
                // One parent per object; the first link stays and the extra
                // reference is noted as a problem by link_to_parent.
                let existing = WorkspaceNode::by_archive_ref(dbconn,
                        ctx.workspace, &object.reference)?
                    .ok_or_else(||
                        ImportError::Circular(object.reference.clone()))?;
                self.link_to_parent(dbconn, ctx, &existing, parent)?;
                return Ok(existing);
            }
            TreeEntry::Fresh => {
                ctx.visited.insert(object.reference.clone());
            }
        }

        let name = object_name(&object);
        let declared_mime = object.mime.as_deref()
            .or_else(|| parent.as_ref().and_then(|p| p.declared_mime));
        let is_metadata = declared_mime
            .map_or(false, |m| m == self.config.typecheck.metadata_mime);

        let mut mime = declared_mime.map(str::to_string);
        let mut archivable = true;

        if !is_metadata {
            if let Some(verdict) = self.typecheck(ctx, &object, &name)? {
                archivable = verdict.0;
                if let Some(detected) = verdict.1 {
                    mime = Some(detected);
                }
            }
        }

        let staging = if is_metadata {
            Some(self.stage_metadata(ctx.workspace, &object, &name)?)
        } else {
            None
        };

        let node = WorkspaceNode::create(dbconn, &db::NewWorkspaceNode {
            workspace: ctx.workspace,
            archive_ref: Some(&object.reference),
            archive_location: object.location.to_str(),
            staging_location: staging.as_ref().and_then(|p| p.to_str()),
            origin_location: object.location.to_str(),
            name: &name,
            kind: if !archivable {
                NodeKind::Unknown
            } else if is_metadata {
                NodeKind::Metadata
            } else {
                NodeKind::Resource
            },
            mime: mime.as_deref(),
            status: NodeStatus::Iscopy,
            pid: object.pid.as_deref(),
            archivable,
        })?;

        self.link_to_parent(dbconn, ctx, &node, parent)?;

        if let Some(staging) = staging {
            ctx.stack.push(object.reference.clone());
            let children = self.import_children(dbconn, ctx, &object, &node,
                &staging);
            ctx.stack.pop();
            children?;
        }

        Ok(node)
    }

    /// Import the references listed in a staged metadata document.
    fn import_children(
        &self,
        dbconn: &Connection,
        ctx: &mut ImportContext,
        object: &ArchiveObject,
        node: &WorkspaceNode,
        staging: &Path,
    ) -> Result<(), ImportError> {
        let document = self.services.documents.load(staging)
            .map_err(ImportError::Document)?;

        let object_dir = object.location.parent()
            .unwrap_or_else(|| Path::new(""));

        for reference in &document.references {
            let child = self.resolve_child(object_dir, reference)?;

            let text = reference.id.as_deref()
                .or(reference.location.as_deref())
                .unwrap_or("");

            self.import_node(dbconn, ctx, &child, Some(ParentLink {
                node,
                reference: text,
                declared_mime: reference.mime.as_deref(),
            }))?;
        }

        Ok(())
    }

    /// Turn a document reference into the catalog reference of an existing
    /// archive object.
    fn resolve_child(&self, object_dir: &Path, reference: &DocumentReference)
    -> Result<String, ImportError> {
        if let Some(ref id) = reference.id {
            if self.services.handles.is_handle(id) {
                if let Some(object) = self.services.catalog.by_handle(id)? {
                    return Ok(object.reference);
                }
            }

            if let Some(object) = self.services.catalog.resolve(id)? {
                return Ok(object.reference);
            }
        }

        if let Some(ref location) = reference.location {
            let joined = object_dir.join(location.trim_start_matches("./"));

            if let Some(text) = joined.to_str() {
                if let Some(object) = self.services.catalog.resolve(text)? {
                    return Ok(object.reference);
                }
            }

            if let Some(object) = self.services.catalog.resolve(location)? {
                return Ok(object.reference);
            }
        }

        Err(ImportError::ArchiveLookup(
            reference.id.as_deref()
                .or(reference.location.as_deref())
                .unwrap_or("(empty reference)")
                .to_string()))
    }

    /// Run the type checker over a resource, if policy says it needs it.
    ///
    /// Returns whether the content is archivable and, when a check ran, the
    /// detected media type. Checker failures are recoverable and reported as
    /// problems.
    fn typecheck(
        &self,
        ctx: &mut ImportContext,
        object: &ArchiveObject,
        name: &str,
    ) -> Result<Option<(bool, Option<String>)>, ImportError> {
        let cfg = &self.config.typecheck;

        if !should_typecheck(true, object.on_site, object.size,
                cfg.recheck_limit) {
            return Ok(None);
        }

        if object.size > cfg.warn_limit {
            info!("Type-checking large file {} ({} bytes)",
                name, object.size);
        }

        let verdict = match self.services.checker.check(&object.location, name) {
            Ok(verdict) => verdict,
            Err(err) => {
                ctx.problems.push(ImportProblem::file(name,
                        "type check did not complete")
                    .caused_by(&err));
                return Ok(None);
            }
        };

        if let Some(ref declared) = object.mime {
            if *declared != verdict.mime {
                ctx.problems.push(ImportProblem::file(name, format!(
                    "declared type {} but content looks like {}",
                    declared, verdict.mime)));
            }
        }

        let area = archive_area(&object.location, &self.config.storage.archive);

        if !self.services.checker.accepts(verdict.judgement, &area) {
            ctx.problems.push(ImportProblem::file(name, format!(
                "content judged {} is not accepted in {}: {}",
                verdict.judgement, area, verdict.analysis)));
            return Ok(Some((false, Some(verdict.mime))));
        }

        Ok(Some((true, Some(verdict.mime))))
    }

    /// Copy a metadata document into the workspace staging area.
    fn stage_metadata(&self, workspace: i32, object: &ArchiveObject, name: &str)
    -> Result<PathBuf, ImportError> {
        let dir = self.config.storage.workspace_dir(workspace);
        fs::create_dir_all(&dir)?;

        let target = utils::next_available_name(&dir, name);
        fs::copy(&object.location, &target)?;

        Ok(target)
    }

    /// Create an external leaf for an object shared with other parts of the
    /// archive.
    fn create_external(
        &self,
        dbconn: &Connection,
        ctx: &mut ImportContext,
        object: &ArchiveObject,
        parent: Option<ParentLink>,
    ) -> Result<WorkspaceNode, ImportError> {
        let name = object_name(object);

        let node = WorkspaceNode::create(dbconn, &db::NewWorkspaceNode {
            workspace: ctx.workspace,
            archive_ref: Some(&object.reference),
            archive_location: object.location.to_str(),
            staging_location: None,
            origin_location: object.location.to_str(),
            name: &name,
            kind: NodeKind::Unknown,
            mime: object.mime.as_deref(),
            status: NodeStatus::External,
            pid: object.pid.as_deref(),
            archivable: false,
        })?;

        self.link_to_parent(dbconn, ctx, &node, parent)?;

        Ok(node)
    }

    fn link_to_parent(
        &self,
        dbconn: &Connection,
        ctx: &mut ImportContext,
        node: &WorkspaceNode,
        parent: Option<ParentLink>,
    ) -> Result<(), ImportError> {
        let parent = match parent {
            Some(parent) => parent,
            None => return Ok(()),
        };

        match WorkspaceNode::link(dbconn, parent.node.id, node.id,
                parent.reference) {
            Ok(true) => {}
            Ok(false) => {
                // The child was linked through an earlier reference. Keep the
                // first link and note the duplicate.
                ctx.problems.push(ImportProblem::unmatched(parent.node.id,
                    parent.reference, "already linked elsewhere in this tree"));
            }
            Err(err) => {
                ctx.problems.push(ImportProblem::link(parent.node.id, node.id,
                    "could not record link", &err));
            }
        }

        Ok(())
    }

    /// Feed files left in the workspace's orphan directory through upload
    /// processing.
    fn sweep_orphans(&self, workspace: i32)
    -> Result<Vec<ImportProblem>, ImportError> {
        let dir = self.config.storage.orphan_dir(workspace);

        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }

        if files.is_empty() {
            return Ok(Vec::new());
        }

        info!("Sweeping {} orphaned files into workspace {}",
            files.len(), workspace);

        let db = self.pool.get()?;
        let mut ws = Workspace::by_id(&*db, workspace)?;

        let report = upload::process_files(
            &*db, self.config, &self.services, &mut ws, &files)?;

        Ok(report.problems)
    }

    /// Best-effort recording of a fatal import error on the workspace row.
    fn record_failure(&self, workspace: i32, error: &ImportError) {
        let result = self.pool.get()
            .map_err(failure::Error::from)
            .and_then(|db| {
                let mut ws = Workspace::by_id(&*db, workspace)?;
                ws.set_status(&*db, WorkspaceStatus::Initializing,
                    Some(&error.to_string()))?;
                Ok(())
            });

        if let Err(err) = result {
            error!("Could not record import failure on workspace {}: {}",
                workspace, err);
        }
    }
}

/// Display name for an archive object.
fn object_name(object: &ArchiveObject) -> String {
    object.location.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| object.reference.clone())
}

/// Does this file need a (re-)check during import?
///
/// Content already archived on-site is trusted above the re-check limit;
/// everything else is checked.
pub(crate) fn should_typecheck(
    archived: bool,
    on_site: bool,
    size: u64,
    recheck_limit: u64,
) -> bool {
    !(archived && on_site && size > recheck_limit)
}

/// Top-level archive area a location falls under, for policy lookup.
fn archive_area(location: &Path, archive_root: &Path) -> String {
    location.strip_prefix(archive_root).ok()
        .and_then(|rel| rel.components().next())
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .unwrap_or_else(|| "*".to_string())
}

#[derive(Debug, Fail)]
pub enum ImportError {
    /// The archive catalog does not know this reference.
    #[fail(display = "Archive object {} does not exist", _0)]
    ArchiveLookup(String),
    /// A metadata document references one of its own ancestors.
    #[fail(display = "Circular reference to {}", _0)]
    Circular(String),
    /// A metadata document could not be parsed.
    #[fail(display = "Cannot read metadata document: {}", _0)]
    Document(#[cause] ServiceError),
    /// A collaborator failed.
    #[fail(display = "{}", _0)]
    Service(#[cause] ServiceError),
    /// Database error.
    #[fail(display = "Database error: {}", _0)]
    Database(#[cause] DbError),
    /// Error obtaining a database connection.
    #[fail(display = "Cannot obtain database connection: {}", _0)]
    DbPool(#[cause] r2d2::Error),
    /// The workspace could not be loaded.
    #[fail(display = "{}", _0)]
    Workspace(#[cause] FindWorkspaceError),
    /// Orphan sweeping failed inside upload processing.
    #[fail(display = "{}", _0)]
    Upload(#[cause] UploadError),
    /// An operating system error.
    #[fail(display = "System error: {}", _0)]
    System(#[cause] io::Error),
}

impl_from! { for ImportError ;
    ServiceError => |e| ImportError::Service(e),
    DbError => |e| ImportError::Database(e),
    r2d2::Error => |e| ImportError::DbPool(e),
    FindWorkspaceError => |e| ImportError::Workspace(e),
    UploadError => |e| ImportError::Upload(e),
    io::Error => |e| ImportError::System(e),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archived_on_site_content_is_trusted_above_the_limit() {
        assert!(!should_typecheck(true, true, 9_000_000, 8_000_000));
        assert!(should_typecheck(true, true, 7_000_000, 8_000_000));
    }

    #[test]
    fn off_site_and_new_content_is_always_checked() {
        assert!(should_typecheck(true, false, 9_000_000, 8_000_000));
        assert!(should_typecheck(false, true, 9_000_000, 8_000_000));
        assert!(should_typecheck(false, false, 1, 8_000_000));
    }

    #[test]
    fn check_decision_is_stable() {
        for &(archived, on_site, size) in &[
            (true, true, 10_u64),
            (true, true, 10_000_000),
            (false, true, 10_000_000),
        ] {
            let first = should_typecheck(archived, on_site, size, 8_000_000);
            let again = should_typecheck(archived, on_site, size, 8_000_000);
            assert_eq!(first, again);
        }
    }

    #[test]
    fn area_is_the_top_directory_under_the_archive_root() {
        let root = Path::new("/data/archive");

        assert_eq!(
            archive_area(Path::new("/data/archive/music/a/b.wav"), root),
            "music");
        assert_eq!(
            archive_area(Path::new("/elsewhere/b.wav"), root),
            "*");
    }

    #[test]
    fn a_second_reference_to_an_imported_object_is_not_a_cycle() {
        let mut visited = HashSet::new();
        visited.insert("obj-1".to_string());
        visited.insert("obj-2".to_string());
        let stack = vec!["obj-1".to_string()];

        // obj-2 finished importing as a sibling; meeting it again links it,
        // it does not abort the run.
        assert_eq!(
            classify_entry(&stack, &visited, "obj-2"),
            TreeEntry::Revisit);
        assert_eq!(
            classify_entry(&stack, &visited, "obj-3"),
            TreeEntry::Fresh);
    }

    #[test]
    fn a_reference_back_to_an_ancestor_is_a_cycle() {
        let mut visited = HashSet::new();
        visited.insert("obj-1".to_string());
        visited.insert("obj-2".to_string());
        let stack = vec!["obj-1".to_string(), "obj-2".to_string()];

        assert_eq!(
            classify_entry(&stack, &visited, "obj-1"),
            TreeEntry::Cycle);
        assert_eq!(
            classify_entry(&stack, &visited, "obj-2"),
            TreeEntry::Cycle);
    }

    #[test]
    fn object_names_fall_back_to_the_reference() {
        let object = ArchiveObject {
            reference: "obj-1".to_string(),
            location: PathBuf::from("/data/archive/music/a.wav"),
            size: 10,
            on_site: true,
            mime: None,
            pid: None,
            parents: Vec::new(),
        };

        assert_eq!(object_name(&object), "a.wav");

        let rootless = ArchiveObject {
            location: PathBuf::from("/"),
            ..object
        };

        assert_eq!(object_name(&rootless), "obj-1");
    }
}
